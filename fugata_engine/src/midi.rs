// MIDI output: note events to a Standard MIDI File.
//
// Converts a finalized note list into SMF Format 1: track 0 carries the
// tempo, then one track per voice on its own channel. Notes are deduped
// per voice before conversion so NoteOn/NoteOff pairs never interleave
// within a voice.
//
// Uses the `midly` crate. 480 ticks per quarter note, matching the engine's
// tick convention, so note ticks map through unchanged.

use std::path::Path;

use midly::{
    Format, Header, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};

use crate::note::{MAX_VOICES, NoteEvent, Tick, TICKS_PER_BEAT, dedupe_voice_overlaps};

/// Ticks per quarter note in the output file.
const TICKS_PER_QUARTER: u16 = TICKS_PER_BEAT as u16;

/// Church organ, the default registration for fugue playback.
const PROGRAM_ORGAN: u8 = 19;

/// Write notes to a MIDI file at `path`.
pub fn write_midi(
    notes: &[NoteEvent],
    tempo_bpm: u16,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let smf = notes_to_smf(notes, tempo_bpm);
    let mut buf = Vec::new();
    smf.write(&mut buf)?;
    std::fs::write(path, &buf)?;
    Ok(())
}

/// Convert notes to an in-memory SMF.
pub fn notes_to_smf(notes: &[NoteEvent], tempo_bpm: u16) -> Smf<'static> {
    let mut cleaned = notes.to_vec();
    dedupe_voice_overlaps(&mut cleaned);

    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));

    // Track 0: tempo.
    let tempo_bpm = tempo_bpm.max(1);
    let mut tempo_track: Track<'static> = Vec::new();
    let tempo_microseconds = 60_000_000 / u32::from(tempo_bpm);
    tempo_track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(midly::MetaMessage::Tempo(u24::new(tempo_microseconds))),
    });
    tempo_track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(midly::MetaMessage::EndOfTrack),
    });
    smf.tracks.push(tempo_track);

    let num_voices = cleaned
        .iter()
        .map(|n| usize::from(n.voice) + 1)
        .max()
        .unwrap_or(1)
        .min(MAX_VOICES);

    for voice in 0..num_voices {
        let channel = u4::new(voice as u8);
        let mut track: Track<'static> = Vec::new();

        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::ProgramChange {
                    program: u7::new(PROGRAM_ORGAN),
                },
            },
        });

        // (tick, is_off, pitch): offs sort before ons at the same tick.
        let mut boundaries: Vec<(Tick, bool, u8, u8)> = Vec::new();
        for note in cleaned.iter().filter(|n| usize::from(n.voice) == voice) {
            boundaries.push((note.start_tick, false, note.pitch, note.velocity));
            boundaries.push((note.end_tick(), true, note.pitch, 0));
        }
        boundaries.sort_by_key(|&(tick, is_off, pitch, _)| (tick, !is_off, pitch));

        let mut last_tick: Tick = 0;
        for (tick, is_off, pitch, velocity) in boundaries {
            let delta = tick - last_tick;
            last_tick = tick;
            let message = if is_off {
                MidiMessage::NoteOff {
                    key: u7::new(pitch),
                    vel: u7::new(0),
                }
            } else {
                MidiMessage::NoteOn {
                    key: u7::new(pitch),
                    vel: u7::new(velocity.clamp(1, 127)),
                }
            };
            track.push(TrackEvent {
                delta: u28::new(delta),
                kind: TrackEventKind::Midi { channel, message },
            });
        }

        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(midly::MetaMessage::EndOfTrack),
        });
        smf.tracks.push(track);
    }

    smf
}
