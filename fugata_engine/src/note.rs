// Note events: the symbolic output unit of the engine.
//
// A note is an immutable record of (tick, duration, pitch, velocity, voice)
// plus a provenance tag naming the subsystem that produced it. Downstream
// post-processing branches on the tag's protection level to decide whether a
// note may be rewritten; the episode generator only ever emits
// EpisodeMaterial (Flexible) notes.
//
// Tick conventions: 480 ticks per quarter note, 1920 per 4/4 bar. Durations
// are integer ticks >= 1; anything below a sixteenth (120 ticks) is dropped
// by the finalize pass.

use serde::{Deserialize, Serialize};

/// Absolute time position or span, in MIDI ticks.
pub type Tick = u32;

/// Ticks per quarter-note beat.
pub const TICKS_PER_BEAT: Tick = 480;
/// Ticks per bar in 4/4.
pub const TICKS_PER_BAR: Tick = 1920;
/// Ticks per sixteenth note, the minimum useful duration.
pub const SIXTEENTH: Tick = 120;
/// Ticks per eighth note.
pub const EIGHTH: Tick = 240;

/// Maximum voices the engine tracks.
pub const MAX_VOICES: usize = 6;

/// Default MIDI velocity for generated notes (organ registration).
pub const DEFAULT_VELOCITY: u8 = 80;

/// Provenance tag: which subsystem produced a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteSource {
    FugueSubject,
    FugueAnswer,
    Countersubject,
    EpisodeMaterial,
    FreeCounterpoint,
    Ornament,
    PedalPoint,
    Soggetto,
    Figura,
    Dance,
    Bass,
    Overture,
    Invention,
    Fughetta,
    Suspension,
    CanonDux,
    CanonComes,
    CanonFreeBass,
    QuodlibetMelody,
}

/// How strongly finalization must preserve a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProtectionLevel {
    /// Never modified.
    Immutable,
    /// Modified only through repair-by-shift.
    Structural,
    /// Freely rewritable.
    Flexible,
}

impl NoteSource {
    /// Protection level associated with each provenance tag.
    pub fn protection(self) -> ProtectionLevel {
        match self {
            NoteSource::FugueSubject
            | NoteSource::FugueAnswer
            | NoteSource::Soggetto
            | NoteSource::CanonDux
            | NoteSource::CanonComes
            | NoteSource::QuodlibetMelody => ProtectionLevel::Immutable,
            NoteSource::Countersubject
            | NoteSource::PedalPoint
            | NoteSource::Bass
            | NoteSource::Overture
            | NoteSource::Suspension => ProtectionLevel::Structural,
            NoteSource::EpisodeMaterial
            | NoteSource::FreeCounterpoint
            | NoteSource::Ornament
            | NoteSource::Figura
            | NoteSource::Dance
            | NoteSource::Invention
            | NoteSource::Fughetta
            | NoteSource::CanonFreeBass => ProtectionLevel::Flexible,
        }
    }
}

/// A single placed note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// Absolute start position in ticks.
    pub start_tick: Tick,
    /// Duration in ticks (>= 1).
    pub duration: Tick,
    /// MIDI pitch 0-127.
    pub pitch: u8,
    /// MIDI velocity 1-127.
    pub velocity: u8,
    /// Voice index, 0 = top voice.
    pub voice: u8,
    /// Which subsystem produced this note.
    pub source: NoteSource,
}

impl NoteEvent {
    /// End tick (exclusive).
    pub fn end_tick(&self) -> Tick {
        self.start_tick + self.duration
    }
}

/// Clamp an integer pitch into a MIDI range.
pub fn clamp_pitch(pitch: i32, lo: u8, hi: u8) -> u8 {
    pitch.clamp(i32::from(lo), i32::from(hi)) as u8
}

/// True on beats 1 and 3 of a 4/4 bar (tick offsets 0 and 960).
pub fn is_strong_beat(tick: Tick) -> bool {
    let in_bar = tick % TICKS_PER_BAR;
    in_bar == 0 || in_bar == TICKS_PER_BEAT * 2
}

/// Round a duration to the sixteenth-note grid, never below one sixteenth.
pub fn quantize_duration(duration: Tick) -> Tick {
    let snapped = (duration + SIXTEENTH / 2) / SIXTEENTH * SIXTEENTH;
    snapped.max(SIXTEENTH)
}

/// Per-voice (lo, hi) MIDI range for fugue textures of up to six voices.
///
/// Voice 0 is the top voice. The last voice of a 4+ texture sits in the
/// pedal register (contains C2..C4 so tonic/dominant pedal anchors fit).
pub fn fugue_voice_range(voice: u8, num_voices: u8) -> (u8, u8) {
    if num_voices >= 4 && voice == num_voices - 1 {
        return (28, 55); // E1..G3 pedal register
    }
    match voice {
        0 => (60, 84), // C4..C6
        1 => (52, 76), // E3..E5
        2 => (45, 69), // A2..A4
        3 => (36, 60), // C2..C4
        4 => (33, 57),
        _ => (28, 52),
    }
}

/// Within-voice overlap dedup: the lightweight finalize pass.
///
/// Sorts by (voice, tick, duration descending), drops same-tick duplicates
/// within a voice (the longer note wins), truncates notes that run into the
/// next onset, and discards anything shorter than a sixteenth. Re-sorts the
/// result into the engine's (tick, voice) output order.
pub fn dedupe_voice_overlaps(notes: &mut Vec<NoteEvent>) {
    notes.sort_by(|a, b| {
        (a.voice, a.start_tick)
            .cmp(&(b.voice, b.start_tick))
            .then(b.duration.cmp(&a.duration))
    });

    let mut kept: Vec<NoteEvent> = Vec::with_capacity(notes.len());
    for note in notes.iter() {
        if let Some(prev) = kept.last_mut()
            && prev.voice == note.voice
        {
            if prev.start_tick == note.start_tick {
                continue; // same-tick duplicate, longer already kept
            }
            if prev.end_tick() > note.start_tick {
                prev.duration = note.start_tick - prev.start_tick;
            }
        }
        kept.push(*note);
    }
    kept.retain(|n| n.duration >= SIXTEENTH);
    kept.sort_by_key(|n| (n.start_tick, n.voice));
    *notes = kept;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(start: Tick, dur: Tick, pitch: u8, voice: u8) -> NoteEvent {
        NoteEvent {
            start_tick: start,
            duration: dur,
            pitch,
            velocity: DEFAULT_VELOCITY,
            voice,
            source: NoteSource::EpisodeMaterial,
        }
    }

    #[test]
    fn test_strong_beats() {
        assert!(is_strong_beat(0));
        assert!(is_strong_beat(960)); // beat 3
        assert!(is_strong_beat(TICKS_PER_BAR)); // next bar
        assert!(!is_strong_beat(480)); // beat 2
        assert!(!is_strong_beat(240)); // offbeat
    }

    #[test]
    fn test_quantize_duration() {
        assert_eq!(quantize_duration(130), 120);
        assert_eq!(quantize_duration(181), 240);
        assert_eq!(quantize_duration(5), 120); // floor at a sixteenth
        assert_eq!(quantize_duration(480), 480);
    }

    #[test]
    fn test_protection_levels() {
        assert_eq!(
            NoteSource::FugueSubject.protection(),
            ProtectionLevel::Immutable
        );
        assert_eq!(
            NoteSource::EpisodeMaterial.protection(),
            ProtectionLevel::Flexible
        );
        assert_eq!(NoteSource::Bass.protection(), ProtectionLevel::Structural);
    }

    #[test]
    fn test_dedupe_truncates_overlap() {
        let mut notes = vec![note(0, 960, 60, 0), note(480, 480, 62, 0)];
        dedupe_voice_overlaps(&mut notes);
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].duration, 480); // truncated at next onset
        assert_eq!(notes[1].start_tick, 480);
    }

    #[test]
    fn test_dedupe_same_tick_keeps_longer() {
        let mut notes = vec![note(0, 240, 60, 0), note(0, 480, 64, 0)];
        dedupe_voice_overlaps(&mut notes);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].pitch, 64);
        assert_eq!(notes[0].duration, 480);
    }

    #[test]
    fn test_dedupe_voices_independent() {
        let mut notes = vec![note(0, 960, 60, 0), note(480, 480, 48, 1)];
        dedupe_voice_overlaps(&mut notes);
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].duration, 960); // other voice does not truncate
    }

    #[test]
    fn test_dedupe_drops_sub_sixteenth() {
        let mut notes = vec![note(0, 130, 60, 0), note(100, 480, 62, 0)];
        dedupe_voice_overlaps(&mut notes);
        // First note truncated to 100 ticks, below a sixteenth, dropped.
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].pitch, 62);
    }

    #[test]
    fn test_dedupe_output_order() {
        let mut notes = vec![
            note(480, 240, 48, 1),
            note(0, 240, 60, 0),
            note(0, 240, 48, 1),
        ];
        dedupe_voice_overlaps(&mut notes);
        let order: Vec<(Tick, u8)> = notes.iter().map(|n| (n.start_tick, n.voice)).collect();
        assert_eq!(order, vec![(0, 0), (0, 1), (480, 1)]);
    }

    #[test]
    fn test_pedal_register_contains_anchor_octave() {
        let (lo, hi) = fugue_voice_range(3, 4);
        // Tonic anchors 36..=47 must fit for every key.
        assert!(lo <= 36 && hi >= 47);
    }
}
