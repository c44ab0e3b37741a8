// Motif transformations: pure functions over note sequences.
//
// Every function returns a fresh vector and leaves its input untouched.
// Motifs are normalized so their first onset sits at tick 0 before they are
// stored or returned; transformations that re-anchor take an explicit
// start_tick. Pitch arithmetic clamps to the MIDI range [0, 127]; diatonic
// variants work in scale-degree space so the result stays in the scale.

use serde::{Deserialize, Serialize};

use crate::note::{NoteEvent, Tick, clamp_pitch};
use crate::scale::{Key, ScaleType, absolute_degree_to_pitch, pitch_to_absolute_degree};

/// Transformation operations available to the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotifOp {
    /// Identity copy.
    Original,
    /// Diatonic inversion around the first pitch.
    Invert,
    /// Reverse note order preserving rhythm.
    Retrograde,
    /// Halve all durations.
    Diminish,
    /// Double all durations.
    Augment,
    /// First half of the motif.
    Fragment,
    /// Diatonic sequential transposition (one repetition).
    Sequence,
}

/// Total span of a motif: first onset to last release. 0 for empty input.
pub fn motif_duration(notes: &[NoteEvent]) -> Tick {
    if notes.is_empty() {
        return 0;
    }
    let min_start = notes.iter().map(|n| n.start_tick).min().unwrap_or(0);
    let max_end = notes.iter().map(|n| n.end_tick()).max().unwrap_or(0);
    max_end - min_start
}

/// Shift a motif so its earliest onset is tick 0.
pub fn normalize_to_tick_zero(notes: &[NoteEvent]) -> Vec<NoteEvent> {
    let Some(offset) = notes.iter().map(|n| n.start_tick).min() else {
        return Vec::new();
    };
    notes
        .iter()
        .map(|n| NoteEvent {
            start_tick: n.start_tick - offset,
            ..*n
        })
        .collect()
}

/// Chromatic mirror around a pivot pitch: new = 2 * pivot - old.
pub fn invert(notes: &[NoteEvent], pivot: u8) -> Vec<NoteEvent> {
    notes
        .iter()
        .map(|n| NoteEvent {
            pitch: clamp_pitch(2 * i32::from(pivot) - i32::from(n.pitch), 0, 127),
            ..*n
        })
        .collect()
}

/// Mirror in scale-degree space: inverted diatonic contour stays diatonic.
pub fn invert_diatonic(
    notes: &[NoteEvent],
    pivot: u8,
    key: Key,
    scale: ScaleType,
) -> Vec<NoteEvent> {
    let pivot_degree = pitch_to_absolute_degree(pivot, key, scale);
    notes
        .iter()
        .map(|n| {
            let degree = pitch_to_absolute_degree(n.pitch, key, scale);
            NoteEvent {
                pitch: absolute_degree_to_pitch(2 * pivot_degree - degree, key, scale),
                ..*n
            }
        })
        .collect()
}

/// Reverse the pitch order; durations and inter-onset gaps appear in
/// reversed order, re-anchored at start_tick.
pub fn retrograde(notes: &[NoteEvent], start_tick: Tick) -> Vec<NoteEvent> {
    if notes.is_empty() {
        return Vec::new();
    }
    let count = notes.len();
    let origin = notes[0].start_tick;

    // Inter-note gaps of the forward motif; overlap counts as zero gap.
    let mut gaps: Vec<Tick> = Vec::with_capacity(count - 1);
    for pair in notes.windows(2) {
        let end = pair[0].start_tick - origin + pair[0].duration;
        let next = pair[1].start_tick - origin;
        gaps.push(next.saturating_sub(end));
    }

    let mut result = Vec::with_capacity(count);
    let mut tick = start_tick;
    for idx in 0..count {
        let src = &notes[count - 1 - idx];
        result.push(NoteEvent {
            start_tick: tick,
            ..*src
        });
        tick += src.duration;
        if idx + 1 < count {
            tick += gaps[count - 2 - idx];
        }
    }
    result
}

/// Scale offsets and durations up by an integer factor.
pub fn augment(notes: &[NoteEvent], start_tick: Tick, factor: u32) -> Vec<NoteEvent> {
    let factor = factor.max(1);
    let Some(origin) = notes.iter().map(|n| n.start_tick).min() else {
        return Vec::new();
    };
    notes
        .iter()
        .map(|n| NoteEvent {
            start_tick: start_tick + (n.start_tick - origin) * factor,
            duration: n.duration * factor,
            ..*n
        })
        .collect()
}

/// Divide offsets and durations by an integer factor; durations floor at 1.
pub fn diminish(notes: &[NoteEvent], start_tick: Tick, factor: u32) -> Vec<NoteEvent> {
    let factor = factor.max(1);
    let Some(origin) = notes.iter().map(|n| n.start_tick).min() else {
        return Vec::new();
    };
    notes
        .iter()
        .map(|n| NoteEvent {
            start_tick: start_tick + (n.start_tick - origin) / factor,
            duration: (n.duration / factor).max(1),
            ..*n
        })
        .collect()
}

/// Chromatic transposition, clamped to [0, 127].
pub fn transpose(notes: &[NoteEvent], semitones: i32) -> Vec<NoteEvent> {
    notes
        .iter()
        .map(|n| NoteEvent {
            pitch: clamp_pitch(i32::from(n.pitch) + semitones, 0, 127),
            ..*n
        })
        .collect()
}

/// Diatonic transposition by scale-degree steps.
pub fn transpose_diatonic(
    notes: &[NoteEvent],
    degree_steps: i32,
    key: Key,
    scale: ScaleType,
) -> Vec<NoteEvent> {
    notes
        .iter()
        .map(|n| {
            let degree = pitch_to_absolute_degree(n.pitch, key, scale);
            NoteEvent {
                pitch: absolute_degree_to_pitch(degree + degree_steps, key, scale),
                ..*n
            }
        })
        .collect()
}

/// Chromatic sequence: `repetitions` copies, copy r transposed by
/// `interval_step * r` semitones, placed end to end from start_tick.
/// The original statement is not included.
pub fn sequence(
    motif: &[NoteEvent],
    repetitions: u32,
    interval_step: i32,
    start_tick: Tick,
) -> Vec<NoteEvent> {
    sequence_impl(motif, repetitions, start_tick, |notes, rep| {
        transpose(notes, interval_step * rep)
    })
}

/// Diatonic sequence: each repetition moves by `degree_step` scale degrees,
/// so interval quality adjusts to the key (the Baroque practice).
pub fn sequence_diatonic(
    motif: &[NoteEvent],
    repetitions: u32,
    degree_step: i32,
    start_tick: Tick,
    key: Key,
    scale: ScaleType,
) -> Vec<NoteEvent> {
    sequence_impl(motif, repetitions, start_tick, |notes, rep| {
        transpose_diatonic(notes, degree_step * rep, key, scale)
    })
}

fn sequence_impl(
    motif: &[NoteEvent],
    repetitions: u32,
    start_tick: Tick,
    transpose_rep: impl Fn(&[NoteEvent], i32) -> Vec<NoteEvent>,
) -> Vec<NoteEvent> {
    if motif.is_empty() || repetitions == 0 {
        return Vec::new();
    }
    let span = motif_duration(motif);
    let normalized = normalize_to_tick_zero(motif);
    let mut result = Vec::with_capacity(motif.len() * repetitions as usize);
    for rep in 1..=repetitions {
        let transposed = transpose_rep(&normalized, rep as i32);
        let offset = start_tick + span * (rep - 1);
        for note in transposed {
            result.push(NoteEvent {
                start_tick: note.start_tick + offset,
                ..note
            });
        }
    }
    result
}

/// Split a motif into `num_fragments` even slices (by note count).
pub fn fragment(notes: &[NoteEvent], num_fragments: usize) -> Vec<Vec<NoteEvent>> {
    let mut fragments = Vec::new();
    if num_fragments == 0 || notes.is_empty() {
        return fragments;
    }
    let frag_size = (notes.len() / num_fragments).max(1);
    let mut idx = 0;
    while idx < notes.len() && fragments.len() < num_fragments {
        let end = (idx + frag_size).min(notes.len());
        fragments.push(normalize_to_tick_zero(&notes[idx..end]));
        idx += frag_size;
    }
    fragments
}

/// Last `num_notes` notes of a sequence (the whole sequence if shorter).
pub fn extract_tail(notes: &[NoteEvent], num_notes: usize) -> Vec<NoteEvent> {
    if num_notes >= notes.len() {
        return notes.to_vec();
    }
    notes[notes.len() - num_notes..].to_vec()
}

/// Dispatch a MotifOp to its transform. Input must be tick-normalized.
pub fn apply_motif_op(
    notes: &[NoteEvent],
    op: MotifOp,
    key: Key,
    scale: ScaleType,
    sequence_step: i32,
) -> Vec<NoteEvent> {
    if notes.is_empty() {
        return Vec::new();
    }
    match op {
        MotifOp::Original => notes.to_vec(),
        MotifOp::Invert => invert_diatonic(notes, notes[0].pitch, key, scale),
        MotifOp::Retrograde => retrograde(notes, 0),
        MotifOp::Diminish => diminish(notes, 0, 2),
        MotifOp::Augment => augment(notes, 0, 2),
        MotifOp::Fragment => {
            let fragments = fragment(notes, 2);
            match fragments.into_iter().next() {
                Some(first) if !first.is_empty() => first,
                _ => notes.to_vec(),
            }
        }
        MotifOp::Sequence => {
            sequence_diatonic(notes, 1, sequence_step, motif_duration(notes), key, scale)
        }
    }
}
