// Counterpoint rule evaluation: the capability seam for hard voice rules.
//
// The invariant checker is polymorphic over a small rule-evaluator
// capability set: parallel-perfect detection and crossing detection. The
// concrete FugueRuleEvaluator implements both for the fugue texture (voice 0
// highest, voices descending in register). Callers that need different
// stylistic rules supply their own implementation.
//
// The evaluator reads two pieces of context, both read-only views: the
// vertical snapshot (what is sounding now) and the counterpoint view (each
// voice's previous pitch, for motion analysis).

use serde::{Deserialize, Serialize};

use crate::note::{MAX_VOICES, NoteEvent, Tick};

/// Pitches sounding at one tick, one slot per voice (0 = silence).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerticalSnapshot {
    pub pitches: [u8; MAX_VOICES],
    pub num_voices: u8,
}

impl VerticalSnapshot {
    /// Build from placed notes: the pitch sounding in each voice at `tick`.
    pub fn from_notes(notes: &[NoteEvent], tick: Tick, num_voices: u8) -> Self {
        let mut snap = VerticalSnapshot {
            num_voices,
            ..Default::default()
        };
        for note in notes {
            if usize::from(note.voice) < MAX_VOICES
                && note.voice < num_voices
                && note.start_tick <= tick
                && note.end_tick() > tick
            {
                snap.pitches[usize::from(note.voice)] = note.pitch;
            }
        }
        snap
    }

    /// Lowest sounding pitch, if any voice is sounding.
    pub fn bass_pitch(&self) -> Option<u8> {
        self.pitches[..usize::from(self.num_voices).min(MAX_VOICES)]
            .iter()
            .copied()
            .filter(|&p| p > 0)
            .min()
    }

    /// Iterate sounding (voice, pitch) pairs.
    pub fn sounding(&self) -> impl Iterator<Item = (usize, u8)> + '_ {
        self.pitches[..usize::from(self.num_voices).min(MAX_VOICES)]
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p > 0)
            .map(|(v, &p)| (v, p))
    }
}

/// Read-only motion context: each voice's previous pitch (0 = none).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterpointView {
    pub prev_pitches: [u8; MAX_VOICES],
}

/// Interval class 0-11 between two pitches.
pub fn interval_class(a: u8, b: u8) -> u8 {
    ((i32::from(a) - i32::from(b)).unsigned_abs() % 12) as u8
}

/// Perfect consonance: unison, fifth, octave (mod 12).
pub fn is_perfect_consonance(a: u8, b: u8) -> bool {
    matches!(interval_class(a, b), 0 | 7)
}

/// Consonant interval class: unison, 3rds, 4th, 5th, 6ths.
pub fn is_consonant(a: u8, b: u8) -> bool {
    matches!(interval_class(a, b), 0 | 3 | 4 | 5 | 7 | 8 | 9)
}

/// Dissonant interval class: 2nds, tritone, 7ths.
pub fn is_dissonant(a: u8, b: u8) -> bool {
    !is_consonant(a, b)
}

/// Capability set consumed by the invariant checker.
pub trait RuleEvaluator {
    /// Would placing `candidate` in `voice` create parallel fifths or
    /// octaves against any currently sounding voice?
    fn parallel_perfect(
        &self,
        view: &CounterpointView,
        snap: &VerticalSnapshot,
        voice: usize,
        candidate: u8,
    ) -> bool;

    /// Would placing `candidate` in `voice` cross another voice's sounding
    /// pitch in the wrong direction?
    fn crossing(&self, snap: &VerticalSnapshot, voice: usize, candidate: u8) -> bool;
}

/// Rule evaluator for fugue textures: voice 0 is the top voice and registers
/// descend with the voice index.
#[derive(Debug, Clone, Copy, Default)]
pub struct FugueRuleEvaluator;

impl RuleEvaluator for FugueRuleEvaluator {
    fn parallel_perfect(
        &self,
        view: &CounterpointView,
        snap: &VerticalSnapshot,
        voice: usize,
        candidate: u8,
    ) -> bool {
        if voice >= MAX_VOICES {
            return false;
        }
        let own_prev = view.prev_pitches[voice];
        if own_prev == 0 || own_prev == candidate {
            return false; // no motion, no parallel
        }
        let own_motion = i32::from(candidate) - i32::from(own_prev);

        for (other, other_pitch) in snap.sounding() {
            if other == voice {
                continue;
            }
            let other_prev = view.prev_pitches[other];
            if other_prev == 0 || other_prev == other_pitch {
                continue; // oblique motion is always safe
            }
            let other_motion = i32::from(other_pitch) - i32::from(other_prev);
            if own_motion.signum() != other_motion.signum() {
                continue;
            }
            let prev_ic = interval_class(own_prev, other_prev);
            let curr_ic = interval_class(candidate, other_pitch);
            // Perfect interval reached in parallel motion from the same
            // perfect interval class.
            if (curr_ic == 7 && prev_ic == 7) || (curr_ic == 0 && prev_ic == 0) {
                return true;
            }
        }
        false
    }

    fn crossing(&self, snap: &VerticalSnapshot, voice: usize, candidate: u8) -> bool {
        for (other, other_pitch) in snap.sounding() {
            if other == voice {
                continue;
            }
            // A higher-indexed voice must stay below, a lower-indexed voice
            // above.
            if other < voice && candidate > other_pitch {
                return true;
            }
            if other > voice && candidate < other_pitch {
                return true;
            }
        }
        false
    }
}
