// Motif pool: ranked, read-only fragments of the subject.
//
// Built in one pass from the subject (and countersubject, when present),
// then immutable for the life of the fugue. Entries carry fixed design
// scores so selection is a lookup, not a search:
//
//   1.0  subject head (first 4 notes, the most recognizable material)
//   0.9  subject characteristic (best 4-note window)
//   0.8  subject tail (last 3 notes)
//   0.7  countersubject head (if present)
//   0.6  fragments (subject split in two halves)
//
// The characteristic window is chosen by a fixed scoring rule: +0.3 rhythmic
// diversity, +0.3 contains a leap >= 3 semitones, +0.2 proximity to the
// opening, +0.2 contains the root pitch class.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::note::{NoteEvent, Tick};
use crate::transform::{MotifOp, fragment, normalize_to_tick_zero};

/// Origin tag for a pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotifTag {
    Head,
    Characteristic,
    Tail,
    Countersubject,
    Fragment,
}

/// One scored, tick-normalized motif in the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PooledMotif {
    pub notes: Vec<NoteEvent>,
    /// Higher = more characteristic of the subject.
    pub characteristic_score: f32,
    pub tag: MotifTag,
}

/// The read-only pool, ordered by descending characteristic score.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MotifPool {
    motifs: Vec<PooledMotif>,
}

const HEAD_LEN: usize = 4;
const CHARACTERISTIC_LEN: usize = 4;
const TAIL_LEN: usize = 3;
const NUM_FRAGMENTS: usize = 2;

impl MotifPool {
    /// Build the pool from a subject and optional countersubject.
    pub fn build(subject: &[NoteEvent], countersubject: &[NoteEvent]) -> Self {
        let mut motifs = Vec::new();
        if subject.is_empty() {
            return MotifPool { motifs };
        }

        let head_len = HEAD_LEN.min(subject.len());
        motifs.push(PooledMotif {
            notes: normalize_to_tick_zero(&subject[..head_len]),
            characteristic_score: 1.0,
            tag: MotifTag::Head,
        });

        if subject.len() > HEAD_LEN {
            motifs.push(PooledMotif {
                notes: characteristic_window(subject, CHARACTERISTIC_LEN),
                characteristic_score: 0.9,
                tag: MotifTag::Characteristic,
            });
        }

        if subject.len() >= TAIL_LEN {
            motifs.push(PooledMotif {
                notes: normalize_to_tick_zero(&subject[subject.len() - TAIL_LEN..]),
                characteristic_score: 0.8,
                tag: MotifTag::Tail,
            });
        }

        if !countersubject.is_empty() {
            let cs_len = HEAD_LEN.min(countersubject.len());
            motifs.push(PooledMotif {
                notes: normalize_to_tick_zero(&countersubject[..cs_len]),
                characteristic_score: 0.7,
                tag: MotifTag::Countersubject,
            });
        }

        if subject.len() >= NUM_FRAGMENTS {
            for frag in fragment(subject, NUM_FRAGMENTS) {
                motifs.push(PooledMotif {
                    notes: frag,
                    characteristic_score: 0.6,
                    tag: MotifTag::Fragment,
                });
            }
        }

        // Stable sort keeps equal-score entries in insertion order, so the
        // pool order is deterministic for a given subject.
        motifs.sort_by(|a, b| {
            b.characteristic_score
                .partial_cmp(&a.characteristic_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        MotifPool { motifs }
    }

    /// The highest-scored motif, or None for an empty pool.
    pub fn best(&self) -> Option<&PooledMotif> {
        self.motifs.first()
    }

    /// Motif at a rank (0 = best), or None past the end.
    pub fn by_rank(&self, rank: usize) -> Option<&PooledMotif> {
        self.motifs.get(rank)
    }

    /// All motifs, best first.
    pub fn motifs(&self) -> &[PooledMotif] {
        &self.motifs
    }

    pub fn len(&self) -> usize {
        self.motifs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.motifs.is_empty()
    }

    /// Preferred motif for an operation: Fragment ops take the first
    /// fragment entry, everything else the head.
    pub fn for_operation(&self, op: MotifOp) -> Option<&PooledMotif> {
        match op {
            MotifOp::Fragment => self
                .motifs
                .iter()
                .find(|m| m.tag == MotifTag::Fragment)
                .or_else(|| self.best()),
            _ => self.best(),
        }
    }

    /// Load a pre-built pool from a JSON file (subject analysis exported by
    /// an offline pass).
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        let pool: MotifPool = serde_json::from_str(&data)?;
        Ok(pool)
    }

    /// Serialize the pool to JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Rank of the motif `for_operation` would pick.
    pub fn rank_for_operation(&self, op: MotifOp) -> usize {
        match op {
            MotifOp::Fragment => self
                .motifs
                .iter()
                .position(|m| m.tag == MotifTag::Fragment)
                .unwrap_or(0),
            _ => 0,
        }
    }
}

/// Score one window by the fixed characteristic rule.
fn window_score(notes: &[NoteEvent], start: usize, len: usize, window_count: usize) -> f32 {
    let window = &notes[start..start + len];
    let mut score = 0.0f32;

    // Rhythmic diversity.
    let mut durations: Vec<Tick> = window.iter().map(|n| n.duration).collect();
    durations.sort_unstable();
    durations.dedup();
    score += 0.3 * durations.len() as f32 / len as f32;

    // Intervallic interest: any leap of 3+ semitones.
    let has_leap = window
        .windows(2)
        .any(|p| (i32::from(p[1].pitch) - i32::from(p[0].pitch)).abs() >= 3);
    if has_leap {
        score += 0.3;
    }

    // Proximity to the opening.
    let proximity = if window_count > 0 {
        1.0 - start as f32 / window_count as f32
    } else {
        1.0
    };
    score += 0.2 * proximity;

    // Tonal stability: contains the subject's root pitch class.
    let root_pc = notes[0].pitch % 12;
    if window.iter().any(|n| n.pitch % 12 == root_pc) {
        score += 0.2;
    }

    score
}

/// Best characteristic window of the subject, tick-normalized.
fn characteristic_window(notes: &[NoteEvent], len: usize) -> Vec<NoteEvent> {
    if notes.len() <= len {
        return normalize_to_tick_zero(notes);
    }
    let window_count = notes.len() - len + 1;
    let mut best_start = 0;
    let mut best_score = -1.0f32;
    for start in 0..window_count {
        let score = window_score(notes, start, len, window_count);
        if score > best_score {
            best_score = score;
            best_start = start;
        }
    }
    normalize_to_tick_zero(&notes[best_start..best_start + len])
}
