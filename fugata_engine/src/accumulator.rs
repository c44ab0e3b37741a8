// Section accumulator: running rhythm/harmony histograms vs. reference.
//
// Layer 3 support. As notes are placed, their duration category and scale
// degree are counted into fixed-size histograms. Jensen-Shannon divergence
// against compiled-in reference distributions (drawn from Bach chorale and
// organ-fugue profiles) measures how far the section has drifted from the
// reference style; the Gravity scorer turns that into a penalty.
//
// JSD is computed base-2 so it lives in [0, 1]. Accumulation is done in f64;
// the result is returned as f32 like every other score.

use serde::{Deserialize, Serialize};

use crate::note::Tick;

/// Number of rhythm histogram bins.
pub const RHYTHM_BINS: usize = 7;
/// Number of harmony histogram bins (scale degrees).
pub const HARMONY_BINS: usize = 7;

/// Structural phase of the piece, coarse-grained. Affects scoring weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FuguePhase {
    #[default]
    Establish,
    Develop,
    Resolve,
    Conclude,
}

/// Reference rhythm distribution (probability x 10 000 per bin).
/// Sixteenths and eighths carry Baroque figuration; long values are rare.
const RHYTHM_REFERENCE: [u16; RHYTHM_BINS] = [2800, 3400, 600, 2000, 300, 700, 200];

/// Reference harmony distribution (probability x 10 000 per scale degree).
/// Tonic and dominant degrees dominate.
const HARMONY_REFERENCE: [u16; HARMONY_BINS] = [2400, 1100, 1300, 1000, 2100, 900, 1200];

/// Map a duration in ticks to one of the 7 rhythm bins.
pub fn rhythm_bin(duration: Tick) -> usize {
    match duration {
        0..=179 => 0,    // sixteenth
        180..=299 => 1,  // eighth
        300..=479 => 2,  // dotted eighth
        480..=719 => 3,  // quarter
        720..=959 => 4,  // dotted quarter
        960..=1919 => 5, // half
        _ => 6,          // whole and longer
    }
}

/// Running histograms for one section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionAccumulator {
    pub rhythm_counts: [u32; RHYTHM_BINS],
    pub harmony_counts: [u32; HARMONY_BINS],
    pub total_rhythm: u32,
    pub total_harmony: u32,
    pub current_phase: FuguePhase,
}

impl SectionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a placed note's rhythm and harmony contribution.
    pub fn record_note(&mut self, duration: Tick, degree: i32) {
        self.rhythm_counts[rhythm_bin(duration)] += 1;
        self.total_rhythm += 1;
        self.harmony_counts[degree.rem_euclid(7) as usize] += 1;
        self.total_harmony += 1;
    }

    /// Reset all counts (phase is kept).
    pub fn reset(&mut self) {
        self.rhythm_counts = [0; RHYTHM_BINS];
        self.harmony_counts = [0; HARMONY_BINS];
        self.total_rhythm = 0;
        self.total_harmony = 0;
    }

    /// JSD between the accumulated rhythm and the reference, in [0, 1].
    /// An empty accumulator diverges by 0.
    pub fn rhythm_jsd(&self) -> f32 {
        if self.total_rhythm == 0 {
            return 0.0;
        }
        let p = normalize_counts(&self.rhythm_counts);
        let q = normalize_reference(&RHYTHM_REFERENCE);
        jensen_shannon(&p, &q)
    }

    /// JSD between the accumulated harmony and the reference, in [0, 1].
    pub fn harmony_jsd(&self) -> f32 {
        if self.total_harmony == 0 {
            return 0.0;
        }
        let p = normalize_counts(&self.harmony_counts);
        let q = normalize_reference(&HARMONY_REFERENCE);
        jensen_shannon(&p, &q)
    }
}

fn normalize_counts<const N: usize>(counts: &[u32; N]) -> [f64; N] {
    let total: u32 = counts.iter().sum();
    let mut out = [0.0f64; N];
    if total == 0 {
        return out;
    }
    for (slot, &count) in out.iter_mut().zip(counts.iter()) {
        *slot = f64::from(count) / f64::from(total);
    }
    out
}

fn normalize_reference<const N: usize>(reference: &[u16; N]) -> [f64; N] {
    let total: u32 = reference.iter().map(|&c| u32::from(c)).sum();
    let mut out = [0.0f64; N];
    for (slot, &count) in out.iter_mut().zip(reference.iter()) {
        *slot = f64::from(count) / f64::from(total);
    }
    out
}

/// Jensen-Shannon divergence between two distributions, base-2 ([0, 1]).
pub fn jensen_shannon<const N: usize>(p: &[f64; N], q: &[f64; N]) -> f32 {
    let mut kl_pm = 0.0f64;
    let mut kl_qm = 0.0f64;
    for idx in 0..N {
        let m = 0.5 * (p[idx] + q[idx]);
        if m <= 0.0 {
            continue;
        }
        if p[idx] > 0.0 {
            kl_pm += p[idx] * (p[idx] / m).ln();
        }
        if q[idx] > 0.0 {
            kl_qm += q[idx] * (q[idx] / m).ln();
        }
    }
    let jsd = 0.5 * (kl_pm + kl_qm) / std::f64::consts::LN_2;
    jsd.clamp(0.0, 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rhythm_bins() {
        assert_eq!(rhythm_bin(120), 0);
        assert_eq!(rhythm_bin(240), 1);
        assert_eq!(rhythm_bin(360), 2);
        assert_eq!(rhythm_bin(480), 3);
        assert_eq!(rhythm_bin(720), 4);
        assert_eq!(rhythm_bin(960), 5);
        assert_eq!(rhythm_bin(1920), 6);
    }

    #[test]
    fn test_reference_distributions_sum_to_10000() {
        let rhythm: u32 = RHYTHM_REFERENCE.iter().map(|&c| u32::from(c)).sum();
        let harmony: u32 = HARMONY_REFERENCE.iter().map(|&c| u32::from(c)).sum();
        assert_eq!(rhythm, 10_000);
        assert_eq!(harmony, 10_000);
    }

    #[test]
    fn test_counts_match_recorded_notes() {
        let mut acc = SectionAccumulator::new();
        acc.record_note(480, 0);
        acc.record_note(240, 4);
        acc.record_note(240, 4);
        assert_eq!(acc.total_rhythm, 3);
        assert_eq!(acc.total_harmony, 3);
        assert_eq!(acc.rhythm_counts[3], 1);
        assert_eq!(acc.rhythm_counts[1], 2);
        assert_eq!(acc.harmony_counts[0], 1);
        assert_eq!(acc.harmony_counts[4], 2);
        // Negative degrees normalize mod 7.
        acc.record_note(480, -3);
        assert_eq!(acc.harmony_counts[4], 3);
    }

    #[test]
    fn test_empty_accumulator_diverges_zero() {
        let acc = SectionAccumulator::new();
        assert_eq!(acc.rhythm_jsd(), 0.0);
        assert_eq!(acc.harmony_jsd(), 0.0);
    }

    #[test]
    fn test_identical_distributions_diverge_zero() {
        let p = [0.5, 0.25, 0.25];
        assert!(jensen_shannon(&p, &p).abs() < 1e-6);
    }

    #[test]
    fn test_disjoint_distributions_diverge_one() {
        let p = [1.0, 0.0];
        let q = [0.0, 1.0];
        let jsd = jensen_shannon(&p, &q);
        assert!((jsd - 1.0).abs() < 1e-6, "jsd {jsd}");
    }

    #[test]
    fn test_jsd_bounded_and_symmetric() {
        let p = [0.7, 0.2, 0.1];
        let q = [0.1, 0.3, 0.6];
        let a = jensen_shannon(&p, &q);
        let b = jensen_shannon(&q, &p);
        assert!((0.0..=1.0).contains(&a));
        assert!((a - b).abs() < 1e-6);
    }

    #[test]
    fn test_reference_like_section_diverges_little() {
        let mut acc = SectionAccumulator::new();
        // Feed durations roughly matching the reference mix.
        for _ in 0..28 {
            acc.record_note(120, 0);
        }
        for _ in 0..34 {
            acc.record_note(240, 4);
        }
        for _ in 0..20 {
            acc.record_note(480, 2);
        }
        for _ in 0..9 {
            acc.record_note(960, 1);
        }
        for _ in 0..9 {
            acc.record_note(360, 5);
        }
        assert!(acc.rhythm_jsd() < 0.25, "jsd {}", acc.rhythm_jsd());
    }

    #[test]
    fn test_reset_clears_counts_keeps_phase() {
        let mut acc = SectionAccumulator::new();
        acc.current_phase = FuguePhase::Resolve;
        acc.record_note(480, 0);
        acc.reset();
        assert_eq!(acc.total_rhythm, 0);
        assert_eq!(acc.harmony_counts, [0; HARMONY_BINS]);
        assert_eq!(acc.current_phase, FuguePhase::Resolve);
    }
}
