// Invariant checker: per-note hard and soft rules.
//
// Layer 2 of the constraint model. Hard violations reject the candidate
// outright; soft violations pass but raise recovery obligations. Checks run
// in a fixed order and short-circuit on the first hard failure:
//
//   1. voice range        (hard)
//   2. parallel perfects  (hard, delegated to the rule evaluator)
//   3. voice crossing     (hard under Reject policy, soft otherwise)
//   4. repeated pitch cap (hard)
//   5. adjacent spacing   (soft)

use serde::{Deserialize, Serialize};

use crate::counterpoint::{CounterpointView, RuleEvaluator, VerticalSnapshot};
use crate::note::Tick;

/// Phase-dependent crossing tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossingPolicy {
    /// Establish/Develop: temporary crossings permitted (soft).
    AllowTemporary,
    /// Resolve/Conclude: no crossings (hard).
    Reject,
}

/// Static per-section invariant parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InvariantSet {
    pub voice_range_lo: u8,
    pub voice_range_hi: u8,
    pub min_active_voices: u8,
    pub max_active_voices: u8,
    /// Adjacent-voice spacing cap in semitones (soft).
    pub max_adjacent_spacing: u8,
    pub crossing_policy: CrossingPolicy,
    /// Max consecutive identical pitches per voice (hard).
    pub hard_repeat_limit: u8,
}

impl Default for InvariantSet {
    fn default() -> Self {
        InvariantSet {
            voice_range_lo: 0,
            voice_range_hi: 127,
            min_active_voices: 1,
            max_active_voices: 4,
            max_adjacent_spacing: 24,
            crossing_policy: CrossingPolicy::AllowTemporary,
            hard_repeat_limit: 4,
        }
    }
}

/// Outcome of a per-note invariant check, with per-kind flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckResult {
    pub hard_violations: u8,
    pub soft_violations: u8,
    pub range_violation: bool,
    pub parallel_perfect: bool,
    pub crossing_violation: bool,
    pub repeat_violation: bool,
    pub spacing_violation: bool,
}

impl CheckResult {
    pub fn rejected(&self) -> bool {
        self.hard_violations > 0
    }

    pub fn has_soft(&self) -> bool {
        self.soft_violations > 0
    }
}

impl InvariantSet {
    /// Check a candidate against all invariants.
    ///
    /// `recent_pitches` is the voice's recent-pitch window, most recent
    /// last, used for the repeat cap. Short-circuits after the first hard
    /// violation.
    #[allow(clippy::too_many_arguments)]
    pub fn satisfies(
        &self,
        pitch: u8,
        voice: usize,
        _tick: Tick,
        snap: &VerticalSnapshot,
        rules: Option<&dyn RuleEvaluator>,
        view: Option<&CounterpointView>,
        recent_pitches: &[u8],
    ) -> CheckResult {
        let mut result = CheckResult::default();

        // 1. Range (hard).
        if pitch < self.voice_range_lo || pitch > self.voice_range_hi {
            result.range_violation = true;
            result.hard_violations += 1;
            return result;
        }

        // 2. Parallel perfects (hard).
        if let (Some(rules), Some(view)) = (rules, view)
            && rules.parallel_perfect(view, snap, voice, pitch)
        {
            result.parallel_perfect = true;
            result.hard_violations += 1;
            return result;
        }

        // 3. Crossing (policy-dependent).
        if let Some(rules) = rules
            && rules.crossing(snap, voice, pitch)
        {
            result.crossing_violation = true;
            match self.crossing_policy {
                CrossingPolicy::Reject => {
                    result.hard_violations += 1;
                    return result;
                }
                CrossingPolicy::AllowTemporary => {
                    result.soft_violations += 1;
                }
            }
        }

        // 4. Repeated pitch cap (hard).
        let trailing_repeats = recent_pitches
            .iter()
            .rev()
            .take_while(|&&p| p == pitch)
            .count();
        if trailing_repeats + 1 > usize::from(self.hard_repeat_limit) {
            result.repeat_violation = true;
            result.hard_violations += 1;
            return result;
        }

        // 5. Adjacent-voice spacing (soft).
        for (other, other_pitch) in snap.sounding() {
            if other.abs_diff(voice) == 1 {
                let gap = (i32::from(pitch) - i32::from(other_pitch)).unsigned_abs();
                if gap > u32::from(self.max_adjacent_spacing) {
                    result.spacing_violation = true;
                    result.soft_violations += 1;
                    break;
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counterpoint::FugueRuleEvaluator;

    fn snap(pitches: &[(usize, u8)], num_voices: u8) -> VerticalSnapshot {
        let mut s = VerticalSnapshot {
            num_voices,
            ..Default::default()
        };
        for &(v, p) in pitches {
            s.pitches[v] = p;
        }
        s
    }

    fn invariants() -> InvariantSet {
        InvariantSet {
            voice_range_lo: 48,
            voice_range_hi: 84,
            ..Default::default()
        }
    }

    #[test]
    fn test_range_violation_is_hard() {
        let inv = invariants();
        let result = inv.satisfies(40, 0, 0, &snap(&[], 2), None, None, &[]);
        assert!(result.rejected());
        assert!(result.range_violation);
    }

    #[test]
    fn test_clean_candidate_passes() {
        let inv = invariants();
        let eval = FugueRuleEvaluator;
        let view = CounterpointView::default();
        let result = inv.satisfies(
            64,
            0,
            0,
            &snap(&[(1, 55)], 2),
            Some(&eval),
            Some(&view),
            &[60, 62],
        );
        assert!(!result.rejected());
        assert!(!result.has_soft());
    }

    #[test]
    fn test_parallel_perfect_rejects() {
        let inv = invariants();
        let eval = FugueRuleEvaluator;
        let view = CounterpointView {
            prev_pitches: [62, 55, 0, 0, 0, 0],
        };
        let result = inv.satisfies(
            64,
            0,
            480,
            &snap(&[(1, 57)], 2),
            Some(&eval),
            Some(&view),
            &[62],
        );
        assert!(result.rejected());
        assert!(result.parallel_perfect);
    }

    #[test]
    fn test_crossing_soft_under_allow_temporary() {
        let inv = invariants();
        let eval = FugueRuleEvaluator;
        let view = CounterpointView::default();
        // Voice 0 dips below voice 1's sounding pitch.
        let result = inv.satisfies(
            54,
            0,
            0,
            &snap(&[(1, 56)], 2),
            Some(&eval),
            Some(&view),
            &[],
        );
        assert!(!result.rejected());
        assert!(result.crossing_violation);
        assert!(result.has_soft());
    }

    #[test]
    fn test_crossing_hard_under_reject() {
        let inv = InvariantSet {
            crossing_policy: CrossingPolicy::Reject,
            ..invariants()
        };
        let eval = FugueRuleEvaluator;
        let view = CounterpointView::default();
        let result = inv.satisfies(
            54,
            0,
            0,
            &snap(&[(1, 56)], 2),
            Some(&eval),
            Some(&view),
            &[],
        );
        assert!(result.rejected());
        assert!(result.crossing_violation);
    }

    #[test]
    fn test_repeat_cap() {
        let inv = invariants();
        // Three previous 60s; a fourth is still legal with limit 4.
        let result = inv.satisfies(60, 0, 0, &snap(&[], 1), None, None, &[60, 60, 60]);
        assert!(!result.rejected());
        // A fifth in a row exceeds the cap.
        let result = inv.satisfies(60, 0, 0, &snap(&[], 1), None, None, &[60, 60, 60, 60]);
        assert!(result.rejected());
        assert!(result.repeat_violation);
        // An interruption resets the run.
        let result =
            inv.satisfies(60, 0, 0, &snap(&[], 1), None, None, &[60, 60, 62, 60, 60]);
        assert!(!result.rejected());
    }

    #[test]
    fn test_spacing_soft_violation() {
        let inv = invariants();
        let result = inv.satisfies(84, 0, 0, &snap(&[(1, 50)], 2), None, None, &[]);
        assert!(!result.rejected());
        assert!(result.spacing_violation);
        assert!(result.has_soft());
        // Non-adjacent voices are exempt.
        let result = inv.satisfies(84, 0, 0, &snap(&[(2, 50)], 3), None, None, &[]);
        assert!(!result.spacing_violation);
    }
}
