// ConstraintState: the three-layer evaluator bundled behind two calls.
//
// `evaluate` answers "is this candidate legal, and how good is it" without
// mutating anything: invariants run first (hard flag = rejection), then the
// Gravity composite (whose vertical gate may also reject). Soft invariant
// flags ride along on the returned evaluation. `advance` is the single
// mutator: it settles the obligation ledger against the placed note, turns
// the evaluation's soft flags into recovery obligations, and feeds the
// accumulator. `is_dead` reports deadlock.
//
// The state is owned by one episode generator at a time and handed between
// consecutive episodes by move (exit state of episode i = entry state of
// episode i+1).

use crate::accumulator::{FuguePhase, SectionAccumulator};
use crate::counterpoint::{CounterpointView, RuleEvaluator, VerticalSnapshot};
use crate::gravity::{GravityConfig, MelodicContext, jsd_decay_factor};
use crate::invariant::{CheckResult, InvariantSet};
use crate::note::{MAX_VOICES, TICKS_PER_BAR, TICKS_PER_BEAT, Tick};
use crate::obligation::{
    CADENCE_WINDOW, Obligation, ObligationKind, ObligationLedger, Severity,
};
use crate::oracle::{fugue_upper_model, fugue_vertical_table};
use crate::scale::{Key, ScaleType, pitch_to_absolute_degree};

/// Result of evaluating one candidate note.
#[derive(Debug, Clone, Copy)]
pub enum Evaluation {
    /// A hard invariant or the vertical gate fired.
    Rejected,
    /// The candidate is legal; higher value = better.
    Score { value: f32, soft: CheckResult },
}

impl Evaluation {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Evaluation::Rejected)
    }

    /// Score value, or None if rejected.
    pub fn value(&self) -> Option<f32> {
        match self {
            Evaluation::Rejected => None,
            Evaluation::Score { value, .. } => Some(*value),
        }
    }
}

/// Three-layer constraint state: obligations, invariants, gravity.
#[derive(Debug, Clone)]
pub struct ConstraintState {
    pub ledger: ObligationLedger,
    pub soft_violation_count: u32,
    pub total_note_count: u32,
    pub invariants: InvariantSet,
    pub gravity: GravityConfig,
    pub accumulator: SectionAccumulator,
    /// Scale convention for degree lookups and suspension predicates.
    pub scale: ScaleType,
    /// Sorted cadence positions over the whole piece.
    pub cadence_ticks: Vec<Tick>,
    /// Total piece duration in ticks.
    pub total_duration: Tick,
    last_tick: Tick,
}

impl ConstraintState {
    /// Wire up a state for a form's generation pass: fugue oracle tables,
    /// default invariants over the given range span, cadence tracking.
    pub fn for_form(
        range_lo: u8,
        range_hi: u8,
        total_duration: Tick,
        phase: FuguePhase,
        energy: f32,
        cadence_ticks: Vec<Tick>,
    ) -> Self {
        let mut accumulator = SectionAccumulator::new();
        accumulator.current_phase = phase;
        ConstraintState {
            ledger: ObligationLedger::new(),
            soft_violation_count: 0,
            total_note_count: 0,
            invariants: InvariantSet {
                voice_range_lo: range_lo,
                voice_range_hi: range_hi,
                ..Default::default()
            },
            gravity: GravityConfig {
                model: fugue_upper_model(),
                vertical_table: fugue_vertical_table(),
                phase,
                energy: energy.clamp(0.0, 1.0),
            },
            accumulator,
            scale: ScaleType::Major,
            cadence_ticks,
            total_duration,
            last_tick: 0,
        }
    }

    /// Whether a tick falls inside any cadence window.
    pub fn in_cadence_zone(&self, tick: Tick) -> bool {
        self.cadence_ticks
            .iter()
            .any(|&c| tick.abs_diff(c) <= CADENCE_WINDOW)
    }

    /// Evaluate a candidate against all three layers. Side-effect free.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate(
        &self,
        pitch: u8,
        duration: Tick,
        voice: u8,
        tick: Tick,
        ctx: &MelodicContext,
        snap: &VerticalSnapshot,
        rules: Option<&dyn RuleEvaluator>,
        view: Option<&CounterpointView>,
        recent_pitches: &[u8],
        figure_score: f32,
    ) -> Evaluation {
        let check = self.invariants.satisfies(
            pitch,
            usize::from(voice),
            tick,
            snap,
            rules,
            view,
            recent_pitches,
        );
        if check.rejected() {
            return Evaluation::Rejected;
        }

        let decay = jsd_decay_factor(
            tick,
            self.total_duration,
            &self.cadence_ticks,
            self.gravity.energy,
        );
        match self.gravity.score(
            pitch,
            duration,
            tick,
            ctx,
            snap,
            &self.accumulator,
            decay,
            figure_score,
            self.in_cadence_zone(tick),
        ) {
            None => Evaluation::Rejected,
            Some(value) => Evaluation::Score { value, soft: check },
        }
    }

    /// Advance time past a placed note: settle the ledger, convert the
    /// evaluation's soft flags into recovery obligations, and record the
    /// note into the accumulator.
    pub fn advance(
        &mut self,
        tick: Tick,
        placed_pitch: u8,
        placed_voice: u8,
        duration: Tick,
        key: Key,
        soft: &CheckResult,
    ) {
        let prev_pitch = self.ledger.last_pitches()[usize::from(placed_voice) % MAX_VOICES];
        let other_last = *self.ledger.last_pitches();

        self.ledger
            .tick(tick, placed_pitch, placed_voice, key, self.scale);

        // A leap incurs a recovery debt: contrary stepwise motion within
        // two bars. Auto-raised obligations are flexible; structural ones
        // (suspensions, cadence approaches) are injected by the caller.
        if prev_pitch > 0 {
            let leap = i32::from(placed_pitch) - i32::from(prev_pitch);
            if leap.abs() >= 5 {
                self.ledger.add(Obligation {
                    kind: ObligationKind::ResolveLeap {
                        pitch: placed_pitch,
                        direction: leap.signum() as i8,
                    },
                    voice: placed_voice,
                    origin: tick,
                    deadline: tick + 2 * TICKS_PER_BAR,
                    severity: Severity::Flexible,
                });
            }
        }

        // A strong-beat dissonance against a neighboring line must settle.
        if tick % TICKS_PER_BEAT == 0 {
            let dissonant = other_last
                .iter()
                .enumerate()
                .filter(|&(v, &p)| v != usize::from(placed_voice) && p > 0)
                .any(|(_, &p)| {
                    matches!(
                        (i32::from(placed_pitch) - i32::from(p)).unsigned_abs() % 12,
                        1 | 2 | 6 | 10 | 11
                    )
                });
            if dissonant {
                let direction = if prev_pitch > 0 {
                    (i32::from(placed_pitch) - i32::from(prev_pitch)).signum() as i8
                } else {
                    1
                };
                self.ledger.add(Obligation {
                    kind: ObligationKind::ResolveDissonance {
                        pitch: placed_pitch,
                        direction,
                    },
                    voice: placed_voice,
                    origin: tick,
                    deadline: tick + TICKS_PER_BAR,
                    severity: Severity::Flexible,
                });
            }
        }

        if soft.has_soft() {
            self.soft_violation_count += u32::from(soft.soft_violations);
            if soft.spacing_violation || soft.crossing_violation {
                self.ledger.add(Obligation {
                    kind: ObligationKind::RecoverSpacing {
                        max_spacing: self.invariants.max_adjacent_spacing,
                    },
                    voice: placed_voice,
                    origin: tick,
                    deadline: tick + 2 * TICKS_PER_BAR,
                    severity: Severity::Flexible,
                });
            }
        }

        let degree = pitch_to_absolute_degree(placed_pitch, key, self.scale);
        self.accumulator.record_note(duration, degree);
        self.total_note_count += 1;
        self.last_tick = self.last_tick.max(tick);
    }

    /// Deadlock check at an explicit tick.
    pub fn is_dead_at(&self, tick: Tick) -> bool {
        self.ledger.is_dead_at(tick)
    }

    /// Deadlock check at the last advanced tick.
    pub fn is_dead(&self) -> bool {
        self.ledger.is_dead_at(self.last_tick)
    }

    /// Fraction of placed notes that carried soft violations.
    pub fn soft_violation_ratio(&self) -> f32 {
        if self.total_note_count == 0 {
            0.0
        } else {
            self.soft_violation_count as f32 / self.total_note_count as f32
        }
    }
}
