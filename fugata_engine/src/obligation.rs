// Obligation ledger: unresolved contrapuntal demands with deadlines.
//
// Layer 1 of the constraint model. Placing certain notes creates debts: a
// dissonance must resolve, a leap must be recovered, a suspension must fall,
// a cadence must be approached. Each debt carries its origin, a deadline
// tick, and a severity. The ledger is append-mostly: `add` pushes, `tick`
// settles (removes satisfied debts, expires overdue ones). A structural
// obligation that expires unsatisfied makes the whole state dead; flexible
// ones expire silently.
//
// Resolution predicates are pure functions of (obligation, placed note).
// The ledger tracks each voice's last placed pitch itself so the spacing
// predicate needs no external snapshot.

use serde::{Deserialize, Serialize};

use crate::note::{MAX_VOICES, Tick, TICKS_PER_BAR};
use crate::scale::{Key, ScaleType, is_scale_tone};

/// Window around a cadence tick in which the approach must land.
pub const CADENCE_WINDOW: Tick = TICKS_PER_BAR;

/// How hard an unmet obligation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Expiry kills the constraint state (deadlock).
    Structural,
    /// Expiry is tolerated and merely dropped.
    Flexible,
}

/// The kind of contrapuntal debt, with its kind-specific parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObligationKind {
    /// A dissonant tone at `pitch` must move within +/-2 semitones, against
    /// the direction (`direction` = sign of the motion that caused it).
    ResolveDissonance { pitch: u8, direction: i8 },
    /// A leap from `pitch` must be recovered by a contrary step of 1-2
    /// semitones. `direction` is the sign of the leap.
    ResolveLeap { pitch: u8, direction: i8 },
    /// A suspended `pitch` must resolve down by step onto a scale tone.
    ResolveSuspension { pitch: u8 },
    /// The cadence target pitch class must be sounded inside the window
    /// ending at the deadline.
    ApproachCadence { target_pc: u8 },
    /// The voice must re-enter its range band.
    RecoverRange { lo: u8, hi: u8 },
    /// Adjacent-voice spacing must drop back under the cap.
    RecoverSpacing { max_spacing: u8 },
}

/// One outstanding obligation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obligation {
    pub kind: ObligationKind,
    /// Voice that owes the resolution.
    pub voice: u8,
    /// Tick at which the debt was incurred.
    pub origin: Tick,
    /// Last tick by which it must be settled.
    pub deadline: Tick,
    pub severity: Severity,
}

impl Obligation {
    /// Whether a just-placed note settles this obligation.
    fn resolved_by(
        &self,
        placed_pitch: u8,
        placed_voice: u8,
        tick: Tick,
        key: Key,
        scale: ScaleType,
        last_pitch: &[u8; MAX_VOICES],
    ) -> bool {
        match self.kind {
            ObligationKind::ResolveDissonance { pitch, direction } => {
                if placed_voice != self.voice {
                    return false;
                }
                let motion = i32::from(placed_pitch) - i32::from(pitch);
                motion != 0
                    && motion.abs() <= 2
                    && motion.signum() != i32::from(direction.signum())
            }
            ObligationKind::ResolveLeap { pitch, direction } => {
                if placed_voice != self.voice {
                    return false;
                }
                let motion = i32::from(placed_pitch) - i32::from(pitch);
                (1..=2).contains(&motion.abs())
                    && motion.signum() != i32::from(direction.signum())
            }
            ObligationKind::ResolveSuspension { pitch } => {
                if placed_voice != self.voice {
                    return false;
                }
                let fall = i32::from(pitch) - i32::from(placed_pitch);
                (1..=2).contains(&fall) && is_scale_tone(placed_pitch, key, scale)
            }
            ObligationKind::ApproachCadence { target_pc } => {
                placed_pitch % 12 == target_pc % 12
                    && tick + CADENCE_WINDOW >= self.deadline
                    && tick <= self.deadline
            }
            ObligationKind::RecoverRange { lo, hi } => {
                placed_voice == self.voice && (lo..=hi).contains(&placed_pitch)
            }
            ObligationKind::RecoverSpacing { max_spacing } => {
                if placed_voice != self.voice {
                    return false;
                }
                let voice = usize::from(placed_voice);
                let mut recovered = true;
                if voice > 0 && last_pitch[voice - 1] > 0 {
                    let gap =
                        (i32::from(placed_pitch) - i32::from(last_pitch[voice - 1])).abs();
                    recovered &= gap <= i32::from(max_spacing);
                }
                if voice + 1 < MAX_VOICES && last_pitch[voice + 1] > 0 {
                    let gap =
                        (i32::from(placed_pitch) - i32::from(last_pitch[voice + 1])).abs();
                    recovered &= gap <= i32::from(max_spacing);
                }
                recovered
            }
        }
    }

    /// Whether the obligation can never be satisfied from any state.
    fn impossible(&self) -> bool {
        if self.deadline < self.origin {
            return true;
        }
        match self.kind {
            ObligationKind::RecoverRange { lo, hi } => lo > hi,
            _ => false,
        }
    }
}

/// The append-mostly obligation list plus per-voice last-pitch context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObligationLedger {
    active: Vec<Obligation>,
    last_pitch: [u8; MAX_VOICES],
    last_tick: Tick,
    dead: bool,
}

impl ObligationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new obligation.
    pub fn add(&mut self, obligation: Obligation) {
        if obligation.impossible() && obligation.severity == Severity::Structural {
            self.dead = true;
        }
        self.active.push(obligation);
    }

    /// Outstanding obligations, in insertion order.
    pub fn active(&self) -> &[Obligation] {
        &self.active
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Last pitch placed per voice (0 = none yet).
    pub fn last_pitches(&self) -> &[u8; MAX_VOICES] {
        &self.last_pitch
    }

    /// Settle the ledger against a just-placed note.
    ///
    /// Satisfied obligations are removed. Obligations whose deadline has
    /// passed are expired; an expired structural obligation marks the ledger
    /// dead. Finally the voice's last-pitch record is updated.
    pub fn tick(
        &mut self,
        current_tick: Tick,
        placed_pitch: u8,
        placed_voice: u8,
        key: Key,
        scale: ScaleType,
    ) {
        let last_pitch = self.last_pitch;
        let mut went_dead = false;
        self.active.retain(|ob| {
            if ob.resolved_by(placed_pitch, placed_voice, current_tick, key, scale, &last_pitch) {
                return false;
            }
            if ob.deadline < current_tick {
                if ob.severity == Severity::Structural {
                    went_dead = true;
                }
                return false;
            }
            true
        });
        if went_dead {
            self.dead = true;
        }

        if usize::from(placed_voice) < MAX_VOICES {
            self.last_pitch[usize::from(placed_voice)] = placed_pitch;
        }
        self.last_tick = self.last_tick.max(current_tick);
    }

    /// Dead check at an explicit tick: a structural obligation whose deadline
    /// has already passed (and cannot have been satisfied) kills the state,
    /// as does a structurally impossible obligation.
    pub fn is_dead_at(&self, tick: Tick) -> bool {
        self.dead
            || self.active.iter().any(|ob| {
                ob.severity == Severity::Structural && (ob.deadline < tick || ob.impossible())
            })
    }

    /// Dead check at the last settled tick.
    pub fn is_dead(&self) -> bool {
        self.is_dead_at(self.last_tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leap_obligation(deadline: Tick) -> Obligation {
        Obligation {
            kind: ObligationKind::ResolveLeap { pitch: 67, direction: 1 },
            voice: 0,
            origin: 0,
            deadline,
            severity: Severity::Flexible,
        }
    }

    #[test]
    fn test_leap_resolved_by_contrary_step() {
        let mut ledger = ObligationLedger::new();
        ledger.add(leap_obligation(1920));
        // Step down from 67 settles an upward leap.
        ledger.tick(480, 65, 0, Key::C, ScaleType::Major);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_leap_not_resolved_by_same_direction() {
        let mut ledger = ObligationLedger::new();
        ledger.add(leap_obligation(1920));
        ledger.tick(480, 69, 0, Key::C, ScaleType::Major); // continues upward
        assert_eq!(ledger.len(), 1);
        // Wrong voice does not settle it either.
        ledger.tick(960, 65, 1, Key::C, ScaleType::Major);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_flexible_expiry_is_silent() {
        let mut ledger = ObligationLedger::new();
        ledger.add(leap_obligation(400));
        ledger.tick(960, 69, 0, Key::C, ScaleType::Major);
        assert!(ledger.is_empty());
        assert!(!ledger.is_dead());
    }

    #[test]
    fn test_structural_expiry_kills() {
        let mut ledger = ObligationLedger::new();
        ledger.add(Obligation {
            kind: ObligationKind::ResolveSuspension { pitch: 65 },
            voice: 0,
            origin: 0,
            deadline: 400,
            severity: Severity::Structural,
        });
        ledger.tick(960, 69, 1, Key::C, ScaleType::Major);
        assert!(ledger.is_dead());
    }

    #[test]
    fn test_is_dead_at_sees_future_expiry() {
        let mut ledger = ObligationLedger::new();
        ledger.add(Obligation {
            kind: ObligationKind::ResolveSuspension { pitch: 65 },
            voice: 0,
            origin: 0,
            deadline: 400,
            severity: Severity::Structural,
        });
        // Nothing settled yet, but at tick 500 the deadline is already gone.
        assert!(!ledger.is_dead_at(400));
        assert!(ledger.is_dead_at(500));
    }

    #[test]
    fn test_suspension_resolves_down_to_scale_tone() {
        let mut ledger = ObligationLedger::new();
        ledger.add(Obligation {
            kind: ObligationKind::ResolveSuspension { pitch: 65 },
            voice: 1,
            origin: 0,
            deadline: 1920,
            severity: Severity::Structural,
        });
        // F4 falling to E4: down a step onto a C-major tone.
        ledger.tick(480, 64, 1, Key::C, ScaleType::Major);
        assert!(ledger.is_empty());
        assert!(!ledger.is_dead());
    }

    #[test]
    fn test_suspension_rejects_upward_motion() {
        let mut ledger = ObligationLedger::new();
        ledger.add(Obligation {
            kind: ObligationKind::ResolveSuspension { pitch: 65 },
            voice: 1,
            origin: 0,
            deadline: 1920,
            severity: Severity::Structural,
        });
        ledger.tick(480, 67, 1, Key::C, ScaleType::Major);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_cadence_approach_inside_window() {
        let mut ledger = ObligationLedger::new();
        ledger.add(Obligation {
            kind: ObligationKind::ApproachCadence { target_pc: 0 },
            voice: 0,
            origin: 0,
            deadline: 7680,
            severity: Severity::Structural,
        });
        // Tonic sounded too early does not count.
        ledger.tick(960, 60, 0, Key::C, ScaleType::Major);
        assert_eq!(ledger.len(), 1);
        // Inside the window it does (any octave of the pitch class).
        ledger.tick(7680 - 480, 72, 0, Key::C, ScaleType::Major);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_recover_range() {
        let mut ledger = ObligationLedger::new();
        ledger.add(Obligation {
            kind: ObligationKind::RecoverRange { lo: 60, hi: 84 },
            voice: 0,
            origin: 0,
            deadline: 1920,
            severity: Severity::Flexible,
        });
        ledger.tick(480, 59, 0, Key::C, ScaleType::Major);
        assert_eq!(ledger.len(), 1);
        ledger.tick(960, 62, 0, Key::C, ScaleType::Major);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_recover_spacing_uses_neighbor_pitches() {
        let mut ledger = ObligationLedger::new();
        // Voice 1 heard at 52 first.
        ledger.tick(0, 52, 1, Key::C, ScaleType::Major);
        ledger.add(Obligation {
            kind: ObligationKind::RecoverSpacing { max_spacing: 24 },
            voice: 0,
            origin: 0,
            deadline: 3840,
            severity: Severity::Flexible,
        });
        // Voice 0 at 82: gap of 30 against voice 1, still owed.
        ledger.tick(480, 82, 0, Key::C, ScaleType::Major);
        assert_eq!(ledger.len(), 1);
        // Voice 0 drops to 72: gap 20, settled.
        ledger.tick(960, 72, 0, Key::C, ScaleType::Major);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_impossible_structural_obligation_is_dead() {
        let mut ledger = ObligationLedger::new();
        ledger.add(Obligation {
            kind: ObligationKind::RecoverRange { lo: 80, hi: 40 },
            voice: 0,
            origin: 0,
            deadline: 9999,
            severity: Severity::Structural,
        });
        assert!(ledger.is_dead_at(0));
    }

    #[test]
    fn test_dissonance_resolution_contrary_within_two() {
        let mut ledger = ObligationLedger::new();
        ledger.add(Obligation {
            kind: ObligationKind::ResolveDissonance { pitch: 66, direction: 1 },
            voice: 2,
            origin: 0,
            deadline: 1920,
            severity: Severity::Flexible,
        });
        // Moving further up does not resolve.
        ledger.tick(240, 68, 2, Key::C, ScaleType::Major);
        assert_eq!(ledger.len(), 1);
        // Falling by a semitone does.
        ledger.tick(480, 65, 2, Key::C, ScaleType::Major);
        assert!(ledger.is_empty());
    }
}
