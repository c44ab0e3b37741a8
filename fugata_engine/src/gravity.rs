// Gravity: phase-weighted statistical pull toward the reference style.
//
// Layer 3 of the constraint model. Four sub-scores are blended with
// phase-specific weights (each phase's weights sum to 1.0):
//
//   melodic     0.45 * pitch oracle + 0.20 * duration oracle
//   vertical    interval oracle against the sounding bass, gated by a
//               minimum probability (0.05, or 0.10 inside a cadence zone);
//               a candidate under the gate is rejected outright
//   jsd         -(rhythm_jsd + harmony_jsd)/2, relaxed by a decay factor
//               near cadences and at the climax
//   vocabulary  figure attestation score in [0, 1]
//
// The vertical gate is the one place Gravity can reject rather than merely
// score: a sonority the reference corpus essentially never produces is
// treated like a hard violation.

use crate::accumulator::{FuguePhase, SectionAccumulator};
use crate::counterpoint::VerticalSnapshot;
use crate::note::Tick;
use crate::obligation::CADENCE_WINDOW;
use crate::oracle::{
    DegreeClass, DegreeStep, DurCategory, MarkovModel, VerticalIntervalTable,
    compute_degree_step, dir_interval_class, score_duration_transition,
    score_pitch_transition, score_vertical_interval, ticks_to_dur_category,
    tick_to_beat_pos, vertical_probability, voice_count_bin, degree_to_harm_func,
};
use crate::scale::{Key, ScaleType, pitch_to_absolute_degree};

/// Markov pitch weight inside the melodic sub-score.
pub const MARKOV_PITCH_WEIGHT: f32 = 0.45;
/// Markov duration weight inside the melodic sub-score.
pub const MARKOV_DUR_WEIGHT: f32 = 0.20;
/// Minimum vertical probability to pass the gate.
pub const VERTICAL_MIN_GATE: f32 = 0.05;
/// Stricter gate inside cadence zones.
pub const VERTICAL_MIN_GATE_CADENCE: f32 = 0.10;

/// Melodic context packet consumed by the oracle lookups.
#[derive(Debug, Clone, Copy)]
pub struct MelodicContext {
    pub prev_pitch: u8,
    pub prev_step: DegreeStep,
    pub deg_class: DegreeClass,
    pub prev_dur: DurCategory,
    pub key: Key,
    pub scale: ScaleType,
}

/// Per-phase blend weights over the four sub-scores. Sum = 1.0.
#[derive(Debug, Clone, Copy)]
pub struct PhaseWeights {
    pub melodic: f32,
    pub vertical: f32,
    pub rhythm: f32,
    pub vocabulary: f32,
}

/// Weight table per structural phase (design values).
pub fn phase_weights(phase: FuguePhase) -> PhaseWeights {
    match phase {
        FuguePhase::Establish => PhaseWeights {
            melodic: 0.40,
            vertical: 0.35,
            rhythm: 0.15,
            vocabulary: 0.10,
        },
        FuguePhase::Develop => PhaseWeights {
            melodic: 0.35,
            vertical: 0.30,
            rhythm: 0.20,
            vocabulary: 0.15,
        },
        FuguePhase::Resolve => PhaseWeights {
            melodic: 0.25,
            vertical: 0.40,
            rhythm: 0.20,
            vocabulary: 0.15,
        },
        FuguePhase::Conclude => PhaseWeights {
            melodic: 0.20,
            vertical: 0.35,
            rhythm: 0.15,
            vocabulary: 0.30,
        },
    }
}

/// JSD decay factor in [0.3, 1.0]: lower = more lenient.
///
/// Relaxes toward 0.3 as a cadence approaches (the stylistic reins loosen
/// into the close), and at the climax region in proportion to energy.
pub fn jsd_decay_factor(
    tick: Tick,
    total_duration: Tick,
    cadence_ticks: &[Tick],
    energy: f32,
) -> f32 {
    let mut factor = 1.0f32;

    for &cadence in cadence_ticks {
        let dist = tick.abs_diff(cadence);
        if dist < CADENCE_WINDOW {
            factor *= (dist as f32 / CADENCE_WINDOW as f32).max(0.3);
        }
    }

    // Climax region around the golden section of the piece.
    if total_duration > 0 {
        let pos = tick as f32 / total_duration as f32;
        if (pos - 0.618).abs() < 0.08 {
            factor *= 1.0 - 0.5 * energy;
        }
    }

    factor.clamp(0.3, 1.0)
}

/// Gravity configuration: oracle handles plus the phase and energy knobs.
#[derive(Clone, Copy)]
pub struct GravityConfig {
    pub model: &'static MarkovModel,
    pub vertical_table: &'static VerticalIntervalTable,
    pub phase: FuguePhase,
    pub energy: f32,
}

impl std::fmt::Debug for GravityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GravityConfig")
            .field("model", &self.model.name)
            .field("phase", &self.phase)
            .field("energy", &self.energy)
            .finish()
    }
}

impl GravityConfig {
    /// Score a candidate through the 4-layer Gravity model.
    ///
    /// Returns None when the vertical gate rejects the candidate.
    #[allow(clippy::too_many_arguments)]
    pub fn score(
        &self,
        pitch: u8,
        duration: Tick,
        tick: Tick,
        ctx: &MelodicContext,
        snap: &VerticalSnapshot,
        accum: &SectionAccumulator,
        decay: f32,
        figure_score: f32,
        in_cadence_zone: bool,
    ) -> Option<f32> {
        let beat = tick_to_beat_pos(tick);

        // 1. Melodic.
        let next_step = compute_degree_step(ctx.prev_pitch, pitch, ctx.key, ctx.scale);
        let pitch_score =
            score_pitch_transition(self.model, ctx.prev_step, ctx.deg_class, beat, next_step);
        let dur_score = score_duration_transition(
            self.model,
            ctx.prev_dur,
            dir_interval_class(i32::from(next_step)),
            ticks_to_dur_category(duration),
        );
        let melodic = MARKOV_PITCH_WEIGHT * pitch_score + MARKOV_DUR_WEIGHT * dur_score;

        // 2. Vertical, gated.
        let vertical = match snap.bass_pitch() {
            Some(bass) => {
                let bass_degree = pitch_to_absolute_degree(bass, ctx.key, ctx.scale);
                let hf = degree_to_harm_func(bass_degree);
                let vbin = voice_count_bin(snap.num_voices);
                let pc_offset = (i32::from(pitch) - i32::from(bass)).rem_euclid(12);
                let prob = vertical_probability(
                    self.vertical_table,
                    bass_degree,
                    beat,
                    vbin,
                    hf,
                    pc_offset,
                );
                let gate = if in_cadence_zone {
                    VERTICAL_MIN_GATE_CADENCE
                } else {
                    VERTICAL_MIN_GATE
                };
                if prob < gate {
                    return None;
                }
                score_vertical_interval(
                    self.vertical_table,
                    bass_degree,
                    beat,
                    vbin,
                    hf,
                    pc_offset,
                )
            }
            None => 0.0,
        };

        // 3. JSD penalty.
        let jsd_penalty = -((accum.rhythm_jsd() + accum.harmony_jsd()) / 2.0) * decay;

        // 4. Blend with phase weights.
        let weights = phase_weights(self.phase);
        Some(
            weights.melodic * melodic
                + weights.vertical * vertical
                + weights.rhythm * jsd_penalty
                + weights.vocabulary * figure_score,
        )
    }
}
