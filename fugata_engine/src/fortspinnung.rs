// Fortspinnung planner: the Kernel/Sequence/Dissolution arc.
//
// Plans WHAT happens where in an episode without placing notes: an ordered
// list of steps (tick, voice, pool rank, operation, phase, suggested
// duration). The constraint episode generator consumes the plan and places
// actual notes under ConstraintState validation.
//
// The arc: the Kernel states motivic material with minimal transformation;
// the Sequence region restates a kernel fragment at the character's
// imitation delay, descending by a fixed degree step per repetition; the
// Dissolution fragments the material with expanding inter-onset gaps and
// lengthens the closing notes toward the cadence.
//
// All variation (imitation delays, rank choices) draws from one seeded
// generator in a fixed order, so plans are reproducible.

use fugata_prng::SketchRng;
use serde::{Deserialize, Serialize};

use crate::motif::MotifPool;
use crate::note::{Tick, TICKS_PER_BEAT, quantize_duration};
use crate::transform::{MotifOp, motif_duration};

/// Four-valued episode style tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectCharacter {
    Severe,
    Playful,
    Noble,
    Restless,
}

/// Phase within the Fortspinnung arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FortPhase {
    Kernel,
    Sequence,
    Dissolution,
}

/// Phase ratios and dissolution tuning for an episode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FortspinnungGrammar {
    pub kernel_ratio: f32,
    pub sequence_ratio: f32,
    pub dissolution_ratio: f32,
    /// Minimum notes in dissolution fragments.
    pub min_fragment_notes: u8,
    /// Scoring weight for stepwise motion in dissolution.
    pub stepwise_preference: f32,
    /// Inter-onset expansion per dissolution step.
    pub density_decay_factor: f32,
    /// Duration multiplier for the final 1-2 steps.
    pub cadential_lengthening: f32,
}

impl Default for FortspinnungGrammar {
    fn default() -> Self {
        FortspinnungGrammar {
            kernel_ratio: 0.25,
            sequence_ratio: 0.50,
            dissolution_ratio: 0.25,
            min_fragment_notes: 2,
            stepwise_preference: 0.70,
            density_decay_factor: 1.2,
            cadential_lengthening: 1.5,
        }
    }
}

/// Character-specific grammar (design values).
pub fn grammar_for_character(character: SubjectCharacter) -> FortspinnungGrammar {
    match character {
        SubjectCharacter::Severe => FortspinnungGrammar {
            kernel_ratio: 0.30,
            sequence_ratio: 0.45,
            dissolution_ratio: 0.25,
            min_fragment_notes: 3,
            stepwise_preference: 0.65,
            density_decay_factor: 1.15,
            cadential_lengthening: 1.5,
        },
        SubjectCharacter::Playful => FortspinnungGrammar {
            kernel_ratio: 0.20,
            sequence_ratio: 0.55,
            dissolution_ratio: 0.25,
            min_fragment_notes: 2,
            stepwise_preference: 0.60,
            density_decay_factor: 1.25,
            cadential_lengthening: 1.3,
        },
        SubjectCharacter::Noble => FortspinnungGrammar {
            kernel_ratio: 0.30,
            sequence_ratio: 0.45,
            dissolution_ratio: 0.25,
            min_fragment_notes: 2,
            stepwise_preference: 0.75,
            density_decay_factor: 1.20,
            cadential_lengthening: 1.6,
        },
        SubjectCharacter::Restless => FortspinnungGrammar {
            kernel_ratio: 0.20,
            sequence_ratio: 0.55,
            dissolution_ratio: 0.25,
            min_fragment_notes: 2,
            stepwise_preference: 0.55,
            density_decay_factor: 1.30,
            cadential_lengthening: 1.4,
        },
    }
}

/// Character-specific episode parameters: initial operations per voice,
/// imitation delay band, and sequence degree step (design values).
#[derive(Debug, Clone, Copy)]
pub struct CharacterEpisodeParams {
    pub voice0_initial: MotifOp,
    pub voice1_initial: MotifOp,
    /// Secondary op applied after voice1_initial (Original = none).
    pub voice1_secondary: MotifOp,
    pub imitation_beats_lo: f32,
    pub imitation_beats_hi: f32,
    /// Degree step per sequence repetition (negative = descending).
    pub sequence_step: i32,
}

/// Parameter table per character.
pub fn character_params(character: SubjectCharacter) -> CharacterEpisodeParams {
    match character {
        SubjectCharacter::Severe => CharacterEpisodeParams {
            voice0_initial: MotifOp::Original,
            voice1_initial: MotifOp::Invert,
            voice1_secondary: MotifOp::Original,
            imitation_beats_lo: 1.5,
            imitation_beats_hi: 2.5,
            sequence_step: -1,
        },
        SubjectCharacter::Playful => CharacterEpisodeParams {
            voice0_initial: MotifOp::Retrograde,
            voice1_initial: MotifOp::Invert,
            voice1_secondary: MotifOp::Original,
            imitation_beats_lo: 0.5,
            imitation_beats_hi: 1.5,
            sequence_step: -2,
        },
        SubjectCharacter::Noble => CharacterEpisodeParams {
            voice0_initial: MotifOp::Original,
            voice1_initial: MotifOp::Augment,
            voice1_secondary: MotifOp::Retrograde,
            imitation_beats_lo: 1.5,
            imitation_beats_hi: 2.5,
            sequence_step: -1,
        },
        SubjectCharacter::Restless => CharacterEpisodeParams {
            voice0_initial: MotifOp::Fragment,
            voice1_initial: MotifOp::Diminish,
            voice1_secondary: MotifOp::Original,
            imitation_beats_lo: 0.5,
            imitation_beats_hi: 1.5,
            sequence_step: -2,
        },
    }
}

/// Pool-rank selection weights per character (index = rank).
pub fn rank_weights(character: SubjectCharacter) -> [f32; 4] {
    match character {
        SubjectCharacter::Severe => [0.6, 0.2, 0.1, 0.1],
        SubjectCharacter::Playful => [0.2, 0.3, 0.3, 0.2],
        SubjectCharacter::Noble => [0.4, 0.4, 0.1, 0.1],
        SubjectCharacter::Restless => [0.2, 0.2, 0.3, 0.3],
    }
}

/// One planned step of the arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FortspinnungStep {
    pub tick: Tick,
    pub voice: u8,
    pub pool_rank: usize,
    pub op: MotifOp,
    pub phase: FortPhase,
    pub suggested_duration: Tick,
}

/// Plan the Fortspinnung arc for an episode.
///
/// Returns steps sorted by (tick, voice). Empty when the pool is empty or
/// the duration is zero.
pub fn plan_fortspinnung(
    pool: &MotifPool,
    grammar: &FortspinnungGrammar,
    start_tick: Tick,
    duration: Tick,
    num_voices: u8,
    character: SubjectCharacter,
    seed: u32,
) -> Vec<FortspinnungStep> {
    let Some(kernel_motif) = pool.best() else {
        return Vec::new();
    };
    if duration == 0 {
        return Vec::new();
    }

    let mut rng = SketchRng::new(seed);
    let params = character_params(character);

    let kernel_end = start_tick + scale_tick(duration, grammar.kernel_ratio);
    let sequence_end = kernel_end + scale_tick(duration, grammar.sequence_ratio);
    let episode_end = start_tick + duration;

    let motif_span = motif_duration(&kernel_motif.notes).max(TICKS_PER_BEAT);
    let mut steps = Vec::new();

    // --- Kernel: voice 0 states the material at motif-span spacing.
    //     Statements stay whole: none starts without room to finish. ---
    let mut tick = start_tick;
    loop {
        steps.push(FortspinnungStep {
            tick,
            voice: 0,
            pool_rank: 0,
            op: params.voice0_initial,
            phase: FortPhase::Kernel,
            suggested_duration: motif_span,
        });
        tick += motif_span;
        if tick + motif_span > kernel_end {
            break;
        }
    }

    // --- Kernel imitation: voice 1 enters after the imitation delay. ---
    if num_voices >= 2 {
        let delay = roll_imitation_delay(&mut rng, &params);
        let mut tick = start_tick + delay;
        while tick < kernel_end {
            steps.push(FortspinnungStep {
                tick,
                voice: 1,
                pool_rank: 0,
                op: params.voice1_initial,
                phase: FortPhase::Kernel,
                suggested_duration: motif_span,
            });
            tick += motif_span;
        }
    }

    // --- Sequence: restatements at the imitation delay, alternating
    //     voices, each descending by the character's degree step. A lone
    //     voice restates at motif-span spacing so statements never pile
    //     onto themselves. ---
    let weights = rank_weights(character);
    let usable = weights[..pool.len().min(4)].to_vec();
    let mut tick = kernel_end;
    let mut statement = 0u8;
    while tick < sequence_end {
        let voice = if num_voices >= 2 { statement % 2 } else { 0 };
        let rank = rng.pick_weighted(&usable);
        steps.push(FortspinnungStep {
            tick,
            voice,
            pool_rank: rank,
            op: MotifOp::Sequence,
            phase: FortPhase::Sequence,
            suggested_duration: motif_span,
        });
        let delay = roll_imitation_delay(&mut rng, &params);
        tick += if num_voices >= 2 { delay } else { delay.max(motif_span) };
        statement = statement.wrapping_add(1);
    }

    // --- Dissolution: fragments with expanding inter-onset gaps, traded
    //     between the two upper voices. ---
    let fragment_rank = pool.rank_for_operation(MotifOp::Fragment);
    let fragment_span = pool
        .by_rank(fragment_rank)
        .map(|m| motif_duration(&m.notes) / 2)
        .unwrap_or(TICKS_PER_BEAT)
        .max(TICKS_PER_BEAT);
    let mut tick = sequence_end;
    let mut gap = fragment_span as f32;
    let mut fragment_idx = 0u8;
    let dissolution_start = steps.len();
    while tick < episode_end {
        let voice = if num_voices >= 2 { fragment_idx % 2 } else { 0 };
        steps.push(FortspinnungStep {
            tick,
            voice,
            pool_rank: fragment_rank,
            op: MotifOp::Fragment,
            phase: FortPhase::Dissolution,
            suggested_duration: quantize_duration(gap as Tick),
        });
        tick += quantize_duration(gap as Tick);
        gap *= grammar.density_decay_factor;
        fragment_idx = fragment_idx.wrapping_add(1);
    }

    // Cadential lengthening of the last one or two dissolution steps.
    let dissolution_count = steps.len() - dissolution_start;
    let lengthen_from = steps.len() - dissolution_count.min(2);
    for step in &mut steps[lengthen_from..] {
        step.suggested_duration = quantize_duration(
            (step.suggested_duration as f32 * grammar.cadential_lengthening) as Tick,
        );
    }

    steps.sort_by_key(|s| (s.tick, s.voice));
    steps
}

fn scale_tick(duration: Tick, ratio: f32) -> Tick {
    (duration as f32 * ratio) as Tick
}

/// Roll an imitation delay in the character's beat band, snapped to the
/// sixteenth grid.
fn roll_imitation_delay(rng: &mut SketchRng, params: &CharacterEpisodeParams) -> Tick {
    let beats = rng.range_f32(params.imitation_beats_lo, params.imitation_beats_hi);
    quantize_duration((beats * TICKS_PER_BEAT as f32) as Tick)
}
