// Constraint-driven episode generator: the engine's public entry point.
//
// Consumes a Fortspinnung plan and places notes one at a time: each planned
// motif note is expanded into a small candidate set (motif pitch +/- offsets
// snapped to the current scale), every candidate runs through
// ConstraintState::evaluate, and the best survivor is placed. Lower voices
// are filled afterwards: held tones on the resting voice, bass fragments
// alternating with harmonic anchors on voice 2, tonic/dominant pedal anchors
// on the last voice. Odd-indexed episodes swap voices 0 and 1 (invertible
// counterpoint at the octave).
//
// A rejected candidate list skips that note slot (recoverable); a dead
// constraint state ends the episode early with success = false and the
// partial result. The exit state carries the accumulator, ledger, and
// counters forward so the next episode can chain from it.
//
// Determinism: the main loop draws from one generator seeded by the request;
// the bass and pedal passes use sub-generators derived from the same seed.
// Every draw is sequenced, so identical requests give identical output.

use fugata_prng::SketchRng;

use crate::accumulator::{FuguePhase, SectionAccumulator};
use crate::constraint::{ConstraintState, Evaluation};
use crate::counterpoint::{
    CounterpointView, FugueRuleEvaluator, RuleEvaluator, VerticalSnapshot, is_consonant,
};
use crate::fortspinnung::{
    FortPhase, FortspinnungGrammar, SubjectCharacter, character_params, grammar_for_character,
    plan_fortspinnung,
};
use crate::gravity::MelodicContext;
use crate::invariant::CheckResult;
use crate::motif::MotifPool;
use crate::note::{
    DEFAULT_VELOCITY, EIGHTH, MAX_VOICES, NoteEvent, NoteSource, SIXTEENTH, TICKS_PER_BAR,
    TICKS_PER_BEAT, Tick, clamp_pitch, fugue_voice_range, is_strong_beat, quantize_duration,
};
use crate::oracle::{DurCategory, compute_degree_step, degree_to_class, ticks_to_dur_category};
use crate::scale::{Key, ScaleType, key_distance, nearest_scale_tone, pitch_to_absolute_degree};
use crate::transform::{
    MotifOp, apply_motif_op, extract_tail, motif_duration, transpose, transpose_diatonic,
};
use crate::vocabulary::figure_score;

/// Chord handed back by a harmonic timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chord {
    pub root_pitch: u8,
    pub quality: ChordQuality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChordQuality {
    Major,
    Minor,
    Diminished,
}

/// Optional harmonic plan: which chord governs a tick.
pub trait HarmonicTimeline {
    fn chord_at(&self, tick: Tick) -> Chord;
}

/// Request for one episode.
pub struct EpisodeRequest<'a> {
    /// Exit state of the previous episode, for chaining. None = fresh state.
    pub entry_state: Option<ConstraintState>,
    pub start_key: Key,
    pub end_key: Key,
    pub scale: ScaleType,
    pub start_tick: Tick,
    pub duration: Tick,
    /// Active voices, 1-6.
    pub num_voices: u8,
    pub motif_pool: &'a MotifPool,
    pub character: SubjectCharacter,
    pub grammar: FortspinnungGrammar,
    /// Episode ordinal; odd indices take invertible counterpoint.
    pub episode_index: u32,
    /// Energy in [0, 1]: higher allows shorter notes and denser rhythm.
    pub energy: f32,
    pub seed: u32,
    /// Currently held pedal pitch in another voice (0 = none).
    pub pedal_pitch: u8,
    /// Enable the odd-index voice swap.
    pub invertible: bool,
    /// Rule evaluator for parallel/crossing checks. None = fugue defaults.
    pub rules: Option<&'a dyn RuleEvaluator>,
    /// Pipeline-level accumulator imported into the state.
    pub pipeline_accumulator: Option<&'a SectionAccumulator>,
    /// Harmonic timeline for bass anchor pitches.
    pub timeline: Option<&'a dyn HarmonicTimeline>,
    /// Per-voice last pitch from the previous section (0 = unknown).
    pub last_pitches: [u8; MAX_VOICES],
}

impl<'a> EpisodeRequest<'a> {
    /// A request with the character's default grammar and no chaining.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        motif_pool: &'a MotifPool,
        start_key: Key,
        end_key: Key,
        start_tick: Tick,
        duration: Tick,
        num_voices: u8,
        character: SubjectCharacter,
        seed: u32,
    ) -> Self {
        EpisodeRequest {
            entry_state: None,
            start_key,
            end_key,
            scale: ScaleType::Major,
            start_tick,
            duration,
            num_voices,
            motif_pool,
            character,
            grammar: grammar_for_character(character),
            episode_index: 0,
            energy: 0.5,
            seed,
            pedal_pitch: 0,
            invertible: true,
            rules: None,
            pipeline_accumulator: None,
            timeline: None,
            last_pitches: [0; MAX_VOICES],
        }
    }
}

/// Result of one episode.
pub struct EpisodeResult {
    pub notes: Vec<NoteEvent>,
    pub exit_state: ConstraintState,
    pub achieved_key: Key,
    pub success: bool,
}

/// Candidate pitch offsets around the base pitch, in evaluation order.
const CANDIDATE_OFFSETS: [i32; 5] = [0, -1, 1, -2, 2];
/// Kernel phase preserves motif identity with a narrower search.
const KERNEL_OFFSETS: [i32; 3] = [0, -1, 1];

/// Recent pitches tracked per voice for vocabulary and repeat checks.
const MAX_RECENT: usize = 8;

/// Per-voice-per-bar sixteenth cap: 75% of a bar.
const MAX_SIXTEENTHS_PER_BAR: u32 = 12;

/// Sub-generator salt for the bass pass.
const BASS_SEED_SALT: u32 = 0xBA55_0002;
/// Sub-generator salt for the pedal pass.
const PEDAL_SEED_SALT: u32 = 0xBA55_0003;

/// Minimum duration for an energy level: a quarter at rest, near a
/// sixteenth at full energy.
fn min_duration_for_energy(energy: f32) -> Tick {
    let divisor = 1.0 + energy.clamp(0.0, 1.0) * 3.0;
    ((TICKS_PER_BEAT as f32 / divisor) as Tick).max(SIXTEENTH)
}

/// Gradual chromatic shift toward the target key over the second half.
fn apply_modulation_shift(pitch: u8, progress: f32, total_shift: i32) -> u8 {
    if progress <= 0.5 || total_shift == 0 {
        return pitch;
    }
    let frac = (progress - 0.5) * 2.0;
    let shift = (frac * total_shift as f32) as i32;
    clamp_pitch(i32::from(pitch) + shift, 0, 127)
}

/// Per-voice melodic tracking state.
struct VoiceState {
    prev_pitch: u8,
    prev_dur: Tick,
    prev_step: i8,
    recent: Vec<u8>,
    sixteenth_count: u32,
    current_bar: i64,
}

impl VoiceState {
    fn push_recent(&mut self, pitch: u8) {
        if self.recent.len() == MAX_RECENT {
            self.recent.remove(0);
        }
        self.recent.push(pitch);
    }
}

/// Resting inner voice for 4+ voice textures, rotating by episode index.
fn resting_voice(num_voices: u8, episode_index: u32) -> Option<u8> {
    if num_voices < 4 {
        return None;
    }
    let first_inner = 2u8;
    let last_inner = num_voices - 2;
    if first_inner > last_inner {
        return None;
    }
    let inner_count = u32::from(last_inner - first_inner + 1);
    Some(first_inner + (episode_index % inner_count) as u8)
}

/// Generate one episode. See the module comment for the algorithm.
pub fn generate_episode(request: &EpisodeRequest) -> EpisodeResult {
    let make_state = |req: &EpisodeRequest| {
        let (lo, hi) = overall_range(req.num_voices);
        ConstraintState::for_form(
            lo,
            hi,
            req.start_tick + req.duration,
            FuguePhase::Develop,
            req.energy,
            vec![req.start_tick + req.duration],
        )
    };

    // Validate the request.
    let valid = !request.motif_pool.is_empty()
        && request.duration > 0
        && (1..=6).contains(&request.num_voices);
    if !valid {
        return EpisodeResult {
            notes: Vec::new(),
            exit_state: request
                .entry_state
                .clone()
                .unwrap_or_else(|| make_state(request)),
            achieved_key: request.start_key,
            success: false,
        };
    }

    // Entry state loaded first, then per-episode overrides applied.
    let mut state = request
        .entry_state
        .clone()
        .unwrap_or_else(|| make_state(request));
    let (span_lo, span_hi) = overall_range(request.num_voices);
    state.invariants.voice_range_lo = span_lo;
    state.invariants.voice_range_hi = span_hi;
    state.gravity.phase = FuguePhase::Develop;
    state.gravity.energy = request.energy.clamp(0.0, 1.0);
    state.accumulator.current_phase = FuguePhase::Develop;
    state.scale = request.scale;
    state.total_duration = state.total_duration.max(request.start_tick + request.duration);
    if let Some(acc) = request.pipeline_accumulator {
        let phase = state.accumulator.current_phase;
        state.accumulator = acc.clone();
        state.accumulator.current_phase = phase;
    }

    // An entry state that is already dead cannot produce anything.
    if state.is_dead_at(request.start_tick) {
        return EpisodeResult {
            notes: Vec::new(),
            exit_state: state,
            achieved_key: request.start_key,
            success: false,
        };
    }

    let params = character_params(request.character);
    let pool = request.motif_pool;
    let default_rules = FugueRuleEvaluator;
    let rules: &dyn RuleEvaluator = request.rules.unwrap_or(&default_rules);

    // Initial transformed statements seed the per-voice previous pitches.
    let base_motif = match pool.for_operation(params.voice0_initial) {
        Some(m) if !m.notes.is_empty() => m,
        _ => {
            return EpisodeResult {
                notes: Vec::new(),
                exit_state: state,
                achieved_key: request.start_key,
                success: false,
            };
        }
    };
    let v0_seed_notes = apply_motif_op(
        &base_motif.notes,
        params.voice0_initial,
        request.start_key,
        request.scale,
        params.sequence_step,
    );
    let mut v1_seed_notes = apply_motif_op(
        &base_motif.notes,
        params.voice1_initial,
        request.start_key,
        request.scale,
        params.sequence_step,
    );
    if params.voice1_secondary != MotifOp::Original {
        v1_seed_notes = apply_motif_op(
            &v1_seed_notes,
            params.voice1_secondary,
            request.start_key,
            request.scale,
            params.sequence_step,
        );
    }

    let steps = plan_fortspinnung(
        pool,
        &request.grammar,
        request.start_tick,
        request.duration,
        request.num_voices,
        request.character,
        request.seed,
    );
    if steps.is_empty() {
        return EpisodeResult {
            notes: Vec::new(),
            exit_state: state,
            achieved_key: request.start_key,
            success: false,
        };
    }

    let mut rng = SketchRng::new(request.seed);
    let episode_end = request.start_tick + request.duration;
    let min_dur = min_duration_for_energy(request.energy);
    let total_shift = key_distance(request.start_key, request.end_key);

    // Per-voice state, seeded for voice-leading continuity.
    let mut voices: Vec<VoiceState> = (0..MAX_VOICES as u8)
        .map(|vdx| {
            let seeded = request.last_pitches[usize::from(vdx)];
            let prev_pitch = if vdx < request.num_voices && seeded > 0 {
                seeded
            } else if vdx == 0 && !v0_seed_notes.is_empty() {
                v0_seed_notes[0].pitch
            } else if vdx == 1 && !v1_seed_notes.is_empty() {
                v1_seed_notes[0].pitch
            } else {
                let (lo, hi) = fugue_voice_range(vdx, request.num_voices);
                (u16::from(lo) + u16::from(hi)).div_euclid(2) as u8
            };
            VoiceState {
                prev_pitch,
                prev_dur: TICKS_PER_BEAT,
                prev_step: 0,
                recent: Vec::with_capacity(MAX_RECENT),
                sixteenth_count: 0,
                current_bar: -1,
            }
        })
        .collect();

    let mut notes: Vec<NoteEvent> = Vec::new();
    let mut sequence_statement: u32 = 0;

    // --- Main loop: voices 0 and 1, driven by plan steps. ---
    'steps: for step in &steps {
        let voice = step.voice;
        if usize::from(voice) >= MAX_VOICES {
            continue;
        }
        let Some(step_motif) = pool.by_rank(step.pool_rank) else {
            continue;
        };
        if step_motif.notes.is_empty() {
            continue;
        }

        // Apply the step's operation. Sequence statements descend
        // cumulatively by the character's degree step.
        let mut motif_notes = if step.op == MotifOp::Sequence {
            sequence_statement += 1;
            transpose_diatonic(
                &step_motif.notes,
                params.sequence_step * sequence_statement as i32,
                request.start_key,
                request.scale,
            )
        } else {
            apply_motif_op(
                &step_motif.notes,
                step.op,
                request.start_key,
                request.scale,
                params.sequence_step,
            )
        };

        // Noble voice 1: octave-down counter-line under the main voice.
        if voice == 1 && request.character == SubjectCharacter::Noble {
            motif_notes = transpose(&motif_notes, -12);
        }

        let (voice_lo, voice_hi) = fugue_voice_range(voice, request.num_voices);

        let mut note_tick = step.tick;
        for motif_note in &motif_notes {
            if note_tick >= episode_end {
                break;
            }

            // Phase-controlled diminution with motif preservation.
            let mut base_dur = motif_note.duration;
            {
                let mut diminish_prob = match step.phase {
                    FortPhase::Kernel => 0.0f32,
                    FortPhase::Sequence => 0.50,
                    FortPhase::Dissolution => 0.55 + request.energy * 0.15,
                };

                // Strong-beat guard outside Dissolution.
                if step.phase != FortPhase::Dissolution && is_strong_beat(note_tick) {
                    diminish_prob = 0.0;
                }

                // Resolution protection: a dissonance settling onto a
                // consonance keeps its written duration.
                if diminish_prob > 0.0
                    && previous_was_dissonant(&voices, voice, request.num_voices)
                    && is_consonant_with_texture(
                        motif_note.pitch,
                        &voices,
                        voice,
                        request.num_voices,
                    )
                {
                    diminish_prob = 0.0;
                }

                // Rhythm consistency: soften 8th -> 16th switches.
                if diminish_prob > 0.0 {
                    let prev_cat =
                        ticks_to_dur_category(voices[usize::from(voice)].prev_dur);
                    let halved = ticks_to_dur_category((base_dur / 2).max(SIXTEENTH));
                    if prev_cat == DurCategory::S8 && halved == DurCategory::S16 {
                        diminish_prob *= 0.5;
                    }
                }

                if base_dur > SIXTEENTH && rng.chance(diminish_prob) {
                    base_dur = (base_dur / 2).max(SIXTEENTH);
                    let second_prob = if step.phase == FortPhase::Dissolution {
                        diminish_prob * 0.5
                    } else {
                        0.25
                    };
                    if base_dur > SIXTEENTH && rng.chance(second_prob) {
                        base_dur = (base_dur / 2).max(SIXTEENTH);
                    }
                }
            }

            // Sixteenth cap per bar.
            {
                let vstate = &mut voices[usize::from(voice)];
                let bar = i64::from(note_tick / TICKS_PER_BAR);
                if bar != vstate.current_bar {
                    vstate.current_bar = bar;
                    vstate.sixteenth_count = 0;
                }
                if base_dur <= SIXTEENTH {
                    if vstate.sixteenth_count >= MAX_SIXTEENTHS_PER_BAR {
                        base_dur = EIGHTH;
                    } else {
                        vstate.sixteenth_count += 1;
                    }
                }
            }

            // Figuration consistency: short notes stay in their category.
            {
                let prev_cat = ticks_to_dur_category(voices[usize::from(voice)].prev_dur);
                let cand_cat = ticks_to_dur_category(base_dur);
                let prev_short =
                    matches!(prev_cat, DurCategory::S16 | DurCategory::S8);
                let cand_short =
                    matches!(cand_cat, DurCategory::S16 | DurCategory::S8);
                if prev_short && cand_short && prev_cat != cand_cat {
                    base_dur = if prev_cat == DurCategory::S16 {
                        SIXTEENTH
                    } else {
                        EIGHTH
                    };
                }
            }

            let mut note_dur = base_dur.max(min_dur);
            let remaining = episode_end - note_tick;
            note_dur = note_dur.min(remaining);
            if note_dur == 0 {
                continue;
            }

            let progress =
                (note_tick - request.start_tick) as f32 / request.duration.max(1) as f32;
            // Switch to the target key at 60% so the second half settles
            // into the new diatonic collection.
            let current_key = if progress > 0.6 {
                request.end_key
            } else {
                request.start_key
            };

            let snap = VerticalSnapshot::from_notes(&notes, note_tick, request.num_voices);
            let view = counterpoint_view(&voices);
            let ctx = melodic_context(&voices[usize::from(voice)], current_key, request.scale);
            let base_pitch = apply_modulation_shift(motif_note.pitch, progress, total_shift);

            let offsets: &[i32] = if step.phase == FortPhase::Kernel {
                &KERNEL_OFFSETS
            } else {
                &CANDIDATE_OFFSETS
            };

            let mut best: Option<(f32, u8, CheckResult)> = None;
            for (offset_idx, &offset) in offsets.iter().enumerate() {
                let candidate_int = i32::from(base_pitch) + offset;
                if candidate_int < i32::from(voice_lo) || candidate_int > i32::from(voice_hi)
                {
                    continue;
                }
                let candidate =
                    nearest_scale_tone(candidate_int as u8, current_key, request.scale);
                if candidate < voice_lo || candidate > voice_hi {
                    continue;
                }

                let vstate = &voices[usize::from(voice)];
                let figure = figure_score(&vstate.recent, candidate);
                let eval = state.evaluate(
                    candidate,
                    note_dur,
                    voice,
                    note_tick,
                    &ctx,
                    &snap,
                    Some(rules),
                    Some(&view),
                    &vstate.recent,
                    figure,
                );
                let Evaluation::Score { value, soft } = eval else {
                    continue;
                };
                let mut score = value;

                // Repetition penalty keeps lines moving.
                if candidate == vstate.prev_pitch {
                    score -= 0.40;
                }
                // Kernel identity: the motif's own pitch wins unless another
                // candidate is dramatically better.
                if step.phase == FortPhase::Kernel && offset_idx == 0 {
                    score += 0.50;
                }
                // Kernel spacing: prefer separation over clustering.
                if step.phase == FortPhase::Kernel
                    && let Some(spacing) = min_spacing(&snap, voice, candidate)
                {
                    score += (spacing as f32 / 24.0).min(0.40);
                }
                // Sequence coherence bonus.
                if step.phase == FortPhase::Sequence && offset_idx == 0 {
                    score += 0.30;
                }
                // Pedal consonance on beat boundaries.
                if request.pedal_pitch > 0 && note_tick % TICKS_PER_BEAT == 0 {
                    let ivl = (i32::from(candidate) - i32::from(request.pedal_pitch))
                        .unsigned_abs()
                        % 12;
                    score += if matches!(ivl, 0 | 3 | 4 | 7 | 8 | 9) {
                        0.30
                    } else {
                        -0.25
                    };
                }
                // General spacing bonus, phase-capped.
                if let Some(spacing) = min_spacing(&snap, voice, candidate) {
                    let cap = match step.phase {
                        FortPhase::Kernel => 0.50,
                        FortPhase::Sequence => 0.40,
                        FortPhase::Dissolution => 0.35,
                    };
                    if spacing > 0 {
                        score += (spacing as f32 / 24.0).sqrt().min(cap);
                    }
                }
                // Pairwise consonance with every sounding voice.
                for (other, other_pitch) in snap.sounding() {
                    if other == usize::from(voice) {
                        continue;
                    }
                    score += if is_consonant(candidate, other_pitch) {
                        0.10
                    } else {
                        -0.20
                    };
                }

                let better = match &best {
                    None => true,
                    Some((best_score, _, _)) => score > *best_score,
                };
                if better {
                    best = Some((score, candidate, soft));
                }
            }

            // All candidates hard-rejected: skip this slot and move on.
            let Some((_, best_pitch, best_soft)) = best else {
                note_tick += motif_note.duration;
                continue;
            };

            notes.push(NoteEvent {
                start_tick: note_tick,
                duration: note_dur,
                pitch: best_pitch,
                velocity: DEFAULT_VELOCITY,
                voice,
                source: NoteSource::EpisodeMaterial,
            });
            state.advance(note_tick, best_pitch, voice, note_dur, current_key, &best_soft);

            let vstate = &mut voices[usize::from(voice)];
            vstate.prev_step =
                compute_degree_step(vstate.prev_pitch, best_pitch, current_key, request.scale);
            vstate.prev_pitch = best_pitch;
            vstate.prev_dur = note_dur;
            vstate.push_recent(best_pitch);

            if state.is_dead_at(note_tick) {
                notes.sort_by_key(|n| (n.start_tick, n.voice));
                return EpisodeResult {
                    notes,
                    exit_state: state,
                    achieved_key: current_key,
                    success: false,
                };
            }

            note_tick += note_dur;
            if note_tick >= episode_end {
                continue 'steps;
            }
        }
    }

    // --- Lower voices. ---
    let resting = resting_voice(request.num_voices, request.episode_index);

    if let Some(rest_voice) = resting {
        place_held_tones(&mut notes, &mut state, request, rest_voice, rules);
    }

    if request.num_voices >= 3 && resting != Some(2) {
        let mut bass_rng = SketchRng::new(request.seed ^ BASS_SEED_SALT);
        place_bass_fragments(&mut notes, &mut state, request, &mut bass_rng, rules);
    }

    if request.num_voices >= 4 {
        let mut pedal_rng = SketchRng::new(request.seed ^ PEDAL_SEED_SALT);
        place_pedal_voice(&mut notes, &mut state, request, &mut pedal_rng, rules);
    }

    // --- Invertible counterpoint: swap voices 0 and 1 on odd episodes. ---
    if request.invertible && request.episode_index % 2 == 1 && request.num_voices >= 2 {
        for note in &mut notes {
            note.voice = match note.voice {
                0 => 1,
                1 => 0,
                v => v,
            };
        }
    }

    notes.sort_by_key(|n| (n.start_tick, n.voice));
    EpisodeResult {
        notes,
        exit_state: state,
        achieved_key: request.end_key,
        success: true,
    }
}

/// Union of the per-voice ranges: the overall span the invariants police.
fn overall_range(num_voices: u8) -> (u8, u8) {
    let mut lo = u8::MAX;
    let mut hi = 0u8;
    for voice in 0..num_voices {
        let (vlo, vhi) = fugue_voice_range(voice, num_voices);
        lo = lo.min(vlo);
        hi = hi.max(vhi);
    }
    (lo, hi)
}

fn counterpoint_view(voices: &[VoiceState]) -> CounterpointView {
    let mut view = CounterpointView::default();
    for (idx, vstate) in voices.iter().take(MAX_VOICES).enumerate() {
        view.prev_pitches[idx] = vstate.prev_pitch;
    }
    view
}

fn melodic_context(vstate: &VoiceState, key: Key, scale: ScaleType) -> MelodicContext {
    let degree = pitch_to_absolute_degree(vstate.prev_pitch, key, scale);
    MelodicContext {
        prev_pitch: vstate.prev_pitch,
        prev_step: vstate.prev_step,
        deg_class: degree_to_class(degree),
        prev_dur: ticks_to_dur_category(vstate.prev_dur),
        key,
        scale,
    }
}

/// Minimum spacing from the candidate to any other sounding voice.
fn min_spacing(snap: &VerticalSnapshot, voice: u8, candidate: u8) -> Option<u32> {
    snap.sounding()
        .filter(|&(v, _)| v != usize::from(voice))
        .map(|(_, p)| (i32::from(candidate) - i32::from(p)).unsigned_abs())
        .min()
}

fn previous_was_dissonant(voices: &[VoiceState], voice: u8, num_voices: u8) -> bool {
    let prev = voices[usize::from(voice)].prev_pitch;
    if prev == 0 {
        return false;
    }
    voices
        .iter()
        .take(usize::from(num_voices))
        .enumerate()
        .filter(|&(v, _)| v != usize::from(voice))
        .any(|(_, other)| {
            other.prev_pitch > 0
                && matches!(
                    (i32::from(prev) - i32::from(other.prev_pitch)).unsigned_abs() % 12,
                    1 | 2 | 6 | 10 | 11
                )
        })
}

fn is_consonant_with_texture(pitch: u8, voices: &[VoiceState], voice: u8, num_voices: u8) -> bool {
    voices
        .iter()
        .take(usize::from(num_voices))
        .enumerate()
        .filter(|&(v, _)| v != usize::from(voice))
        .any(|(_, other)| {
            other.prev_pitch > 0
                && matches!(
                    (i32::from(pitch) - i32::from(other.prev_pitch)).unsigned_abs() % 12,
                    0 | 3 | 4 | 7 | 8 | 9
                )
        })
}

/// Held tones on the resting voice: half notes from the range center,
/// stepping down a scale tone every two placements.
fn place_held_tones(
    notes: &mut Vec<NoteEvent>,
    state: &mut ConstraintState,
    request: &EpisodeRequest,
    rest_voice: u8,
    rules: &dyn RuleEvaluator,
) {
    if notes.iter().any(|n| n.voice == rest_voice) {
        return;
    }
    let (v_lo, v_hi) = fugue_voice_range(rest_voice, request.num_voices);
    let mut held_pitch = nearest_scale_tone(
        ((u16::from(v_lo) + u16::from(v_hi)) / 2) as u8,
        request.start_key,
        request.scale,
    );

    let episode_end = request.start_tick + request.duration;
    let mut held_tick = request.start_tick;
    let mut step_count = 0u32;
    while held_tick < episode_end {
        let held_dur = (TICKS_PER_BEAT * 2).min(episode_end - held_tick);
        if held_dur == 0 {
            break;
        }
        let snap = VerticalSnapshot::from_notes(notes, held_tick, request.num_voices);
        let ctx = MelodicContext {
            prev_pitch: held_pitch,
            prev_step: 0,
            deg_class: degree_to_class(pitch_to_absolute_degree(
                held_pitch,
                request.start_key,
                request.scale,
            )),
            prev_dur: DurCategory::Qtr,
            key: request.start_key,
            scale: request.scale,
        };
        let eval = state.evaluate(
            held_pitch,
            held_dur,
            rest_voice,
            held_tick,
            &ctx,
            &snap,
            Some(rules),
            None,
            &[],
            0.0,
        );
        if let Evaluation::Score { soft, .. } = eval {
            notes.push(NoteEvent {
                start_tick: held_tick,
                duration: held_dur,
                pitch: held_pitch,
                velocity: DEFAULT_VELOCITY,
                voice: rest_voice,
                source: NoteSource::EpisodeMaterial,
            });
            state.advance(
                held_tick,
                held_pitch,
                rest_voice,
                held_dur,
                request.start_key,
                &soft,
            );
        }

        held_tick += TICKS_PER_BEAT * 2;
        step_count += 1;
        if step_count % 2 == 0 {
            let lowered = clamp_pitch(i32::from(held_pitch) - 1, v_lo, v_hi);
            held_pitch = nearest_scale_tone(lowered, request.start_key, request.scale);
        }
    }
}

/// Bass line on voice 2: tail fragments of voice 0 alternating with
/// harmonic anchor notes, all constraint-validated.
fn place_bass_fragments(
    notes: &mut Vec<NoteEvent>,
    state: &mut ConstraintState,
    request: &EpisodeRequest,
    rng: &mut SketchRng,
    rules: &dyn RuleEvaluator,
) {
    let voice0_notes: Vec<NoteEvent> = notes.iter().filter(|n| n.voice == 0).copied().collect();
    if voice0_notes.is_empty() {
        return;
    }
    let bass_key = request.end_key;

    let (v2_lo, v2_hi) = fugue_voice_range(2, request.num_voices);
    let mut bass_fragment = extract_tail(&voice0_notes, 3);
    for note in &mut bass_fragment {
        let mut mapped = i32::from(note.pitch);
        if mapped < i32::from(v2_lo) {
            mapped += 12;
        }
        if mapped > i32::from(v2_hi) {
            mapped -= 12;
        }
        note.pitch = clamp_pitch(mapped, v2_lo, v2_hi);
    }
    // Duration jitter for rhythmic interest.
    if bass_fragment.len() >= 2 {
        for note in &mut bass_fragment {
            let factor = rng.range_f32(0.6, 1.6);
            let stretched = ((note.duration as f32 * factor) as Tick).max(TICKS_PER_BEAT / 2);
            note.duration = quantize_duration(stretched);
        }
    }
    // Re-anchor fragment offsets relative to its first onset.
    let frag_origin = bass_fragment
        .iter()
        .map(|n| n.start_tick)
        .min()
        .unwrap_or(0);
    for note in &mut bass_fragment {
        note.start_tick -= frag_origin;
    }
    let frag_dur = motif_duration(&bass_fragment).max(TICKS_PER_BEAT * 2);

    let emit_prob = rng.range_f32(0.70, 0.85);
    let episode_end = request.start_tick + request.duration;
    let mut bass_tick = request.start_tick;
    let mut use_fragment = true;
    let mut bass_prev = bass_fragment.first().map_or(48, |n| n.pitch);

    while bass_tick < episode_end {
        if !rng.chance(emit_prob) {
            bass_tick += if use_fragment { frag_dur } else { TICKS_PER_BAR };
            use_fragment = !use_fragment;
            continue;
        }

        if use_fragment && !bass_fragment.is_empty() {
            for frag_note in &bass_fragment {
                let note_tick = frag_note.start_tick + bass_tick;
                if note_tick >= episode_end {
                    break;
                }
                let mut duration = frag_note.duration.min(episode_end - note_tick);
                if duration < SIXTEENTH {
                    continue;
                }
                let snap = VerticalSnapshot::from_notes(notes, note_tick, request.num_voices);
                let ctx = bass_context(bass_prev, bass_key, request.scale);
                let eval = state.evaluate(
                    frag_note.pitch,
                    duration,
                    2,
                    note_tick,
                    &ctx,
                    &snap,
                    Some(rules),
                    None,
                    &[],
                    0.0,
                );
                if let Evaluation::Score { soft, .. } = eval {
                    duration = duration.max(SIXTEENTH);
                    notes.push(NoteEvent {
                        start_tick: note_tick,
                        duration,
                        pitch: frag_note.pitch,
                        velocity: DEFAULT_VELOCITY,
                        voice: 2,
                        source: NoteSource::EpisodeMaterial,
                    });
                    state.advance(note_tick, frag_note.pitch, 2, duration, bass_key, &soft);
                    bass_prev = frag_note.pitch;
                }
            }
            bass_tick += frag_dur;
        } else {
            let anchor_pitch = bass_anchor_pitch(request, bass_tick, v2_lo, v2_hi, bass_key);

            // Phase-dependent anchor duration distribution.
            let bass_progress =
                (bass_tick - request.start_tick) as f32 / request.duration.max(1) as f32;
            let in_sequence = bass_progress >= request.grammar.kernel_ratio
                && bass_progress < request.grammar.kernel_ratio + request.grammar.sequence_ratio;
            let roll = rng.next_f32();
            let mut base_dur = if in_sequence {
                // Sequence: shorter values for rhythmic drive.
                if roll < 0.20 {
                    SIXTEENTH
                } else if roll < 0.60 {
                    EIGHTH
                } else if roll < 0.90 {
                    TICKS_PER_BEAT
                } else {
                    TICKS_PER_BEAT * 2
                }
            } else {
                // Kernel/Dissolution: longer values for harmonic stability.
                if roll < 0.30 {
                    EIGHTH
                } else if roll < 0.70 {
                    TICKS_PER_BEAT
                } else if roll < 0.90 {
                    TICKS_PER_BEAT * 2
                } else {
                    TICKS_PER_BAR
                }
            };

            // Floor rule: sustained upper figuration wants a solid bass.
            let short_upper = notes
                .iter()
                .filter(|n| {
                    n.voice < 2
                        && n.end_tick() + TICKS_PER_BEAT * 2 > bass_tick
                        && n.start_tick <= bass_tick
                        && n.duration <= EIGHTH
                })
                .count();
            if short_upper >= 4 && base_dur < TICKS_PER_BEAT {
                base_dur = TICKS_PER_BEAT;
            }

            let anchor_dur = base_dur.min(episode_end - bass_tick);
            if anchor_dur >= SIXTEENTH {
                let snap = VerticalSnapshot::from_notes(notes, bass_tick, request.num_voices);
                let ctx = bass_context(bass_prev, bass_key, request.scale);
                let eval = state.evaluate(
                    anchor_pitch,
                    anchor_dur,
                    2,
                    bass_tick,
                    &ctx,
                    &snap,
                    Some(rules),
                    None,
                    &[],
                    0.0,
                );
                if let Evaluation::Score { soft, .. } = eval {
                    notes.push(NoteEvent {
                        start_tick: bass_tick,
                        duration: anchor_dur,
                        pitch: anchor_pitch,
                        velocity: DEFAULT_VELOCITY,
                        voice: 2,
                        source: NoteSource::EpisodeMaterial,
                    });
                    state.advance(bass_tick, anchor_pitch, 2, anchor_dur, bass_key, &soft);
                    bass_prev = anchor_pitch;
                }
            }
            bass_tick += TICKS_PER_BEAT * 2;
        }
        use_fragment = !use_fragment;
    }

    // Octave-fold any voice 2 notes that drifted past the range.
    for note in notes.iter_mut() {
        if note.voice != 2
            || note.start_tick < request.start_tick
            || note.start_tick >= episode_end
        {
            continue;
        }
        let mut p = i32::from(note.pitch);
        while p > i32::from(v2_hi) && p - 12 >= i32::from(v2_lo) {
            p -= 12;
        }
        while p < i32::from(v2_lo) && p + 12 <= i32::from(v2_hi) {
            p += 12;
        }
        note.pitch = clamp_pitch(p, v2_lo, v2_hi);
    }
}

fn bass_context(prev_pitch: u8, key: Key, scale: ScaleType) -> MelodicContext {
    MelodicContext {
        prev_pitch,
        prev_step: 0,
        deg_class: degree_to_class(pitch_to_absolute_degree(prev_pitch, key, scale)),
        prev_dur: DurCategory::Qtr,
        key,
        scale,
    }
}

/// Anchor pitch for the bass: harmonic timeline when present, otherwise a
/// descending circle-of-fifths pattern in 2-bar units.
fn bass_anchor_pitch(
    request: &EpisodeRequest,
    bass_tick: Tick,
    v2_lo: u8,
    v2_hi: u8,
    bass_key: Key,
) -> u8 {
    let mut anchor = if let Some(timeline) = request.timeline {
        i32::from(timeline.chord_at(bass_tick).root_pitch)
    } else {
        // I -> IV -> vii(->V) -> iii -> vi -> ii -> V, truncated to 5 steps.
        // The vii step takes the dominant root in the bass for stability.
        const CIRCLE_OFFSETS: [i32; 7] = [0, 5, 7, 4, 9, 2, 7];
        const MAX_STEPS: usize = 5;

        let raw_step = ((bass_tick - request.start_tick) / (TICKS_PER_BAR * 2)) as usize;
        let step_idx = (raw_step % CIRCLE_OFFSETS.len()).min(MAX_STEPS - 1);
        let base_pitch = 48 + i32::from(bass_key.pc()) + CIRCLE_OFFSETS[step_idx];

        let strong = (bass_tick % TICKS_PER_BAR) < TICKS_PER_BEAT;
        if strong {
            base_pitch
        } else {
            // Diatonic passing motion toward the next sequence step.
            let next_idx = (step_idx + 1).min(MAX_STEPS - 1);
            let next_pitch = 48 + i32::from(bass_key.pc()) + CIRCLE_OFFSETS[next_idx];
            let curr_deg = pitch_to_absolute_degree(
                clamp_pitch(base_pitch, 0, 127),
                bass_key,
                request.scale,
            );
            let next_deg = pitch_to_absolute_degree(
                clamp_pitch(next_pitch, 0, 127),
                bass_key,
                request.scale,
            );
            let unit_offset = (bass_tick - request.start_tick) % (TICKS_PER_BAR * 2);
            let frac = unit_offset as f32 / (TICKS_PER_BAR * 2) as f32;
            let passing_deg = curr_deg + ((next_deg - curr_deg) as f32 * frac) as i32;
            i32::from(crate::scale::absolute_degree_to_pitch(
                passing_deg,
                bass_key,
                request.scale,
            ))
        }
    };

    while anchor > i32::from(v2_hi) {
        anchor -= 12;
    }
    while anchor < i32::from(v2_lo) {
        anchor += 12;
    }
    clamp_pitch(anchor, v2_lo, v2_hi)
}

/// Pedal anchors on the last voice: tonic and dominant half notes, shifting
/// toward the dominant in the final quarter.
fn place_pedal_voice(
    notes: &mut Vec<NoteEvent>,
    state: &mut ConstraintState,
    request: &EpisodeRequest,
    rng: &mut SketchRng,
    rules: &dyn RuleEvaluator,
) {
    let pedal_voice = request.num_voices - 1;
    let (pedal_lo, pedal_hi) = fugue_voice_range(pedal_voice, request.num_voices);
    let key = request.end_key;

    let tonic = clamp_pitch(36 + i32::from(key.pc()), pedal_lo, pedal_hi);
    let mut dominant = i32::from(tonic) + 7;
    if dominant > i32::from(pedal_hi) {
        dominant -= 12;
    }
    let dominant = clamp_pitch(dominant, pedal_lo, pedal_hi);

    let emit_prob = rng.range_f32(0.50, 0.70);
    let episode_end = request.start_tick + request.duration;
    const MAX_SILENT_HALF_BARS: u32 = 8; // four bars of silence forces a note
    let mut silent_half_bars = 0u32;
    let mut pedal_tick = request.start_tick;

    while pedal_tick < episode_end {
        let force = silent_half_bars >= MAX_SILENT_HALF_BARS;
        if !force && !rng.chance(emit_prob) {
            silent_half_bars += 1;
            pedal_tick += TICKS_PER_BEAT * 2;
            continue;
        }
        silent_half_bars = 0;

        // Distribution shifts toward the dominant in the last quarter.
        let progress =
            (pedal_tick - request.start_tick) as f32 / request.duration.max(1) as f32;
        let (t_prob, d_prob) = if progress >= 0.75 {
            (0.25f32, 0.60f32)
        } else {
            (0.50, 0.35)
        };
        let roll = rng.next_f32();
        let anchor = if roll < t_prob {
            tonic
        } else if roll < t_prob + d_prob {
            dominant
        } else {
            let mut subdominant = i32::from(tonic) + 5;
            if subdominant > i32::from(pedal_hi) {
                subdominant -= 12;
            }
            clamp_pitch(subdominant, pedal_lo, pedal_hi)
        };

        let anchor_dur = (TICKS_PER_BEAT * 2).min(episode_end - pedal_tick);
        if anchor_dur > 0 {
            let snap = VerticalSnapshot::from_notes(notes, pedal_tick, request.num_voices);
            let ctx = bass_context(anchor, key, request.scale);
            let eval = state.evaluate(
                anchor,
                anchor_dur,
                pedal_voice,
                pedal_tick,
                &ctx,
                &snap,
                Some(rules),
                None,
                &[],
                0.0,
            );
            if let Evaluation::Score { soft, .. } = eval {
                notes.push(NoteEvent {
                    start_tick: pedal_tick,
                    duration: anchor_dur,
                    pitch: anchor,
                    velocity: DEFAULT_VELOCITY,
                    voice: pedal_voice,
                    source: NoteSource::EpisodeMaterial,
                });
                state.advance(pedal_tick, anchor, pedal_voice, anchor_dur, key, &soft);
            }
        }
        pedal_tick += TICKS_PER_BEAT * 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::dedupe_voice_overlaps;
    use crate::obligation::{Obligation, ObligationKind, Severity};
    use crate::scale::is_scale_tone;

    /// The ascending C major scale in quarters: the contour-test subject.
    fn scale_subject() -> Vec<NoteEvent> {
        let pitches = [60u8, 62, 64, 65, 67, 69, 71, 72];
        pitches
            .iter()
            .enumerate()
            .map(|(idx, &pitch)| NoteEvent {
                start_tick: idx as Tick * TICKS_PER_BEAT,
                duration: TICKS_PER_BEAT,
                pitch,
                velocity: DEFAULT_VELOCITY,
                voice: 0,
                source: NoteSource::FugueSubject,
            })
            .collect()
    }

    fn pool() -> MotifPool {
        MotifPool::build(&scale_subject(), &[])
    }

    fn count_direction_changes(notes: &[NoteEvent], voice: u8) -> u32 {
        let mut pitches: Vec<(Tick, u8)> = notes
            .iter()
            .filter(|n| n.voice == voice)
            .map(|n| (n.start_tick, n.pitch))
            .collect();
        pitches.sort();
        let mut changes = 0;
        let mut prev_dir = 0i32;
        for pair in pitches.windows(2) {
            let diff = i32::from(pair[1].1) - i32::from(pair[0].1);
            let dir = diff.signum();
            if dir != 0 {
                if prev_dir != 0 && dir != prev_dir {
                    changes += 1;
                }
                prev_dir = dir;
            }
        }
        changes
    }

    #[test]
    fn test_scenario_a_single_voice_severe() {
        let pool = pool();
        let request = EpisodeRequest::new(
            &pool,
            Key::C,
            Key::C,
            0,
            4 * TICKS_PER_BAR,
            1,
            SubjectCharacter::Severe,
            42,
        );
        let result = generate_episode(&request);
        assert!(result.success);
        assert!(!result.notes.is_empty());
        for note in &result.notes {
            assert_eq!(note.voice, 0);
            assert!(
                is_scale_tone(note.pitch, Key::C, ScaleType::Major),
                "pitch {} not diatonic",
                note.pitch
            );
        }
        let mut finalized = result.notes.clone();
        dedupe_voice_overlaps(&mut finalized);
        let changes = count_direction_changes(&finalized, 0);
        assert!(
            (3..=15).contains(&changes),
            "direction changes {changes} out of range"
        );
    }

    #[test]
    fn test_scenario_b_three_voice_modulating() {
        let pool = pool();
        let request = EpisodeRequest::new(
            &pool,
            Key::C,
            Key::G,
            0,
            4 * TICKS_PER_BAR,
            3,
            SubjectCharacter::Playful,
            42,
        );
        let result = generate_episode(&request);
        assert!(result.success);
        assert_eq!(result.achieved_key, Key::G);

        for voice in 0..3u8 {
            assert!(
                result.notes.iter().any(|n| n.voice == voice),
                "voice {voice} has no notes"
            );
        }

        // No note extends beyond the episode end.
        for note in &result.notes {
            assert!(note.end_tick() <= 4 * TICKS_PER_BAR);
        }

        // 85%+ of second-half notes are diatonic in the target key.
        let second_half: Vec<&NoteEvent> = result
            .notes
            .iter()
            .filter(|n| n.start_tick >= 2 * TICKS_PER_BAR)
            .collect();
        assert!(!second_half.is_empty());
        let diatonic = second_half
            .iter()
            .filter(|n| is_scale_tone(n.pitch, Key::G, ScaleType::Major))
            .count();
        let ratio = diatonic as f32 / second_half.len() as f32;
        assert!(ratio >= 0.85, "only {:.0}% diatonic in G", ratio * 100.0);

        // The bass voice contributed more than a single note.
        let bass_count = result.notes.iter().filter(|n| n.voice == 2).count();
        assert!(bass_count >= 2, "bass placed {bass_count} notes");
    }

    #[test]
    fn test_scenario_c_four_voice_noble_invertible() {
        let pool = pool();
        let mut request = EpisodeRequest::new(
            &pool,
            Key::C,
            Key::C,
            0,
            4 * TICKS_PER_BAR,
            4,
            SubjectCharacter::Noble,
            42,
        );
        request.episode_index = 1;
        let inverted = generate_episode(&request);
        assert!(inverted.success);

        // Voice 2 rests on held tones: every note at least a half note.
        let held: Vec<&NoteEvent> =
            inverted.notes.iter().filter(|n| n.voice == 2).collect();
        assert!(!held.is_empty(), "resting voice placed nothing");
        for note in &held {
            assert!(
                note.duration >= TICKS_PER_BEAT * 2 || note.end_tick() == 4 * TICKS_PER_BAR,
                "held tone of {} ticks",
                note.duration
            );
        }

        // Voice 3 holds pedal anchors in the C2..C4 octave, mostly tonic
        // and dominant pitch classes.
        let pedal: Vec<&NoteEvent> =
            inverted.notes.iter().filter(|n| n.voice == 3).collect();
        assert!(!pedal.is_empty(), "pedal voice placed nothing");
        let anchored = pedal
            .iter()
            .filter(|n| matches!(n.pitch % 12, 0 | 7 | 5))
            .count();
        assert_eq!(anchored, pedal.len());
        for note in &pedal {
            assert!((36..=60).contains(&note.pitch));
        }

        // Odd index swaps voices 0 and 1 relative to the even-index run.
        let mut even_request = EpisodeRequest::new(
            &pool,
            Key::C,
            Key::C,
            0,
            4 * TICKS_PER_BAR,
            4,
            SubjectCharacter::Noble,
            42,
        );
        even_request.episode_index = 0;
        let upright = generate_episode(&even_request);
        let pitches = |r: &EpisodeResult, v: u8| -> Vec<u8> {
            r.notes
                .iter()
                .filter(|n| n.voice == v)
                .map(|n| n.pitch)
                .collect()
        };
        assert_eq!(pitches(&inverted, 0), pitches(&upright, 1));
        assert_eq!(pitches(&inverted, 1), pitches(&upright, 0));
    }

    #[test]
    fn test_scenario_d_determinism() {
        let pool = pool();
        let make = || {
            let request = EpisodeRequest::new(
                &pool,
                Key::C,
                Key::C,
                0,
                4 * TICKS_PER_BAR,
                1,
                SubjectCharacter::Severe,
                42,
            );
            generate_episode(&request)
        };
        let a = make();
        let b = make();
        assert_eq!(a.notes, b.notes);
        assert_eq!(a.success, b.success);
    }

    #[test]
    fn test_scenario_e_dead_entry_state() {
        let pool = pool();
        let mut entry = ConstraintState::for_form(60, 40, 7680, FuguePhase::Develop, 0.5, vec![]);
        entry.ledger.add(Obligation {
            kind: ObligationKind::ResolveSuspension { pitch: 65 },
            voice: 0,
            origin: 0,
            deadline: 0,
            severity: Severity::Structural,
        });
        // Pre-expire by settling a later tick.
        let clean = CheckResult::default();
        entry.advance(480, 60, 1, 240, Key::C, &clean);
        assert!(entry.is_dead());

        let mut request = EpisodeRequest::new(
            &pool,
            Key::C,
            Key::C,
            960,
            4 * TICKS_PER_BAR,
            2,
            SubjectCharacter::Severe,
            42,
        );
        request.entry_state = Some(entry);
        let result = generate_episode(&request);
        assert!(!result.success);
        assert!(result.notes.is_empty());
        assert!(result.exit_state.is_dead());
    }

    #[test]
    fn test_invalid_requests_fail_cleanly() {
        let pool = pool();
        // Zero duration.
        let request =
            EpisodeRequest::new(&pool, Key::C, Key::C, 0, 0, 2, SubjectCharacter::Severe, 1);
        let result = generate_episode(&request);
        assert!(!result.success);
        assert!(result.notes.is_empty());

        // Voice count out of range.
        let request =
            EpisodeRequest::new(&pool, Key::C, Key::C, 0, 7680, 7, SubjectCharacter::Severe, 1);
        assert!(!generate_episode(&request).success);

        // Empty pool.
        let empty = MotifPool::build(&[], &[]);
        let request =
            EpisodeRequest::new(&empty, Key::C, Key::C, 0, 7680, 2, SubjectCharacter::Severe, 1);
        assert!(!generate_episode(&request).success);
    }

    #[test]
    fn test_direction_changes_eight_bars() {
        let pool = pool();
        for seed in 1..=10u32 {
            let request = EpisodeRequest::new(
                &pool,
                Key::C,
                Key::G,
                0,
                8 * TICKS_PER_BAR,
                3,
                SubjectCharacter::Severe,
                seed,
            );
            let result = generate_episode(&request);
            assert!(!result.notes.is_empty(), "seed {seed} produced nothing");
            let mut finalized = result.notes.clone();
            dedupe_voice_overlaps(&mut finalized);
            let changes = count_direction_changes(&finalized, 0);
            assert!(
                (3..=15).contains(&changes),
                "seed {seed}: {changes} direction changes"
            );
        }
    }

    #[test]
    fn test_output_sorted_and_in_range() {
        let pool = pool();
        let request = EpisodeRequest::new(
            &pool,
            Key::C,
            Key::G,
            1920,
            4 * TICKS_PER_BAR,
            4,
            SubjectCharacter::Playful,
            7,
        );
        let result = generate_episode(&request);
        for pair in result.notes.windows(2) {
            assert!(
                (pair[0].start_tick, pair[0].voice) <= (pair[1].start_tick, pair[1].voice),
                "output not sorted"
            );
        }
        for note in &result.notes {
            let (lo, hi) = fugue_voice_range(note.voice, 4);
            assert!(
                (lo..=hi).contains(&note.pitch),
                "voice {} pitch {} outside [{lo}, {hi}]",
                note.voice,
                note.pitch
            );
            assert!(note.start_tick >= 1920);
        }
    }

    #[test]
    fn test_within_voice_overlap_after_finalize() {
        let pool = pool();
        let request = EpisodeRequest::new(
            &pool,
            Key::C,
            Key::G,
            0,
            4 * TICKS_PER_BAR,
            3,
            SubjectCharacter::Restless,
            13,
        );
        let mut notes = generate_episode(&request).notes;
        dedupe_voice_overlaps(&mut notes);
        for voice in 0..3u8 {
            let voice_notes: Vec<&NoteEvent> =
                notes.iter().filter(|n| n.voice == voice).collect();
            for pair in voice_notes.windows(2) {
                assert!(pair[0].start_tick < pair[1].start_tick);
                assert!(pair[0].end_tick() <= pair[1].start_tick);
            }
        }
    }

    #[test]
    fn test_exit_state_chains_into_next_episode() {
        let pool = pool();
        let first = generate_episode(&EpisodeRequest::new(
            &pool,
            Key::C,
            Key::G,
            0,
            4 * TICKS_PER_BAR,
            2,
            SubjectCharacter::Severe,
            42,
        ));
        assert!(first.success);
        let placed = first.exit_state.total_note_count;
        assert!(placed > 0);

        let mut second_request = EpisodeRequest::new(
            &pool,
            Key::G,
            Key::C,
            4 * TICKS_PER_BAR,
            4 * TICKS_PER_BAR,
            2,
            SubjectCharacter::Severe,
            43,
        );
        second_request.entry_state = Some(first.exit_state);
        second_request.episode_index = 1;
        let second = generate_episode(&second_request);
        assert!(second.success);
        // Counts carry across the chain.
        assert!(second.exit_state.total_note_count > placed);
    }

    #[test]
    fn test_consonance_at_bar_boundaries() {
        // Across 20 seeds, dissonant pairs sounding at bar boundaries of a
        // 4-bar 3-voice raw episode stay rare.
        let pool = pool();
        let mut total_pairs = 0u32;
        let mut dissonant_pairs = 0u32;
        for seed in 1..=20u32 {
            let request = EpisodeRequest::new(
                &pool,
                Key::C,
                Key::C,
                0,
                4 * TICKS_PER_BAR,
                3,
                SubjectCharacter::Severe,
                seed,
            );
            let result = generate_episode(&request);
            for bar in 0..4u32 {
                let tick = bar * TICKS_PER_BAR;
                let snap = VerticalSnapshot::from_notes(&result.notes, tick, 3);
                let sounding: Vec<u8> = snap.sounding().map(|(_, p)| p).collect();
                for i in 0..sounding.len() {
                    for j in (i + 1)..sounding.len() {
                        total_pairs += 1;
                        if crate::counterpoint::is_dissonant(sounding[i], sounding[j]) {
                            dissonant_pairs += 1;
                        }
                    }
                }
            }
        }
        assert!(total_pairs > 0);
        let per_episode = dissonant_pairs as f32 / 20.0;
        assert!(per_episode < 1.5, "{per_episode} dissonant pairs per episode");
    }

    #[test]
    fn test_even_index_no_swap_and_inner_voices_stable() {
        let pool = pool();
        let mut request = EpisodeRequest::new(
            &pool,
            Key::C,
            Key::C,
            0,
            4 * TICKS_PER_BAR,
            4,
            SubjectCharacter::Severe,
            42,
        );
        request.episode_index = 2;
        let even = generate_episode(&request);

        let mut odd_request = EpisodeRequest::new(
            &pool,
            Key::C,
            Key::C,
            0,
            4 * TICKS_PER_BAR,
            4,
            SubjectCharacter::Severe,
            42,
        );
        odd_request.episode_index = 1;
        let odd = generate_episode(&odd_request);

        // Voices 2+ are identical between runs; only 0/1 swap.
        let pitches = |r: &EpisodeResult, v: u8| -> Vec<(Tick, u8)> {
            r.notes
                .iter()
                .filter(|n| n.voice == v)
                .map(|n| (n.start_tick, n.pitch))
                .collect()
        };
        assert_eq!(pitches(&even, 2), pitches(&odd, 2));
        assert_eq!(pitches(&even, 3), pitches(&odd, 3));
        assert_eq!(pitches(&even, 0), pitches(&odd, 1));
    }

    #[test]
    fn test_invertible_flag_disables_swap() {
        let pool = pool();
        let mut request = EpisodeRequest::new(
            &pool,
            Key::C,
            Key::C,
            0,
            4 * TICKS_PER_BAR,
            2,
            SubjectCharacter::Severe,
            42,
        );
        request.episode_index = 1;
        request.invertible = false;
        let plain = generate_episode(&request);

        let mut base_request = EpisodeRequest::new(
            &pool,
            Key::C,
            Key::C,
            0,
            4 * TICKS_PER_BAR,
            2,
            SubjectCharacter::Severe,
            42,
        );
        base_request.episode_index = 1;
        let swapped = generate_episode(&base_request);

        let voice0 = |r: &EpisodeResult| -> Vec<u8> {
            r.notes
                .iter()
                .filter(|n| n.voice == 0)
                .map(|n| n.pitch)
                .collect()
        };
        // With the flag off, voice 0 keeps the lead material that the
        // swapped run reassigned to voice 1.
        let swapped_voice1: Vec<u8> = swapped
            .notes
            .iter()
            .filter(|n| n.voice == 1)
            .map(|n| n.pitch)
            .collect();
        assert_eq!(voice0(&plain), swapped_voice1);
    }

    #[test]
    fn test_helpers() {
        assert_eq!(min_duration_for_energy(0.0), TICKS_PER_BEAT);
        assert_eq!(min_duration_for_energy(1.0), SIXTEENTH);
        assert_eq!(apply_modulation_shift(60, 0.4, 7), 60);
        assert_eq!(apply_modulation_shift(60, 1.0, 7), 67);
        assert_eq!(apply_modulation_shift(60, 0.75, 4), 62);

        assert_eq!(resting_voice(3, 0), None);
        assert_eq!(resting_voice(4, 0), Some(2));
        assert_eq!(resting_voice(4, 5), Some(2));
        assert_eq!(resting_voice(5, 0), Some(2));
        assert_eq!(resting_voice(5, 1), Some(3));
    }

    #[test]
    fn test_pedal_pitch_influences_choice() {
        // The pedal-consonance bonus is deterministic given the request, so
        // two runs differing only in pedal pitch may differ; both succeed.
        let pool = pool();
        let mut request = EpisodeRequest::new(
            &pool,
            Key::C,
            Key::C,
            0,
            4 * TICKS_PER_BAR,
            2,
            SubjectCharacter::Severe,
            42,
        );
        request.pedal_pitch = 36;
        let with_pedal = generate_episode(&request);
        assert!(with_pedal.success);
        assert!(!with_pedal.notes.is_empty());
    }
}
