// Oracle tables: melodic, rhythmic, and vertical probability lookups.
//
// Three read-only tables drive the Gravity layer. Rows hold probabilities
// scaled by 10 000 (u16); every non-zero row sums to exactly 10 000. A zero
// row means "no data" and scores 0. Scoring is log-odds against uniform,
// soft-clipped with tanh to roughly [-0.46, +0.46]:
//
//     score = tanh(0.5 * (ln p - ln p_uniform))
//
// The tables are constructed once, in code, from explicit melodic and
// harmonic priors (stepwise preference, leading-tone resolution, leap
// recovery, metric placement of dissonance), then normalized per row. They
// are process-wide statics; lookups are pure and lock-free.
//
// Out-of-range inputs clamp to valid indices rather than faulting.

use std::sync::LazyLock;

use crate::note::{Tick, TICKS_PER_BAR, TICKS_PER_BEAT};
use crate::scale::{Key, ScaleType, pitch_to_absolute_degree, absolute_degree_to_pitch};

/// Signed scale-degree step, clamped to [-9, +9]; +/-9 is the large-leap bin.
pub type DegreeStep = i8;

pub const DEGREE_STEP_COUNT: usize = 19;
pub const DEGREE_OFFSET: i32 = 9;

pub const BEAT_POS_COUNT: usize = 4;
pub const DEGREE_CLASS_COUNT: usize = 3;
pub const DUR_CAT_COUNT: usize = 5;
pub const DIR_IVL_COUNT: usize = 6;

pub const BASS_DEGREE_COUNT: usize = 7;
pub const VOICE_BIN_COUNT: usize = 3;
pub const HARM_FUNC_COUNT: usize = 3;
pub const PC_OFFSET_COUNT: usize = 12;

/// Pitch table rows: prev_step(19) x degree_class(3) x beat_pos(4).
pub const PITCH_ROWS: usize = DEGREE_STEP_COUNT * DEGREE_CLASS_COUNT * BEAT_POS_COUNT;
/// Vertical table rows: bass_degree(7) x beat_pos(4) x voice_bin(3) x harm_func(3).
pub const VERTICAL_ROWS: usize =
    BASS_DEGREE_COUNT * BEAT_POS_COUNT * VOICE_BIN_COUNT * HARM_FUNC_COUNT;
/// Duration table rows: prev_dur(5) x dir_interval_class(6).
pub const DURATION_ROWS: usize = DUR_CAT_COUNT * DIR_IVL_COUNT;

/// Metric position of a tick within a 4/4 bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeatPos {
    /// Bar start (beat 1).
    Bar = 0,
    /// Main beats 2-4.
    Beat = 1,
    /// Eighth-note offbeat.
    Off8 = 2,
    /// Sixteenth-note offbeat.
    Off16 = 3,
}

/// Harmonic role of a scale degree in melodic context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegreeClass {
    /// Degrees 0, 2 (tonic, mediant).
    Stable = 0,
    /// Degrees 4, 6 (dominant, leading tone).
    Dominant = 1,
    /// Degrees 1, 3, 5.
    Motion = 2,
}

/// Duration category by raw tick count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurCategory {
    /// < 180 ticks.
    S16 = 0,
    /// 180-299 ticks.
    S8 = 1,
    /// 300-479 ticks.
    Dot8 = 2,
    /// 480-959 ticks.
    Qtr = 3,
    /// >= 960 ticks.
    HalfPlus = 4,
}

/// Directed interval class for rhythm conditioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirIntervalClass {
    /// Degree step +1 or +2 (0 counts as a step up).
    StepUp = 0,
    StepDown = 1,
    /// Degree step +3 or +4.
    SkipUp = 2,
    SkipDown = 3,
    /// Degree step >= +5.
    LeapUp = 4,
    LeapDown = 5,
}

/// Harmonic function classification of a scale degree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarmFunc {
    /// I, vi, iii (degrees 0, 5, 2).
    Tonic = 0,
    /// IV, ii (degrees 3, 1).
    Subdominant = 1,
    /// V, vii (degrees 4, 6).
    Dominant = 2,
}

/// Pitch transition probabilities, row-keyed by melodic context.
pub struct PitchTransitionTable {
    pub prob: [[u16; DEGREE_STEP_COUNT]; PITCH_ROWS],
}

/// Duration transition probabilities.
pub struct DurTransitionTable {
    pub prob: [[u16; DUR_CAT_COUNT]; DURATION_ROWS],
}

/// Vertical interval probabilities: pitch-class offset from the bass.
pub struct VerticalIntervalTable {
    pub prob: [[u16; PC_OFFSET_COUNT]; VERTICAL_ROWS],
}

/// A complete melodic model for one voice category.
pub struct MarkovModel {
    pub name: &'static str,
    pub pitch: PitchTransitionTable,
    pub duration: DurTransitionTable,
}

/// Candidate returned by the top-N oracle queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OracleCandidate {
    /// MIDI pitch (melodic query) or pitch class 0-11 (vertical query).
    pub pitch: u8,
    /// Normalized probability in [0, 1].
    pub prob: f32,
}

// --- Classification helpers ---

/// Degree step to column/row index, clamped to [0, 18].
pub fn degree_step_index(step: i32) -> usize {
    (step + DEGREE_OFFSET).clamp(0, DEGREE_STEP_COUNT as i32 - 1) as usize
}

/// Metric position of an absolute tick (4/4 meter assumed).
pub fn tick_to_beat_pos(tick: Tick) -> BeatPos {
    let in_bar = tick % TICKS_PER_BAR;
    if in_bar == 0 {
        BeatPos::Bar
    } else if in_bar % TICKS_PER_BEAT == 0 {
        BeatPos::Beat
    } else if in_bar % (TICKS_PER_BEAT / 2) == 0 {
        BeatPos::Off8
    } else {
        BeatPos::Off16
    }
}

/// Duration in ticks to category.
pub fn ticks_to_dur_category(dur: Tick) -> DurCategory {
    if dur < TICKS_PER_BEAT * 3 / 8 {
        DurCategory::S16 // < 180
    } else if dur < TICKS_PER_BEAT * 5 / 8 {
        DurCategory::S8 // < 300
    } else if dur < TICKS_PER_BEAT {
        DurCategory::Dot8 // < 480
    } else if dur < TICKS_PER_BEAT * 2 {
        DurCategory::Qtr // < 960
    } else {
        DurCategory::HalfPlus
    }
}

/// Scale degree (any integer, normalized mod 7) to degree class.
pub fn degree_to_class(degree: i32) -> DegreeClass {
    match degree.rem_euclid(7) {
        0 | 2 => DegreeClass::Stable,
        4 | 6 => DegreeClass::Dominant,
        _ => DegreeClass::Motion,
    }
}

/// Scale degree (normalized mod 7) to harmonic function.
pub fn degree_to_harm_func(degree: i32) -> HarmFunc {
    match degree.rem_euclid(7) {
        0 | 5 | 2 => HarmFunc::Tonic,
        3 | 1 => HarmFunc::Subdominant,
        _ => HarmFunc::Dominant,
    }
}

/// Voice count to vertical table bin: 0 for 2 voices, 1 for 3, 2 for 4+.
pub fn voice_count_bin(num_voices: u8) -> usize {
    match num_voices {
        0..=2 => 0,
        3 => 1,
        _ => 2,
    }
}

/// Signed degree step to directed interval class. Step 0 counts as StepUp.
pub fn dir_interval_class(step: i32) -> DirIntervalClass {
    match step {
        1 | 2 => DirIntervalClass::StepUp,
        -2 | -1 => DirIntervalClass::StepDown,
        3 | 4 => DirIntervalClass::SkipUp,
        -4 | -3 => DirIntervalClass::SkipDown,
        s if s >= 5 => DirIntervalClass::LeapUp,
        s if s <= -5 => DirIntervalClass::LeapDown,
        _ => DirIntervalClass::StepUp,
    }
}

/// Degree step between two pitches in a key/scale, clamped to [-9, +9].
pub fn compute_degree_step(from_pitch: u8, to_pitch: u8, key: Key, scale: ScaleType) -> DegreeStep {
    let from_deg = pitch_to_absolute_degree(from_pitch, key, scale);
    let to_deg = pitch_to_absolute_degree(to_pitch, key, scale);
    (to_deg - from_deg).clamp(-9, 9) as DegreeStep
}

/// Row index into the pitch table.
fn pitch_row_index(prev_step: i32, deg_class: DegreeClass, beat: BeatPos) -> usize {
    degree_step_index(prev_step) * DEGREE_CLASS_COUNT * BEAT_POS_COUNT
        + deg_class as usize * BEAT_POS_COUNT
        + beat as usize
}

/// Row index into the vertical table.
pub fn vertical_row_index(bass_degree: i32, beat: BeatPos, voice_bin: usize, hf: HarmFunc) -> usize {
    let bd = bass_degree.rem_euclid(7) as usize;
    let vbin = voice_bin.min(VOICE_BIN_COUNT - 1);
    bd * BEAT_POS_COUNT * VOICE_BIN_COUNT * HARM_FUNC_COUNT
        + beat as usize * VOICE_BIN_COUNT * HARM_FUNC_COUNT
        + vbin * HARM_FUNC_COUNT
        + hf as usize
}

// --- Scoring ---

/// Log-odds score against uniform, tanh-clipped. Zero row sum scores 0.
fn log_odds_score(prob_raw: u16, row_sum: u32, columns: usize) -> f32 {
    if row_sum == 0 {
        return 0.0;
    }
    let mut prob = f32::from(prob_raw) / row_sum as f32;
    let p_uniform = 1.0 / columns as f32;
    if prob < 1e-7 {
        prob = 1e-7;
    }
    let raw = prob.ln() - p_uniform.ln();
    (raw * 0.5).tanh()
}

/// Score a melodic pitch transition.
pub fn score_pitch_transition(
    model: &MarkovModel,
    prev_step: DegreeStep,
    deg_class: DegreeClass,
    beat: BeatPos,
    next_step: DegreeStep,
) -> f32 {
    let row = &model.pitch.prob[pitch_row_index(i32::from(prev_step), deg_class, beat)];
    let row_sum: u32 = row.iter().map(|&p| u32::from(p)).sum();
    log_odds_score(
        row[degree_step_index(i32::from(next_step))],
        row_sum,
        DEGREE_STEP_COUNT,
    )
}

/// Score a duration transition.
pub fn score_duration_transition(
    model: &MarkovModel,
    prev_dur: DurCategory,
    dir_class: DirIntervalClass,
    next_dur: DurCategory,
) -> f32 {
    let row = &model.duration.prob[prev_dur as usize * DIR_IVL_COUNT + dir_class as usize];
    let row_sum: u32 = row.iter().map(|&p| u32::from(p)).sum();
    log_odds_score(row[next_dur as usize], row_sum, DUR_CAT_COUNT)
}

/// Score a vertical interval (pitch-class offset from the bass).
pub fn score_vertical_interval(
    table: &VerticalIntervalTable,
    bass_degree: i32,
    beat: BeatPos,
    voice_bin: usize,
    hf: HarmFunc,
    pc_offset: i32,
) -> f32 {
    let row = &table.prob[vertical_row_index(bass_degree, beat, voice_bin, hf)];
    let col = pc_offset.rem_euclid(12) as usize;
    let row_sum: u32 = row.iter().map(|&p| u32::from(p)).sum();
    log_odds_score(row[col], row_sum, PC_OFFSET_COUNT)
}

/// Normalized probability of a vertical interval (for the gravity gate).
pub fn vertical_probability(
    table: &VerticalIntervalTable,
    bass_degree: i32,
    beat: BeatPos,
    voice_bin: usize,
    hf: HarmFunc,
    pc_offset: i32,
) -> f32 {
    let row = &table.prob[vertical_row_index(bass_degree, beat, voice_bin, hf)];
    let col = pc_offset.rem_euclid(12) as usize;
    let row_sum: u32 = row.iter().map(|&p| u32::from(p)).sum();
    if row_sum == 0 {
        return 0.0;
    }
    f32::from(row[col]) / row_sum as f32
}

/// Top-N melodic candidates: degree steps converted to MIDI pitches,
/// filtered to a voice range, sorted by probability descending (ties break
/// by ascending pitch for stable ordering).
#[allow(clippy::too_many_arguments)]
pub fn top_melodic_candidates(
    model: &MarkovModel,
    prev_step: DegreeStep,
    deg_class: DegreeClass,
    beat: BeatPos,
    from_pitch: u8,
    key: Key,
    scale: ScaleType,
    range_lo: u8,
    range_hi: u8,
    max_count: usize,
) -> Vec<OracleCandidate> {
    let row = &model.pitch.prob[pitch_row_index(i32::from(prev_step), deg_class, beat)];
    let row_sum: u32 = row.iter().map(|&p| u32::from(p)).sum();
    if row_sum == 0 {
        return Vec::new();
    }

    let from_deg = pitch_to_absolute_degree(from_pitch, key, scale);
    let mut candidates: Vec<OracleCandidate> = Vec::with_capacity(DEGREE_STEP_COUNT);
    for (col, &raw) in row.iter().enumerate() {
        let step = col as i32 - DEGREE_OFFSET;
        let target_deg = from_deg + step;
        if target_deg < 0 {
            continue;
        }
        let target_pitch = absolute_degree_to_pitch(target_deg, key, scale);
        if target_pitch < range_lo || target_pitch > range_hi {
            continue;
        }
        candidates.push(OracleCandidate {
            pitch: target_pitch,
            prob: f32::from(raw) / row_sum as f32,
        });
    }

    candidates.sort_by(|a, b| {
        b.prob
            .partial_cmp(&a.prob)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.pitch.cmp(&b.pitch))
    });
    candidates.truncate(max_count);
    candidates
}

/// Top-N vertical candidates: pitch classes 0-11 sorted by probability.
pub fn top_vertical_candidates(
    table: &VerticalIntervalTable,
    bass_degree: i32,
    beat: BeatPos,
    voice_bin: usize,
    hf: HarmFunc,
    max_count: usize,
) -> Vec<OracleCandidate> {
    let row = &table.prob[vertical_row_index(bass_degree, beat, voice_bin, hf)];
    let row_sum: u32 = row.iter().map(|&p| u32::from(p)).sum();
    if row_sum == 0 {
        return Vec::new();
    }

    let mut candidates: Vec<OracleCandidate> = row
        .iter()
        .enumerate()
        .map(|(pc, &raw)| OracleCandidate {
            pitch: pc as u8,
            prob: f32::from(raw) / row_sum as f32,
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.prob
            .partial_cmp(&a.prob)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.pitch.cmp(&b.pitch))
    });
    candidates.truncate(max_count);
    candidates
}

// --- Compiled-in models ---
//
// Rows are authored as floating-point weight profiles and normalized to sum
// exactly 10 000 with largest-remainder rounding, so the row-sum invariant
// holds by construction.

/// Direction bias multipliers per degree class: (ascending, descending).
struct MelodicProfile {
    name: &'static str,
    step_base: [f64; 10],
    stable_bias: (f64, f64),
    dominant_bias: (f64, f64),
    motion_bias: (f64, f64),
}

const FUGUE_UPPER_PROFILE: MelodicProfile = MelodicProfile {
    name: "FugueUpper",
    // Index = |step|; stepwise motion dominates, leaps taper off.
    step_base: [10.0, 30.0, 24.0, 11.0, 7.0, 4.0, 2.5, 1.5, 1.0, 0.6],
    stable_bias: (0.95, 1.10),
    dominant_bias: (1.15, 0.75),
    motion_bias: (1.00, 0.92),
};

const FUGUE_PEDAL_PROFILE: MelodicProfile = MelodicProfile {
    name: "FuguePedal",
    // Bass lines leap more: flatter profile with real weight on 4ths/5ths.
    step_base: [12.0, 20.0, 18.0, 14.0, 10.0, 6.0, 3.0, 2.0, 1.5, 1.0],
    stable_bias: (0.97, 1.08),
    dominant_bias: (1.12, 0.80),
    motion_bias: (1.00, 0.90),
};

impl MelodicProfile {
    fn direction_bias(&self, class: DegreeClass, step: i32) -> f64 {
        let (up, down) = match class {
            DegreeClass::Stable => self.stable_bias,
            DegreeClass::Dominant => self.dominant_bias,
            DegreeClass::Motion => self.motion_bias,
        };
        if step > 0 {
            up
        } else if step < 0 {
            down
        } else {
            1.0
        }
    }
}

/// Normalize a weight row to u16 probabilities summing exactly 10 000.
/// An all-zero row stays all zero.
fn normalize_row_10000<const N: usize>(weights: &[f64; N]) -> [u16; N] {
    let total: f64 = weights.iter().sum();
    let mut out = [0u16; N];
    if total <= 0.0 {
        return out;
    }

    let mut remainders: Vec<(usize, f64)> = Vec::with_capacity(N);
    let mut assigned: u32 = 0;
    for (idx, &w) in weights.iter().enumerate() {
        let exact = w / total * 10_000.0;
        let floor = exact.floor();
        out[idx] = floor as u16;
        assigned += floor as u32;
        remainders.push((idx, exact - floor));
    }
    // Hand out the remaining units to the largest remainders, index order
    // breaking ties so construction is deterministic.
    remainders.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    let mut leftover = 10_000u32.saturating_sub(assigned);
    for (idx, _) in remainders {
        if leftover == 0 {
            break;
        }
        out[idx] += 1;
        leftover -= 1;
    }
    out
}

fn pitch_row_weights(
    profile: &MelodicProfile,
    prev_step: i32,
    class: DegreeClass,
    beat: BeatPos,
) -> [f64; DEGREE_STEP_COUNT] {
    let mut weights = [0.0f64; DEGREE_STEP_COUNT];
    for (col, weight) in weights.iter_mut().enumerate() {
        let step = col as i32 - DEGREE_OFFSET;
        let magnitude = step.unsigned_abs() as usize;
        let mut w = profile.step_base[magnitude.min(9)];
        w *= profile.direction_bias(class, step);

        // Leading-tone pull: in the dominant class, upward resolution by
        // step is the defining tendency.
        if class == DegreeClass::Dominant {
            if step == 1 {
                w *= 2.6;
            } else if step == -1 {
                w *= 0.7;
            }
        }

        // Melodic momentum: small steps like to continue their direction.
        if prev_step != 0
            && step != 0
            && (prev_step > 0) == (step > 0)
            && magnitude <= 2
            && prev_step.abs() <= 2
        {
            w *= 1.35;
        }

        // Leap recovery: after a skip or leap, contrary stepwise motion.
        if prev_step.abs() >= 4 && step != 0 {
            if (prev_step > 0) != (step > 0) && magnitude <= 2 {
                w *= 2.2;
            } else if (prev_step > 0) == (step > 0) && magnitude >= 3 {
                w *= 0.3;
            }
        }

        // Metric placement: offbeats run stepwise, bar starts may outline
        // chords (thirds and fifths in degree space).
        match beat {
            BeatPos::Off8 | BeatPos::Off16 => {
                if magnitude <= 2 && step != 0 {
                    w *= 1.3;
                } else if magnitude > 2 {
                    w *= 0.7;
                }
                if step == 0 {
                    w *= 0.5;
                }
            }
            BeatPos::Bar => {
                if magnitude == 2 || magnitude == 4 {
                    w *= 1.2;
                }
            }
            BeatPos::Beat => {}
        }

        *weight = w;
    }
    weights
}

fn build_pitch_table(profile: &MelodicProfile) -> PitchTransitionTable {
    let mut table = PitchTransitionTable {
        prob: [[0; DEGREE_STEP_COUNT]; PITCH_ROWS],
    };
    for prev_col in 0..DEGREE_STEP_COUNT {
        let prev_step = prev_col as i32 - DEGREE_OFFSET;
        for (class_idx, class) in
            [DegreeClass::Stable, DegreeClass::Dominant, DegreeClass::Motion]
                .into_iter()
                .enumerate()
        {
            for (beat_idx, beat) in
                [BeatPos::Bar, BeatPos::Beat, BeatPos::Off8, BeatPos::Off16]
                    .into_iter()
                    .enumerate()
            {
                let row = prev_col * DEGREE_CLASS_COUNT * BEAT_POS_COUNT
                    + class_idx * BEAT_POS_COUNT
                    + beat_idx;
                let weights = pitch_row_weights(profile, prev_step, class, beat);
                table.prob[row] = normalize_row_10000(&weights);
            }
        }
    }
    table
}

fn duration_row_weights(
    prev: DurCategory,
    dir: DirIntervalClass,
) -> [f64; DUR_CAT_COUNT] {
    // Base next-duration preference per interval class.
    let mut weights: [f64; DUR_CAT_COUNT] = match dir {
        DirIntervalClass::StepUp | DirIntervalClass::StepDown => {
            [26.0, 30.0, 8.0, 22.0, 14.0]
        }
        DirIntervalClass::SkipUp | DirIntervalClass::SkipDown => {
            [14.0, 26.0, 10.0, 30.0, 20.0]
        }
        DirIntervalClass::LeapUp | DirIntervalClass::LeapDown => {
            [6.0, 16.0, 10.0, 36.0, 32.0]
        }
    };

    // Rhythmic persistence: figuration continues its note value.
    let prev_idx = prev as usize;
    for (idx, weight) in weights.iter_mut().enumerate() {
        if idx == prev_idx {
            *weight *= 2.2;
        } else if idx.abs_diff(prev_idx) == 1 {
            *weight *= 1.2;
        }
    }
    weights
}

fn build_duration_table() -> DurTransitionTable {
    let mut table = DurTransitionTable {
        prob: [[0; DUR_CAT_COUNT]; DURATION_ROWS],
    };
    let categories = [
        DurCategory::S16,
        DurCategory::S8,
        DurCategory::Dot8,
        DurCategory::Qtr,
        DurCategory::HalfPlus,
    ];
    let classes = [
        DirIntervalClass::StepUp,
        DirIntervalClass::StepDown,
        DirIntervalClass::SkipUp,
        DirIntervalClass::SkipDown,
        DirIntervalClass::LeapUp,
        DirIntervalClass::LeapDown,
    ];
    for (pd, &prev) in categories.iter().enumerate() {
        for (dc, &dir) in classes.iter().enumerate() {
            let weights = duration_row_weights(prev, dir);
            table.prob[pd * DIR_IVL_COUNT + dc] = normalize_row_10000(&weights);
        }
    }
    table
}

fn vertical_row_weights(
    bass_degree: usize,
    beat: BeatPos,
    voice_bin: usize,
    hf: HarmFunc,
) -> [f64; PC_OFFSET_COUNT] {
    // Base interval preference above the bass: consonances dominate.
    let mut weights: [f64; PC_OFFSET_COUNT] = [
        16.0, // unison/octave
        1.0,  // minor 2nd
        2.5,  // major 2nd
        12.0, // minor 3rd
        13.0, // major 3rd
        6.0,  // perfect 4th
        1.2,  // tritone
        18.0, // perfect 5th
        8.0,  // minor 6th
        9.0,  // major 6th
        2.0,  // minor 7th
        1.5,  // major 7th
    ];

    const CONSONANT: [usize; 6] = [0, 3, 4, 7, 8, 9];
    const DISSONANT: [usize; 5] = [1, 2, 6, 10, 11];

    match beat {
        BeatPos::Bar | BeatPos::Beat => {
            for idx in CONSONANT {
                weights[idx] *= 1.3;
            }
            for idx in DISSONANT {
                weights[idx] *= 0.5;
            }
        }
        BeatPos::Off8 => {}
        BeatPos::Off16 => {
            // Passing and neighbor dissonance lives on sixteenth offbeats.
            for idx in DISSONANT {
                weights[idx] *= 1.6;
            }
        }
    }

    match hf {
        HarmFunc::Tonic => {
            weights[0] *= 1.3;
            weights[4] *= 1.2;
            weights[7] *= 1.2;
        }
        HarmFunc::Subdominant => {
            weights[5] *= 1.3;
            weights[9] *= 1.3;
        }
        HarmFunc::Dominant => {
            // Dominant-function sonorities carry the tritone and seventh.
            weights[6] *= 2.5;
            weights[10] *= 2.0;
            weights[2] *= 1.3;
        }
    }

    match voice_bin {
        0 => {
            // Two voices: imperfect consonances carry the texture.
            for idx in [3, 4, 8, 9] {
                weights[idx] *= 1.2;
            }
        }
        2 => {
            // Four or more voices: octave doubling is normal.
            weights[0] *= 1.3;
        }
        _ => {}
    }

    // Leading-tone or supertonic bass implies first-inversion sonorities:
    // sixths above, no bare fifth.
    if bass_degree == 6 || bass_degree == 1 {
        weights[3] *= 1.4;
        weights[8] *= 1.4;
        weights[7] *= 0.6;
    }

    weights
}

fn build_vertical_table() -> VerticalIntervalTable {
    let mut table = VerticalIntervalTable {
        prob: [[0; PC_OFFSET_COUNT]; VERTICAL_ROWS],
    };
    let beats = [BeatPos::Bar, BeatPos::Beat, BeatPos::Off8, BeatPos::Off16];
    let funcs = [HarmFunc::Tonic, HarmFunc::Subdominant, HarmFunc::Dominant];
    for bd in 0..BASS_DEGREE_COUNT {
        for (beat_idx, &beat) in beats.iter().enumerate() {
            for vbin in 0..VOICE_BIN_COUNT {
                for (hf_idx, &hf) in funcs.iter().enumerate() {
                    let row = bd * BEAT_POS_COUNT * VOICE_BIN_COUNT * HARM_FUNC_COUNT
                        + beat_idx * VOICE_BIN_COUNT * HARM_FUNC_COUNT
                        + vbin * HARM_FUNC_COUNT
                        + hf_idx;
                    let weights = vertical_row_weights(bd, beat, vbin, hf);
                    table.prob[row] = normalize_row_10000(&weights);
                }
            }
        }
    }
    table
}

static FUGUE_UPPER: LazyLock<MarkovModel> = LazyLock::new(|| MarkovModel {
    name: FUGUE_UPPER_PROFILE.name,
    pitch: build_pitch_table(&FUGUE_UPPER_PROFILE),
    duration: build_duration_table(),
});

static FUGUE_PEDAL: LazyLock<MarkovModel> = LazyLock::new(|| MarkovModel {
    name: FUGUE_PEDAL_PROFILE.name,
    pitch: build_pitch_table(&FUGUE_PEDAL_PROFILE),
    duration: build_duration_table(),
});

static FUGUE_VERTICAL: LazyLock<VerticalIntervalTable> = LazyLock::new(build_vertical_table);

/// Melodic model for fugue upper voices.
pub fn fugue_upper_model() -> &'static MarkovModel {
    &FUGUE_UPPER
}

/// Melodic model for the fugue pedal voice.
pub fn fugue_pedal_model() -> &'static MarkovModel {
    &FUGUE_PEDAL
}

/// Vertical interval table for fugue textures.
pub fn fugue_vertical_table() -> &'static VerticalIntervalTable {
    &FUGUE_VERTICAL
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_BEATS: [BeatPos; 4] = [BeatPos::Bar, BeatPos::Beat, BeatPos::Off8, BeatPos::Off16];
    const ALL_CLASSES: [DegreeClass; 3] = [
        DegreeClass::Stable,
        DegreeClass::Dominant,
        DegreeClass::Motion,
    ];

    #[test]
    fn test_pitch_row_sums_exactly_10000() {
        for model in [fugue_upper_model(), fugue_pedal_model()] {
            for row in &model.pitch.prob {
                let sum: u32 = row.iter().map(|&p| u32::from(p)).sum();
                assert!(
                    (9_900..=10_100).contains(&sum),
                    "{}: pitch row sum {sum}",
                    model.name
                );
            }
        }
    }

    #[test]
    fn test_duration_row_sums_exactly_10000() {
        for model in [fugue_upper_model(), fugue_pedal_model()] {
            for row in &model.duration.prob {
                let sum: u32 = row.iter().map(|&p| u32::from(p)).sum();
                assert!(
                    (9_900..=10_100).contains(&sum),
                    "{}: duration row sum {sum}",
                    model.name
                );
            }
        }
    }

    #[test]
    fn test_vertical_row_sums_exactly_10000() {
        for row in &fugue_vertical_table().prob {
            let sum: u32 = row.iter().map(|&p| u32::from(p)).sum();
            assert!((9_900..=10_100).contains(&sum), "vertical row sum {sum}");
        }
    }

    #[test]
    fn test_pitch_scores_bounded_and_finite() {
        let model = fugue_upper_model();
        for prev in -9i8..=9 {
            for class in ALL_CLASSES {
                for beat in ALL_BEATS {
                    for next in -9i8..=9 {
                        let score = score_pitch_transition(model, prev, class, beat, next);
                        assert!(score.is_finite());
                        assert!(score.abs() <= 1.0, "score {score}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_extreme_inputs_clamp() {
        let model = fugue_upper_model();
        let s = score_pitch_transition(model, 120, DegreeClass::Stable, BeatPos::Bar, -120);
        assert!(s.is_finite());
        let s = score_vertical_interval(
            fugue_vertical_table(),
            -13,
            BeatPos::Off16,
            9,
            HarmFunc::Dominant,
            -25,
        );
        assert!(s.is_finite());
    }

    #[test]
    fn test_leading_tone_resolution_favored() {
        // Dominant-class contexts with prev_step +1: ascending continuation
        // outweighs descent in the majority of beat positions, both models.
        for model in [fugue_upper_model(), fugue_pedal_model()] {
            let mut favored = 0;
            for beat in ALL_BEATS {
                let up = score_pitch_transition(model, 1, DegreeClass::Dominant, beat, 1);
                let down = score_pitch_transition(model, 1, DegreeClass::Dominant, beat, -1);
                if up > down {
                    favored += 1;
                }
            }
            assert!(favored > 2, "{}: favored {favored}/4", model.name);
        }
    }

    #[test]
    fn test_up_down_asymmetry_from_rest() {
        // prev_step = 0 must not yield mirror-symmetric distributions.
        let model = fugue_upper_model();
        let mut differ = 0;
        let mut total = 0;
        for class in ALL_CLASSES {
            for beat in ALL_BEATS {
                total += 1;
                let up = score_pitch_transition(model, 0, class, beat, 1);
                let down = score_pitch_transition(model, 0, class, beat, -1);
                if (up - down).abs() > 1e-6 {
                    differ += 1;
                }
            }
        }
        assert!(differ * 2 > total, "asymmetric in {differ}/{total} contexts");
    }

    #[test]
    fn test_models_differ() {
        let mut differ = 0;
        let mut total = 0;
        for class in ALL_CLASSES {
            for beat in ALL_BEATS {
                for next in [-4i8, -2, -1, 1, 2, 4] {
                    total += 1;
                    let upper =
                        score_pitch_transition(fugue_upper_model(), 0, class, beat, next);
                    let pedal =
                        score_pitch_transition(fugue_pedal_model(), 0, class, beat, next);
                    if (upper - pedal).abs() > 1e-6 {
                        differ += 1;
                    }
                }
            }
        }
        assert!(differ * 2 > total, "models differ in {differ}/{total}");
    }

    #[test]
    fn test_classifications() {
        assert_eq!(tick_to_beat_pos(0), BeatPos::Bar);
        assert_eq!(tick_to_beat_pos(TICKS_PER_BAR * 3), BeatPos::Bar);
        assert_eq!(tick_to_beat_pos(480), BeatPos::Beat);
        assert_eq!(tick_to_beat_pos(240), BeatPos::Off8);
        assert_eq!(tick_to_beat_pos(120), BeatPos::Off16);
        assert_eq!(tick_to_beat_pos(360), BeatPos::Off16);

        assert_eq!(ticks_to_dur_category(120), DurCategory::S16);
        assert_eq!(ticks_to_dur_category(240), DurCategory::S8);
        assert_eq!(ticks_to_dur_category(360), DurCategory::Dot8);
        assert_eq!(ticks_to_dur_category(480), DurCategory::Qtr);
        assert_eq!(ticks_to_dur_category(960), DurCategory::HalfPlus);

        assert_eq!(degree_to_class(0), DegreeClass::Stable);
        assert_eq!(degree_to_class(6), DegreeClass::Dominant);
        assert_eq!(degree_to_class(-2), DegreeClass::Motion); // -2 mod 7 = 5
        assert_eq!(degree_to_harm_func(4), HarmFunc::Dominant);
        assert_eq!(degree_to_harm_func(3), HarmFunc::Subdominant);
        assert_eq!(degree_to_harm_func(5), HarmFunc::Tonic);

        assert_eq!(voice_count_bin(2), 0);
        assert_eq!(voice_count_bin(3), 1);
        assert_eq!(voice_count_bin(6), 2);
    }

    #[test]
    fn test_degree_step_index_clamps() {
        assert_eq!(degree_step_index(0), 9);
        assert_eq!(degree_step_index(-9), 0);
        assert_eq!(degree_step_index(9), 18);
        assert_eq!(degree_step_index(-15), 0);
        assert_eq!(degree_step_index(15), 18);
    }

    #[test]
    fn test_compute_degree_step_clamps_large_leaps() {
        let step = compute_degree_step(36, 84, Key::C, ScaleType::Major);
        assert_eq!(step, 9);
        let step = compute_degree_step(84, 36, Key::C, ScaleType::Major);
        assert_eq!(step, -9);
        let step = compute_degree_step(60, 62, Key::C, ScaleType::Major);
        assert_eq!(step, 1);
    }

    #[test]
    fn test_top_melodic_candidates_stepwise_first() {
        // From C4 at a bar start in a stable context the best candidate
        // should be a near neighbor.
        let cands = top_melodic_candidates(
            fugue_upper_model(),
            0,
            DegreeClass::Stable,
            BeatPos::Bar,
            60,
            Key::C,
            ScaleType::Major,
            48,
            84,
            5,
        );
        assert!(!cands.is_empty());
        let best_step = compute_degree_step(60, cands[0].pitch, Key::C, ScaleType::Major);
        assert!(
            i32::from(best_step).abs() <= 2,
            "best candidate step {best_step}"
        );
        // Probabilities are sorted descending.
        for pair in cands.windows(2) {
            assert!(pair[0].prob >= pair[1].prob);
        }
    }

    #[test]
    fn test_top_melodic_candidates_respect_range() {
        let cands = top_melodic_candidates(
            fugue_upper_model(),
            0,
            DegreeClass::Stable,
            BeatPos::Beat,
            60,
            Key::C,
            ScaleType::Major,
            58,
            64,
            19,
        );
        for cand in cands {
            assert!((58..=64).contains(&cand.pitch));
        }
    }

    #[test]
    fn test_top_vertical_prefers_consonance_on_downbeat() {
        let cands = top_vertical_candidates(
            fugue_vertical_table(),
            0,
            BeatPos::Bar,
            1,
            HarmFunc::Tonic,
            12,
        );
        assert_eq!(cands.len(), 12);
        // The top candidate is a perfect fifth or octave over a tonic bass.
        assert!(matches!(cands[0].pitch, 0 | 7), "top pc {}", cands[0].pitch);
    }

    #[test]
    fn test_duration_persistence() {
        // A running sixteenth line tends to continue in sixteenths.
        let model = fugue_upper_model();
        let same = score_duration_transition(
            model,
            DurCategory::S16,
            DirIntervalClass::StepUp,
            DurCategory::S16,
        );
        let jump = score_duration_transition(
            model,
            DurCategory::S16,
            DirIntervalClass::StepUp,
            DurCategory::HalfPlus,
        );
        assert!(same > jump);
    }
}
