// Figure vocabulary: attestation lookup for 4-interval melodic windows.
//
// Bach's episode figuration is built from a small stock of figures (scale
// runs, turns, neighbor figures, cambiata, triadic spins). A candidate note
// closes a 5-note window; the window's 4 directed degree intervals are
// matched against the attested figure list, and the match quality in [0, 1]
// feeds the Gravity vocabulary sub-score.
//
// Intervals are approximate degree steps derived from semitone distances, so
// the lookup tolerates major/minor inflection of the same figure shape.

/// One attested figure: 4 directed degree steps and its attestation weight.
struct Figure {
    steps: [i8; 4],
    weight: f32,
}

/// The attested figure stock, strongest figures first.
const FIGURES: &[Figure] = &[
    // Scale runs: the backbone of episode figuration.
    Figure { steps: [1, 1, 1, 1], weight: 1.0 },
    Figure { steps: [-1, -1, -1, -1], weight: 1.0 },
    // Turn figures (circolo mezzo).
    Figure { steps: [1, -1, -1, 1], weight: 0.9 },
    Figure { steps: [-1, 1, 1, -1], weight: 0.9 },
    // Run with changing direction at the end.
    Figure { steps: [1, 1, 1, -1], weight: 0.85 },
    Figure { steps: [-1, -1, -1, 1], weight: 0.85 },
    // Neighbor-note figures.
    Figure { steps: [1, -1, 1, -1], weight: 0.8 },
    Figure { steps: [-1, 1, -1, 1], weight: 0.8 },
    // Nota cambiata and its inversion.
    Figure { steps: [-1, -2, 1, 1], weight: 0.8 },
    Figure { steps: [1, 2, -1, -1], weight: 0.75 },
    // Triadic spins (thirds in degree space).
    Figure { steps: [2, 2, -1, -1], weight: 0.75 },
    Figure { steps: [-2, -2, 1, 1], weight: 0.75 },
    Figure { steps: [2, -1, 2, -1], weight: 0.7 },
    // Leap with stepwise recovery.
    Figure { steps: [4, -1, -1, -1], weight: 0.7 },
    Figure { steps: [-4, 1, 1, 1], weight: 0.7 },
    // Suspension chain shape: repeat, fall, repeat, fall.
    Figure { steps: [0, -1, 0, -1], weight: 0.65 },
    // Pedal-return figure.
    Figure { steps: [1, -1, 2, -2], weight: 0.6 },
    Figure { steps: [-1, 1, -2, 2], weight: 0.6 },
];

/// Approximate degree step for a semitone distance.
///
/// Maps chromatic distance to the diatonic step count a Baroque ear would
/// hear: seconds to 1, thirds to 2, fourths to 3, and so on.
pub fn semitone_to_degree(semitones: i32) -> i8 {
    let magnitude = match semitones.abs() {
        0 => 0,
        1 | 2 => 1,
        3 | 4 => 2,
        5 => 3,
        6 | 7 => 4,
        8 | 9 => 5,
        10 | 11 => 6,
        _ => 7,
    };
    if semitones < 0 { -magnitude } else { magnitude }
}

/// Match a 4-interval window against the figure stock.
///
/// An exact match returns the figure's weight; a window that agrees with a
/// figure in 3 of 4 positions returns half the weight. The best match across
/// the stock wins. Returns 0.0 for unattested shapes.
pub fn match_vocabulary(intervals: &[i8; 4]) -> f32 {
    let mut best = 0.0f32;
    for figure in FIGURES {
        let matching = figure
            .steps
            .iter()
            .zip(intervals.iter())
            .filter(|(a, b)| a == b)
            .count();
        let score = match matching {
            4 => figure.weight,
            3 => figure.weight * 0.5,
            _ => 0.0,
        };
        if score > best {
            best = score;
        }
    }
    best
}

/// Figure score for a recent-pitch window plus a candidate pitch.
///
/// Needs at least 4 recent pitches; shorter histories score 0.
pub fn figure_score(recent: &[u8], candidate: u8) -> f32 {
    if recent.len() < 4 {
        return 0.0;
    }
    let tail = &recent[recent.len() - 4..];
    let mut window = [0u8; 5];
    window[..4].copy_from_slice(tail);
    window[4] = candidate;

    let mut intervals = [0i8; 4];
    for idx in 0..4 {
        let diff = i32::from(window[idx + 1]) - i32::from(window[idx]);
        intervals[idx] = semitone_to_degree(diff);
    }
    match_vocabulary(&intervals)
}
