// Deterministic, portable pseudo-random number generator.
//
// Implements xoshiro256** (Blackman & Vigna, 2019) with SplitMix64 seeding.
// Hand-rolled with no external RNG dependency so that identical seeds produce
// identical output on every platform, compiler version, and optimization
// level. The generation engine's reproducibility guarantee (same seed, same
// request, bitwise-identical notes) rests on this crate.
//
// Every draw the engine makes -- candidate coin flips, duration jitter,
// anchor-pitch choices, imitation-delay rolls -- goes through one SketchRng
// instance whose call sequence is part of the engine's contract. Reordering
// draws changes output; adding a draw changes output. Keep the draw surface
// here minimal and explicit.

use serde::{Deserialize, Serialize};

/// Xoshiro256** PRNG, the engine's sole source of randomness.
///
/// Seeds are 32-bit in the public generation API; they are widened to 64 bits
/// and expanded into the 256-bit state via SplitMix64. Two instances created
/// from the same seed yield identical draw sequences.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SketchRng {
    state: [u64; 4],
}

impl SketchRng {
    /// Create a generator from a 32-bit seed (the engine's seed width).
    pub fn new(seed: u32) -> Self {
        Self::from_u64(u64::from(seed))
    }

    /// Create a generator from a full 64-bit seed.
    pub fn from_u64(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            state: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    /// Next `u64` in the sequence (the ** scrambler).
    pub fn next_u64(&mut self) -> u64 {
        let result = self.state[1]
            .wrapping_mul(5)
            .rotate_left(7)
            .wrapping_mul(9);

        let t = self.state[1] << 17;

        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];

        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);

        result
    }

    /// Next `u32`, taken from the upper half of a `u64` draw.
    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Uniform `f32` in [0, 1) from the top 24 bits of a draw.
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Uniform `f64` in [0, 1) from the top 53 bits of a draw.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform `u64` in `[low, high)` via rejection sampling (no modulo bias).
    ///
    /// Panics if `low >= high`.
    pub fn range_u64(&mut self, low: u64, high: u64) -> u64 {
        assert!(low < high, "range_u64: low must be less than high");
        let span = high - low;
        if span.is_power_of_two() {
            return low + (self.next_u64() & (span - 1));
        }
        let threshold = span.wrapping_neg() % span;
        loop {
            let draw = self.next_u64();
            if draw >= threshold {
                return low + (draw % span);
            }
        }
    }

    /// Uniform `usize` in `[low, high)`.
    pub fn range_usize(&mut self, low: usize, high: usize) -> usize {
        self.range_u64(low as u64, high as u64) as usize
    }

    /// Uniform `i32` in `[low, high]` (inclusive on both ends).
    ///
    /// Panics if `low > high`.
    pub fn range_i32(&mut self, low: i32, high: i32) -> i32 {
        assert!(low <= high, "range_i32: low must be <= high");
        let span = (high as i64 - low as i64 + 1) as u64;
        low + self.range_u64(0, span) as i32
    }

    /// Uniform `f32` in `[low, high)`.
    ///
    /// Panics if `low >= high`.
    pub fn range_f32(&mut self, low: f32, high: f32) -> f32 {
        assert!(low < high, "range_f32: low must be less than high");
        low + self.next_f32() * (high - low)
    }

    /// `true` with probability `p`. Values outside [0, 1] clamp naturally:
    /// `p <= 0` never fires, `p >= 1` always fires.
    pub fn chance(&mut self, p: f32) -> bool {
        self.next_f32() < p
    }

    /// Weighted index choice: returns `i` with probability
    /// `weights[i] / sum(weights)`.
    ///
    /// Non-positive weights are treated as zero. Returns 0 when the slice is
    /// empty or the total weight is zero, so callers never get an
    /// out-of-bounds index from a degenerate table. Consumes exactly one
    /// draw.
    pub fn pick_weighted(&mut self, weights: &[f32]) -> usize {
        let total: f32 = weights.iter().map(|w| w.max(0.0)).sum();
        let roll = self.next_f32();
        if weights.is_empty() || total <= 0.0 {
            return 0;
        }
        let target = roll * total;
        let mut cumulative = 0.0f32;
        for (idx, &weight) in weights.iter().enumerate() {
            cumulative += weight.max(0.0);
            if target < cumulative {
                return idx;
            }
        }
        weights.len() - 1
    }
}

/// SplitMix64, used only to expand a small seed into the 256-bit state.
/// Standard recommendation from the xoshiro authors.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
