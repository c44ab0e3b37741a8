// Keys, scale types, and degree arithmetic.
//
// The engine works diatonically: candidate pitches are snapped to the
// current key's scale, melodic motion is measured in scale-degree steps, and
// the vertical oracle is keyed by bass scale degree. Three scale types cover
// the Baroque harmonic vocabulary used here: major, natural minor, and
// harmonic minor.
//
// "Absolute degree" is the diatonic analogue of a MIDI pitch: octave * 7 +
// degree, anchored so the tonic of the key's home octave round-trips. Pitches
// outside the scale map to the degree of the nearest scale tone below them.

use serde::{Deserialize, Serialize};

use crate::note::clamp_pitch;

/// Number of degrees in a diatonic scale.
pub const SCALE_DEGREES: usize = 7;

/// Musical key: the tonic pitch class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Key {
    C = 0,
    Cs = 1,
    D = 2,
    Ds = 3,
    E = 4,
    F = 5,
    Fs = 6,
    G = 7,
    Gs = 8,
    A = 9,
    As = 10,
    B = 11,
}

impl Key {
    /// Tonic pitch class 0-11.
    pub fn pc(self) -> u8 {
        self as u8
    }

    /// Key from a pitch class (wrapped mod 12).
    pub fn from_pc(pc: u8) -> Key {
        match pc % 12 {
            0 => Key::C,
            1 => Key::Cs,
            2 => Key::D,
            3 => Key::Ds,
            4 => Key::E,
            5 => Key::F,
            6 => Key::Fs,
            7 => Key::G,
            8 => Key::Gs,
            9 => Key::A,
            10 => Key::As,
            _ => Key::B,
        }
    }
}

/// Scale type (mode in the modern major/minor sense).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleType {
    Major,
    NaturalMinor,
    HarmonicMinor,
}

impl ScaleType {
    /// Semitone offsets of the 7 degrees from the tonic.
    pub fn intervals(self) -> [u8; SCALE_DEGREES] {
        match self {
            ScaleType::Major => [0, 2, 4, 5, 7, 9, 11],
            ScaleType::NaturalMinor => [0, 2, 3, 5, 7, 8, 10],
            ScaleType::HarmonicMinor => [0, 2, 3, 5, 7, 8, 11],
        }
    }
}

/// Check if a MIDI pitch belongs to the scale.
pub fn is_scale_tone(pitch: u8, key: Key, scale: ScaleType) -> bool {
    let pc = (i32::from(pitch) - i32::from(key.pc())).rem_euclid(12) as u8;
    scale.intervals().contains(&pc)
}

/// Snap a pitch to the nearest scale tone. On a tie the lower pitch wins.
/// Result stays in [0, 127].
pub fn nearest_scale_tone(pitch: u8, key: Key, scale: ScaleType) -> u8 {
    if is_scale_tone(pitch, key, scale) {
        return pitch;
    }
    let p = i32::from(pitch);
    for offset in 1..=6 {
        let lower = p - offset;
        if lower >= 0 && is_scale_tone(lower as u8, key, scale) {
            return lower as u8;
        }
        let upper = p + offset;
        if upper <= 127 && is_scale_tone(upper as u8, key, scale) {
            return upper as u8;
        }
    }
    pitch // unreachable for 7-tone scales (max gap 3 semitones)
}

/// Scale degree (0-6) of a pitch, or None for non-scale tones.
pub fn scale_degree(pitch: u8, key: Key, scale: ScaleType) -> Option<u8> {
    let pc = (i32::from(pitch) - i32::from(key.pc())).rem_euclid(12) as u8;
    scale
        .intervals()
        .iter()
        .position(|&iv| iv == pc)
        .map(|d| d as u8)
}

/// Absolute diatonic degree of a pitch: octave * 7 + degree, measured from
/// the tonic in the key's lowest octave. Non-scale pitches take the degree
/// of the nearest scale tone at or below.
pub fn pitch_to_absolute_degree(pitch: u8, key: Key, scale: ScaleType) -> i32 {
    let rel = i32::from(pitch) - i32::from(key.pc());
    let octave = rel.div_euclid(12);
    let pc = rel.rem_euclid(12) as u8;
    let intervals = scale.intervals();
    let mut degree = 0i32;
    for (idx, &iv) in intervals.iter().enumerate() {
        if iv <= pc {
            degree = idx as i32;
        }
    }
    octave * 7 + degree
}

/// Convert an absolute diatonic degree back to a MIDI pitch, clamped to
/// [0, 127].
pub fn absolute_degree_to_pitch(degree: i32, key: Key, scale: ScaleType) -> u8 {
    let octave = degree.div_euclid(7);
    let deg = degree.rem_euclid(7) as usize;
    let pitch = i32::from(key.pc()) + octave * 12 + i32::from(scale.intervals()[deg]);
    clamp_pitch(pitch, 0, 127)
}

/// Signed chromatic distance between keys, wrapped to the shortest path on
/// the circle ([-6, +6]).
pub fn key_distance(from: Key, to: Key) -> i32 {
    let mut diff = i32::from(to.pc()) - i32::from(from.pc());
    if diff > 6 {
        diff -= 12;
    }
    if diff < -6 {
        diff += 12;
    }
    diff
}
