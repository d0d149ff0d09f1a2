// Modal scale support for plan generation.
//
// Each plan is written in one key: a church mode plus a tonic pitch class.
// The planner walks the melody in scale degrees and builds triads on degree
// roots; the harmony critic parses the plan's key name back to check the
// closing chord against the tonic.
//
// This module provides:
// - Mode definitions with their scale degree patterns
// - Degree <-> pitch mapping (degrees may be negative or exceed an octave)
// - Key names ("D dorian") and parsing

use serde::{Deserialize, Serialize};

/// The church modes, each defined by its interval pattern from the tonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// D E F G A B C D (natural minor with raised 6th)
    Dorian,
    /// E F G A B C D E (half-step from 1 to 2)
    Phrygian,
    /// F G A B C D E F (raised 4th)
    Lydian,
    /// G A B C D E F G (major with lowered 7th)
    Mixolydian,
    /// A B C D E F G A (natural minor)
    Aeolian,
    /// C D E F G A B C (major)
    Ionian,
}

impl Mode {
    pub const ALL: [Mode; 6] = [
        Mode::Dorian,
        Mode::Phrygian,
        Mode::Lydian,
        Mode::Mixolydian,
        Mode::Aeolian,
        Mode::Ionian,
    ];

    /// Semitone intervals from the tonic to each of the 7 scale degrees.
    pub fn intervals(self) -> [u8; 7] {
        match self {
            Mode::Dorian => [0, 2, 3, 5, 7, 9, 10],
            Mode::Phrygian => [0, 1, 3, 5, 7, 8, 10],
            Mode::Lydian => [0, 2, 4, 6, 7, 9, 11],
            Mode::Mixolydian => [0, 2, 4, 5, 7, 9, 10],
            Mode::Aeolian => [0, 2, 3, 5, 7, 8, 10],
            Mode::Ionian => [0, 2, 4, 5, 7, 9, 11],
        }
    }

    /// The 12 pitch classes that are in the mode, indexed relative to the
    /// tonic.
    pub fn pitch_classes(self) -> [bool; 12] {
        let mut pcs = [false; 12];
        for &interval in &self.intervals() {
            pcs[interval as usize] = true;
        }
        pcs
    }

    pub fn name(self) -> &'static str {
        match self {
            Mode::Dorian => "dorian",
            Mode::Phrygian => "phrygian",
            Mode::Lydian => "lydian",
            Mode::Mixolydian => "mixolydian",
            Mode::Aeolian => "aeolian",
            Mode::Ionian => "ionian",
        }
    }

    pub fn from_name(name: &str) -> Option<Mode> {
        Mode::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(name))
    }
}

const TONIC_NAMES: [&str; 12] = [
    "C", "C#", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B",
];

/// A specific key: a mode plus its tonic pitch class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub mode: Mode,
    /// Pitch class of the tonic (0 = C, 2 = D, ...).
    pub tonic_pc: u8,
}

impl Key {
    pub fn new(mode: Mode, tonic_pc: u8) -> Self {
        Key {
            mode,
            tonic_pc: tonic_pc % 12,
        }
    }

    /// Key name, e.g. "D dorian".
    pub fn name(&self) -> String {
        format!("{} {}", TONIC_NAMES[self.tonic_pc as usize], self.mode.name())
    }

    /// Parse a name produced by `Key::name`.
    pub fn parse(name: &str) -> Option<Key> {
        let mut parts = name.split_whitespace();
        let tonic = parts.next()?;
        let mode = Mode::from_name(parts.next()?)?;
        let tonic_pc = TONIC_NAMES.iter().position(|t| *t == tonic)? as u8;
        Some(Key::new(mode, tonic_pc))
    }

    /// Check if a MIDI pitch belongs to this key.
    pub fn contains(&self, pitch: i32) -> bool {
        let pc = (pitch - self.tonic_pc as i32).rem_euclid(12);
        self.mode.pitch_classes()[pc as usize]
    }

    /// Pitch of a scale degree relative to the tonic in `octave` (octave 5
    /// puts C at MIDI 60). Degrees below 0 or above 6 wrap into neighbouring
    /// octaves.
    pub fn degree_to_pitch(&self, degree: i32, octave: i32) -> i32 {
        let intervals = self.mode.intervals();
        let step = intervals[degree.rem_euclid(7) as usize] as i32;
        octave * 12 + self.tonic_pc as i32 + step + 12 * degree.div_euclid(7)
    }

    /// Pitch class (0-11) of a scale degree.
    pub fn degree_pc(&self, degree: i32) -> i32 {
        self.degree_to_pitch(degree, 0).rem_euclid(12)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_d_dorian_pitches() {
        let key = Key::new(Mode::Dorian, 2);
        for p in [62, 64, 65, 67, 69, 71, 72] {
            assert!(key.contains(p), "{p} should be in D dorian");
        }
        assert!(!key.contains(63));
        assert!(!key.contains(66));
    }

    #[test]
    fn degree_to_pitch_wraps_octaves() {
        let key = Key::new(Mode::Ionian, 0);
        assert_eq!(key.degree_to_pitch(0, 5), 60);
        assert_eq!(key.degree_to_pitch(4, 5), 67);
        assert_eq!(key.degree_to_pitch(7, 5), 72);
        assert_eq!(key.degree_to_pitch(-1, 5), 59);
        assert_eq!(key.degree_to_pitch(-7, 5), 48);
    }

    #[test]
    fn key_name_roundtrip() {
        for mode in Mode::ALL {
            for pc in 0..12 {
                let key = Key::new(mode, pc);
                assert_eq!(Key::parse(&key.name()), Some(key));
            }
        }
        assert_eq!(Key::parse("H locrian"), None);
        assert_eq!(Key::parse(""), None);
    }

    #[test]
    fn test_phrygian_half_step() {
        let key = Key::new(Mode::Phrygian, 4);
        assert_eq!(key.degree_to_pitch(1, 5) - key.degree_to_pitch(0, 5), 1);
    }
}
