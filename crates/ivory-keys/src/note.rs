//! Note identities and transposition
//!
//! A [`Note`] is a pitch class plus an octave in scientific pitch notation
//! (C4 is middle C, MIDI 60). The same type names both the *logical* note a
//! physical key is bound to and the *sounding* note that reaches the engine
//! after the global transpose offset has been applied.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Number of semitones in an octave
pub const SEMITONES_PER_OCTAVE: i32 = 12;

/// The twelve pitch classes, in ascending order from C
pub const CHROMATIC: [PitchClass; 12] = [
    PitchClass::C,
    PitchClass::CSharp,
    PitchClass::D,
    PitchClass::DSharp,
    PitchClass::E,
    PitchClass::F,
    PitchClass::FSharp,
    PitchClass::G,
    PitchClass::GSharp,
    PitchClass::A,
    PitchClass::ASharp,
    PitchClass::B,
];

/// A pitch class, spelled with sharps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum PitchClass {
    #[default]
    #[serde(rename = "C")]
    C,
    #[serde(rename = "C#")]
    CSharp,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "D#")]
    DSharp,
    #[serde(rename = "E")]
    E,
    #[serde(rename = "F")]
    F,
    #[serde(rename = "F#")]
    FSharp,
    #[serde(rename = "G")]
    G,
    #[serde(rename = "G#")]
    GSharp,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A#")]
    ASharp,
    #[serde(rename = "B")]
    B,
}

impl PitchClass {
    /// Semitones above C (0-11)
    pub fn semitone(self) -> i32 {
        self as i32
    }

    /// Pitch class for a semitone count, wrapping in both directions
    pub fn from_semitone(semitone: i32) -> Self {
        CHROMATIC[semitone.rem_euclid(SEMITONES_PER_OCTAVE) as usize]
    }

    /// Display name ("C", "C#", ...)
    pub fn name(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::CSharp => "C#",
            PitchClass::D => "D",
            PitchClass::DSharp => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::FSharp => "F#",
            PitchClass::G => "G",
            PitchClass::GSharp => "G#",
            PitchClass::A => "A",
            PitchClass::ASharp => "A#",
            PitchClass::B => "B",
        }
    }

    /// Whether this pitch class is played on a black key
    pub fn is_sharp(self) -> bool {
        matches!(
            self,
            PitchClass::CSharp
                | PitchClass::DSharp
                | PitchClass::FSharp
                | PitchClass::GSharp
                | PitchClass::ASharp
        )
    }

    /// The next pitch class, wrapping B -> C
    pub fn next(self) -> Self {
        Self::from_semitone(self.semitone() + 1)
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PitchClass {
    type Err = Error;

    /// Accepts a letter with an optional `#` or `b` accidental
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (semitone, rest) = parse_pitch_prefix(s).ok_or_else(|| Error::InvalidNote(s.to_string()))?;
        if !rest.is_empty() {
            return Err(Error::InvalidNote(s.to_string()));
        }
        Ok(Self::from_semitone(semitone))
    }
}

/// Parse a letter plus accidental, returning semitones above C (may be -1 or 12
/// for Cb / B#) and the unparsed remainder.
fn parse_pitch_prefix(s: &str) -> Option<(i32, &str)> {
    let mut chars = s.chars();
    let letter = chars.next()?;
    let base = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let rest = chars.as_str();
    if let Some(rest) = rest.strip_prefix('#') {
        Some((base + 1, rest))
    } else if let Some(rest) = rest.strip_prefix('b') {
        Some((base - 1, rest))
    } else {
        Some((base, rest))
    }
}

/// A pitch: pitch class plus octave.
///
/// Parsed notes are limited to octaves [`Note::LOWEST_OCTAVE`] through
/// [`Note::HIGHEST_OCTAVE`]. Arithmetic is exact for any octave that fits in
/// an `i8`, so transposing a parsed note never reaches the saturation point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Note {
    pub pitch_class: PitchClass,
    pub octave: i8,
}

impl Note {
    /// Lowest octave accepted when parsing (C-1 is MIDI 0)
    pub const LOWEST_OCTAVE: i8 = -1;
    /// Highest octave accepted when parsing
    pub const HIGHEST_OCTAVE: i8 = 9;

    /// Lowest representable note
    pub const MIN: Note = Note::new(PitchClass::C, i8::MIN);
    /// Highest representable note
    pub const MAX: Note = Note::new(PitchClass::B, i8::MAX);

    /// Create a note from its parts
    pub const fn new(pitch_class: PitchClass, octave: i8) -> Self {
        Self { pitch_class, octave }
    }

    /// Absolute semitone index counted from C0
    pub fn index(self) -> i32 {
        self.octave as i32 * SEMITONES_PER_OCTAVE + self.pitch_class.semitone()
    }

    /// Note at an absolute semitone index counted from C0, or `None` when
    /// the octave does not fit
    pub fn from_index(index: i32) -> Option<Self> {
        let octave = i8::try_from(index.div_euclid(SEMITONES_PER_OCTAVE)).ok()?;
        Some(Self {
            pitch_class: PitchClass::from_semitone(index),
            octave,
        })
    }

    /// MIDI note number, if the note lies within 0-127
    pub fn midi(self) -> Option<u8> {
        let midi = self.index() + SEMITONES_PER_OCTAVE;
        u8::try_from(midi).ok().filter(|n| *n <= 127)
    }

    /// Note for a MIDI note number
    pub fn from_midi(midi: u8) -> Self {
        Self {
            pitch_class: PitchClass::from_semitone(midi as i32),
            octave: (midi / 12) as i8 - 1,
        }
    }

    /// Shift by a number of semitones, carrying into the octave.
    ///
    /// A shift of zero returns the note itself. Shifts past [`Note::MIN`]
    /// or [`Note::MAX`] saturate there.
    pub fn transpose(self, semitones: i32) -> Self {
        if semitones == 0 {
            return self;
        }
        self.index()
            .checked_add(semitones)
            .and_then(Self::from_index)
            .unwrap_or(if semitones > 0 { Self::MAX } else { Self::MIN })
    }

    /// Whether the note sits on a black key
    pub fn is_black_key(self) -> bool {
        self.pitch_class.is_sharp()
    }
}

/// Map a note to the note `semitones` above (or below) it
pub fn transpose(note: Note, semitones: i32) -> Note {
    note.transpose(semitones)
}

impl Ord for Note {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index().cmp(&other.index())
    }
}

impl PartialOrd for Note {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.pitch_class, self.octave)
    }
}

impl FromStr for Note {
    type Err = Error;

    /// Parses scientific pitch names such as `C4`, `F#2`, `Bb3` or `C-1`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidNote(s.to_string());
        let (semitone, rest) = parse_pitch_prefix(s.trim()).ok_or_else(invalid)?;
        let octave: i8 = rest.parse().map_err(|_| invalid())?;
        if !(Self::LOWEST_OCTAVE..=Self::HIGHEST_OCTAVE).contains(&octave) {
            return Err(invalid());
        }
        // Cb and B# carry into the neighbouring octave
        let index = (octave as i32)
            .checked_mul(SEMITONES_PER_OCTAVE)
            .and_then(|base| base.checked_add(semitone))
            .ok_or_else(invalid)?;
        Self::from_index(index).ok_or_else(invalid)
    }
}

impl TryFrom<String> for Note {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Note> for String {
    fn from(note: Note) -> Self {
        note.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(s: &str) -> Note {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(n("C4"), Note::new(PitchClass::C, 4));
        assert_eq!(n("F#2").to_string(), "F#2");
        assert_eq!(n("Bb3"), n("A#3"));
        assert_eq!(n("Cb4"), n("B3"));
        assert_eq!(n("C-1").midi(), Some(0));
        assert!("H4".parse::<Note>().is_err());
        assert!("C".parse::<Note>().is_err());
        assert!("C#x".parse::<Note>().is_err());
    }

    #[test]
    fn test_midi_numbers() {
        assert_eq!(n("C4").midi(), Some(60));
        assert_eq!(n("A4").midi(), Some(69));
        assert_eq!(n("G9").midi(), Some(127));
        assert_eq!(n("G#9").midi(), None);
        assert_eq!(Note::from_midi(48), n("C3"));
    }

    #[test]
    fn test_transpose_carries_octave() {
        assert_eq!(transpose(n("B2"), 1), n("C3"));
        assert_eq!(transpose(n("C3"), -1), n("B2"));
        assert_eq!(transpose(n("C4"), 2), n("D4"));
        assert_eq!(transpose(n("A6"), 12), n("A7"));
        assert_eq!(transpose(n("C2"), -25), n("B-1"));
    }

    #[test]
    fn test_transpose_zero_is_identity() {
        let note = n("E3");
        assert_eq!(transpose(note, 0), note);
    }

    #[test]
    fn test_rejects_out_of_range_octaves() {
        for input in ["C999999999", "C200", "C128", "C10", "C-2", "G#-128"] {
            assert!(input.parse::<Note>().is_err(), "{input} should be rejected");
        }
        assert_eq!(n("B9").octave, 9);
        assert_eq!(n("Cb-1"), Note::new(PitchClass::B, -2));
        assert_eq!(Note::from_index(i32::MAX), None);
    }

    #[test]
    fn test_transpose_round_trip() {
        let low = Note::new(PitchClass::C, Note::LOWEST_OCTAVE).index();
        let high = Note::new(PitchClass::B, Note::HIGHEST_OCTAVE).index();
        for index in low..=high {
            let note = Note::from_index(index).unwrap();
            for k in -240..=240 {
                assert_eq!(transpose(transpose(note, k), -k), note, "{note} by {k}");
            }
        }
    }

    #[test]
    fn test_transpose_round_trip_near_representable_limit() {
        let top = Note::new(PitchClass::G, 126);
        assert_eq!(transpose(transpose(top, 12), -12), top);
        assert_eq!(transpose(Note::MAX, -1).transpose(1), Note::MAX);
        assert_eq!(transpose(Note::MIN, 1).transpose(-1), Note::MIN);
        assert_eq!(transpose(Note::MAX, 1), Note::MAX);
        assert_eq!(transpose(Note::MIN, i32::MIN), Note::MIN);
    }

    #[test]
    fn test_ordering_follows_pitch() {
        assert!(n("B2") < n("C3"));
        assert!(n("C#4") > n("C4"));
        assert!(n("C#4").is_black_key());
        assert!(!n("E4").is_black_key());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&n("D#5")).unwrap();
        assert_eq!(json, "\"D#5\"");
        let back: Note = serde_json::from_str(&json).unwrap();
        assert_eq!(back, n("D#5"));
        let pc: PitchClass = serde_json::from_str("\"F#\"").unwrap();
        assert_eq!(pc, PitchClass::FSharp);
    }
}
