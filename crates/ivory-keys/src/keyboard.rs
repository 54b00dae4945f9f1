//! Computer-keyboard layouts
//!
//! A layout binds computer keys to logical notes. Several keys may bind the
//! same note; a note may have no key at all (it can still be played with the
//! mouse). Bindings never change while the program runs, so a logical note is
//! a stable identity for a physical key.

use crate::note::{Note, PitchClass};
use std::time::Duration;

/// Key that acts as the sustain pedal
pub const SUSTAIN_KEY: char = ' ';
/// Character the Enter key is reported as
pub const ENTER_KEY: char = '\n';

/// Default velocity for key presses
pub const DEFAULT_VELOCITY: u8 = 100;

/// Default auto-release timeout in milliseconds, for terminals that never
/// report key releases. Must be longer than the OS key repeat delay
/// (typically 300-500ms).
pub const DEFAULT_NOTE_RELEASE_MS: u64 = 600;

/// A key mapping entry: computer key character -> note offset from the base
#[derive(Debug, Clone, PartialEq)]
pub struct KeyMapping {
    /// The character representing this key (lowercase)
    pub key_char: char,
    /// The character to display (for rendering, usually uppercase)
    pub display_char: char,
    /// Semitone offset from the base note
    pub note_offset: i8,
}

impl KeyMapping {
    fn new(key_char: char, note_offset: i8) -> Self {
        Self {
            key_char,
            display_char: key_char.to_ascii_uppercase(),
            note_offset,
        }
    }
}

fn mappings(pairs: &[(char, i8)]) -> Vec<KeyMapping> {
    pairs.iter().map(|(c, offset)| KeyMapping::new(*c, *offset)).collect()
}

/// Keyboard layout plus the note it is anchored to
#[derive(Debug, Clone)]
pub struct KeyboardConfig {
    /// Key mappings (computer key -> note offset)
    pub mappings: Vec<KeyMapping>,
    /// Note played by offset 0
    pub base_note: Note,
    /// Velocity for key presses
    pub velocity: u8,
    /// MIDI channel (0-15)
    pub channel: u8,
    /// Auto-release timeout when key releases are not reported
    pub note_release_duration: Duration,
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self::piano_layout()
    }
}

impl KeyboardConfig {
    fn with_mappings(mappings: Vec<KeyMapping>, base_note: Note) -> Self {
        Self {
            mappings,
            base_note,
            velocity: DEFAULT_VELOCITY,
            channel: 0,
            note_release_duration: Duration::from_millis(DEFAULT_NOTE_RELEASE_MS),
        }
    }

    /// Four-row piano layout, white keys only, C2 to G6 (US QWERTY)
    ///
    /// ```text
    ///  1  2  3  4  5  6  7  8  9  0  -  =     C5 .. G6
    ///  Q  W  E  R  T  Y  U  I  O  P  [  ]  \  C4 .. A5
    ///  A  S  D  F  G  H  J  K  L  ;  '  ⏎     C3 .. G4
    ///  Z  X  C  V  B  N  M  ,  .  /           C2 .. E3
    /// ```
    pub fn piano_layout() -> Self {
        let mut mappings = mappings(&[
            // Bottom row: C2 up
            ('z', 0), ('x', 2), ('c', 4), ('v', 5), ('b', 7), ('n', 9), ('m', 11),
            (',', 12), ('.', 14), ('/', 16),
            // Home row: C3 up
            ('a', 12), ('s', 14), ('d', 16), ('f', 17), ('g', 19), ('h', 21), ('j', 23),
            ('k', 24), ('l', 26), (';', 28), ('\'', 29),
            // Top row: C4 up
            ('q', 24), ('w', 26), ('e', 28), ('r', 29), ('t', 31), ('y', 33), ('u', 35),
            ('i', 36), ('o', 38), ('p', 40), ('[', 41), (']', 43), ('\\', 45),
            // Number row: C5 up
            ('1', 36), ('2', 38), ('3', 40), ('4', 41), ('5', 43), ('6', 45), ('7', 47),
            ('8', 48), ('9', 50), ('0', 52), ('-', 53), ('=', 55),
        ]);
        mappings.push(KeyMapping {
            key_char: ENTER_KEY,
            display_char: '⏎',
            note_offset: 31,
        });
        Self::with_mappings(mappings, Note::new(PitchClass::C, 2))
    }

    /// Two-octave chromatic layout for German QWERTZ keyboards, A2 to C5
    ///
    /// ```text
    ///     1   2     4   5   6        C#4 D#4   F#4 G#4 A#4
    ///    Q   W   E   R   T   Z   U   D4  E4  F4  G4  A4  B4  C5
    ///     S     F G     J K L        A#2   C#3 D#3   F#3 G#3 A#3
    ///    Y   X   C   V   B   N   M   ,   .   -
    ///    A2  B2  C3  D3  E3  F3  G3  A3  B3  C4
    /// ```
    pub fn german_layout() -> Self {
        let mappings = mappings(&[
            ('y', -3), ('x', -1), ('c', 0), ('v', 2), ('b', 4), ('n', 5), ('m', 7),
            (',', 9), ('.', 11), ('-', 12),
            ('s', -2), ('f', 1), ('g', 3), ('j', 6), ('k', 8), ('l', 10),
            ('q', 14), ('w', 16), ('e', 17), ('r', 19), ('t', 21), ('z', 23), ('u', 24),
            ('1', 13), ('2', 15), ('4', 18), ('5', 20), ('6', 22),
        ]);
        Self::with_mappings(mappings, Note::new(PitchClass::C, 3))
    }

    /// Same as the German layout with Y/Z swapped and `/` as the top key
    pub fn us_layout() -> Self {
        let mut config = Self::german_layout();
        for mapping in config.mappings.iter_mut() {
            let swapped = match mapping.key_char {
                'y' => Some('z'),
                'z' => Some('y'),
                '-' => Some('/'),
                _ => None,
            };
            if let Some(c) = swapped {
                *mapping = KeyMapping::new(c, mapping.note_offset);
            }
        }
        config
    }

    /// Get the logical note for a given key character
    pub fn note_for_char(&self, c: char) -> Option<Note> {
        self.get_mapping(c).map(|m| self.note_for(m))
    }

    /// Logical note bound by a mapping
    pub fn note_for(&self, mapping: &KeyMapping) -> Note {
        self.base_note.transpose(mapping.note_offset as i32)
    }

    /// Get the mapping for a given key character
    pub fn get_mapping(&self, c: char) -> Option<&KeyMapping> {
        let c = c.to_ascii_lowercase();
        self.mappings.iter().find(|m| m.key_char == c)
    }

    /// Check if a character is part of the keyboard
    pub fn is_keyboard_char(&self, c: char) -> bool {
        self.get_mapping(c).is_some()
    }

    /// Display characters of every key bound to a note, sorted
    pub fn labels_for(&self, note: Note) -> Vec<char> {
        let mut labels: Vec<char> = self
            .mappings
            .iter()
            .filter(|m| self.note_for(m) == note)
            .map(|m| m.display_char)
            .collect();
        labels.sort();
        labels.dedup();
        labels
    }

    /// Lowest and highest bound notes, widened to white keys at both ends
    pub fn display_range(&self) -> (Note, Note) {
        let notes = self.mappings.iter().map(|m| self.note_for(m));
        let low = notes.clone().min().unwrap_or(self.base_note);
        let high = notes.max().unwrap_or(self.base_note);
        let low = if low.is_black_key() { low.transpose(-1) } else { low };
        let high = if high.is_black_key() { high.transpose(1) } else { high };
        (low, high)
    }

    /// Every note from the low to the high end of the display range
    pub fn display_notes(&self) -> Vec<Note> {
        let (low, high) = self.display_range();
        (low.index()..=high.index()).filter_map(Note::from_index).collect()
    }
}
