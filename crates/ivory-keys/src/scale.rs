//! Scale highlighting
//!
//! Marks the keys that belong to a chosen scale. Membership only depends on
//! the pitch class, so every octave of a scale degree lights up.

use crate::feedback::VisualFeedback;
use crate::note::{Note, PitchClass};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scale families, each a set of semitone intervals above the root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScaleKind {
    #[default]
    None,
    Major,
    Minor,
    HarmonicMinor,
    MelodicMinor,
    Pentatonic,
    PentatonicMinor,
    Blues,
    Chromatic,
}

impl ScaleKind {
    pub const ALL: [ScaleKind; 9] = [
        ScaleKind::None,
        ScaleKind::Major,
        ScaleKind::Minor,
        ScaleKind::HarmonicMinor,
        ScaleKind::MelodicMinor,
        ScaleKind::Pentatonic,
        ScaleKind::PentatonicMinor,
        ScaleKind::Blues,
        ScaleKind::Chromatic,
    ];

    /// Semitone intervals above the root
    pub fn intervals(self) -> &'static [i32] {
        match self {
            ScaleKind::None => &[],
            ScaleKind::Major => &[0, 2, 4, 5, 7, 9, 11],
            ScaleKind::Minor => &[0, 2, 3, 5, 7, 8, 10],
            ScaleKind::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
            ScaleKind::MelodicMinor => &[0, 2, 3, 5, 7, 9, 11],
            ScaleKind::Pentatonic => &[0, 2, 4, 7, 9],
            ScaleKind::PentatonicMinor => &[0, 3, 5, 7, 10],
            ScaleKind::Blues => &[0, 3, 5, 6, 7, 10],
            ScaleKind::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScaleKind::None => "none",
            ScaleKind::Major => "major",
            ScaleKind::Minor => "minor",
            ScaleKind::HarmonicMinor => "harmonic minor",
            ScaleKind::MelodicMinor => "melodic minor",
            ScaleKind::Pentatonic => "pentatonic",
            ScaleKind::PentatonicMinor => "pentatonic minor",
            ScaleKind::Blues => "blues",
            ScaleKind::Chromatic => "chromatic",
        }
    }

    pub fn next(self) -> Self {
        let i = Self::ALL.iter().position(|k| *k == self).unwrap_or(0);
        Self::ALL[(i + 1) % Self::ALL.len()]
    }
}

impl fmt::Display for ScaleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A root plus a scale family, e.g. D minor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Scale {
    pub root: PitchClass,
    #[serde(rename = "type")]
    pub kind: ScaleKind,
}

impl Scale {
    pub fn new(root: PitchClass, kind: ScaleKind) -> Self {
        Self { root, kind }
    }

    /// Whether a note is a degree of this scale. Nothing belongs to `none`.
    pub fn contains(&self, note: Note) -> bool {
        let interval = (note.pitch_class.semitone() - self.root.semitone()).rem_euclid(12);
        self.kind.intervals().contains(&interval)
    }

    pub fn with_next_root(self) -> Self {
        Self { root: self.root.next(), ..self }
    }

    pub fn with_next_kind(self) -> Self {
        Self { kind: self.kind.next(), ..self }
    }

    /// Re-mark every given key as highlighted or not
    pub fn apply<V: VisualFeedback>(&self, keys: impl IntoIterator<Item = Note>, visual: &mut V) {
        for note in keys {
            visual.set_key_highlighted(note, self.contains(note));
        }
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ScaleKind::None => f.write_str("off"),
            kind => write!(f, "{} {}", self.root, kind),
        }
    }
}
