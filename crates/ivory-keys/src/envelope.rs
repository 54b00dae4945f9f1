//! ADSR envelope and sustain-pedal tail settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Attack range in seconds
pub const ATTACK_RANGE: (f64, f64) = (0.001, 2.0);
/// Decay range in seconds
pub const DECAY_RANGE: (f64, f64) = (0.0, 2.0);
/// Sustain level range
pub const SUSTAIN_RANGE: (f64, f64) = (0.0, 1.0);
/// Release range in seconds
pub const RELEASE_RANGE: (f64, f64) = (0.1, 5.0);

/// Amplitude envelope applied by the sound engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Adsr {
    /// Attack time in seconds
    pub attack: f64,
    /// Decay time in seconds
    pub decay: f64,
    /// Sustain level (0.0-1.0)
    pub sustain: f64,
    /// Release time in seconds
    pub release: f64,
}

impl Default for Adsr {
    fn default() -> Self {
        Self {
            attack: 0.001,
            decay: 0.0,
            sustain: 1.0,
            release: 1.5,
        }
    }
}

impl Adsr {
    /// Clamp every stage into its supported range
    pub fn clamped(self) -> Self {
        Self {
            attack: self.attack.clamp(ATTACK_RANGE.0, ATTACK_RANGE.1),
            decay: self.decay.clamp(DECAY_RANGE.0, DECAY_RANGE.1),
            sustain: self.sustain.clamp(SUSTAIN_RANGE.0, SUSTAIN_RANGE.1),
            release: self.release.clamp(RELEASE_RANGE.0, RELEASE_RANGE.1),
        }
    }

    /// Read one stage
    pub fn get(&self, field: AdsrField) -> f64 {
        match field {
            AdsrField::Attack => self.attack,
            AdsrField::Decay => self.decay,
            AdsrField::Sustain => self.sustain,
            AdsrField::Release => self.release,
        }
    }

    /// Move one stage by `steps` of its slider increment, staying in range
    pub fn nudge(&mut self, field: AdsrField, steps: i32) {
        let value = self.get(field) + field.step() * steps as f64;
        let (min, max) = field.range();
        let value = value.clamp(min, max);
        match field {
            AdsrField::Attack => self.attack = value,
            AdsrField::Decay => self.decay = value,
            AdsrField::Sustain => self.sustain = value,
            AdsrField::Release => self.release = value,
        }
    }

    /// Label for one stage, formatted like the envelope panel shows it
    pub fn label(&self, field: AdsrField) -> String {
        match field {
            AdsrField::Attack => format!("{:.3}s", self.attack),
            AdsrField::Decay => format!("{:.2}s", self.decay),
            AdsrField::Sustain => format!("{:.2}", self.sustain),
            AdsrField::Release => format!("{:.1}s", self.release),
        }
    }
}

/// One stage of the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdsrField {
    Attack,
    Decay,
    Sustain,
    Release,
}

impl AdsrField {
    pub const ALL: [AdsrField; 4] = [
        AdsrField::Attack,
        AdsrField::Decay,
        AdsrField::Sustain,
        AdsrField::Release,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AdsrField::Attack => "Attack",
            AdsrField::Decay => "Decay",
            AdsrField::Sustain => "Sustain",
            AdsrField::Release => "Release",
        }
    }

    pub fn range(self) -> (f64, f64) {
        match self {
            AdsrField::Attack => ATTACK_RANGE,
            AdsrField::Decay => DECAY_RANGE,
            AdsrField::Sustain => SUSTAIN_RANGE,
            AdsrField::Release => RELEASE_RANGE,
        }
    }

    fn step(self) -> f64 {
        match self {
            AdsrField::Attack => 0.01,
            AdsrField::Decay | AdsrField::Sustain => 0.05,
            AdsrField::Release => 0.1,
        }
    }

    /// Position of the value within the stage's range, as 0.0-1.0
    pub fn normalized(self, value: f64) -> f64 {
        let (min, max) = self.range();
        ((value - min) / (max - min)).clamp(0.0, 1.0)
    }
}

/// Default sustain tail in milliseconds
pub const DEFAULT_SUSTAIN_MS: u64 = 1000;
/// Shortest sustain tail in milliseconds
pub const MIN_SUSTAIN_MS: u64 = 500;
/// Longest sustain tail; this value means "hold until the pedal lifts"
pub const INFINITE_SUSTAIN_MS: u64 = 30_000;
/// Slider increment for the sustain tail
pub const SUSTAIN_STEP_MS: u64 = 500;

/// How long an unheld note keeps sounding while the pedal is down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SustainDuration(u64);

impl Default for SustainDuration {
    fn default() -> Self {
        Self(DEFAULT_SUSTAIN_MS)
    }
}

impl SustainDuration {
    /// Create from milliseconds; anything at or above the maximum is infinite
    pub fn from_millis(ms: u64) -> Self {
        Self(ms.clamp(MIN_SUSTAIN_MS, INFINITE_SUSTAIN_MS))
    }

    /// The "never auto-release" setting
    pub fn infinite() -> Self {
        Self(INFINITE_SUSTAIN_MS)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn is_infinite(self) -> bool {
        self.0 >= INFINITE_SUSTAIN_MS
    }

    /// The finite tail length, or `None` for the infinite sentinel
    pub fn duration(self) -> Option<Duration> {
        if self.is_infinite() {
            None
        } else {
            Some(Duration::from_millis(self.0))
        }
    }

    /// Move by `steps` slider increments
    pub fn nudged(self, steps: i64) -> Self {
        let ms = self.0 as i64 + steps * SUSTAIN_STEP_MS as i64;
        Self::from_millis(ms.max(0) as u64)
    }

    pub fn label(self) -> String {
        if self.is_infinite() {
            "∞".to_string()
        } else {
            format!("{:.1}s", self.0 as f64 / 1000.0)
        }
    }
}
