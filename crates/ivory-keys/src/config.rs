//! Configuration file support for ivory-keys
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/ivory-keys/config.toml`
//! - macOS: `~/Library/Application Support/ivory-keys/config.toml`
//! - Windows: `%APPDATA%\ivory-keys\config.toml`
//!
//! The config file holds things that are set up once (layout, MIDI routing,
//! colours). Values changed while playing (volume, instrument, envelope, ...)
//! are persisted separately by [`crate::settings`].

use crate::error::{Error, Result};
use crate::input::ReleaseMode;
use crate::keyboard::{KeyMapping, KeyboardConfig, DEFAULT_NOTE_RELEASE_MS, DEFAULT_VELOCITY};
use crate::note::Note;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Keyboard configuration
    pub keyboard: KeyboardSettings,
    /// MIDI configuration
    pub midi: MidiSettings,
    /// UI/Theme configuration
    pub theme: Theme,
}

impl Config {
    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!("Config file not found at {:?}", path)));
        }
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration or return default if not found.
    ///
    /// A file that exists but cannot be parsed is reported and ignored.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::config_path() {
                Ok(path) => path,
                Err(_) => return Self::default(),
            },
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Ignoring config file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "ivory-keys") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Err(Error::Config("Could not determine config directory".to_string()))
        }
    }

    /// Create a default config file with comments
    pub fn create_default_config_file() -> Result<PathBuf> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, DEFAULT_CONFIG)?;
        Ok(path)
    }

    /// Build the key layout described by the keyboard section
    pub fn to_keyboard_config(&self) -> KeyboardConfig {
        let settings = &self.keyboard;
        let preset = match settings.layout {
            KeyboardLayout::Piano => KeyboardConfig::piano_layout(),
            KeyboardLayout::German => KeyboardConfig::german_layout(),
            KeyboardLayout::Us => KeyboardConfig::us_layout(),
            KeyboardLayout::Custom => match settings.custom_mappings {
                Some(ref mappings) if !mappings.is_empty() => KeyboardConfig {
                    mappings: mappings.iter().map(|m| m.to_key_mapping()).collect(),
                    ..KeyboardConfig::piano_layout()
                },
                _ => {
                    log::warn!("Custom layout selected without custom_mappings, using the piano layout");
                    KeyboardConfig::piano_layout()
                }
            },
        };

        KeyboardConfig {
            base_note: settings.base_note.unwrap_or(preset.base_note),
            velocity: settings.velocity.clamp(1, 127),
            channel: settings.channel.min(15),
            note_release_duration: Duration::from_millis(settings.note_release_ms),
            mappings: preset.mappings,
        }
    }
}

const DEFAULT_CONFIG: &str = r#"# ivory-keys configuration file

[keyboard]
# Keyboard layout: "piano", "german", "us", or "custom"
layout = "piano"

# Note played by the layout's first key (defaults to the layout's own)
# base_note = "C2"

# Velocity for every key press (1-127)
velocity = 100

# MIDI channel (0-15)
channel = 0

# How key releases are detected: "auto", "reported" or "timeout"
# With "timeout", a key counts as released after note_release_ms without
# a press or repeat.
key_release = "auto"
note_release_ms = 600

# Custom layout example:
# layout = "custom"
# [[keyboard.custom_mappings]]
# key = "a"
# offset = 0

[midi]
# JACK client name
client_name = "ivory-keys"

# MIDI output port name
port_name = "midi_out"

# Channel for metronome clicks (0-15)
metronome_channel = 1

# Auto-connect to these JACK MIDI inputs (optional)
# auto_connect = ["fluidsynth:midi_00"]

[theme]
white_key_color = "white"
black_key_color = "dark_gray"
pressed_key_color = "cyan"
highlight_color = "yellow"
particle_color = "light_magenta"
border_color = "cyan"

# Show note names on keys
show_note_names = true

# Show keyboard shortcuts help
show_help = true
"#;

/// Keyboard layout preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyboardLayout {
    /// Four rows of white keys, C2 to G6
    #[default]
    Piano,
    /// German QWERTZ two-octave chromatic layout
    German,
    /// US QWERTY two-octave chromatic layout
    Us,
    /// Custom layout (use custom_mappings)
    Custom,
}

impl std::str::FromStr for KeyboardLayout {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "piano" => Ok(Self::Piano),
            "german" | "de" => Ok(Self::German),
            "us" => Ok(Self::Us),
            "custom" => Ok(Self::Custom),
            other => Err(Error::Config(format!("unknown layout {:?}", other))),
        }
    }
}

/// How key releases are detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyReleaseDetection {
    /// Use reported releases when the terminal or OS listener provides them
    #[default]
    Auto,
    /// Always trust reported releases
    Reported,
    /// Always time out keys
    Timeout,
}

/// Keyboard settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyboardSettings {
    /// Keyboard layout preset
    pub layout: KeyboardLayout,
    /// Overrides the layout's base note
    pub base_note: Option<Note>,
    /// Default velocity (1-127)
    pub velocity: u8,
    /// MIDI channel (0-15)
    pub channel: u8,
    /// Key release detection
    pub key_release: KeyReleaseDetection,
    /// Auto-release timeout in milliseconds
    pub note_release_ms: u64,
    /// Custom key mappings (only used when layout = "custom")
    pub custom_mappings: Option<Vec<CustomKeyMapping>>,
}

impl Default for KeyboardSettings {
    fn default() -> Self {
        Self {
            layout: KeyboardLayout::Piano,
            base_note: None,
            velocity: DEFAULT_VELOCITY,
            channel: 0,
            key_release: KeyReleaseDetection::Auto,
            note_release_ms: DEFAULT_NOTE_RELEASE_MS,
            custom_mappings: None,
        }
    }
}

impl KeyboardSettings {
    /// Pick the release mode given whether releases can be reported
    pub fn release_mode(&self, releases_reported: bool) -> ReleaseMode {
        let timeout = ReleaseMode::Synthesized(Duration::from_millis(self.note_release_ms));
        match self.key_release {
            KeyReleaseDetection::Reported => ReleaseMode::Reported,
            KeyReleaseDetection::Timeout => timeout,
            KeyReleaseDetection::Auto if releases_reported => ReleaseMode::Reported,
            KeyReleaseDetection::Auto => timeout,
        }
    }
}

/// Custom key mapping for TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomKeyMapping {
    /// The key character
    pub key: char,
    /// Display character (optional, defaults to uppercase of key)
    pub display: Option<char>,
    /// Semitone offset from the base note
    pub offset: i8,
}

impl CustomKeyMapping {
    /// Convert to KeyMapping
    pub fn to_key_mapping(&self) -> KeyMapping {
        KeyMapping {
            key_char: self.key.to_ascii_lowercase(),
            display_char: self.display.unwrap_or_else(|| self.key.to_ascii_uppercase()),
            note_offset: self.offset,
        }
    }
}

/// MIDI settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiSettings {
    /// JACK client name
    pub client_name: String,
    /// MIDI output port name
    pub port_name: String,
    /// Channel for metronome clicks
    pub metronome_channel: u8,
    /// Auto-connect to these JACK MIDI inputs
    pub auto_connect: Option<Vec<String>>,
}

impl Default for MidiSettings {
    fn default() -> Self {
        Self {
            client_name: "ivory-keys".to_string(),
            port_name: "midi_out".to_string(),
            metronome_channel: 1,
            auto_connect: None,
        }
    }
}

/// Theme/UI settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Theme {
    /// White key color
    pub white_key_color: String,
    /// Black key color
    pub black_key_color: String,
    /// Pressed key color
    pub pressed_key_color: String,
    /// Scale highlight color
    pub highlight_color: String,
    /// Particle color
    pub particle_color: String,
    /// Border color
    pub border_color: String,
    /// Show note names on keys
    pub show_note_names: bool,
    /// Show help text
    pub show_help: bool,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            white_key_color: "white".to_string(),
            black_key_color: "dark_gray".to_string(),
            pressed_key_color: "cyan".to_string(),
            highlight_color: "yellow".to_string(),
            particle_color: "light_magenta".to_string(),
            border_color: "cyan".to_string(),
            show_note_names: true,
            show_help: true,
        }
    }
}

impl Theme {
    /// Parse a color string to ratatui Color
    pub fn parse_color(s: &str) -> ratatui::style::Color {
        use ratatui::style::Color;
        match s.to_lowercase().as_str() {
            "black" => Color::Black,
            "red" => Color::Red,
            "green" => Color::Green,
            "yellow" => Color::Yellow,
            "blue" => Color::Blue,
            "magenta" => Color::Magenta,
            "cyan" => Color::Cyan,
            "gray" | "grey" => Color::Gray,
            "dark_gray" | "dark_grey" | "darkgray" | "darkgrey" => Color::DarkGray,
            "light_red" | "lightred" => Color::LightRed,
            "light_green" | "lightgreen" => Color::LightGreen,
            "light_yellow" | "lightyellow" => Color::LightYellow,
            "light_blue" | "lightblue" => Color::LightBlue,
            "light_magenta" | "lightmagenta" => Color::LightMagenta,
            "light_cyan" | "lightcyan" => Color::LightCyan,
            "white" => Color::White,
            s if s.starts_with('#') && s.len() == 7 => {
                match (
                    u8::from_str_radix(&s[1..3], 16),
                    u8::from_str_radix(&s[3..5], 16),
                    u8::from_str_radix(&s[5..7], 16),
                ) {
                    (Ok(r), Ok(g), Ok(b)) => Color::Rgb(r, g, b),
                    _ => Color::White,
                }
            }
            _ => Color::White,
        }
    }

    pub fn white_key(&self) -> ratatui::style::Color {
        Self::parse_color(&self.white_key_color)
    }

    pub fn black_key(&self) -> ratatui::style::Color {
        Self::parse_color(&self.black_key_color)
    }

    pub fn pressed_key(&self) -> ratatui::style::Color {
        Self::parse_color(&self.pressed_key_color)
    }

    pub fn highlight(&self) -> ratatui::style::Color {
        Self::parse_color(&self.highlight_color)
    }

    pub fn particle(&self) -> ratatui::style::Color {
        Self::parse_color(&self.particle_color)
    }

    pub fn border(&self) -> ratatui::style::Color {
        Self::parse_color(&self.border_color)
    }
}
