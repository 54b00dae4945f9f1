//! Error types for ivory-keys

use thiserror::Error;

/// Result type alias for ivory-keys operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ivory-keys
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A note name could not be parsed
    #[error("Invalid note name: {0:?}")]
    InvalidNote(String),

    /// The sound engine rejected a call
    #[error("Sound engine error: {0}")]
    Engine(String),

    /// Settings could not be read or written
    #[error("Settings storage error: {0}")]
    Storage(String),

    /// MIDI backend error
    #[error("MIDI error: {0}")]
    Midi(String),

    /// JACK connection error
    #[error("JACK error: {0}")]
    Jack(#[from] jack::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// JSON (settings) error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
