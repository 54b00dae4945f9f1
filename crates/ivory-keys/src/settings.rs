//! Persisted user settings
//!
//! Settings live in a small key-value store of JSON values, one entry per
//! control (volume, instrument, envelope, ...). Storage problems are never
//! fatal: a failed read falls back to the default and a failed write is
//! logged and otherwise ignored, so the session keeps running in memory.

use crate::clock::Clock;
use crate::error::{Error, Result};
use directories::ProjectDirs;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Storage keys
pub mod keys {
    pub const VOLUME: &str = "piano_volume";
    pub const SOUND: &str = "piano_sound";
    pub const BPM: &str = "metronome_bpm";
    pub const METRONOME_VOLUME: &str = "metronome_volume";
    pub const TIME_SIGNATURE: &str = "time_signature";
    pub const ADSR: &str = "piano_adsr";
    pub const SUSTAIN_DURATION: &str = "piano_sustain_duration";
    pub const SCALE: &str = "piano_scale";
    pub const TRANSPOSE: &str = "piano_transpose";
    pub const SHEET_VISIBLE: &str = "sheet_visible";
    pub const METRONOME_VISIBLE: &str = "metronome_visible";
    pub const ADSR_VISIBLE: &str = "adsr_visible";
    pub const SCALE_VISIBLE: &str = "scale_visible";
}

/// Delay before a slider-like change is written
pub const SAVE_DEBOUNCE: Duration = Duration::from_millis(300);

const SETTINGS_FILE: &str = "settings.json";

/// A string-keyed store of JSON values
pub trait SettingsStore {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&mut self, key: &str, value: Value) -> Result<()>;
}

/// Settings kept only for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: HashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Settings stored as one JSON object in a file
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<Value>(&data)? {
                Value::Object(map) => map,
                _ => {
                    return Err(Error::Storage(format!(
                        "{} does not contain a JSON object",
                        path.display()
                    )))
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, values })
    }

    /// Default location in the platform data directory
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ivory-keys").map(|dirs| dirs.data_dir().join(SETTINGS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.values.insert(key.to_string(), value);
        self.write()
    }
}

/// Typed, failure-tolerant access to a [`SettingsStore`], with debounced writes
pub struct Settings {
    store: Box<dyn SettingsStore>,
    clock: Rc<dyn Clock>,
    pending: HashMap<&'static str, (Value, Instant)>,
}

impl Settings {
    pub fn new(store: Box<dyn SettingsStore>, clock: Rc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            pending: HashMap::new(),
        }
    }

    /// File-backed settings at the default path, or in-memory ones if the
    /// file cannot be used.
    pub fn open_default(clock: Rc<dyn Clock>) -> Self {
        let store: Box<dyn SettingsStore> = match JsonFileStore::default_path() {
            Some(path) => match JsonFileStore::open(&path) {
                Ok(store) => {
                    log::info!("Settings file: {}", path.display());
                    Box::new(store)
                }
                Err(e) => {
                    log::warn!("Cannot open settings at {}: {}. Settings will not persist.", path.display(), e);
                    Box::new(MemoryStore::new())
                }
            },
            None => {
                log::warn!("No data directory available. Settings will not persist.");
                Box::new(MemoryStore::new())
            }
        };
        Self::new(store, clock)
    }

    /// Read a setting, falling back to `default` when it is missing or unreadable
    pub fn load<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.store.get(key) {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(parsed) => parsed,
                Err(e) => {
                    log::warn!("Invalid value for setting {:?} ({}). Using default value.", key, e);
                    default
                }
            },
            Ok(None) => default,
            Err(e) => {
                log::warn!("Cannot read setting {:?}: {}. Using default value.", key, e);
                default
            }
        }
    }

    /// Write a setting now. Cancels any pending debounced write of the same key.
    pub fn save<T: Serialize>(&mut self, key: &'static str, value: &T) {
        self.pending.remove(key);
        match serde_json::to_value(value) {
            Ok(value) => self.write(key, value),
            Err(e) => log::warn!("Cannot encode setting {:?}: {}", key, e),
        }
    }

    /// Write a setting once it has stopped changing for [`SAVE_DEBOUNCE`]
    pub fn save_debounced<T: Serialize>(&mut self, key: &'static str, value: &T) {
        match serde_json::to_value(value) {
            Ok(value) => {
                let deadline = self.clock.now() + SAVE_DEBOUNCE;
                self.pending.insert(key, (value, deadline));
            }
            Err(e) => log::warn!("Cannot encode setting {:?}: {}", key, e),
        }
    }

    /// Write debounced settings whose delay has passed. Returns how many.
    pub fn flush_due(&mut self) -> usize {
        let now = self.clock.now();
        let mut due: Vec<&'static str> = self
            .pending
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(key, _)| *key)
            .collect();
        due.sort();
        for key in &due {
            if let Some((value, _)) = self.pending.remove(key) {
                self.write(key, value);
            }
        }
        due.len()
    }

    /// Write every pending setting (on exit)
    pub fn flush_all(&mut self) {
        let mut pending: Vec<_> = self.pending.drain().collect();
        pending.sort_by_key(|(key, _)| *key);
        for (key, (value, _)) in pending {
            self.write(key, value);
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn write(&mut self, key: &str, value: Value) {
        log::trace!("saving setting {} = {}", key, value);
        if let Err(e) = self.store.set(key, value) {
            log::warn!("Cannot save setting {:?}: {}", key, e);
        }
    }
}
