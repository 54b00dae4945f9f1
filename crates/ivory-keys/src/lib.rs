//! ivory-keys - Terminal Piano
//!
//! A virtual piano for the terminal that plays a MIDI synthesizer from the
//! computer keyboard and the mouse. Features include:
//!
//! - Note lifecycle control with transpose, sustain pedal and auto-release timers
//! - Input normalization for keys, pointer gestures and focus loss
//! - Piano-style visualization with particles and a two-staff notation strip
//! - Metronome, ADSR envelope editor and scale highlighting
//! - JACK MIDI output
//! - Configurable via TOML file, with UI settings persisted between sessions
//!
//! # Usage as a Library
//!
//! ```no_run
//! use std::rc::Rc;
//! use ivory_keys::{
//!     Clock, Config, EngineBackend, InputEvent, Instrument, KeyboardDisplay, NotationStrip,
//!     NoteController, ReleaseMode, InputNormalizer, SystemClock,
//! };
//!
//! let config = Config::load_or_default(None);
//! let layout = config.to_keyboard_config();
//! let clock: Rc<dyn Clock> = Rc::new(SystemClock);
//!
//! let engine = EngineBackend::Silent.create(Instrument::Synth);
//! let mut controller = NoteController::new(
//!     engine,
//!     KeyboardDisplay::new(clock.clone()),
//!     NotationStrip::new(clock.clone()),
//!     clock.clone(),
//! );
//! let mut input = InputNormalizer::new(layout, ReleaseMode::Reported, clock);
//!
//! input.handle(InputEvent::KeyDown { key: 'q', repeat: false }, &mut controller);
//! input.handle(InputEvent::KeyUp { key: 'q' }, &mut controller);
//! ```

pub mod app;
pub mod clock;
pub mod config;
pub mod controller;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod feedback;
pub mod input;
pub mod keyboard;
pub mod metronome;
pub mod midi;
pub mod note;
pub mod os_keyboard;
pub mod scale;
pub mod settings;
pub mod ui;

// Re-export main types
pub use app::{Action, Piano, PianoOptions};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, KeyboardLayout, Theme};
pub use controller::NoteController;
pub use engine::{EngineBackend, Instrument, SoundEngine};
pub use envelope::{Adsr, SustainDuration};
pub use error::{Error, Result};
pub use feedback::{KeyboardDisplay, NotationSink, NotationStrip, VisualFeedback};
pub use input::{InputEvent, InputNormalizer, ReleaseMode};
pub use keyboard::{KeyMapping, KeyboardConfig, DEFAULT_VELOCITY, ENTER_KEY, SUSTAIN_KEY};
pub use metronome::{Metronome, TimeSignature};
pub use midi::{JackMidiOutput, MidiMessage, MidiOutput};
pub use note::{Note, PitchClass};
pub use scale::{Scale, ScaleKind};
