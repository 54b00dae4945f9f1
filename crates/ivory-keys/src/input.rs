//! Input event normalization
//!
//! Keyboard keys, the mouse and window focus all arrive as [`InputEvent`]s.
//! The normalizer turns them into press/lift calls on the controller:
//! key-repeat is suppressed, dragging across keys plays each key in turn,
//! and losing focus silences everything.
//!
//! Some terminals never report key releases. In [`ReleaseMode::Synthesized`]
//! a key counts as released once it has not been seen (press or repeat) for
//! the configured timeout.

use crate::clock::Clock;
use crate::controller::NoteController;
use crate::feedback::{NotationSink, VisualFeedback};
use crate::keyboard::{KeyboardConfig, SUSTAIN_KEY};
use crate::note::Note;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// A raw input event
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// A computer key went down (`repeat` is set for auto-repeat)
    KeyDown { key: char, repeat: bool },
    /// A computer key came up
    KeyUp { key: char },
    /// Mouse button pressed over a piano key
    PointerDown { note: Note },
    /// Mouse button released over a piano key
    PointerUp { note: Note },
    /// Pointer moved onto a piano key
    PointerEnter { note: Note, button_down: bool },
    /// Pointer moved off a piano key
    PointerLeave { note: Note },
    /// Mouse button released away from any key
    PointerCancel,
    /// The window lost focus
    Blur,
}

/// How key releases are learned about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    /// The terminal/OS reports key-up events
    Reported,
    /// Key-ups are inferred after a period without presses or repeats
    Synthesized(Duration),
}

#[derive(Debug, Clone, Copy)]
struct PressedKey {
    /// `None` for the sustain key
    note: Option<Note>,
    last_seen: Instant,
}

/// Turns raw input into controller calls
pub struct InputNormalizer {
    layout: KeyboardConfig,
    mode: ReleaseMode,
    clock: Rc<dyn Clock>,
    pressed_keys: HashMap<char, PressedKey>,
    pointer_button: bool,
    hovered: Option<Note>,
}

impl InputNormalizer {
    pub fn new(layout: KeyboardConfig, mode: ReleaseMode, clock: Rc<dyn Clock>) -> Self {
        Self {
            layout,
            mode,
            clock,
            pressed_keys: HashMap::new(),
            pointer_button: false,
            hovered: None,
        }
    }

    pub fn layout(&self) -> &KeyboardConfig {
        &self.layout
    }

    pub fn release_mode(&self) -> ReleaseMode {
        self.mode
    }

    /// Whether the mouse button is currently down
    pub fn pointer_button(&self) -> bool {
        self.pointer_button
    }

    /// Apply one event to the controller
    pub fn handle<V: VisualFeedback, N: NotationSink>(
        &mut self,
        event: InputEvent,
        controller: &mut NoteController<V, N>,
    ) {
        log::trace!("input {:?}", event);
        match event {
            InputEvent::KeyDown { key, repeat } => self.key_down(key, repeat, controller),
            InputEvent::KeyUp { key } => self.key_up(key, controller),
            InputEvent::PointerDown { note } => {
                self.pointer_button = true;
                self.hovered = Some(note);
                controller.press(note);
            }
            InputEvent::PointerUp { note } => {
                self.pointer_button = false;
                self.hovered = Some(note);
                controller.lift(note);
            }
            InputEvent::PointerEnter { note, button_down } => {
                self.pointer_button = button_down;
                self.hovered = Some(note);
                if button_down && !controller.is_active(note) {
                    controller.press(note);
                }
            }
            InputEvent::PointerLeave { note } => {
                if self.hovered == Some(note) {
                    self.hovered = None;
                }
                if self.pointer_button && controller.is_active(note) {
                    controller.lift(note);
                }
            }
            InputEvent::PointerCancel => {
                self.pointer_button = false;
                if let Some(note) = self.hovered.take() {
                    controller.lift(note);
                }
            }
            InputEvent::Blur => {
                self.pressed_keys.clear();
                self.pointer_button = false;
                self.hovered = None;
                controller.force_release_all();
                controller.set_pedal(false);
            }
        }
    }

    /// Feed a pointer position (the key under it, if any).
    ///
    /// Emits leave/enter pairs when the pointer crosses from one key to
    /// another, which is how a drag across the keyboard plays each key.
    pub fn pointer_moved<V: VisualFeedback, N: NotationSink>(
        &mut self,
        note: Option<Note>,
        button_down: bool,
        controller: &mut NoteController<V, N>,
    ) {
        self.pointer_button = button_down;
        if note == self.hovered {
            return;
        }
        if let Some(previous) = self.hovered {
            self.handle(InputEvent::PointerLeave { note: previous }, controller);
        }
        match note {
            Some(note) => self.handle(InputEvent::PointerEnter { note, button_down }, controller),
            None => self.hovered = None,
        }
    }

    /// Lift keys that have gone quiet (synthesized release mode only).
    ///
    /// Returns the keys that were lifted.
    pub fn expire_keys<V: VisualFeedback, N: NotationSink>(
        &mut self,
        controller: &mut NoteController<V, N>,
    ) -> Vec<char> {
        let ReleaseMode::Synthesized(timeout) = self.mode else {
            return Vec::new();
        };
        let now = self.clock.now();
        let mut expired: Vec<char> = self
            .pressed_keys
            .iter()
            .filter(|(_, pressed)| now.saturating_duration_since(pressed.last_seen) > timeout)
            .map(|(key, _)| *key)
            .collect();
        expired.sort();
        for key in &expired {
            self.key_up(*key, controller);
        }
        expired
    }

    fn key_down<V: VisualFeedback, N: NotationSink>(
        &mut self,
        key: char,
        repeat: bool,
        controller: &mut NoteController<V, N>,
    ) {
        let key = key.to_ascii_lowercase();
        let now = self.clock.now();

        if let Some(pressed) = self.pressed_keys.get_mut(&key) {
            // Key repeat: keep it alive, never re-attack
            pressed.last_seen = now;
            return;
        }
        if repeat {
            // A repeat for a key we never saw go down (e.g. held across a blur)
            return;
        }

        if key == SUSTAIN_KEY {
            self.pressed_keys.insert(key, PressedKey { note: None, last_seen: now });
            controller.set_pedal(true);
            return;
        }

        let Some(note) = self.layout.note_for_char(key) else {
            return;
        };
        self.pressed_keys.insert(key, PressedKey { note: Some(note), last_seen: now });
        controller.press(note);
    }

    fn key_up<V: VisualFeedback, N: NotationSink>(&mut self, key: char, controller: &mut NoteController<V, N>) {
        let key = key.to_ascii_lowercase();
        let tracked = self.pressed_keys.remove(&key);

        if key == SUSTAIN_KEY {
            controller.set_pedal(false);
            return;
        }

        let note = match tracked {
            Some(PressedKey { note: Some(note), .. }) => note,
            _ => match self.layout.note_for_char(key) {
                Some(note) => note,
                None => return,
            },
        };
        controller.lift(note);
    }
}
