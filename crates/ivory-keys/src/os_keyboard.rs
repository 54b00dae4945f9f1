//! OS-level keyboard input using rdev
//!
//! Terminals rarely report key releases, so when a display server is
//! available the piano listens to the OS directly. The listener runs on its
//! own thread and forwards note-relevant key events over a channel; the
//! terminal still handles control keys.

use crate::config::KeyboardLayout;
use crate::keyboard::ENTER_KEY;
use crossbeam_channel::{unbounded, Receiver, Sender};
use rdev::{listen, Event, EventType, Key};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Keyboard events from the OS-level listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsKeyEvent {
    /// A key was pressed (the OS repeats this while the key is held)
    Press(char),
    /// A key was released
    Release(char),
}

/// OS-level keyboard listener that captures key press and release events
pub struct OsKeyboardListener {
    event_rx: Receiver<OsKeyEvent>,
    shutdown: Arc<AtomicBool>,
    _thread: JoinHandle<()>,
}

impl OsKeyboardListener {
    /// Start the OS keyboard listener
    ///
    /// Returns None if the listener couldn't be started (e.g., on systems without X11)
    pub fn new(layout: KeyboardLayout) -> Option<Self> {
        if !is_available() {
            return None;
        }

        let (tx, rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let thread = thread::Builder::new()
            .name("os-keyboard".to_string())
            .spawn(move || run_listener(tx, shutdown_clone, layout))
            .map_err(|e| log::warn!("Cannot start OS keyboard listener: {}", e))
            .ok()?;

        // Give the thread a moment to start
        thread::sleep(std::time::Duration::from_millis(100));

        Some(Self {
            event_rx: rx,
            shutdown,
            _thread: thread,
        })
    }

    /// Try to receive a keyboard event (non-blocking)
    pub fn try_recv(&self) -> Option<OsKeyEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Drop every queued event
    pub fn drain(&self) {
        while self.event_rx.try_recv().is_ok() {}
    }
}

impl Drop for OsKeyboardListener {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// Map an rdev key to the layout character it produces
///
/// rdev reports physical key positions, named after US QWERTY. The German
/// layout swaps Y/Z and has `-` where US has `/`.
pub fn key_to_char(key: Key, layout: KeyboardLayout) -> Option<char> {
    match layout {
        KeyboardLayout::German => key_to_char_german(key),
        KeyboardLayout::Piano | KeyboardLayout::Us | KeyboardLayout::Custom => key_to_char_us(key),
    }
}

/// Map rdev Key to character using German QWERTZ layout
pub fn key_to_char_german(key: Key) -> Option<char> {
    match key {
        // KeyZ = physical Z position on US = German Y key on bottom row
        Key::KeyZ => Some('y'),
        // KeyY = physical Y position on US = German Z key on QWERTY row
        Key::KeyY => Some('z'),
        Key::Slash => Some('-'),
        Key::Minus | Key::Equal | Key::SemiColon | Key::Quote | Key::LeftBracket | Key::RightBracket => None,
        Key::BackSlash => None,
        other => key_to_char_us(other),
    }
}

/// Map rdev Key to character using US QWERTY layout
pub fn key_to_char_us(key: Key) -> Option<char> {
    let c = match key {
        Key::KeyA => 'a',
        Key::KeyB => 'b',
        Key::KeyC => 'c',
        Key::KeyD => 'd',
        Key::KeyE => 'e',
        Key::KeyF => 'f',
        Key::KeyG => 'g',
        Key::KeyH => 'h',
        Key::KeyI => 'i',
        Key::KeyJ => 'j',
        Key::KeyK => 'k',
        Key::KeyL => 'l',
        Key::KeyM => 'm',
        Key::KeyN => 'n',
        Key::KeyO => 'o',
        Key::KeyP => 'p',
        Key::KeyQ => 'q',
        Key::KeyR => 'r',
        Key::KeyS => 's',
        Key::KeyT => 't',
        Key::KeyU => 'u',
        Key::KeyV => 'v',
        Key::KeyW => 'w',
        Key::KeyX => 'x',
        Key::KeyY => 'y',
        Key::KeyZ => 'z',
        Key::Num1 => '1',
        Key::Num2 => '2',
        Key::Num3 => '3',
        Key::Num4 => '4',
        Key::Num5 => '5',
        Key::Num6 => '6',
        Key::Num7 => '7',
        Key::Num8 => '8',
        Key::Num9 => '9',
        Key::Num0 => '0',
        Key::Minus => '-',
        Key::Equal => '=',
        Key::LeftBracket => '[',
        Key::RightBracket => ']',
        Key::BackSlash => '\\',
        Key::SemiColon => ';',
        Key::Quote => '\'',
        Key::Comma => ',',
        Key::Dot => '.',
        Key::Slash => '/',
        Key::Return => ENTER_KEY,
        // Sustain pedal
        Key::Space => ' ',
        _ => return None,
    };
    Some(c)
}

fn run_listener(tx: Sender<OsKeyEvent>, shutdown: Arc<AtomicBool>, layout: KeyboardLayout) {
    let callback = move |event: Event| {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }

        let event = match event.event_type {
            EventType::KeyPress(key) => key_to_char(key, layout).map(OsKeyEvent::Press),
            EventType::KeyRelease(key) => key_to_char(key, layout).map(OsKeyEvent::Release),
            _ => None,
        };
        if let Some(event) = event {
            let _ = tx.send(event);
        }
    };

    // This blocks until an error occurs
    if let Err(e) = listen(callback) {
        log::error!("OS keyboard listener error: {:?}", e);
    }
}

/// Check if the OS keyboard listener is likely to work on this system
pub fn is_available() -> bool {
    // On Linux, rdev requires X11 or Wayland
    #[cfg(target_os = "linux")]
    {
        std::env::var("DISPLAY").is_ok() || std::env::var("WAYLAND_DISPLAY").is_ok()
    }

    #[cfg(not(target_os = "linux"))]
    {
        true
    }
}
