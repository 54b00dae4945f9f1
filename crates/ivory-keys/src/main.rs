//! ivory-keys - a terminal piano
//!
//! Play a MIDI synthesizer from the computer keyboard and the mouse.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::{
    event::{
        self, DisableFocusChange, DisableMouseCapture, EnableFocusChange, EnableMouseCapture, Event, KeyCode,
        KeyEvent, KeyEventKind, KeyModifiers, KeyboardEnhancementFlags, MouseButton, MouseEvent, MouseEventKind,
        PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;
use std::io::{self, stdout};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use ivory_keys::{
    app::{Piano, PianoOptions},
    clock::{Clock, SystemClock},
    config::{Config, KeyboardLayout},
    engine::EngineBackend,
    input::InputEvent,
    keyboard::ENTER_KEY,
    metronome::MetronomeClicker,
    midi::{is_jack_running, list_jack_midi_ports, JackMidiOutput, MidiOutput},
    os_keyboard::{OsKeyEvent, OsKeyboardListener},
    settings::Settings,
    ui::{self, InputStatus, KeyboardGeometry, Screen},
};

#[derive(Parser)]
#[command(name = "ivory-keys")]
#[command(author, version, about = "Terminal piano for JACK MIDI synthesizers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path (default: ~/.config/ivory-keys/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keyboard layout: piano, german, us or custom
    #[arg(long)]
    layout: Option<KeyboardLayout>,

    /// JACK client name
    #[arg(long)]
    client_name: Option<String>,

    /// MIDI channel (0-15)
    #[arg(long)]
    channel: Option<u8>,

    /// Read keys from the terminal only, even when OS-level input is available
    #[arg(long)]
    no_os_keyboard: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a default configuration file
    Init,
    /// Show the configuration file path
    ConfigPath,
    /// List available JACK MIDI ports
    ListPorts,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init) => {
            let path = Config::create_default_config_file()?;
            println!("Created default config at: {}", path.display());
            return Ok(());
        }
        Some(Commands::ConfigPath) => {
            let path = Config::config_path()?;
            println!("{}", path.display());
            return Ok(());
        }
        Some(Commands::ListPorts) => {
            if !is_jack_running() {
                println!("JACK is not running");
                return Ok(());
            }
            let ports = list_jack_midi_ports();
            if ports.is_empty() {
                println!("No JACK MIDI input ports found");
            } else {
                println!("Available JACK MIDI input ports:");
                for port in ports {
                    println!("  {}", port);
                }
            }
            return Ok(());
        }
        None => {}
    }

    // Load config; an explicitly named file must exist and parse
    let mut config = match cli.config {
        Some(ref path) => Config::load_from(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::load_or_default(None),
    };

    // Apply CLI overrides
    if let Some(layout) = cli.layout {
        config.keyboard.layout = layout;
    }
    if let Some(channel) = cli.channel {
        config.keyboard.channel = channel.min(15);
    }
    if let Some(name) = cli.client_name {
        config.midi.client_name = name;
    }

    run_tui(config, !cli.no_os_keyboard)
}

fn run_tui(config: Config, allow_os_keyboard: bool) -> Result<()> {
    let clock: Rc<dyn Clock> = Rc::new(SystemClock);

    // Create MIDI output
    let midi_output: Option<Rc<dyn MidiOutput>> = if is_jack_running() {
        match JackMidiOutput::from_settings(&config.midi) {
            Ok(output) => {
                log::info!("JACK MIDI output created: {}", output.port_name());
                Some(Rc::new(output))
            }
            Err(e) => {
                log::warn!("Failed to create JACK MIDI output: {}", e);
                None
            }
        }
    } else {
        log::warn!("JACK is not running, MIDI output disabled");
        None
    };

    let keyboard_config = config.to_keyboard_config();
    let backend = match &midi_output {
        Some(output) => EngineBackend::Midi {
            output: output.clone(),
            channel: keyboard_config.channel,
            velocity: keyboard_config.velocity,
        },
        None => EngineBackend::Silent,
    };
    let clicker = midi_output.as_ref().and_then(|output| {
        MetronomeClicker::new(output.clone(), config.midi.metronome_channel)
            .map_err(|e| log::warn!("Metronome clicks disabled: {}", e))
            .ok()
    });

    // Create OS keyboard listener
    let os_keyboard = if allow_os_keyboard {
        OsKeyboardListener::new(config.keyboard.layout)
    } else {
        None
    };

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen, EnableFocusChange, EnableMouseCapture)?;
    let enhanced = supports_keyboard_enhancement().unwrap_or(false);
    if enhanced {
        execute!(
            stdout,
            PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::REPORT_EVENT_TYPES | KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
            )
        )?;
    }
    let backend_term = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend_term)?;

    let release_mode = config.keyboard.release_mode(enhanced || os_keyboard.is_some());
    log::info!("Key release mode: {:?}", release_mode);

    let mut piano = Piano::new(PianoOptions {
        layout: keyboard_config,
        release_mode,
        backend,
        clicker,
        settings: Settings::open_default(clock.clone()),
        clock,
    });

    // Main loop
    let result = run_event_loop(&mut terminal, &mut piano, os_keyboard.as_ref(), &config);

    piano.shutdown();

    // Cleanup
    if enhanced {
        execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags)?;
    }
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableFocusChange, DisableMouseCapture)?;

    result
}

fn run_event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    piano: &mut Piano,
    os_keyboard: Option<&OsKeyboardListener>,
    config: &Config,
) -> Result<()> {
    let mut has_focus = true;
    let mut mouse_down = false;

    loop {
        let mut geometry = KeyboardGeometry::default();
        terminal.draw(|frame| {
            let status = InputStatus {
                os_keyboard_active: os_keyboard.is_some(),
                has_focus,
            };
            ui::render(frame, piano, &config.theme, status);
            let screen = Screen::split(frame.area());
            geometry = KeyboardGeometry::new(&piano.layout().display_notes(), screen.keys());
        })?;

        // Process OS keyboard events only when focused
        if let Some(os_kb) = os_keyboard {
            if has_focus {
                while let Some(event) = os_kb.try_recv() {
                    piano.handle_input(match event {
                        OsKeyEvent::Press(key) => InputEvent::KeyDown { key, repeat: false },
                        OsKeyEvent::Release(key) => InputEvent::KeyUp { key },
                    });
                }
            } else {
                os_kb.drain();
            }
        }

        piano.tick();

        // Poll for terminal events (~60 Hz)
        if !event::poll(Duration::from_millis(16))? {
            continue;
        }
        match event::read()? {
            Event::FocusGained => {
                has_focus = true;
            }
            Event::FocusLost => {
                has_focus = false;
                mouse_down = false;
                piano.handle_input(InputEvent::Blur);
            }
            Event::Key(key) => {
                has_focus = true;
                if handle_key(piano, key, os_keyboard.is_some()) {
                    return Ok(());
                }
            }
            Event::Mouse(mouse) => handle_mouse(piano, mouse, &geometry, &mut mouse_down),
            _ => {}
        }
    }
}

/// Returns true when the user asked to quit
fn handle_key(piano: &mut Piano, key: KeyEvent, os_keyboard_active: bool) -> bool {
    match key.code {
        KeyCode::Esc if key.kind != KeyEventKind::Release => return true,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return true,
        // Note keys come from the OS listener when it runs
        KeyCode::Char(c) if !os_keyboard_active => piano.handle_input(note_key_event(c, key.kind)),
        KeyCode::Enter if !os_keyboard_active => piano.handle_input(note_key_event(ENTER_KEY, key.kind)),
        KeyCode::Char(_) | KeyCode::Enter => {}
        code if key.kind != KeyEventKind::Release => {
            if let Some(action) = ui::action_for_key(code) {
                piano.apply(action);
            }
        }
        _ => {}
    }
    false
}

fn note_key_event(key: char, kind: KeyEventKind) -> InputEvent {
    match kind {
        KeyEventKind::Press => InputEvent::KeyDown { key, repeat: false },
        KeyEventKind::Repeat => InputEvent::KeyDown { key, repeat: true },
        KeyEventKind::Release => InputEvent::KeyUp { key },
    }
}

fn handle_mouse(piano: &mut Piano, mouse: MouseEvent, geometry: &KeyboardGeometry, mouse_down: &mut bool) {
    let note = geometry.note_at(mouse.column, mouse.row);
    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) => {
            *mouse_down = true;
            if let Some(note) = note {
                piano.handle_input(InputEvent::PointerDown { note });
            }
        }
        MouseEventKind::Drag(MouseButton::Left) => piano.pointer_moved(note, true),
        MouseEventKind::Moved => piano.pointer_moved(note, false),
        MouseEventKind::Up(MouseButton::Left) => {
            *mouse_down = false;
            match note {
                Some(note) => {
                    piano.pointer_moved(Some(note), true);
                    piano.handle_input(InputEvent::PointerUp { note });
                }
                None => piano.handle_input(InputEvent::PointerCancel),
            }
        }
        _ => {}
    }
}
