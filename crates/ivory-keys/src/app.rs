//! Piano session
//!
//! [`Piano`] ties the note controller, the input normalizer and the side
//! features (metronome, scale highlighting, envelope, panels) together and
//! keeps the persisted settings in step with every control change. The
//! terminal front end feeds it input events and control [`Action`]s and
//! calls [`Piano::tick`] once per frame.

use crate::clock::Clock;
use crate::controller::NoteController;
use crate::engine::{EngineBackend, Instrument, DEFAULT_VOLUME_DB};
use crate::envelope::{Adsr, AdsrField, SustainDuration};
use crate::feedback::{KeyboardDisplay, NotationStrip};
use crate::input::{InputEvent, InputNormalizer, ReleaseMode};
use crate::keyboard::KeyboardConfig;
use crate::metronome::{Click, Metronome, MetronomeClicker, TimeSignature, DEFAULT_BPM, DEFAULT_CLICK_VOLUME_DB};
use crate::note::Note;
use crate::scale::Scale;
use crate::settings::{keys, Settings};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// The controller type the piano runs
pub type PianoController = NoteController<KeyboardDisplay, NotationStrip>;

/// How long a status notice stays on screen
const NOTICE_DURATION: Duration = Duration::from_secs(2);

/// Side panels that can be shown or hidden
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Sheet,
    Metronome,
    Envelope,
    Scale,
}

impl Panel {
    fn storage_key(self) -> &'static str {
        match self {
            Panel::Sheet => keys::SHEET_VISIBLE,
            Panel::Metronome => keys::METRONOME_VISIBLE,
            Panel::Envelope => keys::ADSR_VISIBLE,
            Panel::Scale => keys::SCALE_VISIBLE,
        }
    }
}

/// Panel visibility, all hidden by default
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Panels {
    pub sheet: bool,
    pub metronome: bool,
    pub envelope: bool,
    pub scale: bool,
}

impl Panels {
    pub fn is_visible(&self, panel: Panel) -> bool {
        match panel {
            Panel::Sheet => self.sheet,
            Panel::Metronome => self.metronome,
            Panel::Envelope => self.envelope,
            Panel::Scale => self.scale,
        }
    }

    fn toggle(&mut self, panel: Panel) -> bool {
        let flag = match panel {
            Panel::Sheet => &mut self.sheet,
            Panel::Metronome => &mut self.metronome,
            Panel::Envelope => &mut self.envelope,
            Panel::Scale => &mut self.scale,
        };
        *flag = !*flag;
        *flag
    }
}

/// A control change requested by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    VolumeUp,
    VolumeDown,
    TransposeUp,
    TransposeDown,
    NextInstrument,
    PrevInstrument,
    ToggleMetronome,
    BpmUp,
    BpmDown,
    NextTimeSignature,
    MetronomeVolumeUp,
    MetronomeVolumeDown,
    NextEnvelopeField,
    EnvelopeUp,
    EnvelopeDown,
    ResetEnvelope,
    SustainLonger,
    SustainShorter,
    NextScaleRoot,
    NextScaleKind,
    ClearNotation,
    TogglePanel(Panel),
}

/// Everything needed to start a session
pub struct PianoOptions {
    pub layout: KeyboardConfig,
    pub release_mode: ReleaseMode,
    pub backend: EngineBackend,
    pub clicker: Option<MetronomeClicker>,
    pub settings: Settings,
    pub clock: Rc<dyn Clock>,
}

/// A playing session
pub struct Piano {
    controller: PianoController,
    input: InputNormalizer,
    backend: EngineBackend,
    instrument: Instrument,
    metronome: Metronome,
    clicker: Option<MetronomeClicker>,
    scale: Scale,
    panels: Panels,
    selected_field: AdsrField,
    settings: Settings,
    clock: Rc<dyn Clock>,
    notice: Option<(String, Instant)>,
}

impl Piano {
    /// Start a session, restoring persisted settings
    pub fn new(options: PianoOptions) -> Self {
        let PianoOptions {
            layout,
            release_mode,
            backend,
            clicker,
            settings,
            clock,
        } = options;

        let instrument: Instrument = settings.load(keys::SOUND, Instrument::default());
        let controller = NoteController::new(
            backend.create(instrument),
            KeyboardDisplay::new(clock.clone()),
            NotationStrip::new(clock.clone()),
            clock.clone(),
        );
        let input = InputNormalizer::new(layout, release_mode, clock.clone());

        let signature = settings
            .load::<String>(keys::TIME_SIGNATURE, TimeSignature::default().to_string())
            .parse()
            .unwrap_or_else(|e| {
                log::warn!("{}. Using 4/4.", e);
                TimeSignature::default()
            });
        let mut metronome = Metronome::new(settings.load(keys::BPM, DEFAULT_BPM), signature);
        metronome.set_volume_db(settings.load(keys::METRONOME_VOLUME, DEFAULT_CLICK_VOLUME_DB));

        let panels = Panels {
            sheet: settings.load(keys::SHEET_VISIBLE, false),
            metronome: settings.load(keys::METRONOME_VISIBLE, false),
            envelope: settings.load(keys::ADSR_VISIBLE, false),
            scale: settings.load(keys::SCALE_VISIBLE, false),
        };

        let mut piano = Self {
            controller,
            input,
            backend,
            instrument,
            metronome,
            clicker,
            scale: Scale::default(),
            panels,
            selected_field: AdsrField::Attack,
            settings,
            clock,
            notice: None,
        };
        piano.restore_sound_settings();
        piano
    }

    fn restore_sound_settings(&mut self) {
        let envelope: Adsr = self.settings.load(keys::ADSR, Adsr::default());
        self.controller.set_envelope(envelope);

        let sustain: SustainDuration = self.settings.load(keys::SUSTAIN_DURATION, SustainDuration::default());
        self.controller
            .set_sustain_duration(SustainDuration::from_millis(sustain.as_millis()));

        self.controller.set_volume(self.settings.load(keys::VOLUME, DEFAULT_VOLUME_DB));
        self.controller.set_transpose(self.settings.load(keys::TRANSPOSE, 0));

        if let Some(clicker) = &self.clicker {
            if let Err(e) = clicker.set_volume(self.metronome.volume_db()) {
                log::error!("Error setting metronome volume: {}", e);
            }
        }

        self.scale = self.settings.load(keys::SCALE, Scale::default());
        self.apply_scale();

        log::info!(
            "Restored settings: {} at {} dB, transpose {:+}",
            self.instrument.name(),
            self.controller.volume_db(),
            self.controller.transpose()
        );
    }

    /// Feed one input event through the normalizer
    pub fn handle_input(&mut self, event: InputEvent) {
        self.input.handle(event, &mut self.controller);
    }

    /// Feed a pointer position (see [`InputNormalizer::pointer_moved`])
    pub fn pointer_moved(&mut self, note: Option<Note>, button_down: bool) {
        self.input.pointer_moved(note, button_down, &mut self.controller);
    }

    /// Run everything that is driven by time: sustain tails, synthesized
    /// key releases, particle streams, metronome clicks and debounced saves.
    pub fn tick(&mut self) {
        let released = self.controller.poll_timers();
        if !released.is_empty() {
            log::trace!("sustain tails ended: {:?}", released);
        }
        self.input.expire_keys(&mut self.controller);
        self.controller.visual_mut().pulse_streams();

        if let Some(click) = self.metronome.poll(self.clock.now()) {
            self.play_click(click);
        }

        self.settings.flush_due();
    }

    /// Apply a control action
    pub fn apply(&mut self, action: Action) {
        match action {
            Action::VolumeUp | Action::VolumeDown => {
                let delta = if action == Action::VolumeUp { 1.0 } else { -1.0 };
                self.controller.set_volume(self.controller.volume_db() + delta);
                let db = self.controller.volume_db();
                self.settings.save_debounced(keys::VOLUME, &db);
                self.notify(format!("Volume {} dB", db));
            }
            Action::TransposeUp | Action::TransposeDown => {
                let delta = if action == Action::TransposeUp { 1 } else { -1 };
                self.controller.set_transpose(self.controller.transpose() + delta);
                let transpose = self.controller.transpose();
                self.settings.save(keys::TRANSPOSE, &transpose);
                self.notify(format!("Transpose {:+}", transpose));
            }
            Action::NextInstrument => self.set_instrument(self.instrument.next()),
            Action::PrevInstrument => self.set_instrument(self.instrument.prev()),
            Action::ToggleMetronome => {
                if self.metronome.is_running() {
                    self.metronome.stop();
                    if let Some(clicker) = &mut self.clicker {
                        if let Err(e) = clicker.silence() {
                            log::error!("Error stopping metronome click: {}", e);
                        }
                    }
                } else if let Some(click) = self.metronome.start(self.clock.now()) {
                    self.play_click(click);
                }
            }
            Action::BpmUp | Action::BpmDown => {
                self.metronome.nudge_bpm(if action == Action::BpmUp { 5 } else { -5 });
                let bpm = self.metronome.bpm();
                self.settings.save_debounced(keys::BPM, &bpm);
                self.notify(format!("{} BPM", bpm));
            }
            Action::NextTimeSignature => {
                let signature = self.metronome.signature().next();
                self.metronome.set_signature(signature);
                self.settings.save(keys::TIME_SIGNATURE, &signature);
                self.notify(format!("Time signature {}", signature));
            }
            Action::MetronomeVolumeUp | Action::MetronomeVolumeDown => {
                let delta = if action == Action::MetronomeVolumeUp { 1.0 } else { -1.0 };
                self.metronome.set_volume_db(self.metronome.volume_db() + delta);
                let db = self.metronome.volume_db();
                if let Some(clicker) = &self.clicker {
                    if let Err(e) = clicker.set_volume(db) {
                        log::error!("Error setting metronome volume: {}", e);
                    }
                }
                self.settings.save_debounced(keys::METRONOME_VOLUME, &db);
                self.notify(format!("Metronome {} dB", db));
            }
            Action::NextEnvelopeField => {
                let i = AdsrField::ALL.iter().position(|f| *f == self.selected_field).unwrap_or(0);
                self.selected_field = AdsrField::ALL[(i + 1) % AdsrField::ALL.len()];
            }
            Action::EnvelopeUp | Action::EnvelopeDown => {
                let mut envelope = self.controller.envelope();
                envelope.nudge(self.selected_field, if action == Action::EnvelopeUp { 1 } else { -1 });
                self.set_envelope(envelope);
            }
            Action::ResetEnvelope => self.set_envelope(Adsr::default()),
            Action::SustainLonger | Action::SustainShorter => {
                let steps = if action == Action::SustainLonger { 1 } else { -1 };
                let duration = self.controller.sustain_duration().nudged(steps);
                self.controller.set_sustain_duration(duration);
                self.settings.save_debounced(keys::SUSTAIN_DURATION, &duration);
                self.notify(format!("Sustain {}", duration.label()));
            }
            Action::NextScaleRoot => self.set_scale(self.scale.with_next_root()),
            Action::NextScaleKind => self.set_scale(self.scale.with_next_kind()),
            Action::ClearNotation => self.controller.notation_mut().clear(),
            Action::TogglePanel(panel) => {
                let visible = self.panels.toggle(panel);
                self.settings.save(panel.storage_key(), &visible);
            }
        }
    }

    fn set_instrument(&mut self, instrument: Instrument) {
        self.instrument = instrument;
        // Release on the old engine before the new one selects its program
        self.controller.force_release_all();
        self.controller.swap_engine(self.backend.create(instrument));
        self.settings.save(keys::SOUND, &instrument);
        self.notify(format!("Sound: {}", instrument.name()));
    }

    fn set_envelope(&mut self, envelope: Adsr) {
        self.controller.set_envelope(envelope);
        let envelope = self.controller.envelope();
        self.settings.save_debounced(keys::ADSR, &envelope);
    }

    fn set_scale(&mut self, scale: Scale) {
        self.scale = scale;
        self.apply_scale();
        self.settings.save(keys::SCALE, &scale);
    }

    fn apply_scale(&mut self) {
        let keys = self.input.layout().display_notes();
        self.scale.apply(keys, self.controller.visual_mut());
    }

    fn play_click(&mut self, click: Click) {
        if let Some(clicker) = &mut self.clicker {
            if let Err(e) = clicker.play(click) {
                log::error!("Error playing metronome click: {}", e);
            }
        }
    }

    fn notify(&mut self, message: String) {
        log::debug!("{}", message);
        self.notice = Some((message, self.clock.now()));
    }

    /// The latest status notice, while it is still fresh
    pub fn notice(&self) -> Option<&str> {
        let (message, at) = self.notice.as_ref()?;
        (self.clock.now().saturating_duration_since(*at) < NOTICE_DURATION).then_some(message.as_str())
    }

    /// Silence everything and write pending settings (on exit)
    pub fn shutdown(&mut self) {
        self.controller.shutdown();
        self.metronome.stop();
        if let Some(clicker) = &mut self.clicker {
            if let Err(e) = clicker.dispose() {
                log::error!("Error stopping metronome: {}", e);
            }
        }
        self.settings.flush_all();
    }

    pub fn controller(&self) -> &PianoController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut PianoController {
        &mut self.controller
    }

    pub fn layout(&self) -> &KeyboardConfig {
        self.input.layout()
    }

    pub fn release_mode(&self) -> ReleaseMode {
        self.input.release_mode()
    }

    pub fn instrument(&self) -> Instrument {
        self.instrument
    }

    pub fn metronome(&self) -> &Metronome {
        &self.metronome
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    pub fn panels(&self) -> Panels {
        self.panels
    }

    pub fn selected_field(&self) -> AdsrField {
        self.selected_field
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::Result;
    use crate::midi::{MidiMessage, MidiOutput};
    use crate::note::PitchClass;
    use crate::scale::ScaleKind;
    use crate::settings::{MemoryStore, SettingsStore};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingOutput {
        sent: Mutex<Vec<MidiMessage>>,
    }

    impl RecordingOutput {
        fn take(&self) -> Vec<MidiMessage> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl MidiOutput for RecordingOutput {
        fn send(&self, message: MidiMessage) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        fn port_name(&self) -> &str {
            "recording"
        }
    }

    struct Session {
        piano: Piano,
        output: Rc<RecordingOutput>,
        clock: Rc<ManualClock>,
    }

    fn session_with(store: MemoryStore) -> Session {
        let clock = Rc::new(ManualClock::new());
        let output = Rc::new(RecordingOutput::default());
        let piano = Piano::new(PianoOptions {
            layout: KeyboardConfig::piano_layout(),
            release_mode: ReleaseMode::Reported,
            backend: EngineBackend::Midi {
                output: output.clone(),
                channel: 0,
                velocity: 100,
            },
            clicker: Some(MetronomeClicker::new(output.clone(), 1).unwrap()),
            settings: Settings::new(Box::new(store), clock.clone()),
            clock: clock.clone(),
        });
        output.take();
        Session { piano, output, clock }
    }

    fn session() -> Session {
        session_with(MemoryStore::new())
    }

    fn n(s: &str) -> Note {
        s.parse().unwrap()
    }

    #[test]
    fn test_defaults_without_saved_settings() {
        let s = session();
        assert_eq!(s.piano.instrument(), Instrument::Synth);
        assert_eq!(s.piano.controller().volume_db(), -12.0);
        assert_eq!(s.piano.controller().transpose(), 0);
        assert_eq!(s.piano.metronome().bpm(), 120);
        assert_eq!(s.piano.metronome().signature().to_string(), "4/4");
        assert_eq!(s.piano.panels(), Panels::default());
        assert_eq!(s.piano.scale().kind, ScaleKind::None);
    }

    #[test]
    fn test_restores_saved_settings() {
        let mut store = MemoryStore::new();
        store.set(keys::SOUND, json!("FMSynth")).unwrap();
        store.set(keys::VOLUME, json!(-20.0)).unwrap();
        store.set(keys::TRANSPOSE, json!(3)).unwrap();
        store.set(keys::TIME_SIGNATURE, json!("6/8")).unwrap();
        store.set(keys::BPM, json!(90)).unwrap();
        store.set(keys::SCALE, json!({"root": "G", "type": "major"})).unwrap();
        store.set(keys::SUSTAIN_DURATION, json!(250)).unwrap();
        store.set(keys::ADSR_VISIBLE, json!(true)).unwrap();

        let s = session_with(store);
        assert_eq!(s.piano.instrument(), Instrument::FmSynth);
        assert_eq!(s.piano.controller().volume_db(), -20.0);
        assert_eq!(s.piano.controller().transpose(), 3);
        assert_eq!(s.piano.metronome().signature().to_string(), "6/8");
        assert_eq!(s.piano.metronome().bpm(), 90);
        assert_eq!(s.piano.scale(), Scale::new(PitchClass::G, ScaleKind::Major));
        assert!(s.piano.controller().visual().is_highlighted(n("F#3")));
        assert!(!s.piano.controller().visual().is_highlighted(n("F3")));
        // Out-of-range values are pulled back into range.
        assert_eq!(s.piano.controller().sustain_duration().as_millis(), 500);
        assert!(s.piano.panels().envelope);
    }

    #[test]
    fn test_held_note_streams_particles() {
        use crate::feedback::{PARTICLES_PER_BURST, PARTICLES_PER_PULSE};

        let mut s = session();
        s.piano.handle_input(InputEvent::PointerDown { note: n("C4") });
        assert_eq!(s.piano.controller().visual().particle_count(), PARTICLES_PER_BURST);

        s.clock.advance_ms(300);
        s.piano.tick();
        assert_eq!(
            s.piano.controller().visual().particle_count(),
            PARTICLES_PER_BURST + PARTICLES_PER_PULSE
        );

        s.piano.handle_input(InputEvent::PointerUp { note: n("C4") });
        s.clock.advance_ms(300);
        s.piano.tick();
        assert_eq!(
            s.piano.controller().visual().particle_count(),
            PARTICLES_PER_BURST + PARTICLES_PER_PULSE
        );
    }

    #[test]
    fn test_malformed_settings_fall_back() {
        let mut store = MemoryStore::new();
        store.set(keys::SOUND, json!("Theremin")).unwrap();
        store.set(keys::TIME_SIGNATURE, json!("four")).unwrap();
        let s = session_with(store);
        assert_eq!(s.piano.instrument(), Instrument::Synth);
        assert_eq!(s.piano.metronome().signature(), TimeSignature::default());
    }

    #[test]
    fn test_instrument_change_releases_sounding_notes() {
        let mut s = session();
        s.piano.handle_input(InputEvent::KeyDown { key: 'k', repeat: false });
        s.output.take();

        s.piano.apply(Action::NextInstrument);
        assert_eq!(s.piano.instrument(), Instrument::AmSynth);
        let sent = s.output.take();
        assert_eq!(sent[0], MidiMessage::NoteOff { channel: 0, note: 60 });
        assert!(sent.contains(&MidiMessage::ProgramChange { channel: 0, program: 89 }));
        assert!(s.piano.controller().active_notes().is_empty());
    }

    #[test]
    fn test_transpose_is_persisted_immediately() {
        let mut s = session();
        for _ in 0..15 {
            s.piano.apply(Action::TransposeUp);
        }
        assert_eq!(s.piano.controller().transpose(), 12);
        assert_eq!(s.piano.settings.load(keys::TRANSPOSE, 0), 12);
        assert_eq!(s.piano.notice(), Some("Transpose +12"));
        s.clock.advance_ms(2500);
        assert_eq!(s.piano.notice(), None);
    }

    #[test]
    fn test_volume_save_is_debounced() {
        let mut s = session();
        s.piano.apply(Action::VolumeDown);
        s.piano.apply(Action::VolumeDown);
        assert_eq!(s.piano.settings.load(keys::VOLUME, 0.0), 0.0);
        s.clock.advance_ms(300);
        s.piano.tick();
        assert_eq!(s.piano.settings.load(keys::VOLUME, 0.0), -14.0);
    }

    #[test]
    fn test_metronome_clicks_on_tick() {
        let mut s = session();
        s.piano.apply(Action::ToggleMetronome);
        assert!(s.output.take().contains(&MidiMessage::NoteOn { channel: 1, note: 79, velocity: 120 }));

        s.clock.advance_ms(500);
        s.piano.tick();
        let sent = s.output.take();
        assert!(sent.contains(&MidiMessage::NoteOn { channel: 1, note: 72, velocity: 90 }));

        s.piano.apply(Action::ToggleMetronome);
        assert!(!s.piano.metronome().is_running());
        s.clock.advance_ms(500);
        s.piano.tick();
        assert!(!s.output.take().iter().any(|m| matches!(m, MidiMessage::NoteOn { .. })));
    }

    #[test]
    fn test_envelope_adjustment() {
        let mut s = session();
        s.piano.apply(Action::NextEnvelopeField);
        s.piano.apply(Action::NextEnvelopeField);
        s.piano.apply(Action::NextEnvelopeField);
        assert_eq!(s.piano.selected_field(), AdsrField::Release);
        s.piano.apply(Action::EnvelopeUp);
        assert!((s.piano.controller().envelope().release - 1.6).abs() < 1e-9);
        s.piano.apply(Action::ResetEnvelope);
        assert_eq!(s.piano.controller().envelope(), Adsr::default());
    }

    #[test]
    fn test_scale_cycle_updates_highlights() {
        let mut s = session();
        s.piano.apply(Action::NextScaleKind);
        assert_eq!(s.piano.scale().kind, ScaleKind::Major);
        assert!(s.piano.controller().visual().is_highlighted(n("E4")));
        assert!(!s.piano.controller().visual().is_highlighted(n("C#4")));

        s.piano.apply(Action::NextScaleRoot);
        assert!(s.piano.controller().visual().is_highlighted(n("C#4")));
        let saved: Scale = s.piano.settings.load(keys::SCALE, Scale::default());
        assert_eq!(saved, Scale::new(PitchClass::CSharp, ScaleKind::Major));
    }

    #[test]
    fn test_panel_toggle_is_saved() {
        let mut s = session();
        s.piano.apply(Action::TogglePanel(Panel::Sheet));
        assert!(s.piano.panels().is_visible(Panel::Sheet));
        assert!(s.piano.settings.load(keys::SHEET_VISIBLE, false));
        s.piano.apply(Action::TogglePanel(Panel::Sheet));
        assert!(!s.piano.settings.load(keys::SHEET_VISIBLE, true));
    }

    #[test]
    fn test_sustain_tails_end_on_tick() {
        let mut s = session();
        s.piano.handle_input(InputEvent::KeyDown { key: ' ', repeat: false });
        s.piano.handle_input(InputEvent::KeyDown { key: 'z', repeat: false });
        s.piano.handle_input(InputEvent::KeyUp { key: 'z' });
        s.output.take();

        s.clock.advance_ms(999);
        s.piano.tick();
        assert!(s.output.take().is_empty());
        s.clock.advance_ms(1);
        s.piano.tick();
        assert_eq!(s.output.take(), vec![MidiMessage::NoteOff { channel: 0, note: 36 }]);
    }

    #[test]
    fn test_shutdown_flushes_settings() {
        let mut s = session();
        s.piano.apply(Action::BpmUp);
        s.piano.shutdown();
        assert_eq!(s.piano.settings.load(keys::BPM, 0u16), 125);
        assert!(s
            .output
            .take()
            .contains(&MidiMessage::ControlChange { channel: 0, controller: 123, value: 0 }));
    }
}
