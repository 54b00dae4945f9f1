//! Note lifecycle controller
//!
//! Tracks which notes are physically held, which are sounding, and which are
//! in a pedal-sustained tail, and turns that into engine calls. The
//! controller is the only caller of the sound engine.
//!
//! State per logical note:
//!
//! ```text
//! Idle --attack--> Active --release--> Idle
//!                  Active --lift with pedal down--> Sustained
//!                  Sustained --timer / pedal up / force release--> Idle
//!                  Sustained --attack--> Active
//! ```
//!
//! Every active note remembers the sounding note it was attacked with, and
//! its release always targets that note, whatever the transpose offset is by
//! then. Held notes are always active.

use crate::clock::Clock;
use crate::engine::{SoundEngine, DEFAULT_VOLUME_DB, MAX_VOLUME_DB, MIN_VOLUME_DB};
use crate::envelope::{Adsr, SustainDuration};
use crate::error::Result;
use crate::feedback::{NotationSink, VisualFeedback};
use crate::note::Note;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Instant;

/// Lowest transpose offset in semitones
pub const TRANSPOSE_MIN: i32 = -12;
/// Highest transpose offset in semitones
pub const TRANSPOSE_MAX: i32 = 12;

/// A pending pedal-tail release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SustainTimer {
    /// Release once this instant has passed
    At(Instant),
    /// Never fires; the note rings until the pedal lifts
    Infinite,
}

/// Owns the held/active/sustained note sets and the sound engine
pub struct NoteController<V, N> {
    engine: Box<dyn SoundEngine>,
    visual: V,
    notation: N,
    clock: Rc<dyn Clock>,
    /// Physically depressed logical notes
    held: HashSet<Note>,
    /// Sounding logical notes, each with the sounding note it was attacked as
    active: HashMap<Note, Note>,
    /// At most one pending tail release per note
    sustain_timers: HashMap<Note, SustainTimer>,
    transpose: i32,
    pedal: bool,
    sustain_duration: SustainDuration,
    volume_db: f64,
    envelope: Adsr,
}

fn log_engine_error(result: Result<()>, action: &str, note: Note) {
    if let Err(e) = result {
        log::error!("Error {} note {}: {}", action, note, e);
    }
}

impl<V: VisualFeedback, N: NotationSink> NoteController<V, N> {
    /// Create a controller and push the default volume and envelope to the engine
    pub fn new(engine: Box<dyn SoundEngine>, visual: V, notation: N, clock: Rc<dyn Clock>) -> Self {
        let mut controller = Self {
            engine,
            visual,
            notation,
            clock,
            held: HashSet::new(),
            active: HashMap::new(),
            sustain_timers: HashMap::new(),
            transpose: 0,
            pedal: false,
            sustain_duration: SustainDuration::default(),
            volume_db: DEFAULT_VOLUME_DB,
            envelope: Adsr::default(),
        };
        controller.apply_engine_parameters();
        controller
    }

    /// Start sounding a logical note.
    ///
    /// An already active note is released first and struck again, so the
    /// engine never sees two overlapping attacks for the same note.
    pub fn attack(&mut self, note: Note) {
        if let Some(previous) = self.active.remove(&note) {
            log::trace!("re-attacking {} (was sounding as {})", note, previous);
            log_engine_error(self.engine.release(previous), "releasing", previous);
            if previous != note.transpose(self.transpose) {
                self.visual.set_key_active(previous, false);
            }
        }

        let sounding = note.transpose(self.transpose);
        log_engine_error(self.engine.attack(sounding), "playing", sounding);
        self.active.insert(note, sounding);
        self.sustain_timers.remove(&note);

        self.visual.set_key_active(sounding, true);
        self.visual.emit_particles(sounding);
        self.notation.append_note(sounding);
    }

    /// Stop sounding a logical note. Releasing a silent note does nothing.
    ///
    /// Returns whether anything was released.
    pub fn release(&mut self, note: Note) -> bool {
        self.held.remove(&note);
        self.sustain_timers.remove(&note);
        let Some(sounding) = self.active.remove(&note) else {
            return false;
        };
        log_engine_error(self.engine.release(sounding), "releasing", sounding);
        self.visual.set_key_active(sounding, false);
        true
    }

    /// A key went down: attack it and mark it held
    pub fn press(&mut self, note: Note) {
        self.attack(note);
        self.held.insert(note);
    }

    /// A key came up: release it, or leave it ringing if the pedal is down
    pub fn lift(&mut self, note: Note) {
        self.held.remove(&note);
        if self.pedal {
            self.schedule_sustain_release(note);
        } else {
            self.release(note);
        }
    }

    /// Arm the tail timer for an unheld note while the pedal is down.
    ///
    /// Replaces any earlier timer for the note. Returns false (and arms
    /// nothing) when the pedal is up, the note is silent, or still held.
    pub fn schedule_sustain_release(&mut self, note: Note) -> bool {
        if !self.pedal || !self.active.contains_key(&note) || self.held.contains(&note) {
            return false;
        }
        let timer = match self.sustain_duration.duration() {
            Some(tail) => SustainTimer::At(self.clock.now() + tail),
            None => SustainTimer::Infinite,
        };
        self.sustain_timers.insert(note, timer);
        true
    }

    /// Fire every tail timer whose deadline has passed.
    ///
    /// Returns the notes that were released.
    pub fn poll_timers(&mut self) -> Vec<Note> {
        let now = self.clock.now();
        let mut due: Vec<Note> = self
            .sustain_timers
            .iter()
            .filter_map(|(note, timer)| match timer {
                SustainTimer::At(deadline) if *deadline <= now => Some(*note),
                _ => None,
            })
            .collect();
        due.sort();

        let mut released = Vec::new();
        for note in due {
            self.sustain_timers.remove(&note);
            if !self.held.contains(&note) && self.pedal && self.release(note) {
                released.push(note);
            }
        }
        released
    }

    /// Press or lift the sustain pedal. Lifting it cuts every sustained tail.
    pub fn set_pedal(&mut self, down: bool) {
        if self.pedal == down {
            return;
        }
        self.pedal = down;
        log::debug!("sustain pedal {}", if down { "down" } else { "up" });
        if !down {
            self.release_all_sustained();
        }
    }

    /// Release every sounding note that is not held
    pub fn release_all_sustained(&mut self) {
        let mut tails: Vec<Note> = self
            .active
            .keys()
            .filter(|note| !self.held.contains(note))
            .copied()
            .collect();
        tails.sort();
        for note in tails {
            self.release(note);
        }
    }

    /// Silence everything and forget all held keys, whatever the pedal says
    pub fn force_release_all(&mut self) {
        self.held.clear();
        let mut sounding: Vec<Note> = self.active.keys().copied().collect();
        sounding.sort();
        for note in sounding {
            self.release(note);
        }
        self.sustain_timers.clear();
    }

    /// Change the transpose offset, reconciling notes that are sounding.
    ///
    /// Each active note is released under the sounding note it was attacked
    /// with. Notes that are still held are struck again at the new pitch;
    /// sustained tails are not brought back.
    pub fn set_transpose(&mut self, semitones: i32) {
        let semitones = semitones.clamp(TRANSPOSE_MIN, TRANSPOSE_MAX);
        if semitones == self.transpose {
            return;
        }

        let mut sounding: Vec<(Note, Note)> = self.active.iter().map(|(l, s)| (*l, *s)).collect();
        sounding.sort();

        for (note, old) in &sounding {
            log_engine_error(self.engine.release(*old), "releasing", *old);
            self.visual.set_key_active(*old, false);
            self.sustain_timers.remove(note);
            self.active.remove(note);
        }

        log::debug!("transpose {} -> {}", self.transpose, semitones);
        self.transpose = semitones;

        for (note, _) in sounding {
            if self.held.contains(&note) {
                let new = note.transpose(self.transpose);
                log_engine_error(self.engine.attack(new), "re-triggering", new);
                self.active.insert(note, new);
                self.visual.set_key_active(new, true);
                self.visual.emit_particles(new);
            }
        }
    }

    /// Replace the sound engine (instrument change).
    ///
    /// Every note is released on the old engine before it is disposed, then
    /// the current volume and envelope are applied to the new one.
    pub fn swap_engine(&mut self, engine: Box<dyn SoundEngine>) {
        self.force_release_all();
        if let Err(e) = self.engine.dispose() {
            log::error!("Error disposing sound engine: {}", e);
        }
        self.engine = engine;
        self.apply_engine_parameters();
        log::info!("sound engine is now {}", self.engine.describe());
    }

    /// Silence everything and dispose the engine (on exit)
    pub fn shutdown(&mut self) {
        self.force_release_all();
        self.set_pedal(false);
        if let Err(e) = self.engine.dispose() {
            log::error!("Error disposing sound engine: {}", e);
        }
    }

    pub fn set_volume(&mut self, db: f64) {
        self.volume_db = db.clamp(MIN_VOLUME_DB, MAX_VOLUME_DB);
        if let Err(e) = self.engine.set_volume(self.volume_db) {
            log::error!("Error setting volume: {}", e);
        }
    }

    pub fn set_envelope(&mut self, envelope: Adsr) {
        self.envelope = envelope.clamped();
        if let Err(e) = self.engine.set_envelope(&self.envelope) {
            log::error!("Error updating envelope: {}", e);
        }
    }

    /// Set the tail length for notes armed from now on
    pub fn set_sustain_duration(&mut self, duration: SustainDuration) {
        self.sustain_duration = duration;
    }

    fn apply_engine_parameters(&mut self) {
        if let Err(e) = self.engine.set_volume(self.volume_db) {
            log::error!("Error setting volume: {}", e);
        }
        if let Err(e) = self.engine.set_envelope(&self.envelope) {
            log::error!("Error updating envelope: {}", e);
        }
    }

    pub fn is_active(&self, note: Note) -> bool {
        self.active.contains_key(&note)
    }

    pub fn is_held(&self, note: Note) -> bool {
        self.held.contains(&note)
    }

    /// The sounding note an active logical note was attacked as
    pub fn sounding(&self, note: Note) -> Option<Note> {
        self.active.get(&note).copied()
    }

    /// Active logical notes in pitch order
    pub fn active_notes(&self) -> Vec<Note> {
        let mut notes: Vec<_> = self.active.keys().copied().collect();
        notes.sort();
        notes
    }

    /// Held logical notes in pitch order
    pub fn held_notes(&self) -> Vec<Note> {
        let mut notes: Vec<_> = self.held.iter().copied().collect();
        notes.sort();
        notes
    }

    /// Sounding notes in pitch order
    pub fn sounding_notes(&self) -> Vec<Note> {
        let mut notes: Vec<_> = self.active.values().copied().collect();
        notes.sort();
        notes
    }

    pub fn sustain_timer(&self, note: Note) -> Option<SustainTimer> {
        self.sustain_timers.get(&note).copied()
    }

    pub fn pending_timers(&self) -> usize {
        self.sustain_timers.len()
    }

    pub fn transpose(&self) -> i32 {
        self.transpose
    }

    pub fn pedal(&self) -> bool {
        self.pedal
    }

    pub fn sustain_duration(&self) -> SustainDuration {
        self.sustain_duration
    }

    pub fn volume_db(&self) -> f64 {
        self.volume_db
    }

    pub fn envelope(&self) -> Adsr {
        self.envelope
    }

    pub fn engine_description(&self) -> String {
        self.engine.describe()
    }

    pub fn visual(&self) -> &V {
        &self.visual
    }

    pub fn visual_mut(&mut self) -> &mut V {
        &mut self.visual
    }

    pub fn notation(&self) -> &N {
        &self.notation
    }

    pub fn notation_mut(&mut self) -> &mut N {
        &mut self.notation
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::Error;
    use crate::feedback::{KeyboardDisplay, NotationStrip};
    use std::cell::RefCell;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Call {
        Attack(Note),
        Release(Note),
        Envelope,
        Volume(f64),
        Dispose,
    }

    /// Engine double that records every call into a shared log
    pub(crate) struct RecordingEngine {
        pub calls: Rc<RefCell<Vec<Call>>>,
        pub fail: bool,
    }

    impl SoundEngine for RecordingEngine {
        fn attack(&mut self, note: Note) -> Result<()> {
            self.calls.borrow_mut().push(Call::Attack(note));
            if self.fail {
                return Err(Error::Engine("device lost".into()));
            }
            Ok(())
        }

        fn release(&mut self, note: Note) -> Result<()> {
            self.calls.borrow_mut().push(Call::Release(note));
            if self.fail {
                return Err(Error::Engine("device lost".into()));
            }
            Ok(())
        }

        fn set_envelope(&mut self, _envelope: &Adsr) -> Result<()> {
            self.calls.borrow_mut().push(Call::Envelope);
            Ok(())
        }

        fn set_volume(&mut self, db: f64) -> Result<()> {
            self.calls.borrow_mut().push(Call::Volume(db));
            Ok(())
        }

        fn dispose(&mut self) -> Result<()> {
            self.calls.borrow_mut().push(Call::Dispose);
            Ok(())
        }

        fn describe(&self) -> String {
            "recording".to_string()
        }
    }

    pub(crate) type TestController = NoteController<KeyboardDisplay, NotationStrip>;

    pub(crate) struct Rig {
        pub controller: TestController,
        pub calls: Rc<RefCell<Vec<Call>>>,
        pub clock: Rc<ManualClock>,
    }

    impl Rig {
        pub fn new() -> Self {
            Self::with_failure(false)
        }

        pub fn with_failure(fail: bool) -> Self {
            let clock = Rc::new(ManualClock::new());
            let calls = Rc::new(RefCell::new(Vec::new()));
            let engine = RecordingEngine { calls: calls.clone(), fail };
            let controller = NoteController::new(
                Box::new(engine),
                KeyboardDisplay::new(clock.clone()),
                NotationStrip::new(clock.clone()),
                clock.clone(),
            );
            calls.borrow_mut().clear();
            Self { controller, calls, clock }
        }

        /// Note-on/off calls only, draining the log
        pub fn take_note_calls(&self) -> Vec<Call> {
            self.calls
                .borrow_mut()
                .drain(..)
                .filter(|c| matches!(c, Call::Attack(_) | Call::Release(_)))
                .collect()
        }

        pub fn assert_invariants(&self) {
            let c = &self.controller;
            for note in c.held_notes() {
                assert!(c.is_active(note), "{} held but not active", note);
            }
            for note in c.active_notes() {
                let sounding = c.sounding(note).unwrap();
                assert!(c.visual().is_active(sounding), "{} not lit", sounding);
            }
            assert_eq!(c.visual().active_notes(), c.sounding_notes());
            for note in c.active_notes() {
                if c.sustain_timer(note).is_some() {
                    assert!(!c.is_held(note));
                    assert!(c.pedal());
                }
            }
        }
    }

    fn n(s: &str) -> Note {
        s.parse().unwrap()
    }

    #[test]
    fn test_new_pushes_volume_and_envelope() {
        let clock = Rc::new(ManualClock::new());
        let calls = Rc::new(RefCell::new(Vec::new()));
        let _controller = NoteController::new(
            Box::new(RecordingEngine { calls: calls.clone(), fail: false }),
            KeyboardDisplay::new(clock.clone()),
            NotationStrip::new(clock.clone()),
            clock,
        );
        assert_eq!(*calls.borrow(), vec![Call::Volume(DEFAULT_VOLUME_DB), Call::Envelope]);
    }

    #[test]
    fn test_attack_and_release() {
        let mut rig = Rig::new();
        rig.controller.press(n("C4"));
        assert!(rig.controller.is_active(n("C4")));
        assert!(rig.controller.is_held(n("C4")));
        assert!(rig.controller.visual().is_active(n("C4")));
        assert_eq!(rig.controller.notation().len(), 1);

        rig.controller.lift(n("C4"));
        assert!(!rig.controller.is_active(n("C4")));
        assert!(!rig.controller.visual().is_active(n("C4")));
        assert_eq!(
            rig.take_note_calls(),
            vec![Call::Attack(n("C4")), Call::Release(n("C4"))]
        );
        rig.assert_invariants();
    }

    #[test]
    fn test_release_of_silent_note_is_noop() {
        let mut rig = Rig::new();
        assert!(!rig.controller.release(n("D4")));
        assert!(rig.take_note_calls().is_empty());

        rig.controller.attack(n("D4"));
        assert!(rig.controller.release(n("D4")));
        assert!(!rig.controller.release(n("D4")));
        assert_eq!(
            rig.take_note_calls(),
            vec![Call::Attack(n("D4")), Call::Release(n("D4"))]
        );
    }

    #[test]
    fn test_double_attack_retriggers() {
        let mut rig = Rig::new();
        rig.controller.attack(n("E4"));
        rig.take_note_calls();

        rig.controller.attack(n("E4"));
        assert_eq!(rig.controller.active_notes(), vec![n("E4")]);
        assert_eq!(
            rig.take_note_calls(),
            vec![Call::Release(n("E4")), Call::Attack(n("E4"))]
        );
        assert!(rig.controller.visual().is_active(n("E4")));
    }

    #[test]
    fn test_transpose_retriggers_held_notes() {
        let mut rig = Rig::new();
        let c4 = n("C4");
        rig.controller.press(c4);
        assert_eq!(rig.take_note_calls(), vec![Call::Attack(c4)]);

        rig.controller.set_transpose(2);
        assert_eq!(
            rig.take_note_calls(),
            vec![Call::Release(c4), Call::Attack(n("D4"))]
        );
        assert_eq!(rig.controller.active_notes(), vec![c4]);
        assert_eq!(rig.controller.sounding(c4), Some(n("D4")));
        assert!(!rig.controller.visual().is_active(c4));
        assert!(rig.controller.visual().is_active(n("D4")));

        // Release targets the identity committed by the re-attack.
        rig.controller.lift(c4);
        assert_eq!(rig.take_note_calls(), vec![Call::Release(n("D4"))]);
        rig.assert_invariants();
    }

    #[test]
    fn test_transpose_drops_sustained_tails() {
        let mut rig = Rig::new();
        rig.controller.set_pedal(true);
        rig.controller.press(n("G3"));
        rig.controller.lift(n("G3"));
        rig.controller.press(n("A3"));
        rig.take_note_calls();

        rig.controller.set_transpose(-1);
        assert_eq!(
            rig.take_note_calls(),
            vec![
                Call::Release(n("G3")),
                Call::Release(n("A3")),
                Call::Attack(n("G#3")),
            ]
        );
        assert!(!rig.controller.is_active(n("G3")));
        assert_eq!(rig.controller.sustain_timer(n("G3")), None);
        rig.assert_invariants();
    }

    #[test]
    fn test_transpose_same_value_is_noop_and_clamped() {
        let mut rig = Rig::new();
        rig.controller.press(n("C4"));
        rig.take_note_calls();
        rig.controller.set_transpose(0);
        assert!(rig.take_note_calls().is_empty());

        rig.controller.set_transpose(40);
        assert_eq!(rig.controller.transpose(), TRANSPOSE_MAX);
        assert_eq!(rig.controller.sounding(n("C4")), Some(n("C5")));
    }

    #[test]
    fn test_release_uses_committed_identity() {
        let mut rig = Rig::new();
        rig.controller.set_transpose(3);
        rig.controller.press(n("A4"));
        assert_eq!(rig.take_note_calls(), vec![Call::Attack(n("C5"))]);
        rig.controller.lift(n("A4"));
        assert_eq!(rig.take_note_calls(), vec![Call::Release(n("C5"))]);
    }

    #[test]
    fn test_sustain_tail_times_out() {
        let mut rig = Rig::new();
        let e3 = n("E3");
        rig.controller.set_sustain_duration(SustainDuration::from_millis(1000));
        rig.controller.set_pedal(true);
        rig.controller.press(e3);
        rig.controller.lift(e3);
        rig.take_note_calls();

        assert!(rig.controller.is_active(e3));
        assert!(matches!(rig.controller.sustain_timer(e3), Some(SustainTimer::At(_))));

        rig.clock.advance_ms(999);
        assert!(rig.controller.poll_timers().is_empty());
        assert!(rig.controller.is_active(e3));

        rig.clock.advance_ms(1);
        assert_eq!(rig.controller.poll_timers(), vec![e3]);
        assert!(!rig.controller.is_active(e3));
        assert_eq!(rig.controller.pending_timers(), 0);
        assert_eq!(rig.take_note_calls(), vec![Call::Release(e3)]);
    }

    #[test]
    fn test_sustain_tail_under_transpose_releases_sounding_note() {
        let mut rig = Rig::new();
        let e3 = n("E3");
        rig.controller.set_transpose(5);
        rig.controller.set_pedal(true);
        rig.controller.press(e3);
        rig.controller.lift(e3);
        rig.take_note_calls();

        rig.clock.advance_ms(1000);
        rig.controller.poll_timers();
        assert_eq!(rig.take_note_calls(), vec![Call::Release(n("A3"))]);
    }

    #[test]
    fn test_reattack_cancels_tail() {
        let mut rig = Rig::new();
        let c4 = n("C4");
        rig.controller.set_pedal(true);
        rig.controller.press(c4);
        rig.controller.lift(c4);
        rig.clock.advance_ms(600);
        rig.controller.press(c4);
        assert_eq!(rig.controller.sustain_timer(c4), None);

        rig.clock.advance_ms(600);
        assert!(rig.controller.poll_timers().is_empty());
        assert!(rig.controller.is_active(c4));
        rig.assert_invariants();
    }

    #[test]
    fn test_rescheduling_replaces_timer() {
        let mut rig = Rig::new();
        let c4 = n("C4");
        rig.controller.set_pedal(true);
        rig.controller.attack(c4);
        assert!(rig.controller.schedule_sustain_release(c4));
        rig.clock.advance_ms(500);
        assert!(rig.controller.schedule_sustain_release(c4));
        assert_eq!(rig.controller.pending_timers(), 1);

        rig.clock.advance_ms(600);
        assert!(rig.controller.poll_timers().is_empty());
        rig.clock.advance_ms(400);
        assert_eq!(rig.controller.poll_timers(), vec![c4]);
    }

    #[test]
    fn test_schedule_preconditions() {
        let mut rig = Rig::new();
        let c4 = n("C4");
        rig.controller.attack(c4);
        assert!(!rig.controller.schedule_sustain_release(c4), "pedal is up");

        rig.controller.set_pedal(true);
        rig.controller.press(c4);
        assert!(!rig.controller.schedule_sustain_release(c4), "still held");
        assert!(!rig.controller.schedule_sustain_release(n("D4")), "not active");
        assert_eq!(rig.controller.pending_timers(), 0);
    }

    #[test]
    fn test_pedal_up_releases_tails_but_not_held() {
        let mut rig = Rig::new();
        rig.controller.set_pedal(true);
        rig.controller.press(n("C4"));
        rig.controller.press(n("E4"));
        rig.controller.lift(n("C4"));
        rig.take_note_calls();

        rig.controller.set_pedal(false);
        assert_eq!(rig.take_note_calls(), vec![Call::Release(n("C4"))]);
        assert_eq!(rig.controller.active_notes(), vec![n("E4")]);
        assert_eq!(rig.controller.pending_timers(), 0);
        rig.assert_invariants();
    }

    #[test]
    fn test_infinite_sustain_never_fires() {
        let mut rig = Rig::new();
        let c4 = n("C4");
        rig.controller.set_sustain_duration(SustainDuration::infinite());
        rig.controller.set_pedal(true);
        rig.controller.press(c4);
        rig.controller.lift(c4);
        assert_eq!(rig.controller.sustain_timer(c4), Some(SustainTimer::Infinite));

        rig.clock.advance_ms(10 * 60 * 1000);
        assert!(rig.controller.poll_timers().is_empty());
        assert!(rig.controller.is_active(c4));

        // Re-held and lifted: still sustained, still infinite.
        rig.controller.press(c4);
        rig.controller.lift(c4);
        assert!(rig.controller.is_active(c4));

        rig.controller.set_pedal(false);
        assert!(!rig.controller.is_active(c4));
    }

    #[test]
    fn test_force_release_all() {
        let mut rig = Rig::new();
        rig.controller.set_pedal(true);
        rig.controller.press(n("C4"));
        rig.controller.press(n("D4"));
        rig.controller.lift(n("D4"));
        rig.controller.set_sustain_duration(SustainDuration::infinite());
        rig.controller.press(n("E4"));
        rig.controller.lift(n("E4"));
        rig.take_note_calls();

        rig.controller.force_release_all();
        assert!(rig.controller.active_notes().is_empty());
        assert!(rig.controller.held_notes().is_empty());
        assert_eq!(rig.controller.pending_timers(), 0);
        assert!(rig.controller.visual().active_notes().is_empty());
        assert_eq!(
            rig.take_note_calls(),
            vec![Call::Release(n("C4")), Call::Release(n("D4")), Call::Release(n("E4"))]
        );
        // The pedal itself is untouched.
        assert!(rig.controller.pedal());
    }

    #[test]
    fn test_engine_failures_do_not_desync_state() {
        let mut rig = Rig::with_failure(true);
        rig.controller.press(n("C4"));
        assert!(rig.controller.is_active(n("C4")));
        assert!(rig.controller.visual().is_active(n("C4")));
        rig.controller.lift(n("C4"));
        assert!(!rig.controller.is_active(n("C4")));
        rig.assert_invariants();
    }

    #[test]
    fn test_swap_engine_releases_on_old_engine() {
        let mut rig = Rig::new();
        rig.controller.press(n("C4"));
        rig.controller.set_volume(-20.0);
        rig.calls.borrow_mut().clear();

        let new_calls = Rc::new(RefCell::new(Vec::new()));
        rig.controller.swap_engine(Box::new(RecordingEngine { calls: new_calls.clone(), fail: false }));

        assert_eq!(*rig.calls.borrow(), vec![Call::Release(n("C4")), Call::Dispose]);
        assert_eq!(*new_calls.borrow(), vec![Call::Volume(-20.0), Call::Envelope]);
        assert!(rig.controller.active_notes().is_empty());
    }

    #[test]
    fn test_shutdown_silences_and_disposes() {
        let mut rig = Rig::new();
        rig.controller.set_pedal(true);
        rig.controller.press(n("A3"));
        rig.calls.borrow_mut().clear();

        rig.controller.shutdown();
        assert_eq!(*rig.calls.borrow(), vec![Call::Release(n("A3")), Call::Dispose]);
        assert!(!rig.controller.pedal());
    }

    #[test]
    fn test_volume_is_clamped() {
        let mut rig = Rig::new();
        rig.controller.set_volume(12.0);
        assert_eq!(rig.controller.volume_db(), MAX_VOLUME_DB);
        rig.controller.set_volume(-120.0);
        assert_eq!(rig.controller.volume_db(), MIN_VOLUME_DB);
    }

    #[test]
    fn test_invariants_hold_under_random_input() {
        let mut rig = Rig::new();
        let notes: Vec<Note> = (55..67u8).map(Note::from_midi).collect();
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = |bound: u64| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed % bound
        };

        for _ in 0..2000 {
            let note = notes[next(notes.len() as u64) as usize];
            match next(9) {
                0 | 1 => rig.controller.press(note),
                2 | 3 => rig.controller.lift(note),
                4 => rig.controller.attack(note),
                5 => {
                    rig.controller.release(note);
                }
                6 => rig.controller.set_pedal(next(2) == 0),
                7 => rig.controller.set_transpose(next(25) as i32 - 12),
                _ => {
                    rig.clock.advance_ms(next(1500));
                    rig.controller.poll_timers();
                }
            }
            rig.assert_invariants();
        }

        rig.controller.force_release_all();
        assert_eq!(rig.controller.pending_timers(), 0);
        rig.assert_invariants();
    }
}
