//! Metronome
//!
//! Ticks on every quarter note at the current tempo. The first beat of each
//! bar is accented. Timing is polled: the event loop calls
//! [`Metronome::poll`] every frame and plays whatever click comes due.

use crate::engine::volume_to_cc;
use crate::error::{Error, Result};
use crate::midi::{MidiMessage, MidiOutput, CC_ALL_NOTES_OFF, CC_VOLUME};
use crate::note::{Note, PitchClass};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use std::time::{Duration, Instant};

pub const MIN_BPM: u16 = 40;
pub const MAX_BPM: u16 = 240;
pub const DEFAULT_BPM: u16 = 120;
pub const DEFAULT_CLICK_VOLUME_DB: f64 = -10.0;

/// Program for the click voice (GM melodic tom)
const CLICK_PROGRAM: u8 = 117;
const ACCENT_VELOCITY: u8 = 120;
const BEAT_VELOCITY: u8 = 90;

/// Beats per bar over the beat unit, e.g. 3/4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSignature {
    pub beats: u8,
    pub division: u8,
}

impl TimeSignature {
    pub const COMMON: [TimeSignature; 4] = [
        TimeSignature { beats: 2, division: 4 },
        TimeSignature { beats: 3, division: 4 },
        TimeSignature { beats: 4, division: 4 },
        TimeSignature { beats: 6, division: 8 },
    ];

    /// The next of the common signatures, wrapping around
    pub fn next(self) -> Self {
        let i = Self::COMMON.iter().position(|s| *s == self);
        match i {
            Some(i) => Self::COMMON[(i + 1) % Self::COMMON.len()],
            None => Self::COMMON[0],
        }
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        TimeSignature { beats: 4, division: 4 }
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.beats, self.division)
    }
}

impl FromStr for TimeSignature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Config(format!("invalid time signature: {}", s));
        let (beats, division) = s.split_once('/').ok_or_else(invalid)?;
        let beats: u8 = beats.trim().parse().map_err(|_| invalid())?;
        let division: u8 = division.trim().parse().map_err(|_| invalid())?;
        if beats == 0 || division == 0 {
            return Err(invalid());
        }
        Ok(TimeSignature { beats, division })
    }
}

impl TryFrom<String> for TimeSignature {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TimeSignature> for String {
    fn from(sig: TimeSignature) -> Self {
        sig.to_string()
    }
}

/// One tick of the metronome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Click {
    /// Beat within the bar, starting at 0
    pub beat: u8,
    pub accent: bool,
}

impl Click {
    /// Pitch of the click: G5 on the downbeat, C5 otherwise
    pub fn note(&self) -> Note {
        if self.accent {
            Note::new(PitchClass::G, 5)
        } else {
            Note::new(PitchClass::C, 5)
        }
    }
}

/// Tempo, signature and beat position
#[derive(Debug, Clone)]
pub struct Metronome {
    bpm: u16,
    signature: TimeSignature,
    volume_db: f64,
    running: bool,
    beat: u8,
    next_tick: Option<Instant>,
    last_click: Option<Click>,
}

impl Default for Metronome {
    fn default() -> Self {
        Self::new(DEFAULT_BPM, TimeSignature::default())
    }
}

impl Metronome {
    pub fn new(bpm: u16, signature: TimeSignature) -> Self {
        Self {
            bpm: bpm.clamp(MIN_BPM, MAX_BPM),
            signature,
            volume_db: DEFAULT_CLICK_VOLUME_DB,
            running: false,
            beat: 0,
            next_tick: None,
            last_click: None,
        }
    }

    pub fn bpm(&self) -> u16 {
        self.bpm
    }

    pub fn signature(&self) -> TimeSignature {
        self.signature
    }

    pub fn volume_db(&self) -> f64 {
        self.volume_db
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Beat that will sound next
    pub fn beat(&self) -> u8 {
        self.beat
    }

    /// Most recent click, for the beat indicator
    pub fn last_click(&self) -> Option<Click> {
        self.last_click
    }

    /// Time between quarter-note ticks
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(60.0 / self.bpm as f64)
    }

    /// Takes effect from the next tick when running
    pub fn set_bpm(&mut self, bpm: u16) {
        self.bpm = bpm.clamp(MIN_BPM, MAX_BPM);
    }

    pub fn nudge_bpm(&mut self, delta: i32) {
        let bpm = (self.bpm as i32 + delta).clamp(MIN_BPM as i32, MAX_BPM as i32);
        self.set_bpm(bpm as u16);
    }

    /// Change the signature and restart the bar
    pub fn set_signature(&mut self, signature: TimeSignature) {
        self.signature = signature;
        self.beat = 0;
    }

    pub fn set_volume_db(&mut self, db: f64) {
        self.volume_db = db.clamp(-40.0, 0.0);
    }

    /// Start ticking. The first beat sounds immediately.
    pub fn start(&mut self, now: Instant) -> Option<Click> {
        if self.running {
            return None;
        }
        self.running = true;
        self.beat = 0;
        log::debug!("metronome start at {} BPM {}", self.bpm, self.signature);
        Some(self.tick(now))
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.beat = 0;
        self.next_tick = None;
        self.last_click = None;
    }

    /// The click that is due at `now`, if any.
    ///
    /// After a long stall the schedule restarts from `now` rather than
    /// firing a burst of missed ticks.
    pub fn poll(&mut self, now: Instant) -> Option<Click> {
        if !self.running {
            return None;
        }
        let due = self.next_tick?;
        if now < due {
            return None;
        }
        let click = self.tick(due);
        if let Some(next) = self.next_tick {
            if next <= now {
                self.next_tick = Some(now + self.interval());
            }
        }
        Some(click)
    }

    fn tick(&mut self, at: Instant) -> Click {
        let click = Click {
            beat: self.beat,
            accent: self.beat == 0,
        };
        self.beat = (self.beat + 1) % self.signature.beats.max(1);
        self.next_tick = Some(at + self.interval());
        self.last_click = Some(click);
        click
    }
}

/// Plays clicks on a dedicated MIDI channel
pub struct MetronomeClicker {
    output: Rc<dyn MidiOutput>,
    channel: u8,
    sounding: Option<u8>,
}

impl MetronomeClicker {
    pub fn new(output: Rc<dyn MidiOutput>, channel: u8) -> Result<Self> {
        let clicker = Self {
            output,
            channel: channel.min(15),
            sounding: None,
        };
        clicker.output.send(MidiMessage::ProgramChange {
            channel: clicker.channel,
            program: CLICK_PROGRAM,
        })?;
        Ok(clicker)
    }

    pub fn set_volume(&self, db: f64) -> Result<()> {
        self.output.send(MidiMessage::ControlChange {
            channel: self.channel,
            controller: CC_VOLUME,
            value: volume_to_cc(db),
        })
    }

    /// Sound a click, cutting the previous one
    pub fn play(&mut self, click: Click) -> Result<()> {
        self.silence()?;
        let note = click
            .note()
            .midi()
            .ok_or_else(|| Error::Engine(format!("click note {} out of range", click.note())))?;
        let velocity = if click.accent { ACCENT_VELOCITY } else { BEAT_VELOCITY };
        self.output.send(MidiMessage::NoteOn {
            channel: self.channel,
            note,
            velocity,
        })?;
        self.sounding = Some(note);
        Ok(())
    }

    pub fn silence(&mut self) -> Result<()> {
        if let Some(note) = self.sounding.take() {
            self.output.send(MidiMessage::NoteOff { channel: self.channel, note })?;
        }
        Ok(())
    }

    pub fn dispose(&mut self) -> Result<()> {
        self.silence()?;
        self.output.send(MidiMessage::ControlChange {
            channel: self.channel,
            controller: CC_ALL_NOTES_OFF,
            value: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingOutput {
        sent: Mutex<Vec<MidiMessage>>,
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

    #[test]
    fn test_parse_time_signature() {
        assert_eq!("3/4".parse::<TimeSignature>().unwrap(), TimeSignature { beats: 3, division: 4 });
        assert_eq!("6/8".parse::<TimeSignature>().unwrap().to_string(), "6/8");
        assert!("4".parse::<TimeSignature>().is_err());
        assert!("0/4".parse::<TimeSignature>().is_err());
        assert!("x/4".parse::<TimeSignature>().is_err());
    }

    #[test]
    fn test_signature_cycle() {
        let mut sig = TimeSignature::default();
        let mut seen = Vec::new();
        for _ in 0..4 {
            sig = sig.next();
            seen.push(sig.to_string());
        }
        assert_eq!(seen, vec!["6/8", "2/4", "3/4", "4/4"]);
    }

    #[test]
    fn test_start_plays_downbeat_immediately() {
        let t0 = Instant::now();
        let mut metronome = Metronome::default();
        let click = metronome.start(t0).unwrap();
        assert_eq!(click, Click { beat: 0, accent: true });
        assert_eq!(click.note().to_string(), "G5");
        assert!(metronome.start(t0).is_none());
    }

    #[test]
    fn test_bar_wraps_with_accent() {
        let t0 = Instant::now();
        let mut metronome = Metronome::new(120, "3/4".parse().unwrap());
        metronome.start(t0);

        assert!(metronome.poll(t0 + Duration::from_millis(499)).is_none());
        let beats: Vec<Click> = (1..=4)
            .filter_map(|i| metronome.poll(t0 + Duration::from_millis(500 * i)))
            .collect();
        assert_eq!(
            beats,
            vec![
                Click { beat: 1, accent: false },
                Click { beat: 2, accent: false },
                Click { beat: 0, accent: true },
                Click { beat: 1, accent: false },
            ]
        );
        assert_eq!(beats[0].note().to_string(), "C5");
    }

    #[test]
    fn test_stop_resets_and_silences_polling() {
        let t0 = Instant::now();
        let mut metronome = Metronome::default();
        metronome.start(t0);
        metronome.poll(t0 + Duration::from_millis(500));
        metronome.stop();
        assert_eq!(metronome.beat(), 0);
        assert!(metronome.poll(t0 + Duration::from_secs(5)).is_none());
    }

    #[test]
    fn test_tempo_change_while_running() {
        let t0 = Instant::now();
        let mut metronome = Metronome::default();
        metronome.start(t0);
        metronome.set_bpm(60);
        // The already scheduled tick keeps its time, the next one uses the new tempo.
        assert!(metronome.poll(t0 + Duration::from_millis(500)).is_some());
        assert!(metronome.poll(t0 + Duration::from_millis(1400)).is_none());
        assert!(metronome.poll(t0 + Duration::from_millis(1500)).is_some());
    }

    #[test]
    fn test_stall_does_not_burst() {
        let t0 = Instant::now();
        let mut metronome = Metronome::default();
        metronome.start(t0);
        let late = t0 + Duration::from_secs(10);
        assert!(metronome.poll(late).is_some());
        assert!(metronome.poll(late).is_none());
        assert!(metronome.poll(late + Duration::from_millis(500)).is_some());
    }

    #[test]
    fn test_bpm_is_clamped() {
        let mut metronome = Metronome::new(10, TimeSignature::default());
        assert_eq!(metronome.bpm(), MIN_BPM);
        metronome.nudge_bpm(1000);
        assert_eq!(metronome.bpm(), MAX_BPM);
    }

    #[test]
    fn test_signature_change_restarts_bar() {
        let t0 = Instant::now();
        let mut metronome = Metronome::default();
        metronome.start(t0);
        metronome.poll(t0 + Duration::from_millis(500));
        assert_eq!(metronome.beat(), 2);
        metronome.set_signature("2/4".parse().unwrap());
        assert_eq!(metronome.beat(), 0);
    }

    #[test]
    fn test_clicker_cuts_previous_click() {
        let output = Rc::new(RecordingOutput { sent: Mutex::new(Vec::new()) });
        let mut clicker = MetronomeClicker::new(output.clone(), 9).unwrap();
        clicker.play(Click { beat: 0, accent: true }).unwrap();
        clicker.play(Click { beat: 1, accent: false }).unwrap();
        clicker.dispose().unwrap();

        let sent = output.sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![
                MidiMessage::ProgramChange { channel: 9, program: CLICK_PROGRAM },
                MidiMessage::NoteOn { channel: 9, note: 79, velocity: ACCENT_VELOCITY },
                MidiMessage::NoteOff { channel: 9, note: 79 },
                MidiMessage::NoteOn { channel: 9, note: 72, velocity: BEAT_VELOCITY },
                MidiMessage::NoteOff { channel: 9, note: 72 },
                MidiMessage::ControlChange { channel: 9, controller: CC_ALL_NOTES_OFF, value: 0 },
            ]
        );
    }
}
