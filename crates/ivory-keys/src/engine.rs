//! Sound engine capability
//!
//! The controller never synthesizes audio itself. It drives a [`SoundEngine`]
//! through a narrow contract: attack, release, envelope, volume and dispose.
//! Engines must tolerate a release without a prior attack (and vice versa);
//! any error they return is logged by the caller and otherwise ignored.

use crate::envelope::{Adsr, AdsrField};
use crate::error::{Error, Result};
use crate::midi::{MidiMessage, MidiOutput, CC_ALL_NOTES_OFF, CC_VOLUME};
use crate::note::Note;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Default output level in dB
pub const DEFAULT_VOLUME_DB: f64 = -12.0;
/// Quietest selectable output level in dB
pub const MIN_VOLUME_DB: f64 = -40.0;
/// Loudest selectable output level in dB
pub const MAX_VOLUME_DB: f64 = 0.0;

/// Sound-controller numbers used for the envelope (GM2 sound controllers)
const CC_RELEASE_TIME: u8 = 72;
const CC_ATTACK_TIME: u8 = 73;
const CC_DECAY_TIME: u8 = 75;
const CC_SUSTAIN_LEVEL: u8 = 79;

/// Something that can make notes sound
pub trait SoundEngine {
    /// Start sounding a note
    fn attack(&mut self, note: Note) -> Result<()>;

    /// Stop sounding a note
    fn release(&mut self, note: Note) -> Result<()>;

    /// Update the amplitude envelope for subsequent notes
    fn set_envelope(&mut self, envelope: &Adsr) -> Result<()>;

    /// Set the output level in dB
    fn set_volume(&mut self, db: f64) -> Result<()>;

    /// Silence everything and release resources before the engine is replaced
    fn dispose(&mut self) -> Result<()>;

    /// Short human-readable description for the status line
    fn describe(&self) -> String;
}

/// Instrument voices the piano can switch between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Instrument {
    #[default]
    Synth,
    #[serde(rename = "AMSynth")]
    AmSynth,
    #[serde(rename = "FMSynth")]
    FmSynth,
    DuoSynth,
    MonoSynth,
    MembraneSynth,
    MetalSynth,
}

impl Instrument {
    pub const ALL: [Instrument; 7] = [
        Instrument::Synth,
        Instrument::AmSynth,
        Instrument::FmSynth,
        Instrument::DuoSynth,
        Instrument::MonoSynth,
        Instrument::MembraneSynth,
        Instrument::MetalSynth,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Instrument::Synth => "Synth",
            Instrument::AmSynth => "AM Synth",
            Instrument::FmSynth => "FM Synth",
            Instrument::DuoSynth => "Duo Synth",
            Instrument::MonoSynth => "Mono Synth",
            Instrument::MembraneSynth => "Membrane",
            Instrument::MetalSynth => "Metal",
        }
    }

    /// General MIDI program (0-based) closest to this voice
    pub fn program(self) -> u8 {
        match self {
            Instrument::Synth => 0,          // Acoustic Grand Piano
            Instrument::AmSynth => 89,       // Pad 2 (warm)
            Instrument::FmSynth => 5,        // Electric Piano 2
            Instrument::DuoSynth => 81,      // Lead 2 (sawtooth)
            Instrument::MonoSynth => 38,     // Synth Bass 1
            Instrument::MembraneSynth => 117, // Melodic Tom
            Instrument::MetalSynth => 14,    // Tubular Bells
        }
    }

    /// Next voice in selector order, wrapping around
    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|i| *i == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    /// Previous voice in selector order, wrapping around
    pub fn prev(self) -> Self {
        let idx = Self::ALL.iter().position(|i| *i == self).unwrap_or(0);
        Self::ALL[(idx + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

/// Convert a level in dB to a channel-volume controller value.
///
/// Uses the GM curve `dB = 40 * log10(value / 127)`.
pub fn volume_to_cc(db: f64) -> u8 {
    let db = db.clamp(MIN_VOLUME_DB, MAX_VOLUME_DB);
    (127.0 * 10f64.powf(db / 40.0)).round().clamp(0.0, 127.0) as u8
}

/// Scale a 0.0-1.0 amount to a 7-bit controller value
fn unit_to_cc(amount: f64) -> u8 {
    (amount.clamp(0.0, 1.0) * 127.0).round() as u8
}

/// Sound engine backed by an external MIDI synthesizer
pub struct MidiSoundEngine {
    output: Rc<dyn MidiOutput>,
    channel: u8,
    velocity: u8,
    instrument: Instrument,
}

impl MidiSoundEngine {
    /// Create an engine on `channel` and select the instrument's program
    pub fn new(output: Rc<dyn MidiOutput>, channel: u8, velocity: u8, instrument: Instrument) -> Result<Self> {
        let engine = Self {
            output,
            channel: channel.min(15),
            velocity: velocity.clamp(1, 127),
            instrument,
        };
        engine.output.send(MidiMessage::ProgramChange {
            channel: engine.channel,
            program: instrument.program(),
        })?;
        Ok(engine)
    }

    fn midi_note(note: Note) -> Result<u8> {
        note.midi()
            .ok_or_else(|| Error::Engine(format!("{} is outside the MIDI note range", note)))
    }

    fn cc(&self, controller: u8, value: u8) -> Result<()> {
        self.output.send(MidiMessage::ControlChange {
            channel: self.channel,
            controller,
            value,
        })
    }
}

impl SoundEngine for MidiSoundEngine {
    fn attack(&mut self, note: Note) -> Result<()> {
        let note = Self::midi_note(note)?;
        self.output.send(MidiMessage::NoteOn {
            channel: self.channel,
            note,
            velocity: self.velocity,
        })
    }

    fn release(&mut self, note: Note) -> Result<()> {
        let note = Self::midi_note(note)?;
        self.output.send(MidiMessage::NoteOff { channel: self.channel, note })
    }

    fn set_envelope(&mut self, envelope: &Adsr) -> Result<()> {
        let values = [
            (CC_ATTACK_TIME, AdsrField::Attack),
            (CC_DECAY_TIME, AdsrField::Decay),
            (CC_SUSTAIN_LEVEL, AdsrField::Sustain),
            (CC_RELEASE_TIME, AdsrField::Release),
        ];
        for (controller, field) in values {
            self.cc(controller, unit_to_cc(field.normalized(envelope.get(field))))?;
        }
        Ok(())
    }

    fn set_volume(&mut self, db: f64) -> Result<()> {
        self.cc(CC_VOLUME, volume_to_cc(db))
    }

    fn dispose(&mut self) -> Result<()> {
        self.cc(CC_ALL_NOTES_OFF, 0)
    }

    fn describe(&self) -> String {
        format!("{} -> {}", self.instrument.name(), self.output.port_name())
    }
}

/// Engine that only logs; used when no synthesizer is reachable
#[derive(Debug, Default)]
pub struct SilentEngine {
    instrument: Instrument,
}

impl SilentEngine {
    pub fn new(instrument: Instrument) -> Self {
        Self { instrument }
    }
}

impl SoundEngine for SilentEngine {
    fn attack(&mut self, note: Note) -> Result<()> {
        log::debug!("silent attack {}", note);
        Ok(())
    }

    fn release(&mut self, note: Note) -> Result<()> {
        log::debug!("silent release {}", note);
        Ok(())
    }

    fn set_envelope(&mut self, envelope: &Adsr) -> Result<()> {
        log::debug!("silent envelope {:?}", envelope);
        Ok(())
    }

    fn set_volume(&mut self, db: f64) -> Result<()> {
        log::debug!("silent volume {} dB", db);
        Ok(())
    }

    fn dispose(&mut self) -> Result<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} (no output)", self.instrument.name())
    }
}

/// Where new engines send their notes
#[derive(Clone)]
pub enum EngineBackend {
    /// A MIDI output on one channel
    Midi {
        output: Rc<dyn MidiOutput>,
        channel: u8,
        velocity: u8,
    },
    /// Nowhere; notes are only logged
    Silent,
}

impl EngineBackend {
    /// Build an engine for an instrument.
    ///
    /// Falls back to a [`SilentEngine`] when the MIDI output refuses the
    /// program change, so the piano stays playable.
    pub fn create(&self, instrument: Instrument) -> Box<dyn SoundEngine> {
        match self {
            EngineBackend::Midi { output, channel, velocity } => {
                match MidiSoundEngine::new(output.clone(), *channel, *velocity, instrument) {
                    Ok(engine) => Box::new(engine),
                    Err(e) => {
                        log::error!("Cannot select {} on {}: {}", instrument.name(), output.port_name(), e);
                        Box::new(SilentEngine::new(instrument))
                    }
                }
            }
            EngineBackend::Silent => Box::new(SilentEngine::new(instrument)),
        }
    }

    /// The MIDI output, if any
    pub fn output(&self) -> Option<Rc<dyn MidiOutput>> {
        match self {
            EngineBackend::Midi { output, .. } => Some(output.clone()),
            EngineBackend::Silent => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
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

    fn engine(instrument: Instrument) -> (Rc<RecordingOutput>, MidiSoundEngine) {
        let output = Rc::new(RecordingOutput::default());
        let engine = MidiSoundEngine::new(output.clone(), 2, 100, instrument).unwrap();
        (output, engine)
    }

    #[test]
    fn test_new_selects_program() {
        let (output, _engine) = engine(Instrument::FmSynth);
        assert_eq!(
            output.sent.lock().unwrap().as_slice(),
            &[MidiMessage::ProgramChange { channel: 2, program: 5 }]
        );
    }

    #[test]
    fn test_attack_and_release() {
        let (output, mut engine) = engine(Instrument::Synth);
        let c4: Note = "C4".parse().unwrap();
        engine.attack(c4).unwrap();
        engine.release(c4).unwrap();
        let sent = output.sent.lock().unwrap();
        assert_eq!(sent[1], MidiMessage::NoteOn { channel: 2, note: 60, velocity: 100 });
        assert_eq!(sent[2], MidiMessage::NoteOff { channel: 2, note: 60 });
    }

    #[test]
    fn test_out_of_range_note_is_an_error() {
        let (_output, mut engine) = engine(Instrument::Synth);
        let too_high: Note = "C10".parse().unwrap();
        assert!(matches!(engine.attack(too_high), Err(Error::Engine(_))));
    }

    #[test]
    fn test_volume_curve() {
        assert_eq!(volume_to_cc(0.0), 127);
        assert_eq!(volume_to_cc(-12.0), 64);
        assert_eq!(volume_to_cc(-40.0), 13);
        assert_eq!(volume_to_cc(-100.0), 13);
        assert_eq!(volume_to_cc(6.0), 127);
    }

    #[test]
    fn test_envelope_sends_sound_controllers() {
        let (output, mut engine) = engine(Instrument::Synth);
        engine.set_envelope(&Adsr::default()).unwrap();
        let sent = output.sent.lock().unwrap();
        assert_eq!(sent.len(), 5);
        assert!(sent.contains(&MidiMessage::ControlChange { channel: 2, controller: CC_ATTACK_TIME, value: 0 }));
        assert!(sent.contains(&MidiMessage::ControlChange { channel: 2, controller: CC_SUSTAIN_LEVEL, value: 127 }));
    }

    #[test]
    fn test_backend_creates_engines() {
        let output = Rc::new(RecordingOutput::default());
        let backend = EngineBackend::Midi { output: output.clone(), channel: 0, velocity: 90 };
        let engine = backend.create(Instrument::MetalSynth);
        assert_eq!(engine.describe(), "Metal -> recording");
        assert_eq!(
            output.sent.lock().unwrap().as_slice(),
            &[MidiMessage::ProgramChange { channel: 0, program: 14 }]
        );
        assert_eq!(EngineBackend::Silent.create(Instrument::Synth).describe(), "Synth (no output)");
        assert!(EngineBackend::Silent.output().is_none());
    }

    #[test]
    fn test_instrument_cycle() {
        assert_eq!(Instrument::Synth.next(), Instrument::AmSynth);
        assert_eq!(Instrument::Synth.prev(), Instrument::MetalSynth);
        assert_eq!(Instrument::MetalSynth.next(), Instrument::Synth);
        let json = serde_json::to_string(&Instrument::FmSynth).unwrap();
        assert_eq!(json, "\"FMSynth\"");
    }
}
