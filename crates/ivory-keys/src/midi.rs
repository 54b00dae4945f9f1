//! MIDI output backends
//!
//! The piano talks to its synthesizer over JACK MIDI. Without a JACK server
//! the session falls back to a silent engine.

use crate::config::MidiSettings;
use crate::error::Result;
use std::sync::mpsc::{channel, Receiver, Sender};

/// Controller number for channel volume
pub const CC_VOLUME: u8 = 7;
/// Controller number for "all notes off"
pub const CC_ALL_NOTES_OFF: u8 = 123;

/// MIDI message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note on: channel, note, velocity
    NoteOn { channel: u8, note: u8, velocity: u8 },
    /// Note off: channel, note
    NoteOff { channel: u8, note: u8 },
    /// Control change: channel, controller, value
    ControlChange { channel: u8, controller: u8, value: u8 },
    /// Program change: channel, program
    ProgramChange { channel: u8, program: u8 },
}

impl MidiMessage {
    /// Convert to raw MIDI bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            MidiMessage::NoteOn { channel, note, velocity } => {
                vec![0x90 | (channel & 0x0F), *note & 0x7F, *velocity & 0x7F]
            }
            MidiMessage::NoteOff { channel, note } => {
                vec![0x80 | (channel & 0x0F), *note & 0x7F, 0]
            }
            MidiMessage::ControlChange { channel, controller, value } => {
                vec![0xB0 | (channel & 0x0F), *controller & 0x7F, *value & 0x7F]
            }
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), *program & 0x7F]
            }
        }
    }
}

/// MIDI output trait
pub trait MidiOutput: Send {
    /// Queue a message for output
    fn send(&self, message: MidiMessage) -> Result<()>;

    /// Get the port name
    fn port_name(&self) -> &str;
}

/// JACK MIDI output
pub struct JackMidiOutput {
    /// Sender for MIDI messages to the JACK process callback
    tx: Sender<MidiMessage>,
    /// Port name
    port_name: String,
    /// Active client; dropping it deactivates the port
    client: jack::AsyncClient<(), JackMidiHandler>,
}

impl JackMidiOutput {
    /// Create a new JACK MIDI output
    pub fn new(client_name: &str, port_name: &str) -> Result<Self> {
        let (client, _status) = jack::Client::new(client_name, jack::ClientOptions::NO_START_SERVER)?;
        let midi_out = client.register_port(port_name, jack::MidiOut::default())?;

        let (tx, rx) = channel();
        let handler = JackMidiHandler { midi_out, rx };
        let active_client = client.activate_async((), handler)?;

        let full_port_name = format!("{}:{}", client_name, port_name);
        log::info!("JACK MIDI output registered as {}", full_port_name);

        Ok(Self {
            tx,
            port_name: full_port_name,
            client: active_client,
        })
    }

    /// Create from settings, connecting to any configured destinations
    pub fn from_settings(settings: &MidiSettings) -> Result<Self> {
        let output = Self::new(&settings.client_name, &settings.port_name)?;

        if let Some(ref destinations) = settings.auto_connect {
            for dest in destinations {
                if let Err(e) = output.connect_to(dest) {
                    log::warn!("Failed to auto-connect to {}: {}", dest, e);
                }
            }
        }

        Ok(output)
    }

    /// Connect the output port to a JACK MIDI input port
    pub fn connect_to(&self, destination: &str) -> Result<()> {
        self.client
            .as_client()
            .connect_ports_by_name(&self.port_name, destination)?;
        log::info!("Connected {} -> {}", self.port_name, destination);
        Ok(())
    }
}

impl MidiOutput for JackMidiOutput {
    fn send(&self, message: MidiMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|e| crate::error::Error::Midi(format!("JACK process thread gone: {}", e)))
    }

    fn port_name(&self) -> &str {
        &self.port_name
    }
}

/// JACK process handler for MIDI output
struct JackMidiHandler {
    midi_out: jack::Port<jack::MidiOut>,
    rx: Receiver<MidiMessage>,
}

impl jack::ProcessHandler for JackMidiHandler {
    fn process(&mut self, _client: &jack::Client, ps: &jack::ProcessScope) -> jack::Control {
        let mut writer = self.midi_out.writer(ps);

        while let Ok(msg) = self.rx.try_recv() {
            let bytes = msg.to_bytes();
            let raw = jack::RawMidi {
                time: 0, // Immediate
                bytes: &bytes,
            };
            let _ = writer.write(&raw);
        }

        jack::Control::Continue
    }
}

/// Check if JACK is running
pub fn is_jack_running() -> bool {
    jack::Client::new("ivory-keys-probe", jack::ClientOptions::NO_START_SERVER).is_ok()
}

/// List available JACK MIDI input ports
pub fn list_jack_midi_ports() -> Vec<String> {
    if let Ok((client, _)) = jack::Client::new("ivory-keys-list", jack::ClientOptions::NO_START_SERVER) {
        client.ports(None, Some("midi"), jack::PortFlags::IS_INPUT)
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_midi_message_bytes() {
        let note_on = MidiMessage::NoteOn { channel: 0, note: 60, velocity: 100 };
        assert_eq!(note_on.to_bytes(), vec![0x90, 60, 100]);

        let note_off = MidiMessage::NoteOff { channel: 1, note: 48 };
        assert_eq!(note_off.to_bytes(), vec![0x81, 48, 0]);

        let cc = MidiMessage::ControlChange { channel: 0, controller: CC_VOLUME, value: 64 };
        assert_eq!(cc.to_bytes(), vec![0xB0, 7, 64]);

        let pc = MidiMessage::ProgramChange { channel: 9, program: 81 };
        assert_eq!(pc.to_bytes(), vec![0xC9, 81]);
    }
}
