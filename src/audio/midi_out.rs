use midir::{MidiOutput, MidiOutputConnection};
use tracing::{debug, info, warn};

use super::VoiceSink;
use crate::error::AudioError;
use crate::events::VoiceMessage;

const CLIENT_NAME: &str = "jidi";

pub fn list_output_ports() -> Result<Vec<String>, AudioError> {
    let output = MidiOutput::new(CLIENT_NAME).map_err(|e| AudioError::Init(e.to_string()))?;
    Ok(output
        .ports()
        .iter()
        .filter_map(|p| output.port_name(p).ok())
        .collect())
}

/// Sends voice messages to a MIDI output port.
pub struct MidiOutSink {
    port_filter: Option<String>,
    connection: Option<MidiOutputConnection>,
}

impl MidiOutSink {
    /// `port_filter` picks the first port whose name contains it; otherwise
    /// the first available port is used.
    pub fn new(port_filter: Option<String>) -> Self {
        Self {
            port_filter,
            connection: None,
        }
    }
}

impl VoiceSink for MidiOutSink {
    fn initialize(&mut self) -> Result<(), AudioError> {
        if self.connection.is_some() {
            return Ok(());
        }

        let output = MidiOutput::new(CLIENT_NAME).map_err(|e| AudioError::Init(e.to_string()))?;
        let ports = output.ports();
        for (i, port) in ports.iter().enumerate() {
            debug!(index = i, name = %output.port_name(port).unwrap_or_default(), "MIDI output");
        }

        let port = match &self.port_filter {
            Some(filter) => ports
                .iter()
                .find(|p| output.port_name(p).unwrap_or_default().contains(filter.as_str())),
            None => ports.first(),
        }
        .ok_or(AudioError::NoOutputPort)?;

        let name = output.port_name(port).unwrap_or_default();
        let connection = output
            .connect(port, "jidi-output")
            .map_err(|e| AudioError::Init(e.to_string()))?;
        info!(port = %name, "Connected MIDI output");

        self.connection = Some(connection);
        Ok(())
    }

    fn emit(&mut self, message: VoiceMessage) -> Result<(), AudioError> {
        let connection = self.connection.as_mut().ok_or(AudioError::NotInitialized)?;
        let (bytes, len) = message.bytes();
        connection
            .send(&bytes[..len])
            .map_err(|e| AudioError::Send(e.to_string()))
    }

    fn terminate(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = super::silence_all(&mut SendOnly(&mut connection)) {
                warn!("Failed to silence output on close: {}", e);
            }
            connection.close();
            info!("Closed MIDI output");
        }
    }
}

/// Lets [`silence_all`](super::silence_all) write to a bare connection.
struct SendOnly<'a>(&'a mut MidiOutputConnection);

impl VoiceSink for SendOnly<'_> {
    fn initialize(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn emit(&mut self, message: VoiceMessage) -> Result<(), AudioError> {
        let (bytes, len) = message.bytes();
        self.0
            .send(&bytes[..len])
            .map_err(|e| AudioError::Send(e.to_string()))
    }

    fn terminate(&mut self) {}
}
