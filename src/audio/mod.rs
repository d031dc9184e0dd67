mod midi_out;

pub use midi_out::{MidiOutSink, list_output_ports};

use crate::error::AudioError;
use crate::events::VoiceMessage;

/// Receiver of the voice messages produced during playback.
///
/// `initialize` must succeed before playback starts; `terminate` is called
/// once when the session ends.
pub trait VoiceSink {
    fn initialize(&mut self) -> Result<(), AudioError>;
    fn emit(&mut self, message: VoiceMessage) -> Result<(), AudioError>;
    fn terminate(&mut self);
}

/// Discards everything. Used for dry runs and analysis.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl VoiceSink for NullSink {
    fn initialize(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn emit(&mut self, _message: VoiceMessage) -> Result<(), AudioError> {
        Ok(())
    }

    fn terminate(&mut self) {}
}

/// All-notes-off then reset-controllers on every channel.
pub fn silence_all<S: VoiceSink + ?Sized>(sink: &mut S) -> Result<(), AudioError> {
    for channel in 0..16 {
        sink.emit(VoiceMessage::all_notes_off(channel))?;
        sink.emit(VoiceMessage::reset_controllers(channel))?;
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;

    #[test]
    fn silence_covers_every_channel() {
        let mut sink = RecordingSink::default();
        sink.initialize().unwrap();
        silence_all(&mut sink).unwrap();

        assert_eq!(sink.messages.len(), 32);
        assert_eq!(sink.messages[0], VoiceMessage::all_notes_off(0));
        assert_eq!(sink.messages[31], VoiceMessage::reset_controllers(15));
    }

    #[test]
    fn recording_sink_requires_initialize() {
        let mut sink = RecordingSink::default();
        assert!(matches!(
            silence_all(&mut sink),
            Err(AudioError::NotInitialized)
        ));
    }
}
