/// A three-byte (or two-byte) channel-voice message as handed to a
/// [`VoiceSink`](crate::audio::VoiceSink).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceMessage {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

pub const CC_RESET_CONTROLLERS: u8 = 121;
pub const CC_ALL_NOTES_OFF: u8 = 123;

impl VoiceMessage {
    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        Self {
            status: 0xB0 | (channel & 0x0F),
            data1: controller,
            data2: value,
        }
    }

    pub fn all_notes_off(channel: u8) -> Self {
        Self::control_change(channel, CC_ALL_NOTES_OFF, 0)
    }

    pub fn reset_controllers(channel: u8) -> Self {
        Self::control_change(channel, CC_RESET_CONTROLLERS, 0)
    }

    pub fn wire_len(&self) -> usize {
        1 + crate::midi::data_len(self.status)
    }

    /// Wire bytes; program change and channel pressure carry one data byte.
    pub fn bytes(&self) -> ([u8; 3], usize) {
        ([self.status, self.data1, self.data2], self.wire_len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Tempo {
        micros_per_beat: u32,
    },
    Marker {
        text: Box<str>,
    },
    NoteOff {
        channel: u8,
        pitch: u8,
        track: u16,
    },
    NoteOn {
        channel: u8,
        pitch: u8,
        velocity: u8,
        track: u16,
    },
    ControlChange {
        channel: u8,
        controller: u8,
        value: u8,
        track: u16,
    },
    ProgramChange {
        channel: u8,
        program: u8,
        track: u16,
    },
    /// 14-bit value, 8192 is centre.
    PitchBend {
        channel: u8,
        value: u16,
        track: u16,
    },
    ChannelPressure {
        channel: u8,
        pressure: u8,
        track: u16,
    },
    KeyPressure {
        channel: u8,
        pitch: u8,
        pressure: u8,
        track: u16,
    },
}

/// Same-tick ordering: tempo, marker, note-off, other channel events, note-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rank {
    Tempo,
    Marker,
    NoteOff,
    Channel,
    NoteOn,
    /// Note-off of a zero-length note, kept after its own note-on.
    TrailingNoteOff,
}

impl EventKind {
    /// Builds a non-note channel event from a decoded message. Note-on and
    /// note-off are produced from paired notes instead.
    pub fn from_channel_message(status: u8, data1: u8, data2: u8, track: u16) -> Option<Self> {
        let channel = status & 0x0F;
        let kind = match status & 0xF0 {
            0xA0 => EventKind::KeyPressure {
                channel,
                pitch: data1,
                pressure: data2,
                track,
            },
            0xB0 => EventKind::ControlChange {
                channel,
                controller: data1,
                value: data2,
                track,
            },
            0xC0 => EventKind::ProgramChange {
                channel,
                program: data1,
                track,
            },
            0xD0 => EventKind::ChannelPressure {
                channel,
                pressure: data1,
                track,
            },
            0xE0 => EventKind::PitchBend {
                channel,
                value: ((data2 as u16 & 0x7F) << 7) | (data1 as u16 & 0x7F),
                track,
            },
            _ => return None,
        };
        Some(kind)
    }

    pub fn rank(&self) -> Rank {
        match self {
            EventKind::Tempo { .. } => Rank::Tempo,
            EventKind::Marker { .. } => Rank::Marker,
            EventKind::NoteOff { .. } => Rank::NoteOff,
            EventKind::NoteOn { .. } => Rank::NoteOn,
            _ => Rank::Channel,
        }
    }

    pub fn channel(&self) -> Option<u8> {
        match *self {
            EventKind::Tempo { .. } | EventKind::Marker { .. } => None,
            EventKind::NoteOff { channel, .. }
            | EventKind::NoteOn { channel, .. }
            | EventKind::ControlChange { channel, .. }
            | EventKind::ProgramChange { channel, .. }
            | EventKind::PitchBend { channel, .. }
            | EventKind::ChannelPressure { channel, .. }
            | EventKind::KeyPressure { channel, .. } => Some(channel),
        }
    }

    pub fn is_note(&self) -> bool {
        matches!(self, EventKind::NoteOn { .. } | EventKind::NoteOff { .. })
    }

    /// The message to emit for this event, if it is a voice event.
    pub fn voice_message(&self) -> Option<VoiceMessage> {
        let (status, data1, data2) = match *self {
            EventKind::Tempo { .. } | EventKind::Marker { .. } => return None,
            EventKind::NoteOff { channel, pitch, .. } => (0x80 | channel, pitch, 0),
            EventKind::NoteOn {
                channel,
                pitch,
                velocity,
                ..
            } => (0x90 | channel, pitch, velocity),
            EventKind::KeyPressure {
                channel,
                pitch,
                pressure,
                ..
            } => (0xA0 | channel, pitch, pressure),
            EventKind::ControlChange {
                channel,
                controller,
                value,
                ..
            } => (0xB0 | channel, controller, value),
            EventKind::ProgramChange {
                channel, program, ..
            } => (0xC0 | channel, program, 0),
            EventKind::ChannelPressure {
                channel, pressure, ..
            } => (0xD0 | channel, pressure, 0),
            EventKind::PitchBend { channel, value, .. } => {
                (0xE0 | channel, (value & 0x7F) as u8, (value >> 7 & 0x7F) as u8)
            }
        };
        Some(VoiceMessage {
            status,
            data1,
            data2,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedEvent {
    pub tick: u64,
    pub kind: EventKind,
}

impl UnifiedEvent {
    pub fn new(tick: u64, kind: EventKind) -> Self {
        Self { tick, kind }
    }
}
