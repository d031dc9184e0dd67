use tracing::trace;

use super::varlen::ByteCursor;
use crate::config::TempoSettings;
use crate::error::Diagnostic;

pub const META_TRACK_NAME: u8 = 0x03;
pub const META_MARKER: u8 = 0x06;
pub const META_END_OF_TRACK: u8 = 0x2F;
pub const META_TEMPO: u8 = 0x51;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind<'a> {
    /// Channel-voice message; `data2` is 0 for single-data-byte statuses.
    Channel { status: u8, data1: u8, data2: u8 },
    /// Already range-checked.
    Tempo { micros_per_beat: u32 },
    Meta { kind: u8, data: &'a [u8] },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent<'a> {
    pub tick: u64,
    pub kind: RawKind<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeSummary {
    pub end_tick: u64,
    pub bytes_read: usize,
    pub truncated: bool,
    pub saw_end_of_track: bool,
    pub diagnostics: Vec<Diagnostic>,
}

/// Number of data bytes following a channel-voice status.
pub fn data_len(status: u8) -> usize {
    match status & 0xF0 {
        0xC0 | 0xD0 => 1,
        _ => 2,
    }
}

/// Walks one track payload, yielding events with absolute ticks.
///
/// Stops at end-of-track or at the first event that runs past the payload.
pub struct EventDecoder<'a> {
    cursor: ByteCursor<'a>,
    track: u16,
    tempo: TempoSettings,
    tick: u64,
    running_status: Option<u8>,
    done: bool,
    truncated: bool,
    saw_end_of_track: bool,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> EventDecoder<'a> {
    pub fn new(data: &'a [u8], track: u16, tempo: &TempoSettings) -> Self {
        Self {
            cursor: ByteCursor::new(data),
            track,
            tempo: tempo.clone(),
            tick: 0,
            running_status: None,
            done: false,
            truncated: false,
            saw_end_of_track: false,
            diagnostics: Vec::new(),
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn finish(self) -> DecodeSummary {
        DecodeSummary {
            end_tick: self.tick,
            bytes_read: self.cursor.position(),
            truncated: self.truncated,
            saw_end_of_track: self.saw_end_of_track,
            diagnostics: self.diagnostics,
        }
    }

    fn truncate(&mut self, offset: usize) -> Option<RawEvent<'a>> {
        self.diagnostics.push(Diagnostic::TrackTruncated {
            track: self.track,
            offset,
            tick: self.tick,
        });
        self.truncated = true;
        self.done = true;
        self.cursor.exhaust();
        None
    }

    fn skip_sized_payload(&mut self, event_start: usize) -> Result<&'a [u8], ()> {
        let len = self.cursor.read_varlen();
        if len.truncated {
            self.truncate(event_start);
            return Err(());
        }
        match self.cursor.take(len.value as usize) {
            Some(payload) => Ok(payload),
            None => {
                self.truncate(event_start);
                Err(())
            }
        }
    }
}

impl<'a> Iterator for EventDecoder<'a> {
    type Item = RawEvent<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done || self.cursor.is_empty() {
                self.done = true;
                return None;
            }

            let event_start = self.cursor.position();
            let delta = self.cursor.read_varlen();
            if delta.truncated {
                return self.truncate(event_start);
            }
            self.tick += delta.value as u64;

            let Some(first) = self.cursor.peek() else {
                return self.truncate(event_start);
            };
            let status = if first & 0x80 != 0 {
                self.cursor.read_u8();
                first
            } else if let Some(latched) = self.running_status {
                latched
            } else {
                trace!(track = self.track, offset = event_start, "data byte without running status");
                self.cursor.read_u8();
                continue;
            };

            match status {
                0x80..=0xEF => {
                    self.running_status = Some(status);
                    let Some(data) = self.cursor.take(data_len(status)) else {
                        return self.truncate(event_start);
                    };
                    return Some(RawEvent {
                        tick: self.tick,
                        kind: RawKind::Channel {
                            status,
                            data1: data[0],
                            data2: data.get(1).copied().unwrap_or(0),
                        },
                    });
                }
                0xFF => {
                    let Some(kind) = self.cursor.read_u8() else {
                        return self.truncate(event_start);
                    };
                    let Ok(data) = self.skip_sized_payload(event_start) else {
                        return None;
                    };

                    match kind {
                        META_END_OF_TRACK => {
                            self.saw_end_of_track = true;
                            self.done = true;
                            return None;
                        }
                        META_TEMPO if data.len() == 3 => {
                            let micros_per_beat =
                                u32::from_be_bytes([0, data[0], data[1], data[2]]);
                            if self.tempo.accepts(micros_per_beat) {
                                return Some(RawEvent {
                                    tick: self.tick,
                                    kind: RawKind::Tempo { micros_per_beat },
                                });
                            }
                            self.diagnostics.push(Diagnostic::InvalidTempoValue {
                                track: self.track,
                                tick: self.tick,
                                micros_per_beat,
                            });
                        }
                        _ => {
                            return Some(RawEvent {
                                tick: self.tick,
                                kind: RawKind::Meta { kind, data },
                            });
                        }
                    }
                }
                0xF0 | 0xF7 => {
                    if self.skip_sized_payload(event_start).is_err() {
                        return None;
                    }
                }
                _ => {}
            }
        }
    }
}

/// Decodes a whole payload at once.
pub fn decode_track<'a>(
    data: &'a [u8],
    track: u16,
    tempo: &TempoSettings,
) -> (Vec<RawEvent<'a>>, DecodeSummary) {
    let mut decoder = EventDecoder::new(data, track, tempo);
    let events = decoder.by_ref().collect();
    (events, decoder.finish())
}
