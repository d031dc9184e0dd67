//! Builders for small SMF buffers used by the parser and loader tests.

use super::chunk::{HEADER_TAG, TRACK_TAG};
use super::varlen;

pub fn header(format: u16, tracks: u16, division: u16) -> Vec<u8> {
    let mut body = Vec::with_capacity(6);
    body.extend_from_slice(&format.to_be_bytes());
    body.extend_from_slice(&tracks.to_be_bytes());
    body.extend_from_slice(&division.to_be_bytes());
    chunk(HEADER_TAG, &body)
}

pub fn chunk(tag: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = tag.to_vec();
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Format-1 file with one `MTrk` chunk per body.
pub fn smf(division: u16, tracks: &[Vec<u8>]) -> Vec<u8> {
    let mut out = header(1, tracks.len() as u16, division);
    for body in tracks {
        out.extend(chunk(TRACK_TAG, body));
    }
    out
}

#[derive(Default)]
pub struct TrackBuilder {
    bytes: Vec<u8>,
}

impl TrackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(mut self, delta: u32, bytes: &[u8]) -> Self {
        self.bytes.extend(varlen::encode(delta));
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn note_on(self, delta: u32, channel: u8, pitch: u8, velocity: u8) -> Self {
        self.raw(delta, &[0x90 | channel, pitch, velocity])
    }

    pub fn note_off(self, delta: u32, channel: u8, pitch: u8) -> Self {
        self.raw(delta, &[0x80 | channel, pitch, 0x40])
    }

    pub fn tempo(self, delta: u32, micros_per_beat: u32) -> Self {
        let b = micros_per_beat.to_be_bytes();
        self.raw(delta, &[0xFF, 0x51, 0x03, b[1], b[2], b[3]])
    }

    pub fn meta(self, delta: u32, kind: u8, data: &[u8]) -> Self {
        let mut bytes = vec![0xFF, kind];
        bytes.extend(varlen::encode(data.len() as u32));
        bytes.extend_from_slice(data);
        self.raw(delta, &bytes)
    }

    /// Appends end-of-track and returns the body.
    pub fn end(self, delta: u32) -> Vec<u8> {
        self.raw(delta, &[0xFF, 0x2F, 0x00]).bytes
    }

    /// Returns the body without an end-of-track event.
    pub fn unterminated(self) -> Vec<u8> {
        self.bytes
    }
}
