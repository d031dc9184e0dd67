use crate::config::ParseLimits;
use crate::error::{ChunkFault, LoadError};

pub const HEADER_TAG: &[u8; 4] = b"MThd";
pub const TRACK_TAG: &[u8; 4] = b"MTrk";
pub const HEADER_CHUNK_LEN: usize = 14;
const CHUNK_PREFIX_LEN: usize = 8;

pub const DEFAULT_DIVISION: u16 = 480;
pub const MAX_DIVISION: u16 = 32_767;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub format: u16,
    pub track_count: u16,
    /// As stored in the file; see [`sanitize_division`].
    pub division: u16,
}

/// Parses the `MThd` chunk, returning the header and the offset of the first
/// chunk after it.
pub fn read_header_chunk(buf: &[u8]) -> Result<(Header, usize), LoadError> {
    if buf.len() < HEADER_CHUNK_LEN {
        return Err(LoadError::HeaderInvalid(format!(
            "file is {} bytes, shorter than a header chunk",
            buf.len()
        )));
    }
    if &buf[0..4] != HEADER_TAG {
        return Err(LoadError::HeaderInvalid(format!(
            "expected MThd, found {:?}",
            &buf[0..4]
        )));
    }

    let length = be32(&buf[4..8]);
    if length < 6 {
        return Err(LoadError::HeaderInvalid(format!(
            "header length {length} is shorter than 6"
        )));
    }
    let end = CHUNK_PREFIX_LEN as u64 + length as u64;
    if end > buf.len() as u64 {
        return Err(LoadError::HeaderInvalid(format!(
            "header length {length} runs past end of file"
        )));
    }

    let header = Header {
        format: be16(&buf[8..10]),
        track_count: be16(&buf[10..12]),
        division: be16(&buf[12..14]),
    };
    if header.format > 2 {
        return Err(LoadError::HeaderInvalid(format!(
            "unsupported format {}",
            header.format
        )));
    }

    Ok((header, end as usize))
}

/// Returns the usable ticks-per-quarter and whether the raw value had to change.
/// Zero falls back to [`DEFAULT_DIVISION`]; SMPTE-flagged values clamp to
/// [`MAX_DIVISION`].
pub fn sanitize_division(raw: u16) -> (u16, bool) {
    match raw {
        0 => (DEFAULT_DIVISION, true),
        d if d > MAX_DIVISION => (MAX_DIVISION, true),
        d => (d, false),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkRead<'a> {
    Track { data: &'a [u8], next: usize },
    /// Nothing was read; continue at `next` (which may be the end of the buffer).
    Skip { fault: ChunkFault, next: usize },
    End,
}

/// Reads the chunk starting at `cursor`. Bounds are checked against `limits`
/// and the bytes actually remaining before any payload is sliced.
pub fn read_track_chunk<'a>(buf: &'a [u8], cursor: usize, limits: &ParseLimits) -> ChunkRead<'a> {
    if cursor >= buf.len() || buf.len() - cursor < CHUNK_PREFIX_LEN {
        return ChunkRead::End;
    }

    let tag: [u8; 4] = [buf[cursor], buf[cursor + 1], buf[cursor + 2], buf[cursor + 3]];
    let length = be32(&buf[cursor + 4..cursor + 8]);
    let body = cursor + CHUNK_PREFIX_LEN;
    let remaining = buf.len() - body;

    if length >= limits.corrupt_length_threshold {
        return ChunkRead::Skip {
            fault: ChunkFault::LengthCorrupt(length),
            next: buf.len(),
        };
    }
    if length as usize > remaining {
        return ChunkRead::Skip {
            fault: ChunkFault::Truncated {
                declared: length,
                remaining,
            },
            next: buf.len(),
        };
    }

    let next = body + length as usize;
    if &tag != TRACK_TAG {
        return ChunkRead::Skip {
            fault: ChunkFault::UnknownTag(tag),
            next,
        };
    }
    if length > limits.max_track_length {
        return ChunkRead::Skip {
            fault: ChunkFault::LengthTooLarge {
                length,
                limit: limits.max_track_length,
            },
            next,
        };
    }
    if length < limits.min_track_length {
        return ChunkRead::Skip {
            fault: ChunkFault::LengthTooSmall {
                length,
                minimum: limits.min_track_length,
            },
            next,
        };
    }

    ChunkRead::Track {
        data: &buf[body..next],
        next,
    }
}

fn be16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn be32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
