use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures that abort a load. Everything else is a [`Diagnostic`].
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Invalid header: {0}")]
    HeaderInvalid(String),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Load cancelled")]
    Cancelled,

    #[error("Load timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Loader thread exited without a result")]
    LoaderDisconnected,
}

/// Why a chunk was skipped instead of decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkFault {
    #[error("unknown chunk tag {0:?}")]
    UnknownTag([u8; 4]),

    #[error("length {0:#x} looks like a corrupted 32-bit value")]
    LengthCorrupt(u32),

    #[error("length {length} exceeds limit {limit}")]
    LengthTooLarge { length: u32, limit: u32 },

    #[error("length {length} below minimum {minimum}")]
    LengthTooSmall { length: u32, minimum: u32 },

    #[error("declared {declared} bytes but only {remaining} remain")]
    Truncated { declared: u32, remaining: usize },
}

/// Recoverable conditions reported while loading. Parsing always continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    #[error("Chunk {chunk} at offset {offset} skipped: {fault}")]
    TrackChunkCorrupt {
        chunk: usize,
        offset: usize,
        fault: ChunkFault,
    },

    #[error("Track {track} truncated at byte {offset} (tick {tick})")]
    TrackTruncated { track: u16, offset: usize, tick: u64 },

    #[error("Division {raw} out of range, using {used}")]
    InvalidDivision { raw: u16, used: u16 },

    #[error("Track {track}: tempo {micros_per_beat}us/beat at tick {tick} is not performable")]
    InvalidTempoValue {
        track: u16,
        tick: u64,
        micros_per_beat: u32,
    },

    #[error("Track {track}: {count} notes still open, closed at tick {tick}")]
    DanglingNotes { track: u16, count: usize, tick: u64 },

    #[error("Track {track}: note limit {limit} reached, remaining notes dropped")]
    NoteLimitReached { track: u16, limit: usize },

    #[error("Header declares {declared} tracks, found {found}")]
    TrackCountMismatch { declared: u16, found: usize },
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No MIDI output port available")]
    NoOutputPort,

    #[error("Failed to open MIDI output: {0}")]
    Init(String),

    #[error("Failed to send MIDI message: {0}")]
    Send(String),

    #[error("Output used before initialize()")]
    NotInitialized,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] ron::Error),
}
