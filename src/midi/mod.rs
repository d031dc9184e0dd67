mod chunk;
mod decoder;
mod loader;
mod pairing;
pub mod varlen;

#[cfg(test)]
pub(crate) mod fixtures;

pub use chunk::{
    ChunkRead, DEFAULT_DIVISION, Header, MAX_DIVISION, read_header_chunk, read_track_chunk,
    sanitize_division,
};
pub use decoder::{DecodeSummary, EventDecoder, RawEvent, RawKind, data_len, decode_track};
pub use loader::{LoadObserver, LoadProgress, Song, SongSummary, Track, load_bytes, load_file};
pub use pairing::{Note, NotePairer, PairedNotes};
