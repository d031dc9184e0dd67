pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod midi;
pub mod timing;
pub mod view;

pub use audio::{MidiOutSink, NullSink, VoiceSink};
pub use config::PlayerConfig;
pub use engine::{LoadUpdate, LoaderHandle, Session, spawn_loader};
pub use error::{AudioError, ConfigError, Diagnostic, LoadError};
pub use events::{EventKind, UnifiedEvent, VoiceMessage};
pub use midi::{Note, Song, load_bytes, load_file};
pub use timing::{EventStream, PlaybackScheduler, PlaybackStatus, TempoMap};
pub use view::{FrameView, ViewState};
