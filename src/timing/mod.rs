mod scheduler;
mod sequence;
mod state_machine;
mod tempo_map;

pub use scheduler::{Dispatch, PlaybackScheduler, PlaybackState, advance};
pub use sequence::{EventStream, EventUnifier};
pub use state_machine::{PlaybackStatus, Transition};
pub use tempo_map::{
    MICROS_PER_MINUTE, TempoBreakpoint, TempoMap, bpm_to_micros, micros_per_tick, micros_to_bpm,
    normalize_ticks,
};
