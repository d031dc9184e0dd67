use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Playing,
    Paused,
    Finished,
}

/// Requests that move a [`PlaybackStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Pause,
    Resume,
    Stop,
    Exhausted,
    Seek,
}

impl PlaybackStatus {
    /// The status after `transition`, or `None` when it does not apply.
    pub fn apply(self, transition: Transition) -> Option<PlaybackStatus> {
        use PlaybackStatus::*;
        use Transition::*;

        match (self, transition) {
            (_, Stop) => Some(Stopped),
            (_, Start) => Some(Playing),
            (Playing, Pause) => Some(Paused),
            (Paused, Resume) => Some(Playing),
            (Playing, Exhausted) => Some(Finished),
            (Paused, Seek) => Some(Paused),
            (Stopped | Playing | Finished, Seek) => Some(Playing),
            _ => None,
        }
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlaybackStatus::Stopped => "stopped",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Paused => "paused",
            PlaybackStatus::Finished => "finished",
        };
        f.write_str(label)
    }
}
