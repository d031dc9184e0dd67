use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub limits: ParseLimits,
    pub tempo: TempoSettings,
    pub playback: PlaybackSettings,
    pub view: ViewSettings,
}

/// Bounds checked before any track payload is touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseLimits {
    pub max_track_length: u32,
    pub min_track_length: u32,
    /// Lengths at or above this are treated as the near-4GB corruption pattern.
    pub corrupt_length_threshold: u32,
    pub max_notes_per_track: usize,
    pub max_tracks: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_track_length: 200_000_000,
            min_track_length: 4,
            corrupt_length_threshold: 4_294_967_000,
            max_notes_per_track: 100_000_000,
            max_tracks: 65_535,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoSettings {
    pub default_micros_per_beat: u32,
    pub min_micros_per_beat: u32,
    pub max_micros_per_beat: u32,
    /// Relative change below which a tempo breakpoint is dropped from the map.
    pub compaction_ratio: f64,
}

impl Default for TempoSettings {
    fn default() -> Self {
        Self {
            default_micros_per_beat: 500_000,
            min_micros_per_beat: 200_000,
            max_micros_per_beat: 2_000_000,
            compaction_ratio: 0.005,
        }
    }
}

impl TempoSettings {
    pub fn accepts(&self, micros_per_beat: u32) -> bool {
        (self.min_micros_per_beat..=self.max_micros_per_beat).contains(&micros_per_beat)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub max_events_per_poll: usize,
    pub loop_playback: bool,
    pub load_timeout_secs: Option<u64>,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            max_events_per_poll: 8192,
            loop_playback: false,
            load_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NoteGrouping {
    #[default]
    SourceTrack,
    Channel,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum QualityMode {
    #[default]
    Auto,
    Fixed(f32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewSettings {
    pub grouping: NoteGrouping,
    pub quality: QualityMode,
    pub scroll_speed: f32,
    pub high: ComplexityTier,
    pub medium: ComplexityTier,
    pub low: TierShape,
    /// Smallest window the high tier may shrink to, in ticks.
    pub min_window_ticks: u64,
    /// Lookback is `window / lookback_divisor`.
    pub lookback_divisor: u64,
}

/// A tier applies when any of its thresholds is exceeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityTier {
    pub division_above: u16,
    pub notes_above: usize,
    pub tracks_above: usize,
    pub shape: TierShape,
}

/// Window is `division * window_beats`; cap is scaled by quality.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierShape {
    pub window_beats: f32,
    pub max_notes: usize,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            grouping: NoteGrouping::default(),
            quality: QualityMode::default(),
            scroll_speed: 1.0,
            high: ComplexityTier {
                division_above: 10_000,
                notes_above: 500_000,
                tracks_above: 40,
                shape: TierShape {
                    window_beats: 0.25,
                    max_notes: 16_384,
                },
            },
            medium: ComplexityTier {
                division_above: 2_000,
                notes_above: 100_000,
                tracks_above: 20,
                shape: TierShape {
                    window_beats: 2.0,
                    max_notes: 32_768,
                },
            },
            low: TierShape {
                window_beats: 4.0,
                max_notes: 65_536,
            },
            min_window_ticks: 480,
            lookback_divisor: 4,
        }
    }
}

impl PlayerConfig {
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, ron_string)?;

        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ron_string = fs::read_to_string(path)?;
        let config: PlayerConfig = ron::from_str(&ron_string)?;

        Ok(config)
    }
}
