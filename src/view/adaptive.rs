use std::collections::VecDeque;

use crate::config::{QualityMode, TierShape, ViewSettings};

pub const FRAME_HISTORY: usize = 60;
pub const MIN_QUALITY: f32 = 0.25;
pub const MAX_QUALITY: f32 = 1.0;
const LOW_FPS: f64 = 30.0;
const HIGH_FPS: f64 = 55.0;
const QUALITY_STEP_DOWN: f32 = 0.05;
const QUALITY_STEP_UP: f32 = 0.02;

pub const MIN_SCROLL_SPEED: f32 = 0.25;
pub const MAX_SCROLL_SPEED: f32 = 4.0;
pub const SCROLL_SPEED_STEP: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    High,
    Medium,
    Low,
}

/// The inputs of the window policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Complexity {
    pub division: u16,
    pub total_notes: usize,
    pub tracks_with_notes: usize,
}

impl Complexity {
    pub fn tier(&self, settings: &ViewSettings) -> Tier {
        let exceeds = |t: &crate::config::ComplexityTier| {
            self.division > t.division_above
                || self.total_notes > t.notes_above
                || self.tracks_with_notes > t.tracks_above
        };
        if exceeds(&settings.high) {
            Tier::High
        } else if exceeds(&settings.medium) {
            Tier::Medium
        } else {
            Tier::Low
        }
    }
}

/// Tick window around the playhead and the frame-wide note budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    pub tier: Tier,
    pub window_ticks: u64,
    pub lookback_ticks: u64,
    pub max_notes: usize,
}

impl WindowPolicy {
    pub fn compute(complexity: &Complexity, settings: &ViewSettings, quality: f32, speed: f32) -> Self {
        let tier = complexity.tier(settings);
        let shape: &TierShape = match tier {
            Tier::High => &settings.high.shape,
            Tier::Medium => &settings.medium.shape,
            Tier::Low => &settings.low,
        };

        let quality = quality.clamp(MIN_QUALITY, MAX_QUALITY) as f64;
        let speed = speed.clamp(MIN_SCROLL_SPEED, MAX_SCROLL_SPEED) as f64;
        let mut window =
            (complexity.division as f64 * shape.window_beats as f64 * quality * speed) as u64;
        if tier == Tier::High {
            window = window.max(settings.min_window_ticks);
        }
        let window = window.max(1);

        Self {
            tier,
            window_ticks: window,
            lookback_ticks: window / settings.lookback_divisor.max(1),
            max_notes: ((shape.max_notes as f64 * quality) as usize).max(1),
        }
    }
}

/// Quality scale in `[0.25, 1.0]`, either pinned or driven by frame rate.
#[derive(Debug, Clone)]
pub struct QualityController {
    mode: QualityMode,
    scale: f32,
    frame_times: VecDeque<f64>,
}

impl QualityController {
    pub fn new(mode: QualityMode) -> Self {
        let scale = match mode {
            QualityMode::Auto => MAX_QUALITY,
            QualityMode::Fixed(s) => s.clamp(MIN_QUALITY, MAX_QUALITY),
        };
        Self {
            mode,
            scale,
            frame_times: VecDeque::with_capacity(FRAME_HISTORY),
        }
    }

    pub fn mode(&self) -> QualityMode {
        self.mode
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn average_fps(&self) -> Option<f64> {
        if self.frame_times.is_empty() {
            return None;
        }
        let avg = self.frame_times.iter().sum::<f64>() / self.frame_times.len() as f64;
        (avg > 0.0).then(|| 1.0 / avg)
    }

    /// Records one frame duration in seconds and, in auto mode, nudges the
    /// scale toward the frame-rate targets.
    pub fn record_frame(&mut self, seconds: f64) {
        if !(seconds.is_finite() && seconds > 0.0) {
            return;
        }
        if self.frame_times.len() == FRAME_HISTORY {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(seconds);

        if self.mode != QualityMode::Auto {
            return;
        }
        let Some(fps) = self.average_fps() else {
            return;
        };
        if fps < LOW_FPS {
            self.scale = (self.scale - QUALITY_STEP_DOWN).max(MIN_QUALITY);
        } else if fps > HIGH_FPS {
            self.scale = (self.scale + QUALITY_STEP_UP).min(MAX_QUALITY);
        }
    }

    /// Auto, 100%, 75%, 50%, 25%, then back to auto.
    pub fn cycle(&mut self) {
        let next = match self.mode {
            QualityMode::Auto => QualityMode::Fixed(1.0),
            QualityMode::Fixed(s) if s > 0.75 => QualityMode::Fixed(0.75),
            QualityMode::Fixed(s) if s > 0.5 => QualityMode::Fixed(0.5),
            QualityMode::Fixed(s) if s > 0.25 => QualityMode::Fixed(0.25),
            QualityMode::Fixed(_) => QualityMode::Auto,
        };
        *self = Self::new(next);
    }

    pub fn label(&self) -> String {
        match self.mode {
            QualityMode::Auto => format!("auto {:.0}%", self.scale * 100.0),
            QualityMode::Fixed(s) => format!("{:.0}%", s * 100.0),
        }
    }
}

/// Moves `speed` by `steps` increments of 0.25 within `[0.25, 4.0]`.
pub fn step_scroll_speed(speed: f32, steps: i32) -> f32 {
    (speed + steps as f32 * SCROLL_SPEED_STEP).clamp(MIN_SCROLL_SPEED, MAX_SCROLL_SPEED)
}
