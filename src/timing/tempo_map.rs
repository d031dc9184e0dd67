use tracing::debug;

use crate::config::TempoSettings;
use crate::events::{EventKind, UnifiedEvent};

pub const MICROS_PER_MINUTE: f64 = 60_000_000.0;

/// One tempo segment start. `micros_at` is the elapsed time at `tick`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoBreakpoint {
    pub tick: u64,
    pub micros_per_beat: u32,
    pub micros_at: f64,
}

/// Piecewise-linear tick/time mapping. The first breakpoint is always at
/// tick 0 and ticks are strictly increasing.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    division: u16,
    points: Vec<TempoBreakpoint>,
}

impl TempoMap {
    pub fn constant(division: u16, micros_per_beat: u32) -> Self {
        Self {
            division,
            points: vec![TempoBreakpoint {
                tick: 0,
                micros_per_beat,
                micros_at: 0.0,
            }],
        }
    }

    /// Builds the map from the tempo events of a tick-ordered stream.
    pub fn build(events: &[UnifiedEvent], division: u16, settings: &TempoSettings) -> Self {
        let changes = events.iter().filter_map(|e| match e.kind {
            EventKind::Tempo { micros_per_beat } => Some((e.tick, micros_per_beat)),
            _ => None,
        });
        Self::from_changes(changes, division, settings)
    }

    /// `changes` must be ordered by tick. Out-of-range values are skipped; a
    /// change at the tick of the last breakpoint replaces it; a change
    /// smaller than `compaction_ratio` relative to the last retained value
    /// is dropped.
    pub fn from_changes(
        changes: impl IntoIterator<Item = (u64, u32)>,
        division: u16,
        settings: &TempoSettings,
    ) -> Self {
        let mut map = Self::constant(division, settings.default_micros_per_beat);
        let mut compacted = 0usize;

        for (tick, micros_per_beat) in changes {
            if !settings.accepts(micros_per_beat) {
                continue;
            }
            let Some(last) = map.points.last_mut() else {
                continue;
            };
            if tick <= last.tick {
                last.micros_per_beat = micros_per_beat;
                continue;
            }

            let retained = last.micros_per_beat as f64;
            let change = (micros_per_beat as f64 - retained).abs() / retained;
            if change < settings.compaction_ratio {
                compacted += 1;
                continue;
            }

            map.points.push(TempoBreakpoint {
                tick,
                micros_per_beat,
                micros_at: 0.0,
            });
        }

        map.accumulate();
        if compacted > 0 {
            debug!(compacted, breakpoints = map.points.len(), "Compacted tempo map");
        }
        map
    }

    fn accumulate(&mut self) {
        let mut micros = 0.0;
        let mut prev: Option<TempoBreakpoint> = None;
        for point in &mut self.points {
            if let Some(p) = prev {
                micros += segment_micros(p.micros_per_beat, self.division, point.tick - p.tick);
            }
            point.micros_at = micros;
            prev = Some(*point);
        }
    }

    pub fn division(&self) -> u16 {
        self.division
    }

    pub fn breakpoints(&self) -> &[TempoBreakpoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn segment_for_tick(&self, tick: u64) -> &TempoBreakpoint {
        let idx = self.points.partition_point(|p| p.tick <= tick);
        &self.points[idx.saturating_sub(1)]
    }

    pub fn ticks_to_micros(&self, tick: u64) -> f64 {
        let p = self.segment_for_tick(tick);
        p.micros_at + segment_micros(p.micros_per_beat, self.division, tick - p.tick)
    }

    /// Floors to the last whole tick reached at `micros`.
    pub fn micros_to_ticks(&self, micros: f64) -> u64 {
        if micros <= 0.0 || !micros.is_finite() {
            return 0;
        }
        let idx = self.points.partition_point(|p| p.micros_at <= micros);
        let p = &self.points[idx.saturating_sub(1)];

        let per_tick = micros_per_tick(p.micros_per_beat, self.division);
        if per_tick <= 0.0 {
            return p.tick;
        }
        p.tick + ((micros - p.micros_at) / per_tick + 1e-9).floor() as u64
    }

    pub fn tempo_at(&self, tick: u64) -> u32 {
        self.segment_for_tick(tick).micros_per_beat
    }

    pub fn micros_per_tick_at(&self, tick: u64) -> f64 {
        micros_per_tick(self.tempo_at(tick), self.division)
    }
}

/// Zero tempo or division yields a zero-duration segment.
fn segment_micros(micros_per_beat: u32, division: u16, ticks: u64) -> f64 {
    if micros_per_beat == 0 || division == 0 {
        return 0.0;
    }
    ticks as f64 * micros_per_beat as f64 / division as f64
}

pub fn micros_per_tick(micros_per_beat: u32, division: u16) -> f64 {
    if division == 0 {
        return 0.0;
    }
    micros_per_beat as f64 / division as f64
}

pub fn micros_to_bpm(micros_per_beat: u32) -> f64 {
    if micros_per_beat == 0 {
        return 0.0;
    }
    MICROS_PER_MINUTE / micros_per_beat as f64
}

/// Non-positive or non-finite BPM falls back to 120 BPM.
pub fn bpm_to_micros(bpm: f64) -> u32 {
    if !(bpm.is_finite() && bpm > 0.0) {
        return TempoSettings::default().default_micros_per_beat;
    }
    (MICROS_PER_MINUTE / bpm).round() as u32
}

/// Rescales `ticks` from one division to another.
pub fn normalize_ticks(ticks: u64, from_division: u16, to_division: u16) -> u64 {
    if from_division == 0 || from_division == to_division {
        return ticks;
    }
    (ticks as u128 * to_division as u128 / from_division as u128) as u64
}
