mod adaptive;
mod visible_range;

pub use adaptive::{
    Complexity, FRAME_HISTORY, MAX_QUALITY, MAX_SCROLL_SPEED, MIN_QUALITY, MIN_SCROLL_SPEED,
    QualityController, SCROLL_SPEED_STEP, Tier, WindowPolicy, step_scroll_speed,
};
pub use visible_range::{NoteIndex, ViewWindow, VisibleNotes};

use crate::config::{NoteGrouping, ViewSettings};
use crate::midi::{Note, Song};

/// Notes drawn together: one source track, or one channel.
#[derive(Debug, Clone)]
pub struct NoteGroup {
    pub label: String,
    pub index: NoteIndex,
}

#[derive(Debug, Clone)]
pub struct GroupView<'a> {
    pub label: &'a str,
    pub notes: Vec<&'a Note>,
}

/// Everything a renderer needs for one frame.
#[derive(Debug, Clone)]
pub struct FrameView<'a> {
    pub current_tick: u64,
    pub micros_per_beat: u32,
    pub window: ViewWindow,
    pub policy: WindowPolicy,
    pub groups: Vec<GroupView<'a>>,
    pub visible_notes: usize,
}

/// Per-session view configuration and the note indexes it queries.
#[derive(Debug, Clone)]
pub struct ViewState {
    settings: ViewSettings,
    groups: Vec<NoteGroup>,
    complexity: Complexity,
    quality: QualityController,
    scroll_speed: f32,
}

impl ViewState {
    pub fn new(song: &Song, settings: &ViewSettings) -> Self {
        Self {
            settings: settings.clone(),
            groups: build_groups(song, settings.grouping),
            complexity: Complexity {
                division: song.division,
                total_notes: song.summary.total_notes,
                tracks_with_notes: song.summary.tracks_with_notes,
            },
            quality: QualityController::new(settings.quality),
            scroll_speed: settings
                .scroll_speed
                .clamp(MIN_SCROLL_SPEED, MAX_SCROLL_SPEED),
        }
    }

    pub fn groups(&self) -> &[NoteGroup] {
        &self.groups
    }

    pub fn grouping(&self) -> NoteGrouping {
        self.settings.grouping
    }

    pub fn set_grouping(&mut self, song: &Song, grouping: NoteGrouping) {
        if grouping != self.settings.grouping {
            self.settings.grouping = grouping;
            self.groups = build_groups(song, grouping);
        }
    }

    pub fn quality(&self) -> &QualityController {
        &self.quality
    }

    pub fn cycle_quality(&mut self) {
        self.quality.cycle();
    }

    pub fn record_frame(&mut self, seconds: f64) {
        self.quality.record_frame(seconds);
    }

    pub fn scroll_speed(&self) -> f32 {
        self.scroll_speed
    }

    pub fn adjust_scroll_speed(&mut self, steps: i32) {
        self.scroll_speed = step_scroll_speed(self.scroll_speed, steps);
    }

    pub fn policy(&self) -> WindowPolicy {
        WindowPolicy::compute(
            &self.complexity,
            &self.settings,
            self.quality.scale(),
            self.scroll_speed,
        )
    }

    /// Queries every group around `current_tick`. The policy's note budget
    /// is spent on groups in order.
    pub fn frame(&self, current_tick: u64, micros_per_beat: u32) -> FrameView<'_> {
        let policy = self.policy();
        let window = ViewWindow {
            current_tick,
            lookahead: policy.window_ticks,
            lookback: policy.lookback_ticks,
        };

        let mut budget = policy.max_notes;
        let mut groups = Vec::with_capacity(self.groups.len());
        for group in &self.groups {
            let notes: Vec<&Note> = group.index.visible(&window, budget).collect();
            budget -= notes.len();
            groups.push(GroupView {
                label: &group.label,
                notes,
            });
        }

        FrameView {
            current_tick,
            micros_per_beat,
            window,
            policy,
            groups,
            visible_notes: policy.max_notes - budget,
        }
    }
}

fn build_groups(song: &Song, grouping: NoteGrouping) -> Vec<NoteGroup> {
    match grouping {
        NoteGrouping::SourceTrack => song
            .tracks
            .iter()
            .filter(|t| !t.notes.is_empty())
            .map(|t| NoteGroup {
                label: t
                    .name
                    .clone()
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| format!("Track {}", t.id)),
                index: NoteIndex::new(t.notes.clone()),
            })
            .collect(),
        NoteGrouping::Channel => {
            let mut by_channel: Vec<Vec<Note>> = vec![Vec::new(); 16];
            for note in song.tracks.iter().flat_map(|t| &t.notes) {
                by_channel[note.channel as usize & 0x0F].push(*note);
            }
            by_channel
                .into_iter()
                .enumerate()
                .filter(|(_, notes)| !notes.is_empty())
                .map(|(channel, notes)| NoteGroup {
                    label: format!("Ch {}", channel + 1),
                    index: NoteIndex::new(notes),
                })
                .collect()
        }
    }
}
