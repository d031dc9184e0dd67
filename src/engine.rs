use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{info, warn};

use crate::audio::VoiceSink;
use crate::config::PlayerConfig;
use crate::error::{AudioError, Diagnostic, LoadError};
use crate::midi::{LoadObserver, LoadProgress, Song, load_file};
use crate::timing::{Dispatch, PlaybackScheduler, PlaybackStatus};
use crate::view::{FrameView, ViewState};

#[derive(Debug)]
pub enum LoadUpdate {
    Progress(LoadProgress),
    Diagnostic(Diagnostic),
    Finished(Result<Box<Song>, LoadError>),
}

/// A load running on its own thread.
pub struct LoaderHandle {
    pub update_rx: Receiver<LoadUpdate>,
    cancel: Arc<AtomicBool>,
}

struct ChannelObserver {
    update_tx: Sender<LoadUpdate>,
    cancel: Arc<AtomicBool>,
}

impl LoadObserver for ChannelObserver {
    fn progress(&mut self, progress: LoadProgress) {
        let _ = self.update_tx.send(LoadUpdate::Progress(progress));
    }

    fn diagnostic(&mut self, diagnostic: &Diagnostic) {
        let _ = self.update_tx.send(LoadUpdate::Diagnostic(diagnostic.clone()));
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

pub fn spawn_loader(path: PathBuf, config: PlayerConfig) -> LoaderHandle {
    let (update_tx, update_rx) = crossbeam::channel::unbounded();
    let cancel = Arc::new(AtomicBool::new(false));

    let mut observer = ChannelObserver {
        update_tx,
        cancel: Arc::clone(&cancel),
    };
    std::thread::spawn(move || {
        let result = load_file(&path, &config, &mut observer).map(Box::new);
        let _ = observer.update_tx.send(LoadUpdate::Finished(result));
    });

    LoaderHandle { update_rx, cancel }
}

impl LoaderHandle {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Blocks until the load finishes, passing intermediate updates to
    /// `on_update`. With a timeout, the load is cancelled once it expires.
    pub fn wait(
        self,
        timeout: Option<Duration>,
        mut on_update: impl FnMut(&LoadUpdate),
    ) -> Result<Song, LoadError> {
        let deadline = timeout.map(|t| (Instant::now() + t, t));

        loop {
            let update = match deadline {
                Some((at, limit)) => {
                    let left = at.saturating_duration_since(Instant::now());
                    match self.update_rx.recv_timeout(left) {
                        Ok(update) => update,
                        Err(RecvTimeoutError::Timeout) => {
                            self.cancel();
                            warn!(?limit, "Load timed out");
                            return Err(LoadError::TimedOut(limit));
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            return Err(LoadError::LoaderDisconnected);
                        }
                    }
                }
                None => self
                    .update_rx
                    .recv()
                    .map_err(|_| LoadError::LoaderDisconnected)?,
            };

            match update {
                LoadUpdate::Finished(result) => return result.map(|song| *song),
                other => on_update(&other),
            }
        }
    }
}

/// One playback session: a loaded song, its scheduler and view, and the
/// output the scheduler dispatches to.
pub struct Session<S: VoiceSink> {
    song: Arc<Song>,
    scheduler: PlaybackScheduler,
    view: ViewState,
    sink: S,
    open: bool,
}

impl<S: VoiceSink> Session<S> {
    /// Initializes `sink`; nothing plays until [`play`](Self::play).
    pub fn open(song: Song, config: &PlayerConfig, mut sink: S) -> Result<Self, AudioError> {
        sink.initialize()?;

        let scheduler = PlaybackScheduler::new(
            Arc::clone(&song.events),
            Arc::clone(&song.tempo_map),
            &config.tempo,
            &config.playback,
        );
        let view = ViewState::new(&song, &config.view);
        info!(
            notes = song.summary.total_notes,
            events = song.events.len(),
            "Session opened"
        );

        Ok(Self {
            song: Arc::new(song),
            scheduler,
            view,
            sink,
            open: true,
        })
    }

    pub fn song(&self) -> &Song {
        &self.song
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut ViewState {
        &mut self.view
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn status(&self) -> PlaybackStatus {
        self.scheduler.status()
    }

    pub fn play(&mut self, now: u64) -> Result<(), AudioError> {
        self.scheduler.start(now, &mut self.sink)
    }

    pub fn toggle_pause(&mut self, now: u64) {
        self.scheduler.toggle_pause(now);
    }

    pub fn restart(&mut self, now: u64) -> Result<(), AudioError> {
        self.scheduler.restart(now, &mut self.sink)
    }

    pub fn seek(&mut self, tick: u64, now: u64) -> Result<(), AudioError> {
        self.scheduler.seek(tick, now, &mut self.sink)
    }

    /// Seeks by whole beats relative to the current position.
    pub fn seek_beats(&mut self, beats: i64, now: u64) -> Result<(), AudioError> {
        let current = self.scheduler.current_tick(now) as i64;
        let target = current + beats * self.song.division as i64;
        self.seek(target.max(0) as u64, now)
    }

    pub fn skip_to_first_note(&mut self, now: u64) -> Result<(), AudioError> {
        self.scheduler.skip_to_first_note(now, &mut self.sink)
    }

    /// Runs one frame: dispatches due events, feeds the frame time to the
    /// quality controller and queries the visible notes.
    pub fn poll(
        &mut self,
        now: u64,
        frame_seconds: f64,
    ) -> Result<(Dispatch, FrameView<'_>), AudioError> {
        let dispatch = self.scheduler.poll(now, &mut self.sink)?;
        self.view.record_frame(frame_seconds);

        let tick = self.scheduler.current_tick(now);
        let frame = self.view.frame(tick, self.scheduler.active_tempo());
        Ok((dispatch, frame))
    }

    /// Silences the output and terminates it. Also run on drop.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(e) = self.scheduler.stop(&mut self.sink) {
            warn!("Failed to silence output: {}", e);
        }
        self.sink.terminate();
        info!("Session closed");
    }
}

impl<S: VoiceSink> Drop for Session<S> {
    fn drop(&mut self) {
        self.close();
    }
}
