use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::chunk::{
    ChunkRead, Header, TRACK_TAG, read_header_chunk, read_track_chunk, sanitize_division,
};
use super::decoder::{EventDecoder, META_MARKER, META_TRACK_NAME, RawKind};
use super::pairing::{Note, NotePairer};
use crate::config::PlayerConfig;
use crate::error::{Diagnostic, LoadError};
use crate::events::{EventKind, UnifiedEvent};
use crate::timing::{EventStream, EventUnifier, TempoMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// Position of the source `MTrk` chunk, skipped chunks included.
    pub id: u16,
    pub name: Option<String>,
    /// Sorted by start tick.
    pub notes: Vec<Note>,
    pub end_tick: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SongSummary {
    pub tracks_read: usize,
    pub tracks_with_notes: usize,
    pub total_notes: usize,
    pub notes_per_channel: [usize; 16],
    pub first_note_tick: Option<u64>,
    pub last_tick: u64,
    pub tempo_breakpoints: usize,
}

#[derive(Debug, Clone)]
pub struct Song {
    pub header: Header,
    /// Sanitized ticks per quarter note.
    pub division: u16,
    pub tracks: Vec<Track>,
    pub events: Arc<EventStream>,
    pub tempo_map: Arc<TempoMap>,
    pub diagnostics: Vec<Diagnostic>,
    pub summary: SongSummary,
}

impl Song {
    pub fn duration_micros(&self) -> f64 {
        self.tempo_map.ticks_to_micros(self.summary.last_tick)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadProgress {
    pub tracks_processed: usize,
    pub notes_decoded: usize,
    pub bytes_consumed: usize,
    pub total_bytes: usize,
}

/// Receives advisory load reports. None of them affect the result.
pub trait LoadObserver {
    fn progress(&mut self, _progress: LoadProgress) {}
    fn diagnostic(&mut self, _diagnostic: &Diagnostic) {}
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl LoadObserver for () {}

/// Events decoded between cancellation checks inside one track.
const CANCEL_CHECK_INTERVAL: usize = 4096;

struct Reporter<'o, O: LoadObserver + ?Sized> {
    observer: &'o mut O,
    diagnostics: Vec<Diagnostic>,
}

impl<O: LoadObserver + ?Sized> Reporter<'_, O> {
    fn report(&mut self, diagnostic: Diagnostic) {
        warn!("{}", diagnostic);
        self.observer.diagnostic(&diagnostic);
        self.diagnostics.push(diagnostic);
    }
}

pub fn load_file<O: LoadObserver + ?Sized>(
    path: &Path,
    config: &PlayerConfig,
    observer: &mut O,
) -> Result<Song, LoadError> {
    let bytes = fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), bytes = bytes.len(), "Loading MIDI file");
    load_bytes(&bytes, config, observer)
}

/// Parses a whole SMF buffer. Only a bad header (or cancellation) fails;
/// everything else becomes a diagnostic on the returned [`Song`].
pub fn load_bytes<O: LoadObserver + ?Sized>(
    bytes: &[u8],
    config: &PlayerConfig,
    observer: &mut O,
) -> Result<Song, LoadError> {
    let (header, mut cursor) = read_header_chunk(bytes)?;
    debug!(
        format = header.format,
        tracks = header.track_count,
        division = header.division,
        "Header"
    );

    let mut reporter = Reporter {
        observer,
        diagnostics: Vec::new(),
    };

    let (division, changed) = sanitize_division(header.division);
    if changed {
        reporter.report(Diagnostic::InvalidDivision {
            raw: header.division,
            used: division,
        });
    }

    let mut tracks: Vec<Track> = Vec::new();
    let mut unifier = EventUnifier::new();
    let mut notes_decoded = 0;
    let mut chunk_index = 0;
    let mut track_index: u16 = 0;

    while tracks.len() < config.limits.max_tracks {
        if reporter.observer.is_cancelled() {
            info!("Load cancelled");
            return Err(LoadError::Cancelled);
        }

        match read_track_chunk(bytes, cursor, &config.limits) {
            ChunkRead::End => break,
            ChunkRead::Skip { fault, next } => {
                if bytes[cursor..].starts_with(TRACK_TAG) {
                    track_index = track_index.saturating_add(1);
                }
                reporter.report(Diagnostic::TrackChunkCorrupt {
                    chunk: chunk_index,
                    offset: cursor,
                    fault,
                });
                cursor = next;
            }
            ChunkRead::Track { data, next } => {
                let id = track_index;
                track_index = track_index.saturating_add(1);
                let (track, events) = decode_track(data, id, config, &mut reporter)?;
                debug!(
                    track = id,
                    name = track.name.as_deref().unwrap_or(""),
                    notes = track.notes.len(),
                    events = events.len(),
                    end_tick = track.end_tick,
                    "Decoded track"
                );

                notes_decoded += track.notes.len();
                unifier.push_notes(&track.notes);
                for event in events {
                    unifier.push(event);
                }
                tracks.push(track);
                cursor = next;
            }
        }
        chunk_index += 1;

        reporter.observer.progress(LoadProgress {
            tracks_processed: tracks.len(),
            notes_decoded,
            bytes_consumed: cursor,
            total_bytes: bytes.len(),
        });
    }

    if tracks.len() != header.track_count as usize {
        reporter.report(Diagnostic::TrackCountMismatch {
            declared: header.track_count,
            found: tracks.len(),
        });
    }

    let events = unifier.finish();
    let tempo_map = TempoMap::build(events.as_slice(), division, &config.tempo);
    let summary = summarize(&tracks, &events, &tempo_map);

    info!(
        tracks = summary.tracks_read,
        with_notes = summary.tracks_with_notes,
        notes = summary.total_notes,
        first_note_tick = ?summary.first_note_tick,
        last_tick = summary.last_tick,
        tempo_breakpoints = summary.tempo_breakpoints,
        diagnostics = reporter.diagnostics.len(),
        "Loaded song"
    );
    for (channel, count) in summary.notes_per_channel.iter().enumerate() {
        if *count > 0 {
            debug!(channel, notes = count, "Channel notes");
        }
    }

    Ok(Song {
        header,
        division,
        tracks,
        events: Arc::new(events),
        tempo_map: Arc::new(tempo_map),
        diagnostics: reporter.diagnostics,
        summary,
    })
}

fn decode_track<O: LoadObserver + ?Sized>(
    data: &[u8],
    id: u16,
    config: &PlayerConfig,
    reporter: &mut Reporter<'_, O>,
) -> Result<(Track, Vec<UnifiedEvent>), LoadError> {
    let mut decoder = EventDecoder::new(data, id, &config.tempo);
    let mut pairer = NotePairer::new(id, config.limits.max_notes_per_track);
    let mut events = Vec::new();
    let mut name = None;

    for (count, event) in decoder.by_ref().enumerate() {
        if count > 0 && count % CANCEL_CHECK_INTERVAL == 0 && reporter.observer.is_cancelled() {
            info!(track = id, "Load cancelled");
            return Err(LoadError::Cancelled);
        }
        let tick = event.tick;
        match event.kind {
            RawKind::Channel {
                status,
                data1,
                data2,
            } => match status & 0xF0 {
                0x90 => pairer.note_on(tick, status & 0x0F, data1, data2),
                0x80 => pairer.note_off(tick, status & 0x0F, data1),
                _ => {
                    if let Some(kind) = EventKind::from_channel_message(status, data1, data2, id) {
                        events.push(UnifiedEvent::new(tick, kind));
                    }
                }
            },
            RawKind::Tempo { micros_per_beat } => {
                events.push(UnifiedEvent::new(tick, EventKind::Tempo { micros_per_beat }));
            }
            RawKind::Meta {
                kind: META_TRACK_NAME,
                data,
            } if name.is_none() => {
                name = Some(String::from_utf8_lossy(data).trim().to_string());
            }
            RawKind::Meta {
                kind: META_MARKER,
                data,
            } => {
                let text = String::from_utf8_lossy(data).trim().to_string();
                events.push(UnifiedEvent::new(
                    tick,
                    EventKind::Marker {
                        text: text.into_boxed_str(),
                    },
                ));
            }
            RawKind::Meta { .. } => {}
        }
    }

    let decoded = decoder.finish();
    for diagnostic in decoded.diagnostics {
        reporter.report(diagnostic);
    }

    let paired = pairer.finish(decoded.end_tick);
    if paired.dangling > 0 {
        reporter.report(Diagnostic::DanglingNotes {
            track: id,
            count: paired.dangling,
            tick: decoded.end_tick,
        });
    }
    if paired.limit_reached {
        reporter.report(Diagnostic::NoteLimitReached {
            track: id,
            limit: config.limits.max_notes_per_track,
        });
    }

    let track = Track {
        id,
        name,
        notes: paired.notes,
        end_tick: decoded.end_tick,
    };
    Ok((track, events))
}

fn summarize(tracks: &[Track], events: &EventStream, tempo_map: &TempoMap) -> SongSummary {
    let mut summary = SongSummary {
        tracks_read: tracks.len(),
        first_note_tick: events.first_note_tick(),
        last_tick: events.last_tick(),
        tempo_breakpoints: tempo_map.len(),
        ..SongSummary::default()
    };

    for track in tracks {
        if !track.notes.is_empty() {
            summary.tracks_with_notes += 1;
        }
        summary.total_notes += track.notes.len();
        for note in &track.notes {
            summary.notes_per_channel[note.channel as usize & 0x0F] += 1;
        }
        summary.last_tick = summary.last_tick.max(track.end_tick);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChunkFault;
    use crate::midi::chunk::TRACK_TAG;
    use crate::midi::fixtures::{TrackBuilder, chunk, header, smf};

    fn load(bytes: &[u8]) -> Song {
        load_bytes(bytes, &PlayerConfig::default(), &mut ()).unwrap()
    }

    #[test]
    fn one_beat_song() {
        let track = TrackBuilder::new()
            .tempo(0, 500_000)
            .note_on(0, 0, 60, 100)
            .note_off(480, 0, 60)
            .end(0);
        let song = load(&smf(480, &[track]));

        assert_eq!(song.division, 480);
        assert_eq!(
            song.tracks[0].notes,
            vec![Note {
                start_tick: 0,
                end_tick: 480,
                pitch: 60,
                velocity: 100,
                channel: 0,
                track: 0,
            }]
        );
        assert_eq!(song.tempo_map.ticks_to_micros(480), 500_000.0);
        assert!(song.diagnostics.is_empty());
        assert_eq!(song.events.len(), 3);
    }

    #[test]
    fn truncated_chunk_contributes_nothing() {
        let good = TrackBuilder::new().note_on(0, 0, 60, 100).note_off(10, 0, 60).end(0);
        let mut bytes = smf(480, &[good]);
        bytes[10..12].copy_from_slice(&2u16.to_be_bytes());
        bytes.extend_from_slice(TRACK_TAG);
        bytes.extend_from_slice(&500u32.to_be_bytes());
        bytes.extend_from_slice(&[0x00, 0x90, 62, 100]);

        let song = load(&bytes);
        assert_eq!(song.tracks.len(), 1);
        assert_eq!(song.summary.total_notes, 1);
        assert!(song.diagnostics.iter().any(|d| matches!(
            d,
            Diagnostic::TrackChunkCorrupt {
                fault: ChunkFault::Truncated { declared: 500, .. },
                ..
            }
        )));
    }

    #[test]
    fn bad_header_is_fatal() {
        let mut bytes = smf(480, &[TrackBuilder::new().end(0)]);
        bytes[1] = b'X';
        assert!(matches!(
            load_bytes(&bytes, &PlayerConfig::default(), &mut ()),
            Err(LoadError::HeaderInvalid(_))
        ));
    }

    #[test]
    fn zero_division_is_replaced() {
        let song = load(&smf(0, &[TrackBuilder::new().end(0)]));
        assert_eq!(song.division, 480);
        assert_eq!(
            song.diagnostics,
            vec![Diagnostic::InvalidDivision { raw: 0, used: 480 }]
        );
    }

    #[test]
    fn tracks_keep_ids_names_and_channels() {
        let conductor = TrackBuilder::new()
            .meta(0, META_TRACK_NAME, b"Conductor ")
            .tempo(0, 600_000)
            .meta(960, META_MARKER, b"Verse")
            .end(0);
        let drums = TrackBuilder::new()
            .meta(0, META_TRACK_NAME, b"Drums")
            .note_on(0, 9, 36, 110)
            .note_off(120, 9, 36)
            .end(0);
        let song = load(&smf(480, &[conductor, drums]));

        assert_eq!(song.tracks[0].name.as_deref(), Some("Conductor"));
        assert_eq!(song.tracks[1].name.as_deref(), Some("Drums"));
        assert_eq!(song.tracks[1].notes[0].channel, 9);
        assert_eq!(song.tracks[1].notes[0].track, 1);
        assert_eq!(song.summary.tracks_with_notes, 1);
        assert_eq!(song.summary.notes_per_channel[9], 1);
        assert_eq!(song.summary.last_tick, 960);
        assert!(song.events.iter().any(|e| matches!(
            &e.kind,
            EventKind::Marker { text } if &**text == "Verse"
        )));
    }

    #[test]
    fn unknown_chunks_are_skipped_and_counted() {
        let track = TrackBuilder::new().note_on(0, 0, 60, 1).note_off(1, 0, 60).end(0);
        let mut bytes = header(1, 1, 96);
        bytes.extend(chunk(b"XFIH", &[0; 12]));
        bytes.extend(chunk(TRACK_TAG, &track));

        let song = load(&bytes);
        assert_eq!(song.tracks.len(), 1);
        assert_eq!(song.summary.total_notes, 1);
        assert!(matches!(
            song.diagnostics[0],
            Diagnostic::TrackChunkCorrupt {
                chunk: 0,
                fault: ChunkFault::UnknownTag(_),
                ..
            }
        ));
    }

    #[test]
    fn dangling_and_truncated_tracks_keep_their_notes() {
        let track = TrackBuilder::new()
            .note_on(0, 0, 60, 100)
            .note_on(100, 0, 64, 100)
            .raw(20, &[0x80])
            .unterminated();
        let song = load(&smf(480, &[track]));

        let spans: Vec<_> = song.tracks[0]
            .notes
            .iter()
            .map(|n| (n.start_tick, n.end_tick))
            .collect();
        assert_eq!(spans, vec![(0, 120), (100, 120)]);
        assert!(song
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::TrackTruncated { track: 0, .. })));
        assert!(song
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::DanglingNotes { count: 2, tick: 120, .. })));
    }

    #[test]
    fn declared_track_count_mismatch_is_reported() {
        let mut bytes = smf(480, &[TrackBuilder::new().end(0)]);
        bytes[10..12].copy_from_slice(&3u16.to_be_bytes());
        let song = load(&bytes);
        assert_eq!(
            song.diagnostics,
            vec![Diagnostic::TrackCountMismatch {
                declared: 3,
                found: 1
            }]
        );
    }

    struct Recorder {
        progress: Vec<LoadProgress>,
        diagnostics: usize,
        cancel_after: Option<usize>,
    }

    impl LoadObserver for Recorder {
        fn progress(&mut self, progress: LoadProgress) {
            self.progress.push(progress);
        }

        fn diagnostic(&mut self, _diagnostic: &Diagnostic) {
            self.diagnostics += 1;
        }

        fn is_cancelled(&self) -> bool {
            self.cancel_after.is_some_and(|n| self.progress.len() >= n)
        }
    }

    #[test]
    fn observer_sees_progress_and_can_cancel() {
        let track = || TrackBuilder::new().note_on(0, 0, 60, 1).note_off(1, 0, 60).end(0);
        let bytes = smf(480, &[track(), track(), track()]);

        let mut recorder = Recorder {
            progress: Vec::new(),
            diagnostics: 0,
            cancel_after: None,
        };
        load_bytes(&bytes, &PlayerConfig::default(), &mut recorder).unwrap();
        assert_eq!(recorder.progress.len(), 3);
        assert_eq!(recorder.progress[2].notes_decoded, 3);
        assert_eq!(recorder.progress[2].bytes_consumed, bytes.len());
        assert_eq!(recorder.diagnostics, 0);

        let mut recorder = Recorder {
            progress: Vec::new(),
            diagnostics: 0,
            cancel_after: Some(1),
        };
        assert!(matches!(
            load_bytes(&bytes, &PlayerConfig::default(), &mut recorder),
            Err(LoadError::Cancelled)
        ));
    }

    struct CancelOnSecondCheck {
        checks: std::cell::Cell<usize>,
        progress: usize,
    }

    impl LoadObserver for CancelOnSecondCheck {
        fn progress(&mut self, _progress: LoadProgress) {
            self.progress += 1;
        }

        fn is_cancelled(&self) -> bool {
            self.checks.set(self.checks.get() + 1);
            self.checks.get() >= 2
        }
    }

    #[test]
    fn cancellation_interrupts_a_long_track() {
        let mut track = TrackBuilder::new();
        for _ in 0..CANCEL_CHECK_INTERVAL {
            track = track.note_on(1, 0, 60, 100).note_off(1, 0, 60);
        }
        let bytes = smf(480, &[track.end(0)]);

        let mut observer = CancelOnSecondCheck {
            checks: std::cell::Cell::new(0),
            progress: 0,
        };
        let result = load_bytes(&bytes, &PlayerConfig::default(), &mut observer);
        assert!(matches!(result, Err(LoadError::Cancelled)));
        assert_eq!(observer.checks.get(), 2);
        assert_eq!(observer.progress, 0);
    }

    #[test]
    fn skipped_track_chunks_keep_later_ids_in_place() {
        let track = || TrackBuilder::new().note_on(0, 0, 60, 1).note_off(1, 0, 60).end(0);
        let mut bytes = header(1, 3, 96);
        bytes.extend(chunk(TRACK_TAG, &track()));
        bytes.extend(chunk(TRACK_TAG, &[0x00]));
        bytes.extend(chunk(b"XFIH", &[0; 8]));
        bytes.extend(chunk(TRACK_TAG, &track()));

        let song = load(&bytes);
        let ids: Vec<_> = song.tracks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![0, 2]);
        assert_eq!(song.tracks[1].notes[0].track, 2);
    }

    #[test]
    fn track_limit_stops_walking() {
        let track = || TrackBuilder::new().end(0);
        let mut config = PlayerConfig::default();
        config.limits.max_tracks = 2;
        let song = load_bytes(&smf(480, &[track(), track(), track()]), &config, &mut ()).unwrap();
        assert_eq!(song.tracks.len(), 2);
    }

    #[test]
    fn missing_file_reports_path() {
        let path = Path::new("/nonexistent/jidi/missing.mid");
        let err = load_file(path, &PlayerConfig::default(), &mut ()).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
        assert!(err.to_string().contains("missing.mid"));
    }
}
