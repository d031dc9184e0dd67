use std::ops::Range;
use std::sync::Arc;

use tracing::{debug, info, trace};

use super::state_machine::{PlaybackStatus, Transition};
use super::{EventStream, TempoMap, micros_per_tick};
use crate::audio::{VoiceSink, silence_all};
use crate::config::{PlaybackSettings, TempoSettings};
use crate::error::AudioError;
use crate::events::{EventKind, UnifiedEvent, VoiceMessage};

/// Position of the dispatch cursor in virtual (tempo-scaled) time.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub division: u16,
    pub last_dispatched_tick: u64,
    pub accumulated_micros: f64,
    pub micros_per_beat: u32,
    pub micros_per_tick: f64,
    pub next_event: usize,
}

impl PlaybackState {
    pub fn at_start(tempo_map: &TempoMap) -> Self {
        Self::at_tick(tempo_map, 0, 0)
    }

    /// State with nothing before `next_event` left to dispatch.
    pub fn at_tick(tempo_map: &TempoMap, tick: u64, next_event: usize) -> Self {
        let micros_per_beat = tempo_map.tempo_at(tick);
        Self {
            division: tempo_map.division(),
            last_dispatched_tick: tick,
            accumulated_micros: tempo_map.ticks_to_micros(tick),
            micros_per_beat,
            micros_per_tick: micros_per_tick(micros_per_beat, tempo_map.division()),
            next_event,
        }
    }

    /// Virtual time at which `event` falls due.
    pub fn due_at(&self, event: &UnifiedEvent) -> f64 {
        if self.division == 0 {
            return self.accumulated_micros;
        }
        let delta = event.tick.saturating_sub(self.last_dispatched_tick);
        self.accumulated_micros + delta as f64 * self.micros_per_beat as f64 / self.division as f64
    }

    /// Interpolated position at `elapsed` virtual microseconds.
    pub fn current_tick(&self, elapsed: f64) -> u64 {
        if self.micros_per_tick <= 0.0 {
            return self.last_dispatched_tick;
        }
        let ahead = (elapsed - self.accumulated_micros).max(0.0);
        self.last_dispatched_tick + (ahead / self.micros_per_tick) as u64
    }
}

/// Dispatches every event due by `elapsed`, at most `max_events` of them.
///
/// Returns the new state and the range of `events` that became due. Tempo
/// events inside the range are applied before the events after them are
/// timed; a tempo outside `tempo`'s range leaves the active one in place.
pub fn advance(
    state: &PlaybackState,
    events: &[UnifiedEvent],
    tempo: &TempoSettings,
    elapsed: f64,
    max_events: usize,
) -> (PlaybackState, Range<usize>) {
    let mut next = state.clone();
    let start = next.next_event;

    while next.next_event < events.len() && next.next_event - start < max_events {
        let event = &events[next.next_event];
        let due = next.due_at(event);
        if due > elapsed {
            break;
        }

        next.accumulated_micros = due;
        next.last_dispatched_tick = next.last_dispatched_tick.max(event.tick);
        if let EventKind::Tempo { micros_per_beat } = event.kind {
            if tempo.accepts(micros_per_beat) {
                next.micros_per_beat = micros_per_beat;
                next.micros_per_tick = micros_per_tick(micros_per_beat, next.division);
            }
        }
        next.next_event += 1;
    }

    let range = start..next.next_event;
    (next, range)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub range: Range<usize>,
    /// Due events were left for the next poll because of the per-poll cap.
    pub deferred: bool,
}

/// Drives [`advance`] from a caller-supplied microsecond clock and forwards
/// voice events to a [`VoiceSink`].
#[derive(Debug)]
pub struct PlaybackScheduler {
    events: Arc<EventStream>,
    tempo_map: Arc<TempoMap>,
    tempo: TempoSettings,
    max_events_per_poll: usize,
    loop_playback: bool,
    status: PlaybackStatus,
    state: PlaybackState,
    session_start: i64,
    paused_total: u64,
    paused_at: Option<u64>,
}

impl PlaybackScheduler {
    pub fn new(
        events: Arc<EventStream>,
        tempo_map: Arc<TempoMap>,
        tempo: &TempoSettings,
        playback: &PlaybackSettings,
    ) -> Self {
        let state = PlaybackState::at_start(&tempo_map);
        Self {
            events,
            tempo_map,
            tempo: tempo.clone(),
            max_events_per_poll: playback.max_events_per_poll.max(1),
            loop_playback: playback.loop_playback,
            status: PlaybackStatus::Stopped,
            state,
            session_start: 0,
            paused_total: 0,
            paused_at: None,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn events(&self) -> &EventStream {
        &self.events
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.loop_playback = enabled;
    }

    pub fn active_tempo(&self) -> u32 {
        self.state.micros_per_beat
    }

    /// Virtual microseconds since the session started, excluding pauses.
    pub fn elapsed(&self, now: u64) -> f64 {
        let clock = self.paused_at.unwrap_or(now);
        let elapsed = clock as i64 - self.session_start - self.paused_total as i64;
        elapsed.max(0) as f64
    }

    pub fn current_tick(&self, now: u64) -> u64 {
        match self.status {
            PlaybackStatus::Stopped => 0,
            PlaybackStatus::Finished => self.events.last_tick(),
            PlaybackStatus::Playing | PlaybackStatus::Paused => {
                self.state.current_tick(self.elapsed(now))
            }
        }
    }

    fn transition(&mut self, transition: Transition) -> bool {
        match self.status.apply(transition) {
            Some(status) => {
                if status != self.status {
                    debug!(from = %self.status, to = %status, "Playback state");
                }
                self.status = status;
                true
            }
            None => false,
        }
    }

    fn reset_clock(&mut self, now: u64, virtual_micros: f64) {
        self.session_start = now as i64 - virtual_micros.round() as i64;
        self.paused_total = 0;
        self.paused_at = None;
    }

    /// Starts from tick 0, silencing every channel first. No-op while playing.
    pub fn start<S: VoiceSink + ?Sized>(&mut self, now: u64, sink: &mut S) -> Result<(), AudioError> {
        if self.status == PlaybackStatus::Playing {
            return Ok(());
        }
        self.restart(now, sink)
    }

    pub fn restart<S: VoiceSink + ?Sized>(
        &mut self,
        now: u64,
        sink: &mut S,
    ) -> Result<(), AudioError> {
        silence_all(sink)?;
        self.state = PlaybackState::at_start(&self.tempo_map);
        self.reset_clock(now, 0.0);
        self.transition(Transition::Start);
        info!(events = self.events.len(), "Playback started");
        Ok(())
    }

    pub fn stop<S: VoiceSink + ?Sized>(&mut self, sink: &mut S) -> Result<(), AudioError> {
        silence_all(sink)?;
        self.state = PlaybackState::at_start(&self.tempo_map);
        self.paused_at = None;
        self.transition(Transition::Stop);
        info!("Playback stopped");
        Ok(())
    }

    /// Freezes the virtual clock. Sounding notes are left as they are.
    pub fn pause(&mut self, now: u64) {
        if self.transition(Transition::Pause) {
            self.paused_at = Some(now);
        }
    }

    pub fn resume(&mut self, now: u64) {
        if let Some(paused_at) = self.paused_at {
            if self.transition(Transition::Resume) {
                self.paused_total += now.saturating_sub(paused_at);
                self.paused_at = None;
            }
        }
    }

    pub fn toggle_pause(&mut self, now: u64) {
        match self.status {
            PlaybackStatus::Playing => self.pause(now),
            PlaybackStatus::Paused => self.resume(now),
            _ => {}
        }
    }

    /// Jumps to `target` (clamped to the last event), silencing everything
    /// and replaying the controller state in effect at that point.
    pub fn seek<S: VoiceSink + ?Sized>(
        &mut self,
        target: u64,
        now: u64,
        sink: &mut S,
    ) -> Result<(), AudioError> {
        let target = target.min(self.events.last_tick());
        let index = self.events.first_at_or_after(target);

        silence_all(sink)?;
        chase_controllers(&self.events.as_slice()[..index], sink)?;

        self.state = PlaybackState::at_tick(&self.tempo_map, target, index);
        let paused = self.status == PlaybackStatus::Paused;
        self.reset_clock(now, self.state.accumulated_micros);
        if paused {
            self.paused_at = Some(now);
        }
        self.transition(Transition::Seek);
        info!(tick = target, event = index, "Seek");
        Ok(())
    }

    pub fn skip_to_first_note<S: VoiceSink + ?Sized>(
        &mut self,
        now: u64,
        sink: &mut S,
    ) -> Result<(), AudioError> {
        let target = self.events.first_note_tick().unwrap_or(0);
        self.seek(target, now, sink)
    }

    /// Dispatches everything due at `now`. Returns the dispatched range of
    /// the event stream.
    pub fn poll<S: VoiceSink + ?Sized>(
        &mut self,
        now: u64,
        sink: &mut S,
    ) -> Result<Dispatch, AudioError> {
        let start = self.state.next_event;
        if self.status != PlaybackStatus::Playing {
            return Ok(Dispatch {
                range: start..start,
                deferred: false,
            });
        }

        let events = self.events.as_slice();
        let (next, range) = advance(
            &self.state,
            events,
            &self.tempo,
            self.elapsed(now),
            self.max_events_per_poll,
        );
        self.state = next;

        for event in &events[range.clone()] {
            trace!(tick = event.tick, kind = ?event.kind, "Dispatch");
            if let Some(message) = event.kind.voice_message() {
                sink.emit(message)?;
            }
        }

        let remaining = &events[self.state.next_event..];
        let deferred = remaining
            .first()
            .is_some_and(|e| self.state.due_at(e) <= self.elapsed(now));

        if remaining.is_empty() {
            self.transition(Transition::Exhausted);
            info!(tick = self.state.last_dispatched_tick, "Playback finished");
            if self.loop_playback && !self.events.is_empty() {
                self.restart(now, sink)?;
            }
        }

        Ok(Dispatch { range, deferred })
    }
}

/// Re-emits the last program, per-controller value and pitch bend of each
/// channel found in `events`.
fn chase_controllers<S: VoiceSink + ?Sized>(
    events: &[UnifiedEvent],
    sink: &mut S,
) -> Result<(), AudioError> {
    let mut programs: [Option<u8>; 16] = [None; 16];
    let mut bends: [Option<u16>; 16] = [None; 16];
    let mut controllers: Vec<[Option<u8>; 120]> = vec![[None; 120]; 16];

    for event in events {
        match event.kind {
            EventKind::ProgramChange {
                channel, program, ..
            } => programs[channel as usize & 0x0F] = Some(program),
            EventKind::PitchBend { channel, value, .. } => {
                bends[channel as usize & 0x0F] = Some(value)
            }
            EventKind::ControlChange {
                channel,
                controller,
                value,
                ..
            } if controller < 120 => {
                controllers[channel as usize & 0x0F][controller as usize] = Some(value)
            }
            _ => {}
        }
    }

    for channel in 0..16u8 {
        let ch = channel as usize;
        if let Some(program) = programs[ch] {
            sink.emit(VoiceMessage {
                status: 0xC0 | channel,
                data1: program,
                data2: 0,
            })?;
        }
        for (controller, value) in controllers[ch].iter().enumerate() {
            if let Some(value) = value {
                sink.emit(VoiceMessage::control_change(channel, controller as u8, *value))?;
            }
        }
        if let Some(bend) = bends[ch] {
            sink.emit(VoiceMessage {
                status: 0xE0 | channel,
                data1: (bend & 0x7F) as u8,
                data2: (bend >> 7 & 0x7F) as u8,
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::RecordingSink;
    use crate::midi::Note;
    use crate::timing::EventUnifier;

    fn note(start: u64, end: u64, pitch: u8) -> Note {
        Note {
            start_tick: start,
            end_tick: end,
            pitch,
            velocity: 100,
            channel: 0,
            track: 0,
        }
    }

    fn tempo_event(tick: u64, micros_per_beat: u32) -> UnifiedEvent {
        UnifiedEvent::new(tick, EventKind::Tempo { micros_per_beat })
    }

    /// Division 480 at 120 BPM: one tick is 1041.67us, one beat 500ms.
    fn build(notes: &[Note], tempos: &[(u64, u32)]) -> (Arc<EventStream>, Arc<TempoMap>) {
        let mut unifier = EventUnifier::new();
        for &(tick, mpb) in tempos {
            unifier.push(tempo_event(tick, mpb));
        }
        unifier.push_notes(notes);
        let stream = unifier.finish();
        let map = TempoMap::build(stream.as_slice(), 480, &TempoSettings::default());
        (Arc::new(stream), Arc::new(map))
    }

    fn scheduler(notes: &[Note], tempos: &[(u64, u32)]) -> PlaybackScheduler {
        let (stream, map) = build(notes, tempos);
        PlaybackScheduler::new(
            stream,
            map,
            &TempoSettings::default(),
            &PlaybackSettings::default(),
        )
    }

    fn started(notes: &[Note], tempos: &[(u64, u32)]) -> (PlaybackScheduler, RecordingSink) {
        let mut sched = scheduler(notes, tempos);
        let mut sink = RecordingSink::default();
        sink.initialize().unwrap();
        sched.start(0, &mut sink).unwrap();
        sink.clear();
        (sched, sink)
    }

    #[test]
    fn advance_dispatches_only_due_events() {
        let (stream, map) = build(&[note(0, 480, 60), note(480, 960, 62)], &[(0, 500_000)]);
        let state = PlaybackState::at_start(&map);
        let settings = TempoSettings::default();

        let (state, range) = advance(&state, stream.as_slice(), &settings, 0.0, usize::MAX);
        assert_eq!(range, 0..2);

        let (state, range) = advance(&state, stream.as_slice(), &settings, 499_999.0, usize::MAX);
        assert!(range.is_empty());

        let (state, range) = advance(&state, stream.as_slice(), &settings, 500_000.0, usize::MAX);
        assert_eq!(range, 2..4);
        assert_eq!(state.last_dispatched_tick, 480);
        assert_eq!(state.accumulated_micros, 500_000.0);
    }

    #[test]
    fn tempo_change_applies_before_later_events() {
        let (stream, map) = build(&[note(480, 960, 60)], &[(0, 500_000), (480, 1_000_000)]);
        let settings = TempoSettings::default();
        let (state, _) = advance(
            &PlaybackState::at_start(&map),
            stream.as_slice(),
            &settings,
            500_000.0,
            usize::MAX,
        );
        assert_eq!(state.micros_per_beat, 1_000_000);

        // The note-off at 960 is one slow beat after 480.
        let (_, range) = advance(&state, stream.as_slice(), &settings, 1_499_999.0, usize::MAX);
        assert!(range.is_empty());
        let (_, range) = advance(&state, stream.as_slice(), &settings, 1_500_000.0, usize::MAX);
        assert_eq!(range.len(), 1);
    }

    #[test]
    fn invalid_mid_stream_tempo_is_ignored() {
        let mut unifier = EventUnifier::new();
        unifier.push(tempo_event(0, 500_000));
        unifier.push(tempo_event(10, 5));
        unifier.push_notes(&[note(20, 40, 60)]);
        let stream = unifier.finish();
        let map = TempoMap::build(stream.as_slice(), 480, &TempoSettings::default());

        let (state, _) = advance(
            &PlaybackState::at_start(&map),
            stream.as_slice(),
            &TempoSettings::default(),
            1e9,
            usize::MAX,
        );
        assert_eq!(state.micros_per_beat, 500_000);
    }

    #[test]
    fn same_samples_dispatch_identically() {
        let notes: Vec<_> = (0..50).map(|i| note(i * 37, i * 37 + 100, (i % 12) as u8 + 48)).collect();
        let samples = [0, 17_000, 33_000, 250_000, 250_001, 900_000, 2_000_000, 9_000_000];

        let run = || {
            let (mut sched, mut sink) = started(&notes, &[(0, 500_000), (600, 300_000)]);
            let mut ranges = Vec::new();
            for now in samples {
                ranges.push(sched.poll(now, &mut sink).unwrap().range);
            }
            (ranges, sink.messages)
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn zero_length_pause_changes_nothing() {
        let notes: Vec<_> = (0..20).map(|i| note(i * 100, i * 100 + 50, 60)).collect();
        let (mut plain, mut plain_sink) = started(&notes, &[]);
        let (mut paused, mut paused_sink) = started(&notes, &[]);

        for now in (0..2_000_000).step_by(40_000) {
            paused.pause(now);
            paused.resume(now);
            let a = plain.poll(now, &mut plain_sink).unwrap();
            let b = paused.poll(now, &mut paused_sink).unwrap();
            assert_eq!(a, b);
        }
        assert_eq!(plain_sink.messages, paused_sink.messages);
    }

    #[test]
    fn pause_freezes_the_clock() {
        let (mut sched, mut sink) = started(&[note(480, 960, 60)], &[]);

        sched.pause(100_000);
        assert_eq!(sched.status(), PlaybackStatus::Paused);
        assert!(sched.poll(10_000_000, &mut sink).unwrap().range.is_empty());
        let frozen = sched.current_tick(10_000_000);
        assert_eq!(frozen, sched.current_tick(100_000));

        sched.resume(1_000_000);
        assert!(sched.poll(1_399_999, &mut sink).unwrap().range.is_empty());
        assert_eq!(sched.poll(1_400_000, &mut sink).unwrap().range.len(), 1);
    }

    #[test]
    fn poll_cap_defers_without_dropping() {
        let notes: Vec<_> = (0..10).map(|i| note(0, 10, 60 + i)).collect();
        let (stream, map) = build(&notes, &[]);
        let mut sched = PlaybackScheduler::new(
            stream,
            map,
            &TempoSettings::default(),
            &PlaybackSettings {
                max_events_per_poll: 4,
                ..PlaybackSettings::default()
            },
        );
        let mut sink = RecordingSink::default();
        sink.initialize().unwrap();
        sched.start(0, &mut sink).unwrap();
        sink.clear();

        let first = sched.poll(1_000_000, &mut sink).unwrap();
        assert_eq!(first.range, 0..4);
        assert!(first.deferred);

        let mut total = first.range.len();
        while sched.status() == PlaybackStatus::Playing {
            total += sched.poll(1_000_000, &mut sink).unwrap().range.len();
        }
        assert_eq!(total, 20);
        assert_eq!(sink.note_ons().len(), 10);
        assert_eq!(sched.status(), PlaybackStatus::Finished);
    }

    #[test]
    fn start_silences_every_channel() {
        let mut sched = scheduler(&[note(0, 10, 60)], &[]);
        let mut sink = RecordingSink::default();
        sink.initialize().unwrap();
        sched.start(0, &mut sink).unwrap();

        assert_eq!(sink.messages.len(), 32);
        assert_eq!(sched.status(), PlaybackStatus::Playing);
    }

    #[test]
    fn seek_resumes_from_target_with_chased_state() {
        let mut unifier = EventUnifier::new();
        unifier.push(UnifiedEvent::new(
            0,
            EventKind::ProgramChange {
                channel: 0,
                program: 33,
                track: 0,
            },
        ));
        unifier.push(UnifiedEvent::new(
            100,
            EventKind::ControlChange {
                channel: 0,
                controller: 7,
                value: 80,
                track: 0,
            },
        ));
        unifier.push_notes(&[note(0, 480, 60), note(960, 1440, 64)]);
        let stream = Arc::new(unifier.finish());
        let map = Arc::new(TempoMap::build(stream.as_slice(), 480, &TempoSettings::default()));
        let mut sched = PlaybackScheduler::new(
            stream,
            map,
            &TempoSettings::default(),
            &PlaybackSettings::default(),
        );
        let mut sink = RecordingSink::default();
        sink.initialize().unwrap();
        sched.start(0, &mut sink).unwrap();
        sink.clear();

        sched.seek(960, 5_000, &mut sink).unwrap();
        assert_eq!(&sink.messages[32..], &[
            VoiceMessage {
                status: 0xC0,
                data1: 33,
                data2: 0
            },
            VoiceMessage::control_change(0, 7, 80),
        ]);
        assert_eq!(sched.current_tick(5_000), 960);

        sink.clear();
        sched.poll(5_000, &mut sink).unwrap();
        assert_eq!(sink.note_ons(), vec![64]);
    }

    #[test]
    fn skip_to_first_note_jumps_over_leading_silence() {
        let (mut sched, mut sink) = started(&[note(4800, 5000, 60)], &[]);
        sched.skip_to_first_note(0, &mut sink).unwrap();
        sink.clear();

        sched.poll(0, &mut sink).unwrap();
        assert_eq!(sink.note_ons(), vec![60]);
    }

    #[test]
    fn finishes_or_loops_at_end() {
        let (mut sched, mut sink) = started(&[note(0, 480, 60)], &[]);
        sched.poll(600_000, &mut sink).unwrap();
        assert_eq!(sched.status(), PlaybackStatus::Finished);
        assert_eq!(sched.current_tick(700_000), 480);

        let (mut sched, mut sink) = started(&[note(0, 480, 60)], &[]);
        sched.set_loop(true);
        sched.poll(600_000, &mut sink).unwrap();
        assert_eq!(sched.status(), PlaybackStatus::Playing);
        assert_eq!(sched.current_tick(600_000), 0);
    }

    #[test]
    fn empty_song_does_not_loop() {
        let (mut sched, mut sink) = started(&[], &[]);
        sched.set_loop(true);
        sched.poll(0, &mut sink).unwrap();
        sched.poll(16_000, &mut sink).unwrap();
        sched.poll(32_000, &mut sink).unwrap();

        assert_eq!(sched.status(), PlaybackStatus::Finished);
        assert!(sink.messages.is_empty());
    }

    #[test]
    fn stop_returns_to_the_beginning() {
        let (mut sched, mut sink) = started(&[note(0, 480, 60)], &[]);
        sched.poll(100_000, &mut sink).unwrap();
        sched.stop(&mut sink).unwrap();

        assert_eq!(sched.status(), PlaybackStatus::Stopped);
        assert_eq!(sched.current_tick(200_000), 0);
        assert!(sched.poll(200_000, &mut sink).unwrap().range.is_empty());
    }
}
