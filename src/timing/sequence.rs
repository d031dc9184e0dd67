use crate::events::{EventKind, Rank, UnifiedEvent};
use crate::midi::Note;

/// The globally ordered event list of one song. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventStream {
    events: Vec<UnifiedEvent>,
    first_note_tick: Option<u64>,
}

impl EventStream {
    pub fn as_slice(&self) -> &[UnifiedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&UnifiedEvent> {
        self.events.get(index)
    }

    pub fn first_note_tick(&self) -> Option<u64> {
        self.first_note_tick
    }

    pub fn last_tick(&self) -> u64 {
        self.events.last().map_or(0, |e| e.tick)
    }

    /// Index of the first event at or after `tick`.
    pub fn first_at_or_after(&self, tick: u64) -> usize {
        self.events.partition_point(|e| e.tick < tick)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, UnifiedEvent> {
        self.events.iter()
    }
}

/// Collects notes and per-track events and merges them into an
/// [`EventStream`] ordered by tick, then [`Rank`], then insertion order.
#[derive(Debug, Default)]
pub struct EventUnifier {
    entries: Vec<(u64, Rank, UnifiedEvent)>,
}

impl EventUnifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: UnifiedEvent) {
        self.entries.push((event.tick, event.kind.rank(), event));
    }

    /// Expands each note into a note-on and a note-off.
    pub fn push_notes(&mut self, notes: &[Note]) {
        self.entries.reserve(notes.len() * 2);
        for note in notes {
            self.push(UnifiedEvent::new(
                note.start_tick,
                EventKind::NoteOn {
                    channel: note.channel,
                    pitch: note.pitch,
                    velocity: note.velocity,
                    track: note.track,
                },
            ));

            let off_rank = if note.end_tick == note.start_tick {
                Rank::TrailingNoteOff
            } else {
                Rank::NoteOff
            };
            self.entries.push((
                note.end_tick,
                off_rank,
                UnifiedEvent::new(
                    note.end_tick,
                    EventKind::NoteOff {
                        channel: note.channel,
                        pitch: note.pitch,
                        track: note.track,
                    },
                ),
            ));
        }
    }

    pub fn finish(mut self) -> EventStream {
        self.entries.sort_by_key(|(tick, rank, _)| (*tick, *rank));

        let events: Vec<UnifiedEvent> = self.entries.into_iter().map(|(_, _, e)| e).collect();
        let first_note_tick = events
            .iter()
            .find(|e| matches!(e.kind, EventKind::NoteOn { .. }))
            .map(|e| e.tick);

        EventStream {
            events,
            first_note_tick,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(start: u64, end: u64, pitch: u8, track: u16) -> Note {
        Note {
            start_tick: start,
            end_tick: end,
            pitch,
            velocity: 100,
            channel: 0,
            track,
        }
    }

    fn tempo(tick: u64) -> UnifiedEvent {
        UnifiedEvent::new(
            tick,
            EventKind::Tempo {
                micros_per_beat: 400_000,
            },
        )
    }

    fn label(e: &UnifiedEvent) -> (u64, &'static str) {
        let name = match e.kind {
            EventKind::Tempo { .. } => "tempo",
            EventKind::Marker { .. } => "marker",
            EventKind::NoteOn { .. } => "on",
            EventKind::NoteOff { .. } => "off",
            _ => "channel",
        };
        (e.tick, name)
    }

    #[test]
    fn stream_is_tick_ordered_with_tempo_first() {
        let mut unifier = EventUnifier::new();
        unifier.push_notes(&[note(0, 480, 60, 1), note(480, 960, 62, 1)]);
        unifier.push(tempo(480));
        unifier.push(tempo(0));
        unifier.push(UnifiedEvent::new(
            480,
            EventKind::ControlChange {
                channel: 0,
                controller: 7,
                value: 90,
                track: 2,
            },
        ));
        let stream = unifier.finish();

        let order: Vec<_> = stream.iter().map(label).collect();
        assert_eq!(
            order,
            vec![
                (0, "tempo"),
                (0, "on"),
                (480, "tempo"),
                (480, "off"),
                (480, "channel"),
                (480, "on"),
                (960, "off"),
            ]
        );
        assert!(stream.as_slice().windows(2).all(|w| w[0].tick <= w[1].tick));
    }

    #[test]
    fn retrigger_releases_before_sounding_again() {
        let mut unifier = EventUnifier::new();
        unifier.push_notes(&[note(480, 960, 60, 0)]);
        unifier.push_notes(&[note(0, 480, 60, 0)]);
        let stream = unifier.finish();

        let order: Vec<_> = stream
            .iter()
            .map(|e| match e.kind {
                EventKind::NoteOn { pitch, .. } => (e.tick, "on", pitch),
                EventKind::NoteOff { pitch, .. } => (e.tick, "off", pitch),
                _ => (e.tick, "other", 0),
            })
            .collect();
        assert_eq!(
            order,
            vec![
                (0, "on", 60),
                (480, "off", 60),
                (480, "on", 60),
                (960, "off", 60),
            ]
        );
    }

    #[test]
    fn zero_length_note_sounds_before_release() {
        let mut unifier = EventUnifier::new();
        unifier.push_notes(&[note(100, 100, 60, 0)]);
        let order: Vec<_> = unifier.finish().iter().map(label).collect();
        assert_eq!(order, vec![(100, "on"), (100, "off")]);
    }

    #[test]
    fn same_rank_keeps_insertion_order() {
        let mut unifier = EventUnifier::new();
        unifier.push_notes(&[note(0, 10, 60, 0)]);
        unifier.push_notes(&[note(0, 10, 64, 1)]);
        let stream = unifier.finish();

        let tracks: Vec<_> = stream
            .iter()
            .filter_map(|e| match e.kind {
                EventKind::NoteOn { track, .. } => Some(track),
                _ => None,
            })
            .collect();
        assert_eq!(tracks, vec![0, 1]);
    }

    #[test]
    fn lookup_helpers() {
        let mut unifier = EventUnifier::new();
        unifier.push(tempo(0));
        unifier.push_notes(&[note(240, 480, 60, 0)]);
        let stream = unifier.finish();

        assert_eq!(stream.first_note_tick(), Some(240));
        assert_eq!(stream.last_tick(), 480);
        assert_eq!(stream.first_at_or_after(1), 1);
        assert_eq!(stream.first_at_or_after(240), 1);
        assert_eq!(stream.first_at_or_after(481), 3);
        assert_eq!(EventStream::default().first_note_tick(), None);
    }
}
