use std::collections::VecDeque;

/// A closed note interval. `track` is the source track and only groups notes
/// visually; `channel` is what gets re-emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    pub start_tick: u64,
    pub end_tick: u64,
    pub pitch: u8,
    pub velocity: u8,
    pub channel: u8,
    pub track: u16,
}

impl Note {
    pub fn duration(&self) -> u64 {
        self.end_tick.saturating_sub(self.start_tick)
    }

    /// True when any part of the note lies within `[from, to]`.
    pub fn overlaps(&self, from: u64, to: u64) -> bool {
        self.end_tick >= from && self.start_tick <= to
    }
}

const KEY_SLOTS: usize = 16 * 128;

fn key(channel: u8, pitch: u8) -> usize {
    (channel as usize & 0x0F) << 7 | (pitch as usize & 0x7F)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedNotes {
    /// Sorted by start tick.
    pub notes: Vec<Note>,
    /// Notes closed at the track's final tick.
    pub dangling: usize,
    pub limit_reached: bool,
}

/// Pairs note-on/note-off events of one track into [`Note`]s.
///
/// Notes live in an arena in the order they were opened; each (channel, pitch)
/// key keeps a FIFO of arena slots still waiting for their note-off.
pub struct NotePairer {
    track: u16,
    notes: Vec<Note>,
    open: Vec<VecDeque<usize>>,
    open_count: usize,
    limit: usize,
    limit_reached: bool,
}

impl NotePairer {
    pub fn new(track: u16, limit: usize) -> Self {
        Self {
            track,
            notes: Vec::new(),
            open: vec![VecDeque::new(); KEY_SLOTS],
            open_count: 0,
            limit,
            limit_reached: false,
        }
    }

    pub fn open_count(&self) -> usize {
        self.open_count
    }

    /// Velocity 0 is treated as a note-off.
    pub fn note_on(&mut self, tick: u64, channel: u8, pitch: u8, velocity: u8) {
        if velocity == 0 {
            self.note_off(tick, channel, pitch);
            return;
        }
        if self.notes.len() >= self.limit {
            self.limit_reached = true;
            return;
        }

        let slot = self.notes.len();
        self.notes.push(Note {
            start_tick: tick,
            end_tick: tick,
            pitch: pitch & 0x7F,
            velocity: velocity & 0x7F,
            channel: channel & 0x0F,
            track: self.track,
        });
        self.open[key(channel, pitch)].push_back(slot);
        self.open_count += 1;
    }

    /// Closes the oldest open note for the key. Unmatched note-offs are ignored.
    pub fn note_off(&mut self, tick: u64, channel: u8, pitch: u8) {
        if let Some(slot) = self.open[key(channel, pitch)].pop_front() {
            let note = &mut self.notes[slot];
            note.end_tick = tick.max(note.start_tick);
            self.open_count -= 1;
        }
    }

    /// Closes every remaining note at `end_tick` and hands over the arena.
    pub fn finish(mut self, end_tick: u64) -> PairedNotes {
        let dangling = self.open_count;
        if dangling > 0 {
            for queue in &mut self.open {
                for slot in queue.drain(..) {
                    let note = &mut self.notes[slot];
                    note.end_tick = end_tick.max(note.start_tick);
                }
            }
        }

        PairedNotes {
            notes: self.notes,
            dangling,
            limit_reached: self.limit_reached,
        }
    }
}
