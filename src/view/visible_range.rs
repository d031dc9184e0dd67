use std::ops::Range;

use crate::midi::Note;

/// The tick interval `[current - lookback, current + lookahead]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewWindow {
    pub current_tick: u64,
    pub lookahead: u64,
    pub lookback: u64,
}

impl ViewWindow {
    pub fn from_tick(&self) -> u64 {
        self.current_tick.saturating_sub(self.lookback)
    }

    pub fn to_tick(&self) -> u64 {
        self.current_tick.saturating_add(self.lookahead)
    }
}

/// Notes sharing a power-of-two duration class, as indexes into the
/// start-sorted note list. Any note in the class ending at or after `from`
/// starts at or after `from - max_duration`.
#[derive(Debug, Clone, Default)]
struct DurationClass {
    max_duration: u64,
    members: Vec<usize>,
}

/// Notes sorted by start tick and bucketed by duration, so a single long
/// note cannot widen the search for every note after it.
#[derive(Debug, Clone, Default)]
pub struct NoteIndex {
    notes: Vec<Note>,
    classes: Vec<DurationClass>,
}

fn duration_class(duration: u64) -> usize {
    (u64::BITS - duration.leading_zeros()) as usize
}

impl NoteIndex {
    pub fn new(mut notes: Vec<Note>) -> Self {
        notes.sort_by_key(|n| n.start_tick);

        let mut classes: Vec<DurationClass> = Vec::new();
        for (i, note) in notes.iter().enumerate() {
            let duration = note.duration();
            let class = duration_class(duration);
            if classes.len() <= class {
                classes.resize_with(class + 1, DurationClass::default);
            }
            let bucket = &mut classes[class];
            bucket.max_duration = bucket.max_duration.max(duration);
            bucket.members.push(i);
        }
        classes.retain(|c| !c.members.is_empty());

        Self { notes, classes }
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    fn class_range(&self, class: &DurationClass, window: &ViewWindow) -> Range<usize> {
        let earliest = window.from_tick().saturating_sub(class.max_duration);
        let to = window.to_tick();
        let lower = class
            .members
            .partition_point(|&i| self.notes[i].start_tick < earliest);
        let upper = class
            .members
            .partition_point(|&i| self.notes[i].start_tick <= to);
        lower..upper.max(lower)
    }

    /// Number of notes a query for `window` has to look at. Only notes that
    /// start within one class duration before the window are examined
    /// besides the ones overlapping it.
    pub fn candidate_count(&self, window: &ViewWindow) -> usize {
        self.classes
            .iter()
            .map(|c| self.class_range(c, window).len())
            .sum()
    }

    /// The earliest-starting notes overlapping `window`, at most `cap`.
    pub fn visible(&self, window: &ViewWindow, cap: usize) -> VisibleNotes<'_> {
        let from = window.from_tick();
        let mut cursors: Vec<ClassCursor<'_>> = self
            .classes
            .iter()
            .map(|c| ClassCursor {
                members: c.members[self.class_range(c, window)].iter(),
                head: None,
            })
            .collect();
        for cursor in &mut cursors {
            cursor.refill(&self.notes, from);
        }
        VisibleNotes {
            notes: &self.notes,
            cursors,
            from,
            remaining: cap,
        }
    }
}

struct ClassCursor<'a> {
    members: std::slice::Iter<'a, usize>,
    head: Option<usize>,
}

impl ClassCursor<'_> {
    fn refill(&mut self, notes: &[Note], from: u64) {
        self.head = self
            .members
            .find(|&&i| notes[i].end_tick >= from)
            .copied();
    }
}

/// Merges the duration classes back into start order.
pub struct VisibleNotes<'a> {
    notes: &'a [Note],
    cursors: Vec<ClassCursor<'a>>,
    from: u64,
    remaining: usize,
}

impl<'a> Iterator for VisibleNotes<'a> {
    type Item = &'a Note;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        // Lower index means earlier (or equal) start.
        let cursor = self
            .cursors
            .iter_mut()
            .filter(|c| c.head.is_some())
            .min_by_key(|c| c.head)?;
        let index = cursor.head?;
        cursor.refill(self.notes, self.from);
        self.remaining -= 1;
        Some(&self.notes[index])
    }
}
