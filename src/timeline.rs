//! Undo/redo history over configuration snapshots.
//!
//! Entries live in an arena and point at each other by index, so discarding
//! a branch never leaves a dangling link behind. Freed slots go on a free
//! list and are reused by later expands.
//!
//! ```text
//! expand(s3)          oldest ─ s0 ⇄ s1 ⇄ s2 ⇄ s3 ← cursor
//! undo() x2           oldest ─ s0 ⇄ s1 ⇄ s2 ⇄ s3
//!                                  ↑ cursor
//! expand(s4)          oldest ─ s0 ⇄ s1 ⇄ s4 ← cursor   (s2, s3 freed)
//! ```
//!
//! # Invariants
//!
//! 1. Every live entry has at most one older and one newer link.
//! 2. The cursor always names a live entry; the timeline is never empty.
//! 3. `expand` drops everything newer than the cursor before linking.
//! 4. With a depth limit, `len() <= max_depth` after every operation.

use tracing::debug;

use crate::constants::validation::MIN_HISTORY_DEPTH;
use crate::snapshot::ConfigurationSnapshot;

#[derive(Debug)]
struct Entry {
    snapshot: ConfigurationSnapshot,
    older: Option<usize>,
    newer: Option<usize>,
}

impl Entry {
    fn vacant() -> Self {
        Self { snapshot: ConfigurationSnapshot::new(Vec::new()), older: None, newer: None }
    }
}

#[derive(Debug)]
pub struct Timeline {
    slots: Vec<Entry>,
    free: Vec<usize>,
    cursor: usize,
    oldest: usize,
    live: usize,
    max_depth: Option<usize>,
}

impl Timeline {
    /// Start a history holding only `root`
    pub fn new(root: ConfigurationSnapshot) -> Self {
        Self {
            slots: vec![Entry { snapshot: root, older: None, newer: None }],
            free: Vec::new(),
            cursor: 0,
            oldest: 0,
            live: 1,
            max_depth: None,
        }
    }

    /// Start a history that keeps at most `max_depth` entries (at least 2)
    pub fn with_max_depth(root: ConfigurationSnapshot, max_depth: usize) -> Self {
        let mut timeline = Self::new(root);
        timeline.max_depth = Some(max_depth.max(MIN_HISTORY_DEPTH));
        timeline
    }

    /// Snapshot under the cursor
    pub fn current(&self) -> &ConfigurationSnapshot {
        &self.slots[self.cursor].snapshot
    }

    /// Arena slot of the cursor; stable for as long as the entry is live
    #[cfg(test)]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.live
    }

    #[cfg(test)]
    pub fn can_undo(&self) -> bool {
        self.slots[self.cursor].older.is_some()
    }

    #[cfg(test)]
    pub fn can_redo(&self) -> bool {
        self.slots[self.cursor].newer.is_some()
    }

    /// Steps available toward older entries
    pub fn undo_depth(&self) -> usize {
        self.walk(|e| e.older)
    }

    /// Steps available toward newer entries
    pub fn redo_depth(&self) -> usize {
        self.walk(|e| e.newer)
    }

    fn walk(&self, link: impl Fn(&Entry) -> Option<usize>) -> usize {
        let mut steps = 0;
        let mut at = self.cursor;
        while let Some(next) = link(&self.slots[at]) {
            steps += 1;
            at = next;
        }
        steps
    }

    /// Insert `snapshot` just newer than the cursor and move onto it.
    /// Whatever was newer than the cursor is discarded.
    pub fn expand(&mut self, snapshot: ConfigurationSnapshot) {
        let discarded = self.discard_newer();
        let (frame, timestamp) = (snapshot.frame, snapshot.timestamp);

        let slot = self.allocate(Entry { snapshot, older: Some(self.cursor), newer: None });
        self.slots[self.cursor].newer = Some(slot);
        self.cursor = slot;
        self.live += 1;

        let evicted = self.enforce_depth();
        debug!(
            slot = slot,
            frame = ?frame,
            timestamp = ?timestamp,
            discarded = discarded,
            evicted = evicted,
            len = self.live,
            "Expanded timeline"
        );
    }

    /// Move one step toward older entries; returns false at the oldest entry
    pub fn undo(&mut self) -> bool {
        match self.slots[self.cursor].older {
            Some(older) => {
                self.cursor = older;
                true
            }
            None => false,
        }
    }

    /// Move one step toward newer entries; returns false at the newest entry
    pub fn redo(&mut self) -> bool {
        match self.slots[self.cursor].newer {
            Some(newer) => {
                self.cursor = newer;
                true
            }
            None => false,
        }
    }

    fn allocate(&mut self, entry: Entry) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = entry;
                slot
            }
            None => {
                self.slots.push(entry);
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, slot: usize) -> Entry {
        let entry = std::mem::replace(&mut self.slots[slot], Entry::vacant());
        self.free.push(slot);
        self.live -= 1;
        entry
    }

    fn discard_newer(&mut self) -> usize {
        let mut count = 0;
        let mut next = self.slots[self.cursor].newer.take();
        while let Some(slot) = next {
            next = self.release(slot).newer;
            count += 1;
        }
        count
    }

    fn enforce_depth(&mut self) -> usize {
        let Some(max_depth) = self.max_depth else {
            return 0;
        };
        let mut count = 0;
        while self.live > max_depth && self.oldest != self.cursor {
            let Some(newer) = self.release(self.oldest).newer else {
                break;
            };
            self.slots[newer].older = None;
            self.oldest = newer;
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(v: f64) -> ConfigurationSnapshot {
        ConfigurationSnapshot::new(vec![v, v + 1.0, v + 2.0])
    }

    #[test]
    fn test_new_timeline_has_single_entry() {
        let timeline = Timeline::new(snap(0.0));
        assert_eq!(timeline.len(), 1);
        assert!(!timeline.can_undo());
        assert!(!timeline.can_redo());
        assert_eq!(timeline.current().values(), &[0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_expand_then_undo_restores_values() {
        let mut timeline = Timeline::new(snap(0.0));
        let before = timeline.current().clone();

        timeline.expand(snap(10.0));
        assert_eq!(timeline.current().values(), &[10.0, 11.0, 12.0]);

        assert!(timeline.undo());
        assert_eq!(timeline.current().values(), before.values());
        assert!(timeline.current().same_buffer(&before));
    }

    #[test]
    fn test_undo_at_oldest_is_noop() {
        let mut timeline = Timeline::new(snap(0.0));
        let cursor = timeline.cursor();
        let current = timeline.current().clone();

        assert!(!timeline.undo());
        assert_eq!(timeline.cursor(), cursor);
        assert!(timeline.current().same_buffer(&current));
    }

    #[test]
    fn test_redo_at_newest_is_noop() {
        let mut timeline = Timeline::new(snap(0.0));
        timeline.expand(snap(1.0));
        let cursor = timeline.cursor();
        let current = timeline.current().clone();

        assert!(!timeline.redo());
        assert_eq!(timeline.cursor(), cursor);
        assert!(timeline.current().same_buffer(&current));
    }

    #[test]
    fn test_undo_redo_walks_history() {
        let mut timeline = Timeline::new(snap(0.0));
        timeline.expand(snap(1.0));
        timeline.expand(snap(2.0));

        assert!(timeline.undo());
        assert!(timeline.undo());
        assert_eq!(timeline.current().values()[0], 0.0);
        assert_eq!(timeline.redo_depth(), 2);

        assert!(timeline.redo());
        assert_eq!(timeline.current().values()[0], 1.0);
        assert!(timeline.redo());
        assert_eq!(timeline.current().values()[0], 2.0);
        assert_eq!(timeline.undo_depth(), 2);
    }

    #[test]
    fn test_expand_after_undo_discards_redo_branch() {
        let mut timeline = Timeline::new(snap(0.0));
        timeline.expand(snap(1.0));
        timeline.expand(snap(2.0));
        timeline.undo();
        timeline.undo();

        timeline.expand(snap(5.0));

        assert!(!timeline.can_redo());
        assert!(!timeline.redo());
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.current().values()[0], 5.0);

        assert!(timeline.undo());
        assert_eq!(timeline.current().values()[0], 0.0);
        assert!(!timeline.undo());
    }

    #[test]
    fn test_discarded_slots_are_reused() {
        let mut timeline = Timeline::new(snap(0.0));
        timeline.expand(snap(1.0));
        timeline.expand(snap(2.0));
        timeline.undo();
        timeline.undo();

        timeline.expand(snap(3.0));
        timeline.expand(snap(4.0));

        // Two slots freed by the discard, two reused
        assert_eq!(timeline.slots.len(), 3);
        assert!(timeline.free.is_empty());
        assert_eq!(timeline.len(), 3);
    }

    #[test]
    fn test_max_depth_evicts_oldest() {
        let mut timeline = Timeline::with_max_depth(snap(0.0), 3);
        for i in 1..=5 {
            timeline.expand(snap(i as f64));
        }

        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline.undo_depth(), 2);

        timeline.undo();
        timeline.undo();
        assert_eq!(timeline.current().values()[0], 3.0);
        assert!(!timeline.undo());
    }

    #[test]
    fn test_max_depth_is_at_least_two() {
        let mut timeline = Timeline::with_max_depth(snap(0.0), 0);
        timeline.expand(snap(1.0));
        timeline.expand(snap(2.0));

        assert_eq!(timeline.len(), 2);
        assert!(timeline.undo());
        assert_eq!(timeline.current().values()[0], 1.0);
    }
}
