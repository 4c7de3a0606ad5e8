//! Registry of record ids reserved but not yet committed (spec §4.E).
//!
//! WiredTiger's MVCC snapshots already hide uncommitted writes from other
//! transactions, but a *forward-scanning cursor inside the same snapshot
//! window* can still observe a just-reserved id if it was handed out by a
//! concurrent inserter that hasn't committed yet ("holes" in an otherwise
//! monotonic oplog). `UncommittedIds` is a small side index the oplog
//! cursor consults to decide whether to stop at a hole rather than skip
//! past it, per the same strategy MongoDB calls "oplog visibility".

use crate::record_id::RecordId;
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Default)]
struct Inner {
    // Kept in insertion order, which for a monotonically-increasing id
    // source is also ascending order; `front()` is therefore always the
    // lowest currently-unresolved id.
    pending: VecDeque<RecordId>,
    // The highest id ever reserved, including ones already resolved.
    // Once the pending queue drains back to empty this is the only record
    // left of where the oplog's visible tail actually is (spec §4.C
    // `oplogHighestSeen`).
    highest_seen: Option<RecordId>,
}

#[derive(Default)]
pub struct UncommittedIds {
    inner: Mutex<Inner>,
}

impl UncommittedIds {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Called when a new id is reserved for an insert, before the owning
    /// transaction commits. Updates `highest_seen` in the same critical
    /// section, per spec §4.C's "update oplogHighestSeen under the
    /// uncommitted-ids mutex".
    pub fn add_on_insert(&self, id: RecordId) {
        let mut inner = self.inner.lock();
        debug_assert!(inner.pending.back().map_or(true, |&last| last < id));
        inner.pending.push_back(id);
        inner.highest_seen = Some(id);
    }

    /// Called once the reserving transaction's outcome (commit or
    /// rollback) is known; the id no longer blocks visibility either way.
    pub fn remove(&self, id: RecordId) {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.pending.iter().position(|&x| x == id) {
            inner.pending.remove(pos);
        }
    }

    /// The lowest id still pending, i.e. the earliest point a forward
    /// cursor must not read past without checking for a hole.
    pub fn front(&self) -> Option<RecordId> {
        self.inner.lock().pending.front().copied()
    }

    /// The highest id ever reserved. Used as the forward-oplog read-till
    /// ceiling once there is no pending id to bound it instead (spec §4.C
    /// getCursor: `oplogReadTill := UncommittedIds.front() ?? oplogHighestSeen`).
    pub fn highest_seen(&self) -> Option<RecordId> {
        self.inner.lock().highest_seen
    }

    /// Whether `id` currently sits behind an earlier unresolved id and so
    /// must be treated as not-yet-visible even if it is physically on disk.
    pub fn is_hidden(&self, id: RecordId) -> bool {
        matches!(self.front(), Some(lowest) if id >= lowest)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn front_tracks_the_lowest_pending_id() {
        let ids = UncommittedIds::new();
        ids.add_on_insert(RecordId::new(5).unwrap());
        ids.add_on_insert(RecordId::new(6).unwrap());
        assert_eq!(ids.front(), Some(RecordId::new(5).unwrap()));
        ids.remove(RecordId::new(5).unwrap());
        assert_eq!(ids.front(), Some(RecordId::new(6).unwrap()));
        ids.remove(RecordId::new(6).unwrap());
        assert_eq!(ids.front(), None);
    }

    #[test]
    fn is_hidden_is_true_for_anything_at_or_past_the_lowest_pending_id() {
        let ids = UncommittedIds::new();
        ids.add_on_insert(RecordId::new(10).unwrap());
        assert!(!ids.is_hidden(RecordId::new(9).unwrap()));
        assert!(ids.is_hidden(RecordId::new(10).unwrap()));
        assert!(ids.is_hidden(RecordId::new(11).unwrap()));
    }

    #[test]
    fn highest_seen_survives_resolution_and_keeps_the_maximum() {
        let ids = UncommittedIds::new();
        assert_eq!(ids.highest_seen(), None);
        ids.add_on_insert(RecordId::new(1).unwrap());
        ids.add_on_insert(RecordId::new(2).unwrap());
        ids.remove(RecordId::new(1).unwrap());
        ids.remove(RecordId::new(2).unwrap());
        assert!(ids.is_empty());
        assert_eq!(ids.highest_seen(), Some(RecordId::new(2).unwrap()));
    }
}
