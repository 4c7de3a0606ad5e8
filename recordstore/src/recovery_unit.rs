//! Commit/rollback hook dispatch (spec §4.C, Design Note 1).
//!
//! Every mutation the record store makes to its in-memory bookkeeping
//! (size tracker deltas, uncommitted-id registration, stone accounting)
//! must only take effect once the enclosing WiredTiger transaction actually
//! commits, and must unwind cleanly if it rolls back instead. Rather than
//! registering a trait object per hook, callers build a flat `Change` enum
//! and hand a batch of them to a `RecoveryUnit`, which walks the batch on
//! commit or rollback. This keeps the hot insert/update/delete paths
//! allocation-free and avoids a dyn-dispatch table for a half dozen known
//! variants.

use crate::record_id::RecordId;
use crate::size_tracker::SizeTracker;
use crate::stones::OplogStones;
use crate::uncommitted_ids::UncommittedIds;
use std::sync::Arc;

/// A single pending effect, queued during a mutation and resolved once the
/// owning transaction's outcome is known.
pub enum Change {
    /// An id was reserved for an insert; must be un-registered from the
    /// uncommitted-id registry on either commit or rollback (the id becomes
    /// either visible or simply dead, but either way it stops blocking
    /// cursor visibility).
    InsertHook {
        ids: Arc<UncommittedIds>,
        id: RecordId,
    },
    /// Rollback must undo a `num_records`/`data_size` delta that was applied
    /// optimistically at insert/delete time.
    NumRecordsHook { tracker: Arc<SizeTracker>, delta: i64 },
    DataSizeHook { tracker: Arc<SizeTracker>, delta: i64 },
    /// Rollback must undo a stone's accumulated byte/doc counters.
    StoneInsertHook {
        stones: Arc<OplogStones>,
        bytes: i64,
        docs: i64,
    },
}

impl Change {
    fn commit(self) {
        match self {
            Change::InsertHook { ids, id } => ids.remove(id),
            Change::NumRecordsHook { .. } => {}
            Change::DataSizeHook { .. } => {}
            Change::StoneInsertHook { .. } => {}
        }
    }

    fn rollback(self) {
        match self {
            Change::InsertHook { ids, id } => ids.remove(id),
            Change::NumRecordsHook { tracker, delta } => tracker.add_records(-delta),
            Change::DataSizeHook { tracker, delta } => tracker.add_bytes(-delta),
            Change::StoneInsertHook {
                stones,
                bytes,
                docs,
            } => stones.uncommit(bytes, docs),
        }
    }
}

/// Accumulates `Change`s for the lifetime of one WiredTiger transaction and
/// resolves them all when the caller learns the transaction's outcome.
#[derive(Default)]
pub struct RecoveryUnit {
    changes: Vec<Change>,
}

impl RecoveryUnit {
    pub fn new() -> Self {
        Self { changes: Vec::new() }
    }

    pub fn register(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn commit(self) {
        for change in self.changes {
            change.commit();
        }
    }

    pub fn rollback(self) {
        for change in self.changes.into_iter().rev() {
            change.rollback();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
