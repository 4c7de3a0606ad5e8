//! Capped-collection eviction (spec §4.D).
//!
//! Capped collections delete their oldest records once `cappedMaxBytes` (and
//! optionally `cappedMaxDocs`) is exceeded. Eviction runs inline with the
//! insert that pushed the collection over the cap, under a strict
//! single-writer protocol: a doc-count-bounded collection always blocks
//! waiting for the evictor lock (deleting one doc at a time is cheap and
//! callers must never exceed `cappedMaxDocs`), while a byte-bounded
//! collection only *tries* the lock and skips eviction if another thread
//! already holds it, trading a little temporary overshoot (bounded by
//! `slack_bytes`) for not stalling every writer behind one evictor.

use crate::error::Result;
use crate::options::RecordStoreOptions;
use crate::record_id::RecordId;
use crate::size_tracker::SizeTracker;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// One deleted record, reported back to the caller so it can run its
/// `aboutToDeleteCapped` callback (e.g. removing matching change-stream
/// entries) before the delete is durable.
pub struct EvictedRecord {
    pub id: RecordId,
    pub bytes: i64,
}

/// Anything capable of deleting the oldest record(s) from the underlying
/// table; implemented by the engine adapter, abstracted here so eviction
/// policy can be unit tested without a real WiredTiger table.
pub trait CappedDeleter: Send + Sync {
    /// Deletes and returns the single oldest record, or `None` if the table
    /// is empty.
    fn delete_oldest(&self) -> Result<Option<EvictedRecord>>;
}

pub struct CappedEvictor {
    lock: Mutex<()>,
    max_bytes: i64,
    max_docs: Option<i64>,
    slack_bytes: i64,
    batch_cap: u64,
    try_wait: Duration,
}

impl CappedEvictor {
    pub fn new(options: &RecordStoreOptions) -> Self {
        Self {
            lock: Mutex::new(()),
            max_bytes: options.capped_max_bytes.unwrap_or(i64::MAX as u64) as i64,
            max_docs: options.capped_max_docs,
            slack_bytes: options.slack_bytes() as i64,
            batch_cap: options.eviction_batch_cap,
            try_wait: options.eviction_try_wait,
        }
    }

    fn over_cap(&self, tracker: &SizeTracker, allow_slack: bool) -> bool {
        let slack = if allow_slack { self.slack_bytes } else { 0 };
        if tracker.data_size() > self.max_bytes + slack {
            return true;
        }
        if let Some(max_docs) = self.max_docs {
            if tracker.num_records() > max_docs {
                return true;
            }
        }
        false
    }

    /// Called right after a successful insert. Runs the eviction loop under
    /// the appropriate locking discipline and invokes `on_evict` for every
    /// record removed so the caller can run its own side effects before
    /// moving on to the next one.
    pub fn maybe_evict(
        &self,
        deleter: &dyn CappedDeleter,
        tracker: &SizeTracker,
        mut on_evict: impl FnMut(&EvictedRecord),
    ) -> Result<u64> {
        let doc_bounded = self.max_docs.is_some();

        let _guard = if doc_bounded {
            Some(self.lock.lock())
        } else {
            match self.lock.try_lock_for(self.try_wait) {
                Some(g) => Some(g),
                None => return Ok(0),
            }
        };

        let mut evicted = 0u64;
        while self.over_cap(tracker, !doc_bounded) {
            if evicted >= self.batch_cap {
                tracing::warn!(
                    evicted,
                    cap = self.batch_cap,
                    "capped eviction batch cap reached; deferring remaining eviction to next insert"
                );
                break;
            }
            match deleter.delete_oldest()? {
                Some(rec) => {
                    tracker.add_records(-1);
                    tracker.add_bytes(-rec.bytes);
                    on_evict(&rec);
                    evicted += 1;
                }
                None => break,
            }
        }
        Ok(evicted)
    }
}
