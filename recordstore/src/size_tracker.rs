//! In-memory record/byte counters and their periodic flush to durable
//! storage (spec §4.B Size Tracker).

use crate::engine::EngineAdapter;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Persists a table's `(num_records, data_size)` pair across restarts.
/// WiredTiger itself has no notion of "row count"; MongoDB keeps this in a
/// side table (`sizeStorer`) flushed on checkpoint. We model the same split:
/// counters live in memory for the hot path, and are flushed out through
/// this trait at a bounded interval.
pub trait SizeStorer: Send + Sync {
    fn load(&self, ident: &str) -> Option<(i64, i64)>;
    fn store(&self, ident: &str, num_records: i64, data_size: i64);
}

/// A `SizeStorer` backed by the engine's own metadata table, the way
/// MongoDB's `WiredTigerSizeStorer` persists into a dedicated
/// `table:sizeStorer`. Held behind the `EngineAdapter` so this module does
/// not need to know about cursors directly; callers hand in load/store
/// closures wired to the engine.
pub struct InMemorySizeStorer {
    values: Mutex<std::collections::HashMap<String, (i64, i64)>>,
}

impl InMemorySizeStorer {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for InMemorySizeStorer {
    fn default() -> Self {
        Self::new()
    }
}

impl SizeStorer for InMemorySizeStorer {
    fn load(&self, ident: &str) -> Option<(i64, i64)> {
        self.values.lock().get(ident).copied()
    }

    fn store(&self, ident: &str, num_records: i64, data_size: i64) {
        self.values
            .lock()
            .insert(ident.to_string(), (num_records, data_size));
    }
}

/// A `SizeStorer` backed by a dedicated record store table (`table:sizeStorer`
/// by convention), one row per collection. Since the engine only ever deals
/// in `RecordId`-keyed tables, each collection's identifier is hashed down to
/// a stable record id; the value is just `"{num_records},{data_size}"`.
pub struct WiredTigerSizeStorer {
    table: Arc<dyn EngineAdapter>,
}

impl WiredTigerSizeStorer {
    pub fn new(table: Arc<dyn EngineAdapter>) -> Self {
        Self { table }
    }

    fn ident_key(ident: &str) -> crate::record_id::RecordId {
        // FNV-1a, masked into the positive i64 range `RecordId` requires.
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in ident.as_bytes() {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        let positive = (hash >> 1) as i64;
        crate::record_id::RecordId::new(positive.max(1)).expect("masked value is always positive")
    }
}

impl SizeStorer for WiredTigerSizeStorer {
    fn load(&self, ident: &str) -> Option<(i64, i64)> {
        let mut cursor = self.table.open_cursor().ok()?;
        cursor.set_key(Self::ident_key(ident));
        if !cursor.search().ok()? {
            return None;
        }
        let raw = cursor.get_value().ok()?;
        let text = String::from_utf8(raw).ok()?;
        let (records, bytes) = text.split_once(',')?;
        Some((records.parse().ok()?, bytes.parse().ok()?))
    }

    fn store(&self, ident: &str, num_records: i64, data_size: i64) {
        let Ok(mut cursor) = self.table.open_cursor() else {
            return;
        };
        let key = Self::ident_key(ident);
        let value = format!("{num_records},{data_size}");
        cursor.set_key(key);
        cursor.set_value(value.as_bytes());
        if cursor.insert().is_err() {
            let _ = cursor.update();
        }
    }
}

/// Live counters for one table. `num_records` and `data_size` are approximate
/// between flushes: every insert/delete updates them immediately in memory
/// (so concurrent readers always see a consistent-enough estimate for capped
/// eviction and `validate` decisions), but the durable copy is only refreshed
/// every `flush_stride` mutations to avoid a metadata-table write per op.
pub struct SizeTracker {
    num_records: AtomicI64,
    data_size: AtomicI64,
    flush_stride: u64,
    mutations_since_flush: AtomicU64,
}

impl SizeTracker {
    pub fn new(initial_records: i64, initial_bytes: i64, flush_stride: u64) -> Self {
        Self {
            num_records: AtomicI64::new(initial_records),
            data_size: AtomicI64::new(initial_bytes),
            flush_stride: flush_stride.max(1),
            mutations_since_flush: AtomicU64::new(0),
        }
    }

    pub fn num_records(&self) -> i64 {
        self.num_records.load(Ordering::Relaxed)
    }

    pub fn data_size(&self) -> i64 {
        self.data_size.load(Ordering::Relaxed)
    }

    pub fn add_records(&self, delta: i64) {
        Self::clamped_add(&self.num_records, delta, "num_records");
    }

    pub fn add_bytes(&self, delta: i64) {
        Self::clamped_add(&self.data_size, delta, "data_size");
    }

    /// Applies `delta` but never lets the counter go negative: concurrent
    /// rollbacks and evictions racing against a size-storer reload can
    /// otherwise momentarily underflow what is really just an estimate.
    fn clamped_add(counter: &AtomicI64, delta: i64, which: &str) {
        let mut current = counter.load(Ordering::Relaxed);
        loop {
            let next = (current + delta).max(0);
            match counter.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    if current + delta < 0 {
                        tracing::warn!(which, delta, current, "size tracker counter clamped at zero");
                    }
                    return;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Records that a mutation happened and reports whether a durable flush
    /// is due (caller is responsible for actually performing it through a
    /// `SizeStorer`).
    pub fn tick_flush_due(&self) -> bool {
        let count = self.mutations_since_flush.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= self.flush_stride {
            self.mutations_since_flush.store(0, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn flush(&self, ident: &str, storer: &dyn SizeStorer) {
        storer.store(ident, self.num_records(), self.data_size());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_is_due_every_stride_mutations() {
        let tracker = SizeTracker::new(0, 0, 3);
        assert!(!tracker.tick_flush_due());
        assert!(!tracker.tick_flush_due());
        assert!(tracker.tick_flush_due());
        assert!(!tracker.tick_flush_due());
    }

    #[test]
    fn counters_saturate_correctly_on_rollback_undo() {
        let tracker = SizeTracker::new(5, 500, 1000);
        tracker.add_records(1);
        tracker.add_bytes(100);
        assert_eq!(tracker.num_records(), 6);
        tracker.add_records(-1);
        tracker.add_bytes(-100);
        assert_eq!(tracker.num_records(), 5);
        assert_eq!(tracker.data_size(), 500);
    }

    #[test]
    fn in_memory_storer_roundtrips() {
        let storer = InMemorySizeStorer::new();
        assert!(storer.load("table:foo").is_none());
        storer.store("table:foo", 10, 1000);
        assert_eq!(storer.load("table:foo"), Some((10, 1000)));
    }
}
