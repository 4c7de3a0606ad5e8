//! Oplog truncation markers (spec §4.F Oplog Stones).
//!
//! An oplog is append-only and trimmed from the front once it exceeds its
//! byte cap. Truncating one record at a time is far too slow at oplog
//! volumes, so instead the store accumulates coarse "stones": each one
//! remembers the highest `RecordId` and cumulative byte/doc count at the
//! moment it was closed. Reclaiming space means dropping whole stones
//! (and therefore whole ranges of records) at once.

use crate::record_id::RecordId;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stone {
    pub last_record: RecordId,
    pub bytes: i64,
    pub docs: i64,
}

struct Inner {
    stones: VecDeque<Stone>,
    /// Lowest record id still covered by this stone set (the closed stones
    /// plus the open accumulator). `None` until the first record is seen.
    first_record: Option<RecordId>,
    /// Accumulated since the last closed stone.
    current_bytes: i64,
    current_docs: i64,
    current_last: Option<RecordId>,
    dead: bool,
}

/// Owns the stone list for one oplog table plus the condvar that lets the
/// background reclaimer sleep until there is actual work to do.
pub struct OplogStones {
    inner: Mutex<Inner>,
    excess: Condvar,
    min_stones_to_keep: usize,
    max_stones_to_keep: usize,
    bytes_per_stone: i64,
}

impl OplogStones {
    /// `bytes_per_stone` is derived at construction from the collection's
    /// `cappedMaxBytes` and `minStonesToKeep`, so the stone list neither
    /// grows unboundedly nor reclaims coarser than necessary.
    pub fn new(bytes_per_stone: i64, min_stones_to_keep: u32, max_stones_to_keep: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                stones: VecDeque::new(),
                first_record: None,
                current_bytes: 0,
                current_docs: 0,
                current_last: None,
                dead: false,
            }),
            excess: Condvar::new(),
            min_stones_to_keep: min_stones_to_keep.max(1) as usize,
            max_stones_to_keep: max_stones_to_keep.max(1) as usize,
            bytes_per_stone: bytes_per_stone.max(1),
        }
    }

    pub fn bytes_per_stone(&self) -> i64 {
        self.bytes_per_stone
    }

    /// Full scan initialization: walk every record once at startup and
    /// build exact stones. Used when the collection is small enough that
    /// a full pass is cheap (spec §4.F initialization strategies).
    pub fn init_by_scan<I: IntoIterator<Item = (RecordId, i64)>>(&self, records: I) {
        let mut inner = self.inner.lock();
        for (id, size) in records {
            if inner.first_record.is_none() {
                inner.first_record = Some(id);
            }
            inner.current_bytes += size;
            inner.current_docs += 1;
            inner.current_last = Some(id);
            if inner.current_bytes >= self.bytes_per_stone {
                Self::close_current(&mut inner);
                Self::enforce_max_stones_locked(&mut inner, self.max_stones_to_keep);
            }
        }
    }

    /// Sampling initialization: given ids already drawn at random from the
    /// table (ascending order, e.g. via the engine's `next_random` cursor)
    /// plus the collection's known total record/byte counts, lay down
    /// approximate stone boundaries without reading every record's value.
    /// Used when the collection is too large for `init_by_scan` to be cheap
    /// (spec §4.F initialization strategies).
    pub fn init_by_sampling(&self, samples_ascending: &[RecordId], total_records: i64, total_bytes: i64) {
        if samples_ascending.is_empty() || total_records <= 0 || total_bytes <= 0 {
            return;
        }
        let expected_stones = ((total_bytes / self.bytes_per_stone).max(1)) as usize;
        let records_per_stone = ((total_records as usize) / expected_stones).max(1);
        let avg_record_bytes = total_bytes / total_records;
        let samples_per_expected_stone = (samples_ascending.len() / expected_stones).max(1);

        let mut inner = self.inner.lock();
        inner.first_record = Some(samples_ascending[0]);
        for (count, &id) in samples_ascending.iter().enumerate() {
            if (count + 1) % samples_per_expected_stone == 0 {
                inner.stones.push_back(Stone {
                    last_record: id,
                    bytes: avg_record_bytes * records_per_stone as i64,
                    docs: records_per_stone as i64,
                });
            }
        }
        inner.current_last = samples_ascending.last().copied();
        inner.current_bytes = 0;
        inner.current_docs = 0;
        Self::enforce_max_stones_locked(&mut inner, self.max_stones_to_keep);
    }

    fn close_current(inner: &mut Inner) {
        if let Some(last) = inner.current_last {
            inner.stones.push_back(Stone {
                last_record: last,
                bytes: inner.current_bytes,
                docs: inner.current_docs,
            });
            inner.current_bytes = 0;
            inner.current_docs = 0;
        }
    }

    /// Record a newly-inserted record against the open stone, closing it
    /// if it has now grown past `bytes_per_stone`.
    pub fn insert(&self, id: RecordId, bytes: i64) {
        let mut inner = self.inner.lock();
        if inner.first_record.is_none() {
            inner.first_record = Some(id);
        }
        inner.current_bytes += bytes;
        inner.current_docs += 1;
        inner.current_last = Some(id);
        if inner.current_bytes >= self.bytes_per_stone {
            Self::close_current(&mut inner);
            Self::enforce_max_stones_locked(&mut inner, self.max_stones_to_keep);
            drop(inner);
            self.excess.notify_one();
        }
    }

    /// Undo an `insert` whose owning transaction rolled back.
    pub fn uncommit(&self, bytes: i64, docs: i64) {
        let mut inner = self.inner.lock();
        inner.current_bytes -= bytes;
        inner.current_docs -= docs;
    }

    /// `cappedTruncateAfter` accounting (spec §4.F "Truncate-after
    /// accounting"): every stone whose `last_record` is past `cutoff` no
    /// longer describes a fully-intact range (part or all of it was just
    /// truncated away), so it is dropped from the closed list and its
    /// counters are credited back into the open accumulator rather than
    /// simply discarded. The caller then supplies the exact number of
    /// records/bytes the truncate actually removed (known precisely from
    /// walking the doomed range), which is subtracted from that same
    /// accumulator so the running totals stay exact rather than drifting.
    pub fn truncate_after(&self, cutoff: RecordId, removed_docs: i64, removed_bytes: i64) {
        let mut inner = self.inner.lock();
        while matches!(inner.stones.back(), Some(s) if s.last_record > cutoff) {
            let stone = inner.stones.pop_back().expect("checked Some above");
            inner.current_bytes += stone.bytes;
            inner.current_docs += stone.docs;
        }
        if inner.current_last.map_or(true, |last| last > cutoff) {
            inner.current_last = Some(cutoff);
        }
        inner.current_bytes = (inner.current_bytes - removed_bytes).max(0);
        inner.current_docs = (inner.current_docs - removed_docs).max(0);
    }

    /// True once there are more stones than the floor we always keep,
    /// i.e. there is a reclaimable prefix.
    pub fn has_excess_stones(&self) -> bool {
        self.inner.lock().stones.len() > self.min_stones_to_keep
    }

    /// Pop the oldest reclaimable stone if doing so would still leave at
    /// least `min_stones_to_keep` behind, returning the half-open range
    /// `[first_record, stone.last_record]` the caller must now drop from
    /// the underlying table, together with the stone itself (for the
    /// caller to subtract its counters from the size tracker). Advances
    /// `first_record` past the reclaimed stone.
    pub fn pop_oldest_reclaimable(&self) -> Option<(RecordId, Stone)> {
        let mut inner = self.inner.lock();
        if inner.stones.len() <= self.min_stones_to_keep {
            return None;
        }
        let stone = inner.stones.pop_front()?;
        let first = inner.first_record.unwrap_or(stone.last_record);
        inner.first_record = Some(stone.last_record.next());
        Some((first, stone))
    }

    /// Lowest record id still covered by this stone set, or `None` if
    /// nothing has been recorded yet.
    pub fn first_record(&self) -> Option<RecordId> {
        self.inner.lock().first_record
    }

    /// Drops every stone and any in-progress accumulation, for a full
    /// collection truncate.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.stones.clear();
        inner.first_record = None;
        inner.current_bytes = 0;
        inner.current_docs = 0;
        inner.current_last = None;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().stones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().stones.is_empty()
    }

    /// Caps runaway stone growth: if the list exceeds `max_stones_to_keep`,
    /// merge the oldest pair together rather than let it grow without bound
    /// on a workload whose records are far larger than average.
    pub fn enforce_max_stones(&self) {
        let mut inner = self.inner.lock();
        Self::enforce_max_stones_locked(&mut inner, self.max_stones_to_keep);
    }

    fn enforce_max_stones_locked(inner: &mut Inner, max_stones_to_keep: usize) {
        while inner.stones.len() > max_stones_to_keep {
            if let (Some(a), Some(b)) = (inner.stones.pop_front(), inner.stones.pop_front()) {
                inner.stones.push_front(Stone {
                    last_record: b.last_record,
                    bytes: a.bytes + b.bytes,
                    docs: a.docs + b.docs,
                });
            } else {
                break;
            }
        }
    }

    /// Blocks the calling (reclaimer) thread until either a stone becomes
    /// reclaimable or `kill` is called, whichever comes first.
    pub fn await_has_excess_stones_or_dead(&self) {
        let mut inner = self.inner.lock();
        while !inner.dead && inner.stones.len() <= self.min_stones_to_keep {
            self.excess.wait(&mut inner);
        }
    }

    /// Wakes any thread parked in `await_has_excess_stones_or_dead` and
    /// marks the stone set as shutting down; called once when the owning
    /// record store is destroyed.
    pub fn kill(&self) {
        let mut inner = self.inner.lock();
        inner.dead = true;
        drop(inner);
        self.excess.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_closes_a_stone_once_bytes_per_stone_is_reached() {
        let stones = OplogStones::new(100, 1, 100);
        let records = (1..=5).map(|i| (RecordId::new(i).unwrap(), 30));
        stones.init_by_scan(records);
        // 5 * 30 = 150 bytes: one stone closes at 120 (4 records), 30 left open.
        assert_eq!(stones.len(), 1);
        assert_eq!(stones.first_record(), Some(RecordId::new(1).unwrap()));
    }

    #[test]
    fn sampling_lays_down_approximate_stones_from_pre_drawn_samples() {
        let stones = OplogStones::new(1_000, 1, 100);
        let samples: Vec<RecordId> = (1..=20).map(|i| RecordId::new(i * 5).unwrap()).collect();
        stones.init_by_sampling(&samples, 2_000, 200_000);
        assert!(!stones.is_empty());
        assert_eq!(stones.first_record(), Some(RecordId::new(5).unwrap()));
    }

    #[test]
    fn truncate_after_credits_a_dropped_stones_counters_back_then_subtracts_removed() {
        let stones = OplogStones::new(10, 1, 100);
        for i in 1..=6 {
            stones.insert(RecordId::new(i).unwrap(), 10);
        }
        assert_eq!(stones.len(), 6);

        // Drop everything after id 3 (stones 4..=6), crediting their 3 * 10
        // bytes / 3 docs back into the accumulator, then subtract the 3
        // records / 30 bytes actually removed by the caller's scan.
        stones.truncate_after(RecordId::new(3).unwrap(), 3, 30);
        assert_eq!(stones.len(), 3);
        let inner = stones.inner.lock();
        assert_eq!(inner.current_bytes, 0);
        assert_eq!(inner.current_docs, 0);
    }

    #[test]
    fn has_excess_stones_respects_the_floor() {
        let stones = OplogStones::new(10, 3, 100);
        for i in 1..=3 {
            stones.insert(RecordId::new(i).unwrap(), 10);
        }
        assert!(!stones.has_excess_stones());
        stones.insert(RecordId::new(4).unwrap(), 10);
        assert!(stones.has_excess_stones());
        assert!(stones.pop_oldest_reclaimable().is_some());
        assert!(!stones.has_excess_stones());
    }

    #[test]
    fn pop_oldest_reclaimable_returns_the_range_and_advances_first_record() {
        let stones = OplogStones::new(10, 1, 100);
        for i in 1..=4 {
            stones.insert(RecordId::new(i).unwrap(), 10);
        }
        assert_eq!(stones.first_record(), Some(RecordId::new(1).unwrap()));

        let (first, stone) = stones.pop_oldest_reclaimable().unwrap();
        assert_eq!(first, RecordId::new(1).unwrap());
        assert_eq!(stone.last_record, RecordId::new(1).unwrap());
        assert_eq!(stones.first_record(), Some(RecordId::new(2).unwrap()));
    }

    #[test]
    fn enforce_max_stones_merges_the_oldest_pair_once_the_cap_is_exceeded() {
        let stones = OplogStones::new(10, 1, 2);
        for i in 1..=7 {
            stones.insert(RecordId::new(i).unwrap(), 10);
        }
        assert!(stones.len() <= 2);
    }

    #[test]
    fn uncommit_reverses_a_rolled_back_insert() {
        let stones = OplogStones::new(1000, 1, 100);
        stones.insert(RecordId::new(1).unwrap(), 50);
        stones.uncommit(50, 1);
        let inner = stones.inner.lock();
        assert_eq!(inner.current_bytes, 0);
        assert_eq!(inner.current_docs, 0);
    }
}
