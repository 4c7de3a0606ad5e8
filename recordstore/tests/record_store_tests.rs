//! Integration tests driving `RecordStore` against a real (temp-dir)
//! WiredTiger database, covering the store's testable properties: basic
//! roundtrip, capped eviction by bytes and by doc count, oplog stone
//! accumulation, and `cappedTruncateAfter`.

use recordstore::engine::WtEngineAdapter;
use recordstore::size_tracker::InMemorySizeStorer;
use recordstore::{EngineAdapter, RecordId, RecordStore, RecordStoreOptions};
use std::sync::Arc;
use wiredtiger::{Connection, TableCreateConfig};

fn open_store(dir: &tempfile::TempDir, options: RecordStoreOptions) -> RecordStore {
    // Surfaces the clamp/eviction-cap `tracing::warn!`s when a test is run
    // with `--nocapture`; harmless to call more than once across tests.
    let _ = tracing_subscriber::fmt::try_init();

    let conn = Connection::open(dir.path().to_str().unwrap(), "create").unwrap();
    // `WtEngineAdapter` keeps its own clone of the connection handle (it is
    // reference-counted), so `conn` does not need to outlive this call.
    let engine: Arc<dyn EngineAdapter> =
        Arc::new(WtEngineAdapter::new(&conn, options.uri.clone()).unwrap());
    RecordStore::create_and_open(
        engine,
        options,
        Arc::new(InMemorySizeStorer::new()),
        TableCreateConfig::new(),
    )
    .unwrap()
}

#[test]
fn basic_insert_find_update_delete_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, RecordStoreOptions::new("table:basic", "test.basic"));

    let id1 = store.insert(b"hello").unwrap();
    let id2 = store.insert(b"world").unwrap();
    assert!(id2 > id1);

    assert_eq!(store.find_record(id1).unwrap().unwrap(), b"hello");
    assert_eq!(store.find_record(id2).unwrap().unwrap(), b"world");

    store.update(id1, b"hello2").unwrap();
    assert_eq!(store.find_record(id1).unwrap().unwrap(), b"hello2");

    store.delete(id2).unwrap();
    assert!(store.find_record(id2).unwrap().is_none());

    let stats = store.stats();
    assert_eq!(stats.num_records, 1);
}

#[test]
fn forward_cursor_visits_records_in_id_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, RecordStoreOptions::new("table:scan", "test.scan"));

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(store.insert(format!("rec-{i}").as_bytes()).unwrap());
    }

    let mut cursor = store.get_cursor(true).unwrap();
    let mut seen = Vec::new();
    while let Some((id, _)) = cursor.advance().unwrap() {
        seen.push(id);
    }
    assert_eq!(seen, ids);
}

#[test]
fn capped_collection_evicts_oldest_once_over_byte_cap() {
    let dir = tempfile::tempdir().unwrap();
    let options = RecordStoreOptions::new("table:capped_bytes", "test.capped_bytes")
        .capped(200, None);
    let store = open_store(&dir, options);

    let mut ids = Vec::new();
    for _ in 0..20 {
        ids.push(store.insert(&[0u8; 20]).unwrap());
    }

    // Eviction should have kept data_size within the cap plus slack.
    let stats = store.stats();
    assert!(stats.data_size as u64 <= 200 + (200 / 10).min(16 * 1024 * 1024));

    // The oldest record should be gone; the newest should still be there.
    assert!(store.find_record(ids[0]).unwrap().is_none());
    assert!(store.find_record(*ids.last().unwrap()).unwrap().is_some());
}

#[test]
fn capped_collection_evicts_by_doc_count_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let options = RecordStoreOptions::new("table:capped_docs", "test.capped_docs")
        .capped(1_000_000, Some(5));
    let store = open_store(&dir, options);

    let mut ids = Vec::new();
    for _ in 0..10 {
        ids.push(store.insert(b"x").unwrap());
    }

    let stats = store.stats();
    assert_eq!(stats.num_records, 5);
    assert!(store.find_record(ids[0]).unwrap().is_none());
    assert!(store.find_record(*ids.last().unwrap()).unwrap().is_some());
}

#[test]
fn truncate_drops_every_record_and_resets_counters() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, RecordStoreOptions::new("table:trunc", "test.trunc"));

    for _ in 0..5 {
        store.insert(b"x").unwrap();
    }
    store.truncate().unwrap();

    let stats = store.stats();
    assert_eq!(stats.num_records, 0);
    assert_eq!(stats.data_size, 0);
}

#[test]
fn capped_truncate_after_removes_only_the_trailing_range() {
    let dir = tempfile::tempdir().unwrap();
    let options = RecordStoreOptions::new("table:oplog_trunc", "test.oplog_trunc")
        .capped(10_000_000, None);
    let store = open_store(&dir, options);

    let mut ids = Vec::new();
    for i in 0..10 {
        ids.push(store.insert(format!("e-{i}").as_bytes()).unwrap());
    }

    let cutoff = ids[6];
    let mut deleted = Vec::new();
    let removed = store
        .capped_truncate_after(cutoff, false, |id, _value| deleted.push(id))
        .unwrap();

    assert_eq!(removed, 3);
    assert_eq!(deleted, &ids[7..]);
    for &kept in &ids[..=6] {
        assert!(store.find_record(kept).unwrap().is_some());
    }
    for &removed_id in &ids[7..] {
        assert!(store.find_record(removed_id).unwrap().is_none());
    }
}

#[test]
fn validate_counts_every_visible_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir, RecordStoreOptions::new("table:validate", "test.validate"));

    for _ in 0..7 {
        store.insert(b"abcd").unwrap();
    }

    let stats = store.validate().unwrap();
    assert_eq!(stats.records_seen, 7);
    assert_eq!(stats.bytes_seen, 28);
}

#[test]
fn oplog_update_rejects_a_size_changing_write() {
    let dir = tempfile::tempdir().unwrap();
    let options = RecordStoreOptions::new("table:oplog_update", "local.oplog_update").oplog(10_000_000);
    let store = open_store(&dir, options);

    let mut entry = [0u8; 8];
    entry[0..4].copy_from_slice(&1000u32.to_le_bytes());
    entry[4..8].copy_from_slice(&1u32.to_le_bytes());
    let id = store.insert(&entry).unwrap();

    // Same length: allowed.
    store.update(id, &entry).unwrap();

    // Longer: must be rejected, the oplog record must not change size.
    let mut longer = entry.to_vec();
    longer.push(0);
    assert!(store.update(id, &longer).is_err());
}

#[test]
fn delete_is_forbidden_on_a_capped_collection() {
    let dir = tempfile::tempdir().unwrap();
    let options = RecordStoreOptions::new("table:capped_delete", "test.capped_delete")
        .capped(10_000_000, None);
    let store = open_store(&dir, options);

    let id = store.insert(b"x").unwrap();
    assert!(store.delete(id).is_err());
    // The record must still be there: the rejected delete had no effect.
    assert!(store.find_record(id).unwrap().is_some());
}

#[test]
fn capped_cursor_restore_after_eviction_is_terminal_not_a_skip() {
    let dir = tempfile::tempdir().unwrap();
    let options = RecordStoreOptions::new("table:capped_restore", "test.capped_restore")
        .capped(120, None);
    let store = open_store(&dir, options);

    let first = store.insert(&[0u8; 20]).unwrap();
    for _ in 0..4 {
        store.insert(&[0u8; 20]).unwrap();
    }

    let mut cursor = store.get_cursor(true).unwrap();
    let (id, _) = cursor.advance().unwrap().unwrap();
    assert_eq!(id, first);
    cursor.save().unwrap();

    // Push well past the cap so `first` is guaranteed to be evicted.
    for _ in 0..10 {
        store.insert(&[0u8; 20]).unwrap();
    }
    assert!(store.find_record(first).unwrap().is_none());

    // A capped collection must never silently resume on whatever survived
    // near the evicted record; the miss is terminal.
    assert!(!cursor.restore().unwrap());
    assert_eq!(cursor.advance().unwrap(), None);
}

#[test]
fn reclaim_oldest_stone_truncates_the_engine_and_the_size_tracker() {
    let dir = tempfile::tempdir().unwrap();
    // Default `min_stones_to_keep` is 10, so `bytes_per_stone` is 200 here
    // (2,000 / 10); 60 * 40-byte entries produce ~12 stones, comfortably
    // past the floor.
    let options = RecordStoreOptions::new("table:oplog_reclaim", "local.oplog_reclaim").oplog(2_000);
    let store = open_store(&dir, options);

    let mut ids = Vec::new();
    for i in 0..60u32 {
        let mut entry = vec![0u8; 40];
        entry[0..4].copy_from_slice(&(1000 + i).to_le_bytes());
        entry[4..8].copy_from_slice(&1u32.to_le_bytes());
        ids.push(store.insert(&entry).unwrap());
    }

    let before = store.stats();
    assert!(before.num_stones > 2, "need excess stones for this test to mean anything");

    let reclaimed = store.reclaim_oldest_stone().unwrap();
    assert!(reclaimed);

    let after = store.stats();
    assert!(after.num_records < before.num_records);
    assert!(store.find_record(ids[0]).unwrap().is_none());
    assert!(store.find_record(*ids.last().unwrap()).unwrap().is_some());
}

#[test]
fn oplog_ids_are_extracted_from_embedded_timestamps_not_allocated() {
    let dir = tempfile::tempdir().unwrap();
    let options = RecordStoreOptions::new("table:oplog", "local.oplog").oplog(10_000_000);
    let store = open_store(&dir, options);

    let mut entry = [0u8; 8];
    entry[0..4].copy_from_slice(&1000u32.to_le_bytes());
    entry[4..8].copy_from_slice(&1u32.to_le_bytes());
    let id = store.insert(&entry).unwrap();
    assert_eq!(id, RecordId::new((1000i64 << 31) | 1).unwrap());
}
