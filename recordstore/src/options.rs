//! Collection-level tunables (spec §6 Configuration parameters).

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RecordStoreOptions {
    pub uri: String,
    pub ns: String,
    pub is_capped: bool,
    pub is_oplog: bool,
    /// > 0 iff capped.
    pub capped_max_bytes: Option<u64>,
    /// -1 (None) or > 0, capped only.
    pub capped_max_docs: Option<i64>,
    /// Set iff the engine metadata declares oplog key extraction version 1.
    pub use_oplog_id_extraction: bool,

    pub samples_per_stone: u32,
    pub min_stones_to_keep: u32,
    pub max_stones_to_keep: u32,
    pub eviction_batch_cap: u64,
    pub eviction_try_wait: Duration,
    pub size_storer_flush_stride: u64,
}

impl RecordStoreOptions {
    pub fn new(uri: impl Into<String>, ns: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ns: ns.into(),
            is_capped: false,
            is_oplog: false,
            capped_max_bytes: None,
            capped_max_docs: None,
            use_oplog_id_extraction: false,
            samples_per_stone: 10,
            min_stones_to_keep: 10,
            max_stones_to_keep: 100,
            eviction_batch_cap: 20_000,
            eviction_try_wait: Duration::from_millis(200),
            size_storer_flush_stride: 1_000,
        }
    }

    pub fn capped(mut self, max_bytes: u64, max_docs: Option<i64>) -> Self {
        self.is_capped = true;
        self.capped_max_bytes = Some(max_bytes);
        self.capped_max_docs = max_docs;
        self
    }

    pub fn oplog(mut self, max_bytes: u64) -> Self {
        self.is_oplog = true;
        self.is_capped = true;
        self.capped_max_bytes = Some(max_bytes);
        self.use_oplog_id_extraction = true;
        self
    }

    /// Capped slack: min(cappedMaxBytes / 10, 16 MiB).
    pub fn slack_bytes(&self) -> u64 {
        let max = self.capped_max_bytes.unwrap_or(0);
        (max / 10).min(16 * 1024 * 1024)
    }
}
