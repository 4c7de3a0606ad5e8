//! Record store: an ordered, capped, and oplog-capable key/value layer
//! built directly on a WiredTiger-shaped engine (the [`wiredtiger`] crate).
//!
//! See [`RecordStore`] for the main entry point, [`RecordStoreOptions`] for
//! collection-level configuration, and [`engine::EngineAdapter`] for the
//! seam this crate uses to talk to the underlying storage engine.

pub mod capped;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod options;
pub mod record_id;
pub mod record_store;
pub mod recovery_unit;
pub mod size_tracker;
pub mod stones;
pub mod uncommitted_ids;

pub use cursor::{RandomCursor, RecordCursor};
pub use engine::{EngineAdapter, EngineCursor, WtEngineAdapter};
pub use error::{Error, Result};
pub use options::RecordStoreOptions;
pub use record_id::RecordId;
pub use record_store::{RecordStore, RepairStats, StatsSnapshot};
pub use size_tracker::{InMemorySizeStorer, SizeStorer, WiredTigerSizeStorer};
