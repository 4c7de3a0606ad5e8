//! Engine adapter (spec §4.A): the seam between the record store's policy
//! code and the underlying ordered key/value engine. Everything above this
//! module talks in terms of `RecordId` and byte slices; everything in this
//! module and below talks WiredTiger URIs and raw cursors. Kept as a trait
//! so the higher layers (capped eviction, stones, cursor state machine) can
//! be exercised in tests against an in-memory fake without a real database.

use crate::error::{Error, Result};
use crate::record_id::RecordId;
use parking_lot::Mutex;
use std::sync::Arc;
use wiredtiger::{AppMetadata, CompareStatus};

/// A single positioned read/write handle into one table. Mirrors the subset
/// of `wiredtiger::Cursor` the record store actually needs; implemented
/// directly by `WtEngineCursor` and by an in-memory fake for unit tests.
pub trait EngineCursor: Send {
    fn set_key(&mut self, id: RecordId);
    fn set_value(&mut self, value: &[u8]);
    fn get_key(&self) -> Result<RecordId>;
    fn get_value(&self) -> Result<Vec<u8>>;
    fn search(&mut self) -> Result<bool>;
    fn search_near(&mut self) -> Result<Option<CompareStatus>>;
    fn next(&mut self) -> Result<bool>;
    fn prev(&mut self) -> Result<bool>;
    fn insert(&mut self) -> Result<()>;
    fn update(&mut self) -> Result<()>;
    fn remove(&mut self) -> Result<()>;
    fn reset(&mut self) -> Result<()>;
}

/// The engine-facing half of component A: table lifecycle and session/
/// transaction control, scoped to one record store's table.
pub trait EngineAdapter: Send + Sync {
    fn create_table(&self, config: &str) -> Result<()>;
    fn drop_table(&self) -> Result<()>;
    fn get_app_metadata(&self) -> Result<Option<AppMetadata>>;
    fn verify(&self) -> Result<()>;
    fn compact(&self) -> Result<()>;

    fn open_cursor(&self) -> Result<Box<dyn EngineCursor>>;
    fn open_random_cursor(&self) -> Result<Box<dyn EngineCursor>>;

    /// Runs `body` inside a fresh WiredTiger transaction on this adapter's
    /// session, committing if it returns `Ok` and rolling back otherwise or
    /// on an explicit request. The closure gets a scratch cursor already
    /// bound to the same transaction.
    fn with_transaction(
        &self,
        body: &mut dyn FnMut(&mut dyn EngineCursor) -> Result<()>,
    ) -> Result<()>;

    fn truncate_all(&self) -> Result<()>;

    /// Truncate the closed range `[start, ..]`, i.e. delete `start` and
    /// everything after it, per spec §4.A `truncateRange`.
    fn truncate_after(&self, start: RecordId) -> Result<()>;

    /// Truncate the closed range `[first, last]`. Used by the stone-reclaim
    /// loop to drop exactly one reclaimed oplog stone's worth of records
    /// without disturbing anything after `last`.
    fn truncate_range(&self, first: RecordId, last: RecordId) -> Result<()>;
}

pub struct WtEngineCursor {
    cursor: wiredtiger::Cursor,
}

impl EngineCursor for WtEngineCursor {
    fn set_key(&mut self, id: RecordId) {
        self.cursor.set_key(id.get())
    }

    fn set_value(&mut self, value: &[u8]) {
        self.cursor.set_value(value)
    }

    fn get_key(&self) -> Result<RecordId> {
        let raw = self.cursor.get_key()?;
        RecordId::new(raw).ok_or_else(|| Error::StorageCorrupt(format!("non-positive key {raw}")))
    }

    fn get_value(&self) -> Result<Vec<u8>> {
        Ok(self.cursor.get_value()?)
    }

    fn search(&mut self) -> Result<bool> {
        Ok(self.cursor.search()?)
    }

    fn search_near(&mut self) -> Result<Option<CompareStatus>> {
        Ok(self.cursor.search_near()?)
    }

    fn next(&mut self) -> Result<bool> {
        Ok(self.cursor.next()?)
    }

    fn prev(&mut self) -> Result<bool> {
        Ok(self.cursor.prev()?)
    }

    fn insert(&mut self) -> Result<()> {
        Ok(self.cursor.insert()?)
    }

    fn update(&mut self) -> Result<()> {
        Ok(self.cursor.update()?)
    }

    fn remove(&mut self) -> Result<()> {
        Ok(self.cursor.remove()?)
    }

    fn reset(&mut self) -> Result<()> {
        Ok(self.cursor.reset()?)
    }
}

/// The real adapter: one dedicated WiredTiger session per table, guarded by
/// a lock since `WT_SESSION` and the cursors it opens are not safe to drive
/// concurrently from multiple threads.
pub struct WtEngineAdapter {
    uri: String,
    session: Arc<Mutex<wiredtiger::Session>>,
}

impl WtEngineAdapter {
    pub fn new(conn: &wiredtiger::Connection, uri: impl Into<String>) -> Result<Self> {
        let session = conn.open_session()?;
        Ok(Self {
            uri: uri.into(),
            session: Arc::new(Mutex::new(session)),
        })
    }
}

impl EngineAdapter for WtEngineAdapter {
    fn create_table(&self, config: &str) -> Result<()> {
        Ok(self.session.lock().create(&self.uri, config)?)
    }

    fn drop_table(&self) -> Result<()> {
        Ok(self.session.lock().drop(&self.uri, "")?)
    }

    fn get_app_metadata(&self) -> Result<Option<AppMetadata>> {
        let raw = self.session.lock().get_app_metadata(&self.uri)?;
        Ok(raw.and_then(|s| AppMetadata::parse(&s)))
    }

    fn verify(&self) -> Result<()> {
        Ok(self.session.lock().verify(&self.uri, "")?)
    }

    fn compact(&self) -> Result<()> {
        Ok(self.session.lock().compact(&self.uri, "")?)
    }

    fn open_cursor(&self) -> Result<Box<dyn EngineCursor>> {
        let session = self.session.lock();
        let cursor = session.open_cursor(&self.uri, "")?;
        Ok(Box::new(WtEngineCursor { cursor }))
    }

    fn open_random_cursor(&self) -> Result<Box<dyn EngineCursor>> {
        let session = self.session.lock();
        let cursor = session.open_random_cursor(&self.uri)?;
        Ok(Box::new(WtEngineCursor { cursor }))
    }

    fn with_transaction(
        &self,
        body: &mut dyn FnMut(&mut dyn EngineCursor) -> Result<()>,
    ) -> Result<()> {
        let session = self.session.lock();
        let mut txn = session.transaction("")?;
        let cursor = session.open_cursor(&self.uri, "")?;
        let mut wrapped = WtEngineCursor { cursor };
        match body(&mut wrapped) {
            Ok(()) => {
                txn.commit("")?;
                Ok(())
            }
            Err(e) => {
                let _ = txn.rollback("");
                Err(e)
            }
        }
    }

    fn truncate_all(&self) -> Result<()> {
        Ok(self.session.lock().truncate_all(&self.uri)?)
    }

    fn truncate_after(&self, start: RecordId) -> Result<()> {
        let session = self.session.lock();
        let start_cursor = session.open_cursor(&self.uri, "")?;
        start_cursor.set_key(start.get());
        if start_cursor.search_near()?.is_none() {
            // Table is empty; nothing to truncate.
            return Ok(());
        }
        let landed = start_cursor.get_key()?;
        if landed < start.get() {
            // search_near landed below the requested start (it was already
            // deleted); step forward so the truncate doesn't also take the
            // surviving record just before `start`.
            if !start_cursor.next()? {
                // Nothing at or after `start`; nothing to truncate.
                return Ok(());
            }
        }
        session.truncate_from(&self.uri, &start_cursor)?;
        Ok(())
    }

    fn truncate_range(&self, first: RecordId, last: RecordId) -> Result<()> {
        let session = self.session.lock();
        let start_cursor = session.open_cursor(&self.uri, "")?;
        start_cursor.set_key(first.get());
        if start_cursor.search_near()?.is_none() {
            // Table is empty; nothing to truncate.
            return Ok(());
        }
        if start_cursor.get_key()? < first.get() {
            // Landed below `first` (already gone); step up so we don't also
            // take the surviving record just before the range.
            if !start_cursor.next()? {
                return Ok(());
            }
        }

        let stop_cursor = session.open_cursor(&self.uri, "")?;
        stop_cursor.set_key(last.get());
        if stop_cursor.search_near()?.is_none() {
            return Ok(());
        }
        if stop_cursor.get_key()? > last.get() {
            // Landed above `last`; step down so we don't also take the
            // surviving record just past the range.
            if !stop_cursor.prev()? {
                return Ok(());
            }
        }

        if start_cursor.get_key()? > stop_cursor.get_key()? {
            // Nothing actually falls inside [first, last].
            return Ok(());
        }

        session.truncate_range(&self.uri, &start_cursor, &stop_cursor)?;
        Ok(())
    }
}
