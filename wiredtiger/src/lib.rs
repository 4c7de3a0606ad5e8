#[allow(dead_code)]
mod raw_api;

pub mod config;

use delegate::delegate;
use std::sync::Arc;

pub use raw_api::{is_conflict, is_not_found, CompareStatus, Error};
use raw_api::{RawConnection, RawCursor, RawSession, Result};

pub use config::{AppMetadata, BlockCompressor, TableCreateConfig};

struct ConnectionInner {
    raw: RawConnection,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        let _ = self.raw.close();
    }
}

/// A handle to an open WiredTiger database. Cheaply `Clone`-able: clones
/// share the same underlying connection and the connection only closes once
/// the last handle drops. Owned (no borrowed lifetime) so a `Connection` can
/// be stashed inside longer-lived structures such as a record store's engine
/// adapter, the way `rusqlite::Connection` is handed around by value rather
/// than borrowed.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

#[allow(dead_code)]
impl Connection {
    pub fn open(filename: &str, options: &str) -> Result<Self> {
        let raw = RawConnection::open(filename, options)?;
        Ok(Self {
            inner: Arc::new(ConnectionInner { raw }),
        })
    }

    pub fn open_session(&self) -> Result<Session> {
        let raw_session = self.inner.raw.open_session()?;
        Ok(Session {
            inner: Arc::new(SessionInner {
                raw: raw_session,
                _conn: self.clone(),
            }),
        })
    }

    delegate! {
        to self.inner.raw {
            pub fn get_home(&self) -> Result<String>;
            pub fn is_new(&self) -> bool;
            pub fn reconfigure(&self, config: &str) -> Result<()>;
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "connection")
    }
}

struct SessionInner {
    raw: RawSession,
    // Keeps the connection alive for as long as any session derived from it
    // is outstanding; never read directly.
    _conn: Connection,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let _ = self.raw.close();
    }
}

/// An open WiredTiger session. `Clone`-able so multiple cursors (and a
/// transaction) can share one session — required since transaction state and
/// cursor visibility are both scoped to the session, not the cursor, in
/// WiredTiger.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[allow(dead_code)]
impl Session {
    pub fn open_cursor(&self, uri: &str, config: &str) -> Result<Cursor> {
        let raw_cursor = self.inner.raw.open_cursor_with_config(uri, config)?;
        Ok(Cursor {
            session: self.clone(),
            raw_cursor,
        })
    }

    /// A cursor configured for `next_random=true`; used for the record
    /// store's oplog-stone sampling and random-record access (spec §4.A/§4.F).
    pub fn open_random_cursor(&self, uri: &str) -> Result<Cursor> {
        let raw_cursor = self.inner.raw.open_random_cursor(uri)?;
        Ok(Cursor {
            session: self.clone(),
            raw_cursor,
        })
    }

    pub fn transaction(&self, config: &str) -> Result<Transaction> {
        self.begin_transaction(config)?;
        Ok(Transaction {
            session: self.clone(),
            finished: false,
        })
    }

    /// Truncate the byte range `[start, stop]` of `name`, inclusive, per
    /// `WT_SESSION::truncate` with two bounding cursors (spec §4.A truncateRange).
    pub fn truncate_range(&self, name: &str, start: &Cursor, stop: &Cursor) -> Result<()> {
        self.inner
            .raw
            .truncate(name, &start.raw_cursor, &stop.raw_cursor)
    }

    pub fn truncate_all(&self, name: &str) -> Result<()> {
        self.inner.raw.truncate_all(name)
    }

    /// Truncate from `start` (inclusive) to the end of the table, per
    /// `WT_SESSION::truncate` with a single bounding cursor.
    pub fn truncate_from(&self, name: &str, start: &Cursor) -> Result<()> {
        self.inner.raw.truncate_from(name, &start.raw_cursor)
    }

    delegate! {
        to self.inner.raw {
            pub fn begin_transaction(&self, config: &str) -> Result<()>;
            pub fn commit_transaction(&self, config: &str) -> Result<()>;
            pub fn create(&self, name: &str, config: &str) -> Result<()>;
            pub fn compact(&self, name: &str, config: &str) -> Result<()>;
            pub fn drop(&self, name: &str, config: &str) -> Result<()>;
            pub fn get_app_metadata(&self, uri: &str) -> Result<Option<String>>;
            pub fn rollback_transaction(&self, config: &str) -> Result<()>;
            pub fn reconfigure(&self, config: &str) -> Result<()>;
            pub fn reset(&self) -> Result<()>;
            pub fn verify(&self, name: &str, config: &str) -> Result<()>;
        }
    }
}

pub struct Transaction {
    session: Session,
    finished: bool,
}

#[allow(dead_code)]
impl Transaction {
    pub fn commit(&mut self, config: &str) -> Result<()> {
        self.session.commit_transaction(config)?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(&mut self, config: &str) -> Result<()> {
        self.session.rollback_transaction(config)?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.session.rollback_transaction("");
        }
    }
}

/// An open WiredTiger cursor, keyed on a signed 64-bit record number
/// (`key_format=q`) with a raw byte value (`value_format=u`) — the only
/// table shape the record store ever creates.
pub struct Cursor {
    session: Session,
    raw_cursor: RawCursor,
}

#[allow(dead_code)]
impl Cursor {
    pub fn set_key(&self, id: i64) {
        self.raw_cursor.set_key_id(id)
    }

    pub fn set_value(&self, value: &[u8]) {
        self.raw_cursor.set_value_bytes(value)
    }

    pub fn get_key(&self) -> Result<i64> {
        self.raw_cursor.get_key_id()
    }

    pub fn get_value(&self) -> Result<Vec<u8>> {
        self.raw_cursor.get_value_bytes()
    }

    pub fn compare(&self, other: &Cursor) -> Result<CompareStatus> {
        self.raw_cursor.compare(&other.raw_cursor)
    }

    pub fn equals(&self, other: &Cursor) -> Result<bool> {
        self.raw_cursor.equals(&other.raw_cursor)
    }

    /// The session this cursor was opened on, e.g. to start a transaction
    /// before the first write through it.
    pub fn session(&self) -> &Session {
        &self.session
    }

    delegate! {
        to self.raw_cursor {
            pub fn insert(&self) -> Result<()>;
            pub fn next(&self) -> Result<bool>;
            pub fn prev(&self) -> Result<bool>;
            pub fn reconfigure(&self, config: &str) -> Result<()>;
            pub fn remove(&self) -> Result<()>;
            pub fn reset(&self) -> Result<()>;
            pub fn search(&self) -> Result<bool>;
            pub fn search_near(&self) -> Result<Option<CompareStatus>>;
            pub fn update(&self) -> Result<()>;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Connection, Error};
    use assert_ok::assert_ok;

    // Tests that opening a database (without "create")
    // returns an error when the file does not exist.
    #[test]
    fn test_open_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let res = Connection::open(temp_dir.path().to_str().unwrap(), "");
        if let Err(Error { code: _, message }) = res {
            assert_eq!(message, "WT_TRY_SALVAGE: database corruption detected");
        } else {
            panic!("expected an error");
        }
    }

    #[test]
    fn test_basic() {
        let temp_dir = tempfile::tempdir().unwrap();

        {
            let conn = Connection::open(temp_dir.path().to_str().unwrap(), "create")
                .expect("failed to open connection");
            let sess = assert_ok!(conn.open_session());
            assert_ok!(sess.create("table:foo", ""));

            let create_result = sess.create("table:mytable", "key_format=q,value_format=u");
            assert_ok!(create_result);
            let cur = assert_ok!(sess.open_cursor("table:mytable", ""));

            cur.set_key(1);
            cur.set_value(b"brock");
            assert_ok!(cur.insert());

            cur.set_key(2);
            cur.set_value(b"obrien");
            assert_ok!(cur.insert());

            cur.set_key(1);
            assert!(assert_ok!(cur.search()));
            assert_eq!(assert_ok!(cur.get_value()), b"brock");
        }

        // Re-open the file and assert the data is still there.
        {
            let conn = Connection::open(temp_dir.path().to_str().unwrap(), "create")
                .expect("failed to open connection");
            let sess = assert_ok!(conn.open_session());
            let cur = assert_ok!(sess.open_cursor("table:mytable", ""));

            assert!(assert_ok!(cur.next()));
            assert_eq!(assert_ok!(cur.get_key()), 1);
            assert_eq!(assert_ok!(cur.get_value()), b"brock");

            assert!(assert_ok!(cur.next()));
            assert_eq!(assert_ok!(cur.get_key()), 2);
            assert_eq!(assert_ok!(cur.get_value()), b"obrien");
        }
    }

    /// Tests that the key/val inserted within a transaction is not visible
    /// to other sessions before it is committed, and becomes visible after.
    #[test]
    fn test_transaction_commit() {
        let temp_dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(temp_dir.path().to_str().unwrap(), "create")
            .expect("failed to open connection");

        let sess1 = assert_ok!(conn.open_session());
        let sess2 = assert_ok!(conn.open_session());

        assert_ok!(sess1.create("table:foo", "key_format=q,value_format=u"));
        let cur = assert_ok!(sess1.open_cursor("table:foo", ""));
        let mut txn1 = sess1.transaction("").expect("begin txn failed");
        cur.set_key(1);
        cur.set_value(b"brock");
        assert_ok!(cur.insert());

        let cur2 = assert_ok!(sess2.open_cursor("table:foo", ""));
        cur2.set_key(1);
        assert!(matches!(cur2.search(), Err(Error { code, .. }) if code != 0));
        drop(cur2);

        txn1.commit("").expect("commit failed");

        let cur2 = assert_ok!(sess2.open_cursor("table:foo", ""));
        cur2.set_key(1);
        assert!(assert_ok!(cur2.search()));
        assert_eq!(assert_ok!(cur2.get_value()), b"brock");
    }

    #[test]
    fn test_transaction_rollback() {
        let temp_dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(temp_dir.path().to_str().unwrap(), "create")
            .expect("failed to open connection");

        let sess1 = assert_ok!(conn.open_session());
        let sess2 = assert_ok!(conn.open_session());

        assert_ok!(sess1.create("table:foo", "key_format=q,value_format=u"));
        let cur = assert_ok!(sess1.open_cursor("table:foo", ""));
        let txn1 = sess1.transaction("").expect("begin txn failed");
        cur.set_key(1);
        cur.set_value(b"brock");
        assert_ok!(cur.insert());

        drop(txn1);

        let cur2 = assert_ok!(sess2.open_cursor("table:foo", ""));
        cur2.set_key(1);
        assert!(!assert_ok!(cur2.search()));
    }

    #[test]
    fn test_reconfigure() {
        let temp_dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(temp_dir.path().to_str().unwrap(), "create")
            .expect("failed to open connection");
        assert_ok!(conn.reconfigure("cache_size=200MB"));
    }
}
