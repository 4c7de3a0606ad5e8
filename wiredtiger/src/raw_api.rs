use libc::{self, c_char};
use wiredtiger_sys as wtffi;
use std::ffi::{CStr, CString};
use std::ptr;

macro_rules! unwrap_or_panic {
    ($option:expr, $( $args:expr ),* ) => {
        match $option {
            Some(f) => f($($args),*),
            None => panic!("function pointer is None"),
        }
    };
}

macro_rules! make_result {
    ($err_code:expr, $ok:expr) => {
        if $err_code == 0 {
            Ok($ok)
        } else {
            Err(Error::from_code($err_code))
        }
    };
}

pub(crate) unsafe fn from_cstr(ptr: *const c_char) -> String {
    let cstr = CStr::from_ptr(ptr as *const _);
    String::from_utf8_lossy(cstr.to_bytes()).into_owned()
}

pub fn error_message(result: i32) -> String {
    unsafe {
        let msg = wtffi::wiredtiger_strerror(result);
        from_cstr(msg)
    }
}

pub struct RawConnection {
    conn: *mut wtffi::WT_CONNECTION,
}

pub struct RawSession {
    session: *mut wtffi::WT_SESSION,
}

pub struct RawCursor {
    cursor: *mut wtffi::WT_CURSOR,
}

// WT_CONNECTION methods are documented thread-safe. WT_SESSION and WT_CURSOR
// are not: concurrent calls on the same session or cursor are undefined, so
// access must be externally serialized (the record store does this with a
// lock per session). We mark all three Send + Sync so the owning types can
// be shared behind that lock; the serialization guarantee lives in the
// caller, not in these types.
unsafe impl Send for RawConnection {}
unsafe impl Sync for RawConnection {}
unsafe impl Send for RawSession {}
unsafe impl Sync for RawSession {}
unsafe impl Send for RawCursor {}
unsafe impl Sync for RawCursor {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub code: i32,
    pub message: String,
}

impl Error {
    pub(crate) fn from_code(code: i32) -> Self {
        Self {
            code,
            message: error_message(code),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Is this WiredTiger error a transient write-conflict the caller should retry?
pub fn is_conflict(code: i32) -> bool {
    code == wtffi::WT_ROLLBACK
}

/// Is this WiredTiger error "the key was not found" rather than an actual failure?
pub fn is_not_found(code: i32) -> bool {
    code == wtffi::WT_NOTFOUND
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareStatus {
    LessThan,
    Equal,
    GreaterThan,
}

impl CompareStatus {
    fn from_code(code: i32) -> Self {
        match code {
            x if x < 0 => Self::LessThan,
            0 => Self::Equal,
            _ => Self::GreaterThan,
        }
    }
}

impl RawConnection {
    pub fn open(filename: &str, options: &str) -> Result<Self> {
        let mut conn: *mut wtffi::WT_CONNECTION = ptr::null_mut();

        let options = CString::new(options).unwrap();
        let dbpath = CString::new(filename).unwrap();

        // TODO: support a non-null event handler.
        let event_handler: *const wtffi::WT_EVENT_HANDLER = ptr::null();

        let err_code = unsafe {
            wtffi::wiredtiger_open(
                dbpath.as_ptr(),
                event_handler as *mut wtffi::WT_EVENT_HANDLER,
                options.as_ptr(),
                &mut conn,
            )
        };
        make_result!(err_code, RawConnection { conn })
    }

    pub fn close(&self) -> Result<()> {
        let err_code = unsafe { unwrap_or_panic!((*self.conn).close, self.conn, std::ptr::null()) };
        make_result!(err_code, ())
    }

    pub fn reconfigure(&self, config: &str) -> Result<()> {
        let config = CString::new(config).unwrap();
        let err_code =
            unsafe { unwrap_or_panic!((*self.conn).reconfigure, self.conn, config.as_ptr()) };
        make_result!(err_code, ())
    }

    pub fn get_home(&self) -> Result<String> {
        let home = unsafe { unwrap_or_panic!((*self.conn).get_home, self.conn) };
        if home.is_null() {
            panic!("received null from calling get_home on WT_CONNECTION");
        }
        Ok(unsafe { from_cstr(home) })
    }

    pub fn is_new(&self) -> bool {
        let new_val = unsafe { unwrap_or_panic!((*self.conn).is_new, self.conn) };
        new_val != 0
    }

    pub fn open_session(&self) -> Result<RawSession> {
        let mut session: *mut wtffi::WT_SESSION = ptr::null_mut();
        let event_handler: *mut wtffi::WT_EVENT_HANDLER = ptr::null_mut();
        let err_code = unsafe {
            unwrap_or_panic!(
                (*self.conn).open_session,
                self.conn,
                event_handler,
                ptr::null(),
                &mut session
            )
        };
        make_result!(err_code, RawSession { session })
    }
}

impl RawSession {
    pub fn close(&self) -> Result<()> {
        let err_code =
            unsafe { unwrap_or_panic!((*self.session).close, self.session, std::ptr::null()) };
        make_result!(err_code, ())
    }

    pub fn reconfigure(&self, config: &str) -> Result<()> {
        let config = CString::new(config).unwrap();
        let err_code = unsafe {
            unwrap_or_panic!((*self.session).reconfigure, self.session, config.as_ptr())
        };
        make_result!(err_code, ())
    }

    pub fn reset(&self) -> Result<()> {
        let err_code = unsafe { unwrap_or_panic!((*self.session).reset, self.session) };
        make_result!(err_code, ())
    }

    pub fn create(&self, name: &str, config: &str) -> Result<()> {
        let name = CString::new(name).unwrap();
        let config = CString::new(config).unwrap();
        let err_code = unsafe {
            unwrap_or_panic!(
                (*self.session).create,
                self.session,
                name.as_ptr(),
                config.as_ptr()
            )
        };
        make_result!(err_code, ())
    }

    pub fn drop(&self, name: &str, config: &str) -> Result<()> {
        let name = CString::new(name).unwrap();
        let config = CString::new(config).unwrap();
        let err_code = unsafe {
            unwrap_or_panic!(
                (*self.session).drop,
                self.session,
                name.as_ptr(),
                config.as_ptr()
            )
        };
        make_result!(err_code, ())
    }

    pub fn compact(&self, name: &str, config: &str) -> Result<()> {
        let name = CString::new(name).unwrap();
        let config = CString::new(config).unwrap();
        let err_code = unsafe {
            unwrap_or_panic!(
                (*self.session).compact,
                self.session,
                name.as_ptr(),
                config.as_ptr()
            )
        };
        make_result!(err_code, ())
    }

    pub fn verify(&self, name: &str, config: &str) -> Result<()> {
        let name = CString::new(name).unwrap();
        let config = CString::new(config).unwrap();
        let err_code = unsafe {
            unwrap_or_panic!(
                (*self.session).verify,
                self.session,
                name.as_ptr(),
                config.as_ptr()
            )
        };
        make_result!(err_code, ())
    }

    pub fn rename(&self, uri: &str, new_uri: &str, config: &str) -> Result<()> {
        let uri = CString::new(uri).unwrap();
        let new_uri = CString::new(new_uri).unwrap();
        let config = CString::new(config).unwrap();
        let err_code = unsafe {
            unwrap_or_panic!(
                (*self.session).rename,
                self.session,
                uri.as_ptr(),
                new_uri.as_ptr(),
                config.as_ptr()
            )
        };
        make_result!(err_code, ())
    }

    pub fn begin_transaction(&self, config: &str) -> Result<()> {
        let config = CString::new(config).unwrap();
        let err_code = unsafe {
            unwrap_or_panic!(
                (*self.session).begin_transaction,
                self.session,
                config.as_ptr()
            )
        };
        make_result!(err_code, ())
    }

    pub fn commit_transaction(&self, config: &str) -> Result<()> {
        let config = CString::new(config).unwrap();
        let err_code = unsafe {
            unwrap_or_panic!(
                (*self.session).commit_transaction,
                self.session,
                config.as_ptr()
            )
        };
        make_result!(err_code, ())
    }

    pub fn rollback_transaction(&self, config: &str) -> Result<()> {
        let config = CString::new(config).unwrap();
        let err_code = unsafe {
            unwrap_or_panic!(
                (*self.session).rollback_transaction,
                self.session,
                config.as_ptr()
            )
        };
        make_result!(err_code, ())
    }

    /// Get the app_metadata string a table was created with, by reading it back
    /// out of the session's metadata cursor (`metadata:create`).
    pub fn get_app_metadata(&self, uri: &str) -> Result<Option<String>> {
        let meta_cursor = self.open_cursor("metadata:create")?;
        let raw = meta_cursor.search_raw_string(uri)?;
        Ok(raw.map(|config| extract_paren_value(&config, "app_metadata")))
    }

    pub fn truncate(&self, name: &str, start: &RawCursor, stop: &RawCursor) -> Result<()> {
        let name = CString::new(name).unwrap();
        let err_code = unsafe {
            unwrap_or_panic!(
                (*self.session).truncate,
                self.session,
                name.as_ptr(),
                start.cursor,
                stop.cursor,
                ptr::null()
            )
        };
        make_result!(err_code, ())
    }

    /// Truncate from `start` (inclusive) to the end of the table, with no
    /// upper bound cursor.
    pub fn truncate_from(&self, name: &str, start: &RawCursor) -> Result<()> {
        let name = CString::new(name).unwrap();
        let err_code = unsafe {
            unwrap_or_panic!(
                (*self.session).truncate,
                self.session,
                name.as_ptr(),
                start.cursor,
                ptr::null_mut(),
                ptr::null()
            )
        };
        make_result!(err_code, ())
    }

    /// Truncate everything: `name` only, no bounding cursors.
    pub fn truncate_all(&self, name: &str) -> Result<()> {
        let name = CString::new(name).unwrap();
        let err_code = unsafe {
            unwrap_or_panic!(
                (*self.session).truncate,
                self.session,
                name.as_ptr(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null()
            )
        };
        make_result!(err_code, ())
    }

    pub fn open_cursor(&self, uri: &str) -> Result<RawCursor> {
        self.open_cursor_with_config(uri, "")
    }

    pub fn open_cursor_with_config(&self, uri: &str, config: &str) -> Result<RawCursor> {
        let uri = CString::new(uri).unwrap();
        let config = CString::new(config).unwrap();
        let mut cursor: *mut wtffi::WT_CURSOR = ptr::null_mut();
        let cursor_null: *const wtffi::WT_CURSOR = ptr::null();
        let result = unsafe {
            unwrap_or_panic!(
                (*self.session).open_cursor,
                self.session,
                uri.as_ptr(),
                cursor_null as *mut wtffi::WT_CURSOR,
                config.as_ptr(),
                &mut cursor
            )
        };
        make_result!(result, RawCursor { cursor })
    }

    /// Open a cursor configured for `next_random=true`, used by the record
    /// store's random-sample cursor (oplog stone sampling, random record access).
    pub fn open_random_cursor(&self, uri: &str) -> Result<RawCursor> {
        self.open_cursor_with_config(uri, "next_random=true")
    }
}

fn extract_paren_value(config: &str, key: &str) -> String {
    let needle = format!("{key}=(");
    if let Some(start) = config.find(&needle) {
        let rest = &config[start + needle.len()..];
        let mut depth = 1usize;
        for (i, c) in rest.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return rest[..i].to_string();
                    }
                }
                _ => {}
            }
        }
    }
    String::new()
}

impl RawCursor {
    pub fn close(&self) -> Result<()> {
        let err_code = unsafe { unwrap_or_panic!((*self.cursor).close, self.cursor) };
        make_result!(err_code, ())
    }

    pub fn reconfigure(&self, config: &str) -> Result<()> {
        let config = CString::new(config).unwrap();
        let err_code =
            unsafe { unwrap_or_panic!((*self.cursor).reconfigure, self.cursor, config.as_ptr()) };
        make_result!(err_code, ())
    }

    /// Set the cursor's key, for a table created with `key_format=q` (signed
    /// 64-bit record number) — the format this crate's record store always uses.
    pub fn set_key_id(&self, id: i64) {
        unsafe { unwrap_or_panic!((*self.cursor).set_key, self.cursor, id) }
    }

    /// Set the cursor's value to a raw byte string, for `value_format=u`.
    pub fn set_value_bytes(&self, value: &[u8]) {
        let item = wtffi::WT_ITEM {
            data: value.as_ptr() as *const libc::c_void,
            size: value.len(),
            ..unsafe { std::mem::zeroed() }
        };
        unsafe { unwrap_or_panic!((*self.cursor).set_value, self.cursor, &item) }
    }

    pub fn get_key_id(&self) -> Result<i64> {
        let mut id: i64 = 0;
        let err_code =
            unsafe { unwrap_or_panic!((*self.cursor).get_key, self.cursor, &mut id) };
        make_result!(err_code, id)
    }

    pub fn get_value_bytes(&self) -> Result<Vec<u8>> {
        let mut item = wtffi::WT_ITEM {
            data: ptr::null(),
            size: 0,
            ..unsafe { std::mem::zeroed() }
        };
        let err_code =
            unsafe { unwrap_or_panic!((*self.cursor).get_value, self.cursor, &mut item) };
        if err_code != 0 {
            return Err(Error::from_code(err_code));
        }
        let bytes = unsafe {
            std::slice::from_raw_parts(item.data as *const u8, item.size).to_vec()
        };
        Ok(bytes)
    }

    /// Read the raw string-format config value at the current position, used
    /// only against the `metadata:create` cursor (`key_format=S,value_format=S`).
    pub(crate) fn search_raw_string(&self, key: &str) -> Result<Option<String>> {
        let ckey = CString::new(key).unwrap();
        let err_code = unsafe {
            unwrap_or_panic!((*self.cursor).set_key, self.cursor, ckey.as_ptr());
            unwrap_or_panic!((*self.cursor).search, self.cursor)
        };
        if is_not_found(err_code) {
            return Ok(None);
        }
        if err_code != 0 {
            return Err(Error::from_code(err_code));
        }
        let mut val: *mut c_char = ptr::null_mut();
        let err_code =
            unsafe { unwrap_or_panic!((*self.cursor).get_value, self.cursor, &mut val) };
        if err_code != 0 {
            return Err(Error::from_code(err_code));
        }
        Ok(Some(unsafe { from_cstr(val) }))
    }

    pub fn compare(&self, other: &RawCursor) -> Result<CompareStatus> {
        let mut comparep: i32 = 0;
        let err_code = unsafe {
            unwrap_or_panic!(
                (*self.cursor).compare,
                self.cursor,
                other.cursor,
                &mut comparep as *mut i32
            )
        };
        make_result!(err_code, CompareStatus::from_code(comparep))
    }

    pub fn equals(&self, other: &RawCursor) -> Result<bool> {
        let mut equalp: i32 = 0;
        let err_code = unsafe {
            unwrap_or_panic!(
                (*self.cursor).equals,
                self.cursor,
                other.cursor,
                &mut equalp as *mut i32
            )
        };
        make_result!(err_code, equalp == 1)
    }

    /// Advance forward. `Ok(false)` on end-of-table, `Err` only for a real failure.
    pub fn next(&self) -> Result<bool> {
        let err_code = unsafe { unwrap_or_panic!((*self.cursor).next, self.cursor) };
        if is_not_found(err_code) {
            return Ok(false);
        }
        make_result!(err_code, true)
    }

    /// Advance backward. `Ok(false)` on end-of-table, `Err` only for a real failure.
    pub fn prev(&self) -> Result<bool> {
        let err_code = unsafe { unwrap_or_panic!((*self.cursor).prev, self.cursor) };
        if is_not_found(err_code) {
            return Ok(false);
        }
        make_result!(err_code, true)
    }

    pub fn reset(&self) -> Result<()> {
        let err_code = unsafe { unwrap_or_panic!((*self.cursor).reset, self.cursor) };
        make_result!(err_code, ())
    }

    /// `Ok(None)` on WT_NOTFOUND, `Ok(Some(ordering))` otherwise.
    pub fn search_near(&self) -> Result<Option<CompareStatus>> {
        let mut comparep: i32 = 0;
        let err_code = unsafe {
            unwrap_or_panic!(
                (*self.cursor).search_near,
                self.cursor,
                &mut comparep as *mut i32
            )
        };
        if is_not_found(err_code) {
            return Ok(None);
        }
        make_result!(err_code, Some(CompareStatus::from_code(comparep)))
    }

    /// `Ok(false)` on WT_NOTFOUND, `Ok(true)` on success.
    pub fn search(&self) -> Result<bool> {
        let err_code = unsafe { unwrap_or_panic!((*self.cursor).search, self.cursor) };
        if is_not_found(err_code) {
            return Ok(false);
        }
        make_result!(err_code, true)
    }

    pub fn insert(&self) -> Result<()> {
        let err_code = unsafe { unwrap_or_panic!((*self.cursor).insert, self.cursor) };
        make_result!(err_code, ())
    }

    pub fn update(&self) -> Result<()> {
        let err_code = unsafe { unwrap_or_panic!((*self.cursor).update, self.cursor) };
        make_result!(err_code, ())
    }

    pub fn remove(&self) -> Result<()> {
        let err_code = unsafe { unwrap_or_panic!((*self.cursor).remove, self.cursor) };
        make_result!(err_code, ())
    }

    pub(crate) fn inner(&self) -> *mut wtffi::WT_CURSOR {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_ok::assert_ok;

    #[test]
    fn test_id_keyed_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let conn = RawConnection::open(temp_dir.path().to_str().unwrap(), "create").unwrap();
        let session = conn.open_session().unwrap();

        assert_ok!(session.create("table:mytable", "key_format=q,value_format=u"));

        let cursor = assert_ok!(session.open_cursor("table:mytable"));
        cursor.set_key_id(1);
        cursor.set_value_bytes(b"abc");
        assert_ok!(cursor.insert());

        cursor.set_key_id(1);
        assert!(assert_ok!(cursor.search()));
        assert_eq!(assert_ok!(cursor.get_value_bytes()), b"abc");

        assert_ok!(cursor.close());
        assert_ok!(session.close());
        assert_ok!(conn.close());
    }
}
