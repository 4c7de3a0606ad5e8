//! Error kinds surfaced to callers (spec §7).

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("object too large for capped collection: {0} bytes")]
    ObjectTooLargeForCapped(usize),

    #[error("bad value: {0}")]
    BadValue(String),

    #[error("illegal operation: {0}")]
    IllegalOperation(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Transient: the engine detected a write-write conflict. The outer
    /// transaction is expected to retry.
    #[error("storage write conflict")]
    StorageConflict,

    #[error("storage corrupt: {0}")]
    StorageCorrupt(String),

    /// Fatal at open: the table's on-disk format version is outside the
    /// range this build supports.
    #[error("unsupported format version {found} (supported [{min}, {max}])")]
    FormatVersionUnsupported { found: u32, min: u32, max: u32 },

    #[error(transparent)]
    Engine(#[from] wiredtiger::Error),
}

impl Error {
    /// True for errors the caller should simply retry rather than propagate.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::StorageConflict => true,
            Error::Engine(e) => wiredtiger::is_conflict(e.code),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
