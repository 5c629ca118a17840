//! Error types for pagedb.

use crate::common::{PageId, TransactionId};
use crate::storage::RecordId;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in pagedb.
///
/// Two kinds are *transaction-recoverable* ([`Error::LockTimeout`] and
/// [`Error::LockUpgradeConflict`]): the caller must abort the transaction and
/// may retry it from the start. Everything else is a hard failure of the
/// storage operation that raised it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from disk operations, propagated as-is.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A page lock could not be obtained before the deadline.
    #[error("{tid} timed out waiting for a lock on {page}")]
    LockTimeout { tid: TransactionId, page: PageId },

    /// A READ lock cannot be upgraded because other transactions also read the page.
    #[error("{tid} cannot upgrade its read lock on {page}: other readers hold it")]
    LockUpgradeConflict { tid: TransactionId, page: PageId },

    /// Every cached page is dirty, so nothing can be evicted.
    #[error("buffer pool exhausted: all {capacity} cached pages are dirty")]
    BufferExhausted { capacity: usize },

    /// A B+-tree structural invariant does not hold.
    #[error("structural error: {0}")]
    Structure(String),

    /// Requested page number does not exist in the file.
    #[error("page {0} not found")]
    PageNotFound(u32),

    /// No access method is registered for the table id.
    #[error("no file registered for table {0}")]
    UnknownTable(u32),

    /// Page bytes could not be decoded.
    #[error("corrupt page {page}: {reason}")]
    CorruptPage { page: PageId, reason: String },

    /// A tuple does not match the file's schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The tuple to delete is not on the page its record id names.
    #[error("tuple {0} not found")]
    TupleNotFound(RecordId),

    /// Settings or page layout cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// True when the error only requires the calling transaction to abort.
    pub fn is_transaction_abort(&self) -> bool {
        matches!(
            self,
            Error::LockTimeout { .. } | Error::LockUpgradeConflict { .. }
        )
    }
}
