//! Transaction handle.

use tracing::{debug, warn};

use crate::buffer::BufferPoolManager;
use crate::common::{Result, TransactionId};

/// A running transaction.
///
/// Dropping a transaction that was neither committed nor aborted aborts it,
/// so an early return through `?` never leaves locks or dirty pages behind.
///
/// # Example
/// ```
/// use pagedb::buffer::BufferPoolManager;
/// use pagedb::common::config::BufferPoolConfig;
/// use pagedb::concurrency::Transaction;
///
/// let pool = BufferPoolManager::new(BufferPoolConfig::default()).unwrap();
/// let answer = Transaction::run(&pool, |_txn| Ok(42)).unwrap();
/// assert_eq!(answer, 42);
/// ```
pub struct Transaction<'a> {
    id: TransactionId,
    pool: &'a BufferPoolManager,
    active: bool,
}

impl<'a> Transaction<'a> {
    /// Start a transaction with a fresh id.
    pub fn begin(pool: &'a BufferPoolManager) -> Result<Self> {
        let id = TransactionId::new();
        pool.log().log_begin(id)?;
        debug!(tid = %id, "transaction started");
        Ok(Self {
            id,
            pool,
            active: true,
        })
    }

    /// Run `f` in a new transaction: commit if it returns `Ok`, abort if it
    /// returns `Err`.
    pub fn run<T, F>(pool: &'a BufferPoolManager, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'a>) -> Result<T>,
    {
        let txn = Self::begin(pool)?;
        match f(&txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                txn.abort()?;
                Err(err)
            }
        }
    }

    #[inline]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn pool(&self) -> &'a BufferPoolManager {
        self.pool
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Flush everything this transaction wrote and release its locks.
    ///
    /// If the flush fails the handle is dropped while still active, which
    /// aborts the transaction, and the flush error is returned.
    pub fn commit(mut self) -> Result<()> {
        self.pool.complete(self.id, true)?;
        self.active = false;
        Ok(())
    }

    /// Discard everything this transaction wrote and release its locks.
    pub fn abort(mut self) -> Result<()> {
        self.active = false;
        self.pool.complete(self.id, false)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.active {
            self.active = false;
            if let Err(err) = self.pool.complete(self.id, false) {
                warn!(tid = %self.id, error = %err, "abort on drop failed");
            }
        }
    }
}
