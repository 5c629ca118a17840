//! Configuration constants and buffer pool settings.

use std::time::Duration;

use crate::common::{Error, Result};

/// Default size of a data page in bytes (4KB).
///
/// Individual B+-tree files may use a different size (see
/// [`BTreeFile::open_with_page_size`](crate::index::btree::BTreeFile::open_with_page_size));
/// tests use tiny pages to force splits and merges with few tuples.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default number of pages the buffer pool caches.
pub const DEFAULT_POOL_PAGES: usize = 50;

/// Default deadline for acquiring a single page lock.
///
/// A transaction that waits longer than this is the deadlock victim.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Maximum number of bytes stored for a string field.
pub const STRING_LEN: usize = 128;

/// Width of an on-disk page pointer (a page number).
pub const INDEX_SIZE: usize = 4;

/// Size of the root-pointer page at the start of every B+-tree file.
///
/// # Layout (9 bytes)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       4     root page number (0 = empty tree)
/// 4       1     root page category
/// 5       4     first header page number (0 = no header pages)
/// ```
pub const ROOT_PTR_PAGE_SIZE: usize = 2 * INDEX_SIZE + 1;

/// Settings for a [`BufferPoolManager`](crate::buffer::BufferPoolManager).
///
/// # Example
/// ```
/// use std::time::Duration;
/// use pagedb::common::config::BufferPoolConfig;
///
/// let config = BufferPoolConfig::default()
///     .with_capacity(128)
///     .with_lock_timeout(Duration::from_millis(200));
/// assert_eq!(config.capacity, 128);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolConfig {
    /// Maximum number of pages held in the cache.
    pub capacity: usize,
    /// How long `fetch` waits for a page lock before aborting the caller.
    pub lock_timeout: Duration,
}

impl BufferPoolConfig {
    /// Set the cache capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the lock acquisition deadline.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Reject settings the pool cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::InvalidConfig("buffer pool capacity must be > 0".into()));
        }
        if self.lock_timeout.is_zero() {
            return Err(Error::InvalidConfig("lock timeout must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_POOL_PAGES,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}
