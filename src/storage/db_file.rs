//! The access-method interface the buffer pool reads and writes through.

use crate::buffer::BufferPoolManager;
use crate::common::{PageId, Result, TransactionId};
use crate::storage::page::{Page, PageRef};
use crate::storage::{Tuple, TupleDesc};

/// A table stored in one file.
///
/// The buffer pool owns caching and locking; the file owns the page format
/// and whatever structure (here, a B+-tree) organises tuples across pages.
/// Implementations are registered with
/// [`BufferPoolManager::register`](crate::buffer::BufferPoolManager::register)
/// under their [`id`](Self::id).
pub trait DbFile: Send + Sync {
    /// Table id, unique within the process.
    fn id(&self) -> u32;

    fn tuple_desc(&self) -> &TupleDesc;

    /// Read and decode a page directly from disk, bypassing the cache.
    fn read_page(&self, page_id: PageId) -> Result<Page>;

    /// Encode and write a page directly to disk.
    fn write_page(&self, page: &Page) -> Result<()>;

    /// Insert a tuple, fetching pages through `pool`.
    ///
    /// Returns every page the insert modified.
    fn insert_tuple(
        &self,
        pool: &BufferPoolManager,
        tid: TransactionId,
        tuple: Tuple,
    ) -> Result<Vec<PageRef>>;

    /// Delete the tuple identified by its record id.
    ///
    /// Returns every page the delete modified.
    fn delete_tuple(
        &self,
        pool: &BufferPoolManager,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<PageRef>>;

    /// Scan every tuple in the file.
    fn iterator<'a>(
        &'a self,
        pool: &'a BufferPoolManager,
        tid: TransactionId,
    ) -> Box<dyn Iterator<Item = Result<Tuple>> + 'a>;
}
