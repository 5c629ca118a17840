//! The B+-tree file: opening, raw page I/O, and the access-method interface.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::buffer::BufferPoolManager;
use crate::common::config::DEFAULT_PAGE_SIZE;
use crate::common::{Error, PageCategory, PageId, Result, TransactionId};
use crate::concurrency::Permissions;
use crate::storage::page::{Page, PageLayout, PageRef, RootPtrPage};
use crate::storage::{DbFile, DiskManager, Tuple, TupleDesc};

use super::iterator::{BTreeScan, IndexPredicate};
use super::op::TreeOp;
use super::rebalance::is_under_full;

/// Table ids are handed out per process; id 0 is never used.
static NEXT_TABLE_ID: AtomicU32 = AtomicU32::new(1);

/// A table stored as a B+-tree keyed on one field.
///
/// All page access other than opening a fresh file goes through a
/// [`BufferPoolManager`], so every read and write is locked on behalf of a
/// transaction. Register the file with the pool before using it.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use pagedb::buffer::BufferPoolManager;
/// use pagedb::common::config::BufferPoolConfig;
/// use pagedb::concurrency::Transaction;
/// use pagedb::index::BTreeFile;
/// use pagedb::storage::{Field, FieldType, Tuple, TupleDesc};
///
/// let dir = tempfile::tempdir().unwrap();
/// let desc = TupleDesc::new(vec![FieldType::Int, FieldType::Int]);
/// let file = Arc::new(BTreeFile::open(dir.path().join("t.db"), 0, desc).unwrap());
/// let pool = BufferPoolManager::new(BufferPoolConfig::default()).unwrap();
/// pool.register(file.clone());
///
/// Transaction::run(&pool, |txn| {
///     pool.insert_tuple(txn.id(), file.id(), Tuple::new(vec![Field::Int(7), Field::Int(1)]))
/// })
/// .unwrap();
///
/// let count = Transaction::run(&pool, |txn| Ok(file.iterator(&pool, txn.id()).count())).unwrap();
/// assert_eq!(count, 1);
/// ```
pub struct BTreeFile {
    table_id: u32,
    path: PathBuf,
    layout: Arc<PageLayout>,
    disk: Mutex<DiskManager>,
}

impl BTreeFile {
    /// Open or create a file with the default page size.
    pub fn open<P: AsRef<Path>>(path: P, key_field: usize, desc: TupleDesc) -> Result<Self> {
        Self::open_with_page_size(path, key_field, desc, DEFAULT_PAGE_SIZE)
    }

    /// Open or create a file whose data pages are `page_size` bytes.
    ///
    /// A new file gets a root pointer naming an empty leaf as the root.
    ///
    /// # Errors
    /// `InvalidConfig` if the page size cannot hold enough tuples or keys;
    /// I/O errors from creating or opening the file.
    pub fn open_with_page_size<P: AsRef<Path>>(
        path: P,
        key_field: usize,
        desc: TupleDesc,
        page_size: usize,
    ) -> Result<Self> {
        let layout = Arc::new(PageLayout::new(page_size, desc, key_field)?);
        let mut disk = DiskManager::open(path.as_ref(), page_size)?;
        let table_id = NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed);

        if disk.page_count() == 0 {
            let root = PageId::new(table_id, disk.append_page()?, PageCategory::Leaf);
            let leaf = Page::empty(root, Arc::clone(&layout));
            disk.write_page(root.page_no(), &leaf.serialize())?;

            let mut root_ptr = RootPtrPage::new();
            root_ptr.set_root_id(Some(root));
            disk.write_page(0, &root_ptr.serialize())?;
            debug!(table = table_id, path = %path.as_ref().display(), "created B+-tree file");
        }

        debug!(
            table = table_id,
            pages = disk.page_count(),
            max_tuples = layout.max_tuples(),
            max_entries = layout.max_entries(),
            "opened B+-tree file"
        );
        Ok(Self {
            table_id,
            path: path.as_ref().to_path_buf(),
            layout,
            disk: Mutex::new(disk),
        })
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.table_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> &Arc<PageLayout> {
        &self.layout
    }

    /// Index of the field tuples are sorted on.
    pub fn key_field(&self) -> usize {
        self.layout.key_field()
    }

    /// Number of data pages in the file, used or free.
    pub fn num_pages(&self) -> u32 {
        self.disk.lock().page_count()
    }

    /// Current root page, read through the pool.
    pub fn root_id(&self, pool: &BufferPoolManager, tid: TransactionId) -> Result<Option<PageId>> {
        let root_ptr = pool.fetch(tid, PageId::root_ptr(self.table_id), Permissions::ReadOnly)?;
        let root = root_ptr.read().as_root_ptr()?.root_id();
        Ok(root)
    }

    /// Scan every tuple in key order.
    pub fn iterator<'a>(&'a self, pool: &'a BufferPoolManager, tid: TransactionId) -> BTreeScan<'a> {
        BTreeScan::new(self, pool, tid, None)
    }

    /// Scan the tuples whose key satisfies `predicate`, in key order.
    ///
    /// The scan starts at the first leaf that can hold a match for `=`, `>`
    /// and `>=`, and stops as soon as no later tuple can match.
    pub fn index_iterator<'a>(
        &'a self,
        pool: &'a BufferPoolManager,
        tid: TransactionId,
        predicate: IndexPredicate,
    ) -> BTreeScan<'a> {
        BTreeScan::new(self, pool, tid, Some(predicate))
    }

    /// Extend the file by one zeroed page.
    pub(super) fn extend(&self) -> Result<u32> {
        let page_no = self.disk.lock().append_page()?;
        trace!(table = self.table_id, page_no, "extended file");
        Ok(page_no)
    }

    fn check_table(&self, page_id: PageId) -> Result<()> {
        if page_id.table_id() != self.table_id {
            return Err(Error::Structure(format!(
                "{} does not belong to table {}",
                page_id, self.table_id
            )));
        }
        Ok(())
    }
}

impl DbFile for BTreeFile {
    fn id(&self) -> u32 {
        self.table_id
    }

    fn tuple_desc(&self) -> &TupleDesc {
        self.layout.tuple_desc()
    }

    fn read_page(&self, page_id: PageId) -> Result<Page> {
        self.check_table(page_id)?;
        let data = self.disk.lock().read_page(page_id.page_no())?;
        Page::deserialize(page_id, &data, Arc::clone(&self.layout))
    }

    fn write_page(&self, page: &Page) -> Result<()> {
        self.check_table(page.id())?;
        let data = page.serialize();
        self.disk.lock().write_page(page.id().page_no(), &data)
    }

    fn insert_tuple(
        &self,
        pool: &BufferPoolManager,
        tid: TransactionId,
        tuple: Tuple,
    ) -> Result<Vec<PageRef>> {
        self.layout.tuple_desc().validate(&tuple)?;
        let key = tuple
            .field(self.key_field())
            .cloned()
            .ok_or_else(|| Error::SchemaMismatch("tuple has no key field".into()))?;

        let mut op = TreeOp::new(self, pool, tid);
        let root = match op.root_id()? {
            Some(root) => root,
            None => op.create_root_leaf()?,
        };

        let mut leaf = op.find_leaf(root, Some(&key), Permissions::ReadWrite)?;
        let full = leaf.read().as_leaf()?.is_full();
        if full {
            leaf = op.split_leaf(&leaf, &key)?;
        }
        let slot = leaf.write().as_leaf_mut()?.insert_tuple(tuple)?;
        trace!(%tid, key = %key, slot, "inserted tuple");

        Ok(op.into_dirty_pages())
    }

    fn delete_tuple(
        &self,
        pool: &BufferPoolManager,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<PageRef>> {
        let rid = tuple
            .record_id()
            .ok_or_else(|| Error::Structure("tuple to delete has no record id".into()))?;
        self.check_table(rid.page_id)?;
        if rid.page_id.category() != PageCategory::Leaf {
            return Err(Error::Structure(format!(
                "record id points at non-leaf {}",
                rid.page_id
            )));
        }

        let mut op = TreeOp::new(self, pool, tid);
        let leaf = op.get_page(rid.page_id, Permissions::ReadWrite)?;
        let under_full = {
            let mut guard = leaf.write();
            let page = guard.as_leaf_mut()?;
            page.delete_tuple(tuple)?;
            is_under_full(page.num_empty_slots(), page.max_tuples())
        };
        trace!(%tid, record = %rid, under_full, "deleted tuple");

        if under_full {
            op.handle_min_occupancy(&leaf)?;
        }
        Ok(op.into_dirty_pages())
    }

    fn iterator<'a>(
        &'a self,
        pool: &'a BufferPoolManager,
        tid: TransactionId,
    ) -> Box<dyn Iterator<Item = Result<Tuple>> + 'a> {
        Box::new(BTreeFile::iterator(self, pool, tid))
    }
}
