//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pagedb::common::config::BufferPoolConfig;
use pagedb::common::{PageCategory, PageId, Result, TransactionId};
use pagedb::concurrency::Permissions;
use pagedb::storage::page::{Page, PageLayout, PageRef};
use pagedb::storage::{DbFile, Field, FieldType, Tuple, TupleDesc};
use pagedb::{BTreeFile, BufferPoolManager, Error, Transaction};
use tempfile::TempDir;

/// Page size that gives 6 tuples per leaf and 6 keys per internal page for
/// two-int tuples.
pub const SMALL_PAGE: usize = 64;

pub fn int_desc() -> TupleDesc {
    TupleDesc::new(vec![FieldType::Int, FieldType::Int])
}

pub fn row(key: i32) -> Tuple {
    Tuple::new(vec![Field::Int(key), Field::Int(key * 10)])
}

pub fn pool_with_capacity(capacity: usize) -> BufferPoolManager {
    let config = BufferPoolConfig::default()
        .with_capacity(capacity)
        .with_lock_timeout(Duration::from_millis(100));
    BufferPoolManager::new(config).unwrap()
}

/// A small-page tree registered with a roomy pool.
pub fn create_tree() -> (BufferPoolManager, Arc<BTreeFile>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let file = Arc::new(
        BTreeFile::open_with_page_size(dir.path().join("tree.db"), 0, int_desc(), SMALL_PAGE)
            .unwrap(),
    );
    let pool = pool_with_capacity(1000);
    pool.register(file.clone());
    (pool, file, dir)
}

pub fn key_of(tuple: &Tuple) -> i32 {
    match tuple.field(0) {
        Some(Field::Int(v)) => *v,
        other => panic!("unexpected key {:?}", other),
    }
}

/// Insert `row(k)` for every key in one committed transaction.
pub fn insert_all(pool: &BufferPoolManager, file: &BTreeFile, keys: impl IntoIterator<Item = i32>) {
    Transaction::run(pool, |txn| {
        for k in keys {
            pool.insert_tuple(txn.id(), file.id(), row(k))?;
        }
        Ok(())
    })
    .unwrap();
}

/// Keys of a full scan, in order.
pub fn scan_keys(pool: &BufferPoolManager, file: &BTreeFile, tid: TransactionId) -> Vec<i32> {
    file.iterator(pool, tid)
        .map(|t| key_of(&t.unwrap()))
        .collect()
}

/// Ids of the leaves in left-to-right order, following sibling links.
pub fn leaf_ids(pool: &BufferPoolManager, file: &BTreeFile, tid: TransactionId) -> Vec<PageId> {
    let mut current = file.root_id(pool, tid).unwrap().unwrap();
    while current.category() == PageCategory::Internal {
        let page = pool.fetch(tid, current, Permissions::ReadOnly).unwrap();
        current = page.read().as_internal().unwrap().children()[0];
    }

    let mut leaves = Vec::new();
    let mut next = Some(current);
    while let Some(id) = next {
        leaves.push(id);
        let page = pool.fetch(tid, id, Permissions::ReadOnly).unwrap();
        next = page.read().as_leaf().unwrap().right_sibling_id();
    }
    leaves
}

/// Find a tuple with `key` so it can be deleted by record id.
pub fn find(pool: &BufferPoolManager, file: &BTreeFile, tid: TransactionId, key: i32) -> Tuple {
    file.iterator(pool, tid)
        .map(|t| t.unwrap())
        .find(|t| key_of(t) == key)
        .unwrap_or_else(|| panic!("key {} not in tree", key))
}

static NEXT_MEM_TABLE: AtomicU32 = AtomicU32::new(1_000_000);

/// An in-memory table whose pages are all leaves, created on first read.
///
/// Only page 1 ever holds tuples; other page numbers exist so tests can
/// fill and overflow the pool.
pub struct MemFile {
    id: u32,
    layout: Arc<PageLayout>,
    pages: Mutex<HashMap<PageId, Vec<u8>>>,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
}

impl MemFile {
    pub fn new() -> Self {
        Self {
            id: NEXT_MEM_TABLE.fetch_add(1, Ordering::Relaxed),
            layout: Arc::new(PageLayout::new(SMALL_PAGE, int_desc(), 0).unwrap()),
            pages: Mutex::new(HashMap::new()),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn page(&self, no: u32) -> PageId {
        PageId::new(self.id, no, PageCategory::Leaf)
    }

    /// Tuples stored on disk for page `no`.
    pub fn disk_keys(&self, no: u32) -> Vec<i32> {
        let Some(bytes) = self.pages.lock().get(&self.page(no)).cloned() else {
            return Vec::new();
        };
        let page = Page::deserialize(self.page(no), &bytes, Arc::clone(&self.layout)).unwrap();
        let keys = page.as_leaf().unwrap().tuples().map(|t| key_of(&t)).collect();
        keys
    }
}

impl DbFile for MemFile {
    fn id(&self) -> u32 {
        self.id
    }

    fn tuple_desc(&self) -> &TupleDesc {
        self.layout.tuple_desc()
    }

    fn read_page(&self, page_id: PageId) -> Result<Page> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        match self.pages.lock().get(&page_id) {
            Some(bytes) => Page::deserialize(page_id, bytes, Arc::clone(&self.layout)),
            None => Ok(Page::empty(page_id, Arc::clone(&self.layout))),
        }
    }

    fn write_page(&self, page: &Page) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.pages.lock().insert(page.id(), page.serialize());
        Ok(())
    }

    fn insert_tuple(
        &self,
        pool: &BufferPoolManager,
        tid: TransactionId,
        tuple: Tuple,
    ) -> Result<Vec<PageRef>> {
        let page = pool.fetch(tid, self.page(1), Permissions::ReadWrite)?;
        page.write().as_leaf_mut()?.insert_tuple(tuple)?;
        Ok(vec![page])
    }

    fn delete_tuple(
        &self,
        pool: &BufferPoolManager,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<PageRef>> {
        let rid = tuple
            .record_id()
            .ok_or_else(|| Error::Structure("no record id".into()))?;
        let page = pool.fetch(tid, rid.page_id, Permissions::ReadWrite)?;
        page.write().as_leaf_mut()?.delete_tuple(tuple)?;
        Ok(vec![page])
    }

    fn iterator<'a>(
        &'a self,
        pool: &'a BufferPoolManager,
        tid: TransactionId,
    ) -> Box<dyn Iterator<Item = Result<Tuple>> + 'a> {
        let tuples = pool
            .fetch(tid, self.page(1), Permissions::ReadOnly)
            .and_then(|page| {
                let guard = page.read();
                let tuples: Vec<Tuple> = guard.as_leaf()?.tuples().collect();
                Ok(tuples)
            });
        match tuples {
            Ok(tuples) => Box::new(tuples.into_iter().map(Ok)),
            Err(err) => Box::new(std::iter::once(Err(err))),
        }
    }
}

/// How many leaves ascending inserts of `n` keys produce with leaf capacity `c`.
///
/// Each split leaves `c/2` tuples behind and the new key always lands in
/// the right half.
pub fn ascending_leaf_count(n: usize, c: usize) -> usize {
    let mut leaves = 1;
    let mut last = 0;
    for _ in 0..n {
        if last == c {
            leaves += 1;
            last = c - c / 2;
        }
        last += 1;
    }
    leaves
}
