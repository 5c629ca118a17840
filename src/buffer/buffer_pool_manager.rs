//! Buffer Pool Manager - the transactional page cache.
//!
//! The [`BufferPoolManager`] provides:
//! - Page caching between access methods and memory
//! - Page locking under strict two-phase locking
//! - LRU eviction restricted to clean pages (NO-STEAL)
//! - Commit (flush) and abort (reread from disk)

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::buffer::replacer::LruReplacer;
use crate::buffer::{BufferPoolStats, Frame, FrameId};
use crate::common::config::BufferPoolConfig;
use crate::common::{Error, PageCategory, PageId, Result, TransactionId};
use crate::concurrency::{LockManager, LockMode, Permissions};
use crate::recovery::{LogSink, NoopLog};
use crate::storage::page::{Page, PageRef};
use crate::storage::{DbFile, Tuple};

/// Cache bookkeeping, guarded by one mutex.
struct PoolState {
    /// Arena of slots; `None` means the slot is on the free list.
    frames: Vec<Option<Frame>>,

    /// Maps page IDs to frame IDs.
    page_table: HashMap<PageId, FrameId>,

    /// Stack of free frame IDs.
    free_list: Vec<FrameId>,

    /// Recency order over occupied frames.
    replacer: LruReplacer,
}

impl PoolState {
    fn frame(&self, frame_id: FrameId) -> Option<&Frame> {
        self.frames.get(frame_id.slot()).and_then(Option::as_ref)
    }

    fn lookup(&self, page_id: PageId) -> Option<PageRef> {
        let frame_id = self.page_table.get(&page_id)?;
        self.frame(*frame_id).map(|f| Arc::clone(f.page()))
    }

    fn remove(&mut self, page_id: PageId) -> bool {
        let Some(frame_id) = self.page_table.remove(&page_id) else {
            return false;
        };
        self.frames[frame_id.slot()] = None;
        self.replacer.remove(frame_id);
        self.free_list.push(frame_id);
        true
    }

    fn insert(&mut self, frame_id: FrameId, page_id: PageId, page: PageRef) {
        self.frames[frame_id.slot()] = Some(Frame::new(page_id, page));
        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
    }
}

/// The page manager: a bounded cache of pages, each reached only through
/// a page lock.
///
/// # Architecture
/// ```text
/// ┌──────────────────────────────────────────────────────────────┐
/// │                     BufferPoolManager                        │
/// │  ┌──────────────── state: Mutex<PoolState> ───────────────┐  │
/// │  │ page_table      frames: Vec<Option<Frame>>             │  │
/// │  │ PageId → Fid ─▶ [Frame0] [None] [Frame2] ...           │  │
/// │  │ free_list       replacer: LruReplacer                  │  │
/// │  └────────────────────────────────────────────────────────┘  │
/// │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐    │
/// │  │ lock_manager │  │ files        │  │ log: LogSink     │    │
/// │  │ page locks   │  │ id → DbFile  │  │ before/after     │    │
/// │  └──────────────┘  └──────────────┘  └──────────────────┘    │
/// └──────────────────────────────────────────────────────────────┘
/// ```
///
/// # Locking protocol
/// [`fetch`](Self::fetch) takes a `Read` lock for `ReadOnly` and a `Write`
/// lock for `ReadWrite`, waiting up to the configured timeout. Locks are held
/// until [`complete`](Self::complete) releases them all.
///
/// # NO-STEAL
/// A page dirtied by an uncommitted transaction stays in the cache until
/// that transaction completes. Eviction skips dirty pages; if every cached
/// page is dirty, the fetch fails with `BufferExhausted`. Abort can therefore
/// restore a page by rereading it from disk.
///
/// # Thread Safety
/// - `state`: `Mutex`, since cache lookups always modify recency
/// - `files`: `RwLock`, registered once and read on every miss
/// - `lock_manager`: internally synchronised
/// - `stats`: no lock, all atomic counters
///
/// Lock order is `state` before any page `RwLock`, and the pool only ever
/// `try_read`s a page while holding `state`. Disk I/O happens with `state`
/// released.
pub struct BufferPoolManager {
    config: BufferPoolConfig,
    state: Mutex<PoolState>,
    files: RwLock<HashMap<u32, Arc<dyn DbFile>>>,
    lock_manager: LockManager,
    log: Arc<dyn LogSink>,
    stats: BufferPoolStats,
}

impl BufferPoolManager {
    /// Create a pool that discards log records.
    ///
    /// # Errors
    /// `InvalidConfig` if the configuration is rejected.
    pub fn new(config: BufferPoolConfig) -> Result<Self> {
        Self::with_log(config, Arc::new(NoopLog))
    }

    /// Create a pool that reports to `log`.
    pub fn with_log(config: BufferPoolConfig, log: Arc<dyn LogSink>) -> Result<Self> {
        config.validate()?;
        let capacity = config.capacity;

        Ok(Self {
            config,
            state: Mutex::new(PoolState {
                frames: (0..capacity).map(|_| None).collect(),
                page_table: HashMap::new(),
                free_list: (0..capacity).rev().map(FrameId::new).collect(),
                replacer: LruReplacer::new(),
            }),
            files: RwLock::new(HashMap::new()),
            lock_manager: LockManager::new(),
            log,
            stats: BufferPoolStats::new(),
        })
    }

    // ========================================================================
    // Public API: Access methods
    // ========================================================================

    /// Make `file` reachable under its table id.
    pub fn register(&self, file: Arc<dyn DbFile>) {
        let id = file.id();
        self.files.write().insert(id, file);
        debug!(table = id, "registered file");
    }

    /// The file registered under `table_id`.
    pub fn file(&self, table_id: u32) -> Result<Arc<dyn DbFile>> {
        self.files
            .read()
            .get(&table_id)
            .cloned()
            .ok_or(Error::UnknownTable(table_id))
    }

    // ========================================================================
    // Public API: Fetch pages
    // ========================================================================

    /// Lock and return a page on behalf of `tid`.
    ///
    /// # Errors
    /// - `LockTimeout` / `LockUpgradeConflict`: `tid` must abort
    /// - `BufferExhausted` if the page is not cached and nothing is evictable
    /// - `UnknownTable`, I/O, or decode errors on a miss
    pub fn fetch(&self, tid: TransactionId, page_id: PageId, perm: Permissions) -> Result<PageRef> {
        if let Err(err) =
            self.lock_manager
                .lock(page_id, tid, perm.lock_mode(), self.config.lock_timeout)
        {
            if matches!(err, Error::LockTimeout { .. }) {
                self.stats.bump(&self.stats.lock_timeouts);
            }
            return Err(err);
        }

        // Fast path: cache hit
        {
            let mut state = self.state.lock();
            if let Some(&frame_id) = state.page_table.get(&page_id) {
                if let Some(page) = state.frame(frame_id).map(|f| Arc::clone(f.page())) {
                    state.replacer.record_access(frame_id);
                    self.stats.bump(&self.stats.cache_hits);
                    trace!(%tid, %page_id, "cache hit");
                    return Ok(page);
                }
            }
        }

        self.stats.bump(&self.stats.cache_misses);
        let page = self.file(page_id.table_id())?.read_page(page_id)?;
        self.stats.bump(&self.stats.pages_read);
        trace!(%tid, %page_id, "cache miss");

        let mut state = self.state.lock();
        // another reader may have loaded it meanwhile
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            if let Some(existing) = state.frame(frame_id).map(|f| Arc::clone(f.page())) {
                state.replacer.record_access(frame_id);
                return Ok(existing);
            }
        }
        let page = Arc::new(RwLock::new(page));
        let frame_id = self.allocate_frame(&mut state)?;
        state.insert(frame_id, page_id, Arc::clone(&page));
        Ok(page)
    }

    /// Cache a freshly initialised page, write-locked and dirty by `tid`.
    ///
    /// Used when a page number is allocated or reused. Any cached copy of
    /// the same page number, in any category, is dropped first so no stale
    /// version can be read back.
    pub fn install(&self, tid: TransactionId, mut page: Page) -> Result<PageRef> {
        let page_id = page.id();
        self.lock_manager
            .lock(page_id, tid, LockMode::Write, self.config.lock_timeout)?;
        page.mark_dirty(true, Some(tid));
        let page = Arc::new(RwLock::new(page));

        let mut state = self.state.lock();
        for category in PageCategory::ALL {
            state.remove(page_id.with_category(category));
        }
        let frame_id = self.allocate_frame(&mut state)?;
        state.insert(frame_id, page_id, Arc::clone(&page));
        trace!(%tid, %page_id, "installed fresh page");
        Ok(page)
    }

    // ========================================================================
    // Public API: Tuple operations
    // ========================================================================

    /// Insert `tuple` into table `table_id` on behalf of `tid`.
    pub fn insert_tuple(&self, tid: TransactionId, table_id: u32, tuple: Tuple) -> Result<()> {
        let pages = self.file(table_id)?.insert_tuple(self, tid, tuple)?;
        self.update_cache(tid, pages)
    }

    /// Delete `tuple`, located by its record id, on behalf of `tid`.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> Result<()> {
        let rid = tuple
            .record_id()
            .ok_or_else(|| Error::Structure("tuple to delete has no record id".into()))?;
        let pages = self
            .file(rid.page_id.table_id())?
            .delete_tuple(self, tid, tuple)?;
        self.update_cache(tid, pages)
    }

    /// Mark `pages` dirty by `tid` and make them the cached copies.
    pub fn update_cache(&self, tid: TransactionId, pages: Vec<PageRef>) -> Result<()> {
        for page in pages {
            let page_id = {
                let mut guard = page.write();
                guard.mark_dirty(true, Some(tid));
                guard.id()
            };

            let mut state = self.state.lock();
            match state.page_table.get(&page_id).copied() {
                Some(frame_id) => {
                    let stale = state.frame(frame_id).is_some_and(|f| !f.holds(&page));
                    if stale {
                        state.frames[frame_id.slot()] = Some(Frame::new(page_id, page));
                    }
                    state.replacer.record_access(frame_id);
                }
                None => {
                    let frame_id = self.allocate_frame(&mut state)?;
                    state.insert(frame_id, page_id, page);
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Public API: Transaction completion
    // ========================================================================

    /// Commit or abort `tid`, then release all of its locks.
    ///
    /// On commit every page `tid` dirtied is logged (before and after
    /// images), the log is forced, and the page is written and marked clean.
    /// On abort every such page is replaced by its on-disk version.
    ///
    /// # Errors
    /// A failed commit flush is returned with `tid`'s locks still held; the
    /// pages it had not written yet remain dirty.
    pub fn complete(&self, tid: TransactionId, commit: bool) -> Result<()> {
        let dirty = self.pages_dirtied_by(tid);
        debug!(%tid, commit, pages = dirty.len(), "completing transaction");

        if commit {
            for (page_id, page) in &dirty {
                self.flush_for_commit(tid, *page_id, page)?;
            }
            self.log.log_commit(tid)?;
            self.stats.bump(&self.stats.commits);
        } else {
            for (page_id, page) in &dirty {
                self.restore_from_disk(*page_id, page);
            }
            if let Err(err) = self.log.log_abort(tid) {
                warn!(%tid, error = %err, "failed to log abort");
            }
            self.stats.bump(&self.stats.aborts);
        }

        self.lock_manager.release_all(tid);
        Ok(())
    }

    /// Drop a page from the cache, dirty or not. No-op when not cached.
    pub fn discard(&self, page_id: PageId) {
        if self.state.lock().remove(page_id) {
            trace!(%page_id, "discarded page");
        }
    }

    // ========================================================================
    // Public API: Flush pages
    // ========================================================================

    /// Write a cached page to disk if it is dirty and mark it clean.
    ///
    /// This breaks NO-STEAL when the page belongs to a running transaction;
    /// meant for shutdown and tests.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let page = self.state.lock().lookup(page_id);
        if let Some(page) = page {
            self.write_back(page_id, &page)?;
        }
        Ok(())
    }

    /// Flush every cached dirty page. Same caveat as [`flush_page`](Self::flush_page).
    pub fn flush_all_pages(&self) -> Result<()> {
        for (page_id, page) in self.cached_pages() {
            self.write_back(page_id, &page)?;
        }
        Ok(())
    }

    // ========================================================================
    // Public API: Locks
    // ========================================================================

    /// Release one lock before completion. Breaks two-phase locking; only
    /// safe for pages `tid` read and will not rely on.
    pub fn unsafe_release_page(&self, tid: TransactionId, page_id: PageId) {
        self.lock_manager.release(page_id, tid);
    }

    pub fn holds_lock(&self, tid: TransactionId, page_id: PageId) -> bool {
        self.lock_manager.holds(page_id, tid)
    }

    pub fn lock_mode(&self, tid: TransactionId, page_id: PageId) -> Option<LockMode> {
        self.lock_manager.lock_mode(page_id, tid)
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn log(&self) -> &Arc<dyn LogSink> {
        &self.log
    }

    // ========================================================================
    // Public API: Stats and info
    // ========================================================================

    /// Get buffer pool statistics.
    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    /// Maximum number of cached pages.
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn config(&self) -> &BufferPoolConfig {
        &self.config
    }

    pub fn is_cached(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    /// Get the number of pages in the buffer pool.
    pub fn cached_page_count(&self) -> usize {
        self.state.lock().page_table.len()
    }

    // ========================================================================
    // Internal: Eviction
    // ========================================================================

    /// Get a free frame, evicting the least recently used clean page if needed.
    fn allocate_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop() {
            return Ok(frame_id);
        }

        for frame_id in state.replacer.lru_order() {
            let Some(frame) = state.frame(frame_id) else {
                state.replacer.remove(frame_id);
                continue;
            };
            if frame.is_evictable() {
                let victim = frame.page_id();
                state.remove(victim);
                self.stats.bump(&self.stats.evictions);
                trace!(page_id = %victim, "evicted page");
                return state
                    .free_list
                    .pop()
                    .ok_or(Error::BufferExhausted { capacity: self.config.capacity });
            }
            // dirty pages move to the front instead of leaving
            self.stats.bump(&self.stats.dirty_skips);
            state.replacer.record_access(frame_id);
        }

        debug!(capacity = self.config.capacity, "no clean page to evict");
        Err(Error::BufferExhausted {
            capacity: self.config.capacity,
        })
    }

    // ========================================================================
    // Internal: Completion and write-back
    // ========================================================================

    fn cached_pages(&self) -> Vec<(PageId, PageRef)> {
        let state = self.state.lock();
        state
            .frames
            .iter()
            .flatten()
            .map(|f| (f.page_id(), Arc::clone(f.page())))
            .collect()
    }

    fn pages_dirtied_by(&self, tid: TransactionId) -> Vec<(PageId, PageRef)> {
        self.cached_pages()
            .into_iter()
            .filter(|(_, page)| page.read().dirtier() == Some(tid))
            .collect()
    }

    fn flush_for_commit(&self, tid: TransactionId, page_id: PageId, page: &PageRef) -> Result<()> {
        let file = self.file(page_id.table_id())?;
        let mut guard = page.write();
        let after = guard.serialize();
        self.log
            .log_write(tid, page_id, guard.before_image_bytes(), &after)?;
        self.log.force()?;
        file.write_page(&guard)?;
        guard.mark_dirty(false, None);
        guard.set_before_image();
        self.stats.bump(&self.stats.pages_written);
        trace!(%tid, %page_id, "flushed page at commit");
        Ok(())
    }

    /// Replace a page's contents with its on-disk version. The `Arc` stays the
    /// same so every holder sees the restored page.
    fn restore_from_disk(&self, page_id: PageId, page: &PageRef) {
        let fresh = self
            .file(page_id.table_id())
            .and_then(|file| file.read_page(page_id));
        match fresh {
            Ok(fresh) => {
                *page.write() = fresh;
                self.stats.bump(&self.stats.pages_read);
                trace!(%page_id, "restored page from disk");
            }
            Err(err) => {
                // e.g. a never-committed page reused under a new category
                warn!(%page_id, error = %err, "could not reread page on abort, discarding");
                self.discard(page_id);
            }
        }
    }

    fn write_back(&self, page_id: PageId, page: &PageRef) -> Result<()> {
        let file = self.file(page_id.table_id())?;
        let mut guard = page.write();
        if guard.is_dirty() {
            file.write_page(&guard)?;
            guard.mark_dirty(false, None);
            guard.set_before_image();
            self.stats.bump(&self.stats.pages_written);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::BufferPoolConfig;
    use crate::index::btree::BTreeFile;
    use crate::storage::{Field, FieldType, TupleDesc};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Helper to create a pool with one registered B+-tree file.
    fn create_test_pool(capacity: usize) -> (BufferPoolManager, Arc<BTreeFile>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let desc = TupleDesc::new(vec![FieldType::Int, FieldType::Int]);
        let file = Arc::new(BTreeFile::open_with_page_size(&path, 0, desc, 64).unwrap());
        let config = BufferPoolConfig::default()
            .with_capacity(capacity)
            .with_lock_timeout(Duration::from_millis(50));
        let pool = BufferPoolManager::new(config).unwrap();
        pool.register(file.clone());
        (pool, file, dir)
    }

    fn row(key: i32) -> Tuple {
        Tuple::new(vec![Field::Int(key), Field::Int(key)])
    }

    #[test]
    fn test_fetch_caches_and_locks() {
        let (pool, file, _dir) = create_test_pool(10);
        let tid = TransactionId::new();
        let root = PageId::root_ptr(file.id());

        pool.fetch(tid, root, Permissions::ReadOnly).unwrap();
        assert!(pool.is_cached(root));
        assert_eq!(pool.lock_mode(tid, root), Some(LockMode::Read));

        pool.fetch(tid, root, Permissions::ReadOnly).unwrap();
        let snapshot = pool.stats().snapshot();
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.cache_hits, 1);
    }

    #[test]
    fn test_fetch_unknown_table() {
        let (pool, _file, _dir) = create_test_pool(10);
        let tid = TransactionId::new();
        let err = pool
            .fetch(tid, PageId::root_ptr(9999), Permissions::ReadOnly)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTable(9999)));
    }

    #[test]
    fn test_insert_dirties_pages_until_commit() {
        let (pool, file, _dir) = create_test_pool(10);
        let tid = TransactionId::new();

        pool.insert_tuple(tid, file.id(), row(1)).unwrap();
        assert!(!pool.pages_dirtied_by(tid).is_empty());

        pool.complete(tid, true).unwrap();
        assert!(pool.pages_dirtied_by(tid).is_empty());
        assert!(pool.lock_manager().pages_locked_by(tid).is_empty());
        assert!(pool.stats().snapshot().pages_written > 0);
    }

    #[test]
    fn test_abort_restores_disk_version() {
        let (pool, file, _dir) = create_test_pool(10);

        let t1 = TransactionId::new();
        pool.insert_tuple(t1, file.id(), row(1)).unwrap();
        pool.complete(t1, true).unwrap();

        let t2 = TransactionId::new();
        pool.insert_tuple(t2, file.id(), row(2)).unwrap();
        pool.complete(t2, false).unwrap();

        let t3 = TransactionId::new();
        let keys: Vec<Tuple> = file.iterator(&pool, t3).collect::<Result<_>>().unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].same_values(&row(1)));

        let snapshot = pool.stats().snapshot();
        assert_eq!((snapshot.commits, snapshot.aborts), (1, 1));
    }

    #[test]
    fn test_discard_is_idempotent() {
        let (pool, file, _dir) = create_test_pool(10);
        let tid = TransactionId::new();
        let root = PageId::root_ptr(file.id());

        pool.fetch(tid, root, Permissions::ReadOnly).unwrap();
        pool.discard(root);
        pool.discard(root);
        assert!(!pool.is_cached(root));
        assert_eq!(pool.cached_page_count(), 0);
    }

    #[test]
    fn test_install_replaces_other_categories() {
        let (pool, file, _dir) = create_test_pool(10);
        let tid = TransactionId::new();
        let leaf = PageId::new(file.id(), 1, PageCategory::Leaf);

        pool.fetch(tid, leaf, Permissions::ReadOnly).unwrap();
        let internal = leaf.with_category(PageCategory::Internal);
        pool.install(tid, Page::empty(internal, Arc::clone(file.layout())))
            .unwrap();

        assert!(!pool.is_cached(leaf));
        assert!(pool.is_cached(internal));
        assert_eq!(pool.lock_mode(tid, internal), Some(LockMode::Write));
    }

    #[test]
    fn test_dirty_pages_block_eviction() {
        let (pool, file, _dir) = create_test_pool(1);
        let tid = TransactionId::new();
        let table = file.id();

        // the clean root pointer is evicted to make room for the dirty leaf
        pool.insert_tuple(tid, table, row(1)).unwrap();
        assert_eq!(pool.cached_page_count(), 1);
        assert!(pool.is_cached(PageId::new(table, 1, PageCategory::Leaf)));

        let other = TransactionId::new();
        let fresh = Page::empty(
            PageId::new(table, 5, PageCategory::Leaf),
            Arc::clone(file.layout()),
        );
        let err = pool.install(other, fresh).unwrap_err();
        assert!(matches!(err, Error::BufferExhausted { capacity: 1 }));
        assert!(pool.stats().snapshot().dirty_skips >= 1);
    }
}
