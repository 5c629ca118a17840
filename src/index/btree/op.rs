//! Per-operation context for structural B+-tree changes.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::buffer::BufferPoolManager;
use crate::common::{Error, PageCategory, PageId, Result, TransactionId};
use crate::concurrency::Permissions;
use crate::storage::page::{Page, PageRef};
use crate::storage::Field;

use super::BTreeFile;

/// State threaded through one insert or delete.
///
/// Every page fetched for writing is marked dirty by the transaction the
/// moment it is fetched and remembered in `dirty`, so nested helpers see
/// each other's changes and the pool can never evict a page while the
/// operation is still changing it. The map only holds handles; the pool owns
/// the pages.
///
/// Page guards are never held across calls that fetch pages.
pub(super) struct TreeOp<'a> {
    pub(super) file: &'a BTreeFile,
    pub(super) pool: &'a BufferPoolManager,
    pub(super) tid: TransactionId,
    dirty: HashMap<PageId, PageRef>,
}

impl<'a> TreeOp<'a> {
    pub(super) fn new(file: &'a BTreeFile, pool: &'a BufferPoolManager, tid: TransactionId) -> Self {
        Self {
            file,
            pool,
            tid,
            dirty: HashMap::new(),
        }
    }

    /// Fetch a page, preferring the copy this operation already dirtied.
    pub(super) fn get_page(&mut self, page_id: PageId, perm: Permissions) -> Result<PageRef> {
        if let Some(page) = self.dirty.get(&page_id) {
            return Ok(Arc::clone(page));
        }
        let page = self.pool.fetch(self.tid, page_id, perm)?;
        if perm == Permissions::ReadWrite {
            page.write().mark_dirty(true, Some(self.tid));
            self.dirty.insert(page_id, Arc::clone(&page));
        }
        Ok(page)
    }

    /// Remember a page installed by the free list.
    pub(super) fn track(&mut self, page_id: PageId, page: &PageRef) {
        for category in PageCategory::ALL {
            self.dirty.remove(&page_id.with_category(category));
        }
        self.dirty.insert(page_id, Arc::clone(page));
    }

    pub(super) fn root_ptr(&mut self, perm: Permissions) -> Result<PageRef> {
        self.get_page(PageId::root_ptr(self.file.id()), perm)
    }

    pub(super) fn root_id(&mut self) -> Result<Option<PageId>> {
        let root_ptr = self.root_ptr(Permissions::ReadOnly)?;
        let root = root_ptr.read().as_root_ptr()?.root_id();
        Ok(root)
    }

    /// Give a tree without a root a fresh empty leaf as its root.
    pub(super) fn create_root_leaf(&mut self) -> Result<PageId> {
        let leaf = self.get_empty_page(PageCategory::Leaf)?;
        let leaf_id = leaf.read().id();
        let root_ptr = self.root_ptr(Permissions::ReadWrite)?;
        root_ptr.write().as_root_ptr_mut()?.set_root_id(Some(leaf_id));
        trace!(tid = %self.tid, root = %leaf_id, "created root leaf");
        Ok(leaf_id)
    }

    /// Descend from `page_id` to the leaf that may contain `key`.
    ///
    /// Internal pages are fetched read-only; only the leaf is fetched with
    /// `perm`. A `None` key finds the leftmost leaf.
    pub(super) fn find_leaf(
        &mut self,
        page_id: PageId,
        key: Option<&Field>,
        perm: Permissions,
    ) -> Result<PageRef> {
        let mut current = page_id;
        loop {
            match current.category() {
                PageCategory::Leaf => return self.get_page(current, perm),
                PageCategory::Internal => {
                    let page = self.get_page(current, Permissions::ReadOnly)?;
                    let child = page.read().as_internal()?.child_for(key);
                    current = child.ok_or_else(|| {
                        Error::Structure(format!("{} has no children", current))
                    })?;
                }
                _ => {
                    return Err(Error::Structure(format!(
                        "cannot search through {}",
                        current
                    )))
                }
            }
        }
    }

    /// Point each child at `parent`, fetching for write only those whose
    /// parent actually changes.
    pub(super) fn update_parent_pointers(&mut self, parent: PageId, children: &[PageId]) -> Result<()> {
        for &child in children {
            let page = self.get_page(child, Permissions::ReadOnly)?;
            let current = page.read().parent_id()?;
            if current != parent {
                let page = self.get_page(child, Permissions::ReadWrite)?;
                page.write().set_parent_id(parent)?;
            }
        }
        Ok(())
    }

    /// Parent of a leaf or internal page.
    pub(super) fn parent_of(page: &PageRef) -> Result<PageId> {
        page.read().parent_id()
    }

    /// Fresh empty page of `category`, for placing on a newly allocated number.
    pub(super) fn blank(&self, page_id: PageId) -> Page {
        Page::empty(page_id, Arc::clone(self.file.layout()))
    }

    /// Every page this operation wrote, for the pool to keep cached.
    pub(super) fn into_dirty_pages(self) -> Vec<PageRef> {
        self.dirty.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::BufferPoolConfig;
    use crate::concurrency::LockMode;
    use crate::storage::{FieldType, TupleDesc};
    use tempfile::tempdir;

    fn setup() -> (BufferPoolManager, Arc<BTreeFile>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let desc = TupleDesc::new(vec![FieldType::Int, FieldType::Int]);
        let file =
            Arc::new(BTreeFile::open_with_page_size(dir.path().join("t.db"), 0, desc, 64).unwrap());
        let pool = BufferPoolManager::new(BufferPoolConfig::default()).unwrap();
        pool.register(file.clone());
        (pool, file, dir)
    }

    #[test]
    fn test_write_fetch_marks_dirty_and_tracks() {
        let (pool, file, _dir) = setup();
        let tid = TransactionId::new();
        let mut op = TreeOp::new(&file, &pool, tid);

        let root = op.root_id().unwrap().unwrap();
        let leaf = op.get_page(root, Permissions::ReadWrite).unwrap();
        assert_eq!(leaf.read().dirtier(), Some(tid));
        assert_eq!(pool.lock_mode(tid, root), Some(LockMode::Write));

        // a later read-only request returns the same handle
        let again = op.get_page(root, Permissions::ReadOnly).unwrap();
        assert!(Arc::ptr_eq(&leaf, &again));
        assert_eq!(op.into_dirty_pages().len(), 1);
    }

    #[test]
    fn test_read_fetch_is_not_tracked() {
        let (pool, file, _dir) = setup();
        let tid = TransactionId::new();
        let mut op = TreeOp::new(&file, &pool, tid);

        let root_ptr = op.root_ptr(Permissions::ReadOnly).unwrap();
        assert!(!root_ptr.read().is_dirty());
        assert!(op.into_dirty_pages().is_empty());
    }

    #[test]
    fn test_find_leaf_on_single_leaf_tree() {
        let (pool, file, _dir) = setup();
        let tid = TransactionId::new();
        let mut op = TreeOp::new(&file, &pool, tid);

        let root = op.root_id().unwrap().unwrap();
        let leaf = op.find_leaf(root, None, Permissions::ReadOnly).unwrap();
        assert_eq!(leaf.read().id(), root);
        assert_eq!(pool.lock_mode(tid, root), Some(LockMode::Read));
    }

    #[test]
    fn test_find_leaf_rejects_root_ptr() {
        let (pool, file, _dir) = setup();
        let mut op = TreeOp::new(&file, &pool, TransactionId::new());
        let err = op
            .find_leaf(PageId::root_ptr(file.id()), None, Permissions::ReadOnly)
            .unwrap_err();
        assert!(matches!(err, Error::Structure(_)));
    }
}
