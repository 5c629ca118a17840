//! Splitting full pages on insert.

use tracing::debug;

use crate::common::{Error, PageCategory, PageId, Result};
use crate::concurrency::Permissions;
use crate::storage::page::{BTreeEntry, PageRef};
use crate::storage::Field;

use super::op::TreeOp;

impl TreeOp<'_> {
    /// Split a full leaf and return the half that should receive `key`.
    ///
    /// The new right leaf gets the upper `n - n/2` tuples. Its first key is
    /// copied into the parent as the separator between the halves.
    pub(super) fn split_leaf(&mut self, page: &PageRef, key: &Field) -> Result<PageRef> {
        let right = self.get_empty_page(PageCategory::Leaf)?;

        let (left_id, right_id, old_right, separator) = {
            let mut left_guard = page.write();
            let mut right_guard = right.write();
            let left_id = left_guard.id();
            let right_id = right_guard.id();
            let left = left_guard.as_leaf_mut()?;
            let new_right = right_guard.as_leaf_mut()?;

            let moved = left.split_off(left.num_tuples() / 2);
            new_right.append(moved);

            let old_right = left.right_sibling_id();
            new_right.set_right_sibling_id(old_right);
            new_right.set_left_sibling_id(Some(left_id));
            left.set_right_sibling_id(Some(right_id));

            let separator = new_right
                .first_key()
                .cloned()
                .ok_or_else(|| Error::Structure(format!("split of {} left nothing to move", left_id)))?;
            (left_id, right_id, old_right, separator)
        };

        if let Some(old_right) = old_right {
            let sibling = self.get_page(old_right, Permissions::ReadWrite)?;
            sibling.write().as_leaf_mut()?.set_left_sibling_id(Some(right_id));
        }

        let parent_id = Self::parent_of(page)?;
        let parent = self.get_parent_with_empty_slots(parent_id, left_id)?;
        let parent_id = {
            let mut guard = parent.write();
            let parent_id = guard.id();
            guard
                .as_internal_mut()?
                .insert_entry(BTreeEntry::new(separator.clone(), left_id, right_id))?;
            parent_id
        };
        page.write().set_parent_id(parent_id)?;
        right.write().set_parent_id(parent_id)?;

        debug!(
            tid = %self.tid,
            left = %left_id,
            right = %right_id,
            separator = %separator,
            "split leaf"
        );

        if *key <= separator {
            Ok(page.clone())
        } else {
            Ok(right)
        }
    }

    /// Split a full internal page and return the half now holding `child`.
    ///
    /// The new right page gets the upper `m/2` keys. The key just below
    /// them moves up into the parent and is no longer stored in either half.
    pub(super) fn split_internal(&mut self, page: &PageRef, child: PageId) -> Result<PageRef> {
        let right = self.get_empty_page(PageCategory::Internal)?;

        let (left_id, right_id, pushed, moved_children) = {
            let mut left_guard = page.write();
            let mut right_guard = right.write();
            let left_id = left_guard.id();
            let right_id = right_guard.id();
            let left = left_guard.as_internal_mut()?;

            let m = left.num_entries();
            let (pushed, keys, children) = left
                .split_at(m - m / 2 - 1)
                .ok_or_else(|| Error::Structure(format!("cannot split {} with {} keys", left_id, m)))?;
            right_guard.as_internal_mut()?.fill(keys, children.clone());
            (left_id, right_id, pushed, children)
        };

        self.update_parent_pointers(right_id, &moved_children)?;

        let parent_id = Self::parent_of(page)?;
        let parent = self.get_parent_with_empty_slots(parent_id, left_id)?;
        let parent_id = {
            let mut guard = parent.write();
            let parent_id = guard.id();
            guard
                .as_internal_mut()?
                .insert_entry(BTreeEntry::new(pushed.clone(), left_id, right_id))?;
            parent_id
        };
        page.write().set_parent_id(parent_id)?;
        right.write().set_parent_id(parent_id)?;

        debug!(
            tid = %self.tid,
            left = %left_id,
            right = %right_id,
            pushed = %pushed,
            "split internal page"
        );

        if moved_children.contains(&child) {
            Ok(right)
        } else {
            Ok(page.clone())
        }
    }

    /// The parent a split of `child` inserts into, with room for one entry.
    ///
    /// When `child` is the root, a new internal root is created above it.
    /// When the parent is full it is split first, which may cascade upward.
    pub(super) fn get_parent_with_empty_slots(
        &mut self,
        parent_id: PageId,
        child: PageId,
    ) -> Result<PageRef> {
        if parent_id.is_root_ptr() {
            let root = self.get_empty_page(PageCategory::Internal)?;
            let root_id = root.read().id();

            let root_ptr = self.get_page(parent_id, Permissions::ReadWrite)?;
            root_ptr.write().as_root_ptr_mut()?.set_root_id(Some(root_id));

            let old_root = self.get_page(child, Permissions::ReadWrite)?;
            old_root.write().set_parent_id(root_id)?;
            debug!(tid = %self.tid, root = %root_id, "tree grew a level");
            return Ok(root);
        }

        let parent = self.get_page(parent_id, Permissions::ReadWrite)?;
        let full = parent.read().as_internal()?.is_full();
        if full {
            self.split_internal(&parent, child)
        } else {
            Ok(parent)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPoolManager;
    use crate::common::config::BufferPoolConfig;
    use crate::common::TransactionId;
    use crate::index::btree::BTreeFile;
    use crate::storage::{FieldType, Tuple, TupleDesc};
    use std::sync::Arc;
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

    fn row(key: i32) -> Tuple {
        Tuple::new(vec![Field::Int(key), Field::Int(-key)])
    }

    fn keys(page: &PageRef) -> Vec<Field> {
        let guard = page.read();
        let leaf = guard.as_leaf().unwrap();
        (0..leaf.num_tuples()).map(|i| leaf.key(i).unwrap().clone()).collect()
    }

    #[test]
    fn test_split_full_root_leaf() {
        let (pool, file, _dir) = setup();
        let tid = TransactionId::new();
        let mut op = TreeOp::new(&file, &pool, tid);
        let capacity = file.layout().max_tuples();

        let root = op.root_id().unwrap().unwrap();
        let leaf = op.get_page(root, Permissions::ReadWrite).unwrap();
        for k in 0..capacity as i32 {
            leaf.write().as_leaf_mut().unwrap().insert_tuple(row(k * 10)).unwrap();
        }

        let target = op.split_leaf(&leaf, &Field::Int(5)).unwrap();
        assert!(Arc::ptr_eq(&target, &leaf));

        let new_root = op.root_id().unwrap().unwrap();
        assert_eq!(new_root.category(), PageCategory::Internal);
        let parent = op.get_page(new_root, Permissions::ReadOnly).unwrap();
        let (separator, right_id) = {
            let guard = parent.read();
            let entry = guard.as_internal().unwrap().entry(0).unwrap();
            assert_eq!(entry.left, root);
            (entry.key, entry.right)
        };

        let right = op.get_page(right_id, Permissions::ReadOnly).unwrap();
        assert_eq!(keys(&leaf).len(), capacity / 2);
        assert_eq!(keys(&right).len(), capacity - capacity / 2);
        assert_eq!(keys(&right)[0], separator);
        assert_eq!(leaf.read().as_leaf().unwrap().right_sibling_id(), Some(right_id));
        assert_eq!(right.read().as_leaf().unwrap().left_sibling_id(), Some(root));
        assert_eq!(leaf.read().parent_id().unwrap(), new_root);
        assert_eq!(right.read().parent_id().unwrap(), new_root);
    }

    #[test]
    fn test_split_leaf_returns_right_for_large_key() {
        let (pool, file, _dir) = setup();
        let mut op = TreeOp::new(&file, &pool, TransactionId::new());
        let capacity = file.layout().max_tuples();

        let root = op.root_id().unwrap().unwrap();
        let leaf = op.get_page(root, Permissions::ReadWrite).unwrap();
        for k in 0..capacity as i32 {
            leaf.write().as_leaf_mut().unwrap().insert_tuple(row(k)).unwrap();
        }

        let target = op.split_leaf(&leaf, &Field::Int(1000)).unwrap();
        assert!(!Arc::ptr_eq(&target, &leaf));
        assert_eq!(target.read().as_leaf().unwrap().left_sibling_id(), Some(root));
    }

    #[test]
    fn test_split_internal_pushes_middle_key_up() {
        let (pool, file, _dir) = setup();
        let mut op = TreeOp::new(&file, &pool, TransactionId::new());
        let m = file.layout().max_entries();

        // a full internal root over m + 1 leaves
        let root = op.get_empty_page(PageCategory::Internal).unwrap();
        let root_id = root.read().id();
        let mut leaves = Vec::new();
        for _ in 0..=m {
            let leaf = op.get_empty_page(PageCategory::Leaf).unwrap();
            let leaf_id = leaf.read().id();
            leaf.write().set_parent_id(root_id).unwrap();
            leaves.push(leaf_id);
        }
        {
            let mut guard = root.write();
            let page = guard.as_internal_mut().unwrap();
            for (i, pair) in leaves.windows(2).enumerate() {
                page.insert_entry(BTreeEntry::new(Field::Int(i as i32 * 10), pair[0], pair[1]))
                    .unwrap();
            }
            assert!(page.is_full());
        }
        let root_ptr = op.root_ptr(Permissions::ReadWrite).unwrap();
        root_ptr.write().as_root_ptr_mut().unwrap().set_root_id(Some(root_id));

        let last = *leaves.last().unwrap();
        let half = op.split_internal(&root, last).unwrap();
        let half_id = half.read().id();
        assert_ne!(half_id, root_id);

        let left_keys = root.read().as_internal().unwrap().num_entries();
        let right_keys = half.read().as_internal().unwrap().num_entries();
        assert_eq!(right_keys, m / 2);
        assert_eq!(left_keys + right_keys + 1, m);

        // the pushed key sits alone in the new root
        let new_root = op.root_id().unwrap().unwrap();
        let top = op.get_page(new_root, Permissions::ReadOnly).unwrap();
        let entry = top.read().as_internal().unwrap().entry(0).unwrap();
        assert_eq!(entry.key, Field::Int(left_keys as i32 * 10));
        assert_eq!((entry.left, entry.right), (root_id, half_id));

        // moved children point at their new parent
        let moved = op.get_page(last, Permissions::ReadOnly).unwrap();
        assert_eq!(moved.read().parent_id().unwrap(), half_id);
        let stayed = op.get_page(leaves[0], Permissions::ReadOnly).unwrap();
        assert_eq!(stayed.read().parent_id().unwrap(), root_id);
    }
}
