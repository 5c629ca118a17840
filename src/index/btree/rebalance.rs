//! Restoring minimum occupancy after a delete.
//!
//! A non-root page is under-full when more than `capacity - capacity/2` of
//! its slots are empty. It then borrows from a sibling under the same
//! parent, or merges with it when the sibling has nothing to spare.

use tracing::debug;

use crate::common::{Error, PageCategory, Result};
use crate::concurrency::Permissions;
use crate::storage::page::{BTreeEntry, InternalPage, PageRef};
use crate::storage::Field;

use super::op::TreeOp;

/// An entry of the parent next to the under-full page, with its index.
type Neighbour = Option<(usize, BTreeEntry)>;

impl TreeOp<'_> {
    /// Rebalance an under-full leaf or internal page.
    ///
    /// The left sibling is preferred; the right one is used only for the
    /// leftmost child. The root is never rebalanced.
    pub(super) fn handle_min_occupancy(&mut self, page: &PageRef) -> Result<()> {
        let (page_id, parent_id) = {
            let guard = page.read();
            (guard.id(), guard.parent_id()?)
        };
        if parent_id.is_root_ptr() {
            return Ok(());
        }

        let parent = self.get_page(parent_id, Permissions::ReadWrite)?;
        let (left, right) = {
            let guard = parent.read();
            let parent = guard.as_internal()?;
            let index = parent.child_index(page_id).ok_or_else(|| {
                Error::Structure(format!("{} is not a child of its parent {}", page_id, parent_id))
            })?;
            let left = index
                .checked_sub(1)
                .and_then(|i| parent.entry(i).map(|e| (i, e)));
            let right = parent.entry(index).map(|e| (index, e));
            (left, right)
        };

        match page_id.category() {
            PageCategory::Leaf => self.rebalance_leaf(page, &parent, left, right),
            PageCategory::Internal => self.rebalance_internal(page, &parent, left, right),
            _ => Err(Error::Structure(format!("cannot rebalance {}", page_id))),
        }
    }

    fn rebalance_leaf(
        &mut self,
        page: &PageRef,
        parent: &PageRef,
        left: Neighbour,
        right: Neighbour,
    ) -> Result<()> {
        let capacity = page.read().as_leaf()?.max_tuples();

        if let Some((index, entry)) = left {
            let sibling = self.get_page(entry.left, Permissions::ReadWrite)?;
            let sibling_empty = sibling.read().as_leaf()?.num_empty_slots();
            if should_merge(sibling_empty, capacity) {
                self.merge_leaf_pages(&sibling, page, parent, index)
            } else {
                self.steal_from_leaf_page(page, &sibling, parent, index, false)
            }
        } else if let Some((index, entry)) = right {
            let sibling = self.get_page(entry.right, Permissions::ReadWrite)?;
            let sibling_empty = sibling.read().as_leaf()?.num_empty_slots();
            if should_merge(sibling_empty, capacity) {
                self.merge_leaf_pages(page, &sibling, parent, index)
            } else {
                self.steal_from_leaf_page(page, &sibling, parent, index, true)
            }
        } else {
            Err(Error::Structure("under-full leaf has no siblings".into()))
        }
    }

    fn rebalance_internal(
        &mut self,
        page: &PageRef,
        parent: &PageRef,
        left: Neighbour,
        right: Neighbour,
    ) -> Result<()> {
        let capacity = page.read().as_internal()?.max_entries();

        if let Some((index, entry)) = left {
            let sibling = self.get_page(entry.left, Permissions::ReadWrite)?;
            let sibling_empty = sibling.read().as_internal()?.num_empty_slots();
            if should_merge(sibling_empty, capacity) {
                self.merge_internal_pages(&sibling, page, parent, index)
            } else {
                self.steal_from_left_internal_page(page, &sibling, parent, index)
            }
        } else if let Some((index, entry)) = right {
            let sibling = self.get_page(entry.right, Permissions::ReadWrite)?;
            let sibling_empty = sibling.read().as_internal()?.num_empty_slots();
            if should_merge(sibling_empty, capacity) {
                self.merge_internal_pages(page, &sibling, parent, index)
            } else {
                self.steal_from_right_internal_page(page, &sibling, parent, index)
            }
        } else {
            Err(Error::Structure("under-full internal page has no siblings".into()))
        }
    }

    /// Even out two leaves by moving tuples from `sibling` into `page`.
    ///
    /// The parent key at `index` becomes the first key of whichever page is
    /// now on the right.
    pub(super) fn steal_from_leaf_page(
        &mut self,
        page: &PageRef,
        sibling: &PageRef,
        parent: &PageRef,
        index: usize,
        is_right_sibling: bool,
    ) -> Result<()> {
        let (separator, moved) = {
            let mut page_guard = page.write();
            let mut sibling_guard = sibling.write();
            let page = page_guard.as_leaf_mut()?;
            let sibling = sibling_guard.as_leaf_mut()?;

            let n = page.num_tuples();
            let s = sibling.num_tuples();
            let moved = s - (n + s) / 2;

            let separator = if is_right_sibling {
                page.append(sibling.drain_front(moved));
                sibling.first_key().cloned()
            } else {
                page.prepend(sibling.split_off(s - moved));
                page.first_key().cloned()
            };
            let separator =
                separator.ok_or_else(|| Error::Structure("steal emptied a leaf".into()))?;
            (separator, moved)
        };

        parent
            .write()
            .as_internal_mut()?
            .update_key(index, separator)?;
        debug!(tid = %self.tid, moved, from_right = is_right_sibling, "stole tuples");
        Ok(())
    }

    /// Move every tuple of `right` into `left`, free `right`, and remove
    /// their separator from the parent.
    pub(super) fn merge_leaf_pages(
        &mut self,
        left: &PageRef,
        right: &PageRef,
        parent: &PageRef,
        index: usize,
    ) -> Result<()> {
        let (left_id, right_id, after) = {
            let mut left_guard = left.write();
            let mut right_guard = right.write();
            let left_id = left_guard.id();
            let right_id = right_guard.id();
            let left = left_guard.as_leaf_mut()?;
            let right = right_guard.as_leaf_mut()?;

            left.append(right.split_off(0));
            let after = right.right_sibling_id();
            left.set_right_sibling_id(after);
            (left_id, right_id, after)
        };

        if let Some(after) = after {
            let page = self.get_page(after, Permissions::ReadWrite)?;
            page.write().as_leaf_mut()?.set_left_sibling_id(Some(left_id));
        }

        self.set_empty_page(right_id.page_no())?;
        debug!(tid = %self.tid, left = %left_id, right = %right_id, "merged leaves");
        self.delete_parent_entry(left, parent, index)
    }

    /// Rotate entries from the left sibling through the parent into `page`.
    pub(super) fn steal_from_left_internal_page(
        &mut self,
        page: &PageRef,
        sibling: &PageRef,
        parent: &PageRef,
        index: usize,
    ) -> Result<()> {
        let (page_id, moved) = {
            let mut page_guard = page.write();
            let mut sibling_guard = sibling.write();
            let mut parent_guard = parent.write();
            let page_id = page_guard.id();
            let page = page_guard.as_internal_mut()?;
            let sibling = sibling_guard.as_internal_mut()?;
            let parent = parent_guard.as_internal_mut()?;

            let count = sibling.num_entries() - (page.num_entries() + sibling.num_entries()) / 2;
            let mut moved = Vec::with_capacity(count);
            for _ in 0..count {
                let separator = parent_key(parent, index)?;
                let (key, child) = sibling
                    .pop_back()
                    .ok_or_else(|| Error::Structure("steal emptied an internal page".into()))?;
                page.push_front(child, separator);
                parent.update_key(index, key)?;
                moved.push(child);
            }
            (page_id, moved)
        };

        self.update_parent_pointers(page_id, &moved)?;
        debug!(tid = %self.tid, moved = moved.len(), "stole entries from left");
        Ok(())
    }

    /// Rotate entries from the right sibling through the parent into `page`.
    pub(super) fn steal_from_right_internal_page(
        &mut self,
        page: &PageRef,
        sibling: &PageRef,
        parent: &PageRef,
        index: usize,
    ) -> Result<()> {
        let (page_id, moved) = {
            let mut page_guard = page.write();
            let mut sibling_guard = sibling.write();
            let mut parent_guard = parent.write();
            let page_id = page_guard.id();
            let page = page_guard.as_internal_mut()?;
            let sibling = sibling_guard.as_internal_mut()?;
            let parent = parent_guard.as_internal_mut()?;

            let count = sibling.num_entries() - (page.num_entries() + sibling.num_entries()) / 2;
            let mut moved = Vec::with_capacity(count);
            for _ in 0..count {
                let separator = parent_key(parent, index)?;
                let (child, key) = sibling
                    .pop_front()
                    .ok_or_else(|| Error::Structure("steal emptied an internal page".into()))?;
                page.push_back(separator, child);
                parent.update_key(index, key)?;
                moved.push(child);
            }
            (page_id, moved)
        };

        self.update_parent_pointers(page_id, &moved)?;
        debug!(tid = %self.tid, moved = moved.len(), "stole entries from right");
        Ok(())
    }

    /// Pull the parent separator down into `left`, move all of `right`
    /// after it, free `right`, and remove the separator from the parent.
    pub(super) fn merge_internal_pages(
        &mut self,
        left: &PageRef,
        right: &PageRef,
        parent: &PageRef,
        index: usize,
    ) -> Result<()> {
        let separator = {
            let guard = parent.read();
            parent_key(guard.as_internal()?, index)?
        };

        let (left_id, right_id, moved) = {
            let mut left_guard = left.write();
            let mut right_guard = right.write();
            let left_id = left_guard.id();
            let right_id = right_guard.id();
            let (keys, children) = right_guard.as_internal_mut()?.take_all();
            left_guard
                .as_internal_mut()?
                .absorb(separator, keys, children.clone());
            (left_id, right_id, children)
        };

        self.update_parent_pointers(left_id, &moved)?;
        self.set_empty_page(right_id.page_no())?;
        debug!(tid = %self.tid, left = %left_id, right = %right_id, "merged internal pages");
        self.delete_parent_entry(left, parent, index)
    }

    /// Remove entry `index` and its right child from `parent` after a merge
    /// into `left`.
    ///
    /// A parent left without keys must be the root; `left` replaces it. A
    /// parent that becomes under-full is rebalanced in turn.
    pub(super) fn delete_parent_entry(
        &mut self,
        left: &PageRef,
        parent: &PageRef,
        index: usize,
    ) -> Result<()> {
        let (parent_id, grandparent, now_empty, under_full) = {
            let mut guard = parent.write();
            let parent_id = guard.id();
            let page = guard.as_internal_mut()?;
            page.delete_key_and_right_child(index)?;
            (
                parent_id,
                page.parent_id(),
                page.num_entries() == 0,
                is_under_full(page.num_empty_slots(), page.max_entries()),
            )
        };

        if now_empty {
            if !grandparent.is_root_ptr() {
                return Err(Error::Structure(format!(
                    "non-root {} lost its last entry",
                    parent_id
                )));
            }
            let root_ptr = self.get_page(grandparent, Permissions::ReadWrite)?;
            let left_id = {
                let mut guard = left.write();
                guard.set_parent_id(grandparent)?;
                guard.id()
            };
            root_ptr.write().as_root_ptr_mut()?.set_root_id(Some(left_id));
            self.set_empty_page(parent_id.page_no())?;
            debug!(tid = %self.tid, root = %left_id, "tree lost a level");
            Ok(())
        } else if under_full {
            self.handle_min_occupancy(parent)
        } else {
            Ok(())
        }
    }
}

fn parent_key(parent: &InternalPage, index: usize) -> Result<Field> {
    parent
        .keys()
        .get(index)
        .cloned()
        .ok_or_else(|| Error::Structure(format!("{} has no entry {}", parent.id(), index)))
}

/// Whether a page with `empty` free slots out of `capacity` needs rebalancing.
pub(super) fn is_under_full(empty: usize, capacity: usize) -> bool {
    empty > capacity - capacity / 2
}

/// Whether a sibling with `empty` free slots out of `capacity` is merged
/// with rather than stolen from.
pub(super) fn should_merge(sibling_empty: usize, capacity: usize) -> bool {
    sibling_empty >= capacity - capacity / 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPoolManager;
    use crate::common::config::BufferPoolConfig;
    use crate::common::{PageId, TransactionId};
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

    /// Two leaves under a fresh internal root holding `left` and `right` keys.
    fn two_leaves(
        op: &mut TreeOp<'_>,
        left: &[i32],
        right: &[i32],
    ) -> (PageRef, PageRef, PageRef) {
        let old_root = op.root_id().unwrap().unwrap();
        let left_page = op.get_page(old_root, Permissions::ReadWrite).unwrap();
        let right_page = op.get_empty_page(PageCategory::Leaf).unwrap();
        let root = op.get_empty_page(PageCategory::Internal).unwrap();
        let (left_id, right_id, root_id) =
            (old_root, right_page.read().id(), root.read().id());

        for (page, keys) in [(&left_page, left), (&right_page, right)] {
            let mut guard = page.write();
            guard.set_parent_id(root_id).unwrap();
            let leaf = guard.as_leaf_mut().unwrap();
            for k in keys {
                leaf.insert_tuple(Tuple::new(vec![Field::Int(*k), Field::Int(0)]))
                    .unwrap();
            }
        }
        left_page.write().as_leaf_mut().unwrap().set_right_sibling_id(Some(right_id));
        right_page.write().as_leaf_mut().unwrap().set_left_sibling_id(Some(left_id));
        root.write()
            .as_internal_mut()
            .unwrap()
            .insert_entry(BTreeEntry::new(Field::Int(right[0]), left_id, right_id))
            .unwrap();
        let root_ptr = op.root_ptr(Permissions::ReadWrite).unwrap();
        root_ptr.write().as_root_ptr_mut().unwrap().set_root_id(Some(root_id));
        (left_page, right_page, root)
    }

    fn leaf_keys(page: &PageRef) -> Vec<i32> {
        let guard = page.read();
        let leaf = guard.as_leaf().unwrap();
        (0..leaf.num_tuples())
            .map(|i| match leaf.key(i).unwrap() {
                Field::Int(v) => *v,
                other => panic!("unexpected key {other}"),
            })
            .collect()
    }

    #[test]
    fn test_thresholds() {
        // capacity 6: under-full below 3 tuples, merge when a sibling has <= 3
        assert!(!is_under_full(3, 6));
        assert!(is_under_full(4, 6));
        assert!(should_merge(3, 6));
        assert!(!should_merge(2, 6));

        // capacity 7: ceil(7/2) = 4 empty slots is still fine
        assert!(!is_under_full(4, 7));
        assert!(is_under_full(5, 7));
        assert!(should_merge(4, 7));
        assert!(!should_merge(3, 7));
    }

    #[test]
    fn test_steal_from_right_leaf() {
        let (pool, file, _dir) = setup();
        let mut op = TreeOp::new(&file, &pool, TransactionId::new());
        let (left, right, root) = two_leaves(&mut op, &[1, 2], &[10, 11, 12, 13, 14, 15]);

        op.handle_min_occupancy(&left).unwrap();

        assert_eq!(leaf_keys(&left), vec![1, 2, 10, 11]);
        assert_eq!(leaf_keys(&right), vec![12, 13, 14, 15]);
        assert_eq!(root.read().as_internal().unwrap().keys(), &[Field::Int(12)]);
    }

    #[test]
    fn test_steal_from_left_leaf() {
        let (pool, file, _dir) = setup();
        let mut op = TreeOp::new(&file, &pool, TransactionId::new());
        let (left, right, root) = two_leaves(&mut op, &[1, 2, 3, 4, 5, 6], &[10, 11]);

        op.handle_min_occupancy(&right).unwrap();

        assert_eq!(leaf_keys(&left), vec![1, 2, 3, 4]);
        assert_eq!(leaf_keys(&right), vec![5, 6, 10, 11]);
        assert_eq!(root.read().as_internal().unwrap().keys(), &[Field::Int(5)]);
    }

    #[test]
    fn test_merge_collapses_root() {
        let (pool, file, _dir) = setup();
        let mut op = TreeOp::new(&file, &pool, TransactionId::new());
        let (left, right, root) = two_leaves(&mut op, &[1, 2], &[10, 11, 12]);
        let right_id = right.read().id();
        let root_id = root.read().id();
        let left_id = left.read().id();

        op.handle_min_occupancy(&left).unwrap();

        assert_eq!(leaf_keys(&left), vec![1, 2, 10, 11, 12]);
        assert_eq!(op.root_id().unwrap(), Some(left_id));
        assert_eq!(left.read().parent_id().unwrap(), PageId::root_ptr(file.id()));
        assert_eq!(left.read().as_leaf().unwrap().right_sibling_id(), None);

        // both freed pages come back, lowest number first
        let mut freed = vec![right_id.page_no(), root_id.page_no()];
        freed.sort_unstable();
        assert_eq!(op.get_empty_page_no().unwrap(), freed[0]);
        assert_eq!(op.get_empty_page_no().unwrap(), freed[1]);
    }
}
