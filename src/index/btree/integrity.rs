//! Structural self-check of a B+-tree.

use crate::buffer::BufferPoolManager;
use crate::common::{Error, PageCategory, PageId, Result, TransactionId};
use crate::concurrency::Permissions;
use crate::storage::Field;

use super::BTreeFile;

impl BTreeFile {
    /// Walk the whole tree and verify its invariants.
    ///
    /// Checked: every page's parent pointer, key order within each page and
    /// against the separators above it, equal depth of all leaves, and the
    /// sibling links of the leaf chain. With `check_occupancy`, non-root
    /// leaves must hold at least half their capacity and non-root internal
    /// pages at least `(m - 1) / 2` keys, the least a split leaves behind.
    /// Layouts require `m >= 5`, so that floor is never below two keys.
    ///
    /// # Errors
    /// `Structure` describing the first violation found.
    pub fn check_integrity(
        &self,
        pool: &BufferPoolManager,
        tid: TransactionId,
        check_occupancy: bool,
    ) -> Result<()> {
        let Some(root) = self.root_id(pool, tid)? else {
            return Ok(());
        };
        let mut checker = Checker {
            pool,
            tid,
            check_occupancy,
            leaves: Vec::new(),
        };
        checker.check_page(root, PageId::root_ptr(self.id()), None, None, true)?;
        checker.check_leaf_chain()
    }
}

/// A leaf and its sibling links, in the order the walk reached it.
struct LeafLinks {
    id: PageId,
    left: Option<PageId>,
    right: Option<PageId>,
}

struct Checker<'a> {
    pool: &'a BufferPoolManager,
    tid: TransactionId,
    check_occupancy: bool,
    leaves: Vec<LeafLinks>,
}

impl Checker<'_> {
    /// Check the subtree at `page_id` and return its height.
    fn check_page(
        &mut self,
        page_id: PageId,
        parent: PageId,
        lower: Option<&Field>,
        upper: Option<&Field>,
        is_root: bool,
    ) -> Result<usize> {
        let page = self.pool.fetch(self.tid, page_id, Permissions::ReadOnly)?;
        let guard = page.read();

        let recorded = guard.parent_id()?;
        if recorded != parent {
            return Err(violation(format!(
                "{} records parent {}, found under {}",
                page_id, recorded, parent
            )));
        }

        match page_id.category() {
            PageCategory::Leaf => {
                let leaf = guard.as_leaf()?;
                let keys: Vec<&Field> = (0..leaf.num_tuples()).filter_map(|i| leaf.key(i)).collect();
                check_keys(page_id, &keys, lower, upper)?;
                if self.check_occupancy && !is_root && leaf.num_tuples() < leaf.max_tuples() / 2 {
                    return Err(violation(format!(
                        "{} holds {} of {} tuples",
                        page_id,
                        leaf.num_tuples(),
                        leaf.max_tuples()
                    )));
                }
                self.leaves.push(LeafLinks {
                    id: page_id,
                    left: leaf.left_sibling_id(),
                    right: leaf.right_sibling_id(),
                });
                Ok(1)
            }
            PageCategory::Internal => {
                let internal = guard.as_internal()?;
                let n = internal.num_entries();
                if n == 0 || internal.children().len() != n + 1 {
                    return Err(violation(format!(
                        "{} has {} keys and {} children",
                        page_id,
                        n,
                        internal.children().len()
                    )));
                }
                if self.check_occupancy && !is_root && n < (internal.max_entries() - 1) / 2 {
                    return Err(violation(format!(
                        "{} holds {} of {} keys",
                        page_id,
                        n,
                        internal.max_entries()
                    )));
                }
                let category = internal.child_category();
                if internal.children().iter().any(|c| Some(c.category()) != category) {
                    return Err(violation(format!("{} has children of mixed kinds", page_id)));
                }
                let keys: Vec<Field> = internal.keys().to_vec();
                let children: Vec<PageId> = internal.children().to_vec();
                check_keys(page_id, &keys.iter().collect::<Vec<_>>(), lower, upper)?;
                drop(guard);

                let mut height = None;
                for (i, child) in children.iter().enumerate() {
                    let child_lower = if i == 0 { lower } else { keys.get(i - 1) };
                    let child_upper = if i == n { upper } else { keys.get(i) };
                    let h = self.check_page(*child, page_id, child_lower, child_upper, false)?;
                    match height {
                        None => height = Some(h),
                        Some(expected) if expected != h => {
                            return Err(violation(format!(
                                "children of {} have depths {} and {}",
                                page_id, expected, h
                            )));
                        }
                        Some(_) => {}
                    }
                }
                Ok(height.unwrap_or(0) + 1)
            }
            _ => Err(violation(format!("{} cannot appear in the tree", page_id))),
        }
    }

    fn check_leaf_chain(&self) -> Result<()> {
        for (i, leaf) in self.leaves.iter().enumerate() {
            let left = i.checked_sub(1).map(|j| self.leaves[j].id);
            let right = self.leaves.get(i + 1).map(|l| l.id);
            if leaf.left != left || leaf.right != right {
                return Err(violation(format!(
                    "{} links ({:?}, {:?}), expected ({:?}, {:?})",
                    leaf.id, leaf.left, leaf.right, left, right
                )));
            }
        }
        Ok(())
    }
}

/// Keys must be sorted and lie within `[lower, upper]`.
fn check_keys(
    page_id: PageId,
    keys: &[&Field],
    lower: Option<&Field>,
    upper: Option<&Field>,
) -> Result<()> {
    if keys.windows(2).any(|w| w[0] > w[1]) {
        return Err(violation(format!("{} keys out of order", page_id)));
    }
    if let (Some(lower), Some(first)) = (lower, keys.first()) {
        if *first < lower {
            return Err(violation(format!(
                "{} key {} below separator {}",
                page_id, first, lower
            )));
        }
    }
    if let (Some(upper), Some(last)) = (upper, keys.last()) {
        if *last > upper {
            return Err(violation(format!(
                "{} key {} above separator {}",
                page_id, last, upper
            )));
        }
    }
    Ok(())
}

fn violation(message: String) -> Error {
    Error::Structure(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::BufferPoolConfig;
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

    #[test]
    fn test_empty_tree_is_valid() {
        let (pool, file, _dir) = setup();
        file.check_integrity(&pool, TransactionId::new(), true)
            .unwrap();
    }

    #[test]
    fn test_detects_unsorted_leaf() {
        let (pool, file, _dir) = setup();
        let tid = TransactionId::new();
        for k in [3, 1, 2] {
            pool.insert_tuple(tid, file.id(), Tuple::new(vec![Field::Int(k), Field::Int(0)]))
                .unwrap();
        }
        file.check_integrity(&pool, tid, true).unwrap();

        // swap the order behind the tree's back
        let root = file.root_id(&pool, tid).unwrap().unwrap();
        let page = pool.fetch(tid, root, Permissions::ReadWrite).unwrap();
        {
            let mut guard = page.write();
            let leaf = guard.as_leaf_mut().unwrap();
            let first = leaf.drain_front(1);
            leaf.append(first);
        }
        let err = file.check_integrity(&pool, tid, true).unwrap_err();
        assert!(matches!(err, Error::Structure(_)));
    }

    #[test]
    fn test_detects_wrong_parent() {
        let (pool, file, _dir) = setup();
        let tid = TransactionId::new();
        let root = file.root_id(&pool, tid).unwrap().unwrap();
        let page = pool.fetch(tid, root, Permissions::ReadWrite).unwrap();
        page.write()
            .set_parent_id(PageId::new(file.id(), 9, PageCategory::Internal))
            .unwrap();

        assert!(file.check_integrity(&pool, tid, false).is_err());
    }
}
