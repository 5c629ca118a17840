//! Scans over the leaf chain.

use std::collections::VecDeque;

use crate::buffer::BufferPoolManager;
use crate::common::{PageId, Result, TransactionId};
use crate::concurrency::Permissions;
use crate::storage::page::Page;
use crate::storage::{Field, Op, Tuple};

use super::op::TreeOp;
use super::BTreeFile;

/// A comparison against the key field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPredicate {
    pub op: Op,
    pub field: Field,
}

impl IndexPredicate {
    pub fn new(op: Op, field: Field) -> Self {
        Self { op, field }
    }

    fn matches(&self, key: &Field) -> bool {
        key.compare(self.op, &self.field)
    }

    /// Whether a non-matching `key` means no later key can match either.
    fn is_past_end(&self, key: &Field) -> bool {
        match self.op {
            Op::LessThan | Op::LessThanOrEq => true,
            Op::Equals => *key > self.field,
            _ => false,
        }
    }

    /// Key to start the descent at, or `None` for the leftmost leaf.
    fn start_key(&self) -> Option<&Field> {
        match self.op {
            Op::Equals | Op::GreaterThan | Op::GreaterThanOrEq => Some(&self.field),
            _ => None,
        }
    }
}

/// Iterator over a B+-tree's tuples in key order.
///
/// Each leaf is read-locked and copied into a buffer when the scan reaches
/// it, then the scan follows the right-sibling link. Locks stay held until
/// the transaction completes. The first error ends the scan.
pub struct BTreeScan<'a> {
    file: &'a BTreeFile,
    pool: &'a BufferPoolManager,
    tid: TransactionId,
    predicate: Option<IndexPredicate>,
    buffer: VecDeque<Tuple>,
    next_leaf: Option<PageId>,
    started: bool,
    done: bool,
}

impl<'a> BTreeScan<'a> {
    pub(super) fn new(
        file: &'a BTreeFile,
        pool: &'a BufferPoolManager,
        tid: TransactionId,
        predicate: Option<IndexPredicate>,
    ) -> Self {
        Self {
            file,
            pool,
            tid,
            predicate,
            buffer: VecDeque::new(),
            next_leaf: None,
            started: false,
            done: false,
        }
    }

    /// Start over from the first leaf.
    pub fn rewind(&mut self) {
        self.buffer.clear();
        self.next_leaf = None;
        self.started = false;
        self.done = false;
    }

    fn start(&mut self) -> Result<()> {
        self.started = true;
        let mut op = TreeOp::new(self.file, self.pool, self.tid);
        let Some(root) = op.root_id()? else {
            return Ok(());
        };
        let start_key = self.predicate.as_ref().and_then(IndexPredicate::start_key);
        let leaf = op.find_leaf(root, start_key, Permissions::ReadOnly)?;
        let guard = leaf.read();
        self.load(&guard)
    }

    fn load_next(&mut self) -> Result<bool> {
        let Some(leaf_id) = self.next_leaf.take() else {
            return Ok(false);
        };
        let leaf = self.pool.fetch(self.tid, leaf_id, Permissions::ReadOnly)?;
        let guard = leaf.read();
        self.load(&guard)?;
        Ok(true)
    }

    fn load(&mut self, page: &Page) -> Result<()> {
        let leaf = page.as_leaf()?;
        self.buffer.extend(leaf.tuples());
        self.next_leaf = leaf.right_sibling_id();
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<Tuple>> {
        if !self.started {
            self.start()?;
        }
        let key_field = self.file.key_field();
        loop {
            while let Some(tuple) = self.buffer.pop_front() {
                let Some(predicate) = &self.predicate else {
                    return Ok(Some(tuple));
                };
                let Some(key) = tuple.field(key_field) else {
                    continue;
                };
                if predicate.matches(key) {
                    return Ok(Some(tuple));
                }
                if predicate.is_past_end(key) {
                    return Ok(None);
                }
            }
            if !self.load_next()? {
                return Ok(None);
            }
        }
    }
}

impl Iterator for BTreeScan<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(tuple)) => Some(Ok(tuple)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate_start_and_end() {
        let eq = IndexPredicate::new(Op::Equals, Field::Int(5));
        assert_eq!(eq.start_key(), Some(&Field::Int(5)));
        assert!(!eq.is_past_end(&Field::Int(4)));
        assert!(eq.is_past_end(&Field::Int(6)));

        let lt = IndexPredicate::new(Op::LessThan, Field::Int(5));
        assert_eq!(lt.start_key(), None);
        assert!(lt.is_past_end(&Field::Int(5)));

        let ge = IndexPredicate::new(Op::GreaterThanOrEq, Field::Int(5));
        assert_eq!(ge.start_key(), Some(&Field::Int(5)));
        assert!(!ge.is_past_end(&Field::Int(4)));

        let ne = IndexPredicate::new(Op::NotEquals, Field::Int(5));
        assert_eq!(ne.start_key(), None);
        assert!(!ne.is_past_end(&Field::Int(5)));
    }
}
