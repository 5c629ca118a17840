//! Leaf page: sorted tuples plus sibling links.

use crate::common::config::INDEX_SIZE;
use crate::common::{Error, PageCategory, PageId, Result};
use crate::storage::{Field, RecordId, Tuple};

use super::{is_bit_set, read_u32, set_bit, write_u32, PageLayout};

/// A B+-tree leaf.
///
/// Tuples are kept sorted by the key field; a tuple's slot is its position
/// in that order, so slots shift when tuples are inserted or removed ahead
/// of them.
///
/// # Layout
/// ```text
/// Offset              Size             Field
/// ------              ----             -----
/// 0                   4                parent page number (0 = root pointer)
/// 4                   4                left sibling page number (0 = none)
/// 8                   4                right sibling page number (0 = none)
/// 12                  ceil(C/8)        slot-used bitmap, bit i = slot i
/// 12 + ceil(C/8)      C * tuple_size   tuple slots
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafPage {
    id: PageId,
    parent: PageId,
    left: Option<PageId>,
    right: Option<PageId>,
    tuples: Vec<Tuple>,
    key_field: usize,
    max_tuples: usize,
}

impl LeafPage {
    /// An empty leaf whose parent is the root pointer.
    pub fn new(id: PageId, layout: &PageLayout) -> Self {
        Self {
            id,
            parent: PageId::root_ptr(id.table_id()),
            left: None,
            right: None,
            tuples: Vec::new(),
            key_field: layout.key_field(),
            max_tuples: layout.max_tuples(),
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    /// Parent internal page, or the root pointer when this leaf is the root.
    pub fn parent_id(&self) -> PageId {
        self.parent
    }

    pub fn set_parent_id(&mut self, parent: PageId) {
        self.parent = parent;
    }

    pub fn left_sibling_id(&self) -> Option<PageId> {
        self.left
    }

    pub fn set_left_sibling_id(&mut self, left: Option<PageId>) {
        self.left = left;
    }

    pub fn right_sibling_id(&self) -> Option<PageId> {
        self.right
    }

    pub fn set_right_sibling_id(&mut self, right: Option<PageId>) {
        self.right = right;
    }

    pub fn num_tuples(&self) -> usize {
        self.tuples.len()
    }

    pub fn max_tuples(&self) -> usize {
        self.max_tuples
    }

    pub fn num_empty_slots(&self) -> usize {
        self.max_tuples - self.tuples.len()
    }

    pub fn is_full(&self) -> bool {
        self.tuples.len() >= self.max_tuples
    }

    /// Key of the tuple in `slot`.
    pub fn key(&self, slot: usize) -> Option<&Field> {
        self.tuples.get(slot).and_then(|t| t.field(self.key_field))
    }

    pub fn first_key(&self) -> Option<&Field> {
        self.key(0)
    }

    /// The tuple in `slot`, tagged with its record id.
    pub fn tuple(&self, slot: usize) -> Option<Tuple> {
        self.tuples.get(slot).map(|t| {
            let mut t = t.clone();
            t.set_record_id(Some(RecordId::new(self.id, slot)));
            t
        })
    }

    /// All tuples in key order, tagged with their record ids.
    pub fn tuples(&self) -> impl Iterator<Item = Tuple> + '_ {
        (0..self.tuples.len()).filter_map(move |slot| self.tuple(slot))
    }

    /// Insert in key order, after any tuples with an equal key. Over-long
    /// strings are cut to their stored width first.
    ///
    /// Returns the slot the tuple landed in.
    pub fn insert_tuple(&mut self, mut tuple: Tuple) -> Result<usize> {
        if self.is_full() {
            return Err(Error::Structure(format!("{} is full", self.id)));
        }
        tuple.fit_width();
        let key = tuple
            .field(self.key_field)
            .cloned()
            .ok_or_else(|| Error::SchemaMismatch("tuple has no key field".into()))?;
        let slot = self
            .tuples
            .partition_point(|t| t.field(self.key_field).is_some_and(|k| *k <= key));
        tuple.set_record_id(None);
        self.tuples.insert(slot, tuple);
        Ok(slot)
    }

    /// Remove a tuple.
    ///
    /// The slot named by the tuple's record id is tried first; if it holds
    /// different values (slots shift as the page changes) the first tuple
    /// with equal values is removed instead.
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> Result<Tuple> {
        let by_slot = tuple
            .record_id()
            .filter(|rid| rid.page_id == self.id)
            .map(|rid| rid.slot)
            .filter(|&slot| self.tuples.get(slot).is_some_and(|t| t.same_values(tuple)));
        let slot = by_slot
            .or_else(|| self.tuples.iter().position(|t| t.same_values(tuple)))
            .ok_or_else(|| {
                Error::TupleNotFound(
                    tuple
                        .record_id()
                        .unwrap_or_else(|| RecordId::new(self.id, self.tuples.len())),
                )
            })?;
        Ok(self.tuples.remove(slot))
    }

    /// Remove and return the tuples from `at` onward.
    pub(crate) fn split_off(&mut self, at: usize) -> Vec<Tuple> {
        self.tuples.split_off(at.min(self.tuples.len()))
    }

    /// Remove and return the first `n` tuples.
    pub(crate) fn drain_front(&mut self, n: usize) -> Vec<Tuple> {
        self.tuples.drain(..n.min(self.tuples.len())).collect()
    }

    /// Append tuples whose keys are all >= the current last key.
    pub(crate) fn append(&mut self, tuples: Vec<Tuple>) {
        self.tuples.extend(tuples);
    }

    /// Prepend tuples whose keys are all <= the current first key.
    pub(crate) fn prepend(&mut self, tuples: Vec<Tuple>) {
        self.tuples.splice(0..0, tuples);
    }

    pub(crate) fn serialize(&self, layout: &PageLayout) -> Vec<u8> {
        let mut out = Vec::with_capacity(layout.page_size());
        write_u32(&mut out, self.parent.page_no());
        write_u32(&mut out, self.left.map_or(0, |p| p.page_no()));
        write_u32(&mut out, self.right.map_or(0, |p| p.page_no()));

        let mut bitmap = vec![0u8; layout.leaf_bitmap_len()];
        for slot in 0..self.tuples.len() {
            set_bit(&mut bitmap, slot, true);
        }
        out.extend_from_slice(&bitmap);

        for tuple in &self.tuples {
            tuple.write_to(&mut out);
        }
        out.resize(layout.page_size(), 0);
        out
    }

    pub(crate) fn deserialize(
        id: PageId,
        data: &[u8],
        layout: &PageLayout,
    ) -> std::result::Result<Self, String> {
        if data.len() < layout.page_size() {
            return Err(format!("{} bytes, expected {}", data.len(), layout.page_size()));
        }
        let table = id.table_id();
        let parent_no = read_u32(data, 0);
        let parent = if parent_no == 0 {
            PageId::root_ptr(table)
        } else {
            PageId::new(table, parent_no, PageCategory::Internal)
        };
        let sibling = |no: u32| (no != 0).then(|| PageId::new(table, no, PageCategory::Leaf));

        let bitmap_start = 3 * INDEX_SIZE;
        let slots_start = bitmap_start + layout.leaf_bitmap_len();
        let bitmap = &data[bitmap_start..slots_start];
        let tuple_size = layout.tuple_desc().tuple_size();

        let mut tuples = Vec::new();
        for slot in 0..layout.max_tuples() {
            if is_bit_set(bitmap, slot) {
                let offset = slots_start + slot * tuple_size;
                let tuple = layout
                    .tuple_desc()
                    .parse_tuple(&data[offset..offset + tuple_size])?;
                tuples.push(tuple);
            }
        }

        Ok(Self {
            id,
            parent,
            left: sibling(read_u32(data, 4)),
            right: sibling(read_u32(data, 8)),
            tuples,
            key_field: layout.key_field(),
            max_tuples: layout.max_tuples(),
        })
    }
}
