//! Internal page: separator keys and child pointers.

use crate::common::config::INDEX_SIZE;
use crate::common::{Error, PageCategory, PageId, Result};
use crate::storage::Field;

use super::{is_bit_set, read_u32, set_bit, write_u32, PageLayout};

/// One separator key with the children on either side of it.
///
/// Keys in the `left` subtree are <= `key` <= keys in the `right` subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeEntry {
    pub key: Field,
    pub left: PageId,
    pub right: PageId,
}

impl BTreeEntry {
    pub fn new(key: Field, left: PageId, right: PageId) -> Self {
        Self { key, left, right }
    }
}

/// A B+-tree internal node with `n` keys and `n + 1` children.
///
/// Entry `i` is `(children[i], keys[i], children[i + 1])`; adjacent entries
/// share a child.
///
/// # Layout
/// ```text
/// Offset                   Size            Field
/// ------                   ----            -----
/// 0                        4               parent page number (0 = root pointer)
/// 4                        1               child page category
/// 5                        ceil((m+1)/8)   slot-used bitmap; slot 0 is the first
///                                          child, slot i >= 1 is key i and child i
/// 5 + ceil((m+1)/8)        m * key_size    keys for slots 1..=m
/// ...                      (m+1) * 4       child page numbers for slots 0..=m
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalPage {
    id: PageId,
    parent: PageId,
    keys: Vec<Field>,
    children: Vec<PageId>,
    max_entries: usize,
}

impl InternalPage {
    /// An empty internal page whose parent is the root pointer.
    pub fn new(id: PageId, layout: &PageLayout) -> Self {
        Self {
            id,
            parent: PageId::root_ptr(id.table_id()),
            keys: Vec::new(),
            children: Vec::new(),
            max_entries: layout.max_entries(),
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn parent_id(&self) -> PageId {
        self.parent
    }

    pub fn set_parent_id(&mut self, parent: PageId) {
        self.parent = parent;
    }

    /// Number of keys.
    pub fn num_entries(&self) -> usize {
        self.keys.len()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn num_empty_slots(&self) -> usize {
        self.max_entries - self.keys.len()
    }

    pub fn is_full(&self) -> bool {
        self.keys.len() >= self.max_entries
    }

    pub fn keys(&self) -> &[Field] {
        &self.keys
    }

    pub fn children(&self) -> &[PageId] {
        &self.children
    }

    /// Category shared by all children.
    pub fn child_category(&self) -> Option<PageCategory> {
        self.children.first().map(PageId::category)
    }

    pub fn entry(&self, index: usize) -> Option<BTreeEntry> {
        Some(BTreeEntry::new(
            self.keys.get(index)?.clone(),
            *self.children.get(index)?,
            *self.children.get(index + 1)?,
        ))
    }

    pub fn entries(&self) -> impl Iterator<Item = BTreeEntry> + '_ {
        (0..self.keys.len()).filter_map(move |i| self.entry(i))
    }

    /// Position of `child` among the children.
    pub fn child_index(&self, child: PageId) -> Option<usize> {
        self.children.iter().position(|c| *c == child)
    }

    /// The child to descend into when searching for `key`.
    ///
    /// That is the left child of the first entry whose key is >= `key`, or
    /// the last child when every key is smaller. `None` means leftmost.
    pub fn child_for(&self, key: Option<&Field>) -> Option<PageId> {
        let index = match key {
            Some(key) => self.keys.partition_point(|k| k < key),
            None => 0,
        };
        self.children.get(index).copied()
    }

    /// Add an entry that shares a child with an existing one.
    ///
    /// On an empty page the entry's two children become the only children.
    /// Otherwise `entry.left` (or `entry.right`) must already be a child; the
    /// key goes next to it and the other child is added on the new side.
    pub fn insert_entry(&mut self, entry: BTreeEntry) -> Result<()> {
        if self.is_full() {
            return Err(Error::Structure(format!("{} is full", self.id)));
        }
        if self.children.is_empty() {
            self.keys.push(entry.key);
            self.children.push(entry.left);
            self.children.push(entry.right);
            return Ok(());
        }
        if let Some(i) = self.child_index(entry.left) {
            self.keys.insert(i, entry.key);
            self.children.insert(i + 1, entry.right);
            Ok(())
        } else if let Some(i) = self.child_index(entry.right) {
            self.keys.insert(i, entry.key);
            self.children.insert(i, entry.left);
            Ok(())
        } else {
            Err(Error::Structure(format!(
                "entry ({}, {}) shares no child with {}",
                entry.left, entry.right, self.id
            )))
        }
    }

    /// Remove key `index` and the child to its right.
    pub fn delete_key_and_right_child(&mut self, index: usize) -> Result<BTreeEntry> {
        let entry = self.checked_entry(index)?;
        self.keys.remove(index);
        self.children.remove(index + 1);
        Ok(entry)
    }

    /// Remove key `index` and the child to its left.
    pub fn delete_key_and_left_child(&mut self, index: usize) -> Result<BTreeEntry> {
        let entry = self.checked_entry(index)?;
        self.keys.remove(index);
        self.children.remove(index);
        Ok(entry)
    }

    /// Replace the separator key of entry `index`.
    pub fn update_key(&mut self, index: usize, key: Field) -> Result<()> {
        let slot = self.keys.get_mut(index).ok_or_else(|| {
            Error::Structure(format!("{} has no entry {}", self.id, index))
        })?;
        *slot = key;
        Ok(())
    }

    /// Append `key` and a new rightmost child.
    pub(crate) fn push_back(&mut self, key: Field, child: PageId) {
        self.keys.push(key);
        self.children.push(child);
    }

    /// Prepend a new leftmost child and `key`.
    pub(crate) fn push_front(&mut self, child: PageId, key: Field) {
        self.keys.insert(0, key);
        self.children.insert(0, child);
    }

    /// Remove the first child and first key.
    pub(crate) fn pop_front(&mut self) -> Option<(PageId, Field)> {
        if self.keys.is_empty() {
            return None;
        }
        Some((self.children.remove(0), self.keys.remove(0)))
    }

    /// Remove the last key and last child.
    pub(crate) fn pop_back(&mut self) -> Option<(Field, PageId)> {
        let key = self.keys.pop()?;
        let child = self.children.pop()?;
        Some((key, child))
    }

    /// Split off keys after `index` and the children after it.
    ///
    /// Returns `(key at index, keys after it, children after it)`; this page
    /// keeps keys `..index` and children `..=index`.
    pub(crate) fn split_at(&mut self, index: usize) -> Option<(Field, Vec<Field>, Vec<PageId>)> {
        if index >= self.keys.len() {
            return None;
        }
        let right_keys = self.keys.split_off(index + 1);
        let right_children = self.children.split_off(index + 1);
        let key = self.keys.pop()?;
        Some((key, right_keys, right_children))
    }

    /// Take over keys and children that lie entirely to the right.
    pub(crate) fn absorb(&mut self, separator: Field, keys: Vec<Field>, children: Vec<PageId>) {
        self.keys.push(separator);
        self.keys.extend(keys);
        self.children.extend(children);
    }

    /// Replace all content; used to fill a freshly split-off right page.
    pub(crate) fn fill(&mut self, keys: Vec<Field>, children: Vec<PageId>) {
        self.keys = keys;
        self.children = children;
    }

    /// Drain every key and child, leaving the page empty.
    pub(crate) fn take_all(&mut self) -> (Vec<Field>, Vec<PageId>) {
        (
            std::mem::take(&mut self.keys),
            std::mem::take(&mut self.children),
        )
    }

    fn checked_entry(&self, index: usize) -> Result<BTreeEntry> {
        self.entry(index)
            .ok_or_else(|| Error::Structure(format!("{} has no entry {}", self.id, index)))
    }

    pub(crate) fn serialize(&self, layout: &PageLayout) -> Vec<u8> {
        let max = layout.max_entries();
        let key_size = layout.key_type().len();
        let mut out = Vec::with_capacity(layout.page_size());

        write_u32(&mut out, self.parent.page_no());
        out.push(self.child_category().unwrap_or(PageCategory::Leaf) as u8);

        let mut bitmap = vec![0u8; layout.internal_bitmap_len()];
        for slot in 0..self.children.len() {
            set_bit(&mut bitmap, slot, true);
        }
        out.extend_from_slice(&bitmap);

        for key in &self.keys {
            key.write_to(&mut out);
        }
        out.resize(out.len() + (max - self.keys.len()) * key_size, 0);

        for child in &self.children {
            write_u32(&mut out, child.page_no());
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
        let max = layout.max_entries();
        let key_type = layout.key_type();

        let parent_no = read_u32(data, 0);
        let parent = if parent_no == 0 {
            PageId::root_ptr(table)
        } else {
            PageId::new(table, parent_no, PageCategory::Internal)
        };
        let bitmap_start = INDEX_SIZE + 1;
        let keys_start = bitmap_start + layout.internal_bitmap_len();
        let children_start = keys_start + max * key_type.len();
        let bitmap = &data[bitmap_start..keys_start];
        let used = (0..=max).any(|slot| is_bit_set(bitmap, slot));

        // a never-written page is all zeroes; its category byte is meaningless
        let child_category = match PageCategory::from_u8(data[INDEX_SIZE]) {
            Some(c @ (PageCategory::Internal | PageCategory::Leaf)) => c,
            _ if !used => PageCategory::Leaf,
            _ => return Err(format!("bad child category {}", data[INDEX_SIZE])),
        };

        let child_at = |slot: usize| {
            let no = read_u32(data, children_start + slot * INDEX_SIZE);
            PageId::new(table, no, child_category)
        };

        let mut keys = Vec::new();
        let mut children = Vec::new();
        if is_bit_set(bitmap, 0) {
            children.push(child_at(0));
        }
        for slot in 1..=max {
            if is_bit_set(bitmap, slot) {
                let offset = keys_start + (slot - 1) * key_type.len();
                keys.push(key_type.parse(&data[offset..])?);
                children.push(child_at(slot));
            }
        }
        if !children.is_empty() && children.len() != keys.len() + 1 {
            return Err(format!("{} keys but {} children", keys.len(), children.len()));
        }

        Ok(Self {
            id,
            parent,
            keys,
            children,
            max_entries: max,
        })
    }
}
