//! Slot capacities derived from page size and schema.

use crate::common::config::INDEX_SIZE;
use crate::common::{Error, Result};
use crate::storage::{FieldType, TupleDesc};

/// Fewest tuple slots per leaf. A split leaves at least one tuple on
/// each side.
const MIN_LEAF_TUPLES: usize = 3;

/// Fewest key slots per internal page. A split keeps `m - m/2 - 1` keys on
/// the left, and a non-root internal page must never drop to one key: a
/// merge below it would then leave it with none.
const MIN_INTERNAL_KEYS: usize = 5;

/// Per-file page geometry.
///
/// Every B+-tree file fixes a page size, a tuple descriptor, and a key field
/// when it is opened. The number of tuples a leaf holds, the number of keys
/// an internal page holds, and the number of data pages one header page
/// tracks all follow from those three.
///
/// # Capacity formulas
/// ```text
/// leaf:     floor((P*8 - 3*32) / (tuple_size*8 + 1))
/// internal: floor((P*8 - 2*32 - 8) / ((key_size + 4)*8 + 1))
/// header:   (P - 8) * 8
/// ```
/// The first two are then decremented until the serialized page, bitmap
/// rounded up to whole bytes, fits in `P`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLayout {
    page_size: usize,
    desc: TupleDesc,
    key_field: usize,
    key_type: FieldType,
    max_tuples: usize,
    max_entries: usize,
    header_slots: usize,
}

impl PageLayout {
    /// Compute the layout for a file.
    ///
    /// # Errors
    /// `InvalidConfig` if the key field does not exist, if a leaf would hold
    /// fewer than three tuples, or if an internal page would hold fewer than
    /// five keys.
    pub fn new(page_size: usize, desc: TupleDesc, key_field: usize) -> Result<Self> {
        let key_type = desc.field_type(key_field).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "key field {} out of range for {} fields",
                key_field,
                desc.num_fields()
            ))
        })?;
        if page_size <= 2 * INDEX_SIZE {
            return Err(Error::InvalidConfig(format!("page size {} too small", page_size)));
        }

        let tuple_size = desc.tuple_size();
        let bits = page_size * 8;

        let mut max_tuples = bits.saturating_sub(3 * INDEX_SIZE * 8) / (tuple_size * 8 + 1);
        while max_tuples > 0 && leaf_size(max_tuples, tuple_size) > page_size {
            max_tuples -= 1;
        }

        let key_size = key_type.len();
        let mut max_entries =
            bits.saturating_sub(2 * INDEX_SIZE * 8 + 8) / ((key_size + INDEX_SIZE) * 8 + 1);
        while max_entries > 0 && internal_size(max_entries, key_size) > page_size {
            max_entries -= 1;
        }

        if max_tuples < MIN_LEAF_TUPLES || max_entries < MIN_INTERNAL_KEYS {
            return Err(Error::InvalidConfig(format!(
                "page size {} holds {} tuples and {} keys, need at least {} and {}",
                page_size, max_tuples, max_entries, MIN_LEAF_TUPLES, MIN_INTERNAL_KEYS
            )));
        }

        Ok(Self {
            page_size,
            desc,
            key_field,
            key_type,
            max_tuples,
            max_entries,
            header_slots: (page_size - 2 * INDEX_SIZE) * 8,
        })
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    #[inline]
    pub fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    #[inline]
    pub fn key_field(&self) -> usize {
        self.key_field
    }

    #[inline]
    pub fn key_type(&self) -> FieldType {
        self.key_type
    }

    /// Tuple slots per leaf page.
    #[inline]
    pub fn max_tuples(&self) -> usize {
        self.max_tuples
    }

    /// Key slots per internal page (child slots are one more).
    #[inline]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Data pages tracked by one header page.
    #[inline]
    pub fn header_slots(&self) -> usize {
        self.header_slots
    }

    pub(crate) fn leaf_bitmap_len(&self) -> usize {
        self.max_tuples.div_ceil(8)
    }

    pub(crate) fn internal_bitmap_len(&self) -> usize {
        (self.max_entries + 1).div_ceil(8)
    }
}

fn leaf_size(slots: usize, tuple_size: usize) -> usize {
    3 * INDEX_SIZE + slots.div_ceil(8) + slots * tuple_size
}

fn internal_size(keys: usize, key_size: usize) -> usize {
    INDEX_SIZE + 1 + (keys + 1).div_ceil(8) + keys * key_size + (keys + 1) * INDEX_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::DEFAULT_PAGE_SIZE;

    fn two_ints() -> TupleDesc {
        TupleDesc::new(vec![FieldType::Int, FieldType::Int])
    }

    #[test]
    fn test_tiny_page_capacities() {
        let layout = PageLayout::new(64, two_ints(), 0).unwrap();
        assert_eq!(layout.max_tuples(), 6);
        assert_eq!(layout.max_entries(), 6);
        assert_eq!(layout.header_slots(), 448);
    }

    #[test]
    fn test_default_page_capacities_fit() {
        let layout = PageLayout::new(DEFAULT_PAGE_SIZE, two_ints(), 1).unwrap();
        assert!(leaf_size(layout.max_tuples(), 8) <= DEFAULT_PAGE_SIZE);
        assert!(leaf_size(layout.max_tuples() + 1, 8) > DEFAULT_PAGE_SIZE);
        assert!(internal_size(layout.max_entries(), 4) <= DEFAULT_PAGE_SIZE);
        assert!(internal_size(layout.max_entries() + 1, 4) > DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_rejects_bad_key_field() {
        assert!(matches!(
            PageLayout::new(64, two_ints(), 2),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_internal_pages_need_five_keys() {
        // 45 bytes: three tuples but only four keys
        assert!(matches!(
            PageLayout::new(45, two_ints(), 0),
            Err(Error::InvalidConfig(_))
        ));
        let layout = PageLayout::new(52, two_ints(), 0).unwrap();
        assert_eq!(layout.max_entries(), 5);
        assert_eq!(layout.max_tuples(), 4);
    }

    #[test]
    fn test_rejects_page_too_small() {
        let desc = TupleDesc::new(vec![FieldType::Str]);
        assert!(matches!(
            PageLayout::new(256, desc, 0),
            Err(Error::InvalidConfig(_))
        ));
    }
}
