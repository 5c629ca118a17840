//! Header page: free-page bitmap chained across the file.

use crate::common::config::INDEX_SIZE;
use crate::common::{PageCategory, PageId};

use super::{is_bit_set, read_u32, set_bit, write_u32, PageLayout};

/// One link of the free-page chain.
///
/// Header page `k` in the chain (counting from 0) tracks data pages
/// `k * S .. (k + 1) * S` where `S` is [`PageLayout::header_slots`]. A set
/// bit means the page is in use.
///
/// # Layout
/// ```text
/// Offset  Size   Field
/// ------  ----   -----
/// 0       4      next header page number (0 = none)
/// 4       4      previous header page number (0 = none)
/// 8       P - 8  bitmap, bit i = page k*S + i
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPage {
    id: PageId,
    next: Option<PageId>,
    prev: Option<PageId>,
    bitmap: Vec<u8>,
}

impl HeaderPage {
    /// A header page with every slot free.
    pub fn new(id: PageId, layout: &PageLayout) -> Self {
        Self {
            id,
            next: None,
            prev: None,
            bitmap: vec![0u8; layout.page_size() - 2 * INDEX_SIZE],
        }
    }

    /// Mark every slot used.
    ///
    /// A new header page starts out this way; only pages explicitly freed
    /// afterwards become available.
    pub fn init(&mut self) {
        self.bitmap.fill(0xFF);
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn next_page_id(&self) -> Option<PageId> {
        self.next
    }

    pub fn set_next_page_id(&mut self, next: Option<PageId>) {
        self.next = next;
    }

    pub fn prev_page_id(&self) -> Option<PageId> {
        self.prev
    }

    pub fn set_prev_page_id(&mut self, prev: Option<PageId>) {
        self.prev = prev;
    }

    pub fn num_slots(&self) -> usize {
        self.bitmap.len() * 8
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        is_bit_set(&self.bitmap, slot)
    }

    pub fn mark_slot_used(&mut self, slot: usize, used: bool) {
        set_bit(&mut self.bitmap, slot, used);
    }

    /// First free slot, if any.
    pub fn empty_slot(&self) -> Option<usize> {
        let byte = self.bitmap.iter().position(|b| *b != 0xFF)?;
        let bit = (!self.bitmap[byte]).trailing_zeros() as usize;
        Some(byte * 8 + bit)
    }

    pub(crate) fn serialize(&self, layout: &PageLayout) -> Vec<u8> {
        let mut out = Vec::with_capacity(layout.page_size());
        write_u32(&mut out, self.next.map_or(0, |p| p.page_no()));
        write_u32(&mut out, self.prev.map_or(0, |p| p.page_no()));
        out.extend_from_slice(&self.bitmap);
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
        let link = |no: u32| (no != 0).then(|| PageId::new(table, no, PageCategory::Header));
        Ok(Self {
            id,
            next: link(read_u32(data, 0)),
            prev: link(read_u32(data, INDEX_SIZE)),
            bitmap: data[2 * INDEX_SIZE..layout.page_size()].to_vec(),
        })
    }
}
