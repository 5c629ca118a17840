//! Page allocation through the chain of header pages.
//!
//! Header page `k` in the chain tracks data pages `k * S .. (k + 1) * S`.
//! A new header page starts with every bit set, so only pages freed after
//! it was created are ever handed out again. With no header pages at all,
//! every allocation extends the file.

use tracing::{debug, trace};

use crate::common::{PageCategory, PageId, Result};
use crate::concurrency::Permissions;
use crate::storage::page::PageRef;

use super::op::TreeOp;

impl TreeOp<'_> {
    /// A page number not in use, marked used.
    pub(super) fn get_empty_page_no(&mut self) -> Result<u32> {
        let slots = self.file.layout().header_slots();
        let root_ptr = self.root_ptr(Permissions::ReadOnly)?;
        let mut next = root_ptr.read().as_root_ptr()?.header_id();

        let mut index = 0usize;
        while let Some(header_id) = next {
            let header = self.get_page(header_id, Permissions::ReadOnly)?;
            let (slot, following) = {
                let guard = header.read();
                let header = guard.as_header()?;
                (header.empty_slot(), header.next_page_id())
            };
            if let Some(slot) = slot {
                let header = self.get_page(header_id, Permissions::ReadWrite)?;
                header.write().as_header_mut()?.mark_slot_used(slot, true);
                let page_no = (index * slots + slot) as u32;
                trace!(tid = %self.tid, page_no, header = %header_id, "reusing free page");
                return Ok(page_no);
            }
            next = following;
            index += 1;
        }

        self.file.extend()
    }

    /// Allocate a page number and install an empty page of `category` on it.
    ///
    /// The new page is write-locked, dirty, and replaces any cached page
    /// previously stored under that number.
    pub(super) fn get_empty_page(&mut self, category: PageCategory) -> Result<PageRef> {
        let page_no = self.get_empty_page_no()?;
        let page_id = PageId::new(self.file.id(), page_no, category);
        let page = self.pool.install(self.tid, self.blank(page_id))?;
        self.track(page_id, &page);
        Ok(page)
    }

    /// Mark `page_no` free, growing the header chain to cover it if needed.
    pub(super) fn set_empty_page(&mut self, page_no: u32) -> Result<()> {
        let slots = self.file.layout().header_slots();
        let root_ptr = self.root_ptr(Permissions::ReadOnly)?;
        let first = root_ptr.read().as_root_ptr()?.header_id();

        let mut current = match first {
            Some(header_id) => header_id,
            None => {
                let header_id = self.new_header_page(None)?;
                let root_ptr = self.root_ptr(Permissions::ReadWrite)?;
                root_ptr
                    .write()
                    .as_root_ptr_mut()?
                    .set_header_id(Some(header_id));
                header_id
            }
        };

        let target = page_no as usize / slots;
        for _ in 0..target {
            let header = self.get_page(current, Permissions::ReadOnly)?;
            let following = header.read().as_header()?.next_page_id();
            current = match following {
                Some(next) => next,
                None => {
                    let next = self.new_header_page(Some(current))?;
                    let prev = self.get_page(current, Permissions::ReadWrite)?;
                    prev.write().as_header_mut()?.set_next_page_id(Some(next));
                    next
                }
            };
        }

        let header = self.get_page(current, Permissions::ReadWrite)?;
        header
            .write()
            .as_header_mut()?
            .mark_slot_used(page_no as usize % slots, false);
        trace!(tid = %self.tid, page_no, header = %current, "freed page");
        Ok(())
    }

    /// Append a header page to the chain after `prev`, every slot used.
    fn new_header_page(&mut self, prev: Option<PageId>) -> Result<PageId> {
        let header = self.get_empty_page(PageCategory::Header)?;
        let mut guard = header.write();
        let header_id = guard.id();
        let page = guard.as_header_mut()?;
        page.init();
        page.set_prev_page_id(prev);
        debug!(header = %header_id, ?prev, "added header page");
        Ok(header_id)
    }
}
