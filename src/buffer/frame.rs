//! Frame - a slot in the buffer pool.
//!
//! A [`Frame`] ties a cached [`Page`](crate::storage::page::Page) handle to
//! the id it was cached under; a [`FrameId`] names the slot.

use std::fmt;
use std::sync::Arc;

use crate::common::PageId;
use crate::storage::page::PageRef;

/// Position of a slot in the pool's frame arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

impl FrameId {
    #[inline]
    pub fn new(slot: usize) -> Self {
        FrameId(slot)
    }

    #[inline]
    pub fn slot(self) -> usize {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// An occupied slot in the buffer pool.
///
/// Frames live in the pool's arena (`Vec<Option<Frame>>`) and are addressed
/// by [`FrameId`]; an empty slot is `None` and its id sits on the pool's
/// free list.
///
/// # Thread Safety
/// The frame itself is only touched under the pool's state mutex. The page
/// handle is shared with callers of `fetch`, who lock its `RwLock` for the
/// duration of each read or write.
#[derive(Debug)]
pub struct Frame {
    page_id: PageId,
    page: PageRef,
}

impl Frame {
    pub fn new(page_id: PageId, page: PageRef) -> Self {
        Self { page_id, page }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    #[inline]
    pub fn page(&self) -> &PageRef {
        &self.page
    }

    /// Whether this frame caches exactly `page`, not merely the same id.
    #[inline]
    pub fn holds(&self, page: &PageRef) -> bool {
        Arc::ptr_eq(&self.page, page)
    }

    /// Whether the page may be dropped from the cache.
    ///
    /// A dirty page is never evictable. Neither is a page some thread is
    /// writing right now: its dirty state is not settled yet.
    pub fn is_evictable(&self) -> bool {
        self.page.try_read().is_some_and(|page| !page.is_dirty())
    }
}
