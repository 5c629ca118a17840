//! Page - the unit of caching, locking, and I/O.
//!
//! A [`Page`] is one of four B+-tree page formats plus the bookkeeping the
//! buffer pool needs: which transaction dirtied it and what it looked like
//! when it was last written to disk.

use std::sync::Arc;

use crate::common::config::ROOT_PTR_PAGE_SIZE;
use crate::common::{Error, PageCategory, PageId, Result, TransactionId};

use super::{HeaderPage, InternalPage, LeafPage, PageLayout, RootPtrPage};

/// The decoded contents of a page, by category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageKind {
    RootPtr(RootPtrPage),
    Internal(InternalPage),
    Leaf(LeafPage),
    Header(HeaderPage),
}

/// A cached page.
///
/// The category lives in the [`PageId`]; page bytes never say what kind of
/// page they are.
///
/// # Before-image
/// The serialized bytes as of the last read from or write to disk. The
/// commit path hands it to the log together with the current contents and
/// then resets it with [`set_before_image`](Self::set_before_image).
///
/// # Clone Implementation
/// `Page` does NOT implement `Clone` in production code: a second copy of a
/// cached page that could diverge from the pool's copy is never what the
/// caller wants. A `#[cfg(test)]` Clone is provided for tests.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use pagedb::common::{PageCategory, PageId};
/// use pagedb::storage::page::{Page, PageLayout};
/// use pagedb::storage::{FieldType, TupleDesc};
///
/// let layout = Arc::new(PageLayout::new(4096, TupleDesc::new(vec![FieldType::Int]), 0).unwrap());
/// let page = Page::empty(PageId::new(1, 1, PageCategory::Leaf), layout);
/// assert!(page.as_leaf().unwrap().num_tuples() == 0);
/// assert!(page.dirtier().is_none());
/// ```
#[derive(Debug)]
pub struct Page {
    id: PageId,
    layout: Arc<PageLayout>,
    dirtier: Option<TransactionId>,
    before_image: Vec<u8>,
    kind: PageKind,
}

impl Page {
    /// A freshly initialised page of the id's category.
    pub fn empty(id: PageId, layout: Arc<PageLayout>) -> Self {
        let kind = match id.category() {
            PageCategory::RootPtr => PageKind::RootPtr(RootPtrPage::new()),
            PageCategory::Internal => PageKind::Internal(InternalPage::new(id, &layout)),
            PageCategory::Leaf => PageKind::Leaf(LeafPage::new(id, &layout)),
            PageCategory::Header => PageKind::Header(HeaderPage::new(id, &layout)),
        };
        let mut page = Self {
            id,
            layout,
            dirtier: None,
            before_image: Vec::new(),
            kind,
        };
        page.set_before_image();
        page
    }

    /// Decode page bytes as the category in `id`.
    ///
    /// # Errors
    /// `CorruptPage` if the bytes are too short or malformed.
    pub fn deserialize(id: PageId, data: &[u8], layout: Arc<PageLayout>) -> Result<Self> {
        let corrupt = |reason: String| Error::CorruptPage { page: id, reason };
        let kind = match id.category() {
            PageCategory::RootPtr => {
                PageKind::RootPtr(RootPtrPage::deserialize(id.table_id(), data).map_err(corrupt)?)
            }
            PageCategory::Internal => {
                PageKind::Internal(InternalPage::deserialize(id, data, &layout).map_err(corrupt)?)
            }
            PageCategory::Leaf => {
                PageKind::Leaf(LeafPage::deserialize(id, data, &layout).map_err(corrupt)?)
            }
            PageCategory::Header => {
                PageKind::Header(HeaderPage::deserialize(id, data, &layout).map_err(corrupt)?)
            }
        };
        let len = Self::disk_size(id, &layout).min(data.len());
        Ok(Self {
            id,
            layout,
            dirtier: None,
            before_image: data[..len].to_vec(),
            kind,
        })
    }

    /// Encode the page for disk.
    pub fn serialize(&self) -> Vec<u8> {
        match &self.kind {
            PageKind::RootPtr(p) => p.serialize(),
            PageKind::Internal(p) => p.serialize(&self.layout),
            PageKind::Leaf(p) => p.serialize(&self.layout),
            PageKind::Header(p) => p.serialize(&self.layout),
        }
    }

    /// Bytes this page occupies on disk.
    pub fn disk_size(id: PageId, layout: &PageLayout) -> usize {
        if id.is_root_ptr() {
            ROOT_PTR_PAGE_SIZE
        } else {
            layout.page_size()
        }
    }

    #[inline]
    pub fn id(&self) -> PageId {
        self.id
    }

    #[inline]
    pub fn layout(&self) -> &Arc<PageLayout> {
        &self.layout
    }

    /// The transaction that dirtied this page, if it is dirty.
    #[inline]
    pub fn dirtier(&self) -> Option<TransactionId> {
        self.dirtier
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirtier.is_some()
    }

    /// Mark dirty on behalf of `tid`, or clean.
    pub fn mark_dirty(&mut self, dirty: bool, tid: Option<TransactionId>) {
        self.dirtier = if dirty { tid } else { None };
    }

    /// The page as it was at the last disk read or write.
    pub fn before_image(&self) -> Result<Page> {
        Page::deserialize(self.id, &self.before_image, Arc::clone(&self.layout))
    }

    pub fn before_image_bytes(&self) -> &[u8] {
        &self.before_image
    }

    /// Snapshot the current contents as the new before-image.
    pub fn set_before_image(&mut self) {
        self.before_image = self.serialize();
    }

    pub fn kind(&self) -> &PageKind {
        &self.kind
    }

    pub fn as_root_ptr(&self) -> Result<&RootPtrPage> {
        match &self.kind {
            PageKind::RootPtr(p) => Ok(p),
            _ => Err(self.wrong_kind(PageCategory::RootPtr)),
        }
    }

    pub fn as_root_ptr_mut(&mut self) -> Result<&mut RootPtrPage> {
        match &mut self.kind {
            PageKind::RootPtr(p) => Ok(p),
            _ => Err(wrong_kind(self.id, PageCategory::RootPtr)),
        }
    }

    pub fn as_internal(&self) -> Result<&InternalPage> {
        match &self.kind {
            PageKind::Internal(p) => Ok(p),
            _ => Err(self.wrong_kind(PageCategory::Internal)),
        }
    }

    pub fn as_internal_mut(&mut self) -> Result<&mut InternalPage> {
        match &mut self.kind {
            PageKind::Internal(p) => Ok(p),
            _ => Err(wrong_kind(self.id, PageCategory::Internal)),
        }
    }

    pub fn as_leaf(&self) -> Result<&LeafPage> {
        match &self.kind {
            PageKind::Leaf(p) => Ok(p),
            _ => Err(self.wrong_kind(PageCategory::Leaf)),
        }
    }

    pub fn as_leaf_mut(&mut self) -> Result<&mut LeafPage> {
        match &mut self.kind {
            PageKind::Leaf(p) => Ok(p),
            _ => Err(wrong_kind(self.id, PageCategory::Leaf)),
        }
    }

    pub fn as_header(&self) -> Result<&HeaderPage> {
        match &self.kind {
            PageKind::Header(p) => Ok(p),
            _ => Err(self.wrong_kind(PageCategory::Header)),
        }
    }

    pub fn as_header_mut(&mut self) -> Result<&mut HeaderPage> {
        match &mut self.kind {
            PageKind::Header(p) => Ok(p),
            _ => Err(wrong_kind(self.id, PageCategory::Header)),
        }
    }

    /// Parent of a leaf or internal page.
    pub fn parent_id(&self) -> Result<PageId> {
        match &self.kind {
            PageKind::Internal(p) => Ok(p.parent_id()),
            PageKind::Leaf(p) => Ok(p.parent_id()),
            _ => Err(Error::Structure(format!("{} has no parent", self.id))),
        }
    }

    pub fn set_parent_id(&mut self, parent: PageId) -> Result<()> {
        match &mut self.kind {
            PageKind::Internal(p) => p.set_parent_id(parent),
            PageKind::Leaf(p) => p.set_parent_id(parent),
            _ => return Err(Error::Structure(format!("{} has no parent", self.id))),
        }
        Ok(())
    }

    fn wrong_kind(&self, expected: PageCategory) -> Error {
        wrong_kind(self.id, expected)
    }
}

fn wrong_kind(id: PageId, expected: PageCategory) -> Error {
    Error::Structure(format!("{} is not a {} page", id, expected))
}

impl PartialEq for Page {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.kind == other.kind
    }
}

impl Eq for Page {}

// Clone only available in tests - forces explicit copying in production
#[cfg(test)]
impl Clone for Page {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            layout: Arc::clone(&self.layout),
            dirtier: self.dirtier,
            before_image: self.before_image.clone(),
            kind: self.kind.clone(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
