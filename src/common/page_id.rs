//! Page identifier type.

use std::fmt;

/// The kind of page a [`PageId`] refers to.
///
/// The category travels with the id; it is never derived from page bytes.
/// The `u8` codes are the on-disk encoding used by root-pointer and internal
/// pages to record the category of the pages they point at.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PageCategory {
    /// The root-pointer page at file offset 0.
    RootPtr = 0,
    /// B+-tree internal node.
    Internal = 1,
    /// B+-tree leaf node.
    Leaf = 2,
    /// Free-page bitmap page.
    Header = 3,
}

impl PageCategory {
    /// All categories, in code order.
    pub const ALL: [PageCategory; 4] = [
        PageCategory::RootPtr,
        PageCategory::Internal,
        PageCategory::Leaf,
        PageCategory::Header,
    ];

    /// Convert from the on-disk code.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PageCategory::RootPtr),
            1 => Some(PageCategory::Internal),
            2 => Some(PageCategory::Leaf),
            3 => Some(PageCategory::Header),
            _ => None,
        }
    }
}

impl fmt::Display for PageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PageCategory::RootPtr => "ROOT_PTR",
            PageCategory::Internal => "INTERNAL",
            PageCategory::Leaf => "LEAF",
            PageCategory::Header => "HEADER",
        };
        f.write_str(name)
    }
}

/// Identifies a page: owning table, page number, and category.
///
/// Page number 0 is reserved for the root-pointer page; data pages are
/// numbered from 1. A pointer field holding 0 on disk means "no page".
///
/// # Example
/// ```
/// use pagedb::common::{PageCategory, PageId};
///
/// let page_id = PageId::new(7, 42, PageCategory::Leaf);
/// assert_eq!(page_id.page_no(), 42);
/// assert!(!page_id.is_root_ptr());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    table_id: u32,
    page_no: u32,
    category: PageCategory,
}

impl PageId {
    /// Create a new PageId.
    #[inline]
    pub fn new(table_id: u32, page_no: u32, category: PageCategory) -> Self {
        Self {
            table_id,
            page_no,
            category,
        }
    }

    /// The root-pointer page of a table.
    #[inline]
    pub fn root_ptr(table_id: u32) -> Self {
        Self::new(table_id, 0, PageCategory::RootPtr)
    }

    #[inline]
    pub fn table_id(&self) -> u32 {
        self.table_id
    }

    #[inline]
    pub fn page_no(&self) -> u32 {
        self.page_no
    }

    #[inline]
    pub fn category(&self) -> PageCategory {
        self.category
    }

    #[inline]
    pub fn is_root_ptr(&self) -> bool {
        self.category == PageCategory::RootPtr
    }

    /// Same table and page number, different category.
    ///
    /// Used to find stale cached copies of a page number that is being
    /// reused for a different kind of page.
    #[inline]
    pub fn with_category(&self, category: PageCategory) -> Self {
        Self::new(self.table_id, self.page_no, category)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Page({}:{}:{})",
            self.table_id, self.page_no, self.category
        )
    }
}
