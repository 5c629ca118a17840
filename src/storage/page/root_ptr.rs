//! Root-pointer page: where the tree starts.

use crate::common::config::ROOT_PTR_PAGE_SIZE;
use crate::common::{PageCategory, PageId};

use super::{read_u32, write_u32};

/// The fixed page at the start of every B+-tree file.
///
/// # Layout (9 bytes)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       4     root page number (0 = empty tree)
/// 4       1     root page category
/// 5       4     first header page number (0 = none)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootPtrPage {
    root: Option<PageId>,
    header: Option<PageId>,
}

impl RootPtrPage {
    pub fn new() -> Self {
        Self {
            root: None,
            header: None,
        }
    }

    /// Current tree root, `None` for a tree with no pages.
    pub fn root_id(&self) -> Option<PageId> {
        self.root
    }

    pub fn set_root_id(&mut self, root: Option<PageId>) {
        self.root = root;
    }

    /// First page of the free-page header chain.
    pub fn header_id(&self) -> Option<PageId> {
        self.header
    }

    pub fn set_header_id(&mut self, header: Option<PageId>) {
        self.header = header;
    }

    pub(crate) fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ROOT_PTR_PAGE_SIZE);
        match self.root {
            Some(root) => {
                write_u32(&mut out, root.page_no());
                out.push(root.category() as u8);
            }
            None => {
                write_u32(&mut out, 0);
                out.push(PageCategory::Leaf as u8);
            }
        }
        write_u32(&mut out, self.header.map_or(0, |h| h.page_no()));
        out
    }

    pub(crate) fn deserialize(table_id: u32, data: &[u8]) -> Result<Self, String> {
        if data.len() < ROOT_PTR_PAGE_SIZE {
            return Err(format!("root pointer needs {} bytes", ROOT_PTR_PAGE_SIZE));
        }
        let root_no = read_u32(data, 0);
        let root = if root_no == 0 {
            None
        } else {
            let category = match PageCategory::from_u8(data[4]) {
                Some(c @ (PageCategory::Internal | PageCategory::Leaf)) => c,
                _ => return Err(format!("bad root category {}", data[4])),
            };
            Some(PageId::new(table_id, root_no, category))
        };
        let header_no = read_u32(data, 5);
        let header =
            (header_no != 0).then(|| PageId::new(table_id, header_no, PageCategory::Header));
        Ok(Self { root, header })
    }
}

impl Default for RootPtrPage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_ptr_encoding() {
        let mut page = RootPtrPage::new();
        page.set_root_id(Some(PageId::new(4, 12, PageCategory::Internal)));
        page.set_header_id(Some(PageId::new(4, 3, PageCategory::Header)));

        let bytes = page.serialize();
        assert_eq!(bytes.len(), ROOT_PTR_PAGE_SIZE);
        assert_eq!(&bytes[0..4], &12u32.to_le_bytes());
        assert_eq!(bytes[4], PageCategory::Internal as u8);

        assert_eq!(RootPtrPage::deserialize(4, &bytes).unwrap(), page);
    }

    #[test]
    fn test_zero_means_absent() {
        let page = RootPtrPage::deserialize(1, &[0u8; ROOT_PTR_PAGE_SIZE]).unwrap();
        assert_eq!(page.root_id(), None);
        assert_eq!(page.header_id(), None);
    }

    #[test]
    fn test_rejects_bad_root_category() {
        let mut bytes = [0u8; ROOT_PTR_PAGE_SIZE];
        bytes[0] = 1;
        bytes[4] = PageCategory::Header as u8;
        assert!(RootPtrPage::deserialize(1, &bytes).is_err());
    }
}
