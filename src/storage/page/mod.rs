//! Page formats.
//!
//! This module contains:
//! - [`Page`] - A cached page: one of the four formats plus dirty state
//! - [`PageLayout`] - Slot capacities for a given page size and schema
//! - [`RootPtrPage`], [`InternalPage`], [`LeafPage`], [`HeaderPage`] - The formats
//!
//! All integers on disk are little-endian.

mod header;
mod internal;
mod layout;
mod leaf;
#[allow(clippy::module_inception)]
mod page;
mod root_ptr;

use std::sync::Arc;

use parking_lot::RwLock;

pub use header::HeaderPage;
pub use internal::{BTreeEntry, InternalPage};
pub use layout::PageLayout;
pub use leaf::LeafPage;
pub use page::{Page, PageKind};
pub use root_ptr::RootPtrPage;

/// Shared handle to a cached page.
///
/// The buffer pool and every caller that fetched the page hold the same
/// `Arc`; the page lock manager, not this `RwLock`, decides who may use it.
/// The `RwLock` only guards individual reads and writes of the contents.
pub type PageRef = Arc<RwLock<Page>>;

#[inline]
pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[inline]
pub(crate) fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Bit `i` lives in byte `i / 8` at position `i % 8`, least significant first.
#[inline]
pub(crate) fn is_bit_set(bitmap: &[u8], i: usize) -> bool {
    bitmap
        .get(i / 8)
        .is_some_and(|byte| byte & (1 << (i % 8)) != 0)
}

#[inline]
pub(crate) fn set_bit(bitmap: &mut [u8], i: usize, value: bool) {
    if let Some(byte) = bitmap.get_mut(i / 8) {
        if value {
            *byte |= 1 << (i % 8);
        } else {
            *byte &= !(1 << (i % 8));
        }
    }
}
