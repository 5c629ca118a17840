//! Raw page I/O for one B+-tree file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::trace;

use crate::common::config::ROOT_PTR_PAGE_SIZE;
use crate::common::{Error, Result};

/// Byte range of one page within the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    offset: u64,
    len: usize,
}

/// Reads and writes the pages of a single file.
///
/// # File Layout
/// ```text
/// ┌──────────┬─────────┬─────────┬─────┬─────────┐
/// │ root ptr │ page 1  │ page 2  │ ... │ page N  │
/// │   9 B    │   P B   │   P B   │     │   P B   │
/// └──────────┴─────────┴─────────┴─────┴─────────┘
///  0          9         9+P             9+(N-1)P
/// ```
///
/// Page number 0 addresses the root pointer. The manager knows nothing
/// about page contents; an empty data page is all zeroes.
///
/// Not synchronized. [`BTreeFile`](crate::index::BTreeFile) keeps it behind
/// a mutex. Every write and every extension is synced before returning.
#[derive(Debug)]
pub struct DiskManager {
    file: File,
    page_size: usize,
    data_pages: u32,
}

impl DiskManager {
    /// Open `path`, creating it with a zeroed root pointer if it is missing
    /// or empty. A fresh file has [`page_count`](Self::page_count) 0.
    ///
    /// # Errors
    /// I/O errors, or `InvalidConfig` when the length does not fit the
    /// layout for `page_size` (a truncated or foreign file).
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len();
        if len == 0 {
            file.write_all(&[0u8; ROOT_PTR_PAGE_SIZE])?;
            file.sync_all()?;
            trace!(path = %path.display(), "initialized empty file");
        }

        let data_bytes = len.max(ROOT_PTR_PAGE_SIZE as u64) - ROOT_PTR_PAGE_SIZE as u64;
        if (len != 0 && len < ROOT_PTR_PAGE_SIZE as u64) || data_bytes % page_size as u64 != 0 {
            return Err(Error::InvalidConfig(format!(
                "{} is {} bytes, not a root pointer plus whole {}-byte pages",
                path.display(),
                len,
                page_size
            )));
        }

        Ok(Self {
            file,
            page_size,
            data_pages: (data_bytes / page_size as u64) as u32,
        })
    }

    /// Read page `page_no` (0 for the root pointer).
    pub fn read_page(&mut self, page_no: u32) -> Result<Vec<u8>> {
        let span = self.span(page_no)?;
        let mut buf = vec![0u8; span.len];
        self.file.seek(SeekFrom::Start(span.offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Overwrite an existing page. Shorter input is padded with zeroes.
    ///
    /// # Errors
    /// `PageNotFound` past the end of the file; `InvalidConfig` when `data`
    /// is longer than the page.
    pub fn write_page(&mut self, page_no: u32, data: &[u8]) -> Result<()> {
        let span = self.span(page_no)?;
        if data.len() > span.len {
            return Err(Error::InvalidConfig(format!(
                "{} bytes do not fit page {} ({} bytes)",
                data.len(),
                page_no,
                span.len
            )));
        }
        let mut buf = Vec::with_capacity(span.len);
        buf.extend_from_slice(data);
        buf.resize(span.len, 0);

        self.file.seek(SeekFrom::Start(span.offset))?;
        self.file.write_all(&buf)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Grow the file by one zeroed data page and return its number.
    pub fn append_page(&mut self) -> Result<u32> {
        let page_no = self.data_pages + 1;
        self.file.seek(SeekFrom::Start(Self::data_offset(page_no, self.page_size)))?;
        self.file.write_all(&vec![0u8; self.page_size])?;
        self.file.sync_all()?;
        self.data_pages = page_no;
        Ok(page_no)
    }

    /// Number of data pages; the root pointer is not counted.
    #[inline]
    pub fn page_count(&self) -> u32 {
        self.data_pages
    }

    fn data_offset(page_no: u32, page_size: usize) -> u64 {
        ROOT_PTR_PAGE_SIZE as u64 + u64::from(page_no - 1) * page_size as u64
    }

    fn span(&self, page_no: u32) -> Result<Span> {
        match page_no {
            0 => Ok(Span { offset: 0, len: ROOT_PTR_PAGE_SIZE }),
            n if n <= self.data_pages => Ok(Span {
                offset: Self::data_offset(n, self.page_size),
                len: self.page_size,
            }),
            n => Err(Error::PageNotFound(n)),
        }
    }
}
