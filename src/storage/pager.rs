//! # Pager
//!
//! The pager multiplexes page I/O against a single database file. It is the
//! only component that touches the file descriptor; everything above it
//! works in terms of page numbers.
//!
//! ## File Layout
//!
//! ```text
//!   |---------------------|
//!   | offset 0: DB header |  magic ‖ version ‖ catalogRoot ‖ reserved
//!   |---------------------|
//!   | offset P:   page 1  |  B+Tree pages
//!   |---------------------|
//!   | offset 2P:  page 2  |
//!   |---------------------|
//!   | ...                 |
//! ```
//!
//! Page `n` lives at file offset `n · P`; page 0 is the database header and
//! is reachable only through the dedicated header accessors — `read_page(0)`
//! and `write_page(0)` are rejected. A file must be a whole number of pages;
//! anything else is reported as corruption.
//!
//! ## Header Format
//!
//! ```text
//! Offset  Size   Field
//! 0       8      Magic: "AnubisDB"
//! 8       4      Version, big-endian (currently 1)
//! 12      4      Catalog root page (0 = page 1)
//! 16      P-16   Reserved, zeroed
//! ```
//!
//! The catalog-root field exists because a root split can relocate the
//! catalog tree's root off page 1; the catalog records the move here so a
//! reopen finds its tree again.
//!
//! ## Concurrency
//!
//! One `parking_lot::RwLock` guards the file handle and the page counter.
//! Reads take the shared guard and may run concurrently; writes and
//! allocations take the exclusive guard and are serialized. Positioned I/O
//! (`read_exact_at` / `write_all_at`) keeps concurrent readers from fighting
//! over a shared cursor. There is no page cache at this layer: pages are
//! read on demand and written back explicitly.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use parking_lot::RwLock;
use tracing::debug;

use super::page::{Page, PageType};
use super::PAGE_SIZE;
use crate::error::{Error, Result};

pub const DB_MAGIC: &[u8; 8] = b"AnubisDB";
pub const DB_VERSION: u32 = 1;

#[derive(Debug)]
struct PagerState {
    file: File,
    num_pages: u32,
    catalog_root: u32,
}

/// File-backed page store with a database header at offset 0.
#[derive(Debug)]
pub struct Pager {
    state: RwLock<PagerState>,
}

impl Pager {
    /// Opens an existing database file or creates a fresh one.
    ///
    /// A new file gets the header page written immediately. An existing
    /// file must be a whole number of pages and start with the magic
    /// string, otherwise `Corrupted` is returned.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Pager> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len();

        if len == 0 {
            let mut header = vec![0u8; PAGE_SIZE];
            header[..8].copy_from_slice(DB_MAGIC);
            header[8..12].copy_from_slice(&DB_VERSION.to_be_bytes());
            file.write_all_at(&header, 0)?;
            file.sync_all()?;
            debug!(path = %path.display(), "created database file");

            return Ok(Pager {
                state: RwLock::new(PagerState {
                    file,
                    num_pages: 0,
                    catalog_root: 0,
                }),
            });
        }

        if len % PAGE_SIZE as u64 != 0 {
            return Err(Error::corrupted(format!(
                "file size {len} is not a multiple of the page size {PAGE_SIZE}"
            )));
        }

        let mut header = vec![0u8; PAGE_SIZE];
        file.read_exact_at(&mut header, 0)?;

        if &header[..8] != DB_MAGIC {
            return Err(Error::corrupted("bad magic number"));
        }

        let version = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
        if version != DB_VERSION {
            return Err(Error::corrupted(format!(
                "unsupported database version {version}"
            )));
        }

        let catalog_root =
            u32::from_be_bytes([header[12], header[13], header[14], header[15]]);
        let num_pages = (len / PAGE_SIZE as u64) as u32 - 1;
        debug!(path = %path.display(), num_pages, "opened database file");

        Ok(Pager {
            state: RwLock::new(PagerState {
                file,
                num_pages,
                catalog_root,
            }),
        })
    }

    /// Number of data pages; the header page does not count. Monotonically
    /// non-decreasing — there is no freelist.
    pub fn num_pages(&self) -> u32 {
        self.state.read().num_pages
    }

    fn check_page_number(page_no: u32, num_pages: u32) -> Result<()> {
        if page_no == 0 {
            return Err(Error::invalid("page 0 is the database header"));
        }
        if page_no > num_pages {
            return Err(Error::invalid(format!(
                "page {page_no} out of range ({num_pages} pages)"
            )));
        }
        Ok(())
    }

    /// Reads and validates page `n` (1-based).
    pub fn read_page(&self, page_no: u32) -> Result<Page> {
        let state = self.state.read();
        Self::check_page_number(page_no, state.num_pages)?;

        let mut buf = vec![0u8; PAGE_SIZE];
        state
            .file
            .read_exact_at(&mut buf, page_no as u64 * PAGE_SIZE as u64)?;
        Page::from_bytes(buf)
    }

    /// Writes page `n` back to disk. The page's header bytes live inside
    /// its buffer, so the buffer is always self-consistent.
    pub fn write_page(&self, page_no: u32, page: &Page) -> Result<()> {
        let state = self.state.write();
        Self::check_page_number(page_no, state.num_pages)?;

        state
            .file
            .write_all_at(page.data(), page_no as u64 * PAGE_SIZE as u64)?;
        Ok(())
    }

    /// Appends a fresh page of the given type, returning its number and the
    /// in-memory page. The page is persisted before this returns.
    pub fn allocate_page(&self, page_type: PageType, parent: u32) -> Result<(u32, Page)> {
        let mut state = self.state.write();

        let page_no = state.num_pages + 1;
        let mut page = Page::new(page_type);
        page.set_parent(parent);

        state
            .file
            .write_all_at(page.data(), page_no as u64 * PAGE_SIZE as u64)?;
        state.num_pages = page_no;

        Ok((page_no, page))
    }

    /// Flushes file contents to durable storage.
    pub fn sync(&self) -> Result<()> {
        self.state.write().file.sync_all()?;
        Ok(())
    }

    /// Syncs and releases the file handle.
    pub fn close(self) -> Result<()> {
        self.sync()
    }

    /// Root page of the catalog tree: the header field if set, else page 1.
    pub fn catalog_root(&self) -> u32 {
        let root = self.state.read().catalog_root;
        if root == 0 {
            1
        } else {
            root
        }
    }

    /// Records a relocated catalog root in the database header.
    pub fn set_catalog_root(&self, page_no: u32) -> Result<()> {
        let mut state = self.state.write();
        state.file.write_all_at(&page_no.to_be_bytes(), 12)?;
        state.catalog_root = page_no;
        Ok(())
    }
}
