use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager translates (page id, direction) into byte-range file I/O on a
/// single database file. All calls are serialized on the file mutex; I/O
/// errors are surfaced and not retried.
pub struct DiskManager {
    db_file: Mutex<File>,
}

impl DiskManager {
    /// Open (or create) the database file. A fresh file is pre-extended by
    /// one page so page id 0, the header page, is always allocated.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        if file.metadata()?.len() == 0 {
            let zeros = [0u8; PAGE_SIZE];
            file.write_all(&zeros)?;
            file.flush()?;
        }

        Ok(Self {
            db_file: Mutex::new(file),
        })
    }

    /// Read a page from disk into the given page buffer. A page the file has
    /// never written comes back zeroed.
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;

        let mut file = self.db_file.lock();
        let file_size = file.metadata()?.len();

        if offset >= file_size {
            page.data.fill(0);
            page.page_id = page_id;
            page.lsn = 0;
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut page.data)?;
        page.page_id = page_id;

        Ok(())
    }

    /// Persist a page at its offset in the file
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = page.page_id as u64 * PAGE_SIZE as u64;

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.data)?;
        file.flush()?;

        Ok(())
    }

    /// Allocate a previously unused page id by extending the file with one
    /// zeroed page. Ids grow monotonically with the file.
    pub fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();
        let new_page_id = (file_size / PAGE_SIZE as u64) as PageId;

        file.seek(SeekFrom::End(0))?;
        let zeros = [0u8; PAGE_SIZE];
        file.write_all(&zeros)?;
        file.flush()?;

        Ok(new_page_id)
    }

    /// Mark a page id free. The allocator never reuses ids, so this is a
    /// bookkeeping no-op.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    /// Flush the file handle
    pub fn shutdown(&self) -> Result<(), DiskManagerError> {
        let mut file = self.db_file.lock();
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_write_read_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let page_id = disk.allocate_page().unwrap();
        assert_eq!(page_id, 1); // page 0 is reserved for the header page

        let mut page = Page::new(page_id);
        page.data[0..5].copy_from_slice(b"hello");
        disk.write_page(&page).unwrap();

        let mut read_back = Page::new(INVALID_PAGE_ID);
        disk.read_page(page_id, &mut read_back).unwrap();
        assert_eq!(&read_back.data[0..5], b"hello");
        assert_eq!(read_back.page_id, page_id);
    }

    #[test]
    fn test_read_unwritten_page_is_zeroed() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let mut page = Page::new(INVALID_PAGE_ID);
        page.data.fill(0xAB);
        disk.read_page(99, &mut page).unwrap();
        assert!(page.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_allocate_is_monotonic() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let a = disk.allocate_page().unwrap();
        let b = disk.allocate_page().unwrap();
        let c = disk.allocate_page().unwrap();
        assert!(a < b && b < c);
    }
}
