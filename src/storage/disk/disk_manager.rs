use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// Block device abstraction the buffer pool is written against.
///
/// Implementations expose fixed-size blocks addressed by page id. The
/// buffer pool performs its own logical page-id allocation and only calls
/// `deallocate_page` on deletion; `allocate_page` is provided for callers
/// that manage pages without a pool.
pub trait DiskManager: Send + Sync {
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<(), DiskManagerError>;

    fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<(), DiskManagerError>;

    fn allocate_page(&self) -> Result<PageId, DiskManagerError>;

    fn deallocate_page(&self, page_id: PageId) -> Result<(), DiskManagerError>;
}

/// DiskManager backed by a single database file
pub struct FileDiskManager {
    db_file: Mutex<File>,
}

impl FileDiskManager {
    /// Create a new FileDiskManager over the specified database file
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        Ok(Self {
            db_file: Mutex::new(file),
        })
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id as u64 * PAGE_SIZE as u64
    }

    fn validate(page_id: PageId) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }
        Ok(())
    }
}

impl DiskManager for FileDiskManager {
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        Self::validate(page_id)?;
        let offset = Self::page_offset(page_id);

        let mut file = self.db_file.lock();
        let file_size = file.metadata()?.len();

        // Pages past the end of the file read back as all zeroes
        if offset >= file_size {
            buf.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        if offset + PAGE_SIZE as u64 <= file_size {
            file.read_exact(buf)?;
        } else {
            let available = (file_size - offset) as usize;
            file.read_exact(&mut buf[..available])?;
            buf[available..].fill(0);
        }

        Ok(())
    }

    fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        Self::validate(page_id)?;
        let offset = Self::page_offset(page_id);

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;

        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();
        let new_page_id = (file_size / PAGE_SIZE as u64) as PageId;

        // Extend the file with a zeroed page
        file.seek(SeekFrom::End(0))?;
        let zeros = [0u8; PAGE_SIZE];
        file.write_all(&zeros)?;
        file.flush()?;

        Ok(new_page_id)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<(), DiskManagerError> {
        // Page ids are never recycled; the block simply goes cold.
        Self::validate(page_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_disk_manager() -> (FileDiskManager, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let disk = FileDiskManager::new(file.path()).unwrap();
        (disk, file)
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (disk, _file) = create_disk_manager();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[PAGE_SIZE - 1] = 0xCD;
        disk.write_page(3, &data).unwrap();

        let mut buf = [0u8; PAGE_SIZE];
        disk.read_page(3, &mut buf).unwrap();
        assert_eq!(buf[0], 0xAB);
        assert_eq!(buf[PAGE_SIZE - 1], 0xCD);
    }

    #[test]
    fn test_read_past_eof_is_zeroed() {
        let (disk, _file) = create_disk_manager();

        let mut buf = [0xFFu8; PAGE_SIZE];
        disk.read_page(42, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_negative_page_id_rejected() {
        let (disk, _file) = create_disk_manager();

        let mut buf = [0u8; PAGE_SIZE];
        assert!(disk.read_page(-1, &mut buf).is_err());
        assert!(disk.write_page(-1, &buf).is_err());
    }
}
