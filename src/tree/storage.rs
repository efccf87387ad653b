//! Raw disk I/O for the file-backed page store.
//!
//! Each page read or write is a single seek plus a single fixed-size
//! transfer; nothing is preloaded. Pages are framed with a CRC32 checksum
//! so corruption surfaces as an error instead of a silently wrong tree.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::constants::PAGE_SIZE;
use super::types::{FileHeader, FreePage, Node, PageId, PageWithChecksum, SpatialError, SpatialResult};

/// Handles reading/writing individual pages to disk.
pub struct Storage {
    file: Mutex<File>,
    #[allow(dead_code)]
    path: PathBuf,
    page_size: usize,
}

impl Storage {
    /// Create a new storage file, truncating any existing content.
    pub fn create(path: &Path) -> SpatialResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            page_size: PAGE_SIZE,
        })
    }

    /// Open an existing storage file
    pub fn open(path: &Path) -> SpatialResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            page_size: PAGE_SIZE,
        })
    }

    /// Read header from disk (single read operation)
    pub fn read_header(&self) -> SpatialResult<FileHeader> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        let mut buffer = vec![0u8; self.page_size];
        file.read_exact(&mut buffer)?;
        bincode::serde::decode_from_slice(&buffer, bincode::config::legacy())
            .map(|(header, _)| header)
            .map_err(|e| SpatialError::Encoding(e.to_string()))
    }

    /// Write header to disk
    pub fn write_header(&self, header: &FileHeader) -> SpatialResult<()> {
        let bytes = bincode::serde::encode_to_vec(header, bincode::config::legacy())
            .map_err(|e| SpatialError::Encoding(e.to_string()))?;
        let mut padded = bytes;
        padded.resize(self.page_size, 0);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&padded)?;
        Ok(())
    }

    /// Read a single node from disk, verifying its checksum.
    pub fn read_page(&self, page_id: PageId) -> SpatialResult<Node> {
        let offset = self.page_offset(page_id)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; self.page_size];
        file.read_exact(&mut buffer)?;
        drop(file);

        let page: PageWithChecksum =
            bincode::serde::decode_from_slice(&buffer, bincode::config::legacy())
                .map(|(page, _)| page)
                .map_err(|e| SpatialError::Encoding(e.to_string()))?;

        page.into_node()
    }

    /// Write a single node to disk with checksum.
    pub fn write_page(&self, page_id: PageId, node: &Node) -> SpatialResult<()> {
        let offset = self.page_offset(page_id)?;
        let page = PageWithChecksum::new(node.clone());
        let bytes = bincode::serde::encode_to_vec(&page, bincode::config::legacy())
            .map_err(|e| SpatialError::Encoding(e.to_string()))?;

        if bytes.len() > self.page_size {
            return Err(SpatialError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "node too large: {} bytes (max {}); lower max_entries for this dimensionality",
                    bytes.len(),
                    self.page_size
                ),
            )));
        }

        let mut padded = bytes;
        padded.resize(self.page_size, 0);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&padded)?;
        Ok(())
    }

    /// Read a free-list link stored in a freed page slot.
    pub fn read_free_page(&self, page_id: PageId) -> SpatialResult<FreePage> {
        let offset = self.page_offset(page_id)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; self.page_size];
        file.read_exact(&mut buffer)?;
        drop(file);

        bincode::serde::decode_from_slice(&buffer, bincode::config::legacy())
            .map(|(page, _)| page)
            .map_err(|e| SpatialError::Encoding(e.to_string()))
    }

    /// Overwrite a freed page slot with a free-list link.
    pub fn write_free_page(&self, page_id: PageId, free_page: &FreePage) -> SpatialResult<()> {
        let offset = self.page_offset(page_id)?;
        let bytes = bincode::serde::encode_to_vec(free_page, bincode::config::legacy())
            .map_err(|e| SpatialError::Encoding(e.to_string()))?;

        let mut padded = bytes;
        padded.resize(self.page_size, 0);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&padded)?;
        Ok(())
    }

    /// Sync file to disk
    pub fn sync(&self) -> SpatialResult<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn page_offset(&self, page_id: PageId) -> SpatialResult<u64> {
        if page_id == 0 {
            return Err(SpatialError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "cannot access page 0 (reserved for header)",
            )));
        }
        Ok(page_id * self.page_size as u64)
    }
}
