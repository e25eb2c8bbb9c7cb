//! Page-based file I/O.
//!
//! The pager presents the database file as an array of fixed-size pages and
//! is the exclusive owner of the file descriptor. Every other component
//! borrows it. Reads past EOF yield zero-filled pages; writes extend the
//! file as needed. The reserved lock byte range is never handed out as data
//! pages.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::{Mmap, MmapOptions};

use crate::constants::{
  LOCK_BYTE_OFFSET, LOCK_BYTE_RANGE, MAX_PAGE_SIZE, MIN_PAGE_SIZE, OS_PAGE_SIZE,
};
use crate::error::{RayError, Result};

/// True for a power of two in [4 KiB, 64 KiB]
pub fn is_valid_page_size(page_size: usize) -> bool {
  page_size.is_power_of_two() && (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size)
}

/// Number of pages needed to store `bytes`
pub fn pages_to_store(bytes: usize, page_size: usize) -> u64 {
  (bytes as u64).div_ceil(page_size as u64)
}

/// Fixed-page I/O over a single file
pub struct FilePager {
  file: File,
  path: PathBuf,
  page_size: usize,
  read_only: bool,
  /// Cached zero-copy views keyed by (startPage, pageCount)
  mmap_cache: HashMap<(u64, u64), Arc<Mmap>>,
}

impl FilePager {
  /// Create a new database file; fails if it already exists
  pub fn create<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
    Self::validate_page_size(page_size)?;
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create_new(true)
      .open(path.as_ref())?;
    Ok(Self {
      file,
      path: path.as_ref().to_path_buf(),
      page_size,
      read_only: false,
      mmap_cache: HashMap::new(),
    })
  }

  /// Open an existing database file
  pub fn open<P: AsRef<Path>>(path: P, page_size: usize, read_only: bool) -> Result<Self> {
    Self::validate_page_size(page_size)?;
    let file = OpenOptions::new()
      .read(true)
      .write(!read_only)
      .open(path.as_ref())?;
    Ok(Self {
      file,
      path: path.as_ref().to_path_buf(),
      page_size,
      read_only,
      mmap_cache: HashMap::new(),
    })
  }

  fn validate_page_size(page_size: usize) -> Result<()> {
    if !is_valid_page_size(page_size) {
      return Err(RayError::InvalidFormat(format!(
        "unsupported page size {page_size}: must be a power of two between 4KiB and 64KiB"
      )));
    }
    Ok(())
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn page_size(&self) -> usize {
    self.page_size
  }

  /// Underlying file handle; used for whole-file mmap and lock acquisition
  pub fn file(&self) -> &File {
    &self.file
  }

  /// Current file length in bytes
  pub fn file_size(&self) -> Result<u64> {
    Ok(self.file.metadata()?.len())
  }

  /// Number of whole or partial pages currently backed by the file
  pub fn num_pages(&self) -> Result<u64> {
    Ok(self.file_size()?.div_ceil(self.page_size as u64))
  }

  fn lock_page_range(&self) -> (u64, u64) {
    let first = LOCK_BYTE_OFFSET / self.page_size as u64;
    let last = (LOCK_BYTE_OFFSET + LOCK_BYTE_RANGE - 1) / self.page_size as u64;
    (first, last)
  }

  fn page_in_lock_range(&self, page_no: u64) -> bool {
    let (first, last) = self.lock_page_range();
    (first..=last).contains(&page_no)
  }

  /// Read one page. Reads past EOF return a zero-filled page.
  pub fn read_page(&mut self, page_no: u64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; self.page_size];
    let offset = page_no * self.page_size as u64;
    let file_size = self.file_size()?;
    if offset >= file_size {
      return Ok(buf);
    }

    self.file.seek(SeekFrom::Start(offset))?;
    let available = ((file_size - offset) as usize).min(self.page_size);
    self.file.read_exact(&mut buf[..available])?;
    Ok(buf)
  }

  /// Write one page, extending the file if needed.
  ///
  /// `buf` must be exactly one page. Pages overlapping the reserved lock
  /// byte range are rejected.
  pub fn write_page(&mut self, page_no: u64, buf: &[u8]) -> Result<()> {
    if self.read_only {
      return Err(RayError::ReadOnly);
    }
    if buf.len() != self.page_size {
      return Err(RayError::Internal(format!(
        "write_page buffer is {} bytes, page size is {}",
        buf.len(),
        self.page_size
      )));
    }
    if self.page_in_lock_range(page_no) {
      return Err(RayError::Internal(format!(
        "page {page_no} overlaps the reserved lock byte range"
      )));
    }

    self.invalidate_mmaps_overlapping(page_no, 1);
    let offset = page_no * self.page_size as u64;
    self.file.seek(SeekFrom::Start(offset))?;
    self.file.write_all(buf)?;
    Ok(())
  }

  /// Extend the file by `count` pages and return the first new page number.
  ///
  /// If the extension would land inside the lock byte range, allocation
  /// resumes past it.
  pub fn allocate_pages(&mut self, count: u64) -> Result<u64> {
    if self.read_only {
      return Err(RayError::ReadOnly);
    }
    let mut start = self.num_pages()?;
    let (lock_first, lock_last) = self.lock_page_range();
    if start + count > lock_first && start <= lock_last {
      start = lock_last + 1;
    }

    let new_len = (start + count) * self.page_size as u64;
    self.file.set_len(new_len)?;
    self.mmap_cache.clear();
    Ok(start)
  }

  /// Zero-copy view of `count` pages starting at `start_page`.
  ///
  /// The mapped offset is OS-page aligned by construction (page sizes are
  /// multiples of 4 KiB). Views are cached per (start, count) and dropped
  /// on any overlapping write, allocation, or truncation.
  pub fn mmap_range(&mut self, start_page: u64, count: u64) -> Result<Arc<Mmap>> {
    let key = (start_page, count);
    if let Some(cached) = self.mmap_cache.get(&key) {
      return Ok(Arc::clone(cached));
    }

    let offset = start_page * self.page_size as u64;
    if offset % OS_PAGE_SIZE as u64 != 0 {
      return Err(RayError::Internal(format!(
        "mmap offset {offset} is not OS-page aligned"
      )));
    }
    let len = (count * self.page_size as u64) as usize;
    let file_size = self.file_size()?;
    if offset + len as u64 > file_size {
      return Err(RayError::Internal(format!(
        "mmap range [{start_page}, +{count}) extends past EOF"
      )));
    }

    let mmap = unsafe { MmapOptions::new().offset(offset).len(len).map(&self.file)? };
    let mmap = Arc::new(mmap);
    self.mmap_cache.insert(key, Arc::clone(&mmap));
    Ok(mmap)
  }

  /// Map the whole file from byte 0; used by the snapshot reader
  pub fn mmap_whole(&mut self) -> Result<Arc<Mmap>> {
    let pages = self.num_pages()?;
    self.mmap_range(0, pages)
  }

  fn invalidate_mmaps_overlapping(&mut self, start_page: u64, count: u64) {
    let end = start_page + count;
    self
      .mmap_cache
      .retain(|&(cached_start, cached_count), _| cached_start + cached_count <= start_page || end <= cached_start);
  }

  /// Drop all cached views
  pub fn invalidate_mmaps(&mut self) {
    self.mmap_cache.clear();
  }

  /// Copy `count` pages from `src` to `dst`, syncing before the source is
  /// considered free. Handles overlapping ranges in either direction.
  pub fn relocate_area(&mut self, src: u64, count: u64, dst: u64) -> Result<()> {
    if src == dst || count == 0 {
      return Ok(());
    }

    if dst < src {
      for i in 0..count {
        let page = self.read_page(src + i)?;
        self.write_page(dst + i, &page)?;
      }
    } else {
      for i in (0..count).rev() {
        let page = self.read_page(src + i)?;
        self.write_page(dst + i, &page)?;
      }
    }
    self.sync()
  }

  /// Truncate the file to `num_pages` pages
  pub fn truncate_pages(&mut self, num_pages: u64) -> Result<()> {
    if self.read_only {
      return Err(RayError::ReadOnly);
    }
    self.mmap_cache.clear();
    self.file.set_len(num_pages * self.page_size as u64)?;
    Ok(())
  }

  /// fsync file contents and metadata
  pub fn sync(&mut self) -> Result<()> {
    self.file.sync_all()?;
    Ok(())
  }

  /// fdatasync: contents only, metadata flushed lazily
  pub fn sync_data(&mut self) -> Result<()> {
    self.file.sync_data()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  fn new_pager(dir: &tempfile::TempDir) -> FilePager {
    FilePager::create(dir.path().join("pages.raydb"), 4096).unwrap()
  }

  #[test]
  fn read_past_eof_is_zero_filled() {
    let dir = tempdir().unwrap();
    let mut pager = new_pager(&dir);
    let page = pager.read_page(10).unwrap();
    assert_eq!(page.len(), 4096);
    assert!(page.iter().all(|&b| b == 0));
  }

  #[test]
  fn write_then_read_round_trip() {
    let dir = tempdir().unwrap();
    let mut pager = new_pager(&dir);
    let mut page = vec![0u8; 4096];
    page[0] = 0xab;
    page[4095] = 0xcd;
    pager.write_page(3, &page).unwrap();
    assert_eq!(pager.read_page(3).unwrap(), page);
    // Intervening pages exist and read as zero
    assert!(pager.read_page(1).unwrap().iter().all(|&b| b == 0));
  }

  #[test]
  fn wrong_buffer_length_rejected() {
    let dir = tempdir().unwrap();
    let mut pager = new_pager(&dir);
    assert!(pager.write_page(0, &[0u8; 100]).is_err());
  }

  #[test]
  fn lock_range_pages_rejected() {
    let dir = tempdir().unwrap();
    let mut pager = new_pager(&dir);
    let lock_page = LOCK_BYTE_OFFSET / 4096;
    let page = vec![0u8; 4096];
    assert!(pager.write_page(lock_page, &page).is_err());
    // Neighbors outside the range are fine
    assert!(pager.write_page(lock_page - 1, &page).is_ok());
  }

  #[test]
  fn allocate_extends_file() {
    let dir = tempdir().unwrap();
    let mut pager = new_pager(&dir);
    let start = pager.allocate_pages(4).unwrap();
    assert_eq!(start, 0);
    assert_eq!(pager.num_pages().unwrap(), 4);
    let next = pager.allocate_pages(2).unwrap();
    assert_eq!(next, 4);
  }

  #[test]
  fn mmap_range_sees_written_data() {
    let dir = tempdir().unwrap();
    let mut pager = new_pager(&dir);
    let mut page = vec![0u8; 4096];
    page[7] = 99;
    pager.write_page(1, &page).unwrap();
    let map = pager.mmap_range(1, 1).unwrap();
    assert_eq!(map[7], 99);
  }

  #[test]
  fn mmap_cache_invalidated_by_overlapping_write() {
    let dir = tempdir().unwrap();
    let mut pager = new_pager(&dir);
    pager.write_page(0, &vec![1u8; 4096]).unwrap();
    let first = pager.mmap_range(0, 1).unwrap();
    pager.write_page(0, &vec![2u8; 4096]).unwrap();
    let second = pager.mmap_range(0, 1).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second[0], 2);
  }

  #[test]
  fn relocate_copies_pages() {
    let dir = tempdir().unwrap();
    let mut pager = new_pager(&dir);
    for i in 0..3u8 {
      pager.write_page(i as u64, &vec![i + 1; 4096]).unwrap();
    }
    pager.relocate_area(0, 3, 5).unwrap();
    for i in 0..3u8 {
      assert_eq!(pager.read_page(5 + i as u64).unwrap()[0], i + 1);
    }
  }
}
