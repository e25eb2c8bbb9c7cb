//! Database header (page 0).
//!
//! The header is the sole authoritative commit pointer: a WAL record or
//! snapshot exists only once a header referencing it has been fsync'd.
//! Two checksums guard it: a mid-page CRC over the fixed fields and a
//! footer CRC over the whole page minus its own four bytes.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::*;
use crate::error::{RayError, Result};
use crate::storage::pager::is_valid_page_size;
use crate::util::binary::{read_u32, read_u64, write_u32, write_u64};
use crate::util::crc::crc32c;

/// WAL region selector persisted in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRegion {
  Primary = 0,
  Secondary = 1,
}

impl WalRegion {
  pub fn from_u8(value: u8) -> Result<Self> {
    match value {
      0 => Ok(Self::Primary),
      1 => Ok(Self::Secondary),
      other => Err(RayError::InvalidFormat(format!(
        "unknown WAL region selector {other}"
      ))),
    }
  }
}

/// Parsed page-0 header (V2 layout with dual-WAL fields)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbHeader {
  pub page_size: u32,
  pub version: u32,
  pub min_reader_version: u32,
  pub flags: u32,
  pub change_counter: u64,
  pub db_size_pages: u64,
  pub snapshot_start_page: u64,
  pub snapshot_page_count: u64,
  pub wal_start_page: u64,
  pub wal_page_count: u64,
  /// Legacy single-region head; mirrors the active region's head
  pub wal_head: u64,
  /// Legacy single-region tail; mirrors the primary tail
  pub wal_tail: u64,
  pub active_snapshot_gen: u64,
  pub prev_snapshot_gen: u64,
  pub max_node_id: u64,
  pub next_tx_id: u64,
  pub last_commit_ts: u64,
  pub schema_cookie: u64,
  pub wal_primary_head: u64,
  pub wal_secondary_head: u64,
  pub active_wal_region: WalRegion,
  pub checkpoint_in_progress: bool,
}

fn unix_millis() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or(0)
}

impl DbHeader {
  /// Header for a freshly created database: WAL directly after page 0,
  /// no snapshot yet.
  pub fn new(page_size: u32, wal_page_count: u64) -> Self {
    Self {
      page_size,
      version: VERSION_SINGLE_FILE,
      min_reader_version: MIN_READER_SINGLE_FILE,
      flags: 0,
      change_counter: 0,
      db_size_pages: 1 + wal_page_count,
      snapshot_start_page: 0,
      snapshot_page_count: 0,
      wal_start_page: 1,
      wal_page_count,
      wal_head: 0,
      wal_tail: 0,
      active_snapshot_gen: INITIAL_SNAPSHOT_GEN,
      prev_snapshot_gen: INITIAL_SNAPSHOT_GEN,
      max_node_id: 0,
      next_tx_id: INITIAL_TX_ID,
      last_commit_ts: 0,
      schema_cookie: 0,
      wal_primary_head: 0,
      wal_secondary_head: 0,
      active_wal_region: WalRegion::Primary,
      checkpoint_in_progress: false,
    }
  }

  /// Parse and validate a full page-0 buffer.
  ///
  /// Rejects bad magic, unsupported page sizes, readers that are too old,
  /// and either checksum failing.
  pub fn parse(page: &[u8]) -> Result<Self> {
    if page.len() < DB_HEADER_SIZE {
      return Err(RayError::InvalidFormat(format!(
        "header page truncated: {} bytes",
        page.len()
      )));
    }
    if page[0..16] != MAGIC_RAYDB {
      return Err(RayError::InvalidFormat("bad database magic".to_string()));
    }

    let page_size = read_u32(page, 16);
    if !is_valid_page_size(page_size as usize) {
      return Err(RayError::InvalidFormat(format!(
        "unsupported page size {page_size}"
      )));
    }

    let version = read_u32(page, 20);
    let min_reader_version = read_u32(page, 24);
    if min_reader_version > VERSION_SINGLE_FILE {
      return Err(RayError::VersionTooNew {
        required: min_reader_version,
        supported: VERSION_SINGLE_FILE,
      });
    }

    // Mid-page CRC over the fixed fields
    let stored = read_u32(page, DB_HEADER_SIZE - 4);
    let computed = crc32c(&page[..DB_HEADER_SIZE - 4]);
    if stored != computed {
      return Err(RayError::ChecksumMismatch { stored, computed });
    }

    // Footer CRC over the whole page
    if page.len() < page_size as usize {
      return Err(RayError::InvalidFormat(format!(
        "header page shorter than declared page size ({} < {page_size})",
        page.len()
      )));
    }
    let footer_at = page_size as usize - 4;
    let stored_footer = read_u32(page, footer_at);
    let computed_footer = crc32c(&page[..footer_at]);
    if stored_footer != computed_footer {
      return Err(RayError::ChecksumMismatch {
        stored: stored_footer,
        computed: computed_footer,
      });
    }

    Ok(Self {
      page_size,
      version,
      min_reader_version,
      flags: read_u32(page, 28),
      change_counter: read_u64(page, 32),
      db_size_pages: read_u64(page, 40),
      snapshot_start_page: read_u64(page, 48),
      snapshot_page_count: read_u64(page, 56),
      wal_start_page: read_u64(page, 64),
      wal_page_count: read_u64(page, 72),
      wal_head: read_u64(page, 80),
      wal_tail: read_u64(page, 88),
      active_snapshot_gen: read_u64(page, 96),
      prev_snapshot_gen: read_u64(page, 104),
      max_node_id: read_u64(page, 112),
      next_tx_id: read_u64(page, 120),
      last_commit_ts: read_u64(page, 128),
      schema_cookie: read_u64(page, 136),
      wal_primary_head: read_u64(page, 144),
      wal_secondary_head: read_u64(page, 152),
      active_wal_region: WalRegion::from_u8(page[160])?,
      checkpoint_in_progress: page[161] != 0,
    })
  }

  /// Serialize to a full page buffer with both checksums
  pub fn serialize_to_page(&self) -> Vec<u8> {
    let page_size = self.page_size as usize;
    let mut page = vec![0u8; page_size];

    page[0..16].copy_from_slice(&MAGIC_RAYDB);
    write_u32(&mut page, 16, self.page_size);
    write_u32(&mut page, 20, self.version);
    write_u32(&mut page, 24, self.min_reader_version);
    write_u32(&mut page, 28, self.flags);
    write_u64(&mut page, 32, self.change_counter);
    write_u64(&mut page, 40, self.db_size_pages);
    write_u64(&mut page, 48, self.snapshot_start_page);
    write_u64(&mut page, 56, self.snapshot_page_count);
    write_u64(&mut page, 64, self.wal_start_page);
    write_u64(&mut page, 72, self.wal_page_count);
    write_u64(&mut page, 80, self.wal_head);
    write_u64(&mut page, 88, self.wal_tail);
    write_u64(&mut page, 96, self.active_snapshot_gen);
    write_u64(&mut page, 104, self.prev_snapshot_gen);
    write_u64(&mut page, 112, self.max_node_id);
    write_u64(&mut page, 120, self.next_tx_id);
    write_u64(&mut page, 128, self.last_commit_ts);
    write_u64(&mut page, 136, self.schema_cookie);
    write_u64(&mut page, 144, self.wal_primary_head);
    write_u64(&mut page, 152, self.wal_secondary_head);
    page[160] = self.active_wal_region as u8;
    page[161] = self.checkpoint_in_progress as u8;
    // 162..176 reserved, already zero

    let header_crc = crc32c(&page[..DB_HEADER_SIZE - 4]);
    write_u32(&mut page, DB_HEADER_SIZE - 4, header_crc);

    let footer_at = page_size - 4;
    let footer_crc = crc32c(&page[..footer_at]);
    write_u32(&mut page, footer_at, footer_crc);

    page
  }

  /// Advance commit state: WAL heads, allocator high-water marks,
  /// change counter, and commit timestamp.
  pub fn update_for_commit(
    &mut self,
    primary_head: u64,
    secondary_head: u64,
    active_region: WalRegion,
    max_node_id: u64,
    next_tx_id: u64,
  ) {
    self.wal_primary_head = primary_head;
    self.wal_secondary_head = secondary_head;
    self.active_wal_region = active_region;
    self.wal_head = match active_region {
      WalRegion::Primary => primary_head,
      WalRegion::Secondary => secondary_head,
    };
    self.max_node_id = max_node_id;
    self.next_tx_id = next_tx_id;
    self.change_counter += 1;
    self.last_commit_ts = unix_millis();
  }

  /// Swap in a new snapshot after checkpoint: new pointers and generation,
  /// WAL reset to an empty primary region.
  pub fn update_for_compaction(
    &mut self,
    snapshot_start_page: u64,
    snapshot_page_count: u64,
    new_generation: u64,
  ) {
    self.prev_snapshot_gen = self.active_snapshot_gen;
    self.active_snapshot_gen = new_generation;
    self.snapshot_start_page = snapshot_start_page;
    self.snapshot_page_count = snapshot_page_count;
    self.db_size_pages = snapshot_start_page + snapshot_page_count;
    self.wal_head = 0;
    self.wal_tail = 0;
    self.wal_primary_head = 0;
    self.wal_secondary_head = 0;
    self.active_wal_region = WalRegion::Primary;
    self.checkpoint_in_progress = false;
    self.change_counter += 1;
    self.last_commit_ts = unix_millis();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trip() {
    let mut header = DbHeader::new(4096, 16);
    header.update_for_commit(1024, 0, WalRegion::Primary, 42, 7);
    header.snapshot_start_page = 17;
    header.snapshot_page_count = 3;
    header.active_snapshot_gen = 2;

    let page = header.serialize_to_page();
    assert_eq!(page.len(), 4096);
    let parsed = DbHeader::parse(&page).unwrap();
    // Re-serialize to sidestep timestamp comparisons field by field
    assert_eq!(parsed, DbHeader::parse(&parsed.serialize_to_page()).unwrap());
    assert_eq!(parsed.wal_primary_head, 1024);
    assert_eq!(parsed.max_node_id, 42);
    assert_eq!(parsed.next_tx_id, 7);
    assert_eq!(parsed.snapshot_start_page, 17);
    assert_eq!(parsed.change_counter, 1);
  }

  #[test]
  fn rejects_bad_magic() {
    let header = DbHeader::new(4096, 16);
    let mut page = header.serialize_to_page();
    page[0] ^= 0xff;
    assert!(matches!(
      DbHeader::parse(&page),
      Err(RayError::InvalidFormat(_))
    ));
  }

  #[test]
  fn rejects_corrupted_fields() {
    let header = DbHeader::new(4096, 16);
    let mut page = header.serialize_to_page();
    // Flip a byte inside the CRC-covered fixed fields
    page[100] ^= 0x01;
    assert!(matches!(
      DbHeader::parse(&page),
      Err(RayError::ChecksumMismatch { .. })
    ));
  }

  #[test]
  fn rejects_corrupted_footer() {
    let header = DbHeader::new(4096, 16);
    let mut page = header.serialize_to_page();
    // Flip a byte between the fixed fields and the footer CRC
    page[2048] ^= 0x01;
    assert!(matches!(
      DbHeader::parse(&page),
      Err(RayError::ChecksumMismatch { .. })
    ));
  }

  #[test]
  fn rejects_future_min_reader() {
    let mut header = DbHeader::new(4096, 16);
    header.min_reader_version = VERSION_SINGLE_FILE + 1;
    let page = header.serialize_to_page();
    assert!(matches!(
      DbHeader::parse(&page),
      Err(RayError::VersionTooNew { .. })
    ));
  }

  #[test]
  fn compaction_resets_wal_fields() {
    let mut header = DbHeader::new(4096, 16);
    header.update_for_commit(512, 128, WalRegion::Secondary, 10, 4);
    header.checkpoint_in_progress = true;
    header.update_for_compaction(17, 5, 1);
    assert_eq!(header.active_snapshot_gen, 1);
    assert_eq!(header.prev_snapshot_gen, 0);
    assert_eq!(header.wal_primary_head, 0);
    assert_eq!(header.wal_secondary_head, 0);
    assert_eq!(header.active_wal_region, WalRegion::Primary);
    assert!(!header.checkpoint_in_progress);
    assert_eq!(header.db_size_pages, 22);
  }
}
