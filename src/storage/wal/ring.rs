//! Dual-region circular WAL buffer.
//!
//! The WAL area is split into a primary region (first 75%) and a secondary
//! region (the rest). Exactly one region is active for writes. A background
//! checkpoint flips writes to the secondary while the primary drains into a
//! new snapshot, then the secondary's records are re-emitted into the reset
//! primary.
//!
//! Record bytes are accumulated in a page-indexed write buffer and flushed
//! as whole pages, so many small records cost one page write each flush.
//! The buffer must be flushed before any header referencing its pages is
//! committed.

use std::collections::HashMap;

use crate::constants::*;
use crate::error::{RayError, Result};
use crate::storage::header::{DbHeader, WalRegion};
use crate::storage::pager::FilePager;
use crate::storage::wal::record::{decode_frame, DecodedFrame, WalRecord};
use crate::types::WalStats;

pub struct WalRing {
  wal_start_page: u64,
  page_size: usize,
  primary_capacity: usize,
  secondary_capacity: usize,
  primary_head: usize,
  primary_tail: usize,
  secondary_head: usize,
  active: WalRegion,
  /// Dirty page buffers keyed by absolute page number
  pending_pages: HashMap<u64, Vec<u8>>,
}

fn region_split(total: usize) -> (usize, usize) {
  let primary = (total * WAL_PRIMARY_NUMERATOR / WAL_PRIMARY_DENOMINATOR)
    & !(WAL_RECORD_ALIGNMENT - 1);
  (primary, total - primary)
}

impl WalRing {
  /// Rebuild ring state from a validated header
  pub fn from_header(header: &DbHeader) -> Self {
    let total = (header.wal_page_count * header.page_size as u64) as usize;
    let (primary_capacity, secondary_capacity) = region_split(total);
    Self {
      wal_start_page: header.wal_start_page,
      page_size: header.page_size as usize,
      primary_capacity,
      secondary_capacity,
      primary_head: header.wal_primary_head as usize,
      primary_tail: header.wal_tail as usize,
      secondary_head: header.wal_secondary_head as usize,
      active: header.active_wal_region,
      pending_pages: HashMap::new(),
    }
  }

  pub fn active_region(&self) -> WalRegion {
    self.active
  }

  pub fn primary_head(&self) -> u64 {
    self.primary_head as u64
  }

  pub fn primary_tail(&self) -> u64 {
    self.primary_tail as u64
  }

  pub fn secondary_head(&self) -> u64 {
    self.secondary_head as u64
  }

  pub fn primary_capacity(&self) -> usize {
    self.primary_capacity
  }

  pub fn secondary_capacity(&self) -> usize {
    self.secondary_capacity
  }

  pub fn stats(&self) -> WalStats {
    let primary_used = if self.primary_head < self.primary_tail {
      self.primary_capacity - self.primary_tail + self.primary_head
    } else {
      self.primary_head - self.primary_tail
    };
    WalStats {
      primary_used,
      primary_capacity: self.primary_capacity,
      secondary_used: self.secondary_head,
      secondary_capacity: self.secondary_capacity,
      active_region: self.active as u8,
    }
  }

  /// Whether the active region can take `bytes` more record bytes,
  /// accounting for the wrap-around skip marker in the primary
  pub fn can_fit(&self, bytes: usize) -> bool {
    match self.active {
      WalRegion::Primary => {
        let wrapped = self.primary_tail > 0 && self.primary_head < self.primary_tail;
        if wrapped {
          self.primary_tail - self.primary_head >= bytes
        } else {
          self
            .primary_capacity
            .saturating_sub(self.primary_head + WAL_SKIP_MARKER_SIZE)
            >= bytes
            || self.primary_tail >= bytes
        }
      }
      WalRegion::Secondary => self.secondary_capacity - self.secondary_head >= bytes,
    }
  }

  /// Fraction of the active region the given extra bytes would bring it to
  pub fn projected_usage(&self, extra: usize) -> f64 {
    match self.active {
      WalRegion::Primary => {
        (self.stats().primary_used + extra) as f64 / self.primary_capacity.max(1) as f64
      }
      WalRegion::Secondary => {
        (self.secondary_head + extra) as f64 / self.secondary_capacity.max(1) as f64
      }
    }
  }

  // ==========================================================================
  // Region transitions
  // ==========================================================================

  /// O(1): divert subsequent writes to the secondary region
  pub fn switch_to_secondary(&mut self) {
    self.active = WalRegion::Secondary;
  }

  /// O(1): return to the primary region, optionally resetting it
  pub fn switch_to_primary(&mut self, reset_primary: bool) {
    self.active = WalRegion::Primary;
    if reset_primary {
      self.primary_head = 0;
      self.primary_tail = 0;
    }
  }

  /// Empty both regions and drop buffered pages
  pub fn reset(&mut self) {
    self.primary_head = 0;
    self.primary_tail = 0;
    self.secondary_head = 0;
    self.active = WalRegion::Primary;
    self.pending_pages.clear();
  }

  // ==========================================================================
  // Writing
  // ==========================================================================

  /// Append a record to the active region.
  ///
  /// In the primary region, wrap-around emits a skip marker and restarts at
  /// offset 0 when the tail has reclaimed enough space; the secondary never
  /// wraps. Returns `WalBufferFull` when the record cannot fit.
  pub fn write_record(&mut self, record: &WalRecord, pager: &mut FilePager) -> Result<()> {
    let bytes = record.encode();
    self.write_encoded(&bytes, pager)
  }

  fn write_encoded(&mut self, bytes: &[u8], pager: &mut FilePager) -> Result<()> {
    let need = bytes.len();
    match self.active {
      WalRegion::Primary => {
        let wrapped = self.primary_tail > 0 && self.primary_head < self.primary_tail;
        if wrapped {
          if self.primary_head + need > self.primary_tail {
            return Err(RayError::WalBufferFull {
              needed: need,
              available: self.primary_tail - self.primary_head,
            });
          }
        } else if self.primary_head + need + WAL_SKIP_MARKER_SIZE > self.primary_capacity {
          // Wrap only when the reclaimed front can hold the record
          if need <= self.primary_tail {
            let marker = WalRecord::encode_skip_marker();
            self.write_bytes(self.primary_head, &marker, pager)?;
            self.primary_head = 0;
          } else {
            return Err(RayError::WalBufferFull {
              needed: need,
              available: self
                .primary_capacity
                .saturating_sub(self.primary_head + WAL_SKIP_MARKER_SIZE),
            });
          }
        }
        self.write_bytes(self.primary_head, bytes, pager)?;
        self.primary_head += need;
      }
      WalRegion::Secondary => {
        if self.secondary_head + need > self.secondary_capacity {
          return Err(RayError::WalBufferFull {
            needed: need,
            available: self.secondary_capacity - self.secondary_head,
          });
        }
        self.write_bytes(self.primary_capacity + self.secondary_head, bytes, pager)?;
        self.secondary_head += need;
      }
    }
    Ok(())
  }

  /// Copy bytes into the page write buffer at a WAL-area byte offset
  fn write_bytes(&mut self, area_offset: usize, bytes: &[u8], pager: &mut FilePager) -> Result<()> {
    let mut written = 0usize;
    while written < bytes.len() {
      let abs = area_offset + written;
      let page_no = self.wal_start_page + (abs / self.page_size) as u64;
      let page_off = abs % self.page_size;
      let chunk = (self.page_size - page_off).min(bytes.len() - written);

      let page = match self.pending_pages.entry(page_no) {
        std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
        std::collections::hash_map::Entry::Vacant(entry) => {
          // First touch of this page: load so partial overwrites keep the
          // bytes already on disk
          let loaded = pager.read_page(page_no)?;
          entry.insert(loaded)
        }
      };
      page[page_off..page_off + chunk].copy_from_slice(&bytes[written..written + chunk]);
      written += chunk;
    }
    Ok(())
  }

  /// Read bytes at a WAL-area offset, preferring buffered pages
  fn read_bytes(&self, area_offset: usize, len: usize, pager: &mut FilePager) -> Result<Vec<u8>> {
    let mut out = vec![0u8; len];
    let mut read = 0usize;
    while read < len {
      let abs = area_offset + read;
      let page_no = self.wal_start_page + (abs / self.page_size) as u64;
      let page_off = abs % self.page_size;
      let chunk = (self.page_size - page_off).min(len - read);

      if let Some(page) = self.pending_pages.get(&page_no) {
        out[read..read + chunk].copy_from_slice(&page[page_off..page_off + chunk]);
      } else {
        let page = pager.read_page(page_no)?;
        out[read..read + chunk].copy_from_slice(&page[page_off..page_off + chunk]);
      }
      read += chunk;
    }
    Ok(out)
  }

  /// Write all dirty pages through the pager
  pub fn flush(&mut self, pager: &mut FilePager) -> Result<()> {
    let mut pages: Vec<u64> = self.pending_pages.keys().copied().collect();
    pages.sort_unstable();
    for page_no in pages {
      let buf = &self.pending_pages[&page_no];
      pager.write_page(page_no, buf)?;
    }
    self.pending_pages.clear();
    Ok(())
  }

  /// Flush and fsync
  pub fn sync(&mut self, pager: &mut FilePager) -> Result<()> {
    self.flush(pager)?;
    pager.sync()
  }

  // ==========================================================================
  // Scanning
  // ==========================================================================

  /// Walk a region's records, honoring skip markers and stopping at the
  /// first invalid or truncated frame.
  pub fn scan_region(&self, region: WalRegion, pager: &mut FilePager) -> Result<Vec<WalRecord>> {
    let (base, capacity, head, tail) = match region {
      WalRegion::Primary => (0, self.primary_capacity, self.primary_head, self.primary_tail),
      WalRegion::Secondary => (
        self.primary_capacity,
        self.secondary_capacity,
        self.secondary_head,
        0,
      ),
    };

    if head == 0 && tail == 0 {
      return Ok(Vec::new());
    }

    let data = self.read_bytes(base, capacity, pager)?;
    let wrapped_layout = head < tail;
    let mut records = Vec::new();
    let mut cursor = tail;
    let mut wrapped = false;

    loop {
      let limit = if wrapped || !wrapped_layout { head } else { capacity };
      if cursor >= limit {
        if wrapped_layout && !wrapped {
          wrapped = true;
          cursor = 0;
          continue;
        }
        break;
      }

      match decode_frame(&data, cursor) {
        DecodedFrame::Record { record, advance } => {
          records.push(record);
          cursor += advance;
        }
        DecodedFrame::Skip => {
          if wrapped_layout && !wrapped {
            wrapped = true;
            cursor = 0;
          } else {
            break;
          }
        }
        DecodedFrame::End => break,
      }
    }

    Ok(records)
  }

  /// Records to replay on open: the primary region, plus the secondary when
  /// it holds commits from an interrupted background checkpoint.
  pub fn records_for_recovery(&self, pager: &mut FilePager) -> Result<Vec<WalRecord>> {
    let mut records = self.scan_region(WalRegion::Primary, pager)?;
    if self.secondary_head > 0 {
      records.extend(self.scan_region(WalRegion::Secondary, pager)?);
    }
    Ok(records)
  }

  /// End of background checkpoint: re-emit the secondary's records into a
  /// freshly reset primary region. Valid because the checkpoint has already
  /// absorbed every record the primary held. Returns the carried records so
  /// the caller can rebuild its in-memory view of them.
  pub fn merge_secondary_into_primary(&mut self, pager: &mut FilePager) -> Result<Vec<WalRecord>> {
    let carried = self.scan_region(WalRegion::Secondary, pager)?;

    self.primary_head = 0;
    self.primary_tail = 0;
    self.secondary_head = 0;
    self.active = WalRegion::Primary;

    for record in &carried {
      self.write_record(record, pager)?;
    }
    self.flush(pager)?;
    Ok(carried)
  }

  #[cfg(test)]
  pub(crate) fn force_primary_tail(&mut self, tail: usize) {
    self.primary_tail = tail;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::wal::record::WalOp;
  use tempfile::tempdir;

  fn setup(wal_pages: u64) -> (tempfile::TempDir, FilePager, WalRing) {
    let dir = tempdir().unwrap();
    let mut pager = FilePager::create(dir.path().join("wal.raydb"), 4096).unwrap();
    pager.allocate_pages(1 + wal_pages).unwrap();
    let header = DbHeader::new(4096, wal_pages);
    let ring = WalRing::from_header(&header);
    (dir, pager, ring)
  }

  fn commit_batch(txid: u64, node_id: u64) -> Vec<WalRecord> {
    vec![
      WalRecord::new(txid, WalOp::Begin),
      WalRecord::new(
        txid,
        WalOp::CreateNode {
          node_id,
          key: Some(format!("n{node_id}")),
        },
      ),
      WalRecord::new(txid, WalOp::Commit),
    ]
  }

  #[test]
  fn write_flush_scan_round_trip() {
    let (_dir, mut pager, mut ring) = setup(16);
    for record in commit_batch(1, 10) {
      ring.write_record(&record, &mut pager).unwrap();
    }
    ring.flush(&mut pager).unwrap();

    let records = ring.scan_region(WalRegion::Primary, &mut pager).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].op, WalOp::Begin);
    assert_eq!(records[2].op, WalOp::Commit);
  }

  #[test]
  fn scan_reads_unflushed_pages() {
    let (_dir, mut pager, mut ring) = setup(16);
    for record in commit_batch(1, 10) {
      ring.write_record(&record, &mut pager).unwrap();
    }
    // No flush: scan must still see buffered pages
    let records = ring.scan_region(WalRegion::Primary, &mut pager).unwrap();
    assert_eq!(records.len(), 3);
  }

  #[test]
  fn primary_full_without_reclaimed_tail() {
    let (_dir, mut pager, mut ring) = setup(16);
    let record = WalRecord::new(
      1,
      WalOp::SetNodeProp {
        node_id: 1,
        key_id: 1,
        value: PropValueBig::make(),
      },
    );
    let mut wrote = 0usize;
    let err = loop {
      match ring.write_record(&record, &mut pager) {
        Ok(()) => wrote += 1,
        Err(e) => break e,
      }
    };
    assert!(wrote > 0);
    assert!(matches!(err, RayError::WalBufferFull { .. }));
  }

  // Large string payload helper to fill regions quickly
  struct PropValueBig;
  impl PropValueBig {
    fn make() -> crate::types::PropValue {
      crate::types::PropValue::String("x".repeat(4000))
    }
  }

  #[test]
  fn secondary_never_wraps() {
    let (_dir, mut pager, mut ring) = setup(16);
    ring.switch_to_secondary();
    let record = WalRecord::new(
      1,
      WalOp::SetNodeProp {
        node_id: 1,
        key_id: 1,
        value: PropValueBig::make(),
      },
    );
    let err = loop {
      if let Err(e) = ring.write_record(&record, &mut pager) {
        break e;
      }
    };
    assert!(matches!(err, RayError::WalBufferFull { .. }));
    // Capacity never exceeded
    assert!(ring.secondary_head() as usize <= ring.secondary_capacity());
  }

  #[test]
  fn primary_wraps_over_reclaimed_tail() {
    let (_dir, mut pager, mut ring) = setup(16);
    let record = WalRecord::new(
      1,
      WalOp::SetNodeProp {
        node_id: 1,
        key_id: 1,
        value: PropValueBig::make(),
      },
    );
    // Fill until full
    let mut count = 0usize;
    while ring.write_record(&record, &mut pager).is_ok() {
      count += 1;
    }
    // Pretend a checkpoint reclaimed the first half of the records; the
    // tail must sit on a record boundary
    let reclaim = record.encoded_len() * (count / 2);
    ring.force_primary_tail(reclaim);
    // Next write must emit a skip marker and land at offset 0
    ring.write_record(&record, &mut pager).unwrap();
    assert!((ring.primary_head() as usize) < reclaim);

    let records = ring.scan_region(WalRegion::Primary, &mut pager).unwrap();
    // Scan starts at the tail, follows the skip marker at the old head, and
    // picks up the wrapped record at the front
    assert_eq!(records.len(), count - count / 2 + 1);
    assert_eq!(records.last().unwrap().op, record.op);
  }

  #[test]
  fn merge_carries_secondary_records_into_primary() {
    let (_dir, mut pager, mut ring) = setup(16);
    for record in commit_batch(1, 10) {
      ring.write_record(&record, &mut pager).unwrap();
    }
    ring.flush(&mut pager).unwrap();

    ring.switch_to_secondary();
    for record in commit_batch(2, 11) {
      ring.write_record(&record, &mut pager).unwrap();
    }
    ring.flush(&mut pager).unwrap();

    ring.merge_secondary_into_primary(&mut pager).unwrap();
    assert_eq!(ring.active_region(), WalRegion::Primary);
    assert_eq!(ring.secondary_head(), 0);

    let records = ring.scan_region(WalRegion::Primary, &mut pager).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].txid, 2);
  }

  #[test]
  fn recovery_includes_secondary_when_nonempty() {
    let (_dir, mut pager, mut ring) = setup(16);
    for record in commit_batch(1, 10) {
      ring.write_record(&record, &mut pager).unwrap();
    }
    ring.switch_to_secondary();
    for record in commit_batch(2, 11) {
      ring.write_record(&record, &mut pager).unwrap();
    }
    ring.flush(&mut pager).unwrap();

    let records = ring.records_for_recovery(&mut pager).unwrap();
    assert_eq!(records.len(), 6);
    assert_eq!(records[0].txid, 1);
    assert_eq!(records[3].txid, 2);
  }

  #[test]
  fn stats_track_usage() {
    let (_dir, mut pager, mut ring) = setup(16);
    assert_eq!(ring.stats().used(), 0);
    for record in commit_batch(1, 10) {
      ring.write_record(&record, &mut pager).unwrap();
    }
    let stats = ring.stats();
    assert!(stats.primary_used > 0);
    assert_eq!(stats.secondary_used, 0);
    assert!(stats.primary_usage() > 0.0 && stats.primary_usage() < 1.0);
  }
}
