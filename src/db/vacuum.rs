//! Vacuum and WAL resizing.
//!
//! Both are offline maintenance operations: they reject while a
//! transaction is open and wait out any running checkpoint. Vacuum slides
//! the live snapshot down next to the WAL area and truncates the file;
//! resize moves the snapshot to make room for the new WAL extent.

use tracing::debug;

use crate::constants::WAL_MIN_PAGES;
use crate::db::GraphDb;
use crate::error::{RayError, Result};
use crate::storage::pager::pages_to_store;
use crate::storage::wal::ring::WalRing;

/// Options for `vacuum`
#[derive(Debug, Clone)]
pub struct VacuumOptions {
  /// Shrink an empty WAL region down to the floor
  pub shrink_wal: bool,
  /// Floor for WAL shrinking, in bytes
  pub min_wal_size: Option<u64>,
}

impl Default for VacuumOptions {
  fn default() -> Self {
    Self {
      shrink_wal: true,
      min_wal_size: None,
    }
  }
}

/// Options for `resize_wal`
#[derive(Debug, Clone)]
pub struct ResizeWalOptions {
  /// Permit shrinking the WAL region
  pub allow_shrink: bool,
  /// Checkpoint first so the WAL is empty (default true)
  pub checkpoint: bool,
}

impl Default for ResizeWalOptions {
  fn default() -> Self {
    Self {
      allow_shrink: false,
      checkpoint: true,
    }
  }
}

impl GraphDb {
  fn require_offline(&self) -> Result<()> {
    if self.inner.read_only {
      return Err(RayError::ReadOnly);
    }
    if self.has_transaction() {
      return Err(RayError::TransactionInProgress);
    }
    self.wait_for_checkpoint_idle();
    Ok(())
  }

  /// Reclaim file space: move the snapshot down against the WAL area,
  /// optionally shrink an empty WAL, and truncate the tail of the file.
  pub fn vacuum(&self, options: Option<VacuumOptions>) -> Result<()> {
    self.require_offline()?;
    let options = options.unwrap_or_default();

    let mut header = self.inner.header.read().clone();
    let page_size = header.page_size as u64;

    let min_wal_pages = options
      .min_wal_size
      .map(|bytes| bytes.div_ceil(page_size))
      .unwrap_or(WAL_MIN_PAGES)
      .max(WAL_MIN_PAGES);

    let wal_empty = {
      let stats = self.inner.wal.lock().stats();
      stats.used() == 0
    };
    let shrink_wal = options.shrink_wal && wal_empty && header.wal_page_count > min_wal_pages;

    if header.snapshot_page_count == 0 && !shrink_wal {
      return Ok(());
    }

    if shrink_wal {
      header.wal_page_count = min_wal_pages;
    }
    let wal_end = header.wal_start_page + header.wal_page_count;

    if header.snapshot_page_count > 0 && header.snapshot_start_page != wal_end {
      let mut pager = self.inner.pager.lock();
      pager.relocate_area(header.snapshot_start_page, header.snapshot_page_count, wal_end)?;
      header.snapshot_start_page = wal_end;
    }

    header.db_size_pages = if header.snapshot_page_count > 0 {
      header.snapshot_start_page + header.snapshot_page_count
    } else {
      wal_end
    };
    header.change_counter += 1;

    {
      let mut pager = self.inner.pager.lock();
      pager.write_page(0, &header.serialize_to_page())?;
      pager.sync()?;
      pager.truncate_pages(header.db_size_pages)?;
    }

    let new_ring = WalRing::from_header(&header);
    *self.inner.header.write() = header;
    *self.inner.wal.lock() = new_ring;

    self.reload_snapshot()?;
    self.cache_clear();
    debug!("vacuum complete");
    Ok(())
  }

  /// Resize the WAL region. Runs a checkpoint first (unless disabled) so
  /// the WAL is empty, relocates the snapshot to the new WAL end, and
  /// rebuilds the ring.
  pub fn resize_wal(&self, wal_size_bytes: usize, options: Option<ResizeWalOptions>) -> Result<()> {
    self.require_offline()?;
    let options = options.unwrap_or_default();

    if wal_size_bytes == 0 {
      return Err(RayError::Internal("wal size must be positive".to_string()));
    }

    if options.checkpoint {
      self.checkpoint()?;
    }

    let mut header = self.inner.header.read().clone();
    let wal_used = self.inner.wal.lock().stats().used();
    if wal_used != 0 {
      return Err(RayError::Internal(
        "wal must be empty before resize; run checkpoint first".to_string(),
      ));
    }

    let new_wal_page_count = pages_to_store(wal_size_bytes, header.page_size as usize);
    if new_wal_page_count < WAL_MIN_PAGES {
      return Err(RayError::Internal(format!(
        "wal size too small: minimum is {WAL_MIN_PAGES} pages"
      )));
    }
    if new_wal_page_count < header.wal_page_count && !options.allow_shrink {
      return Err(RayError::Internal(
        "wal shrink requires allow_shrink".to_string(),
      ));
    }
    if new_wal_page_count == header.wal_page_count {
      return Ok(());
    }

    let old_db_size = header.db_size_pages;
    let new_wal_end = header.wal_start_page + new_wal_page_count;

    if header.snapshot_page_count > 0 && header.snapshot_start_page != new_wal_end {
      // relocate_area copies back-to-front when growing, so an overlapping
      // move cannot clobber unread source pages
      let mut pager = self.inner.pager.lock();
      pager.relocate_area(
        header.snapshot_start_page,
        header.snapshot_page_count,
        new_wal_end,
      )?;
      header.snapshot_start_page = new_wal_end;
    }

    header.wal_page_count = new_wal_page_count;
    header.wal_head = 0;
    header.wal_tail = 0;
    header.wal_primary_head = 0;
    header.wal_secondary_head = 0;
    header.active_wal_region = crate::storage::header::WalRegion::Primary;
    header.checkpoint_in_progress = false;
    header.db_size_pages = if header.snapshot_page_count > 0 {
      header.snapshot_start_page + header.snapshot_page_count
    } else {
      new_wal_end
    };
    header.change_counter += 1;

    {
      let mut pager = self.inner.pager.lock();
      pager.write_page(0, &header.serialize_to_page())?;
      pager.sync()?;
      if header.db_size_pages < old_db_size {
        pager.truncate_pages(header.db_size_pages)?;
      }
    }

    let new_ring = WalRing::from_header(&header);
    *self.inner.header.write() = header;
    *self.inner.wal.lock() = new_ring;

    self.reload_snapshot()?;
    self.cache_clear();
    debug!(pages = new_wal_page_count, "wal resized");
    Ok(())
  }
}
