//! Open, create, and close single-file databases.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::constants::*;
use crate::db::cache::CacheManager;
use crate::db::recovery::{
  extract_committed_transactions, prune_absorbed, replay_committed, ReplayState,
};
use crate::db::{CatalogSet, CheckpointControl, DbInner, GraphDb};
use crate::error::{RayError, Result};
use crate::storage::header::DbHeader;
use crate::storage::manifest::validate_db_path;
use crate::storage::pager::{is_valid_page_size, pages_to_store, FilePager};
use crate::storage::snapshot::reader::{ParseOptions, Snapshot};
use crate::storage::wal::ring::WalRing;
use crate::util::compression::CompressionOptions;

// ============================================================================
// Options
// ============================================================================

/// Cache collaborator configuration
#[derive(Debug, Clone)]
pub struct CacheOptions {
  /// Entries per cache (traversal, properties, keys)
  pub capacity: usize,
}

impl Default for CacheOptions {
  fn default() -> Self {
    Self { capacity: 1024 }
  }
}

/// Options for opening a database
#[derive(Debug, Clone)]
pub struct OpenOptions {
  pub read_only: bool,
  pub create_if_missing: bool,
  /// Acquire the advisory file lock (exclusive for writers, shared for
  /// read-only handles)
  pub lock_file: bool,
  /// Page size for newly created files; existing files keep theirs
  pub page_size: usize,
  /// WAL size in bytes for newly created files
  pub wal_size: usize,
  /// Trigger a checkpoint when primary WAL usage crosses the threshold
  pub auto_checkpoint: bool,
  /// Primary usage fraction (0..1) that triggers auto-checkpoint
  pub checkpoint_threshold: f64,
  /// Run auto-checkpoints on a background thread via the secondary region
  pub background_checkpoint: bool,
  /// Compression for checkpoint snapshots
  pub checkpoint_compression: Option<CompressionOptions>,
  /// Keep decompressed snapshot sections cached in memory
  pub cache_snapshot: bool,
  /// Cache collaborator; None disables caching
  pub cache: Option<CacheOptions>,
}

impl Default for OpenOptions {
  fn default() -> Self {
    Self {
      read_only: false,
      create_if_missing: true,
      lock_file: true,
      page_size: DEFAULT_PAGE_SIZE,
      wal_size: WAL_DEFAULT_SIZE,
      auto_checkpoint: true,
      checkpoint_threshold: DEFAULT_CHECKPOINT_THRESHOLD,
      background_checkpoint: true,
      checkpoint_compression: None,
      cache_snapshot: true,
      cache: None,
    }
  }
}

impl OpenOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn read_only(mut self, value: bool) -> Self {
    self.read_only = value;
    self
  }

  pub fn create_if_missing(mut self, value: bool) -> Self {
    self.create_if_missing = value;
    self
  }

  pub fn lock_file(mut self, value: bool) -> Self {
    self.lock_file = value;
    self
  }

  pub fn page_size(mut self, value: usize) -> Self {
    self.page_size = value;
    self
  }

  pub fn wal_size(mut self, value: usize) -> Self {
    self.wal_size = value;
    self
  }

  pub fn auto_checkpoint(mut self, value: bool) -> Self {
    self.auto_checkpoint = value;
    self
  }

  pub fn checkpoint_threshold(mut self, value: f64) -> Self {
    self.checkpoint_threshold = value.clamp(0.0, 1.0);
    self
  }

  pub fn background_checkpoint(mut self, value: bool) -> Self {
    self.background_checkpoint = value;
    self
  }

  pub fn checkpoint_compression(mut self, value: Option<CompressionOptions>) -> Self {
    self.checkpoint_compression = value;
    self
  }

  pub fn cache_snapshot(mut self, value: bool) -> Self {
    self.cache_snapshot = value;
    self
  }

  pub fn cache(mut self, value: Option<CacheOptions>) -> Self {
    self.cache = value;
    self
  }
}

// ============================================================================
// Open
// ============================================================================

/// Read and validate page 0 without committing to a page size up front
fn read_header_from_file(path: &Path) -> Result<DbHeader> {
  let mut file = File::open(path)?;
  let file_len = file.metadata()?.len() as usize;
  if file_len < MIN_PAGE_SIZE {
    return Err(RayError::InvalidFormat(format!(
      "file too small to hold a header: {file_len} bytes"
    )));
  }

  let mut prefix = vec![0u8; MIN_PAGE_SIZE.min(file_len)];
  file.read_exact(&mut prefix)?;

  // The declared page size decides how much of page 0 the footer CRC covers
  let declared = crate::util::binary::read_u32(&prefix, 16) as usize;
  if !is_valid_page_size(declared) {
    // Let parse produce the proper error (it also checks the magic first)
    return DbHeader::parse(&prefix);
  }
  if declared <= prefix.len() {
    return DbHeader::parse(&prefix[..declared.max(MIN_PAGE_SIZE)]);
  }

  let mut page = prefix;
  page.resize(declared, 0);
  file.read_exact(&mut page[MIN_PAGE_SIZE..])?;
  DbHeader::parse(&page)
}

fn acquire_lock(path: &Path, read_only: bool) -> Result<File> {
  let file = File::open(path)?;
  let locked = if read_only {
    fs2::FileExt::try_lock_shared(&file)
  } else {
    fs2::FileExt::try_lock_exclusive(&file)
  };
  locked.map_err(|e| RayError::LockContention(format!("{}: {e}", path.display())))?;
  Ok(file)
}

impl GraphDb {
  /// Open or create a single-file database
  pub fn open<P: AsRef<Path>>(path: P, options: OpenOptions) -> Result<GraphDb> {
    let path = path.as_ref();
    validate_db_path(path)?;

    if !is_valid_page_size(options.page_size) {
      return Err(RayError::InvalidFormat(format!(
        "unsupported page size {}",
        options.page_size
      )));
    }

    let exists = path.exists();
    if !exists {
      if !options.create_if_missing {
        return Err(RayError::Io(std::io::Error::new(
          std::io::ErrorKind::NotFound,
          format!("database does not exist at {}", path.display()),
        )));
      }
      if options.read_only {
        return Err(RayError::ReadOnly);
      }
    }

    let (mut pager, header, is_new) = if exists {
      let header = read_header_from_file(path)?;
      let pager = FilePager::open(path, header.page_size as usize, options.read_only)?;
      (pager, header, false)
    } else {
      let mut pager = FilePager::create(path, options.page_size)?;
      let wal_page_count = pages_to_store(options.wal_size, options.page_size);
      let header = DbHeader::new(options.page_size as u32, wal_page_count);
      pager.write_page(0, &header.serialize_to_page())?;
      pager.allocate_pages(wal_page_count)?;
      pager.sync()?;
      (pager, header, true)
    };

    let lock_file = if options.lock_file {
      Some(acquire_lock(path, options.read_only)?)
    } else {
      None
    };

    let ring = WalRing::from_header(&header);

    // Allocators seeded from the header, refined by snapshot and replay
    let mut next_node_id = INITIAL_NODE_ID.max(header.max_node_id + 1);
    let mut next_label_id = INITIAL_LABEL_ID;
    let mut next_etype_id = INITIAL_ETYPE_ID;
    let mut next_propkey_id = INITIAL_PROPKEY_ID;

    let mut catalogs = CatalogSet::default();

    // Map and parse the snapshot; a corrupt snapshot fails the open
    let snapshot = if header.snapshot_page_count > 0 {
      let mmap = pager.mmap_whole()?;
      let offset = (header.snapshot_start_page * header.page_size as u64) as usize;
      let parse_options = ParseOptions {
        cache_decompressed: options.cache_snapshot,
        ..ParseOptions::default()
      };
      let snap = Snapshot::parse(mmap, offset, &parse_options)?;

      for id in 1..=snap.header.num_labels as u32 {
        if let Some(name) = snap.label_name(id) {
          catalogs.labels.insert(id, &name);
        }
      }
      for id in 1..=snap.header.num_etypes as u32 {
        if let Some(name) = snap.etype_name(id) {
          catalogs.etypes.insert(id, &name);
        }
      }
      for id in 1..=snap.header.num_propkeys as u32 {
        if let Some(name) = snap.propkey_name(id) {
          catalogs.propkeys.insert(id, &name);
        }
      }

      next_node_id = next_node_id.max(snap.header.max_node_id + 1);
      next_label_id = next_label_id.max(snap.header.num_labels as u32 + 1);
      next_etype_id = next_etype_id.max(snap.header.num_etypes as u32 + 1);
      next_propkey_id = next_propkey_id.max(snap.header.num_propkeys as u32 + 1);

      Some(Arc::new(snap))
    } else {
      None
    };

    // Replay committed WAL transactions into the delta
    let mut delta = crate::db::delta::DeltaState::new();
    let mut replay = ReplayState::new(next_node_id, next_label_id, next_etype_id, next_propkey_id);
    let mut header = header;

    if !is_new {
      let records = ring.records_for_recovery(&mut pager)?;
      if !records.is_empty() {
        debug!(count = records.len(), "replaying wal records");
        let committed = extract_committed_transactions(records);
        replay_committed(
          committed,
          &mut delta,
          &mut catalogs,
          &mut replay,
          snapshot.as_deref(),
        );
        // Records carried over by a background checkpoint may predate the
        // snapshot that absorbed them
        if let Some(snap) = snapshot.as_deref() {
          prune_absorbed(&mut delta, snap);
        }
      }

      if header.checkpoint_in_progress {
        // Both regions were already replayed above; clear the flag so the
        // next open does not redo this
        warn!("clearing interrupted checkpoint flag");
        header.checkpoint_in_progress = false;
        if !options.read_only {
          pager.write_page(0, &header.serialize_to_page())?;
          pager.sync()?;
        }
      }
    }

    let next_tx_id = header.next_tx_id.max(replay.max_txid + 1).max(INITIAL_TX_ID);
    let cache = options.cache.as_ref().map(|o| CacheManager::new(o.capacity));

    Ok(GraphDb {
      inner: Arc::new(DbInner {
        path: path.to_path_buf(),
        read_only: options.read_only,
        lock_file: Mutex::new(lock_file),
        pager: Mutex::new(pager),
        header: RwLock::new(header),
        wal: Mutex::new(ring),
        snapshot: RwLock::new(snapshot),
        delta: RwLock::new(delta),
        next_node_id: AtomicU64::new(replay.next_node_id),
        next_label_id: AtomicU32::new(replay.next_label_id),
        next_etype_id: AtomicU32::new(replay.next_etype_id),
        next_propkey_id: AtomicU32::new(replay.next_propkey_id),
        next_tx_id: AtomicU64::new(next_tx_id),
        current_tx: Mutex::new(None),
        commit_lock: Mutex::new(()),
        catalogs: RwLock::new(catalogs),
        auto_checkpoint: options.auto_checkpoint,
        checkpoint_threshold: options.checkpoint_threshold,
        background_checkpoint: options.background_checkpoint,
        checkpoint_compression: options.checkpoint_compression,
        cache_snapshot: options.cache_snapshot,
        checkpoint: CheckpointControl::new(),
        cache: Mutex::new(cache),
        mvcc_hooks: RwLock::new(None),
        vector_store: RwLock::new(None),
      }),
    })
  }

  /// Flush buffered WAL pages, persist the header, fsync, and release the
  /// advisory file lock.
  ///
  /// Waits for a running background checkpoint first. Another handle may
  /// open the file afterwards.
  pub fn close(&self) -> Result<()> {
    self.wait_for_checkpoint_idle();
    self.drain_background_result();

    if !self.inner.read_only {
      let mut pager = self.inner.pager.lock();
      let mut wal = self.inner.wal.lock();
      wal.flush(&mut pager)?;

      let mut header = self.inner.header.write();
      header.update_for_commit(
        wal.primary_head(),
        wal.secondary_head(),
        wal.active_region(),
        self.inner.next_node_id.load(Ordering::SeqCst).saturating_sub(1),
        self.inner.next_tx_id.load(Ordering::SeqCst),
      );
      pager.write_page(0, &header.serialize_to_page())?;
      pager.sync()?;
    }

    // Dropping the lock handle releases the advisory lock
    self.inner.lock_file.lock().take();
    Ok(())
  }
}
