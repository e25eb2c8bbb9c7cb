//! Database handle: snapshot + delta + WAL glued into a transactional
//! single-writer graph store.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::db::cache::CacheManager;
use crate::db::delta::DeltaState;
use crate::db::hooks::{MvccHooks, VectorStore};
use crate::storage::header::DbHeader;
use crate::storage::pager::FilePager;
use crate::storage::snapshot::reader::Snapshot;
use crate::storage::wal::record::WalOp;
use crate::storage::wal::ring::WalRing;
use crate::types::*;
use crate::util::compression::CompressionOptions;

pub mod cache;
pub mod check;
pub mod checkpoint;
pub mod delta;
pub mod hooks;
pub mod iter;
pub mod mutate;
pub mod open;
pub mod query;
pub mod recovery;
pub mod tx;
pub mod vacuum;

pub use check::CheckReport;
pub use open::{CacheOptions, OpenOptions};
pub use vacuum::{ResizeWalOptions, VacuumOptions};

// ============================================================================
// Catalogs
// ============================================================================

/// One name <-> id catalog (labels, edge types, or property keys)
#[derive(Debug, Default)]
pub struct Catalog {
  by_name: indexmap::IndexMap<String, u32>,
  by_id: hashbrown::HashMap<u32, String>,
}

impl Catalog {
  pub fn insert(&mut self, id: u32, name: &str) {
    self.by_name.insert(name.to_string(), id);
    self.by_id.insert(id, name.to_string());
  }

  pub fn id(&self, name: &str) -> Option<u32> {
    self.by_name.get(name).copied()
  }

  pub fn name(&self, id: u32) -> Option<&str> {
    self.by_id.get(&id).map(|s| s.as_str())
  }

  pub fn len(&self) -> usize {
    self.by_id.len()
  }

  pub fn is_empty(&self) -> bool {
    self.by_id.is_empty()
  }

  /// Names in id order, for feeding the snapshot writer
  pub fn to_map(&self) -> std::collections::HashMap<u32, String> {
    self.by_id.iter().map(|(&id, name)| (id, name.clone())).collect()
  }
}

#[derive(Debug, Default)]
pub struct CatalogSet {
  pub labels: Catalog,
  pub etypes: Catalog,
  pub propkeys: Catalog,
}

// ============================================================================
// Transaction state
// ============================================================================

/// Per-transaction pending state.
///
/// Mutations touch only this buffer; the WAL sees nothing until commit,
/// when `ops` is framed between BEGIN and COMMIT in order.
pub struct TxState {
  pub txid: TxId,
  pub pending: DeltaState,
  pub ops: Vec<WalOp>,
}

impl TxState {
  pub fn new(txid: TxId) -> Self {
    Self {
      txid,
      pending: DeltaState::new(),
      ops: Vec::new(),
    }
  }
}

// ============================================================================
// Checkpoint control
// ============================================================================

/// Background checkpoint state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointPhase {
  Idle,
  Running,
  Merging,
  Completing,
}

pub(crate) struct CheckpointState {
  pub phase: CheckpointPhase,
  /// Held while the secondary region is drained into the reset primary;
  /// commits arriving in this window wait for release
  pub merge_locked: bool,
}

pub(crate) struct CheckpointControl {
  pub state: Mutex<CheckpointState>,
  pub cv: Condvar,
  /// Outcome channel of the most recent background run; drained by
  /// blocking checkpoints and close to surface thread errors
  pub done_rx: Mutex<Option<crossbeam_channel::Receiver<crate::error::Result<u64>>>>,
}

impl CheckpointControl {
  fn new() -> Self {
    Self {
      state: Mutex::new(CheckpointState {
        phase: CheckpointPhase::Idle,
        merge_locked: false,
      }),
      cv: Condvar::new(),
      done_rx: Mutex::new(None),
    }
  }
}

// ============================================================================
// Database handle
// ============================================================================

pub(crate) struct DbInner {
  pub path: PathBuf,
  pub read_only: bool,
  /// Holds the advisory file lock; released on close or final drop
  pub lock_file: Mutex<Option<File>>,

  pub pager: Mutex<FilePager>,
  pub header: RwLock<DbHeader>,
  pub wal: Mutex<WalRing>,
  pub snapshot: RwLock<Option<Arc<Snapshot>>>,
  pub delta: RwLock<DeltaState>,

  pub next_node_id: AtomicU64,
  pub next_label_id: AtomicU32,
  pub next_etype_id: AtomicU32,
  pub next_propkey_id: AtomicU32,
  pub next_tx_id: AtomicU64,

  /// Single writer: at most one open transaction
  pub current_tx: Mutex<Option<TxState>>,
  /// Serializes the commit tail (WAL append through header fsync)
  pub commit_lock: Mutex<()>,

  pub catalogs: RwLock<CatalogSet>,

  pub auto_checkpoint: bool,
  pub checkpoint_threshold: f64,
  pub background_checkpoint: bool,
  pub checkpoint_compression: Option<CompressionOptions>,
  pub cache_snapshot: bool,
  pub checkpoint: CheckpointControl,

  pub cache: Mutex<Option<CacheManager>>,
  pub mvcc_hooks: RwLock<Option<Arc<dyn MvccHooks>>>,
  pub vector_store: RwLock<Option<Arc<dyn VectorStore>>>,
}

/// Handle to an open database.
///
/// Cheap to clone; all clones share one underlying store. The write path is
/// single-writer: one transaction at a time across every clone.
#[derive(Clone)]
pub struct GraphDb {
  pub(crate) inner: Arc<DbInner>,
}

impl GraphDb {
  pub fn path(&self) -> &Path {
    &self.inner.path
  }

  pub fn is_read_only(&self) -> bool {
    self.inner.read_only
  }

  // ==========================================================================
  // ID allocators
  // ==========================================================================

  pub(crate) fn alloc_node_id(&self) -> NodeId {
    self.inner.next_node_id.fetch_add(1, Ordering::SeqCst)
  }

  pub(crate) fn alloc_label_id(&self) -> LabelId {
    self.inner.next_label_id.fetch_add(1, Ordering::SeqCst)
  }

  pub(crate) fn alloc_etype_id(&self) -> ETypeId {
    self.inner.next_etype_id.fetch_add(1, Ordering::SeqCst)
  }

  pub(crate) fn alloc_propkey_id(&self) -> PropKeyId {
    self.inner.next_propkey_id.fetch_add(1, Ordering::SeqCst)
  }

  pub(crate) fn alloc_tx_id(&self) -> TxId {
    self.inner.next_tx_id.fetch_add(1, Ordering::SeqCst)
  }

  // ==========================================================================
  // Collaborator hooks
  // ==========================================================================

  /// Register the MVCC collaborator; the core invokes it at read/write
  /// and transaction boundaries but keeps no version chains itself.
  pub fn set_mvcc_hooks(&self, hooks: Arc<dyn MvccHooks>) {
    *self.inner.mvcc_hooks.write() = Some(hooks);
  }

  /// Register the vector store keyed by PropKeyID
  pub fn set_vector_store(&self, store: Arc<dyn VectorStore>) {
    *self.inner.vector_store.write() = Some(store);
  }

  // ==========================================================================
  // Cache hooks
  // ==========================================================================

  pub fn cache_enabled(&self) -> bool {
    self.inner.cache.lock().is_some()
  }

  pub(crate) fn cache_invalidate_node(&self, node_id: NodeId) {
    if let Some(cache) = self.inner.cache.lock().as_mut() {
      cache.invalidate_node(node_id);
    }
  }

  pub(crate) fn cache_invalidate_edge(&self, src: NodeId, etype: ETypeId, dst: NodeId) {
    if let Some(cache) = self.inner.cache.lock().as_mut() {
      cache.invalidate_edge(src, etype, dst);
    }
  }

  pub(crate) fn cache_invalidate_key(&self, key: &str) {
    if let Some(cache) = self.inner.cache.lock().as_mut() {
      cache.invalidate_key(key);
    }
  }

  pub(crate) fn cache_clear(&self) {
    if let Some(cache) = self.inner.cache.lock().as_mut() {
      cache.clear();
    }
  }

  pub fn cache_stats(&self) -> Option<cache::CacheStats> {
    self.inner.cache.lock().as_ref().map(|c| c.stats())
  }
}

/// True when `path` names a single-file database
pub fn is_single_file_path<P: AsRef<Path>>(path: P) -> bool {
  path
    .as_ref()
    .extension()
    .map(|ext| ext == crate::constants::EXT_RAYDB)
    .unwrap_or(false)
}
