//! Collaborator hooks.
//!
//! The core exposes seams for the MVCC layer and the vector store without
//! depending on either. Both traits are no-ops by default; a registered
//! implementation is invoked at the mutation, read, and transaction
//! boundaries.

use crate::error::Result;
use crate::types::*;

/// Keys the MVCC collaborator tracks for conflict detection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackedKey {
  Node(NodeId),
  Edge {
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
  },
  NodeProp {
    node_id: NodeId,
    key_id: PropKeyId,
  },
  EdgeProp {
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    key_id: PropKeyId,
  },
  Key(String),
}

/// MVCC collaborator interface.
///
/// Edge property values that exist only in a prior snapshot are not
/// back-filled into version chains; `record_write` fires for the change,
/// and the collaborator sees no before-image for them.
pub trait MvccHooks: Send + Sync {
  fn begin_tx(&self, _txid: TxId) {}
  fn commit_tx(&self, _txid: TxId) {}
  fn abort_tx(&self, _txid: TxId) {}
  fn record_read(&self, _txid: TxId, _key: TrackedKey) {}
  fn record_write(&self, _txid: TxId, _key: TrackedKey) {}
}

/// Vector store collaborator, keyed by PropKeyID
pub trait VectorStore: Send + Sync {
  fn insert(&self, node_id: NodeId, key_id: PropKeyId, vector: &[f32]) -> Result<()>;
  fn delete(&self, node_id: NodeId, key_id: PropKeyId) -> Result<()>;
  /// Vector-store fragment maintenance (SEAL_FRAGMENT records)
  fn seal_fragment(&self, _fragment_id: u64) -> Result<()> {
    Ok(())
  }
  /// Vector-store fragment maintenance (COMPACT_FRAGMENTS records)
  fn compact_fragments(&self, _fragment_ids: &[u64]) -> Result<()> {
    Ok(())
  }
}
