//! WAL recovery: committed-transaction extraction and replay.
//!
//! On open, the WAL regions are scanned and only transactions that reached
//! COMMIT are replayed into the delta, using the same apply logic the
//! commit path uses. A BEGIN without COMMIT is discarded; ROLLBACK erases
//! any pending records for its transaction.

use hashbrown::HashMap;
use tracing::debug;

use crate::db::delta::DeltaState;
use crate::db::CatalogSet;
use crate::storage::snapshot::reader::Snapshot;
use crate::storage::wal::record::{WalOp, WalRecord};
use crate::types::*;

/// Allocator high-water marks rebuilt during replay
#[derive(Debug, Clone, Copy)]
pub struct ReplayState {
  pub next_node_id: NodeId,
  pub next_label_id: LabelId,
  pub next_etype_id: ETypeId,
  pub next_propkey_id: PropKeyId,
  pub max_txid: TxId,
}

impl ReplayState {
  pub fn new(
    next_node_id: NodeId,
    next_label_id: LabelId,
    next_etype_id: ETypeId,
    next_propkey_id: PropKeyId,
  ) -> Self {
    Self {
      next_node_id,
      next_label_id,
      next_etype_id,
      next_propkey_id,
      max_txid: 0,
    }
  }
}

/// Group a raw record stream into committed transactions, in commit order.
///
/// Operations appearing outside a BEGIN/COMMIT bracket are dropped.
pub fn extract_committed_transactions(records: Vec<WalRecord>) -> Vec<(TxId, Vec<WalOp>)> {
  let mut open: HashMap<TxId, Vec<WalOp>> = HashMap::new();
  let mut committed: Vec<(TxId, Vec<WalOp>)> = Vec::new();

  for record in records {
    match record.op {
      WalOp::Begin => {
        open.insert(record.txid, Vec::new());
      }
      WalOp::Commit => {
        if let Some(ops) = open.remove(&record.txid) {
          committed.push((record.txid, ops));
        }
      }
      WalOp::Rollback => {
        open.remove(&record.txid);
      }
      op => {
        if let Some(ops) = open.get_mut(&record.txid) {
          ops.push(op);
        } else {
          debug!(txid = record.txid, "dropping wal op outside a transaction");
        }
      }
    }
  }

  if !open.is_empty() {
    debug!(
      count = open.len(),
      "discarding incomplete transactions found in wal"
    );
  }
  committed
}

/// Resolve a node's key for delete replay: pending creations first, then
/// the snapshot's key column.
fn node_key_for_delete(
  node_id: NodeId,
  delta: &DeltaState,
  snapshot: Option<&Snapshot>,
) -> Option<String> {
  if let Some(node_delta) = delta.created_nodes.get(&node_id) {
    return node_delta.key.clone();
  }
  let snap = snapshot?;
  snap.phys_node(node_id).and_then(|phys| snap.node_key(phys))
}

/// Apply one committed operation to the delta, keeping catalogs and
/// allocator high-water marks in step.
pub fn replay_op(
  op: WalOp,
  delta: &mut DeltaState,
  catalogs: &mut CatalogSet,
  state: &mut ReplayState,
  snapshot: Option<&Snapshot>,
) {
  match op {
    WalOp::Begin | WalOp::Commit | WalOp::Rollback => {}
    WalOp::CreateNode { node_id, key } => {
      delta.create_node(node_id, key.as_deref());
      state.next_node_id = state.next_node_id.max(node_id + 1);
    }
    WalOp::DeleteNode { node_id } => {
      let key = node_key_for_delete(node_id, delta, snapshot);
      delta.delete_node(node_id, key.as_deref());
    }
    WalOp::AddEdge { src, etype, dst } => delta.add_edge(src, etype, dst),
    WalOp::DeleteEdge { src, etype, dst } => delta.delete_edge(src, etype, dst),
    WalOp::DefineLabel { label_id, name } => {
      catalogs.labels.insert(label_id, &name);
      delta.define_label(label_id, &name);
      state.next_label_id = state.next_label_id.max(label_id + 1);
    }
    WalOp::DefineEtype { etype_id, name } => {
      catalogs.etypes.insert(etype_id, &name);
      delta.define_etype(etype_id, &name);
      state.next_etype_id = state.next_etype_id.max(etype_id + 1);
    }
    WalOp::DefinePropkey { propkey_id, name } => {
      catalogs.propkeys.insert(propkey_id, &name);
      delta.define_propkey(propkey_id, &name);
      state.next_propkey_id = state.next_propkey_id.max(propkey_id + 1);
    }
    WalOp::AddNodeLabel { node_id, label_id } => delta.add_node_label(node_id, label_id),
    WalOp::RemoveNodeLabel { node_id, label_id } => delta.remove_node_label(node_id, label_id),
    WalOp::SetNodeProp {
      node_id,
      key_id,
      value,
    } => delta.set_node_prop(node_id, key_id, value),
    WalOp::DelNodeProp { node_id, key_id } => delta.delete_node_prop(node_id, key_id),
    WalOp::SetEdgeProp {
      src,
      etype,
      dst,
      key_id,
      value,
    } => delta.set_edge_prop(src, etype, dst, key_id, value),
    WalOp::DelEdgeProp {
      src,
      etype,
      dst,
      key_id,
    } => delta.delete_edge_prop(src, etype, dst, key_id),
    WalOp::SetNodeVector {
      node_id,
      key_id,
      vector,
    } => delta.set_node_vector(node_id, key_id, vector),
    WalOp::DelNodeVector { node_id, key_id } => delta.delete_node_vector(node_id, key_id),
    WalOp::BatchVectors { key_id, vectors } => {
      for (node_id, vector) in vectors {
        delta.set_node_vector(node_id, key_id, vector);
      }
    }
    WalOp::SealFragment { .. } | WalOp::CompactFragments { .. } => {
      // Vector-store maintenance is re-driven by the collaborator once it
      // re-attaches; nothing to fold into the delta
    }
  }
}

/// Drop delta entries the snapshot already reflects.
///
/// Needed wherever replayed records can overlap a snapshot that absorbed
/// them: completion of a background checkpoint, and open-time replay of
/// records carried into the primary region by one. Absorbed creations
/// turn into plain modifications so edits from a later unabsorbed commit
/// survive; re-applying an edit the snapshot already holds is idempotent
/// on reads.
pub(crate) fn prune_absorbed(delta: &mut DeltaState, snap: &Snapshot) {
  let absorbed: Vec<NodeId> = delta
    .created_nodes
    .keys()
    .copied()
    .filter(|&id| snap.has_node(id))
    .collect();
  for node_id in absorbed {
    if let Some(mut node_delta) = delta.created_nodes.remove(&node_id) {
      if let Some(key) = node_delta.key.take() {
        delta.key_index.remove(&key);
      }
      if !node_delta.props.is_empty()
        || !node_delta.labels_added.is_empty()
        || !node_delta.labels_removed.is_empty()
      {
        delta.modified_nodes.insert(node_id, node_delta);
      }
    }
  }

  delta.deleted_nodes.retain(|&id| snap.has_node(id));
  delta
    .key_index_deleted
    .retain(|key| snap.lookup_by_key(key).is_some());

  let has_edge = |src: NodeId, etype: ETypeId, dst: NodeId| -> bool {
    match (snap.phys_node(src), snap.phys_node(dst)) {
      (Some(s), Some(d)) => snap.has_edge(s, etype, d),
      _ => false,
    }
  };

  for (&src, patches) in delta.out_add.iter_mut() {
    patches.retain(|p| !has_edge(src, p.etype, p.other));
  }
  for (&dst, patches) in delta.in_add.iter_mut() {
    patches.retain(|p| !has_edge(p.other, p.etype, dst));
  }
  // A pending delete of an edge the snapshot no longer has is a no-op
  for (&src, patches) in delta.out_del.iter_mut() {
    patches.retain(|p| has_edge(src, p.etype, p.other));
  }
  for (&dst, patches) in delta.in_del.iter_mut() {
    patches.retain(|p| has_edge(p.other, p.etype, dst));
  }

  delta.out_add.retain(|_, p| !p.is_empty());
  delta.in_add.retain(|_, p| !p.is_empty());
  delta.out_del.retain(|_, p| !p.is_empty());
  delta.in_del.retain(|_, p| !p.is_empty());
}

/// Replay every committed transaction into the delta
pub fn replay_committed(
  committed: Vec<(TxId, Vec<WalOp>)>,
  delta: &mut DeltaState,
  catalogs: &mut CatalogSet,
  state: &mut ReplayState,
  snapshot: Option<&Snapshot>,
) {
  for (txid, ops) in committed {
    state.max_txid = state.max_txid.max(txid);
    for op in ops {
      replay_op(op, delta, catalogs, state, snapshot);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn rec(txid: TxId, op: WalOp) -> WalRecord {
    WalRecord::new(txid, op)
  }

  #[test]
  fn begin_without_commit_is_discarded() {
    let records = vec![
      rec(1, WalOp::Begin),
      rec(1, WalOp::CreateNode { node_id: 1, key: None }),
    ];
    assert!(extract_committed_transactions(records).is_empty());
  }

  #[test]
  fn rollback_erases_pending() {
    let records = vec![
      rec(1, WalOp::Begin),
      rec(1, WalOp::CreateNode { node_id: 1, key: None }),
      rec(1, WalOp::Rollback),
      rec(2, WalOp::Begin),
      rec(2, WalOp::CreateNode { node_id: 2, key: None }),
      rec(2, WalOp::Commit),
    ];
    let committed = extract_committed_transactions(records);
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].0, 2);
  }

  #[test]
  fn commit_order_preserved() {
    let records = vec![
      rec(1, WalOp::Begin),
      rec(1, WalOp::CreateNode { node_id: 1, key: None }),
      rec(1, WalOp::Commit),
      rec(2, WalOp::Begin),
      rec(2, WalOp::DeleteNode { node_id: 1 }),
      rec(2, WalOp::Commit),
    ];
    let committed = extract_committed_transactions(records);
    assert_eq!(committed.len(), 2);
    assert_eq!(committed[0].0, 1);
    assert_eq!(committed[1].0, 2);
  }

  #[test]
  fn replay_rebuilds_allocators_and_catalogs() {
    let committed = vec![(
      5,
      vec![
        WalOp::DefineEtype {
          etype_id: 3,
          name: "follows".to_string(),
        },
        WalOp::CreateNode {
          node_id: 9,
          key: Some("alice".to_string()),
        },
        WalOp::CreateNode {
          node_id: 10,
          key: None,
        },
        WalOp::AddEdge {
          src: 9,
          etype: 3,
          dst: 10,
        },
      ],
    )];

    let mut delta = DeltaState::new();
    let mut catalogs = CatalogSet::default();
    let mut state = ReplayState::new(1, 1, 1, 1);
    replay_committed(committed, &mut delta, &mut catalogs, &mut state, None);

    assert_eq!(state.next_node_id, 11);
    assert_eq!(state.next_etype_id, 4);
    assert_eq!(state.max_txid, 5);
    assert_eq!(catalogs.etypes.id("follows"), Some(3));
    assert!(delta.is_node_created(9));
    assert!(delta.is_edge_added(9, 3, 10));
    assert_eq!(delta.key_index.get("alice"), Some(&9));
  }
}
