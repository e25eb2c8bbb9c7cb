//! Whole-graph iteration and statistics.
//!
//! Iterators materialize their item lists up front while holding the read
//! locks, so no iterator borrows pager or mmap state; snapshot swaps and
//! vacuum cannot invalidate one mid-walk.

use std::collections::HashSet;

use crate::db::GraphDb;
use crate::types::*;

/// Iterator over all live node IDs, ascending
pub struct NodeIter {
  nodes: Vec<NodeId>,
  at: usize,
}

impl Iterator for NodeIter {
  type Item = NodeId;

  fn next(&mut self) -> Option<NodeId> {
    let node_id = self.nodes.get(self.at).copied()?;
    self.at += 1;
    Some(node_id)
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    let remaining = self.nodes.len() - self.at;
    (remaining, Some(remaining))
  }
}

impl ExactSizeIterator for NodeIter {}

impl GraphDb {
  /// Iterate every live node: snapshot nodes minus deletions, plus nodes
  /// created in the delta and the current transaction.
  pub fn iter_nodes(&self) -> NodeIter {
    let tx = self.inner.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);
    let delta = self.inner.delta.read();
    let snapshot = self.inner.snapshot.read().clone();

    let mut nodes = Vec::new();

    if let Some(snap) = snapshot.as_deref() {
      for phys in 0..snap.header.num_nodes as PhysNode {
        if let Some(node_id) = snap.node_id(phys) {
          if delta.is_node_deleted(node_id)
            || pending.is_some_and(|p| p.is_node_deleted(node_id))
          {
            continue;
          }
          nodes.push(node_id);
        }
      }
    }

    for &node_id in delta.created_nodes.keys() {
      if pending.is_some_and(|p| p.is_node_deleted(node_id)) {
        continue;
      }
      nodes.push(node_id);
    }

    if let Some(p) = pending {
      nodes.extend(p.created_nodes.keys().copied());
    }

    nodes.sort_unstable();
    nodes.dedup();
    NodeIter { nodes, at: 0 }
  }

  pub fn list_nodes(&self) -> Vec<NodeId> {
    self.iter_nodes().collect()
  }

  pub fn count_nodes(&self) -> usize {
    self.iter_nodes().len()
  }

  /// Every live edge, optionally filtered by edge type
  pub fn list_edges(&self, etype_filter: Option<ETypeId>) -> Vec<FullEdge> {
    let tx = self.inner.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);
    let delta = self.inner.delta.read();
    let snapshot = self.inner.snapshot.read().clone();

    let node_dead = |node_id: NodeId| {
      delta.is_node_deleted(node_id) || pending.is_some_and(|p| p.is_node_deleted(node_id))
    };
    let edge_dead = |src: NodeId, etype: ETypeId, dst: NodeId| {
      delta.is_edge_deleted(src, etype, dst)
        || pending.is_some_and(|p| p.is_edge_deleted(src, etype, dst))
    };

    let mut edges = Vec::new();
    // An overlay add can shadow an edge the snapshot already holds
    // (re-adding an existing edge is a no-op), and the delta and pending
    // overlays can both carry the same patch; emit each edge once
    let mut seen: HashSet<FullEdge> = HashSet::new();

    if let Some(snap) = snapshot.as_deref() {
      for phys in 0..snap.header.num_nodes as PhysNode {
        let Some(src) = snap.node_id(phys) else {
          continue;
        };
        if node_dead(src) {
          continue;
        }
        for (dst_phys, etype) in snap.iter_out_edges(phys) {
          if etype_filter.is_some_and(|f| f != etype) {
            continue;
          }
          let Some(dst) = snap.node_id(dst_phys) else {
            continue;
          };
          if node_dead(dst) || edge_dead(src, etype, dst) {
            continue;
          }
          let edge = FullEdge { src, etype, dst };
          if seen.insert(edge) {
            edges.push(edge);
          }
        }
      }
    }

    for overlay in std::iter::once(&*delta).chain(pending.iter().copied()) {
      for (&src, patches) in &overlay.out_add {
        if node_dead(src) {
          continue;
        }
        for patch in patches.iter() {
          if etype_filter.is_some_and(|f| f != patch.etype) {
            continue;
          }
          if node_dead(patch.other) {
            continue;
          }
          // Delta-added edges can still be deleted by the pending overlay
          if std::ptr::eq(overlay, &*delta)
            && pending.is_some_and(|p| p.is_edge_deleted(src, patch.etype, patch.other))
          {
            continue;
          }
          let edge = FullEdge {
            src,
            etype: patch.etype,
            dst: patch.other,
          };
          if seen.insert(edge) {
            edges.push(edge);
          }
        }
      }
    }

    edges
  }

  pub fn count_edges(&self) -> usize {
    self.list_edges(None).len()
  }

  // ==========================================================================
  // Statistics
  // ==========================================================================

  pub fn wal_stats(&self) -> WalStats {
    self.inner.wal.lock().stats()
  }

  pub fn stats(&self) -> DbStats {
    let delta = self.inner.delta.read();
    let snapshot = self.inner.snapshot.read().clone();
    let header = self.inner.header.read();
    let wal = self.inner.wal.lock().stats();

    let (snapshot_nodes, snapshot_edges, snapshot_max_node_id) = snapshot
      .as_deref()
      .map(|snap| {
        (
          snap.header.num_nodes,
          snap.header.num_edges,
          snap.header.max_node_id,
        )
      })
      .unwrap_or((0, 0, 0));

    DbStats {
      snapshot_gen: header.active_snapshot_gen,
      snapshot_nodes,
      snapshot_edges,
      snapshot_max_node_id,
      delta_nodes_created: delta.created_nodes.len(),
      delta_nodes_deleted: delta.deleted_nodes.len(),
      delta_edges_added: delta.total_edges_added(),
      delta_edges_deleted: delta.total_edges_deleted(),
      wal_bytes_used: wal.used(),
      wal_usage: wal.primary_usage(),
      recommend_compact: wal.primary_usage() > self.inner.checkpoint_threshold,
    }
  }
}
