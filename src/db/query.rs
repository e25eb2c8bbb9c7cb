//! Read API: existence, properties, labels, key lookup, merged neighbor
//! traversal.
//!
//! Every read resolves in overlay order: the current transaction's pending
//! buffers, then the committed delta, then the snapshot. Deleted nodes are
//! absent from all reads, including their incident edges and key entries.
//! Properties of edges added in the pending (uncommitted) transaction are
//! visible to that transaction.

use std::sync::Arc;

use crate::db::cache::Direction;
use crate::db::delta::DeltaState;
use crate::db::hooks::TrackedKey;
use crate::db::GraphDb;
use crate::storage::snapshot::reader::Snapshot;
use crate::types::*;

use std::collections::HashMap;

impl GraphDb {
  fn snapshot_handle(&self) -> Option<Arc<Snapshot>> {
    self.inner.snapshot.read().clone()
  }

  fn record_read(&self, key: TrackedKey) {
    if let Some(txid) = self.current_txid() {
      if let Some(hooks) = self.inner.mvcc_hooks.read().as_ref() {
        hooks.record_read(txid, key);
      }
    }
  }

  // ==========================================================================
  // Existence
  // ==========================================================================

  fn node_exists_in(
    &self,
    pending: Option<&DeltaState>,
    delta: &DeltaState,
    snapshot: Option<&Snapshot>,
    node_id: NodeId,
  ) -> bool {
    if let Some(p) = pending {
      if p.is_node_deleted(node_id) {
        return false;
      }
      if p.is_node_created(node_id) {
        return true;
      }
    }
    if delta.is_node_deleted(node_id) {
      return false;
    }
    if delta.is_node_created(node_id) {
      return true;
    }
    snapshot.map(|s| s.has_node(node_id)).unwrap_or(false)
  }

  pub fn node_exists(&self, node_id: NodeId) -> bool {
    self.record_read(TrackedKey::Node(node_id));
    let tx = self.inner.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);
    let delta = self.inner.delta.read();
    let snapshot = self.snapshot_handle();
    self.node_exists_in(pending, &delta, snapshot.as_deref(), node_id)
  }

  pub fn edge_exists(&self, src: NodeId, etype: ETypeId, dst: NodeId) -> bool {
    self.record_read(TrackedKey::Edge { src, etype, dst });
    let tx = self.inner.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);
    let delta = self.inner.delta.read();
    let snapshot = self.snapshot_handle();

    for overlay in pending.iter().copied().chain(std::iter::once(&*delta)) {
      if overlay.is_node_deleted(src) || overlay.is_node_deleted(dst) {
        return false;
      }
      if overlay.is_edge_deleted(src, etype, dst) {
        return false;
      }
      if overlay.is_edge_added(src, etype, dst) {
        return true;
      }
    }

    if let Some(snap) = snapshot.as_deref() {
      if let (Some(src_phys), Some(dst_phys)) = (snap.phys_node(src), snap.phys_node(dst)) {
        return snap.has_edge(src_phys, etype, dst_phys);
      }
    }
    false
  }

  // ==========================================================================
  // Keys
  // ==========================================================================

  /// Resolve a user key to its node: pending first, then delta, then the
  /// snapshot's hash index; deleted nodes and shadowed keys return None.
  pub fn lookup_by_key(&self, key: &str) -> Option<NodeId> {
    self.record_read(TrackedKey::Key(key.to_string()));
    let tx = self.inner.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);

    if let Some(p) = pending {
      if p.key_index_deleted.contains(key) {
        return None;
      }
      if let Some(&node_id) = p.key_index.get(key) {
        return Some(node_id);
      }
    }

    let delta = self.inner.delta.read();
    if delta.key_index_deleted.contains(key) {
      return None;
    }
    if let Some(&node_id) = delta.key_index.get(key) {
      if pending.is_some_and(|p| p.is_node_deleted(node_id)) {
        return None;
      }
      return Some(node_id);
    }

    let use_cache = pending.is_none() && self.cache_enabled();
    if use_cache {
      if let Some(hit) = self.inner.cache.lock().as_mut().and_then(|c| c.get_key(key)) {
        return hit;
      }
    }

    let snapshot = self.snapshot_handle();
    let found = snapshot.as_deref().and_then(|snap| snap.lookup_by_key(key));
    let result = found.filter(|node_id| {
      !delta.is_node_deleted(*node_id) && !pending.is_some_and(|p| p.is_node_deleted(*node_id))
    });

    if use_cache {
      if let Some(cache) = self.inner.cache.lock().as_mut() {
        cache.set_key(key, result);
      }
    }
    result
  }

  /// A node's user key, if it has one
  pub fn node_key(&self, node_id: NodeId) -> Option<String> {
    let tx = self.inner.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);
    if let Some(p) = pending {
      if let Some(delta) = p.created_nodes.get(&node_id) {
        return delta.key.clone();
      }
    }
    let delta = self.inner.delta.read();
    if let Some(node_delta) = delta.created_nodes.get(&node_id) {
      return node_delta.key.clone();
    }
    let snapshot = self.snapshot_handle();
    snapshot
      .as_deref()
      .and_then(|snap| snap.phys_node(node_id).and_then(|phys| snap.node_key(phys)))
  }

  // ==========================================================================
  // Node properties
  // ==========================================================================

  /// All properties of a node, or None if it does not exist
  pub fn node_props(&self, node_id: NodeId) -> Option<HashMap<PropKeyId, PropValue>> {
    let tx = self.inner.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);
    let delta = self.inner.delta.read();
    let snapshot = self.snapshot_handle();

    if !self.node_exists_in(pending, &delta, snapshot.as_deref(), node_id) {
      return None;
    }

    let mut props = snapshot
      .as_deref()
      .and_then(|snap| snap.phys_node(node_id).map(|phys| snap.node_props(phys)))
      .unwrap_or_default();

    for overlay in std::iter::once(&*delta).chain(pending.iter().copied()) {
      if let Some(node_delta) = overlay.node_delta(node_id) {
        for (&key_id, value) in &node_delta.props {
          match value {
            Some(v) => {
              props.insert(key_id, v.clone());
            }
            None => {
              props.remove(&key_id);
            }
          }
        }
      }
    }
    Some(props)
  }

  /// One property of a node
  pub fn node_prop(&self, node_id: NodeId, key_id: PropKeyId) -> Option<PropValue> {
    self.record_read(TrackedKey::NodeProp { node_id, key_id });
    let tx = self.inner.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);

    let use_cache = pending.is_none() && self.cache_enabled();
    if use_cache {
      if let Some(hit) = self
        .inner
        .cache
        .lock()
        .as_mut()
        .and_then(|c| c.get_node_prop(node_id, key_id))
      {
        return hit;
      }
    }

    let delta = self.inner.delta.read();
    let snapshot = self.snapshot_handle();

    let result = (|| {
      if !self.node_exists_in(pending, &delta, snapshot.as_deref(), node_id) {
        return None;
      }
      for overlay in pending.iter().copied().chain(std::iter::once(&*delta)) {
        if let Some(edit) = overlay.node_prop(node_id, key_id) {
          return edit.cloned();
        }
      }
      let snap = snapshot.as_deref()?;
      let phys = snap.phys_node(node_id)?;
      snap.node_prop(phys, key_id)
    })();

    if use_cache {
      if let Some(cache) = self.inner.cache.lock().as_mut() {
        cache.set_node_prop(node_id, key_id, result.clone());
      }
    }
    result
  }

  // ==========================================================================
  // Labels
  // ==========================================================================

  /// A node's labels (sorted), or None if the node does not exist
  pub fn node_labels(&self, node_id: NodeId) -> Option<Vec<LabelId>> {
    let tx = self.inner.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);
    let delta = self.inner.delta.read();
    let snapshot = self.snapshot_handle();

    if !self.node_exists_in(pending, &delta, snapshot.as_deref(), node_id) {
      return None;
    }

    let mut labels: Vec<LabelId> = snapshot
      .as_deref()
      .and_then(|snap| snap.phys_node(node_id).map(|phys| snap.node_labels(phys)))
      .unwrap_or_default();

    for overlay in std::iter::once(&*delta).chain(pending.iter().copied()) {
      if let Some(node_delta) = overlay.node_delta(node_id) {
        labels.retain(|l| !node_delta.labels_removed.contains(l));
        for &label_id in &node_delta.labels_added {
          if !labels.contains(&label_id) {
            labels.push(label_id);
          }
        }
      }
    }
    labels.sort_unstable();
    Some(labels)
  }

  pub fn has_node_label(&self, node_id: NodeId, label_id: LabelId) -> bool {
    self
      .node_labels(node_id)
      .is_some_and(|labels| labels.binary_search(&label_id).is_ok())
  }

  // ==========================================================================
  // Edge properties
  // ==========================================================================

  /// All properties of an edge, or None if the edge does not exist.
  /// Edges added in the current (uncommitted) transaction are visible.
  pub fn edge_props(&self, src: NodeId, etype: ETypeId, dst: NodeId) -> Option<HashMap<PropKeyId, PropValue>> {
    if !self.edge_exists(src, etype, dst) {
      return None;
    }

    let tx = self.inner.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);
    let delta = self.inner.delta.read();
    let snapshot = self.snapshot_handle();

    let mut props = snapshot
      .as_deref()
      .and_then(|snap| {
        let src_phys = snap.phys_node(src)?;
        let dst_phys = snap.phys_node(dst)?;
        let idx = snap.find_edge_index(src_phys, etype, dst_phys)?;
        Some(snap.edge_props(idx))
      })
      .unwrap_or_default();

    for overlay in std::iter::once(&*delta).chain(pending.iter().copied()) {
      if let Some(edits) = overlay.edge_props.get(&(src, etype, dst)) {
        for (&key_id, value) in edits {
          match value {
            Some(v) => {
              props.insert(key_id, v.clone());
            }
            None => {
              props.remove(&key_id);
            }
          }
        }
      }
    }
    Some(props)
  }

  /// One property of an edge
  pub fn edge_prop(
    &self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    key_id: PropKeyId,
  ) -> Option<PropValue> {
    self.record_read(TrackedKey::EdgeProp {
      src,
      etype,
      dst,
      key_id,
    });

    let use_cache = self.cache_enabled() && !self.has_transaction();
    if use_cache {
      if let Some(hit) = self
        .inner
        .cache
        .lock()
        .as_mut()
        .and_then(|c| c.get_edge_prop(src, etype, dst, key_id))
      {
        return hit;
      }
    }

    let result = self
      .edge_props(src, etype, dst)
      .and_then(|mut props| props.remove(&key_id));

    if use_cache {
      if let Some(cache) = self.inner.cache.lock().as_mut() {
        cache.set_edge_prop(src, etype, dst, key_id, result.clone());
      }
    }
    result
  }

  // ==========================================================================
  // Merged neighbor traversal
  // ==========================================================================

  /// Out-neighbors of a node, optionally filtered by edge type: snapshot
  /// edges not deleted in any overlay, followed by overlay additions whose
  /// far endpoint is alive.
  pub fn neighbors_out(&self, src: NodeId, etype: Option<ETypeId>) -> Vec<NodeId> {
    self.merged_neighbors(src, etype, Direction::Out)
  }

  /// In-neighbors of a node, optionally filtered by edge type
  pub fn neighbors_in(&self, dst: NodeId, etype: Option<ETypeId>) -> Vec<NodeId> {
    self.merged_neighbors(dst, etype, Direction::In)
  }

  fn merged_neighbors(&self, node_id: NodeId, etype: Option<ETypeId>, direction: Direction) -> Vec<NodeId> {
    let tx = self.inner.current_tx.lock();
    let pending = tx.as_ref().map(|t| &t.pending);
    let delta = self.inner.delta.read();

    let node_dead = pending.is_some_and(|p| p.is_node_deleted(node_id))
      || delta.is_node_deleted(node_id);
    if node_dead {
      return Vec::new();
    }

    let use_cache = pending.is_none() && self.cache_enabled();
    if use_cache {
      if let Some(hit) = self
        .inner
        .cache
        .lock()
        .as_mut()
        .and_then(|c| c.get_traversal(node_id, etype, direction))
      {
        return hit.as_ref().clone();
      }
    }

    let snapshot = self.snapshot_handle();
    let mut neighbors = Vec::new();

    let other_dead = |other: NodeId| {
      delta.is_node_deleted(other) || pending.is_some_and(|p| p.is_node_deleted(other))
    };
    let edge_dead = |e: ETypeId, other: NodeId| match direction {
      Direction::Out => {
        delta.is_edge_deleted(node_id, e, other)
          || pending.is_some_and(|p| p.is_edge_deleted(node_id, e, other))
      }
      Direction::In => {
        delta.is_edge_deleted(other, e, node_id)
          || pending.is_some_and(|p| p.is_edge_deleted(other, e, node_id))
      }
    };

    if let Some(snap) = snapshot.as_deref() {
      if let Some(phys) = snap.phys_node(node_id) {
        match direction {
          Direction::Out => {
            for (other_phys, e) in snap.iter_out_edges(phys) {
              if etype.is_some_and(|f| f != e) {
                continue;
              }
              let Some(other) = snap.node_id(other_phys) else {
                continue;
              };
              if edge_dead(e, other) || other_dead(other) {
                continue;
              }
              neighbors.push(other);
            }
          }
          Direction::In => {
            for (other_phys, e, _) in snap.iter_in_edges(phys) {
              if etype.is_some_and(|f| f != e) {
                continue;
              }
              let Some(other) = snap.node_id(other_phys) else {
                continue;
              };
              if edge_dead(e, other) || other_dead(other) {
                continue;
              }
              neighbors.push(other);
            }
          }
        }
      }
    }

    for overlay in std::iter::once(&*delta).chain(pending.iter().copied()) {
      let adds = match direction {
        Direction::Out => overlay.out_add.get(&node_id),
        Direction::In => overlay.in_add.get(&node_id),
      };
      if let Some(list) = adds {
        for patch in list.iter() {
          if etype.is_some_and(|f| f != patch.etype) {
            continue;
          }
          if other_dead(patch.other) {
            continue;
          }
          // The pending overlay can delete a delta-added edge
          if std::ptr::eq(overlay, &*delta) && edge_dead_in_pending(pending, node_id, patch.etype, patch.other, direction) {
            continue;
          }
          // An overlay patch can shadow an edge the snapshot (or an
          // earlier overlay) already yielded: re-adding an existing edge
          // is a no-op, not a second neighbor
          if !neighbors.contains(&patch.other) {
            neighbors.push(patch.other);
          }
        }
      }
    }

    if use_cache {
      if let Some(cache) = self.inner.cache.lock().as_mut() {
        cache.set_traversal(node_id, etype, direction, Arc::new(neighbors.clone()));
      }
    }
    neighbors
  }

  // ==========================================================================
  // Catalog lookups
  // ==========================================================================

  pub fn label_id(&self, name: &str) -> Option<LabelId> {
    if let Some(id) = self.inner.catalogs.read().labels.id(name) {
      return Some(id);
    }
    self.pending_catalog_id(|p| &p.new_labels, name)
  }

  pub fn etype_id(&self, name: &str) -> Option<ETypeId> {
    if let Some(id) = self.inner.catalogs.read().etypes.id(name) {
      return Some(id);
    }
    self.pending_catalog_id(|p| &p.new_etypes, name)
  }

  pub fn propkey_id(&self, name: &str) -> Option<PropKeyId> {
    if let Some(id) = self.inner.catalogs.read().propkeys.id(name) {
      return Some(id);
    }
    self.pending_catalog_id(|p| &p.new_propkeys, name)
  }

  fn pending_catalog_id(
    &self,
    table: impl Fn(&DeltaState) -> &hashbrown::HashMap<u32, String>,
    name: &str,
  ) -> Option<u32> {
    let tx = self.inner.current_tx.lock();
    tx.as_ref().and_then(|t| {
      table(&t.pending)
        .iter()
        .find(|(_, n)| n.as_str() == name)
        .map(|(&id, _)| id)
    })
  }

  pub fn label_name(&self, label_id: LabelId) -> Option<String> {
    self.inner.catalogs.read().labels.name(label_id).map(str::to_string)
  }

  pub fn etype_name(&self, etype_id: ETypeId) -> Option<String> {
    self.inner.catalogs.read().etypes.name(etype_id).map(str::to_string)
  }

  pub fn propkey_name(&self, propkey_id: PropKeyId) -> Option<String> {
    self
      .inner
      .catalogs
      .read()
      .propkeys
      .name(propkey_id)
      .map(str::to_string)
  }
}

/// Is the edge deleted in the pending overlay specifically
fn edge_dead_in_pending(
  pending: Option<&DeltaState>,
  node_id: NodeId,
  etype: ETypeId,
  other: NodeId,
  direction: Direction,
) -> bool {
  pending.is_some_and(|p| match direction {
    Direction::Out => p.is_edge_deleted(node_id, etype, other),
    Direction::In => p.is_edge_deleted(other, etype, node_id),
  })
}
