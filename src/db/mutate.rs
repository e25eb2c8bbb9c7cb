//! Mutation API: nodes, edges, properties, labels, schema, vectors.
//!
//! Every mutation requires an open transaction and touches only its
//! pending buffers plus its ordered op log; nothing reaches the WAL until
//! commit.

use crate::db::hooks::TrackedKey;
use crate::db::{GraphDb, TxState};
use crate::error::{RayError, Result};
use crate::storage::wal::record::WalOp;
use crate::types::*;

impl GraphDb {
  fn with_tx<R>(&self, f: impl FnOnce(&mut TxState) -> Result<R>) -> Result<R> {
    let mut guard = self.inner.current_tx.lock();
    let tx = guard.as_mut().ok_or(RayError::NoTransaction)?;
    f(tx)
  }

  fn record_write(&self, txid: TxId, key: TrackedKey) {
    if let Some(hooks) = self.inner.mvcc_hooks.read().as_ref() {
      hooks.record_write(txid, key);
    }
  }

  // ==========================================================================
  // Nodes
  // ==========================================================================

  /// Create a node, optionally with a unique user key
  pub fn create_node(&self, key: Option<&str>) -> Result<NodeId> {
    if let Some(key) = key {
      if self.lookup_by_key(key).is_some() {
        return Err(RayError::Internal(format!(
          "key is already bound to a node: {key}"
        )));
      }
    }

    let node_id = self.alloc_node_id();
    let txid = self.with_tx(|tx| {
      tx.pending.create_node(node_id, key);
      tx.ops.push(WalOp::CreateNode {
        node_id,
        key: key.map(str::to_string),
      });
      Ok(tx.txid)
    })?;

    self.record_write(txid, TrackedKey::Node(node_id));
    if let Some(key) = key {
      self.record_write(txid, TrackedKey::Key(key.to_string()));
    }
    Ok(node_id)
  }

  /// Delete a node; incident edges disappear from every read immediately
  /// and are physically removed at the next checkpoint
  pub fn delete_node(&self, node_id: NodeId) -> Result<()> {
    let key = self.node_key(node_id);
    let txid = self.with_tx(|tx| {
      tx.pending.delete_node(node_id, key.as_deref());
      tx.ops.push(WalOp::DeleteNode { node_id });
      Ok(tx.txid)
    })?;

    self.record_write(txid, TrackedKey::Node(node_id));
    if let Some(key) = key {
      self.record_write(txid, TrackedKey::Key(key));
    }
    Ok(())
  }

  // ==========================================================================
  // Edges
  // ==========================================================================

  /// Add a directed edge; adding an existing edge is a no-op
  pub fn add_edge(&self, src: NodeId, etype: ETypeId, dst: NodeId) -> Result<()> {
    let txid = self.with_tx(|tx| {
      tx.pending.add_edge(src, etype, dst);
      tx.ops.push(WalOp::AddEdge { src, etype, dst });
      Ok(tx.txid)
    })?;
    self.record_write(txid, TrackedKey::Edge { src, etype, dst });
    Ok(())
  }

  /// Add an edge together with its initial properties
  pub fn add_edge_with_props(
    &self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    props: Vec<(PropKeyId, PropValue)>,
  ) -> Result<()> {
    let txid = self.with_tx(|tx| {
      tx.pending.add_edge(src, etype, dst);
      tx.ops.push(WalOp::AddEdge { src, etype, dst });
      for (key_id, value) in props {
        tx.pending.set_edge_prop(src, etype, dst, key_id, value.clone());
        tx.ops.push(WalOp::SetEdgeProp {
          src,
          etype,
          dst,
          key_id,
          value,
        });
      }
      Ok(tx.txid)
    })?;
    self.record_write(txid, TrackedKey::Edge { src, etype, dst });
    Ok(())
  }

  pub fn delete_edge(&self, src: NodeId, etype: ETypeId, dst: NodeId) -> Result<()> {
    let txid = self.with_tx(|tx| {
      tx.pending.delete_edge(src, etype, dst);
      tx.ops.push(WalOp::DeleteEdge { src, etype, dst });
      Ok(tx.txid)
    })?;
    self.record_write(txid, TrackedKey::Edge { src, etype, dst });
    Ok(())
  }

  // ==========================================================================
  // Node properties and labels
  // ==========================================================================

  pub fn set_node_prop(&self, node_id: NodeId, key_id: PropKeyId, value: PropValue) -> Result<()> {
    let txid = self.with_tx(|tx| {
      tx.pending.set_node_prop(node_id, key_id, value.clone());
      tx.ops.push(WalOp::SetNodeProp {
        node_id,
        key_id,
        value,
      });
      Ok(tx.txid)
    })?;
    self.record_write(txid, TrackedKey::NodeProp { node_id, key_id });
    Ok(())
  }

  pub fn delete_node_prop(&self, node_id: NodeId, key_id: PropKeyId) -> Result<()> {
    let txid = self.with_tx(|tx| {
      tx.pending.delete_node_prop(node_id, key_id);
      tx.ops.push(WalOp::DelNodeProp { node_id, key_id });
      Ok(tx.txid)
    })?;
    self.record_write(txid, TrackedKey::NodeProp { node_id, key_id });
    Ok(())
  }

  pub fn add_node_label(&self, node_id: NodeId, label_id: LabelId) -> Result<()> {
    let txid = self.with_tx(|tx| {
      tx.pending.add_node_label(node_id, label_id);
      tx.ops.push(WalOp::AddNodeLabel { node_id, label_id });
      Ok(tx.txid)
    })?;
    self.record_write(txid, TrackedKey::Node(node_id));
    Ok(())
  }

  pub fn remove_node_label(&self, node_id: NodeId, label_id: LabelId) -> Result<()> {
    let txid = self.with_tx(|tx| {
      tx.pending.remove_node_label(node_id, label_id);
      tx.ops.push(WalOp::RemoveNodeLabel { node_id, label_id });
      Ok(tx.txid)
    })?;
    self.record_write(txid, TrackedKey::Node(node_id));
    Ok(())
  }

  // ==========================================================================
  // Edge properties
  // ==========================================================================

  pub fn set_edge_prop(
    &self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    key_id: PropKeyId,
    value: PropValue,
  ) -> Result<()> {
    let txid = self.with_tx(|tx| {
      tx.pending.set_edge_prop(src, etype, dst, key_id, value.clone());
      tx.ops.push(WalOp::SetEdgeProp {
        src,
        etype,
        dst,
        key_id,
        value,
      });
      Ok(tx.txid)
    })?;
    self.record_write(
      txid,
      TrackedKey::EdgeProp {
        src,
        etype,
        dst,
        key_id,
      },
    );
    Ok(())
  }

  pub fn delete_edge_prop(
    &self,
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    key_id: PropKeyId,
  ) -> Result<()> {
    let txid = self.with_tx(|tx| {
      tx.pending.delete_edge_prop(src, etype, dst, key_id);
      tx.ops.push(WalOp::DelEdgeProp {
        src,
        etype,
        dst,
        key_id,
      });
      Ok(tx.txid)
    })?;
    self.record_write(
      txid,
      TrackedKey::EdgeProp {
        src,
        etype,
        dst,
        key_id,
      },
    );
    Ok(())
  }

  // ==========================================================================
  // Vectors
  // ==========================================================================

  pub fn set_node_vector(&self, node_id: NodeId, key_id: PropKeyId, vector: Vec<f32>) -> Result<()> {
    self.with_tx(|tx| {
      tx.pending.set_node_vector(node_id, key_id, vector.clone());
      tx.ops.push(WalOp::SetNodeVector {
        node_id,
        key_id,
        vector,
      });
      Ok(())
    })
  }

  pub fn delete_node_vector(&self, node_id: NodeId, key_id: PropKeyId) -> Result<()> {
    self.with_tx(|tx| {
      tx.pending.delete_node_vector(node_id, key_id);
      tx.ops.push(WalOp::DelNodeVector { node_id, key_id });
      Ok(())
    })
  }

  /// Batch vector load: one WAL record for many nodes under one key
  pub fn set_node_vectors(&self, key_id: PropKeyId, vectors: Vec<(NodeId, Vec<f32>)>) -> Result<()> {
    self.with_tx(|tx| {
      for (node_id, vector) in &vectors {
        tx.pending.set_node_vector(*node_id, key_id, vector.clone());
      }
      tx.ops.push(WalOp::BatchVectors { key_id, vectors });
      Ok(())
    })
  }

  // ==========================================================================
  // Schema definitions
  // ==========================================================================

  /// Define (or look up) a label by name
  pub fn define_label(&self, name: &str) -> Result<LabelId> {
    if let Some(id) = self.label_id(name) {
      return Ok(id);
    }
    let label_id = self.alloc_label_id();
    self.with_tx(|tx| {
      tx.pending.define_label(label_id, name);
      tx.ops.push(WalOp::DefineLabel {
        label_id,
        name: name.to_string(),
      });
      Ok(label_id)
    })
  }

  /// Define (or look up) an edge type by name
  pub fn define_etype(&self, name: &str) -> Result<ETypeId> {
    if let Some(id) = self.etype_id(name) {
      return Ok(id);
    }
    let etype_id = self.alloc_etype_id();
    self.with_tx(|tx| {
      tx.pending.define_etype(etype_id, name);
      tx.ops.push(WalOp::DefineEtype {
        etype_id,
        name: name.to_string(),
      });
      Ok(etype_id)
    })
  }

  /// Define (or look up) a property key by name
  pub fn define_propkey(&self, name: &str) -> Result<PropKeyId> {
    if let Some(id) = self.propkey_id(name) {
      return Ok(id);
    }
    let propkey_id = self.alloc_propkey_id();
    self.with_tx(|tx| {
      tx.pending.define_propkey(propkey_id, name);
      tx.ops.push(WalOp::DefinePropkey {
        propkey_id,
        name: name.to_string(),
      });
      Ok(propkey_id)
    })
  }
}
