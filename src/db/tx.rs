//! Transaction lifecycle: begin, commit, rollback.
//!
//! Mutations only touch the transaction's pending buffers and its ordered
//! op log. Commit composes `BEGIN .. ops .. COMMIT`, appends them to the
//! WAL with page batching, fsyncs the header that references the new head,
//! and only then folds the pending buffers into the shared delta. The op
//! log preserves mutation order, so an add/delete pair of the same edge is
//! committed verbatim even though the delta nets to nothing.

use std::sync::atomic::Ordering;

use tracing::warn;

use crate::constants::WAL_SECONDARY_BACKPRESSURE;
use crate::db::delta::DeltaState;
use crate::db::{CheckpointPhase, GraphDb, TxState};
use crate::error::{RayError, Result};
use crate::storage::header::WalRegion;
use crate::storage::wal::record::{WalOp, WalRecord};
use crate::types::TxId;

impl GraphDb {
  /// Begin a transaction. Rejects on read-only handles and while another
  /// transaction is open (single-writer).
  pub fn begin_tx(&self) -> Result<TxId> {
    if self.inner.read_only {
      return Err(RayError::ReadOnly);
    }

    let mut current = self.inner.current_tx.lock();
    if current.is_some() {
      return Err(RayError::TransactionInProgress);
    }

    let txid = self.alloc_tx_id();
    *current = Some(TxState::new(txid));
    drop(current);

    if let Some(hooks) = self.inner.mvcc_hooks.read().as_ref() {
      hooks.begin_tx(txid);
    }
    Ok(txid)
  }

  /// Discard the current transaction. Nothing was written, so nothing is
  /// undone on disk.
  pub fn rollback(&self) -> Result<()> {
    let tx = self
      .inner
      .current_tx
      .lock()
      .take()
      .ok_or(RayError::NoTransaction)?;

    if let Some(hooks) = self.inner.mvcc_hooks.read().as_ref() {
      hooks.abort_tx(tx.txid);
    }
    Ok(())
  }

  pub fn has_transaction(&self) -> bool {
    self.inner.current_tx.lock().is_some()
  }

  pub fn current_txid(&self) -> Option<TxId> {
    self.inner.current_tx.lock().as_ref().map(|tx| tx.txid)
  }

  /// Commit the current transaction.
  ///
  /// Durability order: WAL records via page batching, page flush, then the
  /// header fsync that publishes the new head. The transaction is durable
  /// only after step three; a crash before it rolls back to the previous
  /// header.
  pub fn commit(&self) -> Result<()> {
    let tx = self
      .inner
      .current_tx
      .lock()
      .take()
      .ok_or(RayError::NoTransaction)?;
    let TxState { txid, pending, ops } = tx;

    let mut records = Vec::with_capacity(ops.len() + 2);
    records.push(WalRecord::new(txid, WalOp::Begin));
    for op in ops {
      records.push(WalRecord::new(txid, op));
    }
    records.push(WalRecord::new(txid, WalOp::Commit));
    let needed: usize = records.iter().map(|r| r.encoded_len()).sum();

    self.apply_commit_backpressure(needed)?;
    self.write_commit_records(&records, needed)?;

    // Durable from here on: apply to the shared delta and collaborators
    {
      let mut catalogs = self.inner.catalogs.write();
      for (id, name) in &pending.new_labels {
        catalogs.labels.insert(*id, name);
      }
      for (id, name) in &pending.new_etypes {
        catalogs.etypes.insert(*id, name);
      }
      for (id, name) in &pending.new_propkeys {
        catalogs.propkeys.insert(*id, name);
      }
    }

    self.apply_pending_vectors(&pending);
    self.invalidate_caches_for(&pending);

    {
      let mut delta = self.inner.delta.write();
      merge_pending_delta(&mut delta, pending);
    }

    if let Some(hooks) = self.inner.mvcc_hooks.read().as_ref() {
      hooks.commit_tx(txid);
    }
    Ok(())
  }

  /// Pre-write flow control: trigger an auto-checkpoint when the primary
  /// projection crosses the threshold, await a running checkpoint when the
  /// secondary is nearly full, and await the merge window.
  fn apply_commit_backpressure(&self, needed: usize) -> Result<()> {
    let (active, projected) = {
      let wal = self.inner.wal.lock();
      (wal.active_region(), wal.projected_usage(needed))
    };

    match active {
      WalRegion::Primary => {
        if self.inner.auto_checkpoint
          && projected > self.inner.checkpoint_threshold
          && self.checkpoint_phase() == CheckpointPhase::Idle
        {
          if self.inner.background_checkpoint {
            self.trigger_background_checkpoint()?;
          } else {
            self.checkpoint()?;
          }
        }
      }
      WalRegion::Secondary => {
        if projected >= WAL_SECONDARY_BACKPRESSURE {
          self.wait_for_checkpoint_idle();
        }
      }
    }

    self.wait_for_merge_unlock();
    Ok(())
  }

  /// Append and fsync the commit's records, retrying once after a
  /// checkpoint when the active region cannot fit them.
  fn write_commit_records(&self, records: &[WalRecord], needed: usize) -> Result<()> {
    let _commit_guard = self.inner.commit_lock.lock();
    let mut full_retries = 0;

    loop {
      self.wait_for_merge_unlock();

      {
        let mut pager = self.inner.pager.lock();
        let mut wal = self.inner.wal.lock();

        // The merge may have started between the unlock check and taking
        // the WAL lock; records written now would miss the merge scan
        if self.inner.checkpoint.state.lock().merge_locked {
          continue;
        }

        if wal.can_fit(needed) {
          for record in records {
            wal.write_record(record, &mut pager)?;
          }
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
          return Ok(());
        }
      }

      // Region full: drain it. A running background checkpoint will reset
      // the regions when it completes; otherwise run a blocking one now.
      full_retries += 1;
      if full_retries > 2 {
        return Err(RayError::WalBufferFull {
          needed,
          available: 0,
        });
      }
      if self.is_checkpoint_running() {
        self.wait_for_checkpoint_idle();
      } else {
        self.checkpoint()?;
      }
    }
  }

  /// Push committed vector edits into the registered vector store
  fn apply_pending_vectors(&self, pending: &DeltaState) {
    if pending.pending_vectors.is_empty() {
      return;
    }
    let store = self.inner.vector_store.read();
    let Some(store) = store.as_ref() else {
      return;
    };
    for ((node_id, key_id), op) in &pending.pending_vectors {
      let result = match op {
        Some(vector) => store.insert(*node_id, *key_id, vector),
        None => store.delete(*node_id, *key_id),
      };
      if let Err(e) = result {
        warn!(node_id, key_id, "vector store rejected committed edit: {e}");
      }
    }
  }

  /// Invalidate cache entries touched by a committed transaction
  fn invalidate_caches_for(&self, pending: &DeltaState) {
    if !self.cache_enabled() {
      return;
    }
    for &node_id in pending.created_nodes.keys() {
      self.cache_invalidate_node(node_id);
    }
    for &node_id in &pending.deleted_nodes {
      self.cache_invalidate_node(node_id);
    }
    for &node_id in pending.modified_nodes.keys() {
      self.cache_invalidate_node(node_id);
    }
    for (&src, patches) in pending.out_add.iter().chain(pending.out_del.iter()) {
      for patch in patches.iter() {
        self.cache_invalidate_edge(src, patch.etype, patch.other);
      }
    }
    for (src, etype, dst) in pending.edge_props.keys() {
      self.cache_invalidate_edge(*src, *etype, *dst);
    }
    for key in pending.key_index.keys() {
      self.cache_invalidate_key(key);
    }
    for key in &pending.key_index_deleted {
      self.cache_invalidate_key(key);
    }
  }
}

/// Fold a committed transaction's pending buffers into the shared delta,
/// re-driving each change through the delta's own apply methods so the
/// cancellation rules compose across transactions.
pub(crate) fn merge_pending_delta(target: &mut DeltaState, mut pending: DeltaState) {
  target.new_labels.extend(pending.new_labels.drain());
  target.new_etypes.extend(pending.new_etypes.drain());
  target.new_propkeys.extend(pending.new_propkeys.drain());

  for (node_id, mut node_delta) in pending.created_nodes.drain() {
    target.create_node(node_id, node_delta.key.as_deref());
    for label_id in node_delta.labels_added.drain(..) {
      target.add_node_label(node_id, label_id);
    }
    for label_id in node_delta.labels_removed.drain(..) {
      target.remove_node_label(node_id, label_id);
    }
    for (key_id, value) in node_delta.props.drain() {
      match value {
        Some(value) => target.set_node_prop(node_id, key_id, value),
        None => target.delete_node_prop(node_id, key_id),
      }
    }
  }

  for node_id in pending.deleted_nodes.drain() {
    target.delete_node(node_id, None);
  }

  for (node_id, mut node_delta) in pending.modified_nodes.drain() {
    for label_id in node_delta.labels_added.drain(..) {
      target.add_node_label(node_id, label_id);
    }
    for label_id in node_delta.labels_removed.drain(..) {
      target.remove_node_label(node_id, label_id);
    }
    for (key_id, value) in node_delta.props.drain() {
      match value {
        Some(value) => target.set_node_prop(node_id, key_id, value),
        None => target.delete_node_prop(node_id, key_id),
      }
    }
  }

  for (src, patches) in pending.out_add.drain() {
    for patch in patches.iter() {
      target.add_edge(src, patch.etype, patch.other);
    }
  }
  for (src, patches) in pending.out_del.drain() {
    for patch in patches.iter() {
      target.delete_edge(src, patch.etype, patch.other);
    }
  }

  for ((src, etype, dst), props) in pending.edge_props.drain() {
    for (key_id, value) in props {
      match value {
        Some(value) => target.set_edge_prop(src, etype, dst, key_id, value),
        None => target.delete_edge_prop(src, etype, dst, key_id),
      }
    }
  }

  for (key, node_id) in pending.key_index.drain() {
    target.key_index.insert(key, node_id);
  }
  for key in pending.key_index_deleted.drain() {
    target.key_index.remove(&key);
    target.key_index_deleted.insert(key);
  }

  for ((node_id, key_id), op) in pending.pending_vectors.drain() {
    target.pending_vectors.insert((node_id, key_id), op);
  }
}
