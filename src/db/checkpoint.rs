//! Checkpointing: fold (snapshot ∪ delta) into a new immutable snapshot
//! and reset the WAL.
//!
//! The blocking form runs inline and requires no open transaction. The
//! background form flips new commits to the secondary WAL region, builds
//! the snapshot off-thread, then merges the secondary back into a reset
//! primary inside a merge-locked window; commits arriving in that window
//! wait for release.
//!
//! New snapshots alternate between the slot right after the WAL area and
//! the slot after the live snapshot, so the live snapshot is never
//! overwritten before the header swap. Vacuum slides the surviving
//! snapshot back down and truncates.

use std::sync::atomic::Ordering;

use tracing::{debug, warn};

use crate::db::delta::DeltaState;
use crate::db::recovery::{
  extract_committed_transactions, prune_absorbed, replay_committed, ReplayState,
};
use crate::db::{CheckpointPhase, GraphDb};
use crate::error::{RayError, Result};
use crate::storage::header::WalRegion;
use crate::storage::pager::{pages_to_store, FilePager};
use crate::storage::snapshot::reader::{ParseOptions, Snapshot};
use crate::storage::snapshot::writer::{build_snapshot, EdgeRecord, NodeRecord, SnapshotInput};
use crate::storage::wal::record::WalRecord;
use crate::types::*;

impl GraphDb {
  // ==========================================================================
  // State machine accessors
  // ==========================================================================

  pub fn checkpoint_phase(&self) -> CheckpointPhase {
    self.inner.checkpoint.state.lock().phase
  }

  pub fn is_checkpoint_running(&self) -> bool {
    self.checkpoint_phase() != CheckpointPhase::Idle
  }

  /// Block until no checkpoint is in progress
  pub(crate) fn wait_for_checkpoint_idle(&self) {
    let mut state = self.inner.checkpoint.state.lock();
    while state.phase != CheckpointPhase::Idle {
      self.inner.checkpoint.cv.wait(&mut state);
    }
  }

  /// Block while a completing checkpoint holds the merge lock
  pub(crate) fn wait_for_merge_unlock(&self) {
    let mut state = self.inner.checkpoint.state.lock();
    while state.merge_locked {
      self.inner.checkpoint.cv.wait(&mut state);
    }
  }

  fn set_phase(&self, phase: CheckpointPhase, merge_locked: bool) {
    let mut state = self.inner.checkpoint.state.lock();
    state.phase = phase;
    state.merge_locked = merge_locked;
    drop(state);
    self.inner.checkpoint.cv.notify_all();
  }

  /// Surface the outcome of the most recent background run, if finished
  pub(crate) fn drain_background_result(&self) {
    let rx = self.inner.checkpoint.done_rx.lock().take();
    if let Some(rx) = rx {
      if let Ok(Err(e)) = rx.try_recv() {
        warn!("background checkpoint failed: {e}");
      }
    }
  }

  /// True when the primary region's usage exceeds `threshold`
  pub fn should_checkpoint(&self, threshold: f64) -> bool {
    let stats = self.inner.wal.lock().stats();
    stats.primary_usage() > threshold
  }

  // ==========================================================================
  // Graph collection
  // ==========================================================================

  /// Materialize (snapshot ∪ delta): surviving snapshot nodes with their
  /// edits applied, surviving snapshot edges, then delta-created nodes and
  /// delta-added edges whose endpoints are alive.
  pub(crate) fn collect_graph_data(&self) -> (Vec<NodeRecord>, Vec<EdgeRecord>) {
    let delta = self.inner.delta.read();
    let snapshot = self.inner.snapshot.read().clone();

    let mut nodes = Vec::new();
    let mut edges = Vec::new();

    if let Some(snap) = snapshot.as_deref() {
      for phys in 0..snap.header.num_nodes as PhysNode {
        let Some(node_id) = snap.node_id(phys) else {
          continue;
        };
        if delta.is_node_deleted(node_id) {
          continue;
        }

        let mut labels = snap.node_labels(phys);
        let mut props = snap.node_props(phys);
        if let Some(node_delta) = delta.modified_nodes.get(&node_id) {
          labels.retain(|l| !node_delta.labels_removed.contains(l));
          for &label_id in &node_delta.labels_added {
            if !labels.contains(&label_id) {
              labels.push(label_id);
            }
          }
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

        nodes.push(NodeRecord {
          node_id,
          key: snap.node_key(phys),
          labels,
          props,
        });

        for (dst_phys, etype) in snap.iter_out_edges(phys) {
          let Some(dst) = snap.node_id(dst_phys) else {
            continue;
          };
          if delta.is_edge_deleted(node_id, etype, dst) || delta.is_node_deleted(dst) {
            continue;
          }

          let mut props = snap
            .find_edge_index(phys, etype, dst_phys)
            .map(|idx| snap.edge_props(idx))
            .unwrap_or_default();
          if let Some(edits) = delta.edge_props.get(&(node_id, etype, dst)) {
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

          edges.push(EdgeRecord {
            src: node_id,
            etype,
            dst,
            props,
          });
        }
      }
    }

    for (&node_id, node_delta) in &delta.created_nodes {
      let props = node_delta
        .props
        .iter()
        .filter_map(|(&k, v)| v.as_ref().map(|v| (k, v.clone())))
        .collect();
      nodes.push(NodeRecord {
        node_id,
        key: node_delta.key.clone(),
        labels: node_delta.labels_added.clone(),
        props,
      });
    }

    for (&src, patches) in &delta.out_add {
      if delta.is_node_deleted(src) {
        continue;
      }
      for patch in patches.iter() {
        if delta.is_node_deleted(patch.other) {
          continue;
        }
        let props = delta
          .edge_props
          .get(&(src, patch.etype, patch.other))
          .map(|edits| {
            edits
              .iter()
              .filter_map(|(&k, v)| v.as_ref().map(|v| (k, v.clone())))
              .collect()
          })
          .unwrap_or_default();
        edges.push(EdgeRecord {
          src,
          etype: patch.etype,
          dst: patch.other,
          props,
        });
      }
    }

    (nodes, edges)
  }

  fn snapshot_input(&self, generation: u64) -> SnapshotInput {
    let (nodes, edges) = self.collect_graph_data();
    let catalogs = self.inner.catalogs.read();
    SnapshotInput {
      generation,
      nodes,
      edges,
      labels: catalogs.labels.to_map(),
      etypes: catalogs.etypes.to_map(),
      propkeys: catalogs.propkeys.to_map(),
      compression: self.inner.checkpoint_compression.clone(),
    }
  }

  // ==========================================================================
  // Placement and page I/O
  // ==========================================================================

  /// Pick a slot for `page_count` snapshot pages that cannot overlap the
  /// live snapshot: the slot at the WAL end when it is free and large
  /// enough, otherwise directly above the live snapshot.
  fn pick_snapshot_slot(&self, page_count: u64) -> u64 {
    let header = self.inner.header.read();
    let wal_end = header.wal_start_page + header.wal_page_count;
    if header.snapshot_page_count == 0 {
      wal_end
    } else if header.snapshot_start_page > wal_end
      && wal_end + page_count <= header.snapshot_start_page
    {
      wal_end
    } else {
      header.snapshot_start_page + header.snapshot_page_count
    }
  }

  pub(crate) fn write_snapshot_pages(
    &self,
    pager: &mut FilePager,
    start_page: u64,
    buffer: &[u8],
  ) -> Result<()> {
    let page_size = pager.page_size();
    let page_count = pages_to_store(buffer.len(), page_size);
    for i in 0..page_count {
      let from = (i as usize) * page_size;
      let to = (from + page_size).min(buffer.len());
      let mut page = vec![0u8; page_size];
      page[..to - from].copy_from_slice(&buffer[from..to]);
      pager.write_page(start_page + i, &page)?;
    }
    pager.sync()
  }

  /// Re-map and re-parse the snapshot the header points at. The bytes were
  /// just written and fsync'd by this process, so the footer CRC check is
  /// skipped.
  pub(crate) fn reload_snapshot(&self) -> Result<()> {
    let (start_page, page_count, page_size) = {
      let header = self.inner.header.read();
      (
        header.snapshot_start_page,
        header.snapshot_page_count,
        header.page_size as u64,
      )
    };

    let new_snapshot = if page_count == 0 {
      None
    } else {
      let mmap = {
        let mut pager = self.inner.pager.lock();
        pager.invalidate_mmaps();
        pager.mmap_whole()?
      };
      let options = ParseOptions {
        skip_crc_validation: true,
        cache_decompressed: self.inner.cache_snapshot,
      };
      Some(std::sync::Arc::new(Snapshot::parse(
        mmap,
        (start_page * page_size) as usize,
        &options,
      )?))
    };

    *self.inner.snapshot.write() = new_snapshot;
    Ok(())
  }

  // ==========================================================================
  // Blocking checkpoint
  // ==========================================================================

  /// Blocking checkpoint: build the new snapshot inline, swap the header,
  /// reset the WAL, clear the delta. Returns the new generation.
  pub fn checkpoint(&self) -> Result<u64> {
    if self.inner.read_only {
      return Err(RayError::ReadOnly);
    }
    if self.has_transaction() {
      return Err(RayError::TransactionInProgress);
    }

    // Claim the state machine atomically; a concurrent claimant waits
    {
      let mut state = self.inner.checkpoint.state.lock();
      while state.phase != CheckpointPhase::Idle {
        self.inner.checkpoint.cv.wait(&mut state);
      }
      state.phase = CheckpointPhase::Running;
    }
    self.drain_background_result();

    let result = self.run_blocking_checkpoint();
    self.set_phase(CheckpointPhase::Idle, false);
    result
  }

  fn run_blocking_checkpoint(&self) -> Result<u64> {
    let new_gen = self.inner.header.read().active_snapshot_gen + 1;
    let buffer = build_snapshot(self.snapshot_input(new_gen))?;
    let page_count = {
      let pager = self.inner.pager.lock();
      pages_to_store(buffer.len(), pager.page_size())
    };
    let start_page = self.pick_snapshot_slot(page_count);
    {
      let mut pager = self.inner.pager.lock();
      self.write_snapshot_pages(&mut pager, start_page, &buffer)?;
    }

    {
      let mut pager = self.inner.pager.lock();
      let mut wal = self.inner.wal.lock();
      let mut header = self.inner.header.write();
      header.update_for_compaction(start_page, page_count, new_gen);
      header.max_node_id = self.inner.next_node_id.load(Ordering::SeqCst).saturating_sub(1);
      header.next_tx_id = self.inner.next_tx_id.load(Ordering::SeqCst);
      wal.reset();
      pager.write_page(0, &header.serialize_to_page())?;
      pager.sync()?;
    }

    self.inner.delta.write().clear();
    self.reload_snapshot()?;
    self.cache_clear();
    debug!(generation = new_gen, "checkpoint complete");
    Ok(new_gen)
  }

  // ==========================================================================
  // Background checkpoint
  // ==========================================================================

  /// Switch new commits to the secondary WAL region and schedule the
  /// checkpoint work on a background thread. Returns immediately.
  pub fn trigger_background_checkpoint(&self) -> Result<()> {
    if self.inner.read_only {
      return Err(RayError::ReadOnly);
    }

    {
      let mut state = self.inner.checkpoint.state.lock();
      if state.phase != CheckpointPhase::Idle {
        return Ok(());
      }
      state.phase = CheckpointPhase::Running;
    }

    // Switch: persist the region flip so a crash replays both regions
    let switch = (|| -> Result<()> {
      let mut pager = self.inner.pager.lock();
      let mut wal = self.inner.wal.lock();
      wal.flush(&mut pager)?;
      wal.switch_to_secondary();
      let mut header = self.inner.header.write();
      header.active_wal_region = WalRegion::Secondary;
      header.checkpoint_in_progress = true;
      header.change_counter += 1;
      pager.write_page(0, &header.serialize_to_page())?;
      pager.sync()?;
      Ok(())
    })();
    if let Err(e) = switch {
      self.set_phase(CheckpointPhase::Idle, false);
      return Err(e);
    }

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    *self.inner.checkpoint.done_rx.lock() = Some(done_rx);

    let db = self.clone();
    std::thread::Builder::new()
      .name("raydb-checkpoint".to_string())
      .spawn(move || {
        let result = db.run_background_checkpoint();
        if let Err(e) = &result {
          warn!("background checkpoint failed, recovering header: {e}");
          if let Err(recover) = db.recover_failed_checkpoint() {
            warn!("checkpoint recovery write failed: {recover}");
          }
        }
        db.set_phase(CheckpointPhase::Idle, false);
        let _ = done_tx.send(result);
      })
      .map_err(|e| RayError::Internal(format!("failed to spawn checkpoint thread: {e}")))?;

    Ok(())
  }

  fn run_background_checkpoint(&self) -> Result<u64> {
    // Build: writers continue on the secondary region
    let new_gen = self.inner.header.read().active_snapshot_gen + 1;
    let buffer = build_snapshot(self.snapshot_input(new_gen))?;

    // Write the snapshot pages outside any lock-sensitive window
    let page_count = {
      let pager = self.inner.pager.lock();
      pages_to_store(buffer.len(), pager.page_size())
    };
    let start_page = self.pick_snapshot_slot(page_count);
    {
      let mut pager = self.inner.pager.lock();
      self.write_snapshot_pages(&mut pager, start_page, &buffer)?;
    }

    // Merge: drain the secondary into a reset primary under the merge lock
    self.set_phase(CheckpointPhase::Merging, true);
    let carried: Vec<WalRecord> = {
      let mut pager = self.inner.pager.lock();
      let mut wal = self.inner.wal.lock();
      wal.merge_secondary_into_primary(&mut pager)?
    };

    // Complete: publish the new snapshot and swap in a delta holding only
    // the commits that landed during the checkpoint
    self.set_phase(CheckpointPhase::Completing, true);
    {
      let mut pager = self.inner.pager.lock();
      let wal = self.inner.wal.lock();
      let mut header = self.inner.header.write();
      header.update_for_compaction(start_page, page_count, new_gen);
      header.wal_primary_head = wal.primary_head();
      header.wal_head = wal.primary_head();
      header.max_node_id = self.inner.next_node_id.load(Ordering::SeqCst).saturating_sub(1);
      header.next_tx_id = self.inner.next_tx_id.load(Ordering::SeqCst);
      pager.write_page(0, &header.serialize_to_page())?;
      pager.sync()?;
    }

    self.reload_snapshot()?;

    let carried_delta = self.replay_carried_records(carried);
    *self.inner.delta.write() = carried_delta;
    self.cache_clear();

    self.set_phase(CheckpointPhase::Idle, false);
    debug!(generation = new_gen, "background checkpoint complete");
    Ok(new_gen)
  }

  /// Rebuild a fresh delta from the records the merge carried over; they
  /// are the commits that arrived while the snapshot was building. A
  /// commit that squeezed in between the region switch and the build's
  /// collection is present in *both* the new snapshot and the carried
  /// records, so the replayed delta is pruned against the snapshot.
  fn replay_carried_records(&self, carried: Vec<WalRecord>) -> DeltaState {
    let mut delta = DeltaState::new();
    if carried.is_empty() {
      return delta;
    }

    let snapshot = self.inner.snapshot.read().clone();
    {
      let mut catalogs = self.inner.catalogs.write();
      let mut state = ReplayState::new(
        self.inner.next_node_id.load(Ordering::SeqCst),
        self.inner.next_label_id.load(Ordering::SeqCst),
        self.inner.next_etype_id.load(Ordering::SeqCst),
        self.inner.next_propkey_id.load(Ordering::SeqCst),
      );
      let committed = extract_committed_transactions(carried);
      replay_committed(
        committed,
        &mut delta,
        &mut catalogs,
        &mut state,
        snapshot.as_deref(),
      );
    }

    if let Some(snap) = snapshot.as_deref() {
      prune_absorbed(&mut delta, snap);
    }
    delta
  }

  /// Best-effort recovery after a failed background step: clear the
  /// in-progress flag and region switch so a subsequent open replays both
  /// regions from the WAL.
  fn recover_failed_checkpoint(&self) -> Result<()> {
    let mut pager = self.inner.pager.lock();
    let mut wal = self.inner.wal.lock();
    wal.switch_to_primary(false);
    let mut header = self.inner.header.write();
    header.checkpoint_in_progress = false;
    header.active_wal_region = WalRegion::Primary;
    header.change_counter += 1;
    pager.write_page(0, &header.serialize_to_page())?;
    pager.sync()?;
    Ok(())
  }
}
