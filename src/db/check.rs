//! Structural integrity check.
//!
//! `check()` walks the active snapshot read-only and reports violations of
//! the format's own invariants: row sort order, in/out symmetry, offset
//! monotonicity, key index resolvability, dangling physical indices. It
//! never repairs anything.

use serde::Serialize;

use crate::db::GraphDb;
use crate::error::Result;
use crate::types::*;

/// Report produced by `check()`
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
  pub snapshot_gen: u64,
  pub nodes_checked: u64,
  pub edges_checked: u64,
  pub keys_checked: u64,
  pub errors: Vec<String>,
}

impl CheckReport {
  pub fn is_ok(&self) -> bool {
    self.errors.is_empty()
  }
}

impl GraphDb {
  /// Verify the active snapshot's structural invariants
  pub fn check(&self) -> Result<CheckReport> {
    let snapshot = self.inner.snapshot.read().clone();
    let mut report = CheckReport::default();

    let Some(snap) = snapshot.as_deref() else {
      return Ok(report);
    };
    report.snapshot_gen = snap.header.generation;

    let num_nodes = snap.header.num_nodes as PhysNode;

    for phys in 0..num_nodes {
      report.nodes_checked += 1;

      let Some(node_id) = snap.node_id(phys) else {
        report
          .errors
          .push(format!("phys {phys} has no node id entry"));
        continue;
      };
      if snap.phys_node(node_id) != Some(phys) {
        report.errors.push(format!(
          "node {node_id}: id->phys map does not point back to phys {phys}"
        ));
      }

      // Out rows strictly sorted by (etype, dst), no duplicates
      let row: Vec<(PhysNode, ETypeId)> = snap.iter_out_edges(phys).collect();
      for pair in row.windows(2) {
        let a = (pair[0].1, pair[0].0);
        let b = (pair[1].1, pair[1].0);
        if a >= b {
          report.errors.push(format!(
            "node {node_id}: out-edge row not strictly sorted at ({:?} then {:?})",
            a, b
          ));
        }
      }

      for &(dst_phys, _) in &row {
        report.edges_checked += 1;
        if dst_phys >= num_nodes {
          report.errors.push(format!(
            "node {node_id}: out-edge targets dangling phys {dst_phys}"
          ));
        }
      }

      // In-edges point back at their symmetric out-edge
      for (src_phys, etype, out_idx) in snap.iter_in_edges(phys) {
        if src_phys >= num_nodes {
          report.errors.push(format!(
            "node {node_id}: in-edge from dangling phys {src_phys}"
          ));
          continue;
        }
        match snap.find_edge_index(src_phys, etype, phys) {
          Some(found) if found == out_idx as usize => {}
          Some(found) => report.errors.push(format!(
            "node {node_id}: in-edge out_index {out_idx} disagrees with out position {found}"
          )),
          None => report.errors.push(format!(
            "node {node_id}: in-edge (src_phys {src_phys}, etype {etype}) has no out-edge twin"
          )),
        }
      }

      // Every keyed node resolves through the hash index to itself
      if let Some(key) = snap.node_key(phys) {
        report.keys_checked += 1;
        match snap.lookup_by_key(&key) {
          Some(found) if found == node_id => {}
          Some(found) => report.errors.push(format!(
            "key {key:?} resolves to node {found}, expected {node_id}"
          )),
          None => report
            .errors
            .push(format!("key {key:?} of node {node_id} is missing from the index")),
        }
      }
    }

    Ok(report)
  }
}
