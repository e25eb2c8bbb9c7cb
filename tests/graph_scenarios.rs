//! End-to-end scenarios over the public API: transactions, key lookups,
//! merged traversal, checkpointing, and maintenance operations.

use raydb::{CacheOptions, GraphDb, OpenOptions, PropValue, VacuumOptions};
use tempfile::tempdir;

fn open_db(path: &std::path::Path) -> GraphDb {
  GraphDb::open(path, OpenOptions::new().auto_checkpoint(false)).unwrap()
}

#[test]
fn create_link_reopen() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("social.raydb");

  let (alice, bob, follows) = {
    let db = open_db(&path);
    db.begin_tx().unwrap();
    let alice = db.create_node(Some("alice")).unwrap();
    let bob = db.create_node(Some("bob")).unwrap();
    let follows = db.define_etype("follows").unwrap();
    db.add_edge(alice, follows, bob).unwrap();
    db.commit().unwrap();
    db.close().unwrap();
    (alice, bob, follows)
  };

  let db = open_db(&path);
  assert_eq!(db.lookup_by_key("alice"), Some(alice));
  assert_eq!(db.lookup_by_key("bob"), Some(bob));
  assert_eq!(db.etype_id("follows"), Some(follows));
  assert!(db.edge_exists(alice, follows, bob));
  assert!(!db.edge_exists(bob, follows, alice));
  assert_eq!(db.neighbors_out(alice, Some(follows)), vec![bob]);
  assert_eq!(db.neighbors_in(bob, Some(follows)), vec![alice]);
  db.close().unwrap();
}

#[test]
fn checkpoint_then_small_tx() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("social.raydb");
  let db = open_db(&path);

  db.begin_tx().unwrap();
  let alice = db.create_node(Some("alice")).unwrap();
  let bob = db.create_node(Some("bob")).unwrap();
  let follows = db.define_etype("follows").unwrap();
  db.add_edge(alice, follows, bob).unwrap();
  db.commit().unwrap();

  let gen = db.checkpoint().unwrap();
  assert_eq!(gen, 1);
  let stats = db.stats();
  assert_eq!(stats.snapshot_gen, 1);
  assert_eq!(stats.snapshot_edges, 1);
  assert_eq!(stats.delta_edges_added, 0);
  assert_eq!(stats.wal_bytes_used, 0);

  db.begin_tx().unwrap();
  let carol = db.create_node(Some("carol")).unwrap();
  db.add_edge(alice, follows, carol).unwrap();
  db.commit().unwrap();

  let mut out = db.neighbors_out(alice, Some(follows));
  out.sort_unstable();
  assert_eq!(out, vec![bob, carol]);
  assert_eq!(db.stats().delta_edges_added, 1);

  // Everything survives a reopen: snapshot plus replayed delta
  db.close().unwrap();
  let db = open_db(&path);
  assert_eq!(db.lookup_by_key("carol"), Some(carol));
  let mut out = db.neighbors_out(alice, Some(follows));
  out.sort_unstable();
  assert_eq!(out, vec![bob, carol]);
  db.close().unwrap();
}

#[test]
fn add_delete_cancellation() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("cancel.raydb");
  let db = open_db(&path);

  db.begin_tx().unwrap();
  let a = db.create_node(None).unwrap();
  let d = db.create_node(None).unwrap();
  let follows = db.define_etype("follows").unwrap();
  db.commit().unwrap();

  db.begin_tx().unwrap();
  db.add_edge(a, follows, d).unwrap();
  assert!(db.edge_exists(a, follows, d));
  db.delete_edge(a, follows, d).unwrap();
  assert!(!db.edge_exists(a, follows, d));
  db.commit().unwrap();

  assert!(!db.edge_exists(a, follows, d));
  let stats = db.stats();
  assert_eq!(stats.delta_edges_added, 0);
  assert_eq!(stats.delta_edges_deleted, 0);
  db.close().unwrap();
}

#[test]
fn delete_then_add_is_net_noop_on_snapshot_edge() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("cancel2.raydb");
  let db = open_db(&path);

  db.begin_tx().unwrap();
  let a = db.create_node(None).unwrap();
  let b = db.create_node(None).unwrap();
  let follows = db.define_etype("follows").unwrap();
  db.add_edge(a, follows, b).unwrap();
  db.commit().unwrap();
  db.checkpoint().unwrap();

  db.begin_tx().unwrap();
  db.delete_edge(a, follows, b).unwrap();
  assert!(!db.edge_exists(a, follows, b));
  db.add_edge(a, follows, b).unwrap();
  assert!(db.edge_exists(a, follows, b));
  db.commit().unwrap();

  assert!(db.edge_exists(a, follows, b));
  let stats = db.stats();
  assert_eq!(stats.delta_edges_added, 0);
  assert_eq!(stats.delta_edges_deleted, 0);
  db.close().unwrap();
}

#[test]
fn wal_pressure_triggers_auto_checkpoint() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("pressure.raydb");
  let db = GraphDb::open(
    &path,
    OpenOptions::new()
      .wal_size(64 * 1024)
      .auto_checkpoint(true)
      .background_checkpoint(false),
  )
  .unwrap();

  let mut nodes = Vec::new();
  for i in 0..1000u32 {
    db.begin_tx().unwrap();
    let id = db.create_node(Some(&format!("n{i}"))).unwrap();
    db.commit().unwrap();
    nodes.push(id);
  }

  let stats = db.stats();
  assert!(stats.snapshot_gen >= 1, "no checkpoint ran");
  assert!(stats.wal_usage < 0.8);

  for (i, id) in nodes.iter().enumerate() {
    assert_eq!(db.lookup_by_key(&format!("n{i}")), Some(*id));
  }
  db.close().unwrap();
}

#[test]
fn background_checkpoint_completes_and_preserves_data() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("bg.raydb");
  let db = open_db(&path);

  db.begin_tx().unwrap();
  let a = db.create_node(Some("a")).unwrap();
  let follows = db.define_etype("follows").unwrap();
  for _ in 0..50 {
    let other = db.create_node(None).unwrap();
    db.add_edge(a, follows, other).unwrap();
  }
  db.commit().unwrap();

  db.trigger_background_checkpoint().unwrap();

  // Commits are allowed while the checkpoint runs; they land in the
  // secondary region
  db.begin_tx().unwrap();
  let b = db.create_node(Some("b")).unwrap();
  db.add_edge(a, follows, b).unwrap();
  db.commit().unwrap();

  while db.is_checkpoint_running() {
    std::thread::sleep(std::time::Duration::from_millis(1));
  }

  let stats = db.stats();
  assert_eq!(stats.snapshot_gen, 1);
  assert_eq!(db.lookup_by_key("b"), Some(b));
  assert!(db.edge_exists(a, follows, b));
  assert_eq!(db.neighbors_out(a, Some(follows)).len(), 51);

  // And everything is durable across reopen
  db.close().unwrap();
  let db = open_db(&path);
  assert_eq!(db.lookup_by_key("b"), Some(b));
  assert_eq!(db.neighbors_out(a, Some(follows)).len(), 51);
  db.close().unwrap();
}

#[test]
fn deleted_node_vanishes_from_all_reads() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("del.raydb");
  let db = open_db(&path);

  db.begin_tx().unwrap();
  let a = db.create_node(Some("a")).unwrap();
  let b = db.create_node(Some("b")).unwrap();
  let c = db.create_node(Some("c")).unwrap();
  let follows = db.define_etype("follows").unwrap();
  let name = db.define_propkey("name").unwrap();
  db.add_edge(a, follows, b).unwrap();
  db.add_edge(b, follows, c).unwrap();
  db.set_node_prop(b, name, PropValue::String("bee".into())).unwrap();
  db.commit().unwrap();
  db.checkpoint().unwrap();

  db.begin_tx().unwrap();
  db.delete_node(b).unwrap();
  db.commit().unwrap();

  assert!(!db.node_exists(b));
  assert_eq!(db.lookup_by_key("b"), None);
  assert_eq!(db.node_prop(b, name), None);
  assert!(!db.edge_exists(a, follows, b));
  assert!(!db.edge_exists(b, follows, c));
  assert!(db.neighbors_out(a, None).is_empty());
  assert!(db.neighbors_in(c, None).is_empty());
  assert!(!db.list_edges(None).iter().any(|e| e.src == b || e.dst == b));

  // The checkpoint physically removes node and incident edges
  db.checkpoint().unwrap();
  let stats = db.stats();
  assert_eq!(stats.snapshot_nodes, 2);
  assert_eq!(stats.snapshot_edges, 0);
  assert_eq!(db.lookup_by_key("a"), Some(a));
  db.close().unwrap();
}

#[test]
fn pending_edge_props_are_visible_in_their_transaction() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("pendingprops.raydb");
  let db = open_db(&path);

  db.begin_tx().unwrap();
  let a = db.create_node(None).unwrap();
  let b = db.create_node(None).unwrap();
  let rel = db.define_etype("rel").unwrap();
  let weight = db.define_propkey("weight").unwrap();
  db.add_edge_with_props(a, rel, b, vec![(weight, PropValue::F64(0.5))])
    .unwrap();

  // Visible before commit: pending overlay is consulted first
  assert_eq!(db.edge_prop(a, rel, b, weight), Some(PropValue::F64(0.5)));
  db.set_edge_prop(a, rel, b, weight, PropValue::F64(0.9)).unwrap();
  assert_eq!(db.edge_prop(a, rel, b, weight), Some(PropValue::F64(0.9)));
  db.commit().unwrap();

  assert_eq!(db.edge_prop(a, rel, b, weight), Some(PropValue::F64(0.9)));

  // And across a checkpoint into the snapshot's edge prop table
  db.checkpoint().unwrap();
  assert_eq!(db.edge_prop(a, rel, b, weight), Some(PropValue::F64(0.9)));
  db.close().unwrap();
}

#[test]
fn node_props_and_labels_merge_across_layers() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("props.raydb");
  let db = open_db(&path);

  db.begin_tx().unwrap();
  let n = db.create_node(Some("n")).unwrap();
  let person = db.define_label("Person").unwrap();
  let admin = db.define_label("Admin").unwrap();
  let age = db.define_propkey("age").unwrap();
  db.add_node_label(n, person).unwrap();
  db.set_node_prop(n, age, PropValue::I64(30)).unwrap();
  db.commit().unwrap();
  db.checkpoint().unwrap();

  db.begin_tx().unwrap();
  db.add_node_label(n, admin).unwrap();
  db.remove_node_label(n, person).unwrap();
  db.set_node_prop(n, age, PropValue::I64(31)).unwrap();
  db.commit().unwrap();

  assert_eq!(db.node_labels(n), Some(vec![admin]));
  assert!(db.has_node_label(n, admin));
  assert!(!db.has_node_label(n, person));
  assert_eq!(db.node_prop(n, age), Some(PropValue::I64(31)));

  db.begin_tx().unwrap();
  db.delete_node_prop(n, age).unwrap();
  assert_eq!(db.node_prop(n, age), None);
  db.rollback().unwrap();

  // Rollback discarded the pending deletion
  assert_eq!(db.node_prop(n, age), Some(PropValue::I64(31)));
  db.close().unwrap();
}

#[test]
fn transaction_state_errors() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("txstate.raydb");
  let db = open_db(&path);

  assert!(db.commit().is_err());
  assert!(db.rollback().is_err());
  assert!(db.create_node(None).is_err());

  db.begin_tx().unwrap();
  assert!(db.begin_tx().is_err());
  db.rollback().unwrap();
  db.close().unwrap();

  let ro = GraphDb::open(&path, OpenOptions::new().read_only(true).lock_file(false)).unwrap();
  assert!(ro.begin_tx().is_err());
  assert!(ro.checkpoint().is_err());
}

#[test]
fn duplicate_key_rejected() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("dupkey.raydb");
  let db = open_db(&path);

  db.begin_tx().unwrap();
  db.create_node(Some("singleton")).unwrap();
  assert!(db.create_node(Some("singleton")).is_err());
  db.commit().unwrap();
  db.close().unwrap();
}

#[test]
fn key_reuse_after_delete() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("keyreuse.raydb");
  let db = open_db(&path);

  db.begin_tx().unwrap();
  let first = db.create_node(Some("slot")).unwrap();
  db.commit().unwrap();
  db.checkpoint().unwrap();

  db.begin_tx().unwrap();
  db.delete_node(first).unwrap();
  assert_eq!(db.lookup_by_key("slot"), None);
  let second = db.create_node(Some("slot")).unwrap();
  db.commit().unwrap();

  assert_ne!(first, second);
  assert_eq!(db.lookup_by_key("slot"), Some(second));

  db.checkpoint().unwrap();
  assert_eq!(db.lookup_by_key("slot"), Some(second));
  db.close().unwrap();
}

#[test]
fn many_keys_resolve_through_buckets() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("keys.raydb");
  let db = open_db(&path);

  let mut ids = Vec::new();
  db.begin_tx().unwrap();
  for i in 0..500u32 {
    ids.push(db.create_node(Some(&format!("key:{i}"))).unwrap());
  }
  db.commit().unwrap();
  db.checkpoint().unwrap();

  // All lookups go through the snapshot's bucketed hash index now
  for (i, id) in ids.iter().enumerate() {
    assert_eq!(db.lookup_by_key(&format!("key:{i}")), Some(*id));
  }
  assert_eq!(db.lookup_by_key("key:500"), None);

  let report = db.check().unwrap();
  assert!(report.is_ok(), "check errors: {:?}", report.errors);
  assert_eq!(report.keys_checked, 500);
  db.close().unwrap();
}

#[test]
fn vacuum_reclaims_space_and_preserves_graph() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("vacuum.raydb");
  let db = GraphDb::open(&path, OpenOptions::new().wal_size(512 * 1024).auto_checkpoint(false))
    .unwrap();

  db.begin_tx().unwrap();
  let a = db.create_node(Some("a")).unwrap();
  let b = db.create_node(Some("b")).unwrap();
  let rel = db.define_etype("rel").unwrap();
  db.add_edge(a, rel, b).unwrap();
  db.commit().unwrap();
  db.checkpoint().unwrap();
  // A second checkpoint parks the snapshot in the high slot so vacuum has
  // something to slide down
  db.begin_tx().unwrap();
  let c = db.create_node(Some("c")).unwrap();
  db.commit().unwrap();
  db.checkpoint().unwrap();

  let before = std::fs::metadata(&path).unwrap().len();
  db.vacuum(Some(VacuumOptions::default())).unwrap();
  let after = std::fs::metadata(&path).unwrap().len();
  assert!(after <= before);

  assert_eq!(db.lookup_by_key("a"), Some(a));
  assert_eq!(db.lookup_by_key("c"), Some(c));
  assert!(db.edge_exists(a, rel, b));

  // Still intact after reopen
  db.close().unwrap();
  let db = GraphDb::open(&path, OpenOptions::new()).unwrap();
  assert!(db.edge_exists(a, rel, b));
  assert_eq!(db.check().unwrap().errors.len(), 0);
  db.close().unwrap();
}

#[test]
fn resize_wal_grow_and_reopen() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("resize.raydb");
  let db = GraphDb::open(&path, OpenOptions::new().wal_size(64 * 1024).auto_checkpoint(false))
    .unwrap();

  db.begin_tx().unwrap();
  let a = db.create_node(Some("a")).unwrap();
  db.commit().unwrap();

  db.resize_wal(1024 * 1024, None).unwrap();
  db.close().unwrap();

  let db = GraphDb::open(&path, OpenOptions::new()).unwrap();
  assert_eq!(db.lookup_by_key("a"), Some(a));
  db.close().unwrap();
}

#[test]
fn lock_contention_between_handles() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("locked.raydb");
  let db = open_db(&path);

  // A second writer cannot share the file
  let second = GraphDb::open(&path, OpenOptions::new());
  assert!(matches!(second, Err(raydb::RayError::LockContention(_))));
  db.close().unwrap();
}

#[test]
fn two_checkpoints_differ_only_in_generation_and_timestamp() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("idempotent.raydb");
  let db = open_db(&path);

  db.begin_tx().unwrap();
  let a = db.create_node(Some("a")).unwrap();
  let b = db.create_node(Some("b")).unwrap();
  let rel = db.define_etype("rel").unwrap();
  db.add_edge(a, rel, b).unwrap();
  db.commit().unwrap();

  db.checkpoint().unwrap();
  let stats1 = db.stats();
  db.checkpoint().unwrap();
  let stats2 = db.stats();

  assert_eq!(stats2.snapshot_gen, stats1.snapshot_gen + 1);
  assert_eq!(stats1.snapshot_nodes, stats2.snapshot_nodes);
  assert_eq!(stats1.snapshot_edges, stats2.snapshot_edges);
  assert!(db.check().unwrap().is_ok());
  db.close().unwrap();
}

#[test]
fn readding_snapshot_edge_is_a_noop() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("readd.raydb");
  let db = open_db(&path);

  db.begin_tx().unwrap();
  let a = db.create_node(Some("a")).unwrap();
  let b = db.create_node(Some("b")).unwrap();
  let follows = db.define_etype("follows").unwrap();
  db.add_edge(a, follows, b).unwrap();
  db.commit().unwrap();
  db.checkpoint().unwrap();

  // The edge now lives in the snapshot CSR; adding it again lands in the
  // delta overlay but must not produce a second neighbor or edge
  db.begin_tx().unwrap();
  db.add_edge(a, follows, b).unwrap();
  assert_eq!(db.neighbors_out(a, Some(follows)), vec![b]);
  db.commit().unwrap();

  assert_eq!(db.neighbors_out(a, Some(follows)), vec![b]);
  assert_eq!(db.neighbors_out(a, None), vec![b]);
  assert_eq!(db.neighbors_in(b, Some(follows)), vec![a]);
  assert_eq!(db.count_edges(), 1);
  assert_eq!(db.list_edges(Some(follows)).len(), 1);

  // And the next checkpoint folds it back into a single CSR entry
  db.checkpoint().unwrap();
  assert_eq!(db.stats().snapshot_edges, 1);
  assert_eq!(db.neighbors_out(a, Some(follows)), vec![b]);
  db.close().unwrap();
}

#[test]
fn property_cache_serves_repeat_reads() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("propcache.raydb");
  let db = GraphDb::open(
    &path,
    OpenOptions::new()
      .auto_checkpoint(false)
      .cache(Some(CacheOptions::default())),
  )
  .unwrap();

  db.begin_tx().unwrap();
  let a = db.create_node(Some("a")).unwrap();
  let b = db.create_node(Some("b")).unwrap();
  let rel = db.define_etype("rel").unwrap();
  let age = db.define_propkey("age").unwrap();
  let weight = db.define_propkey("weight").unwrap();
  db.set_node_prop(a, age, PropValue::I64(30)).unwrap();
  db.add_edge_with_props(a, rel, b, vec![(weight, PropValue::F64(0.5))])
    .unwrap();
  db.commit().unwrap();

  // First read populates, second hits
  assert_eq!(db.node_prop(a, age), Some(PropValue::I64(30)));
  assert_eq!(db.node_prop(a, age), Some(PropValue::I64(30)));
  assert_eq!(db.edge_prop(a, rel, b, weight), Some(PropValue::F64(0.5)));
  assert_eq!(db.edge_prop(a, rel, b, weight), Some(PropValue::F64(0.5)));
  let stats = db.cache_stats().unwrap();
  assert!(stats.hits >= 2, "expected cache hits, got {stats:?}");

  // Negative lookups are cached too
  assert_eq!(db.node_prop(a, weight), None);
  assert_eq!(db.node_prop(a, weight), None);

  // A committed update invalidates the stale entries
  db.begin_tx().unwrap();
  db.set_node_prop(a, age, PropValue::I64(31)).unwrap();
  db.set_edge_prop(a, rel, b, weight, PropValue::F64(0.9)).unwrap();
  db.commit().unwrap();
  assert_eq!(db.node_prop(a, age), Some(PropValue::I64(31)));
  assert_eq!(db.edge_prop(a, rel, b, weight), Some(PropValue::F64(0.9)));

  // Reads inside a transaction bypass the cache and see pending state
  db.begin_tx().unwrap();
  db.set_node_prop(a, age, PropValue::I64(32)).unwrap();
  assert_eq!(db.node_prop(a, age), Some(PropValue::I64(32)));
  db.rollback().unwrap();
  assert_eq!(db.node_prop(a, age), Some(PropValue::I64(31)));
  db.close().unwrap();
}

#[test]
fn vectors_round_trip_through_props() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("vectors.raydb");
  let db = open_db(&path);

  db.begin_tx().unwrap();
  let n = db.create_node(Some("n")).unwrap();
  let embedding = db.define_propkey("embedding").unwrap();
  db.set_node_prop(n, embedding, PropValue::VectorF32(vec![0.1, 0.2, 0.3]))
    .unwrap();
  db.commit().unwrap();

  assert_eq!(
    db.node_prop(n, embedding),
    Some(PropValue::VectorF32(vec![0.1, 0.2, 0.3]))
  );

  // Vector payloads survive the snapshot's out-of-line encoding
  db.checkpoint().unwrap();
  assert_eq!(
    db.node_prop(n, embedding),
    Some(PropValue::VectorF32(vec![0.1, 0.2, 0.3]))
  );
  db.close().unwrap();
}
