//! Write-path and traversal microbenchmarks over the single-file engine.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use raydb::{GraphDb, OpenOptions};
use tempfile::tempdir;

fn bench_commits(c: &mut Criterion) {
  let dir = tempdir().unwrap();
  let db = GraphDb::open(
    dir.path().join("bench.raydb"),
    OpenOptions::new().wal_size(16 * 1024 * 1024).auto_checkpoint(false),
  )
  .unwrap();

  let mut i = 0u64;
  c.bench_function("commit_create_node", |b| {
    b.iter(|| {
      db.begin_tx().unwrap();
      db.create_node(Some(&format!("bench:{i}"))).unwrap();
      db.commit().unwrap();
      i += 1;
    })
  });

  db.close().unwrap();
}

fn bench_traversal(c: &mut Criterion) {
  let dir = tempdir().unwrap();
  let db = GraphDb::open(
    dir.path().join("traverse.raydb"),
    OpenOptions::new().wal_size(16 * 1024 * 1024).auto_checkpoint(false),
  )
  .unwrap();

  db.begin_tx().unwrap();
  let hub = db.create_node(Some("hub")).unwrap();
  let follows = db.define_etype("follows").unwrap();
  for _ in 0..1000 {
    let other = db.create_node(None).unwrap();
    db.add_edge(hub, follows, other).unwrap();
  }
  db.commit().unwrap();
  db.checkpoint().unwrap();

  c.bench_function("neighbors_out_snapshot_hub", |b| {
    b.iter_batched(
      || (),
      |()| db.neighbors_out(hub, Some(follows)).len(),
      BatchSize::SmallInput,
    )
  });

  c.bench_function("lookup_by_key_snapshot", |b| {
    b.iter(|| db.lookup_by_key("hub"))
  });

  db.close().unwrap();
}

criterion_group!(benches, bench_commits, bench_traversal);
criterion_main!(benches);
