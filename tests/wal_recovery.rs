//! Crash recovery scenarios: torn commits, incomplete transactions,
//! interrupted background checkpoints, and snapshot corruption.
//!
//! Torn states are produced by writing WAL record bytes and header pages
//! directly, simulating a process that died at a specific point in the
//! commit sequence.

use std::fs::OpenOptions as FsOpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};

use raydb::constants::SNAPSHOT_HEADER_SIZE;
use raydb::storage::header::{DbHeader, WalRegion};
use raydb::storage::pager::FilePager;
use raydb::storage::snapshot::layout::SectionId;
use raydb::storage::wal::record::{WalOp, WalRecord};
use raydb::storage::wal::ring::WalRing;
use raydb::{GraphDb, OpenOptions, RayError};
use tempfile::tempdir;

fn open_db(path: &std::path::Path) -> GraphDb {
  GraphDb::open(path, OpenOptions::new().auto_checkpoint(false)).unwrap()
}

fn read_header(path: &std::path::Path) -> DbHeader {
  let mut file = std::fs::File::open(path).unwrap();
  let mut page = vec![0u8; 4096];
  file.read_exact(&mut page).unwrap();
  DbHeader::parse(&page).unwrap()
}

fn write_at(path: &std::path::Path, offset: u64, bytes: &[u8]) {
  let mut file = FsOpenOptions::new().write(true).open(path).unwrap();
  file.seek(SeekFrom::Start(offset)).unwrap();
  file.write_all(bytes).unwrap();
  file.sync_all().unwrap();
}

fn ghost_commit_bytes(txid: u64, include_commit: bool) -> Vec<u8> {
  let mut records = vec![
    WalRecord::new(txid, WalOp::Begin),
    WalRecord::new(
      txid,
      WalOp::CreateNode {
        node_id: 1000,
        key: Some("ghost".to_string()),
      },
    ),
  ];
  if include_commit {
    records.push(WalRecord::new(txid, WalOp::Commit));
  }
  records.iter().flat_map(|r| r.encode()).collect()
}

#[test]
fn reopen_reproduces_committed_graph() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("replay.raydb");

  let db = open_db(&path);
  db.begin_tx().unwrap();
  let a = db.create_node(Some("a")).unwrap();
  let b = db.create_node(Some("b")).unwrap();
  let rel = db.define_etype("rel").unwrap();
  db.add_edge(a, rel, b).unwrap();
  db.commit().unwrap();
  db.checkpoint().unwrap();

  db.begin_tx().unwrap();
  let c = db.create_node(Some("c")).unwrap();
  db.add_edge(b, rel, c).unwrap();
  db.delete_edge(a, rel, b).unwrap();
  db.commit().unwrap();
  let before = db.stats();
  db.close().unwrap();

  // Snapshot generation plus replayed delta reproduces the same graph
  let db = open_db(&path);
  let after = db.stats();
  assert_eq!(after.snapshot_gen, before.snapshot_gen);
  assert!(!db.edge_exists(a, rel, b));
  assert!(db.edge_exists(b, rel, c));
  assert_eq!(db.lookup_by_key("c"), Some(c));
  assert_eq!(db.count_nodes(), 3);
  db.close().unwrap();
}

#[test]
fn wal_bytes_without_header_fsync_are_invisible() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("torn.raydb");

  let db = open_db(&path);
  db.begin_tx().unwrap();
  let a = db.create_node(Some("a")).unwrap();
  db.commit().unwrap();
  db.close().unwrap();

  // Crash after the WAL write but before the header fsync: record bytes
  // beyond the published head, header untouched
  let header = read_header(&path);
  let offset = header.wal_start_page * header.page_size as u64 + header.wal_primary_head;
  write_at(&path, offset, &ghost_commit_bytes(99, true));

  let db = open_db(&path);
  assert_eq!(db.lookup_by_key("a"), Some(a));
  assert_eq!(db.lookup_by_key("ghost"), None);
  assert!(!db.node_exists(1000));
  db.close().unwrap();
}

#[test]
fn begin_without_commit_is_discarded_on_open() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("incomplete.raydb");

  let db = open_db(&path);
  db.begin_tx().unwrap();
  let a = db.create_node(Some("a")).unwrap();
  db.commit().unwrap();
  db.close().unwrap();

  // The incomplete transaction made it into the WAL *and* the header
  // published its head, but no COMMIT record exists
  let mut header = read_header(&path);
  let bytes = ghost_commit_bytes(99, false);
  let offset = header.wal_start_page * header.page_size as u64 + header.wal_primary_head;
  write_at(&path, offset, &bytes);
  header.wal_primary_head += bytes.len() as u64;
  header.wal_head = header.wal_primary_head;
  header.change_counter += 1;
  write_at(&path, 0, &header.serialize_to_page());

  let db = open_db(&path);
  assert_eq!(db.lookup_by_key("a"), Some(a));
  // No leaked state from the incomplete transaction
  assert_eq!(db.lookup_by_key("ghost"), None);
  assert!(!db.node_exists(1000));
  assert_eq!(db.count_nodes(), 1);
  db.close().unwrap();
}

#[test]
fn interrupted_background_checkpoint_replays_both_regions() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("interrupted.raydb");

  let db = open_db(&path);
  db.begin_tx().unwrap();
  let alpha = db.create_node(Some("alpha")).unwrap();
  db.commit().unwrap();
  db.close().unwrap();

  // Simulate a crash mid-background-checkpoint: writes had moved to the
  // secondary region and a commit landed there before the process died
  let mut header = read_header(&path);
  {
    let mut pager = FilePager::open(&path, header.page_size as usize, false).unwrap();
    let mut ring = WalRing::from_header(&header);
    ring.switch_to_secondary();
    for record in [
      WalRecord::new(7, WalOp::Begin),
      WalRecord::new(
        7,
        WalOp::CreateNode {
          node_id: 500,
          key: Some("beta".to_string()),
        },
      ),
      WalRecord::new(7, WalOp::Commit),
    ] {
      ring.write_record(&record, &mut pager).unwrap();
    }
    ring.sync(&mut pager).unwrap();

    header.wal_secondary_head = ring.secondary_head();
    header.active_wal_region = WalRegion::Secondary;
    header.checkpoint_in_progress = true;
    header.change_counter += 1;
    pager.write_page(0, &header.serialize_to_page()).unwrap();
    pager.sync().unwrap();
  }

  let db = open_db(&path);
  assert_eq!(db.lookup_by_key("alpha"), Some(alpha));
  assert_eq!(db.lookup_by_key("beta"), Some(500));
  db.close().unwrap();

  // The flag was cleared on disk during open
  let header = read_header(&path);
  assert!(!header.checkpoint_in_progress);
}

#[test]
fn snapshot_corruption_fails_open() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("tamper.raydb");

  let db = open_db(&path);
  db.begin_tx().unwrap();
  db.create_node(Some("a")).unwrap();
  db.create_node(Some("b")).unwrap();
  db.commit().unwrap();
  db.checkpoint().unwrap();
  db.close().unwrap();

  // Flip one byte in the snapshot's section data, inside footer CRC
  // coverage but past the section table so the structural parse succeeds
  let header = read_header(&path);
  let snapshot_offset = header.snapshot_start_page * header.page_size as u64;
  let tamper_at =
    snapshot_offset + (SNAPSHOT_HEADER_SIZE + SectionId::COUNT * 24 + 64) as u64;
  let mut file = FsOpenOptions::new().read(true).write(true).open(&path).unwrap();
  file.seek(SeekFrom::Start(tamper_at)).unwrap();
  let mut byte = [0u8; 1];
  file.read_exact(&mut byte).unwrap();
  byte[0] ^= 0x01;
  file.seek(SeekFrom::Start(tamper_at)).unwrap();
  file.write_all(&byte).unwrap();
  file.sync_all().unwrap();

  let result = GraphDb::open(&path, OpenOptions::new().auto_checkpoint(false));
  assert!(matches!(result, Err(RayError::ChecksumMismatch { .. })));
}

#[test]
fn header_corruption_fails_open() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("badheader.raydb");

  let db = open_db(&path);
  db.begin_tx().unwrap();
  db.create_node(Some("a")).unwrap();
  db.commit().unwrap();
  db.close().unwrap();

  // Flip a byte inside the header's fixed fields
  let mut file = FsOpenOptions::new().read(true).write(true).open(&path).unwrap();
  file.seek(SeekFrom::Start(100)).unwrap();
  let mut byte = [0u8; 1];
  file.read_exact(&mut byte).unwrap();
  byte[0] ^= 0xff;
  file.seek(SeekFrom::Start(100)).unwrap();
  file.write_all(&byte).unwrap();
  file.sync_all().unwrap();

  let result = GraphDb::open(&path, OpenOptions::new());
  assert!(matches!(result, Err(RayError::ChecksumMismatch { .. })));
}

#[test]
fn rolled_back_transaction_leaves_no_trace_after_reopen() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("rollback.raydb");

  let db = open_db(&path);
  db.begin_tx().unwrap();
  let a = db.create_node(Some("kept")).unwrap();
  db.commit().unwrap();

  db.begin_tx().unwrap();
  db.create_node(Some("doomed")).unwrap();
  db.rollback().unwrap();
  db.close().unwrap();

  let db = open_db(&path);
  assert_eq!(db.lookup_by_key("kept"), Some(a));
  assert_eq!(db.lookup_by_key("doomed"), None);
  assert_eq!(db.count_nodes(), 1);
  db.close().unwrap();
}

#[test]
fn allocators_never_reuse_ids_across_reopen() {
  let dir = tempdir().unwrap();
  let path = dir.path().join("alloc.raydb");

  let db = open_db(&path);
  db.begin_tx().unwrap();
  let first = db.create_node(None).unwrap();
  let label = db.define_label("L").unwrap();
  db.commit().unwrap();
  db.close().unwrap();

  let db = open_db(&path);
  db.begin_tx().unwrap();
  let second = db.create_node(None).unwrap();
  let label2 = db.define_label("M").unwrap();
  db.commit().unwrap();
  assert!(second > first);
  assert!(label2 > label);
  db.close().unwrap();

  // Deletion does not free the id either
  let db = open_db(&path);
  db.begin_tx().unwrap();
  db.delete_node(second).unwrap();
  db.commit().unwrap();
  db.close().unwrap();

  let db = open_db(&path);
  db.begin_tx().unwrap();
  let third = db.create_node(None).unwrap();
  db.commit().unwrap();
  assert!(third > second);
  db.close().unwrap();
}
