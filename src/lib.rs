//! RayDB - embedded labeled property graph database
//!
//! A single-process, single-writer, many-reader store persisting nodes,
//! directed typed edges, and typed properties to one file with ACID
//! durability at transaction granularity and snapshot-isolated reads.
//!
//! # Architecture
//!
//! RayDB is a **Snapshot + Delta + WAL** engine:
//!
//! - **Snapshot**: immutable, memory-mapped CSR columns for zero-copy reads
//! - **Delta**: in-memory overlay of committed-but-not-checkpointed changes
//! - **WAL**: dual-region ring buffer for durability and crash recovery;
//!   the secondary region keeps writers moving while a background
//!   checkpoint drains the primary into a new snapshot
//!
//! The page-0 header is the sole commit point: nothing exists until the
//! header that references it has been fsync'd.
//!
//! # Example
//!
//! ```no_run
//! use raydb::{GraphDb, OpenOptions};
//!
//! # fn main() -> raydb::Result<()> {
//! let db = GraphDb::open("social.raydb", OpenOptions::new())?;
//! db.begin_tx()?;
//! let alice = db.create_node(Some("user:alice"))?;
//! let bob = db.create_node(Some("user:bob"))?;
//! let follows = db.define_etype("follows")?;
//! db.add_edge(alice, follows, bob)?;
//! db.commit()?;
//!
//! assert_eq!(db.lookup_by_key("user:alice"), Some(alice));
//! assert!(db.edge_exists(alice, follows, bob));
//! db.close()?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]

pub mod constants;
pub mod error;
pub mod types;
pub mod util;

pub mod storage;

pub mod db;

pub use db::{
  is_single_file_path, CacheOptions, CheckReport, CheckpointPhase, GraphDb, OpenOptions,
  ResizeWalOptions, VacuumOptions,
};
pub use error::{RayError, Result};
pub use types::{
  DbStats, ETypeId, FullEdge, LabelId, NodeId, PropKeyId, PropValue, PropValueTag, StringId, TxId,
  WalStats,
};
pub use util::compression::{CompressionOptions, CompressionType};
