//! Core identifier and value types.

use serde::Serialize;

/// Node identifier; 1-based, monotonically allocated, never reused
pub type NodeId = u64;
/// Label identifier; 1-based u32
pub type LabelId = u32;
/// Edge type identifier; 1-based u32
pub type ETypeId = u32;
/// Property key identifier; 1-based u32
pub type PropKeyId = u32;
/// Index into a snapshot's string table; 0 is the empty string
pub type StringId = u32;
/// Transaction identifier
pub type TxId = u64;
/// Zero-based dense index into a snapshot's node arrays (NodeId ascending)
pub type PhysNode = u32;

// ============================================================================
// Property values
// ============================================================================

/// Disk tag for a property value cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PropValueTag {
  Null = 0,
  Bool = 1,
  I64 = 2,
  F64 = 3,
  String = 4,
  VectorF32 = 5,
}

impl PropValueTag {
  pub fn from_u8(tag: u8) -> Option<Self> {
    match tag {
      0 => Some(Self::Null),
      1 => Some(Self::Bool),
      2 => Some(Self::I64),
      3 => Some(Self::F64),
      4 => Some(Self::String),
      5 => Some(Self::VectorF32),
      _ => None,
    }
  }
}

/// A property value on a node or edge
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
  Null,
  Bool(bool),
  I64(i64),
  F64(f64),
  String(String),
  VectorF32(Vec<f32>),
}

impl PropValue {
  pub fn tag(&self) -> PropValueTag {
    match self {
      PropValue::Null => PropValueTag::Null,
      PropValue::Bool(_) => PropValueTag::Bool,
      PropValue::I64(_) => PropValueTag::I64,
      PropValue::F64(_) => PropValueTag::F64,
      PropValue::String(_) => PropValueTag::String,
      PropValue::VectorF32(_) => PropValueTag::VectorF32,
    }
  }
}

// ============================================================================
// Edges
// ============================================================================

/// A fully resolved directed edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FullEdge {
  pub src: NodeId,
  pub etype: ETypeId,
  pub dst: NodeId,
}

// ============================================================================
// Statistics
// ============================================================================

/// Database statistics exposed by `stats()`
#[derive(Debug, Clone, Serialize)]
pub struct DbStats {
  pub snapshot_gen: u64,
  pub snapshot_nodes: u64,
  pub snapshot_edges: u64,
  pub snapshot_max_node_id: u64,
  pub delta_nodes_created: usize,
  pub delta_nodes_deleted: usize,
  pub delta_edges_added: usize,
  pub delta_edges_deleted: usize,
  pub wal_bytes_used: usize,
  pub wal_usage: f64,
  pub recommend_compact: bool,
}

/// WAL ring usage snapshot
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WalStats {
  pub primary_used: usize,
  pub primary_capacity: usize,
  pub secondary_used: usize,
  pub secondary_capacity: usize,
  /// 0 = primary, 1 = secondary
  pub active_region: u8,
}

impl WalStats {
  pub fn used(&self) -> usize {
    self.primary_used + self.secondary_used
  }

  pub fn primary_usage(&self) -> f64 {
    if self.primary_capacity == 0 {
      0.0
    } else {
      self.primary_used as f64 / self.primary_capacity as f64
    }
  }

  pub fn secondary_usage(&self) -> f64 {
    if self.secondary_capacity == 0 {
      0.0
    } else {
      self.secondary_used as f64 / self.secondary_capacity as f64
    }
  }
}
