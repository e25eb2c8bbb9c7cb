//! CSR snapshot builder.
//!
//! Turns a collected graph (nodes, edges, catalogs) into the immutable
//! on-disk snapshot format. The checkpoint path feeds it the union of the
//! previous snapshot and the delta overlay.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::*;
use crate::error::{RayError, Result};
use crate::storage::snapshot::layout::{
  write_section_entry, SectionEntry, SectionId, SnapshotFlags, SnapshotHeader,
};
use crate::types::*;
use crate::util::binary::{align_up, encode_u32_slice, encode_u64_slice, write_i32, write_u32, write_u64};
use crate::util::compression::{maybe_compress, CompressionOptions, CompressionType};
use crate::util::crc::crc32c;
use crate::util::hash::hash_key;

// ============================================================================
// Build input
// ============================================================================

/// One node as fed to the builder
#[derive(Debug, Clone)]
pub struct NodeRecord {
  pub node_id: NodeId,
  pub key: Option<String>,
  pub labels: Vec<LabelId>,
  pub props: HashMap<PropKeyId, PropValue>,
}

/// One edge as fed to the builder
#[derive(Debug, Clone)]
pub struct EdgeRecord {
  pub src: NodeId,
  pub etype: ETypeId,
  pub dst: NodeId,
  pub props: HashMap<PropKeyId, PropValue>,
}

/// Everything needed to emit a snapshot
#[derive(Debug)]
pub struct SnapshotInput {
  pub generation: u64,
  pub nodes: Vec<NodeRecord>,
  pub edges: Vec<EdgeRecord>,
  pub labels: HashMap<LabelId, String>,
  pub etypes: HashMap<ETypeId, String>,
  pub propkeys: HashMap<PropKeyId, String>,
  pub compression: Option<CompressionOptions>,
}

// ============================================================================
// String interning
// ============================================================================

struct StringTable {
  strings: Vec<String>,
  ids: HashMap<String, StringId>,
}

impl StringTable {
  fn new() -> Self {
    // StringID 0 is the empty string
    let mut ids = HashMap::new();
    ids.insert(String::new(), 0);
    Self {
      strings: vec![String::new()],
      ids,
    }
  }

  fn intern(&mut self, s: &str) -> StringId {
    if let Some(&id) = self.ids.get(s) {
      return id;
    }
    let id = self.strings.len() as StringId;
    self.strings.push(s.to_string());
    self.ids.insert(s.to_string(), id);
    id
  }

  fn lookup(&self, s: &str) -> StringId {
    self.ids.get(s).copied().unwrap_or(0)
  }

  fn len(&self) -> usize {
    self.strings.len()
  }
}

// ============================================================================
// CSR construction
// ============================================================================

struct Csr {
  offsets: Vec<u32>,
  /// dst phys for out-edges, src phys for in-edges
  targets: Vec<u32>,
  etypes: Vec<u32>,
  /// in-edges only: index of the symmetric out-edge
  out_index: Vec<u32>,
}

/// Build the out-CSR. Rows are sorted by `(etype, dst_phys)` with
/// duplicates collapsed, which makes `has_edge` a binary search.
fn build_out_csr(num_nodes: usize, edges: &mut Vec<(PhysNode, ETypeId, PhysNode)>) -> Csr {
  edges.sort_unstable_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));
  edges.dedup();

  let mut counts = vec![0u32; num_nodes];
  for &(src, _, _) in edges.iter() {
    counts[src as usize] += 1;
  }

  let mut offsets = vec![0u32; num_nodes + 1];
  for i in 0..num_nodes {
    offsets[i + 1] = offsets[i] + counts[i];
  }

  let targets: Vec<u32> = edges.iter().map(|&(_, _, dst)| dst).collect();
  let etypes: Vec<u32> = edges.iter().map(|&(_, etype, _)| etype).collect();

  Csr {
    offsets,
    targets,
    etypes,
    out_index: Vec::new(),
  }
}

/// Derive the in-CSR from the out-CSR, carrying a back-pointer to the
/// symmetric out-edge. Rows sorted by `(etype, src_phys)`.
fn build_in_csr(num_nodes: usize, out: &Csr) -> Csr {
  let num_edges = out.targets.len();
  let mut incoming: Vec<Vec<(ETypeId, PhysNode, u32)>> = vec![Vec::new(); num_nodes];

  for src in 0..num_nodes {
    let start = out.offsets[src] as usize;
    let end = out.offsets[src + 1] as usize;
    for i in start..end {
      incoming[out.targets[i] as usize].push((out.etypes[i], src as PhysNode, i as u32));
    }
  }

  let mut offsets = vec![0u32; num_nodes + 1];
  let mut targets = vec![0u32; num_edges];
  let mut etypes = vec![0u32; num_edges];
  let mut out_index = vec![0u32; num_edges];

  let mut pos = 0usize;
  for (dst, mut row) in incoming.into_iter().enumerate() {
    row.sort_unstable_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    for (etype, src, idx) in row {
      etypes[pos] = etype;
      targets[pos] = src;
      out_index[pos] = idx;
      pos += 1;
    }
    offsets[dst + 1] = pos as u32;
  }

  Csr {
    offsets,
    targets,
    etypes,
    out_index,
  }
}

// ============================================================================
// Key index
// ============================================================================

struct KeyIndex {
  /// (hash64, string_id, node_id), sorted by bucket then hash
  entries: Vec<(u64, StringId, NodeId)>,
  buckets: Vec<u32>,
}

fn build_key_index(nodes: &[NodeRecord], key_strings: &[StringId]) -> KeyIndex {
  let mut entries: Vec<(u64, StringId, NodeId)> = nodes
    .iter()
    .enumerate()
    .filter_map(|(i, node)| {
      node
        .key
        .as_ref()
        .map(|key| (hash_key(key), key_strings[i], node.node_id))
    })
    .collect();

  let num_buckets = KEY_INDEX_MIN_BUCKETS.max(entries.len() * 2);
  let mut buckets = vec![0u32; num_buckets + 1];
  if entries.is_empty() {
    return KeyIndex { entries, buckets };
  }

  let nb = num_buckets as u64;
  entries.sort_unstable_by(|a, b| {
    ((a.0 % nb), a.0, a.1, a.2).cmp(&((b.0 % nb), b.0, b.1, b.2))
  });

  let mut counts = vec![0u32; num_buckets];
  for &(hash, _, _) in &entries {
    counts[(hash % nb) as usize] += 1;
  }
  for i in 0..num_buckets {
    buckets[i + 1] = buckets[i] + counts[i];
  }

  KeyIndex { entries, buckets }
}

// ============================================================================
// Property and vector encoding
// ============================================================================

struct VectorTable {
  offsets: Vec<u64>,
  data: Vec<u8>,
}

impl VectorTable {
  fn new() -> Self {
    Self {
      offsets: vec![0],
      data: Vec::new(),
    }
  }

  /// Append a vector, returning its table index
  fn push(&mut self, values: &[f32]) -> u64 {
    for v in values {
      self.data.extend_from_slice(&v.to_le_bytes());
    }
    self.offsets.push(self.data.len() as u64);
    (self.offsets.len() - 2) as u64
  }

  fn is_empty(&self) -> bool {
    self.offsets.len() <= 1
  }
}

fn encode_prop_cell(
  value: &PropValue,
  strings: &StringTable,
  vectors: &mut VectorTable,
) -> (u8, u64) {
  match value {
    PropValue::Null => (PropValueTag::Null as u8, 0),
    PropValue::Bool(b) => (PropValueTag::Bool as u8, *b as u64),
    PropValue::I64(v) => (PropValueTag::I64 as u8, *v as u64),
    PropValue::F64(v) => (PropValueTag::F64 as u8, v.to_bits()),
    PropValue::String(s) => (PropValueTag::String as u8, strings.lookup(s) as u64),
    PropValue::VectorF32(v) => (PropValueTag::VectorF32 as u8, vectors.push(v)),
  }
}

fn encode_prop_cells(cells: &[(u8, u64)]) -> Vec<u8> {
  let mut data = vec![0u8; cells.len() * PROP_VALUE_DISK_SIZE];
  for (i, (tag, payload)) in cells.iter().enumerate() {
    let at = i * PROP_VALUE_DISK_SIZE;
    data[at] = *tag;
    write_u64(&mut data, at + 8, *payload);
  }
  data
}

fn sorted_props(props: &HashMap<PropKeyId, PropValue>) -> Vec<(PropKeyId, &PropValue)> {
  let mut entries: Vec<_> = props.iter().map(|(&k, v)| (k, v)).collect();
  entries.sort_unstable_by_key(|(k, _)| *k);
  entries
}

// ============================================================================
// Build
// ============================================================================

/// Build a complete snapshot into a byte buffer.
///
/// Nodes are sorted by NodeID to assign physical indices; every catalog
/// name, node key, and string property is interned; sections whose
/// compressed form is strictly smaller are stored compressed.
pub fn build_snapshot(input: SnapshotInput) -> Result<Vec<u8>> {
  let SnapshotInput {
    generation,
    mut nodes,
    edges,
    labels,
    etypes,
    propkeys,
    compression,
  } = input;

  nodes.sort_unstable_by_key(|n| n.node_id);
  let num_nodes = nodes.len();

  // Physical index maps
  let phys_to_node_id: Vec<NodeId> = nodes.iter().map(|n| n.node_id).collect();
  let mut node_id_to_phys: HashMap<NodeId, PhysNode> = HashMap::with_capacity(num_nodes);
  let mut max_node_id: NodeId = 0;
  for (i, node) in nodes.iter().enumerate() {
    if node.node_id == 0 {
      return Err(RayError::Internal("node id 0 is reserved".to_string()));
    }
    if node_id_to_phys.insert(node.node_id, i as PhysNode).is_some() {
      return Err(RayError::Internal(format!(
        "duplicate node id {} in snapshot input",
        node.node_id
      )));
    }
    max_node_id = max_node_id.max(node.node_id);
  }

  // Resolve edges to physical pairs up front; a dangling endpoint is a bug
  // in the collector
  let mut phys_edges: Vec<(PhysNode, ETypeId, PhysNode)> = Vec::with_capacity(edges.len());
  for edge in &edges {
    let (Some(&src), Some(&dst)) = (
      node_id_to_phys.get(&edge.src),
      node_id_to_phys.get(&edge.dst),
    ) else {
      return Err(RayError::Internal(format!(
        "edge ({}, {}, {}) references a missing node",
        edge.src, edge.etype, edge.dst
      )));
    };
    phys_edges.push((src, edge.etype, dst));
  }

  // String table: catalogs, node keys, then string property values
  let mut strings = StringTable::new();
  // Intern in id order so rebuilds of the same graph are byte-identical
  let intern_catalog = |table: &HashMap<u32, String>, count: usize, strings: &mut StringTable| {
    let mut ids = vec![0u32; count + 1];
    for id in 1..=count {
      if let Some(name) = table.get(&(id as u32)) {
        ids[id] = strings.intern(name);
      }
    }
    ids
  };
  let num_labels = labels.keys().max().copied().unwrap_or(0) as usize;
  let num_etypes = etypes.keys().max().copied().unwrap_or(0) as usize;
  let num_propkeys = propkeys.keys().max().copied().unwrap_or(0) as usize;
  let label_string_ids = intern_catalog(&labels, num_labels, &mut strings);
  let etype_string_ids = intern_catalog(&etypes, num_etypes, &mut strings);
  let propkey_string_ids = intern_catalog(&propkeys, num_propkeys, &mut strings);

  let node_key_strings: Vec<StringId> = nodes
    .iter()
    .map(|n| n.key.as_deref().map(|k| strings.intern(k)).unwrap_or(0))
    .collect();

  for node in &nodes {
    for (_, value) in sorted_props(&node.props) {
      if let PropValue::String(s) = value {
        strings.intern(s);
      }
    }
  }
  for edge in &edges {
    for (_, value) in sorted_props(&edge.props) {
      if let PropValue::String(s) = value {
        strings.intern(s);
      }
    }
  }

  // Adjacency
  let out_csr = build_out_csr(num_nodes, &mut phys_edges);
  let num_edges = out_csr.targets.len();
  let in_csr = build_in_csr(num_nodes, &out_csr);

  // Key index
  let key_index = build_key_index(&nodes, &node_key_strings);

  // Node labels
  let mut node_label_offsets = vec![0u32; num_nodes + 1];
  let mut node_label_ids: Vec<u32> = Vec::new();
  let mut has_labels = false;
  for (i, node) in nodes.iter().enumerate() {
    let mut sorted = node.labels.clone();
    sorted.sort_unstable();
    sorted.dedup();
    has_labels |= !sorted.is_empty();
    node_label_ids.extend_from_slice(&sorted);
    node_label_offsets[i + 1] = node_label_ids.len() as u32;
  }

  // Node properties
  let mut vectors = VectorTable::new();
  let mut node_prop_offsets = vec![0u32; num_nodes + 1];
  let mut node_prop_keys: Vec<u32> = Vec::new();
  let mut node_prop_cells: Vec<(u8, u64)> = Vec::new();
  for (i, node) in nodes.iter().enumerate() {
    for (key_id, value) in sorted_props(&node.props) {
      node_prop_keys.push(key_id);
      node_prop_cells.push(encode_prop_cell(value, &strings, &mut vectors));
    }
    node_prop_offsets[i + 1] = node_prop_keys.len() as u32;
  }

  // Edge properties, indexed in CSR traversal order
  let mut edge_prop_map: HashMap<(PhysNode, ETypeId, PhysNode), &HashMap<PropKeyId, PropValue>> =
    HashMap::new();
  for edge in &edges {
    if !edge.props.is_empty() {
      let src = node_id_to_phys[&edge.src];
      let dst = node_id_to_phys[&edge.dst];
      edge_prop_map.insert((src, edge.etype, dst), &edge.props);
    }
  }

  let mut edge_prop_offsets = vec![0u32; num_edges + 1];
  let mut edge_prop_keys: Vec<u32> = Vec::new();
  let mut edge_prop_cells: Vec<(u8, u64)> = Vec::new();
  for src in 0..num_nodes {
    let start = out_csr.offsets[src] as usize;
    let end = out_csr.offsets[src + 1] as usize;
    for i in start..end {
      let key = (src as PhysNode, out_csr.etypes[i], out_csr.targets[i]);
      if let Some(props) = edge_prop_map.get(&key) {
        for (key_id, value) in sorted_props(props) {
          edge_prop_keys.push(key_id);
          edge_prop_cells.push(encode_prop_cell(value, &strings, &mut vectors));
        }
      }
      edge_prop_offsets[i + 1] = edge_prop_keys.len() as u32;
    }
  }

  let has_properties = !node_prop_keys.is_empty() || !edge_prop_keys.is_empty();
  let has_vectors = !vectors.is_empty();
  let num_strings = strings.len();

  // ==========================================================================
  // Section assembly
  // ==========================================================================

  let compression_opts = compression.unwrap_or_default();
  let mut emitted: Vec<(SectionId, Vec<u8>, CompressionType, u32)> = Vec::new();
  let mut add = |id: SectionId, data: Vec<u8>| {
    if data.is_empty() {
      return;
    }
    let uncompressed = data.len() as u32;
    let (stored, codec) = maybe_compress(&data, &compression_opts);
    emitted.push((id, stored, codec, uncompressed));
  };

  add(SectionId::PhysToNodeId, encode_u64_slice(&phys_to_node_id));
  {
    let size = (max_node_id + 1) as usize;
    let mut data = vec![0u8; size * 4];
    for i in 0..size {
      write_i32(&mut data, i * 4, -1);
    }
    for (&node_id, &phys) in &node_id_to_phys {
      write_i32(&mut data, node_id as usize * 4, phys as i32);
    }
    add(SectionId::NodeIdToPhys, data);
  }

  add(SectionId::OutOffsets, encode_u32_slice(&out_csr.offsets));
  add(SectionId::OutDst, encode_u32_slice(&out_csr.targets));
  add(SectionId::OutEtype, encode_u32_slice(&out_csr.etypes));
  add(SectionId::InOffsets, encode_u32_slice(&in_csr.offsets));
  add(SectionId::InSrc, encode_u32_slice(&in_csr.targets));
  add(SectionId::InEtype, encode_u32_slice(&in_csr.etypes));
  add(SectionId::InOutIndex, encode_u32_slice(&in_csr.out_index));

  {
    let mut offsets = vec![0u8; (num_strings + 1) * 4];
    let total: usize = strings.strings.iter().map(|s| s.len()).sum();
    let mut bytes = Vec::with_capacity(total);
    for (i, s) in strings.strings.iter().enumerate() {
      write_u32(&mut offsets, i * 4, bytes.len() as u32);
      bytes.extend_from_slice(s.as_bytes());
    }
    write_u32(&mut offsets, num_strings * 4, bytes.len() as u32);
    add(SectionId::StringOffsets, offsets);
    add(SectionId::StringBytes, bytes);
  }

  add(SectionId::LabelStringIds, encode_u32_slice(&label_string_ids));
  add(SectionId::EtypeStringIds, encode_u32_slice(&etype_string_ids));
  add(
    SectionId::PropkeyStringIds,
    encode_u32_slice(&propkey_string_ids),
  );
  add(SectionId::NodeKeyString, encode_u32_slice(&node_key_strings));

  let has_key_buckets = !key_index.entries.is_empty();
  if has_key_buckets {
    let mut entries = vec![0u8; key_index.entries.len() * KEY_INDEX_ENTRY_SIZE];
    for (i, &(hash, string_id, node_id)) in key_index.entries.iter().enumerate() {
      let at = i * KEY_INDEX_ENTRY_SIZE;
      write_u64(&mut entries, at, hash);
      write_u32(&mut entries, at + 8, string_id);
      write_u32(&mut entries, at + 12, 0);
      write_u64(&mut entries, at + 16, node_id);
    }
    add(SectionId::KeyEntries, entries);
    add(SectionId::KeyBuckets, encode_u32_slice(&key_index.buckets));
  }

  if has_properties {
    add(
      SectionId::NodePropOffsets,
      encode_u32_slice(&node_prop_offsets),
    );
    add(SectionId::NodePropKeys, encode_u32_slice(&node_prop_keys));
    add(SectionId::NodePropVals, encode_prop_cells(&node_prop_cells));
    add(
      SectionId::EdgePropOffsets,
      encode_u32_slice(&edge_prop_offsets),
    );
    add(SectionId::EdgePropKeys, encode_u32_slice(&edge_prop_keys));
    add(SectionId::EdgePropVals, encode_prop_cells(&edge_prop_cells));
  }

  if has_labels {
    add(
      SectionId::NodeLabelOffsets,
      encode_u32_slice(&node_label_offsets),
    );
    add(SectionId::NodeLabelIds, encode_u32_slice(&node_label_ids));
  }

  if has_vectors {
    add(SectionId::VectorOffsets, encode_u64_slice(&vectors.offsets));
    add(SectionId::VectorData, vectors.data);
  }

  // ==========================================================================
  // Layout and emit
  // ==========================================================================

  let table_end = SNAPSHOT_HEADER_SIZE + SectionId::COUNT * SECTION_ENTRY_SIZE;
  let mut cursor = align_up(table_end, SECTION_ALIGNMENT);
  let mut entries: Vec<(SectionId, SectionEntry)> = Vec::with_capacity(emitted.len());
  for (id, data, codec, uncompressed) in &emitted {
    entries.push((
      *id,
      SectionEntry {
        offset: cursor as u64,
        length: data.len() as u64,
        compression: *codec as u32,
        uncompressed_size: *uncompressed,
      },
    ));
    cursor = align_up(cursor + data.len(), SECTION_ALIGNMENT);
  }

  let total = cursor + 4;
  let mut buffer = vec![0u8; total];

  let mut flags = SnapshotFlags::HAS_IN_EDGES;
  if has_properties {
    flags |= SnapshotFlags::HAS_PROPERTIES;
  }
  if has_key_buckets {
    flags |= SnapshotFlags::HAS_KEY_BUCKETS;
  }
  if has_labels {
    flags |= SnapshotFlags::HAS_NODE_LABELS;
  }
  if has_vectors {
    flags |= SnapshotFlags::HAS_VECTORS;
  }

  let header = SnapshotHeader {
    magic: MAGIC_SNAPSHOT,
    version: VERSION_SNAPSHOT,
    min_reader_version: MIN_READER_SNAPSHOT,
    flags,
    generation,
    created_unix_ns: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_nanos() as u64)
      .unwrap_or(0),
    num_nodes: num_nodes as u64,
    num_edges: num_edges as u64,
    max_node_id,
    num_labels: num_labels as u64,
    num_etypes: num_etypes as u64,
    num_propkeys: num_propkeys as u64,
    num_strings: num_strings as u64,
  };
  header.write_to(&mut buffer);

  for (id, entry) in &entries {
    write_section_entry(&mut buffer, *id as usize, entry);
  }
  for ((_, data, _, _), (_, entry)) in emitted.iter().zip(entries.iter()) {
    let at = entry.offset as usize;
    buffer[at..at + data.len()].copy_from_slice(data);
  }

  let footer = crc32c(&buffer[..total - 4]);
  write_u32(&mut buffer, total - 4, footer);

  Ok(buffer)
}

// ============================================================================
// Tests
// ============================================================================
