//! Zero-copy snapshot reader over an mmap region.
//!
//! All lookups index directly into the mapped section bytes; compressed
//! sections are decompressed lazily and cached. The pager owns the mapping;
//! the reader holds a shared handle so a snapshot swap cannot unmap bytes
//! still in use.

use std::collections::HashMap;
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::RwLock;

use crate::constants::*;
use crate::error::{RayError, Result};
use crate::storage::snapshot::layout::{
  parse_section_table, SectionEntry, SectionId, SnapshotFlags, SnapshotHeader,
};
use crate::types::*;
use crate::util::binary::{align_up, read_f32, read_i32_at, read_u32, read_u32_at, read_u64, read_u64_at};
use crate::util::compression::{decompress_with_size, CompressionType};
use crate::util::crc::crc32c;
use crate::util::hash::hash_key;

/// Parse-time options
#[derive(Debug, Clone)]
pub struct ParseOptions {
  /// Skip footer CRC verification; permitted only for just-written
  /// trusted data (e.g. re-reading a snapshot this process emitted)
  pub skip_crc_validation: bool,
  /// Keep decompressed sections cached for the snapshot's lifetime
  pub cache_decompressed: bool,
}

impl Default for ParseOptions {
  fn default() -> Self {
    Self {
      skip_crc_validation: false,
      cache_decompressed: true,
    }
  }
}

/// Borrowed or cache-shared section bytes
pub enum SectionView<'a> {
  Mapped(&'a [u8]),
  Cached(Arc<[u8]>),
}

impl AsRef<[u8]> for SectionView<'_> {
  fn as_ref(&self) -> &[u8] {
    match self {
      SectionView::Mapped(bytes) => bytes,
      SectionView::Cached(bytes) => bytes.as_ref(),
    }
  }
}

/// A parsed, immutable snapshot
pub struct Snapshot {
  mmap: Arc<Mmap>,
  /// Byte offset of the snapshot within the mapping
  base: usize,
  pub header: SnapshotHeader,
  sections: Vec<SectionEntry>,
  /// Total snapshot length in bytes including the footer CRC
  byte_len: usize,
  cache_decompressed: bool,
  decompressed: RwLock<HashMap<SectionId, Arc<[u8]>>>,
}

impl Snapshot {
  /// Parse a snapshot at `base` bytes into `mmap`.
  ///
  /// Verifies magic, version, and (unless opted out) the footer CRC over
  /// every byte preceding it.
  pub fn parse(mmap: Arc<Mmap>, base: usize, options: &ParseOptions) -> Result<Self> {
    if base >= mmap.len() {
      return Err(RayError::InvalidFormat(
        "snapshot offset past end of file".to_string(),
      ));
    }
    let buf = &mmap[base..];
    let header = SnapshotHeader::parse(buf)?;
    let table = parse_section_table(buf)?;

    let byte_len = align_up(table.max_section_end, SECTION_ALIGNMENT) + 4;
    if byte_len > buf.len() {
      return Err(RayError::InvalidFormat(format!(
        "snapshot truncated: needs {byte_len} bytes, {} available",
        buf.len()
      )));
    }

    if !options.skip_crc_validation {
      let stored = read_u32(buf, byte_len - 4);
      let computed = crc32c(&buf[..byte_len - 4]);
      if stored != computed {
        return Err(RayError::ChecksumMismatch { stored, computed });
      }
    }

    Ok(Self {
      mmap,
      base,
      header,
      sections: table.sections,
      byte_len,
      cache_decompressed: options.cache_decompressed,
      decompressed: RwLock::new(HashMap::new()),
    })
  }

  /// Snapshot length in bytes, including the footer CRC
  pub fn byte_len(&self) -> usize {
    self.byte_len
  }

  fn data(&self) -> &[u8] {
    &self.mmap[self.base..]
  }

  /// Section bytes, decompressing (and caching) when needed
  pub fn section(&self, id: SectionId) -> Option<SectionView<'_>> {
    let entry = self.sections[id as usize];
    if entry.length == 0 {
      return None;
    }

    let raw = &self.data()[entry.offset as usize..(entry.offset + entry.length) as usize];
    let codec = CompressionType::from_u32(entry.compression)?;
    if codec == CompressionType::None {
      return Some(SectionView::Mapped(raw));
    }

    if let Some(cached) = self.decompressed.read().get(&id) {
      return Some(SectionView::Cached(Arc::clone(cached)));
    }

    let bytes: Arc<[u8]> =
      Arc::from(decompress_with_size(raw, codec, entry.uncompressed_size as usize).ok()?);
    if self.cache_decompressed {
      self.decompressed.write().insert(id, Arc::clone(&bytes));
    }
    Some(SectionView::Cached(bytes))
  }

  // ==========================================================================
  // Node accessors
  // ==========================================================================

  /// NodeID for a physical index
  pub fn node_id(&self, phys: PhysNode) -> Option<NodeId> {
    let section = self.section(SectionId::PhysToNodeId)?;
    let bytes = section.as_ref();
    let idx = phys as usize;
    if idx * 8 + 8 > bytes.len() {
      return None;
    }
    Some(read_u64_at(bytes, idx))
  }

  /// Physical index for a NodeID, or None if absent
  pub fn phys_node(&self, node_id: NodeId) -> Option<PhysNode> {
    let section = self.section(SectionId::NodeIdToPhys)?;
    let bytes = section.as_ref();
    let idx = node_id as usize;
    if idx * 4 + 4 > bytes.len() {
      return None;
    }
    let phys = read_i32_at(bytes, idx);
    if phys < 0 {
      None
    } else {
      Some(phys as PhysNode)
    }
  }

  pub fn has_node(&self, node_id: NodeId) -> bool {
    self.phys_node(node_id).is_some()
  }

  // ==========================================================================
  // String table
  // ==========================================================================

  /// Resolve a StringID; 0 is the empty string
  pub fn string(&self, string_id: StringId) -> Option<String> {
    if string_id == 0 {
      return Some(String::new());
    }
    let offsets = self.section(SectionId::StringOffsets)?;
    let bytes = self.section(SectionId::StringBytes)?;
    let offsets = offsets.as_ref();
    let bytes = bytes.as_ref();

    let idx = string_id as usize;
    if idx * 4 + 8 > offsets.len() {
      return None;
    }
    let start = read_u32_at(offsets, idx) as usize;
    let end = read_u32_at(offsets, idx + 1) as usize;
    if start > end || end > bytes.len() {
      return None;
    }
    String::from_utf8(bytes[start..end].to_vec()).ok()
  }

  // ==========================================================================
  // Catalog names
  // ==========================================================================

  fn catalog_name(&self, section: SectionId, id: u32) -> Option<String> {
    let ids = self.section(section)?;
    let ids = ids.as_ref();
    let idx = id as usize;
    if idx * 4 + 4 > ids.len() {
      return None;
    }
    let string_id = read_u32_at(ids, idx);
    if string_id == 0 {
      return None;
    }
    self.string(string_id)
  }

  pub fn label_name(&self, label_id: LabelId) -> Option<String> {
    self.catalog_name(SectionId::LabelStringIds, label_id)
  }

  pub fn etype_name(&self, etype_id: ETypeId) -> Option<String> {
    self.catalog_name(SectionId::EtypeStringIds, etype_id)
  }

  pub fn propkey_name(&self, propkey_id: PropKeyId) -> Option<String> {
    self.catalog_name(SectionId::PropkeyStringIds, propkey_id)
  }

  // ==========================================================================
  // Adjacency
  // ==========================================================================

  fn csr_range(&self, offsets_section: SectionId, phys: PhysNode) -> Option<(usize, usize)> {
    let offsets = self.section(offsets_section)?;
    let offsets = offsets.as_ref();
    let idx = phys as usize;
    if idx * 4 + 8 > offsets.len() {
      return None;
    }
    let start = read_u32_at(offsets, idx) as usize;
    let end = read_u32_at(offsets, idx + 1) as usize;
    Some((start, end))
  }

  fn out_range(&self, phys: PhysNode) -> Option<(usize, usize)> {
    self.csr_range(SectionId::OutOffsets, phys)
  }

  fn in_range(&self, phys: PhysNode) -> Option<(usize, usize)> {
    if !self.header.flags.contains(SnapshotFlags::HAS_IN_EDGES) {
      return None;
    }
    self.csr_range(SectionId::InOffsets, phys)
  }

  pub fn out_degree(&self, phys: PhysNode) -> usize {
    self.out_range(phys).map(|(s, e)| e - s).unwrap_or(0)
  }

  pub fn in_degree(&self, phys: PhysNode) -> usize {
    self.in_range(phys).map(|(s, e)| e - s).unwrap_or(0)
  }

  /// Iterate `(dst_phys, etype)` pairs of a node's out-edges
  pub fn iter_out_edges(&self, phys: PhysNode) -> OutEdgeIter<'_> {
    let (cur, end) = self.out_range(phys).unwrap_or((0, 0));
    OutEdgeIter {
      etypes: self.section(SectionId::OutEtype),
      dsts: self.section(SectionId::OutDst),
      cur,
      end,
    }
  }

  /// Iterate `(src_phys, etype, out_index)` triples of a node's in-edges
  pub fn iter_in_edges(&self, phys: PhysNode) -> InEdgeIter<'_> {
    let (cur, end) = self.in_range(phys).unwrap_or((0, 0));
    InEdgeIter {
      etypes: self.section(SectionId::InEtype),
      srcs: self.section(SectionId::InSrc),
      out_index: self.section(SectionId::InOutIndex),
      cur,
      end,
    }
  }

  /// Binary search a node's sorted out-edge row for `(etype, dst_phys)`
  pub fn find_edge_index(
    &self,
    src_phys: PhysNode,
    etype: ETypeId,
    dst_phys: PhysNode,
  ) -> Option<usize> {
    let (start, end) = self.out_range(src_phys)?;
    let etypes = self.section(SectionId::OutEtype)?;
    let dsts = self.section(SectionId::OutDst)?;
    let etypes = etypes.as_ref();
    let dsts = dsts.as_ref();

    let mut lo = start;
    let mut hi = end;
    while lo < hi {
      let mid = (lo + hi) / 2;
      let mid_etype = read_u32_at(etypes, mid);
      let mid_dst = read_u32_at(dsts, mid);
      if mid_etype < etype || (mid_etype == etype && mid_dst < dst_phys) {
        lo = mid + 1;
      } else {
        hi = mid;
      }
    }

    if lo < end && read_u32_at(etypes, lo) == etype && read_u32_at(dsts, lo) == dst_phys {
      Some(lo)
    } else {
      None
    }
  }

  pub fn has_edge(&self, src_phys: PhysNode, etype: ETypeId, dst_phys: PhysNode) -> bool {
    self.find_edge_index(src_phys, etype, dst_phys).is_some()
  }

  // ==========================================================================
  // Key index
  // ==========================================================================

  /// Look up a node by user key via the hashed index.
  ///
  /// Bucket entries with a matching hash64 are tie-broken by comparing the
  /// resolved key string literally, so hash collisions resolve correctly.
  pub fn lookup_by_key(&self, key: &str) -> Option<NodeId> {
    let entries = self.section(SectionId::KeyEntries)?;
    let entries = entries.as_ref();
    let num_entries = entries.len() / KEY_INDEX_ENTRY_SIZE;
    if num_entries == 0 {
      return None;
    }

    let hash64 = hash_key(key);
    let (lo, hi) = if self.header.flags.contains(SnapshotFlags::HAS_KEY_BUCKETS) {
      let buckets = self.section(SectionId::KeyBuckets)?;
      let buckets = buckets.as_ref();
      let num_buckets = buckets.len() / 4 - 1;
      let bucket = (hash64 % num_buckets as u64) as usize;
      (
        read_u32_at(buckets, bucket) as usize,
        read_u32_at(buckets, bucket + 1) as usize,
      )
    } else {
      (0, num_entries)
    };

    for i in lo..hi.min(num_entries) {
      let at = i * KEY_INDEX_ENTRY_SIZE;
      if read_u64(entries, at) != hash64 {
        continue;
      }
      let string_id = read_u32(entries, at + 8);
      let node_id = read_u64(entries, at + 16);
      if let Some(entry_key) = self.string(string_id) {
        if entry_key == key {
          return Some(node_id);
        }
      }
    }
    None
  }

  /// A node's key, if it has one
  pub fn node_key(&self, phys: PhysNode) -> Option<String> {
    let keys = self.section(SectionId::NodeKeyString)?;
    let keys = keys.as_ref();
    let idx = phys as usize;
    if idx * 4 + 4 > keys.len() {
      return None;
    }
    let string_id = read_u32_at(keys, idx);
    if string_id == 0 {
      return None;
    }
    self.string(string_id)
  }

  // ==========================================================================
  // Labels
  // ==========================================================================

  pub fn node_labels(&self, phys: PhysNode) -> Vec<LabelId> {
    if !self.header.flags.contains(SnapshotFlags::HAS_NODE_LABELS) {
      return Vec::new();
    }
    let Some((start, end)) = self.csr_range(SectionId::NodeLabelOffsets, phys) else {
      return Vec::new();
    };
    let Some(ids) = self.section(SectionId::NodeLabelIds) else {
      return Vec::new();
    };
    let ids = ids.as_ref();
    (start..end)
      .filter(|i| i * 4 + 4 <= ids.len())
      .map(|i| read_u32_at(ids, i))
      .collect()
  }

  // ==========================================================================
  // Properties
  // ==========================================================================

  fn props_in_range(
    &self,
    keys_section: SectionId,
    vals_section: SectionId,
    start: usize,
    end: usize,
  ) -> HashMap<PropKeyId, PropValue> {
    let mut out = HashMap::new();
    let Some(keys) = self.section(keys_section) else {
      return out;
    };
    let Some(vals) = self.section(vals_section) else {
      return out;
    };
    let keys = keys.as_ref();
    let vals = vals.as_ref();

    for i in start..end {
      if i * 4 + 4 > keys.len() {
        break;
      }
      let key_id = read_u32_at(keys, i);
      if let Some(value) = self.decode_prop_cell(vals, i) {
        out.insert(key_id, value);
      }
    }
    out
  }

  pub fn node_props(&self, phys: PhysNode) -> HashMap<PropKeyId, PropValue> {
    if !self.header.flags.contains(SnapshotFlags::HAS_PROPERTIES) {
      return HashMap::new();
    }
    let Some((start, end)) = self.csr_range(SectionId::NodePropOffsets, phys) else {
      return HashMap::new();
    };
    self.props_in_range(SectionId::NodePropKeys, SectionId::NodePropVals, start, end)
  }

  pub fn node_prop(&self, phys: PhysNode, key_id: PropKeyId) -> Option<PropValue> {
    if !self.header.flags.contains(SnapshotFlags::HAS_PROPERTIES) {
      return None;
    }
    let (start, end) = self.csr_range(SectionId::NodePropOffsets, phys)?;
    let keys = self.section(SectionId::NodePropKeys)?;
    let vals = self.section(SectionId::NodePropVals)?;
    let keys = keys.as_ref();
    for i in start..end {
      if i * 4 + 4 > keys.len() {
        break;
      }
      if read_u32_at(keys, i) == key_id {
        return self.decode_prop_cell(vals.as_ref(), i);
      }
    }
    None
  }

  /// Properties of the edge at CSR traversal index `edge_idx`
  pub fn edge_props(&self, edge_idx: usize) -> HashMap<PropKeyId, PropValue> {
    if !self.header.flags.contains(SnapshotFlags::HAS_PROPERTIES) {
      return HashMap::new();
    }
    let Some(offsets) = self.section(SectionId::EdgePropOffsets) else {
      return HashMap::new();
    };
    let offsets = offsets.as_ref();
    if edge_idx * 4 + 8 > offsets.len() {
      return HashMap::new();
    }
    let start = read_u32_at(offsets, edge_idx) as usize;
    let end = read_u32_at(offsets, edge_idx + 1) as usize;
    self.props_in_range(SectionId::EdgePropKeys, SectionId::EdgePropVals, start, end)
  }

  pub fn edge_prop(&self, edge_idx: usize, key_id: PropKeyId) -> Option<PropValue> {
    self.edge_props(edge_idx).remove(&key_id)
  }

  /// Decode the 16-byte property cell at element `idx` of a vals section
  fn decode_prop_cell(&self, vals: &[u8], idx: usize) -> Option<PropValue> {
    let at = idx * PROP_VALUE_DISK_SIZE;
    if at + PROP_VALUE_DISK_SIZE > vals.len() {
      return None;
    }
    let tag = PropValueTag::from_u8(vals[at])?;
    let payload = read_u64(vals, at + 8);

    Some(match tag {
      PropValueTag::Null => PropValue::Null,
      PropValueTag::Bool => PropValue::Bool(payload != 0),
      PropValueTag::I64 => PropValue::I64(payload as i64),
      PropValueTag::F64 => PropValue::F64(f64::from_bits(payload)),
      PropValueTag::String => PropValue::String(self.string(payload as StringId)?),
      PropValueTag::VectorF32 => PropValue::VectorF32(self.vector(payload as usize)?),
    })
  }

  /// Resolve an out-of-line vector payload by table index
  fn vector(&self, idx: usize) -> Option<Vec<f32>> {
    if !self.header.flags.contains(SnapshotFlags::HAS_VECTORS) {
      return None;
    }
    let offsets = self.section(SectionId::VectorOffsets)?;
    let data = self.section(SectionId::VectorData)?;
    let offsets = offsets.as_ref();
    let data = data.as_ref();

    if (idx + 1) * 8 + 8 > offsets.len() {
      return None;
    }
    let start = read_u64_at(offsets, idx) as usize;
    let end = read_u64_at(offsets, idx + 1) as usize;
    if start > end || end > data.len() || (end - start) % 4 != 0 {
      return None;
    }

    let mut out = Vec::with_capacity((end - start) / 4);
    let mut at = start;
    while at < end {
      out.push(read_f32(data, at));
      at += 4;
    }
    Some(out)
  }
}

// ============================================================================
// Edge iterators
// ============================================================================

/// Iterator over `(dst_phys, etype)` of a node's out-edge row
pub struct OutEdgeIter<'a> {
  etypes: Option<SectionView<'a>>,
  dsts: Option<SectionView<'a>>,
  cur: usize,
  end: usize,
}

impl Iterator for OutEdgeIter<'_> {
  type Item = (PhysNode, ETypeId);

  fn next(&mut self) -> Option<Self::Item> {
    if self.cur >= self.end {
      return None;
    }
    let etypes = self.etypes.as_ref()?.as_ref();
    let dsts = self.dsts.as_ref()?.as_ref();
    if self.cur * 4 + 4 > etypes.len() || self.cur * 4 + 4 > dsts.len() {
      return None;
    }
    let item = (read_u32_at(dsts, self.cur), read_u32_at(etypes, self.cur));
    self.cur += 1;
    Some(item)
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    let remaining = self.end.saturating_sub(self.cur);
    (remaining, Some(remaining))
  }
}

impl ExactSizeIterator for OutEdgeIter<'_> {}

/// Iterator over `(src_phys, etype, out_index)` of a node's in-edge row
pub struct InEdgeIter<'a> {
  etypes: Option<SectionView<'a>>,
  srcs: Option<SectionView<'a>>,
  out_index: Option<SectionView<'a>>,
  cur: usize,
  end: usize,
}

impl Iterator for InEdgeIter<'_> {
  type Item = (PhysNode, ETypeId, u32);

  fn next(&mut self) -> Option<Self::Item> {
    if self.cur >= self.end {
      return None;
    }
    let etypes = self.etypes.as_ref()?.as_ref();
    let srcs = self.srcs.as_ref()?.as_ref();
    if self.cur * 4 + 4 > etypes.len() || self.cur * 4 + 4 > srcs.len() {
      return None;
    }
    let out_index = self
      .out_index
      .as_ref()
      .map(|s| s.as_ref())
      .filter(|s| self.cur * 4 + 4 <= s.len())
      .map(|s| read_u32_at(s, self.cur))
      .unwrap_or(0);
    let item = (
      read_u32_at(srcs, self.cur),
      read_u32_at(etypes, self.cur),
      out_index,
    );
    self.cur += 1;
    Some(item)
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    let remaining = self.end.saturating_sub(self.cur);
    (remaining, Some(remaining))
  }
}

impl ExactSizeIterator for InEdgeIter<'_> {}
