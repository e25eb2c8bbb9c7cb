//! WAL record framing and typed operations.
//!
//! A record is 8-byte aligned on disk:
//!
//! ```text
//! [recLen u32][type u8][flags u8][reserved u16][txid u64]  16-byte header
//! [payload ...]
//! [crc u32]                                                CRC-32C
//! [zero padding to 8-byte boundary]
//! ```
//!
//! `recLen` is the unpadded length (header + payload + CRC). The CRC covers
//! everything after `recLen` through the end of the payload. A skip marker
//! (recLen = 0 followed by the 0xFFFF_FFFF sentinel) means "resume reading
//! from the start of this region".

use crate::constants::*;
use crate::error::{RayError, Result};
use crate::types::*;
use crate::util::binary::{read_f32, read_u32, read_u64, write_u32, write_u64};
use crate::util::crc::crc32c;

// ============================================================================
// Record types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
  Begin = 1,
  Commit = 2,
  Rollback = 3,
  CreateNode = 4,
  DeleteNode = 5,
  AddEdge = 6,
  DeleteEdge = 7,
  DefineLabel = 8,
  DefineEtype = 9,
  DefinePropkey = 10,
  AddNodeLabel = 11,
  RemoveNodeLabel = 12,
  SetNodeProp = 13,
  DelNodeProp = 14,
  SetEdgeProp = 15,
  DelEdgeProp = 16,
  SetNodeVector = 17,
  DelNodeVector = 18,
  BatchVectors = 19,
  SealFragment = 20,
  CompactFragments = 21,
}

impl WalRecordType {
  pub fn from_u8(value: u8) -> Option<Self> {
    match value {
      1 => Some(Self::Begin),
      2 => Some(Self::Commit),
      3 => Some(Self::Rollback),
      4 => Some(Self::CreateNode),
      5 => Some(Self::DeleteNode),
      6 => Some(Self::AddEdge),
      7 => Some(Self::DeleteEdge),
      8 => Some(Self::DefineLabel),
      9 => Some(Self::DefineEtype),
      10 => Some(Self::DefinePropkey),
      11 => Some(Self::AddNodeLabel),
      12 => Some(Self::RemoveNodeLabel),
      13 => Some(Self::SetNodeProp),
      14 => Some(Self::DelNodeProp),
      15 => Some(Self::SetEdgeProp),
      16 => Some(Self::DelEdgeProp),
      17 => Some(Self::SetNodeVector),
      18 => Some(Self::DelNodeVector),
      19 => Some(Self::BatchVectors),
      20 => Some(Self::SealFragment),
      21 => Some(Self::CompactFragments),
      _ => None,
    }
  }
}

// ============================================================================
// Typed operations
// ============================================================================

/// A logical WAL operation with its payload decoded
#[derive(Debug, Clone, PartialEq)]
pub enum WalOp {
  Begin,
  Commit,
  Rollback,
  CreateNode {
    node_id: NodeId,
    key: Option<String>,
  },
  DeleteNode {
    node_id: NodeId,
  },
  AddEdge {
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
  },
  DeleteEdge {
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
  },
  DefineLabel {
    label_id: LabelId,
    name: String,
  },
  DefineEtype {
    etype_id: ETypeId,
    name: String,
  },
  DefinePropkey {
    propkey_id: PropKeyId,
    name: String,
  },
  AddNodeLabel {
    node_id: NodeId,
    label_id: LabelId,
  },
  RemoveNodeLabel {
    node_id: NodeId,
    label_id: LabelId,
  },
  SetNodeProp {
    node_id: NodeId,
    key_id: PropKeyId,
    value: PropValue,
  },
  DelNodeProp {
    node_id: NodeId,
    key_id: PropKeyId,
  },
  SetEdgeProp {
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    key_id: PropKeyId,
    value: PropValue,
  },
  DelEdgeProp {
    src: NodeId,
    etype: ETypeId,
    dst: NodeId,
    key_id: PropKeyId,
  },
  SetNodeVector {
    node_id: NodeId,
    key_id: PropKeyId,
    vector: Vec<f32>,
  },
  DelNodeVector {
    node_id: NodeId,
    key_id: PropKeyId,
  },
  BatchVectors {
    key_id: PropKeyId,
    vectors: Vec<(NodeId, Vec<f32>)>,
  },
  SealFragment {
    fragment_id: u64,
  },
  CompactFragments {
    fragment_ids: Vec<u64>,
  },
}

impl WalOp {
  pub fn record_type(&self) -> WalRecordType {
    match self {
      WalOp::Begin => WalRecordType::Begin,
      WalOp::Commit => WalRecordType::Commit,
      WalOp::Rollback => WalRecordType::Rollback,
      WalOp::CreateNode { .. } => WalRecordType::CreateNode,
      WalOp::DeleteNode { .. } => WalRecordType::DeleteNode,
      WalOp::AddEdge { .. } => WalRecordType::AddEdge,
      WalOp::DeleteEdge { .. } => WalRecordType::DeleteEdge,
      WalOp::DefineLabel { .. } => WalRecordType::DefineLabel,
      WalOp::DefineEtype { .. } => WalRecordType::DefineEtype,
      WalOp::DefinePropkey { .. } => WalRecordType::DefinePropkey,
      WalOp::AddNodeLabel { .. } => WalRecordType::AddNodeLabel,
      WalOp::RemoveNodeLabel { .. } => WalRecordType::RemoveNodeLabel,
      WalOp::SetNodeProp { .. } => WalRecordType::SetNodeProp,
      WalOp::DelNodeProp { .. } => WalRecordType::DelNodeProp,
      WalOp::SetEdgeProp { .. } => WalRecordType::SetEdgeProp,
      WalOp::DelEdgeProp { .. } => WalRecordType::DelEdgeProp,
      WalOp::SetNodeVector { .. } => WalRecordType::SetNodeVector,
      WalOp::DelNodeVector { .. } => WalRecordType::DelNodeVector,
      WalOp::BatchVectors { .. } => WalRecordType::BatchVectors,
      WalOp::SealFragment { .. } => WalRecordType::SealFragment,
      WalOp::CompactFragments { .. } => WalRecordType::CompactFragments,
    }
  }

  fn encode_payload(&self) -> Vec<u8> {
    let mut buf = PayloadWriter::new();
    match self {
      WalOp::Begin | WalOp::Commit | WalOp::Rollback => {}
      WalOp::CreateNode { node_id, key } => {
        buf.u64(*node_id);
        buf.opt_str(key.as_deref());
      }
      WalOp::DeleteNode { node_id } => buf.u64(*node_id),
      WalOp::AddEdge { src, etype, dst } | WalOp::DeleteEdge { src, etype, dst } => {
        buf.u64(*src);
        buf.u32(*etype);
        buf.u64(*dst);
      }
      WalOp::DefineLabel { label_id: id, name }
      | WalOp::DefineEtype { etype_id: id, name }
      | WalOp::DefinePropkey { propkey_id: id, name } => {
        buf.u32(*id);
        buf.str(name);
      }
      WalOp::AddNodeLabel { node_id, label_id } | WalOp::RemoveNodeLabel { node_id, label_id } => {
        buf.u64(*node_id);
        buf.u32(*label_id);
      }
      WalOp::SetNodeProp {
        node_id,
        key_id,
        value,
      } => {
        buf.u64(*node_id);
        buf.u32(*key_id);
        buf.prop_value(value);
      }
      WalOp::DelNodeProp { node_id, key_id } => {
        buf.u64(*node_id);
        buf.u32(*key_id);
      }
      WalOp::SetEdgeProp {
        src,
        etype,
        dst,
        key_id,
        value,
      } => {
        buf.u64(*src);
        buf.u32(*etype);
        buf.u64(*dst);
        buf.u32(*key_id);
        buf.prop_value(value);
      }
      WalOp::DelEdgeProp {
        src,
        etype,
        dst,
        key_id,
      } => {
        buf.u64(*src);
        buf.u32(*etype);
        buf.u64(*dst);
        buf.u32(*key_id);
      }
      WalOp::SetNodeVector {
        node_id,
        key_id,
        vector,
      } => {
        buf.u64(*node_id);
        buf.u32(*key_id);
        buf.f32_slice(vector);
      }
      WalOp::DelNodeVector { node_id, key_id } => {
        buf.u64(*node_id);
        buf.u32(*key_id);
      }
      WalOp::BatchVectors { key_id, vectors } => {
        buf.u32(*key_id);
        buf.u32(vectors.len() as u32);
        for (node_id, vector) in vectors {
          buf.u64(*node_id);
          buf.f32_slice(vector);
        }
      }
      WalOp::SealFragment { fragment_id } => buf.u64(*fragment_id),
      WalOp::CompactFragments { fragment_ids } => {
        buf.u32(fragment_ids.len() as u32);
        for id in fragment_ids {
          buf.u64(*id);
        }
      }
    }
    buf.into_bytes()
  }

  fn decode_payload(rtype: WalRecordType, payload: &[u8]) -> Result<Self> {
    let mut r = PayloadReader::new(payload);
    let op = match rtype {
      WalRecordType::Begin => WalOp::Begin,
      WalRecordType::Commit => WalOp::Commit,
      WalRecordType::Rollback => WalOp::Rollback,
      WalRecordType::CreateNode => WalOp::CreateNode {
        node_id: r.u64()?,
        key: r.opt_str()?,
      },
      WalRecordType::DeleteNode => WalOp::DeleteNode { node_id: r.u64()? },
      WalRecordType::AddEdge => WalOp::AddEdge {
        src: r.u64()?,
        etype: r.u32()?,
        dst: r.u64()?,
      },
      WalRecordType::DeleteEdge => WalOp::DeleteEdge {
        src: r.u64()?,
        etype: r.u32()?,
        dst: r.u64()?,
      },
      WalRecordType::DefineLabel => WalOp::DefineLabel {
        label_id: r.u32()?,
        name: r.str()?,
      },
      WalRecordType::DefineEtype => WalOp::DefineEtype {
        etype_id: r.u32()?,
        name: r.str()?,
      },
      WalRecordType::DefinePropkey => WalOp::DefinePropkey {
        propkey_id: r.u32()?,
        name: r.str()?,
      },
      WalRecordType::AddNodeLabel => WalOp::AddNodeLabel {
        node_id: r.u64()?,
        label_id: r.u32()?,
      },
      WalRecordType::RemoveNodeLabel => WalOp::RemoveNodeLabel {
        node_id: r.u64()?,
        label_id: r.u32()?,
      },
      WalRecordType::SetNodeProp => WalOp::SetNodeProp {
        node_id: r.u64()?,
        key_id: r.u32()?,
        value: r.prop_value()?,
      },
      WalRecordType::DelNodeProp => WalOp::DelNodeProp {
        node_id: r.u64()?,
        key_id: r.u32()?,
      },
      WalRecordType::SetEdgeProp => WalOp::SetEdgeProp {
        src: r.u64()?,
        etype: r.u32()?,
        dst: r.u64()?,
        key_id: r.u32()?,
        value: r.prop_value()?,
      },
      WalRecordType::DelEdgeProp => WalOp::DelEdgeProp {
        src: r.u64()?,
        etype: r.u32()?,
        dst: r.u64()?,
        key_id: r.u32()?,
      },
      WalRecordType::SetNodeVector => WalOp::SetNodeVector {
        node_id: r.u64()?,
        key_id: r.u32()?,
        vector: r.f32_slice()?,
      },
      WalRecordType::DelNodeVector => WalOp::DelNodeVector {
        node_id: r.u64()?,
        key_id: r.u32()?,
      },
      WalRecordType::BatchVectors => {
        let key_id = r.u32()?;
        let count = r.u32()? as usize;
        let mut vectors = Vec::with_capacity(count);
        for _ in 0..count {
          let node_id = r.u64()?;
          vectors.push((node_id, r.f32_slice()?));
        }
        WalOp::BatchVectors { key_id, vectors }
      }
      WalRecordType::SealFragment => WalOp::SealFragment {
        fragment_id: r.u64()?,
      },
      WalRecordType::CompactFragments => {
        let count = r.u32()? as usize;
        let mut fragment_ids = Vec::with_capacity(count);
        for _ in 0..count {
          fragment_ids.push(r.u64()?);
        }
        WalOp::CompactFragments { fragment_ids }
      }
    };
    r.finish()?;
    Ok(op)
  }
}

// ============================================================================
// Framed record
// ============================================================================

/// A WAL record bound to a transaction
#[derive(Debug, Clone, PartialEq)]
pub struct WalRecord {
  pub txid: TxId,
  pub flags: u8,
  pub op: WalOp,
}

impl WalRecord {
  pub fn new(txid: TxId, op: WalOp) -> Self {
    Self { txid, flags: 0, op }
  }

  /// Aligned on-disk footprint of this record
  pub fn encoded_len(&self) -> usize {
    let payload_len = self.op.encode_payload().len();
    let rec_len = WAL_RECORD_HEADER_SIZE + payload_len + WAL_RECORD_CRC_SIZE;
    crate::util::binary::align_up(rec_len, WAL_RECORD_ALIGNMENT)
  }

  /// Serialize with framing, CRC, and alignment padding
  pub fn encode(&self) -> Vec<u8> {
    let payload = self.op.encode_payload();
    let rec_len = WAL_RECORD_HEADER_SIZE + payload.len() + WAL_RECORD_CRC_SIZE;
    let padded = crate::util::binary::align_up(rec_len, WAL_RECORD_ALIGNMENT);

    let mut buf = vec![0u8; padded];
    write_u32(&mut buf, 0, rec_len as u32);
    buf[4] = self.op.record_type() as u8;
    buf[5] = self.flags;
    // reserved u16 at 6 stays zero
    write_u64(&mut buf, 8, self.txid);
    buf[WAL_RECORD_HEADER_SIZE..WAL_RECORD_HEADER_SIZE + payload.len()].copy_from_slice(&payload);

    // CRC covers bytes after recLen through the end of the payload
    let crc = crc32c(&buf[4..WAL_RECORD_HEADER_SIZE + payload.len()]);
    write_u32(&mut buf, WAL_RECORD_HEADER_SIZE + payload.len(), crc);
    buf
  }

  /// Encode a skip marker: zero recLen plus sentinel
  pub fn encode_skip_marker() -> [u8; WAL_SKIP_MARKER_SIZE] {
    let mut buf = [0u8; WAL_SKIP_MARKER_SIZE];
    write_u32(&mut buf, 4, WAL_SKIP_MARKER);
    buf
  }
}

/// Outcome of decoding at a region offset
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
  /// A valid record; `advance` is the aligned on-disk footprint
  Record { record: WalRecord, advance: usize },
  /// Skip marker: resume reading from the region start
  Skip,
  /// Zeroes / truncation / checksum failure: logical end of the region
  End,
}

/// Decode the frame at `buf[offset..]`.
///
/// Corruption is not an error at this level: a bad CRC, unknown type, or
/// truncated frame terminates the scan, matching "stop at the first invalid
/// or truncated record".
pub fn decode_frame(buf: &[u8], offset: usize) -> DecodedFrame {
  if offset + WAL_SKIP_MARKER_SIZE > buf.len() {
    return DecodedFrame::End;
  }

  let rec_len = read_u32(buf, offset) as usize;
  if rec_len == 0 {
    if read_u32(buf, offset + 4) == WAL_SKIP_MARKER {
      return DecodedFrame::Skip;
    }
    return DecodedFrame::End;
  }

  if rec_len < WAL_RECORD_HEADER_SIZE + WAL_RECORD_CRC_SIZE || offset + rec_len > buf.len() {
    return DecodedFrame::End;
  }

  let payload_len = rec_len - WAL_RECORD_HEADER_SIZE - WAL_RECORD_CRC_SIZE;
  let crc_at = offset + WAL_RECORD_HEADER_SIZE + payload_len;
  let stored = read_u32(buf, crc_at);
  let computed = crc32c(&buf[offset + 4..crc_at]);
  if stored != computed {
    return DecodedFrame::End;
  }

  let Some(rtype) = WalRecordType::from_u8(buf[offset + 4]) else {
    return DecodedFrame::End;
  };
  let flags = buf[offset + 5];
  let txid = read_u64(buf, offset + 8);
  let payload = &buf[offset + WAL_RECORD_HEADER_SIZE..crc_at];

  match WalOp::decode_payload(rtype, payload) {
    Ok(op) => DecodedFrame::Record {
      record: WalRecord { txid, flags, op },
      advance: crate::util::binary::align_up(rec_len, WAL_RECORD_ALIGNMENT),
    },
    Err(_) => DecodedFrame::End,
  }
}

// ============================================================================
// Payload codec helpers
// ============================================================================

struct PayloadWriter {
  buf: Vec<u8>,
}

impl PayloadWriter {
  fn new() -> Self {
    Self { buf: Vec::new() }
  }

  fn u32(&mut self, value: u32) {
    self.buf.extend_from_slice(&value.to_le_bytes());
  }

  fn u64(&mut self, value: u64) {
    self.buf.extend_from_slice(&value.to_le_bytes());
  }

  fn str(&mut self, s: &str) {
    self.u32(s.len() as u32);
    self.buf.extend_from_slice(s.as_bytes());
  }

  /// None encodes as length u32::MAX
  fn opt_str(&mut self, s: Option<&str>) {
    match s {
      Some(s) => self.str(s),
      None => self.u32(u32::MAX),
    }
  }

  fn f32_slice(&mut self, values: &[f32]) {
    self.u32(values.len() as u32);
    for v in values {
      self.buf.extend_from_slice(&v.to_le_bytes());
    }
  }

  fn prop_value(&mut self, value: &PropValue) {
    self.buf.push(value.tag() as u8);
    match value {
      PropValue::Null => {}
      PropValue::Bool(b) => self.buf.push(*b as u8),
      PropValue::I64(v) => self.u64(*v as u64),
      PropValue::F64(v) => self.u64(v.to_bits()),
      PropValue::String(s) => self.str(s),
      PropValue::VectorF32(v) => self.f32_slice(v),
    }
  }

  fn into_bytes(self) -> Vec<u8> {
    self.buf
  }
}

struct PayloadReader<'a> {
  buf: &'a [u8],
  pos: usize,
}

impl<'a> PayloadReader<'a> {
  fn new(buf: &'a [u8]) -> Self {
    Self { buf, pos: 0 }
  }

  fn need(&self, n: usize) -> Result<()> {
    if self.pos + n > self.buf.len() {
      return Err(RayError::InvalidFormat(
        "wal payload truncated".to_string(),
      ));
    }
    Ok(())
  }

  fn u8(&mut self) -> Result<u8> {
    self.need(1)?;
    let v = self.buf[self.pos];
    self.pos += 1;
    Ok(v)
  }

  fn u32(&mut self) -> Result<u32> {
    self.need(4)?;
    let v = read_u32(self.buf, self.pos);
    self.pos += 4;
    Ok(v)
  }

  fn u64(&mut self) -> Result<u64> {
    self.need(8)?;
    let v = read_u64(self.buf, self.pos);
    self.pos += 8;
    Ok(v)
  }

  fn str(&mut self) -> Result<String> {
    let len = self.u32()? as usize;
    self.need(len)?;
    let s = std::str::from_utf8(&self.buf[self.pos..self.pos + len])
      .map_err(|_| RayError::InvalidFormat("wal payload string is not UTF-8".to_string()))?
      .to_string();
    self.pos += len;
    Ok(s)
  }

  fn opt_str(&mut self) -> Result<Option<String>> {
    let len = self.u32()?;
    if len == u32::MAX {
      return Ok(None);
    }
    let len = len as usize;
    self.need(len)?;
    let s = std::str::from_utf8(&self.buf[self.pos..self.pos + len])
      .map_err(|_| RayError::InvalidFormat("wal payload string is not UTF-8".to_string()))?
      .to_string();
    self.pos += len;
    Ok(Some(s))
  }

  fn f32_slice(&mut self) -> Result<Vec<f32>> {
    let count = self.u32()? as usize;
    self.need(count * 4)?;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
      out.push(read_f32(self.buf, self.pos + i * 4));
    }
    self.pos += count * 4;
    Ok(out)
  }

  fn prop_value(&mut self) -> Result<PropValue> {
    let tag = PropValueTag::from_u8(self.u8()?)
      .ok_or_else(|| RayError::InvalidFormat("unknown property value tag".to_string()))?;
    Ok(match tag {
      PropValueTag::Null => PropValue::Null,
      PropValueTag::Bool => PropValue::Bool(self.u8()? != 0),
      PropValueTag::I64 => PropValue::I64(self.u64()? as i64),
      PropValueTag::F64 => PropValue::F64(f64::from_bits(self.u64()?)),
      PropValueTag::String => PropValue::String(self.str()?),
      PropValueTag::VectorF32 => PropValue::VectorF32(self.f32_slice()?),
    })
  }

  fn finish(&self) -> Result<()> {
    if self.pos != self.buf.len() {
      return Err(RayError::InvalidFormat(format!(
        "wal payload has {} trailing bytes",
        self.buf.len() - self.pos
      )));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn all_ops() -> Vec<WalOp> {
    vec![
      WalOp::Begin,
      WalOp::Commit,
      WalOp::Rollback,
      WalOp::CreateNode {
        node_id: 1,
        key: Some("user:alice".to_string()),
      },
      WalOp::CreateNode {
        node_id: 2,
        key: None,
      },
      WalOp::DeleteNode { node_id: 9 },
      WalOp::AddEdge {
        src: 1,
        etype: 3,
        dst: 2,
      },
      WalOp::DeleteEdge {
        src: 2,
        etype: 3,
        dst: 1,
      },
      WalOp::DefineLabel {
        label_id: 1,
        name: "Person".to_string(),
      },
      WalOp::DefineEtype {
        etype_id: 2,
        name: "follows".to_string(),
      },
      WalOp::DefinePropkey {
        propkey_id: 3,
        name: "name".to_string(),
      },
      WalOp::AddNodeLabel {
        node_id: 1,
        label_id: 1,
      },
      WalOp::RemoveNodeLabel {
        node_id: 1,
        label_id: 1,
      },
      WalOp::SetNodeProp {
        node_id: 1,
        key_id: 3,
        value: PropValue::String("Alice".to_string()),
      },
      WalOp::SetNodeProp {
        node_id: 1,
        key_id: 4,
        value: PropValue::F64(2.5),
      },
      WalOp::DelNodeProp {
        node_id: 1,
        key_id: 3,
      },
      WalOp::SetEdgeProp {
        src: 1,
        etype: 2,
        dst: 2,
        key_id: 5,
        value: PropValue::I64(-8),
      },
      WalOp::DelEdgeProp {
        src: 1,
        etype: 2,
        dst: 2,
        key_id: 5,
      },
      WalOp::SetNodeVector {
        node_id: 1,
        key_id: 6,
        vector: vec![0.25, -1.0, 3.5],
      },
      WalOp::DelNodeVector {
        node_id: 1,
        key_id: 6,
      },
      WalOp::BatchVectors {
        key_id: 6,
        vectors: vec![(1, vec![1.0]), (2, vec![0.0, 2.0])],
      },
      WalOp::SealFragment { fragment_id: 12 },
      WalOp::CompactFragments {
        fragment_ids: vec![3, 4, 5],
      },
    ]
  }

  #[test]
  fn every_kind_round_trips() {
    for op in all_ops() {
      let record = WalRecord::new(77, op.clone());
      let bytes = record.encode();
      assert_eq!(bytes.len() % WAL_RECORD_ALIGNMENT, 0);
      match decode_frame(&bytes, 0) {
        DecodedFrame::Record { record: decoded, advance } => {
          assert_eq!(decoded.txid, 77);
          assert_eq!(decoded.op, op);
          assert_eq!(advance, bytes.len());
        }
        other => panic!("expected record for {op:?}, got {other:?}"),
      }
    }
  }

  #[test]
  fn corrupted_payload_ends_scan() {
    let record = WalRecord::new(
      1,
      WalOp::CreateNode {
        node_id: 5,
        key: Some("k".to_string()),
      },
    );
    let mut bytes = record.encode();
    bytes[WAL_RECORD_HEADER_SIZE] ^= 0xff;
    assert_eq!(decode_frame(&bytes, 0), DecodedFrame::End);
  }

  #[test]
  fn unknown_type_ends_scan() {
    let record = WalRecord::new(1, WalOp::Begin);
    let mut bytes = record.encode();
    bytes[4] = 200;
    // Fix the CRC so only the type is wrong
    let rec_len = read_u32(&bytes, 0) as usize;
    let crc_at = rec_len - WAL_RECORD_CRC_SIZE;
    let crc = crc32c(&bytes[4..crc_at]);
    write_u32(&mut bytes, crc_at, crc);
    assert_eq!(decode_frame(&bytes, 0), DecodedFrame::End);
  }

  #[test]
  fn skip_marker_detected() {
    let marker = WalRecord::encode_skip_marker();
    assert_eq!(decode_frame(&marker, 0), DecodedFrame::Skip);
  }

  #[test]
  fn zeroes_are_end() {
    assert_eq!(decode_frame(&[0u8; 64], 0), DecodedFrame::End);
  }
}
