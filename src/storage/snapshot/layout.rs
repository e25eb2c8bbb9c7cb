//! Snapshot on-disk layout: header, flags, section table.
//!
//! Layout: `[header | section table | section data (64-aligned each) | crc]`.
//! The section table has one fixed slot per `SectionId`; a zero length
//! means the section is absent.

use bitflags::bitflags;

use crate::constants::*;
use crate::error::{RayError, Result};
use crate::util::binary::{read_u32, read_u64, write_u32, write_u64};

bitflags! {
  /// Optional feature bits in the snapshot header
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct SnapshotFlags: u32 {
    const HAS_IN_EDGES = 1 << 0;
    const HAS_PROPERTIES = 1 << 1;
    const HAS_KEY_BUCKETS = 1 << 2;
    const HAS_NODE_LABELS = 1 << 3;
    const HAS_VECTORS = 1 << 4;
  }
}

/// Section identifiers; the table slot order is fixed on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SectionId {
  PhysToNodeId = 0,
  NodeIdToPhys = 1,
  OutOffsets = 2,
  OutDst = 3,
  OutEtype = 4,
  InOffsets = 5,
  InSrc = 6,
  InEtype = 7,
  InOutIndex = 8,
  StringOffsets = 9,
  StringBytes = 10,
  LabelStringIds = 11,
  EtypeStringIds = 12,
  PropkeyStringIds = 13,
  NodeKeyString = 14,
  KeyEntries = 15,
  KeyBuckets = 16,
  NodePropOffsets = 17,
  NodePropKeys = 18,
  NodePropVals = 19,
  EdgePropOffsets = 20,
  EdgePropKeys = 21,
  EdgePropVals = 22,
  NodeLabelOffsets = 23,
  NodeLabelIds = 24,
  VectorOffsets = 25,
  VectorData = 26,
}

impl SectionId {
  pub const COUNT: usize = 27;

  pub fn from_u32(value: u32) -> Option<Self> {
    if value < Self::COUNT as u32 {
      Some(match value {
        0 => Self::PhysToNodeId,
        1 => Self::NodeIdToPhys,
        2 => Self::OutOffsets,
        3 => Self::OutDst,
        4 => Self::OutEtype,
        5 => Self::InOffsets,
        6 => Self::InSrc,
        7 => Self::InEtype,
        8 => Self::InOutIndex,
        9 => Self::StringOffsets,
        10 => Self::StringBytes,
        11 => Self::LabelStringIds,
        12 => Self::EtypeStringIds,
        13 => Self::PropkeyStringIds,
        14 => Self::NodeKeyString,
        15 => Self::KeyEntries,
        16 => Self::KeyBuckets,
        17 => Self::NodePropOffsets,
        18 => Self::NodePropKeys,
        19 => Self::NodePropVals,
        20 => Self::EdgePropOffsets,
        21 => Self::EdgePropKeys,
        22 => Self::EdgePropVals,
        23 => Self::NodeLabelOffsets,
        24 => Self::NodeLabelIds,
        25 => Self::VectorOffsets,
        _ => Self::VectorData,
      })
    } else {
      None
    }
  }
}

/// One section table slot
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionEntry {
  /// Byte offset relative to the snapshot start; length 0 = absent
  pub offset: u64,
  pub length: u64,
  /// Compression identifier (0=NONE, 1=ZSTD, 2=GZIP, 3=DEFLATE)
  pub compression: u32,
  /// Mandatory when compression != NONE
  pub uncompressed_size: u32,
}

/// Fixed-size snapshot header
#[derive(Debug, Clone)]
pub struct SnapshotHeader {
  pub magic: u32,
  pub version: u32,
  pub min_reader_version: u32,
  pub flags: SnapshotFlags,
  pub generation: u64,
  pub created_unix_ns: u64,
  pub num_nodes: u64,
  pub num_edges: u64,
  pub max_node_id: u64,
  pub num_labels: u64,
  pub num_etypes: u64,
  pub num_propkeys: u64,
  pub num_strings: u64,
}

impl SnapshotHeader {
  /// Parse the header at the start of `buf`, validating magic and version
  pub fn parse(buf: &[u8]) -> Result<Self> {
    if buf.len() < SNAPSHOT_HEADER_SIZE {
      return Err(RayError::InvalidFormat(format!(
        "snapshot too small: {} bytes",
        buf.len()
      )));
    }

    let magic = read_u32(buf, 0);
    if magic != MAGIC_SNAPSHOT {
      return Err(RayError::InvalidFormat(format!(
        "bad snapshot magic {magic:#010x}"
      )));
    }

    let version = read_u32(buf, 4);
    let min_reader_version = read_u32(buf, 8);
    if min_reader_version > VERSION_SNAPSHOT {
      return Err(RayError::VersionTooNew {
        required: min_reader_version,
        supported: VERSION_SNAPSHOT,
      });
    }

    Ok(Self {
      magic,
      version,
      min_reader_version,
      flags: SnapshotFlags::from_bits_truncate(read_u32(buf, 12)),
      generation: read_u64(buf, 16),
      created_unix_ns: read_u64(buf, 24),
      num_nodes: read_u64(buf, 32),
      num_edges: read_u64(buf, 40),
      max_node_id: read_u64(buf, 48),
      num_labels: read_u64(buf, 56),
      num_etypes: read_u64(buf, 64),
      num_propkeys: read_u64(buf, 72),
      num_strings: read_u64(buf, 80),
    })
  }

  /// Serialize into the first `SNAPSHOT_HEADER_SIZE` bytes of `buf`
  pub fn write_to(&self, buf: &mut [u8]) {
    write_u32(buf, 0, self.magic);
    write_u32(buf, 4, self.version);
    write_u32(buf, 8, self.min_reader_version);
    write_u32(buf, 12, self.flags.bits());
    write_u64(buf, 16, self.generation);
    write_u64(buf, 24, self.created_unix_ns);
    write_u64(buf, 32, self.num_nodes);
    write_u64(buf, 40, self.num_edges);
    write_u64(buf, 48, self.max_node_id);
    write_u64(buf, 56, self.num_labels);
    write_u64(buf, 64, self.num_etypes);
    write_u64(buf, 72, self.num_propkeys);
    write_u64(buf, 80, self.num_strings);
  }
}

/// Section table parse output
pub struct ParsedSectionTable {
  pub sections: Vec<SectionEntry>,
  /// Max over sections of offset+length, relative to the snapshot start
  pub max_section_end: usize,
}

/// Parse the fixed section table following the header. Stored offsets are
/// relative to the snapshot start; `buf` must begin at the snapshot.
pub fn parse_section_table(buf: &[u8]) -> Result<ParsedSectionTable> {
  let table_end = SNAPSHOT_HEADER_SIZE + SectionId::COUNT * SECTION_ENTRY_SIZE;
  if buf.len() < table_end {
    return Err(RayError::InvalidFormat(
      "snapshot section table truncated".to_string(),
    ));
  }

  let mut sections = Vec::with_capacity(SectionId::COUNT);
  let mut max_section_end = table_end;

  for slot in 0..SectionId::COUNT {
    let at = SNAPSHOT_HEADER_SIZE + slot * SECTION_ENTRY_SIZE;
    let entry = SectionEntry {
      offset: read_u64(buf, at),
      length: read_u64(buf, at + 8),
      compression: read_u32(buf, at + 16),
      uncompressed_size: read_u32(buf, at + 20),
    };

    if entry.length > 0 {
      let end = entry
        .offset
        .checked_add(entry.length)
        .ok_or_else(|| RayError::InvalidFormat("section range overflows".to_string()))?;
      if (entry.offset as usize) < table_end {
        return Err(RayError::InvalidFormat(format!(
          "section {slot} overlaps the header"
        )));
      }
      max_section_end = max_section_end.max(end as usize);
      if entry.compression != 0 && entry.uncompressed_size == 0 {
        return Err(RayError::InvalidFormat(format!(
          "compressed section {slot} is missing its uncompressed size"
        )));
      }
    }

    sections.push(entry);
  }

  Ok(ParsedSectionTable {
    sections,
    max_section_end,
  })
}

/// Write a section table slot
pub fn write_section_entry(buf: &mut [u8], slot: usize, entry: &SectionEntry) {
  let at = SNAPSHOT_HEADER_SIZE + slot * SECTION_ENTRY_SIZE;
  write_u64(buf, at, entry.offset);
  write_u64(buf, at + 8, entry.length);
  write_u32(buf, at + 16, entry.compression);
  write_u32(buf, at + 20, entry.uncompressed_size);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn section_id_range() {
    assert_eq!(SectionId::from_u32(0), Some(SectionId::PhysToNodeId));
    assert_eq!(SectionId::from_u32(26), Some(SectionId::VectorData));
    assert_eq!(SectionId::from_u32(27), None);
  }

  #[test]
  fn header_round_trip() {
    let header = SnapshotHeader {
      magic: MAGIC_SNAPSHOT,
      version: VERSION_SNAPSHOT,
      min_reader_version: MIN_READER_SNAPSHOT,
      flags: SnapshotFlags::HAS_IN_EDGES | SnapshotFlags::HAS_PROPERTIES,
      generation: 3,
      created_unix_ns: 123,
      num_nodes: 10,
      num_edges: 20,
      max_node_id: 15,
      num_labels: 2,
      num_etypes: 1,
      num_propkeys: 4,
      num_strings: 9,
    };
    let mut buf = vec![0u8; SNAPSHOT_HEADER_SIZE];
    header.write_to(&mut buf);
    let parsed = SnapshotHeader::parse(&buf).unwrap();
    assert_eq!(parsed.generation, 3);
    assert_eq!(parsed.num_nodes, 10);
    assert_eq!(parsed.flags, header.flags);
  }

  #[test]
  fn rejects_future_snapshot() {
    let mut buf = vec![0u8; SNAPSHOT_HEADER_SIZE];
    write_u32(&mut buf, 0, MAGIC_SNAPSHOT);
    write_u32(&mut buf, 4, VERSION_SNAPSHOT + 5);
    write_u32(&mut buf, 8, VERSION_SNAPSHOT + 5);
    assert!(matches!(
      SnapshotHeader::parse(&buf),
      Err(RayError::VersionTooNew { .. })
    ));
  }
}
