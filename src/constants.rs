//! Magic numbers, versions, and format constants.

use crate::types::NodeId;

// ============================================================================
// File magics
// ============================================================================

/// Magic bytes for the single-file format: "RayDB format 1\0\0" (16 bytes)
pub const MAGIC_RAYDB: [u8; 16] = [
  0x52, 0x61, 0x79, 0x44, 0x42, 0x20, 0x66, 0x6f, // "RayDB fo"
  0x72, 0x6d, 0x61, 0x74, 0x20, 0x31, 0x00, 0x00, // "rmat 1\0\0"
];

/// Snapshot magic: "GSN1" (little-endian u32)
pub const MAGIC_SNAPSHOT: u32 = 0x314e_5347;

/// Legacy multi-file manifest magic: "RMF1"
pub const MAGIC_MANIFEST: u32 = 0x3146_4d52;

/// Legacy multi-file WAL segment magic: "RWL1"
pub const MAGIC_WAL_SEGMENT: u32 = 0x314c_5752;

/// Single-file extension
pub const EXT_RAYDB: &str = "raydb";

// ============================================================================
// Versions
// ============================================================================

pub const VERSION_SINGLE_FILE: u32 = 2;
pub const MIN_READER_SINGLE_FILE: u32 = 2;

pub const VERSION_SNAPSHOT: u32 = 1;
pub const MIN_READER_SNAPSHOT: u32 = 1;

pub const VERSION_MANIFEST: u32 = 1;

// ============================================================================
// Pages
// ============================================================================

/// Default page size (4KB - matches OS pages and SSD blocks)
pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const MIN_PAGE_SIZE: usize = 4096;
pub const MAX_PAGE_SIZE: usize = 65536;

/// OS page size assumed for mmap offset alignment
pub const OS_PAGE_SIZE: usize = 4096;

/// Serialized header length on page 0; the header CRC sits at
/// `DB_HEADER_SIZE - 4` and covers everything before it.
pub const DB_HEADER_SIZE: usize = 180;

/// Reserved span between checkpointInProgress and the header CRC
pub const DB_HEADER_RESERVED_SIZE: usize = 14;

// ============================================================================
// WAL
// ============================================================================

/// Default WAL size for newly created databases (64 KiB)
pub const WAL_DEFAULT_SIZE: usize = 64 * 1024;

/// Minimum WAL pages kept by vacuum / resize
pub const WAL_MIN_PAGES: u64 = 16;

/// WAL records are padded to 8-byte boundaries
pub const WAL_RECORD_ALIGNMENT: usize = 8;

/// Fixed WAL record header: recLen u32, type u8, flags u8, reserved u16, txid u64
pub const WAL_RECORD_HEADER_SIZE: usize = 16;

/// Footer CRC trailing each record payload
pub const WAL_RECORD_CRC_SIZE: usize = 4;

/// Sentinel u32 following a zero recLen: resume reading from region start
pub const WAL_SKIP_MARKER: u32 = 0xffff_ffff;

/// Skip marker footprint: recLen=0 (u32) + sentinel (u32)
pub const WAL_SKIP_MARKER_SIZE: usize = 8;

/// Primary region share of the WAL area; the secondary gets the rest
pub const WAL_PRIMARY_NUMERATOR: usize = 3;
pub const WAL_PRIMARY_DENOMINATOR: usize = 4;

/// Secondary region usage at which commits await the running checkpoint
pub const WAL_SECONDARY_BACKPRESSURE: f64 = 0.9;

/// Default primary usage fraction that triggers auto-checkpoint
pub const DEFAULT_CHECKPOINT_THRESHOLD: f64 = 0.8;

// ============================================================================
// Lock byte range (never written as data)
// ============================================================================

/// Offset of the reserved lock byte range (2^30 = 1 GiB)
pub const LOCK_BYTE_OFFSET: u64 = 0x4000_0000;

/// Length of the reserved lock byte range
pub const LOCK_BYTE_RANGE: u64 = 512;

// ============================================================================
// Snapshot format
// ============================================================================

/// 64-byte section alignment for mmap friendliness
pub const SECTION_ALIGNMENT: usize = 64;

/// Snapshot header length: 4 u32 fields + 9 u64 fields
pub const SNAPSHOT_HEADER_SIZE: usize = 88;

/// Section table slot: offset u64, length u64, compression u32, uncompressedSize u32
pub const SECTION_ENTRY_SIZE: usize = 24;

/// Key index entry: hash64 u64, stringId u32, reserved u32, nodeId u64
pub const KEY_INDEX_ENTRY_SIZE: usize = 24;

/// Minimum key-index bucket count
pub const KEY_INDEX_MIN_BUCKETS: usize = 16;

/// Fixed on-disk property value cell: tag u8, 7 pad, payload u64
pub const PROP_VALUE_DISK_SIZE: usize = 16;

/// Sections smaller than this are never compressed
pub const COMPRESSION_MIN_SIZE: usize = 64;

// ============================================================================
// Delta
// ============================================================================

/// Edge patch lists longer than this get a membership set for O(1) lookups
pub const DELTA_MEMBERSHIP_THRESHOLD: usize = 32;

// ============================================================================
// Initial IDs (1-based; 0 is reserved)
// ============================================================================

pub const INITIAL_NODE_ID: NodeId = 1;
pub const INITIAL_LABEL_ID: u32 = 1;
pub const INITIAL_ETYPE_ID: u32 = 1;
pub const INITIAL_PROPKEY_ID: u32 = 1;
pub const INITIAL_TX_ID: u64 = 1;

/// Snapshot generation 0 means "no snapshot yet"
pub const INITIAL_SNAPSHOT_GEN: u64 = 0;
