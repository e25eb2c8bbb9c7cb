//! Optional per-section compression for snapshots.
//!
//! Compression identifiers are stable on disk: 0=NONE, 1=ZSTD, 2=GZIP,
//! 3=DEFLATE. A section is only stored compressed when the compressed form
//! is strictly smaller than the original.

use std::io::{Read, Write};

use crate::constants::COMPRESSION_MIN_SIZE;
use crate::error::{RayError, Result};

/// On-disk compression identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CompressionType {
  None = 0,
  Zstd = 1,
  Gzip = 2,
  Deflate = 3,
}

impl CompressionType {
  pub fn from_u32(value: u32) -> Option<Self> {
    match value {
      0 => Some(Self::None),
      1 => Some(Self::Zstd),
      2 => Some(Self::Gzip),
      3 => Some(Self::Deflate),
      _ => None,
    }
  }
}

/// Compression settings used by the snapshot writer
#[derive(Debug, Clone)]
pub struct CompressionOptions {
  pub enabled: bool,
  pub codec: CompressionType,
  /// Sections smaller than this are stored uncompressed
  pub min_size: usize,
  /// Codec-specific level (zstd: 1-22, gzip/deflate: 0-9)
  pub level: i32,
}

impl Default for CompressionOptions {
  fn default() -> Self {
    Self {
      enabled: false,
      codec: CompressionType::Zstd,
      min_size: COMPRESSION_MIN_SIZE,
      level: 3,
    }
  }
}

impl CompressionOptions {
  pub fn zstd(level: i32) -> Self {
    Self {
      enabled: true,
      codec: CompressionType::Zstd,
      level,
      ..Default::default()
    }
  }
}

/// Compress `data` with the given codec
pub fn compress(data: &[u8], codec: CompressionType, level: i32) -> Result<Vec<u8>> {
  match codec {
    CompressionType::None => Ok(data.to_vec()),
    CompressionType::Zstd => Ok(zstd::bulk::compress(data, level)?),
    CompressionType::Gzip => {
      let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(level.clamp(0, 9) as u32));
      encoder.write_all(data)?;
      Ok(encoder.finish()?)
    }
    CompressionType::Deflate => {
      let mut encoder = flate2::write::DeflateEncoder::new(
        Vec::new(),
        flate2::Compression::new(level.clamp(0, 9) as u32),
      );
      encoder.write_all(data)?;
      Ok(encoder.finish()?)
    }
  }
}

/// Decompress `data`, verifying the result matches `expected_size`
pub fn decompress_with_size(
  data: &[u8],
  codec: CompressionType,
  expected_size: usize,
) -> Result<Vec<u8>> {
  let out = match codec {
    CompressionType::None => data.to_vec(),
    CompressionType::Zstd => zstd::bulk::decompress(data, expected_size)?,
    CompressionType::Gzip => {
      let mut out = Vec::with_capacity(expected_size);
      flate2::read::GzDecoder::new(data).read_to_end(&mut out)?;
      out
    }
    CompressionType::Deflate => {
      let mut out = Vec::with_capacity(expected_size);
      flate2::read::DeflateDecoder::new(data).read_to_end(&mut out)?;
      out
    }
  };

  if out.len() != expected_size {
    return Err(RayError::InvalidFormat(format!(
      "decompressed section is {} bytes, expected {expected_size}",
      out.len()
    )));
  }
  Ok(out)
}

/// Compress `data` if the options ask for it and it pays off.
///
/// Returns the bytes to store and the codec they are stored with.
pub fn maybe_compress(data: &[u8], options: &CompressionOptions) -> (Vec<u8>, CompressionType) {
  if !options.enabled || options.codec == CompressionType::None || data.len() < options.min_size {
    return (data.to_vec(), CompressionType::None);
  }

  match compress(data, options.codec, options.level) {
    Ok(compressed) if compressed.len() < data.len() => (compressed, options.codec),
    _ => (data.to_vec(), CompressionType::None),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> Vec<u8> {
    // Compressible payload: repeated structure
    (0u32..512).flat_map(|i| (i % 7).to_le_bytes()).collect()
  }

  #[test]
  fn zstd_round_trip() {
    let data = sample();
    let compressed = compress(&data, CompressionType::Zstd, 3).unwrap();
    assert!(compressed.len() < data.len());
    let restored = decompress_with_size(&compressed, CompressionType::Zstd, data.len()).unwrap();
    assert_eq!(restored, data);
  }

  #[test]
  fn gzip_and_deflate_round_trip() {
    let data = sample();
    for codec in [CompressionType::Gzip, CompressionType::Deflate] {
      let compressed = compress(&data, codec, 6).unwrap();
      let restored = decompress_with_size(&compressed, codec, data.len()).unwrap();
      assert_eq!(restored, data);
    }
  }

  #[test]
  fn size_mismatch_rejected() {
    let data = sample();
    let compressed = compress(&data, CompressionType::Zstd, 3).unwrap();
    assert!(decompress_with_size(&compressed, CompressionType::Zstd, data.len() + 1).is_err());
  }

  #[test]
  fn maybe_compress_skips_small_and_incompressible() {
    let opts = CompressionOptions::zstd(3);
    let (stored, codec) = maybe_compress(b"tiny", &opts);
    assert_eq!(codec, CompressionType::None);
    assert_eq!(stored, b"tiny");

    let disabled = CompressionOptions::default();
    let data = sample();
    let (stored, codec) = maybe_compress(&data, &disabled);
    assert_eq!(codec, CompressionType::None);
    assert_eq!(stored.len(), data.len());
  }
}
