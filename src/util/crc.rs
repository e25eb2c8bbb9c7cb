//! CRC-32C (Castagnoli) checksums.
//!
//! Every checksum in the file format (header, WAL records, snapshot footer,
//! manifest) uses the Castagnoli polynomial.

/// Checksum a whole buffer
#[inline]
pub fn crc32c(data: &[u8]) -> u32 {
  crc32c::crc32c(data)
}

/// Continue a checksum over an additional chunk
#[inline]
pub fn crc32c_append(crc: u32, data: &[u8]) -> u32 {
  crc32c::crc32c_append(crc, data)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn known_vector() {
    // CRC-32C of "123456789" per the iSCSI test vector
    assert_eq!(crc32c(b"123456789"), 0xe306_9283);
  }

  #[test]
  fn append_equals_whole() {
    let data = b"the quick brown fox jumps over the lazy dog";
    let whole = crc32c(data);
    let split = crc32c_append(crc32c(&data[..17]), &data[17..]);
    assert_eq!(whole, split);
  }
}
