//! Write-ahead log: record framing and the dual-region ring buffer.

pub mod record;
pub mod ring;
