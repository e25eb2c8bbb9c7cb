//! Immutable CSR snapshot codec.
//!
//! A snapshot encodes the entire graph column-oriented: dense node arrays,
//! compressed sparse row adjacency (out and inverted in), a string table,
//! a hashed key index, and inline property tables. The reader is zero-copy
//! over an mmap; the writer emits a byte buffer for the caller to place.

pub mod layout;
pub mod reader;
pub mod writer;
