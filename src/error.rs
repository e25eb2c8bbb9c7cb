//! Error types for RayDB.
//!
//! All fallible public operations return [`Result`]. The engine never
//! panics past validation; invariant violations surface as
//! [`RayError::Internal`].

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, RayError>;

#[derive(Debug, Error)]
pub enum RayError {
  /// Underlying filesystem error
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// Bad magic, unknown version, unsupported page size, malformed structure
  #[error("invalid format: {0}")]
  InvalidFormat(String),

  /// A stored CRC-32C did not match the recomputed value
  #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
  ChecksumMismatch { stored: u32, computed: u32 },

  /// The file requires a newer reader than this build
  #[error("database requires reader version {required}, this build supports {supported}")]
  VersionTooNew { required: u32, supported: u32 },

  /// The active WAL region cannot fit a record; retryable after checkpoint
  #[error("wal region full: need {needed} bytes, {available} available")]
  WalBufferFull { needed: usize, available: usize },

  /// begin while a transaction is already open
  #[error("a transaction is already in progress")]
  TransactionInProgress,

  /// commit/rollback/mutation without an open transaction
  #[error("no transaction in progress")]
  NoTransaction,

  /// Mutation attempted through a read-only handle
  #[error("database is read-only")]
  ReadOnly,

  /// The advisory file lock could not be acquired
  #[error("database is locked: {0}")]
  LockContention(String),

  /// Structural check failure reported by `check()` internals
  #[error("integrity failure: {0}")]
  IntegrityFailure(String),

  /// Path contains traversal components or control bytes
  #[error("invalid database path: {0}")]
  PathValidation(String),

  /// Invariant violation after validation; a bug, not a user error
  #[error("internal error: {0}")]
  Internal(String),
}

impl RayError {
  /// True for errors the caller may retry after the engine makes progress
  /// (currently only a full WAL while a checkpoint drains it).
  pub fn is_retryable(&self) -> bool {
    matches!(self, RayError::WalBufferFull { .. })
  }
}
