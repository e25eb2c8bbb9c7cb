//! Legacy multi-file layout: manifest, file naming, path validation.
//!
//! A multi-file database is a directory holding `manifest.ray`,
//! `snapshots/snap_<16-digit-gen>.ray`, `wal/wal_<16-digit-seg>.ray`,
//! `lock.ray`, and `trash/`. The manifest is the directory-mode commit
//! pointer and is replaced atomically: tmp file, fsync, rename, directory
//! fsync.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use crate::constants::{MAGIC_MANIFEST, VERSION_MANIFEST};
use crate::error::{RayError, Result};
use crate::util::binary::{read_u32, read_u64, write_u32, write_u64};
use crate::util::crc::crc32c;

/// Serialized manifest length
pub const MANIFEST_SIZE: usize = 36;

/// File extension used by every file in a multi-file database
pub const EXT_MULTI_FILE: &str = "ray";

/// Fixed-size manifest with the active generation pointers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Manifest {
  pub version: u32,
  pub snapshot_gen: u64,
  pub wal_segment: u64,
  pub change_counter: u64,
}

impl Manifest {
  pub fn new() -> Self {
    Self {
      version: VERSION_MANIFEST,
      snapshot_gen: 0,
      wal_segment: 0,
      change_counter: 0,
    }
  }

  pub fn encode(&self) -> [u8; MANIFEST_SIZE] {
    let mut buf = [0u8; MANIFEST_SIZE];
    write_u32(&mut buf, 0, MAGIC_MANIFEST);
    write_u32(&mut buf, 4, self.version);
    write_u64(&mut buf, 8, self.snapshot_gen);
    write_u64(&mut buf, 16, self.wal_segment);
    write_u64(&mut buf, 24, self.change_counter);
    let crc = crc32c(&buf[..MANIFEST_SIZE - 4]);
    write_u32(&mut buf, MANIFEST_SIZE - 4, crc);
    buf
  }

  pub fn parse(buf: &[u8]) -> Result<Self> {
    if buf.len() < MANIFEST_SIZE {
      return Err(RayError::InvalidFormat(format!(
        "manifest truncated: {} bytes",
        buf.len()
      )));
    }
    if read_u32(buf, 0) != MAGIC_MANIFEST {
      return Err(RayError::InvalidFormat("bad manifest magic".to_string()));
    }

    let stored = read_u32(buf, MANIFEST_SIZE - 4);
    let computed = crc32c(&buf[..MANIFEST_SIZE - 4]);
    if stored != computed {
      return Err(RayError::ChecksumMismatch { stored, computed });
    }

    let version = read_u32(buf, 4);
    if version > VERSION_MANIFEST {
      return Err(RayError::VersionTooNew {
        required: version,
        supported: VERSION_MANIFEST,
      });
    }

    Ok(Self {
      version,
      snapshot_gen: read_u64(buf, 8),
      wal_segment: read_u64(buf, 16),
      change_counter: read_u64(buf, 24),
    })
  }
}

impl Default for Manifest {
  fn default() -> Self {
    Self::new()
  }
}

/// Path of the manifest inside a database directory
pub fn manifest_path(dir: &Path) -> PathBuf {
  dir.join(format!("manifest.{EXT_MULTI_FILE}"))
}

/// `snapshots/snap_<16-digit-gen>.ray`
pub fn snapshot_file_path(dir: &Path, generation: u64) -> PathBuf {
  dir
    .join("snapshots")
    .join(format!("snap_{generation:016}.{EXT_MULTI_FILE}"))
}

/// `wal/wal_<16-digit-seg>.ray`
pub fn wal_file_path(dir: &Path, segment: u64) -> PathBuf {
  dir
    .join("wal")
    .join(format!("wal_{segment:016}.{EXT_MULTI_FILE}"))
}

/// Read and validate the manifest of a database directory
pub fn read_manifest(dir: &Path) -> Result<Manifest> {
  let mut file = File::open(manifest_path(dir))?;
  let mut buf = [0u8; MANIFEST_SIZE];
  file.read_exact(&mut buf)?;
  Manifest::parse(&buf)
}

/// Atomically replace the manifest: write a tmp file, fsync it, rename over
/// the old manifest, then fsync the directory so the rename is durable.
pub fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<()> {
  let tmp_path = dir.join(format!("manifest.{EXT_MULTI_FILE}.tmp"));
  {
    let mut tmp = OpenOptions::new()
      .write(true)
      .create(true)
      .truncate(true)
      .open(&tmp_path)?;
    tmp.write_all(&manifest.encode())?;
    tmp.sync_all()?;
  }
  fs::rename(&tmp_path, manifest_path(dir))?;
  sync_dir(dir)?;
  Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
  File::open(dir)?.sync_all()?;
  Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
  Ok(())
}

/// Reject paths with traversal components or control bytes before any file
/// is opened or created.
pub fn validate_db_path(path: &Path) -> Result<()> {
  let text = path.to_string_lossy();
  if text.chars().any(|c| c.is_control()) {
    return Err(RayError::PathValidation(
      "path contains control bytes".to_string(),
    ));
  }
  for component in path.components() {
    if matches!(component, Component::ParentDir) {
      return Err(RayError::PathValidation(format!(
        "path contains a parent-directory component: {text}"
      )));
    }
  }
  Ok(())
}
