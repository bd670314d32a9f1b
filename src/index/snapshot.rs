// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Snapshot persistence for the fingerprint table.
//!
//! The snapshot is a single JSON file (default `.fp`) under the storage root
//! holding the whole table. It is the durable checkpoint read once at startup.
//!
//! # Single Writer
//!
//! Writes go through [`Snapshot::persist`], which takes an async mutex,
//! builds the table *while holding it*, then writes a temp file and renames
//! it over the snapshot. Two concurrent persists therefore serialize, and the
//! second one always serializes a table at least as fresh as the first:
//!
//! ```text
//! merge A ─┐                    ┌─ build(table) → write .fp.tmp → rename
//!          ├─ lock ─────────────┤
//! merge B ─┘                    └─ (waits) build(table) → write → rename
//! ```
//!
//! Readers of the in-memory table never touch this lock.

use crate::error::{FingerprintError, Result};
use crate::metrics;
use crate::record::{canonical_path, FingerprintTable};
use std::collections::btree_map::Entry;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Handle to the on-disk snapshot file.
#[derive(Debug)]
pub struct Snapshot {
    path: PathBuf,
    temp_path: PathBuf,
    file_name: String,
    write_lock: Mutex<()>,
}

impl Snapshot {
    /// Create a handle for `root/file_name`. Nothing is read or written yet.
    pub fn new(root: &Path, file_name: &str) -> Self {
        Self {
            path: root.join(file_name),
            temp_path: root.join(format!("{}.tmp", file_name)),
            file_name: file_name.to_string(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check whether a root-relative path names the snapshot or its temp file.
    pub fn is_reserved(&self, relative: &str) -> bool {
        relative == self.file_name
            || relative
                .strip_prefix(self.file_name.as_str())
                .is_some_and(|rest| rest == ".tmp")
    }

    /// Read the snapshot.
    ///
    /// A missing file is an error unless `allow_missing` is set. A zero-length
    /// file is an empty table. Entries with unsafe paths are dropped.
    pub async fn load(&self, allow_missing: bool) -> Result<FingerprintTable> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound && allow_missing => {
                info!(path = %self.path.display(), "No snapshot found, starting empty");
                return Ok(FingerprintTable::new());
            }
            Err(e) => return Err(FingerprintError::io(&self.path, e)),
        };

        let table = decode(&bytes).map_err(|e| {
            FingerprintError::io(
                &self.path,
                std::io::Error::new(ErrorKind::InvalidData, format!("corrupt snapshot: {}", e)),
            )
        })?;

        debug!(path = %self.path.display(), entries = table.len(), "Loaded snapshot");
        Ok(table)
    }

    /// Serialize and atomically replace the snapshot.
    ///
    /// `build` runs under the write lock. Returns the number of entries written.
    pub async fn persist<F>(&self, build: F) -> Result<usize>
    where
        F: FnOnce() -> FingerprintTable,
    {
        let _guard = self.write_lock.lock().await;
        let start = Instant::now();
        let table = build();
        let entries = table.len();

        let result = self.write_locked(&table).await;
        metrics::record_snapshot_write(result.is_ok(), entries, start.elapsed());

        match result {
            Ok(()) => {
                debug!(
                    path = %self.path.display(),
                    entries,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Snapshot written"
                );
                Ok(entries)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Snapshot write failed");
                Err(e)
            }
        }
    }

    async fn write_locked(&self, table: &FingerprintTable) -> Result<()> {
        let bytes = serde_json::to_vec(table).map_err(|e| {
            FingerprintError::io(&self.path, std::io::Error::new(ErrorKind::InvalidData, e))
        })?;

        tokio::fs::write(&self.temp_path, &bytes)
            .await
            .map_err(|e| FingerprintError::io(&self.temp_path, e))?;
        tokio::fs::rename(&self.temp_path, &self.path)
            .await
            .map_err(|e| FingerprintError::io(&self.path, e))?;
        Ok(())
    }
}

/// Decode a table from snapshot or wire bytes.
///
/// Keys are canonicalized and win over embedded `path` fields. Keys naming
/// the same file are folded into one record by host union; entries whose key
/// is not a safe relative path are dropped.
pub fn decode(bytes: &[u8]) -> serde_json::Result<FingerprintTable> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(FingerprintTable::new());
    }

    let raw: FingerprintTable = serde_json::from_slice(bytes)?;
    let mut table = FingerprintTable::new();
    for (key, mut record) in raw {
        let Ok(path) = canonical_path(&key) else {
            warn!(path = %key, "Dropping record with unsafe path");
            continue;
        };
        match table.entry(path) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().add_hosts(record.hosts);
            }
            Entry::Vacant(slot) => {
                record.path = slot.key().clone();
                slot.insert(record);
            }
        }
    }
    Ok(table)
}
