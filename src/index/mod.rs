// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local fingerprint index.
//!
//! The authoritative view of what this node physically stores. It is the
//! only component that mutates the snapshot file.
//!
//! # Startup Reconciliation
//!
//! ```text
//! load .fp ──► list files under root ──► for each file:
//!                                          in snapshot?  → add local host
//!                                          not in it?    → digest, {local}
//!          ──► persist once
//! ```
//!
//! Snapshot records whose file is gone from disk stay in the table as-is.
//!
//! # Merge Classification
//!
//! [`LocalIndex::merge_incoming`] sorts each incoming record into one of:
//!
//! | Local state | Host union | Result |
//! |-------------|------------|--------|
//! | unknown path | - | `download` (unchanged) |
//! | known path | grew | local updated, `report` |
//! | known path | same | nothing |
//!
//! The snapshot is rewritten once per merge, and only if `report` is non-empty.

pub mod snapshot;

use crate::checksum::ChecksumRef;
use crate::config::IndexConfig;
use crate::error::{FingerprintError, Result};
use crate::metrics;
use crate::record::{canonical_path, validate_path, FingerprintRecord, FingerprintTable};
use dashmap::DashMap;
use snapshot::Snapshot;
use std::collections::btree_map::Entry;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

/// Result of merging a peer's records into the local index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Known records whose host set grew. Worth propagating.
    pub report: FingerprintTable,
    /// Records for paths this node does not hold. Candidates for download.
    pub download: FingerprintTable,
}

impl MergeOutcome {
    pub fn is_empty(&self) -> bool {
        self.report.is_empty() && self.download.is_empty()
    }
}

/// This node's fingerprint table, backed by the storage root and snapshot.
pub struct LocalIndex {
    root: PathBuf,
    local_host: String,
    table: DashMap<String, FingerprintRecord>,
    snapshot: Snapshot,
    checksum: ChecksumRef,
    closed: AtomicBool,
}

impl LocalIndex {
    /// Load the snapshot, reconcile it against the files under the root,
    /// and persist the result.
    ///
    /// Any read, list or write failure is fatal.
    #[instrument(skip_all, fields(root = %config.root.display()))]
    pub async fn initialize(
        config: &IndexConfig,
        local_host: impl Into<String>,
        checksum: ChecksumRef,
    ) -> Result<Self> {
        let start = Instant::now();
        let local_host = local_host.into();
        let snapshot = Snapshot::new(&config.root, &config.snapshot_file);

        let persisted = snapshot.load(config.allow_missing_snapshot).await?;
        let files = list_files(&config.root, &snapshot).await?;

        let table = DashMap::with_capacity(persisted.len().max(files.len()));
        for (path, record) in persisted {
            table.insert(path, record);
        }

        let mut created = 0usize;
        for path in &files {
            if let Some(mut record) = table.get_mut(path) {
                record.add_hosts([local_host.as_str()]);
                continue;
            }
            let full = config.root.join(path);
            let bytes = tokio::fs::read(&full)
                .await
                .map_err(|e| FingerprintError::io(&full, e))?;
            let record = FingerprintRecord::new(path.clone(), checksum.digest(&bytes), [local_host.as_str()]);
            table.insert(path.clone(), record);
            created += 1;
        }

        let index = Self {
            root: config.root.clone(),
            local_host,
            table,
            snapshot,
            checksum,
            closed: AtomicBool::new(false),
        };
        index.persist().await?;

        metrics::record_reconcile(files.len(), created, start.elapsed());
        metrics::set_table_size(index.len());
        info!(
            local_host = %index.local_host,
            files = files.len(),
            created,
            records = index.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Local index initialized"
        );

        Ok(index)
    }

    /// Address this node registers itself under.
    pub fn local_host(&self) -> &str {
        &self.local_host
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Check whether the table tracks `path`.
    pub fn has(&self, path: &str) -> bool {
        self.table.contains_key(path)
    }

    /// Look up one record.
    pub fn get(&self, path: &str) -> Option<FingerprintRecord> {
        self.table.get(path).map(|r| r.value().clone())
    }

    /// Point-in-time copy of the whole table.
    pub fn table(&self) -> FingerprintTable {
        self.table
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Merge a peer's records by host-set union.
    ///
    /// Never performs network I/O. A failed snapshot write is logged; the
    /// in-memory merge still stands and the sets are still returned.
    #[instrument(skip_all, fields(incoming = records.len()))]
    pub async fn merge_incoming(&self, records: FingerprintTable) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        if self.is_closed() {
            debug!("Index closed, ignoring merge");
            return outcome;
        }

        for (key, mut incoming) in records {
            let Ok(path) = canonical_path(&key) else {
                warn!(path = %key, "Ignoring record with unsafe path");
                continue;
            };

            match self.table.get_mut(&path) {
                Some(mut local) => {
                    if local.add_hosts(incoming.hosts) {
                        outcome.report.insert(path, local.value().clone());
                    }
                }
                None => match outcome.download.entry(path) {
                    Entry::Occupied(mut pending) => {
                        pending.get_mut().add_hosts(incoming.hosts);
                    }
                    Entry::Vacant(slot) => {
                        incoming.path = slot.key().clone();
                        slot.insert(incoming);
                    }
                },
            }
        }

        if !outcome.report.is_empty() {
            if let Err(e) = self.persist().await {
                warn!(error = %e, "Merged records not persisted");
            }
        }

        metrics::record_merge(outcome.report.len(), outcome.download.len());
        debug!(
            report = outcome.report.len(),
            download = outcome.download.len(),
            "Merged incoming records"
        );
        outcome
    }

    /// Read a tracked file's content.
    pub async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.tracked_path(path)?;
        tokio::fs::read(&full).await.map_err(|e| self.map_read_error(path, &full, e))
    }

    /// Open a tracked file for streaming reads. The handle closes on drop.
    pub async fn open(&self, path: &str) -> Result<tokio::fs::File> {
        let full = self.tracked_path(path)?;
        tokio::fs::File::open(&full)
            .await
            .map_err(|e| self.map_read_error(path, &full, e))
    }

    /// Store verified content and register this node as a holder.
    ///
    /// The content is written to a temp file and renamed into place, so a
    /// reader never sees a partial file. Returns the stored record.
    #[instrument(skip_all, fields(path = %record.path, bytes = bytes.len()))]
    pub async fn save(&self, record: &FingerprintRecord, bytes: &[u8]) -> Result<FingerprintRecord> {
        if self.is_closed() {
            return Err(FingerprintError::Shutdown);
        }
        validate_path(&record.path)?;
        if self.snapshot.is_reserved(&record.path) {
            return Err(FingerprintError::InvalidPath(record.path.clone()));
        }

        let full = self.root.join(&record.path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FingerprintError::io(parent, e))?;
        }
        let temp = temp_sibling(&full);
        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|e| FingerprintError::io(&temp, e))?;
        tokio::fs::rename(&temp, &full)
            .await
            .map_err(|e| FingerprintError::io(&full, e))?;

        let stored = self.register(record)?;
        self.persist().await?;
        metrics::set_table_size(self.len());
        debug!(hosts = stored.hosts.len(), "Stored fetched file");
        Ok(stored)
    }

    /// Insert or union `record` with this node added as a holder.
    ///
    /// `close` raises the flag before clearing the table, so an insert that
    /// lands after the clear is seen by the second check and rolled back.
    fn register(&self, record: &FingerprintRecord) -> Result<FingerprintRecord> {
        if self.is_closed() {
            return Err(FingerprintError::Shutdown);
        }
        let stored = {
            let mut entry = self
                .table
                .entry(record.path.clone())
                .or_insert_with(|| FingerprintRecord::new(record.path.clone(), record.checksum, Vec::<String>::new()));
            entry.add_hosts(record.hosts.iter().cloned());
            entry.add_hosts([self.local_host.as_str()]);
            entry.value().clone()
        };
        if self.is_closed() {
            self.table.remove(&record.path);
            return Err(FingerprintError::Shutdown);
        }
        Ok(stored)
    }

    /// Rewrite the snapshot from the current table.
    pub async fn persist(&self) -> Result<usize> {
        self.snapshot.persist(|| self.table()).await
    }

    /// Digest arbitrary content with this index's checksum.
    pub fn digest(&self, bytes: &[u8]) -> u64 {
        self.checksum.digest(bytes)
    }

    /// Drop the in-memory table. The snapshot on disk is kept. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.table.clear();
            metrics::set_table_size(0);
            info!(root = %self.root.display(), "Local index closed");
        }
    }

    fn tracked_path(&self, path: &str) -> Result<PathBuf> {
        validate_path(path)?;
        if !self.has(path) {
            return Err(FingerprintError::NotFound {
                path: path.to_string(),
            });
        }
        Ok(self.root.join(path))
    }

    fn map_read_error(&self, path: &str, full: &Path, e: std::io::Error) -> FingerprintError {
        if e.kind() == ErrorKind::NotFound {
            FingerprintError::NotFound {
                path: path.to_string(),
            }
        } else {
            FingerprintError::io(full, e)
        }
    }
}

impl std::fmt::Debug for LocalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIndex")
            .field("root", &self.root)
            .field("local_host", &self.local_host)
            .field("records", &self.table.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Suffix of in-flight content writes. Leftovers from a crash are never indexed.
const PARTIAL_SUFFIX: &str = ".fp-part";

fn temp_sibling(full: &Path) -> PathBuf {
    let mut name = full
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}{}", uuid::Uuid::new_v4().simple(), PARTIAL_SUFFIX));
    full.with_file_name(name)
}

/// Enumerate regular files under `root` as canonical relative paths,
/// skipping the snapshot and its temp file.
///
/// Names that aren't valid UTF-8 can't be keys or travel to peers, so they
/// are skipped with a warning rather than failing startup.
async fn list_files(root: &Path, snapshot: &Snapshot) -> Result<Vec<String>> {
    let walk_root = root.to_path_buf();
    let entries = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&walk_root).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| walk_root.clone());
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(ErrorKind::Other, "directory walk failed"));
                FingerprintError::io(path, source)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&walk_root) else {
                continue;
            };
            match relative.to_str().map(canonical_path) {
                Some(Ok(path)) => files.push(path),
                _ => warn!(path = %relative.display(), "Skipping file with non-UTF-8 name"),
            }
        }
        Ok(files)
    })
    .await
    .map_err(|e| FingerprintError::io(root, std::io::Error::new(ErrorKind::Other, e)))??;

    let mut files: Vec<String> = entries
        .into_iter()
        .filter(|p| !snapshot.is_reserved(p) && !p.ends_with(PARTIAL_SUFFIX))
        .collect();
    files.sort();
    Ok(files)
}
