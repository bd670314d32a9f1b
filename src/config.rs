// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the fingerprint sync engine.
//!
//! Configuration is passed to [`FingerprintSync::new()`](crate::FingerprintSync::new)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//! Cluster topology is not configuration: it changes at runtime and flows
//! through [`TopologyHandle`](crate::remoting::TopologyHandle).
//!
//! # Quick Start
//!
//! ```rust
//! use fingerprint_sync::config::NodeConfig;
//!
//! let config = NodeConfig::for_testing("/tmp/files");
//! assert_eq!(config.index.snapshot_file, ".fp");
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! NodeConfig
//! ├── index: IndexConfig         # Storage root and snapshot file
//! ├── remoting: RemotingConfig   # Peer request timeout, report fan-out
//! └── sync: SyncConfig           # Anti-entropy tick, downloads, backoff
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! index:
//!   root: "/var/lib/files"
//!   snapshot_file: ".fp"
//!
//! remoting:
//!   request_timeout: "5s"
//!   max_parallel_reports: 16
//!
//! sync:
//!   enabled: true
//!   interval_sec: 60
//!   auto_download: true
//! ```

use crate::error::{FingerprintError, Result};
use crate::resilience::DownloadPacer;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `FingerprintSync::new()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Storage root and snapshot settings.
    #[serde(default)]
    pub index: IndexConfig,

    /// Peer transport settings.
    #[serde(default)]
    pub remoting: RemotingConfig,

    /// Anti-entropy settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl NodeConfig {
    /// Create a config for tests: fast ticks, short timeouts, no pacing.
    pub fn for_testing(root: impl Into<PathBuf>) -> Self {
        Self {
            index: IndexConfig {
                root: root.into(),
                snapshot_file: default_snapshot_file(),
                allow_missing_snapshot: true,
            },
            remoting: RemotingConfig {
                request_timeout: "500ms".to_string(),
                max_parallel_reports: 4,
            },
            sync: SyncConfig {
                enabled: false,
                interval_sec: 1,
                auto_download: true,
                max_downloads_per_cycle: 100,
                download_rate_per_sec: 0,
                backoff_base_sec: 1,
                backoff_max_sec: 2,
                propagation_queue: 64,
            },
        }
    }

    /// Check values that would otherwise fail later at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.index.root.as_os_str().is_empty() {
            return Err(FingerprintError::Config("index.root is empty".to_string()));
        }
        if self.index.snapshot_file.is_empty()
            || self.index.snapshot_file.contains('/')
            || self.index.snapshot_file.contains('\\')
        {
            return Err(FingerprintError::Config(format!(
                "index.snapshot_file must be a bare file name, got {:?}",
                self.index.snapshot_file
            )));
        }
        if humantime::parse_duration(&self.remoting.request_timeout).is_err() {
            return Err(FingerprintError::Config(format!(
                "remoting.request_timeout is not a duration: {:?}",
                self.remoting.request_timeout
            )));
        }
        if self.remoting.max_parallel_reports == 0 {
            return Err(FingerprintError::Config(
                "remoting.max_parallel_reports must be at least 1".to_string(),
            ));
        }
        if self.sync.interval_sec == 0 {
            return Err(FingerprintError::Config(
                "sync.interval_sec must be at least 1".to_string(),
            ));
        }
        if self.sync.propagation_queue == 0 {
            return Err(FingerprintError::Config(
                "sync.propagation_queue must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IndexConfig: storage root and snapshot
// ═══════════════════════════════════════════════════════════════════════════════

/// Local index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Storage root. Every record path is relative to this directory.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Snapshot file name under the root. Excluded from enumeration.
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,

    /// Treat a missing snapshot as an empty table instead of failing startup.
    /// A corrupt snapshot is always fatal.
    #[serde(default = "default_false")]
    pub allow_missing_snapshot: bool,
}

fn default_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_snapshot_file() -> String {
    ".fp".to_string()
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            snapshot_file: default_snapshot_file(),
            allow_missing_snapshot: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RemotingConfig: peer requests
// ═══════════════════════════════════════════════════════════════════════════════

/// Peer transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotingConfig {
    /// Per-request timeout as a duration string (e.g., "5s").
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    /// Maximum concurrent NOTIFY pushes during a report.
    #[serde(default = "default_max_parallel_reports")]
    pub max_parallel_reports: usize,
}

fn default_request_timeout() -> String {
    "5s".to_string()
}

fn default_max_parallel_reports() -> usize {
    16
}

impl Default for RemotingConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            max_parallel_reports: default_max_parallel_reports(),
        }
    }
}

impl RemotingConfig {
    /// Parse the request_timeout string to a Duration.
    pub fn request_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.request_timeout).unwrap_or(Duration::from_secs(5))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SyncConfig: anti-entropy tick
// ═══════════════════════════════════════════════════════════════════════════════

/// Periodic anti-entropy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Whether the periodic tick runs. On-demand resolution works either way.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How often to query the cluster (in seconds).
    #[serde(default = "default_interval_sec")]
    pub interval_sec: u64,

    /// Fetch files that peers hold and we don't.
    #[serde(default = "default_true")]
    pub auto_download: bool,

    /// Maximum downloads per tick. The rest wait for the next tick.
    #[serde(default = "default_max_downloads_per_cycle")]
    pub max_downloads_per_cycle: usize,

    /// Sustained download rate. 0 disables pacing.
    #[serde(default = "default_download_rate_per_sec")]
    pub download_rate_per_sec: u32,

    /// Base backoff time in seconds after a failed query.
    /// Actual backoff = min(base * 2^consecutive_failures, max).
    #[serde(default = "default_backoff_base_sec")]
    pub backoff_base_sec: u64,

    /// Maximum backoff time in seconds (ceiling).
    #[serde(default = "default_backoff_max_sec")]
    pub backoff_max_sec: u64,

    /// Merge outcomes from inbound NOTIFYs waiting for the propagation task.
    /// When full, new outcomes are dropped; the next tick re-derives them.
    #[serde(default = "default_propagation_queue")]
    pub propagation_queue: usize,
}

fn default_interval_sec() -> u64 {
    60
}

fn default_max_downloads_per_cycle() -> usize {
    100
}

fn default_download_rate_per_sec() -> u32 {
    50
}

fn default_backoff_base_sec() -> u64 {
    5
}

fn default_backoff_max_sec() -> u64 {
    300 // 5 minutes
}

fn default_propagation_queue() -> usize {
    256
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_sec: default_interval_sec(),
            auto_download: true,
            max_downloads_per_cycle: default_max_downloads_per_cycle(),
            download_rate_per_sec: default_download_rate_per_sec(),
            backoff_base_sec: default_backoff_base_sec(),
            backoff_max_sec: default_backoff_max_sec(),
            propagation_queue: default_propagation_queue(),
        }
    }
}

impl SyncConfig {
    /// Get the interval as a Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_sec)
    }

    /// Calculate backoff duration for a given number of consecutive failures.
    pub fn backoff_for_failures(&self, consecutive_failures: u32) -> Duration {
        let backoff_secs = self
            .backoff_base_sec
            .saturating_mul(2u64.saturating_pow(consecutive_failures));
        Duration::from_secs(backoff_secs.min(self.backoff_max_sec))
    }

    /// Download pacer for the anti-entropy path, or `None` when unpaced.
    pub fn download_pacer(&self) -> Option<DownloadPacer> {
        DownloadPacer::per_second(self.download_rate_per_sec)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
