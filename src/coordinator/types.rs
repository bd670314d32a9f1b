// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine state and per-tick statistics.
//!
//! # State Transitions
//!
//! ```text
//!                start()
//! Created ─────────────────→ Initializing
//!    │                            │
//!    │ shutdown()                 ├── index load/list/write failed ──→ Failed
//!    ↓                            ↓
//! Stopped ←── ShuttingDown ←── Running
//!                   shutdown()
//! ```

use crate::remoting::ReportSummary;

/// Lifecycle state of a [`FingerprintSync`](super::FingerprintSync).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, nothing loaded. Peers asking this node get "no content".
    Created,

    /// Loading the snapshot and reconciling it against the storage root.
    Initializing,

    /// Index serving; background tasks running.
    Running,

    /// Tasks are being drained.
    ShuttingDown,

    /// Shut down cleanly.
    Stopped,

    /// Index initialization failed. Check logs.
    Failed,
}

impl EngineState {
    /// Label used in logs and the engine state gauge.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Initializing => "Initializing",
            Self::Running => "Running",
            Self::ShuttingDown => "ShuttingDown",
            Self::Stopped => "Stopped",
            Self::Failed => "Failed",
        }
    }

    /// Whether the index is loaded and answering peers.
    pub fn is_serving(self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one anti-entropy tick (or one propagated merge) did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Records returned by the query targets.
    pub records_seen: usize,
    /// Missing files fetched and stored.
    pub downloaded: usize,
    /// Download attempts that errored or found no verified copy.
    pub download_failed: usize,
    /// Downloads left for a later tick by the per-cycle cap.
    pub deferred: usize,
    /// Known records whose host set grew.
    pub report_set: usize,
    /// Fan-out result for the grown records.
    pub reported: ReportSummary,
}

impl TickReport {
    pub fn errors(&self) -> usize {
        self.download_failed + self.reported.failed
    }
}
