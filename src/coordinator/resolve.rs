// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! On-demand resolution: serve a path locally, or fetch it from the cluster.
//!
//! ```text
//! resolve(path)
//!   ├─ tracked and on disk ──► read locally
//!   └─ otherwise ──► get_record (coordinator)
//!                      └─► fetch(record): pull ─► save ─► report
//! ```
//!
//! Nothing is written to the index until `pull` has returned verified bytes,
//! so dropping the future at any earlier point leaves no trace.

use super::SyncContext;
use crate::error::{FingerprintError, Result};
use crate::metrics;
use crate::record::{validate_path, FingerprintRecord, FingerprintTable};
use crate::transport::PeerTransport;
use tracing::{debug, info, instrument};

#[instrument(skip_all, fields(path = %path))]
pub(super) async fn resolve<T: PeerTransport>(ctx: &SyncContext<T>, path: &str) -> Result<Option<Vec<u8>>> {
    validate_path(path)?;

    if ctx.index.has(path) {
        match ctx.index.read(path).await {
            Ok(bytes) => {
                metrics::record_resolve("local");
                return Ok(Some(bytes));
            }
            Err(FingerprintError::NotFound { .. }) => {
                debug!("Tracked file missing on disk, fetching from peers");
            }
            Err(e) => {
                metrics::record_resolve("error");
                return Err(e);
            }
        }
    }

    let record = ctx.remoting.get_record(path).await.inspect_err(|_| {
        metrics::record_resolve("error");
    })?;
    fetch(ctx, &record).await
}

/// Pull verified content for `record`, store it, and tell the cluster.
pub(super) async fn fetch<T: PeerTransport>(
    ctx: &SyncContext<T>,
    record: &FingerprintRecord,
) -> Result<Option<Vec<u8>>> {
    let bytes = match ctx.remoting.pull(record).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            metrics::record_resolve("exhausted");
            return Ok(None);
        }
        Err(e) => {
            metrics::record_resolve("error");
            return Err(e);
        }
    };

    let stored = ctx.index.save(record, &bytes).await.inspect_err(|_| {
        metrics::record_resolve("error");
    })?;

    let hosts = stored.hosts.len();
    let update: FingerprintTable = [(stored.path.clone(), stored)].into_iter().collect();
    let summary = ctx.remoting.report(&update).await;

    metrics::record_resolve("fetched");
    info!(
        path = %record.path,
        bytes = bytes.len(),
        hosts,
        delivered = summary.delivered,
        failed = summary.failed,
        "Fetched and registered file"
    );
    Ok(Some(bytes))
}
