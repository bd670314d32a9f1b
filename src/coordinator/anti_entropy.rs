// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Anti-entropy: periodic query-merge-fetch-report cycles.
//!
//! # Algorithm
//!
//! 1. `query()` the query targets and union their tables
//! 2. Merge into the local index, splitting into `report` and `download` sets
//! 3. Fetch each `download` record through the on-demand path (capped, paced)
//! 4. Report the `report` set onward
//!
//! Inbound NOTIFY merges run steps 3-4 from the propagation task, so knowledge
//! spreads between ticks too.
//!
//! # Backoff on Failure
//!
//! A failed query aborts the tick and backs the loop off exponentially.
//! Download and report failures never do; they are counted and retried by a
//! later tick.

use super::resolve;
use super::types::TickReport;
use super::SyncContext;
use crate::error::{FingerprintError, Result};
use crate::index::MergeOutcome;
use crate::metrics;
use crate::record::FingerprintTable;
use crate::transport::PeerTransport;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn, Instrument};

/// Run the periodic tick until shutdown is signaled.
pub(super) async fn run_anti_entropy<T: PeerTransport>(
    ctx: SyncContext<T>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let span = tracing::info_span!("anti_entropy");

    async move {
        let _ = shutdown_rx.borrow_and_update();

        let interval = ctx.config.interval();
        info!(
            interval_secs = interval.as_secs(),
            auto_download = ctx.config.auto_download,
            max_downloads = ctx.config.max_downloads_per_cycle,
            "Starting anti-entropy task"
        );

        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut consecutive_failures = 0u32;
        let mut backoff_until: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping anti-entropy task");
                        break;
                    }
                    continue;
                }

                _ = timer.tick() => {}
            }

            if backoff_until.is_some_and(|until| Instant::now() < until) {
                debug!(consecutive_failures, "Skipping tick, backing off");
                metrics::record_tick_skipped("backoff");
                continue;
            }

            if ctx.remoting.topology().current().query_targets().is_empty() {
                debug!("Skipping tick, no query targets");
                metrics::record_tick_skipped("no_targets");
                continue;
            }

            let cycle_start = Instant::now();
            match run_tick(&ctx).await {
                Ok(report) => {
                    consecutive_failures = 0;
                    backoff_until = None;
                    if report.downloaded > 0 || report.report_set > 0 {
                        info!(
                            records_seen = report.records_seen,
                            downloaded = report.downloaded,
                            deferred = report.deferred,
                            report_set = report.report_set,
                            duration_ms = cycle_start.elapsed().as_millis() as u64,
                            "Tick complete with updates"
                        );
                    } else {
                        debug!(records_seen = report.records_seen, "Tick complete, in sync");
                    }
                }
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    let backoff = ctx.config.backoff_for_failures(consecutive_failures);
                    backoff_until = Some(Instant::now() + backoff);
                    warn!(
                        error = %e,
                        consecutive_failures,
                        backoff_secs = backoff.as_secs(),
                        "Tick failed, backing off"
                    );
                    metrics::record_tick_complete(0, 0, 0, 1, cycle_start.elapsed());
                }
            }
        }

        info!("Anti-entropy task stopped");
    }
    .instrument(span)
    .await
}

/// Run one full cycle. Only a failed query is an error.
#[instrument(skip_all)]
pub(super) async fn run_tick<T: PeerTransport>(ctx: &SyncContext<T>) -> Result<TickReport> {
    let start = Instant::now();
    if ctx.index.is_closed() {
        return Err(FingerprintError::Shutdown);
    }

    let table = ctx.remoting.query().await?;
    let records_seen = table.len();
    let outcome = ctx.index.merge_incoming(table).await;

    let mut report = apply_outcome(ctx, outcome).await;
    report.records_seen = records_seen;

    metrics::record_tick_complete(
        report.records_seen,
        report.downloaded,
        report.reported.delivered,
        report.errors(),
        start.elapsed(),
    );
    Ok(report)
}

/// Fetch what we lack, then report what grew.
pub(super) async fn apply_outcome<T: PeerTransport>(
    ctx: &SyncContext<T>,
    outcome: MergeOutcome,
) -> TickReport {
    let mut report = TickReport {
        report_set: outcome.report.len(),
        ..Default::default()
    };

    if ctx.config.auto_download && !outcome.download.is_empty() {
        download_missing(ctx, outcome.download, &mut report).await;
    }

    report.reported = ctx.remoting.report(&outcome.report).await;
    report
}

async fn download_missing<T: PeerTransport>(
    ctx: &SyncContext<T>,
    download: FingerprintTable,
    report: &mut TickReport,
) {
    let cap = ctx.config.max_downloads_per_cycle;
    report.deferred = download.len().saturating_sub(cap);
    if report.deferred > 0 {
        debug!(deferred = report.deferred, cap, "Download cap reached");
    }

    for record in download.into_values().take(cap) {
        if ctx.index.is_closed() {
            break;
        }
        // Another task may have fetched it since the merge.
        if ctx.index.has(&record.path) {
            continue;
        }
        if let Some(pacer) = &ctx.download_pacer {
            pacer.wait().await;
        }

        match resolve::fetch(ctx, &record).await {
            Ok(Some(_)) => report.downloaded += 1,
            Ok(None) => report.download_failed += 1,
            Err(e @ FingerprintError::NoAvailableHost { .. }) => {
                debug!(path = %record.path, error = %e, "No live holder yet");
                report.download_failed += 1;
            }
            Err(e) => {
                warn!(path = %record.path, error = %e, "Download failed");
                report.download_failed += 1;
            }
        }
    }
}

/// Propagate merge outcomes from inbound NOTIFY requests until shutdown.
pub(super) async fn run_propagation<T: PeerTransport>(
    ctx: SyncContext<T>,
    mut outcomes: mpsc::Receiver<MergeOutcome>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let span = tracing::info_span!("propagation");

    async move {
        let _ = shutdown_rx.borrow_and_update();
        debug!("Starting propagation task");

        loop {
            let outcome = tokio::select! {
                biased;

                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }

                next = outcomes.recv() => match next {
                    Some(outcome) => outcome,
                    None => break,
                },
            };

            let report = apply_outcome(&ctx, outcome).await;
            debug!(
                downloaded = report.downloaded,
                report_set = report.report_set,
                delivered = report.reported.delivered,
                "Propagated inbound merge"
            );
        }

        info!("Propagation task stopped");
    }
    .instrument(span)
    .await
}
