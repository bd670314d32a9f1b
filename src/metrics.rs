// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Peer request outcomes and latency
//! - Pull outcomes (verified, checksum mismatch, exhausted)
//! - Report delivery
//! - Merge classification and snapshot writes
//! - Anti-entropy tick progress
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `fingerprint_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! The crate only emits through the `metrics` facade. Installing a recorder
//! (Prometheus exporter or otherwise) is up to the embedding daemon.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record an outbound peer request outcome.
pub fn record_peer_request(peer_id: &str, operation: &'static str, outcome: &'static str) {
    counter!(
        "fingerprint_peer_requests_total",
        "peer_id" => peer_id.to_string(),
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record outbound peer request latency by operation.
pub fn record_peer_request_latency(peer_id: &str, operation: &'static str, duration: Duration) {
    histogram!(
        "fingerprint_peer_request_duration_seconds",
        "peer_id" => peer_id.to_string(),
        "operation" => operation
    )
    .record(duration.as_secs_f64());
}

/// Record one candidate host outcome during a pull.
///
/// Outcomes: `verified`, `checksum_mismatch`, `no_content`, `transport_error`,
/// plus the terminal `exhausted` and `no_available_host`.
pub fn record_pull_outcome(outcome: &'static str) {
    counter!("fingerprint_pull_outcomes_total", "outcome" => outcome).increment(1);
}

/// Record bytes accepted from a verified pull.
pub fn record_pull_bytes(bytes: usize) {
    counter!("fingerprint_pull_bytes_total").increment(bytes as u64);
}

/// Record a NOTIFY push to one destination.
pub fn record_report_delivery(peer_id: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "fingerprint_report_deliveries_total",
        "peer_id" => peer_id.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record the records pushed by one report fan-out.
pub fn record_report_records(records: usize) {
    histogram!("fingerprint_report_batch_size").record(records as f64);
}

/// Record the classification of one merge.
pub fn record_merge(report_set: usize, download_set: usize) {
    counter!("fingerprint_merges_total").increment(1);
    counter!("fingerprint_merge_report_records_total").increment(report_set as u64);
    counter!("fingerprint_merge_download_records_total").increment(download_set as u64);
}

/// Record a snapshot write.
pub fn record_snapshot_write(success: bool, entries: usize, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!("fingerprint_snapshot_writes_total", "status" => status).increment(1);
    if success {
        histogram!("fingerprint_snapshot_entries").record(entries as f64);
        histogram!("fingerprint_snapshot_write_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Record startup reconciliation results.
pub fn record_reconcile(files: usize, created: usize, duration: Duration) {
    counter!("fingerprint_reconcile_files_total").increment(files as u64);
    counter!("fingerprint_reconcile_created_total").increment(created as u64);
    histogram!("fingerprint_reconcile_duration_seconds").record(duration.as_secs_f64());
}

/// Record an on-demand resolution result (`local`, `fetched`, `exhausted`, `error`).
pub fn record_resolve(outcome: &'static str) {
    counter!("fingerprint_resolves_total", "outcome" => outcome).increment(1);
}

/// Record an inbound request handled by the peer service.
pub fn record_inbound_request(operation: &'static str, status: u16) {
    counter!(
        "fingerprint_inbound_requests_total",
        "operation" => operation,
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record anti-entropy tick completion.
pub fn record_tick_complete(
    records_seen: usize,
    downloaded: usize,
    reported: usize,
    errors: usize,
    duration: Duration,
) {
    counter!("fingerprint_ticks_total").increment(1);
    counter!("fingerprint_tick_records_seen_total").increment(records_seen as u64);
    counter!("fingerprint_tick_downloads_total").increment(downloaded as u64);
    counter!("fingerprint_tick_reported_total").increment(reported as u64);

    if errors > 0 {
        counter!("fingerprint_tick_errors_total").increment(errors as u64);
    }

    histogram!("fingerprint_tick_duration_seconds").record(duration.as_secs_f64());
}

/// Record time spent waiting on the download pacer.
pub fn record_download_wait(waited: Duration) {
    histogram!("fingerprint_download_wait_seconds").record(waited.as_secs_f64());
}

/// Record a NOTIFY merge outcome dropped before propagation (`queue_full`, `closed`).
pub fn record_outcome_dropped(reason: &'static str) {
    counter!("fingerprint_propagation_dropped_total", "reason" => reason).increment(1);
}

/// Record anti-entropy tick skipped.
pub fn record_tick_skipped(reason: &'static str) {
    counter!("fingerprint_tick_skipped_total", "reason" => reason).increment(1);
}

/// Record errors by type.
pub fn record_error(peer_id: &str, error_type: &'static str) {
    counter!(
        "fingerprint_errors_total",
        "peer_id" => peer_id.to_string(),
        "error_type" => error_type
    )
    .increment(1);
}

/// Gauge for the number of records in the local table.
pub fn set_table_size(count: usize) {
    gauge!("fingerprint_table_records").set(count as f64);
}

/// Gauge for engine state.
pub fn set_engine_state(state: &str) {
    let value = match state {
        "Created" => 0.0,
        "Initializing" => 1.0,
        "Running" => 2.0,
        "ShuttingDown" => 3.0,
        "Stopped" => 4.0,
        "Failed" => 5.0,
        _ => -1.0,
    };
    gauge!("fingerprint_engine_state").set(value);
}
