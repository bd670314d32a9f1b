// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cluster communication.
//!
//! [`Remoting`] performs the four peer operations on top of a
//! [`PeerTransport`], choosing targets from the current [`Topology`].
//! Each operation has its own failure contract:
//!
//! | Operation | Targets | On failure |
//! |-----------|---------|------------|
//! | [`get_record`](Remoting::get_record) | coordinator | error surfaces |
//! | [`pull`](Remoting::pull) | record holders ∩ members | try next host; `Ok(None)` when exhausted |
//! | [`report`](Remoting::report) | report targets | logged per destination, never an error |
//! | [`query`](Remoting::query) | query targets | first failure aborts, no partial table |
//!
//! Every request carries an `X-Request-Id` and `Accept-Encoding: gzip`, and
//! is bounded by `remoting.request_timeout`. Dropping any returned future
//! cancels the in-flight request; nothing here writes to the local index.

pub mod topology;

pub use topology::{Role, Topology, TopologyHandle};

use crate::checksum::ChecksumRef;
use crate::config::RemotingConfig;
use crate::error::{FingerprintError, Result};
use crate::index::snapshot;
use crate::metrics;
use crate::record::{merge_tables, partition_by_destination, validate_path, FingerprintRecord, FingerprintTable};
use crate::resilience::ReportSlots;
use crate::transport::{
    Operation, PeerRequest, PeerResponse, PeerTransport, HEADER_ACCEPT_ENCODING, HEADER_REQUEST_ID,
    STATUS_NO_CONTENT, STATUS_OK,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Outcome of one report fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportSummary {
    /// Destinations that acknowledged the push.
    pub delivered: usize,
    /// Destinations that failed (transport error, timeout, bad status).
    pub failed: usize,
    /// Destinations that had nothing relevant to receive.
    pub skipped: usize,
}

/// Peer operations over a transport.
pub struct Remoting<T: PeerTransport> {
    transport: Arc<T>,
    topology: TopologyHandle,
    checksum: ChecksumRef,
    request_timeout: Duration,
    report_slots: ReportSlots,
}

impl<T: PeerTransport> Remoting<T> {
    pub fn new(
        transport: Arc<T>,
        topology: TopologyHandle,
        checksum: ChecksumRef,
        config: &RemotingConfig,
    ) -> Self {
        Self {
            transport,
            topology,
            checksum,
            request_timeout: config.request_timeout_duration(),
            report_slots: ReportSlots::new(config.max_parallel_reports),
        }
    }

    pub fn topology(&self) -> &TopologyHandle {
        &self.topology
    }

    /// Apply a membership change.
    pub fn update(
        &self,
        hosts: Vec<String>,
        coordinator: impl Into<String>,
        current: impl Into<String>,
        is_coordinator: bool,
    ) {
        self.topology.update(hosts, coordinator, current, is_coordinator);
    }

    /// Ask the coordinator for one record.
    #[instrument(skip_all, fields(path = %path))]
    pub async fn get_record(&self, path: &str) -> Result<FingerprintRecord> {
        validate_path(path)?;
        let coordinator = self.topology.current().coordinator;
        if coordinator.is_empty() {
            return Err(FingerprintError::transport(
                "",
                Operation::GetRecord.name(),
                "no coordinator known",
            ));
        }

        let request = PeerRequest::new(Operation::GetRecord).with_param("path", path);
        let response = self.send(&coordinator, request).await?;

        match response.status {
            STATUS_NO_CONTENT => Err(FingerprintError::NotFound {
                path: path.to_string(),
            }),
            STATUS_OK => {
                let mut record: FingerprintRecord = serde_json::from_slice(&response.body)
                    .map_err(|e| FingerprintError::decode(&coordinator, e))?;
                if record.path.is_empty() {
                    record.path = path.to_string();
                }
                Ok(record)
            }
            other => Err(unexpected_status(&coordinator, Operation::GetRecord, other)),
        }
    }

    /// Fetch content from the record's holders, first verified copy wins.
    ///
    /// Candidates are the record's hosts that are still members, in the
    /// record's host order, tried one at a time. Returns `Ok(None)` when every
    /// candidate failed, had nothing, or served bytes that fail verification.
    #[instrument(skip_all, fields(path = %record.path))]
    pub async fn pull(&self, record: &FingerprintRecord) -> Result<Option<Vec<u8>>> {
        validate_path(&record.path)?;
        let members = self.topology.current().hosts;
        let candidates = record.alive_hosts(&members);
        if candidates.is_empty() {
            metrics::record_pull_outcome("no_available_host");
            return Err(FingerprintError::NoAvailableHost {
                path: record.path.clone(),
            });
        }

        for host in candidates {
            let request = PeerRequest::new(Operation::Download).with_param("path", record.path.as_str());
            let response = match self.send(&host, request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(peer_id = %host, error = %e, "Download failed, trying next host");
                    metrics::record_pull_outcome("transport_error");
                    continue;
                }
            };

            if !response.is_ok() {
                debug!(peer_id = %host, status = response.status, "Host has no content, trying next");
                metrics::record_pull_outcome("no_content");
                continue;
            }

            if !self.checksum.verify(&response.body, record.checksum) {
                let mismatch = FingerprintError::ChecksumMismatch {
                    path: record.path.clone(),
                    host: host.clone(),
                    expected: record.checksum,
                    actual: self.checksum.digest(&response.body),
                };
                warn!(peer_id = %host, error = %mismatch, "Discarding unverified content");
                metrics::record_pull_outcome("checksum_mismatch");
                metrics::record_error(&host, mismatch.kind());
                continue;
            }

            debug!(peer_id = %host, bytes = response.body.len(), "Pulled verified content");
            metrics::record_pull_outcome("verified");
            metrics::record_pull_bytes(response.body.len());
            return Ok(Some(response.body));
        }

        warn!("All candidate hosts exhausted");
        metrics::record_pull_outcome("exhausted");
        Ok(None)
    }

    /// Push records to every report target that has a use for them.
    ///
    /// Destinations run concurrently, bounded by `max_parallel_reports`.
    /// Failures are logged and counted, never returned.
    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn report(&self, records: &FingerprintTable) -> ReportSummary {
        if records.is_empty() {
            return ReportSummary::default();
        }

        let topology = self.topology.current();
        let targets = topology.report_targets();
        let batches = partition_by_destination(records, &targets, &topology.alive_set());
        let mut summary = ReportSummary {
            skipped: targets.len() - batches.len(),
            ..Default::default()
        };

        let pushes = batches.into_iter().map(|(host, batch)| async move {
            let delivered = self.push(&host, &batch).await;
            metrics::record_report_delivery(&host, delivered);
            delivered
        });

        for delivered in futures::future::join_all(pushes).await {
            if delivered {
                summary.delivered += 1;
            } else {
                summary.failed += 1;
            }
        }

        metrics::record_report_records(records.len());
        debug!(
            delivered = summary.delivered,
            failed = summary.failed,
            skipped = summary.skipped,
            "Report complete"
        );
        summary
    }

    /// Fetch and union the tables of every query target, in order.
    ///
    /// The first transport or decode failure aborts the whole query.
    #[instrument(skip_all)]
    pub async fn query(&self) -> Result<FingerprintTable> {
        let targets = self.topology.current().query_targets();
        let mut merged = FingerprintTable::new();

        for host in targets {
            let response = self.send(&host, PeerRequest::new(Operation::QueryIndex)).await?;
            let table = match response.status {
                STATUS_NO_CONTENT => FingerprintTable::new(),
                STATUS_OK => {
                    snapshot::decode(&response.body).map_err(|e| FingerprintError::decode(&host, e))?
                }
                other => return Err(unexpected_status(&host, Operation::QueryIndex, other)),
            };
            debug!(peer_id = %host, records = table.len(), "Queried peer table");
            merge_tables(&mut merged, table);
        }

        Ok(merged)
    }

    async fn push(&self, host: &str, batch: &FingerprintTable) -> bool {
        let Some(_slot) = self.report_slots.claim().await else {
            warn!(peer_id = %host, "Report slots closed");
            return false;
        };

        let body = match serde_json::to_vec(batch) {
            Ok(body) => body,
            Err(e) => {
                warn!(peer_id = %host, error = %e, "Failed to encode report");
                return false;
            }
        };

        match self.send(host, PeerRequest::new(Operation::Notify).with_body(body)).await {
            Ok(response) if response.is_ok() => true,
            Ok(response) => {
                warn!(peer_id = %host, status = response.status, "Report rejected");
                false
            }
            Err(e) => {
                warn!(peer_id = %host, error = %e, "Report failed");
                false
            }
        }
    }

    /// Send one request with correlation headers and the request timeout.
    async fn send(&self, host: &str, request: PeerRequest) -> Result<PeerResponse> {
        let operation = request.operation;
        let request_id = uuid::Uuid::new_v4().to_string();
        let request = request
            .with_header(HEADER_REQUEST_ID, request_id.as_str())
            .with_header(HEADER_ACCEPT_ENCODING, "gzip");

        debug!(peer_id = %host, operation = %operation, request_id = %request_id, "Peer request");
        let start = Instant::now();
        let result = tokio::time::timeout(self.request_timeout, self.transport.request(host, request)).await;
        let elapsed = start.elapsed();
        metrics::record_peer_request_latency(host, operation.name(), elapsed);

        match result {
            Ok(Ok(response)) => {
                debug!(
                    peer_id = %host,
                    operation = %operation,
                    status = response.status,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Peer response"
                );
                metrics::record_peer_request(host, operation.name(), "success");
                Ok(response)
            }
            Ok(Err(e)) => {
                metrics::record_peer_request(host, operation.name(), "error");
                metrics::record_error(host, "transport");
                Err(FingerprintError::transport(host, operation.name(), e.to_string()))
            }
            Err(_) => {
                metrics::record_peer_request(host, operation.name(), "timeout");
                metrics::record_error(host, "transport");
                Err(FingerprintError::transport(
                    host,
                    operation.name(),
                    format!("timed out after {}ms", self.request_timeout.as_millis()),
                ))
            }
        }
    }
}

fn unexpected_status(host: &str, operation: Operation, status: u16) -> FingerprintError {
    FingerprintError::transport(host, operation.name(), format!("unexpected status {}", status))
}
