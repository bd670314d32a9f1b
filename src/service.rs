// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Inbound peer request handling.
//!
//! [`PeerService`] answers the four peer operations from the local index.
//! It knows nothing about sockets: a server (or an in-memory test cluster)
//! hands it a [`PeerRequest`] and sends back whatever [`PeerResponse`] it
//! returns.
//!
//! # Responses
//!
//! | Operation | Ready | Not ready |
//! |-----------|-------|-----------|
//! | GET_RECORD | 200 record / 204 unknown | 204 |
//! | DOWNLOAD | 200 bytes / 204 unknown or unreadable | 204 |
//! | NOTIFY | 200 after merge / 400 bad body | 503 |
//! | QUERY_INDEX | 200 table | 503 |
//!
//! A missing or unsafe `path` parameter, or an unknown route, is a 400.
//!
//! Merges that produce a non-empty [`MergeOutcome`] are forwarded on the
//! bounded outcome channel so the engine can propagate them. A full channel
//! drops the outcome; the merge itself already stands, and the next
//! anti-entropy tick picks up whatever propagation missed.

use crate::error::FingerprintError;
use crate::index::{snapshot, LocalIndex, MergeOutcome};
use crate::metrics;
use crate::record::validate_path;
use crate::transport::{
    Operation, PeerRequest, PeerResponse, STATUS_BAD_REQUEST, STATUS_SERVICE_UNAVAILABLE,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Slot holding the index once it has been initialized.
pub type IndexSlot = Arc<RwLock<Option<Arc<LocalIndex>>>>;

/// Handles inbound peer requests against the local index.
pub struct PeerService {
    index: IndexSlot,
    outcomes: Option<mpsc::Sender<MergeOutcome>>,
}

impl PeerService {
    pub fn new(index: IndexSlot, outcomes: Option<mpsc::Sender<MergeOutcome>>) -> Self {
        Self { index, outcomes }
    }

    /// Serve a ready index with no outcome forwarding.
    pub fn for_index(index: Arc<LocalIndex>) -> Self {
        Self::new(Arc::new(RwLock::new(Some(index))), None)
    }

    /// Handle a request addressed by route, as an HTTP server would see it.
    pub async fn dispatch(
        &self,
        route: &str,
        params: BTreeMap<String, String>,
        headers: BTreeMap<String, String>,
        body: Vec<u8>,
    ) -> PeerResponse {
        match Operation::from_route(route) {
            Some(operation) => {
                self.handle(PeerRequest {
                    operation,
                    params,
                    headers,
                    body,
                })
                .await
            }
            None => {
                debug!(route, "Unknown route");
                PeerResponse::status(STATUS_BAD_REQUEST)
            }
        }
    }

    /// Handle one request.
    pub async fn handle(&self, request: PeerRequest) -> PeerResponse {
        let operation = request.operation;
        let request_id = request.request_id().unwrap_or("-").to_string();
        let index = self.ready_index().await;

        let response = match operation {
            Operation::GetRecord => self.get_record(index.as_deref(), &request),
            Operation::Download => self.download(index.as_deref(), &request).await,
            Operation::Notify => self.notify(index.as_deref(), request.body).await,
            Operation::QueryIndex => self.query(index.as_deref()),
        };

        debug!(
            operation = %operation,
            request_id = %request_id,
            status = response.status,
            "Served peer request"
        );
        metrics::record_inbound_request(operation.name(), response.status);
        response
    }

    async fn ready_index(&self) -> Option<Arc<LocalIndex>> {
        self.index
            .read()
            .await
            .as_ref()
            .filter(|index| !index.is_closed())
            .cloned()
    }

    fn get_record(&self, index: Option<&LocalIndex>, request: &PeerRequest) -> PeerResponse {
        let path = match path_param(request) {
            Ok(path) => path,
            Err(resp) => return resp,
        };
        let Some(record) = index.and_then(|index| index.get(path)) else {
            return PeerResponse::no_content();
        };
        match serde_json::to_vec(&record) {
            Ok(body) => PeerResponse::ok(body),
            Err(e) => {
                warn!(path, error = %e, "Failed to encode record");
                PeerResponse::status(STATUS_SERVICE_UNAVAILABLE)
            }
        }
    }

    async fn download(&self, index: Option<&LocalIndex>, request: &PeerRequest) -> PeerResponse {
        let path = match path_param(request) {
            Ok(path) => path,
            Err(resp) => return resp,
        };
        let Some(index) = index else {
            return PeerResponse::no_content();
        };
        match index.read(path).await {
            Ok(bytes) => PeerResponse::ok(bytes),
            Err(FingerprintError::NotFound { .. }) => PeerResponse::no_content(),
            Err(e) => {
                warn!(path, error = %e, "Tracked file unreadable");
                PeerResponse::no_content()
            }
        }
    }

    async fn notify(&self, index: Option<&LocalIndex>, body: Vec<u8>) -> PeerResponse {
        let Some(index) = index else {
            return PeerResponse::status(STATUS_SERVICE_UNAVAILABLE);
        };
        let table = match snapshot::decode(&body) {
            Ok(table) => table,
            Err(e) => {
                warn!(error = %e, "Rejecting undecodable notify body");
                return PeerResponse::status(STATUS_BAD_REQUEST);
            }
        };

        let outcome = index.merge_incoming(table).await;
        if !outcome.is_empty() {
            if let Some(tx) = &self.outcomes {
                match tx.try_send(outcome) {
                    Ok(()) => {}
                    Err(TrySendError::Full(dropped)) => {
                        warn!(
                            report = dropped.report.len(),
                            download = dropped.download.len(),
                            "Propagation queue full, dropping merge outcome"
                        );
                        metrics::record_outcome_dropped("queue_full");
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("Propagation task gone, dropping merge outcome");
                        metrics::record_outcome_dropped("closed");
                    }
                }
            }
        }
        PeerResponse::ok(Vec::new())
    }

    fn query(&self, index: Option<&LocalIndex>) -> PeerResponse {
        let Some(index) = index else {
            return PeerResponse::status(STATUS_SERVICE_UNAVAILABLE);
        };
        match serde_json::to_vec(&index.table()) {
            Ok(body) => PeerResponse::ok(body),
            Err(e) => {
                warn!(error = %e, "Failed to encode table");
                PeerResponse::status(STATUS_SERVICE_UNAVAILABLE)
            }
        }
    }
}

fn path_param(request: &PeerRequest) -> Result<&str, PeerResponse> {
    match request.param("path") {
        Some(path) if validate_path(path).is_ok() => Ok(path),
        _ => Err(PeerResponse::status(STATUS_BAD_REQUEST)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::default_checksum;
    use crate::config::IndexConfig;
    use crate::record::{FingerprintRecord, FingerprintTable};
    use tempfile::{tempdir, TempDir};

    async fn ready_service(files: &[(&str, &str)]) -> (PeerService, Arc<LocalIndex>, TempDir) {
        let dir = tempdir().unwrap();
        for (path, content) in files {
            std::fs::write(dir.path().join(path), content).unwrap();
        }
        let config = IndexConfig {
            root: dir.path().to_path_buf(),
            allow_missing_snapshot: true,
            ..Default::default()
        };
        let index = Arc::new(
            LocalIndex::initialize(&config, "A", default_checksum())
                .await
                .unwrap(),
        );
        (PeerService::for_index(index.clone()), index, dir)
    }

    fn get(path: &str) -> PeerRequest {
        PeerRequest::new(Operation::GetRecord).with_param("path", path)
    }

    #[tokio::test]
    async fn test_not_ready_responses() {
        let service = PeerService::new(Arc::new(RwLock::new(None)), None);

        assert!(service.handle(get("a")).await.is_no_content());
        let dl = PeerRequest::new(Operation::Download).with_param("path", "a");
        assert!(service.handle(dl).await.is_no_content());
        let q = service.handle(PeerRequest::new(Operation::QueryIndex)).await;
        assert_eq!(q.status, STATUS_SERVICE_UNAVAILABLE);
        let n = service.handle(PeerRequest::new(Operation::Notify)).await;
        assert_eq!(n.status, STATUS_SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_get_record_and_download() {
        let (service, _index, _dir) = ready_service(&[("a.txt", "hello")]).await;

        let resp = service.handle(get("a.txt")).await;
        assert!(resp.is_ok());
        let record: FingerprintRecord = serde_json::from_slice(&resp.body).unwrap();
        assert!(record.has_host("A"));

        assert!(service.handle(get("missing")).await.is_no_content());

        let dl = PeerRequest::new(Operation::Download).with_param("path", "a.txt");
        assert_eq!(service.handle(dl).await.body, b"hello");
    }

    #[tokio::test]
    async fn test_bad_path_is_bad_request() {
        let (service, _index, _dir) = ready_service(&[]).await;

        assert_eq!(service.handle(get("../etc/passwd")).await.status, STATUS_BAD_REQUEST);
        let no_param = PeerRequest::new(Operation::GetRecord);
        assert_eq!(service.handle(no_param).await.status, STATUS_BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_notify_merges_and_forwards_outcome() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let config = IndexConfig {
            root: dir.path().to_path_buf(),
            allow_missing_snapshot: true,
            ..Default::default()
        };
        let index = Arc::new(LocalIndex::initialize(&config, "A", default_checksum()).await.unwrap());
        let (tx, mut rx) = mpsc::channel(8);
        let service = PeerService::new(Arc::new(RwLock::new(Some(index.clone()))), Some(tx));

        let mut table = FingerprintTable::new();
        let mut a = index.get("a.txt").unwrap();
        a.add_hosts(["B"]);
        table.insert("a.txt".into(), a);
        table.insert("new.bin".into(), FingerprintRecord::new("new.bin", 9, ["B"]));
        let body = serde_json::to_vec(&table).unwrap();

        let resp = service.handle(PeerRequest::new(Operation::Notify).with_body(body.clone())).await;
        assert!(resp.is_ok());
        let outcome = rx.recv().await.unwrap();
        assert!(outcome.report.contains_key("a.txt"));
        assert!(outcome.download.contains_key("new.bin"));

        // Replaying the same body grows nothing; only the download remains.
        service.handle(PeerRequest::new(Operation::Notify).with_body(body)).await;
        let replay = rx.recv().await.unwrap();
        assert!(replay.report.is_empty());
    }

    #[tokio::test]
    async fn test_notify_flood_keeps_outcome_queue_bounded() {
        let (_, index, _dir) = ready_service(&[]).await;
        let (tx, mut rx) = mpsc::channel(2);
        let service = PeerService::new(Arc::new(RwLock::new(Some(index.clone()))), Some(tx));

        for i in 0..20 {
            let mut table = FingerprintTable::new();
            let path = format!("burst-{}.bin", i);
            table.insert(path.clone(), FingerprintRecord::new(path, i, ["B"]));
            let body = serde_json::to_vec(&table).unwrap();
            let resp = service.handle(PeerRequest::new(Operation::Notify).with_body(body)).await;
            assert!(resp.is_ok(), "a full queue must not fail the NOTIFY");
        }

        let mut queued = Vec::new();
        while let Ok(outcome) = rx.try_recv() {
            queued.push(outcome);
        }
        assert_eq!(queued.len(), 2);
        assert!(queued[0].download.contains_key("burst-0.bin"));
        assert!(queued[1].download.contains_key("burst-1.bin"));
    }

    #[tokio::test]
    async fn test_notify_bad_body() {
        let (service, _index, _dir) = ready_service(&[]).await;
        let resp = service
            .handle(PeerRequest::new(Operation::Notify).with_body(b"[1,2".to_vec()))
            .await;
        assert_eq!(resp.status, STATUS_BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_query_returns_table() {
        let (service, _index, _dir) = ready_service(&[("a.txt", "1"), ("b.txt", "2")]).await;
        let resp = service.handle(PeerRequest::new(Operation::QueryIndex)).await;
        let table = snapshot::decode(&resp.body).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_closed_index_is_not_ready() {
        let (service, index, _dir) = ready_service(&[("a.txt", "1")]).await;
        index.close();
        let resp = service.handle(PeerRequest::new(Operation::QueryIndex)).await;
        assert_eq!(resp.status, STATUS_SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_dispatch_by_route() {
        let (service, _index, _dir) = ready_service(&[("a.txt", "1")]).await;
        let resp = service
            .dispatch("/nfs/fp/query", BTreeMap::new(), BTreeMap::new(), Vec::new())
            .await;
        assert!(resp.is_ok());

        let resp = service
            .dispatch("/nfs/nope", BTreeMap::new(), BTreeMap::new(), Vec::new())
            .await;
        assert_eq!(resp.status, STATUS_BAD_REQUEST);
    }
}
