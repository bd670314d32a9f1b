// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory cluster transport.
//!
//! Routes each request to the target node's [`PeerService`] and lets tests
//! break individual hosts or operations.

use fingerprint_sync::service::PeerService;
use fingerprint_sync::transport::{BoxFuture, Operation, PeerRequest, PeerResponse, PeerTransport, TransportError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

/// One request as seen by the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedRequest {
    pub host: String,
    pub operation: Operation,
    pub path: Option<String>,
}

/// Transport that delivers requests to in-process services.
#[derive(Default)]
pub struct MockCluster {
    nodes: RwLock<HashMap<String, Arc<PeerService>>>,
    unreachable: RwLock<HashSet<String>>,
    hanging: RwLock<HashSet<String>>,
    corrupt: RwLock<HashSet<(String, Operation)>>,
    forced: RwLock<HashMap<(String, Operation), u16>>,
    log: Mutex<Vec<LoggedRequest>>,
}

impl MockCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, host: &str, service: Arc<PeerService>) {
        self.nodes.write().unwrap().insert(host.to_string(), service);
    }

    /// Refuse every request to `host`.
    pub fn set_unreachable(&self, host: &str, unreachable: bool) {
        let mut set = self.unreachable.write().unwrap();
        if unreachable {
            set.insert(host.to_string());
        } else {
            set.remove(host);
        }
    }

    /// Never answer requests to `host`.
    pub fn hang(&self, host: &str) {
        self.hanging.write().unwrap().insert(host.to_string());
    }

    /// Flip every body byte `host` returns for `operation`.
    pub fn corrupt(&self, host: &str, operation: Operation) {
        self.corrupt
            .write()
            .unwrap()
            .insert((host.to_string(), operation));
    }

    /// Answer `operation` on `host` with a bare status.
    pub fn force_status(&self, host: &str, operation: Operation, status: u16) {
        self.forced
            .write()
            .unwrap()
            .insert((host.to_string(), operation), status);
    }

    pub fn heal(&self) {
        self.unreachable.write().unwrap().clear();
        self.hanging.write().unwrap().clear();
        self.corrupt.write().unwrap().clear();
        self.forced.write().unwrap().clear();
    }

    pub fn requests(&self) -> Vec<LoggedRequest> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, host: &str, operation: Operation) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.host == host && r.operation == operation)
            .count()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }
}

impl PeerTransport for MockCluster {
    fn request(&self, host: &str, request: PeerRequest) -> BoxFuture<'_, PeerResponse> {
        let key = (host.to_string(), request.operation);
        self.log.lock().unwrap().push(LoggedRequest {
            host: host.to_string(),
            operation: request.operation,
            path: request.param("path").map(str::to_string),
        });

        let unreachable = self.unreachable.read().unwrap().contains(host);
        let hanging = self.hanging.read().unwrap().contains(host);
        let corrupt = self.corrupt.read().unwrap().contains(&key);
        let forced = self.forced.read().unwrap().get(&key).copied();
        let service = self.nodes.read().unwrap().get(host).cloned();

        Box::pin(async move {
            if unreachable {
                return Err(TransportError(format!("connection refused: {}", key.0)));
            }
            if hanging {
                std::future::pending::<()>().await;
            }
            if let Some(status) = forced {
                return Ok(PeerResponse::status(status));
            }
            let Some(service) = service else {
                return Err(TransportError(format!("no route to host: {}", key.0)));
            };

            let mut response = service.handle(request).await;
            if corrupt {
                for byte in response.body.iter_mut() {
                    *byte ^= 0xFF;
                }
            }
            Ok(response)
        })
    }
}
