// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Peer transport interface.
//!
//! The engine never opens sockets itself. It hands a [`PeerRequest`] and a
//! target host to a [`PeerTransport`] and gets back a [`PeerResponse`]
//! (status + body) or a [`TransportError`]. The daemon wires in a real
//! client ([`HttpTransport`](crate::http::HttpTransport)); tests wire in an
//! in-memory cluster.
//!
//! # Example
//!
//! ```rust,no_run
//! use fingerprint_sync::transport::{BoxFuture, PeerRequest, PeerResponse, PeerTransport};
//!
//! struct Refuse;
//!
//! impl PeerTransport for Refuse {
//!     fn request(&self, _host: &str, _request: PeerRequest) -> BoxFuture<'_, PeerResponse> {
//!         Box::pin(async { Ok(PeerResponse::no_content()) })
//!     }
//! }
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Correlation header carried by every outbound request.
pub const HEADER_REQUEST_ID: &str = "X-Request-Id";

/// Encoding hint carried by every outbound request.
pub const HEADER_ACCEPT_ENCODING: &str = "Accept-Encoding";

pub const STATUS_OK: u16 = 200;
pub const STATUS_NO_CONTENT: u16 = 204;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_SERVICE_UNAVAILABLE: u16 = 503;

/// Result type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = TransportResult<T>> + Send + 'a>>;

/// Network-level failure reported by a transport.
#[derive(Debug, Clone)]
pub struct TransportError(pub String);

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TransportError {}

/// The four peer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Fetch one record from the coordinator.
    GetRecord,
    /// Fetch raw file bytes.
    Download,
    /// Push a table of records.
    Notify,
    /// Fetch a peer's full table.
    QueryIndex,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::GetRecord,
        Operation::Download,
        Operation::Notify,
        Operation::QueryIndex,
    ];

    /// Route the operation is served on.
    pub fn route(&self) -> &'static str {
        match self {
            Operation::GetRecord => "/nfs/fp/get",
            Operation::Download => "/nfs/file/download",
            Operation::Notify => "/nfs/fp/notify",
            Operation::QueryIndex => "/nfs/fp/query",
        }
    }

    /// Resolve a route back to its operation.
    pub fn from_route(route: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.route() == route)
    }

    /// Stable name for logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::GetRecord => "GET_RECORD",
            Operation::Download => "DOWNLOAD",
            Operation::Notify => "NOTIFY",
            Operation::QueryIndex => "QUERY_INDEX",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One outbound (or inbound) peer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRequest {
    pub operation: Operation,
    pub params: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl PeerRequest {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            params: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Correlation id, if the sender attached one.
    pub fn request_id(&self) -> Option<&str> {
        self.headers.get(HEADER_REQUEST_ID).map(String::as_str)
    }
}

/// Status code and body returned by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl PeerResponse {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: STATUS_OK,
            body,
        }
    }

    pub fn no_content() -> Self {
        Self {
            status: STATUS_NO_CONTENT,
            body: Vec::new(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn is_no_content(&self) -> bool {
        self.status == STATUS_NO_CONTENT
    }
}

/// Request/response client used to reach peers.
///
/// Implementations must be cancel-safe: dropping the returned future
/// abandons the request.
pub trait PeerTransport: Send + Sync + 'static {
    /// Send `request` to `host` and return the peer's response.
    ///
    /// Any status the peer answers with is an `Ok`; `Err` means the request
    /// never produced a response (refused, reset, DNS, TLS).
    fn request(&self, host: &str, request: PeerRequest) -> BoxFuture<'_, PeerResponse>;
}

impl<T: PeerTransport + ?Sized> PeerTransport for Arc<T> {
    fn request(&self, host: &str, request: PeerRequest) -> BoxFuture<'_, PeerResponse> {
        (**self).request(host, request)
    }
}
