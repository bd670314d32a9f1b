// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Fingerprint Sync
//!
//! A cluster-wide file fingerprint index. Each node tracks the files it
//! physically stores (path + 64-bit content checksum) and the set of hosts
//! known to hold each one, and exchanges that inventory with its peers so
//! any node can find, fetch and verify a file held elsewhere.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                            fingerprint-sync                               │
//! │                                                                           │
//! │  ┌─────────────┐    ┌──────────────┐    ┌──────────────────────────────┐  │
//! │  │ PeerService │───►│  LocalIndex  │◄───│ FingerprintSync              │  │
//! │  │ (inbound)   │    │ (DashMap+.fp)│    │ resolve / tick / propagation │  │
//! │  └─────────────┘    └──────────────┘    └──────────────────────────────┘  │
//! │                                                        │                  │
//! │                                                        ▼                  │
//! │                     ┌──────────────┐    ┌──────────────────────────────┐  │
//! │                     │   Topology   │───►│ Remoting                     │  │
//! │                     │ (watch chan) │    │ get / pull / report / query  │  │
//! │                     └──────────────┘    └──────────────────────────────┘  │
//! └────────────────────────────────────────────────────────│──────────────────┘
//!                                                          ▼
//!                                                PeerTransport (HTTP, ...)
//! ```
//!
//! ## Two Ways In
//!
//! 1. **On demand**: [`FingerprintSync::resolve`] serves a path locally or
//!    fetches it from a holder, verifies it, stores it and reports it.
//! 2. **Anti-entropy**: a periodic tick queries the cluster, merges host sets,
//!    fetches what is missing and reports what grew.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fingerprint_sync::{default_checksum, FingerprintSync, HttpTransport, NodeConfig, Topology, TopologyHandle};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> fingerprint_sync::Result<()> {
//!     let config = NodeConfig::default();
//!     let transport = Arc::new(HttpTransport::new(&config.remoting)?);
//!     let topology = TopologyHandle::new(Topology::new(
//!         vec!["10.0.0.1:8080".into(), "10.0.0.2:8080".into()],
//!         "10.0.0.1:8080",
//!         "10.0.0.2:8080",
//!         false,
//!     ));
//!
//!     let mut engine = FingerprintSync::new(config, transport, topology, default_checksum());
//!     engine.start().await?;
//!
//!     let bytes = engine.resolve("videos/intro.mp4").await?;
//!     println!("fetched: {}", bytes.is_some());
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod index;
pub mod metrics;
pub mod record;
pub mod remoting;
pub mod resilience;
pub mod service;
pub mod transport;

// Re-exports for convenience
pub use checksum::{default_checksum, Checksum, ChecksumRef, Xxh3Checksum};
pub use config::{IndexConfig, NodeConfig, RemotingConfig, SyncConfig};
pub use coordinator::{EngineState, FingerprintSync, TickReport};
pub use error::{FingerprintError, Result};
pub use http::HttpTransport;
pub use index::{LocalIndex, MergeOutcome};
pub use record::{FingerprintRecord, FingerprintTable};
pub use remoting::{Remoting, ReportSummary, Role, Topology, TopologyHandle};
pub use service::PeerService;
pub use transport::{Operation, PeerRequest, PeerResponse, PeerTransport, TransportError};
