// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fingerprint sync engine.
//!
//! The orchestrator that ties together:
//! - The local index via [`crate::index::LocalIndex`]
//! - Peer operations via [`crate::remoting::Remoting`]
//! - Inbound requests via [`crate::service::PeerService`]
//! - Periodic anti-entropy and inbound-merge propagation
//!
//! # Architecture
//!
//! ```text
//!             ┌──────────────── FingerprintSync ────────────────┐
//!  inbound ──►│ PeerService ──merge──► LocalIndex ◄──save──┐    │
//!  requests   │      │                    ▲                │    │
//!             │      └─ MergeOutcome ─► propagation ──┐    │    │
//!             │                           task        ├─► resolve/fetch
//!             │              anti-entropy task ───────┘    │    │
//!             │                    │                       │    │
//!             │                    └────► Remoting ◄───────┘    │
//!             └──────────────────────────────┬───────────────────┘
//!                                            ▼
//!                                       PeerTransport
//! ```
//!
//! The service exists from construction, so peers can reach this node before
//! `start()`: they get "no content" / "unavailable" until the index is ready.

mod anti_entropy;
mod resolve;
mod types;

pub use types::{EngineState, TickReport};

use crate::checksum::ChecksumRef;
use crate::config::{NodeConfig, SyncConfig};
use crate::error::{FingerprintError, Result};
use crate::index::{LocalIndex, MergeOutcome};
use crate::metrics;
use crate::remoting::{Remoting, TopologyHandle};
use crate::resilience::DownloadPacer;
use crate::service::{IndexSlot, PeerService};
use crate::transport::PeerTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a background task or a resolution needs, cheaply cloned.
pub(crate) struct SyncContext<T: PeerTransport> {
    index: Arc<LocalIndex>,
    remoting: Arc<Remoting<T>>,
    config: SyncConfig,
    download_pacer: Option<Arc<DownloadPacer>>,
}

impl<T: PeerTransport> Clone for SyncContext<T> {
    fn clone(&self) -> Self {
        Self {
            index: Arc::clone(&self.index),
            remoting: Arc::clone(&self.remoting),
            config: self.config.clone(),
            download_pacer: self.download_pacer.clone(),
        }
    }
}

/// The fingerprint sync engine for one node.
pub struct FingerprintSync<T: PeerTransport> {
    config: NodeConfig,

    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,

    remoting: Arc<Remoting<T>>,
    checksum: ChecksumRef,

    /// Populated by `start()`, emptied by `shutdown()`.
    index: IndexSlot,

    service: Arc<PeerService>,

    /// Taken by the propagation task on start.
    outcome_rx: Option<mpsc::Receiver<MergeOutcome>>,

    download_pacer: Option<Arc<DownloadPacer>>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    task_handles: RwLock<Vec<tokio::task::JoinHandle<()>>>,
}

impl<T: PeerTransport> FingerprintSync<T> {
    /// Create an engine in the `Created` state.
    ///
    /// Nothing touches the disk or the network until [`start()`](Self::start).
    pub fn new(
        config: NodeConfig,
        transport: Arc<T>,
        topology: TopologyHandle,
        checksum: ChecksumRef,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (outcome_tx, outcome_rx) = mpsc::channel(config.sync.propagation_queue.max(1));

        let remoting = Arc::new(Remoting::new(
            transport,
            topology,
            Arc::clone(&checksum),
            &config.remoting,
        ));
        let index: IndexSlot = Arc::new(RwLock::new(None));
        let service = Arc::new(PeerService::new(Arc::clone(&index), Some(outcome_tx)));

        let download_pacer = config.sync.download_pacer().map(|pacer| {
            info!(rate_per_sec = pacer.rate_per_sec(), "Download pacing enabled");
            Arc::new(pacer)
        });

        Self {
            config,
            state_tx,
            state_rx,
            remoting,
            checksum,
            index,
            service,
            outcome_rx: Some(outcome_rx),
            download_pacer,
            shutdown_tx,
            shutdown_rx,
            task_handles: RwLock::new(Vec::new()),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_serving()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Inbound request handler. Mount it on whatever server carries peer traffic.
    pub fn service(&self) -> Arc<PeerService> {
        Arc::clone(&self.service)
    }

    /// Topology handle. The membership provider calls `update` on it.
    pub fn topology(&self) -> &TopologyHandle {
        self.remoting.topology()
    }

    pub fn remoting(&self) -> &Arc<Remoting<T>> {
        &self.remoting
    }

    /// The local index, once started.
    pub async fn index(&self) -> Option<Arc<LocalIndex>> {
        self.index.read().await.clone()
    }

    /// Initialize the index and spawn the background tasks.
    ///
    /// 1. Loads and reconciles the index under the topology's local address
    /// 2. Spawns the propagation task
    /// 3. Spawns the anti-entropy task (if `sync.enabled`)
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != EngineState::Created {
            return Err(FingerprintError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }

        if let Err(e) = self.config.validate() {
            error!(error = %e, "Invalid configuration");
            self.set_state(EngineState::Failed);
            return Err(e);
        }

        let local = self.topology().current().local;
        if local.is_empty() {
            error!("Local address unknown, cannot register as a holder");
            self.set_state(EngineState::Failed);
            return Err(FingerprintError::Config(
                "topology has no local address".to_string(),
            ));
        }

        info!(
            local_host = %local,
            root = %self.config.index.root.display(),
            role = %self.topology().current().role,
            "Starting fingerprint sync"
        );
        self.set_state(EngineState::Initializing);

        let index = match LocalIndex::initialize(&self.config.index, local, Arc::clone(&self.checksum)).await {
            Ok(index) => Arc::new(index),
            Err(e) => {
                error!(error = %e, "Local index initialization failed");
                self.set_state(EngineState::Failed);
                return Err(e);
            }
        };
        *self.index.write().await = Some(Arc::clone(&index));

        let ctx = SyncContext {
            index,
            remoting: Arc::clone(&self.remoting),
            config: self.config.sync.clone(),
            download_pacer: self.download_pacer.clone(),
        };

        let mut handles = self.task_handles.write().await;
        if let Some(outcome_rx) = self.outcome_rx.take() {
            let shutdown_rx = self.shutdown_rx.clone();
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                anti_entropy::run_propagation(ctx, outcome_rx, shutdown_rx).await;
            }));
            debug!("Spawned propagation task");
        }

        if self.config.sync.enabled {
            let shutdown_rx = self.shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                anti_entropy::run_anti_entropy(ctx, shutdown_rx).await;
            }));
            info!("Spawned anti-entropy task");
        }
        drop(handles);

        self.set_state(EngineState::Running);
        info!("Fingerprint sync running");
        Ok(())
    }

    /// Return the bytes for `path`, fetching them from a peer if needed.
    ///
    /// `Ok(None)` means the coordinator knows the file but no holder served
    /// a verified copy.
    pub async fn resolve(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let ctx = self.context().await?;
        resolve::resolve(&ctx, path).await
    }

    /// Run one anti-entropy cycle now, outside the periodic schedule.
    pub async fn tick(&self) -> Result<TickReport> {
        let ctx = self.context().await?;
        anti_entropy::run_tick(&ctx).await
    }

    /// Shut down gracefully.
    ///
    /// 1. Signal all tasks to stop
    /// 2. Wait for them to finish (with timeout)
    /// 3. Close the index (the snapshot stays on disk)
    pub async fn shutdown(&mut self) {
        info!("Shutting down fingerprint sync");
        self.set_state(EngineState::ShuttingDown);

        let _ = self.shutdown_tx.send(true);

        let handles: Vec<_> = {
            let mut guard = self.task_handles.write().await;
            std::mem::take(&mut *guard)
        };

        for (i, handle) in handles.into_iter().enumerate() {
            match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
                Ok(Ok(())) => debug!(task = i + 1, "Task completed gracefully"),
                Ok(Err(e)) => warn!(task = i + 1, error = %e, "Task panicked during shutdown"),
                Err(_) => warn!(task = i + 1, "Task timed out during shutdown"),
            }
        }

        if let Some(index) = self.index.write().await.take() {
            index.close();
        }

        self.set_state(EngineState::Stopped);
        info!("Fingerprint sync stopped");
    }

    async fn context(&self) -> Result<SyncContext<T>> {
        let index = self.index.read().await.clone().ok_or_else(|| FingerprintError::InvalidState {
            expected: "Running".to_string(),
            actual: self.state().to_string(),
        })?;
        Ok(SyncContext {
            index,
            remoting: Arc::clone(&self.remoting),
            config: self.config.sync.clone(),
            download_pacer: self.download_pacer.clone(),
        })
    }

    fn set_state(&self, state: EngineState) {
        let _ = self.state_tx.send(state);
        metrics::set_engine_state(state.as_str());
    }
}
