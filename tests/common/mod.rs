// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - An in-memory cluster transport with failure injection
//! - Node builders backed by temp storage roots

#![allow(dead_code)]

pub mod mock_cluster;

pub use mock_cluster::*;

use fingerprint_sync::{default_checksum, FingerprintSync, NodeConfig, Topology, TopologyHandle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A cluster node under test. The storage root lives as long as the node.
pub struct TestNode {
    pub host: String,
    pub dir: TempDir,
    pub engine: FingerprintSync<MockCluster>,
}

impl TestNode {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.root().join(path).is_file()
    }

    pub async fn hosts_of(&self, path: &str) -> Vec<String> {
        self.engine
            .index()
            .await
            .and_then(|index| index.get(path))
            .map(|record| record.hosts.into_iter().collect())
            .unwrap_or_default()
    }
}

/// Build (but don't start) a node and register its service with the cluster.
///
/// `coordinator` is also the coordinator address every node is told about.
pub fn node(
    cluster: &Arc<MockCluster>,
    host: &str,
    coordinator: &str,
    members: &[&str],
    files: &[(&str, &str)],
) -> TestNode {
    let dir = tempfile::tempdir().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }
    node_in(cluster, dir, host, coordinator, members)
}

/// Build a node over an existing storage root.
pub fn node_in(
    cluster: &Arc<MockCluster>,
    dir: TempDir,
    host: &str,
    coordinator: &str,
    members: &[&str],
) -> TestNode {
    let config = NodeConfig::for_testing(dir.path());
    node_with_config(cluster, dir, host, coordinator, members, config)
}

/// Build a node with a custom config. `config.index.root` should point into `dir`.
pub fn node_with_config(
    cluster: &Arc<MockCluster>,
    dir: TempDir,
    host: &str,
    coordinator: &str,
    members: &[&str],
    config: NodeConfig,
) -> TestNode {
    let topology = TopologyHandle::new(Topology::new(
        members.iter().map(|m| m.to_string()).collect(),
        coordinator,
        host,
        host == coordinator,
    ));
    let engine = FingerprintSync::new(
        config,
        Arc::clone(cluster),
        topology,
        default_checksum(),
    );
    cluster.register(host, engine.service());

    TestNode {
        host: host.to_string(),
        dir,
        engine,
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Install a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
