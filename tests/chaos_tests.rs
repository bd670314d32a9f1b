// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Chaos tests: simulate failures and verify graceful degradation.
//!
//! These tests verify the system handles failures gracefully without panics,
//! deadlocks, or corrupt files on disk.
//!
//! Run with: cargo test --test chaos_tests -- --nocapture

mod common;

use common::{node, MockCluster};
use fingerprint_sync::service::PeerService;
use fingerprint_sync::transport::STATUS_SERVICE_UNAVAILABLE;
use fingerprint_sync::{
    default_checksum, Checksum, FingerprintError, FingerprintRecord, FingerprintTable, IndexConfig,
    LocalIndex, Operation, PeerRequest, Xxh3Checksum,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

// =============================================================================
// Unreachable and misbehaving holders
// =============================================================================

/// Test: an unreachable holder is skipped, the next one serves
#[tokio::test]
async fn unreachable_holder_falls_through_to_next() {
    let cluster = MockCluster::new();
    let members = ["A", "B", "C"];
    let mut a = node(&cluster, "A", "A", &members, &[("shared.bin", "payload")]);
    let mut b = node(&cluster, "B", "A", &members, &[("shared.bin", "payload")]);
    let mut c = node(&cluster, "C", "A", &members, &[]);
    for n in [&mut a, &mut b, &mut c] {
        n.engine.start().await.unwrap();
    }
    cluster.set_unreachable("A", true);
    let record = FingerprintRecord::new("shared.bin", Xxh3Checksum.digest(b"payload"), ["A", "B"]);
    let bytes = c.engine.remoting().pull(&record).await.unwrap();

    assert_eq!(bytes.as_deref(), Some(&b"payload"[..]));
    assert_eq!(cluster.count("A", Operation::Download), 1);
    assert_eq!(cluster.count("B", Operation::Download), 1);

    for n in [&mut a, &mut b, &mut c] {
        n.engine.shutdown().await;
    }
}

/// Test: corrupted content is never stored
#[tokio::test]
async fn corrupted_download_is_rejected() {
    let cluster = MockCluster::new();
    let mut a = node(&cluster, "A", "A", &["A", "B"], &[("doc.txt", "original")]);
    let mut b = node(&cluster, "B", "A", &["A", "B"], &[]);
    a.engine.start().await.unwrap();
    b.engine.start().await.unwrap();

    cluster.corrupt("A", Operation::Download);
    let result = b.engine.resolve("doc.txt").await.unwrap();

    assert_eq!(result, None);
    assert!(!b.has_file("doc.txt"));
    assert!(!b.engine.index().await.unwrap().has("doc.txt"));
    assert_eq!(cluster.count("A", Operation::Notify), 0);

    // Once the holder heals, the same path resolves.
    cluster.heal();
    assert!(b.engine.resolve("doc.txt").await.unwrap().is_some());

    b.engine.shutdown().await;
    a.engine.shutdown().await;
}

/// Test: a corrupt table aborts the tick with a decode error, nothing merged
#[tokio::test]
async fn corrupted_query_aborts_tick() {
    let cluster = MockCluster::new();
    let mut a = node(&cluster, "A", "A", &["A", "B"], &[("q.bin", "q")]);
    let mut b = node(&cluster, "B", "A", &["A", "B"], &[]);
    a.engine.start().await.unwrap();
    b.engine.start().await.unwrap();

    cluster.corrupt("A", Operation::QueryIndex);
    let err = b.engine.tick().await.unwrap_err();

    assert!(matches!(err, FingerprintError::Decode { .. }));
    assert!(!err.is_retryable());
    assert!(b.engine.index().await.unwrap().is_empty());

    b.engine.shutdown().await;
    a.engine.shutdown().await;
}

/// Test: a coordinator that rejects reports doesn't fail the fetch
#[tokio::test]
async fn rejected_report_does_not_fail_resolve() {
    let cluster = MockCluster::new();
    let mut a = node(&cluster, "A", "A", &["A", "B"], &[("r.bin", "r")]);
    let mut b = node(&cluster, "B", "A", &["A", "B"], &[]);
    a.engine.start().await.unwrap();
    b.engine.start().await.unwrap();

    cluster.force_status("A", Operation::Notify, STATUS_SERVICE_UNAVAILABLE);
    let bytes = b.engine.resolve("r.bin").await.unwrap();

    assert_eq!(bytes.as_deref(), Some(&b"r"[..]));
    assert!(b.has_file("r.bin"));
    assert_eq!(cluster.count("A", Operation::Notify), 1);
    // A never learned about B.
    assert_eq!(a.hosts_of("r.bin").await, vec!["A"]);

    b.engine.shutdown().await;
    a.engine.shutdown().await;
}

/// Test: holders that left the cluster are never contacted
#[tokio::test]
async fn departed_holders_are_not_contacted() {
    let cluster = MockCluster::new();
    let mut b = node(&cluster, "B", "A", &["A", "B"], &[]);
    b.engine.start().await.unwrap();

    let record = FingerprintRecord::new("gone.bin", 1, ["X", "Y"]);
    let result = b.engine.remoting().pull(&record).await;

    assert!(matches!(result, Err(FingerprintError::NoAvailableHost { .. })));
    assert!(cluster.requests().is_empty());

    b.engine.shutdown().await;
}

// =============================================================================
// Cancellation
// =============================================================================

/// Test: dropping a resolve mid-pull leaves no file and no record
#[tokio::test]
async fn cancelled_pull_leaves_no_trace() {
    let cluster = MockCluster::new();
    let mut a = node(&cluster, "A", "A", &["A", "B"], &[("slow.bin", "slow")]);
    let mut b = node(&cluster, "B", "A", &["A", "B"], &[]);
    a.engine.start().await.unwrap();
    b.engine.start().await.unwrap();

    let record = a.engine.index().await.unwrap().get("slow.bin").unwrap();
    cluster.hang("A");

    let outcome = tokio::time::timeout(Duration::from_millis(50), b.engine.remoting().pull(&record)).await;
    assert!(outcome.is_err(), "pull should still be waiting");

    assert!(!b.has_file("slow.bin"));
    assert!(!b.engine.index().await.unwrap().has("slow.bin"));
    let leftovers: Vec<_> = std::fs::read_dir(b.root())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name() != ".fp")
        .collect();
    assert!(leftovers.is_empty());

    b.engine.shutdown().await;
    a.engine.shutdown().await;
}

/// Test: the request timeout bounds a hanging peer
#[tokio::test]
async fn hanging_peer_times_out() {
    let cluster = MockCluster::new();
    let mut b = node(&cluster, "B", "A", &["A", "B"], &[]);
    b.engine.start().await.unwrap();
    cluster.hang("A");

    let start = std::time::Instant::now();
    let err = b.engine.tick().await.unwrap_err();

    assert!(matches!(err, FingerprintError::Transport { .. }));
    assert!(err.to_string().contains("timed out"));
    assert!(start.elapsed() < Duration::from_secs(3));

    b.engine.shutdown().await;
}

// =============================================================================
// Concurrency
// =============================================================================

/// Test: concurrent NOTIFY merges never lose a host
#[tokio::test]
async fn concurrent_notifies_union_every_host() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("hot.bin"), "hot").unwrap();
    let config = IndexConfig {
        root: dir.path().to_path_buf(),
        allow_missing_snapshot: true,
        ..Default::default()
    };
    let index = Arc::new(LocalIndex::initialize(&config, "A", default_checksum()).await.unwrap());
    let service = Arc::new(PeerService::for_index(index.clone()));
    let checksum = Xxh3Checksum.digest(b"hot");

    let mut handles = Vec::new();
    for i in 0..32 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let mut table = FingerprintTable::new();
            table.insert(
                "hot.bin".into(),
                FingerprintRecord::new("hot.bin", checksum, [format!("peer-{}", i)]),
            );
            let body = serde_json::to_vec(&table).unwrap();
            service
                .handle(PeerRequest::new(Operation::Notify).with_body(body))
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(index.get("hot.bin").unwrap().hosts.len(), 33);

    // The snapshot reflects the final state, not an intermediate one.
    index.close();
    let reloaded = LocalIndex::initialize(&config, "A", default_checksum()).await.unwrap();
    assert_eq!(reloaded.get("hot.bin").unwrap().hosts.len(), 33);
}

/// Test: shutdown while the periodic task is backing off completes promptly
#[tokio::test]
async fn shutdown_during_backoff_is_prompt() {
    let cluster = MockCluster::new();
    let dir = tempdir().unwrap();
    let mut config = fingerprint_sync::NodeConfig::for_testing(dir.path());
    config.sync.enabled = true;
    let mut b = common::node_with_config(&cluster, dir, "B", "A", &["A", "B"], config);
    cluster.set_unreachable("A", true);
    b.engine.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let start = std::time::Instant::now();
    b.engine.shutdown().await;

    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(b.has_file(".fp"));
}
