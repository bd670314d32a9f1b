// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Load shaping for outbound peer traffic.
//!
//! Two knobs keep a converging node from flooding its peers:
//!
//! - [`DownloadPacer`] spaces out anti-entropy downloads with a token bucket
//!   (`sync.download_rate_per_sec`, burst equal to the rate).
//! - [`ReportSlots`] caps how many NOTIFY pushes are in flight at once
//!   (`remoting.max_parallel_reports`).
//!
//! On-demand resolution bypasses the pacer: a caller waiting on a file
//! shouldn't queue behind background catch-up.

use crate::metrics;
use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Token bucket pacing background downloads.
pub struct DownloadPacer {
    bucket: DirectLimiter,
    rate_per_sec: NonZeroU32,
}

impl DownloadPacer {
    /// A pacer allowing `rate` downloads per second. `None` when `rate` is 0,
    /// meaning downloads run unpaced.
    pub fn per_second(rate: u32) -> Option<Self> {
        let rate_per_sec = NonZeroU32::new(rate)?;
        Some(Self {
            bucket: RateLimiter::direct(Quota::per_second(rate_per_sec).allow_burst(rate_per_sec)),
            rate_per_sec,
        })
    }

    /// Wait for the next download slot and return how long that took.
    /// Dropping the future gives up the wait without consuming a token.
    pub async fn wait(&self) -> Duration {
        let started = Instant::now();
        self.bucket.until_ready().await;
        let waited = started.elapsed();
        if !waited.is_zero() {
            trace!(waited_ms = waited.as_millis() as u64, "Download paced");
        }
        metrics::record_download_wait(waited);
        waited
    }

    pub fn rate_per_sec(&self) -> u32 {
        self.rate_per_sec.get()
    }
}

impl std::fmt::Debug for DownloadPacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadPacer")
            .field("rate_per_sec", &self.rate_per_sec)
            .finish()
    }
}

/// Bounded pool of concurrent report pushes.
///
/// Slots are owned permits so they can travel into joined futures; a slot is
/// returned when its permit drops.
#[derive(Debug, Clone)]
pub struct ReportSlots {
    semaphore: Arc<Semaphore>,
}

impl ReportSlots {
    /// At most `limit` pushes at once (0 is treated as 1).
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit.max(1))),
        }
    }

    /// Wait for a free slot. `None` only if the pool was closed.
    pub async fn claim(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).acquire_owned().await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn try_take(pacer: &DownloadPacer) -> bool {
        pacer.bucket.check().is_ok()
    }

    fn try_claim(slots: &ReportSlots) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&slots.semaphore).try_acquire_owned().ok()
    }

    #[test]
    fn test_zero_rate_means_unpaced() {
        assert!(DownloadPacer::per_second(0).is_none());
    }

    #[test]
    fn test_pacer_allows_one_second_of_burst() {
        let pacer = DownloadPacer::per_second(3).unwrap();
        assert_eq!(pacer.rate_per_sec(), 3);

        assert!(try_take(&pacer));
        assert!(try_take(&pacer));
        assert!(try_take(&pacer));
        assert!(!try_take(&pacer), "fourth download within the second must wait");
    }

    #[tokio::test]
    async fn test_pacer_wait_is_immediate_within_burst() {
        let pacer = DownloadPacer::per_second(1000).unwrap();
        let waited = pacer.wait().await;
        assert!(waited < Duration::from_millis(50));
    }

    #[test]
    fn test_report_slots_are_returned_on_drop() {
        let slots = ReportSlots::new(2);

        let first = try_claim(&slots);
        let second = try_claim(&slots);
        assert!(first.is_some() && second.is_some());
        assert_eq!(slots.semaphore.available_permits(), 0);
        assert!(try_claim(&slots).is_none());

        drop(first);
        assert_eq!(slots.semaphore.available_permits(), 1);
    }

    #[test]
    fn test_report_slots_floor_is_one() {
        let slots = ReportSlots::new(0);
        assert_eq!(slots.semaphore.available_permits(), 1);
        assert!(try_claim(&slots).is_some());
    }

    #[tokio::test]
    async fn test_claim_waits_for_a_free_slot() {
        let slots = ReportSlots::new(1);
        let held = slots.claim().await.unwrap();

        let contender = slots.clone();
        let waiter = tokio::spawn(async move {
            let started = Instant::now();
            let _slot = contender.claim().await;
            started.elapsed()
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);

        assert!(waiter.await.unwrap() >= Duration::from_millis(40));
    }
}
