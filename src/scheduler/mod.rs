//! Domain-aware concurrency scheduler.
//!
//! Bounds in-flight requests twice over: a global slot count for the whole
//! process and a per-host slot count that keeps any single origin from
//! seeing a burst. Hosts that accumulate errors or CAPTCHAs are adaptively
//! clamped to one slot for the remainder of the run.

use dashmap::{DashMap, DashSet};
use log::{info, warn};
use parking_lot::RwLock;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::utils::HOST_CLAMP_THRESHOLD;

/// RAII pair of permits; dropping releases both slots.
pub struct SchedulerPermit {
    _global: OwnedSemaphorePermit,
    _host: OwnedSemaphorePermit,
}

/// Global + per-host concurrency limiter with jitter and adaptive clamp.
///
/// Per-host semaphores are created lazily. Clamping swaps in a fresh
/// one-permit semaphore: holders already past acquisition keep permits of
/// the retired instance and release them harmlessly, so shrinking a live
/// limit can never dead-lock.
pub struct DomainScheduler {
    global: RwLock<(usize, Arc<Semaphore>)>,
    hosts: DashMap<String, Arc<Semaphore>>,
    host_slots: DashMap<String, usize>,
    default_host_slots: usize,
    strikes: DashMap<String, AtomicU32>,
    clamped: DashSet<String>,
    clamp_threshold: u32,
    jitter_range_secs: Option<(f64, f64)>,
}

impl DomainScheduler {
    /// Create a scheduler with `global_slots` total slots and
    /// `default_host_slots` per host. `overrides` pins specific hosts to a
    /// different slot count (e.g. 1 for search engines).
    #[must_use]
    pub fn new(
        global_slots: usize,
        default_host_slots: usize,
        overrides: impl IntoIterator<Item = (String, usize)>,
        jitter_range_secs: Option<(f64, f64)>,
    ) -> Self {
        let global_slots = global_slots.max(1);
        let host_slots = DashMap::new();
        for (host, slots) in overrides {
            host_slots.insert(host, slots.max(1));
        }
        Self {
            global: RwLock::new((global_slots, Arc::new(Semaphore::new(global_slots)))),
            hosts: DashMap::new(),
            host_slots,
            default_host_slots: default_host_slots.max(1),
            strikes: DashMap::new(),
            clamped: DashSet::new(),
            clamp_threshold: HOST_CLAMP_THRESHOLD,
            jitter_range_secs,
        }
    }

    /// Block until both a global slot and a host slot are free, then sleep
    /// the configured jitter. Returns an RAII permit releasing both.
    pub async fn acquire(&self, host: &str) -> SchedulerPermit {
        let global_sem = self.global.read().1.clone();
        let global = acquire_owned(global_sem, "global").await;

        let host_sem = self
            .hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.slots_for(host))))
            .clone();
        let host_permit = acquire_owned(host_sem, host).await;

        if let Some((lo, hi)) = self.jitter_range_secs
            && hi > 0.0
        {
            let jitter = rand::rng().random_range(lo..=hi);
            tokio::time::sleep(Duration::from_secs_f64(jitter)).await;
        }

        SchedulerPermit {
            _global: global,
            _host: host_permit,
        }
    }

    /// Record a transport error against `host`, clamping it once the
    /// combined error+CAPTCHA count reaches the threshold.
    pub fn record_error(&self, host: &str) {
        self.strike(host);
    }

    /// Record a CAPTCHA sighting against `host`.
    pub fn record_captcha(&self, host: &str) {
        self.strike(host);
    }

    /// Halve the global slot count for the remainder of the run.
    ///
    /// Used by the batch guardrail. Holders past acquisition keep permits
    /// of the retired semaphore; only new acquisitions see the lower limit.
    pub fn halve_global(&self) {
        let mut guard = self.global.write();
        let new_limit = (guard.0 / 2).max(1);
        if new_limit < guard.0 {
            warn!(
                "Guardrail: reducing global concurrency {} -> {}",
                guard.0, new_limit
            );
            *guard = (new_limit, Arc::new(Semaphore::new(new_limit)));
        }
    }

    /// Current global slot count (after any guardrail reduction).
    #[must_use]
    pub fn global_limit(&self) -> usize {
        self.global.read().0
    }

    /// Configured slot count for `host`, accounting for the adaptive clamp.
    #[must_use]
    pub fn slots_for(&self, host: &str) -> usize {
        if self.clamped.contains(host) {
            return 1;
        }
        self.host_slots
            .get(host)
            .map(|entry| *entry.value())
            .unwrap_or(self.default_host_slots)
    }

    fn strike(&self, host: &str) {
        let count = {
            let entry = self
                .strikes
                .entry(host.to_string())
                .or_insert_with(|| AtomicU32::new(0));
            entry.value().fetch_add(1, Ordering::Relaxed) + 1
        };

        if count >= self.clamp_threshold && self.clamped.insert(host.to_string()) {
            info!(
                "Adaptive clamp: host {host} reduced to 1 slot after {count} error/CAPTCHA strikes"
            );
            // Replace the live semaphore; in-flight permits of the old one
            // drain without touching the new limit.
            self.hosts
                .insert(host.to_string(), Arc::new(Semaphore::new(1)));
        }
    }
}

/// Acquire an owned permit, replacing the semaphore reference on the
/// never-expected closed case rather than panicking mid-run.
async fn acquire_owned(sem: Arc<Semaphore>, label: &str) -> OwnedSemaphorePermit {
    loop {
        match sem.clone().acquire_owned().await {
            Ok(permit) => return permit,
            Err(_) => {
                warn!("Semaphore for {label} was closed unexpectedly - retrying");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(global: usize, per_host: usize) -> DomainScheduler {
        DomainScheduler::new(global, per_host, Vec::new(), None)
    }

    #[tokio::test]
    async fn host_cap_blocks_additional_acquisitions() {
        let sched = Arc::new(scheduler(8, 2));

        let _a = sched.acquire("x.test").await;
        let _b = sched.acquire("x.test").await;

        let sched2 = Arc::clone(&sched);
        let third = tokio::time::timeout(Duration::from_millis(50), async move {
            sched2.acquire("x.test").await
        })
        .await;
        assert!(third.is_err(), "third acquisition must block at cap 2");

        // A different host is unaffected.
        let _c = sched.acquire("y.test").await;
    }

    #[tokio::test]
    async fn release_frees_slots() {
        let sched = scheduler(8, 1);
        {
            let _p = sched.acquire("x.test").await;
        }
        // Permit dropped: next acquire completes promptly.
        let again = tokio::time::timeout(Duration::from_millis(100), sched.acquire("x.test")).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn clamp_reduces_host_to_one_slot() {
        let sched = Arc::new(scheduler(16, 4));
        for _ in 0..HOST_CLAMP_THRESHOLD {
            sched.record_error("bad.test");
        }
        assert_eq!(sched.slots_for("bad.test"), 1);
        assert_eq!(sched.slots_for("good.test"), 4);

        let _one = sched.acquire("bad.test").await;
        let sched2 = Arc::clone(&sched);
        let second = tokio::time::timeout(Duration::from_millis(50), async move {
            sched2.acquire("bad.test").await
        })
        .await;
        assert!(second.is_err(), "clamped host allows only one in flight");
    }

    #[tokio::test]
    async fn clamp_does_not_deadlock_existing_holders() {
        let sched = Arc::new(scheduler(16, 4));
        let held = sched.acquire("busy.test").await;

        for _ in 0..HOST_CLAMP_THRESHOLD {
            sched.record_captcha("busy.test");
        }

        // Holder releases a permit of the retired semaphore; the clamped
        // semaphore still hands out its single permit.
        drop(held);
        let after = tokio::time::timeout(Duration::from_millis(100), sched.acquire("busy.test")).await;
        assert!(after.is_ok());
    }

    #[tokio::test]
    async fn halve_global_lowers_limit() {
        let sched = scheduler(16, 4);
        assert_eq!(sched.global_limit(), 16);
        sched.halve_global();
        assert_eq!(sched.global_limit(), 8);
        sched.halve_global();
        assert_eq!(sched.global_limit(), 4);
    }

    #[tokio::test]
    async fn override_host_gets_configured_slots() {
        let sched = DomainScheduler::new(
            16,
            4,
            vec![("www.google.com".to_string(), 1)],
            None,
        );
        assert_eq!(sched.slots_for("www.google.com"), 1);
        assert_eq!(sched.slots_for("example.com"), 4);
    }
}
