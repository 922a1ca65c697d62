//! Integration tests for lock-guarded jobs
//!
//! Two `LockedJob`s share one in-memory lock and a controllable clock, the
//! way two nodes share the Redis lock in production.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use coupon_core::environment::Clock;
use coupon_core::lock::DistributedLock;
use coupon_core::{CouponError, Result};
use coupon_runtime::{Job, LockBounds, LockedJob, LockedRun};
use coupon_testing::{ControllableClock, InMemoryLock, test_time};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const LOCK_NAME: &str = "job-lock:counting";

/// Counts its runs; optionally fails or moves the clock forward while running.
struct CountingJob {
    runs: AtomicU64,
    fail: bool,
    clock: Arc<ControllableClock>,
    takes: ChronoDuration,
}

impl CountingJob {
    fn new(clock: &Arc<ControllableClock>) -> Arc<Self> {
        Self::with(clock, false, ChronoDuration::zero())
    }

    fn with(clock: &Arc<ControllableClock>, fail: bool, takes: ChronoDuration) -> Arc<Self> {
        Arc::new(Self {
            runs: AtomicU64::new(0),
            fail,
            clock: Arc::clone(clock),
            takes,
        })
    }

    fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Job for CountingJob {
    fn name(&self) -> &str {
        "counting"
    }

    async fn run(&self) -> Result<u64> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        self.clock.advance(self.takes);
        if self.fail {
            return Err(CouponError::database("connection reset"));
        }
        Ok(run)
    }
}

struct Node {
    clock: Arc<ControllableClock>,
    lock: InMemoryLock,
}

impl Node {
    fn new() -> Self {
        let clock = Arc::new(ControllableClock::new(test_time()));
        let lock = InMemoryLock::new(Arc::clone(&clock) as Arc<dyn Clock>);
        Self { clock, lock }
    }

    fn locked(&self, job: Arc<CountingJob>) -> LockedJob {
        LockedJob::new(
            job,
            Arc::new(self.lock.clone()),
            Arc::clone(&self.clock) as Arc<dyn Clock>,
            LockBounds {
                at_least: Duration::from_secs(30),
                at_most: Duration::from_secs(600),
            },
        )
    }
}

#[tokio::test]
async fn test_second_node_skips_while_lock_is_held() {
    let node = Node::new();
    let job = CountingJob::new(&node.clock);
    let first = node.locked(Arc::clone(&job));
    let second = node.locked(Arc::clone(&job));

    assert_eq!(first.run_locked().await.unwrap(), LockedRun::Completed(1));
    // A fast run keeps the lock for the at_least floor
    assert!(node.lock.is_held(LOCK_NAME));
    assert_eq!(second.run_locked().await.unwrap(), LockedRun::Skipped);
    assert_eq!(job.runs(), 1);
}

#[tokio::test]
async fn test_at_least_floor_expires() {
    let node = Node::new();
    let job = CountingJob::new(&node.clock);
    let locked = node.locked(Arc::clone(&job));

    locked.run_locked().await.unwrap();
    assert_eq!(
        node.lock.expires_at(LOCK_NAME),
        Some(test_time() + ChronoDuration::seconds(30))
    );

    node.clock.advance(ChronoDuration::seconds(31));
    assert_eq!(locked.run_locked().await.unwrap(), LockedRun::Completed(2));
}

#[tokio::test]
async fn test_long_run_releases_immediately() {
    let node = Node::new();
    let job = CountingJob::with(&node.clock, false, ChronoDuration::seconds(45));
    let locked = node.locked(Arc::clone(&job));

    locked.run_locked().await.unwrap();

    assert!(!node.lock.is_held(LOCK_NAME));
    assert_eq!(locked.run_locked().await.unwrap(), LockedRun::Completed(2));
}

#[tokio::test]
async fn test_failed_run_still_releases_with_floor() {
    let node = Node::new();
    let job = CountingJob::with(&node.clock, true, ChronoDuration::zero());
    let locked = node.locked(Arc::clone(&job));

    assert!(locked.run_locked().await.is_err());
    assert_eq!(
        node.lock.expires_at(LOCK_NAME),
        Some(test_time() + ChronoDuration::seconds(30))
    );
}

#[tokio::test]
async fn test_unavailable_lock_fails_without_running() {
    let node = Node::new();
    node.lock.set_unavailable(true);
    let job = CountingJob::new(&node.clock);
    let locked = node.locked(Arc::clone(&job));

    let err = locked.run_locked().await.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(job.runs(), 0);
}

#[tokio::test]
async fn test_job_trait_reports_skip_as_zero() {
    let node = Node::new();
    let job = CountingJob::new(&node.clock);
    let locked = node.locked(Arc::clone(&job));
    let lease = node
        .lock
        .try_acquire(LOCK_NAME, Duration::from_secs(600))
        .await
        .unwrap();
    assert!(lease.is_some());

    assert_eq!(Job::run(&locked).await.unwrap(), 0);
    assert_eq!(locked.name(), "counting");
}
