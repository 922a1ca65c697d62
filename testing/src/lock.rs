//! In-memory distributed lock.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, Utc};
use coupon_core::environment::Clock;
use coupon_core::lock::{DistributedLock, LockLease};
use coupon_core::{BoxFuture, CouponError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Held {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Lock table whose TTLs are measured on the injected clock.
#[derive(Clone)]
pub struct InMemoryLock {
    held: Arc<RwLock<HashMap<String, Held>>>,
    clock: Arc<dyn Clock>,
    tokens: Arc<AtomicU64>,
    unavailable: Arc<RwLock<bool>>,
}

impl InMemoryLock {
    /// Create an empty lock table.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            held: Arc::new(RwLock::new(HashMap::new())),
            clock,
            tokens: Arc::new(AtomicU64::new(0)),
            unavailable: Arc::new(RwLock::new(false)),
        }
    }

    /// Whether `name` is held and unexpired at the clock's current time.
    #[must_use]
    pub fn is_held(&self, name: &str) -> bool {
        let now = self.clock.now();
        self.held
            .read()
            .unwrap()
            .get(name)
            .is_some_and(|held| held.expires_at > now)
    }

    /// When the current hold of `name` expires.
    #[must_use]
    pub fn expires_at(&self, name: &str) -> Option<DateTime<Utc>> {
        self.held.read().unwrap().get(name).map(|h| h.expires_at)
    }

    /// Make every operation fail with a `Lock` error.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().unwrap() = unavailable;
    }

    fn check_available(&self) -> Result<()> {
        if *self.unavailable.read().unwrap() {
            return Err(CouponError::lock("connection refused"));
        }
        Ok(())
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl DistributedLock for InMemoryLock {
    fn try_acquire(
        &self,
        name: &str,
        at_most: Duration,
    ) -> BoxFuture<'_, Result<Option<LockLease>>> {
        let name = name.to_string();
        Box::pin(async move {
            self.check_available()?;
            let now = self.clock.now();
            let mut held = self.held.write().unwrap();

            if held.get(&name).is_some_and(|h| h.expires_at > now) {
                return Ok(None);
            }

            let token = format!("token-{}", self.tokens.fetch_add(1, Ordering::SeqCst));
            held.insert(
                name.clone(),
                Held {
                    token: token.clone(),
                    expires_at: expiry(now, at_most),
                },
            );
            Ok(Some(LockLease {
                name,
                token,
                acquired_at: now,
            }))
        })
    }

    fn release(&self, lease: LockLease, hold_for: Duration) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.check_available()?;
            let now = self.clock.now();
            let mut held = self.held.write().unwrap();

            let owned = held
                .get(&lease.name)
                .is_some_and(|h| h.token == lease.token && h.expires_at > now);
            if !owned {
                return Ok(());
            }

            if hold_for.is_zero() {
                held.remove(&lease.name);
            } else if let Some(h) = held.get_mut(&lease.name) {
                h.expires_at = expiry(now, hold_for);
            }
            Ok(())
        })
    }
}
