//! Expiration batch.
//!
//! Marks `NotUsed` coupons past their end as `Expired`. Two strategies:
//!
//! - **Chunked**: keyset pages on `id`, each expired in memory and committed
//!   in its own transaction. A chunk that keeps failing after its retries is
//!   skipped and picked up by the next run.
//! - **Bulk**: one conditional `UPDATE` for everything due.
//!
//! Wrap the job in a [`coupon_runtime::LockedJob`] so one node runs it at a time.

use crate::config::ExpirationStrategy;
use async_trait::async_trait;
use coupon_core::environment::Clock;
use coupon_core::member_coupon::MemberCoupon;
use coupon_core::store::CouponStore;
use coupon_core::Result;
use coupon_runtime::metrics::ExpirationMetrics;
use coupon_runtime::{Job, RetryPolicy, retry_transient};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Scheduled expiration of member coupons.
pub struct ExpirationJob {
    store: Arc<dyn CouponStore>,
    clock: Arc<dyn Clock>,
    strategy: ExpirationStrategy,
    chunk_size: u32,
    retry: RetryPolicy,
}

impl ExpirationJob {
    /// Creates the job. Chunks are retried `max_chunk_retries` times with
    /// exponential backoff starting at 200ms.
    #[must_use]
    pub fn new(
        store: Arc<dyn CouponStore>,
        clock: Arc<dyn Clock>,
        strategy: ExpirationStrategy,
        chunk_size: u32,
        max_chunk_retries: u32,
    ) -> Self {
        Self {
            store,
            clock,
            strategy,
            chunk_size: chunk_size.max(1),
            retry: RetryPolicy::builder()
                .max_retries(max_chunk_retries as usize)
                .initial_delay(Duration::from_millis(200))
                .max_delay(Duration::from_secs(10))
                .build(),
        }
    }

    /// Replaces the chunk retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Expires everything due at the clock's current time. Returns rows updated.
    ///
    /// # Errors
    ///
    /// Returns a `Database` error when the candidates cannot be read, or the
    /// bulk update fails after its retries.
    pub async fn expire_due(&self) -> Result<u64> {
        let now = self.clock.now();
        let expired = match self.strategy {
            ExpirationStrategy::Chunked => self.expire_chunked(now).await?,
            ExpirationStrategy::Bulk => {
                let store = Arc::clone(&self.store);
                retry_transient(self.retry.clone(), || {
                    let store = Arc::clone(&store);
                    async move { store.expire_all_due(now).await }
                })
                .await?
            }
        };

        ExpirationMetrics::record_expired(expired);
        info!(strategy = %self.strategy, expired, "Expiration batch finished");
        Ok(expired)
    }

    async fn expire_chunked(&self, now: chrono::DateTime<chrono::Utc>) -> Result<u64> {
        let mut cursor = None;
        let mut expired = 0;

        loop {
            let store = Arc::clone(&self.store);
            let chunk = retry_transient(self.retry.clone(), || {
                let store = Arc::clone(&store);
                async move { store.find_expirable(now, cursor, self.chunk_size).await }
            })
            .await?;

            let Some(last) = chunk.last().map(|c| c.id) else {
                break;
            };
            let full = chunk.len() == self.chunk_size as usize;

            let transitioned: Vec<MemberCoupon> = chunk
                .into_iter()
                .filter_map(|mut coupon| match coupon.expire() {
                    Ok(()) => Some(coupon),
                    Err(e) => {
                        warn!(member_coupon_id = %coupon.id, error = %e, "Skipping coupon that cannot expire");
                        None
                    }
                })
                .collect();

            let store = Arc::clone(&self.store);
            let saved = retry_transient(self.retry.clone(), || {
                let store = Arc::clone(&store);
                let transitioned = transitioned.clone();
                async move { store.save_expired(&transitioned).await }
            })
            .await;

            match saved {
                Ok(count) => {
                    debug!(after = ?cursor, count, "Expired chunk");
                    expired += count;
                }
                Err(e) => {
                    ExpirationMetrics::record_chunk_failure();
                    error!(
                        after = ?cursor,
                        last = %last,
                        error = %e,
                        "Expiration chunk abandoned after retries"
                    );
                }
            }

            cursor = Some(last);
            if !full {
                break;
            }
        }

        Ok(expired)
    }
}

#[async_trait]
impl Job for ExpirationJob {
    fn name(&self) -> &str {
        "coupon-expiration"
    }

    async fn run(&self) -> Result<u64> {
        self.expire_due().await
    }
}
