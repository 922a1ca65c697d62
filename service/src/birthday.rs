//! Birthday coupon campaign.
//!
//! Once a day, asks the member directory whose birthday it is and queues one
//! `BirthdayCouponRequested` per member. Issuance itself happens in the
//! birthday workflow consumer, where duplicates are rejected by the store,
//! so a run repeated on the same day is harmless.
//!
//! Members born on February 29 are included on February 28 in common years.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use coupon_core::directory::MemberDirectory;
use coupon_core::environment::Clock;
use coupon_core::ids::UserId;
use coupon_core::message::{CouponMessage, Envelope};
use coupon_core::queue::MessageQueue;
use coupon_core::Result;
use coupon_runtime::Job;
use std::sync::Arc;
use tracing::{error, info};

/// Scheduled job queuing today's birthday coupons.
pub struct BirthdayIssuanceJob {
    directory: Arc<dyn MemberDirectory>,
    queue: Arc<dyn MessageQueue>,
    clock: Arc<dyn Clock>,
}

impl BirthdayIssuanceJob {
    /// Creates the job.
    #[must_use]
    pub fn new(
        directory: Arc<dyn MemberDirectory>,
        queue: Arc<dyn MessageQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            directory,
            queue,
            clock,
        }
    }

    async fn celebrants(&self, today: NaiveDate) -> Result<Vec<UserId>> {
        let mut users = self.directory.birthdays_on(today.month(), today.day()).await?;

        let leap_day_skipped = today.month() == 2
            && today.day() == 28
            && NaiveDate::from_ymd_opt(today.year(), 2, 29).is_none();
        if leap_day_skipped {
            users.extend(self.directory.birthdays_on(2, 29).await?);
        }

        users.sort_unstable();
        users.dedup();
        Ok(users)
    }
}

#[async_trait]
impl Job for BirthdayIssuanceJob {
    fn name(&self) -> &str {
        "birthday-coupons"
    }

    async fn run(&self) -> Result<u64> {
        let today = self.clock.now().date_naive();
        let users = self.celebrants(today).await?;

        let mut queued = 0;
        let mut first_error = None;
        for user_id in users {
            let envelope = Envelope::new(CouponMessage::BirthdayCouponRequested {
                user_id,
                year: today.year(),
            });
            match self.queue.publish(&envelope).await {
                Ok(()) => queued += 1,
                Err(e) => {
                    error!(user_id = %user_id, error = %e, "Failed to queue birthday coupon");
                    first_error.get_or_insert(e);
                }
            }
        }

        info!(date = %today, queued, "Birthday coupons queued");
        // A failed publish fails the run; the next run requeues everyone
        match first_error {
            Some(e) => Err(e),
            None => Ok(queued),
        }
    }
}
