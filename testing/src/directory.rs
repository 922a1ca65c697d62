//! Alert recording and member directory fakes.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use chrono::{Datelike, NaiveDate};
use coupon_core::alert::{Alert, AlertSender};
use coupon_core::directory::MemberDirectory;
use coupon_core::ids::UserId;
use coupon_core::{BoxFuture, CouponError, Result};
use std::sync::{Arc, RwLock};

/// Alert sender that records every alert.
#[derive(Debug, Clone, Default)]
pub struct RecordingAlertSender {
    alerts: Arc<RwLock<Vec<Alert>>>,
    failing: Arc<RwLock<bool>>,
}

impl RecordingAlertSender {
    /// Create a sender with no recorded alerts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts sent so far.
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().unwrap().clone()
    }

    /// Make sending fail.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.write().unwrap() = failing;
    }
}

impl AlertSender for RecordingAlertSender {
    fn send(&self, alert: Alert) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if *self.failing.read().unwrap() {
                return Err(CouponError::queue("alert webhook unreachable"));
            }
            self.alerts.write().unwrap().push(alert);
            Ok(())
        })
    }
}

/// Member directory holding birth dates in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMemberDirectory {
    members: Arc<RwLock<Vec<(UserId, NaiveDate)>>>,
}

impl InMemoryMemberDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a member's birth date.
    pub fn add_member(&self, user_id: UserId, born_on: NaiveDate) {
        self.members.write().unwrap().push((user_id, born_on));
    }
}

impl MemberDirectory for InMemoryMemberDirectory {
    fn birthdays_on(&self, month: u32, day: u32) -> BoxFuture<'_, Result<Vec<UserId>>> {
        Box::pin(async move {
            Ok(self
                .members
                .read()
                .unwrap()
                .iter()
                .filter(|(_, born)| born.month() == month && born.day() == day)
                .map(|(user, _)| *user)
                .collect())
        })
    }
}
