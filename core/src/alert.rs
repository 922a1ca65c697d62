//! Operator alerting.

use crate::BoxFuture;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Notification for a human operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Short title.
    pub title: String,
    /// Details (payload, identifiers).
    pub body: String,
    /// Failure reason that caused the alert.
    pub reason: String,
}

/// Delivers alerts. The transport (webhook, pager) is up to the implementation.
pub trait AlertSender: Send + Sync {
    /// Sends an alert.
    ///
    /// # Errors
    ///
    /// Returns an infrastructure error if the transport fails.
    fn send(&self, alert: Alert) -> BoxFuture<'_, Result<()>>;
}
