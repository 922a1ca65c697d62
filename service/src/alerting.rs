//! Alert delivery.

use coupon_core::alert::{Alert, AlertSender};
use coupon_core::{BoxFuture, Result};
use tracing::error;

/// Emits alerts as `error` events on the `coupon::alert` target, where the
/// log pipeline routes them to the on-call channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAlertSender;

impl AlertSender for LoggingAlertSender {
    fn send(&self, alert: Alert) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            error!(
                target: "coupon::alert",
                title = %alert.title,
                reason = %alert.reason,
                body = %alert.body,
                "Operator alert"
            );
            Ok(())
        })
    }
}
