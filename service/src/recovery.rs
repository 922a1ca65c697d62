//! DLQ recovery.
//!
//! Drains each workflow's dead letter queue one message at a time:
//!
//! - `death_count < threshold`: republish to the original queue, history kept
//! - otherwise: alert an operator; for issuance, also give the admitted slot
//!   back to the stock counter
//!
//! A message is acknowledged once handled. If republishing or alerting
//! fails, the message is nacked so the next run pops it first, and draining
//! of that workflow stops. The relational store is never touched.

use async_trait::async_trait;
use coupon_core::alert::{Alert, AlertSender};
use coupon_core::message::{Envelope, Workflow};
use coupon_core::queue::{DeadLetterQueue, Delivery, MessageQueue};
use coupon_core::stock::StockCounter;
use coupon_core::Result;
use coupon_runtime::Job;
use coupon_runtime::metrics::DlqMetrics;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happened to one dead-lettered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Returned to its original queue.
    Requeued,
    /// Reported to an operator.
    Escalated,
}

/// Periodic job draining the DLQs.
pub struct DlqRecoveryJob {
    dlq: Arc<dyn DeadLetterQueue>,
    queue: Arc<dyn MessageQueue>,
    stock: Arc<dyn StockCounter>,
    alerts: Arc<dyn AlertSender>,
    escalation_threshold: u64,
    workflows: Vec<Workflow>,
}

impl DlqRecoveryJob {
    /// Creates a job covering every workflow.
    #[must_use]
    pub fn new(
        dlq: Arc<dyn DeadLetterQueue>,
        queue: Arc<dyn MessageQueue>,
        stock: Arc<dyn StockCounter>,
        alerts: Arc<dyn AlertSender>,
        escalation_threshold: u64,
    ) -> Self {
        Self {
            dlq,
            queue,
            stock,
            alerts,
            escalation_threshold,
            workflows: Workflow::ALL.to_vec(),
        }
    }

    /// Restricts the job to some workflows.
    #[must_use]
    pub fn with_workflows(mut self, workflows: Vec<Workflow>) -> Self {
        self.workflows = workflows;
        self
    }

    /// Drains one workflow's DLQ. Returns how many messages were handled.
    ///
    /// # Errors
    ///
    /// Returns the failure that stopped draining. Messages handled before it
    /// stay acknowledged.
    pub async fn drain(&self, workflow: Workflow) -> Result<u64> {
        let mut handled = 0;
        while let Some(Delivery { envelope, receipt }) = self.dlq.pop(workflow).await? {
            let outcome = match self.recover(&envelope).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    if let Err(nack) = self.dlq.nack_dead_letter(&receipt).await {
                        error!(workflow = %workflow, offset = receipt.offset, error = %nack, "Failed to return dead letter");
                    }
                    return Err(e);
                }
            };
            self.dlq.ack_dead_letter(&receipt).await?;

            match outcome {
                Recovery::Requeued => DlqMetrics::record_requeued(workflow.as_str()),
                Recovery::Escalated => DlqMetrics::record_escalated(workflow.as_str()),
            }
            handled += 1;
        }
        Ok(handled)
    }

    /// Requeues or escalates one message.
    ///
    /// # Errors
    ///
    /// Returns a `Queue` error when republishing or alerting fails.
    pub async fn recover(&self, envelope: &Envelope) -> Result<Recovery> {
        let workflow = envelope.workflow();
        let death_count = envelope.history.death_count;

        if death_count < self.escalation_threshold {
            self.queue.publish(envelope).await?;
            info!(
                workflow = %workflow,
                death_count,
                message = ?envelope.message,
                "Dead-lettered message requeued"
            );
            return Ok(Recovery::Requeued);
        }

        let reason = envelope
            .history
            .last_failure_reason
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let user = envelope
            .message
            .user_id()
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        let unit = envelope
            .message
            .coupon_unit_id()
            .map_or_else(|| "-".to_string(), |id| id.to_string());

        self.alerts
            .send(Alert {
                title: format!("Coupon {workflow} message gave up after {death_count} attempts"),
                body: format!(
                    "payload={:?} user_id={user} coupon_unit_id={unit} death_count={death_count}",
                    envelope.message
                ),
                reason: reason.clone(),
            })
            .await?;

        error!(
            workflow = %workflow,
            death_count,
            user_id = %user,
            coupon_unit_id = %unit,
            reason = %reason,
            "Dead-lettered message escalated"
        );

        if workflow == Workflow::Issuance {
            if let Some(unit_id) = envelope.message.coupon_unit_id() {
                match self.stock.increment(unit_id).await {
                    Ok(value) => debug!(coupon_unit_id = %unit_id, counter = ?value, "Stock counter restored"),
                    Err(e) => error!(coupon_unit_id = %unit_id, error = %e, "Failed to restore stock counter"),
                }
            }
        }

        Ok(Recovery::Escalated)
    }
}

#[async_trait]
impl Job for DlqRecoveryJob {
    fn name(&self) -> &str {
        "dlq-recovery"
    }

    async fn run(&self) -> Result<u64> {
        let mut handled = 0;
        let mut first_error = None;

        for workflow in &self.workflows {
            match self.drain(*workflow).await {
                Ok(count) => handled += count,
                Err(e) => {
                    warn!(workflow = %workflow, error = %e, "DLQ draining stopped");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if handled == 0 => Err(e),
            _ => Ok(handled),
        }
    }
}
