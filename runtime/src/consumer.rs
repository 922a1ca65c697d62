//! Workflow queue consumer with local retries and dead-lettering.
//!
//! ```text
//! loop {
//!     subscribe(workflow)
//!     for delivery in stream {
//!         retry handler on infrastructure errors (bounded, with backoff)
//!         ok            -> ack
//!         business err  -> compensate, ack
//!         retries spent -> dead_letter(death_count + 1), ack
//!         dlq down      -> nack
//!     }
//!     reconnect after delay
//! }
//! ```
//!
//! Every delivery ends acknowledged except when dead-lettering itself fails.
//! That message is nacked: it comes back on the stream, and acks of later
//! messages do not commit past it.

use crate::metrics::FulfillmentMetrics;
use crate::retry::{RetryPolicy, retry_transient};
use async_trait::async_trait;
use coupon_core::message::{Envelope, Workflow};
use coupon_core::queue::{DeadLetterQueue, Delivery, DeliveryStream, MessageQueue};
use coupon_core::{CouponError, Result};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Processes messages of one workflow.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles one message.
    ///
    /// Must be idempotent: delivery is at-least-once.
    ///
    /// # Errors
    ///
    /// Infrastructure errors are retried and eventually dead-lettered. Any
    /// other error is final and leads to [`MessageHandler::compensate`].
    async fn handle(&self, envelope: &Envelope) -> Result<()>;

    /// Undoes side effects of an admitted request that will never complete.
    ///
    /// # Errors
    ///
    /// Failures are logged; the message is acknowledged regardless.
    async fn compensate(&self, _envelope: &Envelope, _error: &CouponError) -> Result<()> {
        Ok(())
    }
}

/// How a delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Handled successfully.
    Completed,
    /// Rejected with a business error and compensated.
    Rejected(CouponError),
    /// Moved to the DLQ after exhausting local retries.
    DeadLettered(CouponError),
    /// Could not be dead-lettered; returned to the queue.
    Abandoned(CouponError),
}

impl Settlement {
    const fn label(&self) -> &'static str {
        match self {
            Self::Completed => "success",
            Self::Rejected(_) => "rejected",
            Self::DeadLettered(_) => "dead_lettered",
            Self::Abandoned(_) => "abandoned",
        }
    }
}

/// Long-running consumer of one workflow queue.
pub struct QueueConsumer {
    workflow: Workflow,
    queue: Arc<dyn MessageQueue>,
    dlq: Arc<dyn DeadLetterQueue>,
    handler: Arc<dyn MessageHandler>,
    shutdown: broadcast::Receiver<()>,
    retry: RetryPolicy,
    reconnect_delay: Duration,
}

impl QueueConsumer {
    /// Create a consumer with three delivery attempts and a 5 second
    /// reconnect delay.
    #[must_use]
    pub fn new(
        workflow: Workflow,
        queue: Arc<dyn MessageQueue>,
        dlq: Arc<dyn DeadLetterQueue>,
        handler: Arc<dyn MessageHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            workflow,
            queue,
            dlq,
            handler,
            shutdown,
            retry: RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(200))
                .max_delay(Duration::from_secs(5))
                .jitter(true)
                .build(),
            reconnect_delay: Duration::from_secs(5),
        }
    }

    /// Set the local retry policy applied to infrastructure errors.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the delay before resubscribing after the stream ends or fails.
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Spawn the consumer as a background task that runs until shutdown.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(workflow = %self.workflow, "Queue consumer started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(workflow = %self.workflow, "Queue consumer received shutdown signal");
                    break;
                }
                subscribe_result = self.queue.subscribe(self.workflow) => {
                    match subscribe_result {
                        Ok(mut stream) => {
                            info!(workflow = %self.workflow, "Subscribed to queue");
                            if self.process_stream(&mut stream).await {
                                break;
                            }
                            warn!(
                                workflow = %self.workflow,
                                "Queue stream ended, reconnecting in {:?}",
                                self.reconnect_delay
                            );
                        }
                        Err(e) => {
                            error!(
                                workflow = %self.workflow,
                                error = %e,
                                "Failed to subscribe, retrying in {:?}",
                                self.reconnect_delay
                            );
                        }
                    }
                    tokio::select! {
                        _ = self.shutdown.recv() => break,
                        () = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }

        info!(workflow = %self.workflow, "Queue consumer stopped");
    }

    /// Returns `true` when stopped by a shutdown signal.
    async fn process_stream(&mut self, stream: &mut DeliveryStream) -> bool {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(workflow = %self.workflow, "Shutdown signal received during processing");
                    return true;
                }
                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        self.settle(delivery).await;
                    }
                    Some(Err(e)) => {
                        error!(workflow = %self.workflow, error = %e, "Error receiving from queue");
                    }
                    None => return false,
                }
            }
        }
    }

    /// Handles one delivery to completion and acknowledges it.
    pub async fn settle(&self, delivery: Delivery) -> Settlement {
        let started = Instant::now();
        let Delivery { envelope, receipt } = delivery;
        let handler = Arc::clone(&self.handler);

        let outcome = retry_transient(self.retry.clone(), || {
            let handler = Arc::clone(&handler);
            let envelope = envelope.clone();
            async move { handler.handle(&envelope).await }
        })
        .await;

        let settlement = match outcome {
            Ok(()) => {
                debug!(workflow = %self.workflow, message = ?envelope.message, "Message handled");
                Settlement::Completed
            }
            Err(err) if !err.is_retryable() => {
                warn!(
                    workflow = %self.workflow,
                    message = ?envelope.message,
                    error = %err,
                    "Message rejected, compensating"
                );
                if let Err(comp) = self.handler.compensate(&envelope, &err).await {
                    error!(
                        workflow = %self.workflow,
                        message = ?envelope.message,
                        error = %comp,
                        "Compensation failed"
                    );
                }
                Settlement::Rejected(err)
            }
            Err(err) => self.dead_letter(&envelope, err).await,
        };

        let settled = match settlement {
            Settlement::Abandoned(_) => self.queue.nack(&receipt).await,
            _ => self.queue.ack(&receipt).await,
        };
        if let Err(e) = settled {
            error!(
                workflow = %self.workflow,
                partition = receipt.partition,
                offset = receipt.offset,
                error = %e,
                "Failed to settle message with the broker"
            );
        }

        FulfillmentMetrics::record(self.workflow.as_str(), settlement.label(), started.elapsed());
        settlement
    }

    async fn dead_letter(&self, envelope: &Envelope, err: CouponError) -> Settlement {
        let dead = envelope.dead_lettered(err.to_string());
        let dlq = Arc::clone(&self.dlq);

        let moved = retry_transient(self.retry.clone(), || {
            let dlq = Arc::clone(&dlq);
            let dead = dead.clone();
            async move { dlq.dead_letter(&dead).await }
        })
        .await;

        match moved {
            Ok(()) => {
                error!(
                    workflow = %self.workflow,
                    message = ?envelope.message,
                    death_count = dead.history.death_count,
                    error = %err,
                    "Message dead-lettered after exhausting retries"
                );
                Settlement::DeadLettered(err)
            }
            Err(dlq_err) => {
                error!(
                    workflow = %self.workflow,
                    message = ?envelope.message,
                    error = %err,
                    dlq_error = %dlq_err,
                    "Failed to dead-letter message, returning it to the queue"
                );
                Settlement::Abandoned(err)
            }
        }
    }
}
