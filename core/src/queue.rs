//! Message queue and dead letter queue abstractions.
//!
//! Delivery is at-least-once. A consumer settles every [`Delivery`] through
//! its [`Receipt`]: `ack` once done with it, `nack` to have it delivered
//! again. Acknowledgements are cumulative per partition on log-based brokers,
//! so a delivery that is neither acked nor nacked can be covered by a later
//! ack on the same partition. Only a crash may leave one unsettled.

use crate::BoxFuture;
use crate::error::{CouponError, Result};
use crate::message::{Envelope, Workflow};
use futures::Stream;
use std::pin::Pin;

/// Position of a delivered message, used to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Receipt {
    /// Queue or DLQ the message came from.
    pub queue: String,
    /// Partition within the queue.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

/// A received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// The message and its delivery history.
    pub envelope: Envelope,
    /// Acknowledgement handle.
    pub receipt: Receipt,
}

/// Stream of deliveries from one workflow queue.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = std::result::Result<Delivery, CouponError>> + Send>>;

/// Durable queue the admission path hands work off to.
pub trait MessageQueue: Send + Sync {
    /// Publishes an envelope to its workflow's queue.
    ///
    /// Resolves once the broker has durably accepted the message.
    ///
    /// # Errors
    ///
    /// Returns a `Queue` infrastructure error if the broker rejects the
    /// message or is unreachable.
    fn publish(&self, envelope: &Envelope) -> BoxFuture<'_, Result<()>>;

    /// Subscribes to a workflow's queue.
    ///
    /// # Errors
    ///
    /// Returns a `Queue` infrastructure error if the subscription fails.
    fn subscribe(&self, workflow: Workflow) -> BoxFuture<'_, Result<DeliveryStream>>;

    /// Acknowledges a delivery so it is not redelivered.
    ///
    /// # Errors
    ///
    /// Returns a `Queue` infrastructure error if the acknowledgement fails.
    fn ack(&self, receipt: &Receipt) -> BoxFuture<'_, Result<()>>;

    /// Returns a delivery to the queue. It is the next delivery of its
    /// partition, and acks of later deliveries never commit past it.
    ///
    /// # Errors
    ///
    /// Returns a `Queue` infrastructure error if the consumer cannot rewind.
    /// Later acks still do not commit past the delivery, so it is redelivered
    /// after a restart.
    fn nack(&self, receipt: &Receipt) -> BoxFuture<'_, Result<()>>;
}

/// Per-workflow dead letter queues.
pub trait DeadLetterQueue: Send + Sync {
    /// Moves an envelope to its workflow's DLQ, history included.
    ///
    /// # Errors
    ///
    /// Returns a `Queue` infrastructure error on failure.
    fn dead_letter(&self, envelope: &Envelope) -> BoxFuture<'_, Result<()>>;

    /// Takes the next message from a workflow's DLQ, or `None` when empty.
    ///
    /// The message stays pending until [`DeadLetterQueue::ack_dead_letter`].
    ///
    /// # Errors
    ///
    /// Returns a `Queue` infrastructure error on failure.
    fn pop(&self, workflow: Workflow) -> BoxFuture<'_, Result<Option<Delivery>>>;

    /// Acknowledges a message taken with [`DeadLetterQueue::pop`].
    ///
    /// # Errors
    ///
    /// Returns a `Queue` infrastructure error on failure.
    fn ack_dead_letter(&self, receipt: &Receipt) -> BoxFuture<'_, Result<()>>;

    /// Returns a message taken with [`DeadLetterQueue::pop`]; the next `pop`
    /// of its workflow yields it again.
    ///
    /// # Errors
    ///
    /// Returns a `Queue` infrastructure error on failure, with the same
    /// guarantee as [`MessageQueue::nack`].
    fn nack_dead_letter(&self, receipt: &Receipt) -> BoxFuture<'_, Result<()>>;
}
