//! In-memory workflow queues and dead letter queues.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use coupon_core::message::{Envelope, Workflow};
use coupon_core::queue::{DeadLetterQueue, Delivery, DeliveryStream, MessageQueue, Receipt};
use coupon_core::{BoxFuture, CouponError, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Notify;

/// One single-partition log. Acks commit cumulatively, as on Kafka: acking
/// offset `n` also settles every in-flight offset below `n`, except nacked
/// ones, which hold the commit back until they are acked themselves.
#[derive(Debug, Default)]
struct Channel {
    ready: VecDeque<(i64, Envelope)>,
    in_flight: BTreeMap<i64, Envelope>,
    held: BTreeSet<i64>,
    next_offset: i64,
}

impl Channel {
    fn push(&mut self, envelope: Envelope) {
        let offset = self.next_offset;
        self.next_offset += 1;
        self.ready.push_back((offset, envelope));
    }

    fn ack(&mut self, offset: i64) {
        self.in_flight.remove(&offset);
        self.held.remove(&offset);

        let commit = self
            .held
            .first()
            .map_or(offset + 1, |&held| held.min(offset + 1));
        // Covered by the commit: never delivered again
        self.in_flight.retain(|&o, _| o >= commit);
    }

    fn nack(&mut self, offset: i64) {
        if let Some(envelope) = self.in_flight.remove(&offset) {
            self.held.insert(offset);
            self.ready.push_front((offset, envelope));
        }
    }
}

#[derive(Debug, Default)]
struct State {
    channels: HashMap<String, Channel>,
    acked: Vec<Receipt>,
    publish_failure: Option<CouponError>,
    publish_delay: Option<Duration>,
    dead_letter_failure: Option<CouponError>,
}

impl State {
    fn take(&mut self, queue: &str) -> Option<Delivery> {
        let channel = self.channels.get_mut(queue)?;
        let (offset, envelope) = channel.ready.pop_front()?;
        channel.in_flight.insert(offset, envelope.clone());
        Some(Delivery {
            envelope,
            receipt: Receipt {
                queue: queue.to_string(),
                partition: 0,
                offset,
            },
        })
    }

    fn ack(&mut self, receipt: &Receipt) {
        if let Some(channel) = self.channels.get_mut(&receipt.queue) {
            channel.ack(receipt.offset);
        }
        self.acked.push(receipt.clone());
    }

    fn nack(&mut self, receipt: &Receipt) {
        if let Some(channel) = self.channels.get_mut(&receipt.queue) {
            channel.nack(receipt.offset);
        }
    }
}

/// Queues keyed by name, with at-least-once delivery semantics: a taken
/// message stays in flight until acknowledged, or until a later ack on the
/// same queue covers it, and can be redelivered.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueue {
    state: Arc<RwLock<State>>,
    notify: Arc<Notify>,
}

impl InMemoryQueue {
    /// Create empty queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages waiting in a workflow's queue.
    #[must_use]
    pub fn pending(&self, workflow: Workflow) -> Vec<Envelope> {
        self.ready(&workflow.queue_name())
    }

    /// Messages waiting in a workflow's DLQ.
    #[must_use]
    pub fn dead_letters(&self, workflow: Workflow) -> Vec<Envelope> {
        self.ready(&workflow.dlq_name())
    }

    /// Number of taken but unacknowledged messages in a queue or DLQ.
    #[must_use]
    pub fn in_flight(&self, queue: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .channels
            .get(queue)
            .map_or(0, |c| c.in_flight.len())
    }

    /// Every acknowledged receipt, in order.
    #[must_use]
    pub fn acked(&self) -> Vec<Receipt> {
        self.state.read().unwrap().acked.clone()
    }

    /// Take the next message of a workflow's queue without subscribing.
    #[must_use]
    pub fn take(&self, workflow: Workflow) -> Option<Delivery> {
        self.state.write().unwrap().take(&workflow.queue_name())
    }

    /// Put every unacknowledged message of a workflow's queue back in front,
    /// as a broker does after a consumer restart.
    pub fn redeliver_in_flight(&self, workflow: Workflow) {
        let mut state = self.state.write().unwrap();
        if let Some(channel) = state.channels.get_mut(&workflow.queue_name()) {
            let in_flight = std::mem::take(&mut channel.in_flight);
            for (offset, envelope) in in_flight.into_iter().rev() {
                channel.ready.push_front((offset, envelope));
            }
        }
        drop(state);
        self.notify.notify_waiters();
    }

    /// Make publishing fail with `error` until cleared.
    pub fn set_publish_failure(&self, error: Option<CouponError>) {
        self.state.write().unwrap().publish_failure = error;
    }

    /// Delay publishing, to exercise timeouts.
    pub fn set_publish_delay(&self, delay: Option<Duration>) {
        self.state.write().unwrap().publish_delay = delay;
    }

    /// Make dead-lettering fail with `error` until cleared.
    pub fn set_dead_letter_failure(&self, error: Option<CouponError>) {
        self.state.write().unwrap().dead_letter_failure = error;
    }

    fn ready(&self, queue: &str) -> Vec<Envelope> {
        self.state
            .read()
            .unwrap()
            .channels
            .get(queue)
            .map(|c| c.ready.iter().map(|(_, e)| e.clone()).collect())
            .unwrap_or_default()
    }

    fn push(&self, queue: String, envelope: Envelope) {
        self.state
            .write()
            .unwrap()
            .channels
            .entry(queue)
            .or_default()
            .push(envelope);
        self.notify.notify_waiters();
    }
}

impl MessageQueue for InMemoryQueue {
    fn publish(&self, envelope: &Envelope) -> BoxFuture<'_, Result<()>> {
        let envelope = envelope.clone();
        Box::pin(async move {
            let delay = self.state.read().unwrap().publish_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let failure = self.state.read().unwrap().publish_failure.clone();
            if let Some(error) = failure {
                return Err(error);
            }
            self.push(envelope.workflow().queue_name(), envelope);
            Ok(())
        })
    }

    fn subscribe(&self, workflow: Workflow) -> BoxFuture<'_, Result<DeliveryStream>> {
        let state = Arc::clone(&self.state);
        let notify = Arc::clone(&self.notify);
        let queue = workflow.queue_name();

        Box::pin(async move {
            let stream = async_stream::stream! {
                loop {
                    let notified = notify.notified();
                    let next = state.write().unwrap().take(&queue);
                    match next {
                        Some(delivery) => yield Ok(delivery),
                        None => notified.await,
                    }
                }
                #[allow(unreachable_code)]
                ()
            };
            Ok(Box::pin(stream) as DeliveryStream)
        })
    }

    fn ack(&self, receipt: &Receipt) -> BoxFuture<'_, Result<()>> {
        let receipt = receipt.clone();
        Box::pin(async move {
            self.state.write().unwrap().ack(&receipt);
            Ok(())
        })
    }

    fn nack(&self, receipt: &Receipt) -> BoxFuture<'_, Result<()>> {
        let receipt = receipt.clone();
        Box::pin(async move {
            self.state.write().unwrap().nack(&receipt);
            self.notify.notify_waiters();
            Ok(())
        })
    }
}

impl DeadLetterQueue for InMemoryQueue {
    fn dead_letter(&self, envelope: &Envelope) -> BoxFuture<'_, Result<()>> {
        let envelope = envelope.clone();
        Box::pin(async move {
            let failure = self.state.read().unwrap().dead_letter_failure.clone();
            if let Some(error) = failure {
                return Err(error);
            }
            self.push(envelope.workflow().dlq_name(), envelope);
            Ok(())
        })
    }

    fn pop(&self, workflow: Workflow) -> BoxFuture<'_, Result<Option<Delivery>>> {
        Box::pin(async move { Ok(self.state.write().unwrap().take(&workflow.dlq_name())) })
    }

    fn ack_dead_letter(&self, receipt: &Receipt) -> BoxFuture<'_, Result<()>> {
        let receipt = receipt.clone();
        Box::pin(async move {
            self.state.write().unwrap().ack(&receipt);
            Ok(())
        })
    }

    fn nack_dead_letter(&self, receipt: &Receipt) -> BoxFuture<'_, Result<()>> {
        let receipt = receipt.clone();
        Box::pin(async move {
            self.state.write().unwrap().nack(&receipt);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coupon_core::ids::UserId;
    use coupon_core::message::CouponMessage;
    use futures::StreamExt;

    fn welcome(user: i64) -> Envelope {
        Envelope::new(CouponMessage::WelcomeCouponRequested {
            user_id: UserId::new(user),
        })
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_messages() {
        let queue = InMemoryQueue::new();
        let mut stream = queue.subscribe(Workflow::Welcome).await.unwrap();

        queue.publish(&welcome(1)).await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();

        assert_eq!(delivery.envelope, welcome(1));
        assert_eq!(queue.in_flight("coupon.welcome"), 1);

        queue.ack(&delivery.receipt).await.unwrap();
        assert_eq!(queue.in_flight("coupon.welcome"), 0);
    }

    #[tokio::test]
    async fn test_unacked_messages_are_redelivered() {
        let queue = InMemoryQueue::new();
        queue.publish(&welcome(1)).await.unwrap();

        let first = queue.take(Workflow::Welcome).unwrap();
        assert!(queue.take(Workflow::Welcome).is_none());

        queue.redeliver_in_flight(Workflow::Welcome);
        let again = queue.take(Workflow::Welcome).unwrap();
        assert_eq!(again.receipt, first.receipt);
    }

    #[tokio::test]
    async fn test_later_ack_covers_unsettled_deliveries() {
        let queue = InMemoryQueue::new();
        for user in 1..=3 {
            queue.publish(&welcome(user)).await.unwrap();
        }

        let _unsettled = queue.take(Workflow::Welcome).unwrap();
        let second = queue.take(Workflow::Welcome).unwrap();
        queue.ack(&second.receipt).await.unwrap();

        assert_eq!(queue.in_flight("coupon.welcome"), 0);
        queue.redeliver_in_flight(Workflow::Welcome);
        assert_eq!(queue.take(Workflow::Welcome).unwrap().envelope, welcome(3));
    }

    #[tokio::test]
    async fn test_nacked_delivery_survives_later_acks() {
        let queue = InMemoryQueue::new();
        for user in 1..=3 {
            queue.publish(&welcome(user)).await.unwrap();
        }

        let first = queue.take(Workflow::Welcome).unwrap();
        queue.nack(&first.receipt).await.unwrap();
        let again = queue.take(Workflow::Welcome).unwrap();
        assert_eq!(again.receipt, first.receipt);

        let second = queue.take(Workflow::Welcome).unwrap();
        queue.ack(&second.receipt).await.unwrap();
        assert_eq!(queue.in_flight("coupon.welcome"), 1);

        // Restart before the first message is settled
        queue.redeliver_in_flight(Workflow::Welcome);
        let after_restart = queue.take(Workflow::Welcome).unwrap();
        assert_eq!(after_restart.envelope, welcome(1));
        queue.ack(&after_restart.receipt).await.unwrap();

        assert_eq!(queue.take(Workflow::Welcome).unwrap().envelope, welcome(3));
    }

    #[tokio::test]
    async fn test_dlq_nack_returns_message_to_next_pop() {
        let queue = InMemoryQueue::new();
        queue.dead_letter(&welcome(1).dead_lettered("boom")).await.unwrap();
        queue.dead_letter(&welcome(2).dead_lettered("boom")).await.unwrap();

        let first = queue.pop(Workflow::Welcome).await.unwrap().unwrap();
        queue.nack_dead_letter(&first.receipt).await.unwrap();

        let again = queue.pop(Workflow::Welcome).await.unwrap().unwrap();
        assert_eq!(again.receipt, first.receipt);
        let second = queue.pop(Workflow::Welcome).await.unwrap().unwrap();
        queue.ack_dead_letter(&second.receipt).await.unwrap();

        // Acking the later entry did not settle the earlier one
        queue.nack_dead_letter(&again.receipt).await.unwrap();
        let retried = queue.pop(Workflow::Welcome).await.unwrap().unwrap();
        assert_eq!(retried.receipt, first.receipt);
    }

    #[tokio::test]
    async fn test_dlq_pop_reports_empty() {
        let queue = InMemoryQueue::new();
        assert!(queue.pop(Workflow::Welcome).await.unwrap().is_none());

        queue.dead_letter(&welcome(2).dead_lettered("boom")).await.unwrap();
        let popped = queue.pop(Workflow::Welcome).await.unwrap().unwrap();
        assert_eq!(popped.envelope.history.death_count, 1);
        assert!(queue.pending(Workflow::Welcome).is_empty());
    }
}
