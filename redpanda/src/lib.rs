//! Redpanda message queue for coupon workflows.
//!
//! Implements [`MessageQueue`] and [`DeadLetterQueue`] from `coupon-core`
//! with rdkafka, so it works with Redpanda or any Kafka-compatible broker.
//!
//! # Topics
//!
//! ```text
//! coupon.issuance       coupon.issuance.dlq
//! coupon.cancellation   coupon.cancellation.dlq
//! coupon.welcome        coupon.welcome.dlq
//! coupon.birthday       coupon.birthday.dlq
//! ```
//!
//! Payloads are bincode-encoded [`CouponMessage`]s. Delivery history travels
//! in the `x-death-count` (64-bit big-endian) and `x-last-failure-reason`
//! headers, so requeuing a dead letter keeps its count.
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits. Auto-commit is disabled and
//! an offset is committed only when the consumer acknowledges the delivery.
//! A crash before the acknowledgement redelivers the message.
//!
//! A nack seeks the consumer back to the message and holds later commits on
//! its partition below it until it is acked.
//!
//! # Example
//!
//! ```no_run
//! use coupon_core::message::{CouponMessage, Envelope};
//! use coupon_core::ids::{CouponUnitId, UserId};
//! use coupon_core::queue::MessageQueue;
//! use coupon_redpanda::RedpandaQueue;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = RedpandaQueue::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("coupon-service")
//!     .build()?;
//!
//! let envelope = Envelope::new(CouponMessage::IssuanceRequested {
//!     user_id: UserId::new(1),
//!     coupon_unit_id: CouponUnitId::new(10),
//! });
//! queue.publish(&envelope).await?;
//! # Ok(())
//! # }
//! ```

use coupon_core::message::{
    CouponMessage, DEATH_COUNT_HEADER, DeliveryHistory, Envelope, FAILURE_REASON_HEADER, Workflow,
};
use coupon_core::queue::{DeadLetterQueue, Delivery, DeliveryStream, MessageQueue, Receipt};
use coupon_core::{BoxFuture, CouponError, Result};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod holds;

use holds::OffsetHolds;

/// Kafka-compatible queue for coupon workflows and their DLQs.
///
/// One consumer is created per subscribed topic and kept so that
/// acknowledgements can commit through it.
pub struct RedpandaQueue {
    /// Producer for queues and DLQs
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Producer send timeout
    timeout: Duration,
    /// Consumer group prefix; each topic gets `<prefix>.<topic>`
    consumer_group: String,
    /// Buffer between the broker consumer and subscribers
    buffer_size: usize,
    /// Auto offset reset policy
    auto_offset_reset: String,
    /// How long `pop` waits on an empty DLQ
    dlq_poll_timeout: Duration,
    /// Consumers by topic
    consumers: Mutex<HashMap<String, Arc<StreamConsumer>>>,
    /// Nacked offsets shared with subscription tasks
    holds: Arc<Mutex<OffsetHolds>>,
}

impl RedpandaQueue {
    /// Create a queue with default configuration.
    ///
    /// # Errors
    ///
    /// Returns a `Queue` error if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaQueueBuilder {
        RedpandaQueueBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    fn consumer(&self, topic: &str) -> Result<Arc<StreamConsumer>> {
        let mut consumers = self
            .consumers
            .lock()
            .map_err(|_| CouponError::queue("consumer registry poisoned"))?;
        if let Some(consumer) = consumers.get(topic) {
            return Ok(Arc::clone(consumer));
        }

        let group_id = format!("{}.{topic}", self.consumer_group);
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| CouponError::queue(format!("Failed to create consumer for {topic}: {e}")))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| CouponError::queue(format!("Failed to subscribe to {topic}: {e}")))?;

        tracing::info!(
            topic = %topic,
            consumer_group = %group_id,
            auto_offset_reset = %self.auto_offset_reset,
            manual_commit = true,
            "Subscribed to topic"
        );

        let consumer = Arc::new(consumer);
        consumers.insert(topic.to_string(), Arc::clone(&consumer));
        Ok(consumer)
    }

    async fn send(&self, topic: &str, envelope: &Envelope) -> Result<()> {
        let payload = envelope.message.encode()?;
        let death_count = envelope.history.death_count_header();

        let mut headers = OwnedHeaders::new().insert(Header {
            key: DEATH_COUNT_HEADER,
            value: Some(death_count.as_slice()),
        });
        if let Some(reason) = &envelope.history.last_failure_reason {
            headers = headers.insert(Header {
                key: FAILURE_REASON_HEADER,
                value: Some(reason.as_bytes()),
            });
        }

        // Keyed by member when there is one, spreading load across partitions
        let key = envelope
            .message
            .user_id()
            .map_or_else(String::new, |id| id.to_string());
        let record = FutureRecord::to(topic)
            .payload(&payload)
            .key(&key)
            .headers(headers);

        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok((partition, offset)) => {
                tracing::debug!(
                    topic = %topic,
                    partition = partition,
                    offset = offset,
                    death_count = envelope.history.death_count,
                    "Message published"
                );
                Ok(())
            }
            Err((kafka_error, _)) => {
                tracing::error!(topic = %topic, error = %kafka_error, "Failed to publish message");
                Err(CouponError::queue(format!("Failed to publish to {topic}: {kafka_error}")))
            }
        }
    }

    fn registered_consumer(&self, topic: &str) -> Result<Arc<StreamConsumer>> {
        self.consumers
            .lock()
            .map_err(|_| CouponError::queue("consumer registry poisoned"))?
            .get(topic)
            .cloned()
            .ok_or_else(|| CouponError::queue(format!("No consumer for {topic}")))
    }

    fn commit(&self, receipt: &Receipt) -> Result<()> {
        let consumer = self.registered_consumer(&receipt.queue)?;
        commit_receipt(&consumer, &self.holds, receipt)
    }

    fn rewind(&self, receipt: &Receipt) -> Result<()> {
        let consumer = self.registered_consumer(&receipt.queue)?;
        lock_holds(&self.holds)?.hold(receipt);

        consumer
            .seek(
                &receipt.queue,
                receipt.partition,
                Offset::Offset(receipt.offset),
                Timeout::After(self.timeout),
            )
            .map_err(|e| {
                tracing::warn!(
                    topic = %receipt.queue,
                    partition = receipt.partition,
                    offset = receipt.offset,
                    error = %e,
                    "Seek failed, message is redelivered after a restart"
                );
                CouponError::queue(format!("Failed to seek back to offset {}: {e}", receipt.offset))
            })?;

        tracing::debug!(
            topic = %receipt.queue,
            partition = receipt.partition,
            offset = receipt.offset,
            "Delivery nacked"
        );
        Ok(())
    }
}

fn lock_holds(holds: &Mutex<OffsetHolds>) -> Result<std::sync::MutexGuard<'_, OffsetHolds>> {
    holds
        .lock()
        .map_err(|_| CouponError::queue("offset holds poisoned"))
}

/// Commits past `receipt`, but never past a nacked offset of its partition.
fn commit_receipt(consumer: &StreamConsumer, holds: &Mutex<OffsetHolds>, receipt: &Receipt) -> Result<()> {
    // Kafka commits the next offset to read
    let next = lock_holds(holds)?.release(receipt);
    let mut offsets = TopicPartitionList::new();
    offsets
        .add_partition_offset(&receipt.queue, receipt.partition, Offset::Offset(next))
        .map_err(|e| CouponError::queue(format!("Invalid offset: {e}")))?;

    consumer
        .commit(&offsets, CommitMode::Async)
        .map_err(|e| CouponError::queue(format!("Failed to commit offset: {e}")))
}

fn receipt_of(message: &BorrowedMessage<'_>) -> Receipt {
    Receipt {
        queue: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
    }
}

/// Decodes a broker message into a delivery.
fn to_delivery(message: &BorrowedMessage<'_>) -> Result<Delivery> {
    let payload = message
        .payload()
        .ok_or_else(|| CouponError::validation("Message has no payload"))?;
    let coupon_message = CouponMessage::decode(payload)?;

    let mut death_count = None;
    let mut reason = None;
    if let Some(headers) = message.headers() {
        for header in headers.iter() {
            match header.key {
                DEATH_COUNT_HEADER => death_count = header.value,
                FAILURE_REASON_HEADER => reason = header.value,
                _ => {}
            }
        }
    }

    Ok(Delivery {
        envelope: Envelope {
            message: coupon_message,
            history: DeliveryHistory::from_headers(death_count, reason),
        },
        receipt: receipt_of(message),
    })
}

/// Builder for configuring a [`RedpandaQueue`].
#[derive(Default)]
pub struct RedpandaQueueBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
    dlq_poll_timeout: Option<Duration>,
}

impl RedpandaQueueBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "all", so a publish resolves only once the message is durable.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec.
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group prefix.
    ///
    /// Instances sharing a prefix share the work of each topic.
    /// Default: "coupon-service"
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the buffer size between the broker consumer and a subscriber.
    ///
    /// Zero is treated as one. Default: 1000
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Set the auto offset reset policy for new consumer groups.
    ///
    /// Default: "earliest", so messages published before the first
    /// subscription are not lost.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set how long `pop` waits for a dead letter before reporting the DLQ empty.
    ///
    /// Default: 2 seconds
    #[must_use]
    pub const fn dlq_poll_timeout(mut self, timeout: Duration) -> Self {
        self.dlq_poll_timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaQueue`].
    ///
    /// # Errors
    ///
    /// Returns a `Queue` error if brokers are not set or the producer cannot
    /// be created.
    pub fn build(self) -> Result<RedpandaQueue> {
        let brokers = self
            .brokers
            .ok_or_else(|| CouponError::queue("Brokers not configured"))?;
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());
        let compression = self.compression.unwrap_or_else(|| "none".to_string());
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", &acks)
            .set("compression.type", &compression)
            .create()
            .map_err(|e| CouponError::queue(format!("Failed to create producer: {e}")))?;

        let queue = RedpandaQueue {
            producer,
            brokers,
            timeout,
            consumer_group: self
                .consumer_group
                .unwrap_or_else(|| "coupon-service".to_string()),
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
            dlq_poll_timeout: self.dlq_poll_timeout.unwrap_or(Duration::from_secs(2)),
            consumers: Mutex::new(HashMap::new()),
            holds: Arc::new(Mutex::new(OffsetHolds::default())),
        };

        tracing::info!(
            brokers = %queue.brokers,
            acks = %acks,
            compression = %compression,
            consumer_group = %queue.consumer_group,
            buffer_size = queue.buffer_size,
            "RedpandaQueue created"
        );

        Ok(queue)
    }
}

impl MessageQueue for RedpandaQueue {
    fn publish(&self, envelope: &Envelope) -> BoxFuture<'_, Result<()>> {
        let envelope = envelope.clone();
        Box::pin(async move { self.send(&envelope.workflow().queue_name(), &envelope).await })
    }

    fn subscribe(&self, workflow: Workflow) -> BoxFuture<'_, Result<DeliveryStream>> {
        Box::pin(async move {
            let topic = workflow.queue_name();
            let consumer = self.consumer(&topic)?;
            let (tx, mut rx) = tokio::sync::mpsc::channel(self.buffer_size);
            let task_holds = Arc::clone(&self.holds);
            let holds = Arc::clone(&self.holds);

            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();
                while let Some(received) = stream.next().await {
                    let delivery = match received {
                        Ok(message) => {
                            let decoded = to_delivery(&message);
                            if let Err(e) = &decoded {
                                // Poison message: skip past it, nothing can handle it
                                tracing::error!(
                                    topic = message.topic(),
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %e,
                                    "Dropping undecodable message"
                                );
                                if let Err(e) = commit_receipt(&consumer, &task_holds, &receipt_of(&message)) {
                                    tracing::warn!(error = %e, "Failed to commit undecodable message");
                                }
                            }
                            decoded
                        }
                        Err(e) => Err(CouponError::queue(format!("Failed to receive message: {e}"))),
                    };

                    if tx.send(delivery).await.is_err() {
                        tracing::debug!("Subscriber dropped, exiting consumer task");
                        break;
                    }
                }
                tracing::debug!("Consumer task exiting");
            });

            // Drops messages buffered ahead of a nacked one until it comes back
            let stream = async_stream::stream! {
                while let Some(delivery) = rx.recv().await {
                    if let Ok(d) = &delivery {
                        let admitted = holds.lock().map(|mut h| h.admit(&d.receipt)).unwrap_or(true);
                        if !admitted {
                            tracing::trace!(offset = d.receipt.offset, "Skipping message fetched before a rewind");
                            continue;
                        }
                    }
                    yield delivery;
                }
            };
            Ok(Box::pin(stream) as DeliveryStream)
        })
    }

    fn ack(&self, receipt: &Receipt) -> BoxFuture<'_, Result<()>> {
        let receipt = receipt.clone();
        Box::pin(async move { self.commit(&receipt) })
    }

    fn nack(&self, receipt: &Receipt) -> BoxFuture<'_, Result<()>> {
        let receipt = receipt.clone();
        Box::pin(async move { self.rewind(&receipt) })
    }
}

impl DeadLetterQueue for RedpandaQueue {
    fn dead_letter(&self, envelope: &Envelope) -> BoxFuture<'_, Result<()>> {
        let envelope = envelope.clone();
        Box::pin(async move { self.send(&envelope.workflow().dlq_name(), &envelope).await })
    }

    fn pop(&self, workflow: Workflow) -> BoxFuture<'_, Result<Option<Delivery>>> {
        Box::pin(async move {
            let consumer = self.consumer(&workflow.dlq_name())?;
            loop {
                let received =
                    match tokio::time::timeout(self.dlq_poll_timeout, consumer.recv()).await {
                        Err(_elapsed) => return Ok(None),
                        Ok(received) => received.map_err(|e| {
                            CouponError::queue(format!("Failed to receive dead letter: {e}"))
                        })?,
                    };

                if !lock_holds(&self.holds)?.admit(&receipt_of(&received)) {
                    continue;
                }
                match to_delivery(&received) {
                    Ok(delivery) => return Ok(Some(delivery)),
                    Err(e) => {
                        tracing::error!(
                            topic = received.topic(),
                            offset = received.offset(),
                            error = %e,
                            "Dropping undecodable dead letter"
                        );
                        commit_receipt(&consumer, &self.holds, &receipt_of(&received))?;
                    }
                }
            }
        })
    }

    fn ack_dead_letter(&self, receipt: &Receipt) -> BoxFuture<'_, Result<()>> {
        let receipt = receipt.clone();
        Box::pin(async move { self.commit(&receipt) })
    }

    fn nack_dead_letter(&self, receipt: &Receipt) -> BoxFuture<'_, Result<()>> {
        let receipt = receipt.clone();
        Box::pin(async move { self.rewind(&receipt) })
    }
}
