//! Bookkeeping for nacked deliveries.
//!
//! Kafka commits are cumulative per partition and a consumer's position moves
//! past every message it fetched. A nacked offset is therefore tracked twice:
//!
//! - as a hold, so later acks never commit past it until it is acked itself
//! - as a rewind, so messages prefetched after it are dropped until the
//!   consumer, seeked back, delivers it again

use coupon_core::queue::Receipt;
use std::collections::{BTreeSet, HashMap};

type TopicPartition = (String, i32);

#[derive(Debug, Default)]
pub(crate) struct OffsetHolds {
    held: HashMap<TopicPartition, BTreeSet<i64>>,
    rewinding: HashMap<TopicPartition, i64>,
}

impl OffsetHolds {
    fn key(receipt: &Receipt) -> TopicPartition {
        (receipt.queue.clone(), receipt.partition)
    }

    /// Records a nack of `receipt`.
    pub(crate) fn hold(&mut self, receipt: &Receipt) {
        let key = Self::key(receipt);
        self.held.entry(key.clone()).or_default().insert(receipt.offset);
        self.rewinding
            .entry(key)
            .and_modify(|offset| *offset = (*offset).min(receipt.offset))
            .or_insert(receipt.offset);
    }

    /// Releases `receipt` and returns the offset an ack of it may commit.
    pub(crate) fn release(&mut self, receipt: &Receipt) -> i64 {
        let key = Self::key(receipt);
        let next = receipt.offset.saturating_add(1);

        let Some(held) = self.held.get_mut(&key) else {
            return next;
        };
        held.remove(&receipt.offset);
        match held.first() {
            Some(&lowest) => lowest.min(next),
            None => {
                self.held.remove(&key);
                next
            }
        }
    }

    /// Whether a fetched message is passed to the subscriber.
    pub(crate) fn admit(&mut self, receipt: &Receipt) -> bool {
        let key = Self::key(receipt);
        match self.rewinding.get(&key) {
            None => true,
            Some(&rewound) if receipt.offset == rewound => {
                self.rewinding.remove(&key);
                true
            }
            Some(&rewound) => receipt.offset < rewound,
        }
    }
}
