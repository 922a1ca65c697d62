//! Queue message contracts.
//!
//! Every workflow has its own queue (`coupon.<workflow>`) and dead letter
//! queue (`coupon.<workflow>.dlq`). Payloads are bincode-encoded
//! [`CouponMessage`]s. Delivery history travels next to the payload
//! (as message headers on brokers that support them) so that a message can
//! be requeued without re-encoding its body.

use crate::error::{CouponError, Result};
use crate::ids::{CouponUnitId, OrderId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Header carrying the number of times a message was dead-lettered.
pub const DEATH_COUNT_HEADER: &str = "x-death-count";

/// Header carrying the last failure reason.
pub const FAILURE_REASON_HEADER: &str = "x-last-failure-reason";

/// Asynchronous workflows, each with its own queue and DLQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workflow {
    /// Limited-stock issuance admitted through the stock counter.
    Issuance,
    /// Cancellation of coupons attached to an order.
    Cancellation,
    /// Welcome coupon for a new member.
    Welcome,
    /// Yearly birthday coupon.
    Birthday,
}

impl Workflow {
    /// Every workflow.
    pub const ALL: [Self; 4] = [
        Self::Issuance,
        Self::Cancellation,
        Self::Welcome,
        Self::Birthday,
    ];

    /// Short name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Issuance => "issuance",
            Self::Cancellation => "cancellation",
            Self::Welcome => "welcome",
            Self::Birthday => "birthday",
        }
    }

    /// Name of the workflow's queue.
    #[must_use]
    pub fn queue_name(self) -> String {
        format!("coupon.{}", self.as_str())
    }

    /// Name of the workflow's dead letter queue.
    #[must_use]
    pub fn dlq_name(self) -> String {
        format!("coupon.{}.dlq", self.as_str())
    }

    /// Resolves a queue or DLQ name back to its workflow.
    #[must_use]
    pub fn from_queue_name(name: &str) -> Option<Self> {
        let short = name.strip_prefix("coupon.")?;
        let short = short.strip_suffix(".dlq").unwrap_or(short);
        Self::ALL.into_iter().find(|w| w.as_str() == short)
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requests handed off to asynchronous processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouponMessage {
    /// A member passed admission for a limited unit.
    IssuanceRequested {
        /// Member to issue to.
        user_id: UserId,
        /// Unit to issue from.
        coupon_unit_id: CouponUnitId,
    },
    /// Coupons attached to an order should be released.
    CancellationRequested {
        /// The cancelled order.
        order_id: OrderId,
    },
    /// A member signed up.
    WelcomeCouponRequested {
        /// New member.
        user_id: UserId,
    },
    /// A member has a birthday today.
    BirthdayCouponRequested {
        /// Member with the birthday.
        user_id: UserId,
        /// Year of the birthday, for log correlation.
        year: i32,
    },
}

impl CouponMessage {
    /// Workflow this message belongs to.
    #[must_use]
    pub const fn workflow(&self) -> Workflow {
        match self {
            Self::IssuanceRequested { .. } => Workflow::Issuance,
            Self::CancellationRequested { .. } => Workflow::Cancellation,
            Self::WelcomeCouponRequested { .. } => Workflow::Welcome,
            Self::BirthdayCouponRequested { .. } => Workflow::Birthday,
        }
    }

    /// Member the message concerns, if any.
    #[must_use]
    pub const fn user_id(&self) -> Option<UserId> {
        match self {
            Self::IssuanceRequested { user_id, .. }
            | Self::WelcomeCouponRequested { user_id }
            | Self::BirthdayCouponRequested { user_id, .. } => Some(*user_id),
            Self::CancellationRequested { .. } => None,
        }
    }

    /// Unit the message concerns, if any.
    #[must_use]
    pub const fn coupon_unit_id(&self) -> Option<CouponUnitId> {
        match self {
            Self::IssuanceRequested { coupon_unit_id, .. } => Some(*coupon_unit_id),
            _ => None,
        }
    }

    /// Encodes the message body.
    ///
    /// # Errors
    ///
    /// Returns a `Queue` infrastructure error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CouponError::queue(format!("encode failed: {e}")))
    }

    /// Decodes a message body.
    ///
    /// # Errors
    ///
    /// Returns a `Validation` error if the bytes are not a valid message.
    /// Malformed payloads will never decode on retry.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| CouponError::validation(format!("undecodable message: {e}")))
    }
}

/// How often a message has been dead-lettered and why.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryHistory {
    /// Times the message has been moved to a DLQ.
    pub death_count: u64,
    /// Reason of the most recent failure.
    pub last_failure_reason: Option<String>,
}

impl DeliveryHistory {
    /// History after one more dead-lettering.
    #[must_use]
    pub fn record_death(&self, reason: impl Into<String>) -> Self {
        Self {
            death_count: self.death_count.saturating_add(1),
            last_failure_reason: Some(reason.into()),
        }
    }

    /// Reads history from raw header values.
    ///
    /// A missing or garbled death count is treated as zero.
    #[must_use]
    pub fn from_headers(death_count: Option<&[u8]>, reason: Option<&[u8]>) -> Self {
        Self {
            death_count: death_count
                .and_then(|raw| HeaderValue::from_bytes(raw).as_count())
                .unwrap_or(0),
            last_failure_reason: reason.map(|raw| String::from_utf8_lossy(raw).into_owned()),
        }
    }

    /// Encodes the death count header as a 64-bit big-endian integer.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)] // counts never reach i64::MAX
    pub const fn death_count_header(&self) -> [u8; 8] {
        (self.death_count as i64).to_be_bytes()
    }
}

/// A message together with its delivery history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// The message.
    pub message: CouponMessage,
    /// Delivery history.
    pub history: DeliveryHistory,
}

impl Envelope {
    /// Wraps a message that has never failed.
    #[must_use]
    pub fn new(message: CouponMessage) -> Self {
        Self {
            message,
            history: DeliveryHistory::default(),
        }
    }

    /// Workflow of the wrapped message.
    #[must_use]
    pub const fn workflow(&self) -> Workflow {
        self.message.workflow()
    }

    /// The same message with one more recorded death.
    #[must_use]
    pub fn dead_lettered(&self, reason: impl Into<String>) -> Self {
        Self {
            message: self.message.clone(),
            history: self.history.record_death(reason),
        }
    }
}

/// A header value as different producers write it.
///
/// Producers disagree on how counts are encoded: some write a 32-bit integer,
/// some a 64-bit integer, some a decimal string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    /// Decimal text.
    Text(String),
    /// Big-endian 32-bit integer.
    Int32(i32),
    /// Big-endian 64-bit integer.
    Int64(i64),
    /// Anything else.
    Raw(Vec<u8>),
}

impl HeaderValue {
    /// Classifies raw header bytes.
    ///
    /// ASCII digits are read as text first, so a four-character string such as
    /// `"1000"` is not mistaken for a binary integer.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if !bytes.is_empty() && bytes.iter().all(u8::is_ascii_digit) {
            return Self::Text(String::from_utf8_lossy(bytes).into_owned());
        }
        if let Ok(raw) = <[u8; 4]>::try_from(bytes) {
            return Self::Int32(i32::from_be_bytes(raw));
        }
        if let Ok(raw) = <[u8; 8]>::try_from(bytes) {
            return Self::Int64(i64::from_be_bytes(raw));
        }
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::Text(text.to_owned()),
            Err(_) => Self::Raw(bytes.to_vec()),
        }
    }

    /// Normalizes to an unsigned count. Negative or unparseable values yield `None`.
    #[must_use]
    pub fn as_count(&self) -> Option<u64> {
        match self {
            Self::Text(text) => text.trim().parse().ok(),
            Self::Int32(v) => u64::try_from(*v).ok(),
            Self::Int64(v) => u64::try_from(*v).ok(),
            Self::Raw(_) => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn test_queue_names() {
        assert_eq!(Workflow::Issuance.queue_name(), "coupon.issuance");
        assert_eq!(Workflow::Birthday.dlq_name(), "coupon.birthday.dlq");
        assert_eq!(
            Workflow::from_queue_name("coupon.cancellation.dlq"),
            Some(Workflow::Cancellation)
        );
        assert_eq!(Workflow::from_queue_name("orders"), None);
    }

    #[test]
    fn test_message_body_decodes() {
        let message = CouponMessage::IssuanceRequested {
            user_id: UserId::new(1),
            coupon_unit_id: CouponUnitId::new(2),
        };
        let bytes = message.encode().unwrap();
        assert_eq!(CouponMessage::decode(&bytes).unwrap(), message);
        assert!(CouponMessage::decode(&[0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_death_count_accepts_both_integer_widths() {
        assert_eq!(HeaderValue::from_bytes(&3i32.to_be_bytes()).as_count(), Some(3));
        assert_eq!(HeaderValue::from_bytes(&3i64.to_be_bytes()).as_count(), Some(3));
        assert_eq!(HeaderValue::from_bytes(b"12").as_count(), Some(12));
        assert_eq!(HeaderValue::from_bytes(b"1000").as_count(), Some(1000));
        assert_eq!(HeaderValue::from_bytes(&(-1i64).to_be_bytes()).as_count(), None);
        assert_eq!(HeaderValue::from_bytes(b"n/a").as_count(), None);
    }

    #[test]
    fn test_history_from_headers_defaults_to_zero() {
        let history = DeliveryHistory::from_headers(None, None);
        assert_eq!(history.death_count, 0);

        let garbled = DeliveryHistory::from_headers(Some(&[0xde, 0xad]), Some(b"timeout"));
        assert_eq!(garbled.death_count, 0);
        assert_eq!(garbled.last_failure_reason.as_deref(), Some("timeout"));

        let written = DeliveryHistory {
            death_count: 4,
            last_failure_reason: None,
        };
        let header = written.death_count_header();
        assert_eq!(DeliveryHistory::from_headers(Some(&header), None).death_count, 4);
    }

    #[test]
    fn test_dead_lettered_keeps_payload() {
        let envelope = Envelope::new(CouponMessage::WelcomeCouponRequested {
            user_id: UserId::new(5),
        });
        let dead = envelope.dead_lettered("database down").dead_lettered("still down");

        assert_eq!(dead.message, envelope.message);
        assert_eq!(dead.history.death_count, 2);
        assert_eq!(dead.history.last_failure_reason.as_deref(), Some("still down"));
    }
}
