//! Error taxonomy shared by every layer.
//!
//! Errors fall into two groups that drive all retry decisions:
//!
//! - **Business** (`NotFound`, `Conflict`, `BadRequest`, `Forbidden`):
//!   terminal. Retrying the same input yields the same result.
//! - **Infrastructure**: transient. Queue consumers retry them locally and
//!   eventually dead-letter the message.

use std::fmt;
use thiserror::Error;

/// Result alias using [`CouponError`].
pub type Result<T> = std::result::Result<T, CouponError>;

/// Kind of entity that was not found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// A coupon policy.
    Policy,
    /// A coupon unit.
    CouponUnit,
    /// A member coupon.
    MemberCoupon,
    /// An order with attached coupons.
    Order,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Policy => "coupon policy",
            Self::CouponUnit => "coupon unit",
            Self::MemberCoupon => "member coupon",
            Self::Order => "order",
        })
    }
}

/// Conflicting state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    /// The member already holds a coupon from this unit.
    DuplicateIssuance,
    /// The coupon has already been used.
    AlreadyUsed,
    /// Cancellation of a coupon that is not in use.
    NotUsed,
    /// The coupon has already been expired.
    AlreadyExpired,
    /// The stored state changed between load and save.
    ConcurrentModification,
}

impl ConflictKind {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::DuplicateIssuance => "DUPLICATE_ISSUANCE",
            Self::AlreadyUsed => "ALREADY_USED",
            Self::NotUsed => "NOT_USED",
            Self::AlreadyExpired => "ALREADY_EXPIRED",
            Self::ConcurrentModification => "CONCURRENT_MODIFICATION",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DuplicateIssuance => "coupon already issued to this member",
            Self::AlreadyUsed => "coupon already used",
            Self::NotUsed => "coupon is not in use",
            Self::AlreadyExpired => "coupon already expired",
            Self::ConcurrentModification => "coupon was modified concurrently",
        })
    }
}

/// Invalid requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BadRequestKind {
    /// No stock left for the unit.
    OutOfStock,
    /// The policy is deactivated or outside its issuance window.
    PolicyNotIssuable,
    /// The coupon is expired, by status or by time.
    Expired,
    /// Invalid validity configuration.
    InvalidValidity(String),
    /// Malformed input.
    Validation(String),
}

impl BadRequestKind {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::OutOfStock => "OUT_OF_STOCK",
            Self::PolicyNotIssuable => "POLICY_NOT_ISSUABLE",
            Self::Expired => "COUPON_EXPIRED",
            Self::InvalidValidity(_) => "INVALID_VALIDITY",
            Self::Validation(_) => "VALIDATION_ERROR",
        }
    }
}

impl fmt::Display for BadRequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfStock => f.write_str("coupon is out of stock"),
            Self::PolicyNotIssuable => f.write_str("coupon policy is not issuable"),
            Self::Expired => f.write_str("coupon is expired"),
            Self::InvalidValidity(reason) => write!(f, "invalid validity: {reason}"),
            Self::Validation(reason) => write!(f, "validation failed: {reason}"),
        }
    }
}

/// Infrastructure that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfraKind {
    /// Stock counter cache.
    Cache,
    /// Message queue or dead letter queue.
    Queue,
    /// Relational store.
    Database,
    /// Distributed lock.
    Lock,
    /// A call exceeded its deadline.
    Timeout,
    /// Admission could not hand the request off to the queue.
    FailToIssue,
}

impl InfraKind {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Cache => "CACHE_UNAVAILABLE",
            Self::Queue => "QUEUE_UNAVAILABLE",
            Self::Database => "DATABASE_UNAVAILABLE",
            Self::Lock => "LOCK_UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
            Self::FailToIssue => "FAIL_TO_ISSUE",
        }
    }
}

impl fmt::Display for InfraKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cache => "cache",
            Self::Queue => "queue",
            Self::Database => "database",
            Self::Lock => "lock",
            Self::Timeout => "deadline",
            Self::FailToIssue => "issuance hand-off",
        })
    }
}

/// Errors produced by coupon operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CouponError {
    /// Entity lookup failed.
    #[error("{resource} {id} not found")]
    NotFound {
        /// What was looked up.
        resource: Resource,
        /// The identifier that was looked up.
        id: String,
    },

    /// State transition conflict.
    #[error("conflict: {0}")]
    Conflict(ConflictKind),

    /// Invalid request.
    #[error("bad request: {0}")]
    BadRequest(BadRequestKind),

    /// Caller does not own the resource.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Transient infrastructure failure.
    #[error("{kind} failure: {reason}")]
    Infrastructure {
        /// Which infrastructure failed.
        kind: InfraKind,
        /// Underlying cause.
        reason: String,
    },
}

impl CouponError {
    /// Creates a `NotFound` error.
    pub fn not_found(resource: Resource, id: impl fmt::Display) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Creates an `Infrastructure` error.
    pub fn infra(kind: InfraKind, reason: impl Into<String>) -> Self {
        Self::Infrastructure {
            kind,
            reason: reason.into(),
        }
    }

    /// Creates a `Cache` infrastructure error.
    pub fn cache(reason: impl fmt::Display) -> Self {
        Self::infra(InfraKind::Cache, reason.to_string())
    }

    /// Creates a `Queue` infrastructure error.
    pub fn queue(reason: impl fmt::Display) -> Self {
        Self::infra(InfraKind::Queue, reason.to_string())
    }

    /// Creates a `Database` infrastructure error.
    pub fn database(reason: impl fmt::Display) -> Self {
        Self::infra(InfraKind::Database, reason.to_string())
    }

    /// Creates a `Lock` infrastructure error.
    pub fn lock(reason: impl fmt::Display) -> Self {
        Self::infra(InfraKind::Lock, reason.to_string())
    }

    /// Creates a `Validation` bad request.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::BadRequest(BadRequestKind::Validation(reason.into()))
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// Only infrastructure failures are retryable. Business errors are final.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Infrastructure { .. })
    }

    /// Stable machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict(kind) => kind.code(),
            Self::BadRequest(kind) => kind.code(),
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Infrastructure { kind, .. } => kind.code(),
        }
    }
}
