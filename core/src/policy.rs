//! Coupon policies and the units issued from them.

use crate::error::{BadRequestKind, CouponError, Result};
use crate::ids::{CouponUnitId, PolicyId};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// What a policy's discount applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponScope {
    /// A single book.
    Book,
    /// A book category.
    Category,
    /// Hand-picked promotions.
    Custom,
    /// Issued once to every new member.
    Welcome,
    /// Issued yearly on the member's birthday.
    Birthday,
}

impl CouponScope {
    /// Database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Book => "BOOK",
            Self::Category => "CATEGORY",
            Self::Custom => "CUSTOM",
            Self::Welcome => "WELCOME",
            Self::Birthday => "BIRTHDAY",
        }
    }

    /// Parses the database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BOOK" => Some(Self::Book),
            "CATEGORY" => Some(Self::Category),
            "CUSTOM" => Some(Self::Custom),
            "WELCOME" => Some(Self::Welcome),
            "BIRTHDAY" => Some(Self::Birthday),
            _ => None,
        }
    }
}

/// How the discount value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    /// Fixed amount off.
    Fixed,
    /// Percentage off, capped by `max_discount`.
    Percent,
}

impl DiscountType {
    /// Database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fixed => "FIXED",
            Self::Percent => "PERCENT",
        }
    }

    /// Parses the database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FIXED" => Some(Self::Fixed),
            "PERCENT" => Some(Self::Percent),
            _ => None,
        }
    }
}

/// Whether a policy may issue new coupons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyStatus {
    /// Issuing.
    Active,
    /// Deactivated. Already issued coupons stay valid.
    Deactive,
}

impl PolicyStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Deactive => "DEACTIVE",
        }
    }

    /// Parses the database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "DEACTIVE" => Some(Self::Deactive),
            _ => None,
        }
    }
}

/// Longest relative validity a policy may configure, about a hundred years.
pub const MAX_VALID_DAYS: u32 = 36_500;

/// Validity window of coupons issued from a policy.
///
/// Exactly one form is configured per policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Validity {
    /// Absolute date range, inclusive on both ends.
    Fixed {
        /// First day coupons can be issued and used.
        starts_on: NaiveDate,
        /// Last day coupons can be issued and used.
        ends_on: NaiveDate,
    },
    /// Valid for a number of days after issuance.
    Relative {
        /// Days of validity, counted from the issuance instant.
        days: u32,
    },
}

impl Validity {
    /// Builds a validity from the optional columns a policy is stored with.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest(InvalidValidity)` when both or neither forms are
    /// given, when only one end of the fixed range is given, when the range is
    /// reversed, or when `days` is outside `1..=MAX_VALID_DAYS`.
    pub fn from_parts(
        starts_on: Option<NaiveDate>,
        ends_on: Option<NaiveDate>,
        days: Option<i32>,
    ) -> Result<Self> {
        let invalid =
            |reason: &str| CouponError::BadRequest(BadRequestKind::InvalidValidity(reason.into()));

        match (starts_on, ends_on, days) {
            (Some(starts_on), Some(ends_on), None) => {
                if ends_on < starts_on {
                    return Err(invalid("end date precedes start date"));
                }
                Ok(Self::Fixed { starts_on, ends_on })
            }
            (None, None, Some(days)) => match u32::try_from(days) {
                Ok(days) if (1..=MAX_VALID_DAYS).contains(&days) => Ok(Self::Relative { days }),
                _ => Err(invalid("relative validity must be between 1 and 36500 days")),
            },
            (None, None, None) => Err(invalid("no validity configured")),
            (_, _, Some(_)) => Err(invalid("fixed and relative validity are exclusive")),
            _ => Err(invalid("fixed validity requires both start and end dates")),
        }
    }

    /// Instant after which a coupon issued at `issued_at` is expired.
    ///
    /// Fixed ranges end at the last millisecond of the end date (UTC).
    ///
    /// # Errors
    ///
    /// Returns `BadRequest(InvalidValidity)` when the end is not representable.
    pub fn end_at(&self, issued_at: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match *self {
            Self::Fixed { ends_on, .. } => Ok(ends_on
                .and_hms_milli_opt(23, 59, 59, 999)
                .unwrap_or_else(|| ends_on.and_time(NaiveTime::MIN))
                .and_utc()),
            Self::Relative { days } => Duration::try_days(i64::from(days))
                .and_then(|validity| issued_at.checked_add_signed(validity))
                .ok_or_else(|| {
                    CouponError::BadRequest(BadRequestKind::InvalidValidity(format!(
                        "{days} days from {issued_at} is out of range"
                    )))
                }),
        }
    }

    /// Splits back into the optional storage columns.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)] // days is constructed from a positive i32
    pub const fn into_parts(self) -> (Option<NaiveDate>, Option<NaiveDate>, Option<i32>) {
        match self {
            Self::Fixed { starts_on, ends_on } => (Some(starts_on), Some(ends_on), None),
            Self::Relative { days } => (None, None, Some(days as i32)),
        }
    }
}

/// A discount policy coupons are issued from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponPolicy {
    /// Policy identifier.
    pub id: PolicyId,
    /// Unique display name.
    pub name: String,
    /// What the discount applies to.
    pub scope: CouponScope,
    /// Discount interpretation.
    pub discount_type: DiscountType,
    /// Amount or percentage, depending on `discount_type`.
    pub discount_value: i64,
    /// Minimum order amount for the coupon to apply.
    pub min_order_amount: i64,
    /// Cap for percentage discounts.
    pub max_discount: Option<i64>,
    /// Validity window of issued coupons.
    pub validity: Validity,
    /// Issuance status.
    pub status: PolicyStatus,
    /// When the policy was created.
    pub created_at: DateTime<Utc>,
}

impl CouponPolicy {
    /// Checks that a coupon may be issued from this policy at `now`.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest(PolicyNotIssuable)` when the policy is deactivated
    /// or `now` falls outside a fixed validity range.
    pub fn ensure_issuable(&self, now: DateTime<Utc>) -> Result<()> {
        if self.status == PolicyStatus::Deactive {
            return Err(CouponError::BadRequest(BadRequestKind::PolicyNotIssuable));
        }

        if let Validity::Fixed { starts_on, ends_on } = self.validity {
            let today = now.date_naive();
            if today < starts_on || today > ends_on {
                return Err(CouponError::BadRequest(BadRequestKind::PolicyNotIssuable));
            }
        }

        Ok(())
    }

    /// Deactivates the policy. New issuance stops; issued coupons are untouched.
    pub const fn deactivate(&mut self) {
        self.status = PolicyStatus::Deactive;
    }
}

/// A quantity of coupons that can be issued from a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponUnit {
    /// Unit identifier.
    pub id: CouponUnitId,
    /// Policy the unit issues from.
    pub policy_id: PolicyId,
    /// Remaining quantity. `None` means unlimited.
    pub remaining: Option<i64>,
}

impl CouponUnit {
    /// Whether the unit has no quantity limit.
    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        self.remaining.is_none()
    }

    /// Takes `n` coupons out of the unit.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest(OutOfStock)` if fewer than `n` remain. The unit is
    /// left unchanged on error.
    pub fn decrease(&mut self, n: i64) -> Result<()> {
        if let Some(remaining) = self.remaining {
            if remaining < n {
                return Err(CouponError::BadRequest(BadRequestKind::OutOfStock));
            }
            self.remaining = Some(remaining - n);
        }
        Ok(())
    }

    /// Puts `n` coupons back into the unit.
    pub fn increase(&mut self, n: i64) {
        if let Some(remaining) = self.remaining {
            self.remaining = Some(remaining.saturating_add(n));
        }
    }
}
