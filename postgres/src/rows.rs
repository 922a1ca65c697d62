//! Row decoding.

use coupon_core::ids::{CouponUnitId, MemberCouponId, OrderId, PolicyId, UserId};
use coupon_core::member_coupon::{CouponStatus, MemberCoupon, MemberCouponSummary};
use coupon_core::policy::{CouponPolicy, CouponScope, CouponUnit, DiscountType, PolicyStatus, Validity};
use coupon_core::{CouponError, Result};
use sqlx::Row;
use sqlx::postgres::PgRow;

pub(crate) const POLICY_COLUMNS: &str = "id, name, scope, discount_type, discount_value, \
     min_order_amount, max_discount, starts_on, ends_on, valid_days, status, created_at";

pub(crate) const UNIT_COLUMNS: &str = "id, policy_id, remaining";

pub(crate) const MEMBER_COUPON_COLUMNS: &str =
    "id, user_id, coupon_unit_id, status, issued_at, ends_at, used_at, order_id";

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| CouponError::database(format!("Failed to decode column {name}: {e}")))
}

fn corrupt(column: &str, value: &str) -> CouponError {
    CouponError::database(format!("Unrecognized {column} value: {value}"))
}

pub(crate) fn policy_from_row(row: &PgRow) -> Result<CouponPolicy> {
    let scope: String = column(row, "scope")?;
    let discount_type: String = column(row, "discount_type")?;
    let status: String = column(row, "status")?;

    // Stored policies are validated by the table's check constraint
    let validity = Validity::from_parts(
        column(row, "starts_on")?,
        column(row, "ends_on")?,
        column(row, "valid_days")?,
    )
    .map_err(|e| CouponError::database(format!("Stored policy has invalid validity: {e}")))?;

    Ok(CouponPolicy {
        id: PolicyId::new(column(row, "id")?),
        name: column(row, "name")?,
        scope: CouponScope::parse(&scope).ok_or_else(|| corrupt("scope", &scope))?,
        discount_type: DiscountType::parse(&discount_type)
            .ok_or_else(|| corrupt("discount_type", &discount_type))?,
        discount_value: column(row, "discount_value")?,
        min_order_amount: column(row, "min_order_amount")?,
        max_discount: column(row, "max_discount")?,
        validity,
        status: PolicyStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        created_at: column(row, "created_at")?,
    })
}

pub(crate) fn unit_from_row(row: &PgRow) -> Result<CouponUnit> {
    Ok(CouponUnit {
        id: CouponUnitId::new(column(row, "id")?),
        policy_id: PolicyId::new(column(row, "policy_id")?),
        remaining: column(row, "remaining")?,
    })
}

fn status_from_row(row: &PgRow) -> Result<CouponStatus> {
    let status: String = column(row, "status")?;
    CouponStatus::parse(&status).ok_or_else(|| corrupt("status", &status))
}

pub(crate) fn member_coupon_from_row(row: &PgRow) -> Result<MemberCoupon> {
    let order_id: Option<i64> = column(row, "order_id")?;
    Ok(MemberCoupon {
        id: MemberCouponId::new(column(row, "id")?),
        user_id: UserId::new(column(row, "user_id")?),
        coupon_unit_id: CouponUnitId::new(column(row, "coupon_unit_id")?),
        status: status_from_row(row)?,
        issued_at: column(row, "issued_at")?,
        ends_at: column(row, "ends_at")?,
        used_at: column(row, "used_at")?,
        order_id: order_id.map(OrderId::new),
    })
}

/// Decodes the listing join, which aliases policy columns with a `policy_` prefix.
pub(crate) fn summary_from_row(row: &PgRow) -> Result<MemberCouponSummary> {
    let scope: String = column(row, "policy_scope")?;
    let discount_type: String = column(row, "policy_discount_type")?;
    Ok(MemberCouponSummary {
        id: MemberCouponId::new(column(row, "id")?),
        coupon_unit_id: CouponUnitId::new(column(row, "coupon_unit_id")?),
        status: status_from_row(row)?,
        issued_at: column(row, "issued_at")?,
        ends_at: column(row, "ends_at")?,
        used_at: column(row, "used_at")?,
        policy_name: column(row, "policy_name")?,
        scope: CouponScope::parse(&scope).ok_or_else(|| corrupt("scope", &scope))?,
        discount_type: DiscountType::parse(&discount_type)
            .ok_or_else(|| corrupt("discount_type", &discount_type))?,
        discount_value: column(row, "policy_discount_value")?,
        min_order_amount: column(row, "policy_min_order_amount")?,
        max_discount: column(row, "policy_max_discount")?,
    })
}
