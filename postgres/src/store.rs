//! `PostgreSQL` implementation of [`CouponStore`].

use crate::rows::{
    MEMBER_COUPON_COLUMNS, POLICY_COLUMNS, UNIT_COLUMNS, member_coupon_from_row, policy_from_row,
    summary_from_row, unit_from_row,
};
use chrono::{DateTime, Utc};
use coupon_core::error::{ConflictKind, Resource};
use coupon_core::ids::{CouponUnitId, MemberCouponId, OrderId, PolicyId, UserId};
use coupon_core::member_coupon::{CouponStatus, IssuancePeriod, MemberCoupon, MemberCouponSummary};
use coupon_core::policy::{CouponPolicy, CouponScope, CouponUnit};
use coupon_core::store::{CouponStore, Page, PageRequest};
use coupon_core::{BoxFuture, CouponError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

/// Coupon store backed by `PostgreSQL`.
///
/// # Schema
///
/// Tables are created by [`PostgresCouponStore::migrate`]:
/// `coupon_policies`, `coupon_units` and `member_coupons`, the latter with a
/// unique constraint on `(user_id, coupon_unit_id, issue_period)`.
#[derive(Clone, Debug)]
pub struct PostgresCouponStore {
    pool: PgPool,
}

impl PostgresCouponStore {
    /// Wraps an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns a `Database` error if the connection cannot be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| CouponError::database(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Runs pending migrations.
    ///
    /// # Errors
    ///
    /// Returns a `Database` error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CouponError::database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trips a trivial query, for readiness probes.
    ///
    /// # Errors
    ///
    /// Returns a `Database` error if no connection can serve it.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| CouponError::database(format!("Ping failed: {e}")))?;
        Ok(())
    }

    /// Inserts a policy and returns its assigned id.
    ///
    /// Policy administration lives outside this service; this is used to seed
    /// campaigns and test data.
    ///
    /// # Errors
    ///
    /// `Database` on failure, including a duplicate name.
    pub async fn insert_policy(&self, policy: &CouponPolicy) -> Result<PolicyId> {
        let (starts_on, ends_on, valid_days) = policy.validity.into_parts();
        let id: i64 = sqlx::query_scalar(
            r"
            INSERT INTO coupon_policies
                (name, scope, discount_type, discount_value, min_order_amount, max_discount,
                 starts_on, ends_on, valid_days, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            ",
        )
        .bind(&policy.name)
        .bind(policy.scope.as_str())
        .bind(policy.discount_type.as_str())
        .bind(policy.discount_value)
        .bind(policy.min_order_amount)
        .bind(policy.max_discount)
        .bind(starts_on)
        .bind(ends_on)
        .bind(valid_days)
        .bind(policy.status.as_str())
        .bind(policy.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CouponError::database(format!("Failed to insert policy: {e}")))?;

        Ok(PolicyId::new(id))
    }

    /// Inserts a unit for `policy_id` and returns its assigned id.
    ///
    /// # Errors
    ///
    /// `Database` on failure.
    pub async fn insert_unit(
        &self,
        policy_id: PolicyId,
        remaining: Option<i64>,
    ) -> Result<CouponUnitId> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO coupon_units (policy_id, remaining) VALUES ($1, $2) RETURNING id",
        )
        .bind(policy_id.get())
        .bind(remaining)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CouponError::database(format!("Failed to insert unit: {e}")))?;

        Ok(CouponUnitId::new(id))
    }

    async fn issue_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        unit_id: CouponUnitId,
        period: IssuancePeriod,
        now: DateTime<Utc>,
    ) -> Result<MemberCoupon> {
        // Serializes concurrent issuance from the same unit
        let unit_row = sqlx::query(&format!(
            "SELECT {UNIT_COLUMNS} FROM coupon_units WHERE id = $1 FOR UPDATE"
        ))
        .bind(unit_id.get())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| CouponError::database(format!("Failed to lock unit: {e}")))?
        .ok_or_else(|| CouponError::not_found(Resource::CouponUnit, unit_id))?;
        let mut unit = unit_from_row(&unit_row)?;

        let policy_row = sqlx::query(&format!(
            "SELECT {POLICY_COLUMNS} FROM coupon_policies WHERE id = $1"
        ))
        .bind(unit.policy_id.get())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| CouponError::database(format!("Failed to load policy: {e}")))?
        .ok_or_else(|| CouponError::not_found(Resource::Policy, unit.policy_id))?;
        let policy = policy_from_row(&policy_row)?;

        policy.ensure_issuable(now)?;

        let already_issued: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM member_coupons \
             WHERE user_id = $1 AND coupon_unit_id = $2 AND issue_period = $3)",
        )
        .bind(user_id.get())
        .bind(unit_id.get())
        .bind(period.key())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| CouponError::database(format!("Failed to check duplicate: {e}")))?;
        if already_issued {
            return Err(CouponError::Conflict(ConflictKind::DuplicateIssuance));
        }

        let mut coupon = MemberCoupon::issue(MemberCouponId::new(0), user_id, unit_id, &policy, now)?;
        unit.decrease(1)?;
        if let Some(remaining) = unit.remaining {
            sqlx::query("UPDATE coupon_units SET remaining = $2 WHERE id = $1")
                .bind(unit_id.get())
                .bind(remaining)
                .execute(&mut **tx)
                .await
                .map_err(|e| CouponError::database(format!("Failed to update unit: {e}")))?;
        }

        let id: i64 = sqlx::query_scalar(
            r"
            INSERT INTO member_coupons (user_id, coupon_unit_id, status, issued_at, ends_at, issue_period)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            ",
        )
        .bind(user_id.get())
        .bind(unit_id.get())
        .bind(coupon.status.as_str())
        .bind(coupon.issued_at)
        .bind(coupon.ends_at)
        .bind(period.key())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                CouponError::Conflict(ConflictKind::DuplicateIssuance)
            }
            e => CouponError::database(format!("Failed to insert member coupon: {e}")),
        })?;
        coupon.id = MemberCouponId::new(id);

        Ok(coupon)
    }
}

impl CouponStore for PostgresCouponStore {
    fn find_unit(&self, id: CouponUnitId) -> BoxFuture<'_, Result<CouponUnit>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {UNIT_COLUMNS} FROM coupon_units WHERE id = $1"
            ))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CouponError::database(format!("Failed to load unit: {e}")))?
            .ok_or_else(|| CouponError::not_found(Resource::CouponUnit, id))?;
            unit_from_row(&row)
        })
    }

    fn find_active_unit_by_scope(&self, scope: CouponScope) -> BoxFuture<'_, Result<CouponUnit>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT u.id, u.policy_id, u.remaining
                FROM coupon_units u
                JOIN coupon_policies p ON p.id = u.policy_id
                WHERE p.scope = $1 AND p.status = 'ACTIVE'
                ORDER BY p.created_at DESC, p.id DESC, u.id
                LIMIT 1
                ",
            )
            .bind(scope.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CouponError::database(format!("Failed to find {scope:?} unit: {e}")))?
            .ok_or_else(|| CouponError::not_found(Resource::Policy, scope.as_str()))?;
            unit_from_row(&row)
        })
    }

    fn list_finite_units(&self) -> BoxFuture<'_, Result<Vec<CouponUnit>>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {UNIT_COLUMNS} FROM coupon_units WHERE remaining IS NOT NULL ORDER BY id"
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CouponError::database(format!("Failed to list units: {e}")))?;
            rows.iter().map(unit_from_row).collect()
        })
    }

    fn issue_in_period(
        &self,
        user_id: UserId,
        unit_id: CouponUnitId,
        period: IssuancePeriod,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<MemberCoupon>> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| CouponError::database(format!("Failed to begin transaction: {e}")))?;

            // Dropping the transaction on error rolls it back
            let coupon = Self::issue_in_tx(&mut tx, user_id, unit_id, period, now).await?;

            tx.commit()
                .await
                .map_err(|e| CouponError::database(format!("Failed to commit issuance: {e}")))?;

            tracing::debug!(
                user_id = %user_id,
                coupon_unit_id = %unit_id,
                member_coupon_id = %coupon.id,
                "Issued member coupon"
            );
            Ok(coupon)
        })
    }

    fn find_member_coupon(&self, id: MemberCouponId) -> BoxFuture<'_, Result<MemberCoupon>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {MEMBER_COUPON_COLUMNS} FROM member_coupons WHERE id = $1"
            ))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CouponError::database(format!("Failed to load member coupon: {e}")))?
            .ok_or_else(|| CouponError::not_found(Resource::MemberCoupon, id))?;
            member_coupon_from_row(&row)
        })
    }

    fn find_member_coupons_by_order(
        &self,
        order_id: OrderId,
    ) -> BoxFuture<'_, Result<Vec<MemberCoupon>>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {MEMBER_COUPON_COLUMNS} FROM member_coupons WHERE order_id = $1 ORDER BY id"
            ))
            .bind(order_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CouponError::database(format!("Failed to load order coupons: {e}")))?;
            rows.iter().map(member_coupon_from_row).collect()
        })
    }

    fn save_member_coupon(
        &self,
        coupon: &MemberCoupon,
        expected: CouponStatus,
    ) -> BoxFuture<'_, Result<()>> {
        let coupon = coupon.clone();
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE member_coupons
                SET status = $2, used_at = $3, order_id = $4
                WHERE id = $1 AND status = $5
                ",
            )
            .bind(coupon.id.get())
            .bind(coupon.status.as_str())
            .bind(coupon.used_at)
            .bind(coupon.order_id.map(OrderId::get))
            .bind(expected.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| CouponError::database(format!("Failed to save member coupon: {e}")))?;

            if result.rows_affected() > 0 {
                return Ok(());
            }

            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM member_coupons WHERE id = $1)")
                    .bind(coupon.id.get())
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| {
                        CouponError::database(format!("Failed to check member coupon: {e}"))
                    })?;

            if exists {
                tracing::warn!(
                    member_coupon_id = %coupon.id,
                    expected = expected.as_str(),
                    "Member coupon changed concurrently"
                );
                Err(CouponError::Conflict(ConflictKind::ConcurrentModification))
            } else {
                Err(CouponError::not_found(Resource::MemberCoupon, coupon.id))
            }
        })
    }

    fn find_expirable(
        &self,
        now: DateTime<Utc>,
        after: Option<MemberCouponId>,
        limit: u32,
    ) -> BoxFuture<'_, Result<Vec<MemberCoupon>>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                r"
                SELECT {MEMBER_COUPON_COLUMNS}
                FROM member_coupons
                WHERE status = 'NOT_USED' AND ends_at < $1 AND id > $2
                ORDER BY id
                LIMIT $3
                "
            ))
            .bind(now)
            .bind(after.map_or(0, MemberCouponId::get))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CouponError::database(format!("Failed to scan expirable: {e}")))?;
            rows.iter().map(member_coupon_from_row).collect()
        })
    }

    fn save_expired(&self, coupons: &[MemberCoupon]) -> BoxFuture<'_, Result<u64>> {
        let ids: Vec<i64> = coupons.iter().map(|c| c.id.get()).collect();
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(0);
            }

            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| CouponError::database(format!("Failed to begin transaction: {e}")))?;

            let result = sqlx::query(
                "UPDATE member_coupons SET status = 'EXPIRED' WHERE id = ANY($1) AND status = 'NOT_USED'",
            )
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| CouponError::database(format!("Failed to expire chunk: {e}")))?;

            tx.commit()
                .await
                .map_err(|e| CouponError::database(format!("Failed to commit chunk: {e}")))?;

            Ok(result.rows_affected())
        })
    }

    fn expire_all_due(&self, now: DateTime<Utc>) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE member_coupons SET status = 'EXPIRED' WHERE status = 'NOT_USED' AND ends_at < $1",
            )
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| CouponError::database(format!("Failed to expire coupons: {e}")))?;
            Ok(result.rows_affected())
        })
    }

    fn list_member_coupons(
        &self,
        user_id: UserId,
        status: Option<CouponStatus>,
        page: PageRequest,
    ) -> BoxFuture<'_, Result<Page<MemberCouponSummary>>> {
        Box::pin(async move {
            let status = status.map(CouponStatus::as_str);

            let total: i64 = sqlx::query_scalar(
                r"
                SELECT COUNT(*)
                FROM member_coupons
                WHERE user_id = $1 AND ($2::TEXT IS NULL OR status = $2)
                ",
            )
            .bind(user_id.get())
            .bind(status)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CouponError::database(format!("Failed to count member coupons: {e}")))?;

            let offset = i64::try_from(page.offset())
                .map_err(|_| CouponError::validation("page offset out of range"))?;

            let rows = sqlx::query(
                r"
                SELECT mc.id, mc.coupon_unit_id, mc.status, mc.issued_at, mc.ends_at, mc.used_at,
                       p.name AS policy_name,
                       p.scope AS policy_scope,
                       p.discount_type AS policy_discount_type,
                       p.discount_value AS policy_discount_value,
                       p.min_order_amount AS policy_min_order_amount,
                       p.max_discount AS policy_max_discount
                FROM member_coupons mc
                JOIN coupon_units u ON u.id = mc.coupon_unit_id
                JOIN coupon_policies p ON p.id = u.policy_id
                WHERE mc.user_id = $1 AND ($2::TEXT IS NULL OR mc.status = $2)
                ORDER BY mc.issued_at DESC, mc.id DESC
                LIMIT $3 OFFSET $4
                ",
            )
            .bind(user_id.get())
            .bind(status)
            .bind(i64::from(page.size))
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CouponError::database(format!("Failed to list member coupons: {e}")))?;

            Ok(Page {
                items: rows.iter().map(summary_from_row).collect::<Result<_>>()?,
                page: page.page,
                size: page.size,
                total: u64::try_from(total).unwrap_or(0),
            })
        })
    }
}
