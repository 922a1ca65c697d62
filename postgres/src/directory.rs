//! Member directory read from the membership system's `members` table.

use coupon_core::directory::MemberDirectory;
use coupon_core::ids::UserId;
use coupon_core::{BoxFuture, CouponError, Result};
use sqlx::postgres::PgPool;

/// [`MemberDirectory`] over the `members` table (`id BIGINT`,
/// `birth_date DATE`) owned by the membership system and shared through
/// the same database.
#[derive(Clone, Debug)]
pub struct PostgresMemberDirectory {
    pool: PgPool,
}

impl PostgresMemberDirectory {
    /// Wraps a pool that can read `members`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl MemberDirectory for PostgresMemberDirectory {
    fn birthdays_on(&self, month: u32, day: u32) -> BoxFuture<'_, Result<Vec<UserId>>> {
        Box::pin(async move {
            let ids: Vec<i64> = sqlx::query_scalar(
                "SELECT id FROM members \
                 WHERE birth_date IS NOT NULL \
                   AND EXTRACT(MONTH FROM birth_date) = $1 \
                   AND EXTRACT(DAY FROM birth_date) = $2 \
                 ORDER BY id",
            )
            .bind(i32::try_from(month).unwrap_or(0))
            .bind(i32::try_from(day).unwrap_or(0))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CouponError::database(format!("Failed to read birthdays: {e}")))?;

            Ok(ids.into_iter().map(UserId::new).collect())
        })
    }
}
