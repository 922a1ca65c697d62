//! In-memory relational store.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, Utc};
use coupon_core::error::{ConflictKind, Resource};
use coupon_core::ids::{CouponUnitId, MemberCouponId, OrderId, PolicyId, UserId};
use coupon_core::member_coupon::{CouponStatus, IssuancePeriod, MemberCoupon, MemberCouponSummary};
use coupon_core::policy::{CouponPolicy, CouponScope, CouponUnit, PolicyStatus};
use coupon_core::store::{CouponStore, Page, PageRequest};
use coupon_core::{BoxFuture, CouponError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct State {
    policies: HashMap<PolicyId, CouponPolicy>,
    units: BTreeMap<CouponUnitId, CouponUnit>,
    coupons: BTreeMap<MemberCouponId, MemberCoupon>,
    /// Issuance period key of each coupon; absent means `Once`
    periods: HashMap<MemberCouponId, i32>,
    next_coupon_id: i64,
    failing_writes: u32,
}

impl State {
    fn fail_write(&mut self) -> Result<()> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(CouponError::database("injected write failure"));
        }
        Ok(())
    }

    fn issue(
        &mut self,
        user_id: UserId,
        unit_id: CouponUnitId,
        period: IssuancePeriod,
        now: DateTime<Utc>,
    ) -> Result<MemberCoupon> {
        self.fail_write()?;

        let mut unit = self
            .units
            .get(&unit_id)
            .cloned()
            .ok_or_else(|| CouponError::not_found(Resource::CouponUnit, unit_id))?;
        let policy = self
            .policies
            .get(&unit.policy_id)
            .cloned()
            .ok_or_else(|| CouponError::not_found(Resource::Policy, unit.policy_id))?;

        policy.ensure_issuable(now)?;

        let duplicate = self
            .coupons
            .values()
            .any(|c| {
                c.user_id == user_id
                    && c.coupon_unit_id == unit_id
                    && self.periods.get(&c.id).copied().unwrap_or(0) == period.key()
            });
        if duplicate {
            return Err(CouponError::Conflict(ConflictKind::DuplicateIssuance));
        }

        let coupon = MemberCoupon::issue(
            MemberCouponId::new(self.next_coupon_id + 1),
            user_id,
            unit_id,
            &policy,
            now,
        )?;
        unit.decrease(1)?;

        self.next_coupon_id += 1;
        self.units.insert(unit_id, unit);
        self.periods.insert(coupon.id, period.key());
        self.coupons.insert(coupon.id, coupon.clone());
        Ok(coupon)
    }
}

/// Store holding everything in maps behind one lock, so every operation is
/// serialized exactly as the row lock serializes fulfillment of one unit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCouponStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryCouponStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a policy.
    pub fn insert_policy(&self, policy: CouponPolicy) {
        self.state.write().unwrap().policies.insert(policy.id, policy);
    }

    /// Insert or replace a unit.
    pub fn insert_unit(&self, unit: CouponUnit) {
        self.state.write().unwrap().units.insert(unit.id, unit);
    }

    /// Insert or replace a member coupon, bypassing issuance.
    pub fn insert_member_coupon(&self, coupon: MemberCoupon) {
        let mut state = self.state.write().unwrap();
        state.next_coupon_id = state.next_coupon_id.max(coupon.id.get());
        state.coupons.insert(coupon.id, coupon);
    }

    /// Deactivate a policy.
    pub fn deactivate_policy(&self, id: PolicyId) {
        if let Some(policy) = self.state.write().unwrap().policies.get_mut(&id) {
            policy.deactivate();
        }
    }

    /// Remaining quantity of a unit.
    #[must_use]
    pub fn remaining(&self, id: CouponUnitId) -> Option<i64> {
        self.state
            .read()
            .unwrap()
            .units
            .get(&id)
            .and_then(|u| u.remaining)
    }

    /// Every member coupon, ordered by id.
    #[must_use]
    pub fn member_coupons(&self) -> Vec<MemberCoupon> {
        self.state.read().unwrap().coupons.values().cloned().collect()
    }

    /// Member coupons of one member.
    #[must_use]
    pub fn coupons_of(&self, user_id: UserId) -> Vec<MemberCoupon> {
        self.state
            .read()
            .unwrap()
            .coupons
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Make the next `count` write operations fail with a `Database` error.
    pub fn fail_next_writes(&self, count: u32) {
        self.state.write().unwrap().failing_writes = count;
    }
}

impl CouponStore for InMemoryCouponStore {
    fn find_unit(&self, id: CouponUnitId) -> BoxFuture<'_, Result<CouponUnit>> {
        Box::pin(async move {
            self.state
                .read()
                .unwrap()
                .units
                .get(&id)
                .cloned()
                .ok_or_else(|| CouponError::not_found(Resource::CouponUnit, id))
        })
    }

    fn find_active_unit_by_scope(&self, scope: CouponScope) -> BoxFuture<'_, Result<CouponUnit>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            let mut active: Vec<&CouponPolicy> = state
                .policies
                .values()
                .filter(|p| p.scope == scope && p.status == PolicyStatus::Active)
                .collect();
            active.sort_by_key(|p| std::cmp::Reverse((p.created_at, p.id)));

            active
                .into_iter()
                .find_map(|policy| state.units.values().find(|u| u.policy_id == policy.id))
                .cloned()
                .ok_or_else(|| CouponError::not_found(Resource::Policy, scope.as_str()))
        })
    }

    fn list_finite_units(&self) -> BoxFuture<'_, Result<Vec<CouponUnit>>> {
        Box::pin(async move {
            Ok(self
                .state
                .read()
                .unwrap()
                .units
                .values()
                .filter(|u| !u.is_unlimited())
                .cloned()
                .collect())
        })
    }

    fn issue_in_period(
        &self,
        user_id: UserId,
        unit_id: CouponUnitId,
        period: IssuancePeriod,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<MemberCoupon>> {
        Box::pin(async move { self.state.write().unwrap().issue(user_id, unit_id, period, now) })
    }

    fn find_member_coupon(&self, id: MemberCouponId) -> BoxFuture<'_, Result<MemberCoupon>> {
        Box::pin(async move {
            self.state
                .read()
                .unwrap()
                .coupons
                .get(&id)
                .cloned()
                .ok_or_else(|| CouponError::not_found(Resource::MemberCoupon, id))
        })
    }

    fn find_member_coupons_by_order(
        &self,
        order_id: OrderId,
    ) -> BoxFuture<'_, Result<Vec<MemberCoupon>>> {
        Box::pin(async move {
            Ok(self
                .state
                .read()
                .unwrap()
                .coupons
                .values()
                .filter(|c| c.order_id == Some(order_id))
                .cloned()
                .collect())
        })
    }

    fn save_member_coupon(
        &self,
        coupon: &MemberCoupon,
        expected: CouponStatus,
    ) -> BoxFuture<'_, Result<()>> {
        let coupon = coupon.clone();
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            state.fail_write()?;
            match state.coupons.get_mut(&coupon.id) {
                Some(stored) if stored.status == expected => {
                    *stored = coupon;
                    Ok(())
                }
                Some(_) => Err(CouponError::Conflict(ConflictKind::ConcurrentModification)),
                None => Err(CouponError::not_found(Resource::MemberCoupon, coupon.id)),
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
            let state = self.state.read().unwrap();
            let start = after.map_or(i64::MIN, |id| id.get().saturating_add(1));
            Ok(state
                .coupons
                .range(MemberCouponId::new(start)..)
                .map(|(_, c)| c)
                .filter(|c| c.status == CouponStatus::NotUsed && c.ends_at < now)
                .take(limit as usize)
                .cloned()
                .collect())
        })
    }

    fn save_expired(&self, coupons: &[MemberCoupon]) -> BoxFuture<'_, Result<u64>> {
        let coupons = coupons.to_vec();
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            state.fail_write()?;
            let mut updated = 0;
            for coupon in coupons {
                if let Some(stored) = state.coupons.get_mut(&coupon.id) {
                    if stored.status == CouponStatus::NotUsed {
                        stored.status = CouponStatus::Expired;
                        updated += 1;
                    }
                }
            }
            Ok(updated)
        })
    }

    fn expire_all_due(&self, now: DateTime<Utc>) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            state.fail_write()?;
            let mut updated = 0;
            for coupon in state.coupons.values_mut() {
                if coupon.status == CouponStatus::NotUsed && coupon.ends_at < now {
                    coupon.status = CouponStatus::Expired;
                    updated += 1;
                }
            }
            Ok(updated)
        })
    }

    fn list_member_coupons(
        &self,
        user_id: UserId,
        status: Option<CouponStatus>,
        page: PageRequest,
    ) -> BoxFuture<'_, Result<Page<MemberCouponSummary>>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            let mut matching: Vec<&MemberCoupon> = state
                .coupons
                .values()
                .filter(|c| c.user_id == user_id && status.is_none_or(|s| c.status == s))
                .collect();
            matching.sort_by_key(|c| std::cmp::Reverse((c.issued_at, c.id)));

            let total = matching.len() as u64;
            let items = matching
                .into_iter()
                .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
                .take(page.size as usize)
                .filter_map(|coupon| {
                    let unit = state.units.get(&coupon.coupon_unit_id)?;
                    let policy = state.policies.get(&unit.policy_id)?;
                    Some(MemberCouponSummary::from_parts(coupon, policy))
                })
                .collect();

            Ok(Page {
                items,
                page: page.page,
                size: page.size,
                total,
            })
        })
    }
}
