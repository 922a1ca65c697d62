//! End-to-end issuance scenarios over the in-memory collaborators.
//!
//! Admission, the issuance consumer and DLQ recovery are wired exactly as in
//! the service process; only the infrastructure is replaced.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use coupon_core::error::{BadRequestKind, ConflictKind};
use coupon_core::ids::{CouponUnitId, PolicyId, UserId};
use coupon_core::message::{CouponMessage, Envelope, Workflow};
use coupon_core::queue::DeadLetterQueue;
use coupon_core::policy::{CouponPolicy, CouponScope, Validity};
use coupon_core::CouponError;
use coupon_runtime::{Job, MessageHandler, QueueConsumer, RetryPolicy, Settlement};
use coupon_service::admission::{Admission, IssuanceAdmission};
use coupon_service::fulfillment::IssuanceHandler;
use coupon_service::recovery::{DlqRecoveryJob, Recovery};
use coupon_testing::helpers;
use coupon_testing::{
    InMemoryCouponStore, InMemoryQueue, InMemoryStockCounter, RecordingAlertSender, test_clock,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const UNIT: CouponUnitId = CouponUnitId::new(1);

// ============================================================================
// Fixture
// ============================================================================

struct World {
    store: InMemoryCouponStore,
    stock: InMemoryStockCounter,
    queue: InMemoryQueue,
    alerts: RecordingAlertSender,
    admission: Arc<IssuanceAdmission>,
    consumer: QueueConsumer,
    _shutdown: broadcast::Sender<()>,
}

impl World {
    /// A book coupon unit with `stock` coupons, counter seeded to match.
    fn with_stock(stock: i64) -> Self {
        let store = InMemoryCouponStore::new();
        store.insert_policy(helpers::policy(1, CouponScope::Book));
        store.insert_unit(helpers::unit(1, 1, Some(stock)));

        let counter = InMemoryStockCounter::new();
        counter.set(UNIT, stock);
        let queue = InMemoryQueue::new();

        let admission = Arc::new(IssuanceAdmission::new(
            Arc::new(counter.clone()),
            Arc::new(queue.clone()),
            Duration::from_secs(1),
        ));

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let handler = IssuanceHandler::new(
            Arc::new(store.clone()),
            Arc::new(counter.clone()),
            Arc::new(test_clock()),
        );
        let consumer = QueueConsumer::new(
            Workflow::Issuance,
            Arc::new(queue.clone()),
            Arc::new(queue.clone()),
            Arc::new(handler),
            shutdown_rx,
        )
        .with_retry_policy(
            RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(1))
                .build(),
        );

        Self {
            store,
            stock: counter,
            queue,
            alerts: RecordingAlertSender::new(),
            admission,
            consumer,
            _shutdown: shutdown,
        }
    }

    fn recovery(&self) -> DlqRecoveryJob {
        DlqRecoveryJob::new(
            Arc::new(self.queue.clone()),
            Arc::new(self.queue.clone()),
            Arc::new(self.stock.clone()),
            Arc::new(self.alerts.clone()),
            3,
        )
        .with_workflows(vec![Workflow::Issuance])
    }

    /// Settles every pending issuance message, returning the settlements.
    async fn fulfill_all(&self) -> Vec<Settlement> {
        let mut settlements = Vec::new();
        while let Some(delivery) = self.queue.take(Workflow::Issuance) {
            settlements.push(self.consumer.settle(delivery).await);
        }
        settlements
    }

    fn counter(&self) -> Option<i64> {
        self.stock.value(UNIT)
    }
}

// ============================================================================
// Admission bounds
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admission_never_exceeds_stock() {
    let world = World::with_stock(10);

    let mut tasks = Vec::new();
    for user in 1..=200 {
        let admission = Arc::clone(&world.admission);
        tasks.push(tokio::spawn(async move {
            admission.request_issuance(UserId::new(user), UNIT).await
        }));
    }

    let mut accepted = 0;
    for task in tasks {
        match task.await.unwrap().unwrap() {
            Admission::Accepted => accepted += 1,
            Admission::Rejected(reason) => assert_eq!(reason, BadRequestKind::OutOfStock),
        }
    }

    assert_eq!(accepted, 10);
    assert_eq!(world.queue.pending(Workflow::Issuance).len(), 10);

    let settlements = world.fulfill_all().await;
    assert!(settlements.iter().all(|s| *s == Settlement::Completed));
    assert_eq!(world.store.member_coupons().len(), 10);
    assert_eq!(world.store.remaining(UNIT), Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_last_coupon_goes_to_exactly_one_of_two_members() {
    let world = World::with_stock(1);

    let requests: Vec<_> = [1, 2]
        .into_iter()
        .map(|user| {
            let admission = Arc::clone(&world.admission);
            tokio::spawn(async move { (user, admission.request_issuance(UserId::new(user), UNIT).await) })
        })
        .collect();

    let mut winners = Vec::new();
    for request in requests {
        let (user, admission) = request.await.unwrap();
        match admission.unwrap() {
            Admission::Accepted => winners.push(user),
            Admission::Rejected(reason) => assert_eq!(reason, BadRequestKind::OutOfStock),
        }
    }
    assert_eq!(winners.len(), 1);
    let (winner, loser) = if winners[0] == 1 { (1, 2) } else { (2, 1) };

    world.fulfill_all().await;

    assert_eq!(world.store.coupons_of(UserId::new(winner)).len(), 1);
    assert!(world.store.coupons_of(UserId::new(loser)).is_empty());
    assert_eq!(world.store.remaining(UNIT), Some(0));
    // Rejections do not restore: the unit stays closed
    assert_eq!(world.counter(), Some(-1));
}

#[tokio::test]
async fn test_failed_hand_off_gives_the_slot_back() {
    let world = World::with_stock(1);
    world.queue.set_publish_failure(Some(CouponError::queue("broker down")));

    let err = world
        .admission
        .request_issuance(UserId::new(1), UNIT)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(world.counter(), Some(1));

    world.queue.set_publish_failure(None);
    let retried = world.admission.request_issuance(UserId::new(1), UNIT).await.unwrap();
    assert_eq!(retried, Admission::Accepted);
}

// ============================================================================
// Fulfillment idempotence
// ============================================================================

#[tokio::test]
async fn test_duplicate_request_issues_once() {
    let world = World::with_stock(5);

    for _ in 0..2 {
        let admitted = world.admission.request_issuance(UserId::new(7), UNIT).await.unwrap();
        assert_eq!(admitted, Admission::Accepted);
    }

    let settlements = world.fulfill_all().await;

    assert_eq!(settlements[0], Settlement::Completed);
    assert_eq!(
        settlements[1],
        Settlement::Rejected(CouponError::Conflict(ConflictKind::DuplicateIssuance))
    );
    assert_eq!(world.store.coupons_of(UserId::new(7)).len(), 1);
    assert_eq!(world.store.remaining(UNIT), Some(4));
    // The duplicate's admitted slot was handed back
    assert_eq!(world.counter(), Some(4));
}

#[tokio::test]
async fn test_redelivery_after_crash_is_idempotent() {
    let world = World::with_stock(5);
    world.admission.request_issuance(UserId::new(7), UNIT).await.unwrap();

    // The consumer issues, then dies before acknowledging
    let delivery = world.queue.take(Workflow::Issuance).unwrap();
    let handler = IssuanceHandler::new(
        Arc::new(world.store.clone()),
        Arc::new(world.stock.clone()),
        Arc::new(test_clock()),
    );
    handler.handle(&delivery.envelope).await.unwrap();
    world.queue.redeliver_in_flight(Workflow::Issuance);

    let settlements = world.fulfill_all().await;

    assert!(matches!(settlements[..], [Settlement::Rejected(_)]));
    assert_eq!(world.store.coupons_of(UserId::new(7)).len(), 1);
    assert_eq!(world.store.remaining(UNIT), Some(4));
    assert_eq!(world.queue.in_flight(&Workflow::Issuance.queue_name()), 0);
}

#[tokio::test]
async fn test_deactivated_policy_rejects_and_restores_counter() {
    let world = World::with_stock(3);
    world.admission.request_issuance(UserId::new(7), UNIT).await.unwrap();
    assert_eq!(world.counter(), Some(2));

    world.store.deactivate_policy(PolicyId::new(1));
    let settlements = world.fulfill_all().await;

    assert_eq!(
        settlements,
        vec![Settlement::Rejected(CouponError::BadRequest(
            BadRequestKind::PolicyNotIssuable
        ))]
    );
    assert_eq!(world.counter(), Some(3));
    assert!(world.store.member_coupons().is_empty());
}

#[tokio::test]
async fn test_unrepresentable_validity_is_rejected_without_stopping_the_consumer() {
    let world = World::with_stock(3);
    world.store.insert_policy(CouponPolicy {
        validity: Validity::Relative { days: u32::MAX },
        ..helpers::policy(1, CouponScope::Book)
    });
    world.admission.request_issuance(UserId::new(7), UNIT).await.unwrap();

    let settlements = world.fulfill_all().await;

    assert!(matches!(
        settlements[..],
        [Settlement::Rejected(CouponError::BadRequest(BadRequestKind::InvalidValidity(_)))]
    ));
    assert_eq!(world.counter(), Some(3));
    assert_eq!(world.store.remaining(UNIT), Some(3));

    // The store and consumer keep serving once the policy is fixed
    world.store.insert_policy(helpers::policy(1, CouponScope::Book));
    world.admission.request_issuance(UserId::new(8), UNIT).await.unwrap();
    assert_eq!(world.fulfill_all().await, vec![Settlement::Completed]);
}

// ============================================================================
// Dead letters
// ============================================================================

#[tokio::test]
async fn test_outage_is_requeued_then_fulfilled() {
    let world = World::with_stock(5);
    world.admission.request_issuance(UserId::new(7), UNIT).await.unwrap();

    // Three attempts, all failing
    world.store.fail_next_writes(3);
    let settlements = world.fulfill_all().await;
    assert!(matches!(settlements[..], [Settlement::DeadLettered(_)]));

    let handled = world.recovery().drain(Workflow::Issuance).await.unwrap();
    assert_eq!(handled, 1);
    let requeued = world.queue.pending(Workflow::Issuance);
    assert_eq!(requeued[0].history.death_count, 1);

    let settlements = world.fulfill_all().await;
    assert_eq!(settlements, vec![Settlement::Completed]);
    assert_eq!(world.store.coupons_of(UserId::new(7)).len(), 1);
    assert!(world.alerts.alerts().is_empty());
}

#[tokio::test]
async fn test_message_escalates_at_threshold() {
    let world = World::with_stock(5);
    world.admission.request_issuance(UserId::new(7), UNIT).await.unwrap();
    assert_eq!(world.counter(), Some(4));
    let recovery = world.recovery();

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        world.store.fail_next_writes(3);
        world.fulfill_all().await;

        let dead = world.queue.pop(Workflow::Issuance).await.unwrap().unwrap();
        outcomes.push(recovery.recover(&dead.envelope).await.unwrap());
        world.queue.ack_dead_letter(&dead.receipt).await.unwrap();
    }

    assert_eq!(
        outcomes,
        vec![Recovery::Requeued, Recovery::Requeued, Recovery::Escalated]
    );
    assert!(world.queue.pending(Workflow::Issuance).is_empty());
    assert!(world.store.member_coupons().is_empty());

    let alerts = world.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].body.contains("user_id=7"));
    // The escalated request's slot is back on the counter
    assert_eq!(world.counter(), Some(5));
}

#[tokio::test]
async fn test_issuance_recovery_leaves_other_workflows_alone() {
    let world = World::with_stock(5);
    let welcome = Envelope::new(CouponMessage::WelcomeCouponRequested {
        user_id: UserId::new(3),
    })
    .dead_lettered("database down");
    world.queue.dead_letter(&welcome).await.unwrap();

    let handled = world.recovery().run().await.unwrap();

    assert_eq!(handled, 0);
    assert_eq!(world.queue.dead_letters(Workflow::Welcome).len(), 1);
}
