//! Admission hot path benchmarks
//!
//! Measures the synchronous part of an issuance request (counter decrement
//! plus queue hand-off) over the in-memory collaborators, so the numbers are
//! the service's own overhead without network round trips.
//!
//! Run with: `cargo bench --bench admission`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use coupon_core::ids::{CouponUnitId, UserId};
use coupon_service::admission::IssuanceAdmission;
use coupon_testing::{InMemoryQueue, InMemoryStockCounter};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

const UNIT: CouponUnitId = CouponUnitId::new(1);

fn admission(stock: i64) -> (IssuanceAdmission, InMemoryStockCounter) {
    let counter = InMemoryStockCounter::new();
    counter.set(UNIT, stock);
    let admission = IssuanceAdmission::new(
        Arc::new(counter.clone()),
        Arc::new(InMemoryQueue::new()),
        Duration::from_secs(1),
    );
    (admission, counter)
}

/// Accepted requests: decrement and publish.
fn benchmark_accepted(c: &mut Criterion) {
    let runtime = Runtime::new().expect("Failed to build runtime");
    let mut group = c.benchmark_group("admission");
    group.throughput(Throughput::Elements(1));

    let (admission, _counter) = admission(i64::MAX);
    group.bench_function("accepted", |b| {
        b.to_async(&runtime).iter(|| async {
            black_box(
                admission
                    .request_issuance(black_box(UserId::new(1)), UNIT)
                    .await
                    .expect("Admission should succeed"),
            );
        });
    });

    group.finish();
}

/// Rejected requests: a sold-out unit, the common case under a flash sale.
fn benchmark_sold_out(c: &mut Criterion) {
    let runtime = Runtime::new().expect("Failed to build runtime");
    let mut group = c.benchmark_group("admission");
    group.throughput(Throughput::Elements(1));

    let (admission, _counter) = admission(0);
    group.bench_function("sold_out", |b| {
        b.to_async(&runtime).iter(|| async {
            black_box(
                admission
                    .request_issuance(black_box(UserId::new(1)), UNIT)
                    .await
                    .expect("Admission should decide"),
            );
        });
    });

    group.finish();
}

/// Concurrent requests against one unit.
fn benchmark_concurrent(c: &mut Criterion) {
    let runtime = Runtime::new().expect("Failed to build runtime");
    let mut group = c.benchmark_group("admission_concurrent");

    for requests in [10_u64, 100, 1_000] {
        group.throughput(Throughput::Elements(requests));
        group.bench_with_input(BenchmarkId::from_parameter(requests), &requests, |b, &requests| {
            b.to_async(&runtime).iter(|| async move {
                let (admission, _counter) = admission(i64::try_from(requests / 2).unwrap_or(0));
                let admission = Arc::new(admission);
                let tasks: Vec<_> = (0..requests)
                    .map(|user| {
                        let admission = Arc::clone(&admission);
                        tokio::spawn(async move {
                            admission
                                .request_issuance(UserId::new(i64::try_from(user).unwrap_or(0)), UNIT)
                                .await
                        })
                    })
                    .collect();
                for task in tasks {
                    black_box(task.await.expect("Task should not panic").expect("Admission should decide"));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_accepted, benchmark_sold_out, benchmark_concurrent);
criterion_main!(benches);
