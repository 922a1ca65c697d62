//! Coupon service process.
//!
//! Runs the HTTP API, the four workflow consumers and the scheduled jobs in
//! one process.
//!
//! # Usage
//!
//! ```bash
//! # Start infrastructure
//! docker compose up -d
//!
//! # Run server
//! cargo run --bin coupon-service
//! ```

use anyhow::Context;
use axum::{Router, extract::State, routing::get};
use coupon_core::environment::{Clock, SystemClock};
use coupon_core::lock::DistributedLock;
use coupon_core::message::Workflow;
use coupon_core::queue::{DeadLetterQueue, MessageQueue};
use coupon_core::stock::StockCounter;
use coupon_core::store::CouponStore;
use coupon_postgres::{PostgresCouponStore, PostgresMemberDirectory};
use coupon_redis::{RedisLock, RedisStockCounter};
use coupon_redpanda::RedpandaQueue;
use coupon_runtime::metrics::MetricsServer;
use coupon_runtime::{
    Job, LockBounds, LockedJob, MessageHandler, QueueConsumer, RetryPolicy, spawn_periodic,
};
use coupon_service::admission::IssuanceAdmission;
use coupon_service::alerting::LoggingAlertSender;
use coupon_service::birthday::BirthdayIssuanceJob;
use coupon_service::config::{Config, LogFormat};
use coupon_service::expiration::ExpirationJob;
use coupon_service::fulfillment::{CampaignHandler, CancellationHandler, IssuanceHandler};
use coupon_service::member_coupons::MemberCouponService;
use coupon_service::reconciliation::StockReconciliationJob;
use coupon_service::recovery::DlqRecoveryJob;
use coupon_service::server::readiness::{CacheCheck, DatabaseCheck};
use coupon_service::server::{AppState, build_router};
use coupon_web::handlers::{ReadinessCheck, ReadinessChecks};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    config.validate()?;
    init_tracing(config.server.log_format);

    info!(
        postgres_url = %config.postgres.url,
        redis_url = %config.redis.url,
        redpanda_brokers = %config.redpanda.brokers,
        expiration_strategy = %config.expiration.strategy,
        "Configuration loaded"
    );

    // Metrics
    let metrics_addr: SocketAddr = config
        .metrics_addr()
        .parse()
        .context("Invalid metrics address")?;
    let mut metrics = MetricsServer::new(metrics_addr);
    metrics.start()?;
    let metrics = Arc::new(metrics);

    // Infrastructure
    info!("Connecting to database...");
    let postgres = PostgresCouponStore::connect(&config.postgres.url, config.postgres.max_connections).await?;
    postgres.migrate().await?;
    let directory = Arc::new(PostgresMemberDirectory::new(postgres.pool().clone()));
    let store: Arc<dyn CouponStore> = Arc::new(postgres.clone());
    info!("Database connected");

    info!("Connecting to Redis...");
    let redis = coupon_redis::connect(&config.redis.url).await?;
    let stock: Arc<dyn StockCounter> = Arc::new(RedisStockCounter::new(redis.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let lock: Arc<dyn DistributedLock> = Arc::new(RedisLock::new(redis.clone(), Arc::clone(&clock)));
    info!("Redis connected");

    info!("Connecting to Redpanda...");
    let redpanda = Arc::new(
        RedpandaQueue::builder()
            .brokers(&config.redpanda.brokers)
            .consumer_group(&config.redpanda.consumer_group)
            .build()?,
    );
    let queue: Arc<dyn MessageQueue> = redpanda.clone();
    let dlq: Arc<dyn DeadLetterQueue> = redpanda;
    info!("Redpanda connected");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // Services
    let admission = Arc::new(
        IssuanceAdmission::new(Arc::clone(&stock), Arc::clone(&queue), config.issuance.publish_timeout())
            .with_counter_timeout(config.issuance.counter_timeout()),
    );
    let member_coupons = Arc::new(MemberCouponService::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&clock),
    ));

    // Counters of units created while the service was down
    let reconciliation = Arc::new(StockReconciliationJob::new(Arc::clone(&store), Arc::clone(&stock)));
    match reconciliation.run().await {
        Ok(corrected) => info!(corrected, "Stock counters reconciled at startup"),
        Err(e) => warn!(error = %e, "Startup stock reconciliation failed"),
    }

    // Workflow consumers
    let campaign: Arc<dyn MessageHandler> =
        Arc::new(CampaignHandler::new(Arc::clone(&store), Arc::clone(&clock)));
    let handlers: [(Workflow, Arc<dyn MessageHandler>); 4] = [
        (
            Workflow::Issuance,
            Arc::new(IssuanceHandler::new(Arc::clone(&store), Arc::clone(&stock), Arc::clone(&clock)))
                as Arc<dyn MessageHandler>,
        ),
        (
            Workflow::Cancellation,
            Arc::new(CancellationHandler::new(Arc::clone(&member_coupons))) as Arc<dyn MessageHandler>,
        ),
        (Workflow::Welcome, Arc::clone(&campaign)),
        (Workflow::Birthday, campaign),
    ];
    let attempts = config.issuance.max_delivery_attempts as usize;
    for (workflow, handler) in handlers {
        let consumer = QueueConsumer::new(
            workflow,
            Arc::clone(&queue),
            Arc::clone(&dlq),
            handler,
            shutdown_tx.subscribe(),
        )
        .with_retry_policy(RetryPolicy::with_max_attempts(attempts));
        tasks.push(consumer.spawn());
    }
    info!(attempts, "Workflow consumers started");

    // Scheduled jobs
    let bounds = LockBounds {
        at_least: Duration::from_secs(config.jobs.lock_at_least_secs),
        at_most: Duration::from_secs(config.jobs.lock_at_most_secs),
    };
    let locked = |job: Arc<dyn Job>| -> Arc<dyn Job> {
        Arc::new(LockedJob::new(job, Arc::clone(&lock), Arc::clone(&clock), bounds))
    };

    // Consumer group membership already makes DLQ draining exclusive
    let recovery: Arc<dyn Job> = Arc::new(DlqRecoveryJob::new(
        Arc::clone(&dlq),
        Arc::clone(&queue),
        Arc::clone(&stock),
        Arc::new(LoggingAlertSender),
        config.recovery.escalation_threshold,
    ));
    let expiration: Arc<dyn Job> = Arc::new(ExpirationJob::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        config.expiration.strategy,
        config.expiration.chunk_size,
        config.expiration.max_chunk_retries,
    ));
    let birthday: Arc<dyn Job> = Arc::new(BirthdayIssuanceJob::new(
        directory,
        Arc::clone(&queue),
        Arc::clone(&clock),
    ));
    let reconcile: Arc<dyn Job> = reconciliation;

    for (job, interval_secs) in [
        (recovery, config.recovery.interval_secs),
        (locked(expiration), config.expiration.interval_secs),
        (locked(birthday), config.jobs.birthday_interval_secs),
        (locked(reconcile), config.jobs.reconcile_interval_secs),
    ] {
        tasks.push(spawn_periodic(
            job,
            Duration::from_secs(interval_secs),
            shutdown_tx.subscribe(),
        ));
    }
    info!("Scheduled jobs started");

    // Metrics endpoint
    let metrics_app = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(Arc::clone(&metrics));
    let metrics_listener = tokio::net::TcpListener::bind(metrics.addr()).await?;
    let mut metrics_shutdown = shutdown_tx.subscribe();
    tasks.push(tokio::spawn(async move {
        let served = axum::serve(metrics_listener, metrics_app)
            .with_graceful_shutdown(async move {
                let _ = metrics_shutdown.recv().await;
            })
            .await;
        if let Err(e) = served {
            error!(error = %e, "Metrics server failed");
        }
    }));
    info!(address = %metrics_addr, "Metrics endpoint listening");

    // HTTP API
    let readiness: ReadinessChecks = Arc::new(vec![
        Arc::new(DatabaseCheck(postgres)) as Arc<dyn ReadinessCheck>,
        Arc::new(CacheCheck(redis)) as Arc<dyn ReadinessCheck>,
    ]);
    let app = build_router(AppState::new(admission, member_coupons, readiness));

    let addr = config.http_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop consumers and jobs, give in-flight work a bounded grace period
    info!("Shutting down background tasks...");
    let _ = shutdown_tx.send(());
    let grace = Duration::from_secs(config.server.shutdown_timeout);
    if tokio::time::timeout(grace, futures::future::join_all(tasks)).await.is_err() {
        warn!(timeout_secs = grace.as_secs(), "Background tasks did not stop in time");
    }

    info!("Server stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,coupon_service=debug,sqlx=warn,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn render_metrics(State(metrics): State<Arc<MetricsServer>>) -> String {
    metrics.render().unwrap_or_default()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}
