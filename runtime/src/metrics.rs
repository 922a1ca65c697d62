//! Prometheus metrics for the coupon pipeline.
//!
//! Covers:
//! - Admission (accepted, out of stock, failed hand-off)
//! - Queue message handling per workflow
//! - DLQ recovery (requeued, escalated)
//! - Expiration batch
//! - Stock counter drift
//! - Lock-guarded job runs
//!
//! [`MetricsServer::start`] installs the process-wide recorder; the binary
//! serves [`MetricsServer::render`] on its own listener.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Latency buckets shared by every `*_duration_seconds` histogram, from a
/// cache round trip up to a slow consumer retry cycle.
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Failure to set up the Prometheus recorder.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Exporter configuration was rejected
    #[error("invalid metrics exporter configuration: {0}")]
    Build(String),
    /// Recorder could not be installed
    #[error("cannot install metrics recorder: {0}")]
    Install(String),
}

/// Owner of the Prometheus recorder handle.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Server for `addr`; nothing is recorded until [`Self::start`].
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address `/metrics` is served on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Describes the coupon metrics and installs the recorder.
    ///
    /// # Errors
    ///
    /// [`MetricsError`] when the exporter cannot be built or installed. A
    /// recorder installed earlier in the process is tolerated, and this
    /// server then renders nothing.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        describe_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Suffix("duration_seconds".to_owned()), LATENCY_BUCKETS)
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = match builder.install_recorder() {
            Ok(handle) => handle,
            Err(e) if e.to_string().contains("already initialized") => {
                tracing::warn!("Metrics recorder already installed");
                return Ok(());
            }
            Err(e) => return Err(MetricsError::Install(e.to_string())),
        };

        tracing::info!(addr = %self.addr, "Metrics recorder installed");
        self.handle = Some(handle);
        Ok(())
    }

    /// Prometheus text exposition, `None` before a successful start.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn describe_metrics() {
    describe_counter!(
        "coupon_admission_total",
        "Issuance admission decisions by result (accepted, out_of_stock, failed)"
    );
    describe_histogram!(
        "coupon_admission_duration_seconds",
        "Time taken by the admission fast path"
    );

    describe_counter!(
        "coupon_fulfillment_total",
        "Queue messages handled by workflow and result (success, rejected, dead_lettered)"
    );
    describe_histogram!(
        "coupon_fulfillment_duration_seconds",
        "Time taken to handle one queue message, retries included"
    );

    describe_counter!(
        "coupon_dlq_requeued_total",
        "DLQ messages returned to their original queue"
    );
    describe_counter!(
        "coupon_dlq_escalated_total",
        "DLQ messages escalated to an operator alert"
    );

    describe_counter!("coupon_expired_total", "Member coupons expired by the batch");
    describe_counter!(
        "coupon_expiration_chunk_failures_total",
        "Expiration chunks abandoned after exhausting retries"
    );

    describe_gauge!(
        "coupon_stock_drift",
        "Stock counter minus authoritative remaining quantity, per unit"
    );

    describe_counter!(
        "coupon_job_runs_total",
        "Scheduled job runs by job and outcome (completed, skipped, failed)"
    );
}

/// Admission metrics recorder.
pub struct AdmissionMetrics;

impl AdmissionMetrics {
    /// Record an admission decision.
    pub fn record(result: &'static str, duration: Duration) {
        counter!("coupon_admission_total", "result" => result).increment(1);
        histogram!("coupon_admission_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Queue message handling metrics recorder.
pub struct FulfillmentMetrics;

impl FulfillmentMetrics {
    /// Record a handled message.
    pub fn record(workflow: &'static str, result: &'static str, duration: Duration) {
        counter!("coupon_fulfillment_total", "workflow" => workflow, "result" => result)
            .increment(1);
        histogram!("coupon_fulfillment_duration_seconds", "workflow" => workflow)
            .record(duration.as_secs_f64());
    }
}

/// DLQ recovery metrics recorder.
pub struct DlqMetrics;

impl DlqMetrics {
    /// Record a message returned to its queue.
    pub fn record_requeued(workflow: &'static str) {
        counter!("coupon_dlq_requeued_total", "workflow" => workflow).increment(1);
    }

    /// Record a message escalated to an alert.
    pub fn record_escalated(workflow: &'static str) {
        counter!("coupon_dlq_escalated_total", "workflow" => workflow).increment(1);
    }
}

/// Expiration batch metrics recorder.
pub struct ExpirationMetrics;

impl ExpirationMetrics {
    /// Record coupons expired.
    pub fn record_expired(count: u64) {
        counter!("coupon_expired_total").increment(count);
    }

    /// Record an abandoned chunk.
    pub fn record_chunk_failure() {
        counter!("coupon_expiration_chunk_failures_total").increment(1);
    }
}

/// Stock counter metrics recorder.
pub struct StockMetrics;

impl StockMetrics {
    /// Record the counter drift of a unit.
    #[allow(clippy::cast_precision_loss)] // drift values are small
    pub fn record_drift(unit: i64, drift: i64) {
        gauge!("coupon_stock_drift", "unit" => unit.to_string()).set(drift as f64);
    }
}

/// Scheduled job metrics recorder.
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job run outcome.
    pub fn record_run(job: &str, outcome: &'static str) {
        counter!("coupon_job_runs_total", "job" => job.to_string(), "outcome" => outcome)
            .increment(1);
    }
}
