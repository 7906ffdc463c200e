//! Prometheus metrics for the queue.
//!
//! Metric names:
//! - `queue_tickets_created_total{sector}`
//! - `queue_dispatch_total{outcome}` (`called`, `empty`, `busy`, `room_occupied`, `error`)
//! - `queue_dispatch_conflicts_total`
//! - `queue_transitions_total{to}`
//! - `queue_feed_publish_errors_total`
//! - `queue_call_next_duration_seconds`
//! - store circuit breaker and retry counters
//!
//! Recording is always on; without an installed recorder the `metrics`
//! macros are no-ops. [`MetricsServer::start`] installs the Prometheus
//! exporter with its own HTTP listener.
//!
//! # Example
//!
//! ```rust,no_run
//! use clinic_queue_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use crate::error::QueueError;
use clinic_queue_core::sector::SectorCode;
use clinic_queue_core::ticket::TicketStatus;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics endpoint.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a metrics server that will listen on `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe all metrics and install the exporter with its HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or a
    /// different recorder is already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let (recorder, exporter) = builder
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Install(e.to_string()))?;
        tokio::spawn(async move {
            if exporter.await.is_err() {
                tracing::error!("Metrics exporter stopped");
            }
        });

        tracing::info!(addr = %self.addr, "Metrics available at http://{}/metrics", self.addr);
        self.handle = Some(handle);
        Ok(())
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!("queue_tickets_created_total", "Tickets issued, by sector");
    describe_counter!("queue_dispatch_total", "call_next results, by outcome");
    describe_counter!(
        "queue_dispatch_conflicts_total",
        "Candidates lost to a concurrent console during call_next"
    );
    describe_counter!("queue_transitions_total", "Committed status transitions, by target status");
    describe_counter!(
        "queue_feed_publish_errors_total",
        "Committed mutations whose change event could not be published"
    );
    describe_histogram!("queue_call_next_duration_seconds", "Time taken by call_next");

    describe_gauge!(
        "queue_store_circuit_state",
        "Store circuit breaker state (0=closed, 1=half-open, 2=open)"
    );
    describe_counter!(
        "queue_store_circuit_rejections_total",
        "Store calls rejected while the circuit was open"
    );

    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!("retry_successes_total", "Total number of successful retries");
    describe_counter!(
        "retry_exhausted_total",
        "Total number of operations that exhausted max retries"
    );
}

/// Queue operation metrics recorder.
pub struct QueueMetrics;

impl QueueMetrics {
    /// Record an issued ticket.
    pub fn record_created(sector: &SectorCode) {
        counter!("queue_tickets_created_total", "sector" => sector.as_str().to_owned()).increment(1);
    }

    /// Record the outcome and latency of one `call_next`.
    pub fn record_dispatch(outcome: &'static str, duration: Duration) {
        counter!("queue_dispatch_total", "outcome" => outcome).increment(1);
        histogram!("queue_call_next_duration_seconds").record(duration.as_secs_f64());
    }

    /// Label for a failed `call_next`.
    #[must_use]
    pub const fn dispatch_outcome(err: &QueueError) -> &'static str {
        match err {
            QueueError::Busy(_) => "busy",
            QueueError::RoomOccupied { .. } => "room_occupied",
            _ => "error",
        }
    }

    /// Record a candidate lost to a concurrent dispatch.
    pub fn record_conflict() {
        counter!("queue_dispatch_conflicts_total").increment(1);
    }

    /// Record a committed transition.
    pub fn record_transition(to: TicketStatus) {
        counter!("queue_transitions_total", "to" => to.as_str()).increment(1);
    }

    /// Record a failed change publication.
    pub fn record_publish_error() {
        counter!("queue_feed_publish_errors_total").increment(1);
    }
}

/// Store circuit breaker metrics recorder.
pub struct CircuitBreakerMetrics;

impl CircuitBreakerMetrics {
    /// Record circuit breaker state.
    ///
    /// 0 = Closed, 1 = `HalfOpen`, 2 = Open
    pub fn record_state(state: f64) {
        gauge!("queue_store_circuit_state").set(state);
    }

    /// Record a rejected call (circuit open).
    pub fn record_rejection() {
        counter!("queue_store_circuit_rejections_total").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use clinic_queue_core::ticket::{RoomId, TicketId};

    #[test]
    fn dispatch_outcome_labels() {
        assert_eq!(QueueMetrics::dispatch_outcome(&QueueError::Busy("x".into())), "busy");
        assert_eq!(
            QueueMetrics::dispatch_outcome(&QueueError::RoomOccupied {
                room: RoomId::new("room1"),
                occupant: TicketId::new(),
            }),
            "room_occupied"
        );
        assert_eq!(QueueMetrics::dispatch_outcome(&QueueError::Unavailable("x".into())), "error");
    }

    #[test]
    fn recording_without_a_recorder_is_a_no_op() {
        QueueMetrics::record_created(&SectorCode::new("triage"));
        QueueMetrics::record_dispatch("called", Duration::from_millis(3));
        QueueMetrics::record_transition(TicketStatus::Completed);
        QueueMetrics::record_publish_error();
    }

    #[test]
    fn unstarted_server_renders_nothing() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.render().is_none());
    }
}
