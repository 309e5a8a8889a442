//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define client metrics (requests, latency, retries, breaker state)
//! - Expose a Prometheus-compatible scrape endpoint
//! - Provide a decorator recording per-request metrics
//!
//! # Metrics
//! - `http_client_requests_total` (counter): requests by method, status
//! - `http_client_request_duration_seconds` (histogram): latency distribution
//! - `http_client_retries_total` (counter): retries by method
//! - `http_client_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Failed requests carry `status="error"`
//! - Histogram buckets tuned for typical web latencies

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

use crate::resilience::circuit_breaker::CircuitState;
use crate::transport::{Decorator, Outcome, Request, SharedTransport, Transport};

pub const REQUESTS_TOTAL: &str = "http_client_requests_total";
pub const REQUEST_DURATION: &str = "http_client_request_duration_seconds";
pub const RETRIES_TOTAL: &str = "http_client_retries_total";
pub const CIRCUIT_STATE: &str = "http_client_circuit_state";

const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Install the Prometheus exporter listening on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION.to_string()), LATENCY_BUCKETS)?
        .install()?;

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: &str, elapsed: Duration) {
    let labels = [("method", method.to_string()), ("status", status.to_string())];
    metrics::counter!(REQUESTS_TOTAL, &labels).increment(1);
    metrics::histogram!(REQUEST_DURATION, &labels).record(elapsed.as_secs_f64());
}

pub fn record_retry(method: &str) {
    metrics::counter!(RETRIES_TOTAL, "method" => method.to_string()).increment(1);
}

pub fn record_circuit_state(breaker: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    metrics::gauge!(CIRCUIT_STATE, "breaker" => breaker.to_string()).set(value);
}

/// Decorator recording request counts and latency.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsDecorator;

impl Decorator for MetricsDecorator {
    fn decorate(&self, next: SharedTransport) -> SharedTransport {
        Arc::new(MetricsTransport { next })
    }
}

struct MetricsTransport {
    next: SharedTransport,
}

#[async_trait]
impl Transport for MetricsTransport {
    async fn send(&self, request: Request) -> Outcome {
        let method = request.method().to_string();
        let start = Instant::now();

        let outcome = self.next.send(request).await;

        let status = match &outcome {
            Ok(res) => res.status().as_u16().to_string(),
            Err(_) => "error".to_string(),
        };
        record_request(&method, &status, start.elapsed());
        outcome
    }
}
