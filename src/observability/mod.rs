//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every request through the pipeline produces:
//!     → logging.rs (span + start/end events, optional body samples)
//!     → metrics.rs (counters, gauges, histograms)
//!     → tracing.rs (client span, `traceparent` propagation; optional)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID recorded on the request span
//! - Metrics are cheap (atomic increments)
//! - Decorators attach at the same composition point as resilience layers

pub mod logging;
pub mod metrics;
pub mod tracing;

pub use logging::{init_logging, LogConfig, LogFormat, LoggingDecorator, RequestSummary};
pub use metrics::{init_metrics, MetricsDecorator};
pub use self::tracing::{TraceContext, TracingDecorator};
