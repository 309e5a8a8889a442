//! Configuration schema definitions.
//!
//! This module defines the configuration of a complete client pipeline.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::observability::logging::LogFormat;
use crate::resilience::replay::ReplayStrategy;

/// Root configuration for a client pipeline.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Base transport (connection and pool) settings.
    pub transport: TransportSettings,

    /// Retry decorator settings.
    pub retry: RetrySettings,

    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerSettings,

    /// Per-attempt timeout in milliseconds; unset disables it.
    pub attempt_timeout_ms: Option<u64>,

    /// Logging, metrics and request-id settings.
    pub observability: ObservabilitySettings,
}

/// Base transport settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Whole-request timeout in milliseconds; 0 disables it.
    pub request_timeout_ms: u64,

    /// Idle pooled connection lifetime in seconds.
    pub pool_idle_timeout_secs: u64,

    /// Idle connections kept per host.
    pub pool_max_idle_per_host: usize,

    /// User agent sent when a request has none.
    pub user_agent: Option<String>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            pool_idle_timeout_secs: 90,
            pool_max_idle_per_host: 32,
            user_agent: None,
        }
    }
}

/// Backoff growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Constant,
    #[default]
    Exponential,
}

/// Retry settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Enable retries.
    pub enabled: bool,

    /// Total attempts including the first.
    pub max_attempts: u32,

    /// Methods eligible for retry.
    pub allowed_methods: Vec<String>,

    pub strategy: BackoffKind,

    /// Base backoff interval in milliseconds.
    pub base_delay_ms: u64,

    /// Growth factor for exponential backoff.
    pub backoff_rate: f64,

    /// Maximum backoff delay in milliseconds.
    pub max_delay_ms: u64,

    /// Randomize delays in `[0, delay)`.
    pub jitter: bool,

    /// Ignore server `Retry-After` hints.
    pub ignore_retry_after: bool,

    /// Cap on honoured `Retry-After` delays in milliseconds.
    pub max_retry_after_ms: u64,

    /// Header carrying the attempt number.
    pub attempt_header: String,

    /// Largest request body buffered in memory for replay.
    pub max_replay_body_bytes: usize,

    pub replay_strategy: ReplayStrategy,

    /// Directory for spilled bodies; system temp dir when unset.
    pub spill_dir: Option<PathBuf>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            allowed_methods: ["GET", "HEAD", "PUT", "DELETE", "OPTIONS", "TRACE"]
                .into_iter()
                .map(String::from)
                .collect(),
            strategy: BackoffKind::Exponential,
            base_delay_ms: 100,
            backoff_rate: 2.0,
            max_delay_ms: 5_000,
            jitter: false,
            ignore_retry_after: false,
            max_retry_after_ms: 30_000,
            attempt_header: "X-Retry-Attempt".to_string(),
            max_replay_body_bytes: 64 * 1024,
            replay_strategy: ReplayStrategy::MemoryOnly,
            spill_dir: None,
        }
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,

    /// Label for logs and metrics.
    pub name: String,

    /// Consecutive failures before opening.
    pub failure_threshold: u32,

    /// Open-state duration before probing, in milliseconds.
    pub recovery_window_ms: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "default".to_string(),
            failure_threshold: 5,
            recovery_window_ms: 30_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilitySettings {
    /// Log level or filter directive (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Emit start/end events for every request.
    pub log_requests: bool,

    /// Include lossy UTF-8 body samples in request logs.
    pub log_bodies: bool,

    /// Cap on logged body bytes.
    pub max_log_body_bytes: usize,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Stamp `x-request-id` on outgoing requests.
    pub request_id: bool,

    /// Propagate W3C `traceparent` headers.
    pub trace_context: bool,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            log_requests: true,
            log_bodies: false,
            max_log_body_bytes: 64 * 1024,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
            request_id: true,
            trace_context: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert!(config.retry.enabled);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.attempt_header, "X-Retry-Attempt");
        assert_eq!(config.retry.replay_strategy, ReplayStrategy::MemoryOnly);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.attempt_timeout_ms, None);
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
        assert!(!config.observability.trace_context);
    }

    #[test]
    fn test_partial_sections() {
        let config: PipelineConfig = toml::from_str(
            r#"
            attempt_timeout_ms = 2000

            [retry]
            max_attempts = 5
            strategy = "constant"
            allowed_methods = ["GET", "POST"]
            replay_strategy = "memory_then_disk"
            spill_dir = "/var/tmp"

            [circuit_breaker]
            enabled = false

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.attempt_timeout_ms, Some(2000));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.strategy, BackoffKind::Constant);
        assert_eq!(config.retry.allowed_methods, vec!["GET", "POST"]);
        assert_eq!(config.retry.replay_strategy, ReplayStrategy::MemoryThenDisk);
        assert_eq!(config.retry.spill_dir, Some(PathBuf::from("/var/tmp")));
        assert_eq!(config.retry.base_delay_ms, 100);
        assert!(!config.circuit_breaker.enabled);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.transport.connect_timeout_ms, 5_000);
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let err = toml::from_str::<PipelineConfig>("[retry]\nreplay_strategy = \"sometimes\"");
        assert!(err.is_err());
    }
}
