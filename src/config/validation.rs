//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (attempts ≥ 1, timeouts > 0, rate ≥ 1)
//! - Check names parse (methods, header, metrics address)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: PipelineConfig → Result<(), Vec<ValidationError>>
//! - Runs before a pipeline is built from the config

use std::fmt;
use std::net::SocketAddr;

use http::{HeaderName, Method};
use tracing_subscriber::EnvFilter;

use crate::config::schema::{BackoffKind, PipelineConfig};

/// One semantic problem in a config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &PipelineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let transport = &config.transport;
    if transport.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("transport.connect_timeout_ms", "must be greater than 0"));
    }

    let retry = &config.retry;
    if retry.enabled {
        if retry.max_attempts == 0 {
            errors.push(ValidationError::new("retry.max_attempts", "must be at least 1"));
        }
        if !retry.backoff_rate.is_finite() || retry.backoff_rate < 1.0 {
            errors.push(ValidationError::new("retry.backoff_rate", "must be a finite number ≥ 1"));
        }
        let capped = retry.strategy == BackoffKind::Exponential;
        if capped && retry.max_delay_ms < retry.base_delay_ms {
            errors.push(ValidationError::new(
                "retry.max_delay_ms",
                "must not be smaller than retry.base_delay_ms",
            ));
        }
        for method in &retry.allowed_methods {
            if Method::from_bytes(method.as_bytes()).is_err() {
                errors.push(ValidationError::new(
                    "retry.allowed_methods",
                    format!("invalid method '{method}'"),
                ));
            }
        }
        if HeaderName::from_bytes(retry.attempt_header.as_bytes()).is_err() {
            errors.push(ValidationError::new(
                "retry.attempt_header",
                format!("invalid header name '{}'", retry.attempt_header),
            ));
        }
    }

    let breaker = &config.circuit_breaker;
    if breaker.enabled {
        if breaker.failure_threshold == 0 {
            errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be at least 1"));
        }
        if breaker.recovery_window_ms == 0 {
            errors.push(ValidationError::new(
                "circuit_breaker.recovery_window_ms",
                "must be greater than 0",
            ));
        }
    }

    if config.attempt_timeout_ms == Some(0) {
        errors.push(ValidationError::new("attempt_timeout_ms", "must be greater than 0 when set"));
    }

    let obs = &config.observability;
    if EnvFilter::try_new(&obs.log_level).is_err() {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("invalid filter '{}'", obs.log_level),
        ));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address '{}'", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
