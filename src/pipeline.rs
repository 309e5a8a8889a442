//! Pipeline construction from configuration.
//!
//! Decorators are composed outermost first:
//!
//! ```text
//! request-id → trace context → logging → metrics → circuit breaker → retry → attempt timeout → base
//! ```
//!
//! The breaker sits outside the retrier, so one logical request counts once
//! toward the failure threshold however many attempts it made.

use std::time::Duration;

use http::{HeaderName, Method};

use crate::config::schema::{
    BackoffKind, CircuitBreakerSettings, ObservabilitySettings, PipelineConfig, RetrySettings,
    TransportSettings,
};
use crate::config::validation::{validate_config, ValidationError};
use crate::config::ConfigError;
use crate::http::request::RequestIdDecorator;
use crate::observability::logging::{utf8_lossy, LogConfig, LoggingDecorator};
use crate::observability::metrics::MetricsDecorator;
use crate::observability::tracing::TracingDecorator;
use crate::resilience::backoff::Backoff;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::resilience::retries::{Retry, RetryConfig};
use crate::resilience::timeouts::TimeoutDecorator;
use crate::transport::{HyperTransport, HyperTransportConfig, Pipeline, SharedTransport};

/// Build the configured pipeline over a [`HyperTransport`].
pub fn build(config: &PipelineConfig) -> Result<SharedTransport, ConfigError> {
    let base = HyperTransport::with_config(hyper_config(&config.transport));
    Ok(assemble(config, Pipeline::new(base))?.build())
}

/// Build the configured decorators over an arbitrary base transport.
pub fn build_with_base(
    config: &PipelineConfig,
    base: SharedTransport,
) -> Result<SharedTransport, ConfigError> {
    Ok(assemble(config, Pipeline::from_shared(base))?.build())
}

fn assemble(config: &PipelineConfig, pipeline: Pipeline) -> Result<Pipeline, ConfigError> {
    validate_config(config).map_err(ConfigError::Validation)?;

    let obs = &config.observability;
    let retry = if config.retry.enabled {
        Some(Retry::new(retry_config(&config.retry)?))
    } else {
        None
    };

    let pipeline = pipeline
        .layer_opt(obs.request_id.then_some(RequestIdDecorator))
        .layer_opt(obs.trace_context.then_some(TracingDecorator))
        .layer_opt(logging(obs))
        .layer_opt(obs.metrics_enabled.then_some(MetricsDecorator))
        .layer_opt(
            config
                .circuit_breaker
                .enabled
                .then(|| CircuitBreaker::new(breaker_config(&config.circuit_breaker))),
        )
        .layer_opt(retry)
        .layer_opt(
            config
                .attempt_timeout_ms
                .map(|ms| TimeoutDecorator::new(Duration::from_millis(ms))),
        );

    tracing::debug!(layers = pipeline.len(), "Pipeline assembled");
    Ok(pipeline)
}

pub fn hyper_config(settings: &TransportSettings) -> HyperTransportConfig {
    let defaults = HyperTransportConfig::default();
    HyperTransportConfig {
        connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
        request_timeout: (settings.request_timeout_ms > 0)
            .then(|| Duration::from_millis(settings.request_timeout_ms)),
        pool_idle_timeout: Duration::from_secs(settings.pool_idle_timeout_secs),
        pool_max_idle_per_host: settings.pool_max_idle_per_host,
        user_agent: settings.user_agent.clone().or(defaults.user_agent),
    }
}

pub fn retry_config(settings: &RetrySettings) -> Result<RetryConfig, ConfigError> {
    let invalid = |field: &str, message: String| {
        ConfigError::Validation(vec![ValidationError::new(field, message)])
    };

    let methods = settings
        .allowed_methods
        .iter()
        .map(|m| {
            Method::from_bytes(m.as_bytes())
                .map_err(|_| invalid("retry.allowed_methods", format!("invalid method '{m}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let header = HeaderName::from_bytes(settings.attempt_header.as_bytes()).map_err(|_| {
        invalid(
            "retry.attempt_header",
            format!("invalid header name '{}'", settings.attempt_header),
        )
    })?;

    let interval = Duration::from_millis(settings.base_delay_ms);
    let mut backoff = match settings.strategy {
        BackoffKind::Constant => Backoff::constant(interval),
        BackoffKind::Exponential => Backoff::exponential(interval, settings.backoff_rate),
    }
    .with_max_delay(Duration::from_millis(settings.max_delay_ms));
    if settings.jitter {
        backoff = backoff.with_jitter();
    }

    let mut config = RetryConfig::default()
        .with_max_attempts(settings.max_attempts)
        .with_allowed_methods(methods)
        .with_backoff(backoff.into_fn())
        .ignore_retry_after(settings.ignore_retry_after)
        .with_max_retry_after(Duration::from_millis(settings.max_retry_after_ms))
        .with_attempt_header(header)
        .with_replay(settings.replay_strategy, settings.max_replay_body_bytes);
    config.spill_dir = settings.spill_dir.clone();
    Ok(config)
}

pub fn breaker_config(settings: &CircuitBreakerSettings) -> CircuitBreakerConfig {
    CircuitBreakerConfig::default()
        .with_name(settings.name.clone())
        .with_failure_threshold(settings.failure_threshold)
        .with_recovery_window(Duration::from_millis(settings.recovery_window_ms))
}

fn logging(obs: &ObservabilitySettings) -> Option<LoggingDecorator> {
    if !obs.log_requests {
        return None;
    }
    let mut config = LogConfig::default().with_max_body_bytes(obs.max_log_body_bytes);
    if obs.log_bodies {
        config = config.with_bodies(utf8_lossy());
    }
    Some(LoggingDecorator::new(config))
}
