//! Retry decorator.
//!
//! # Responsibilities
//! - Re-send failed requests with backoff, honoring `Retry-After`
//! - Only retry methods on the allow-list (idempotent set by default)
//! - Give every attempt a freshly reopened body
//! - Drain discarded responses so connections can be reused
//!
//! # Design Decisions
//! - Exhaustion returns the last attempt's outcome, never an aggregate
//! - Errors of unknown origin are not retried
//! - The inter-attempt sleep is the only suspension point and is cancellable
//! - Config is immutable and shared across concurrent requests

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use chrono::Utc;
use http::request::Parts;
use http::{HeaderName, HeaderValue, Method, StatusCode, Uri};

use crate::error::TransportError;
use crate::http::body::{drain, exact_len, keep_length, DRAIN_LIMIT};
use crate::http::request::rebuild;
use crate::lifecycle::cancel::Cancellation;
use crate::observability::metrics::record_retry;
use crate::resilience::backoff::{Backoff, BackoffFn};
use crate::resilience::replay::{ensure_reopenable, Prepared, ReplayStrategy, ReplayableBody};
use crate::resilience::retry_after::retry_after_hint;
use crate::transport::{Decorator, Outcome, Request, SharedTransport, Transport};

/// Decides whether an attempt's outcome should be retried.
pub type RetryPredicate = Arc<dyn Fn(&Parts, &Outcome) -> bool + Send + Sync>;

/// Observer called before each retry sleep.
pub type RetryObserver = Arc<dyn Fn(&RetryEvent<'_>) + Send + Sync>;

/// Receives errors the decorator recovers from instead of returning.
pub type ErrorHook = Arc<dyn Fn(&TransportError) + Send + Sync>;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Header stamped with the 1-based attempt number.
pub static X_RETRY_ATTEMPT: HeaderName = HeaderName::from_static("x-retry-attempt");

/// Details about an upcoming retry.
#[derive(Debug)]
pub struct RetryEvent<'a> {
    /// Attempt that just failed.
    pub attempt: u32,
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub status: Option<StatusCode>,
    pub error: Option<&'a TransportError>,
    /// Sleep before the next attempt.
    pub delay: Duration,
}

/// Retry settings.
#[derive(Clone)]
pub struct RetryConfig {
    /// Total attempts including the first; 0 means the default.
    pub max_attempts: u32,
    pub allowed_methods: HashSet<Method>,
    pub should_retry: RetryPredicate,
    pub backoff: BackoffFn,
    pub on_retry: Option<RetryObserver>,
    pub on_error: Option<ErrorHook>,
    pub ignore_retry_after: bool,
    /// Cap on server-supplied `Retry-After` delays.
    pub max_retry_after: Duration,
    pub attempt_header: HeaderName,
    /// Largest body buffered in memory for replay.
    pub max_replay_body_bytes: usize,
    pub replay_strategy: ReplayStrategy,
    /// Directory for spill files; system temp dir when unset.
    pub spill_dir: Option<PathBuf>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            allowed_methods: default_allowed_methods(),
            should_retry: Arc::new(default_should_retry),
            backoff: Backoff::default().into_fn(),
            on_retry: None,
            on_error: None,
            ignore_retry_after: false,
            max_retry_after: Duration::from_secs(30),
            attempt_header: X_RETRY_ATTEMPT.clone(),
            max_replay_body_bytes: 64 * 1024,
            replay_strategy: ReplayStrategy::default(),
            spill_dir: None,
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("allowed_methods", &self.allowed_methods)
            .field("ignore_retry_after", &self.ignore_retry_after)
            .field("max_retry_after", &self.max_retry_after)
            .field("attempt_header", &self.attempt_header)
            .field("max_replay_body_bytes", &self.max_replay_body_bytes)
            .field("replay_strategy", &self.replay_strategy)
            .field("spill_dir", &self.spill_dir)
            .finish_non_exhaustive()
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Add a method to the allow-list, e.g. to opt POST in.
    pub fn allow_method(mut self, method: Method) -> Self {
        self.allowed_methods.insert(method);
        self
    }

    pub fn with_allowed_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.allowed_methods = methods.into_iter().collect();
        self
    }

    pub fn with_should_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(&Parts, &Outcome) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(f);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffFn) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(&RetryEvent<'_>) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn ignore_retry_after(mut self, ignore: bool) -> Self {
        self.ignore_retry_after = ignore;
        self
    }

    pub fn with_max_retry_after(mut self, max: Duration) -> Self {
        self.max_retry_after = max;
        self
    }

    pub fn with_attempt_header(mut self, name: HeaderName) -> Self {
        self.attempt_header = name;
        self
    }

    pub fn with_replay(mut self, strategy: ReplayStrategy, max_bytes: usize) -> Self {
        self.replay_strategy = strategy;
        self.max_replay_body_bytes = max_bytes;
        self
    }

    pub fn with_spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = Some(dir.into());
        self
    }
}

/// GET, HEAD, PUT, DELETE, OPTIONS and TRACE.
pub fn default_allowed_methods() -> HashSet<Method> {
    [
        Method::GET,
        Method::HEAD,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
        Method::TRACE,
    ]
    .into_iter()
    .collect()
}

/// Statuses retried by default: 408, 425, 429, 500, 502, 503, 504.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 425 | 429 | 500 | 502 | 503 | 504)
}

/// Retry transient network failures, timeouts and retryable statuses.
pub fn default_should_retry(_parts: &Parts, outcome: &Outcome) -> bool {
    match outcome {
        Ok(res) => is_retryable_status(res.status()),
        Err(e) => e.is_retryable_network(),
    }
}

/// Retry decorator.
#[derive(Debug, Clone)]
pub struct Retry {
    config: Arc<RetryConfig>,
}

impl Retry {
    pub fn new(mut config: RetryConfig) -> Self {
        if config.max_attempts == 0 {
            config.max_attempts = DEFAULT_MAX_ATTEMPTS;
        }
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl Default for Retry {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl Decorator for Retry {
    fn decorate(&self, next: SharedTransport) -> SharedTransport {
        Arc::new(RetryTransport {
            next,
            config: Arc::clone(&self.config),
        })
    }
}

/// Transport produced by [`Retry`].
pub struct RetryTransport {
    next: SharedTransport,
    config: Arc<RetryConfig>,
}

enum AttemptBody {
    Empty,
    Replay(ReplayableBody),
    /// Sent once; `None` after the first attempt took it.
    Once(Option<Body>),
}

impl RetryTransport {
    fn report(&self, error: &TransportError) {
        tracing::warn!(error = %error, "Failed to prepare request body for replay");
        if let Some(hook) = &self.config.on_error {
            hook(error);
        }
    }

    async fn prepare(&self, parts: &mut Parts, body: Body) -> Result<AttemptBody, TransportError> {
        if let Some(existing) = parts.extensions.get::<ReplayableBody>().cloned() {
            return Ok(AttemptBody::Replay(existing));
        }

        let config = &self.config;
        let known_len = exact_len(&body);
        let prepared = ensure_reopenable(
            body,
            config.max_replay_body_bytes,
            config.replay_strategy,
            config.spill_dir.as_deref(),
        )
        .await;

        match prepared {
            Ok(Prepared::Empty) => Ok(AttemptBody::Empty),
            Ok(Prepared::OneShot(body)) => {
                keep_length(&mut parts.headers, known_len);
                Ok(AttemptBody::Once(Some(body)))
            }
            Ok(Prepared::Replayable(replay)) => {
                if replay.spill_path().is_some() {
                    keep_length(&mut parts.headers, Some(replay.len()));
                }
                parts.extensions.insert(replay.clone());
                Ok(AttemptBody::Replay(replay))
            }
            Err(failure) => {
                self.report(&failure.error);
                match failure.fallback {
                    Some(body) => {
                        keep_length(&mut parts.headers, known_len);
                        Ok(AttemptBody::Once(Some(body)))
                    }
                    None => Err(failure.error),
                }
            }
        }
    }

    fn delay_for(&self, attempt: u32, outcome: &Outcome) -> Duration {
        let computed = (self.config.backoff)(attempt);
        if self.config.ignore_retry_after {
            return computed;
        }
        match outcome {
            Ok(res) => retry_after_hint(
                res.status(),
                res.headers(),
                self.config.max_retry_after,
                Utc::now(),
            )
            .unwrap_or(computed),
            Err(_) => computed,
        }
    }
}

#[async_trait]
impl Transport for RetryTransport {
    async fn send(&self, request: Request) -> Outcome {
        let config = &*self.config;

        if !config.allowed_methods.contains(request.method()) {
            return self.next.send(request).await;
        }

        let (mut parts, body) = request.into_parts();
        let cancel = parts.extensions.get::<Cancellation>().cloned();
        let mut attempt_body = self.prepare(&mut parts, body).await?;

        let mut attempt: u32 = 1;
        loop {
            if cancel.as_ref().is_some_and(Cancellation::is_cancelled) {
                return Err(TransportError::Cancelled);
            }

            parts
                .headers
                .insert(config.attempt_header.clone(), HeaderValue::from(attempt));

            let (body, replayable) = match &mut attempt_body {
                AttemptBody::Empty => (Body::empty(), true),
                AttemptBody::Replay(replay) => (replay.reopen().await?, true),
                AttemptBody::Once(body) => (body.take().unwrap_or_else(Body::empty), false),
            };

            let outcome = self.next.send(rebuild(&parts, body)).await;

            if attempt >= config.max_attempts
                || !replayable
                || !(config.should_retry)(&parts, &outcome)
            {
                return outcome;
            }

            let delay = self.delay_for(attempt, &outcome);
            let status = outcome.as_ref().ok().map(|res| res.status());

            tracing::debug!(
                method = %parts.method,
                uri = %parts.uri,
                attempt,
                status = ?status,
                error = ?outcome.as_ref().err(),
                delay_ms = delay.as_millis() as u64,
                "Retrying request"
            );
            record_retry(parts.method.as_str());

            if let Some(observer) = &config.on_retry {
                observer(&RetryEvent {
                    attempt,
                    method: &parts.method,
                    uri: &parts.uri,
                    status,
                    error: outcome.as_ref().err(),
                    delay,
                });
            }

            if let Ok(res) = outcome {
                drain(res.into_body(), DRAIN_LIMIT).await;
            }

            match &cancel {
                Some(c) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = c.cancelled() => return Err(TransportError::Cancelled),
                    }
                }
                None => tokio::time::sleep(delay).await,
            }

            attempt += 1;
        }
    }
}
