//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Log outbound requests through a decorator
//! - Sample request/response bodies within a byte cap
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - Log level from config, overridable via `RUST_LOG`
//! - Bodies are never logged unless a transformer is configured
//! - Sampled bodies are restored in full for downstream readers

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::header::CONTENT_LENGTH;
use http::{Method, Uri};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::TransportError;
use crate::http::body::{exact_len, keep_length, sample};
use crate::http::request::RequestIdExt;
use crate::resilience::retries::ErrorHook;
use crate::transport::{Decorator, Outcome, Request, Response, SharedTransport, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("failed to initialize logging: {0}")]
    Init(String),
}

/// Install a global subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str, format: LogFormat) -> Result<(), LogError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };

    result.map_err(|e| LogError::Init(e.to_string()))
}

/// Turns a body sample into loggable text; `None` skips it.
pub type BodyTransformer = Arc<dyn Fn(&[u8]) -> Option<String> + Send + Sync>;

/// Log body samples as lossy UTF-8.
pub fn utf8_lossy() -> BodyTransformer {
    Arc::new(|bytes| Some(String::from_utf8_lossy(bytes).into_owned()))
}

/// Called with each request before its body is sampled.
pub type StartHook = Arc<dyn Fn(&Request) + Send + Sync>;

/// Called once a request finishes, before the end event is logged.
pub type EndHook = Arc<dyn Fn(&RequestSummary, Result<&Response, &TransportError>) + Send + Sync>;

/// What an [`EndHook`] learns about the finished request.
#[derive(Debug, Clone)]
pub struct RequestSummary {
    pub method: Method,
    pub uri: Uri,
    pub elapsed: Duration,
}

/// Settings for [`LoggingDecorator`].
#[derive(Clone)]
pub struct LogConfig {
    pub log_start: bool,
    pub log_end: bool,
    pub request_body: Option<BodyTransformer>,
    pub response_body: Option<BodyTransformer>,
    /// Cap on sampled body bytes.
    pub max_body_bytes: usize,
    pub on_error: Option<ErrorHook>,
    pub on_start: Option<StartHook>,
    pub on_end: Option<EndHook>,
    pub suppress_errors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_start: true,
            log_end: true,
            request_body: None,
            response_body: None,
            max_body_bytes: 64 * 1024,
            on_error: None,
            on_start: None,
            on_end: None,
            suppress_errors: false,
        }
    }
}

impl std::fmt::Debug for LogConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogConfig")
            .field("log_start", &self.log_start)
            .field("log_end", &self.log_end)
            .field("request_body", &self.request_body.is_some())
            .field("response_body", &self.response_body.is_some())
            .field("max_body_bytes", &self.max_body_bytes)
            .field("on_start", &self.on_start.is_some())
            .field("on_end", &self.on_end.is_some())
            .field("suppress_errors", &self.suppress_errors)
            .finish_non_exhaustive()
    }
}

impl LogConfig {
    pub fn with_bodies(mut self, transform: BodyTransformer) -> Self {
        self.request_body = Some(transform.clone());
        self.response_body = Some(transform);
        self
    }

    pub fn with_max_body_bytes(mut self, n: usize) -> Self {
        self.max_body_bytes = n;
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) + Send + Sync + 'static,
    {
        self.on_start = Some(Arc::new(f));
        self
    }

    pub fn on_end<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestSummary, Result<&Response, &TransportError>) + Send + Sync + 'static,
    {
        self.on_end = Some(Arc::new(f));
        self
    }
}

/// Decorator emitting one span and start/end events per request.
#[derive(Debug, Clone, Default)]
pub struct LoggingDecorator {
    config: Arc<LogConfig>,
}

impl LoggingDecorator {
    pub fn new(config: LogConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl Decorator for LoggingDecorator {
    fn decorate(&self, next: SharedTransport) -> SharedTransport {
        Arc::new(LoggingTransport {
            next,
            config: Arc::clone(&self.config),
        })
    }
}

struct LoggingTransport {
    next: SharedTransport,
    config: Arc<LogConfig>,
}

impl LoggingTransport {
    fn sampling_failed(&self, what: &str, message: String) {
        if self.config.suppress_errors {
            return;
        }
        tracing::warn!(error = %message, "Failed to sample {what} body");
        if let Some(hook) = &self.config.on_error {
            hook(&TransportError::other(message));
        }
    }

    async fn sample_request(&self, request: Request) -> (Request, Option<String>) {
        let Some(transform) = &self.config.request_body else {
            return (request, None);
        };
        let (mut parts, body) = request.into_parts();
        let known_len = exact_len(&body);
        let s = sample(body, self.config.max_body_bytes).await;
        if let Some(e) = s.error {
            self.sampling_failed("request", e);
        }
        keep_length(&mut parts.headers, known_len);
        let text = transform(&s.bytes);
        (Request::from_parts(parts, s.body), text)
    }

    async fn sample_response(&self, response: Response) -> (Response, Option<String>) {
        let Some(transform) = &self.config.response_body else {
            return (response, None);
        };
        let (parts, body) = response.into_parts();
        let s = sample(body, self.config.max_body_bytes).await;
        if let Some(e) = s.error {
            self.sampling_failed("response", e);
        }
        let text = transform(&s.bytes);
        (Response::from_parts(parts, s.body), text)
    }
}

fn content_length<B>(res: &http::Response<B>) -> Option<u64> {
    res.headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[async_trait]
impl Transport for LoggingTransport {
    async fn send(&self, request: Request) -> Outcome {
        let span = tracing::info_span!(
            "http.client",
            method = %request.method(),
            url = %request.uri(),
            request_id = tracing::field::Empty,
        );
        if let Some(id) = request.request_id() {
            span.record("request_id", id.as_str());
        }

        async move {
            let start = Instant::now();
            if let Some(hook) = &self.config.on_start {
                hook(&request);
            }
            let target = self
                .config
                .on_end
                .is_some()
                .then(|| (request.method().clone(), request.uri().clone()));
            let (request, request_body) = self.sample_request(request).await;

            if self.config.log_start {
                tracing::info!(
                    event = "http.client.start",
                    body = request_body.as_deref(),
                    "Request started"
                );
            }

            let outcome = match self.next.send(request).await {
                Ok(res) => Ok(self.sample_response(res).await),
                Err(e) => Err(e),
            };
            let elapsed = start.elapsed();
            let elapsed_ms = elapsed.as_millis() as u64;

            if let (Some(hook), Some((method, uri))) = (&self.config.on_end, target) {
                let summary = RequestSummary {
                    method,
                    uri,
                    elapsed,
                };
                hook(&summary, outcome.as_ref().map(|(res, _)| res));
            }

            match outcome {
                Ok((res, response_body)) => {
                    if self.config.log_end {
                        tracing::info!(
                            event = "http.client.end",
                            status = res.status().as_u16(),
                            content_length = content_length(&res),
                            elapsed_ms,
                            body = response_body.as_deref(),
                            "Request completed"
                        );
                    }
                    Ok(res)
                }
                Err(e) => {
                    if self.config.log_end {
                        tracing::warn!(
                            event = "http.client.end",
                            error = %e,
                            elapsed_ms,
                            "Request failed"
                        );
                    }
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }
}
