//! Base transport over hyper-util's pooled client.
//!
//! # Responsibilities
//! - Send one request over the wire, get one response or error
//! - Enforce connect and (optional) whole-request timeouts
//! - Honor the request's cancellation signal during the network call
//! - Classify hyper failures into `NetworkErrorKind`
//!
//! # Design Decisions
//! - Pooling, HTTP/1.1 vs HTTP/2 and connection reuse stay inside hyper-util
//! - No resilience logic here; decorators add it
//! - Timeout errors are distinct from other network errors

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use http::header::USER_AGENT;
use http::HeaderValue;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client, Error as ClientError},
    rt::TokioExecutor,
};

use crate::error::{NetworkErrorKind, TransportError};
use crate::lifecycle::cancel::cancellation_of;
use crate::transport::{Outcome, Request, Transport};

/// Settings for [`HyperTransport`].
#[derive(Debug, Clone)]
pub struct HyperTransportConfig {
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Total time for one request/response exchange; `None` disables it.
    pub request_timeout: Option<Duration>,
    /// How long idle pooled connections are kept.
    pub pool_idle_timeout: Duration,
    /// Maximum idle connections kept per host.
    pub pool_max_idle_per_host: usize,
    /// User agent added when the request has none.
    pub user_agent: Option<String>,
}

impl Default for HyperTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Some(Duration::from_secs(30)),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
            user_agent: Some(format!("rtfetch/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

/// Transport backed by `hyper_util::client::legacy::Client`.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpConnector, Body>,
    request_timeout: Option<Duration>,
    user_agent: Option<HeaderValue>,
}

impl HyperTransport {
    pub fn new() -> Self {
        Self::with_config(HyperTransportConfig::default())
    }

    pub fn with_config(config: HyperTransportConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.connect_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build(connector);

        let user_agent = config
            .user_agent
            .as_deref()
            .and_then(|ua| HeaderValue::from_str(ua).ok());

        Self {
            client,
            request_timeout: config.request_timeout,
            user_agent,
        }
    }

    async fn exchange(&self, request: Request) -> Outcome {
        let call = self.client.request(request);

        let response = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result.map_err(classify)?,
                Err(_) => return Err(TransportError::Timeout(limit)),
            },
            None => call.await.map_err(classify)?,
        };

        Ok(response.map(Body::new))
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(&self, mut request: Request) -> Outcome {
        if let Some(ua) = &self.user_agent {
            if !request.headers().contains_key(USER_AGENT) {
                request.headers_mut().insert(USER_AGENT, ua.clone());
            }
        }

        tracing::trace!(method = %request.method(), uri = %request.uri(), "Sending request");

        match cancellation_of(&request) {
            Some(cancel) => {
                if cancel.is_cancelled() {
                    return Err(TransportError::Cancelled);
                }
                tokio::select! {
                    res = self.exchange(request) => res,
                    _ = cancel.cancelled() => Err(TransportError::Cancelled),
                }
            }
            None => self.exchange(request).await,
        }
    }
}

fn classify(err: ClientError) -> TransportError {
    let kind = network_kind(&err);
    TransportError::network(kind, err)
}

/// Walk the source chain for the most specific failure.
fn network_kind(err: &ClientError) -> NetworkErrorKind {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();

    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<io::Error>() {
            if let Some(kind) = NetworkErrorKind::from_io(io.kind()) {
                return kind;
            }
        }
        if let Some(h) = e.downcast_ref::<hyper::Error>() {
            if h.is_incomplete_message() {
                return NetworkErrorKind::UnexpectedEof;
            }
            if h.is_timeout() {
                return NetworkErrorKind::Timeout;
            }
            if h.is_closed() || h.is_canceled() || h.is_body_write_aborted() {
                return NetworkErrorKind::ConnectionReset;
            }
        }
        source = e.source();
    }

    if err.is_connect() {
        NetworkErrorKind::Connect
    } else {
        NetworkErrorKind::Protocol
    }
}
