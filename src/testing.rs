//! Scripted transport for exercising decorators without a network.
//!
//! ```
//! use resilient_transport::testing::{MockReply, MockTransport};
//!
//! let mock = MockTransport::new()
//!     .reply(MockReply::status(503).with_header("retry-after", "1"))
//!     .reply(MockReply::status(200).with_body("ok"));
//! assert_eq!(mock.call_count(), 0);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use parking_lot::Mutex;

use crate::error::{NetworkErrorKind, TransportError};
use crate::transport::{Outcome, Request, Transport};

/// One scripted outcome.
#[derive(Debug, Clone)]
pub enum MockReply {
    Response {
        status: StatusCode,
        headers: Vec<(HeaderName, HeaderValue)>,
        body: Bytes,
    },
    Network(NetworkErrorKind),
    Timeout(Duration),
    Other(String),
}

impl MockReply {
    /// A response with the given status and no body.
    ///
    /// A code outside 100..=999 becomes 500.
    pub fn status(code: u16) -> Self {
        Self::Response {
            status: StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn network(kind: NetworkErrorKind) -> Self {
        Self::Network(kind)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Add a header. An invalid name or value is skipped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let parsed = HeaderName::from_bytes(name.as_bytes())
            .ok()
            .zip(HeaderValue::from_str(value).ok());
        if let (Self::Response { headers, .. }, Some(header)) = (&mut self, parsed) {
            headers.push(header);
        }
        self
    }

    pub fn with_body(mut self, data: impl Into<Bytes>) -> Self {
        if let Self::Response { body, .. } = &mut self {
            *body = data.into();
        }
        self
    }

    fn materialize(&self) -> Outcome {
        match self {
            Self::Response {
                status,
                headers,
                body,
            } => {
                let mut res = http::Response::new(Body::from(body.clone()));
                *res.status_mut() = *status;
                if !body.is_empty() {
                    res.headers_mut()
                        .insert(http::header::CONTENT_LENGTH, HeaderValue::from(body.len()));
                }
                for (name, value) in headers {
                    res.headers_mut().append(name.clone(), value.clone());
                }
                Ok(res)
            }
            Self::Network(kind) => Err(TransportError::network(*kind, format!("mock {kind}"))),
            Self::Timeout(d) => Err(TransportError::Timeout(*d)),
            Self::Other(msg) => Err(TransportError::other(msg.clone())),
        }
    }
}

/// What the mock saw for one call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub at: tokio::time::Instant,
}

impl RecordedCall {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

struct MockState {
    script: VecDeque<MockReply>,
    fallback: MockReply,
    latency: Option<Duration>,
    calls: Vec<RecordedCall>,
}

/// A transport that replays scripted outcomes and records every call.
///
/// Clones share state. Once the script runs out the fallback (200 by default)
/// is returned.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                script: VecDeque::new(),
                fallback: MockReply::status(200),
                latency: None,
                calls: Vec::new(),
            })),
        }
    }

    /// Append a scripted outcome.
    pub fn reply(self, reply: MockReply) -> Self {
        self.state.lock().script.push_back(reply);
        self
    }

    /// Append the same outcome `times` times.
    pub fn replies(self, reply: MockReply, times: usize) -> Self {
        {
            let mut state = self.state.lock();
            for _ in 0..times {
                state.script.push_back(reply.clone());
            }
        }
        self
    }

    /// Outcome once the script is exhausted.
    pub fn fallback(self, reply: MockReply) -> Self {
        self.state.lock().fallback = reply;
        self
    }

    /// Delay every reply by `latency`.
    pub fn latency(self, latency: Duration) -> Self {
        self.state.lock().latency = Some(latency);
        self
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Values of `name` seen on each call, in order.
    pub fn header_values(&self, name: &str) -> Vec<Option<String>> {
        self.state.lock().calls.iter().map(|c| c.header(name)).collect()
    }

    /// Request bodies seen on each call, in order.
    pub fn bodies(&self) -> Vec<String> {
        self.state.lock().calls.iter().map(RecordedCall::body_str).collect()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: Request) -> Outcome {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| TransportError::network(NetworkErrorKind::UnexpectedEof, e))?;

        let (reply, latency) = {
            let mut state = self.state.lock();
            state.calls.push(RecordedCall {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                body,
                at: tokio::time::Instant::now(),
            });
            let reply = state
                .script
                .pop_front()
                .unwrap_or_else(|| state.fallback.clone());
            (reply, state.latency)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        reply.materialize()
    }
}
