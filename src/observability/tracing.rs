//! Distributed tracing support.
//!
//! # Responsibilities
//! - Open a client span for every outbound request
//! - Propagate trace context to the upstream via `traceparent`
//! - Continue a caller-supplied trace instead of starting a new one
//!
//! # Design Decisions
//! - Optional: disabled by default
//! - Supports W3C Trace Context headers (version 00)
//! - A new trace reuses the request ID as its trace ID when it is a UUID,
//!   so logs and upstream traces line up

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use http::{HeaderName, HeaderValue};
use rand::Rng;
use tracing::Instrument;
use uuid::Uuid;

use crate::http::request::{RequestId, RequestIdExt};
use crate::transport::{Decorator, Outcome, Request, SharedTransport, Transport};

pub static TRACEPARENT: HeaderName = HeaderName::from_static("traceparent");

const SAMPLED: u8 = 0x01;

/// A W3C trace context, as carried by `traceparent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: u128,
    /// ID of the span that issued the request.
    pub parent_id: u64,
    pub flags: u8,
}

impl TraceContext {
    /// Start a new sampled trace, keyed on `request_id` when it is a UUID.
    pub fn root(request_id: Option<&RequestId>) -> Self {
        let trace_id = request_id
            .and_then(|id| Uuid::parse_str(id.as_str()).ok())
            .map(|u| u.as_u128())
            .filter(|&id| id != 0)
            .unwrap_or_else(|| Uuid::new_v4().as_u128());

        Self {
            trace_id,
            parent_id: span_id(),
            flags: SAMPLED,
        }
    }

    /// Same trace, new span.
    pub fn child(&self) -> Self {
        Self {
            parent_id: span_id(),
            ..*self
        }
    }

    pub fn is_sampled(&self) -> bool {
        self.flags & SAMPLED != 0
    }

    /// Parse a version 00 `traceparent` value.
    pub fn parse(value: &str) -> Option<Self> {
        let mut fields = value.trim().split('-');
        let version = fields.next()?;
        let trace_id = fields.next()?;
        let parent_id = fields.next()?;
        let flags = fields.next()?;
        if fields.next().is_some() || version != "00" {
            return None;
        }

        let trace_id = parse_hex(trace_id, 32).and_then(|v| u128::from_str_radix(v, 16).ok())?;
        let parent_id = parse_hex(parent_id, 16).and_then(|v| u64::from_str_radix(v, 16).ok())?;
        let flags = parse_hex(flags, 2).and_then(|v| u8::from_str_radix(v, 16).ok())?;

        if trace_id == 0 || parent_id == 0 {
            return None;
        }
        Some(Self {
            trace_id,
            parent_id,
            flags,
        })
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "00-{:032x}-{:016x}-{:02x}",
            self.trace_id, self.parent_id, self.flags
        )
    }
}

fn parse_hex(s: &str, len: usize) -> Option<&str> {
    let valid = s.len() == len
        && s
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    valid.then_some(s)
}

fn span_id() -> u64 {
    rand::thread_rng().gen_range(1..=u64::MAX)
}

/// Decorator opening a client span and injecting `traceparent`.
#[derive(Debug, Clone, Default)]
pub struct TracingDecorator;

impl Decorator for TracingDecorator {
    fn decorate(&self, next: SharedTransport) -> SharedTransport {
        Arc::new(TracingTransport { next })
    }
}

struct TracingTransport {
    next: SharedTransport,
}

#[async_trait]
impl Transport for TracingTransport {
    async fn send(&self, mut request: Request) -> Outcome {
        let incoming = request
            .headers()
            .get(&TRACEPARENT)
            .and_then(|v| v.to_str().ok())
            .and_then(TraceContext::parse);
        let ctx = match incoming {
            Some(parent) => parent.child(),
            None => TraceContext::root(request.request_id().as_ref()),
        };

        if let Ok(value) = HeaderValue::from_str(&ctx.to_string()) {
            request.headers_mut().insert(TRACEPARENT.clone(), value);
        }
        request.extensions_mut().insert(ctx);

        let span = tracing::info_span!(
            "http.client.trace",
            otel.kind = "client",
            trace_id = %format_args!("{:032x}", ctx.trace_id),
            span_id = %format_args!("{:016x}", ctx.parent_id),
            http.method = %request.method(),
            http.target = request.uri().path(),
            http.status_code = tracing::field::Empty,
        );

        async move {
            let outcome = self.next.send(request).await;
            match &outcome {
                Ok(res) => {
                    tracing::Span::current().record("http.status_code", res.status().as_u16());
                }
                Err(e) => tracing::debug!(error = %e, "Traced request failed"),
            }
            outcome
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    use crate::http::request::RequestIdDecorator;
    use crate::testing::MockTransport;
    use crate::transport::compose;

    const EXAMPLE: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn test_parse_and_format() {
        let ctx = TraceContext::parse(EXAMPLE).unwrap();
        assert_eq!(ctx.trace_id, 0x4bf92f3577b34da6a3ce929d0e0e4736);
        assert_eq!(ctx.parent_id, 0x00f067aa0ba902b7);
        assert!(ctx.is_sampled());
        assert_eq!(ctx.to_string(), EXAMPLE);
    }

    #[test]
    fn test_invalid_traceparent_rejected() {
        for bad in [
            "",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
            "00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra",
        ] {
            assert_eq!(TraceContext::parse(bad), None, "{bad}");
        }
    }

    #[test]
    fn test_root_uses_request_id() {
        let id = RequestId("4bf92f35-77b3-4da6-a3ce-929d0e0e4736".to_string());
        let ctx = TraceContext::root(Some(&id));
        assert_eq!(ctx.trace_id, 0x4bf92f3577b34da6a3ce929d0e0e4736);

        let other = TraceContext::root(Some(&RequestId("not-a-uuid".to_string())));
        assert_ne!(other.trace_id, 0);
    }

    #[tokio::test]
    async fn test_traceparent_reaches_transport() {
        let mock = MockTransport::new();
        let t = compose(
            Arc::new(mock.clone()),
            vec![
                Arc::new(RequestIdDecorator) as Arc<dyn Decorator>,
                Arc::new(TracingDecorator),
            ],
        );

        let req = http::Request::get("http://upstream/").body(Body::empty()).unwrap();
        t.send(req).await.unwrap();

        let call = &mock.calls()[0];
        let ctx = TraceContext::parse(&call.header("traceparent").unwrap()).unwrap();
        let id = Uuid::parse_str(&call.header("x-request-id").unwrap()).unwrap();
        assert_eq!(ctx.trace_id, id.as_u128());
        assert!(ctx.is_sampled());
    }

    #[tokio::test]
    async fn test_incoming_trace_is_continued() {
        let mock = MockTransport::new();
        let t = TracingDecorator.decorate(Arc::new(mock.clone()));

        let req = http::Request::get("http://upstream/")
            .header("traceparent", EXAMPLE)
            .body(Body::empty())
            .unwrap();
        t.send(req).await.unwrap();

        let sent = mock.calls()[0].header("traceparent").unwrap();
        let ctx = TraceContext::parse(&sent).unwrap();
        assert_eq!(ctx.trace_id, 0x4bf92f3577b34da6a3ce929d0e0e4736);
        assert_ne!(ctx.parent_id, 0x00f067aa0ba902b7);
    }
}
