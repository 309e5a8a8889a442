//! Request identity and per-attempt copies.
//!
//! # Responsibilities
//! - Stamp a unique request ID (UUID v4) on outbound requests
//! - Rebuild an attempt request from preserved request parts
//!
//! # Design Decisions
//! - Request ID added as early as possible so every attempt shares it
//! - An existing `x-request-id` is never overwritten
//! - Original parts preserved; each attempt gets its own copy

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use http::request::Parts;
use http::{HeaderName, HeaderValue};
use uuid::Uuid;

use crate::transport::{Decorator, Outcome, Request, SharedTransport, Transport};

/// Header carrying the request ID.
pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// A request identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Access the request ID of a request.
pub trait RequestIdExt {
    fn request_id(&self) -> Option<RequestId>;
}

impl<B> RequestIdExt for http::Request<B> {
    fn request_id(&self) -> Option<RequestId> {
        self.headers()
            .get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(|s| RequestId(s.to_string()))
    }
}

/// Decorator stamping `x-request-id` on requests that lack one.
#[derive(Debug, Clone, Default)]
pub struct RequestIdDecorator;

impl Decorator for RequestIdDecorator {
    fn decorate(&self, next: SharedTransport) -> SharedTransport {
        Arc::new(RequestIdTransport { next })
    }
}

struct RequestIdTransport {
    next: SharedTransport,
}

#[async_trait]
impl Transport for RequestIdTransport {
    async fn send(&self, mut request: Request) -> Outcome {
        if !request.headers().contains_key(&X_REQUEST_ID) {
            let id = RequestId::generate();
            if let Ok(value) = HeaderValue::from_str(id.as_str()) {
                request.headers_mut().insert(X_REQUEST_ID.clone(), value);
            }
        }
        self.next.send(request).await
    }
}

/// Build a fresh request from `parts` with the given body.
///
/// Method, URI, version, headers and extensions are copied; `parts` is left
/// untouched for the next attempt.
pub fn rebuild(parts: &Parts, body: Body) -> Request {
    let mut request = Request::new(body);
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = parts.uri.clone();
    *request.version_mut() = parts.version;
    *request.headers_mut() = parts.headers.clone();
    *request.extensions_mut() = parts.extensions.clone();
    request
}
