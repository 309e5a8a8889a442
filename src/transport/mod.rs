//! Transport abstraction and composition.
//!
//! # Data Flow
//! ```text
//! caller
//!     → outermost decorator (first listed in compose)
//!     → ... inner decorators ...
//!     → base transport (base.rs, or any tower service via service.rs)
//!     → network
//! ```
//!
//! # Design Decisions
//! - One capability for every layer: `send(Request) -> Result<Response, TransportError>`
//! - Decorators hold "the next transport" and nothing about the chain's shape
//! - Composition is pure construction; it performs no I/O

pub mod compose;
pub mod base;
pub mod service;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;

use crate::error::TransportError;

pub use compose::{compose, decorator_fn, Decorator, DecoratorFn, Pipeline};
pub use base::{HyperTransport, HyperTransportConfig};
pub use service::ServiceTransport;

/// Outbound request flowing through the pipeline.
pub type Request = http::Request<Body>;

/// Response returned by the pipeline; its body is single-read.
pub type Response = http::Response<Body>;

/// Outcome of one call to a transport.
pub type Outcome = Result<Response, TransportError>;

/// A transport shared between decorators and callers.
pub type SharedTransport = Arc<dyn Transport>;

/// Send one request, get one response or error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Outcome;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: Request) -> Outcome {
        (**self).send(request).await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&self, request: Request) -> Outcome {
        (**self).send(request).await
    }
}

/// Transport backed by an async closure.
pub struct TransportFn<F> {
    f: F,
}

/// Build a transport from an async closure.
pub fn transport_fn<F, Fut>(f: F) -> TransportFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Outcome> + Send,
{
    TransportFn { f }
}

#[async_trait]
impl<F, Fut> Transport for TransportFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Outcome> + Send,
{
    async fn send(&self, request: Request) -> Outcome {
        (self.f)(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transport_fn_delegates() {
        let t = transport_fn(|req: Request| async move {
            let status = if req.method() == http::Method::DELETE { 204 } else { 200 };
            let res = http::Response::builder()
                .status(status)
                .body(Body::empty())
                .unwrap();
            Ok::<_, TransportError>(res)
        });

        let req = http::Request::delete("http://x/").body(Body::empty()).unwrap();
        let res = t.send(req).await.unwrap();
        assert_eq!(res.status(), 204);

        let shared: SharedTransport = Arc::new(t);
        let req = http::Request::get("http://x/").body(Body::empty()).unwrap();
        assert_eq!(shared.send(req).await.unwrap().status(), 200);
    }
}
