//! Bridge from `tower::Service` to [`Transport`].

use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use tower::{Service, ServiceExt};

use crate::error::{BoxError, TransportError};
use crate::transport::{Outcome, Request, Transport};

/// Use any cloneable tower service as a transport.
///
/// Errors that are already [`TransportError`]s pass through unchanged; any
/// other error becomes [`TransportError::Other`].
#[derive(Debug, Clone)]
pub struct ServiceTransport<S> {
    inner: S,
}

impl<S> ServiceTransport<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

fn into_transport_error(e: impl Into<BoxError>) -> TransportError {
    match e.into().downcast::<TransportError>() {
        Ok(te) => *te,
        Err(other) => TransportError::Other(other),
    }
}

#[async_trait]
impl<S, B> Transport for ServiceTransport<S>
where
    S: Service<Request, Response = http::Response<B>> + Clone + Send + Sync + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    async fn send(&self, request: Request) -> Outcome {
        let svc = self.inner.clone();
        let response = svc
            .oneshot(request)
            .await
            .map_err(into_transport_error)?;
        Ok(response.map(Body::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_service_fn_as_transport() {
        let svc = tower::service_fn(|req: Request| async move {
            if req.uri().path() == "/fail" {
                return Err(TransportError::CircuitOpen);
            }
            Ok(http::Response::new(Body::from("ok")))
        });
        let t = ServiceTransport::new(svc);

        let ok = t
            .send(http::Request::get("http://x/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(ok.into_body(), 16).await.unwrap();
        assert_eq!(body, "ok");

        let err = t
            .send(http::Request::get("http://x/fail").body(Body::empty()).unwrap())
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
    }
}
