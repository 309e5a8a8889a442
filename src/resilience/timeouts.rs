//! Per-attempt timeout enforcement.
//!
//! # Responsibilities
//! - Bound a single call to the wrapped transport
//! - Drop the in-flight call cleanly on expiry
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Expiry is `TransportError::Timeout`, which the retry decorator treats as
//!   transient
//! - Placed inside the retry decorator, so each attempt gets its own budget

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::transport::{Decorator, Outcome, Request, SharedTransport, Transport};

/// Decorator failing calls that take longer than `limit`.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutDecorator {
    limit: Duration,
}

impl TimeoutDecorator {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }
}

impl Decorator for TimeoutDecorator {
    fn decorate(&self, next: SharedTransport) -> SharedTransport {
        Arc::new(TimeoutTransport {
            next,
            limit: self.limit,
        })
    }
}

struct TimeoutTransport {
    next: SharedTransport,
    limit: Duration,
}

#[async_trait]
impl Transport for TimeoutTransport {
    async fn send(&self, request: Request) -> Outcome {
        match tokio::time::timeout(self.limit, self.next.send(request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::debug!(limit_ms = self.limit.as_millis() as u64, "Attempt timed out");
                Err(TransportError::Timeout(self.limit))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    use crate::resilience::backoff::Backoff;
    use crate::resilience::retries::{Retry, RetryConfig};
    use crate::testing::{MockReply, MockTransport};
    use crate::transport::compose;

    fn get() -> Request {
        http::Request::get("http://upstream/").body(Body::empty()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let mock = MockTransport::new().latency(Duration::from_secs(5));
        let t = TimeoutDecorator::new(Duration::from_secs(1)).decorate(Arc::new(mock));

        let err = t.send(get()).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(d) if d == Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_call_passes() {
        let mock = MockTransport::new()
            .reply(MockReply::status(204))
            .latency(Duration::from_millis(100));
        let t = TimeoutDecorator::new(Duration::from_secs(1)).decorate(Arc::new(mock));
        assert_eq!(t.send(get()).await.unwrap().status(), 204);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_gets_its_own_budget() {
        let mock = MockTransport::new().latency(Duration::from_secs(5));
        let retry = Retry::new(
            RetryConfig::default()
                .with_max_attempts(3)
                .with_backoff(Backoff::constant(Duration::from_millis(1)).into_fn()),
        );
        let t = compose(
            mock.clone(),
            [
                Box::new(retry) as Box<dyn Decorator>,
                Box::new(TimeoutDecorator::new(Duration::from_secs(1))),
            ],
        );

        let err = t.send(get()).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
        assert_eq!(mock.call_count(), 3);
    }
}
