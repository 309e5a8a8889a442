//! Resilient HTTP client transport.
//!
//! A [`Transport`](transport::Transport) sends one request and returns one
//! response or error. Decorators wrap transports to add retries with
//! backoff, circuit breaking, timeouts, logging and metrics; [`compose`]
//! nests them around a base transport.
//!
//! ```no_run
//! use std::time::Duration;
//! use resilient_transport::prelude::*;
//!
//! # async fn demo() -> Result<(), TransportError> {
//! let client = Pipeline::new(HyperTransport::new())
//!     .layer(CircuitBreaker::new(CircuitBreakerConfig::default()))
//!     .layer(Retry::new(RetryConfig::default()))
//!     .layer(TimeoutDecorator::new(Duration::from_secs(2)))
//!     .build();
//!
//! let req = http::Request::get("http://localhost:8080/health")
//!     .body(axum::body::Body::empty())?;
//! let res = client.send(req).await?;
//! println!("{}", res.status());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod testing;
pub mod transport;

pub use error::{NetworkErrorKind, TransportError};
pub use transport::{compose, Decorator, Pipeline, SharedTransport, Transport};

/// Common imports for building pipelines.
pub mod prelude {
    pub use crate::error::{NetworkErrorKind, TransportError};
    pub use crate::lifecycle::{CancelSource, Cancellation};
    pub use crate::resilience::{
        Backoff, CircuitBreaker, CircuitBreakerConfig, ReplayStrategy, Retry, RetryConfig,
        TimeoutDecorator,
    };
    pub use crate::transport::{
        compose, Decorator, HyperTransport, Outcome, Pipeline, Request, Response,
        SharedTransport, Transport,
    };
}
