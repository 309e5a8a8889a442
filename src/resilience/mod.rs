//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request from caller:
//!     → circuit_breaker.rs (fail fast while upstream is degraded)
//!     → retries.rs (replay.rs makes the body reopenable, then attempt loop)
//!         → backoff.rs / retry_after.rs (delay between attempts)
//!         → timeouts.rs (bound each attempt)
//!             → base transport
//! ```
//!
//! # Design Decisions
//! - Every piece is a decorator; order is decided by the caller at composition
//! - Retries only for idempotent methods unless the caller opts in
//! - Breaker and retrier treat each other's errors as ordinary failures
//! - Configs are immutable after construction

pub mod backoff;
pub mod circuit_breaker;
pub mod replay;
pub mod retries;
pub mod retry_after;
pub mod timeouts;

pub use backoff::{Backoff, BackoffFn, JitterSource, SeededJitter};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use replay::{ensure_reopenable, Prepared, ReplayFailure, ReplayStrategy, ReplayableBody};
pub use retries::{Retry, RetryConfig, RetryEvent};
pub use timeouts::TimeoutDecorator;
