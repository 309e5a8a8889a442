//! HTTP message helpers shared by the decorators.
//!
//! # Data Flow
//! ```text
//! Outbound request
//!     → request.rs (request ID, per-attempt copies)
//!     → body.rs (bounded prefix reads, sampling, draining)
//! ```

pub mod body;
pub mod request;

pub use request::{RequestId, RequestIdDecorator, RequestIdExt, X_REQUEST_ID};
