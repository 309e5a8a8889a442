//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Cancellation (cancel.rs):
//!     CancelSource::trigger / deadline → Cancellation in request extensions
//!     → retry sleep and base transport return TransportError::Cancelled
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → CancelSource::trigger
//! ```
//!
//! # Design Decisions
//! - Cancellation travels with the request, never through globals
//! - Dropping a source without triggering it cancels nothing

pub mod cancel;
pub mod signals;

pub use cancel::{CancelSource, Cancellation};
