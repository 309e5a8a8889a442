//! OS signal handling.
//!
//! # Responsibilities
//! - Listen for SIGINT (Ctrl+C) and, on unix, SIGTERM
//! - Translate them into request cancellation
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A handler that fails to install never fires; the error is logged

use tokio::task::JoinHandle;

use crate::lifecycle::cancel::CancelSource;

/// Resolve once an interrupt or terminate signal arrives.
pub async fn interrupted() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Trigger `source` when the process is interrupted.
///
/// The returned task can be aborted once the work it guards is done.
pub fn cancel_on_interrupt(source: CancelSource) -> JoinHandle<()> {
    tokio::spawn(async move {
        interrupted().await;
        tracing::info!("Interrupt received, cancelling in-flight request");
        source.trigger();
    })
}
