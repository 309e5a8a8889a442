//! Caller-controlled cancellation for in-flight requests.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Owner side of a cancellation signal.
///
/// Dropping the source without triggering it never cancels its signals.
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A signal that fires when this source is triggered.
    pub fn signal(&self) -> Cancellation {
        Cancellation {
            rx: Some(self.tx.subscribe()),
            deadline: None,
        }
    }

    /// Fire every signal handed out by this source.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation signal carried in request extensions.
///
/// Fires when its [`CancelSource`] is triggered or its deadline passes,
/// whichever comes first.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// A signal that only fires at `deadline`.
    pub fn at(deadline: Instant) -> Self {
        Self {
            rx: None,
            deadline: Some(deadline),
        }
    }

    /// A signal that only fires once `timeout` has elapsed from now.
    ///
    /// A timeout too large to represent as an instant never fires.
    pub fn after(timeout: Duration) -> Self {
        Self {
            rx: None,
            deadline: None,
        }
        .with_timeout(timeout)
    }

    /// Add (or tighten) a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Add (or tighten) a deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        let triggered = self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false);
        let expired = self.deadline.map(|d| Instant::now() >= d).unwrap_or(false);
        triggered || expired
    }

    /// Resolve once the signal fires. Pends forever if it never can.
    pub async fn cancelled(&self) {
        let triggered = async {
            match self.rx.clone() {
                Some(mut rx) => {
                    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                        // Source dropped without triggering.
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = triggered => {}
            _ = expired => {}
        }
    }
}

/// Read the cancellation signal attached to a request, if any.
pub fn cancellation_of<B>(request: &http::Request<B>) -> Option<Cancellation> {
    request.extensions().get::<Cancellation>().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_fires_signal() {
        let source = CancelSource::new();
        let signal = source.signal();
        assert!(!signal.is_cancelled());

        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.cancelled().await }
        });

        source.trigger();
        waiter.await.unwrap();
        assert!(signal.is_cancelled());
        assert!(source.is_triggered());
    }

    #[tokio::test]
    async fn test_signal_taken_after_trigger_is_cancelled() {
        let source = CancelSource::new();
        source.trigger();
        let signal = source.signal();
        assert!(signal.is_cancelled());
        signal.cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires() {
        let signal = Cancellation::after(Duration::from_secs(5));
        assert!(!signal.is_cancelled());

        let start = Instant::now();
        signal.cancelled().await;
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_source_never_fires() {
        let source = CancelSource::new();
        let signal = source.signal();
        drop(source);

        let res = tokio::time::timeout(Duration::from_secs(60), signal.cancelled()).await;
        assert!(res.is_err());
        assert!(!signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_timeout_never_fires() {
        let signal = Cancellation::after(Duration::MAX);
        assert_eq!(signal.deadline(), None);

        let source = CancelSource::new();
        let signal = source.signal().with_timeout(Duration::MAX);
        assert_eq!(signal.deadline(), None);

        let res = tokio::time::timeout(Duration::from_secs(60), signal.cancelled()).await;
        assert!(res.is_err());
        source.trigger();
        signal.cancelled().await;
    }

    #[test]
    fn test_with_deadline_keeps_earliest() {
        let now = Instant::now();
        let signal = Cancellation::at(now + Duration::from_secs(1))
            .with_deadline(now + Duration::from_secs(10));
        assert_eq!(signal.deadline(), Some(now + Duration::from_secs(1)));
    }
}
