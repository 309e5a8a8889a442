//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast
//! - Half-Open: one probe request tests whether upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: recovery window elapsed, next call becomes the probe
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails
//! ```
//!
//! # Design Decisions
//! - One breaker per decorator instance, never shared across processes
//! - Fail fast in Open state without touching the wrapped transport
//! - Single probe in Half-Open; a dropped probe frees the slot
//! - The lock covers admission and recording only, never the network call
//! - Outcomes of calls admitted while Closed are ignored once the state moved on

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::TransportError;
use crate::observability::metrics::record_circuit_state;
use crate::transport::{Decorator, Outcome, Request, SharedTransport, Transport};

/// Decides whether an outcome counts as a failure.
pub type TripPredicate = Arc<dyn Fn(&Outcome) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker settings.
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Label used in logs and metrics.
    pub name: String,
    /// Consecutive failures before opening; 0 means the default.
    pub failure_threshold: u32,
    /// Time spent Open before a probe is let through.
    pub recovery_window: Duration,
    pub should_trip: TripPredicate,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_window: DEFAULT_RECOVERY_WINDOW,
            should_trip: Arc::new(default_should_trip),
        }
    }
}

impl std::fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("name", &self.name)
            .field("failure_threshold", &self.failure_threshold)
            .field("recovery_window", &self.recovery_window)
            .finish_non_exhaustive()
    }
}

impl CircuitBreakerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n;
        self
    }

    pub fn with_recovery_window(mut self, window: Duration) -> Self {
        self.recovery_window = window;
        self
    }

    pub fn with_should_trip<F>(mut self, f: F) -> Self
    where
        F: Fn(&Outcome) -> bool + Send + Sync + 'static,
    {
        self.should_trip = Arc::new(f);
        self
    }
}

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RECOVERY_WINDOW: Duration = Duration::from_secs(30);

/// Any error or a status of 500 and above.
pub fn default_should_trip(outcome: &Outcome) -> bool {
    match outcome {
        Ok(res) => res.status().as_u16() >= 500,
        Err(_) => true,
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    probing: bool,
}

impl BreakerState {
    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.failures = 0;
        self.opened_at = Some(Instant::now());
        self.probing = false;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failures = 0;
        self.opened_at = None;
        self.probing = false;
    }
}

struct Shared {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

/// Circuit breaker decorator.
///
/// Every transport it decorates shares this instance's state. Clones share
/// state too.
#[derive(Clone)]
pub struct CircuitBreaker {
    shared: Arc<Shared>,
}

impl CircuitBreaker {
    pub fn new(mut config: CircuitBreakerConfig) -> Self {
        if config.failure_threshold == 0 {
            config.failure_threshold = DEFAULT_FAILURE_THRESHOLD;
        }
        if config.recovery_window.is_zero() {
            config.recovery_window = DEFAULT_RECOVERY_WINDOW;
        }
        record_circuit_state(&config.name, CircuitState::Closed);
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(BreakerState {
                    state: CircuitState::Closed,
                    failures: 0,
                    opened_at: None,
                    probing: false,
                }),
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.shared.config
    }

    pub fn state(&self) -> CircuitState {
        self.shared.state.lock().state
    }

    /// Consecutive failures counted while Closed.
    pub fn failures(&self) -> u32 {
        self.shared.state.lock().failures
    }

    fn admit(&self) -> Result<Ticket, TransportError> {
        let window = self.shared.config.recovery_window;
        let mut st = self.shared.state.lock();
        let current = st.state;

        match current {
            CircuitState::Closed => Ok(Ticket::Normal),
            CircuitState::Open => {
                let recovered = st
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= window);
                if !recovered {
                    return Err(TransportError::CircuitOpen);
                }
                st.state = CircuitState::HalfOpen;
                st.probing = true;
                drop(st);

                self.transitioned(CircuitState::HalfOpen);
                Ok(Ticket::Probe(self.probe_guard()))
            }
            CircuitState::HalfOpen => {
                if st.probing {
                    return Err(TransportError::CircuitOpen);
                }
                st.probing = true;
                Ok(Ticket::Probe(self.probe_guard()))
            }
        }
    }

    fn probe_guard(&self) -> ProbeGuard {
        ProbeGuard {
            shared: Arc::clone(&self.shared),
            armed: true,
        }
    }

    fn record(&self, ticket: Ticket, outcome: &Outcome) {
        // The caller gave up; says nothing about upstream health.
        if matches!(outcome, Err(TransportError::Cancelled)) {
            return;
        }

        let failed = (self.shared.config.should_trip)(outcome);
        let threshold = self.shared.config.failure_threshold;

        let next = {
            let mut st = self.shared.state.lock();
            match ticket {
                Ticket::Normal => {
                    if st.state != CircuitState::Closed {
                        return;
                    }
                    if !failed {
                        st.failures = 0;
                        None
                    } else {
                        st.failures += 1;
                        if st.failures >= threshold {
                            st.open();
                            Some(CircuitState::Open)
                        } else {
                            None
                        }
                    }
                }
                Ticket::Probe(mut guard) => {
                    guard.armed = false;
                    if failed {
                        st.open();
                        Some(CircuitState::Open)
                    } else {
                        st.close();
                        Some(CircuitState::Closed)
                    }
                }
            }
        };

        if let Some(state) = next {
            self.transitioned(state);
        }
    }

    fn transitioned(&self, state: CircuitState) {
        let name = &self.shared.config.name;
        match state {
            CircuitState::Open => tracing::warn!(breaker = %name, "Circuit breaker opened"),
            CircuitState::HalfOpen => tracing::info!(breaker = %name, "Circuit breaker probing"),
            CircuitState::Closed => tracing::info!(breaker = %name, "Circuit breaker closed"),
        }
        record_circuit_state(name, state);
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.shared.config)
            .field("state", &*self.shared.state.lock())
            .finish()
    }
}

impl Decorator for CircuitBreaker {
    fn decorate(&self, next: SharedTransport) -> SharedTransport {
        Arc::new(CircuitBreakerTransport {
            next,
            breaker: self.clone(),
        })
    }
}

enum Ticket {
    Normal,
    Probe(ProbeGuard),
}

/// Clears the probing flag if the probe never reports an outcome.
struct ProbeGuard {
    shared: Arc<Shared>,
    armed: bool,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        if self.armed {
            self.shared.state.lock().probing = false;
        }
    }
}

/// Transport produced by [`CircuitBreaker`].
pub struct CircuitBreakerTransport {
    next: SharedTransport,
    breaker: CircuitBreaker,
}

#[async_trait]
impl Transport for CircuitBreakerTransport {
    async fn send(&self, request: Request) -> Outcome {
        let ticket = match self.breaker.admit() {
            Ok(ticket) => ticket,
            Err(e) => {
                tracing::debug!(
                    breaker = %self.breaker.config().name,
                    uri = %request.uri(),
                    "Rejected by open circuit"
                );
                return Err(e);
            }
        };

        let outcome = self.next.send(request).await;
        self.breaker.record(ticket, &outcome);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    use crate::error::NetworkErrorKind;
    use crate::testing::{MockReply, MockTransport};

    fn get() -> Request {
        http::Request::get("http://upstream/").body(Body::empty()).unwrap()
    }

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_recovery_window(Duration::from_secs(10)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_probe_close_cycle() {
        let mock = MockTransport::new()
            .replies(MockReply::status(500), 3)
            .reply(MockReply::status(503))
            .reply(MockReply::status(200));
        let cb = breaker(3);
        let t = cb.decorate(Arc::new(mock.clone()));

        for _ in 0..3 {
            assert_eq!(t.send(get()).await.unwrap().status(), 500);
        }
        assert_eq!(cb.state(), CircuitState::Open);

        // Within the window: rejected without calling upstream.
        assert!(t.send(get()).await.unwrap_err().is_circuit_open());
        assert_eq!(mock.call_count(), 3);

        // Failing probe reopens with a fresh timestamp.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(t.send(get()).await.unwrap().status(), 503);
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(t.send(get()).await.unwrap_err().is_circuit_open());

        // Successful probe closes.
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(t.send(get()).await.unwrap().status(), 200);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failures(), 0);
        assert_eq!(mock.call_count(), 5);
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let mock = MockTransport::new()
            .replies(MockReply::status(502), 2)
            .reply(MockReply::status(200))
            .replies(MockReply::network(NetworkErrorKind::ConnectionReset), 2);
        let cb = breaker(3);
        let t = cb.decorate(Arc::new(mock));

        t.send(get()).await.unwrap();
        t.send(get()).await.unwrap();
        assert_eq!(cb.failures(), 2);
        t.send(get()).await.unwrap();
        assert_eq!(cb.failures(), 0);
        let _ = t.send(get()).await;
        let _ = t.send(get()).await;
        assert_eq!(cb.failures(), 2);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_client_errors_do_not_trip() {
        let mock = MockTransport::new().fallback(MockReply::status(404));
        let cb = breaker(1);
        let t = cb.decorate(Arc::new(mock));

        for _ in 0..5 {
            t.send(get()).await.unwrap();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_zero_threshold_means_default() {
        let cb = breaker(0);
        assert_eq!(cb.config().failure_threshold, DEFAULT_FAILURE_THRESHOLD);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_recovery_window_means_default() {
        let cb = CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_recovery_window(Duration::ZERO),
        );
        assert_eq!(cb.config().recovery_window, DEFAULT_RECOVERY_WINDOW);

        let mock = MockTransport::new().fallback(MockReply::status(500));
        let t = cb.decorate(Arc::new(mock.clone()));
        t.send(get()).await.unwrap();
        for _ in 0..5 {
            assert!(t.send(get()).await.unwrap_err().is_circuit_open());
        }
        assert_eq!(mock.call_count(), 1);
    }

    /// Fails or cancels on request, succeeds otherwise.
    fn scripted() -> SharedTransport {
        Arc::new(crate::transport::transport_fn(|req: Request| async move {
            match req.headers().get("x-outcome").map(|v| v.as_bytes()) {
                Some(b"cancel") => Err(TransportError::Cancelled),
                Some(b"fail") => Ok(http::Response::builder()
                    .status(500)
                    .body(Body::empty())
                    .unwrap()),
                _ => Ok(http::Response::new(Body::empty())),
            }
        }))
    }

    fn with_outcome(outcome: &'static str) -> Request {
        http::Request::get("http://upstream/")
            .header("x-outcome", outcome)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_cancelled_outcome_leaves_counter() {
        let cb = breaker(2);
        let t = cb.decorate(scripted());

        t.send(with_outcome("fail")).await.unwrap();
        assert_eq!(cb.failures(), 1);

        for _ in 0..3 {
            assert!(t.send(with_outcome("cancel")).await.unwrap_err().is_cancelled());
        }
        assert_eq!(cb.failures(), 1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_half_open_call_frees_slot() {
        let cb = breaker(1);
        let t = cb.decorate(scripted());

        t.send(with_outcome("fail")).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(10)).await;

        assert!(t.send(with_outcome("cancel")).await.unwrap_err().is_cancelled());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert_eq!(t.send(get()).await.unwrap().status(), 200);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_in_flight() {
        let mock = MockTransport::new()
            .reply(MockReply::status(500))
            .latency(Duration::from_secs(1));
        let cb = breaker(1);
        let t = cb.decorate(Arc::new(mock.clone()));

        t.send(get()).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(10)).await;

        let probe = {
            let t = Arc::clone(&t);
            tokio::spawn(async move { t.send(get()).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(t.send(get()).await.unwrap_err().is_circuit_open());
        assert_eq!(probe.await.unwrap().unwrap().status(), 200);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_frees_slot() {
        let mock = MockTransport::new()
            .reply(MockReply::status(500))
            .latency(Duration::from_secs(1));
        let cb = breaker(1);
        let t = cb.decorate(Arc::new(mock.clone()));

        t.send(get()).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;

        let abandoned = tokio::time::timeout(Duration::from_millis(10), t.send(get())).await;
        assert!(abandoned.is_err());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert_eq!(t.send(get()).await.unwrap().status(), 200);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_outcome_ignored_after_open() {
        let mock = MockTransport::new()
            .replies(MockReply::status(500), 2)
            .latency(Duration::from_secs(1));
        let cb = breaker(1);
        let t = cb.decorate(Arc::new(mock.clone()));

        let (a, b) = tokio::join!(t.send(get()), t.send(get()));
        assert_eq!(a.unwrap().status(), 500);
        assert_eq!(b.unwrap().status(), 500);

        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.failures(), 0);
        assert_eq!(mock.call_count(), 2);
    }

    #[test]
    fn test_default_trip_predicate() {
        let res = |code: u16| -> Outcome {
            let mut r = http::Response::new(Body::empty());
            *r.status_mut() = http::StatusCode::from_u16(code).unwrap();
            Ok(r)
        };
        assert!(default_should_trip(&res(500)));
        assert!(default_should_trip(&res(503)));
        assert!(!default_should_trip(&res(404)));
        assert!(!default_should_trip(&res(200)));
        assert!(default_should_trip(&Err(TransportError::Timeout(Duration::from_secs(1)))));
    }
}
