//! Backoff delay calculation with optional jitter.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Maps a 1-based attempt number to the delay before the next attempt.
pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Source of jitter factors in `[0, 1)`.
pub trait JitterSource: Send + Sync {
    fn factor(&self) -> f64;
}

/// Jitter drawn from a `StdRng`.
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    /// Seeded from OS entropy.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic sequence for a given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for SeededJitter {
    fn default() -> Self {
        Self::new()
    }
}

impl JitterSource for SeededJitter {
    fn factor(&self) -> f64 {
        self.rng.lock().gen::<f64>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Growth {
    Constant,
    Exponential { rate: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    None,
    /// Scale the delay by a factor in `[0, 1)`.
    Full,
}

/// Backoff schedule.
///
/// Constant delays are always `interval`. Exponential delays are
/// `interval * rate^attempt`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub growth: Growth,
    pub interval: Duration,
    pub max_delay: Duration,
    pub jitter: Jitter,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(100), 2.0)
    }
}

impl Backoff {
    pub fn constant(interval: Duration) -> Self {
        Self {
            growth: Growth::Constant,
            interval,
            max_delay: Duration::from_secs(5),
            jitter: Jitter::None,
        }
    }

    pub fn exponential(interval: Duration, rate: f64) -> Self {
        Self {
            growth: Growth::Exponential { rate },
            ..Self::constant(interval)
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = Jitter::Full;
        self
    }

    /// Unjittered delay for `attempt` (starting at 1).
    ///
    /// `max_delay` only caps exponential growth.
    pub fn delay(&self, attempt: u32) -> Duration {
        let rate = match self.growth {
            Growth::Constant => return self.interval,
            Growth::Exponential { rate } => rate,
        };

        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.interval.as_secs_f64() * rate.powi(exp);

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        if secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(secs)
    }

    /// Delay for `attempt` with jitter applied, if enabled.
    pub fn jittered(&self, attempt: u32, source: &dyn JitterSource) -> Duration {
        let base = self.delay(attempt);
        match self.jitter {
            Jitter::None => base,
            Jitter::Full => {
                let f = source.factor();
                let f = if f.is_finite() { f.clamp(0.0, 1.0) } else { 0.0 };
                base.mul_f64(f)
            }
        }
    }

    /// Backoff function using an entropy-seeded jitter source.
    pub fn into_fn(self) -> BackoffFn {
        self.into_fn_with(Arc::new(SeededJitter::new()))
    }

    pub fn into_fn_with(self, source: Arc<dyn JitterSource>) -> BackoffFn {
        Arc::new(move |attempt| self.jittered(attempt, source.as_ref()))
    }
}
