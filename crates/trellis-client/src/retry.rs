use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::error::ClientError;

pub const DEFAULT_ATTEMPTS: u32 = 5;

/// Decides whether attempt number `attempt` (1-based) may be followed by another.
pub type RetryCallback = Arc<dyn Fn(u32, &ClientError) -> bool + Send + Sync>;

/// Delay before attempt `n + 1` is `initial * multiplier^(n - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Backoff {
    pub const NONE: Backoff = Backoff {
        initial: Duration::ZERO,
        max: Duration::ZERO,
        multiplier: 1.0,
    };

    pub fn exponential(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max,
            multiplier,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        if self.initial.is_zero() {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exp);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        if secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Wraps every facade call. The loop stops early on non-retryable errors and
/// otherwise keeps going while the callback allows it, returning the last
/// error unchanged.
#[derive(Clone)]
pub struct RetryPolicy {
    callback: RetryCallback,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn attempts(max: u32) -> Self {
        Self::with_callback(move |attempt, _| attempt < max)
    }

    pub fn with_callback<F>(callback: F) -> Self
    where
        F: Fn(u32, &ClientError) -> bool + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
            backoff: Backoff::NONE,
        }
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::attempts(settings.attempts.max(1)).backoff(Backoff::exponential(
            Duration::from_millis(settings.backoff_ms),
            Duration::from_millis(settings.max_backoff_ms),
            settings.multiplier,
        ))
    }

    pub fn should_retry(&self, attempt: u32, error: &ClientError) -> bool {
        error.is_retryable() && (self.callback)(attempt, error)
    }

    pub fn run<T, F>(&self, method: &str, mut op: F) -> Result<T, ClientError>
    where
        F: FnMut(u32) -> Result<T, ClientError>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(attempt, &e) => {
                    let delay = self.backoff.delay(attempt);
                    warn!(method, attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying");
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(e) => {
                    debug!(method, attempt, error = %e, "giving up");
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::attempts(DEFAULT_ATTEMPTS)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}
