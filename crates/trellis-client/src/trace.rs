use std::time::{Duration, Instant};

use tracing::{debug, error, warn};
use trellis_proto::Endpoint;

use crate::error::ClientError;

pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(100);

/// Times each call made through a facade and logs it: failures at `error`,
/// calls over the slow threshold at `warn`, the rest at `debug`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTrace {
    slow_threshold: Duration,
}

impl CallTrace {
    pub fn new(slow_threshold: Duration) -> Self {
        Self { slow_threshold }
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    pub fn observe<T, F>(&self, method: &str, endpoint: &Endpoint, call: F) -> Result<T, ClientError>
    where
        F: FnOnce() -> Result<T, ClientError>,
    {
        let started = Instant::now();
        let result = call();
        let elapsed = started.elapsed();
        let elapsed_us = elapsed.as_micros() as u64;
        match &result {
            Err(e) => error!(%endpoint, method, elapsed_us, error = %e, "call failed"),
            Ok(_) if elapsed >= self.slow_threshold => {
                warn!(%endpoint, method, elapsed_us, "slow call")
            }
            Ok(_) => debug!(%endpoint, method, elapsed_us, "call"),
        }
        result
    }
}

impl Default for CallTrace {
    fn default() -> Self {
        Self::new(DEFAULT_SLOW_THRESHOLD)
    }
}
