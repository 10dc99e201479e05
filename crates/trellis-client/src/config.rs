use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use trellis_proto::Endpoint;

use crate::error::ClientError;
use crate::retry::DEFAULT_ATTEMPTS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub attempts: u32,
    /// Zero disables backoff.
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            backoff_ms: 0,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

fn default_slow_threshold_ms() -> u64 {
    100
}

/// Settings for one named pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolOptions {
    pub servers: Vec<String>,
    /// Bound on every connection after connecting. Defaults to the pool name.
    #[serde(default)]
    pub keyspace: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub recycle_secs: Option<u64>,
    #[serde(default)]
    pub credentials: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub trace: bool,
    #[serde(default = "default_slow_threshold_ms")]
    pub slow_threshold_ms: u64,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl PoolOptions {
    pub fn new<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            keyspace: None,
            timeout_ms: None,
            recycle_secs: None,
            credentials: None,
            trace: false,
            slow_threshold_ms: default_slow_threshold_ms(),
            retry: RetrySettings::default(),
        }
    }

    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_recycle(mut self, recycle: Duration) -> Self {
        self.recycle_secs = Some(recycle.as_secs());
        self
    }

    pub fn with_credentials(mut self, credentials: BTreeMap<String, String>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_trace(mut self, slow_threshold: Duration) -> Self {
        self.trace = true;
        self.slow_threshold_ms = slow_threshold.as_millis() as u64;
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }

    pub fn recycle(&self) -> Option<Duration> {
        self.recycle_secs.map(Duration::from_secs)
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }

    /// Checks server addresses and retry settings.
    pub fn validate(&self) -> Result<(), ClientError> {
        self.endpoints()?;
        let multiplier = self.retry.multiplier;
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(ClientError::Config(format!(
                "retry multiplier must be positive, got {multiplier}"
            )));
        }
        Ok(())
    }

    pub(crate) fn endpoints(&self) -> Result<Vec<Endpoint>, ClientError> {
        self.servers
            .iter()
            .map(|s| s.parse().map_err(|e: trellis_proto::EndpointError| ClientError::Config(e.to_string())))
            .collect()
    }
}

/// Every pool an application talks to, keyed by pool name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub pools: BTreeMap<String, PoolOptions>,
}

impl PoolConfig {
    /// Names a JSON file holding a `PoolConfig`.
    pub const ENV_VAR: &'static str = "TRELLIS_POOLS";

    pub fn from_json(text: &str) -> Result<Self, ClientError> {
        serde_json::from_str(text).map_err(|e| ClientError::Config(format!("invalid pool config: {e}")))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn from_env() -> Result<Self, ClientError> {
        let path = std::env::var(Self::ENV_VAR)
            .map_err(|_| ClientError::Config(format!("{} must be set", Self::ENV_VAR)))?;
        Self::from_path(path)
    }
}
