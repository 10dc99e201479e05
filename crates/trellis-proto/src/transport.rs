use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::FrameError;
use crate::protocol::{Request, Response};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid endpoint `{input}`: {reason}")]
pub struct EndpointError {
    pub input: String,
    pub reason: &'static str,
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| EndpointError {
            input: s.to_string(),
            reason,
        };
        let (host, port) = s.rsplit_once(':').ok_or_else(|| err("expected host:port"))?;
        if host.is_empty() {
            return Err(err("empty host"));
        }
        let port = port.parse().map_err(|_| err("port is not a number"))?;
        Ok(Endpoint::new(host, port))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Applied to connect, read and write. `None` blocks indefinitely.
    pub timeout: Option<Duration>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not open")]
    NotOpen,
    #[error("connection closed by peer")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// A single connection to one store server. Implementations connect lazily:
/// construction never touches the network, `open` does.
pub trait Transport: Send {
    fn endpoint(&self) -> &Endpoint;

    fn is_open(&self) -> bool;

    fn open(&mut self) -> Result<(), TransportError>;

    fn close(&mut self);

    fn call(&mut self, request: &Request) -> Result<Response, TransportError>;
}

/// Builds transports. The client layer only ever sees this seam, so a fake
/// in-process store can stand in for a real server.
pub trait Connector: Send + Sync {
    fn transport(&self, endpoint: &Endpoint, options: &ConnectOptions) -> Box<dyn Transport>;
}
