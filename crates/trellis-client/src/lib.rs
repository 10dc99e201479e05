mod client;
mod config;
mod connection;
mod error;
mod registry;
mod retry;
mod trace;

pub use client::Client;
pub use config::{PoolConfig, PoolOptions, RetrySettings};
pub use connection::{FramedTransport, TcpConnector};
pub use error::ClientError;
pub use registry::Registry;
pub use retry::{Backoff, DEFAULT_ATTEMPTS, RetryPolicy};
pub use trace::CallTrace;
