use trellis_proto::{Endpoint, StoreError, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("no pool named `{0}` has been registered")]
    PoolNotFound(String),
    #[error("pool `{0}` has no servers configured")]
    NoServersConfigured(String),
    #[error("transport error on {endpoint}: {message}")]
    Transport { message: String, endpoint: Endpoint },
    #[error("{source} (on {endpoint})")]
    Store {
        #[source]
        source: StoreError,
        endpoint: Endpoint,
    },
    #[error("unexpected response to {method} from {endpoint}")]
    UnexpectedResponse {
        method: &'static str,
        endpoint: Endpoint,
    },
    #[error("config error: {0}")]
    Config(String),
}

impl ClientError {
    pub(crate) fn transport(error: TransportError, endpoint: &Endpoint) -> Self {
        ClientError::Transport {
            message: error.to_string(),
            endpoint: endpoint.clone(),
        }
    }

    /// Transport failures and store-reported errors may succeed on another
    /// attempt; configuration problems never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport { .. } | ClientError::Store { .. })
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        match self {
            ClientError::Transport { endpoint, .. }
            | ClientError::Store { endpoint, .. }
            | ClientError::UnexpectedResponse { endpoint, .. } => Some(endpoint),
            _ => None,
        }
    }

    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            ClientError::Store { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.store_error(), Some(StoreError::NotFound))
    }
}
