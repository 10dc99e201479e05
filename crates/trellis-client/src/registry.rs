use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, ThreadId};

use tracing::{debug, info};
use trellis_proto::Connector;

use crate::client::Client;
use crate::config::{PoolConfig, PoolOptions};
use crate::connection::TcpConnector;
use crate::error::ClientError;

type ClientKey = (u32, ThreadId, String);

/// Named pool definitions plus the per-thread facades built from them.
///
/// Facades are cached per `(process, thread, pool)`, so a connection is never
/// shared between threads. Re-registering a pool does not touch facades that
/// were already handed out.
pub struct Registry {
    connector: Arc<dyn Connector>,
    pools: RwLock<HashMap<String, PoolOptions>>,
    clients: Mutex<HashMap<ClientKey, Arc<Client>>>,
}

impl Registry {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            pools: RwLock::new(HashMap::new()),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn tcp() -> Self {
        Self::new(Arc::new(TcpConnector))
    }

    /// A TCP-backed registry with every pool in `config` registered.
    pub fn init(config: &PoolConfig) -> Result<Self, ClientError> {
        let registry = Self::tcp();
        for (name, options) in &config.pools {
            registry.register(name.as_str(), options.clone())?;
        }
        Ok(registry)
    }

    /// Records a pool definition. Addresses and retry settings are validated here; nothing
    /// connects until a facade makes its first call.
    pub fn register(&self, name: impl Into<String>, options: PoolOptions) -> Result<(), ClientError> {
        let name = name.into();
        options.validate()?;
        info!(pool = %name, servers = ?options.servers, "registered pool");
        self.pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, options);
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn pool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// The calling thread's facade for pool `name`, created on first use.
    pub fn resolve(&self, name: &str) -> Result<Arc<Client>, ClientError> {
        let key = (std::process::id(), thread::current().id(), name.to_string());
        if let Some(client) = self.clients().get(&key) {
            return Ok(Arc::clone(client));
        }

        let options = self
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::PoolNotFound(name.to_string()))?;
        let client = Arc::new(Client::new(name, &options, self.connector.as_ref())?);
        debug!(pool = name, "created facade");
        self.clients().insert(key, Arc::clone(&client));
        Ok(client)
    }

    /// Drops every cached facade and closes its connections.
    pub fn shutdown(&self) {
        let clients: Vec<Arc<Client>> = self.clients().drain().map(|(_, c)| c).collect();
        for client in &clients {
            client.close();
        }
        debug!(closed = clients.len(), "registry shut down");
    }

    fn clients(&self) -> std::sync::MutexGuard<'_, HashMap<ClientKey, Arc<Client>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("pools", &self.pool_names())
            .finish_non_exhaustive()
    }
}
