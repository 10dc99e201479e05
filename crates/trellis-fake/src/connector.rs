use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use trellis_proto::{
    ConnectOptions, Connector, Endpoint, Request, Response, StoreError, Transport, TransportError,
};

use crate::session::Session;
use crate::store::MemoryStore;

/// Method name recorded when a transport opens.
pub const OPEN: &str = "open";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub endpoint: Endpoint,
    pub method: &'static str,
}

/// Every open and call made through a `MemoryConnector`, in order.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    records: Arc<Mutex<Vec<CallRecord>>>,
}

impl CallLog {
    fn push(&self, endpoint: &Endpoint, method: &'static str) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CallRecord {
                endpoint: endpoint.clone(),
                method,
            });
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    pub fn count_at(&self, endpoint: &Endpoint, method: &str) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.method == method && &r.endpoint == endpoint)
            .count()
    }

    /// Endpoints of the data calls (opens and session setup excluded).
    pub fn call_endpoints(&self) -> Vec<Endpoint> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| !matches!(r.method, OPEN | "set_keyspace" | "login"))
            .map(|r| r.endpoint.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[derive(Debug, Default)]
struct FaultState {
    down: HashSet<Endpoint>,
    broken_calls: HashMap<Endpoint, usize>,
    store_errors: HashMap<Endpoint, VecDeque<StoreError>>,
}

/// Shared switchboard for simulating server failures.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    state: Arc<Mutex<FaultState>>,
}

impl Faults {
    fn with<T>(&self, f: impl FnOnce(&mut FaultState) -> T) -> T {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Refuses new connections and breaks open ones.
    pub fn take_down(&self, endpoint: &Endpoint) {
        self.with(|s| s.down.insert(endpoint.clone()));
    }

    pub fn bring_up(&self, endpoint: &Endpoint) {
        self.with(|s| s.down.remove(endpoint));
    }

    /// The next `n` calls on `endpoint` fail at the transport level.
    pub fn break_next_calls(&self, endpoint: &Endpoint, n: usize) {
        self.with(|s| *s.broken_calls.entry(endpoint.clone()).or_default() += n);
    }

    /// The next call on `endpoint` answers with `error` instead of running.
    pub fn respond_with_error(&self, endpoint: &Endpoint, error: StoreError) {
        self.with(|s| {
            s.store_errors
                .entry(endpoint.clone())
                .or_default()
                .push_back(error)
        });
    }

    fn is_down(&self, endpoint: &Endpoint) -> bool {
        self.with(|s| s.down.contains(endpoint))
    }

    fn take_broken_call(&self, endpoint: &Endpoint) -> bool {
        self.with(|s| match s.broken_calls.get_mut(endpoint) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        })
    }

    fn take_store_error(&self, endpoint: &Endpoint) -> Option<StoreError> {
        self.with(|s| s.store_errors.get_mut(endpoint).and_then(VecDeque::pop_front))
    }
}

/// Connects every endpoint to the same `MemoryStore`.
#[derive(Clone)]
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
    faults: Faults,
    log: CallLog,
}

impl MemoryConnector {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            faults: Faults::default(),
            log: CallLog::default(),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }
}

impl Connector for MemoryConnector {
    fn transport(&self, endpoint: &Endpoint, _options: &ConnectOptions) -> Box<dyn Transport> {
        Box::new(MemoryTransport {
            endpoint: endpoint.clone(),
            store: Arc::clone(&self.store),
            faults: self.faults.clone(),
            log: self.log.clone(),
            session: None,
        })
    }
}

pub struct MemoryTransport {
    endpoint: Endpoint,
    store: Arc<MemoryStore>,
    faults: Faults,
    log: CallLog,
    session: Option<Session>,
}

impl Transport for MemoryTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn open(&mut self) -> Result<(), TransportError> {
        self.log.push(&self.endpoint, OPEN);
        if self.faults.is_down(&self.endpoint) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused").into());
        }
        self.session = Some(Session::new(Arc::clone(&self.store)));
        Ok(())
    }

    fn close(&mut self) {
        self.session = None;
    }

    fn call(&mut self, request: &Request) -> Result<Response, TransportError> {
        let session = self.session.as_mut().ok_or(TransportError::NotOpen)?;
        self.log.push(&self.endpoint, request.method());
        if self.faults.is_down(&self.endpoint) || self.faults.take_broken_call(&self.endpoint) {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset").into());
        }
        if let Some(error) = self.faults.take_store_error(&self.endpoint) {
            return Ok(Response::Error(error));
        }
        Ok(session.handle(request.clone()))
    }
}
