use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, error, warn};
use trellis_proto::{
    AuthRequest, ColumnOrSuperColumn, ColumnParent, ColumnPath, ConnectOptions, Connector,
    ConsistencyLevel, Endpoint, KeySlice, MutationMap, Request, Response, SlicePredicate,
    Timestamp, Transport,
};

use crate::config::PoolOptions;
use crate::error::ClientError;
use crate::retry::RetryPolicy;
use crate::trace::CallTrace;

struct Server {
    transport: Box<dyn Transport>,
    connected_at: Option<Instant>,
    /// Keyspace bound on the current connection.
    keyspace: Option<String>,
}

impl Server {
    fn endpoint(&self) -> &Endpoint {
        self.transport.endpoint()
    }

    fn disconnect(&mut self) {
        self.transport.close();
        self.connected_at = None;
        self.keyspace = None;
    }

    fn ensure_connected(
        &mut self,
        recycle: Option<Duration>,
        keyspace: &str,
        auth: Option<&AuthRequest>,
    ) -> Result<(), ClientError> {
        if self.transport.is_open() {
            if let (Some(max_age), Some(since)) = (recycle, self.connected_at) {
                if since.elapsed() >= max_age {
                    debug!(endpoint = %self.endpoint(), "recycling connection");
                    self.disconnect();
                }
            }
        }

        if !self.transport.is_open() {
            if let Err(e) = self.transport.open() {
                let error = ClientError::transport(e, self.endpoint());
                self.disconnect();
                warn!(error = %error, "connect failed");
                return Err(error);
            }
            self.connected_at = Some(Instant::now());
            debug!(endpoint = %self.endpoint(), "connected");
            if let Some(auth) = auth {
                self.setup(Request::Login { auth: auth.clone() })?;
            }
        }

        if self.keyspace.as_deref() != Some(keyspace) {
            self.setup(Request::SetKeyspace {
                keyspace: keyspace.to_string(),
            })?;
            self.keyspace = Some(keyspace.to_string());
        }
        Ok(())
    }

    /// Connection setup call; any failure drops the connection.
    fn setup(&mut self, request: Request) -> Result<(), ClientError> {
        let result = self.execute(request.method(), &request, ok);
        if result.is_err() {
            self.disconnect();
        }
        result
    }

    fn execute<T, F>(&mut self, method: &'static str, request: &Request, extract: F) -> Result<T, ClientError>
    where
        F: Fn(Response) -> Option<T>,
    {
        let endpoint = self.endpoint().clone();
        match self.transport.call(request) {
            Ok(Response::Error(source)) => Err(ClientError::Store { source, endpoint }),
            Ok(response) => extract(response).ok_or(ClientError::UnexpectedResponse { method, endpoint }),
            Err(e) => {
                warn!(%endpoint, method, error = %e, "transport failure, closing connection");
                self.disconnect();
                Err(ClientError::transport(e, &endpoint))
            }
        }
    }
}

struct State {
    servers: Vec<Server>,
    next: usize,
    keyspace: String,
    auth: Option<AuthRequest>,
}

impl State {
    fn select(&mut self, pool: &str) -> Result<usize, ClientError> {
        if self.servers.is_empty() {
            return Err(ClientError::NoServersConfigured(pool.to_string()));
        }
        let index = self.next % self.servers.len();
        self.next = index + 1;
        Ok(index)
    }
}

/// One pool's view of the cluster for one thread. Every call picks the next
/// server round robin, connects it if needed, and runs inside the retry loop,
/// so a dead server costs one attempt and the retry lands on its neighbour.
pub struct Client {
    pool: String,
    recycle: Option<Duration>,
    retry: RetryPolicy,
    trace: Option<CallTrace>,
    state: Mutex<State>,
}

impl Client {
    /// Builds unopened transports for every server; nothing connects until the
    /// first call.
    pub fn new(pool: &str, options: &PoolOptions, connector: &dyn Connector) -> Result<Self, ClientError> {
        let connect = ConnectOptions {
            timeout: options.timeout(),
        };
        let servers: Vec<Server> = options
            .endpoints()?
            .iter()
            .map(|endpoint| Server {
                transport: connector.transport(endpoint, &connect),
                connected_at: None,
                keyspace: None,
            })
            .collect();
        let next = if servers.is_empty() {
            0
        } else {
            rand::thread_rng().gen_range(0..servers.len())
        };
        Ok(Self {
            pool: pool.to_string(),
            recycle: options.recycle(),
            retry: RetryPolicy::from_settings(&options.retry),
            trace: options.trace.then(|| CallTrace::new(options.slow_threshold())),
            state: Mutex::new(State {
                servers,
                next,
                keyspace: options.keyspace.clone().unwrap_or_else(|| pool.to_string()),
                auth: options.credentials.clone().map(AuthRequest::new),
            }),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn keyspace(&self) -> String {
        self.lock().keyspace.clone()
    }

    pub fn servers(&self) -> Vec<Endpoint> {
        self.lock().servers.iter().map(|s| s.endpoint().clone()).collect()
    }

    /// Advances the round robin and returns the chosen server.
    pub fn select_next_server(&self) -> Result<Endpoint, ClientError> {
        let mut state = self.lock();
        let index = state.select(&self.pool)?;
        Ok(state.servers[index].endpoint().clone())
    }

    pub fn close(&self) {
        for server in self.lock().servers.iter_mut() {
            server.disconnect();
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn call<T, F>(&self, request: Request, extract: F) -> Result<T, ClientError>
    where
        F: Fn(Response) -> Option<T>,
    {
        let method = request.method();
        self.retry
            .run(method, |_| self.attempt(method, &request, &extract))
            .inspect_err(|e| error!(pool = %self.pool, method, error = %e, "call failed"))
    }

    fn attempt<T, F>(&self, method: &'static str, request: &Request, extract: &F) -> Result<T, ClientError>
    where
        F: Fn(Response) -> Option<T>,
    {
        let mut guard = self.lock();
        let index = guard.select(&self.pool)?;
        let State {
            servers,
            keyspace,
            auth,
            ..
        } = &mut *guard;
        let server = &mut servers[index];
        server.ensure_connected(self.recycle, keyspace, auth.as_ref())?;

        let endpoint = server.endpoint().clone();
        let mut exec = || server.execute(method, request, extract);
        let result = match &self.trace {
            Some(trace) => trace.observe(method, &endpoint, exec),
            None => exec(),
        };
        if let (Ok(_), Request::SetKeyspace { keyspace }) = (&result, request) {
            server.keyspace = Some(keyspace.clone());
        }
        result
    }

    // ── Session ─────────────────────────────────────────────────

    /// Rebinds the facade; other connections pick the keyspace up on their
    /// next call.
    pub fn set_keyspace(&self, keyspace: &str) -> Result<(), ClientError> {
        self.call(
            Request::SetKeyspace {
                keyspace: keyspace.to_string(),
            },
            ok,
        )?;
        self.lock().keyspace = keyspace.to_string();
        Ok(())
    }

    /// Credentials are remembered and replayed after every reconnect.
    pub fn login(&self, auth: AuthRequest) -> Result<(), ClientError> {
        self.call(Request::Login { auth: auth.clone() }, ok)?;
        self.lock().auth = Some(auth);
        Ok(())
    }

    // ── Reads ───────────────────────────────────────────────────

    pub fn get(
        &self,
        key: &str,
        path: &ColumnPath,
        consistency: ConsistencyLevel,
    ) -> Result<ColumnOrSuperColumn, ClientError> {
        self.call(
            Request::Get {
                key: key.to_string(),
                path: path.clone(),
                consistency,
            },
            |r| match r {
                Response::Column(c) => Some(c),
                _ => None,
            },
        )
    }

    pub fn get_slice(
        &self,
        key: &str,
        parent: &ColumnParent,
        predicate: &SlicePredicate,
        consistency: ConsistencyLevel,
    ) -> Result<Vec<ColumnOrSuperColumn>, ClientError> {
        self.call(
            Request::GetSlice {
                key: key.to_string(),
                parent: parent.clone(),
                predicate: predicate.clone(),
                consistency,
            },
            columns,
        )
    }

    pub fn multiget_slice(
        &self,
        keys: &[String],
        parent: &ColumnParent,
        predicate: &SlicePredicate,
        consistency: ConsistencyLevel,
    ) -> Result<BTreeMap<String, Vec<ColumnOrSuperColumn>>, ClientError> {
        self.call(
            Request::MultigetSlice {
                keys: keys.to_vec(),
                parent: parent.clone(),
                predicate: predicate.clone(),
                consistency,
            },
            |r| match r {
                Response::Rows(rows) => Some(rows),
                _ => None,
            },
        )
    }

    pub fn get_count(
        &self,
        key: &str,
        parent: &ColumnParent,
        consistency: ConsistencyLevel,
    ) -> Result<u64, ClientError> {
        self.call(
            Request::GetCount {
                key: key.to_string(),
                parent: parent.clone(),
                consistency,
            },
            |r| match r {
                Response::Count(n) => Some(n),
                _ => None,
            },
        )
    }

    pub fn get_range_slice(
        &self,
        parent: &ColumnParent,
        predicate: &SlicePredicate,
        start_key: &str,
        finish_key: &str,
        row_count: usize,
        consistency: ConsistencyLevel,
    ) -> Result<Vec<KeySlice>, ClientError> {
        self.call(
            Request::GetRangeSlice {
                parent: parent.clone(),
                predicate: predicate.clone(),
                start_key: start_key.to_string(),
                finish_key: finish_key.to_string(),
                row_count,
                consistency,
            },
            |r| match r {
                Response::KeySlices(slices) => Some(slices),
                _ => None,
            },
        )
    }

    pub fn get_key_range(
        &self,
        column_family: &str,
        start: &str,
        finish: &str,
        count: usize,
        consistency: ConsistencyLevel,
    ) -> Result<Vec<String>, ClientError> {
        self.call(
            Request::GetKeyRange {
                column_family: column_family.to_string(),
                start: start.to_string(),
                finish: finish.to_string(),
                count,
                consistency,
            },
            |r| match r {
                Response::Keys(keys) => Some(keys),
                _ => None,
            },
        )
    }

    // ── Writes ──────────────────────────────────────────────────

    pub fn insert(
        &self,
        key: &str,
        path: &ColumnPath,
        value: &str,
        timestamp: Timestamp,
        consistency: ConsistencyLevel,
    ) -> Result<(), ClientError> {
        self.call(
            Request::Insert {
                key: key.to_string(),
                path: path.clone(),
                value: value.to_string(),
                timestamp,
                consistency,
            },
            ok,
        )
    }

    pub fn remove(
        &self,
        key: &str,
        path: &ColumnPath,
        timestamp: Timestamp,
        consistency: ConsistencyLevel,
    ) -> Result<(), ClientError> {
        self.call(
            Request::Remove {
                key: key.to_string(),
                path: path.clone(),
                timestamp,
                consistency,
            },
            ok,
        )
    }

    pub fn batch_insert(
        &self,
        key: &str,
        families: BTreeMap<String, Vec<ColumnOrSuperColumn>>,
        consistency: ConsistencyLevel,
    ) -> Result<(), ClientError> {
        self.call(
            Request::BatchInsert {
                key: key.to_string(),
                families,
                consistency,
            },
            ok,
        )
    }

    pub fn batch_mutate(&self, mutations: MutationMap, consistency: ConsistencyLevel) -> Result<(), ClientError> {
        self.call(
            Request::BatchMutate {
                mutations,
                consistency,
            },
            ok,
        )
    }

    // ── Cluster metadata ────────────────────────────────────────

    pub fn get_string_property(&self, property: &str) -> Result<String, ClientError> {
        self.call(
            Request::GetStringProperty {
                property: property.to_string(),
            },
            |r| match r {
                Response::String(s) => Some(s),
                _ => None,
            },
        )
    }

    pub fn get_string_list_property(&self, property: &str) -> Result<Vec<String>, ClientError> {
        self.call(
            Request::GetStringListProperty {
                property: property.to_string(),
            },
            |r| match r {
                Response::Strings(s) => Some(s),
                _ => None,
            },
        )
    }

    pub fn describe_keyspace(&self, keyspace: &str) -> Result<BTreeMap<String, BTreeMap<String, String>>, ClientError> {
        self.call(
            Request::DescribeKeyspace {
                keyspace: keyspace.to_string(),
            },
            |r| match r {
                Response::Keyspace(k) => Some(k),
                _ => None,
            },
        )
    }
}

fn ok(response: Response) -> Option<()> {
    matches!(response, Response::Ok).then_some(())
}

fn columns(response: Response) -> Option<Vec<ColumnOrSuperColumn>> {
    match response {
        Response::Columns(c) => Some(c),
        _ => None,
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("pool", &self.pool)
            .field("servers", &self.servers())
            .finish_non_exhaustive()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}
