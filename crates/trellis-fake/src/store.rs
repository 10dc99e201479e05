use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use arc_swap::ArcSwap;
use trellis_proto::{AuthRequest, Column, StoreError};

use crate::row::Keyspace;

/// Keyspaces of column families of rows, each keyspace swapped atomically on
/// write so readers always see a consistent snapshot.
pub struct MemoryStore {
    keyspaces: RwLock<HashMap<String, Arc<ArcSwap<Keyspace>>>>,
    write_lock: Mutex<()>,
    credentials: RwLock<Option<BTreeMap<String, String>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            keyspaces: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
            credentials: RwLock::new(None),
        }
    }

    pub fn with_keyspaces<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let store = Self::new();
        for name in names {
            store.create_keyspace(name.as_ref());
        }
        store
    }

    pub fn create_keyspace(&self, name: &str) {
        let mut keyspaces = self.keyspaces.write().unwrap_or_else(PoisonError::into_inner);
        keyspaces
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ArcSwap::new(Arc::new(Keyspace::new()))));
    }

    pub fn drop_keyspace(&self, name: &str) {
        let mut keyspaces = self.keyspaces.write().unwrap_or_else(PoisonError::into_inner);
        keyspaces.remove(name);
    }

    pub fn has_keyspace(&self, name: &str) -> bool {
        let keyspaces = self.keyspaces.read().unwrap_or_else(PoisonError::into_inner);
        keyspaces.contains_key(name)
    }

    pub fn keyspace_names(&self) -> Vec<String> {
        let keyspaces = self.keyspaces.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = keyspaces.keys().cloned().collect();
        names.sort();
        names
    }

    /// Sessions must `login` with exactly these credentials before touching data.
    pub fn require_credentials(&self, credentials: BTreeMap<String, String>) {
        *self.credentials.write().unwrap_or_else(PoisonError::into_inner) = Some(credentials);
    }

    pub(crate) fn requires_login(&self) -> bool {
        self.credentials.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub(crate) fn check_credentials(&self, auth: &AuthRequest) -> Result<(), StoreError> {
        match &*self.credentials.read().unwrap_or_else(PoisonError::into_inner) {
            Some(expected) if *expected != auth.credentials => {
                Err(StoreError::AuthenticationFailed("invalid credentials".into()))
            }
            _ => Ok(()),
        }
    }

    fn handle(&self, keyspace: &str) -> Result<Arc<ArcSwap<Keyspace>>, StoreError> {
        let keyspaces = self.keyspaces.read().unwrap_or_else(PoisonError::into_inner);
        keyspaces
            .get(keyspace)
            .cloned()
            .ok_or_else(|| StoreError::InvalidRequest(format!("keyspace `{keyspace}` does not exist")))
    }

    pub(crate) fn snapshot(&self, keyspace: &str) -> Result<Arc<Keyspace>, StoreError> {
        Ok(self.handle(keyspace)?.load_full())
    }

    /// Applies `f` to a private copy and publishes it only if `f` succeeds.
    pub(crate) fn update<F>(&self, keyspace: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Keyspace) -> Result<(), StoreError>,
    {
        let handle = self.handle(keyspace)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut data = (**handle.load()).clone();
        f(&mut data)?;
        handle.store(Arc::new(data));
        Ok(())
    }

    pub(crate) fn describe(&self, keyspace: &str) -> Result<BTreeMap<String, BTreeMap<String, String>>, StoreError> {
        let snapshot = self.snapshot(keyspace).map_err(|_| StoreError::NotFound)?;
        Ok(snapshot
            .iter()
            .map(|(name, rows)| {
                let kind = if rows.iter().any(|(_, row)| row.is_super()) {
                    "Super"
                } else {
                    "Standard"
                };
                let mut props = BTreeMap::new();
                props.insert("Type".to_string(), kind.to_string());
                (name.clone(), props)
            })
            .collect())
    }

    // ── Inspection ──────────────────────────────────────────────

    /// Standard columns of a row, in name order.
    pub fn columns(&self, keyspace: &str, column_family: &str, row: &str) -> Vec<Column> {
        self.with_row(keyspace, column_family, row, |row| {
            row.columns.iter().map(|(_, c)| c.clone()).collect()
        })
    }

    pub fn sub_columns(&self, keyspace: &str, column_family: &str, row: &str, super_column: &str) -> Vec<Column> {
        self.with_row(keyspace, column_family, row, |row| {
            row.super_columns
                .get(super_column)
                .map(|columns| columns.iter().map(|(_, c)| c.clone()).collect())
                .unwrap_or_default()
        })
    }

    pub fn row_keys(&self, keyspace: &str, column_family: &str) -> Vec<String> {
        let Ok(snapshot) = self.snapshot(keyspace) else {
            return Vec::new();
        };
        snapshot
            .get(column_family)
            .map(|rows| rows.iter().map(|(key, _)| key.clone()).collect())
            .unwrap_or_default()
    }

    fn with_row<T: Default>(
        &self,
        keyspace: &str,
        column_family: &str,
        row: &str,
        f: impl FnOnce(&crate::row::Row) -> T,
    ) -> T {
        let Ok(snapshot) = self.snapshot(keyspace) else {
            return T::default();
        };
        snapshot
            .get(column_family)
            .and_then(|rows| rows.get(row))
            .map(f)
            .unwrap_or_default()
    }
}
