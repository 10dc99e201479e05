use std::sync::Arc;

use trellis_proto::{
    Column, ColumnOrSuperColumn, ColumnPath, KeySlice, Mutation, Request, Response, SlicePredicate,
    SliceRange, StoreError, SuperColumn,
};

use crate::row::{Keyspace, Row, select_range, update_row};
use crate::store::MemoryStore;

pub const CLUSTER_NAME: &str = "Trellis Fake Cluster";
pub const VERSION: &str = "0.7.0-fake";

/// Per-connection state: the bound keyspace and whether login succeeded.
pub struct Session {
    store: Arc<MemoryStore>,
    keyspace: Option<String>,
    authenticated: bool,
}

impl Session {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            keyspace: None,
            authenticated: false,
        }
    }

    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    pub fn handle(&mut self, request: Request) -> Response {
        match self.dispatch(request) {
            Ok(response) => response,
            Err(e) => Response::Error(e),
        }
    }

    fn dispatch(&mut self, request: Request) -> Result<Response, StoreError> {
        match request {
            Request::Login { auth } => {
                self.store.check_credentials(&auth)?;
                self.authenticated = true;
                Ok(Response::Ok)
            }
            Request::SetKeyspace { keyspace } => {
                if !self.store.has_keyspace(&keyspace) {
                    return Err(StoreError::InvalidRequest(format!(
                        "keyspace `{keyspace}` does not exist"
                    )));
                }
                self.keyspace = Some(keyspace);
                Ok(Response::Ok)
            }
            Request::GetStringProperty { property } => match property.as_str() {
                "cluster name" => Ok(Response::String(CLUSTER_NAME.into())),
                "version" => Ok(Response::String(VERSION.into())),
                _ => Err(StoreError::InvalidRequest(format!("unknown property `{property}`"))),
            },
            Request::GetStringListProperty { property } => match property.as_str() {
                "keyspaces" => Ok(Response::Strings(self.store.keyspace_names())),
                _ => Err(StoreError::InvalidRequest(format!("unknown property `{property}`"))),
            },
            Request::DescribeKeyspace { keyspace } => {
                Ok(Response::Keyspace(self.store.describe(&keyspace)?))
            }

            // ── Reads ───────────────────────────────────────────────

            Request::Get { key, path, .. } => self.read(|ks| {
                let row = find_row(ks, &path.column_family, &key).ok_or(StoreError::NotFound)?;
                get_path(row, &path).map(Response::Column)
            }),
            Request::GetSlice {
                key,
                parent,
                predicate,
                ..
            } => self.read(|ks| {
                let columns = find_row(ks, &parent.column_family, &key)
                    .map(|row| row.slice(parent.super_column.as_deref(), &predicate))
                    .unwrap_or_default();
                Ok(Response::Columns(columns))
            }),
            Request::MultigetSlice {
                keys,
                parent,
                predicate,
                ..
            } => self.read(|ks| {
                let rows = keys
                    .into_iter()
                    .map(|key| {
                        let columns = find_row(ks, &parent.column_family, &key)
                            .map(|row| row.slice(parent.super_column.as_deref(), &predicate))
                            .unwrap_or_default();
                        (key, columns)
                    })
                    .collect();
                Ok(Response::Rows(rows))
            }),
            Request::GetCount { key, parent, .. } => self.read(|ks| {
                let everything = SlicePredicate::Range(SliceRange::new("", "", false, usize::MAX));
                let count = find_row(ks, &parent.column_family, &key)
                    .map(|row| row.slice(parent.super_column.as_deref(), &everything).len())
                    .unwrap_or(0);
                Ok(Response::Count(count as u64))
            }),
            Request::GetRangeSlice {
                parent,
                predicate,
                start_key,
                finish_key,
                row_count,
                ..
            } => self.read(|ks| {
                let Some(rows) = ks.get(&parent.column_family) else {
                    return Ok(Response::KeySlices(Vec::new()));
                };
                let range = SliceRange::new(start_key, finish_key, false, row_count);
                let slices = select_range(rows, &range)
                    .into_iter()
                    .map(|(key, row)| KeySlice {
                        key: key.clone(),
                        columns: row.slice(parent.super_column.as_deref(), &predicate),
                    })
                    .filter(|slice| !slice.columns.is_empty())
                    .collect();
                Ok(Response::KeySlices(slices))
            }),
            Request::GetKeyRange {
                column_family,
                start,
                finish,
                count,
                ..
            } => self.read(|ks| {
                let keys = ks
                    .get(&column_family)
                    .map(|rows| {
                        select_range(rows, &SliceRange::new(start, finish, false, count))
                            .into_iter()
                            .map(|(key, _)| key.clone())
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(Response::Keys(keys))
            }),

            // ── Writes ──────────────────────────────────────────────

            Request::Insert {
                key,
                path,
                value,
                timestamp,
                ..
            } => self.write(|ks| {
                let name = path
                    .column
                    .ok_or_else(|| StoreError::InvalidRequest("insert requires a column name".into()))?;
                let column = Column::new(name, value, timestamp);
                update_row(ks, &path.column_family, &key, |row| {
                    row.put(path.super_column.as_deref(), column)
                });
                Ok(())
            }),
            Request::Remove { key, path, .. } => self.write(|ks| {
                update_row(ks, &path.column_family, &key, |row| {
                    match (path.super_column.as_deref(), path.column.as_deref()) {
                        (sc, Some(name)) => row.delete_column(sc, name),
                        (Some(sc), None) => row.delete_super(sc),
                        (None, None) => row.clear(),
                    }
                });
                Ok(())
            }),
            Request::BatchInsert { key, families, .. } => self.write(|ks| {
                for (family, items) in families {
                    update_row(ks, &family, &key, |row| {
                        for item in items {
                            put_item(row, item);
                        }
                    });
                }
                Ok(())
            }),
            Request::BatchMutate { mutations, .. } => self.write(|ks| {
                for (key, families) in mutations {
                    for (family, mutations) in families {
                        let mut failure = None;
                        update_row(ks, &family, &key, |row| {
                            for mutation in mutations {
                                if let Err(e) = apply_mutation(row, mutation) {
                                    failure = Some(e);
                                    return;
                                }
                            }
                        });
                        if let Some(e) = failure {
                            return Err(e);
                        }
                    }
                }
                Ok(())
            }),
        }
    }

    fn current_keyspace(&self) -> Result<&str, StoreError> {
        if self.store.requires_login() && !self.authenticated {
            return Err(StoreError::AuthenticationFailed("login required".into()));
        }
        self.keyspace
            .as_deref()
            .ok_or_else(|| StoreError::InvalidRequest("no keyspace has been set".into()))
    }

    fn read<F>(&self, f: F) -> Result<Response, StoreError>
    where
        F: FnOnce(&Keyspace) -> Result<Response, StoreError>,
    {
        let snapshot = self.store.snapshot(self.current_keyspace()?)?;
        f(&snapshot)
    }

    fn write<F>(&self, f: F) -> Result<Response, StoreError>
    where
        F: FnOnce(&mut Keyspace) -> Result<(), StoreError>,
    {
        self.store.update(self.current_keyspace()?, f)?;
        Ok(Response::Ok)
    }
}

fn find_row<'a>(keyspace: &'a Keyspace, family: &str, key: &str) -> Option<&'a Row> {
    keyspace.get(family).and_then(|rows| rows.get(key))
}

fn get_path(row: &Row, path: &ColumnPath) -> Result<ColumnOrSuperColumn, StoreError> {
    let found = match (&path.super_column, &path.column) {
        (None, Some(name)) => row.columns.get(name).cloned().map(ColumnOrSuperColumn::Column),
        (Some(sc), Some(name)) => row
            .super_columns
            .get(sc)
            .and_then(|columns| columns.get(name))
            .cloned()
            .map(ColumnOrSuperColumn::Column),
        (Some(sc), None) => row.super_columns.get(sc).map(|columns| {
            ColumnOrSuperColumn::SuperColumn(SuperColumn {
                name: sc.clone(),
                columns: columns.iter().map(|(_, c)| c.clone()).collect(),
            })
        }),
        (None, None) => {
            return Err(StoreError::InvalidRequest(
                "get requires a column or super column".into(),
            ));
        }
    };
    found.ok_or(StoreError::NotFound)
}

fn put_item(row: &mut Row, item: ColumnOrSuperColumn) {
    match item {
        ColumnOrSuperColumn::Column(column) => row.put(None, column),
        ColumnOrSuperColumn::SuperColumn(sc) => row.put_super(sc),
    }
}

fn apply_mutation(row: &mut Row, mutation: Mutation) -> Result<(), StoreError> {
    match mutation {
        Mutation::Insert(item) => put_item(row, item),
        Mutation::Delete(deletion) => match (deletion.super_column.as_deref(), deletion.predicate) {
            (sc, Some(SlicePredicate::ColumnNames(names))) => {
                for name in &names {
                    row.delete_column(sc, name);
                }
            }
            (_, Some(SlicePredicate::Range(_))) => {
                return Err(StoreError::InvalidRequest(
                    "range deletions are not supported".into(),
                ));
            }
            (Some(sc), None) => row.delete_super(sc),
            (None, None) => row.clear(),
        },
    }
    Ok(())
}
