//! Slice fetches over one or many rows.

use std::collections::BTreeMap;

use trellis_client::Registry;
use trellis_proto::{
    Column, ColumnOrSuperColumn, ColumnParent, ConsistencyLevel, SlicePredicate,
};

use crate::error::{Error, Result};
use crate::key::Key;

/// Plain columns out of a slice result; super columns are dropped.
pub fn unpack<I>(items: I) -> Vec<Column>
where
    I: IntoIterator<Item = ColumnOrSuperColumn>,
{
    items
        .into_iter()
        .filter_map(ColumnOrSuperColumn::into_column)
        .collect()
}

pub fn pack<I>(columns: I) -> Vec<ColumnOrSuperColumn>
where
    I: IntoIterator<Item = Column>,
{
    columns.into_iter().map(ColumnOrSuperColumn::Column).collect()
}

/// Splits `iter` into vectors of at most `size` items. A `size` of zero is
/// treated as one.
pub fn chunk_seq<I: Iterator>(iter: I, size: usize) -> ChunkSeq<I> {
    ChunkSeq {
        iter,
        size: size.max(1),
    }
}

pub struct ChunkSeq<I> {
    iter: I,
    size: usize,
}

impl<I: Iterator> Iterator for ChunkSeq<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk: Vec<I::Item> = self.iter.by_ref().take(self.size).collect();
        if chunk.is_empty() { None } else { Some(chunk) }
    }
}

/// One slice of the row at `key`; an empty row is `NoSuchRecord`.
pub fn slice_iterator(
    pools: &Registry,
    key: &Key,
    predicate: &SlicePredicate,
    consistency: ConsistencyLevel,
) -> Result<Vec<Column>> {
    key.validate()?;
    let client = pools.resolve(key.keyspace())?;
    let columns = unpack(client.get_slice(key.row_key(), &key.parent(), predicate, consistency)?);
    if columns.is_empty() {
        return Err(Error::NoSuchRecord(key.clone()));
    }
    Ok(columns)
}

/// The named columns of one row, skipping names that are absent.
pub fn sparse_get(pools: &Registry, key: &Key, names: &[&str], consistency: ConsistencyLevel) -> Result<Vec<Column>> {
    key.validate()?;
    let client = pools.resolve(key.keyspace())?;
    let items = client.get_slice(
        key.row_key(),
        &key.parent(),
        &SlicePredicate::names(names.iter().copied()),
        consistency,
    )?;
    Ok(unpack(items))
}

/// The named columns of many rows, which must share the first key's keyspace
/// and column family. Results are keyed by row key.
pub fn sparse_multiget(
    pools: &Registry,
    keys: &[Key],
    names: &[&str],
    consistency: ConsistencyLevel,
) -> Result<BTreeMap<String, Vec<Column>>> {
    let Some(first) = keys.first() else {
        return Ok(BTreeMap::new());
    };
    first.validate()?;
    let client = pools.resolve(first.keyspace())?;
    let rows: Vec<String> = keys.iter().map(|k| k.row_key().to_string()).collect();
    let fetched = client.multiget_slice(
        &rows,
        &first.parent(),
        &SlicePredicate::names(names.iter().copied()),
        consistency,
    )?;
    Ok(fetched
        .into_iter()
        .map(|(row, items)| (row, unpack(items)))
        .collect())
}

/// Row keys of `key`'s column family between `start` and `finish` inclusive.
pub fn key_range(
    pools: &Registry,
    key: &Key,
    start: &str,
    finish: &str,
    count: usize,
    consistency: ConsistencyLevel,
) -> Result<Vec<String>> {
    key.validate()?;
    let client = pools.resolve(key.keyspace())?;
    Ok(client.get_key_range(key.column_family(), start, finish, count, consistency)?)
}

/// `key_range`, as keys derived from `key`.
pub fn key_range_keys(
    pools: &Registry,
    key: &Key,
    start: &str,
    finish: &str,
    count: usize,
    consistency: ConsistencyLevel,
) -> Result<Vec<Key>> {
    Ok(key_range(pools, key, start, finish, count, consistency)?
        .into_iter()
        .map(|row| key.with_row_key(row))
        .collect())
}

/// Columns for one row, with super column contents kept apart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowColumns {
    pub columns: Vec<Column>,
    pub super_columns: BTreeMap<String, Vec<Column>>,
}

/// Result of `multiget`: keyspace -> column family -> row key -> columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultigetRows {
    keyspaces: BTreeMap<String, BTreeMap<String, BTreeMap<String, RowColumns>>>,
}

impl MultigetRows {
    /// Columns fetched for `key`, honouring its super column.
    pub fn get(&self, key: &Key) -> Option<&[Column]> {
        let row = self
            .keyspaces
            .get(key.keyspace())?
            .get(key.column_family())?
            .get(key.row_key())?;
        match key.super_column() {
            None => Some(&row.columns),
            Some(sc) => row.super_columns.get(sc).map(Vec::as_slice),
        }
    }

    pub fn column_family(&self, keyspace: &str, column_family: &str) -> Option<&BTreeMap<String, RowColumns>> {
        self.keyspaces.get(keyspace)?.get(column_family)
    }

    pub fn keyspaces(&self) -> impl Iterator<Item = &str> {
        self.keyspaces.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.keyspaces.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, BTreeMap<String, BTreeMap<String, RowColumns>>> {
        self.keyspaces
    }
}

/// Fetches every column of every row in `keys`, issuing one `multiget_slice`
/// per (keyspace, column family, super column) group. Input order is not
/// kept; look rows up with `MultigetRows::get`.
pub fn multiget(pools: &Registry, keys: &[Key], consistency: ConsistencyLevel) -> Result<MultigetRows> {
    let mut groups: BTreeMap<(&str, &str, Option<&str>), Vec<String>> = BTreeMap::new();
    for key in keys {
        key.validate()?;
        groups
            .entry((key.keyspace(), key.column_family(), key.super_column()))
            .or_default()
            .push(key.row_key().to_string());
    }

    let predicate = SlicePredicate::all();
    let mut out = MultigetRows::default();
    for ((keyspace, column_family, super_column), mut rows) in groups {
        rows.sort_unstable();
        rows.dedup();
        let client = pools.resolve(keyspace)?;
        let parent = ColumnParent {
            column_family: column_family.to_string(),
            super_column: super_column.map(str::to_string),
        };
        let fetched = client.multiget_slice(&rows, &parent, &predicate, consistency)?;

        let family = out
            .keyspaces
            .entry(keyspace.to_string())
            .or_default()
            .entry(column_family.to_string())
            .or_default();
        for (row, items) in fetched {
            let slot = family.entry(row).or_default();
            let columns = unpack(items);
            match super_column {
                None => slot.columns = columns,
                Some(sc) => {
                    slot.super_columns.insert(sc.to_string(), columns);
                }
            }
        }
    }
    Ok(out)
}
