//! Single-column reads and writes addressed by `Key`.

use trellis_client::Registry;
use trellis_proto::{Column, ConsistencyLevel, Timestamp};

use crate::clock;
use crate::error::{Error, Result};
use crate::key::Key;

pub fn get_column(pools: &Registry, key: &Key, name: &str, consistency: ConsistencyLevel) -> Result<Column> {
    key.validate()?;
    let client = pools.resolve(key.keyspace())?;
    client
        .get(key.row_key(), &key.path_for(Some(name)), consistency)?
        .into_column()
        .ok_or_else(|| Error::NoSuchRecord(key.clone()))
}

pub fn get_value(pools: &Registry, key: &Key, name: &str, consistency: ConsistencyLevel) -> Result<String> {
    Ok(get_column(pools, key, name, consistency)?.value)
}

pub fn set_column(pools: &Registry, key: &Key, column: &Column, consistency: ConsistencyLevel) -> Result<()> {
    key.validate()?;
    let client = pools.resolve(key.keyspace())?;
    client.insert(
        key.row_key(),
        &key.path_for(Some(&column.name)),
        &column.value,
        column.timestamp,
        consistency,
    )?;
    Ok(())
}

/// Writes `value` stamped with `timestamp`, or the current clock.
pub fn set_value(
    pools: &Registry,
    key: &Key,
    name: &str,
    value: &str,
    timestamp: Option<Timestamp>,
    consistency: ConsistencyLevel,
) -> Result<()> {
    let column = Column::new(name, value, timestamp.unwrap_or_else(clock::timestamp));
    set_column(pools, key, &column, consistency)
}

pub fn remove_column(
    pools: &Registry,
    key: &Key,
    name: &str,
    timestamp: Option<Timestamp>,
    consistency: ConsistencyLevel,
) -> Result<()> {
    key.validate()?;
    let client = pools.resolve(key.keyspace())?;
    client.remove(
        key.row_key(),
        &key.path_for(Some(name)),
        timestamp.unwrap_or_else(clock::timestamp),
        consistency,
    )?;
    Ok(())
}
