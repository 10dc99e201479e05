use std::collections::{BTreeMap, HashMap};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use trellis_client::Registry;

use crate::error::{Error, Result};
use crate::iterators::multiget;
use crate::key::Key;
use crate::record::{Record, RecordSchema};

const NO_KEY: &str = "<no key>";

pub fn valid<'a>(records: impl IntoIterator<Item = &'a Record>) -> bool {
    records.into_iter().all(Record::valid)
}

/// Row key (or `<no key>`) to missing required fields, for invalid records only.
pub fn missing<'a>(records: impl IntoIterator<Item = &'a Record>) -> BTreeMap<String, Vec<String>> {
    records
        .into_iter()
        .filter_map(|record| {
            let fields = record.missing();
            if fields.is_empty() {
                return None;
            }
            let row = record.key().map_or(NO_KEY, Key::row_key);
            Some((row.to_string(), fields))
        })
        .collect()
}

pub fn modified<'a>(records: impl IntoIterator<Item = &'a Record>) -> Vec<&'a Record> {
    records.into_iter().filter(|r| r.is_modified()).collect()
}

/// Records keyed by row key, kept in insertion order.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    order: Vec<String>,
    records: HashMap<String, Record>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Result<Self> {
        let mut set = Self::new();
        for record in records {
            set.append(record)?;
        }
        Ok(set)
    }

    /// Adds `record` under its row key, replacing any record already there.
    pub fn append(&mut self, record: Record) -> Result<()> {
        let row = record.key().ok_or(Error::MissingKey)?.row_key().to_string();
        if self.records.insert(row.clone(), record).is_none() {
            self.order.push(row);
        }
        Ok(())
    }

    pub fn get(&self, row_key: &str) -> Option<&Record> {
        self.records.get(row_key)
    }

    pub fn get_mut(&mut self, row_key: &str) -> Option<&mut Record> {
        self.records.get_mut(row_key)
    }

    pub fn contains(&self, row_key: &str) -> bool {
        self.records.contains_key(row_key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Record> {
        self.order.iter().filter_map(|row| self.records.get(row))
    }

    pub fn valid(&self) -> bool {
        valid(self.values())
    }

    pub fn missing(&self) -> BTreeMap<String, Vec<String>> {
        missing(self.values())
    }

    /// Saves every modified record, or none of them if any record is invalid.
    pub fn save(&mut self, pools: &Registry) -> Result<()> {
        let invalid = self.missing();
        if !invalid.is_empty() {
            return Err(Error::InvalidRecords(invalid));
        }
        for row in &self.order {
            match self.records.get_mut(row) {
                Some(record) if record.is_modified() => {
                    record.save(pools)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Loads `keys` with one grouped fetch, in the order given. Keys whose rows
/// are empty are left out.
pub fn batch_load(pools: &Registry, schema: &Arc<RecordSchema>, keys: &[Key]) -> Result<Vec<Record>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let rows = multiget(pools, keys, schema.consistency())?;
    Ok(keys
        .iter()
        .filter_map(|key| {
            let columns = rows.get(key).filter(|columns| !columns.is_empty())?;
            let mut record = Record::new(Arc::clone(schema));
            record.inject(key.clone(), columns.iter().cloned());
            Some(record)
        })
        .collect())
}

/// A `RecordSet` filled from a list of keys.
#[derive(Debug, Clone, Default)]
pub struct KeyRecordSet {
    set: RecordSet,
}

impl KeyRecordSet {
    pub fn load(pools: &Registry, keys: &[Key], schema: &Arc<RecordSchema>) -> Result<Self> {
        let set = RecordSet::from_records(batch_load(pools, schema, keys)?)?;
        Ok(Self { set })
    }

    pub fn into_inner(self) -> RecordSet {
        self.set
    }
}

impl Deref for KeyRecordSet {
    type Target = RecordSet;

    fn deref(&self) -> &RecordSet {
        &self.set
    }
}

impl DerefMut for KeyRecordSet {
    fn deref_mut(&mut self) -> &mut RecordSet {
        &mut self.set
    }
}
