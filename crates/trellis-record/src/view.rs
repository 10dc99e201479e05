use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;
use trellis_client::{Client, Registry};
use trellis_proto::{
    Column, ColumnOrSuperColumn, ConsistencyLevel, SlicePredicate, SliceRange,
};

use crate::clock;
use crate::error::{Error, Result};
use crate::iterators::chunk_seq;
use crate::key::Key;
use crate::record::{Index, Record, RecordSchema};
use crate::recordset::batch_load;

pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Keys pulled per grouped fetch in `LoadMode::Batch`.
pub const BATCH_CHUNK_SIZE: usize = 5000;

pub(crate) const DEFAULT_LOAD_CHUNK: usize = DEFAULT_CHUNK_SIZE;

// ── Cursor ──────────────────────────────────────────────────────

/// Lazily walks one row's columns in chunks of `chunk_size`.
///
/// Slice ranges include both bounds, so every chunk after the first asks for
/// one extra column and drops the one it starts on. A chunk shorter than
/// requested ends the walk. After an error the cursor yields nothing more.
pub struct ColumnCursor {
    client: Arc<Client>,
    key: Key,
    consistency: ConsistencyLevel,
    chunk_size: usize,
    reversed: bool,
    exclusive: bool,
    start: String,
    finish: String,
    passes: usize,
    buffer: VecDeque<Column>,
    done: bool,
}

impl ColumnCursor {
    pub fn new(client: Arc<Client>, key: Key, chunk_size: usize) -> Self {
        Self {
            client,
            key,
            consistency: ConsistencyLevel::default(),
            chunk_size: chunk_size.max(1),
            reversed: false,
            exclusive: false,
            start: String::new(),
            finish: String::new(),
            passes: 0,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    pub fn consistency(mut self, consistency: ConsistencyLevel) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn reversed(mut self, reversed: bool) -> Self {
        self.reversed = reversed;
        self
    }

    /// Begins at `start`; with `exclusive` the `start` column itself is skipped.
    pub fn start(mut self, start: impl Into<String>, exclusive: bool) -> Self {
        self.start = start.into();
        self.exclusive = exclusive;
        self
    }

    /// Stops after `finish` (inclusive).
    pub fn finish(mut self, finish: impl Into<String>) -> Self {
        self.finish = finish.into();
        self
    }

    fn fetch(&mut self) -> Result<()> {
        let fudge = self.exclusive || self.passes > 0;
        let count = self.chunk_size + usize::from(fudge);
        let predicate = SlicePredicate::Range(SliceRange::new(
            self.start.clone(),
            self.finish.clone(),
            self.reversed,
            count,
        ));
        let items = self
            .client
            .get_slice(self.key.row_key(), &self.key.parent(), &predicate, self.consistency)?;
        self.passes += 1;

        if items.len() < count {
            self.done = true;
        }
        let Some(last) = items.last().map(|item| item.name().to_string()) else {
            self.done = true;
            return Ok(());
        };

        let skip = usize::from(fudge && items[0].name() == self.start);
        self.buffer.extend(
            items
                .into_iter()
                .skip(skip)
                .filter_map(ColumnOrSuperColumn::into_column),
        );
        self.start = last;
        Ok(())
    }
}

impl Iterator for ColumnCursor {
    type Item = Result<Column>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(column) = self.buffer.pop_front() {
                return Some(Ok(column));
            }
            if self.done {
                return None;
            }
            if let Err(err) = self.fetch() {
                self.done = true;
                return Some(Err(err));
            }
        }
    }
}

// ── View ────────────────────────────────────────────────────────

/// How `View::append` names the column pointing at a record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ColumnNaming {
    /// The record's row key.
    #[default]
    RowKey,
    /// `"{value}:{row key}"`, ordering the view by one of the record's fields.
    Field(String),
}

/// How `View::records` turns keys into records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Load each record; any failure is yielded as an error.
    #[default]
    Strict,
    /// Load each record, skipping the ones that fail.
    FaultTolerant,
    /// Load records in pages of this many keys with one grouped fetch each.
    Batch(usize),
}

/// A row whose column values are row keys of other records.
#[derive(Debug, Clone)]
pub struct View {
    key: Key,
    record_key: Key,
    schema: Arc<RecordSchema>,
    chunk_size: usize,
    reversed: bool,
    start_col: Option<String>,
    exclusive: bool,
    consistency: ConsistencyLevel,
    naming: ColumnNaming,
    mode: LoadMode,
}

impl View {
    /// `key` addresses the backing row; `record_key` is the prototype every
    /// referenced record's key is derived from.
    pub fn new(key: Key, record_key: Key, schema: Arc<RecordSchema>) -> Self {
        Self {
            key,
            record_key,
            schema,
            chunk_size: DEFAULT_CHUNK_SIZE,
            reversed: false,
            start_col: None,
            exclusive: false,
            consistency: ConsistencyLevel::default(),
            naming: ColumnNaming::default(),
            mode: LoadMode::default(),
        }
    }

    pub fn fault_tolerant(self) -> Self {
        self.with_mode(LoadMode::FaultTolerant)
    }

    pub fn batch_loading(self) -> Self {
        self.with_mode(LoadMode::Batch(BATCH_CHUNK_SIZE))
    }

    pub fn with_mode(mut self, mode: LoadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_reversed(mut self, reversed: bool) -> Self {
        self.reversed = reversed;
        self
    }

    pub fn with_start(mut self, start_col: impl Into<String>, exclusive: bool) -> Self {
        self.start_col = Some(start_col.into());
        self.exclusive = exclusive;
        self
    }

    pub fn with_consistency(mut self, consistency: ConsistencyLevel) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_naming(mut self, naming: ColumnNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn record_key(&self) -> &Key {
        &self.record_key
    }

    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    /// This view over a different backing row of the same column family.
    pub fn at_row(&self, row_key: impl Into<String>) -> View {
        View {
            key: self.key.with_row_key(row_key),
            ..self.clone()
        }
    }

    /// Key of the referenced record at `row_key`.
    pub fn make_key(&self, row_key: impl Into<String>) -> Key {
        self.record_key.with_row_key(row_key)
    }

    /// Number of entries in the view.
    pub fn len(&self, pools: &Registry) -> Result<u64> {
        self.key.validate()?;
        let client = pools.resolve(self.key.keyspace())?;
        Ok(client.get_count(self.key.row_key(), &self.key.parent(), self.consistency)?)
    }

    pub fn columns(&self, pools: &Registry) -> Result<ColumnCursor> {
        let cursor = self.cursor(pools)?;
        Ok(match &self.start_col {
            Some(start) => cursor.start(start.clone(), self.exclusive),
            None => cursor,
        })
    }

    /// Columns named between `start` and `finish`, both inclusive.
    pub fn columns_between(
        &self,
        pools: &Registry,
        start: impl Into<String>,
        finish: impl Into<String>,
    ) -> Result<ColumnCursor> {
        Ok(self.cursor(pools)?.start(start, false).finish(finish))
    }

    fn cursor(&self, pools: &Registry) -> Result<ColumnCursor> {
        self.key.validate()?;
        let client = pools.resolve(self.key.keyspace())?;
        Ok(ColumnCursor::new(client, self.key.clone(), self.chunk_size)
            .consistency(self.consistency)
            .reversed(self.reversed))
    }

    pub fn keys(&self, pools: &Registry) -> Result<impl Iterator<Item = Result<Key>> + use<>> {
        let prototype = self.record_key.clone();
        Ok(self
            .columns(pools)?
            .map(move |column| column.map(|c| prototype.with_row_key(c.value))))
    }

    /// Every referenced record, loaded according to the view's `LoadMode`.
    pub fn records<'a>(&self, pools: &'a Registry) -> Result<Box<dyn Iterator<Item = Result<Record>> + 'a>> {
        let keys = self.keys(pools)?;
        let schema = Arc::clone(&self.schema);
        let records: Box<dyn Iterator<Item = Result<Record>> + 'a> = match self.mode {
            LoadMode::Strict => Box::new(keys.map(move |key| load(pools, &schema, key?))),
            LoadMode::FaultTolerant => Box::new(keys.filter_map(move |key| {
                let key = match key {
                    Ok(key) => key,
                    Err(err) => return Some(Err(err)),
                };
                match load(pools, &schema, key.clone()) {
                    Ok(record) => Some(Ok(record)),
                    Err(err) => {
                        debug!(%key, error = %err, "skipping record");
                        None
                    }
                }
            })),
            LoadMode::Batch(size) => Box::new(chunk_seq(keys, size).flat_map(move |chunk| {
                let loaded = chunk
                    .into_iter()
                    .collect::<Result<Vec<Key>>>()
                    .and_then(|keys| batch_load(pools, &schema, &keys));
                match loaded {
                    Ok(records) => records.into_iter().map(Ok).collect::<Vec<_>>(),
                    Err(err) => vec![Err(err)],
                }
            })),
        };
        Ok(records)
    }

    /// The column name `record` is stored under.
    pub fn column_name(&self, record: &Record) -> Result<String> {
        let row = record.key().ok_or(Error::MissingKey)?.row_key();
        match &self.naming {
            ColumnNaming::RowKey => Ok(row.to_string()),
            ColumnNaming::Field(field) => {
                let value = record
                    .get(field)
                    .ok_or_else(|| Error::MissingField(vec![field.clone()]))?;
                Ok(format!("{value}:{row}"))
            }
        }
    }

    pub fn append(&self, pools: &Registry, record: &Record) -> Result<()> {
        let name = self.column_name(record)?;
        let row = record.key().ok_or(Error::MissingKey)?.row_key();
        self.key.validate()?;
        let client = pools.resolve(self.key.keyspace())?;
        client.insert(
            self.key.row_key(),
            &self.key.path_for(Some(&name)),
            row,
            clock::timestamp(),
            self.consistency,
        )?;
        Ok(())
    }

    pub fn remove(&self, pools: &Registry, record: &Record) -> Result<()> {
        let name = self.column_name(record)?;
        self.key.validate()?;
        let client = pools.resolve(self.key.keyspace())?;
        client.remove(
            self.key.row_key(),
            &self.key.path_for(Some(&name)),
            clock::timestamp(),
            self.consistency,
        )?;
        Ok(())
    }
}

impl Index for View {
    fn describe(&self) -> String {
        format!("view {}", self.key)
    }

    fn append(&self, pools: &Registry, record: &Record) -> Result<()> {
        View::append(self, pools, record)
    }
}

fn load(pools: &Registry, schema: &Arc<RecordSchema>, key: Key) -> Result<Record> {
    let mut record = Record::new(Arc::clone(schema));
    record.load(pools, key)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_view(naming: ColumnNaming) -> View {
        let schema = Arc::new(RecordSchema::for_family("Keyspace1", "Users"));
        View::new(
            Key::for_row("Keyspace1", "UserViews", "all").unwrap(),
            Key::for_row("Keyspace1", "Users", "").unwrap(),
            schema,
        )
        .with_naming(naming)
    }

    fn record(row: &str, name: &str) -> Record {
        let schema = Arc::new(RecordSchema::for_family("Keyspace1", "Users"));
        let mut record = Record::with_data(schema, [("name", name)]).unwrap();
        record.set_row(row, None).unwrap();
        record
    }

    #[test]
    fn names_by_row_key() {
        let view = user_view(ColumnNaming::RowKey);
        assert_eq!(view.column_name(&record("r1", "bob")).unwrap(), "r1");
    }

    #[test]
    fn names_by_field_value() {
        let view = user_view(ColumnNaming::Field("name".into()));
        assert_eq!(view.column_name(&record("r1", "bob")).unwrap(), "bob:r1");

        let view = user_view(ColumnNaming::Field("created".into()));
        let err = view.column_name(&record("r1", "bob")).unwrap_err();
        assert!(matches!(err, Error::MissingField(ref f) if f == &["created"]));
    }

    #[test]
    fn keyless_records_cannot_be_named() {
        let view = user_view(ColumnNaming::RowKey);
        let schema = Arc::new(RecordSchema::for_family("Keyspace1", "Users"));
        assert!(matches!(view.column_name(&Record::new(schema)), Err(Error::MissingKey)));
    }

    #[test]
    fn make_key_uses_the_prototype() {
        let key = user_view(ColumnNaming::RowKey).make_key("r9");
        assert_eq!(key.column_family(), "Users");
        assert_eq!(key.row_key(), "r9");
    }
}
