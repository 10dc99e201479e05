use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tracing::warn;
use trellis_client::Registry;
use trellis_proto::{
    Column, ConsistencyLevel, Deletion, Mutation, MutationMap, SlicePredicate, SuperColumn,
    Timestamp,
};

use crate::clock;
use crate::error::{Error, PropagationFailure, Result};
use crate::key::{Key, KeyOverrides};
use crate::view::{ColumnCursor, DEFAULT_LOAD_CHUNK};

/// Receives every record after it has been saved.
pub trait Index: Send + Sync {
    fn describe(&self) -> String;

    fn append(&self, pools: &Registry, record: &Record) -> Result<()>;
}

/// Keeps a copy of each saved change at a coordinate derived from the record.
pub trait Mirror: Send + Sync {
    fn describe(&self) -> String;

    fn mirror_key(&self, record: &Record) -> Result<Key>;
}

/// Mirrors to the record's own key with `overrides` applied.
#[derive(Debug, Clone, Default)]
pub struct KeyMirror {
    overrides: KeyOverrides,
}

impl KeyMirror {
    pub fn new(overrides: KeyOverrides) -> Self {
        Self { overrides }
    }

    pub fn to_column_family(column_family: impl Into<String>) -> Self {
        Self::new(KeyOverrides {
            column_family: Some(column_family.into()),
            ..KeyOverrides::default()
        })
    }
}

impl Mirror for KeyMirror {
    fn describe(&self) -> String {
        format!("key mirror {:?}", self.overrides)
    }

    fn mirror_key(&self, record: &Record) -> Result<Key> {
        record.key().ok_or(Error::MissingKey)?.derive(self.overrides.clone())
    }
}

/// What every record of one kind shares: where new keys go, which fields are
/// required, and where saves propagate.
#[derive(Clone, Default)]
pub struct RecordSchema {
    keyspace: Option<String>,
    column_family: Option<String>,
    required: Vec<String>,
    consistency: ConsistencyLevel,
    immutable: bool,
    indexes: Vec<Arc<dyn Index>>,
    mirrors: Vec<Arc<dyn Mirror>>,
}

impl RecordSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_family(keyspace: impl Into<String>, column_family: impl Into<String>) -> Self {
        Self {
            keyspace: Some(keyspace.into()),
            column_family: Some(column_family.into()),
            ..Self::default()
        }
    }

    pub fn with_required<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_consistency(mut self, consistency: ConsistencyLevel) -> Self {
        self.consistency = consistency;
        self
    }

    /// Records of this schema can be loaded but never saved or removed.
    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    pub fn with_index(mut self, index: Arc<dyn Index>) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn Mirror>) -> Self {
        self.mirrors.push(mirror);
        self
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    pub fn consistency(&self) -> ConsistencyLevel {
        self.consistency
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub fn make_key(&self, row_key: impl Into<String>) -> Result<Key> {
        match (&self.keyspace, &self.column_family) {
            (Some(keyspace), Some(column_family)) => Key::for_row(keyspace, column_family, row_key),
            _ => Err(Error::MissingKey),
        }
    }

    pub fn default_key(&self) -> Result<Key> {
        self.make_key(Key::generate_row_key())
    }
}

impl fmt::Debug for RecordSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordSchema")
            .field("keyspace", &self.keyspace)
            .field("column_family", &self.column_family)
            .field("required", &self.required)
            .field("immutable", &self.immutable)
            .field("indexes", &self.indexes.len())
            .field("mirrors", &self.mirrors.len())
            .finish()
    }
}

/// A full key, or a bare row key placed using the record's schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordId {
    Key(Key),
    Row(String),
}

impl From<Key> for RecordId {
    fn from(key: Key) -> Self {
        RecordId::Key(key)
    }
}

impl From<&Key> for RecordId {
    fn from(key: &Key) -> Self {
        RecordId::Key(key.clone())
    }
}

impl From<String> for RecordId {
    fn from(row: String) -> Self {
        RecordId::Row(row)
    }
}

impl From<&str> for RecordId {
    fn from(row: &str) -> Self {
        RecordId::Row(row.to_string())
    }
}

#[derive(Debug, Default)]
struct Changes {
    inserts: Vec<Column>,
    deletes: Vec<String>,
}

impl Changes {
    fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty()
    }
}

/// One row as a map of column name to value, with change tracking.
///
/// `original` is the last loaded or saved state. `modified` and `deleted`
/// name the columns that differ from it and never overlap; `save` writes
/// exactly those.
#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<RecordSchema>,
    key: Option<Key>,
    original: BTreeMap<String, Column>,
    columns: BTreeMap<String, Column>,
    modified: BTreeSet<String>,
    deleted: BTreeSet<String>,
}

impl Record {
    pub fn new(schema: Arc<RecordSchema>) -> Self {
        Self {
            schema,
            key: None,
            original: BTreeMap::new(),
            columns: BTreeMap::new(),
            modified: BTreeSet::new(),
            deleted: BTreeSet::new(),
        }
    }

    pub fn with_data<I, K, V>(schema: Arc<RecordSchema>, data: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut record = Self::new(schema);
        record.update(data)?;
        Ok(record)
    }

    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    pub fn timestamp() -> Timestamp {
        clock::timestamp()
    }

    // ── Key ─────────────────────────────────────────────────────

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn set_key(&mut self, key: Key) {
        self.key = Some(key);
    }

    /// Places the record at `row_key` (and optionally a super column) inside
    /// the schema's column family.
    pub fn set_row(&mut self, row_key: impl Into<String>, super_column: Option<String>) -> Result<()> {
        let key = self.schema.make_key(row_key)?.with_super_column(super_column);
        self.key = Some(key);
        Ok(())
    }

    pub fn make_key(&self, row_key: impl Into<String>) -> Result<Key> {
        self.schema.make_key(row_key)
    }

    pub fn default_key(&self) -> Result<Key> {
        self.schema.default_key()
    }

    // ── Columns ─────────────────────────────────────────────────

    pub fn get(&self, name: &str) -> Option<&str> {
        self.columns.get(name).map(|c| c.value.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(|(name, column)| (name.as_str(), column.value.as_str()))
    }

    pub fn columns(&self) -> &BTreeMap<String, Column> {
        &self.columns
    }

    pub fn original(&self) -> &BTreeMap<String, Column> {
        &self.original
    }

    pub fn modified(&self) -> &BTreeSet<String> {
        &self.modified
    }

    pub fn deleted(&self) -> &BTreeSet<String> {
        &self.deleted
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let name = name.into();
        let value = value.into();
        if value.is_empty() {
            return Err(Error::InvalidValue(name));
        }
        self.deleted.remove(&name);
        match self.original.get(&name) {
            Some(original) if original.value == value => {
                self.columns.insert(name.clone(), original.clone());
                self.modified.remove(&name);
            }
            _ => {
                let column = Column::new(name.clone(), value, clock::timestamp());
                self.columns.insert(name.clone(), column);
                self.modified.insert(name);
            }
        }
        Ok(())
    }

    /// Applies each pair with `set`, stopping at the first invalid value.
    pub fn update<I, K, V>(&mut self, data: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in data {
            self.set(name, value)?;
        }
        Ok(())
    }

    pub fn delete(&mut self, name: &str) {
        self.columns.remove(name);
        self.modified.remove(name);
        if self.original.contains_key(name) {
            self.deleted.insert(name.to_string());
        }
    }

    pub fn is_modified(&self) -> bool {
        !self.modified.is_empty() || !self.deleted.is_empty()
    }

    pub fn revert(&mut self) {
        self.columns = self.original.clone();
        self.modified.clear();
        self.deleted.clear();
    }

    pub fn missing(&self) -> Vec<String> {
        self.schema
            .required
            .iter()
            .filter(|name| self.get(name).is_none_or(str::is_empty))
            .cloned()
            .collect()
    }

    pub fn valid(&self) -> bool {
        self.missing().is_empty()
    }

    // ── Persistence ─────────────────────────────────────────────

    /// Replaces the record's state with already-fetched columns.
    pub fn inject<I>(&mut self, key: Key, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = Column>,
    {
        self.key = Some(key);
        self.original = columns.into_iter().map(|c| (c.name.clone(), c)).collect();
        self.columns = self.original.clone();
        self.modified.clear();
        self.deleted.clear();
        self
    }

    pub fn load(&mut self, pools: &Registry, id: impl Into<RecordId>) -> Result<&mut Self> {
        let key = match id.into() {
            RecordId::Key(key) => key,
            RecordId::Row(row) => self.make_key(row)?,
        };
        key.validate()?;
        let client = pools.resolve(key.keyspace())?;
        let columns = ColumnCursor::new(client, key.clone(), DEFAULT_LOAD_CHUNK)
            .consistency(self.schema.consistency)
            .collect::<Result<Vec<_>>>()?;
        if columns.is_empty() {
            return Err(Error::NoSuchRecord(key));
        }
        Ok(self.inject(key, columns))
    }

    /// Writes the pending diff in one batch, then updates indexes and mirrors.
    ///
    /// A failed primary write leaves the pending changes in place. Index and
    /// mirror failures do not undo the save; they are collected into
    /// `Error::Propagation` after every target has been tried.
    pub fn save(&mut self, pools: &Registry) -> Result<&mut Self> {
        if self.schema.immutable {
            return Err(Error::Immutable);
        }
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(Error::MissingField(missing));
        }
        let key = self.key.clone().ok_or(Error::MissingKey)?;
        key.validate()?;

        let changes = self.changes();
        write_changes(pools, &key, &changes, self.schema.consistency)?;

        self.original = self.columns.clone();
        self.modified.clear();
        self.deleted.clear();

        let failures = self.propagate(pools, &changes);
        if failures.is_empty() {
            Ok(self)
        } else {
            Err(Error::Propagation(failures))
        }
    }

    /// Deletes the whole row (or super column) and empties the record.
    pub fn remove(&mut self, pools: &Registry) -> Result<&mut Self> {
        if self.schema.immutable {
            return Err(Error::Immutable);
        }
        let key = self.key.as_ref().ok_or(Error::MissingKey)?;
        Self::remove_key(pools, key, self.schema.consistency)?;
        self.original.clear();
        self.columns.clear();
        self.modified.clear();
        self.deleted.clear();
        Ok(self)
    }

    pub fn remove_key(pools: &Registry, key: &Key, consistency: ConsistencyLevel) -> Result<()> {
        key.validate()?;
        let client = pools.resolve(key.keyspace())?;
        client.remove(key.row_key(), &key.path_for(None), clock::timestamp(), consistency)?;
        Ok(())
    }

    fn changes(&self) -> Changes {
        Changes {
            inserts: self
                .modified
                .iter()
                .filter_map(|name| self.columns.get(name).cloned())
                .collect(),
            deletes: self.deleted.iter().cloned().collect(),
        }
    }

    fn propagate(&self, pools: &Registry, changes: &Changes) -> Vec<PropagationFailure> {
        let mut failures = Vec::new();
        for index in &self.schema.indexes {
            if let Err(error) = index.append(pools, self) {
                let target = index.describe();
                warn!(index = %target, %error, "index append failed");
                failures.push(PropagationFailure { target, error });
            }
        }
        for mirror in &self.schema.mirrors {
            let result = mirror
                .mirror_key(self)
                .and_then(|key| write_changes(pools, &key, changes, self.schema.consistency));
            if let Err(error) = result {
                let target = mirror.describe();
                warn!(mirror = %target, %error, "mirror write failed");
                failures.push(PropagationFailure { target, error });
            }
        }
        failures
    }
}

fn batch(key: &Key, changes: &Changes, timestamp: Timestamp) -> MutationMap {
    let mut mutations = Vec::new();
    if !changes.inserts.is_empty() {
        match key.super_column() {
            Some(sc) => mutations.push(Mutation::Insert(
                SuperColumn {
                    name: sc.to_string(),
                    columns: changes.inserts.clone(),
                }
                .into(),
            )),
            None => mutations.extend(
                changes
                    .inserts
                    .iter()
                    .cloned()
                    .map(|column| Mutation::Insert(column.into())),
            ),
        }
    }
    if !changes.deletes.is_empty() {
        mutations.push(Mutation::Delete(Deletion {
            timestamp,
            super_column: key.super_column().map(str::to_string),
            predicate: Some(SlicePredicate::ColumnNames(changes.deletes.clone())),
        }));
    }

    let mut map = MutationMap::new();
    map.entry(key.row_key().to_string())
        .or_default()
        .insert(key.column_family().to_string(), mutations);
    map
}

fn write_changes(pools: &Registry, key: &Key, changes: &Changes, consistency: ConsistencyLevel) -> Result<()> {
    if changes.is_empty() {
        return Ok(());
    }
    let client = pools.resolve(key.keyspace())?;
    client.batch_mutate(batch(key, changes, clock::timestamp()), consistency)?;
    Ok(())
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.columns == other.columns
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Arc<RecordSchema> {
        Arc::new(RecordSchema::for_family("Keyspace1", "Users").with_required(["user"]))
    }

    fn loaded() -> Record {
        let mut record = Record::new(schema());
        let key = record.make_key("alice").unwrap();
        record.inject(
            key,
            [Column::new("user", "alice", 10), Column::new("email", "a@x", 10)],
        );
        record
    }

    #[test]
    fn set_tracks_modifications() {
        let mut record = loaded();
        record.set("email", "alice@example.com").unwrap();
        assert!(record.modified().contains("email"));
        assert_eq!(record.get("email"), Some("alice@example.com"));
        assert!(record.is_modified());
    }

    #[test]
    fn setting_the_original_value_restores_it() {
        let mut record = loaded();
        record.set("email", "changed").unwrap();
        record.set("email", "a@x").unwrap();
        assert!(!record.is_modified());
        assert_eq!(record.column("email").unwrap().timestamp, 10);

        record.set("user", "alice").unwrap();
        assert!(!record.modified().contains("user"));
    }

    #[test]
    fn empty_values_are_rejected() {
        let mut record = loaded();
        let err = record.set("email", "").unwrap_err();
        assert!(matches!(err, Error::InvalidValue(ref name) if name == "email"));
        assert_eq!(record.get("email"), Some("a@x"));
    }

    #[test]
    fn delete_and_set_never_overlap() {
        let mut record = loaded();
        record.set("email", "new").unwrap();
        record.delete("email");
        assert!(record.deleted().contains("email"));
        assert!(!record.modified().contains("email"));
        assert!(!record.contains("email"));

        record.set("email", "newer").unwrap();
        assert!(!record.deleted().contains("email"));
        assert!(record.modified().contains("email"));
    }

    #[test]
    fn deleting_an_unknown_column_is_a_no_op() {
        let mut record = loaded();
        record.delete("nope");
        assert!(record.deleted().is_empty());

        // A column only added since load was never stored.
        record.set("fresh", "1").unwrap();
        record.delete("fresh");
        assert!(record.deleted().is_empty());
        assert!(record.modified().is_empty());
    }

    #[test]
    fn revert_restores_original() {
        let mut record = loaded();
        record.set("email", "x").unwrap();
        record.set("extra", "y").unwrap();
        record.delete("user");
        record.revert();
        assert_eq!(record.columns(), record.original());
        assert!(!record.is_modified());
    }

    #[test]
    fn required_fields() {
        let mut record = Record::new(schema());
        assert!(!record.valid());
        assert_eq!(record.missing(), ["user"]);
        record.set("user", "bob").unwrap();
        assert!(record.valid());
    }

    #[test]
    fn save_checks_before_touching_the_store() {
        let pools = Registry::tcp();

        let mut invalid = Record::new(schema());
        let err = invalid.save(&pools).unwrap_err();
        assert!(matches!(err, Error::MissingField(ref f) if f == &["user"]));

        let mut keyless = Record::with_data(schema(), [("user", "bob")]).unwrap();
        assert!(matches!(keyless.save(&pools).unwrap_err(), Error::MissingKey));

        let frozen = Arc::new(RecordSchema::for_family("Keyspace1", "Users").immutable());
        let mut record = Record::new(frozen);
        assert!(matches!(record.save(&pools).unwrap_err(), Error::Immutable));
        assert!(matches!(record.remove(&pools).unwrap_err(), Error::Immutable));
    }

    #[test]
    fn schema_without_family_cannot_make_keys() {
        let record = Record::new(Arc::new(RecordSchema::new()));
        assert!(matches!(record.default_key(), Err(Error::MissingKey)));
    }

    #[test]
    fn batch_carries_inserts_and_one_deletion() {
        let mut record = loaded();
        record.set("email", "new").unwrap();
        record.set("zip", "12345").unwrap();
        record.delete("user");

        let key = record.key().unwrap().clone();
        let map = batch(&key, &record.changes(), 99);
        let mutations = &map["alice"]["Users"];
        assert_eq!(mutations.len(), 3);
        let inserted: Vec<&str> = mutations
            .iter()
            .filter_map(|m| match m {
                Mutation::Insert(c) => Some(c.name()),
                _ => None,
            })
            .collect();
        assert_eq!(inserted, ["email", "zip"]);
        assert_eq!(
            mutations[2],
            Mutation::Delete(Deletion {
                timestamp: 99,
                super_column: None,
                predicate: Some(SlicePredicate::names(["user"])),
            })
        );
    }

    #[test]
    fn compound_key_batches_into_one_super_column() {
        let mut record = Record::new(schema());
        record.set_row("alice", Some("profile".into())).unwrap();
        record.update([("a", "1"), ("b", "2")]).unwrap();
        let key = record.key().unwrap().clone();
        let map = batch(&key, &record.changes(), 1);
        let mutations = &map["alice"]["Users"];
        assert_eq!(mutations.len(), 1);
        match &mutations[0] {
            Mutation::Insert(trellis_proto::ColumnOrSuperColumn::SuperColumn(sc)) => {
                assert_eq!(sc.name, "profile");
                assert_eq!(sc.columns.len(), 2);
            }
            other => panic!("unexpected mutation {other:?}"),
        }
    }

    #[test]
    fn display_is_dict_like() {
        let record = loaded();
        assert_eq!(record.to_string(), r#"{"email": "a@x", "user": "alice"}"#);
    }
}
