use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Microseconds since the Unix epoch. The store keeps the newest write per column.
pub type Timestamp = i64;

/// Passed through to the store untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    Zero,
    #[default]
    One,
    Quorum,
    DcQuorum,
    DcQuorumSync,
    All,
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub value: String,
    pub timestamp: Timestamp,
}

impl Column {
    pub fn new(name: impl Into<String>, value: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperColumn {
    pub name: String,
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnOrSuperColumn {
    Column(Column),
    SuperColumn(SuperColumn),
}

impl ColumnOrSuperColumn {
    pub fn name(&self) -> &str {
        match self {
            ColumnOrSuperColumn::Column(c) => &c.name,
            ColumnOrSuperColumn::SuperColumn(s) => &s.name,
        }
    }

    pub fn as_column(&self) -> Option<&Column> {
        match self {
            ColumnOrSuperColumn::Column(c) => Some(c),
            ColumnOrSuperColumn::SuperColumn(_) => None,
        }
    }

    pub fn into_column(self) -> Option<Column> {
        match self {
            ColumnOrSuperColumn::Column(c) => Some(c),
            ColumnOrSuperColumn::SuperColumn(_) => None,
        }
    }
}

impl From<Column> for ColumnOrSuperColumn {
    fn from(column: Column) -> Self {
        ColumnOrSuperColumn::Column(column)
    }
}

impl From<SuperColumn> for ColumnOrSuperColumn {
    fn from(super_column: SuperColumn) -> Self {
        ColumnOrSuperColumn::SuperColumn(super_column)
    }
}

/// Addresses a single column, a whole super column, or a whole row when both
/// optional parts are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnPath {
    pub column_family: String,
    pub super_column: Option<String>,
    pub column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnParent {
    pub column_family: String,
    pub super_column: Option<String>,
}

/// Inclusive name range. An empty `start` or `finish` leaves that end open.
/// When `reversed`, iteration runs from `start` down towards `finish`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceRange {
    pub start: String,
    pub finish: String,
    pub reversed: bool,
    pub count: usize,
}

impl SliceRange {
    pub const FULL_COUNT: usize = 100_000;

    pub fn new(start: impl Into<String>, finish: impl Into<String>, reversed: bool, count: usize) -> Self {
        Self {
            start: start.into(),
            finish: finish.into(),
            reversed,
            count,
        }
    }

    pub fn all() -> Self {
        Self::new("", "", false, Self::FULL_COUNT)
    }
}

impl Default for SliceRange {
    fn default() -> Self {
        Self::all()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlicePredicate {
    ColumnNames(Vec<String>),
    Range(SliceRange),
}

impl SlicePredicate {
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SlicePredicate::ColumnNames(names.into_iter().map(Into::into).collect())
    }

    pub fn all() -> Self {
        SlicePredicate::Range(SliceRange::all())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deletion {
    pub timestamp: Timestamp,
    pub super_column: Option<String>,
    pub predicate: Option<SlicePredicate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    Insert(ColumnOrSuperColumn),
    Delete(Deletion),
}

/// row key -> column family -> mutations
pub type MutationMap = BTreeMap<String, BTreeMap<String, Vec<Mutation>>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySlice {
    pub key: String,
    pub columns: Vec<ColumnOrSuperColumn>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub credentials: BTreeMap<String, String>,
}

impl AuthRequest {
    pub fn new(credentials: BTreeMap<String, String>) -> Self {
        Self { credentials }
    }
}
