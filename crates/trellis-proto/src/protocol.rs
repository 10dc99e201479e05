use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{
    AuthRequest, ColumnOrSuperColumn, ColumnParent, ColumnPath, ConsistencyLevel, KeySlice,
    MutationMap, SlicePredicate, Timestamp,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    Login {
        auth: AuthRequest,
    },
    SetKeyspace {
        keyspace: String,
    },
    Get {
        key: String,
        path: ColumnPath,
        consistency: ConsistencyLevel,
    },
    GetSlice {
        key: String,
        parent: ColumnParent,
        predicate: SlicePredicate,
        consistency: ConsistencyLevel,
    },
    MultigetSlice {
        keys: Vec<String>,
        parent: ColumnParent,
        predicate: SlicePredicate,
        consistency: ConsistencyLevel,
    },
    GetCount {
        key: String,
        parent: ColumnParent,
        consistency: ConsistencyLevel,
    },
    GetRangeSlice {
        parent: ColumnParent,
        predicate: SlicePredicate,
        start_key: String,
        finish_key: String,
        row_count: usize,
        consistency: ConsistencyLevel,
    },
    GetKeyRange {
        column_family: String,
        start: String,
        finish: String,
        count: usize,
        consistency: ConsistencyLevel,
    },
    Insert {
        key: String,
        path: ColumnPath,
        value: String,
        timestamp: Timestamp,
        consistency: ConsistencyLevel,
    },
    Remove {
        key: String,
        path: ColumnPath,
        timestamp: Timestamp,
        consistency: ConsistencyLevel,
    },
    BatchInsert {
        key: String,
        families: BTreeMap<String, Vec<ColumnOrSuperColumn>>,
        consistency: ConsistencyLevel,
    },
    BatchMutate {
        mutations: MutationMap,
        consistency: ConsistencyLevel,
    },
    GetStringProperty {
        property: String,
    },
    GetStringListProperty {
        property: String,
    },
    DescribeKeyspace {
        keyspace: String,
    },
}

impl Request {
    /// The store method name, used in logs and call traces.
    pub fn method(&self) -> &'static str {
        match self {
            Request::Login { .. } => "login",
            Request::SetKeyspace { .. } => "set_keyspace",
            Request::Get { .. } => "get",
            Request::GetSlice { .. } => "get_slice",
            Request::MultigetSlice { .. } => "multiget_slice",
            Request::GetCount { .. } => "get_count",
            Request::GetRangeSlice { .. } => "get_range_slice",
            Request::GetKeyRange { .. } => "get_key_range",
            Request::Insert { .. } => "insert",
            Request::Remove { .. } => "remove",
            Request::BatchInsert { .. } => "batch_insert",
            Request::BatchMutate { .. } => "batch_mutate",
            Request::GetStringProperty { .. } => "get_string_property",
            Request::GetStringListProperty { .. } => "get_string_list_property",
            Request::DescribeKeyspace { .. } => "describe_keyspace",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Column(ColumnOrSuperColumn),
    Columns(Vec<ColumnOrSuperColumn>),
    Rows(BTreeMap<String, Vec<ColumnOrSuperColumn>>),
    Count(u64),
    KeySlices(Vec<KeySlice>),
    Keys(Vec<String>),
    String(String),
    Strings(Vec<String>),
    Keyspace(BTreeMap<String, BTreeMap<String, String>>),
    Error(StoreError),
}
