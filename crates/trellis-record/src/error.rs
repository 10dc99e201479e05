use std::collections::BTreeMap;

use trellis_client::ClientError;

use crate::key::Key;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("incomplete key: {0}")]
    IncompleteKey(&'static str),
    #[error("record has no key")]
    MissingKey,
    #[error("missing required field(s): {}", .0.join(", "))]
    MissingField(Vec<String>),
    #[error("{} record(s) missing required fields", .0.len())]
    InvalidRecords(BTreeMap<String, Vec<String>>),
    #[error("invalid value for column `{0}`")]
    InvalidValue(String),
    #[error("record is immutable")]
    Immutable,
    #[error("no record at {0}")]
    NoSuchRecord(Key),
    #[error("no partition available")]
    NoPartition,
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("{} of the record's indexes or mirrors failed", .0.len())]
    Propagation(Vec<PropagationFailure>),
}

/// One index or mirror that could not be updated after a successful save.
#[derive(Debug)]
pub struct PropagationFailure {
    pub target: String,
    pub error: Error,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
