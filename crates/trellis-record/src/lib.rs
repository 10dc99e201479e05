//! Records, views and keys on top of the pooled store client.

pub mod clock;
pub mod column;
mod error;
pub mod iterators;
mod key;
mod partition;
mod record;
mod recordset;
mod view;

pub use error::{Error, PropagationFailure, Result};
pub use iterators::{MultigetRows, RowColumns};
pub use key::{Key, KeyOverrides};
pub use partition::{DailyPartitions, PartitionedView, Partitioner, StaticPartitions};
pub use record::{Index, KeyMirror, Mirror, Record, RecordId, RecordSchema};
pub use recordset::{KeyRecordSet, RecordSet, batch_load, missing, modified, valid};
pub use view::{BATCH_CHUNK_SIZE, ColumnCursor, ColumnNaming, DEFAULT_CHUNK_SIZE, LoadMode, View};
