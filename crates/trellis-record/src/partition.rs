use std::fmt;
use std::iter;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use trellis_client::Registry;

use crate::error::{Error, Result};
use crate::key::Key;
use crate::record::{Index, Record};
use crate::view::View;

/// Names the backing rows of a partitioned view.
pub trait Partitioner: Send + Sync {
    /// Partition row keys in iteration order.
    fn partition_keys(&self) -> Box<dyn Iterator<Item = String> + '_>;

    /// Partition a new record is appended to. Defaults to the first key.
    fn partition_for(&self, _record: &Record) -> Option<String> {
        self.partition_keys().next()
    }
}

/// A fixed list of partitions.
#[derive(Debug, Clone, Default)]
pub struct StaticPartitions(pub Vec<String>);

impl Partitioner for StaticPartitions {
    fn partition_keys(&self) -> Box<dyn Iterator<Item = String> + '_> {
        Box::new(self.0.iter().cloned())
    }
}

/// One partition per day, `YYYYMMDD`, from `start` back to 1900-01-01.
#[derive(Debug, Clone, Copy)]
pub struct DailyPartitions {
    start: NaiveDate,
}

impl DailyPartitions {
    pub fn new(start: NaiveDate) -> Self {
        Self { start }
    }

    pub fn today() -> Self {
        Self::new(Utc::now().date_naive())
    }

    pub fn key_for(date: NaiveDate) -> String {
        date.format("%Y%m%d").to_string()
    }
}

impl Partitioner for DailyPartitions {
    fn partition_keys(&self) -> Box<dyn Iterator<Item = String> + '_> {
        let floor = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN);
        Box::new(
            iter::successors(Some(self.start), NaiveDate::pred_opt)
                .take_while(move |day| *day >= floor)
                .map(Self::key_for),
        )
    }
}

/// Several views of one column family read back to back, one backing row
/// per partition.
pub struct PartitionedView {
    template: View,
    partitioner: Arc<dyn Partitioner>,
}

impl PartitionedView {
    /// `template` supplies everything but the backing row key.
    pub fn new(template: View, partitioner: impl Partitioner + 'static) -> Self {
        Self {
            template,
            partitioner: Arc::new(partitioner),
        }
    }

    pub fn partitions(&self) -> impl Iterator<Item = String> + '_ {
        self.partitioner.partition_keys()
    }

    pub fn view_for(&self, partition: &str) -> View {
        self.template.at_row(partition)
    }

    /// Total entries across every partition.
    pub fn len(&self, pools: &Registry) -> Result<u64> {
        self.partitions().map(|p| self.view_for(&p).len(pools)).sum()
    }

    pub fn keys<'a>(&'a self, pools: &'a Registry) -> impl Iterator<Item = Result<Key>> + 'a {
        self.partitions().flat_map(move |p| {
            let keys: Box<dyn Iterator<Item = Result<Key>>> = match self.view_for(&p).keys(pools) {
                Ok(keys) => Box::new(keys),
                Err(err) => Box::new(iter::once(Err(err))),
            };
            keys
        })
    }

    pub fn records<'a>(&'a self, pools: &'a Registry) -> impl Iterator<Item = Result<Record>> + 'a {
        self.partitions().flat_map(move |p| {
            let records: Box<dyn Iterator<Item = Result<Record>> + 'a> = match self.view_for(&p).records(pools) {
                Ok(records) => records,
                Err(err) => Box::new(iter::once(Err(err))),
            };
            records
        })
    }

    fn target(&self, record: &Record) -> Result<View> {
        let partition = self
            .partitioner
            .partition_for(record)
            .ok_or(Error::NoPartition)?;
        Ok(self.view_for(&partition))
    }

    pub fn append(&self, pools: &Registry, record: &Record) -> Result<()> {
        self.target(record)?.append(pools, record)
    }

    pub fn remove(&self, pools: &Registry, record: &Record) -> Result<()> {
        self.target(record)?.remove(pools, record)
    }
}

impl Index for PartitionedView {
    fn describe(&self) -> String {
        format!("partitioned view {}", self.template.key().column_family())
    }

    fn append(&self, pools: &Registry, record: &Record) -> Result<()> {
        PartitionedView::append(self, pools, record)
    }
}

impl fmt::Debug for PartitionedView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionedView")
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}
