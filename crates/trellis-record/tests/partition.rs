use std::sync::Arc;

use chrono::NaiveDate;
use trellis_client::{PoolOptions, Registry};
use trellis_fake::{MemoryConnector, MemoryStore};
use trellis_record::{
    DailyPartitions, Error, Key, PartitionedView, Partitioner, Record, RecordSchema,
    StaticPartitions, View,
};

const KEYSPACE: &str = "Keyspace1";

fn fixture() -> (Registry, MemoryConnector) {
    let store = Arc::new(MemoryStore::with_keyspaces([KEYSPACE]));
    let connector = MemoryConnector::new(store);
    let registry = Registry::new(Arc::new(connector.clone()));
    registry.register(KEYSPACE, PoolOptions::new(["a:9160"])).unwrap();
    (registry, connector)
}

fn schema() -> Arc<RecordSchema> {
    Arc::new(RecordSchema::for_family(KEYSPACE, "Events"))
}

fn template() -> View {
    View::new(
        Key::for_row(KEYSPACE, "EventsByDay", "template").unwrap(),
        Key::for_row(KEYSPACE, "Events", "").unwrap(),
        schema(),
    )
}

fn event(pools: &Registry, row: &str) -> Record {
    let mut record = Record::with_data(schema(), [("kind", "click")]).unwrap();
    record.set_row(row, None).unwrap();
    record.save(pools).unwrap();
    record
}

/// Routes each record by the first character of its row key.
struct ByInitial;

impl Partitioner for ByInitial {
    fn partition_keys(&self) -> Box<dyn Iterator<Item = String> + '_> {
        Box::new(["a", "b"].into_iter().map(String::from))
    }

    fn partition_for(&self, record: &Record) -> Option<String> {
        let row = record.key()?.row_key();
        row.get(..1).map(str::to_string)
    }
}

#[test]
fn appends_go_to_the_first_partition() {
    let (pools, connector) = fixture();
    let view = PartitionedView::new(template(), StaticPartitions(vec!["p1".into(), "p2".into()]));
    view.append(&pools, &event(&pools, "e1")).unwrap();

    assert_eq!(connector.store().columns(KEYSPACE, "EventsByDay", "p1").len(), 1);
    assert!(connector.store().columns(KEYSPACE, "EventsByDay", "p2").is_empty());
}

#[test]
fn iteration_concatenates_partitions_in_order() {
    let (pools, _) = fixture();
    let view = PartitionedView::new(template(), ByInitial);
    for row in ["b2", "a1", "b1", "a2"] {
        view.append(&pools, &event(&pools, row)).unwrap();
    }

    let rows: Vec<String> = view
        .records(&pools)
        .map(|r| r.unwrap().key().unwrap().row_key().to_string())
        .collect();
    assert_eq!(rows, ["a1", "a2", "b1", "b2"]);
    assert_eq!(view.len(&pools).unwrap(), 4);
    assert_eq!(view.keys(&pools).count(), 4);
}

#[test]
fn no_partition_is_an_error() {
    let (pools, _) = fixture();
    let view = PartitionedView::new(template(), StaticPartitions::default());
    let err = view.append(&pools, &event(&pools, "e1")).unwrap_err();
    assert!(matches!(err, Error::NoPartition));
}

#[test]
fn daily_partitions_read_recent_days_first() {
    let (pools, connector) = fixture();
    let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    let view = PartitionedView::new(template(), DailyPartitions::new(start));
    view.append(&pools, &event(&pools, "new")).unwrap();
    view.view_for("20240101")
        .append(&pools, &event(&pools, "old"))
        .unwrap();

    assert_eq!(connector.store().columns(KEYSPACE, "EventsByDay", "20240102").len(), 1);
    let rows: Vec<String> = view
        .records(&pools)
        .take(2)
        .map(|r| r.unwrap().key().unwrap().row_key().to_string())
        .collect();
    assert_eq!(rows, ["new", "old"]);
}
