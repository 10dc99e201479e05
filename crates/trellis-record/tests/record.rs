use std::sync::Arc;

use trellis_client::{PoolOptions, Registry};
use trellis_fake::{MemoryConnector, MemoryStore};
use trellis_proto::{ConsistencyLevel, Endpoint, StoreError};
use trellis_record::{
    Error, Index, Key, KeyMirror, Record, RecordSchema, Result, column,
};

const KEYSPACE: &str = "Keyspace1";

fn fixture() -> (Registry, MemoryConnector) {
    let store = Arc::new(MemoryStore::with_keyspaces([KEYSPACE, "Keyspace2"]));
    let connector = MemoryConnector::new(store);
    let registry = Registry::new(Arc::new(connector.clone()));
    registry.register(KEYSPACE, PoolOptions::new(["a:9160"])).unwrap();
    registry.register("Keyspace2", PoolOptions::new(["a:9160"])).unwrap();
    (registry, connector)
}

fn users() -> Arc<RecordSchema> {
    Arc::new(RecordSchema::for_family(KEYSPACE, "Users").with_required(["user"]))
}

fn saved(pools: &Registry, row: &str, data: &[(&str, &str)]) -> Record {
    let mut record = Record::with_data(users(), data.iter().copied()).unwrap();
    record.set_row(row, None).unwrap();
    record.save(pools).unwrap();
    record
}

#[test]
fn save_then_load() {
    let (pools, connector) = fixture();
    saved(&pools, "alice", &[("user", "alice"), ("email", "a@x")]);
    assert_eq!(connector.log().count("batch_mutate"), 1);

    let mut loaded = Record::new(users());
    loaded.load(&pools, "alice").unwrap();
    assert_eq!(loaded.get("email"), Some("a@x"));
    assert_eq!(loaded.columns(), loaded.original());
    assert!(!loaded.is_modified());
}

#[test]
fn save_writes_only_the_diff() {
    let (pools, connector) = fixture();
    let mut record = saved(&pools, "alice", &[("user", "alice"), ("email", "a@x"), ("zip", "1")]);
    record.set("email", "alice@example.com").unwrap();
    record.delete("zip");
    record.save(&pools).unwrap();
    assert!(!record.is_modified());

    let stored = connector.store().columns(KEYSPACE, "Users", "alice");
    let names: Vec<&str> = stored.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["email", "user"]);
    assert_eq!(stored[0].value, "alice@example.com");

    // Nothing pending: no further write.
    connector.log().clear();
    record.save(&pools).unwrap();
    assert_eq!(connector.log().count("batch_mutate"), 0);
}

#[test]
fn missing_required_field_blocks_save() {
    let (pools, connector) = fixture();
    let mut record = Record::new(users());
    record.set_row("bob", None).unwrap();
    record.set("email", "b@x").unwrap();
    assert!(!record.valid());
    assert_eq!(record.missing(), ["user"]);
    assert!(matches!(record.save(&pools), Err(Error::MissingField(_))));
    assert!(connector.log().records().is_empty());
}

#[test]
fn loading_an_empty_row_fails() {
    let (pools, _) = fixture();
    let mut record = Record::new(users());
    let err = record.load(&pools, "nobody").unwrap_err();
    assert!(matches!(err, Error::NoSuchRecord(ref key) if key.row_key() == "nobody"));
}

#[test]
fn failed_write_keeps_pending_changes() {
    let (pools, connector) = fixture();
    let endpoint: Endpoint = "a:9160".parse().unwrap();
    let mut record = Record::with_data(users(), [("user", "carol")]).unwrap();
    record.set_row("carol", None).unwrap();

    connector.faults().take_down(&endpoint);
    assert!(matches!(record.save(&pools), Err(Error::Client(_))));
    assert!(record.modified().contains("user"));

    connector.faults().bring_up(&endpoint);
    record.save(&pools).unwrap();
    assert!(!record.is_modified());
}

#[test]
fn compound_records_live_in_a_super_column() {
    let (pools, connector) = fixture();
    let mut record = Record::with_data(users(), [("user", "dave"), ("city", "Oslo")]).unwrap();
    record.set_key(Key::compound(KEYSPACE, "Profiles", "dave", "home").unwrap());
    record.save(&pools).unwrap();

    let stored = connector.store().sub_columns(KEYSPACE, "Profiles", "dave", "home");
    assert_eq!(stored.len(), 2);

    let mut loaded = Record::new(users());
    loaded
        .load(&pools, Key::compound(KEYSPACE, "Profiles", "dave", "home").unwrap())
        .unwrap();
    assert_eq!(loaded.get("city"), Some("Oslo"));
}

#[test]
fn remove_clears_the_row_and_the_record() {
    let (pools, connector) = fixture();
    let mut record = saved(&pools, "erin", &[("user", "erin")]);
    record.remove(&pools).unwrap();
    assert!(record.is_empty());
    assert!(record.original().is_empty());
    assert!(connector.store().columns(KEYSPACE, "Users", "erin").is_empty());
}

#[test]
fn mirrors_receive_the_same_changes() {
    let (pools, connector) = fixture();
    let schema = Arc::new(
        RecordSchema::for_family(KEYSPACE, "Users")
            .with_mirror(Arc::new(KeyMirror::to_column_family("UsersByName"))),
    );
    let mut record = Record::with_data(schema, [("user", "frank"), ("tmp", "1")]).unwrap();
    record.set_row("frank", None).unwrap();
    record.save(&pools).unwrap();

    record.delete("tmp");
    record.save(&pools).unwrap();

    let mirrored = connector.store().columns(KEYSPACE, "UsersByName", "frank");
    assert_eq!(mirrored.len(), 1);
    assert_eq!(mirrored[0].name, "user");
}

struct FailingIndex;

impl Index for FailingIndex {
    fn describe(&self) -> String {
        "failing".into()
    }

    fn append(&self, _pools: &Registry, _record: &Record) -> Result<()> {
        Err(Error::NoPartition)
    }
}

#[test]
fn propagation_failures_are_reported_after_the_save() {
    let (pools, connector) = fixture();
    let schema = Arc::new(
        RecordSchema::for_family(KEYSPACE, "Users")
            .with_index(Arc::new(FailingIndex))
            .with_mirror(Arc::new(KeyMirror::to_column_family("Copies"))),
    );
    let mut record = Record::with_data(schema, [("user", "gina")]).unwrap();
    record.set_row("gina", None).unwrap();

    match record.save(&pools) {
        Err(Error::Propagation(failures)) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].target, "failing");
        }
        other => panic!("expected propagation failure, got {other:?}"),
    }
    assert!(!record.is_modified());
    assert_eq!(connector.store().columns(KEYSPACE, "Users", "gina").len(), 1);
    // The mirror after the failing index was still written.
    assert_eq!(connector.store().columns(KEYSPACE, "Copies", "gina").len(), 1);
}

#[test]
fn store_errors_surface_through_load() {
    let (pools, connector) = fixture();
    saved(&pools, "hank", &[("user", "hank")]);
    let endpoint: Endpoint = "a:9160".parse().unwrap();
    for _ in 0..trellis_client::DEFAULT_ATTEMPTS {
        connector
            .faults()
            .respond_with_error(&endpoint, StoreError::Unavailable);
    }
    let err = Record::new(users()).load(&pools, "hank").map(|_| ()).unwrap_err();
    match err {
        Error::Client(client) => assert_eq!(client.store_error(), Some(&StoreError::Unavailable)),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn column_helpers() {
    let (pools, _) = fixture();
    let key = Key::for_row(KEYSPACE, "Settings", "global").unwrap();
    let one = ConsistencyLevel::One;
    column::set_value(&pools, &key, "theme", "dark", None, one).unwrap();
    assert_eq!(column::get_value(&pools, &key, "theme", one).unwrap(), "dark");

    column::remove_column(&pools, &key, "theme", None, one).unwrap();
    let err = column::get_value(&pools, &key, "theme", one).unwrap_err();
    assert!(matches!(err, Error::Client(ref c) if c.is_not_found()));
}
