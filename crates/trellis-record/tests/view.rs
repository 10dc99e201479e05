use std::collections::BTreeSet;
use std::sync::Arc;

use trellis_client::{PoolOptions, Registry};
use trellis_fake::{MemoryConnector, MemoryStore};
use trellis_proto::{ConsistencyLevel, Endpoint};
use trellis_record::{
    ColumnCursor, ColumnNaming, Error, Key, LoadMode, Record, RecordSchema, View, column,
};

const KEYSPACE: &str = "Keyspace1";
const ONE: ConsistencyLevel = ConsistencyLevel::One;

fn fixture() -> (Registry, MemoryConnector) {
    let store = Arc::new(MemoryStore::with_keyspaces([KEYSPACE]));
    let connector = MemoryConnector::new(store);
    let registry = Registry::new(Arc::new(connector.clone()));
    registry.register(KEYSPACE, PoolOptions::new(["a:9160"])).unwrap();
    (registry, connector)
}

fn schema() -> Arc<RecordSchema> {
    Arc::new(RecordSchema::for_family(KEYSPACE, "Users"))
}

fn view() -> View {
    View::new(
        Key::for_row(KEYSPACE, "UserViews", "everyone").unwrap(),
        Key::for_row(KEYSPACE, "Users", "").unwrap(),
        schema(),
    )
}

fn add_user(pools: &Registry, view: &View, row: &str, name: &str) -> Record {
    let mut record = Record::with_data(schema(), [("name", name)]).unwrap();
    record.set_row(row, None).unwrap();
    record.save(pools).unwrap();
    view.append(pools, &record).unwrap();
    record
}

fn fill_row(pools: &Registry, key: &Key, n: usize) {
    for i in 0..n {
        column::set_value(pools, key, &format!("c{i:03}"), &i.to_string(), None, ONE).unwrap();
    }
}

fn names(cursor: ColumnCursor) -> Vec<String> {
    cursor.map(|c| c.unwrap().name).collect()
}

#[test]
fn every_chunk_size_yields_each_column_once() {
    let (pools, _) = fixture();
    let key = Key::for_row(KEYSPACE, "Wide", "row").unwrap();
    fill_row(&pools, &key, 7);
    let expected: Vec<String> = (0..7).map(|i| format!("c{i:03}")).collect();

    for chunk in 1..=8 {
        let client = pools.resolve(KEYSPACE).unwrap();
        let got = names(ColumnCursor::new(client, key.clone(), chunk));
        assert_eq!(got, expected, "chunk size {chunk}");
    }
}

#[test]
fn reversed_and_bounded_iteration() {
    let (pools, _) = fixture();
    let key = Key::for_row(KEYSPACE, "Wide", "row").unwrap();
    fill_row(&pools, &key, 5);
    let client = pools.resolve(KEYSPACE).unwrap();

    let reversed = names(ColumnCursor::new(Arc::clone(&client), key.clone(), 2).reversed(true));
    assert_eq!(reversed, ["c004", "c003", "c002", "c001", "c000"]);

    let from = names(ColumnCursor::new(Arc::clone(&client), key.clone(), 2).start("c002", false));
    assert_eq!(from, ["c002", "c003", "c004"]);

    let after = names(ColumnCursor::new(Arc::clone(&client), key.clone(), 2).start("c002", true));
    assert_eq!(after, ["c003", "c004"]);

    let between = names(
        ColumnCursor::new(client, key, 1)
            .start("c001", false)
            .finish("c003"),
    );
    assert_eq!(between, ["c001", "c002", "c003"]);
}

#[test]
fn empty_row_yields_nothing() {
    let (pools, connector) = fixture();
    let client = pools.resolve(KEYSPACE).unwrap();
    let key = Key::for_row(KEYSPACE, "Wide", "missing").unwrap();
    assert!(names(ColumnCursor::new(client, key, 10)).is_empty());
    assert_eq!(connector.log().count("get_slice"), 1);
}

#[test]
fn three_appended_records_with_chunk_two() {
    let (pools, _) = fixture();
    let view = view().with_chunk_size(2);
    for (row, name) in [("u1", "ann"), ("u2", "ben"), ("u3", "cat")] {
        add_user(&pools, &view, row, name);
    }

    let keys: Vec<String> = view
        .keys(&pools)
        .unwrap()
        .map(|k| k.unwrap().row_key().to_string())
        .collect();
    assert_eq!(keys, ["u1", "u2", "u3"]);
    assert_eq!(view.len(&pools).unwrap(), 3);

    let names: Vec<String> = view
        .records(&pools)
        .unwrap()
        .map(|r| r.unwrap().get("name").unwrap().to_string())
        .collect();
    assert_eq!(names, ["ann", "ben", "cat"]);
}

#[test]
fn strict_loading_fails_on_dangling_keys() {
    let (pools, _) = fixture();
    let view = view();
    add_user(&pools, &view, "u1", "ann");
    column::set_value(&pools, view.key(), "u2", "u2", None, ONE).unwrap();

    let results: Vec<_> = view.records(&pools).unwrap().collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(Error::NoSuchRecord(_))));
}

#[test]
fn fault_tolerant_loading_skips_dangling_keys() {
    let (pools, _) = fixture();
    let view = view().fault_tolerant();
    add_user(&pools, &view, "u1", "ann");
    column::set_value(&pools, view.key(), "u2", "u2", None, ONE).unwrap();
    add_user(&pools, &view, "u3", "cat");

    let rows: Vec<String> = view
        .records(&pools)
        .unwrap()
        .map(|r| r.unwrap().key().unwrap().row_key().to_string())
        .collect();
    assert_eq!(rows, ["u1", "u3"]);
}

#[test]
fn batch_loading_uses_grouped_fetches() {
    let (pools, connector) = fixture();
    let view = view().with_mode(LoadMode::Batch(2));
    for i in 0..5 {
        add_user(&pools, &view, &format!("u{i}"), &format!("name{i}"));
    }
    connector.log().clear();

    let rows: Vec<String> = view
        .records(&pools)
        .unwrap()
        .map(|r| r.unwrap().key().unwrap().row_key().to_string())
        .collect();
    assert_eq!(rows, ["u0", "u1", "u2", "u3", "u4"]);
    assert_eq!(connector.log().count("multiget_slice"), 3);
}

#[test]
fn field_naming_orders_the_view() {
    let (pools, _) = fixture();
    let view = view().with_naming(ColumnNaming::Field("name".into()));
    add_user(&pools, &view, "u1", "zed");
    add_user(&pools, &view, "u2", "amy");

    let rows: Vec<String> = view
        .keys(&pools)
        .unwrap()
        .map(|k| k.unwrap().row_key().to_string())
        .collect();
    assert_eq!(rows, ["u2", "u1"]);

    let reversed: Vec<String> = view
        .clone()
        .with_reversed(true)
        .keys(&pools)
        .unwrap()
        .map(|k| k.unwrap().row_key().to_string())
        .collect();
    assert_eq!(reversed, ["u1", "u2"]);
}

#[test]
fn remove_drops_the_reference() {
    let (pools, _) = fixture();
    let view = view();
    let ann = add_user(&pools, &view, "u1", "ann");
    add_user(&pools, &view, "u2", "ben");
    view.remove(&pools, &ann).unwrap();
    assert_eq!(view.len(&pools).unwrap(), 1);
}

#[test]
fn view_as_index_is_fed_by_save() {
    let (pools, _) = fixture();
    let index = Arc::new(view());
    let schema = Arc::new(RecordSchema::for_family(KEYSPACE, "Users").with_index(index.clone()));
    for row in ["a", "b"] {
        let mut record = Record::with_data(Arc::clone(&schema), [("name", row)]).unwrap();
        record.set_row(row, None).unwrap();
        record.save(&pools).unwrap();
    }
    let rows: BTreeSet<String> = index
        .keys(&pools)
        .unwrap()
        .map(|k| k.unwrap().row_key().to_string())
        .collect();
    assert_eq!(rows, BTreeSet::from(["a".to_string(), "b".to_string()]));
}

#[test]
fn cursor_stops_after_an_error() {
    let (pools, connector) = fixture();
    let key = Key::for_row(KEYSPACE, "Wide", "row").unwrap();
    fill_row(&pools, &key, 3);
    connector.faults().take_down(&"a:9160".parse::<Endpoint>().unwrap());

    let client = pools.resolve(KEYSPACE).unwrap();
    let mut cursor = ColumnCursor::new(client, key, 2);
    assert!(cursor.next().unwrap().is_err());
    assert!(cursor.next().is_none());
}
