//! End-to-end coverage of the write-path role/fencing state machine (C7)
//! layered on a real embedded RocksDB engine (C1) and raw table (C5).

mod common;

use std::sync::Arc;

use common::FakeBackend;
use mds::model::{Record, RecordValue, Role};
use mds::storage::{EngineOptions, StorageEngine};
use mds::table::managed::ManagedTable;
use mds::table::raw::RawTable;

fn open_table(dir: &tempfile::TempDir, namespace: &str) -> (StorageEngine, Arc<ManagedTable>) {
    let (engine, _existing) = StorageEngine::open(dir.path(), EngineOptions::default()).unwrap();
    let raw = Arc::new(RawTable::open(namespace, engine.clone()).unwrap());
    let backend = Arc::new(FakeBackend::new());
    let table = ManagedTable::new(namespace.to_string(), raw, backend, std::time::Duration::from_secs(3600));
    (engine, table)
}

#[tokio::test]
async fn new_table_starts_slave_and_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    let (_engine, table) = open_table(&dir, "ns1");

    assert_eq!(table.get_role(), Role::Slave);
    let err = table
        .multiset(
            &[Record {
                key: b"k".to_vec(),
                value: RecordValue::Present(b"v".to_vec()),
            }],
            false,
            0,
        )
        .unwrap_err();
    assert!(matches!(err, mds::error::MdsError::SlaveRejectedWrite));
}

#[tokio::test]
async fn master_write_requires_matching_owner_tag() {
    let dir = tempfile::tempdir().unwrap();
    let (_engine, table) = open_table(&dir, "ns1");

    table.set_role(Role::Master, 42);
    let wrong_tag_err = table
        .multiset(
            &[Record {
                key: b"k".to_vec(),
                value: RecordValue::Present(b"v".to_vec()),
            }],
            false,
            7,
        )
        .unwrap_err();
    assert!(matches!(wrong_tag_err, mds::error::MdsError::OwnerTagMismatch));

    table
        .multiset(
            &[Record {
                key: b"k".to_vec(),
                value: RecordValue::Present(b"v".to_vec()),
            }],
            false,
            42,
        )
        .unwrap();

    let values = table.multiget(&[b"k".to_vec()]).unwrap();
    assert_eq!(values, vec![Some(b"v".to_vec())]);
}

#[tokio::test]
async fn clear_drops_all_keys_but_survives_as_the_same_namespace() {
    let dir = tempfile::tempdir().unwrap();
    let (_engine, table) = open_table(&dir, "ns1");
    table.set_role(Role::Master, 1);
    table
        .multiset(
            &[Record {
                key: b"k".to_vec(),
                value: RecordValue::Present(b"v".to_vec()),
            }],
            false,
            1,
        )
        .unwrap();

    table.clear(1).unwrap();

    let values = table.multiget(&[b"k".to_vec()]).unwrap();
    assert_eq!(values, vec![None]);
    assert_eq!(table.namespace(), "ns1");
}

#[tokio::test]
async fn tombstone_deletes_a_previously_set_key() {
    let dir = tempfile::tempdir().unwrap();
    let (_engine, table) = open_table(&dir, "ns1");
    table.set_role(Role::Master, 1);
    table
        .multiset(
            &[Record {
                key: b"k".to_vec(),
                value: RecordValue::Present(b"v".to_vec()),
            }],
            false,
            1,
        )
        .unwrap();
    table
        .multiset(
            &[Record {
                key: b"k".to_vec(),
                value: RecordValue::Tombstone,
            }],
            false,
            1,
        )
        .unwrap();

    let values = table.multiget(&[b"k".to_vec()]).unwrap();
    assert_eq!(values, vec![None]);
}
