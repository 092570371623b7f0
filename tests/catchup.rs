//! Catch-Up Engine (C6) and relocation-log application (C7 step 4), driven
//! through `ManagedTable` against an in-memory backend.

mod common;

use std::sync::Arc;

use common::FakeBackend;
use mds::catchup::MetadataStore;
use mds::model::{CloneId, Record, RecordValue, Role, ScrubId};
use mds::storage::{EngineOptions, StorageEngine};
use mds::table::managed::ManagedTable;
use mds::table::raw::RawTable;

fn new_table(dir: &tempfile::TempDir, namespace: &str, backend: Arc<FakeBackend>) -> Arc<ManagedTable> {
    let (engine, _existing) = StorageEngine::open(dir.path(), EngineOptions::default()).unwrap();
    let raw = Arc::new(RawTable::open(namespace, engine).unwrap());
    ManagedTable::new(namespace.to_string(), raw, backend, std::time::Duration::from_secs(3600))
}

fn present(key: &[u8], value: &[u8]) -> Record {
    Record {
        key: key.to_vec(),
        value: RecordValue::Present(value.to_vec()),
    }
}

#[tokio::test]
async fn master_catch_up_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new());
    backend.push_tlog("ns", vec![present(b"k", b"v")]);
    let table = new_table(&dir, "ns", backend);
    table.set_role(Role::Master, 1);

    let applied = table.catch_up(false).await.unwrap();
    assert_eq!(applied, 0);
    assert_eq!(table.multiget(&[b"k".to_vec()]).unwrap(), vec![None]);
}

#[tokio::test]
async fn slave_incremental_catch_up_then_full_rebuild_on_scrub_change() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new());
    backend.push_tlog("ns", vec![present(b"a", b"1")]);
    backend.push_tlog("ns", vec![present(b"b", b"2")]);
    let table = new_table(&dir, "ns", Arc::clone(&backend));

    let applied = table.catch_up(false).await.unwrap();
    assert_eq!(applied, 2);
    assert_eq!(table.multiget(&[b"a".to_vec(), b"b".to_vec()]).unwrap(), vec![
        Some(b"1".to_vec()),
        Some(b"2".to_vec()),
    ]);

    backend.set_scrub_id("ns", ScrubId::from_u128(1));
    backend.push_tlog("ns", vec![present(b"c", b"3")]);

    let applied = table.catch_up(false).await.unwrap();
    assert_eq!(applied, 3); // full rebuild replays the whole chain

    let counters = table.get_counters(false);
    assert_eq!(counters.incremental_updates, 1);
    assert_eq!(counters.full_rebuilds, 1);
    assert_eq!(counters.total_tlogs_read, 5);
}

#[tokio::test]
async fn dry_run_catch_up_counts_without_mutating() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new());
    backend.push_tlog("ns", vec![present(b"a", b"1")]);
    let table = new_table(&dir, "ns", backend);

    let applied = table.catch_up(true).await.unwrap();
    assert_eq!(applied, 1);
    assert_eq!(table.multiget(&[b"a".to_vec()]).unwrap(), vec![None]);
    assert_eq!(table.get_counters(false).total_tlogs_read, 0);
}

#[tokio::test]
async fn apply_relocations_runs_a_catch_up_then_layers_the_relocation_log() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new());
    backend.push_tlog("ns", vec![present(b"a", b"1")]);
    backend.put_relocation_log("ns", "reloc-1", vec![present(b"b", b"2")]);
    let table = new_table(&dir, "ns", backend);

    table
        .apply_relocations(ScrubId::from_u128(9), CloneId(0), &["reloc-1".to_string()])
        .await
        .unwrap();

    assert_eq!(
        table.multiget(&[b"a".to_vec(), b"b".to_vec()]).unwrap(),
        vec![Some(b"1".to_vec()), Some(b"2".to_vec())]
    );
    assert_eq!(table.local_scrub_id().unwrap(), ScrubId::from_u128(9));
}

#[tokio::test]
async fn apply_relocations_is_idempotent_once_scrub_id_matches() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new());
    backend.put_relocation_log("ns", "reloc-1", vec![present(b"b", b"2")]);
    let table = new_table(&dir, "ns", backend);

    table
        .apply_relocations(ScrubId::from_u128(9), CloneId(0), &["reloc-1".to_string()])
        .await
        .unwrap();
    // Same scrub id again: must not re-fetch/re-apply (no-op), and must not error.
    table
        .apply_relocations(ScrubId::from_u128(9), CloneId(0), &["reloc-1".to_string()])
        .await
        .unwrap();
}

#[tokio::test]
async fn apply_relocations_on_a_master_with_mismatched_scrub_id_is_wrong_role() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new());
    let table = new_table(&dir, "ns", backend);
    table.set_role(Role::Master, 1);

    let err = table
        .apply_relocations(ScrubId::from_u128(9), CloneId(0), &["reloc-1".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, mds::error::MdsError::WrongRole));
}

#[tokio::test]
async fn catch_up_against_a_gone_namespace_fails_and_caller_sees_namespace_gone() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new());
    backend.delete_namespace("ns");
    let table = new_table(&dir, "ns", backend);

    let err = table.catch_up(false).await.unwrap_err();
    assert!(matches!(err, mds::error::MdsError::NamespaceGone(_)));
}
