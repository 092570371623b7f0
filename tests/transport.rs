//! End-to-end wire protocol coverage (C2–C4): a real `MdsClient` talking to
//! a real `transport::serve` listener over TCP, backed by an on-disk
//! `Database`.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::FakeBackend;
use mds::client::{MdsClient, NodeAddress};
use mds::database::{Database, DatabaseOps};
use mds::model::{Record, RecordValue, Role};
use mds::storage::{EngineOptions, StorageEngine};
use mds::transport;

async fn start_server(dir: &tempfile::TempDir) -> (Arc<Database>, transport::ServerHandle) {
    let (engine, existing) = StorageEngine::open(dir.path(), EngineOptions::default()).unwrap();
    let backend = Arc::new(FakeBackend::new());
    let db = Arc::new(
        Database::new(engine, backend, Duration::from_secs(3600), existing).unwrap(),
    );
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let handle = transport::serve(db.clone() as Arc<dyn DatabaseOps>, addr, Some(Duration::from_secs(5)))
        .await
        .unwrap();
    (db, handle)
}

fn client_for(handle: &transport::ServerHandle) -> MdsClient {
    MdsClient::new(
        NodeAddress {
            host: handle.local_addr.ip().to_string(),
            port: handle.local_addr.port(),
            force_remote: true,
        },
        Some(Duration::from_secs(5)),
    )
}

#[tokio::test]
async fn ping_round_trips_the_payload() {
    let dir = tempfile::tempdir().unwrap();
    let (_db, handle) = start_server(&dir).await;
    let client = client_for(&handle);

    let echoed = client.ping(b"hello".to_vec()).await.unwrap();
    assert_eq!(echoed, b"hello".to_vec());
    handle.abort();
}

#[tokio::test]
async fn open_set_role_and_multiset_multiget_round_trip_over_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let (_db, handle) = start_server(&dir).await;
    let client = client_for(&handle);

    client.open("ns1").await.unwrap();
    client.set_role("ns1", Role::Master, 5).await.unwrap();
    assert_eq!(client.get_role("ns1").await.unwrap(), Role::Master);
    assert_eq!(client.get_owner_tag("ns1").await.unwrap(), 5);

    client
        .multiset(
            "ns1",
            &[Record {
                key: b"k".to_vec(),
                value: RecordValue::Present(b"v".to_vec()),
            }],
            false,
            5,
        )
        .await
        .unwrap();

    let values = client.multiget("ns1", &[b"k".to_vec()]).await.unwrap();
    assert_eq!(values, vec![Some(b"v".to_vec())]);
    assert_eq!(client.list().await.unwrap(), vec!["ns1".to_string()]);

    handle.abort();
}

#[tokio::test]
async fn write_with_wrong_owner_tag_surfaces_as_an_error_response() {
    let dir = tempfile::tempdir().unwrap();
    let (_db, handle) = start_server(&dir).await;
    let client = client_for(&handle);

    client.open("ns1").await.unwrap();
    client.set_role("ns1", Role::Master, 5).await.unwrap();

    let err = client
        .multiset(
            "ns1",
            &[Record {
                key: b"k".to_vec(),
                value: RecordValue::Present(b"v".to_vec()),
            }],
            false,
            999,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, mds::error::MdsError::OwnerTagMismatch));

    handle.abort();
}

#[tokio::test]
async fn drop_removes_the_namespace_from_list() {
    let dir = tempfile::tempdir().unwrap();
    let (_db, handle) = start_server(&dir).await;
    let client = client_for(&handle);

    client.open("ns1").await.unwrap();
    assert_eq!(client.list().await.unwrap(), vec!["ns1".to_string()]);
    client.drop_namespace("ns1").await.unwrap();
    assert!(client.list().await.unwrap().is_empty());

    handle.abort();
}
