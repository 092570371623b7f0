//! Node Manager (C9): the conflict rule between concurrently running nodes.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::FakeBackend;
use mds::backend::BackendInterface;
use mds::node_manager::{NodeManager, ServerConfig};
use mds::storage::EngineOptions;

fn config(dir: &tempfile::TempDir, port: u16) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port,
        db_directory: dir.path().join("db"),
        scratch_directory: dir.path().join("scratch"),
        engine_options: EngineOptions::default(),
        poll_interval: Duration::from_secs(300),
        timeout: None,
    }
}

fn backend() -> Arc<dyn BackendInterface> {
    Arc::new(FakeBackend::new())
}

#[tokio::test]
async fn a_second_node_on_the_same_address_is_rejected() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let manager = NodeManager::new();

    manager.start(config(&dir_a, 0), backend()).await.unwrap();
    // `start` resolves port 0 to whatever the OS actually bound.
    let bound_port = manager.list()[0].1;

    let err = manager
        .start(config(&dir_b, bound_port), backend())
        .await
        .unwrap_err();
    assert!(matches!(err, mds::error::MdsError::Generic(_)));
}

#[tokio::test]
async fn two_nodes_sharing_a_db_directory_are_rejected_even_at_different_addresses() {
    let dir = tempfile::tempdir().unwrap();
    let manager = NodeManager::new();

    manager.start(config(&dir, 0), backend()).await.unwrap();
    let bound_port = manager.list()[0].1;

    let mut other_address = config(&dir, 0);
    other_address.port = bound_port + 1;
    let err = manager.start(other_address, backend()).await.unwrap_err();
    assert!(matches!(err, mds::error::MdsError::Generic(_)));
}

#[tokio::test]
async fn independent_nodes_can_run_side_by_side() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let manager = NodeManager::new();

    manager.start(config(&dir_a, 0), backend()).await.unwrap();
    manager.start(config(&dir_b, 0), backend()).await.unwrap();

    assert_eq!(manager.list().len(), 2);
}

#[tokio::test]
async fn update_starts_new_nodes_and_stops_removed_ones_leaving_unchanged_alone() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let manager = NodeManager::new();

    manager.start(config(&dir_a, 0), backend()).await.unwrap();
    let port_a = manager.list()[0].1;
    let mut cfg_a = config(&dir_a, port_a);

    // desired set: keep node A (unchanged), add node B.
    let cfg_b = config(&dir_b, 0);
    cfg_a.port = port_a;
    manager
        .update(vec![cfg_a.clone(), cfg_b], backend())
        .await
        .unwrap();
    assert_eq!(manager.list().len(), 2);
    assert!(manager.find(&cfg_a.host, port_a).is_some());

    // desired set: drop node A, keep node B alone.
    let port_b = manager
        .list()
        .into_iter()
        .find(|(h, p)| *h == cfg_a.host && *p != port_a)
        .unwrap()
        .1;
    let mut cfg_b_only = config(&dir_b, port_b);
    cfg_b_only.port = port_b;
    manager.update(vec![cfg_b_only], backend()).await.unwrap();

    let remaining = manager.list();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].1, port_b);
}

#[tokio::test]
async fn update_rejects_changing_db_directory_of_a_running_node() {
    let dir_a = tempfile::tempdir().unwrap();
    let other_dir = tempfile::tempdir().unwrap();
    let manager = NodeManager::new();

    manager.start(config(&dir_a, 0), backend()).await.unwrap();
    let port_a = manager.list()[0].1;

    let mut changed = config(&dir_a, port_a);
    changed.db_directory = other_dir.path().join("db");

    let err = manager.update(vec![changed], backend()).await.unwrap_err();
    assert!(matches!(err, mds::error::MdsError::Generic(_)));
    // Rejected update leaves the original node running untouched.
    assert_eq!(manager.list().len(), 1);
}
