//! Database (C8, spec.md §4.8): a per-process registry of Managed Tables
//! keyed by namespace.
//!
//! Grounded on `libsql-server`'s `NamespaceStore`/`NamespaceStoreInner`
//! (`libsql-server/src/namespace/store.rs`) for the open-or-create,
//! drop-removes-entry shape — simplified relative to that type by dropping
//! its `moka` LRU eviction policy: spec.md §4.8 requires every on-disk
//! family to be rehydrated as a live `ManagedTable` at boot and to stay
//! live for the node's lifetime, so there is no eviction-under-pressure
//! concern here the way there is for `NamespaceStore`'s much larger,
//! per-tenant SQLite databases. A self-destructed table (spec.md §4.7: its
//! backend namespace went away) is reaped on the next lookup rather than
//! left to serve stale reads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::BackendInterface;
use crate::error::{MdsError, Result};
use crate::storage::StorageEngine;
use crate::table::managed::ManagedTable;
use crate::table::raw::RawTable;
use crate::table::TableOps;

#[async_trait]
pub trait DatabaseOps: Send + Sync {
    fn open(&self, namespace: &str) -> Result<Arc<dyn TableOps>>;
    fn drop_namespace(&self, namespace: &str) -> Result<()>;
    fn list_namespaces(&self) -> Vec<String>;
    fn get(&self, namespace: &str) -> Option<Arc<dyn TableOps>>;
}

pub struct Database {
    engine: StorageEngine,
    backend: Arc<dyn BackendInterface>,
    poll_interval: Duration,
    tables: Mutex<HashMap<String, Arc<ManagedTable>>>,
}

impl Database {
    /// Enumerates C1 families on construction and creates a `ManagedTable`
    /// for each, with an independently randomized ramp-up so they don't all
    /// hit the backend at once (spec.md §4.8).
    pub fn new(
        engine: StorageEngine,
        backend: Arc<dyn BackendInterface>,
        poll_interval: Duration,
        existing_namespaces: Vec<String>,
    ) -> Result<Self> {
        let mut tables = HashMap::new();
        for namespace in existing_namespaces {
            let raw = Arc::new(RawTable::open(&namespace, engine.clone())?);
            let table = ManagedTable::new(namespace.clone(), raw, backend.clone(), poll_interval);
            tables.insert(namespace, table);
        }
        Ok(Self {
            engine,
            backend,
            poll_interval,
            tables: Mutex::new(tables),
        })
    }

    fn open_table(&self, namespace: &str) -> Result<Arc<ManagedTable>> {
        self.reap_self_destructed();
        let mut tables = self.tables.lock();
        if let Some(existing) = tables.get(namespace) {
            return Ok(existing.clone());
        }
        let raw = Arc::new(RawTable::open(namespace, self.engine.clone())?);
        let table = ManagedTable::new(
            namespace.to_string(),
            raw,
            self.backend.clone(),
            self.poll_interval,
        );
        tables.insert(namespace.to_string(), table.clone());
        Ok(table)
    }

    /// Drops any table whose background task has self-destructed after
    /// seeing `NamespaceGone` (spec.md §4.7: "on `NamespaceGone`
    /// self-destruct the table; the Database drops it"). Run on every
    /// namespace lookup so a self-destructed table is never handed back to
    /// a caller and left serving stale reads.
    fn reap_self_destructed(&self) {
        let gone: Vec<String> = self
            .tables
            .lock()
            .iter()
            .filter(|(_, table)| table.is_self_destructed())
            .map(|(namespace, _)| namespace.clone())
            .collect();
        for namespace in gone {
            let table = self.tables.lock().remove(&namespace);
            if let Some(table) = table {
                table.shutdown();
                if let Err(e) = table.drop_table() {
                    tracing::warn!(%namespace, error = %e, "failed to drop family for self-destructed table");
                }
            }
        }
    }
}

#[async_trait]
impl DatabaseOps for Database {
    fn open(&self, namespace: &str) -> Result<Arc<dyn TableOps>> {
        let table = self.open_table(namespace)?;
        Ok(Arc::new(table) as Arc<dyn TableOps>)
    }

    fn drop_namespace(&self, namespace: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        let table = tables
            .remove(namespace)
            .ok_or_else(|| MdsError::NamespaceNotFound(namespace.to_string()))?;
        drop(tables); // release the map lock before the (possibly slow) background shutdown
        // Drop is unconditional regardless of role or owner tag (spec.md
        // §4.3 `Drop` carries no owner_tag at all) — stop the table's
        // background action directly rather than going through
        // `clear`/`multiset`'s Master-only precondition, then drop the
        // family through the Raw Table's own lock.
        table.shutdown();
        table.drop_table()
    }

    fn list_namespaces(&self) -> Vec<String> {
        self.reap_self_destructed();
        self.tables.lock().keys().cloned().collect()
    }

    fn get(&self, namespace: &str) -> Option<Arc<dyn TableOps>> {
        self.reap_self_destructed();
        self.tables
            .lock()
            .get(namespace)
            .cloned()
            .map(|t| Arc::new(t) as Arc<dyn TableOps>)
    }
}

/// `WeakDatabase`: a handle that resolves a weak reference to a `Database`
/// per call and fails with `NodeGone` once the owning node has stopped
/// (Design Notes §9).
#[derive(Clone)]
pub struct WeakDatabase {
    inner: std::sync::Weak<Database>,
    node_name: String,
}

impl WeakDatabase {
    pub fn new(db: &Arc<Database>, node_name: String) -> Self {
        Self {
            inner: Arc::downgrade(db),
            node_name,
        }
    }

    fn upgrade(&self) -> Result<Arc<Database>> {
        self.inner
            .upgrade()
            .ok_or_else(|| MdsError::NodeGone(self.node_name.clone()))
    }

    pub fn open(&self, namespace: &str) -> Result<Arc<dyn TableOps>> {
        self.upgrade()?.open(namespace)
    }

    pub fn drop_namespace(&self, namespace: &str) -> Result<()> {
        self.upgrade()?.drop_namespace(namespace)
    }

    pub fn list_namespaces(&self) -> Result<Vec<String>> {
        Ok(self.upgrade()?.list_namespaces())
    }
}
