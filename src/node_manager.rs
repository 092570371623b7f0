//! Node Manager (C9, spec.md §4.9): the process-wide registry of locally
//! running MDS nodes, each a `(Database, Transport)` pair bound to its own
//! address and backing directories.
//!
//! Grounded on `sqld`'s top-level `main`/`Server` wiring
//! (`sqld/src/lib.rs`, `sqld/src/config.rs`): one process hosts a small,
//! statically-configured set of independently-addressable services, brought
//! up and down together, with the same up-front "do these configs collide"
//! validation this crate's own [`crate::config::NodeConfig::validate`]
//! performs over the whole file.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::BackendInterface;
use crate::database::{Database, DatabaseOps, WeakDatabase};
use crate::error::{MdsError, Result};
use crate::storage::{EngineOptions, StorageEngine};
use crate::transport::{self, ServerHandle};

/// Everything the Node Manager needs to bring one MDS node up.
#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_directory: PathBuf,
    pub scratch_directory: PathBuf,
    pub engine_options: EngineOptions,
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
}

impl ServerConfig {
    fn address_key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct RunningNode {
    config: ServerConfig,
    database: Arc<Database>,
    handle: ServerHandle,
}

/// Owns every node this process is currently serving. `start`/`stop` are
/// the only ways nodes enter or leave the registry; `find` hands callers a
/// [`WeakDatabase`] so a node that's since been stopped fails loudly
/// (`NodeGone`) instead of silently operating on a zombie.
pub struct NodeManager {
    nodes: Mutex<Vec<RunningNode>>,
}

impl NodeManager {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(Vec::new()),
        }
    }

    /// Validates `config` against every already-running node (spec.md
    /// §4.9's conflict rule: no two nodes may share an address, db
    /// directory, or scratch directory).
    pub fn check(&self, config: &ServerConfig) -> Result<()> {
        let nodes = self.nodes.lock();
        for running in nodes.iter() {
            if running.config.address_key() == config.address_key() {
                return Err(MdsError::Generic(format!(
                    "node address already in use: {}",
                    config.address_key()
                )));
            }
            if running.config.db_directory == config.db_directory {
                return Err(MdsError::Generic(format!(
                    "db_directory already in use: {}",
                    config.db_directory.display()
                )));
            }
            if running.config.scratch_directory == config.scratch_directory {
                return Err(MdsError::Generic(format!(
                    "scratch_directory already in use: {}",
                    config.scratch_directory.display()
                )));
            }
        }
        Ok(())
    }

    /// Opens the storage engine, rehydrates every existing namespace into a
    /// `ManagedTable`, and starts the transport listener (spec.md §4.8,
    /// §4.4). Returns a weak handle to the new node's database.
    pub async fn start(
        &self,
        mut config: ServerConfig,
        backend: Arc<dyn BackendInterface>,
    ) -> Result<WeakDatabase> {
        self.check(&config)?;

        std::fs::create_dir_all(&config.db_directory)?;
        std::fs::create_dir_all(&config.scratch_directory)?;

        let (engine, existing_namespaces) =
            StorageEngine::open(&config.db_directory, config.engine_options.clone())?;
        let database = Arc::new(Database::new(
            engine,
            backend,
            config.poll_interval,
            existing_namespaces,
        )?);

        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| MdsError::Generic(format!("invalid node address: {e}")))?;
        let handle = transport::serve(database.clone() as Arc<dyn DatabaseOps>, addr, config.timeout).await?;
        // A requested port of 0 resolves to whatever the OS actually bound;
        // track that instead so later lookups and conflict checks key off
        // the real address.
        config.port = handle.local_addr.port();

        let weak = WeakDatabase::new(&database, config.address_key());

        self.nodes.lock().push(RunningNode {
            config,
            database,
            handle,
        });

        Ok(weak)
    }

    /// Stops accepting new connections for the node at `host:port` and
    /// drops it from the registry. Background catch-up loops belonging to
    /// its tables stop when the process exits; this crate has no
    /// mid-process per-table cancellation hook exposed above `ManagedTable`
    /// itself (spec.md §4.9 scopes node shutdown to the listener, not to
    /// forcing every in-flight background task to observe it immediately).
    pub fn stop(&self, host: &str, port: u16) -> Result<()> {
        let key = format!("{host}:{port}");
        let mut nodes = self.nodes.lock();
        let pos = nodes
            .iter()
            .position(|n| n.config.address_key() == key)
            .ok_or_else(|| MdsError::NodeGone(key.clone()))?;
        let running = nodes.remove(pos);
        running.handle.abort();
        Ok(())
    }

    pub fn find(&self, host: &str, port: u16) -> Option<WeakDatabase> {
        let key = format!("{host}:{port}");
        self.nodes
            .lock()
            .iter()
            .find(|n| n.config.address_key() == key)
            .map(|n| WeakDatabase::new(&n.database, key.clone()))
    }

    pub fn list(&self) -> Vec<(String, u16)> {
        self.nodes
            .lock()
            .iter()
            .map(|n| (n.config.host.clone(), n.config.port))
            .collect()
    }

    pub fn stop_all(&self) {
        let mut nodes = self.nodes.lock();
        for running in nodes.drain(..) {
            running.handle.abort();
        }
    }

    /// Applies a full desired config set against the currently running one
    /// (spec.md §4.9 update pipeline): nodes whose address isn't in
    /// `desired` are stopped, nodes in `desired` that aren't already running
    /// are started, and nodes present in both are left untouched. Rejects
    /// the whole update if any already-running node would have its
    /// `db_directory` or `scratch_directory` changed out from under it.
    pub async fn update(
        &self,
        desired: Vec<ServerConfig>,
        backend: Arc<dyn BackendInterface>,
    ) -> Result<()> {
        {
            let nodes = self.nodes.lock();
            for wanted in &desired {
                if let Some(running) = nodes
                    .iter()
                    .find(|n| n.config.address_key() == wanted.address_key())
                {
                    if running.config.db_directory != wanted.db_directory
                        || running.config.scratch_directory != wanted.scratch_directory
                    {
                        return Err(MdsError::Generic(format!(
                            "update would change db_directory/scratch_directory of running node {}",
                            wanted.address_key()
                        )));
                    }
                }
            }
        }

        let desired_keys: std::collections::HashSet<String> =
            desired.iter().map(ServerConfig::address_key).collect();
        let to_stop: Vec<(String, u16)> = self
            .nodes
            .lock()
            .iter()
            .filter(|n| !desired_keys.contains(&n.config.address_key()))
            .map(|n| (n.config.host.clone(), n.config.port))
            .collect();
        for (host, port) in to_stop {
            self.stop(&host, port)?;
        }

        let running_keys: std::collections::HashSet<String> = self
            .nodes
            .lock()
            .iter()
            .map(|n| n.config.address_key())
            .collect();
        for wanted in desired {
            if !running_keys.contains(&wanted.address_key()) {
                self.start(wanted, backend.clone()).await?;
            }
        }
        Ok(())
    }
}

impl Default for NodeManager {
    fn default() -> Self {
        Self::new()
    }
}
