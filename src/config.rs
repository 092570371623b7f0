//! Node configuration (spec.md §6): the JSON tree the CLI's
//! `--config-file/-C` argument points at, deserialized with `serde_json`
//! the way the rest of this workspace deserializes its config surfaces.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::storage::EngineOptions;

fn default_poll_secs() -> u64 {
    300
}

fn default_threads() -> u32 {
    1
}

fn default_timeout_secs() -> u32 {
    30
}

fn default_cached_pages() -> u32 {
    256
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MdsNodeConfig {
    pub host: String,
    pub port: u16,
    pub db_directory: PathBuf,
    pub scratch_directory: PathBuf,
    #[serde(default)]
    pub rocksdb_threads: Option<i32>,
    #[serde(default)]
    pub rocksdb_write_cache_size: Option<usize>,
    #[serde(default)]
    pub rocksdb_read_cache_size: Option<usize>,
    #[serde(default)]
    pub rocksdb_enable_wal: Option<bool>,
    #[serde(default)]
    pub rocksdb_data_sync: Option<bool>,
}

/// Assumed RocksDB block size backing `mds_cached_pages` (spec.md §6):
/// with no per-node `rocksdb_read_cache_size` override, the read cache is
/// sized as `mds_cached_pages * PAGE_SIZE_BYTES` instead of the engine's
/// own flat default.
const PAGE_SIZE_BYTES: usize = 4096;

impl MdsNodeConfig {
    pub fn engine_options(&self, default_cached_pages: u32) -> EngineOptions {
        let defaults = EngineOptions::default();
        EngineOptions {
            threads: self.rocksdb_threads.unwrap_or(defaults.threads),
            write_cache_size: self
                .rocksdb_write_cache_size
                .unwrap_or(defaults.write_cache_size),
            read_cache_size: self
                .rocksdb_read_cache_size
                .unwrap_or(default_cached_pages as usize * PAGE_SIZE_BYTES),
            enable_wal: self.rocksdb_enable_wal.unwrap_or(defaults.enable_wal),
            data_sync: self.rocksdb_data_sync.unwrap_or(defaults.data_sync),
        }
    }

    /// `node_address:port` identity used by the Node Manager's conflict
    /// rule (spec.md §4.9).
    pub fn address_key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub mds_nodes: Vec<MdsNodeConfig>,
    #[serde(default = "default_poll_secs")]
    pub mds_poll_secs: u64,
    #[serde(default = "default_threads")]
    pub mds_threads: u32,
    #[serde(default = "default_timeout_secs")]
    pub mds_timeout_secs: u32,
    #[serde(default = "default_cached_pages")]
    pub mds_cached_pages: u32,
}

impl NodeConfig {
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the Node Manager's conflict rule up front (spec.md §4.9): no
    /// two configured nodes may share an address, db directory, or scratch
    /// directory.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut addresses = std::collections::HashSet::new();
        let mut db_dirs = std::collections::HashSet::new();
        let mut scratch_dirs = std::collections::HashSet::new();
        for node in &self.mds_nodes {
            if !addresses.insert(node.address_key()) {
                anyhow::bail!("duplicate mds_nodes address: {}", node.address_key());
            }
            if !db_dirs.insert(node.db_directory.clone()) {
                anyhow::bail!("duplicate mds_nodes db_directory: {}", node.db_directory.display());
            }
            if !scratch_dirs.insert(node.scratch_directory.clone()) {
                anyhow::bail!(
                    "duplicate mds_nodes scratch_directory: {}",
                    node.scratch_directory.display()
                );
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.mds_poll_secs)
    }

    pub fn timeout(&self) -> Option<std::time::Duration> {
        if self.mds_timeout_secs == 0 {
            None
        } else {
            Some(std::time::Duration::from_secs(self.mds_timeout_secs as u64))
        }
    }

    pub fn worker_threads(&self) -> usize {
        if self.mds_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.mds_threads as usize
        }
    }
}
