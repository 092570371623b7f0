//! Wraps an embedded RocksDB instance: one column-family per namespace, the
//! reserved `default` family excluded from the namespace surface (spec.md
//! §3, §4.1).
//!
//! A single-writer SQLite/libsql WAL doesn't fit a store of many
//! independently-addressable namespaces sharing one process-wide engine;
//! RocksDB is the ecosystem-standard answer for exactly this shape
//! (log-structured, column-family-native, atomic batched writes). This
//! module's `open`/`create_family`/`drop_family`/`batch_write`/`multiget`
//! shape is grounded on other thin column-family adapters over it (e.g.
//! Mysten Labs' `typed-store`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rocksdb::{
    ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options as RocksOptions, WriteBatch,
};

use crate::error::{MdsError, Result};

pub const DEFAULT_FAMILY: &str = "default";

type Db = DBWithThreadMode<MultiThreaded>;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub threads: i32,
    pub write_cache_size: usize,
    pub read_cache_size: usize,
    pub enable_wal: bool,
    pub data_sync: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            threads: 0, // 0 = auto, matching `mds_threads` in node config (spec.md §6)
            write_cache_size: 64 << 20,
            read_cache_size: 256 << 20,
            enable_wal: true,
            data_sync: false,
        }
    }
}

impl EngineOptions {
    fn to_rocksdb(&self) -> RocksOptions {
        let mut opts = RocksOptions::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        if self.threads > 0 {
            opts.increase_parallelism(self.threads);
        } else {
            opts.increase_parallelism(num_cpus_fallback());
        }
        opts.set_write_buffer_size(self.write_cache_size);
        opts.set_use_fsync(self.data_sync);
        opts
    }
}

fn num_cpus_fallback() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

#[derive(Debug, Clone, Copy)]
pub enum WriteOp<'a> {
    Put { key: &'a [u8], value: &'a [u8] },
    Delete { key: &'a [u8] },
}

/// Handle onto the embedded database. Cheap to clone; all methods take
/// `&self` and are safe to call concurrently from multiple Raw Tables.
#[derive(Clone)]
pub struct StorageEngine {
    db: Arc<Db>,
    path: PathBuf,
    options: EngineOptions,
}

impl StorageEngine {
    /// Opens (or creates) the database directory, materializing every
    /// existing column family except `default` (spec.md §4.1: "On open,
    /// list column-families ... except the reserved `default` family").
    pub fn open(path: &Path, options: EngineOptions) -> Result<(Self, Vec<String>)> {
        let rocks_opts = options.to_rocksdb();
        let existing = Db::list_cf(&rocks_opts, path).unwrap_or_else(|_| vec![DEFAULT_FAMILY.to_string()]);

        let mut descriptors: Vec<ColumnFamilyDescriptor> = existing
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(name, RocksOptions::default()))
            .collect();
        if !existing.iter().any(|n| n == DEFAULT_FAMILY) {
            descriptors.push(ColumnFamilyDescriptor::new(
                DEFAULT_FAMILY,
                RocksOptions::default(),
            ));
        }

        let db = Db::open_cf_descriptors(&rocks_opts, path, descriptors)
            .map_err(|e| MdsError::Storage(e.to_string()))?;

        let namespaces: Vec<String> = existing
            .into_iter()
            .filter(|n| n != DEFAULT_FAMILY)
            .collect();

        Ok((
            Self {
                db: Arc::new(db),
                path: path.to_path_buf(),
                options,
            },
            namespaces,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn create_family(&self, name: &str) -> Result<()> {
        if name == DEFAULT_FAMILY {
            return Err(MdsError::Generic(format!(
                "`{DEFAULT_FAMILY}` is reserved and cannot be used as a namespace"
            )));
        }
        self.db
            .create_cf(name, &self.options.to_rocksdb())
            .map_err(|e| MdsError::Storage(e.to_string()))
    }

    pub fn drop_family(&self, name: &str) -> Result<()> {
        self.db
            .drop_cf(name)
            .map_err(|e| MdsError::Storage(e.to_string()))
    }

    pub fn list_families(&self) -> Vec<String> {
        // The in-process descriptor list is authoritative between opens;
        // callers track namespace membership themselves (C8's Database),
        // this is kept only for restart-time rehydration in `open`.
        Db::list_cf(&self.options.to_rocksdb(), &self.path)
            .unwrap_or_default()
            .into_iter()
            .filter(|n| n != DEFAULT_FAMILY)
            .collect()
    }

    /// Applies a batch of puts/deletes atomically. If `barrier` is set, the
    /// family is flushed first so every record written prior to this batch
    /// is durable before the batch itself is applied (spec.md §4.1).
    pub fn batch_write(&self, family: &str, ops: &[WriteOp<'_>], barrier: bool) -> Result<()> {
        let cf = self
            .db
            .cf_handle(family)
            .ok_or_else(|| MdsError::Storage(format!("no such column family: {family}")))?;

        if barrier {
            self.db
                .flush_cf(&cf)
                .map_err(|e| MdsError::Storage(e.to_string()))?;
        }

        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                WriteOp::Put { key, value } => batch.put_cf(&cf, key, value),
                WriteOp::Delete { key } => batch.delete_cf(&cf, key),
            }
        }
        let mut write_opts = rocksdb::WriteOptions::default();
        write_opts.disable_wal(!self.options.enable_wal);
        self.db
            .write_opt(batch, &write_opts)
            .map_err(|e| MdsError::Storage(e.to_string()))
    }

    /// Preserves input order; absent keys map to `None`.
    pub fn multiget(&self, family: &str, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        let cf = self
            .db
            .cf_handle(family)
            .ok_or_else(|| MdsError::Storage(format!("no such column family: {family}")))?;
        let refs: Vec<(&_, &Vec<u8>)> = keys.iter().map(|k| (&cf, k)).collect();
        self.db
            .multi_get_cf(refs)
            .into_iter()
            .map(|r| r.map_err(|e| MdsError::Storage(e.to_string())))
            .collect()
    }

    /// Drops the family then immediately re-creates it with the same name
    /// and options. The caller (Raw Table) must hold its exclusive lock for
    /// the full duration of this call (spec.md §4.1).
    pub fn clear_family(&self, family: &str) -> Result<()> {
        self.drop_family(family)?;
        self.create_family(family)
    }
}
