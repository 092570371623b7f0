//! Raw Table (C5, spec.md §4.5): binds one namespace to one column family,
//! exposing `multiset`/`multiget`/`clear`/`drop` with a reader/writer lock
//! around the family so `clear` can exclude every other operation for the
//! window between drop and recreate.

use parking_lot::RwLock;

use crate::error::Result;
use crate::model::{Record, RecordValue};
use crate::storage::{StorageEngine, WriteOp};

/// `owner_tag` is accepted here purely for logging — the Managed Table
/// enforces the fencing precondition before ever calling down to this
/// layer (spec.md §4.5).
pub struct RawTable {
    namespace: String,
    engine: StorageEngine,
    // Guards the *liveness* of `namespace`'s column family. Held shared for
    // every operation except `clear`, which takes it exclusively for the
    // drop-then-recreate window (spec.md §3 Raw Table invariant).
    family_lock: RwLock<()>,
}

impl RawTable {
    pub fn open(namespace: &str, engine: StorageEngine) -> Result<Self> {
        if !engine.list_families().iter().any(|f| f == namespace) {
            engine.create_family(namespace)?;
        }
        Ok(Self {
            namespace: namespace.to_string(),
            engine,
            family_lock: RwLock::new(()),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn multiset(&self, records: &[Record], barrier: bool, owner_tag: u64) -> Result<()> {
        let _guard = self.family_lock.read();
        tracing::trace!(
            namespace = %self.namespace,
            owner_tag,
            count = records.len(),
            barrier,
            "raw_table::multiset"
        );
        let ops: Vec<WriteOp> = records
            .iter()
            .map(|r| match &r.value {
                RecordValue::Present(v) => WriteOp::Put {
                    key: &r.key,
                    value: v,
                },
                RecordValue::Tombstone => WriteOp::Delete { key: &r.key },
            })
            .collect();
        self.engine.batch_write(&self.namespace, &ops, barrier)
    }

    pub fn multiget(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        let _guard = self.family_lock.read();
        self.engine.multiget(&self.namespace, keys)
    }

    pub fn clear(&self, owner_tag: u64) -> Result<()> {
        let _guard = self.family_lock.write();
        tracing::debug!(namespace = %self.namespace, owner_tag, "raw_table::clear");
        self.engine.clear_family(&self.namespace)
    }

    pub fn drop_table(&self) -> Result<()> {
        let _guard = self.family_lock.write();
        self.engine.drop_family(&self.namespace)
    }
}
