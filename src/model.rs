//! Core data model (spec.md §3): namespaces, roles, corks, scrub ids, owner
//! tags, clone ids, and the record/counters types that flow between every
//! other module.

use std::fmt;

/// 128-bit identifier marking the last TLog applied to the cached metadata
/// store. Represented as a newtype rather than a bare `u128` so it can never
/// be confused with a `ScrubId` at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Cork(pub [u8; 16]);

impl Cork {
    pub const ZERO: Cork = Cork([0u8; 16]);

    pub fn from_u128(v: u128) -> Self {
        Cork(v.to_be_bytes())
    }

    pub fn as_u128(&self) -> u128 {
        u128::from_be_bytes(self.0)
    }
}

impl fmt::Display for Cork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// 128-bit generation tag on relocation output (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScrubId(pub [u8; 16]);

impl ScrubId {
    pub const ZERO: ScrubId = ScrubId([0u8; 16]);

    pub fn from_u128(v: u128) -> Self {
        ScrubId(v.to_be_bytes())
    }

    pub fn as_u128(&self) -> u128 {
        u128::from_be_bytes(self.0)
    }
}

impl fmt::Display for ScrubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Caller-assigned fencing token. `0` means "unfenced" — the table's initial
/// value before any `set_role(Master, tag)` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OwnerTag(pub u64);

/// Numbering over a volume's ancestor chain (spec.md §3, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CloneId(pub u32);

/// Role a `ManagedTable` is currently serving in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
}

/// One record: an opaque key plus either a present value or a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: RecordValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordValue {
    Present(Vec<u8>),
    Tombstone,
}

/// Monotonically increasing per-table counters (spec.md §3). `get` may
/// atomically reset them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounters {
    pub total_tlogs_read: u64,
    pub incremental_updates: u64,
    pub full_rebuilds: u64,
}

impl TableCounters {
    pub fn merge_catchup(&mut self, outcome: &crate::catchup::CatchUpOutcome) {
        self.total_tlogs_read += outcome.num_tlogs;
        if outcome.full_rebuild {
            self.full_rebuilds += 1;
        } else {
            self.incremental_updates += 1;
        }
    }
}

/// Mapping from clone-id to a backend handle addressing the namespace of the
/// ancestor at that clone depth (spec.md §3). Built by the Catch-Up Engine
/// from TLog metadata.
#[derive(Debug, Clone, Default)]
pub struct NsidMap {
    entries: std::collections::BTreeMap<CloneId, String>,
}

impl NsidMap {
    pub fn insert(&mut self, clone_id: CloneId, backend_handle: String) {
        self.entries.insert(clone_id, backend_handle);
    }

    pub fn get(&self, clone_id: CloneId) -> Option<&str> {
        self.entries.get(&clone_id).map(|s| s.as_str())
    }
}
