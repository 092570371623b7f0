//! Table capability interfaces (Design Notes §9): `TableOps` abstracts over
//! a locally-served `ManagedTable` and a remote, client-backed table so the
//! rest of the crate (and anything built on top of it) doesn't need to care
//! which one it's talking to.

pub mod managed;
pub mod raw;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{CloneId, Record, Role, ScrubId, TableCounters};

#[async_trait]
pub trait TableOps: Send + Sync {
    fn namespace(&self) -> &str;
    fn get_role(&self) -> Role;
    fn get_owner_tag(&self) -> u64;
    fn set_role(&self, role: Role, owner_tag: u64);
    fn multiset(&self, records: &[Record], barrier: bool, owner_tag: u64) -> Result<()>;
    fn multiget(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>>;
    fn clear(&self, owner_tag: u64) -> Result<()>;
    async fn catch_up(&self, dry_run: bool) -> Result<u64>;
    async fn apply_relocations(
        &self,
        scrub_id: ScrubId,
        clone_id: CloneId,
        logs: &[String],
    ) -> Result<()>;
    fn get_counters(&self, reset: bool) -> TableCounters;
}

#[async_trait]
impl TableOps for std::sync::Arc<managed::ManagedTable> {
    fn namespace(&self) -> &str {
        managed::ManagedTable::namespace(self)
    }

    fn get_role(&self) -> Role {
        managed::ManagedTable::get_role(self)
    }

    fn get_owner_tag(&self) -> u64 {
        managed::ManagedTable::get_owner_tag(self)
    }

    fn set_role(&self, role: Role, owner_tag: u64) {
        managed::ManagedTable::set_role(self, role, owner_tag)
    }

    fn multiset(&self, records: &[Record], barrier: bool, owner_tag: u64) -> Result<()> {
        managed::ManagedTable::multiset(self, records, barrier, owner_tag)
    }

    fn multiget(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        managed::ManagedTable::multiget(self, keys)
    }

    fn clear(&self, owner_tag: u64) -> Result<()> {
        managed::ManagedTable::clear(self, owner_tag)
    }

    async fn catch_up(&self, dry_run: bool) -> Result<u64> {
        managed::ManagedTable::catch_up(self, dry_run).await
    }

    async fn apply_relocations(
        &self,
        scrub_id: ScrubId,
        clone_id: CloneId,
        logs: &[String],
    ) -> Result<()> {
        managed::ManagedTable::apply_relocations(self, scrub_id, clone_id, logs).await
    }

    fn get_counters(&self, reset: bool) -> TableCounters {
        managed::ManagedTable::get_counters(self, reset)
    }
}
