//! Managed Table (C7, spec.md §4.7): role + owner-tag state machine wrapped
//! around a Raw Table, with a background catch-up action while in Slave
//! role.
//!
//! The cancellable background task is grounded on the repo's general
//! pattern of a stored `JoinHandle` torn down through a cooperative stop
//! flag plus a `Notify`, the same shape `NamespaceStore`'s moka
//! eviction listener uses to shut a namespace down asynchronously
//! (`libsql-server/src/namespace/store.rs`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::backend::BackendInterface;
use crate::catchup::{CatchUpEngine, CatchUpMode, MetadataStore};
use crate::error::{MdsError, Result};
use crate::model::{Cork, Record, RecordValue, Role, ScrubId, TableCounters};
use crate::table::raw::RawTable;

/// Keys reserved inside the raw table's own column family for the cached
/// metadata store's bookkeeping (spec.md §3 Cork / Scrub id). Namespaced
/// under a leading NUL so they cannot collide with an opaque application
/// key (resolves a spec silence — see DESIGN.md).
const CORK_KEY: &[u8] = b"\0mds/cork";
const SCRUB_ID_KEY: &[u8] = b"\0mds/scrub_id";

struct TableState {
    role: Role,
    owner_tag: u64,
}

struct BackgroundHandle {
    stop: Arc<AtomicBool>,
    notify: Arc<Notify>,
    join: JoinHandle<()>,
}

pub struct ManagedTable {
    namespace: String,
    raw: Arc<RawTable>,
    backend: Arc<dyn BackendInterface>,
    poll_interval: Duration,
    state: RwLock<TableState>,
    counters: Mutex<TableCounters>,
    background: Mutex<Option<BackgroundHandle>>,
    /// Serializes `catch_up`/`apply_relocations` against the background
    /// tick (Design Notes §9): exactly one of "client-requested catch-up",
    /// "client-requested relocation apply", or "background tick" may be
    /// mutating the cached store at a time, else their
    /// `apply_mutations`/`set_local_cork`/`clear` calls interleave and
    /// corrupt cork/scrub-id progress.
    op_lock: tokio::sync::Mutex<()>,
    /// Set by the background task when the backend reports the namespace
    /// gone (spec.md §4.7); `Database` reaps tables in this state instead
    /// of continuing to serve them.
    self_destructed: AtomicBool,
}

impl ManagedTable {
    /// New tables start `{Slave, owner_tag = 0}` (spec.md §3) and, per
    /// spec.md §4.7, immediately schedule a background catch-up action with
    /// a randomized ramp-up so many tables opened at boot don't stampede
    /// the backend at once.
    pub fn new(
        namespace: String,
        raw: Arc<RawTable>,
        backend: Arc<dyn BackendInterface>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        let table = Arc::new(Self {
            namespace,
            raw,
            backend,
            poll_interval,
            state: RwLock::new(TableState {
                role: Role::Slave,
                owner_tag: 0,
            }),
            counters: Mutex::new(TableCounters::default()),
            background: Mutex::new(None),
            op_lock: tokio::sync::Mutex::new(()),
            self_destructed: AtomicBool::new(false),
        });
        let ramp_up = random_ramp_up(poll_interval);
        table.clone().start_background(ramp_up);
        table
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn get_role(&self) -> Role {
        self.state.read().role
    }

    pub fn get_owner_tag(&self) -> u64 {
        self.state.read().owner_tag
    }

    /// `set_role(Master, tag)` / `set_role(Slave, tag)` — spec.md §4.7.
    pub fn set_role(self: &Arc<Self>, new_role: Role, new_owner_tag: u64) {
        let previous_role = {
            let mut state = self.state.write();
            let previous = state.role;
            state.role = new_role;
            state.owner_tag = new_owner_tag;
            previous
        };

        match (previous_role, new_role) {
            (Role::Master, Role::Slave) => self.clone().start_background(Duration::ZERO),
            (Role::Slave, Role::Master) => self.stop_background_and_wait(),
            _ => {}
        }
    }

    /// `multiset` — requires Master role and a matching owner tag
    /// (spec.md §3, §4.7).
    pub fn multiset(&self, records: &[Record], barrier: bool, owner_tag: u64) -> Result<()> {
        self.check_write_precondition(owner_tag)?;
        self.raw.multiset(records, barrier, owner_tag)
    }

    pub fn multiget(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        self.raw.multiget(keys)
    }

    pub fn clear(&self, owner_tag: u64) -> Result<()> {
        self.check_write_precondition(owner_tag)?;
        self.raw.clear(owner_tag)
    }

    fn check_write_precondition(&self, owner_tag: u64) -> Result<()> {
        let state = self.state.read();
        if state.role != Role::Master {
            return Err(MdsError::SlaveRejectedWrite);
        }
        if state.owner_tag != owner_tag {
            return Err(MdsError::OwnerTagMismatch);
        }
        Ok(())
    }

    /// `catch_up(dry_run)` — spec.md §4.7: a no-op when Master.
    pub async fn catch_up(self: &Arc<Self>, dry_run: bool) -> Result<u64> {
        let _guard = self.op_lock.lock().await;
        if self.get_role() == Role::Master {
            return Ok(0);
        }
        let mode = if dry_run {
            CatchUpMode::DryRun
        } else {
            CatchUpMode::IncrementalWithScrubCheck
        };
        let outcome = CatchUpEngine::run(self, self.backend.as_ref(), &self.namespace, mode).await?;
        if !dry_run {
            self.counters.lock().merge_catchup(&outcome);
        }
        Ok(outcome.num_tlogs)
    }

    /// `apply_relocations(scrub_id, clone_id, logs)` — spec.md §4.7.
    pub async fn apply_relocations(
        self: &Arc<Self>,
        scrub_id: ScrubId,
        clone_id: crate::model::CloneId,
        logs: &[String],
    ) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        let current = self.local_scrub_id()?;
        if current == scrub_id {
            return Ok(()); // idempotent no-op, spec.md §4.7 step 2
        }

        let role = self.get_role();
        if role == Role::Master {
            // A Master only accepts a relocation batch whose scrub id
            // already matches; anything else must go through the
            // caller's other (non-slave) apply path instead (spec.md §4.7
            // step 3, Design Notes §9: surface `WrongRole`, do not
            // auto-demote).
            return Err(MdsError::WrongRole);
        }

        let result = self.apply_relocations_as_slave(scrub_id, clone_id, logs).await;
        if result.is_err() {
            // On any failure in slave role, clear the table so the next
            // catch-up rebuilds cleanly (spec.md §4.7 step 4).
            let _ = self.raw.clear(self.get_owner_tag());
        }
        result
    }

    async fn apply_relocations_as_slave(
        self: &Arc<Self>,
        scrub_id: ScrubId,
        clone_id: crate::model::CloneId,
        logs: &[String],
    ) -> Result<()> {
        // Bring the store to a known state before layering relocations on
        // top of it (spec.md §4.7 step 4: "run a catch-up ... then feed the
        // relocation logs").
        CatchUpEngine::run(
            self,
            self.backend.as_ref(),
            &self.namespace,
            CatchUpMode::IncrementalWithScrubCheck,
        )
        .await?;

        let nsid_map = self.backend.resolve_nsid_map(&self.namespace).await?;
        let _ = nsid_map.get(clone_id); // validated existence; actual routing lives in the backend

        for log_name in logs {
            let bytes = self
                .backend
                .fetch_relocation_log(&self.namespace, clone_id, log_name)
                .await?;
            let mutations = decode_relocation_log(&bytes)?;
            self.apply_mutations(&mutations)?;
        }

        self.set_local_scrub_id(scrub_id)?;
        Ok(())
    }

    /// `get_counters(reset)` — spec.md §4.7.
    pub fn get_counters(&self, reset: bool) -> TableCounters {
        let mut counters = self.counters.lock();
        if reset {
            std::mem::take(&mut *counters)
        } else {
            *counters
        }
    }

    fn start_background(self: Arc<Self>, initial_delay: Duration) {
        let stop = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let table = self.clone();
        let stop_clone = stop.clone();
        let notify_clone = notify.clone();

        let join = tokio::spawn(async move {
            if !initial_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(initial_delay) => {}
                    _ = notify_clone.notified() => return,
                }
            }
            loop {
                if stop_clone.load(Ordering::Acquire) {
                    return;
                }
                match table.catch_up(false).await {
                    Ok(_) => {}
                    Err(MdsError::NamespaceGone(ns)) => {
                        tracing::warn!(namespace = %ns, "namespace gone on backend, self-destructing table");
                        table.self_destructed.store(true, Ordering::Release);
                        return;
                    }
                    Err(e) => {
                        tracing::error!(namespace = %table.namespace, error = %e, "background catch-up failed, retrying next tick");
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(table.poll_interval) => {}
                    _ = notify_clone.notified() => return,
                }
            }
        });

        let mut guard = self.background.lock();
        *guard = Some(BackgroundHandle {
            stop,
            notify,
            join,
        });
    }

    fn stop_background_and_wait(&self) {
        let handle = self.background.lock().take();
        if let Some(handle) = handle {
            handle.stop.store(true, Ordering::Release);
            handle.notify.notify_waiters();
            // Synchronously wait for any in-flight tick to finish
            // (spec.md §4.7 Slave->Master transition).
            tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current().block_on(async {
                    let _ = handle.join.await;
                });
            });
        }
    }

    /// Unconditionally stops the background catch-up action, regardless of
    /// current role. Used when the table is being dropped entirely (spec.md
    /// §4.8 `drop(nspace)`) rather than transitioning to Master.
    pub fn shutdown(&self) {
        self.stop_background_and_wait();
    }

    /// Drops the underlying column family through the Raw Table's own lock,
    /// so any operation racing the drop blocks on the family lock rather
    /// than observing a handle the engine has already torn down (spec.md
    /// §3 Raw Table invariant).
    pub fn drop_table(&self) -> Result<()> {
        self.raw.drop_table()
    }

    /// True once the background task has observed `NamespaceGone` on this
    /// table; `Database` reaps tables in this state on every namespace
    /// lookup instead of continuing to serve them (spec.md §4.7).
    pub fn is_self_destructed(&self) -> bool {
        self.self_destructed.load(Ordering::Acquire)
    }
}

impl MetadataStore for ManagedTable {
    fn local_cork(&self) -> Result<Cork> {
        let raw = self.raw.multiget(std::slice::from_ref(&CORK_KEY.to_vec()))?;
        Ok(match raw.into_iter().next().flatten() {
            Some(bytes) if bytes.len() == 16 => {
                let arr: [u8; 16] = bytes.try_into().unwrap();
                Cork(arr)
            }
            _ => Cork::ZERO,
        })
    }

    fn local_scrub_id(&self) -> Result<ScrubId> {
        let raw = self
            .raw
            .multiget(std::slice::from_ref(&SCRUB_ID_KEY.to_vec()))?;
        Ok(match raw.into_iter().next().flatten() {
            Some(bytes) if bytes.len() == 16 => {
                let arr: [u8; 16] = bytes.try_into().unwrap();
                ScrubId(arr)
            }
            _ => ScrubId::ZERO,
        })
    }

    fn set_local_cork(&self, cork: Cork) -> Result<()> {
        let record = Record {
            key: CORK_KEY.to_vec(),
            value: RecordValue::Present(cork.0.to_vec()),
        };
        self.raw.multiset(&[record], false, self.get_owner_tag())
    }

    fn set_local_scrub_id(&self, scrub_id: ScrubId) -> Result<()> {
        let record = Record {
            key: SCRUB_ID_KEY.to_vec(),
            value: RecordValue::Present(scrub_id.0.to_vec()),
        };
        self.raw.multiset(&[record], false, self.get_owner_tag())
    }

    fn apply_mutations(&self, mutations: &[Record]) -> Result<()> {
        self.raw.multiset(mutations, false, self.get_owner_tag())
    }

    fn clear(&self) -> Result<()> {
        self.raw.clear(self.get_owner_tag())
    }
}

fn random_ramp_up(poll_interval: Duration) -> Duration {
    if poll_interval.is_zero() {
        return Duration::ZERO;
    }
    let millis = poll_interval.as_millis().max(1) as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..millis))
}

fn decode_relocation_log(bytes: &[u8]) -> Result<Vec<Record>> {
    use bytes::Buf;
    let mut buf = bytes;
    let mut mutations = Vec::new();
    while buf.remaining() >= 4 {
        let key_len = buf.get_u32_le() as usize;
        if buf.remaining() < key_len + 1 {
            return Err(MdsError::Generic("truncated relocation log entry".into()));
        }
        let key = buf[..key_len].to_vec();
        buf.advance(key_len);
        let is_tombstone = buf.get_u8() != 0;
        let value = if is_tombstone {
            RecordValue::Tombstone
        } else {
            if buf.remaining() < 4 {
                return Err(MdsError::Generic("truncated relocation log value length".into()));
            }
            let value_len = buf.get_u32_le() as usize;
            if buf.remaining() < value_len {
                return Err(MdsError::Generic("truncated relocation log value".into()));
            }
            let v = buf[..value_len].to_vec();
            buf.advance(value_len);
            RecordValue::Present(v)
        };
        mutations.push(Record { key, value });
    }
    Ok(mutations)
}
