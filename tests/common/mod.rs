//! Shared test fixtures: an in-memory stand-in for the object-storage
//! backend the Catch-Up Engine (C6) talks to.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use mds::backend::{BackendInterface, TLogEntry, TLogHandle};
use mds::error::{MdsError, Result};
use mds::model::{CloneId, Cork, NsidMap, Record, RecordValue, ScrubId};

struct NamespaceState {
    tlogs: Vec<(Cork, Vec<Record>)>,
    scrub_id: ScrubId,
    relocation_logs: HashMap<String, Vec<Record>>,
    exists: bool,
}

pub struct FakeBackend {
    namespaces: Mutex<HashMap<String, NamespaceState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            namespaces: Mutex::new(HashMap::new()),
        }
    }

    fn ensure(&self, namespace: &str) {
        self.namespaces
            .lock()
            .unwrap()
            .entry(namespace.to_string())
            .or_insert_with(|| NamespaceState {
                tlogs: Vec::new(),
                scrub_id: ScrubId::ZERO,
                relocation_logs: HashMap::new(),
                exists: true,
            });
    }

    /// Appends a TLog carrying `mutations`, returning its freshly minted cork.
    pub fn push_tlog(&self, namespace: &str, mutations: Vec<Record>) -> Cork {
        self.ensure(namespace);
        let mut guard = self.namespaces.lock().unwrap();
        let state = guard.get_mut(namespace).unwrap();
        let cork = Cork::from_u128(state.tlogs.len() as u128 + 1);
        state.tlogs.push((cork, mutations));
        cork
    }

    pub fn set_scrub_id(&self, namespace: &str, scrub_id: ScrubId) {
        self.ensure(namespace);
        self.namespaces.lock().unwrap().get_mut(namespace).unwrap().scrub_id = scrub_id;
    }

    pub fn put_relocation_log(&self, namespace: &str, log_name: &str, mutations: Vec<Record>) {
        self.ensure(namespace);
        self.namespaces
            .lock()
            .unwrap()
            .get_mut(namespace)
            .unwrap()
            .relocation_logs
            .insert(log_name.to_string(), mutations);
    }

    pub fn delete_namespace(&self, namespace: &str) {
        self.ensure(namespace);
        self.namespaces.lock().unwrap().get_mut(namespace).unwrap().exists = false;
    }
}

fn encode(mutations: &[Record]) -> Vec<u8> {
    use bytes::BufMut;
    let mut buf = bytes::BytesMut::new();
    for record in mutations {
        buf.put_u32_le(record.key.len() as u32);
        buf.put_slice(&record.key);
        match &record.value {
            RecordValue::Present(v) => {
                buf.put_u8(0);
                buf.put_u32_le(v.len() as u32);
                buf.put_slice(v);
            }
            RecordValue::Tombstone => buf.put_u8(1),
        }
    }
    buf.to_vec()
}

#[async_trait]
impl BackendInterface for FakeBackend {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        Ok(self
            .namespaces
            .lock()
            .unwrap()
            .get(namespace)
            .map(|s| s.exists)
            .unwrap_or(true))
    }

    async fn current_scrub_id(&self, namespace: &str) -> Result<ScrubId> {
        self.ensure(namespace);
        Ok(self.namespaces.lock().unwrap()[namespace].scrub_id)
    }

    async fn tip_cork(&self, namespace: &str) -> Result<Cork> {
        self.ensure(namespace);
        Ok(self.namespaces.lock().unwrap()[namespace]
            .tlogs
            .last()
            .map(|(c, _)| *c)
            .unwrap_or(Cork::ZERO))
    }

    async fn list_tlogs_since(&self, namespace: &str, since: Option<Cork>) -> Result<Vec<TLogHandle>> {
        self.ensure(namespace);
        let guard = self.namespaces.lock().unwrap();
        let state = &guard[namespace];
        let mut parent = None;
        let mut handles: Vec<TLogHandle> = state
            .tlogs
            .iter()
            .map(|(cork, _)| {
                let h = TLogHandle {
                    namespace: namespace.to_string(),
                    cork: *cork,
                    parent,
                };
                parent = Some(*cork);
                h
            })
            .collect();
        if let Some(since) = since {
            if let Some(pos) = handles.iter().position(|h| h.cork == since) {
                handles.drain(..=pos);
            }
        }
        Ok(handles)
    }

    async fn fetch_tlog(&self, handle: &TLogHandle) -> Result<TLogEntry> {
        let guard = self.namespaces.lock().unwrap();
        let state = &guard[&handle.namespace];
        let (_, mutations) = state
            .tlogs
            .iter()
            .find(|(c, _)| *c == handle.cork)
            .ok_or_else(|| MdsError::Generic("no such tlog".into()))?;
        Ok(TLogEntry {
            cork: handle.cork,
            mutations: mutations.clone(),
        })
    }

    async fn resolve_nsid_map(&self, namespace: &str) -> Result<NsidMap> {
        let mut map = NsidMap::default();
        map.insert(CloneId(0), namespace.to_string());
        Ok(map)
    }

    async fn fetch_relocation_log(&self, namespace: &str, _clone_id: CloneId, log_name: &str) -> Result<Vec<u8>> {
        let guard = self.namespaces.lock().unwrap();
        let mutations = guard[namespace]
            .relocation_logs
            .get(log_name)
            .ok_or_else(|| MdsError::Generic("no such relocation log".into()))?;
        Ok(encode(mutations))
    }
}
