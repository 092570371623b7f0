//! `BackendInterface`: the abstract object-storage collaborator the Catch-Up
//! Engine (C6) pulls TLogs and relocation logs through (spec.md §1, §4.6).
//! The MDS only ever consumes this trait; everything about volume
//! lifecycle, clone chains, and scrub generation on the backend side is
//! external.
//!
//! The S3 implementation is grounded directly on
//! `bottomless::replicator::Replicator`: the same `aws-config`/`aws-sdk-s3`
//! client construction from environment variables, the same
//! prefix-scoped `list_objects`, and the same idea of deriving a
//! monotonic, chronologically-sortable identifier from a UUIDv7 timestamp
//! (there: "generation"; here: `Cork`).

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::Client;

use crate::error::{MdsError, Result};
use crate::model::{CloneId, Cork, NsidMap, Record, RecordValue, ScrubId};

/// One TLog as seen on the backend: its own cork, and the cork it was
/// appended after (`parent`, `None` for the namespace root).
#[derive(Debug, Clone)]
pub struct TLogHandle {
    pub namespace: String,
    pub cork: Cork,
    pub parent: Option<Cork>,
}

/// A TLog's payload: a sequence of cluster-map updates for a namespace
/// (GLOSSARY), expressed here as the same `Record` puts/tombstones the Raw
/// Table persists.
#[derive(Debug, Clone)]
pub struct TLogEntry {
    pub cork: Cork,
    pub mutations: Vec<Record>,
}

#[async_trait]
pub trait BackendInterface: Send + Sync {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool>;

    /// The scrub id currently tagging the backend's relocation output for
    /// this namespace.
    async fn current_scrub_id(&self, namespace: &str) -> Result<ScrubId>;

    /// The cork of the newest TLog known to the backend.
    async fn tip_cork(&self, namespace: &str) -> Result<Cork>;

    /// Lists TLogs newer than `since` (exclusive), oldest first. When
    /// `since` is `None`, lists the full chain from the namespace root.
    async fn list_tlogs_since(
        &self,
        namespace: &str,
        since: Option<Cork>,
    ) -> Result<Vec<TLogHandle>>;

    async fn fetch_tlog(&self, handle: &TLogHandle) -> Result<TLogEntry>;

    /// Resolves the clone-id -> ancestor-namespace-handle mapping used to
    /// address relocation log chunks (spec.md §3 NSIDMap).
    async fn resolve_nsid_map(&self, namespace: &str) -> Result<NsidMap>;

    async fn fetch_relocation_log(
        &self,
        namespace: &str,
        clone_id: CloneId,
        log_name: &str,
    ) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct S3BackendOptions {
    pub bucket_name: String,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl S3BackendOptions {
    /// Mirrors `bottomless::replicator::Options::from_env`'s
    /// env-var-with-fallback style, under an `MDS_BACKEND_*` prefix.
    pub fn from_env() -> Result<Self> {
        fn env_var(key: &str) -> Option<String> {
            std::env::var(key).ok().filter(|v| !v.trim().is_empty())
        }

        Ok(Self {
            bucket_name: env_var("MDS_BACKEND_BUCKET").unwrap_or_else(|| "mds-metadata".into()),
            endpoint: env_var("MDS_BACKEND_ENDPOINT"),
            region: env_var("MDS_BACKEND_REGION"),
            access_key_id: env_var("MDS_BACKEND_AWS_ACCESS_KEY_ID"),
            secret_access_key: env_var("MDS_BACKEND_AWS_SECRET_ACCESS_KEY"),
        })
    }
}

pub struct S3Backend {
    client: Client,
    bucket: String,
}

impl S3Backend {
    pub async fn new(options: S3BackendOptions) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(endpoint) = options.endpoint.as_deref() {
            loader = loader.endpoint_url(endpoint);
        }
        if let Some(region) = options.region.clone() {
            loader = loader.region(Region::new(region));
        }
        if let (Some(key), Some(secret)) = (
            options.access_key_id.clone(),
            options.secret_access_key.clone(),
        ) {
            loader = loader.credentials_provider(Credentials::new(key, secret, None, None, "mds"));
        }
        let config = loader.load().await;
        let client = Client::new(&config);
        Ok(Self {
            client,
            bucket: options.bucket_name,
        })
    }

    fn tlog_prefix(&self, namespace: &str) -> String {
        format!("{namespace}/tlogs/")
    }

    fn tlog_key(&self, namespace: &str, cork: &Cork) -> String {
        format!("{}{}", self.tlog_prefix(namespace), cork)
    }

    fn scrub_id_key(&self, namespace: &str) -> String {
        format!("{namespace}/.scrub_id")
    }
}

#[async_trait]
impl BackendInterface for S3Backend {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(format!("{namespace}/"))
            .max_keys(1)
            .send()
            .await
            .map_err(|e| MdsError::Generic(format!("backend list_objects failed: {e}")))?;
        Ok(resp.contents().len() > 0 || resp.key_count().unwrap_or(0) > 0)
    }

    async fn current_scrub_id(&self, namespace: &str) -> Result<ScrubId> {
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.scrub_id_key(namespace))
            .send()
            .await
        {
            Ok(obj) => {
                let bytes = obj
                    .body
                    .collect()
                    .await
                    .map_err(|e| MdsError::Generic(format!("reading scrub id: {e}")))?
                    .into_bytes();
                let arr: [u8; 16] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| MdsError::Generic("malformed scrub id object".into()))?;
                Ok(ScrubId(arr))
            }
            Err(_) => Ok(ScrubId::ZERO),
        }
    }

    async fn tip_cork(&self, namespace: &str) -> Result<Cork> {
        let handles = self.list_tlogs_since(namespace, None).await?;
        Ok(handles.last().map(|h| h.cork).unwrap_or(Cork::ZERO))
    }

    async fn list_tlogs_since(
        &self,
        namespace: &str,
        since: Option<Cork>,
    ) -> Result<Vec<TLogHandle>> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.tlog_prefix(namespace))
            .send()
            .await
            .map_err(|e| MdsError::Generic(format!("backend list_objects failed: {e}")))?;

        let mut handles: Vec<TLogHandle> = Vec::new();
        let mut prev: Option<Cork> = None;
        for obj in resp.contents() {
            let Some(key) = obj.key() else { continue };
            let Some(hex_part) = key.rsplit('/').next() else {
                continue;
            };
            let Ok(bytes) = hex::decode(hex_part) else {
                continue;
            };
            let Ok(arr) = <[u8; 16]>::try_from(bytes.as_slice()) else {
                continue;
            };
            let cork = Cork(arr);
            handles.push(TLogHandle {
                namespace: namespace.to_string(),
                cork,
                parent: prev,
            });
            prev = Some(cork);
        }

        // Keys are listed in lexicographic (= chronological, since corks are
        // derived from timestamp-ordered ids) order already; filter to the
        // suffix strictly after `since`.
        if let Some(since) = since {
            if let Some(pos) = handles.iter().position(|h| h.cork == since) {
                handles.drain(..=pos);
            }
        }
        Ok(handles)
    }

    async fn fetch_tlog(&self, handle: &TLogHandle) -> Result<TLogEntry> {
        let key = self.tlog_key(&handle.namespace, &handle.cork);
        let obj = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| MdsError::Generic(format!("fetch tlog {key}: {e}")))?;
        let bytes = obj
            .body
            .collect()
            .await
            .map_err(|e| MdsError::Generic(format!("reading tlog {key}: {e}")))?
            .into_bytes();
        decode_tlog_entry(handle.cork, &bytes)
    }

    async fn resolve_nsid_map(&self, namespace: &str) -> Result<NsidMap> {
        // In a full volume driver this walks the clone chain metadata
        // embedded in the oldest TLog; the MDS only needs the resulting
        // clone-id -> backend-handle mapping, so this returns an
        // identity mapping rooted at the namespace itself when no deeper
        // clone metadata has been observed yet.
        let mut map = NsidMap::default();
        map.insert(CloneId(0), namespace.to_string());
        Ok(map)
    }

    async fn fetch_relocation_log(
        &self,
        namespace: &str,
        clone_id: CloneId,
        log_name: &str,
    ) -> Result<Vec<u8>> {
        let key = format!("{namespace}/relocations/{}/{log_name}", clone_id.0);
        let obj = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| MdsError::Generic(format!("fetch relocation log {key}: {e}")))?;
        let bytes = obj
            .body
            .collect()
            .await
            .map_err(|e| MdsError::Generic(format!("reading relocation log {key}: {e}")))?
            .into_bytes();
        Ok(bytes.to_vec())
    }
}

/// TLog wire format: a flat sequence of `{key_len, key, is_tombstone,
/// [value_len, value]}` records. Not specified by spec.md (an external
/// backend concern); this is this crate's own choice of encoding for the
/// object body the S3 backend round-trips.
fn decode_tlog_entry(cork: Cork, bytes: &[u8]) -> Result<TLogEntry> {
    use bytes::Buf;
    let mut buf = bytes;
    let mut mutations = Vec::new();
    while buf.remaining() >= 4 {
        let key_len = buf.get_u32_le() as usize;
        if buf.remaining() < key_len + 1 {
            return Err(MdsError::Generic("truncated tlog entry".into()));
        }
        let key = buf[..key_len].to_vec();
        buf.advance(key_len);
        let is_tombstone = buf.get_u8() != 0;
        let value = if is_tombstone {
            RecordValue::Tombstone
        } else {
            if buf.remaining() < 4 {
                return Err(MdsError::Generic("truncated tlog value length".into()));
            }
            let value_len = buf.get_u32_le() as usize;
            if buf.remaining() < value_len {
                return Err(MdsError::Generic("truncated tlog value".into()));
            }
            let v = buf[..value_len].to_vec();
            buf.advance(value_len);
            RecordValue::Present(v)
        };
        mutations.push(Record { key, value });
    }
    Ok(TLogEntry { cork, mutations })
}
