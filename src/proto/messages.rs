//! Per-request-type param/result schemas (spec.md §4.3 table). Each type
//! knows how to encode itself into a request/response body and how to decode
//! itself back out of one.

use super::codec::*;
use super::ErrorType;
use crate::error::Result;
use bytes::BytesMut;

/// One `{key, value}` pair as carried on the wire by `MultiSet`.
#[derive(Debug, Clone)]
pub struct WireRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

fn put_record(buf: &mut BytesMut, r: &WireRecord) {
    put_bytes(buf, &r.key);
    put_bytes(buf, &r.value);
}

fn get_record(buf: &mut &[u8]) -> Result<WireRecord> {
    let key = get_bytes(buf)?;
    let value = get_bytes(buf)?;
    Ok(WireRecord { key, value })
}

fn put_record_list(buf: &mut BytesMut, items: &[WireRecord]) {
    buf.put_u32_le(items.len() as u32);
    for r in items {
        put_record(buf, r);
    }
}

fn get_record_list(buf: &mut &[u8]) -> Result<Vec<WireRecord>> {
    use bytes::Buf;
    let count = buf.get_u32_le() as usize;
    let mut out = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        out.push(get_record(buf)?);
    }
    Ok(out)
}

// ---- 0: Drop ----

pub struct DropParams {
    pub nspace: String,
}

impl DropParams {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_str(&mut buf, &self.nspace);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        Ok(Self {
            nspace: get_str(&mut buf)?,
        })
    }
}

// ---- 1: Clear ----

pub struct ClearParams {
    pub nspace: String,
    pub owner_tag: u64,
}

impl ClearParams {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_str(&mut buf, &self.nspace);
        put_u64(&mut buf, self.owner_tag);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let nspace = get_str(&mut buf)?;
        let owner_tag = get_u64(&mut buf)?;
        Ok(Self { nspace, owner_tag })
    }
}

// ---- 2: List ----

pub struct ListResult {
    pub nspaces: Vec<String>,
}

impl ListResult {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_str_list(&mut buf, &self.nspaces);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        Ok(Self {
            nspaces: get_str_list(&mut buf)?,
        })
    }
}

// ---- 3: MultiGet ----

pub struct MultiGetParams {
    pub nspace: String,
    pub keys: Vec<Vec<u8>>,
}

impl MultiGetParams {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_str(&mut buf, &self.nspace);
        put_bytes_list(&mut buf, &self.keys);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let nspace = get_str(&mut buf)?;
        let keys = get_bytes_list(&mut buf)?;
        Ok(Self { nspace, keys })
    }
}

/// Empty `Vec<u8>` means "absent" (spec.md §4.3 table note).
pub struct MultiGetResult {
    pub values: Vec<Vec<u8>>,
}

impl MultiGetResult {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_bytes_list(&mut buf, &self.values);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        Ok(Self {
            values: get_bytes_list(&mut buf)?,
        })
    }
}

// ---- 4: MultiSet ----

pub struct MultiSetParams {
    pub nspace: String,
    pub barrier: bool,
    pub owner_tag: u64,
    pub records: Vec<WireRecord>,
}

impl MultiSetParams {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_str(&mut buf, &self.nspace);
        put_bool(&mut buf, self.barrier);
        put_u64(&mut buf, self.owner_tag);
        put_record_list(&mut buf, &self.records);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let nspace = get_str(&mut buf)?;
        let barrier = get_bool(&mut buf)?;
        let owner_tag = get_u64(&mut buf)?;
        let records = get_record_list(&mut buf)?;
        Ok(Self {
            nspace,
            barrier,
            owner_tag,
            records,
        })
    }
}

// ---- 5: SetRole ----

pub struct SetRoleParams {
    pub nspace: String,
    pub role: u8,
    pub owner_tag: u64,
}

impl SetRoleParams {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_str(&mut buf, &self.nspace);
        buf.put_u8(self.role);
        put_u64(&mut buf, self.owner_tag);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        use bytes::Buf;
        let nspace = get_str(&mut buf)?;
        if buf.remaining() < 1 {
            return Err(crate::error::MdsError::Protocol("truncated role".into()));
        }
        let role = buf.get_u8();
        let owner_tag = get_u64(&mut buf)?;
        Ok(Self {
            nspace,
            role,
            owner_tag,
        })
    }
}

// ---- 6: GetRole ----

pub struct GetRoleParams {
    pub nspace: String,
}

impl GetRoleParams {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_str(&mut buf, &self.nspace);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        Ok(Self {
            nspace: get_str(&mut buf)?,
        })
    }
}

pub struct GetRoleResult {
    pub role: u8,
}

impl GetRoleResult {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(self.role);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.is_empty() {
            return Err(crate::error::MdsError::Protocol("truncated role".into()));
        }
        Ok(Self { role: buf[0] })
    }
}

// ---- 7: Open ----

pub struct OpenParams {
    pub nspace: String,
}

impl OpenParams {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_str(&mut buf, &self.nspace);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        Ok(Self {
            nspace: get_str(&mut buf)?,
        })
    }
}

// ---- 8: Ping ----

pub struct PingBody {
    pub data: Vec<u8>,
}

impl PingBody {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, &self.data);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        Ok(Self {
            data: get_bytes(&mut buf)?,
        })
    }
}

// ---- 9: ApplyRelocationLogs ----

pub struct ApplyRelocationLogsParams {
    pub nspace: String,
    pub scrub_id: u128,
    pub clone_id: u32,
    pub logs: Vec<String>,
}

impl ApplyRelocationLogsParams {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_str(&mut buf, &self.nspace);
        put_u128(&mut buf, self.scrub_id);
        buf.put_u32_le(self.clone_id);
        put_str_list(&mut buf, &self.logs);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        use bytes::Buf;
        let nspace = get_str(&mut buf)?;
        let scrub_id = get_u128(&mut buf)?;
        if buf.remaining() < 4 {
            return Err(crate::error::MdsError::Protocol("truncated clone_id".into()));
        }
        let clone_id = buf.get_u32_le();
        let logs = get_str_list(&mut buf)?;
        Ok(Self {
            nspace,
            scrub_id,
            clone_id,
            logs,
        })
    }
}

// ---- 10: CatchUp ----

pub struct CatchUpParams {
    pub nspace: String,
    pub dry_run: bool,
}

impl CatchUpParams {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_str(&mut buf, &self.nspace);
        put_bool(&mut buf, self.dry_run);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let nspace = get_str(&mut buf)?;
        let dry_run = get_bool(&mut buf)?;
        Ok(Self { nspace, dry_run })
    }
}

pub struct CatchUpResult {
    pub num_tlogs: u64,
}

impl CatchUpResult {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_u64(&mut buf, self.num_tlogs);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        Ok(Self {
            num_tlogs: get_u64(&mut buf)?,
        })
    }
}

// ---- 11: GetTableCounters ----

pub struct GetTableCountersParams {
    pub nspace: String,
    pub reset: bool,
}

impl GetTableCountersParams {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_str(&mut buf, &self.nspace);
        put_bool(&mut buf, self.reset);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let nspace = get_str(&mut buf)?;
        let reset = get_bool(&mut buf)?;
        Ok(Self { nspace, reset })
    }
}

pub struct TableCountersResult {
    pub total_tlogs_read: u64,
    pub incremental_updates: u64,
    pub full_rebuilds: u64,
}

impl TableCountersResult {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_u64(&mut buf, self.total_tlogs_read);
        put_u64(&mut buf, self.incremental_updates);
        put_u64(&mut buf, self.full_rebuilds);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        Ok(Self {
            total_tlogs_read: get_u64(&mut buf)?,
            incremental_updates: get_u64(&mut buf)?,
            full_rebuilds: get_u64(&mut buf)?,
        })
    }
}

// ---- 12: GetOwnerTag ----

pub struct GetOwnerTagParams {
    pub nspace: String,
}

impl GetOwnerTagParams {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_str(&mut buf, &self.nspace);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        Ok(Self {
            nspace: get_str(&mut buf)?,
        })
    }
}

pub struct GetOwnerTagResult {
    pub owner_tag: u64,
}

impl GetOwnerTagResult {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_u64(&mut buf, self.owner_tag);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        Ok(Self {
            owner_tag: get_u64(&mut buf)?,
        })
    }
}

// ---- Error body ----

pub struct ErrorBody {
    pub error_type: ErrorType,
    pub message: String,
}

impl ErrorBody {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_str(&mut buf, self.error_type.as_str());
        put_str(&mut buf, &self.message);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let tag = get_str(&mut buf)?;
        let message = get_str(&mut buf)?;
        let error_type = match tag.as_str() {
            "OWNER_TAG_MISMATCH" => ErrorType::OwnerTagMismatch,
            "NAMESPACE_GONE" => ErrorType::NamespaceGone,
            "SLAVE_REJECTED_WRITE" => ErrorType::SlaveRejectedWrite,
            _ => ErrorType::Generic,
        };
        Ok(Self {
            error_type,
            message,
        })
    }
}
