//! Wire protocol: fixed headers plus schema-described bodies (spec.md §4.3).
//!
//! The header layout is fixed-size and ABI-sensitive (shared verbatim between
//! client and server), so it is hand-packed rather than routed through a
//! generic serialization crate — the same judgment call the repo makes for
//! `bottomless`'s S3 object-key and checksum framing.

pub mod codec;
pub mod messages;

use bytes::{Buf, BufMut, BytesMut};

/// `0xB0A710AD`, little-endian on the wire, checked on both request and
/// response headers.
pub const MAGIC: u64 = 0xB0A710AD;

pub const REQUEST_HEADER_LEN: usize = 64;
pub const RESPONSE_HEADER_LEN: usize = 32;

/// Response `type` values (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Ok = 1000,
    UnknownRequest = 1001,
    ProtocolError = 1002,
    Error = 1003,
}

impl ResponseType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1000 => Some(Self::Ok),
            1001 => Some(Self::UnknownRequest),
            1002 => Some(Self::ProtocolError),
            1003 => Some(Self::Error),
            _ => None,
        }
    }
}

/// Flag bit 0 of the response header: the body lives in `in_region` at
/// offset 0, not inband.
pub const FLAG_USE_SHMEM: u32 = 1 << 0;

/// `error_type` values carried in an `Error` response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    OwnerTagMismatch,
    NamespaceGone,
    SlaveRejectedWrite,
    Generic,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::OwnerTagMismatch => "OWNER_TAG_MISMATCH",
            ErrorType::NamespaceGone => "NAMESPACE_GONE",
            ErrorType::SlaveRejectedWrite => "SLAVE_REJECTED_WRITE",
            ErrorType::Generic => "GENERIC",
        }
    }
}

/// Request types dispatched on by the table in `transport::dispatch` (spec.md
/// §4.3, Design Notes §9: dispatch is table-driven, indexed by this
/// discriminant rather than a `match` chain).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RequestType {
    Drop = 0,
    Clear = 1,
    List = 2,
    MultiGet = 3,
    MultiSet = 4,
    SetRole = 5,
    GetRole = 6,
    Open = 7,
    Ping = 8,
    ApplyRelocationLogs = 9,
    CatchUp = 10,
    GetTableCounters = 11,
    GetOwnerTag = 12,
}

pub const NUM_REQUEST_TYPES: usize = 13;

impl RequestType {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::Drop,
            1 => Self::Clear,
            2 => Self::List,
            3 => Self::MultiGet,
            4 => Self::MultiSet,
            5 => Self::SetRole,
            6 => Self::GetRole,
            7 => Self::Open,
            8 => Self::Ping,
            9 => Self::ApplyRelocationLogs,
            10 => Self::CatchUp,
            11 => Self::GetTableCounters,
            12 => Self::GetOwnerTag,
            _ => return None,
        })
    }
}

/// Fixed 64-byte request header.
#[derive(Debug, Clone, Copy)]
pub struct RequestHeader {
    pub magic: u64,
    pub r#type: u32,
    pub body_size: u64,
    pub tag: u64,
    pub out_region: u64,
    pub out_offset: u64,
    pub in_region: u64,
    pub in_offset: u64,
}

impl RequestHeader {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.magic);
        buf.put_u32_le(self.r#type);
        buf.put_u32_le(0); // _pad
        buf.put_u64_le(self.body_size);
        buf.put_u64_le(self.tag);
        buf.put_u64_le(self.out_region);
        buf.put_u64_le(self.out_offset);
        buf.put_u64_le(self.in_region);
        buf.put_u64_le(self.in_offset);
        debug_assert_eq!(buf.len(), REQUEST_HEADER_LEN);
    }

    pub fn decode(mut buf: &[u8]) -> crate::error::Result<Self> {
        if buf.len() != REQUEST_HEADER_LEN {
            return Err(crate::error::MdsError::Protocol(format!(
                "request header must be {REQUEST_HEADER_LEN} bytes, got {}",
                buf.len()
            )));
        }
        let magic = buf.get_u64_le();
        let r#type = buf.get_u32_le();
        let _pad = buf.get_u32_le();
        let body_size = buf.get_u64_le();
        let tag = buf.get_u64_le();
        let out_region = buf.get_u64_le();
        let out_offset = buf.get_u64_le();
        let in_region = buf.get_u64_le();
        let in_offset = buf.get_u64_le();
        Ok(Self {
            magic,
            r#type,
            body_size,
            tag,
            out_region,
            out_offset,
            in_region,
            in_offset,
        })
    }

    pub fn wants_shmem_body(&self) -> bool {
        self.out_region != 0
    }

    pub fn wants_shmem_response(&self) -> bool {
        self.in_region != 0
    }
}

/// Fixed 32-byte response header.
#[derive(Debug, Clone, Copy)]
pub struct ResponseHeader {
    pub magic: u64,
    pub r#type: u32,
    pub flags: u32,
    pub body_size: u64,
    pub tag: u64,
}

impl ResponseHeader {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.magic);
        buf.put_u32_le(self.r#type);
        buf.put_u32_le(self.flags);
        buf.put_u64_le(self.body_size);
        buf.put_u64_le(self.tag);
        debug_assert_eq!(buf.len(), RESPONSE_HEADER_LEN);
    }

    pub fn decode(mut buf: &[u8]) -> crate::error::Result<Self> {
        if buf.len() != RESPONSE_HEADER_LEN {
            return Err(crate::error::MdsError::Protocol(format!(
                "response header must be {RESPONSE_HEADER_LEN} bytes, got {}",
                buf.len()
            )));
        }
        let magic = buf.get_u64_le();
        let r#type = buf.get_u32_le();
        let flags = buf.get_u32_le();
        let body_size = buf.get_u64_le();
        let tag = buf.get_u64_le();
        Ok(Self {
            magic,
            r#type,
            flags,
            body_size,
            tag,
        })
    }
}
