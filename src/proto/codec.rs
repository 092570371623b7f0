//! Length-prefixed primitive encode/decode helpers shared by every request
//! and response body in `messages.rs`. All length prefixes are `u32`
//! little-endian, matching the fixed-header's own little-endian byte order.

use crate::error::{MdsError, Result};
use bytes::{Buf, BufMut, BytesMut};

pub fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(data);
}

pub fn put_str(buf: &mut BytesMut, s: &str) {
    put_bytes(buf, s.as_bytes());
}

pub fn get_bytes(buf: &mut &[u8]) -> Result<Vec<u8>> {
    if buf.remaining() < 4 {
        return Err(MdsError::Protocol("truncated length prefix".into()));
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(MdsError::Protocol("truncated body field".into()));
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

pub fn get_str(buf: &mut &[u8]) -> Result<String> {
    let bytes = get_bytes(buf)?;
    String::from_utf8(bytes).map_err(|e| MdsError::Protocol(format!("invalid utf-8: {e}")))
}

pub fn put_bytes_list(buf: &mut BytesMut, items: &[Vec<u8>]) {
    buf.put_u32_le(items.len() as u32);
    for item in items {
        put_bytes(buf, item);
    }
}

pub fn get_bytes_list(buf: &mut &[u8]) -> Result<Vec<Vec<u8>>> {
    if buf.remaining() < 4 {
        return Err(MdsError::Protocol("truncated list length".into()));
    }
    let count = buf.get_u32_le() as usize;
    let mut out = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        out.push(get_bytes(buf)?);
    }
    Ok(out)
}

pub fn put_str_list(buf: &mut BytesMut, items: &[String]) {
    buf.put_u32_le(items.len() as u32);
    for item in items {
        put_str(buf, item);
    }
}

pub fn get_str_list(buf: &mut &[u8]) -> Result<Vec<String>> {
    if buf.remaining() < 4 {
        return Err(MdsError::Protocol("truncated list length".into()));
    }
    let count = buf.get_u32_le() as usize;
    let mut out = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        out.push(get_str(buf)?);
    }
    Ok(out)
}

pub fn put_u64(buf: &mut BytesMut, v: u64) {
    buf.put_u64_le(v);
}

pub fn get_u64(buf: &mut &[u8]) -> Result<u64> {
    if buf.remaining() < 8 {
        return Err(MdsError::Protocol("truncated u64".into()));
    }
    Ok(buf.get_u64_le())
}

pub fn put_u128(buf: &mut BytesMut, v: u128) {
    buf.put_u128_le(v);
}

pub fn get_u128(buf: &mut &[u8]) -> Result<u128> {
    if buf.remaining() < 16 {
        return Err(MdsError::Protocol("truncated u128".into()));
    }
    Ok(buf.get_u128_le())
}

pub fn put_bool(buf: &mut BytesMut, v: bool) {
    buf.put_u8(v as u8);
}

pub fn get_bool(buf: &mut &[u8]) -> Result<bool> {
    if buf.remaining() < 1 {
        return Err(MdsError::Protocol("truncated bool".into()));
    }
    Ok(buf.get_u8() != 0)
}
