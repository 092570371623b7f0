//! Transport (C4, spec.md §4.4): the client side — a single mutex-guarded
//! connection, reusing a pair of pre-reserved shared-memory regions across
//! calls and falling back to inband bodies when a call doesn't fit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::Mutex;

use crate::error::{MdsError, Result};
use crate::model::{CloneId, Record, RecordValue, Role, ScrubId};
use crate::proto::messages::*;
use crate::proto::{
    RequestHeader, RequestType, ResponseHeader, ResponseType, FLAG_USE_SHMEM, MAGIC,
    REQUEST_HEADER_LEN, RESPONSE_HEADER_LEN,
};
use crate::shmem::SharedMemoryRegion;

/// Size of the shmem regions a client reserves at connect time (spec.md
/// §4.2). Calls whose body or response overruns this fall back to inband
/// framing and bump `shmem_overruns`.
const DEFAULT_SHMEM_SIZE: usize = 8 * 1024;

enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Stream {
    async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(s) => s.read_exact(buf).await.map(|_| ()),
            Stream::Unix(s) => s.read_exact(buf).await.map(|_| ()),
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(s) => s.write_all(buf).await,
            Stream::Unix(s) => s.write_all(buf).await,
        }
    }
}

struct Connection {
    stream: Stream,
    out_region: SharedMemoryRegion,
    in_region: SharedMemoryRegion,
    shmem_overruns: u64,
}

/// Address of an MDS node as seen by a client: a host/port pair, plus
/// whether to prefer the local Unix abstract-namespace socket over TCP.
#[derive(Debug, Clone)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
    /// Skips the abstract-socket fast path even if `host` looks local
    /// (spec.md §4.4 local-vs-remote override).
    pub force_remote: bool,
}

impl NodeAddress {
    pub fn is_local(&self) -> bool {
        !self.force_remote
            && matches!(self.host.as_str(), "localhost" | "127.0.0.1" | "::1" | "0.0.0.0")
    }
}

pub struct MdsClient {
    addr: NodeAddress,
    timeout: Option<Duration>,
    conn: Mutex<Option<Connection>>,
    next_tag: AtomicU64,
}

impl MdsClient {
    pub fn new(addr: NodeAddress, timeout: Option<Duration>) -> Self {
        Self {
            addr,
            timeout,
            conn: Mutex::new(None),
            next_tag: AtomicU64::new(1),
        }
    }

    async fn connect(&self) -> Result<Connection> {
        let stream = if self.addr.is_local() {
            let unix_addr = std::os::unix::net::SocketAddr::from_abstract_name(
                format!("ovs.locorem:{}", self.addr.port).as_bytes(),
            )?;
            // `tokio::net::UnixStream` has no `connect_addr`; abstract-namespace
            // addresses are a `std`-only construct, so connect on std and hand
            // the fd to tokio via `from_std`.
            match std::os::unix::net::UnixStream::connect_addr(&unix_addr) {
                Ok(s) => {
                    s.set_nonblocking(true)?;
                    Stream::Unix(UnixStream::from_std(s)?)
                }
                Err(_) => {
                    Stream::Tcp(TcpStream::connect((self.addr.host.as_str(), self.addr.port)).await?)
                }
            }
        } else {
            Stream::Tcp(TcpStream::connect((self.addr.host.as_str(), self.addr.port)).await?)
        };

        let out_region = SharedMemoryRegion::create(DEFAULT_SHMEM_SIZE)?;
        let in_region = SharedMemoryRegion::create(DEFAULT_SHMEM_SIZE)?;
        Ok(Connection {
            stream,
            out_region,
            in_region,
            shmem_overruns: 0,
        })
    }

    async fn call(&self, req_type: RequestType, body: BytesMut) -> Result<Bytes> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let conn = guard.as_mut().unwrap();
        match Self::call_on(conn, req_type, body, self.timeout).await {
            Ok(v) => Ok(v),
            Err(MdsError::Transport(e)) => {
                // A transport-level failure invalidates the connection;
                // drop it so the next call reconnects from scratch.
                *guard = None;
                Err(MdsError::Transport(e))
            }
            Err(e) => Err(e),
        }
    }

    async fn call_on(
        conn: &mut Connection,
        req_type: RequestType,
        body: BytesMut,
        timeout: Option<Duration>,
    ) -> Result<Bytes> {
        let tag = 0; // single in-flight request per connection; the tag just echoes.
        let use_out_shmem = body.len() <= conn.out_region.size();
        if use_out_shmem {
            conn.out_region.write_at(0, &body)?;
        } else {
            conn.shmem_overruns += 1;
        }

        let header = RequestHeader {
            magic: MAGIC,
            r#type: req_type as u32,
            body_size: body.len() as u64,
            tag,
            out_region: if use_out_shmem { conn.out_region.id } else { 0 },
            out_offset: 0,
            in_region: conn.in_region.id,
            in_offset: 0,
        };
        let mut out = BytesMut::with_capacity(REQUEST_HEADER_LEN + if use_out_shmem { 0 } else { body.len() });
        header.encode(&mut out);
        if !use_out_shmem {
            out.extend_from_slice(&body);
        }

        Self::io_with_timeout(conn.stream.write_all(&out), timeout).await?;

        let mut resp_header_buf = [0u8; RESPONSE_HEADER_LEN];
        Self::io_with_timeout(conn.stream.read_exact(&mut resp_header_buf), timeout).await?;
        let resp_header = ResponseHeader::decode(&resp_header_buf)?;
        if resp_header.magic != MAGIC {
            return Err(MdsError::Protocol("bad magic in response".into()));
        }

        let body = if resp_header.flags & FLAG_USE_SHMEM != 0 {
            conn.in_region
                .read_at(0, resp_header.body_size as usize)?
                .to_vec()
        } else {
            let mut buf = vec![0u8; resp_header.body_size as usize];
            Self::io_with_timeout(conn.stream.read_exact(&mut buf), timeout).await?;
            buf
        };

        match ResponseType::from_u32(resp_header.r#type) {
            Some(ResponseType::Ok) => Ok(Bytes::from(body)),
            Some(ResponseType::Error) => {
                let err = ErrorBody::decode(&body)?;
                // `error_type=OWNER_TAG_MISMATCH` maps to a distinct
                // client-side error class; every other tag collapses to a
                // generic I/O-style error (spec.md §4.3).
                Err(match err.error_type {
                    crate::proto::ErrorType::OwnerTagMismatch => MdsError::OwnerTagMismatch,
                    _ => MdsError::Generic(format!("{}: {}", err.error_type.as_str(), err.message)),
                })
            }
            Some(ResponseType::UnknownRequest) => {
                Err(MdsError::Protocol("server does not recognize this request type".into()))
            }
            Some(ResponseType::ProtocolError) | None => {
                Err(MdsError::Protocol("protocol error response".into()))
            }
        }
    }

    async fn io_with_timeout<F, T>(fut: F, timeout: Option<Duration>) -> Result<T>
    where
        F: std::future::Future<Output = std::io::Result<T>>,
    {
        let result = match timeout {
            Some(d) => tokio::time::timeout(d, fut).await.map_err(|_| {
                MdsError::Transport(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "call timed out",
                ))
            })??,
            None => fut.await?,
        };
        Ok(result)
    }

    pub async fn shmem_overruns(&self) -> u64 {
        self.conn.lock().await.as_ref().map(|c| c.shmem_overruns).unwrap_or(0)
    }

    pub async fn drop_namespace(&self, namespace: &str) -> Result<()> {
        self.call(RequestType::Drop, DropParams { nspace: namespace.into() }.encode())
            .await?;
        Ok(())
    }

    pub async fn clear(&self, namespace: &str, owner_tag: u64) -> Result<()> {
        self.call(
            RequestType::Clear,
            ClearParams {
                nspace: namespace.into(),
                owner_tag,
            }
            .encode(),
        )
        .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        let body = self.call(RequestType::List, BytesMut::new()).await?;
        Ok(ListResult::decode(&body)?.nspaces)
    }

    pub async fn multiget(&self, namespace: &str, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        let body = self
            .call(
                RequestType::MultiGet,
                MultiGetParams {
                    nspace: namespace.into(),
                    keys: keys.to_vec(),
                }
                .encode(),
            )
            .await?;
        let result = MultiGetResult::decode(&body)?;
        Ok(result
            .values
            .into_iter()
            .map(|v| if v.is_empty() { None } else { Some(v) })
            .collect())
    }

    pub async fn multiset(
        &self,
        namespace: &str,
        records: &[Record],
        barrier: bool,
        owner_tag: u64,
    ) -> Result<()> {
        let records = records
            .iter()
            .map(|r| WireRecord {
                key: r.key.clone(),
                value: match &r.value {
                    RecordValue::Present(v) => v.clone(),
                    RecordValue::Tombstone => Vec::new(),
                },
            })
            .collect();
        self.call(
            RequestType::MultiSet,
            MultiSetParams {
                nspace: namespace.into(),
                barrier,
                owner_tag,
                records,
            }
            .encode(),
        )
        .await?;
        Ok(())
    }

    pub async fn set_role(&self, namespace: &str, role: Role, owner_tag: u64) -> Result<()> {
        let role_byte = match role {
            Role::Master => 0,
            Role::Slave => 1,
        };
        self.call(
            RequestType::SetRole,
            SetRoleParams {
                nspace: namespace.into(),
                role: role_byte,
                owner_tag,
            }
            .encode(),
        )
        .await?;
        Ok(())
    }

    pub async fn get_role(&self, namespace: &str) -> Result<Role> {
        let body = self
            .call(RequestType::GetRole, GetRoleParams { nspace: namespace.into() }.encode())
            .await?;
        match GetRoleResult::decode(&body)?.role {
            0 => Ok(Role::Master),
            1 => Ok(Role::Slave),
            other => Err(MdsError::Protocol(format!("unknown role byte: {other}"))),
        }
    }

    pub async fn open(&self, namespace: &str) -> Result<()> {
        self.call(RequestType::Open, OpenParams { nspace: namespace.into() }.encode())
            .await?;
        Ok(())
    }

    pub async fn ping(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        let body = self.call(RequestType::Ping, PingBody { data }.encode()).await?;
        Ok(PingBody::decode(&body)?.data)
    }

    pub async fn apply_relocation_logs(
        &self,
        namespace: &str,
        scrub_id: ScrubId,
        clone_id: CloneId,
        logs: Vec<String>,
    ) -> Result<()> {
        self.call(
            RequestType::ApplyRelocationLogs,
            ApplyRelocationLogsParams {
                nspace: namespace.into(),
                scrub_id: scrub_id.as_u128(),
                clone_id: clone_id.0,
                logs,
            }
            .encode(),
        )
        .await?;
        Ok(())
    }

    pub async fn catch_up(&self, namespace: &str, dry_run: bool) -> Result<u64> {
        let body = self
            .call(
                RequestType::CatchUp,
                CatchUpParams {
                    nspace: namespace.into(),
                    dry_run,
                }
                .encode(),
            )
            .await?;
        Ok(CatchUpResult::decode(&body)?.num_tlogs)
    }

    pub async fn get_table_counters(
        &self,
        namespace: &str,
        reset: bool,
    ) -> Result<(u64, u64, u64)> {
        let body = self
            .call(
                RequestType::GetTableCounters,
                GetTableCountersParams {
                    nspace: namespace.into(),
                    reset,
                }
                .encode(),
            )
            .await?;
        let result = TableCountersResult::decode(&body)?;
        Ok((
            result.total_tlogs_read,
            result.incremental_updates,
            result.full_rebuilds,
        ))
    }

    pub async fn get_owner_tag(&self, namespace: &str) -> Result<u64> {
        let body = self
            .call(
                RequestType::GetOwnerTag,
                GetOwnerTagParams { nspace: namespace.into() }.encode(),
            )
            .await?;
        Ok(GetOwnerTagResult::decode(&body)?.owner_tag)
    }
}
