//! Transport (C4, spec.md §4.4): a listening service bound simultaneously to
//! a TCP endpoint and a Unix-domain abstract-namespace socket on the same
//! logical port, driving per-connection read/dispatch/write with timeouts.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::unix::net::SocketAddr as UnixSocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, UnixListener};
use tokio::task::JoinHandle;

use crate::database::DatabaseOps;
use crate::error::{MdsError, Result};
use crate::model::{CloneId, Record, RecordValue, Role, ScrubId};
use crate::proto::messages::*;
use crate::proto::{
    RequestHeader, RequestType, ResponseHeader, ResponseType, FLAG_USE_SHMEM, MAGIC,
    NUM_REQUEST_TYPES, REQUEST_HEADER_LEN, RESPONSE_HEADER_LEN,
};
use crate::shmem::SharedMemoryRegion;

/// The Unix abstract-namespace name encoding the listening port (spec.md
/// §6). The leading NUL is what makes it abstract rather than a path on
/// disk.
pub fn abstract_socket_name(port: u16) -> String {
    format!("\0ovs.locorem:{port}")
}

pub struct ServerHandle {
    tcp: JoinHandle<()>,
    unix: JoinHandle<()>,
    /// The address actually bound, resolved from `addr` (port `0` asks the
    /// OS to pick one — useful for tests and for callers that don't care
    /// which port they land on).
    pub local_addr: SocketAddr,
}

impl ServerHandle {
    pub fn abort(&self) {
        self.tcp.abort();
        self.unix.abort();
    }
}

/// Binds both endpoints and spawns their accept loops (spec.md §4.4).
pub async fn serve(
    db: Arc<dyn DatabaseOps>,
    addr: SocketAddr,
    timeout: Option<Duration>,
) -> Result<ServerHandle> {
    let tcp_listener = TcpListener::bind(addr).await?;
    let local_addr = tcp_listener.local_addr()?;
    tracing::info!(%local_addr, "listening on tcp");

    let unix_name = abstract_socket_name(local_addr.port());
    let unix_addr = UnixSocketAddr::from_abstract_name(unix_name.trim_start_matches('\0').as_bytes())
        .map_err(|e| MdsError::Generic(format!("binding abstract unix socket: {e}")))?;
    // `tokio::net::UnixListener` has no `bind_addr`; abstract-namespace
    // addresses are a `std`-only construct, so bind on std and hand the
    // fd to tokio via `from_std`.
    let std_unix_listener = std::os::unix::net::UnixListener::bind_addr(&unix_addr)
        .map_err(|e| MdsError::Generic(format!("binding abstract unix socket: {e}")))?;
    std_unix_listener.set_nonblocking(true)?;
    let unix_listener = UnixListener::from_std(std_unix_listener)?;
    tracing::info!(name = %unix_name, "listening on unix abstract namespace");

    let tcp_db = db.clone();
    let tcp = tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, peer)) => {
                    let db = tcp_db.clone();
                    crate::metrics::CONNECTIONS_ACCEPTED.increment(1);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, db, timeout).await {
                            tracing::debug!(%peer, error = %e, "connection ended");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "tcp accept failed");
                    break;
                }
            }
        }
    });

    let unix = tokio::spawn(async move {
        loop {
            match unix_listener.accept().await {
                Ok((stream, _)) => {
                    let db = db.clone();
                    crate::metrics::CONNECTIONS_ACCEPTED.increment(1);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, db, timeout).await {
                            tracing::debug!(error = %e, "unix connection ended");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "unix accept failed");
                    break;
                }
            }
        }
    });

    Ok(ServerHandle { tcp, unix, local_addr })
}

/// Per-connection state: the small map of shmem regions opened on demand
/// (spec.md §4.4). Accessed only from this connection's own task, so no
/// lock is needed — this is the connection's own strand of execution.
struct ConnState {
    regions: HashMap<u64, SharedMemoryRegion>,
}

impl ConnState {
    fn new() -> Self {
        Self {
            regions: HashMap::new(),
        }
    }

    fn region(&mut self, id: u64) -> Result<&mut SharedMemoryRegion> {
        if !self.regions.contains_key(&id) {
            let region = SharedMemoryRegion::open(id)?;
            self.regions.insert(id, region);
        }
        Ok(self.regions.get_mut(&id).unwrap())
    }
}

async fn read_with_timeout<R: AsyncRead + Unpin>(
    stream: &mut R,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> Result<()> {
    let fut = stream.read_exact(buf);
    match timeout {
        Some(d) => tokio::time::timeout(d, fut)
            .await
            .map_err(|_| MdsError::Transport(std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out")))??,
        None => fut.await?,
    };
    Ok(())
}

async fn write_with_timeout<W: AsyncWrite + Unpin>(
    stream: &mut W,
    buf: &[u8],
    timeout: Option<Duration>,
) -> Result<()> {
    let fut = stream.write_all(buf);
    match timeout {
        Some(d) => tokio::time::timeout(d, fut)
            .await
            .map_err(|_| MdsError::Transport(std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out")))??,
        None => fut.await?,
    };
    Ok(())
}

/// Drives the per-connection state machine described in spec.md §4.4:
/// `ReadingHeader -> Dispatching -> Sending -> ReadingHeader`, closing on
/// EOF or a bad magic.
async fn handle_connection<S>(mut stream: S, db: Arc<dyn DatabaseOps>, timeout: Option<Duration>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = ConnState::new();

    loop {
        let mut header_buf = [0u8; REQUEST_HEADER_LEN];
        match read_with_timeout(&mut stream, &mut header_buf, timeout).await {
            Ok(()) => {}
            Err(MdsError::Transport(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(()); // clean close
            }
            Err(e) => return Err(e),
        }

        let header = match RequestHeader::decode(&header_buf) {
            Ok(h) if h.magic == MAGIC => h,
            _ => {
                // Bad magic: close the connection without a response
                // (spec.md §4.4 protocol-error handling).
                return Err(MdsError::Protocol("bad magic, closing connection".into()));
            }
        };

        let body = if header.wants_shmem_body() {
            let region = conn.region(header.out_region)?;
            region
                .read_at(header.out_offset as usize, header.body_size as usize)?
                .to_vec()
        } else {
            let mut buf = vec![0u8; header.body_size as usize];
            read_with_timeout(&mut stream, &mut buf, timeout).await?;
            buf
        };

        let Some(req_type) = RequestType::from_u32(header.r#type) else {
            send_response(
                &mut stream,
                &mut conn,
                &header,
                ResponseType::UnknownRequest,
                Bytes::new(),
                timeout,
            )
            .await?;
            continue;
        };

        match dispatch(db.as_ref(), req_type, &body).await {
            Ok(response_body) => {
                send_response(
                    &mut stream,
                    &mut conn,
                    &header,
                    ResponseType::Ok,
                    response_body.freeze(),
                    timeout,
                )
                .await?;
            }
            Err(e) => {
                let is_transport_error = matches!(e, MdsError::Transport(_));
                let body = ErrorBody {
                    error_type: e.wire_error_type(),
                    message: e.to_string(),
                }
                .encode();
                send_response(
                    &mut stream,
                    &mut conn,
                    &header,
                    ResponseType::Error,
                    body.freeze(),
                    timeout,
                )
                .await?;
                if is_transport_error {
                    return Err(e);
                }
            }
        }
    }
}

async fn send_response<S>(
    stream: &mut S,
    conn: &mut ConnState,
    req: &RequestHeader,
    r#type: ResponseType,
    body: Bytes,
    timeout: Option<Duration>,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut flags = 0u32;
    let mut use_shmem = false;

    if req.wants_shmem_response() && !body.is_empty() {
        // Refuse (fall back to inband) if the response range would
        // overlap the request's own shmem range in the same region
        // (spec.md §4.3 shmem body-placement rules).
        let overlaps_request_region = req.wants_shmem_body()
            && req.out_region == req.in_region
            && req.out_offset < body.len() as u64;
        if !overlaps_request_region {
            if let Ok(region) = conn.region(req.in_region) {
                if region.size() >= body.len() {
                    if region.write_at(0, &body).is_ok() {
                        use_shmem = true;
                    }
                }
            }
        }
    }

    if use_shmem {
        flags |= FLAG_USE_SHMEM;
    } else if req.wants_shmem_response() && !body.is_empty() {
        crate::metrics::SHMEM_OVERRUNS.increment(1);
    }

    let header = ResponseHeader {
        magic: MAGIC,
        r#type: r#type as u32,
        flags,
        body_size: body.len() as u64,
        tag: req.tag,
    };
    let mut out = BytesMut::with_capacity(RESPONSE_HEADER_LEN + if use_shmem { 0 } else { body.len() });
    header.encode(&mut out);
    if !use_shmem {
        out.extend_from_slice(&body);
    }
    write_with_timeout(stream, &out, timeout).await
}

type DispatchFn =
    for<'a> fn(&'a dyn DatabaseOps, &'a [u8]) -> futures::future::BoxFuture<'a, Result<BytesMut>>;

/// Request dispatch is table-driven: a request-type discriminant indexes a
/// dense array of handlers rather than a `match` chain (Design Notes §9).
async fn dispatch(db: &dyn DatabaseOps, req_type: RequestType, body: &[u8]) -> Result<BytesMut> {
    crate::metrics::REQUESTS_DISPATCHED.increment(1);
    let handlers: [DispatchFn; NUM_REQUEST_TYPES] = [
        |db, body| Box::pin(handle_drop(db, body)),
        |db, body| Box::pin(handle_clear(db, body)),
        |db, body| Box::pin(handle_list(db, body)),
        |db, body| Box::pin(handle_multi_get(db, body)),
        |db, body| Box::pin(handle_multi_set(db, body)),
        |db, body| Box::pin(handle_set_role(db, body)),
        |db, body| Box::pin(handle_get_role(db, body)),
        |db, body| Box::pin(handle_open(db, body)),
        |db, body| Box::pin(handle_ping(db, body)),
        |db, body| Box::pin(handle_apply_relocation_logs(db, body)),
        |db, body| Box::pin(handle_catch_up(db, body)),
        |db, body| Box::pin(handle_get_table_counters(db, body)),
        |db, body| Box::pin(handle_get_owner_tag(db, body)),
    ];
    handlers[req_type as usize](db, body).await
}

async fn handle_drop(db: &dyn DatabaseOps, body: &[u8]) -> Result<BytesMut> {
    let params = DropParams::decode(body)?;
    db.drop_namespace(&params.nspace)?;
    Ok(BytesMut::new())
}

async fn handle_clear(db: &dyn DatabaseOps, body: &[u8]) -> Result<BytesMut> {
    let params = ClearParams::decode(body)?;
    let table = db.open(&params.nspace)?;
    table.clear(params.owner_tag)?;
    Ok(BytesMut::new())
}

async fn handle_list(db: &dyn DatabaseOps, _body: &[u8]) -> Result<BytesMut> {
    Ok(ListResult {
        nspaces: db.list_namespaces(),
    }
    .encode())
}

async fn handle_multi_get(db: &dyn DatabaseOps, body: &[u8]) -> Result<BytesMut> {
    let params = MultiGetParams::decode(body)?;
    let table = db.open(&params.nspace)?;
    let values = table.multiget(&params.keys)?;
    Ok(MultiGetResult {
        values: values.into_iter().map(|v| v.unwrap_or_default()).collect(),
    }
    .encode())
}

async fn handle_multi_set(db: &dyn DatabaseOps, body: &[u8]) -> Result<BytesMut> {
    let params = MultiSetParams::decode(body)?;
    let table = db.open(&params.nspace)?;
    let records: Vec<Record> = params
        .records
        .into_iter()
        .map(|r| Record {
            key: r.key,
            value: if r.value.is_empty() {
                RecordValue::Tombstone
            } else {
                RecordValue::Present(r.value)
            },
        })
        .collect();
    table.multiset(&records, params.barrier, params.owner_tag)?;
    Ok(BytesMut::new())
}

async fn handle_set_role(db: &dyn DatabaseOps, body: &[u8]) -> Result<BytesMut> {
    let params = SetRoleParams::decode(body)?;
    let table = db.open(&params.nspace)?;
    let role = decode_role(params.role)?;
    table.set_role(role, params.owner_tag);
    Ok(BytesMut::new())
}

async fn handle_get_role(db: &dyn DatabaseOps, body: &[u8]) -> Result<BytesMut> {
    let params = GetRoleParams::decode(body)?;
    let table = db.open(&params.nspace)?;
    Ok(GetRoleResult {
        role: encode_role(table.get_role()),
    }
    .encode())
}

async fn handle_open(db: &dyn DatabaseOps, body: &[u8]) -> Result<BytesMut> {
    let params = OpenParams::decode(body)?;
    db.open(&params.nspace)?;
    Ok(BytesMut::new())
}

async fn handle_ping(_db: &dyn DatabaseOps, body: &[u8]) -> Result<BytesMut> {
    let params = PingBody::decode(body)?;
    Ok(PingBody { data: params.data }.encode())
}

async fn handle_apply_relocation_logs(db: &dyn DatabaseOps, body: &[u8]) -> Result<BytesMut> {
    let params = ApplyRelocationLogsParams::decode(body)?;
    let table = db.open(&params.nspace)?;
    table
        .apply_relocations(
            ScrubId(params.scrub_id.to_be_bytes()),
            CloneId(params.clone_id),
            &params.logs,
        )
        .await?;
    Ok(BytesMut::new())
}

async fn handle_catch_up(db: &dyn DatabaseOps, body: &[u8]) -> Result<BytesMut> {
    let params = CatchUpParams::decode(body)?;
    let table = db.open(&params.nspace)?;
    let num_tlogs = table.catch_up(params.dry_run).await?;
    Ok(CatchUpResult { num_tlogs }.encode())
}

async fn handle_get_table_counters(db: &dyn DatabaseOps, body: &[u8]) -> Result<BytesMut> {
    let params = GetTableCountersParams::decode(body)?;
    let table = db.open(&params.nspace)?;
    let counters = table.get_counters(params.reset);
    Ok(TableCountersResult {
        total_tlogs_read: counters.total_tlogs_read,
        incremental_updates: counters.incremental_updates,
        full_rebuilds: counters.full_rebuilds,
    }
    .encode())
}

async fn handle_get_owner_tag(db: &dyn DatabaseOps, body: &[u8]) -> Result<BytesMut> {
    let params = GetOwnerTagParams::decode(body)?;
    let table = db.open(&params.nspace)?;
    Ok(GetOwnerTagResult {
        owner_tag: table.get_owner_tag(),
    }
    .encode())
}

fn decode_role(v: u8) -> Result<Role> {
    match v {
        0 => Ok(Role::Master),
        1 => Ok(Role::Slave),
        other => Err(MdsError::Protocol(format!("unknown role byte: {other}"))),
    }
}

fn encode_role(role: Role) -> u8 {
    match role {
        Role::Master => 0,
        Role::Slave => 1,
    }
}
