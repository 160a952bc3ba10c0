use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::protocol::{read_frame, write_response, Op, Request, Response};
use crate::types::{ObjectId, Result, SeqNo};

/// Latest payload stored for one object.
struct RemoteRecord {
    seq: SeqNo,
    payload: Bytes,
}

#[derive(Default)]
struct Counters {
    fetches: AtomicU64,
    not_found: AtomicU64,
    write_backs: AtomicU64,
    stale_write_backs: AtomicU64,
    errors: AtomicU64,
}

/// Snapshot of memory server activity.
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct ServerStats {
    /// FETCH requests served.
    pub fetches: u64,
    /// FETCH requests for objects with no record.
    pub not_found: u64,
    /// WRITE_BACK requests that replaced a record.
    pub write_backs: u64,
    /// WRITE_BACK requests ignored because a newer record exists.
    pub stale_write_backs: u64,
    /// Requests answered with an ERROR status.
    pub errors: u64,
    /// Records currently stored.
    pub records: u64,
    /// Payload bytes currently stored.
    pub bytes: u64,
}

#[derive(Default)]
struct Pool {
    records: HashMap<ObjectId, RemoteRecord>,
    bytes: usize,
}

/// The remote pool: volatile storage of the latest record per object.
///
/// Records are only ever replaced by a write carrying a newer sequence
/// number, which makes replayed or reordered write-backs harmless.
pub struct MemoryServer {
    pool: Mutex<Pool>,
    capacity_bytes: Option<usize>,
    counters: Counters,
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryServer {
    /// Creates an unbounded pool.
    pub fn new() -> Self {
        Self {
            pool: Mutex::new(Pool::default()),
            capacity_bytes: None,
            counters: Counters::default(),
        }
    }

    /// Creates a pool that refuses writes beyond `capacity_bytes` of payload.
    pub fn with_capacity(capacity_bytes: usize) -> Self {
        Self {
            capacity_bytes: Some(capacity_bytes),
            ..Self::new()
        }
    }

    /// Applies one request and produces the response.
    pub fn handle(&self, request: &Request) -> Response {
        match request.op {
            Op::Fetch => self.fetch(request.object_id),
            Op::WriteBack => self.write_back(request.object_id, request.seq, &request.payload),
        }
    }

    fn fetch(&self, id: ObjectId) -> Response {
        self.counters.fetches.fetch_add(1, AtomicOrdering::Relaxed);
        let pool = self.pool.lock();
        match pool.records.get(&id) {
            Some(record) => Response::ok(record.payload.clone()),
            None => {
                self.counters.not_found.fetch_add(1, AtomicOrdering::Relaxed);
                Response::not_found()
            }
        }
    }

    fn write_back(&self, id: ObjectId, seq: SeqNo, payload: &Bytes) -> Response {
        let mut pool = self.pool.lock();
        let previous_len = match pool.records.get(&id) {
            Some(record) if record.seq >= seq => {
                self.counters
                    .stale_write_backs
                    .fetch_add(1, AtomicOrdering::Relaxed);
                debug!(object = %id, seq = %seq, stored = %record.seq, "server.write_back.stale");
                return Response::ok(Bytes::new());
            }
            Some(record) => record.payload.len(),
            None => 0,
        };
        let next_bytes = pool.bytes - previous_len + payload.len();
        if let Some(capacity) = self.capacity_bytes {
            if next_bytes > capacity {
                self.counters.errors.fetch_add(1, AtomicOrdering::Relaxed);
                warn!(object = %id, capacity, "server.write_back.exhausted");
                return Response::error("far memory exhausted");
            }
        }
        pool.bytes = next_bytes;
        pool.records.insert(
            id,
            RemoteRecord {
                seq,
                payload: payload.clone(),
            },
        );
        self.counters.write_backs.fetch_add(1, AtomicOrdering::Relaxed);
        Response::ok(Bytes::new())
    }

    /// Sequence number of the stored record for `id`.
    pub fn record_seq(&self, id: ObjectId) -> Option<SeqNo> {
        self.pool.lock().records.get(&id).map(|record| record.seq)
    }

    /// Stored payload for `id`.
    pub fn record_payload(&self, id: ObjectId) -> Option<Bytes> {
        self.pool
            .lock()
            .records
            .get(&id)
            .map(|record| record.payload.clone())
    }

    /// Returns a snapshot of server counters.
    pub fn stats(&self) -> ServerStats {
        let (records, bytes) = {
            let pool = self.pool.lock();
            (pool.records.len() as u64, pool.bytes as u64)
        };
        ServerStats {
            fetches: self.counters.fetches.load(AtomicOrdering::Relaxed),
            not_found: self.counters.not_found.load(AtomicOrdering::Relaxed),
            write_backs: self.counters.write_backs.load(AtomicOrdering::Relaxed),
            stale_write_backs: self.counters.stale_write_backs.load(AtomicOrdering::Relaxed),
            errors: self.counters.errors.load(AtomicOrdering::Relaxed),
            records,
            bytes,
        }
    }

    /// Accepts connections until `shutdown` resolves.
    pub async fn serve_until<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local = listener.local_addr()?;
        info!(addr = %local, "server.listen");
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(addr = %local, "server.shutdown");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    debug!(peer = %peer, "server.accept");
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = server.serve_connection(stream).await {
                            warn!(peer = %peer, error = %err, "server.connection.error");
                        }
                    });
                }
            }
        }
    }

    /// Accepts connections forever.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        self.serve_until(listener, std::future::pending()).await
    }

    /// Serves requests on one connection in arrival order.
    pub async fn serve_connection(self: Arc<Self>, stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        while let Some(body) = read_frame(&mut reader).await? {
            let response = match Request::decode_body(body) {
                Ok(request) => self.handle(&request),
                Err(err) => {
                    self.counters.errors.fetch_add(1, AtomicOrdering::Relaxed);
                    Response::error(&err.to_string())
                }
            };
            write_response(&mut write_half, &response).await?;
        }
        Ok(())
    }
}
