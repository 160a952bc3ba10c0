use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tracing::{debug, trace};

use super::protocol::{read_frame, write_request, Request, Response};
use super::server::MemoryServer;
use crate::types::{FarMemError, Result};

/// Boxed future returned by [`Transport::round_trip`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Carries one request to the remote pool and returns its response.
///
/// Implementations surface connection problems as `Io` or `Protocol` errors;
/// the swap client owns timeouts and retries.
pub trait Transport: Send + Sync + 'static {
    /// Performs one request/response exchange.
    fn round_trip(&self, request: Request) -> BoxFuture<'_, Result<Response>>;
}

/// Pooled TCP connections to a `farmem-server`.
pub struct TcpTransport {
    addr: String,
    idle: Mutex<Vec<TcpStream>>,
    permits: Arc<Semaphore>,
}

impl TcpTransport {
    /// Creates a transport that dials `addr` lazily, keeping at most
    /// `connections` streams open.
    pub fn new(addr: impl Into<String>, connections: usize) -> Self {
        Self {
            addr: addr.into(),
            idle: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(connections.max(1))),
        }
    }

    /// Remote address this transport dials.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn checkout(&self) -> Result<TcpStream> {
        let pooled = self.idle.lock().pop();
        if let Some(stream) = pooled {
            return Ok(stream);
        }
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        debug!(addr = %self.addr, "transport.tcp.connect");
        Ok(stream)
    }

    async fn exchange(&self, request: Request) -> Result<Response> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FarMemError::Abandoned)?;
        let mut stream = self.checkout().await?;
        write_request(&mut stream, &request).await?;
        let body = read_frame(&mut stream).await?.ok_or_else(|| {
            FarMemError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed connection",
            ))
        })?;
        let response = Response::decode_body(body)?;
        self.idle.lock().push(stream);
        trace!(object = %request.object_id, seq = %request.seq, "transport.tcp.round_trip");
        Ok(response)
    }
}

impl Transport for TcpTransport {
    fn round_trip(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
        // A stream is only returned to the pool after a full exchange, so an
        // error or a dropped future discards it.
        Box::pin(self.exchange(request))
    }
}

/// Transport that hands requests straight to an in-process [`MemoryServer`].
#[derive(Clone)]
pub struct LocalTransport {
    server: Arc<MemoryServer>,
}

impl LocalTransport {
    /// Wraps `server`.
    pub fn new(server: Arc<MemoryServer>) -> Self {
        Self { server }
    }

    /// The backing server.
    pub fn server(&self) -> &Arc<MemoryServer> {
        &self.server
    }
}

impl Transport for LocalTransport {
    fn round_trip(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
        Box::pin(async move { Ok(self.server.handle(&request)) })
    }
}
