//! Everything that talks to the remote memory pool: the wire codec, the
//! transports carrying it, the server hosting the pool, and the swap client
//! the cache manager uses to move objects in and out.

#![forbid(unsafe_code)]

mod client;
pub mod protocol;
mod server;
mod transport;

pub use client::{RetryPolicy, SwapClient, SwapStats};
pub use protocol::{Op, Request, Response, Status};
pub use server::{MemoryServer, ServerStats};
pub use transport::{BoxFuture, LocalTransport, TcpTransport, Transport};
