use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use farmem::primitives::remote::{BoxFuture, Request, Response};
use farmem::{FarMemError, FarMemOptions, FarMemory, MemoryServer, Result, Transport};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Failure {
    Reset,
    Hang,
}

/// Forwards to an in-process server while `up`, otherwise fails every exchange.
struct Switchable {
    server: Arc<MemoryServer>,
    up: AtomicBool,
    failure: Failure,
    attempts: AtomicUsize,
}

impl Switchable {
    fn new(failure: Failure) -> Arc<Self> {
        Arc::new(Self {
            server: Arc::new(MemoryServer::new()),
            up: AtomicBool::new(true),
            failure,
            attempts: AtomicUsize::new(0),
        })
    }

    fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }
}

impl Transport for Switchable {
    fn round_trip(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.up.load(Ordering::SeqCst) {
                return Ok(self.server.handle(&request));
            }
            match self.failure {
                Failure::Reset => Err(FarMemError::Io(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset",
                ))),
                Failure::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(FarMemError::Abandoned)
                }
            }
        })
    }
}

fn options() -> FarMemOptions {
    FarMemOptions {
        local_capacity_bytes: 4096,
        background_eviction: false,
        fetch_timeout_ms: 20,
        max_retries: 2,
        retry_backoff_ms: 1,
        max_backoff_ms: 5,
        ..FarMemOptions::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_remote_fails_fetch_after_bounded_retries() -> Result<()> {
    let transport = Switchable::new(Failure::Hang);
    let farmem = FarMemory::with_transport(options(), transport.clone())?;
    let handle = farmem.register(64)?;
    transport.set_up(false);

    let err = handle.pin().await.unwrap_err();
    assert!(matches!(
        err,
        FarMemError::RemoteUnavailable { attempts: 3, .. }
    ));
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(handle.pin_count(), 0);
    assert!(!handle.is_resident());
    let stats = farmem.stats();
    assert_eq!(stats.cache.fetch_failures, 1);
    assert_eq!(stats.swap.timeouts, 3);
    assert_eq!(stats.cache.used_bytes, 0);

    // The object is fetchable once the remote comes back.
    transport.set_up(true);
    let guard = handle.pin().await?;
    assert_eq!(handle.pin_count(), 1);
    drop(guard);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_waiters_all_observe_fetch_failure() -> Result<()> {
    let transport = Switchable::new(Failure::Reset);
    let farmem = FarMemory::with_transport(options(), transport.clone())?;
    let handle = farmem.register(64)?;
    transport.set_up(false);

    let mut waiters = Vec::new();
    for _ in 0..4 {
        let handle = handle.clone();
        waiters.push(tokio::spawn(async move { handle.pin().await.map(|_| ()) }));
    }
    for waiter in waiters {
        let outcome = waiter.await.expect("waiter panicked");
        assert!(matches!(outcome, Err(FarMemError::RemoteUnavailable { .. })));
    }
    assert_eq!(handle.pin_count(), 0);
    assert!(farmem.stats().cache.misses >= 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_write_back_keeps_object_resident_and_dirty() -> Result<()> {
    let transport = Switchable::new(Failure::Reset);
    let farmem = FarMemory::with_transport(options(), transport.clone())?;
    let handle = farmem.allocate(16).await?;
    handle.write(0, b"unsaved").await?;

    transport.set_up(false);
    let err = farmem.cache().evict_one().await.unwrap_err();
    assert!(matches!(err, FarMemError::RemoteUnavailable { .. }));
    assert!(handle.is_resident());
    assert!(handle.is_dirty());
    assert_eq!(farmem.stats().cache.writeback_failures, 1);
    assert_eq!(&handle.read().await?[..7], b"unsaved");

    transport.set_up(true);
    assert!(farmem.cache().evict_one().await?);
    assert!(!handle.is_resident());
    let stored = transport.server.record_payload(handle.id()).expect("record written");
    assert_eq!(&stored[..7], b"unsaved");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn allocation_surfaces_write_back_failure() -> Result<()> {
    let transport = Switchable::new(Failure::Reset);
    let options = FarMemOptions {
        local_capacity_bytes: 64,
        ..options()
    };
    let farmem = FarMemory::with_transport(options, transport.clone())?;
    let first = farmem.allocate(64).await?;
    transport.set_up(false);

    let err = farmem.allocate(64).await.unwrap_err();
    assert!(matches!(err, FarMemError::RemoteUnavailable { .. }));
    assert!(first.is_resident());
    assert_eq!(farmem.stats().cache.used_bytes, 64);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_error_status_is_not_retried() -> Result<()> {
    let server = Arc::new(MemoryServer::with_capacity(8));
    let transport = Arc::new(farmem::LocalTransport::new(Arc::clone(&server)));
    let farmem = FarMemory::with_transport(options(), transport)?;
    let handle = farmem.allocate(32).await?;

    let err = farmem.cache().evict_one().await.unwrap_err();
    assert!(matches!(err, FarMemError::Remote(ref msg) if msg == "far memory exhausted"));
    assert_eq!(farmem.stats().swap.retries, 0);
    assert!(handle.is_resident());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_grow_keeps_previous_value() -> Result<()> {
    let transport = Switchable::new(Failure::Reset);
    let farmem = FarMemory::with_transport(options(), transport.clone())?;
    let table = farmem.hash_table(1, 48)?;
    table.put(b"a", &[1u8; 8]).await?;
    table.put(b"b", &[2u8; 8]).await?;
    table.put(b"c", &[3u8; 8]).await?;
    assert_eq!(table.chain_of(b"a").await?.len(), 2);
    farmem.cache().evict_all().await?;
    // Only the head bucket comes back; the overflow link stays remote.
    assert_eq!(table.get(b"a").await?, Some(vec![1u8; 8]));

    transport.set_up(false);
    let err = table.put(b"a", &[9u8; 24]).await.unwrap_err();
    assert!(matches!(err, FarMemError::RemoteUnavailable { .. }));
    transport.set_up(true);

    assert_eq!(table.get(b"a").await?, Some(vec![1u8; 8]));
    table.put(b"a", &[9u8; 24]).await?;
    assert_eq!(table.get(b"a").await?, Some(vec![9u8; 24]));
    assert_eq!(table.get(b"b").await?, Some(vec![2u8; 8]));
    assert_eq!(table.get(b"c").await?, Some(vec![3u8; 8]));
    assert_eq!(table.len(), 3);
    Ok(())
}
