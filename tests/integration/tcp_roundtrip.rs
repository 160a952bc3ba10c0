use std::sync::Arc;

use farmem::{FarMemOptions, FarMemory, MemoryServer, Result};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

async fn start_server() -> Result<(Arc<MemoryServer>, String, oneshot::Sender<()>)> {
    let server = Arc::new(MemoryServer::new());
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let serving = Arc::clone(&server);
    tokio::spawn(async move {
        let shutdown = async {
            let _ = stop_rx.await;
        };
        let _ = serving.serve_until(listener, shutdown).await;
    });
    Ok((server, addr, stop_tx))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hash_table_over_tcp() -> Result<()> {
    let (server, addr, stop) = start_server().await?;
    let options = FarMemOptions {
        local_capacity_bytes: 8 * 1024,
        remote_endpoint: Some(addr),
        background_eviction: false,
        connections: 2,
        ..FarMemOptions::default()
    };
    let farmem = FarMemory::connect(options)?;
    let table = farmem.hash_table(8, 512)?;
    for i in 0..100u32 {
        table.put(&i.to_be_bytes(), format!("v{i}").as_bytes()).await?;
    }
    farmem.cache().evict_all().await?;
    assert!(server.stats().write_backs > 0);

    for i in 0..100u32 {
        assert_eq!(
            table.get(&i.to_be_bytes()).await?,
            Some(format!("v{i}").into_bytes())
        );
    }
    assert!(table.remove(&7u32.to_be_bytes()).await?);
    assert_eq!(table.get(&7u32.to_be_bytes()).await?, None);

    let stats = farmem.stats();
    assert!(stats.swap.fetches > 0);
    assert_eq!(stats.swap.failures, 0);
    farmem.shutdown().await?;
    let _ = stop.send(());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_tasks_share_pooled_connections() -> Result<()> {
    let (server, addr, stop) = start_server().await?;
    let options = FarMemOptions {
        local_capacity_bytes: 4096,
        remote_endpoint: Some(addr),
        background_eviction: false,
        connections: 2,
        ..FarMemOptions::default()
    };
    let farmem = Arc::new(FarMemory::connect(options)?);
    let mut tasks = Vec::new();
    for task in 0..8u8 {
        let farmem = Arc::clone(&farmem);
        tasks.push(tokio::spawn(async move {
            let handle = farmem.allocate(128).await?;
            handle.write(0, &[task + 1; 128]).await?;
            Ok::<_, farmem::FarMemError>(handle)
        }));
    }
    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.expect("task panicked")?);
    }
    assert_eq!(farmem.cache().evict_all().await?, 8);
    assert_eq!(server.stats().records, 8);

    let mut readers = Vec::new();
    for (i, handle) in handles.into_iter().enumerate() {
        readers.push(tokio::spawn(async move {
            let bytes = handle.read().await?;
            assert_eq!(bytes, vec![i as u8 + 1; 128]);
            Ok::<_, farmem::FarMemError>(())
        }));
    }
    for reader in readers {
        reader.await.expect("reader panicked")?;
    }
    let _ = stop.send(());
    Ok(())
}
