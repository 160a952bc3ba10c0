use std::sync::{Arc, Once};
use std::time::Duration;

use farmem::{FarMemOptions, FarMemory, LocalTransport, MemoryServer, ObjectId, Result};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn runtime(options: FarMemOptions) -> Result<(FarMemory, Arc<MemoryServer>)> {
    let server = Arc::new(MemoryServer::new());
    let transport = Arc::new(LocalTransport::new(Arc::clone(&server)));
    Ok((FarMemory::with_transport(options, transport)?, server))
}

fn small_cache(capacity: usize) -> FarMemOptions {
    FarMemOptions {
        local_capacity_bytes: capacity,
        background_eviction: false,
        ..FarMemOptions::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn values_survive_eviction_round_trip() -> Result<()> {
    init_tracing();
    let (farmem, server) = runtime(small_cache(16 * 1024))?;
    let table = farmem.hash_table(16, 256)?;
    for i in 0..300u32 {
        table
            .put(format!("user:{i}").as_bytes(), format!("value-{i}").as_bytes())
            .await?;
    }
    let evicted = farmem.cache().evict_all().await?;
    assert!(evicted > 0);
    assert_eq!(farmem.stats().cache.resident_objects, 0);
    assert!(server.stats().write_backs > 0);

    for i in 0..300u32 {
        let value = table.get(format!("user:{i}").as_bytes()).await?;
        assert_eq!(value, Some(format!("value-{i}").into_bytes()), "key user:{i}");
    }
    assert!(farmem.stats().cache.misses > 0);
    assert_eq!(table.len(), 300);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tight_budget_keeps_table_consistent() -> Result<()> {
    init_tracing();
    // Room for only four buckets at a time.
    let (farmem, _server) = runtime(small_cache(4 * 128))?;
    let table = farmem.hash_table(32, 128)?;
    for round in 0..3u32 {
        for i in 0..200u32 {
            let key = format!("k{i}");
            let value = format!("{round}:{i}");
            table.put(key.as_bytes(), value.as_bytes()).await?;
            let cache = farmem.stats().cache;
            assert!(cache.resident_objects <= 4, "{cache}");
            assert!(cache.used_bytes <= cache.capacity_bytes, "{cache}");
        }
    }
    for i in (0..200u32).step_by(3) {
        assert!(table.remove(format!("k{i}").as_bytes()).await?);
    }
    for i in 0..200u32 {
        let got = table.get(format!("k{i}").as_bytes()).await?;
        if i % 3 == 0 {
            assert_eq!(got, None);
        } else {
            assert_eq!(got, Some(format!("2:{i}").into_bytes()));
        }
    }
    let stats = farmem.stats();
    assert!(stats.cache.evictions > 0);
    assert!(stats.cache.used_bytes <= stats.cache.capacity_bytes);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pinning_one_more_than_capacity_evicts_one() -> Result<()> {
    init_tracing();
    const N: usize = 8;
    const SIZE: usize = 64;
    let (farmem, server) = runtime(small_cache(N * SIZE))?;

    let mut handles = Vec::new();
    for i in 0..N {
        let handle = farmem.allocate(SIZE).await?;
        handle.write(0, &[i as u8 + 1; SIZE]).await?;
        handles.push(handle);
        assert!(farmem.stats().cache.resident_objects <= N as u64);
    }
    assert_eq!(farmem.stats().cache.used_bytes, (N * SIZE) as u64);

    let extra = farmem.register(SIZE)?;
    let guard = extra.pin().await?;
    assert!(guard.read().iter().all(|b| *b == 0));
    assert_eq!(farmem.stats().cache.resident_objects, N as u64);

    let resident = handles.iter().filter(|h| h.is_resident()).count();
    assert_eq!(resident, N - 1);
    assert_eq!(farmem.stats().cache.evictions, 1);
    // The victim was dirty, so its bytes reached the remote pool.
    let victim = handles.iter().find(|h| !h.is_resident()).map(|h| h.id());
    let victim = victim.unwrap_or(ObjectId::NONE);
    assert_eq!(server.record_payload(victim).map(|p| p.len()), Some(SIZE));
    drop(guard);

    for (i, handle) in handles.iter().enumerate() {
        assert_eq!(handle.read().await?, vec![i as u8 + 1; SIZE]);
        assert!(farmem.stats().cache.resident_objects <= N as u64);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn clean_objects_are_evicted_without_network_traffic() -> Result<()> {
    init_tracing();
    let (farmem, server) = runtime(small_cache(1024))?;
    let handle = farmem.allocate(32).await?;
    handle.write(0, b"stable").await?;
    farmem.cache().evict_all().await?;
    assert_eq!(server.stats().write_backs, 1);

    // Fetched copy is clean; reading it must not cause another write-back.
    assert_eq!(&handle.read().await?[..6], b"stable");
    assert!(!handle.is_dirty());
    farmem.cache().evict_all().await?;
    assert_eq!(server.stats().write_backs, 1);
    assert_eq!(farmem.stats().cache.dirty_writebacks, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn background_evictor_holds_occupancy_and_respects_pins() -> Result<()> {
    init_tracing();
    let options = FarMemOptions {
        local_capacity_bytes: 64 * 1024,
        high_water: 0.5,
        low_water: 0.25,
        evictor_interval_ms: 2,
        ..FarMemOptions::default()
    };
    let (farmem, _server) = runtime(options)?;
    let pinned = farmem.allocate(1024).await?;
    pinned.write(0, b"keep me").await?;
    let guard = pinned.pin().await?;

    let mut handles = Vec::new();
    for i in 0..200u32 {
        let handle = farmem.allocate(1024).await?;
        handle.write(0, &i.to_le_bytes()).await?;
        handles.push(handle);
    }

    let cache = Arc::clone(farmem.cache());
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while cache.used_bytes() > cache.high_water_bytes() {
        assert!(tokio::time::Instant::now() < deadline, "occupancy stayed above high water");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(pinned.is_resident());
    assert_eq!(&guard.read()[..7], b"keep me");
    drop(guard);

    for (i, handle) in handles.iter().enumerate().step_by(17) {
        assert_eq!(&handle.read().await?[..4], &(i as u32).to_le_bytes());
    }
    farmem.shutdown().await?;
    Ok(())
}
