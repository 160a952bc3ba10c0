use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::options::FarMemOptions;
use crate::primitives::cache::{spawn_evictor, CacheManager, CacheStats, ObjectHandle};
use crate::primitives::remote::{RetryPolicy, SwapClient, SwapStats, TcpTransport, Transport};
use crate::primitives::sched::{Scheduler, TaskHandle, TokioScheduler};
use crate::table::FarHashTable;
use crate::types::{FarMemError, Result};

/// Combined runtime statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Local cache counters.
    pub cache: CacheStats,
    /// Remote traffic counters.
    pub swap: SwapStats,
}

impl fmt::Display for RuntimeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.cache, self.swap)
    }
}

/// Builder for [`FarMemory`].
pub struct FarMemoryBuilder {
    options: FarMemOptions,
    transport: Option<Arc<dyn Transport>>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl FarMemoryBuilder {
    /// Uses `transport` instead of dialling `remote_endpoint`.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Spawns fetches and the evictor on `scheduler` instead of the current
    /// tokio runtime.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Wires the runtime together and starts the background evictor if
    /// enabled.
    pub fn build(self) -> Result<FarMemory> {
        let options = self.options;
        options.validate()?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let endpoint = options.remote_endpoint.as_deref().ok_or_else(|| {
                    FarMemError::Config("remote_endpoint is required without a transport".into())
                })?;
                Arc::new(TcpTransport::new(endpoint, options.connections)) as Arc<dyn Transport>
            }
        };
        let scheduler = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(TokioScheduler::current()?) as Arc<dyn Scheduler>,
        };
        let swap = Arc::new(SwapClient::new(
            transport,
            RetryPolicy::from_options(&options),
        ));
        let cache = CacheManager::new(&options, swap, scheduler)?;
        let evictor = options
            .background_eviction
            .then(|| spawn_evictor(&cache, options.evictor_interval()));
        info!(
            capacity = options.local_capacity_bytes,
            endpoint = options.remote_endpoint.as_deref().unwrap_or("in-process"),
            background_eviction = options.background_eviction,
            "farmem.start"
        );
        Ok(FarMemory {
            options,
            cache,
            evictor,
        })
    }
}

/// A far-memory runtime instance.
///
/// Owns the cache manager, the swap client behind it, and the background
/// evictor. Dropping the runtime stops the evictor; handles and tables keep
/// the cache itself alive.
pub struct FarMemory {
    options: FarMemOptions,
    cache: Arc<CacheManager>,
    evictor: Option<TaskHandle>,
}

impl FarMemory {
    /// Starts configuring a runtime.
    pub fn builder(options: FarMemOptions) -> FarMemoryBuilder {
        FarMemoryBuilder {
            options,
            transport: None,
            scheduler: None,
        }
    }

    /// Runtime talking TCP to `options.remote_endpoint`.
    pub fn connect(options: FarMemOptions) -> Result<Self> {
        Self::builder(options).build()
    }

    /// Runtime over an explicit transport.
    pub fn with_transport(options: FarMemOptions, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::builder(options).transport(transport).build()
    }

    /// Options the runtime was built with.
    pub fn options(&self) -> &FarMemOptions {
        &self.options
    }

    /// Creates a new resident zero-filled object of `size` bytes.
    pub async fn allocate(&self, size: usize) -> Result<ObjectHandle> {
        self.cache.create_object(size).await
    }

    /// Registers a new non-resident object of `size` bytes.
    pub fn register(&self, size: usize) -> Result<ObjectHandle> {
        self.cache.register_object(size)
    }

    /// Creates a far-memory hash table.
    pub fn hash_table(&self, buckets: usize, bucket_bytes: usize) -> Result<FarHashTable> {
        FarHashTable::new(Arc::clone(&self.cache), buckets, bucket_bytes)
    }

    /// The cache manager.
    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Current statistics.
    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            cache: self.cache.stats(),
            swap: self.cache.swap().stats(),
        }
    }

    /// Stops the background evictor and waits for it to exit.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cache.shutdown();
        if let Some(evictor) = self.evictor.take() {
            evictor.join().await?;
        }
        info!(stats = %self.stats(), "farmem.shutdown");
        Ok(())
    }
}

impl Drop for FarMemory {
    fn drop(&mut self) {
        self.cache.shutdown();
        if let Some(evictor) = self.evictor.take() {
            evictor.abort();
        }
    }
}
