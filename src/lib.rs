//! Far-memory object runtime.
//!
//! Objects live in a remote memory pool and are cached in a bounded local
//! budget. Callers pin an [`ObjectHandle`] to get a resident copy; misses
//! suspend only the calling task while the object is fetched, and the cache
//! evicts cold objects (writing back only dirty ones) to stay within budget.
//! [`FarHashTable`] is a hash table built from such objects.

#![warn(missing_docs)]

pub mod options;
pub mod primitives;
pub mod runtime;
pub mod table;
pub mod types;

pub use options::FarMemOptions;
pub use primitives::cache::{CacheManager, CacheSlot, CacheStats, ObjectHandle, PinGuard};
pub use primitives::remote::{
    LocalTransport, MemoryServer, RetryPolicy, ServerStats, SwapClient, SwapStats, TcpTransport,
    Transport,
};
pub use primitives::sched::{completion, yield_and_wait, Completion, Scheduler, TokioScheduler};
pub use runtime::{FarMemory, FarMemoryBuilder, RuntimeStats};
pub use table::FarHashTable;
pub use types::{FarMemError, ObjectId, Result, SeqNo};
