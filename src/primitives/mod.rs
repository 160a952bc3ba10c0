//! Building blocks of the far-memory runtime.
//!
//! Includes the scheduler adapter, the remote swap path, and the local
//! object cache that sits on top of it.

/// Local cache of far-memory objects.
///
/// Object handles, pinning, the clock eviction policy and the background evictor.
pub mod cache;

/// Remote memory pool access.
///
/// Wire protocol, transports, the memory server and the swap client.
pub mod remote;

/// Scheduler integration.
///
/// Task spawning and completion signals used to park logical threads.
pub mod sched;
