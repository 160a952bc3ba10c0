//! Local cache of far-memory objects.
//!
//! The [`CacheManager`] owns a fixed local byte budget. Objects are addressed
//! by [`ObjectHandle`]; pinning one yields a [`PinGuard`] that keeps the object
//! resident until dropped. Victims are picked with a clock sweep, and only
//! dirty victims are written back before their slot is reused.

#![forbid(unsafe_code)]

mod evictor;
mod handle;
mod manager;
mod slot;

pub use evictor::spawn_evictor;
pub use handle::{ObjectHandle, PinGuard};
pub use manager::{CacheManager, CacheSlot, CacheStats};
