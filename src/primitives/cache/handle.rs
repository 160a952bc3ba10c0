use std::fmt;
use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLockReadGuard, RwLockWriteGuard};

use super::manager::CacheManager;
use super::slot::SlotBuf;
use crate::types::{FarMemError, ObjectId, Result};

/// Addressing handle for one far-memory object.
///
/// A handle never owns object memory. It names the object and resolves it
/// through the cache manager on every pin.
#[derive(Clone)]
pub struct ObjectHandle {
    cache: Arc<CacheManager>,
    id: ObjectId,
    size: usize,
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("id", &self.id)
            .field("size", &self.size)
            .finish()
    }
}

impl ObjectHandle {
    pub(super) fn new(cache: Arc<CacheManager>, id: ObjectId, size: usize) -> Self {
        Self { cache, id, size }
    }

    /// Object identifier.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Fixed object capacity in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the object currently has a usable local copy.
    pub fn is_resident(&self) -> bool {
        self.cache.is_resident(self.id)
    }

    /// Whether the local copy has changes not yet written back.
    pub fn is_dirty(&self) -> bool {
        self.cache.is_dirty(self.id)
    }

    /// Number of live pins.
    pub fn pin_count(&self) -> u32 {
        self.cache.pin_count(self.id)
    }

    /// Guarantees residency for the lifetime of the returned guard, fetching
    /// the object first if needed.
    pub async fn pin(&self) -> Result<PinGuard> {
        self.cache.pin(self.id).await
    }

    /// Flags the resident copy for write-back.
    pub fn mark_dirty(&self) -> Result<()> {
        self.cache.mark_dirty(self.id)
    }

    /// Copies the object bytes out.
    pub async fn read(&self) -> Result<Vec<u8>> {
        let guard = self.pin().await?;
        let bytes = guard.read().to_vec();
        Ok(bytes)
    }

    /// Copies `data` into the object at `offset`.
    pub async fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= self.size)
            .ok_or_else(|| {
                FarMemError::InvalidArgument(format!(
                    "write of {} bytes at {offset} exceeds object size {}",
                    data.len(),
                    self.size
                ))
            })?;
        let guard = self.pin().await?;
        guard.write()[offset..end].copy_from_slice(data);
        Ok(())
    }
}

/// Scoped residency guarantee. Dropping the guard releases the pin.
///
/// Byte access goes through a short-lived latch. The latch guards are not
/// `Send`, so they can not be held across an await.
pub struct PinGuard {
    cache: Arc<CacheManager>,
    id: ObjectId,
    buf: SlotBuf,
}

impl PinGuard {
    pub(super) fn new(cache: Arc<CacheManager>, id: ObjectId, buf: SlotBuf) -> Self {
        Self { cache, id, buf }
    }

    /// Pinned object.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Object capacity in bytes.
    pub fn len(&self) -> usize {
        self.buf.read().len()
    }

    /// Returns true for an empty object.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shared access to the object bytes.
    pub fn read(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.buf.read(), |buf| &**buf)
    }

    /// Exclusive access to the object bytes; marks the object dirty.
    pub fn write(&self) -> MappedRwLockWriteGuard<'_, [u8]> {
        self.mark_dirty();
        RwLockWriteGuard::map(self.buf.write(), |buf| &mut **buf)
    }

    /// Flags the object for write-back without touching its bytes.
    pub fn mark_dirty(&self) {
        let marked = self.cache.mark_dirty(self.id);
        debug_assert!(marked.is_ok(), "pinned object {} is not resident", self.id);
    }

    /// Releases the pin now.
    pub fn unpin(self) {}
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.cache.unpin(self.id);
    }
}

impl fmt::Debug for PinGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinGuard").field("id", &self.id).finish()
    }
}
