use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tracing::{debug, trace, warn};

use super::handle::{ObjectHandle, PinGuard};
use super::slot::{SlotBuf, SlotId, SlotTable};
use crate::options::FarMemOptions;
use crate::primitives::remote::SwapClient;
use crate::primitives::sched::{
    completion, yield_and_wait, Completion, CompletionSignal, Scheduler,
};
use crate::types::{FarMemError, ObjectId, Result};

enum Residency {
    Absent,
    Fetching(Completion<Result<()>>),
    Resident(SlotId),
    Evicting(Completion<()>),
}

struct ObjectEntry {
    size: usize,
    residency: Residency,
    pin_count: u32,
    dirty: bool,
    /// Pins parked on the in-flight fetch of this object.
    waiters: u32,
    /// Pin epoch at which `pin_count` last left zero.
    pinned_at: u64,
}

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    dirty_writebacks: u64,
    fetch_failures: u64,
    writeback_failures: u64,
}

struct CacheInner {
    objects: HashMap<ObjectId, ObjectEntry>,
    slots: SlotTable,
    /// Bytes held by resident slots plus outstanding slot leases.
    used_bytes: usize,
    /// Objects holding budget that the clock can not take yet: fetches with a
    /// reservation, fetched objects not yet claimed by their waiters, and
    /// evictions still writing back.
    in_transit: HashSet<ObjectId>,
    pin_epoch: u64,
    counters: Counters,
}

/// Snapshot of cache manager statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Pins served from a resident copy.
    pub hits: u64,
    /// Pins that started a remote fetch.
    pub misses: u64,
    /// Objects evicted from local memory.
    pub evictions: u64,
    /// Evictions that wrote the object back first.
    pub dirty_writebacks: u64,
    /// Fetches that failed.
    pub fetch_failures: u64,
    /// Write-backs that failed and left the object resident.
    pub writeback_failures: u64,
    /// Objects currently resident.
    pub resident_objects: u64,
    /// Objects known to the cache.
    pub registered_objects: u64,
    /// Local bytes in use, including in-flight reservations.
    pub used_bytes: u64,
    /// Local budget.
    pub capacity_bytes: u64,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} evictions={} dirty_writebacks={} used={}/{}",
            self.hits,
            self.misses,
            self.evictions,
            self.dirty_writebacks,
            self.used_bytes,
            self.capacity_bytes
        )
    }
}

/// Outcome of one eviction attempt.
pub(crate) enum EvictStep {
    /// A victim left local memory.
    Evicted,
    /// Nothing eligible now, but in-flight work will change that. The
    /// receiver fires on the next settle.
    Wait(watch::Receiver<u64>),
    /// Nothing eligible and nothing in flight, but an object was pinned after
    /// the caller started allocating.
    Pinned(watch::Receiver<u64>),
    /// Nothing eligible and nothing in flight.
    Idle,
}

enum Pending {
    Fetch(Completion<Result<()>>),
    Evict(Completion<()>),
}

/// Local budget reserved by [`CacheManager::allocate_slot`].
///
/// The reservation is returned to the budget when the slot is dropped
/// without being installed.
pub struct CacheSlot {
    cache: Arc<CacheManager>,
    size: usize,
    buf: Option<Box<[u8]>>,
}

impl CacheSlot {
    /// Capacity of the slot in bytes.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns true for a zero-capacity slot.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Mutable access to the zero-filled slot bytes.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or_default()
    }

    fn into_buf(mut self) -> Box<[u8]> {
        self.buf.take().unwrap_or_default()
    }
}

impl fmt::Debug for CacheSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheSlot").field("size", &self.size).finish()
    }
}

impl Drop for CacheSlot {
    fn drop(&mut self) {
        if self.buf.is_some() {
            self.cache.release_bytes(self.size);
        }
    }
}

/// Owns the local memory budget and decides which objects stay resident.
///
/// All bookkeeping lives behind one mutex that is never held across an await.
/// Remote round trips happen with the lock released; objects in transit are
/// marked `Fetching` or `Evicting` so other callers wait on the same
/// completion instead of issuing their own request.
pub struct CacheManager {
    inner: Mutex<CacheInner>,
    swap: Arc<SwapClient>,
    sched: Arc<dyn Scheduler>,
    capacity: usize,
    high_water: usize,
    low_water: usize,
    pin_patience: Duration,
    next_id: AtomicU64,
    wake: Notify,
    settled: watch::Sender<u64>,
    shutdown: watch::Sender<bool>,
}

fn unknown_object(id: ObjectId) -> FarMemError {
    FarMemError::InvalidArgument(format!("unknown object {id}"))
}

/// Drops one parked pin from `entry`. Returns true when that hands a fetched
/// object over to the clock.
fn unpark(entry: &mut ObjectEntry, in_transit: &mut HashSet<ObjectId>, id: ObjectId) -> bool {
    entry.waiters = entry.waiters.saturating_sub(1);
    entry.waiters == 0
        && matches!(entry.residency, Residency::Resident(_))
        && in_transit.remove(&id)
}

impl CacheManager {
    /// Creates a cache manager over `swap`, spawning fetches on `sched`.
    pub fn new(
        options: &FarMemOptions,
        swap: Arc<SwapClient>,
        sched: Arc<dyn Scheduler>,
    ) -> Result<Arc<Self>> {
        options.validate()?;
        let (shutdown, _) = watch::channel(false);
        let (settled, _) = watch::channel(0);
        Ok(Arc::new(Self {
            inner: Mutex::new(CacheInner {
                objects: HashMap::new(),
                slots: SlotTable::default(),
                used_bytes: 0,
                in_transit: HashSet::new(),
                pin_epoch: 0,
                counters: Counters::default(),
            }),
            swap,
            sched,
            capacity: options.local_capacity_bytes,
            high_water: options.high_water_bytes(),
            low_water: options.low_water_bytes(),
            pin_patience: options.fetch_timeout(),
            next_id: AtomicU64::new(1),
            wake: Notify::new(),
            settled,
            shutdown,
        }))
    }

    fn next_object_id(&self) -> ObjectId {
        ObjectId(self.next_id.fetch_add(1, AtomicOrdering::Relaxed))
    }

    /// Wakes allocators parked on in-flight work. Called with the state lock
    /// held so a waiter that subscribed under the lock never misses it.
    fn bump_settled(&self) {
        self.settled.send_modify(|epoch| *epoch += 1);
    }

    /// Registers a new object that is not resident.
    ///
    /// The first pin fetches it; an object the remote pool has never seen
    /// comes back zero-filled.
    pub fn register_object(self: &Arc<Self>, size: usize) -> Result<ObjectHandle> {
        if size == 0 {
            return Err(FarMemError::InvalidArgument("object size must be positive".into()));
        }
        let id = self.next_object_id();
        self.inner.lock().objects.insert(
            id,
            ObjectEntry {
                size,
                residency: Residency::Absent,
                pin_count: 0,
                dirty: false,
                waiters: 0,
                pinned_at: 0,
            },
        );
        trace!(object = %id, size, "cache.register");
        Ok(ObjectHandle::new(Arc::clone(self), id, size))
    }

    /// Creates a new zero-filled object directly in local memory.
    ///
    /// The object starts dirty so its first eviction creates the remote record.
    pub async fn create_object(self: &Arc<Self>, size: usize) -> Result<ObjectHandle> {
        if size == 0 {
            return Err(FarMemError::InvalidArgument("object size must be positive".into()));
        }
        let slot = self.allocate_slot(size).await?;
        let id = self.next_object_id();
        let buf = slot.into_buf();
        {
            let mut inner = self.inner.lock();
            let slot = inner.slots.insert(id, buf);
            inner.objects.insert(
                id,
                ObjectEntry {
                    size,
                    residency: Residency::Resident(slot),
                    pin_count: 0,
                    dirty: true,
                    waiters: 0,
                    pinned_at: 0,
                },
            );
        }
        trace!(object = %id, size, "cache.create");
        Ok(ObjectHandle::new(Arc::clone(self), id, size))
    }

    /// Returns a handle for an already registered object.
    pub fn handle(self: &Arc<Self>, id: ObjectId) -> Option<ObjectHandle> {
        let size = self.inner.lock().objects.get(&id)?.size;
        Some(ObjectHandle::new(Arc::clone(self), id, size))
    }

    /// Reserves `size` bytes of the local budget, evicting as needed.
    ///
    /// Fails with `OutOfLocalMemory` when `size` exceeds the whole budget, or
    /// when every resident object is pinned and nothing is in flight. Pins
    /// taken after the allocation started are waited out for up to the fetch
    /// timeout, since those objects were still evictable when it began.
    pub async fn allocate_slot(self: &Arc<Self>, size: usize) -> Result<CacheSlot> {
        self.reserve(size, None).await
    }

    /// A fetch passes its object so the reservation counts as in-flight work
    /// for other allocators.
    async fn reserve(self: &Arc<Self>, size: usize, fetching: Option<ObjectId>) -> Result<CacheSlot> {
        if size > self.capacity {
            return Err(FarMemError::OutOfLocalMemory {
                requested: size,
                capacity: self.capacity,
            });
        }
        let mut since = None;
        loop {
            let reserved = {
                let mut inner = self.inner.lock();
                if inner.used_bytes + size <= self.capacity {
                    inner.used_bytes += size;
                    if let Some(id) = fetching {
                        inner.in_transit.insert(id);
                    }
                    Some(inner.used_bytes)
                } else {
                    if since.is_none() {
                        since = Some(inner.pin_epoch);
                    }
                    None
                }
            };
            if let Some(used) = reserved {
                if used > self.high_water {
                    self.wake.notify_one();
                }
                return Ok(CacheSlot {
                    cache: Arc::clone(self),
                    size,
                    buf: Some(vec![0u8; size].into_boxed_slice()),
                });
            }
            match self.evict_step(since).await? {
                EvictStep::Evicted => {}
                EvictStep::Wait(mut settled) => {
                    let _ = settled.changed().await;
                }
                EvictStep::Pinned(mut settled) => {
                    let patience = tokio::time::timeout(self.pin_patience, settled.changed());
                    if patience.await.is_err() {
                        // Count pins taken so far as held.
                        since = None;
                    }
                }
                EvictStep::Idle => {
                    warn!(requested = size, capacity = self.capacity, "cache.out_of_memory");
                    return Err(FarMemError::OutOfLocalMemory {
                        requested: size,
                        capacity: self.capacity,
                    });
                }
            }
        }
    }

    fn release_bytes(&self, size: usize) {
        let mut inner = self.inner.lock();
        inner.used_bytes = inner
            .used_bytes
            .checked_sub(size)
            .unwrap_or_else(|| panic!("released {size} bytes beyond reservation"));
        self.bump_settled();
    }

    /// Makes `id` resident and pins it.
    ///
    /// A miss spawns one fetch task per object; concurrent callers park on the
    /// same completion. A pin that finds the object being evicted waits for
    /// the eviction to settle and then fetches it again.
    pub async fn pin(self: &Arc<Self>, id: ObjectId) -> Result<PinGuard> {
        let mut waited = false;
        let mut parked: Option<Parked> = None;
        loop {
            let mut fetch = None;
            let pending = {
                let mut inner = self.inner.lock();
                let CacheInner {
                    objects,
                    slots,
                    in_transit,
                    pin_epoch,
                    counters,
                    ..
                } = &mut *inner;
                let entry = objects.get_mut(&id).ok_or_else(|| unknown_object(id))?;
                if let Some(parked) = parked.take() {
                    parked.disarm();
                    if unpark(entry, in_transit, id) {
                        self.bump_settled();
                    }
                }
                match entry.residency {
                    Residency::Resident(slot) => {
                        if entry.pin_count == 0 {
                            *pin_epoch += 1;
                            entry.pinned_at = *pin_epoch;
                        }
                        entry.pin_count += 1;
                        slots.touch(slot);
                        if !waited {
                            counters.hits += 1;
                        }
                        let buf = slots.get(slot).buf.clone();
                        return Ok(PinGuard::new(Arc::clone(self), id, buf));
                    }
                    Residency::Fetching(ref done) => {
                        entry.waiters += 1;
                        Pending::Fetch(done.clone())
                    }
                    Residency::Evicting(ref done) => Pending::Evict(done.clone()),
                    Residency::Absent => {
                        let (signal, done) = completion();
                        entry.residency = Residency::Fetching(done.clone());
                        entry.waiters += 1;
                        counters.misses += 1;
                        fetch = Some((signal, entry.size));
                        Pending::Fetch(done)
                    }
                }
            };
            waited = true;
            if let Some((signal, size)) = fetch {
                self.spawn_fetch(id, size, signal);
            }
            match pending {
                Pending::Fetch(done) => {
                    parked = Some(Parked {
                        cache: Arc::clone(self),
                        id,
                        armed: true,
                    });
                    yield_and_wait(done).await??;
                }
                Pending::Evict(done) => {
                    let _ = yield_and_wait(done).await;
                }
            }
        }
    }

    fn leave_fetch(&self, id: ObjectId) {
        let mut inner = self.inner.lock();
        let CacheInner {
            objects, in_transit, ..
        } = &mut *inner;
        if let Some(entry) = objects.get_mut(&id) {
            if unpark(entry, in_transit, id) {
                self.bump_settled();
            }
        }
    }

    fn spawn_fetch(self: &Arc<Self>, id: ObjectId, size: usize, signal: CompletionSignal<Result<()>>) {
        let cache = Arc::clone(self);
        debug!(object = %id, size, "cache.fetch.start");
        let _task = self.sched.spawn(Box::pin(async move {
            let guard = FetchGuard {
                cache: Arc::clone(&cache),
                id,
                signal: Some(signal),
            };
            let result = cache.fetch_into_slot(id, size).await;
            guard.settle(result);
        }));
    }

    async fn fetch_into_slot(self: &Arc<Self>, id: ObjectId, size: usize) -> Result<()> {
        let mut slot = self.reserve(size, Some(id)).await?;
        let payload = self.swap.fetch(id).await?;
        if payload.len() > size {
            return Err(FarMemError::Protocol("fetched payload exceeds object size"));
        }
        slot.bytes_mut()[..payload.len()].copy_from_slice(&payload);
        let buf = slot.into_buf();
        let mut inner = self.inner.lock();
        let CacheInner {
            objects,
            slots,
            used_bytes,
            in_transit,
            ..
        } = &mut *inner;
        let installed = match objects.get_mut(&id) {
            Some(entry) => {
                let slot = slots.insert(id, buf);
                entry.residency = Residency::Resident(slot);
                entry.dirty = false;
                // Parked pins claim the object before the clock may take it.
                if entry.waiters == 0 {
                    in_transit.remove(&id);
                }
                trace!(object = %id, bytes = payload.len(), "cache.fetch.installed");
                Ok(())
            }
            None => {
                *used_bytes -= size;
                in_transit.remove(&id);
                Err(unknown_object(id))
            }
        };
        self.bump_settled();
        installed
    }

    /// Releases one pin on `id`.
    pub(crate) fn unpin(&self, id: ObjectId) {
        let mut inner = self.inner.lock();
        let entry = inner
            .objects
            .get_mut(&id)
            .unwrap_or_else(|| panic!("unpin of unknown object {id}"));
        assert!(entry.pin_count > 0, "unpin of object {id} with pin_count 0");
        entry.pin_count -= 1;
        if entry.pin_count == 0 {
            self.bump_settled();
        }
    }

    /// Flags the resident copy of `id` for write-back on eviction.
    pub fn mark_dirty(&self, id: ObjectId) -> Result<()> {
        let mut inner = self.inner.lock();
        let entry = inner.objects.get_mut(&id).ok_or_else(|| unknown_object(id))?;
        match entry.residency {
            Residency::Resident(_) => {
                entry.dirty = true;
                Ok(())
            }
            _ => Err(FarMemError::InvalidArgument(format!(
                "object {id} is not resident"
            ))),
        }
    }

    /// Records a use of `id` for the eviction policy.
    pub fn touch(&self, id: ObjectId) {
        let mut inner = self.inner.lock();
        let CacheInner { objects, slots, .. } = &mut *inner;
        if let Some(ObjectEntry {
            residency: Residency::Resident(slot),
            ..
        }) = objects.get(&id)
        {
            slots.touch(*slot);
        }
    }

    /// Returns true when `id` has a local copy that pins can use right away.
    pub fn is_resident(&self, id: ObjectId) -> bool {
        matches!(
            self.inner.lock().objects.get(&id),
            Some(ObjectEntry {
                residency: Residency::Resident(_),
                ..
            })
        )
    }

    /// Returns true when the resident copy of `id` awaits write-back.
    pub fn is_dirty(&self, id: ObjectId) -> bool {
        self.inner
            .lock()
            .objects
            .get(&id)
            .map_or(false, |entry| entry.dirty)
    }

    /// Current pin count of `id`.
    pub fn pin_count(&self, id: ObjectId) -> u32 {
        self.inner
            .lock()
            .objects
            .get(&id)
            .map_or(0, |entry| entry.pin_count)
    }

    fn pick_victim(inner: &mut CacheInner) -> Option<(ObjectId, SlotId)> {
        let sweep = inner.slots.len().saturating_mul(2);
        for _ in 0..sweep {
            let slot = inner.slots.advance()?;
            let Some(owner) = inner.slots.get(slot).owner else {
                continue;
            };
            let eligible = matches!(
                inner.objects.get(&owner),
                Some(entry) if entry.pin_count == 0
                    && entry.waiters == 0
                    && matches!(entry.residency, Residency::Resident(_))
            );
            if !eligible || inner.slots.second_chance(slot) {
                continue;
            }
            return Some((owner, slot));
        }
        None
    }

    /// True when some resident object was first pinned after pin epoch `since`.
    fn pinned_since(inner: &CacheInner, since: u64) -> bool {
        inner.slots.owners().any(|owner| {
            matches!(
                inner.objects.get(&owner),
                Some(entry) if entry.pin_count > 0 && entry.pinned_at > since
            )
        })
    }

    /// Evicts one clock victim, writing it back first if dirty.
    ///
    /// With no victim, the step waits when objects are in transit, or when
    /// `since` is set and an object was pinned after that epoch.
    pub(crate) async fn evict_step(self: &Arc<Self>, since: Option<u64>) -> Result<EvictStep> {
        let (id, slot, dirty_buf, signal) = {
            let mut inner = self.inner.lock();
            let Some((id, slot)) = Self::pick_victim(&mut inner) else {
                return Ok(if !inner.in_transit.is_empty() {
                    EvictStep::Wait(self.settled.subscribe())
                } else if since.map_or(false, |since| Self::pinned_since(&inner, since)) {
                    EvictStep::Pinned(self.settled.subscribe())
                } else {
                    EvictStep::Idle
                });
            };
            let buf: SlotBuf = inner.slots.get(slot).buf.clone();
            let entry = inner.objects.get_mut(&id).ok_or_else(|| unknown_object(id))?;
            let (signal, done) = completion();
            entry.residency = Residency::Evicting(done);
            let dirty_buf = entry.dirty.then_some(buf);
            inner.in_transit.insert(id);
            (id, slot, dirty_buf, signal)
        };
        let guard = EvictGuard {
            cache: Arc::clone(self),
            id,
            slot,
            signal: Some(signal),
        };
        let wrote = dirty_buf.is_some();
        if let Some(buf) = dirty_buf {
            let payload = Bytes::copy_from_slice(&buf.read());
            if let Err(err) = self.swap.write_back(id, payload).await {
                warn!(object = %id, error = %err, "cache.evict.write_back_failed");
                guard.restore();
                return Err(err);
            }
        }
        guard.finish(wrote);
        Ok(EvictStep::Evicted)
    }

    /// Evicts the coldest unpinned object. Returns false when none is eligible.
    pub async fn evict_one(self: &Arc<Self>) -> Result<bool> {
        Ok(matches!(self.evict_step(None).await?, EvictStep::Evicted))
    }

    /// Evicts every unpinned object; returns how many were evicted.
    pub async fn evict_all(self: &Arc<Self>) -> Result<usize> {
        let mut evicted = 0;
        while self.evict_one().await? {
            evicted += 1;
        }
        Ok(evicted)
    }

    /// Evicts until occupancy is at or below the low-water mark.
    pub(crate) async fn shrink_to_low_water(self: &Arc<Self>) -> Result<usize> {
        let mut evicted = 0;
        while self.used_bytes() > self.low_water {
            match self.evict_step(None).await? {
                EvictStep::Evicted => evicted += 1,
                EvictStep::Wait(mut settled) => {
                    let _ = settled.changed().await;
                }
                EvictStep::Pinned(_) | EvictStep::Idle => break,
            }
        }
        Ok(evicted)
    }

    /// Local bytes in use, including reservations.
    pub fn used_bytes(&self) -> usize {
        self.inner.lock().used_bytes
    }

    /// Configured local budget.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Occupancy at which the background evictor starts.
    pub fn high_water_bytes(&self) -> usize {
        self.high_water
    }

    /// Occupancy the background evictor shrinks to.
    pub fn low_water_bytes(&self) -> usize {
        self.low_water
    }

    /// Fraction of the local budget in use.
    pub fn occupancy(&self) -> f64 {
        self.used_bytes() as f64 / self.capacity as f64
    }

    /// The swap client used for remote traffic.
    pub fn swap(&self) -> &Arc<SwapClient> {
        &self.swap
    }

    /// The scheduler fetch tasks are spawned on.
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.sched
    }

    pub(super) fn pressure(&self) -> &Notify {
        &self.wake
    }

    pub(super) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Tells background tasks tied to this cache to stop.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Returns a snapshot of cache statistics.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.counters.hits,
            misses: inner.counters.misses,
            evictions: inner.counters.evictions,
            dirty_writebacks: inner.counters.dirty_writebacks,
            fetch_failures: inner.counters.fetch_failures,
            writeback_failures: inner.counters.writeback_failures,
            resident_objects: inner.slots.occupied() as u64,
            registered_objects: inner.objects.len() as u64,
            used_bytes: inner.used_bytes as u64,
            capacity_bytes: self.capacity as u64,
        }
    }
}

/// Settles an in-flight fetch. Dropped unsettled, it puts the object back to
/// `Absent` and the waiters observe `Abandoned`.
struct FetchGuard {
    cache: Arc<CacheManager>,
    id: ObjectId,
    signal: Option<CompletionSignal<Result<()>>>,
}

impl FetchGuard {
    fn settle(mut self, result: Result<()>) {
        if let Err(err) = &result {
            self.reset();
            warn!(object = %self.id, error = %err, "cache.fetch.failed");
            self.cache.inner.lock().counters.fetch_failures += 1;
        }
        if let Some(signal) = self.signal.take() {
            signal.complete(result);
        }
    }

    fn reset(&self) {
        let mut inner = self.cache.inner.lock();
        let CacheInner {
            objects, in_transit, ..
        } = &mut *inner;
        if let Some(entry) = objects.get_mut(&self.id) {
            if matches!(entry.residency, Residency::Fetching(_)) {
                entry.residency = Residency::Absent;
                in_transit.remove(&self.id);
                self.cache.bump_settled();
            }
        }
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        if self.signal.is_some() {
            self.reset();
            self.signal = None;
        }
    }
}

/// Settles an in-flight eviction. Dropped unsettled, the object stays
/// resident with its dirty bit intact.
struct EvictGuard {
    cache: Arc<CacheManager>,
    id: ObjectId,
    slot: SlotId,
    signal: Option<CompletionSignal<()>>,
}

impl EvictGuard {
    fn finish(mut self, wrote: bool) {
        {
            let mut inner = self.cache.inner.lock();
            let CacheInner {
                objects,
                slots,
                used_bytes,
                in_transit,
                counters,
                ..
            } = &mut *inner;
            in_transit.remove(&self.id);
            self.cache.bump_settled();
            if let Some(entry) = objects.get_mut(&self.id) {
                slots.release(self.slot);
                *used_bytes -= entry.size;
                entry.residency = Residency::Absent;
                entry.dirty = false;
                counters.evictions += 1;
                if wrote {
                    counters.dirty_writebacks += 1;
                }
            }
        }
        debug!(object = %self.id, wrote, "cache.evict");
        if let Some(signal) = self.signal.take() {
            signal.complete(());
        }
    }

    fn restore(mut self) {
        self.put_back();
        self.cache.inner.lock().counters.writeback_failures += 1;
        if let Some(signal) = self.signal.take() {
            signal.complete(());
        }
    }

    fn put_back(&self) {
        let mut inner = self.cache.inner.lock();
        inner.in_transit.remove(&self.id);
        if let Some(entry) = inner.objects.get_mut(&self.id) {
            entry.residency = Residency::Resident(self.slot);
        }
        self.cache.bump_settled();
    }
}

impl Drop for EvictGuard {
    fn drop(&mut self) {
        if self.signal.is_some() {
            self.put_back();
            self.signal = None;
        }
    }
}

/// A pin parked on an in-flight fetch. Dropped before it claims the fetched
/// object, it hands the object back to the clock.
struct Parked {
    cache: Arc<CacheManager>,
    id: ObjectId,
    armed: bool,
}

impl Parked {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Parked {
    fn drop(&mut self) {
        if self.armed {
            self.cache.leave_fetch(self.id);
        }
    }
}
