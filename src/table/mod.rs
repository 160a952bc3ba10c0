//! Hash table whose buckets live in far memory.
//!
//! Each bucket head is a far-memory object registered up front but never
//! fetched until a key hashes to it. Buckets that overflow grow a chain of
//! extra bucket objects; empty buckets stay linked for reuse. Every access
//! pins one bucket at a time, so a lookup costs as many remote fetches as
//! non-resident links it walks.

#![forbid(unsafe_code)]

mod bucket;

use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::trace;
use xxhash_rust::xxh64::xxh64;

use crate::primitives::cache::{CacheManager, ObjectHandle};
use crate::types::{FarMemError, ObjectId, Result};

use self::bucket::{entry_len, Bucket, BUCKET_HEADER_LEN, ENTRY_HEADER_LEN};

const HASH_SEED: u64 = 0x6661_726d_656d_3031;

struct Chain {
    head: ObjectHandle,
    lock: RwLock<()>,
}

/// A byte-keyed hash table stored in far memory.
///
/// Mutations of one chain are serialized by a per-head async lock; lookups on
/// the same chain run concurrently.
pub struct FarHashTable {
    cache: Arc<CacheManager>,
    chains: Vec<Chain>,
    bucket_bytes: usize,
    len: AtomicUsize,
}

impl FarHashTable {
    /// Creates a table with `buckets` chains of `bucket_bytes`-sized objects.
    pub fn new(cache: Arc<CacheManager>, buckets: usize, bucket_bytes: usize) -> Result<Self> {
        if buckets == 0 {
            return Err(FarMemError::InvalidArgument(
                "hash table needs at least one bucket".into(),
            ));
        }
        if bucket_bytes <= BUCKET_HEADER_LEN + ENTRY_HEADER_LEN {
            return Err(FarMemError::InvalidArgument(format!(
                "bucket size {bucket_bytes} can not hold any entry"
            )));
        }
        let chains = (0..buckets)
            .map(|_| -> Result<Chain> {
                Ok(Chain {
                    head: cache.register_object(bucket_bytes)?,
                    lock: RwLock::new(()),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            cache,
            chains,
            bucket_bytes,
            len: AtomicUsize::new(0),
        })
    }

    /// Number of bucket chains.
    pub fn bucket_count(&self) -> usize {
        self.chains.len()
    }

    /// Capacity of every bucket object.
    pub fn bucket_bytes(&self) -> usize {
        self.bucket_bytes
    }

    /// Number of entries stored through this table.
    pub fn len(&self) -> usize {
        self.len.load(AtomicOrdering::Relaxed)
    }

    /// Returns true if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn chain(&self, key: &[u8]) -> &Chain {
        let idx = (xxh64(key, HASH_SEED) % self.chains.len() as u64) as usize;
        &self.chains[idx]
    }

    fn link(&self, id: ObjectId) -> Result<ObjectHandle> {
        self.cache
            .handle(id)
            .ok_or(FarMemError::Protocol("bucket chain links unknown object"))
    }

    async fn load(handle: &ObjectHandle) -> Result<Bucket> {
        let guard = handle.pin().await?;
        let bucket = Bucket::decode(&guard.read())?;
        Ok(bucket)
    }

    async fn store(handle: &ObjectHandle, bucket: &Bucket) -> Result<()> {
        let guard = handle.pin().await?;
        bucket.encode(&mut guard.write())?;
        Ok(())
    }

    /// Looks up `key`.
    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let chain = self.chain(key);
        let _read = chain.lock.read().await;
        let mut handle = chain.head.clone();
        loop {
            let bucket = Self::load(&handle).await?;
            if let Some(pos) = bucket.position(key) {
                return Ok(Some(bucket.entries[pos].1.clone()));
            }
            if bucket.next.is_none() {
                return Ok(None);
            }
            handle = self.link(bucket.next)?;
        }
    }

    /// Returns true if `key` is present.
    pub async fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Inserts or replaces the value for `key`.
    ///
    /// A value that outgrows its bucket is written to its new bucket before
    /// the old entry is dropped, so a failed put leaves the previous value
    /// readable.
    pub async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let needed = entry_len(key, value);
        if BUCKET_HEADER_LEN + needed > self.bucket_bytes {
            return Err(FarMemError::InvalidArgument(format!(
                "entry of {needed} bytes exceeds bucket capacity {}",
                self.bucket_bytes
            )));
        }
        let chain = self.chain(key);
        let _write = chain.lock.write().await;

        let mut handle = chain.head.clone();
        let mut room: Option<ObjectHandle> = None;
        let mut stale: Option<ObjectHandle> = None;
        let tail = loop {
            let mut bucket = Self::load(&handle).await?;
            if let Some(pos) = bucket.position(key) {
                bucket.entries[pos].1 = value.to_vec();
                if bucket.encoded_len() <= self.bucket_bytes {
                    Self::store(&handle, &bucket).await?;
                    trace!(bucket = %handle.id(), "table.put.in_place");
                    return Ok(());
                }
                stale = Some(handle.clone());
            } else if room.is_none() && bucket.has_room(needed, self.bucket_bytes) {
                room = Some(handle.clone());
            }
            if bucket.next.is_none() {
                break handle;
            }
            handle = self.link(bucket.next)?;
        };

        // Held until the new entry is placed, so dropping the old one can not
        // need a fetch.
        let stale = match &stale {
            Some(bucket) => Some(bucket.pin().await?),
            None => None,
        };
        match room {
            Some(target) => {
                let mut bucket = Self::load(&target).await?;
                bucket.entries.push((key.to_vec(), value.to_vec()));
                Self::store(&target, &bucket).await?;
            }
            None => {
                let overflow = self.cache.create_object(self.bucket_bytes).await?;
                let bucket = Bucket {
                    next: ObjectId::NONE,
                    entries: vec![(key.to_vec(), value.to_vec())],
                };
                Self::store(&overflow, &bucket).await?;
                let mut last = Self::load(&tail).await?;
                last.next = overflow.id();
                Self::store(&tail, &last).await?;
                trace!(tail = %tail.id(), overflow = %overflow.id(), "table.put.overflow");
            }
        }
        match stale {
            Some(guard) => {
                let mut bucket = Bucket::decode(&guard.read())?;
                if let Some(pos) = bucket.position(key) {
                    bucket.entries.remove(pos);
                }
                bucket.encode(&mut guard.write())?;
                trace!(bucket = %guard.id(), "table.put.moved");
            }
            None => {
                self.len.fetch_add(1, AtomicOrdering::Relaxed);
            }
        }
        Ok(())
    }

    /// Deletes `key`; returns whether it was present.
    pub async fn remove(&self, key: &[u8]) -> Result<bool> {
        let chain = self.chain(key);
        let _write = chain.lock.write().await;
        let mut handle = chain.head.clone();
        loop {
            let mut bucket = Self::load(&handle).await?;
            if let Some(pos) = bucket.position(key) {
                bucket.entries.remove(pos);
                Self::store(&handle, &bucket).await?;
                self.len.fetch_sub(1, AtomicOrdering::Relaxed);
                return Ok(true);
            }
            if bucket.next.is_none() {
                return Ok(false);
            }
            handle = self.link(bucket.next)?;
        }
    }

    /// Object ids of every bucket currently linked into `key`'s chain.
    pub async fn chain_of(&self, key: &[u8]) -> Result<Vec<ObjectId>> {
        let chain = self.chain(key);
        let _read = chain.lock.read().await;
        let mut ids = vec![chain.head.id()];
        let mut handle = chain.head.clone();
        loop {
            let bucket = Self::load(&handle).await?;
            if bucket.next.is_none() {
                return Ok(ids);
            }
            ids.push(bucket.next);
            handle = self.link(bucket.next)?;
        }
    }
}
