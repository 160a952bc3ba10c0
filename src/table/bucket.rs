//! Byte layout of one hash-table bucket object.
//!
//! ```text
//! bucket := next:u64le count:u32le entry*
//! entry  := key_len:u32le value_len:u32le key value
//! ```
//!
//! An all-zero object decodes as an empty bucket with no successor, so freshly
//! registered bucket heads need no initialization.

use bytes::{Buf, BufMut};

use crate::types::{FarMemError, ObjectId, Result};

/// Bytes taken by the bucket header.
pub const BUCKET_HEADER_LEN: usize = 8 + 4;
/// Bytes taken by an entry header.
pub const ENTRY_HEADER_LEN: usize = 4 + 4;

/// Encoded size of one entry.
pub fn entry_len(key: &[u8], value: &[u8]) -> usize {
    ENTRY_HEADER_LEN + key.len() + value.len()
}

/// Decoded bucket contents.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bucket {
    pub next: ObjectId,
    pub entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Bucket {
    pub fn decode(mut src: &[u8]) -> Result<Self> {
        if src.len() < BUCKET_HEADER_LEN {
            return Err(FarMemError::Protocol("bucket shorter than header"));
        }
        let next = ObjectId(src.get_u64_le());
        let count = src.get_u32_le() as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            if src.remaining() < ENTRY_HEADER_LEN {
                return Err(FarMemError::Protocol("truncated bucket entry"));
            }
            let key_len = src.get_u32_le() as usize;
            let value_len = src.get_u32_le() as usize;
            if src.remaining() < key_len + value_len {
                return Err(FarMemError::Protocol("bucket entry overruns object"));
            }
            let key = src[..key_len].to_vec();
            src.advance(key_len);
            let value = src[..value_len].to_vec();
            src.advance(value_len);
            entries.push((key, value));
        }
        Ok(Self { next, entries })
    }

    pub fn encoded_len(&self) -> usize {
        BUCKET_HEADER_LEN
            + self
                .entries
                .iter()
                .map(|(k, v)| entry_len(k, v))
                .sum::<usize>()
    }

    /// Returns true if an entry of `len` encoded bytes still fits in `capacity`.
    pub fn has_room(&self, len: usize, capacity: usize) -> bool {
        self.encoded_len() + len <= capacity
    }

    pub fn encode(&self, mut dst: &mut [u8]) -> Result<()> {
        if self.encoded_len() > dst.len() {
            return Err(FarMemError::InvalidArgument(format!(
                "bucket needs {} bytes, object holds {}",
                self.encoded_len(),
                dst.len()
            )));
        }
        dst.put_u64_le(self.next.0);
        dst.put_u32_le(self.entries.len() as u32);
        for (key, value) in &self.entries {
            dst.put_u32_le(key.len() as u32);
            dst.put_u32_le(value.len() as u32);
            dst.put_slice(key);
            dst.put_slice(value);
        }
        Ok(())
    }

    pub fn position(&self, key: &[u8]) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k.as_slice() == key)
    }
}
