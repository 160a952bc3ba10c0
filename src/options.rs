use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{FarMemError, Result};

/// Configuration options for a far-memory runtime.
///
/// These options bound the local cache, control when the background evictor
/// runs, and tune how the swap client talks to the remote memory server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FarMemOptions {
    /// Bytes of resident object data the local cache may hold.
    pub local_capacity_bytes: usize,
    /// Occupancy fraction above which the background evictor starts.
    pub high_water: f64,
    /// Occupancy fraction the background evictor evicts down to.
    pub low_water: f64,
    /// Address of the remote memory server (`host:port`).
    pub remote_endpoint: Option<String>,
    /// Per-attempt timeout for a remote round trip, in milliseconds.
    pub fetch_timeout_ms: u64,
    /// Retries after the first failed attempt before surfacing `RemoteUnavailable`.
    pub max_retries: u32,
    /// Initial backoff between retries in milliseconds; doubles per attempt.
    pub retry_backoff_ms: u64,
    /// Upper bound on a single backoff delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Whether to run the background evictor task.
    pub background_eviction: bool,
    /// Period at which the evictor re-checks occupancy, in milliseconds.
    pub evictor_interval_ms: u64,
    /// Maximum pooled connections to the remote memory server.
    pub connections: usize,
}

impl Default for FarMemOptions {
    fn default() -> Self {
        Self {
            local_capacity_bytes: 64 * 1024 * 1024,
            high_water: 0.9,
            low_water: 0.8,
            remote_endpoint: None,
            fetch_timeout_ms: 500,
            max_retries: 3,
            retry_backoff_ms: 10,
            max_backoff_ms: 1_000,
            background_eviction: true,
            evictor_interval_ms: 10,
            connections: 4,
        }
    }
}

impl FarMemOptions {
    /// Per-attempt remote timeout.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Initial retry backoff.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Cap on a single retry backoff.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.retry_backoff_ms))
    }

    /// Evictor polling period.
    pub fn evictor_interval(&self) -> Duration {
        Duration::from_millis(self.evictor_interval_ms.max(1))
    }

    /// Byte occupancy at which the evictor wakes up.
    pub fn high_water_bytes(&self) -> usize {
        (self.local_capacity_bytes as f64 * self.high_water) as usize
    }

    /// Byte occupancy the evictor evicts down to.
    pub fn low_water_bytes(&self) -> usize {
        (self.local_capacity_bytes as f64 * self.low_water) as usize
    }

    /// Checks option consistency.
    pub fn validate(&self) -> Result<()> {
        if self.local_capacity_bytes == 0 {
            return Err(FarMemError::Config(
                "local_capacity_bytes must be positive".into(),
            ));
        }
        if !(self.high_water > 0.0 && self.high_water <= 1.0) {
            return Err(FarMemError::Config(format!(
                "high_water {} must be in (0, 1]",
                self.high_water
            )));
        }
        if !(self.low_water >= 0.0 && self.low_water <= self.high_water) {
            return Err(FarMemError::Config(format!(
                "low_water {} must be in [0, high_water]",
                self.low_water
            )));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(FarMemError::Config("fetch_timeout_ms must be positive".into()));
        }
        if self.connections == 0 {
            return Err(FarMemError::Config("connections must be positive".into()));
        }
        Ok(())
    }
}
