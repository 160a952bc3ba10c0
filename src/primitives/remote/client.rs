use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tracing::{debug, warn};

use super::protocol::{Request, Response, Status};
use super::transport::Transport;
use crate::options::FarMemOptions;
use crate::types::{FarMemError, ObjectId, Result, SeqNo};

/// Counters describing swap client traffic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SwapStats {
    /// FETCH requests that completed.
    pub fetches: u64,
    /// FETCH requests answered NOT_FOUND.
    pub not_found: u64,
    /// WRITE_BACK requests that completed.
    pub write_backs: u64,
    /// Attempts repeated after a transient failure.
    pub retries: u64,
    /// Attempts that hit the per-attempt timeout.
    pub timeouts: u64,
    /// Requests that exhausted the retry budget or got an ERROR status.
    pub failures: u64,
}

impl fmt::Display for SwapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetches={} not_found={} write_backs={} retries={} timeouts={} failures={}",
            self.fetches, self.not_found, self.write_backs, self.retries, self.timeouts, self.failures
        )
    }
}

#[derive(Default)]
struct Counters {
    fetches: AtomicU64,
    not_found: AtomicU64,
    write_backs: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
}

/// Retry policy applied to every remote request.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Bound on one attempt.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles per retry.
    pub backoff: Duration,
    /// Cap on a single delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Builds the policy described by `options`.
    pub fn from_options(options: &FarMemOptions) -> Self {
        Self {
            timeout: options.fetch_timeout(),
            max_retries: options.max_retries,
            backoff: options.retry_backoff(),
            max_backoff: options.max_backoff(),
        }
    }

    fn delay(&self, retry: u32) -> Duration {
        let base = self
            .backoff
            .saturating_mul(1u32 << retry.min(16))
            .min(self.max_backoff);
        let half = (base.as_millis() / 2) as u64;
        let jitter = if half == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=half)
        };
        (base + Duration::from_millis(jitter)).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_options(&FarMemOptions::default())
    }
}

/// Issues FETCH and WRITE_BACK requests to the remote pool.
///
/// Every request gets a fresh sequence number from one monotonically
/// increasing counter. Retries replay the same number, so the server can
/// drop duplicates and stale writes.
pub struct SwapClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    next_seq: AtomicU64,
    counters: Counters,
}

impl SwapClient {
    /// Creates a client over `transport`.
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            next_seq: AtomicU64::new(1),
            counters: Counters::default(),
        }
    }

    fn next_seq(&self) -> SeqNo {
        SeqNo(self.next_seq.fetch_add(1, AtomicOrdering::Relaxed))
    }

    /// Fetches the latest remote payload for `id`.
    ///
    /// An object the server has never seen yields an empty payload.
    pub async fn fetch(&self, id: ObjectId) -> Result<Bytes> {
        let request = Request::fetch(id, self.next_seq());
        let response = self.send(request).await?;
        match response.status {
            Status::Ok => {
                self.counters.fetches.fetch_add(1, AtomicOrdering::Relaxed);
                Ok(response.payload)
            }
            Status::NotFound => {
                self.counters.fetches.fetch_add(1, AtomicOrdering::Relaxed);
                self.counters.not_found.fetch_add(1, AtomicOrdering::Relaxed);
                Ok(Bytes::new())
            }
            Status::Error => Err(self.remote_error(id, &response)),
        }
    }

    /// Stores `payload` as the newest record for `id`.
    pub async fn write_back(&self, id: ObjectId, payload: Bytes) -> Result<()> {
        let request = Request::write_back(id, self.next_seq(), payload);
        let response = self.send(request).await?;
        match response.status {
            Status::Ok => {
                self.counters.write_backs.fetch_add(1, AtomicOrdering::Relaxed);
                Ok(())
            }
            Status::NotFound => {
                self.counters.failures.fetch_add(1, AtomicOrdering::Relaxed);
                Err(FarMemError::Protocol("write-back answered NOT_FOUND"))
            }
            Status::Error => Err(self.remote_error(id, &response)),
        }
    }

    fn remote_error(&self, id: ObjectId, response: &Response) -> FarMemError {
        self.counters.failures.fetch_add(1, AtomicOrdering::Relaxed);
        let message = response.message();
        warn!(object = %id, message = %message, "swap.remote_error");
        FarMemError::Remote(message)
    }

    async fn send(&self, request: Request) -> Result<Response> {
        let attempts = self.policy.max_retries.saturating_add(1);
        for attempt in 0..attempts {
            if attempt > 0 {
                self.counters.retries.fetch_add(1, AtomicOrdering::Relaxed);
                let delay = self.policy.delay(attempt - 1);
                debug!(
                    object = %request.object_id,
                    seq = %request.seq,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "swap.retry"
                );
                tokio::time::sleep(delay).await;
            }
            let exchange = self.transport.round_trip(request.clone());
            match tokio::time::timeout(self.policy.timeout, exchange).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(err)) if err.is_transient() => {
                    debug!(object = %request.object_id, error = %err, "swap.attempt_failed");
                }
                Ok(Err(err)) => {
                    self.counters.failures.fetch_add(1, AtomicOrdering::Relaxed);
                    return Err(err);
                }
                Err(_) => {
                    self.counters.timeouts.fetch_add(1, AtomicOrdering::Relaxed);
                    debug!(object = %request.object_id, "swap.timeout");
                }
            }
        }
        self.counters.failures.fetch_add(1, AtomicOrdering::Relaxed);
        warn!(object = %request.object_id, attempts, "swap.unavailable");
        Err(FarMemError::RemoteUnavailable {
            object: request.object_id,
            attempts,
        })
    }

    /// Returns a snapshot of client counters.
    pub fn stats(&self) -> SwapStats {
        SwapStats {
            fetches: self.counters.fetches.load(AtomicOrdering::Relaxed),
            not_found: self.counters.not_found.load(AtomicOrdering::Relaxed),
            write_backs: self.counters.write_backs.load(AtomicOrdering::Relaxed),
            retries: self.counters.retries.load(AtomicOrdering::Relaxed),
            timeouts: self.counters.timeouts.load(AtomicOrdering::Relaxed),
            failures: self.counters.failures.load(AtomicOrdering::Relaxed),
        }
    }
}
