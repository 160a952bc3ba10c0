//! Adapter between the far-memory layer and the cooperative scheduler.
//!
//! The far-memory layer needs exactly two things from the scheduler: a way to
//! start a logical thread (`spawn`) and a way to park the calling logical
//! thread until some other task signals completion (`yield_and_wait`). Worker
//! threads are never blocked; a parked task simply stops being polled until
//! its completion fires.

#![forbid(unsafe_code)]

use std::future::Future;
use std::pin::Pin;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::types::{FarMemError, Result};

/// A boxed logical thread body.
pub type BoxTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Spawning half of the scheduler collaborator.
pub trait Scheduler: Send + Sync + 'static {
    /// Starts `task` as an independent logical thread.
    fn spawn(&self, task: BoxTask) -> TaskHandle;
}

/// Handle to a spawned logical thread.
pub struct TaskHandle {
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Wraps a tokio join handle.
    pub fn from_join(join: JoinHandle<()>) -> Self {
        Self { join: Some(join) }
    }

    /// A handle for schedulers that do not expose task control.
    pub fn detached() -> Self {
        Self { join: None }
    }

    /// Requests cancellation of the task at its next suspension point.
    pub fn abort(&self) {
        if let Some(join) = &self.join {
            join.abort();
        }
    }

    /// Returns true once the task has run to completion or was aborted.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Waits for the task to finish. An aborted task counts as finished.
    pub async fn join(mut self) -> Result<()> {
        match self.join.take() {
            Some(join) => match join.await {
                Ok(()) => Ok(()),
                Err(err) if err.is_cancelled() => Ok(()),
                Err(_) => Err(FarMemError::Abandoned),
            },
            None => Ok(()),
        }
    }
}

/// Scheduler backed by a tokio runtime handle.
#[derive(Clone, Debug)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Creates a scheduler that spawns onto `handle`.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Creates a scheduler for the runtime the caller is running on.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| FarMemError::Config("no tokio runtime available".into()))
    }
}

impl Scheduler for TokioScheduler {
    fn spawn(&self, task: BoxTask) -> TaskHandle {
        TaskHandle::from_join(self.handle.spawn(task))
    }
}

/// Signalling half of a one-shot completion.
pub struct CompletionSignal<T> {
    tx: watch::Sender<Option<T>>,
}

/// Waiting half of a one-shot completion. Clones observe the same signal.
#[derive(Clone)]
pub struct Completion<T> {
    rx: watch::Receiver<Option<T>>,
}

/// Creates a completion pair. Any number of waiters may clone the receiver.
pub fn completion<T>() -> (CompletionSignal<T>, Completion<T>) {
    let (tx, rx) = watch::channel(None);
    (CompletionSignal { tx }, Completion { rx })
}

impl<T> CompletionSignal<T> {
    /// Publishes `value` and wakes every waiter.
    pub fn complete(self, value: T) {
        self.tx.send_replace(Some(value));
    }
}

impl<T: Clone> Completion<T> {
    /// Returns the published value without waiting, if any.
    pub fn peek(&self) -> Option<T> {
        self.rx.borrow().clone()
    }
}

/// Parks the calling logical thread until `completion` fires.
///
/// Returns `Abandoned` if the signalling half is dropped without completing.
pub async fn yield_and_wait<T: Clone>(completion: Completion<T>) -> Result<T> {
    let mut rx = completion.rx;
    let settled = match rx.wait_for(Option::is_some).await {
        Ok(value) => (*value).clone(),
        Err(_) => None,
    };
    settled.ok_or(FarMemError::Abandoned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn many_waiters_observe_one_signal() {
        let (signal, done) = completion::<u32>();
        let woken = Arc::new(AtomicUsize::new(0));
        let mut waiters = Vec::new();
        for _ in 0..8 {
            let done = done.clone();
            let woken = Arc::clone(&woken);
            waiters.push(tokio::spawn(async move {
                let value = yield_and_wait(done).await.unwrap();
                woken.fetch_add(1, Ordering::SeqCst);
                value
            }));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(woken.load(Ordering::SeqCst), 0);
        signal.complete(42);
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), 42);
        }
        assert_eq!(done.peek(), Some(42));
    }

    #[tokio::test]
    async fn dropped_signal_abandons_waiters() {
        let (signal, done) = completion::<()>();
        drop(signal);
        assert!(matches!(
            yield_and_wait(done).await,
            Err(FarMemError::Abandoned)
        ));
    }

    #[tokio::test]
    async fn late_waiter_sees_completed_value() {
        let (signal, done) = completion::<&'static str>();
        signal.complete("ready");
        assert_eq!(yield_and_wait(done).await.unwrap(), "ready");
    }

    #[tokio::test]
    async fn tokio_scheduler_runs_and_aborts_tasks() {
        let sched = TokioScheduler::current().unwrap();
        let (signal, done) = completion::<u8>();
        let handle = sched.spawn(Box::pin(async move { signal.complete(7) }));
        assert_eq!(yield_and_wait(done).await.unwrap(), 7);
        handle.join().await.unwrap();

        let sleeper = sched.spawn(Box::pin(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }));
        sleeper.abort();
        sleeper.join().await.unwrap();
    }
}
