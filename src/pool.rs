//! Worker pool: a bounded async executor for per-message handler tasks,
//! built on `tokio::spawn` rather than an OS-thread pool, since the work
//! being pooled here is I/O-bound (broker calls, user consumer code that
//! itself typically awaits network/database calls). Concurrency is gated
//! externally by the subscription worker's own semaphore permits — this
//! pool just runs what it's given and tracks the handles so `drain` can
//! wait for in-flight tasks to finish.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolError {
    #[error("worker pool is shutting down")]
    ShuttingDown,
}

pub struct WorkerPool {
    shutdown: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(_capacity: usize) -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `task` on the runtime. Rejected once `shutdown()` has been
    /// called; the caller is responsible for treating a rejected
    /// submission as an abandoned message (its permit is simply dropped).
    ///
    /// Always waits for the handle map's lock rather than skipping the
    /// tracking step under contention — a handle dropped here would let
    /// `drain` return before that task finished, handing back a worker
    /// that reports `Terminated` while a consumer is still running.
    pub async fn submit<F>(&self, task: F) -> Result<(), WorkerPoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(WorkerPoolError::ShuttingDown);
        }
        let handle = tokio::spawn(task);
        let mut handles = self.handles.lock().await;
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Wait for all tracked tasks to finish, up to `grace_period`. Tasks
    /// still running past the deadline are left to finish on their own;
    /// this never aborts them.
    pub async fn drain(&self, grace_period: Duration) {
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().await;
            std::mem::take(&mut *guard)
        };
        let join_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        let _ = tokio::time::timeout(grace_period, join_all).await;
    }
}
