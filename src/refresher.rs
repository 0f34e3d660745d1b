//! Visibility-lease refresher: a process-wide scheduler that keeps a
//! long-running message invisible to other consumers by periodically
//! calling `extend_visibility`, until the handler finishes and cancels it.
//! One shared task map, keyed by receipt, tracks every in-flight refresh
//! across every subscription this process runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::broker::BrokerClient;
use crate::model::{MessageBin, Receipt};

const REFRESH_THRESHOLD: Duration = Duration::from_secs(120);
const REFRESH_SAFETY_MARGIN: Duration = Duration::from_secs(60);

fn refresh_delay(visibility_timeout: Duration) -> Duration {
    if visibility_timeout < REFRESH_THRESHOLD {
        visibility_timeout / 2
    } else {
        visibility_timeout.saturating_sub(REFRESH_SAFETY_MARGIN)
    }
}

struct RefresherInner<B> {
    broker: Arc<B>,
    tasks: Mutex<HashMap<Receipt, JoinHandle<()>>>,
}

/// Cheap to clone — every clone shares the same underlying task map and
/// broker handle, the way `Refresher` instances are meant to be passed
/// around the subscription worker pool.
pub struct Refresher<B> {
    inner: Arc<RefresherInner<B>>,
}

impl<B> Clone for Refresher<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: BrokerClient + 'static> Refresher<B> {
    pub fn new(broker: Arc<B>) -> Self {
        Self {
            inner: Arc::new(RefresherInner {
                broker,
                tasks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Schedule a refresh for `receipt`: spawns a single task that sleeps
    /// and extends visibility in a loop until `cancel_refresh` aborts it.
    /// The task's `JoinHandle` is inserted into the map before the task
    /// can possibly be observed by a concurrent `cancel_refresh` — there
    /// is exactly one handle for this receipt's entire refresh lifetime,
    /// so an abort always reaches the right (and only) task. An earlier
    /// design re-spawned a fresh task after every extend and only then
    /// inserted its handle, which let a `cancel_refresh` racing the
    /// previous task's reschedule abort the outgoing task while its
    /// successor's handle was still in flight, orphaning it: the
    /// successor kept extending a disposed message forever with nothing
    /// left to cancel it.
    pub async fn schedule_refresh(&self, bin: MessageBin, receipt: Receipt, visibility_timeout: Duration) {
        let delay = refresh_delay(visibility_timeout);
        let broker = Arc::clone(&self.inner.broker);
        let task_receipt = receipt.clone();
        let handle = tokio::spawn(Self::refresh_loop(broker, bin, task_receipt, visibility_timeout, delay));

        let mut tasks = self.inner.tasks.lock().await;
        if let Some(old) = tasks.insert(receipt, handle) {
            old.abort();
        }
    }

    async fn refresh_loop(broker: Arc<B>, bin: MessageBin, receipt: Receipt, visibility_timeout: Duration, delay: Duration) {
        let seconds = visibility_timeout.as_secs() as u32;
        loop {
            tokio::time::sleep(delay).await;
            if let Err(err) = broker.extend_visibility(&bin, &receipt, seconds).await {
                tracing::warn!(error = %err, receipt = %receipt, "failed to extend message visibility");
            }
        }
    }

    /// Idempotent: cancelling a receipt with no scheduled refresh (already
    /// cancelled, or never scheduled) is a no-op, not an error. A refresh
    /// that fires concurrently with cancellation is harmless — at worst
    /// one extra `extend_visibility` call lands after disposition, which
    /// the broker treats as a no-op on an already-deleted message.
    pub async fn cancel_refresh(&self, receipt: &Receipt) {
        if let Some(handle) = self.inner.tasks.lock().await.remove(receipt) {
            handle.abort();
        }
    }

    pub async fn active_count(&self) -> usize {
        self.inner.tasks.lock().await.len()
    }
}
