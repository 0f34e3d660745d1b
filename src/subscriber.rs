//! Subscriber: registry of active subscription workers; bulk cancel.
//!
//! Tracks heterogeneous `SubscriptionWorker<M, B>` instances behind one
//! object-safe handle — one bin may carry `String` messages, another a
//! domain enum, all registered with the same `Subscriber`.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::broker::BrokerClient;
use crate::refresher::Refresher;
use crate::subscription::{SubscriptionConfiguration, SubscriptionState, SubscriptionWorker};

/// Type-erased view over a running `SubscriptionWorker<M, B>`. A `Subscriber`
/// only ever needs to cancel a subscription or read its state back, never
/// its message type, so this is the whole seam needed for heterogeneous
/// storage.
pub trait SubscriptionHandle: Send + Sync {
    fn cancel(&self);
    fn state(&self) -> SubscriptionState;
}

impl<M, B> SubscriptionHandle for SubscriptionWorker<M, B>
where
    M: Send + Sync + 'static,
    B: BrokerClient + 'static,
{
    fn cancel(&self) {
        SubscriptionWorker::cancel(self)
    }

    fn state(&self) -> SubscriptionState {
        SubscriptionWorker::state(self)
    }
}

/// Starts and tracks every subscription created through it, sharing one
/// broker client and one process-wide [`Refresher`] across all of them so
/// the refresh scheduler's thread cost is amortized across every bin this
/// process consumes from. `cancel_all` tears every registered subscription
/// down together, the way a process shutting down stops consuming from
/// every bin at once.
pub struct Subscriber<B> {
    broker: Arc<B>,
    refresher: Refresher<B>,
    subscriptions: Mutex<Vec<Arc<dyn SubscriptionHandle>>>,
}

impl<B: BrokerClient + 'static> Subscriber<B> {
    pub fn new(broker: Arc<B>) -> Self {
        let refresher = Refresher::new(Arc::clone(&broker));
        Self {
            broker,
            refresher,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Starts `config`'s worker and registers it. The returned handle is
    /// the same `Arc<SubscriptionWorker<M, B>>` `SubscriptionWorker::start`
    /// produces — callers who need the typed handle (e.g. to poll `state()`
    /// without going through the registry) can keep it directly.
    pub async fn subscribe<M>(&self, config: SubscriptionConfiguration<M>) -> Arc<SubscriptionWorker<M, B>>
    where
        M: Send + Sync + 'static,
    {
        let worker = SubscriptionWorker::start(config, Arc::clone(&self.broker), self.refresher.clone());
        let handle: Arc<dyn SubscriptionHandle> = Arc::clone(&worker);
        self.subscriptions.lock().await.push(handle);
        worker
    }

    /// Cancels every subscription registered so far. Does not wait for any
    /// of them to drain — callers that need that should hold on to the
    /// typed handle returned by `subscribe` and await its own drain, or
    /// poll `state()` via `active_states`.
    pub async fn cancel_all(&self) {
        for subscription in self.subscriptions.lock().await.iter() {
            subscription.cancel();
        }
    }

    pub async fn active_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    pub async fn active_states(&self) -> Vec<SubscriptionState> {
        self.subscriptions
            .lock()
            .await
            .iter()
            .map(|subscription| subscription.state())
            .collect()
    }
}
