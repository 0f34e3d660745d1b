//! Subscription configuration (builder) and the subscription worker
//! itself — the engine's core pull/dispatch loop.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::broker::BrokerClient;
use crate::cancellation::Cancellation;
use crate::consumer::MessageConsumer;
use crate::error::RetrieveError;
use crate::exceptions::ExceptionResolver;
use crate::model::{MessageBin, MessageResponse, RawIncomingEnvelope};
use crate::pool::WorkerPool;
use crate::refresher::Refresher;
use crate::retry::{clamp_delay, ConstantRetryDelay, RetryDelayGenerator};
use crate::serializer::Serializer;
use crate::ConfigurationError;

/// Fires after a delivery's disposition has been decided and applied. By
/// the time this runs the typed payload has already been consumed (moved
/// into the consumer call), so this only sees the raw envelope — callers
/// hook in metrics, audit logging, and the like here instead of inside
/// the consumer itself.
#[async_trait]
pub trait Finalizer: Send + Sync {
    async fn finalize(&self, envelope: &RawIncomingEnvelope, disposition: MessageResponse) {
        let _ = (envelope, disposition);
    }
}

#[derive(Default)]
pub struct NoopFinalizer;

#[async_trait]
impl Finalizer for NoopFinalizer {}

pub struct SubscriptionConfiguration<M: Send + Sync + 'static> {
    pub(crate) bin: MessageBin,
    pub(crate) consumer: Arc<dyn MessageConsumer<M>>,
    pub(crate) serializer: Arc<dyn Serializer<M>>,
    pub(crate) message_capacity: usize,
    pub(crate) exception_resolver: Arc<ExceptionResolver>,
    pub(crate) retry_delay_generator: Arc<dyn RetryDelayGenerator>,
    pub(crate) finalizer: Arc<dyn Finalizer>,
}

impl<M: Send + Sync + 'static> SubscriptionConfiguration<M> {
    pub fn builder(
        bin: MessageBin,
        consumer: Arc<dyn MessageConsumer<M>>,
        serializer: Arc<dyn Serializer<M>>,
    ) -> SubscriptionConfigurationBuilder<M> {
        SubscriptionConfigurationBuilder {
            bin,
            consumer,
            serializer,
            message_capacity: 1,
            exception_resolver: None,
            retry_delay_generator: None,
            finalizer: None,
        }
    }
}

pub struct SubscriptionConfigurationBuilder<M: Send + Sync + 'static> {
    bin: MessageBin,
    consumer: Arc<dyn MessageConsumer<M>>,
    serializer: Arc<dyn Serializer<M>>,
    message_capacity: usize,
    exception_resolver: Option<Arc<ExceptionResolver>>,
    retry_delay_generator: Option<Arc<dyn RetryDelayGenerator>>,
    finalizer: Option<Arc<dyn Finalizer>>,
}

impl<M: Send + Sync + 'static> SubscriptionConfigurationBuilder<M> {
    pub fn message_capacity(mut self, capacity: usize) -> Self {
        self.message_capacity = capacity;
        self
    }

    pub fn exception_resolver(mut self, resolver: ExceptionResolver) -> Self {
        self.exception_resolver = Some(Arc::new(resolver));
        self
    }

    pub fn retry_delay_generator(mut self, generator: Arc<dyn RetryDelayGenerator>) -> Self {
        self.retry_delay_generator = Some(generator);
        self
    }

    pub fn finalizer(mut self, finalizer: Arc<dyn Finalizer>) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    pub fn build(self) -> Result<SubscriptionConfiguration<M>, ConfigurationError> {
        if self.message_capacity == 0 {
            return Err(ConfigurationError::NonPositiveCapacity(self.message_capacity));
        }
        Ok(SubscriptionConfiguration {
            bin: self.bin,
            consumer: self.consumer,
            serializer: self.serializer,
            message_capacity: self.message_capacity,
            exception_resolver: self.exception_resolver.unwrap_or_else(|| Arc::new(ExceptionResolver::new())),
            retry_delay_generator: self
                .retry_delay_generator
                .unwrap_or_else(|| Arc::new(ConstantRetryDelay(5))),
            finalizer: self.finalizer.unwrap_or_else(|| Arc::new(NoopFinalizer::default())),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Built,
    Running,
    Cancelling,
    Terminated,
}

/// A `Drop`-based guard over a single delivery's visibility-refresh task.
/// Cancelling the refresh is an async operation (it locks the refresher's
/// task map), so the normal path calls `cancel().await` explicitly once
/// the disposition has been decided; the `Drop` impl is the fallback for
/// the case a panic unwinds past that point without running it — it
/// spawns the cleanup rather than skipping it, since a synchronous `Drop`
/// cannot itself `.await`. Cancelling twice is harmless (see
/// `Refresher::cancel_refresh`).
struct RefreshGuard<B: BrokerClient + 'static> {
    refresher: Refresher<B>,
    receipt: crate::model::Receipt,
    cancelled: bool,
}

impl<B: BrokerClient + 'static> RefreshGuard<B> {
    fn new(refresher: Refresher<B>, receipt: crate::model::Receipt) -> Self {
        Self {
            refresher,
            receipt,
            cancelled: false,
        }
    }

    async fn cancel(&mut self) {
        if !self.cancelled {
            self.refresher.cancel_refresh(&self.receipt).await;
            self.cancelled = true;
        }
    }
}

impl<B: BrokerClient + 'static> Drop for RefreshGuard<B> {
    fn drop(&mut self) {
        if !self.cancelled {
            let refresher = self.refresher.clone();
            let receipt = self.receipt.clone();
            tokio::spawn(async move {
                refresher.cancel_refresh(&receipt).await;
            });
        }
    }
}

/// The subscription worker: one pull/dispatch loop per `subscribe()` call,
/// bounded by `message_capacity` in-flight messages and driven through
/// the state machine `Built -> Running -> Cancelling -> Terminated`, with
/// no backward transitions.
pub struct SubscriptionWorker<M: Send + Sync + 'static, B: BrokerClient + 'static> {
    config: SubscriptionConfiguration<M>,
    broker: Arc<B>,
    refresher: Refresher<B>,
    pool: WorkerPool,
    permits: Arc<Semaphore>,
    cancellation: Cancellation,
    state: StdMutex<SubscriptionState>,
}

impl<M: Send + Sync + 'static, B: BrokerClient + 'static> SubscriptionWorker<M, B> {
    /// Starts the pull/dispatch loop on the current runtime and returns a
    /// handle to it. The loop is already `Running` by the time this
    /// returns.
    pub fn start(config: SubscriptionConfiguration<M>, broker: Arc<B>, refresher: Refresher<B>) -> Arc<Self> {
        let capacity = config.message_capacity;
        let worker = Arc::new(Self {
            config,
            broker,
            refresher,
            pool: WorkerPool::new(capacity),
            permits: Arc::new(Semaphore::new(capacity)),
            cancellation: Cancellation::new(),
            state: StdMutex::new(SubscriptionState::Built),
        });

        *worker.state.lock().unwrap() = SubscriptionState::Running;

        let loop_worker = Arc::clone(&worker);
        tokio::spawn(async move {
            loop_worker.run_loop().await;
        });

        worker
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.lock().unwrap()
    }

    /// Requests cancellation: the pull loop stops requesting new batches,
    /// any already-submitted handlers run to completion, and the state
    /// transitions to `Terminated` once the worker pool has drained.
    /// Closing the semaphore unblocks a pull loop parked on permit
    /// acquisition; the broker's own cancellation contract unblocks one
    /// parked on a long-poll receive.
    pub fn cancel(&self) {
        self.cancellation.cancel();
        self.permits.close();
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            if self.cancellation.is_cancelled() {
                break;
            }

            let permit = match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let available = self.permits.available_permits() + 1;
            drop(permit);

            let batch = match self
                .broker
                .retrieve_messages(&self.config.bin, available, &self.cancellation)
                .await
            {
                Ok(envelopes) => envelopes,
                Err(RetrieveError::Cancelled(_)) => break,
                Err(RetrieveError::Broker(err)) => {
                    tracing::error!(error = %err, bin = %self.config.bin, "retrieve_messages failed");
                    continue;
                }
            };

            for envelope in batch {
                let owned_permit = match Arc::clone(&self.permits).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let worker = Arc::clone(&self);
                let submitted = worker
                    .pool
                    .submit(async move {
                        worker.handle(envelope, owned_permit).await;
                    })
                    .await;
                if submitted.is_err() {
                    // Pool is shutting down; the permit we just acquired is
                    // dropped here, and the message is left in-flight for
                    // the broker's visibility timeout to redeliver.
                    break;
                }
            }
        }

        *self.state.lock().unwrap() = SubscriptionState::Cancelling;
        self.pool.shutdown();
        self.pool.drain(Duration::from_secs(30)).await;
        *self.state.lock().unwrap() = SubscriptionState::Terminated;
    }

    async fn handle(self: Arc<Self>, envelope: RawIncomingEnvelope, permit: OwnedSemaphorePermit) {
        let _permit = permit;
        let bin = self.config.bin.clone();

        self.refresher
            .schedule_refresh(bin.clone(), envelope.receipt.clone(), envelope.visibility_timeout)
            .await;
        let mut refresh_guard = RefreshGuard::new(self.refresher.clone(), envelope.receipt.clone());

        let ctx = envelope.context();
        let disposition = self.resolve_disposition(&envelope, &ctx).await;

        refresh_guard.cancel().await;

        self.apply_disposition(&bin, &envelope, disposition).await;
        self.config.finalizer.finalize(&envelope, disposition).await;
    }

    async fn resolve_disposition(
        &self,
        envelope: &RawIncomingEnvelope,
        ctx: &crate::model::MessageContext,
    ) -> MessageResponse {
        match self.config.serializer.deserialize(&envelope.message) {
            Ok(message) => match self.config.consumer.consume(message, ctx).await {
                Ok(response) => response,
                Err(failure) => self.config.exception_resolver.resolve(&failure, ctx),
            },
            Err(err) => self.config.exception_resolver.resolve(&err.into(), ctx),
        }
    }

    async fn apply_disposition(&self, bin: &MessageBin, envelope: &RawIncomingEnvelope, disposition: MessageResponse) {
        match disposition {
            MessageResponse::Consume => {
                if let Err(err) = self.broker.dispose_message(bin, &envelope.receipt).await {
                    tracing::error!(error = %err, message_id = %envelope.message_id, "dispose_message failed");
                }
            }
            MessageResponse::Retry => {
                let delay = clamp_delay(self.config.retry_delay_generator.delay_seconds(envelope.read_count));
                if let Err(err) = self.broker.return_message(bin, &envelope.receipt, delay).await {
                    tracing::error!(error = %err, message_id = %envelope.message_id, "return_message failed");
                }
            }
            MessageResponse::Terminate => {
                // No broker call: the message's visibility timeout expires
                // naturally, and the broker's own redrive policy (if any)
                // takes it from there. Queuebacca never republishes to a
                // dead-letter bin itself.
                tracing::debug!(message_id = %envelope.message_id, "terminating delivery without acknowledging");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MockBroker, MockBrokerConfig};
    use crate::error::ConsumeFailure;
    use crate::serializer::JsonSerializer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    struct EchoConsumer {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MessageConsumer<String> for EchoConsumer {
        async fn consume(
            &self,
            _message: String,
            _ctx: &crate::model::MessageContext,
        ) -> Result<MessageResponse, ConsumeFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(MessageResponse::Consume)
        }
    }

    struct AlwaysFailConsumer;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct BoomError;

    #[async_trait]
    impl MessageConsumer<String> for AlwaysFailConsumer {
        async fn consume(
            &self,
            _message: String,
            _ctx: &crate::model::MessageContext,
        ) -> Result<MessageResponse, ConsumeFailure> {
            Err(ConsumeFailure::from_consumer_error(BoomError))
        }
    }

    #[tokio::test]
    async fn a_published_message_is_consumed_and_disposed() {
        let broker = Arc::new(MockBroker::new(MockBrokerConfig {
            long_poll_timeout: StdDuration::from_millis(100),
            poll_interval: StdDuration::from_millis(5),
            ..MockBrokerConfig::default()
        }));
        let bin = MessageBin::new("orders").unwrap();
        broker
            .send_message(&bin, "\"hello\"".to_string(), 0)
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let consumer = Arc::new(EchoConsumer { calls: Arc::clone(&calls) });
        let serializer: Arc<dyn Serializer<String>> = Arc::new(JsonSerializer::<String>::new());
        let config = SubscriptionConfiguration::builder(bin.clone(), consumer, serializer)
            .message_capacity(2)
            .build()
            .unwrap();

        let refresher = Refresher::new(Arc::clone(&broker));
        let worker = SubscriptionWorker::start(config, Arc::clone(&broker), refresher);

        tokio::time::sleep(StdDuration::from_millis(150)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(broker.len(&bin).await, 0);

        worker.cancel();
    }

    #[tokio::test]
    async fn unmatched_consumer_failure_is_retried_not_dropped() {
        let broker = Arc::new(MockBroker::new(MockBrokerConfig {
            long_poll_timeout: StdDuration::from_millis(100),
            poll_interval: StdDuration::from_millis(5),
            default_visibility_timeout: StdDuration::from_millis(50),
            ..MockBrokerConfig::default()
        }));
        let bin = MessageBin::new("orders").unwrap();
        broker
            .send_message(&bin, "\"hello\"".to_string(), 0)
            .await
            .unwrap();

        let consumer = Arc::new(AlwaysFailConsumer);
        let serializer: Arc<dyn Serializer<String>> = Arc::new(JsonSerializer::<String>::new());
        let config = SubscriptionConfiguration::builder(bin.clone(), consumer, serializer)
            .message_capacity(1)
            .retry_delay_generator(Arc::new(ConstantRetryDelay(0)))
            .build()
            .unwrap();

        let refresher = Refresher::new(Arc::clone(&broker));
        let worker = SubscriptionWorker::start(config, Arc::clone(&broker), refresher);

        tokio::time::sleep(StdDuration::from_millis(300)).await;
        assert_eq!(broker.len(&bin).await, 1);

        worker.cancel();
    }

    #[tokio::test]
    async fn cancel_drains_to_terminated() {
        let broker = Arc::new(MockBroker::new(MockBrokerConfig {
            long_poll_timeout: StdDuration::from_millis(50),
            poll_interval: StdDuration::from_millis(5),
            ..MockBrokerConfig::default()
        }));
        let bin = MessageBin::new("orders").unwrap();
        let consumer = Arc::new(EchoConsumer {
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let serializer: Arc<dyn Serializer<String>> = Arc::new(JsonSerializer::<String>::new());
        let config = SubscriptionConfiguration::builder(bin, consumer, serializer)
            .build()
            .unwrap();

        let refresher = Refresher::new(Arc::clone(&broker));
        let worker = SubscriptionWorker::start(config, broker, refresher);
        assert_eq!(worker.state(), SubscriptionState::Running);

        worker.cancel();
        tokio::time::sleep(StdDuration::from_millis(200)).await;
        assert_eq!(worker.state(), SubscriptionState::Terminated);
    }
}
