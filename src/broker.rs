//! The broker contract and an in-memory reference implementation.
//!
//! `BrokerClient` is the seam a real wire protocol (RabbitMQ, Kafka, an
//! SQS SDK) fills in underneath. Queuebacca only needs the request/response
//! shape of an SQS-style visibility-timeout queue, so the trait below is
//! narrow: six operations, all dealing in raw (already serialized) message
//! bodies — decoding into the application's type happens one layer up,
//! inside the subscription worker.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::cancellation::Cancellation;
use crate::error::{BrokerError, CancellationError, RetrieveError};
use crate::model::{MessageBin, RawIncomingEnvelope, RawOutgoingEnvelope, Receipt};

#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn send_message(
        &self,
        bin: &MessageBin,
        raw_message: String,
        delay_seconds: u32,
    ) -> Result<RawOutgoingEnvelope, BrokerError>;

    async fn send_messages(
        &self,
        bin: &MessageBin,
        raw_messages: Vec<String>,
        delay_seconds: u32,
    ) -> Result<Vec<RawOutgoingEnvelope>, BrokerError>;

    /// Long-polls up to the broker's own timeout, returning as soon as at
    /// least one message is available or the poll window elapses (an
    /// empty `Vec` is not an error). Must unblock with
    /// `RetrieveError::Cancelled` when `cancellation` fires mid-poll.
    async fn retrieve_messages(
        &self,
        bin: &MessageBin,
        max_messages: usize,
        cancellation: &Cancellation,
    ) -> Result<Vec<RawIncomingEnvelope>, RetrieveError>;

    async fn return_message(
        &self,
        bin: &MessageBin,
        receipt: &Receipt,
        delay_seconds: u32,
    ) -> Result<(), BrokerError>;

    async fn dispose_message(&self, bin: &MessageBin, receipt: &Receipt) -> Result<(), BrokerError>;

    async fn extend_visibility(
        &self,
        bin: &MessageBin,
        receipt: &Receipt,
        visibility_timeout_seconds: u32,
    ) -> Result<(), BrokerError>;
}

/// Knobs for `MockBroker`: connection-level settings collapsed down to the
/// handful that matter for an in-memory visibility-timeout queue.
#[derive(Debug, Clone)]
pub struct MockBrokerConfig {
    pub default_visibility_timeout: Duration,
    pub long_poll_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for MockBrokerConfig {
    fn default() -> Self {
        Self {
            default_visibility_timeout: Duration::from_secs(30),
            long_poll_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_millis(50),
        }
    }
}

struct StoredMessage {
    message_id: String,
    body: String,
    read_count: u32,
    receipt: Receipt,
    visible_at: Instant,
    first_received: Option<Instant>,
}

#[derive(Default)]
struct BinState {
    messages: Vec<StoredMessage>,
}

impl BinState {
    fn poll(&mut self, bin: &MessageBin, max_messages: usize, visibility_timeout: Duration) -> Vec<RawIncomingEnvelope> {
        let now = Instant::now();
        let mut out = Vec::new();
        for msg in self.messages.iter_mut() {
            if out.len() >= max_messages {
                break;
            }
            if msg.visible_at > now {
                continue;
            }
            msg.read_count += 1;
            msg.receipt = Receipt(format!("{}-{}", msg.message_id, Uuid::new_v4()));
            msg.visible_at = now + visibility_timeout;
            let first_received = *msg.first_received.get_or_insert(now);
            out.push(RawIncomingEnvelope {
                message_id: msg.message_id.clone(),
                bin: bin.clone(),
                receipt: msg.receipt.clone(),
                read_count: msg.read_count,
                first_received,
                visibility_timeout,
                message: msg.body.clone(),
            });
        }
        out
    }
}

/// In-memory `BrokerClient`, the reference implementation used throughout
/// this crate's own test suite. Honors visibility timeouts, read counts,
/// and receipt rotation the way a real SQS-style broker would, so tests
/// against it exercise the same redelivery semantics production code
/// would see.
pub struct MockBroker {
    config: MockBrokerConfig,
    bins: Mutex<HashMap<String, BinState>>,
    extend_calls: std::sync::atomic::AtomicU64,
}

impl MockBroker {
    pub fn new(config: MockBrokerConfig) -> Self {
        Self {
            config,
            bins: Mutex::new(HashMap::new()),
            extend_calls: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Number of messages currently stored for `bin`, in-flight or not.
    /// Test-only instrumentation, not part of the broker contract.
    pub async fn len(&self, bin: &MessageBin) -> usize {
        self.bins
            .lock()
            .await
            .get(bin.name())
            .map(|state| state.messages.len())
            .unwrap_or(0)
    }

    /// Total `extend_visibility` calls this broker has observed, across
    /// every bin and receipt. Test-only instrumentation, not part of the
    /// broker contract.
    pub fn extend_calls(&self) -> u64 {
        self.extend_calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new(MockBrokerConfig::default())
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn send_message(
        &self,
        bin: &MessageBin,
        raw_message: String,
        delay_seconds: u32,
    ) -> Result<RawOutgoingEnvelope, BrokerError> {
        let message_id = Uuid::new_v4().to_string();
        let now = Instant::now();
        let mut bins = self.bins.lock().await;
        let state = bins.entry(bin.name().to_string()).or_default();
        state.messages.push(StoredMessage {
            message_id: message_id.clone(),
            body: raw_message.clone(),
            read_count: 0,
            receipt: Receipt(String::new()),
            visible_at: now + Duration::from_secs(delay_seconds as u64),
            first_received: None,
        });
        Ok(RawOutgoingEnvelope {
            message_id,
            message: raw_message,
        })
    }

    async fn send_messages(
        &self,
        bin: &MessageBin,
        raw_messages: Vec<String>,
        delay_seconds: u32,
    ) -> Result<Vec<RawOutgoingEnvelope>, BrokerError> {
        let mut out = Vec::with_capacity(raw_messages.len());
        for raw in raw_messages {
            out.push(self.send_message(bin, raw, delay_seconds).await?);
        }
        Ok(out)
    }

    async fn retrieve_messages(
        &self,
        bin: &MessageBin,
        max_messages: usize,
        cancellation: &Cancellation,
    ) -> Result<Vec<RawIncomingEnvelope>, RetrieveError> {
        let deadline = Instant::now() + self.config.long_poll_timeout;
        loop {
            {
                let mut bins = self.bins.lock().await;
                let state = bins.entry(bin.name().to_string()).or_default();
                let batch = state.poll(bin, max_messages, self.config.default_visibility_timeout);
                if !batch.is_empty() {
                    return Ok(batch);
                }
            }

            if cancellation.is_cancelled() {
                return Err(CancellationError.into());
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = cancellation.cancelled() => return Err(CancellationError.into()),
            }
        }
    }

    async fn return_message(
        &self,
        bin: &MessageBin,
        receipt: &Receipt,
        delay_seconds: u32,
    ) -> Result<(), BrokerError> {
        let mut bins = self.bins.lock().await;
        let state = bins
            .get_mut(bin.name())
            .ok_or_else(|| BrokerError::Return(format!("unknown bin {bin}")))?;
        let msg = state
            .messages
            .iter_mut()
            .find(|m| &m.receipt == receipt)
            .ok_or_else(|| BrokerError::Return(format!("unknown receipt {receipt}")))?;
        msg.visible_at = Instant::now() + Duration::from_secs(delay_seconds as u64);
        Ok(())
    }

    async fn dispose_message(&self, bin: &MessageBin, receipt: &Receipt) -> Result<(), BrokerError> {
        let mut bins = self.bins.lock().await;
        let state = bins
            .get_mut(bin.name())
            .ok_or_else(|| BrokerError::Dispose(format!("unknown bin {bin}")))?;
        let before = state.messages.len();
        state.messages.retain(|m| &m.receipt != receipt);
        if state.messages.len() == before {
            return Err(BrokerError::Dispose(format!("unknown receipt {receipt}")));
        }
        Ok(())
    }

    async fn extend_visibility(
        &self,
        bin: &MessageBin,
        receipt: &Receipt,
        visibility_timeout_seconds: u32,
    ) -> Result<(), BrokerError> {
        self.extend_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut bins = self.bins.lock().await;
        let state = bins
            .get_mut(bin.name())
            .ok_or_else(|| BrokerError::ExtendVisibility(format!("unknown bin {bin}")))?;
        let msg = state
            .messages
            .iter_mut()
            .find(|m| &m.receipt == receipt)
            .ok_or_else(|| BrokerError::ExtendVisibility(format!("unknown receipt {receipt}")))?;
        msg.visible_at = Instant::now() + Duration::from_secs(visibility_timeout_seconds as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin(name: &str) -> MessageBin {
        MessageBin::new(name).unwrap()
    }

    #[tokio::test]
    async fn send_then_retrieve_round_trips_the_body() {
        let broker = MockBroker::default();
        let b = bin("orders");
        broker.send_message(&b, "payload".to_string(), 0).await.unwrap();

        let cancellation = Cancellation::new();
        let batch = broker.retrieve_messages(&b, 10, &cancellation).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message, "payload");
        assert_eq!(batch[0].read_count, 1);
    }

    #[tokio::test]
    async fn retrieved_message_is_invisible_until_disposed_or_returned() {
        let broker = MockBroker::default();
        let b = bin("orders");
        broker.send_message(&b, "payload".to_string(), 0).await.unwrap();

        let cancellation = Cancellation::new();
        let first = broker.retrieve_messages(&b, 10, &cancellation).await.unwrap();
        assert_eq!(first.len(), 1);

        let config = MockBrokerConfig {
            long_poll_timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(5),
            ..MockBrokerConfig::default()
        };
        let broker_short = MockBroker::new(config);
        broker_short
            .send_message(&b, "payload".to_string(), 0)
            .await
            .unwrap();
        let delivered = broker_short
            .retrieve_messages(&b, 10, &cancellation)
            .await
            .unwrap();
        assert_eq!(delivered.len(), 1);
        let empty = broker_short
            .retrieve_messages(&b, 10, &cancellation)
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn returned_message_becomes_visible_again_after_delay() {
        let broker = MockBroker::new(MockBrokerConfig {
            long_poll_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
            ..MockBrokerConfig::default()
        });
        let b = bin("orders");
        broker.send_message(&b, "payload".to_string(), 0).await.unwrap();

        let cancellation = Cancellation::new();
        let delivered = broker.retrieve_messages(&b, 10, &cancellation).await.unwrap();
        let receipt = delivered[0].receipt.clone();
        broker.return_message(&b, &receipt, 0).await.unwrap();

        let redelivered = broker.retrieve_messages(&b, 10, &cancellation).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].read_count, 2);
        assert_ne!(redelivered[0].receipt, receipt);
    }

    #[tokio::test]
    async fn dispose_removes_the_message_permanently() {
        let broker = MockBroker::default();
        let b = bin("orders");
        broker.send_message(&b, "payload".to_string(), 0).await.unwrap();

        let cancellation = Cancellation::new();
        let delivered = broker.retrieve_messages(&b, 10, &cancellation).await.unwrap();
        broker
            .dispose_message(&b, &delivered[0].receipt)
            .await
            .unwrap();
        assert_eq!(broker.len(&b).await, 0);
    }

    #[tokio::test]
    async fn retrieve_unblocks_on_cancellation_during_long_poll() {
        let broker = MockBroker::new(MockBrokerConfig {
            long_poll_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            ..MockBrokerConfig::default()
        });
        let b = bin("empty");
        let cancellation = Cancellation::new();
        let waiter = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waiter.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_millis(200),
            broker.retrieve_messages(&b, 10, &cancellation),
        )
        .await
        .expect("retrieve_messages should unblock promptly on cancellation");

        assert!(matches!(result, Err(RetrieveError::Cancelled(_))));
    }
}
