//! Publisher: typed single and batched sends over a `BrokerClient`.
//!
//! Serializes and sends through the visibility-timeout contract of
//! [`crate::broker::BrokerClient`] rather than a fire-and-forget topic
//! publish.

use std::sync::Arc;

use crate::broker::BrokerClient;
use crate::error::QueuebaccaError;
use crate::model::{MessageBin, OutgoingEnvelope};
use crate::serializer::Serializer;

/// The reference broker's own per-call cap on a single `send_messages`
/// batch (SQS: 10). Larger batches are chunked rather than rejected.
pub const MAX_BATCH_SIZE: usize = 10;

/// Publishes typed messages into a bin. Holds no subscription-side state —
/// unlike `Subscriber`, nothing here needs to be cancelled or drained.
pub struct Publisher<B> {
    broker: Arc<B>,
}

impl<B: BrokerClient> Publisher<B> {
    pub fn new(broker: Arc<B>) -> Self {
        Self { broker }
    }

    /// Serializes `message` and sends it as a single delivery.
    pub async fn publish<M>(
        &self,
        bin: &MessageBin,
        serializer: &dyn Serializer<M>,
        message: M,
        delay_seconds: u32,
    ) -> Result<OutgoingEnvelope<M>, QueuebaccaError>
    where
        M: Send + Sync,
    {
        let raw = serializer.serialize(&message)?;
        let sent = self.broker.send_message(bin, raw, delay_seconds).await?;
        Ok(OutgoingEnvelope {
            message_id: sent.message_id,
            message,
        })
    }

    /// Serializes and sends every message in `messages`, chunking into
    /// batches of at most [`MAX_BATCH_SIZE`] and delegating each chunk to
    /// the broker's own batch send. Envelopes are returned in input order;
    /// a failure partway through a chunk leaves earlier chunks already
    /// sent (the broker has no cross-chunk transaction to roll back).
    pub async fn publish_batch<M>(
        &self,
        bin: &MessageBin,
        serializer: &dyn Serializer<M>,
        messages: Vec<M>,
        delay_seconds: u32,
    ) -> Result<Vec<OutgoingEnvelope<M>>, QueuebaccaError>
    where
        M: Send + Sync,
    {
        let mut out = Vec::with_capacity(messages.len());
        let mut remaining = messages.into_iter();

        loop {
            let chunk: Vec<M> = remaining.by_ref().take(MAX_BATCH_SIZE).collect();
            if chunk.is_empty() {
                break;
            }

            let mut raw_messages = Vec::with_capacity(chunk.len());
            for message in &chunk {
                raw_messages.push(serializer.serialize(message)?);
            }

            let sent = self.broker.send_messages(bin, raw_messages, delay_seconds).await?;
            for (envelope, message) in sent.into_iter().zip(chunk.into_iter()) {
                out.push(OutgoingEnvelope {
                    message_id: envelope.message_id,
                    message,
                });
            }
        }

        Ok(out)
    }
}
