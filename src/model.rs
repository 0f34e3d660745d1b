//! Wire-adjacent types shared by the broker, serializer, and subscription
//! worker: bins, envelopes, contexts, and the three-way consumer verdict.

use std::time::{Duration, Instant};

use crate::error::ConfigurationError;

/// The named destination a subscription reads from or a publisher writes
/// to — a topic, a queue name, whatever the broker calls it. Queuebacca
/// itself never interprets the name; it is an opaque key the `BrokerClient`
/// implementation maps to its own addressing scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageBin {
    name: String,
}

impl MessageBin {
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigurationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigurationError::EmptyBinName);
        }
        Ok(Self { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for MessageBin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Opaque, broker-issued handle identifying one in-flight delivery. Two
/// deliveries of the same logical message (e.g. after a retry) get
/// different receipts — the receipt, not the message id, is what
/// `return_message`/`dispose_message`/`extend_visibility` key off of.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Receipt(pub String);

impl std::fmt::Display for Receipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything a consumer, scope, or exception handler might want to know
/// about a delivery besides the deserialized payload itself.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub message_id: String,
    pub bin: MessageBin,
    pub read_count: u32,
    pub first_received: Instant,
    pub raw_message: String,
}

/// A message pulled off the broker, not yet deserialized into the
/// application's type — that happens inside the subscription worker,
/// which is the only place that knows which `Serializer<M>` applies.
///
/// `visibility_timeout` is the lease duration the broker actually applied
/// to this delivery (bin-specific, broker-owned) — the subscription
/// worker schedules its visibility refresh against this value rather than
/// a separately configured one, so the two can never drift apart.
#[derive(Debug, Clone)]
pub struct IncomingEnvelope<M> {
    pub message_id: String,
    pub bin: MessageBin,
    pub receipt: Receipt,
    pub read_count: u32,
    pub first_received: Instant,
    pub visibility_timeout: Duration,
    pub message: M,
}

/// Raw form as returned by `BrokerClient::retrieve_messages`: the body is
/// still the wire string, not yet decoded.
pub type RawIncomingEnvelope = IncomingEnvelope<String>;

impl RawIncomingEnvelope {
    pub fn context(&self) -> MessageContext {
        MessageContext {
            message_id: self.message_id.clone(),
            bin: self.bin.clone(),
            read_count: self.read_count,
            first_received: self.first_received,
            raw_message: self.message.clone(),
        }
    }
}

/// Acknowledgement returned by `send_message`/`send_messages`: the
/// broker-assigned id and the exact bytes it accepted.
#[derive(Debug, Clone)]
pub struct OutgoingEnvelope<M> {
    pub message_id: String,
    pub message: M,
}

pub type RawOutgoingEnvelope = OutgoingEnvelope<String>;

/// What a consumer, scope, or exception handler decided to do with a
/// delivery. The subscription worker is the only thing that ever turns
/// this into a broker call (dispose/return/nothing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageResponse {
    /// Acknowledge: delete the message from the broker.
    Consume,
    /// Redeliver after the retry-delay generator's computed delay.
    Retry,
    /// Give up without acknowledging; let the broker's own visibility
    /// timeout and redrive policy (if any) decide the message's fate.
    Terminate,
}

/// 256 KiB, as a byte count. Earlier Queuebacca clients carried this as
/// `MAX_MESSAGE_SIZE_KB` despite the value always being in bytes; named
/// correctly here.
pub const MAX_MESSAGE_SIZE_BYTES: usize = 256 * 1024;
