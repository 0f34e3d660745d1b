//! Error taxonomy.
//!
//! Every error kind lands here as one `thiserror` variant or type:
//! `ConfigurationError` and `BrokerError` cross the public API
//! boundary (`Result<T, ...>` from builders, `publish`, `subscribe`),
//! `SerializationError` and `ConsumeFailure` stay internal to the
//! subscription worker and are always converted to a `MessageResponse`
//! before a worker-pool task finishes — they must never escape as an `Err`.

use thiserror::Error;

/// Raised when building a `SubscriptionConfiguration`, registering a
/// routed consumer, or constructing a `ScopedMessageConsumer`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("message capacity must be positive, got {0}")]
    NonPositiveCapacity(usize),

    #[error("message bin name must not be empty")]
    EmptyBinName,

    #[error("scope chain must contain at least one scope")]
    EmptyScopeChain,

    #[error("no consumer registered for route {route:?}")]
    NoConsumerForRoute { route: String },

    #[error("duplicate consumer registration for route {route:?}")]
    DuplicateRegistration { route: String },
}

/// Any failure surfaced by the broker client.
#[derive(Debug, Error, Clone)]
pub enum BrokerError {
    #[error("send_message failed: {0}")]
    Send(String),

    #[error("send_messages failed: {0}")]
    SendBatch(String),

    #[error("retrieve_messages failed: {0}")]
    Retrieve(String),

    #[error("return_message failed: {0}")]
    Return(String),

    #[error("dispose_message failed: {0}")]
    Dispose(String),

    #[error("extend_visibility failed: {0}")]
    ExtendVisibility(String),
}

/// Raised by the pluggable serializer. Always routed through the
/// exception resolver, never returned directly to application code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("serialization failed: {0}")]
pub struct SerializationError(pub String);

/// `retrieve_messages` unblocks with this when the subscription is
/// cancelled mid-long-poll. Not a `BrokerError` — it is expected, not a
/// failure, and the puller never logs it as one.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("subscription cancelled")]
pub struct CancellationError;

/// Outcome of a `retrieve_messages` call: either a batch (possibly
/// empty, on long-poll timeout), a broker failure, or cancellation.
#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Cancelled(#[from] CancellationError),
}

/// Why a single `handle()` invocation did not produce a `MessageResponse`
/// directly from the consumer — a serialization failure, an unroutable
/// message, or an error raised by consumer code itself. Never crosses the
/// public API, only the exception resolver's `resolve()`.
#[derive(Debug, Error)]
pub enum ConsumeFailure {
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Routing(#[from] ConfigurationError),

    #[error("consumer raised: {0}")]
    Consumer(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl ConsumeFailure {
    /// Construct a `ConsumeFailure::Consumer` from an arbitrary application
    /// error, the way a terminal `MessageConsumer` or `MessageScope` does
    /// when its own `consume`/`apply` fails.
    pub fn from_consumer_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ConsumeFailure::Consumer(Box::new(error))
    }

    /// Attempt to view the underlying error as a concrete type `E`. This is
    /// the Rust stand-in for "ascend the supertype chain": with no runtime
    /// class hierarchy, the exception resolver instead asks each
    /// registered handler's predicate "does this downcast?", in
    /// registration order (see `ExceptionResolver`).
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            ConsumeFailure::Serialization(e) => (e as &(dyn std::error::Error + 'static)).downcast_ref::<E>(),
            ConsumeFailure::Routing(e) => (e as &(dyn std::error::Error + 'static)).downcast_ref::<E>(),
            ConsumeFailure::Consumer(e) => (e.as_ref() as &(dyn std::error::Error + 'static)).downcast_ref::<E>(),
        }
    }
}

/// Errors crossing the public API: building a subscription, publishing,
/// or any other caller-facing operation.
#[derive(Debug, Error)]
pub enum QueuebaccaError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}
