//! # Queuebacca
//!
//! A typed publish/subscribe client over a visibility-timeout message queue
//! (the reference broker being SQS-shaped: long-poll receive, per-delivery
//! receipts, and a visibility timeout instead of broker-side acking).
//!
//! The hard part, and the bulk of this crate, is the **subscription worker
//! engine**: one pull/dispatch loop per subscription that admits messages
//! under a bounded in-flight cap, dispatches each to a typed consumer on a
//! worker pool, keeps the broker-side visibility lease alive while work is
//! in progress, and turns the consumer's result (or error) into a
//! disposition — delete, retry with a computed delay, or drop.
//!
//! ## Architecture
//!
//! - [`broker`] — the abstract broker contract consumers and publishers are
//!   built against, plus an in-memory reference implementation for tests.
//! - [`model`] — bins, envelopes, contexts, and the three-way disposition.
//! - [`serializer`] — pluggable typed-message encoding over opaque strings.
//! - [`retry`] — delay-from-read-count strategies for the `Retry` disposition.
//! - [`exceptions`] — maps a failed consume attempt to a disposition.
//! - [`consumer`] — chain-of-responsibility scopes and type-based routing.
//! - [`pool`] — the bounded executor consumption tasks run on.
//! - [`refresher`] — the process-wide visibility-lease extension scheduler.
//! - [`subscription`] — the pull/dispatch loop and its configuration.
//! - [`subscriber`] — registry of active subscriptions; bulk cancellation.
//! - [`publisher`] — single and batched sends.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use queuebacca::broker::MockBroker;
//! use queuebacca::model::MessageBin;
//! use queuebacca::publisher::Publisher;
//! use queuebacca::serializer::JsonSerializer;
//!
//! # async fn run() -> Result<(), queuebacca::QueuebaccaError> {
//! let broker = Arc::new(MockBroker::default());
//! let bin = MessageBin::new("orders")?;
//! let serializer = JsonSerializer::<String>::new();
//! let publisher = Publisher::new(Arc::clone(&broker));
//!
//! publisher.publish(&bin, &serializer, "hello".to_string(), 0).await?;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod cancellation;
pub mod consumer;
pub mod error;
pub mod exceptions;
pub mod model;
pub mod pool;
pub mod publisher;
pub mod refresher;
pub mod retry;
pub mod serializer;
pub mod subscriber;
pub mod subscription;

pub use error::{ConfigurationError, QueuebaccaError};
pub use model::{MessageBin, MessageResponse};
