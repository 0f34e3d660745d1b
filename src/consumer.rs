//! Consumer composition: the terminal `MessageConsumer<M>` trait,
//! `ScopedMessageConsumer` (chain-of-responsibility scopes wrapping a
//! terminal consumer) and `RoutingMessageConsumer` (dispatch across
//! several message shapes sharing one bin).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{ConfigurationError, ConsumeFailure};
use crate::model::MessageContext;

#[async_trait]
pub trait MessageConsumer<M>: Send + Sync {
    async fn consume(&self, message: M, ctx: &MessageContext) -> Result<crate::model::MessageResponse, ConsumeFailure>;
}

/// Whether a scope let the chain continue or decided the message's fate
/// itself. Standing in for "call `next()` or don't" in a language with no
/// implicit continuation object: the tagged variant makes "called twice"
/// or "never called" unrepresentable, where a bare continuation callback
/// would not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeOutcome {
    /// Continue to the next scope (or the terminal consumer, if this was
    /// the last one).
    Proceed,
    /// Stop here; the message is considered successfully consumed and the
    /// terminal consumer is never invoked.
    Stop,
}

#[async_trait]
pub trait MessageScope<M>: Send + Sync {
    async fn apply(&self, message: &M, ctx: &MessageContext) -> Result<ScopeOutcome, ConsumeFailure>;
}

/// A terminal consumer wrapped by an ordered, immutable chain of scopes —
/// logging, deduplication, metrics, whatever cross-cutting behavior a
/// caller wants applied before the message reaches application logic.
pub struct ScopedMessageConsumer<M> {
    scopes: Vec<Arc<dyn MessageScope<M>>>,
    terminal: Arc<dyn MessageConsumer<M>>,
}

impl<M: Send + Sync + 'static> ScopedMessageConsumer<M> {
    pub fn new(
        terminal: Arc<dyn MessageConsumer<M>>,
        scopes: Vec<Arc<dyn MessageScope<M>>>,
    ) -> Result<Self, ConfigurationError> {
        if scopes.is_empty() {
            return Err(ConfigurationError::EmptyScopeChain);
        }
        Ok(Self { scopes, terminal })
    }
}

#[async_trait]
impl<M: Send + Sync + 'static> MessageConsumer<M> for ScopedMessageConsumer<M> {
    async fn consume(&self, message: M, ctx: &MessageContext) -> Result<crate::model::MessageResponse, ConsumeFailure> {
        for scope in &self.scopes {
            match scope.apply(&message, ctx).await? {
                ScopeOutcome::Proceed => continue,
                ScopeOutcome::Stop => return Ok(crate::model::MessageResponse::Consume),
            }
        }
        self.terminal.consume(message, ctx).await
    }
}

/// A key a routed message is dispatched on — the Rust re-expression of
/// "the message's runtime type (or one of its declared interfaces)".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey(pub String);

impl RouteKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

/// Implemented by a message enum (or any sum-type payload) that can carry
/// more than one logical kind through the same bin. `route_keys()` returns
/// candidates most-specific first: the concrete variant's own key, then
/// any broader categories it also belongs to, mirroring a class-then-
/// interfaces-then-superclass walk without Rust needing one.
pub trait Routed: Send + Sync + 'static {
    fn route_keys(&self) -> Vec<RouteKey>;
}

/// Dispatches a routed message to whichever registered consumer matches
/// the most specific key, falling back through broader ones. Resolution
/// is memoized per primary key so repeat deliveries of the same kind skip
/// the fallback scan.
pub struct RoutingMessageConsumer<M: Routed> {
    routes: HashMap<RouteKey, Arc<dyn MessageConsumer<M>>>,
    memo: RwLock<HashMap<RouteKey, RouteKey>>,
}

impl<M: Routed> RoutingMessageConsumer<M> {
    pub fn builder() -> RoutingMessageConsumerBuilder<M> {
        RoutingMessageConsumerBuilder {
            routes: HashMap::new(),
        }
    }

    /// Test/introspection hook: the route a given primary key resolved to
    /// last time, if any delivery has gone through the fallback scan yet.
    pub async fn memoized_route(&self, primary: &RouteKey) -> Option<RouteKey> {
        self.memo.read().await.get(primary).cloned()
    }

    async fn resolve(&self, message: &M) -> Result<Arc<dyn MessageConsumer<M>>, ConfigurationError> {
        let keys = message.route_keys();
        let primary = keys
            .first()
            .cloned()
            .expect("Routed::route_keys() must return at least one key");

        if let Some(resolved) = self.memo.read().await.get(&primary).cloned() {
            if let Some(consumer) = self.routes.get(&resolved) {
                return Ok(Arc::clone(consumer));
            }
        }

        for key in &keys {
            if let Some(consumer) = self.routes.get(key) {
                self.memo.write().await.insert(primary, key.clone());
                return Ok(Arc::clone(consumer));
            }
        }

        Err(ConfigurationError::NoConsumerForRoute { route: primary.0 })
    }
}

#[async_trait]
impl<M: Routed> MessageConsumer<M> for RoutingMessageConsumer<M> {
    async fn consume(&self, message: M, ctx: &MessageContext) -> Result<crate::model::MessageResponse, ConsumeFailure> {
        let consumer = self.resolve(&message).await?;
        consumer.consume(message, ctx).await
    }
}

pub struct RoutingMessageConsumerBuilder<M: Routed> {
    routes: HashMap<RouteKey, Arc<dyn MessageConsumer<M>>>,
}

impl<M: Routed> RoutingMessageConsumerBuilder<M> {
    pub fn register(
        mut self,
        key: RouteKey,
        consumer: Arc<dyn MessageConsumer<M>>,
    ) -> Result<Self, ConfigurationError> {
        if self.routes.contains_key(&key) {
            return Err(ConfigurationError::DuplicateRegistration { route: key.0 });
        }
        self.routes.insert(key, consumer);
        Ok(self)
    }

    pub fn build(self) -> RoutingMessageConsumer<M> {
        RoutingMessageConsumer {
            routes: self.routes,
            memo: RwLock::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn ctx() -> MessageContext {
        MessageContext {
            message_id: "m-1".to_string(),
            bin: crate::model::MessageBin::new("orders").unwrap(),
            read_count: 1,
            first_received: Instant::now(),
            raw_message: "{}".to_string(),
        }
    }

    struct CountingConsumer {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MessageConsumer<String> for CountingConsumer {
        async fn consume(&self, _message: String, _ctx: &MessageContext) -> Result<MessageResponse, ConsumeFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(MessageResponse::Consume)
        }
    }

    struct StoppingScope;

    #[async_trait]
    impl MessageScope<String> for StoppingScope {
        async fn apply(&self, _message: &String, _ctx: &MessageContext) -> Result<ScopeOutcome, ConsumeFailure> {
            Ok(ScopeOutcome::Stop)
        }
    }

    struct PassthroughScope;

    #[async_trait]
    impl MessageScope<String> for PassthroughScope {
        async fn apply(&self, _message: &String, _ctx: &MessageContext) -> Result<ScopeOutcome, ConsumeFailure> {
            Ok(ScopeOutcome::Proceed)
        }
    }

    #[tokio::test]
    async fn stop_scope_skips_the_terminal_consumer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let terminal = Arc::new(CountingConsumer { calls: Arc::clone(&calls) });
        let chain = ScopedMessageConsumer::new(terminal, vec![Arc::new(StoppingScope)]).unwrap();

        let response = chain.consume("hello".to_string(), &ctx()).await.unwrap();
        assert_eq!(response, MessageResponse::Consume);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn proceed_scope_falls_through_to_terminal_consumer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let terminal = Arc::new(CountingConsumer { calls: Arc::clone(&calls) });
        let chain = ScopedMessageConsumer::new(terminal, vec![Arc::new(PassthroughScope)]).unwrap();

        chain.consume("hello".to_string(), &ctx()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_scope_chain_is_rejected_at_construction() {
        let calls = Arc::new(AtomicUsize::new(0));
        let terminal = Arc::new(CountingConsumer { calls });
        let result = ScopedMessageConsumer::new(terminal, vec![]);
        assert!(matches!(result, Err(ConfigurationError::EmptyScopeChain)));
    }

    #[derive(Clone)]
    enum Shipment {
        Created,
        Interface,
    }

    impl Routed for Shipment {
        fn route_keys(&self) -> Vec<RouteKey> {
            match self {
                Shipment::Created => vec![RouteKey::new("Created"), RouteKey::new("Shippable")],
                Shipment::Interface => vec![RouteKey::new("OtherConcrete"), RouteKey::new("Shippable")],
            }
        }
    }

    #[tokio::test]
    async fn falls_back_to_broader_route_and_memoizes_it() {
        let calls = Arc::new(AtomicUsize::new(0));
        let consumer = Arc::new(CountingConsumer { calls: Arc::clone(&calls) });
        let router = RoutingMessageConsumer::builder()
            .register(RouteKey::new("Shippable"), consumer)
            .unwrap()
            .build();

        let response = router.consume(Shipment::Created, &ctx()).await.unwrap();
        assert_eq!(response, MessageResponse::Consume);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let memoized = router.memoized_route(&RouteKey::new("Created")).await;
        assert_eq!(memoized, Some(RouteKey::new("Shippable")));

        router.consume(Shipment::Created, &ctx()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let consumer_a = Arc::new(CountingConsumer { calls: Arc::clone(&calls) });
        let consumer_b = Arc::new(CountingConsumer { calls });
        let result = RoutingMessageConsumer::<Shipment>::builder()
            .register(RouteKey::new("Shippable"), consumer_a)
            .unwrap()
            .register(RouteKey::new("Shippable"), consumer_b);
        assert!(matches!(result, Err(ConfigurationError::DuplicateRegistration { .. })));
    }

    #[tokio::test]
    async fn unroutable_message_surfaces_as_configuration_error() {
        let router = RoutingMessageConsumer::<Shipment>::builder().build();
        let failure = router.consume(Shipment::Created, &ctx()).await.unwrap_err();
        assert!(matches!(failure, ConsumeFailure::Routing(ConfigurationError::NoConsumerForRoute { .. })));
    }
}
