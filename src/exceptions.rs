//! Exception resolver: maps a failed `handle()` attempt to a
//! `MessageResponse`.
//!
//! An exception resolver in a language with runtime class hierarchies
//! would walk an error's concrete type, then its declared interfaces, then
//! its superclasses, looking for the most specific registered handler.
//! Rust has no such hierarchy, so this is expressed instead as an ordered
//! list of `(predicate, handler)` pairs, consulted in registration order,
//! first match wins. `register::<E>` builds the predicate as "does this
//! error downcast to `E`", the closest analogue to "is an instance of".

use crate::error::ConsumeFailure;
use crate::model::{MessageContext, MessageResponse};

type Predicate = Box<dyn Fn(&ConsumeFailure) -> bool + Send + Sync>;
type Handler = Box<dyn Fn(&ConsumeFailure, &MessageContext) -> MessageResponse + Send + Sync>;

pub struct ExceptionResolver {
    handlers: Vec<(Predicate, Handler)>,
}

impl ExceptionResolver {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Register a handler for failures whose underlying error downcasts to
    /// `E`. Earlier registrations take priority over later ones, mirroring
    /// "most specific first" in a system that does have a class hierarchy
    /// to consult.
    pub fn register<E, F>(mut self, handler: F) -> Self
    where
        E: std::error::Error + 'static,
        F: Fn(&E, &MessageContext) -> MessageResponse + Send + Sync + 'static,
    {
        let predicate: Predicate = Box::new(|failure: &ConsumeFailure| failure.downcast_ref::<E>().is_some());
        let wrapped: Handler = Box::new(move |failure: &ConsumeFailure, ctx: &MessageContext| {
            let err = failure
                .downcast_ref::<E>()
                .expect("predicate already confirmed this downcast succeeds");
            handler(err, ctx)
        });
        self.handlers.push((predicate, wrapped));
        self
    }

    /// First match wins; an unmatched failure is logged at error level and
    /// retried, never silently dropped.
    pub fn resolve(&self, failure: &ConsumeFailure, ctx: &MessageContext) -> MessageResponse {
        for (predicate, handler) in &self.handlers {
            if predicate(failure) {
                return handler(failure, ctx);
            }
        }
        tracing::error!(
            message_id = %ctx.message_id,
            bin = %ctx.bin,
            error = %failure,
            "no exception handler matched; retrying"
        );
        MessageResponse::Retry
    }
}

impl Default for ExceptionResolver {
    fn default() -> Self {
        Self::new()
    }
}
