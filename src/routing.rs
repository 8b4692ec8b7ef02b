//! Correlation of inbound replies to the requests that caused them

use crate::broker::Delivery;
use crate::error::{RequestError, RoutingError};
use std::collections::HashMap;
use std::sync::Mutex;

type ReplyHandler = Box<dyn FnOnce(Result<Delivery, RequestError>) + Send>;

/// One-shot routing slot owned by a single pending request
pub(crate) struct PendingReply {
    handler: ReplyHandler,
}

impl PendingReply {
    pub(crate) fn new<F>(handler: F) -> Self
    where
        F: FnOnce(Result<Delivery, RequestError>) + Send + 'static,
    {
        Self {
            handler: Box::new(handler),
        }
    }

    /// Consumes the slot, delivering the outcome to the request's issuer
    pub(crate) fn resolve(self, outcome: Result<Delivery, RequestError>) {
        (self.handler)(outcome)
    }
}

/// Maps correlation identifiers to the handler awaiting the matching reply
///
/// Each outstanding request holds exactly one slot, reclaimed when its reply
/// is dispatched, its publish fails or its deadline expires.
#[derive(Default)]
pub(crate) struct CorrelationRouter {
    pending: Mutex<HashMap<String, PendingReply>>,
}

impl CorrelationRouter {
    /// Stores a handler under a correlation identifier
    pub(crate) fn register(&self, correlation_id: String, entry: PendingReply) {
        self.pending.lock().unwrap().insert(correlation_id, entry);
    }

    /// Removes and returns the slot for an identifier, if one is registered
    pub(crate) fn evict(&self, correlation_id: &str) -> Option<PendingReply> {
        self.pending.lock().unwrap().remove(correlation_id)
    }

    /// Routes an inbound reply to the matching pending request
    ///
    /// The slot is removed before the handler runs, so a second reply with
    /// the same identifier is unroutable.
    pub(crate) fn dispatch(&self, delivery: Delivery) -> Result<(), RoutingError> {
        let correlation_id = match &delivery.properties.correlation_id {
            Some(id) => id.clone(),
            None => return Err(RoutingError::MissingCorrelationId),
        };

        match self.evict(&correlation_id) {
            Some(entry) => {
                entry.resolve(Ok(delivery));
                Ok(())
            }
            None => Err(RoutingError::UnknownCorrelationId(correlation_id)),
        }
    }

    /// Whether a slot is currently registered under an identifier
    #[cfg(test)]
    pub(crate) fn is_registered(&self, correlation_id: &str) -> bool {
        self.pending.lock().unwrap().contains_key(correlation_id)
    }
}
