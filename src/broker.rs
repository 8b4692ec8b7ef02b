//! Boundary towards the external broker collaborator
//!
//! Everything below this seam — connection handling, reconnection policy,
//! the wire protocol — is the collaborator's business. The channel only
//! relies on the four operations of [`BrokerSession`] and on the delivery
//! callback contract described on [`DeliveryHandler`].

use crate::error::TransportError;
use crate::properties::MessageProperties;
use async_trait::async_trait;
use std::sync::Arc;

/// Message handed to a subscription for a single delivery on its queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Tag identifying the consumer the broker delivered to
    pub consumer_tag: String,
    /// Routing attributes and metadata carried by the message
    pub properties: MessageProperties,
    /// Opaque message body
    pub payload: Vec<u8>,
}

/// Standing callback invoked once per delivery for the life of a subscription
///
/// Invocations occur on whatever task or thread the transport delivers on;
/// implementors must not assume a specific one.
pub type DeliveryHandler = Arc<dyn Fn(Delivery) + Send + Sync>;

/// Session on an external message broker
///
/// A plain [`publish`](BrokerSession::publish) is synchronous because the
/// transport buffers outgoing messages internally and never blocks the caller
/// on network I/O. The remaining operations wait for a broker acknowledgement
/// and are therefore async.
#[async_trait]
pub trait BrokerSession: Send + Sync + 'static {
    /// Hands a message to the transport for delivery
    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &MessageProperties,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Ensures a queue with the given lifecycle flags exists
    async fn declare_queue(
        &self,
        name: &str,
        durable: bool,
        exclusive: bool,
        auto_delete: bool,
    ) -> Result<(), TransportError>;

    /// Registers a standing consumer on a queue
    ///
    /// Every subsequent delivery on the queue invokes `handler` for the
    /// lifetime of the subscription.
    async fn subscribe(
        &self,
        queue: &str,
        auto_ack: bool,
        handler: DeliveryHandler,
    ) -> Result<(), TransportError>;

    /// Closes the session
    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait]
impl<S> BrokerSession for Arc<S>
where
    S: BrokerSession,
{
    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &MessageProperties,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        (**self).publish(exchange, routing_key, properties, payload)
    }

    async fn declare_queue(
        &self,
        name: &str,
        durable: bool,
        exclusive: bool,
        auto_delete: bool,
    ) -> Result<(), TransportError> {
        (**self).declare_queue(name, durable, exclusive, auto_delete).await
    }

    async fn subscribe(
        &self,
        queue: &str,
        auto_ack: bool,
        handler: DeliveryHandler,
    ) -> Result<(), TransportError> {
        (**self).subscribe(queue, auto_ack, handler).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        (**self).close().await
    }
}
