//! Scriptable in-memory stand-in for a broker session
//!
//! [`MockBrokerSession`] mirrors the contract a live transport offers to the
//! channel: it records publishes, declarations and subscriptions, lets a test
//! hand-deliver messages to a subscribed queue, and can be scripted to fail
//! or delay individual operations. Keep an `Arc` handle to the session you
//! pass into the channel to drive it from the test side.

use crate::broker::{BrokerSession, Delivery, DeliveryHandler};
use crate::error::{BrokerOperation, TransportError};
use crate::properties::MessageProperties;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Record of a message handed to [`publish`](BrokerSession::publish)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Exchange the message was published to
    pub exchange: String,
    /// Routing key it was published under
    pub routing_key: String,
    /// Snapshot of the properties at publish time
    pub properties: MessageProperties,
    /// Opaque message body
    pub payload: Vec<u8>,
}

/// Record of a queue declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredQueue {
    /// Name of the declared queue
    pub name: String,
    /// Whether it survives broker restarts
    pub durable: bool,
    /// Whether it is exclusive to one connection
    pub exclusive: bool,
    /// Whether it is deleted automatically when unused
    pub auto_delete: bool,
}

struct Subscription {
    consumer_tag: String,
    handler: DeliveryHandler,
}

#[derive(Default)]
struct MockState {
    published: Vec<PublishedMessage>,
    declared: Vec<DeclaredQueue>,
    subscriptions: HashMap<String, Subscription>,
    fail_publish: Option<TransportError>,
    fail_declare: Option<TransportError>,
    fail_subscribe: Option<TransportError>,
    declare_delay: Option<Duration>,
}

/// In-memory [`BrokerSession`] for exercising channels in tests
#[derive(Default)]
pub struct MockBrokerSession {
    state: Mutex<MockState>,
    closed: AtomicBool,
}

impl MockBrokerSession {
    /// Creates a session with no recorded activity and nothing scripted
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages published so far, in order
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().unwrap().published.clone()
    }

    /// Queues declared so far, in order
    pub fn declared_queues(&self) -> Vec<DeclaredQueue> {
        self.state.lock().unwrap().declared.clone()
    }

    /// Queues that currently have a standing subscription
    pub fn subscribed_queues(&self) -> Vec<String> {
        self.state.lock().unwrap().subscriptions.keys().cloned().collect()
    }

    /// Whether the session was closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Scripts the next publish to fail
    pub fn fail_next_publish(&self) {
        self.state.lock().unwrap().fail_publish = Some(TransportError::from_message(
            BrokerOperation::Publish,
            "scripted publish failure",
        ));
    }

    /// Scripts the next queue declaration to fail
    pub fn fail_next_declare(&self) {
        self.state.lock().unwrap().fail_declare = Some(TransportError::from_message(
            BrokerOperation::DeclareQueue,
            "scripted declare failure",
        ));
    }

    /// Scripts the next subscription to fail
    pub fn fail_next_subscribe(&self) {
        self.state.lock().unwrap().fail_subscribe = Some(TransportError::from_message(
            BrokerOperation::Subscribe,
            "scripted subscribe failure",
        ));
    }

    /// Delays every queue declaration by the given duration
    pub fn delay_declares(&self, delay: Duration) {
        self.state.lock().unwrap().declare_delay = Some(delay);
    }

    /// Delivers a message to the subscription on `queue`, if one exists
    ///
    /// The handler runs synchronously on the calling thread, like a transport
    /// delivering on its own reader task. Returns whether a subscription
    /// consumed the delivery.
    pub fn deliver(
        &self,
        queue: &str,
        properties: MessageProperties,
        payload: impl Into<Vec<u8>>,
    ) -> bool {
        let subscription = {
            let state = self.state.lock().unwrap();
            state
                .subscriptions
                .get(queue)
                .map(|subscription| (subscription.consumer_tag.clone(), subscription.handler.clone()))
        };

        match subscription {
            Some((consumer_tag, handler)) => {
                handler(Delivery {
                    consumer_tag,
                    properties,
                    payload: payload.into(),
                });
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl BrokerSession for MockBrokerSession {
    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &MessageProperties,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();

        if let Some(error) = state.fail_publish.take() {
            return Err(error);
        }

        state.published.push(PublishedMessage {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            properties: properties.clone(),
            payload: payload.to_vec(),
        });

        Ok(())
    }

    async fn declare_queue(
        &self,
        name: &str,
        durable: bool,
        exclusive: bool,
        auto_delete: bool,
    ) -> Result<(), TransportError> {
        let delay = self.state.lock().unwrap().declare_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();

        if let Some(error) = state.fail_declare.take() {
            return Err(error);
        }

        state.declared.push(DeclaredQueue {
            name: name.to_owned(),
            durable,
            exclusive,
            auto_delete,
        });

        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        _auto_ack: bool,
        handler: DeliveryHandler,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();

        if let Some(error) = state.fail_subscribe.take() {
            return Err(error);
        }

        let consumer_tag = format!("mock-consumer-{}", state.subscriptions.len());
        state
            .subscriptions
            .insert(queue.to_owned(), Subscription { consumer_tag, handler });

        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
