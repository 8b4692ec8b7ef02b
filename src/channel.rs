//! Asynchronous facade over a broker session with request/response on top
//!
//! A [`MessageChannel`] passes plain publish/subscribe operations through to
//! its [`BrokerSession`]: publishes go out inline (the transport buffers),
//! everything that waits for a broker acknowledgement is handed to the Tokio
//! runtime and reports back through a callback.
//!
//! On top of that sits the request/response pattern. The first request on a
//! channel lazily creates one private reply queue — exclusive, auto-deleted,
//! non-durable — and subscribes the correlation router to it. Every request
//! is stamped with a fresh correlation identifier and the reply-queue name,
//! and its publish is deferred until that queue is declared *and* subscribed,
//! so a reply can never arrive before the channel listens for it.
//!
//! All operations assume a Tokio runtime context; construct and drive the
//! channel from within one.

use crate::broker::{BrokerSession, Delivery, DeliveryHandler};
use crate::completion::Completion;
use crate::error::{RequestError, TransportError};
use crate::properties::MessageProperties;
use crate::reply_queue::ReplyQueueManager;
use crate::routing::{CorrelationRouter, PendingReply};
use log::{debug, error, warn};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct ChannelInner<S> {
    session: S,
    router: CorrelationRouter,
    reply_queue: ReplyQueueManager,
}

/// Channel on an established broker session
///
/// Clones share the same session, reply queue and correlation table.
pub struct MessageChannel<S: BrokerSession> {
    inner: Arc<ChannelInner<S>>,
}

impl<S: BrokerSession> Clone for MessageChannel<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: BrokerSession> MessageChannel<S> {
    /// Creates a channel on top of an established broker session
    pub fn new(session: S) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                session,
                router: CorrelationRouter::default(),
                reply_queue: ReplyQueueManager::default(),
            }),
        }
    }

    /// Publishes a message without expecting a reply
    ///
    /// The transport buffers the message and the call returns without waiting
    /// for delivery; no confirmation is surfaced. Accepts any body that
    /// converts into bytes, so `&str` text is published as UTF-8.
    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: Option<MessageProperties>,
        body: impl Into<Vec<u8>>,
    ) -> Result<(), TransportError> {
        let properties = properties.unwrap_or_default();
        self.inner
            .session
            .publish(exchange, routing_key, &properties, &body.into())
    }

    /// Asks the broker to ensure a queue with the given lifecycle flags exists
    ///
    /// Returns immediately; `on_done` fires once the broker acknowledged the
    /// declaration or the operation failed.
    pub fn declare_queue(
        &self,
        name: &str,
        durable: bool,
        exclusive: bool,
        auto_delete: bool,
        on_done: impl FnOnce(Result<(), TransportError>) + Send + 'static,
    ) {
        let inner = Arc::clone(&self.inner);
        let name = name.to_owned();

        tokio::spawn(async move {
            on_done(
                inner
                    .session
                    .declare_queue(&name, durable, exclusive, auto_delete)
                    .await,
            );
        });
    }

    /// Registers a standing consumer on a queue
    ///
    /// Returns immediately; `on_done` fires once the registration is
    /// acknowledged. From then on `on_message` is invoked for every delivery
    /// on the queue, on whatever task the transport delivers on.
    pub fn subscribe(
        &self,
        queue: &str,
        auto_ack: bool,
        on_message: impl Fn(Delivery) + Send + Sync + 'static,
        on_done: impl FnOnce(Result<(), TransportError>) + Send + 'static,
    ) {
        let inner = Arc::clone(&self.inner);
        let queue = queue.to_owned();
        let handler: DeliveryHandler = Arc::new(on_message);

        tokio::spawn(async move {
            on_done(inner.session.subscribe(&queue, auto_ack, handler).await);
        });
    }

    /// Closes the underlying session
    ///
    /// Returns immediately; `on_done` fires once the session is closed.
    pub fn close(&self, on_done: impl FnOnce(Result<(), TransportError>) + Send + 'static) {
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            on_done(inner.session.close().await);
        });
    }

    /// Publishes a request and routes the correlated reply to `on_response`
    ///
    /// The returned [`Completion`] fires once the operation finished — the
    /// reply arrived or the request failed; the outcome itself is delivered
    /// to `on_response` exactly once. Exactly one reply is expected per
    /// request: its routing slot is reclaimed on delivery, so later replies
    /// with the same correlation identifier are dropped as unroutable.
    ///
    /// Without a deadline, a request whose reply is lost keeps its handler
    /// pending forever; see
    /// [`request_with_timeout`](MessageChannel::request_with_timeout).
    pub fn request<F>(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: Option<MessageProperties>,
        body: impl Into<Vec<u8>>,
        on_response: F,
    ) -> Completion
    where
        F: FnOnce(Result<Delivery, RequestError>) + Send + 'static,
    {
        self.issue(exchange, routing_key, properties, body.into(), None, on_response)
    }

    /// Same as [`request`](MessageChannel::request), bounded by a deadline
    ///
    /// If no reply arrives within `timeout` (measured from the publish), the
    /// routing slot is evicted, `on_response` receives
    /// [`RequestError::Timeout`] and the Completion fires. A reply arriving
    /// after the eviction is dropped as unroutable.
    pub fn request_with_timeout<F>(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: Option<MessageProperties>,
        body: impl Into<Vec<u8>>,
        timeout: Duration,
        on_response: F,
    ) -> Completion
    where
        F: FnOnce(Result<Delivery, RequestError>) + Send + 'static,
    {
        self.issue(
            exchange,
            routing_key,
            properties,
            body.into(),
            Some(timeout),
            on_response,
        )
    }

    fn issue<F>(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: Option<MessageProperties>,
        body: Vec<u8>,
        timeout: Option<Duration>,
        on_response: F,
    ) -> Completion
    where
        F: FnOnce(Result<Delivery, RequestError>) + Send + 'static,
    {
        let properties = properties.unwrap_or_default();
        self.ensure_reply_queue();

        let done = Completion::new();
        let completion = done.clone();
        let inner = Arc::clone(&self.inner);
        let exchange = exchange.to_owned();
        let routing_key = routing_key.to_owned();

        // The publish is deferred until the reply queue is set up; with the
        // queue already in a terminal state this runs inline on this thread.
        self.inner.reply_queue.setup().on_complete(move || {
            let queue_name = match inner.reply_queue.outcome() {
                Some(Ok(name)) => name,
                Some(Err(cause)) => {
                    on_response(Err(RequestError::ReplyQueueFailure(cause)));
                    completion.complete();
                    return;
                }
                None => unreachable!("reply queue setup completed without a terminal state"),
            };

            let correlation_id = Uuid::new_v4().to_string();
            let mut properties = properties;
            properties.correlation_id = Some(correlation_id.clone());
            properties.reply_to = Some(queue_name);

            let wrapped = completion.clone();
            inner.router.register(
                correlation_id.clone(),
                PendingReply::new(move |outcome| {
                    on_response(outcome);
                    wrapped.complete();
                }),
            );

            if let Err(cause) = inner
                .session
                .publish(&exchange, &routing_key, &properties, &body)
            {
                if let Some(entry) = inner.router.evict(&correlation_id) {
                    entry.resolve(Err(RequestError::SendingFailure(cause)));
                }
            } else if let Some(timeout) = timeout {
                let channel = Arc::downgrade(&inner);

                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;

                    let channel = match channel.upgrade() {
                        Some(channel) => channel,
                        None => return,
                    };

                    if let Some(entry) = channel.router.evict(&correlation_id) {
                        entry.resolve(Err(RequestError::Timeout(timeout)));
                    }
                });
            }
        });

        done
    }

    /// Kicks off reply-queue creation if this caller is the first to need it
    fn ensure_reply_queue(&self) {
        if !self.inner.reply_queue.try_begin() {
            return;
        }

        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let queue_name = Uuid::new_v4().to_string();
            debug!("Declaring reply queue {}", queue_name);

            if let Err(cause) = inner
                .session
                .declare_queue(&queue_name, false, true, true)
                .await
            {
                error!("Failed to declare reply queue {}: {}", queue_name, cause);
                inner.reply_queue.mark_failed(cause);
                return;
            }

            // The dispatch closure holds the channel weakly, otherwise the
            // session (which retains the handler) would keep it alive forever.
            let dispatcher = Arc::downgrade(&inner);
            let handler: DeliveryHandler = Arc::new(move |delivery| {
                if let Some(channel) = dispatcher.upgrade() {
                    if let Err(cause) = channel.router.dispatch(delivery) {
                        warn!("Dropping reply: {}", cause);
                    }
                }
            });

            match inner.session.subscribe(&queue_name, true, handler).await {
                Ok(()) => {
                    debug!("Reply queue {} is ready", queue_name);
                    inner.reply_queue.mark_ready(queue_name);
                }
                Err(cause) => {
                    error!("Failed to subscribe to reply queue {}: {}", queue_name, cause);
                    inner.reply_queue.mark_failed(cause);
                }
            }
        });
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::mock::MockBrokerSession;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    type Outcome = Arc<Mutex<Option<Result<Delivery, RequestError>>>>;

    fn channel() -> (MessageChannel<Arc<MockBrokerSession>>, Arc<MockBrokerSession>) {
        let session = Arc::new(MockBrokerSession::new());
        (MessageChannel::new(Arc::clone(&session)), session)
    }

    fn outcome_capture() -> (Outcome, impl FnOnce(Result<Delivery, RequestError>) + Send + 'static)
    {
        let outcome: Outcome = Arc::new(Mutex::new(None));
        let sink = outcome.clone();

        (outcome, move |result| {
            *sink.lock().unwrap() = Some(result);
        })
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        panic!("condition was not reached in time");
    }

    #[tokio::test]
    async fn deliver_the_correlated_reply() {
        let (channel, session) = channel();
        let (outcome, capture) = outcome_capture();

        let done = channel.request("ex", "rk", None, "ping", capture);
        eventually(|| !session.published().is_empty()).await;

        let request = session.published().remove(0);
        assert_eq!(request.exchange, "ex");
        assert_eq!(request.routing_key, "rk");
        assert_eq!(request.payload, b"ping".to_vec());

        let reply_to = request.properties.reply_to.unwrap();
        let mut reply = MessageProperties::new();
        reply.correlation_id = request.properties.correlation_id;
        assert!(session.deliver(&reply_to, reply, "pong"));

        let delivery = outcome.lock().unwrap().take().unwrap().unwrap();
        assert_eq!(delivery.payload, b"pong".to_vec());
        assert!(done.is_complete());
    }

    #[tokio::test]
    async fn create_the_reply_queue_only_once() {
        let (channel, session) = channel();

        let first = channel.request("ex", "a", None, "first", |_| {});
        let second = channel.request("ex", "b", None, "second", |_| {});

        eventually(|| session.published().len() == 2).await;

        assert_eq!(session.declared_queues().len(), 1);
        assert_eq!(session.subscribed_queues().len(), 1);

        let declared = session.declared_queues().remove(0);
        assert!(!declared.durable);
        assert!(declared.exclusive);
        assert!(declared.auto_delete);

        let published = session.published();
        assert_eq!(
            published[0].properties.reply_to,
            published[1].properties.reply_to
        );
        assert_ne!(
            published[0].properties.correlation_id,
            published[1].properties.correlation_id
        );

        assert!(!first.is_complete());
        assert!(!second.is_complete());
    }

    #[tokio::test]
    async fn defer_the_publish_until_the_reply_queue_listens() {
        let (channel, session) = channel();
        session.delay_declares(Duration::from_millis(100));

        channel.request("ex", "rk", None, "ping", |_| {});

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(session.published().is_empty());

        eventually(|| !session.published().is_empty()).await;

        let reply_to = session.published()[0].properties.reply_to.clone().unwrap();
        assert_eq!(session.subscribed_queues(), vec![reply_to]);
    }

    #[tokio::test]
    async fn drop_unroutable_replies_without_touching_pending_requests() {
        let (channel, session) = channel();
        let (outcome, capture) = outcome_capture();

        let done = channel.request("ex", "rk", None, "ping", capture);
        eventually(|| !session.published().is_empty()).await;

        let request = session.published().remove(0);
        let reply_to = request.properties.reply_to.unwrap();

        let mut unknown = MessageProperties::new();
        unknown.correlation_id = Some("XYZ".into());
        assert!(session.deliver(&reply_to, unknown, "stray"));
        assert!(session.deliver(&reply_to, MessageProperties::new(), "anonymous"));

        assert!(outcome.lock().unwrap().is_none());
        assert!(!done.is_complete());

        let mut reply = MessageProperties::new();
        reply.correlation_id = request.properties.correlation_id;
        assert!(session.deliver(&reply_to, reply, "pong"));

        let delivery = outcome.lock().unwrap().take().unwrap().unwrap();
        assert_eq!(delivery.payload, b"pong".to_vec());
        assert!(done.is_complete());
    }

    #[tokio::test]
    async fn report_a_failed_reply_queue_setup_to_every_queued_request() {
        let (channel, session) = channel();
        session.fail_next_declare();

        let (first_outcome, first_capture) = outcome_capture();
        let (second_outcome, second_capture) = outcome_capture();

        let first = channel.request("ex", "a", None, "first", first_capture);
        let second = channel.request("ex", "b", None, "second", second_capture);

        eventually(|| first.is_complete() && second.is_complete()).await;

        for outcome in [first_outcome, second_outcome] {
            match outcome.lock().unwrap().take() {
                Some(Err(RequestError::ReplyQueueFailure(_))) => {}
                other => panic!("expected a reply queue failure, got {:?}", other),
            }
        }

        assert!(session.published().is_empty());
    }

    #[tokio::test]
    async fn report_a_failed_request_publish() {
        let (channel, session) = channel();
        session.fail_next_publish();

        let (outcome, capture) = outcome_capture();
        let done = channel.request("ex", "rk", None, "ping", capture);

        eventually(|| done.is_complete()).await;

        match outcome.lock().unwrap().take() {
            Some(Err(RequestError::SendingFailure(_))) => {}
            other => panic!("expected a sending failure, got {:?}", other),
        };
    }

    #[tokio::test]
    async fn time_out_requests_without_a_reply() {
        let (channel, session) = channel();
        let (outcome, capture) = outcome_capture();

        let done = channel.request_with_timeout(
            "ex",
            "rk",
            None,
            "ping",
            Duration::from_millis(50),
            capture,
        );

        eventually(|| done.is_complete()).await;

        assert_eq!(
            outcome.lock().unwrap().take(),
            Some(Err(RequestError::Timeout(Duration::from_millis(50))))
        );

        // The slot is evicted, a late reply is merely dropped
        let request = session.published().remove(0);
        let correlation_id = request.properties.correlation_id.unwrap();
        assert!(!channel.inner.router.is_registered(&correlation_id));

        let reply_to = request.properties.reply_to.unwrap();
        let mut reply = MessageProperties::new();
        reply.correlation_id = Some(correlation_id);
        assert!(session.deliver(&reply_to, reply, "too late"));
        assert!(outcome.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn leave_the_timeout_unarmed_once_the_reply_arrived() {
        let (channel, session) = channel();
        let (outcome, capture) = outcome_capture();

        let done = channel.request_with_timeout(
            "ex",
            "rk",
            None,
            "ping",
            Duration::from_millis(50),
            capture,
        );

        eventually(|| !session.published().is_empty()).await;

        let request = session.published().remove(0);
        let reply_to = request.properties.reply_to.unwrap();
        let mut reply = MessageProperties::new();
        reply.correlation_id = request.properties.correlation_id;
        assert!(session.deliver(&reply_to, reply, "pong"));
        assert!(done.is_complete());

        tokio::time::sleep(Duration::from_millis(80)).await;

        let delivery = outcome.lock().unwrap().take().unwrap().unwrap();
        assert_eq!(delivery.payload, b"pong".to_vec());
    }

    #[tokio::test]
    async fn pass_plain_publishes_through_inline() {
        let (channel, session) = channel();

        channel.publish("ex", "rk", None, "hello").unwrap();

        let published = session.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload, b"hello".to_vec());
        assert_eq!(published[0].properties, MessageProperties::new());
        assert!(session.declared_queues().is_empty());
    }

    #[tokio::test]
    async fn surface_plain_publish_failures() {
        let (channel, session) = channel();
        session.fail_next_publish();

        assert!(channel.publish("ex", "rk", None, "hello").is_err());
    }

    #[tokio::test]
    async fn declare_queues_off_task() {
        let (channel, session) = channel();
        let acknowledged = Arc::new(Mutex::new(None));

        let sink = acknowledged.clone();
        channel.declare_queue("jobs", true, false, false, move |result| {
            *sink.lock().unwrap() = Some(result);
        });

        eventually(|| acknowledged.lock().unwrap().is_some()).await;

        assert_eq!(acknowledged.lock().unwrap().take(), Some(Ok(())));
        let declared = session.declared_queues().remove(0);
        assert_eq!(declared.name, "jobs");
        assert!(declared.durable);
    }

    #[tokio::test]
    async fn forward_subscription_deliveries() {
        let (channel, session) = channel();
        let received = Arc::new(Mutex::new(Vec::new()));
        let acknowledged = Arc::new(Mutex::new(None));

        let sink = received.clone();
        let ack = acknowledged.clone();
        channel.subscribe(
            "jobs",
            true,
            move |delivery| sink.lock().unwrap().push(delivery),
            move |result| *ack.lock().unwrap() = Some(result),
        );

        eventually(|| acknowledged.lock().unwrap().is_some()).await;

        assert!(session.deliver("jobs", MessageProperties::new(), "one"));
        assert!(session.deliver("jobs", MessageProperties::new(), "two"));

        let payloads: Vec<_> = received
            .lock()
            .unwrap()
            .iter()
            .map(|delivery| delivery.payload.clone())
            .collect();
        assert_eq!(payloads, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[tokio::test]
    async fn close_the_session_off_task() {
        let (channel, session) = channel();
        let acknowledged = Arc::new(Mutex::new(None));

        let sink = acknowledged.clone();
        channel.close(move |result| {
            *sink.lock().unwrap() = Some(result);
        });

        eventually(|| session.is_closed()).await;
        eventually(|| acknowledged.lock().unwrap().is_some()).await;
        assert_eq!(acknowledged.lock().unwrap().take(), Some(Ok(())));
    }
}
