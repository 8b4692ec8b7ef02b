//! Request/response messaging on top of a plain publish/subscribe broker session
//!
//! In general, there are two modes of operation:
//!
//! 1. Publish and subscribe
//! 2. Request and response
//!
//! The first maps directly onto the underlying broker. A [`MessageChannel`]
//! passes publishes, queue declarations, subscriptions and teardown through to
//! a [`BrokerSession`], keeping every call that may touch the network off the
//! caller: plain publishes are buffered by the transport, everything else runs
//! on the Tokio runtime and reports back through a callback.
//!
//! The second mode is layered on top of the first. A caller issues a
//! [`request`](MessageChannel::request) and the channel lazily sets up a
//! private, exclusive reply queue (exactly once per channel), stamps the
//! outgoing message with a fresh correlation identifier and the reply-queue
//! name, and routes the matching reply back to the handler that issued the
//! request. The caller observes progress through a returned [`Completion`],
//! a single-shot signal supporting both late and early observers.
//!
//! The broker itself stays behind the [`BrokerSession`] boundary: connection
//! management, topology administration beyond the one reply-queue declaration
//! and the wire protocol all belong to the collaborator, not to this crate.

pub mod broker;
pub mod channel;
pub mod completion;
pub mod error;
pub mod mock;
pub mod properties;

mod reply_queue;
mod routing;

pub use broker::{BrokerSession, Delivery, DeliveryHandler};
pub use channel::MessageChannel;
pub use completion::Completion;
pub use error::{BrokerOperation, RequestError, RoutingError, TransportError};
pub use properties::MessageProperties;

/// Generic error type
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;
