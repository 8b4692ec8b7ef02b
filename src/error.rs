//! Error taxonomy for transport, request and reply-routing failures
//!
//! Transport failures stay local to the operation that triggered them and are
//! reported through that operation's own result or callback. Routing failures
//! are local to the reply-dispatch path, which drops the offending message
//! and keeps going. Nothing in here ever escalates into tearing down the
//! channel or the process.

use crate::BoxedError;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;
use thiserror::Error;

/// Broker operation during which a transport failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerOperation {
    /// Handing a message to the transport
    Publish,
    /// Declaring a queue
    DeclareQueue,
    /// Registering a standing consumer
    Subscribe,
    /// Closing the session
    Close,
}

impl Display for BrokerOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            BrokerOperation::Publish => "publish",
            BrokerOperation::DeclareQueue => "queue declaration",
            BrokerOperation::Subscribe => "subscribe",
            BrokerOperation::Close => "close",
        };

        write!(f, "{}", name)
    }
}

/// Failure of a single operation on the underlying broker session
///
/// Retains the flattened cause chain of the originating error rather than the
/// error value itself. One failure may have to be handed to every caller it
/// affects (a failed reply-queue setup fails all queued requests), which a
/// live `source()` chain cannot do without being `Clone`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed on broker session: {}", .causes.join(": "))]
pub struct TransportError {
    operation: BrokerOperation,
    causes: Vec<String>,
}

impl TransportError {
    /// Creates a new instance from any error, flattening its source chain
    pub fn new<E: StdError>(operation: BrokerOperation, cause: E) -> Self {
        let mut causes = vec![cause.to_string()];
        let mut source = cause.source();

        while let Some(error) = source {
            causes.push(error.to_string());
            source = error.source();
        }

        Self { operation, causes }
    }

    /// Creates a new instance from a boxed error type
    pub fn from_boxed(operation: BrokerOperation, cause: BoxedError) -> Self {
        let mut causes = Vec::new();
        let mut source: Option<&(dyn StdError + 'static)> = Some(cause.as_ref());

        while let Some(error) = source {
            causes.push(error.to_string());
            source = error.source();
        }

        Self { operation, causes }
    }

    /// Creates a new instance from a bare message without a source chain
    pub fn from_message(operation: BrokerOperation, message: impl Into<String>) -> Self {
        Self {
            operation,
            causes: vec![message.into()],
        }
    }

    /// Operation that failed
    pub fn operation(&self) -> BrokerOperation {
        self.operation
    }
}

/// Error delivered to the issuer of a request that can no longer produce a reply
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Publishing of the request failed
    #[error("sending of request failed")]
    SendingFailure(#[source] TransportError),
    /// The private reply queue could not be declared or subscribed to
    #[error("reply queue setup failed")]
    ReplyQueueFailure(#[source] TransportError),
    /// No reply arrived within the caller-supplied deadline
    #[error("no reply received within {0:?}")]
    Timeout(Duration),
}

/// Failure to route an inbound reply to a pending request
///
/// The offending message is dropped; no other pending request is affected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// The reply carried no correlation identifier
    #[error("reply carries no correlation id")]
    MissingCorrelationId,
    /// Nothing is registered under the carried identifier, it may have been
    /// delivered, evicted by a timeout or it was never valid
    #[error("no pending request for correlation id {0}")]
    UnknownCorrelationId(String),
}
