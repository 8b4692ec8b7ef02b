//! Routing attributes attached to published and delivered messages

use std::collections::HashMap;

/// Attributes relevant to routing a message, plus passthrough broker metadata
///
/// Mutable until the message is handed to the transport; the channel publishes
/// a snapshot, so later mutation does not affect an already sent message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    /// Token stamped on a request and echoed on its reply
    pub correlation_id: Option<String>,
    /// Name of the queue a reply should be delivered to
    pub reply_to: Option<String>,
    /// Uninterpreted broker metadata carried alongside the message
    pub headers: HashMap<String, String>,
}

impl MessageProperties {
    /// Creates an empty set of properties
    pub fn new() -> Self {
        Self::default()
    }
}
