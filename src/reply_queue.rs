//! Lazy, once-only setup of the per-channel reply queue

use crate::completion::Completion;
use crate::error::TransportError;
use std::sync::Mutex;

/// Lifecycle of the private reply queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReplyQueueState {
    /// No request has needed the queue yet
    Unset,
    /// The first caller is declaring and subscribing to the queue
    Creating,
    /// Queue declared and subscribed, holding its name
    Ready(String),
    /// Declaration or subscription failed; terminal for this channel
    Failed(TransportError),
}

/// Tracks the reply queue through its once-only creation
///
/// The state lock covers both the "is it set" check and the transition into
/// `Creating` as one guarded region, so exactly one caller ever initiates
/// creation no matter how many race on first use. A second attempt observing
/// the transition in progress is a no-op.
pub(crate) struct ReplyQueueManager {
    state: Mutex<ReplyQueueState>,
    setup: Completion,
}

impl Default for ReplyQueueManager {
    fn default() -> Self {
        Self {
            state: Mutex::new(ReplyQueueState::Unset),
            setup: Completion::new(),
        }
    }
}

impl ReplyQueueManager {
    /// Attempts the unset → creating transition
    ///
    /// Returns true for the single caller that must now perform the setup,
    /// false for everyone else.
    pub(crate) fn try_begin(&self) -> bool {
        let mut state = self.state.lock().unwrap();

        if *state == ReplyQueueState::Unset {
            *state = ReplyQueueState::Creating;
            true
        } else {
            false
        }
    }

    /// Records the queue as declared and subscribed, releasing queued requests
    pub(crate) fn mark_ready(&self, queue_name: String) {
        *self.state.lock().unwrap() = ReplyQueueState::Ready(queue_name);
        self.setup.complete();
    }

    /// Records a setup failure, releasing queued requests with the error
    pub(crate) fn mark_failed(&self, error: TransportError) {
        *self.state.lock().unwrap() = ReplyQueueState::Failed(error);
        self.setup.complete();
    }

    /// Signal fired once setup reached a terminal state
    pub(crate) fn setup(&self) -> &Completion {
        &self.setup
    }

    /// Terminal outcome of the setup, `None` while unset or still in progress
    pub(crate) fn outcome(&self) -> Option<Result<String, TransportError>> {
        match &*self.state.lock().unwrap() {
            ReplyQueueState::Ready(name) => Some(Ok(name.clone())),
            ReplyQueueState::Failed(error) => Some(Err(error.clone())),
            ReplyQueueState::Unset | ReplyQueueState::Creating => None,
        }
    }
}
