//! Single-shot occurrence signalling
//!
//! A [`Completion`] transitions from pending to done exactly once and then
//! notifies every interested party, including those that only register after
//! the transition already happened. It carries no payload and no error, it
//! merely signals that something took place. Within this crate it sequences
//! "setup before use" (no request is published before the reply queue
//! listens) and tells the issuer of a request that the operation finished.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

type Continuation = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct State {
    done: bool,
    continuations: Vec<Continuation>,
    wakers: Vec<Waker>,
}

/// A single-shot occurrence signal supporting late and early observers
///
/// Clones share the same underlying state, so a Completion can be handed to
/// the party that fulfills it and to any number of observers. Once done it
/// stays done; [`complete`](Completion::complete) is idempotent.
#[derive(Clone, Default)]
pub struct Completion {
    state: Arc<Mutex<State>>,
}

impl Completion {
    /// Creates a new, pending signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Transitions the signal from pending to done
    ///
    /// Every registered continuation is invoked synchronously on the calling
    /// thread, in no guaranteed order. Calling this on an already completed
    /// signal is a no-op.
    pub fn complete(&self) {
        let (continuations, wakers) = {
            let mut state = self.state.lock().unwrap();
            if state.done {
                return;
            }
            state.done = true;
            (
                std::mem::take(&mut state.continuations),
                std::mem::take(&mut state.wakers),
            )
        };

        // Invocation happens outside the lock so a continuation may register
        // further observers on this very signal without deadlocking.
        for continuation in continuations {
            continuation();
        }

        for waker in wakers {
            waker.wake();
        }
    }

    /// Registers interest in the done state
    ///
    /// If the signal has already completed, the continuation runs immediately
    /// on the registering thread. Otherwise it is stored and runs on whichever
    /// thread calls [`complete`](Completion::complete).
    pub fn on_complete<F>(&self, continuation: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.state.lock().unwrap();
            if !state.done {
                state.continuations.push(Box::new(continuation));
                return;
            }
        }

        continuation();
    }

    /// Whether the signal has completed
    pub fn is_complete(&self) -> bool {
        self.state.lock().unwrap().done
    }

    /// Waits for the signal to complete
    ///
    /// Resolves immediately if it already has. A signal that is never
    /// completed leaves the future pending forever.
    pub async fn wait(&self) {
        Wait { state: &self.state }.await
    }
}

struct Wait<'a> {
    state: &'a Mutex<State>,
}

impl Future for Wait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.state.lock().unwrap();

        if state.done {
            Poll::Ready(())
        } else {
            state.wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }
}
