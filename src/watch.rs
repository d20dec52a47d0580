//! Watch and notification types for state changes.
//!
//! Two delivery paths exist:
//! - synchronous watchers registered on the [`StateStore`](crate::StateStore),
//!   invoked before the mutating call returns;
//! - [`WatchStream`], an async stream fed by a broadcast channel for
//!   consumers running on their own task.

use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tracing::warn;

use crate::path::KeyPath;
use crate::state::{ApplicationState, StateValue};

/// Handle returned by watcher registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(pub(crate) u64);

/// Callback for full-state watchers: `(new_state, old_state)`.
pub type StateCallback = Arc<dyn Fn(&ApplicationState, &ApplicationState) + Send + Sync>;

/// Callback for key-path watchers: `(new_value, old_value)` at the path.
pub type KeyCallback = Arc<dyn Fn(Option<&StateValue>, Option<&StateValue>) + Send + Sync>;

/// A change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StateEvent {
    /// The state as a whole was committed.
    State {
        new: ApplicationState,
        old: ApplicationState,
    },
    /// The value at `path` changed.
    Key {
        path: KeyPath,
        new: Option<StateValue>,
        old: Option<StateValue>,
    },
}

impl StateEvent {
    /// Narrow a full-state event to `path`. Returns `None` if the value at
    /// `path` is deep-equal before and after.
    pub fn for_path(&self, path: &KeyPath) -> Option<StateEvent> {
        match self {
            StateEvent::State { new, old } => {
                let (new, old) = (new.get(path), old.get(path));
                (new != old).then(|| StateEvent::Key {
                    path: path.clone(),
                    new: new.cloned(),
                    old: old.cloned(),
                })
            }
            StateEvent::Key {
                path: changed,
                new,
                old,
            } => (changed == path && new != old).then(|| self.clone()),
        }
    }
}

#[derive(Clone)]
pub(crate) enum WatchTarget {
    State(StateCallback),
    Key { path: KeyPath, callback: KeyCallback },
}

/// A registered synchronous watcher.
#[derive(Clone)]
pub(crate) struct Watcher {
    pub(crate) id: WatchId,
    pub(crate) target: WatchTarget,
}

impl Watcher {
    /// Invoke the callback if this watcher is interested in the change.
    pub(crate) fn notify(&self, new: &ApplicationState, old: &ApplicationState) {
        match &self.target {
            WatchTarget::State(callback) => callback(new, old),
            WatchTarget::Key { path, callback } => {
                let (new_value, old_value) = (new.get(path), old.get(path));
                if new_value != old_value {
                    callback(new_value, old_value);
                }
            }
        }
    }
}

/// A stream of state events, optionally narrowed to one key path.
pub struct WatchStream {
    inner: Pin<Box<BroadcastStream<StateEvent>>>,
    path: Option<KeyPath>,
}

impl WatchStream {
    /// Create a new watch stream over a broadcast receiver.
    pub fn new(receiver: broadcast::Receiver<StateEvent>, path: Option<KeyPath>) -> Self {
        Self {
            inner: Box::pin(BroadcastStream::new(receiver)),
            path,
        }
    }

    /// The path this stream is narrowed to, if any.
    pub fn path(&self) -> Option<&KeyPath> {
        self.path.as_ref()
    }
}

impl Stream for WatchStream {
    type Item = StateEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(self.inner.as_mut().poll_next(cx)) {
                Some(Ok(event)) => match &self.path {
                    None => return Poll::Ready(Some(event)),
                    Some(path) => {
                        if let Some(narrowed) = event.for_path(path) {
                            return Poll::Ready(Some(narrowed));
                        }
                        // Unrelated change, keep polling.
                    }
                },
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(skipped, "watch stream lagged, events dropped");
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

/// Handle for sending state events to stream subscribers.
#[derive(Clone)]
pub struct WatchSender {
    sender: broadcast::Sender<StateEvent>,
}

impl WatchSender {
    /// Create a new watch sender with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event to all subscribers.
    pub fn send(&self, event: StateEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events, optionally narrowed to `path`.
    pub fn subscribe(&self, path: Option<KeyPath>) -> WatchStream {
        WatchStream::new(self.sender.subscribe(), path)
    }

    /// Get the number of current subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for WatchSender {
    fn default() -> Self {
        Self::new(1024)
    }
}
