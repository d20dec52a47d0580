//! StateStore - the single source of truth for navigable application state.
//!
//! The store owns no copy of the state that could drift: every read decodes
//! the current history fragment, every write encodes a full state and
//! commits it to the history. Watchers are notified synchronously; a watcher
//! that writes back into the store gets its change committed at once and
//! broadcast after the current broadcast finishes.

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

use crate::codec;
use crate::config::EngineConfig;
use crate::history::History;
use crate::path::KeyPath;
use crate::state::{ApplicationState, StateValue};
use crate::watch::{StateEvent, WatchId, WatchSender, WatchStream, WatchTarget, Watcher};

/// Handle to the application state. Clones share the same store.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    history: Arc<dyn History>,
    last_seen: Mutex<ApplicationState>,
    watchers: RwLock<Vec<Watcher>>,
    next_watch_id: AtomicU64,
    dispatch: Mutex<Dispatch>,
    sender: WatchSender,
    initialized: AtomicBool,
}

#[derive(Default)]
struct Dispatch {
    queue: VecDeque<(ApplicationState, ApplicationState)>,
    active: bool,
}

/// Clears the dispatch flag even if a watcher panics.
struct DispatchGuard<'a>(&'a Mutex<Dispatch>);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        let mut dispatch = self.0.lock();
        dispatch.active = false;
        dispatch.queue.clear();
    }
}

impl StateStore {
    /// Create a store over `history` with default configuration.
    pub fn new(history: Arc<dyn History>) -> Self {
        Self::with_config(history, &EngineConfig::default())
    }

    /// Create a store over `history`.
    pub fn with_config(history: Arc<dyn History>, config: &EngineConfig) -> Self {
        let initial = codec::decode(&history.fragment());
        Self {
            inner: Arc::new(StoreInner {
                history,
                last_seen: Mutex::new(initial),
                watchers: RwLock::new(Vec::new()),
                next_watch_id: AtomicU64::new(1),
                dispatch: Mutex::new(Dispatch::default()),
                sender: WatchSender::new(config.watch_channel_capacity.max(1)),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    /// The history backend this store writes to.
    pub fn history(&self) -> &Arc<dyn History> {
        &self.inner.history
    }

    /// Bind to history navigation and broadcast the initial state.
    ///
    /// Watchers registered before `init` receive the initial state as a
    /// change from the empty state. Calling `init` again does nothing.
    pub fn init(&self) {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            warn!("state store already initialized");
            return;
        }
        let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
        self.inner.history.on_navigate(Arc::new(move |fragment: &str| {
            if let Some(inner) = weak.upgrade() {
                inner.navigated(fragment);
            }
        }));

        let initial = self.get_state();
        info!(keys = initial.len(), "state store initialized");
        *self.inner.last_seen.lock() = initial.clone();
        self.inner.broadcast(initial, ApplicationState::new());
    }

    /// Decode the current history entry.
    pub fn get_state(&self) -> ApplicationState {
        codec::decode(&self.inner.history.fragment())
    }

    /// The state as of the last commit or navigation event.
    pub fn last_seen(&self) -> ApplicationState {
        self.inner.last_seen.lock().clone()
    }

    /// Commit `state` to the history and notify watchers.
    ///
    /// If `state` equals the current state nothing is pushed and nobody is
    /// notified. A hand-written fragment with the same content is only
    /// rewritten into canonical form when `replace` is set. With `replace`
    /// the current history entry is overwritten instead of a new one being
    /// pushed.
    pub fn set_state(&self, state: ApplicationState, replace: bool) -> ApplicationState {
        let encoded = codec::encode(&state);
        let current = self.inner.history.fragment();
        let current = current.strip_prefix('#').unwrap_or(&current);
        if encoded == current {
            trace!(fragment = %encoded, "state unchanged");
            return state;
        }

        let old = codec::decode(current);
        if old == state {
            if replace {
                self.inner.history.replace(&encoded);
                trace!(fragment = %encoded, "fragment canonicalized");
            }
            return state;
        }
        if replace {
            self.inner.history.replace(&encoded);
        } else {
            self.inner.history.push(&encoded);
        }
        debug!(fragment = %encoded, replace, "state committed");

        *self.inner.last_seen.lock() = state.clone();
        self.inner.broadcast(state.clone(), old);
        state
    }

    /// Value at `path` in the current state.
    pub fn get_key(&self, path: &KeyPath) -> Option<StateValue> {
        self.get_state().get(path).cloned()
    }

    /// Set a single path and commit.
    pub fn set_key(
        &self,
        path: &KeyPath,
        value: impl Into<StateValue>,
        replace: bool,
    ) -> ApplicationState {
        let mut state = self.get_state();
        state.set(path, value);
        self.set_state(state, replace)
    }

    /// Remove a single path and commit. The key disappears from the
    /// fragment entirely, unlike setting it to an empty string.
    pub fn clear_key(&self, path: &KeyPath, replace: bool) -> ApplicationState {
        let mut state = self.get_state();
        state.clear(path);
        self.set_state(state, replace)
    }

    /// Shallow-merge `partial` into the current state as one commit.
    pub fn extend_state(&self, partial: ApplicationState, replace: bool) -> ApplicationState {
        let mut state = self.get_state();
        state.extend(partial);
        self.set_state(state, replace)
    }

    /// Apply several path-level sets (`Some`) and clears (`None`) as one
    /// commit.
    pub fn update_keys<I>(&self, changes: I, replace: bool) -> ApplicationState
    where
        I: IntoIterator<Item = (KeyPath, Option<StateValue>)>,
    {
        let mut state = self.get_state();
        for (path, value) in changes {
            match value {
                Some(value) => state.set(&path, value),
                None => {
                    state.clear(&path);
                }
            }
        }
        self.set_state(state, replace)
    }

    /// Watch every committed change: `callback(new_state, old_state)`.
    pub fn on_state_change<F>(&self, callback: F) -> WatchId
    where
        F: Fn(&ApplicationState, &ApplicationState) + Send + Sync + 'static,
    {
        self.register(WatchTarget::State(Arc::new(callback)))
    }

    /// Watch the value at `path`: `callback(new_value, old_value)` fires
    /// only when it changes by deep equality.
    pub fn on_key_change<F>(&self, path: KeyPath, callback: F) -> WatchId
    where
        F: Fn(Option<&StateValue>, Option<&StateValue>) + Send + Sync + 'static,
    {
        self.register(WatchTarget::Key {
            path,
            callback: Arc::new(callback),
        })
    }

    fn register(&self, target: WatchTarget) -> WatchId {
        let id = WatchId(self.inner.next_watch_id.fetch_add(1, Ordering::Relaxed));
        self.inner.watchers.write().push(Watcher { id, target });
        trace!(watch_id = id.0, "watcher registered");
        id
    }

    /// Unregister a watcher. Returns false if it was not registered.
    pub fn unwatch(&self, id: WatchId) -> bool {
        let mut watchers = self.inner.watchers.write();
        let before = watchers.len();
        watchers.retain(|watcher| watcher.id != id);
        before != watchers.len()
    }

    /// Number of registered synchronous watchers.
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.read().len()
    }

    /// Async stream of changes, optionally narrowed to `path`.
    pub fn watch_stream(&self, path: Option<KeyPath>) -> WatchStream {
        self.inner.sender.subscribe(path)
    }
}

impl StoreInner {
    fn navigated(&self, fragment: &str) {
        let new = codec::decode(fragment);
        let old = std::mem::replace(&mut *self.last_seen.lock(), new.clone());
        debug!(fragment, "navigation");
        self.broadcast(new, old);
    }

    fn broadcast(&self, new: ApplicationState, old: ApplicationState) {
        {
            let mut dispatch = self.dispatch.lock();
            dispatch.queue.push_back((new, old));
            if dispatch.active {
                trace!(queued = dispatch.queue.len(), "nested change queued");
                return;
            }
            dispatch.active = true;
        }
        let _guard = DispatchGuard(&self.dispatch);

        loop {
            let Some((new, old)) = self.dispatch.lock().queue.pop_front() else {
                break;
            };
            let watchers = self.watchers.read().clone();
            for watcher in &watchers {
                // Skip watchers unregistered by an earlier callback.
                if !self.watchers.read().iter().any(|w| w.id == watcher.id) {
                    continue;
                }
                watcher.notify(&new, &old);
            }
            self.sender.send(StateEvent::State { new, old });
        }
    }
}
