//! SelectionSet - per-collection selection state machine.
//!
//! Tracks which ids the user asked to select, which of those are backed by
//! a locally available entity (`selection`) and which are not yet
//! (`pending`). Invariants:
//!
//! - `selection ∩ pending = ∅`
//! - `selection ∪ pending` equals the last requested id set
//! - `selection` follows the requested order, so it does not depend on the
//!   order in which pending entities arrive
//!
//! A set bound to a state key never applies requests itself: it writes the
//! key and applies the change when the store's watcher calls back, so the
//! URL is the single writer of the selection.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::collection::{CollectionEvent, EntityContainer, EntityId, ListenerId};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::path::KeyPath;
use crate::state::StateValue;
use crate::store::StateStore;
use crate::watch::WatchId;

/// Selection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionEvent {
    /// Something was selected or deselected.
    Changed,
    /// These ids became selected and resolvable.
    Added(Vec<EntityId>),
    /// These ids are no longer selected (or no longer resolvable).
    Removed(Vec<EntityId>),
    /// No id is pending.
    Loaded,
    /// These pending ids were given up on.
    Unresolved(Vec<EntityId>),
}

pub type SelectionListener = Arc<dyn Fn(&SelectionEvent) + Send + Sync>;

/// Fetches entities for pending ids into the backing container.
#[async_trait]
pub trait PendingLoader: Send + Sync {
    /// Load `ids`, returning the ids that exist.
    async fn load(&self, ids: &[EntityId]) -> Result<Vec<EntityId>>;
}

/// Selection state for one entity container. Clones share state.
#[derive(Clone)]
pub struct SelectionSet {
    inner: Arc<SelectionInner>,
}

struct SelectionInner {
    container: Arc<dyn EntityContainer>,
    binding: Option<HashBinding>,
    state: Mutex<SelectionState>,
    listeners: RwLock<Vec<(ListenerId, SelectionListener)>>,
    next_listener: AtomicU64,
    max_pending_attempts: u32,
    subscriptions: Mutex<Subscriptions>,
}

struct HashBinding {
    store: StateStore,
    path: KeyPath,
}

#[derive(Default)]
struct Subscriptions {
    watch: Option<WatchId>,
    container: Option<ListenerId>,
}

#[derive(Default)]
struct SelectionState {
    requested: Vec<EntityId>,
    selection: Vec<EntityId>,
    pending: BTreeSet<EntityId>,
    attempts: HashMap<EntityId, u32>,
}

impl SelectionState {
    fn rebuild_selection(&mut self) {
        let pending = &self.pending;
        self.selection = self
            .requested
            .iter()
            .filter(|id| !pending.contains(*id))
            .cloned()
            .collect();
    }
}

fn dedupe(ids: Vec<EntityId>) -> Vec<EntityId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

impl SelectionSet {
    /// An in-memory selection over `container`.
    pub fn new(container: Arc<dyn EntityContainer>) -> Self {
        Self::with_config(container, None, &EngineConfig::default())
    }

    /// A selection mirrored at `path` in `store`.
    pub fn bound(container: Arc<dyn EntityContainer>, store: StateStore, path: KeyPath) -> Self {
        Self::with_config(container, Some((store, path)), &EngineConfig::default())
    }

    pub fn with_config(
        container: Arc<dyn EntityContainer>,
        binding: Option<(StateStore, KeyPath)>,
        config: &EngineConfig,
    ) -> Self {
        let set = Self {
            inner: Arc::new(SelectionInner {
                container,
                binding: binding.map(|(store, path)| HashBinding { store, path }),
                state: Mutex::new(SelectionState::default()),
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                max_pending_attempts: config.max_pending_attempts.max(1),
                subscriptions: Mutex::new(Subscriptions::default()),
            }),
        };

        let weak = Arc::downgrade(&set.inner);
        let container_listener = set
            .inner
            .container
            .subscribe(Arc::new(move |event: &CollectionEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_collection_event(event);
                }
            }));
        set.inner.subscriptions.lock().container = Some(container_listener);

        if let Some(binding) = &set.inner.binding {
            let weak = Arc::downgrade(&set.inner);
            let watch = binding.store.on_key_change(binding.path.clone(), move |new, _| {
                if let Some(inner) = weak.upgrade() {
                    inner.apply(ids_from_value(new), false);
                }
            });
            set.inner.subscriptions.lock().watch = Some(watch);

            // Pick up a selection already present in the state.
            let current = binding.store.get_key(&binding.path);
            if current.is_some() {
                set.inner.apply(ids_from_value(current.as_ref()), false);
            }
        }
        set
    }

    /// The state key this set mirrors, if bound.
    pub fn hash_key(&self) -> Option<&KeyPath> {
        self.inner.binding.as_ref().map(|binding| &binding.path)
    }

    /// Selected and resolvable ids, in requested order.
    pub fn selection(&self) -> Vec<EntityId> {
        self.inner.state.lock().selection.clone()
    }

    /// Selected ids not yet resolvable, in id order.
    pub fn pending(&self) -> Vec<EntityId> {
        self.inner.state.lock().pending.iter().cloned().collect()
    }

    /// The last requested id list.
    pub fn requested(&self) -> Vec<EntityId> {
        self.inner.state.lock().requested.clone()
    }

    pub fn is_selected(&self, id: &EntityId) -> bool {
        self.inner.state.lock().selection.contains(id)
    }

    pub fn is_pending(&self, id: &EntityId) -> bool {
        self.inner.state.lock().pending.contains(id)
    }

    /// Replace the selection with `ids`.
    pub fn set_selection<I, T>(&self, ids: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<EntityId>,
    {
        let ids = dedupe(ids.into_iter().map(Into::into).collect());
        match &self.inner.binding {
            Some(binding) => binding.write(&ids, false),
            None => self.inner.apply(ids, false),
        }
    }

    /// Add `ids` to the current selection, keeping pending ids.
    pub fn add_to_selection<I, T>(&self, ids: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<EntityId>,
    {
        let mut union = self.requested();
        union.extend(ids.into_iter().map(Into::into));
        let union = dedupe(union);
        match &self.inner.binding {
            Some(binding) => binding.write(&union, false),
            None => self.inner.apply(union, true),
        }
    }

    /// Remove `ids` from the selection.
    pub fn remove_from_selection<I, T>(&self, ids: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<EntityId>,
    {
        let removed: HashSet<EntityId> = ids.into_iter().map(Into::into).collect();
        let remaining: Vec<EntityId> = self
            .requested()
            .into_iter()
            .filter(|id| !removed.contains(id))
            .collect();
        self.set_selection(remaining);
    }

    pub fn clear_selection(&self) {
        self.set_selection(Vec::<EntityId>::new());
    }

    /// Select the member after the active one. Clamps at the end.
    pub fn select_next(&self) -> Option<EntityId> {
        self.select_adjacent(true)
    }

    /// Select the member before the active one. Clamps at the start.
    pub fn select_prev(&self) -> Option<EntityId> {
        self.select_adjacent(false)
    }

    fn select_adjacent(&self, forward: bool) -> Option<EntityId> {
        let ids = self.inner.container.ids();
        let last = ids.len().checked_sub(1)?;
        let active = self.inner.state.lock().selection.last().cloned();
        let index = active.and_then(|active| ids.iter().position(|id| *id == active));
        let target = match (index, forward) {
            (Some(index), true) => (index + 1).min(last),
            (Some(index), false) => index.saturating_sub(1),
            (None, true) => 0,
            (None, false) => last,
        };
        let id = ids[target].clone();
        self.set_selection([id.clone()]);
        Some(id)
    }

    /// Ask `loader` for every pending id.
    ///
    /// Ids the loader does not find count one failed attempt; after
    /// `max_pending_attempts` they are dropped from the selection and an
    /// [`SelectionEvent::Unresolved`] is emitted. Returns the evicted ids.
    /// Loader errors are returned without counting an attempt.
    pub async fn load_pending(&self, loader: &dyn PendingLoader) -> Result<Vec<EntityId>> {
        let ids = self.pending();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = ids.len(), "loading pending ids");
        let found: HashSet<EntityId> = loader.load(&ids).await?.into_iter().collect();
        Ok(self.inner.record_missing(&ids, &found))
    }

    /// Register a listener for selection events.
    pub fn on_event<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SelectionEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.write().push((id, Arc::new(listener)));
        id
    }

    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        before != listeners.len()
    }

    /// Stop following the store and the container.
    pub fn detach(&self) {
        let mut subscriptions = self.inner.subscriptions.lock();
        if let (Some(watch), Some(binding)) = (subscriptions.watch.take(), &self.inner.binding) {
            binding.store.unwatch(watch);
        }
        if let Some(listener) = subscriptions.container.take() {
            self.inner.container.unsubscribe(listener);
        }
    }
}

fn ids_from_value(value: Option<&StateValue>) -> Vec<EntityId> {
    value
        .map(StateValue::as_list)
        .unwrap_or_default()
        .into_iter()
        .map(EntityId::from)
        .collect()
}

impl HashBinding {
    fn write(&self, ids: &[EntityId], replace: bool) {
        if ids.is_empty() {
            self.store.clear_key(&self.path, replace);
        } else {
            self.store.set_key(&self.path, StateValue::list(ids), replace);
        }
    }
}

impl SelectionInner {
    /// The selection state machine.
    fn apply(&self, requested: Vec<EntityId>, additive: bool) {
        let mut requested = dedupe(requested);
        let mut marks = Vec::new();

        let (changed, added, removed, loaded) = {
            let mut state = self.state.lock();
            let had_pending = !state.pending.is_empty();
            let wanted: HashSet<EntityId> = requested.iter().cloned().collect();
            let current: HashSet<EntityId> = state.selection.iter().cloned().collect();

            let to_deselect: Vec<EntityId> = state
                .selection
                .iter()
                .filter(|id| !wanted.contains(*id))
                .cloned()
                .collect();
            let to_select: Vec<EntityId> = requested
                .iter()
                .filter(|id| !current.contains(*id))
                .cloned()
                .collect();
            let changed = !to_select.is_empty() || !to_deselect.is_empty();

            for id in &to_deselect {
                if self.container.contains(id) {
                    marks.push((id.clone(), false));
                }
            }

            let mut added = Vec::new();
            let mut unresolved = BTreeSet::new();
            for id in to_select {
                if self.container.contains(&id) {
                    marks.push((id.clone(), true));
                    added.push(id);
                } else {
                    unresolved.insert(id);
                }
            }

            if additive {
                state.pending.extend(unresolved);
                for id in &added {
                    state.pending.remove(id);
                }
                for id in &state.pending {
                    if !wanted.contains(id) {
                        requested.push(id.clone());
                    }
                }
            } else {
                state.pending = unresolved;
            }

            state.requested = requested;
            state.rebuild_selection();
            let SelectionState {
                pending, attempts, ..
            } = &mut *state;
            attempts.retain(|id, _| pending.contains(id));

            // Only report Loaded when something moved or pending drained.
            let loaded = state.pending.is_empty() && (changed || had_pending);
            (changed, added, to_deselect, loaded)
        };

        for (id, selected) in marks {
            self.container.set_selected(&id, selected);
        }
        trace!(
            key = ?self.binding.as_ref().map(|binding| binding.path.to_string()),
            added = added.len(),
            removed = removed.len(),
            loaded,
            "selection applied"
        );

        if changed {
            self.emit(&SelectionEvent::Changed);
        }
        if !added.is_empty() {
            self.emit(&SelectionEvent::Added(added));
        }
        if !removed.is_empty() {
            self.emit(&SelectionEvent::Removed(removed));
        }
        if loaded {
            self.emit(&SelectionEvent::Loaded);
        }
    }

    fn on_collection_event(&self, event: &CollectionEvent) {
        match event {
            CollectionEvent::Added(ids) => self.resolve_arrivals(ids),
            CollectionEvent::Removed(_) | CollectionEvent::Reset => self.reconcile_members(),
            _ => {}
        }
    }

    /// Pending ids whose entity just arrived become selected.
    fn resolve_arrivals(&self, ids: &[EntityId]) {
        let (arrived, loaded) = {
            let mut state = self.state.lock();
            let arrived: Vec<EntityId> = ids
                .iter()
                .filter(|id| state.pending.contains(*id))
                .cloned()
                .collect();
            if arrived.is_empty() {
                return;
            }
            for id in &arrived {
                state.pending.remove(id);
                state.attempts.remove(id);
            }
            state.rebuild_selection();
            (arrived, state.pending.is_empty())
        };

        for id in &arrived {
            self.container.set_selected(id, true);
        }
        debug!(count = arrived.len(), loaded, "pending selection resolved");
        self.emit(&SelectionEvent::Changed);
        self.emit(&SelectionEvent::Added(arrived));
        if loaded {
            self.emit(&SelectionEvent::Loaded);
        }
    }

    /// Recompute after the member set changed: selected ids that vanished
    /// go back to pending, pending ids now present are resolved.
    fn reconcile_members(&self) {
        let present: HashSet<EntityId> = self.container.ids().into_iter().collect();
        let (dropped, arrived, loaded) = {
            let mut state = self.state.lock();
            let dropped: Vec<EntityId> = state
                .selection
                .iter()
                .filter(|id| !present.contains(*id))
                .cloned()
                .collect();
            let arrived: Vec<EntityId> = state
                .pending
                .iter()
                .filter(|id| present.contains(*id))
                .cloned()
                .collect();
            if dropped.is_empty() && arrived.is_empty() {
                return;
            }
            for id in &arrived {
                state.pending.remove(id);
                state.attempts.remove(id);
            }
            state.pending.extend(dropped.iter().cloned());
            state.rebuild_selection();
            (dropped, arrived, state.pending.is_empty())
        };

        for id in &arrived {
            self.container.set_selected(id, true);
        }
        debug!(
            dropped = dropped.len(),
            arrived = arrived.len(),
            "selection reconciled with members"
        );
        self.emit(&SelectionEvent::Changed);
        if !dropped.is_empty() {
            self.emit(&SelectionEvent::Removed(dropped));
        }
        if !arrived.is_empty() {
            self.emit(&SelectionEvent::Added(arrived));
            if loaded {
                self.emit(&SelectionEvent::Loaded);
            }
        }
    }

    /// Count a failed load attempt for each id in `ids` missing from
    /// `found` and evict those past the limit.
    fn record_missing(&self, ids: &[EntityId], found: &HashSet<EntityId>) -> Vec<EntityId> {
        let (evicted, remaining) = {
            let mut state = self.state.lock();
            let mut evicted = Vec::new();
            for id in ids {
                if found.contains(id) || !state.pending.contains(id) {
                    continue;
                }
                let attempts = state.attempts.entry(id.clone()).or_insert(0);
                *attempts += 1;
                if *attempts >= self.max_pending_attempts {
                    evicted.push(id.clone());
                }
            }
            if evicted.is_empty() {
                return evicted;
            }
            for id in &evicted {
                state.attempts.remove(id);
            }
            let remaining: Vec<EntityId> = state
                .requested
                .iter()
                .filter(|id| !evicted.contains(id))
                .cloned()
                .collect();
            if self.binding.is_none() {
                for id in &evicted {
                    state.pending.remove(id);
                }
                state.requested = remaining.clone();
            }
            (evicted, remaining)
        };

        warn!(ids = ?evicted, "giving up on unresolvable selection");
        self.emit(&SelectionEvent::Unresolved(evicted.clone()));
        match &self.binding {
            // The key watcher applies the shortened request.
            Some(binding) => binding.write(&remaining, true),
            None => {
                if self.state.lock().pending.is_empty() {
                    self.emit(&SelectionEvent::Loaded);
                }
            }
        }
        evicted
    }

    fn emit(&self, event: &SelectionEvent) {
        let listeners: Vec<SelectionListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}
