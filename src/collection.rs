//! Entity collections.
//!
//! [`Collection`] is an ordered, id-indexed container of entities with a
//! per-entity selected flag, change events and an optional sort order.
//! Selection logic does not live here: a [`SelectionSet`](crate::SelectionSet)
//! composes over anything implementing [`EntityContainer`].

use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::EngineConfig;
use crate::scheduler::{Debouncer, Scheduler};

/// Entity identifier. Ids are always compared in string form, whatever the
/// entity's native id type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Servers send numeric or string ids.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Unsigned(u64),
            Signed(i64),
        }
        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(id) => EntityId(id),
            RawId::Unsigned(id) => id.into(),
            RawId::Signed(id) => id.into(),
        })
    }
}

/// A sortable attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Date(NaiveDate),
}

impl FieldValue {
    fn rank(&self) -> u8 {
        match self {
            FieldValue::Number(_) => 0,
            FieldValue::Date(_) => 1,
            FieldValue::Text(_) => 2,
        }
    }

    /// Total order: numbers, then dates, then text.
    pub fn compare(&self, other: &FieldValue) -> CmpOrdering {
        match (self, other) {
            (FieldValue::Number(a), FieldValue::Number(b)) => a.total_cmp(b),
            (FieldValue::Date(a), FieldValue::Date(b)) => a.cmp(b),
            (FieldValue::Text(a), FieldValue::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Something that can live in a [`Collection`].
pub trait Entity: Clone + Send + Sync + 'static {
    fn id(&self) -> EntityId;

    /// Named attribute used by [`Collection::sort_by_field`].
    fn field(&self, _name: &str) -> Option<FieldValue> {
        None
    }
}

/// Membership change notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionEvent {
    /// New members, in insertion order.
    Added(Vec<EntityId>),
    /// Members removed individually.
    Removed(Vec<EntityId>),
    /// An existing member's attributes were replaced.
    Changed(EntityId),
    /// The member set was replaced wholesale.
    Reset,
    /// Member order changed.
    Sorted,
    /// A fetch for this collection failed.
    FetchFailed(String),
}

pub type CollectionListener = Arc<dyn Fn(&CollectionEvent) + Send + Sync>;

/// Handle returned by listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// The capability a [`SelectionSet`](crate::SelectionSet) needs from its
/// backing container.
pub trait EntityContainer: Send + Sync {
    /// Is an entity with this id locally available?
    fn contains(&self, id: &EntityId) -> bool;

    /// Set the selected flag. Returns false if the id is not present.
    fn set_selected(&self, id: &EntityId, selected: bool) -> bool;

    /// Member ids in current order.
    fn ids(&self) -> Vec<EntityId>;

    fn subscribe(&self, listener: CollectionListener) -> ListenerId;

    fn unsubscribe(&self, id: ListenerId) -> bool;
}

/// Active comparator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOrder {
    pub field: String,
    pub descending: bool,
}

struct Member<E> {
    entity: E,
    selected: bool,
}

struct Members<E> {
    order: Vec<EntityId>,
    entries: HashMap<EntityId, Member<E>>,
}

impl<E: Entity> Members<E> {
    fn sort(&mut self, sort: &SortOrder) {
        let Members { order, entries } = self;
        order.sort_by(|a, b| {
            let a = entries.get(a).and_then(|m| m.entity.field(&sort.field));
            let b = entries.get(b).and_then(|m| m.entity.field(&sort.field));
            match (a, b) {
                (Some(a), Some(b)) if sort.descending => b.compare(&a),
                (Some(a), Some(b)) => a.compare(&b),
                // Entities without the field sort last either way.
                (Some(_), None) => CmpOrdering::Less,
                (None, Some(_)) => CmpOrdering::Greater,
                (None, None) => CmpOrdering::Equal,
            }
        });
    }
}

/// Ordered, id-indexed entity container.
pub struct Collection<E: Entity> {
    members: RwLock<Members<E>>,
    sort: RwLock<Option<SortOrder>>,
    listeners: RwLock<Vec<(ListenerId, CollectionListener)>>,
    next_listener: AtomicU64,
    debouncer: Option<Debouncer>,
    this: Weak<Collection<E>>,
}

impl<E: Entity> Collection<E> {
    /// A collection that resorts immediately on attribute changes.
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// A collection whose attribute-triggered resorts are coalesced over
    /// `interval` using `scheduler`.
    pub fn with_debounce(scheduler: Arc<dyn Scheduler>, interval: Duration) -> Arc<Self> {
        Self::build(Some(Debouncer::new(scheduler, interval)))
    }

    /// A collection debounced by `config.resort_debounce_ms`. Zero resorts
    /// immediately.
    pub fn with_config(scheduler: Arc<dyn Scheduler>, config: &EngineConfig) -> Arc<Self> {
        match config.resort_debounce() {
            interval if interval.is_zero() => Self::new(),
            interval => Self::with_debounce(scheduler, interval),
        }
    }

    fn build(debouncer: Option<Debouncer>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            members: RwLock::new(Members {
                order: Vec::new(),
                entries: HashMap::new(),
            }),
            sort: RwLock::new(None),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            debouncer,
            this: this.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.members.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().order.is_empty()
    }

    pub fn get(&self, id: &EntityId) -> Option<E> {
        self.members.read().entries.get(id).map(|m| m.entity.clone())
    }

    /// Entity at `index` in current order.
    pub fn at(&self, index: usize) -> Option<E> {
        let members = self.members.read();
        let id = members.order.get(index)?;
        members.entries.get(id).map(|m| m.entity.clone())
    }

    pub fn index_of(&self, id: &EntityId) -> Option<usize> {
        self.members.read().order.iter().position(|m| m == id)
    }

    pub fn is_selected(&self, id: &EntityId) -> bool {
        self.members
            .read()
            .entries
            .get(id)
            .is_some_and(|m| m.selected)
    }

    /// All entities in current order.
    pub fn entities(&self) -> Vec<E> {
        let members = self.members.read();
        members
            .order
            .iter()
            .filter_map(|id| members.entries.get(id).map(|m| m.entity.clone()))
            .collect()
    }

    /// Ids of members whose selected flag is set, in current order.
    pub fn selected_ids(&self) -> Vec<EntityId> {
        let members = self.members.read();
        members
            .order
            .iter()
            .filter(|id| members.entries.get(*id).is_some_and(|m| m.selected))
            .cloned()
            .collect()
    }

    pub fn add(&self, entity: E) {
        self.add_all([entity]);
    }

    /// Insert new entities and replace existing ones with the same id.
    ///
    /// New members are placed according to the active sort order.
    /// Replaced members keep their selected flag and trigger a debounced
    /// resort.
    pub fn add_all<I>(&self, entities: I)
    where
        I: IntoIterator<Item = E>,
    {
        let mut added = Vec::new();
        let mut changed = Vec::new();
        {
            let mut members = self.members.write();
            for entity in entities {
                let id = entity.id();
                match members.entries.get_mut(&id) {
                    Some(member) => {
                        member.entity = entity;
                        changed.push(id);
                    }
                    None => {
                        members.order.push(id.clone());
                        members.entries.insert(
                            id.clone(),
                            Member {
                                entity,
                                selected: false,
                            },
                        );
                        added.push(id);
                    }
                }
            }
            if !added.is_empty() {
                if let Some(sort) = self.sort.read().as_ref() {
                    members.sort(sort);
                }
            }
        }

        if !added.is_empty() {
            trace!(count = added.len(), "members added");
            self.emit(&CollectionEvent::Added(added));
        }
        if !changed.is_empty() {
            for id in changed {
                self.emit(&CollectionEvent::Changed(id));
            }
            self.schedule_resort();
        }
    }

    /// Replace an existing member's attributes. Returns false if absent.
    pub fn update(&self, entity: E) -> bool {
        let id = entity.id();
        {
            let mut members = self.members.write();
            match members.entries.get_mut(&id) {
                Some(member) => member.entity = entity,
                None => return false,
            }
        }
        self.emit(&CollectionEvent::Changed(id));
        self.schedule_resort();
        true
    }

    pub fn remove(&self, id: &EntityId) -> Option<E> {
        let removed = {
            let mut members = self.members.write();
            let removed = members.entries.remove(id)?;
            members.order.retain(|m| m != id);
            removed
        };
        self.emit(&CollectionEvent::Removed(vec![id.clone()]));
        Some(removed.entity)
    }

    /// Replace the whole member set. Surviving members keep their
    /// selected flag.
    pub fn reset<I>(&self, entities: I)
    where
        I: IntoIterator<Item = E>,
    {
        {
            let mut members = self.members.write();
            let mut previous = std::mem::take(&mut members.entries);
            members.order.clear();
            for entity in entities {
                let id = entity.id();
                let selected = previous.remove(&id).is_some_and(|m| m.selected);
                if members.entries.contains_key(&id) {
                    // Duplicate in the input: last one wins, position kept.
                    if let Some(member) = members.entries.get_mut(&id) {
                        member.entity = entity;
                    }
                    continue;
                }
                members.order.push(id.clone());
                members.entries.insert(id, Member { entity, selected });
            }
            if let Some(sort) = self.sort.read().as_ref() {
                members.sort(sort);
            }
            debug!(count = members.order.len(), "collection reset");
        }
        self.emit(&CollectionEvent::Reset);
    }

    /// Switch the comparator and resort immediately.
    pub fn sort_by_field(&self, field: &str, descending: bool) {
        *self.sort.write() = Some(SortOrder {
            field: field.to_string(),
            descending,
        });
        if let Some(debouncer) = &self.debouncer {
            debouncer.cancel();
        }
        self.resort();
    }

    pub fn sort_order(&self) -> Option<SortOrder> {
        self.sort.read().clone()
    }

    /// Apply the active sort order now, if any.
    pub fn resort(&self) {
        let Some(sort) = self.sort.read().clone() else {
            return;
        };
        self.members.write().sort(&sort);
        trace!(field = %sort.field, descending = sort.descending, "collection sorted");
        self.emit(&CollectionEvent::Sorted);
    }

    fn schedule_resort(&self) {
        if self.sort.read().is_none() {
            return;
        }
        match &self.debouncer {
            Some(debouncer) => {
                let this = self.this.clone();
                debouncer.trigger(Box::new(move || {
                    if let Some(collection) = this.upgrade() {
                        collection.resort();
                    }
                }));
            }
            None => self.resort(),
        }
    }

    /// Register a listener for collection events.
    pub fn on_event<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&CollectionEvent) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(listener))
    }

    pub(crate) fn emit(&self, event: &CollectionEvent) {
        let listeners: Vec<CollectionListener> = self
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

impl<E: Entity> EntityContainer for Collection<E> {
    fn contains(&self, id: &EntityId) -> bool {
        self.members.read().entries.contains_key(id)
    }

    fn set_selected(&self, id: &EntityId, selected: bool) -> bool {
        match self.members.write().entries.get_mut(id) {
            Some(member) => {
                member.selected = selected;
                true
            }
            None => false,
        }
    }

    fn ids(&self) -> Vec<EntityId> {
        self.members.read().order.clone()
    }

    fn subscribe(&self, listener: CollectionListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        before != listeners.len()
    }
}
