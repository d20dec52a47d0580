//! Remote-backed collections driven by a filter query.
//!
//! [`FilteredCollection`] owns the active [`Query`] for a [`Collection`].
//! A refresh either narrows the previously fetched results locally or
//! fetches every page again through a [`Fetcher`]. Each refresh takes a new
//! generation number; results from an older generation are dropped, so at
//! most one fetch per collection is ever applied.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, trace, warn};

use crate::collection::{Collection, CollectionEvent, Entity, EntityId};
use crate::config::EngineConfig;
use crate::error::{Result, StateError};
use crate::path::KeyPath;
use crate::query::{
    BoundingBox, DateRange, Filterable, ProjectFilter, Query, BOX, DATE, LOT_SIZE, PROJECTS,
    REGION, TEXT,
};
use crate::reconcile::{narrowing_verdict, Verdict};
use crate::selection::PendingLoader;
use crate::store::StateStore;
use crate::watch::WatchId;

/// One page of fetch results.
///
/// Deserializes from the `{"items": [...], "next": "cursor"}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<E> {
    pub items: Vec<E>,
    /// Cursor for the following page; `None` on the last page.
    #[serde(default)]
    pub next: Option<String>,
}

impl<E> Page<E> {
    pub fn last(items: Vec<E>) -> Self {
        Self { items, next: None }
    }
}

/// Network access for a collection.
#[async_trait]
pub trait Fetcher<E>: Send + Sync {
    /// Fetch one page of entities matching `query`.
    async fn fetch(&self, query: &Query, cursor: Option<&str>) -> Result<Page<E>>;

    /// Fetch specific entities regardless of the active query.
    async fn fetch_ids(&self, ids: &[EntityId]) -> Result<Vec<E>>;
}

/// What a refresh did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The query narrowed the previous results; no network access.
    Filtered { count: usize },
    /// Results were fetched and applied.
    Fetched { count: usize },
    /// A newer refresh started before this one finished.
    Superseded,
    /// The fetch failed and the query was rolled back.
    Failed(String),
}

struct FetchState<E> {
    query: Query,
    /// Query the `fetched` results were retrieved for.
    last_query: Option<Query>,
    fetched: Vec<E>,
    generation: u64,
}

struct QueryBinding {
    store: StateStore,
    path: KeyPath,
    watch: WatchId,
}

/// A collection whose members are the results of a filter query.
pub struct FilteredCollection<E: Filterable> {
    collection: Arc<Collection<E>>,
    fetcher: Arc<dyn Fetcher<E>>,
    state: Mutex<FetchState<E>>,
    // Serializes "check generation, then apply" so an older fetch can never
    // land after a newer one.
    commit: Mutex<()>,
    binding: Mutex<Option<QueryBinding>>,
    changes: watch::Sender<u64>,
    driver: Mutex<Option<AbortHandle>>,
    this: Weak<FilteredCollection<E>>,
}

impl<E: Filterable> FilteredCollection<E> {
    pub fn new(collection: Arc<Collection<E>>, fetcher: Arc<dyn Fetcher<E>>) -> Arc<Self> {
        let (changes, _) = watch::channel(0);
        Arc::new_cyclic(|this| Self {
            collection,
            fetcher,
            state: Mutex::new(FetchState {
                query: Query::new(),
                last_query: None,
                fetched: Vec::new(),
                generation: 0,
            }),
            commit: Mutex::new(()),
            binding: Mutex::new(None),
            changes,
            driver: Mutex::new(None),
            this: this.clone(),
        })
    }

    /// A collection whose query is mirrored under `config.filter_key`.
    pub fn bound(
        collection: Arc<Collection<E>>,
        fetcher: Arc<dyn Fetcher<E>>,
        store: StateStore,
        config: &EngineConfig,
    ) -> Result<Arc<Self>> {
        let path = config.filter_path()?;
        let filtered = Self::new(collection, fetcher);
        filtered.bind(store, path);
        Ok(filtered)
    }

    pub fn collection(&self) -> &Arc<Collection<E>> {
        &self.collection
    }

    /// The active query.
    pub fn query(&self) -> Query {
        self.state.lock().query.clone()
    }

    /// The query the current results were fetched for.
    pub fn last_query(&self) -> Option<Query> {
        self.state.lock().last_query.clone()
    }

    /// Mirror the query at `path` in `store`.
    ///
    /// From then on filter setters write to the store and the query follows
    /// the store, including history navigation. The current value at `path`
    /// becomes the active query.
    pub fn bind(&self, store: StateStore, path: KeyPath) {
        self.unbind();
        let this = self.this.clone();
        let watch = store.on_key_change(path.clone(), move |new, _| {
            if let Some(filtered) = this.upgrade() {
                filtered.replace_query(Query::from_state_value(new));
            }
        });
        let current = Query::from_state_value(store.get_key(&path).as_ref());
        debug!(key = %path, filters = current.len(), "filter query bound");
        *self.binding.lock() = Some(QueryBinding { store, path, watch });
        self.replace_query(current);
    }

    fn unbind(&self) -> bool {
        match self.binding.lock().take() {
            Some(binding) => binding.store.unwatch(binding.watch),
            None => false,
        }
    }

    /// Set or clear (`None` or empty) a single filter.
    pub fn set_filter(&self, name: &str, value: Option<String>) -> Result<()> {
        let value = value.filter(|value| !value.is_empty());
        let binding = self
            .binding
            .lock()
            .as_ref()
            .map(|binding| (binding.store.clone(), binding.path.clone()));
        match binding {
            Some((store, path)) => {
                let path = path.join(name)?;
                match value {
                    Some(value) => store.set_key(&path, value, false),
                    None => store.clear_key(&path, false),
                };
            }
            None => {
                let mut query = self.query();
                query.set(name, value);
                self.replace_query(query);
            }
        }
        Ok(())
    }

    /// Replace every filter at once.
    pub fn set_query(&self, query: Query) {
        let binding = self
            .binding
            .lock()
            .as_ref()
            .map(|binding| (binding.store.clone(), binding.path.clone()));
        match binding {
            Some((store, path)) => {
                store.set_key(&path, query.to_state_value(), false);
            }
            None => self.replace_query(query),
        }
    }

    pub fn filter_by_text(&self, text: Option<&str>) -> Result<()> {
        self.set_filter(TEXT, text.map(|text| text.trim().to_string()))
    }

    /// Minimum lot size in square feet. Only the server can evaluate it.
    pub fn filter_by_lot_size(&self, min_square_feet: Option<u64>) -> Result<()> {
        self.set_filter(LOT_SIZE, min_square_feet.map(|size| size.to_string()))
    }

    pub fn filter_by_projects(&self, filter: Option<ProjectFilter>) -> Result<()> {
        self.set_filter(PROJECTS, filter.map(|filter| filter.as_str().to_string()))
    }

    pub fn filter_by_date(&self, range: Option<DateRange>) -> Result<()> {
        self.set_filter(DATE, range.map(|range| range.to_string()))
    }

    pub fn filter_by_box(&self, bbox: Option<BoundingBox>) -> Result<()> {
        self.set_filter(BOX, bbox.map(|bbox| bbox.to_string()))
    }

    pub fn filter_by_region(&self, region: Option<&str>) -> Result<()> {
        self.set_filter(REGION, region.map(str::to_string))
    }

    pub fn clear_filters(&self) {
        self.set_query(Query::new());
    }

    fn replace_query(&self, query: Query) {
        {
            let mut state = self.state.lock();
            if state.query == query {
                return;
            }
            state.query = query;
        }
        trace!("filter query changed");
        self.changes.send_modify(|version| *version += 1);
    }

    /// Bring the members in line with the active query.
    pub async fn refresh(&self) -> RefreshOutcome {
        let (query, generation, verdict, narrowed) = {
            let mut state = self.state.lock();
            state.generation += 1;
            let query = state.query.clone();
            let verdict = narrowing_verdict(&query, state.last_query.as_ref());
            let narrowed = verdict.is_narrowing().then(|| {
                state
                    .fetched
                    .iter()
                    .filter(|entity| query.matches(*entity))
                    .cloned()
                    .collect::<Vec<E>>()
            });
            (query, state.generation, verdict, narrowed)
        };

        if let Some(items) = narrowed {
            let count = items.len();
            let _commit = self.commit.lock();
            if !self.is_current(generation) {
                return RefreshOutcome::Superseded;
            }
            debug!(count, generation, "narrowing query filtered locally");
            self.collection.reset(items);
            return RefreshOutcome::Filtered { count };
        }

        if let Verdict::Refetch(reason) = &verdict {
            debug!(%reason, generation, query = %query.to_query_string(), "fetching");
        }

        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = match self.fetcher.fetch(&query, cursor.as_deref()).await {
                Ok(page) => page,
                Err(err) => return self.fetch_failed(generation, err),
            };
            if !self.is_current(generation) {
                trace!(generation, "fetch superseded");
                return RefreshOutcome::Superseded;
            }
            items.extend(page.items);
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let count = items.len();
        let _commit = self.commit.lock();
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return RefreshOutcome::Superseded;
            }
            state.last_query = Some(query);
            state.fetched = items.clone();
        }
        debug!(count, generation, "fetch applied");
        self.collection.reset(items);
        RefreshOutcome::Fetched { count }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }

    fn fetch_failed(&self, generation: u64, err: StateError) -> RefreshOutcome {
        let restored = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return RefreshOutcome::Superseded;
            }
            state.query = state.last_query.clone().unwrap_or_default();
            state.query.clone()
        };
        warn!(error = %err, generation, "fetch failed, query rolled back");
        // Keep the store in step so re-entering the failed filter is a change.
        let binding = self
            .binding
            .lock()
            .as_ref()
            .map(|binding| (binding.store.clone(), binding.path.clone()));
        if let Some((store, path)) = binding {
            store.set_key(&path, restored.to_state_value(), true);
        }
        let message = err.to_string();
        self.collection
            .emit(&CollectionEvent::FetchFailed(message.clone()));
        RefreshOutcome::Failed(message)
    }

    /// Refresh on every query change until the collection is dropped or
    /// [`detach`](Self::detach) is called.
    ///
    /// A change aborts the refresh still in flight for the previous query.
    /// Must be called from within a tokio runtime.
    pub fn refresh_on_change(self: &Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.changes.subscribe();
        let this = Arc::downgrade(self);
        let driver = tokio::spawn(async move {
            // The query present at startup is fetched before any change.
            let mut inflight: Option<JoinHandle<RefreshOutcome>> = this
                .upgrade()
                .map(|filtered| tokio::spawn(async move { filtered.refresh().await }));
            while changes.changed().await.is_ok() {
                let Some(filtered) = this.upgrade() else {
                    break;
                };
                if let Some(task) = inflight.take() {
                    task.abort();
                }
                inflight = Some(tokio::spawn(async move { filtered.refresh().await }));
            }
            if let Some(task) = inflight {
                task.abort();
            }
        });
        if let Some(previous) = self.driver.lock().replace(driver.abort_handle()) {
            previous.abort();
        }
        driver
    }

    /// Stop following the store and stop the refresh driver.
    pub fn detach(&self) {
        self.unbind();
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
    }
}

#[async_trait]
impl<E: Filterable> PendingLoader for FilteredCollection<E> {
    async fn load(&self, ids: &[EntityId]) -> Result<Vec<EntityId>> {
        let entities = self.fetcher.fetch_ids(ids).await?;
        let found: Vec<EntityId> = entities.iter().map(Entity::id).collect();
        debug!(requested = ids.len(), found = found.len(), "loaded entities by id");
        self.collection.add_all(entities);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::History;
    use crate::memory::MemoryHistory;
    use crate::query::tests::Proposal;
    use crate::selection::SelectionSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Serves a fixed data set, filtering with `Query::matches` the way the
    /// server would.
    struct FakeFetcher {
        data: Vec<Proposal>,
        page_size: usize,
        calls: AtomicUsize,
        fail: AtomicBool,
        gate: Mutex<Option<oneshot::Receiver<()>>>,
    }

    impl FakeFetcher {
        fn new(data: Vec<Proposal>) -> Arc<Self> {
            Arc::new(Self {
                data,
                page_size: 100,
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                gate: Mutex::new(None),
            })
        }

        fn paged(data: Vec<Proposal>, page_size: usize) -> Arc<Self> {
            Arc::new(Self {
                data,
                page_size,
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                gate: Mutex::new(None),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher<Proposal> for FakeFetcher {
        async fn fetch(&self, query: &Query, cursor: Option<&str>) -> Result<Page<Proposal>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.gate.lock().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(StateError::FetchFailed("503 Service Unavailable".to_string()));
            }
            let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
            let matching: Vec<Proposal> = self
                .data
                .iter()
                .filter(|p| query.matches(*p))
                .cloned()
                .collect();
            let end = (start + self.page_size).min(matching.len());
            Ok(Page {
                items: matching[start..end].to_vec(),
                next: (end < matching.len()).then(|| end.to_string()),
            })
        }

        async fn fetch_ids(&self, ids: &[EntityId]) -> Result<Vec<Proposal>> {
            Ok(self
                .data
                .iter()
                .filter(|p| ids.contains(&p.id()))
                .cloned()
                .collect())
        }
    }

    fn data() -> Vec<Proposal> {
        vec![
            Proposal::at(1, "12 Main St", 42.35, -71.06),
            Proposal::at(2, "40 Main St", 42.36, -71.05),
            Proposal::at(3, "7 Mainsail Way", 42.30, -71.10),
            Proposal::at(4, "3 Elm St", 42.40, -71.00),
            Proposal::at(5, "90 Elm St", 42.41, -71.01),
        ]
    }

    fn member_ids(filtered: &FilteredCollection<Proposal>) -> Vec<u64> {
        let mut ids: Vec<u64> = filtered.collection().entities().iter().map(|p| p.id).collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_narrowing_query_filters_locally() {
        let fetcher = FakeFetcher::new(data());
        let filtered = FilteredCollection::new(Collection::new(), fetcher.clone());

        filtered.filter_by_text(Some("Main")).unwrap();
        assert_eq!(filtered.refresh().await, RefreshOutcome::Fetched { count: 3 });
        assert_eq!(fetcher.calls(), 1);

        filtered.filter_by_text(Some("Main St")).unwrap();
        assert_eq!(filtered.refresh().await, RefreshOutcome::Filtered { count: 2 });
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(member_ids(&filtered), vec![1, 2]);

        // Widening back to the fetched query is still answered locally.
        filtered.filter_by_text(Some("Main")).unwrap();
        assert_eq!(filtered.refresh().await, RefreshOutcome::Filtered { count: 3 });

        filtered.filter_by_text(None).unwrap();
        assert_eq!(filtered.refresh().await, RefreshOutcome::Fetched { count: 5 });
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_lot_size_always_fetches() {
        let fetcher = FakeFetcher::new(data());
        let filtered = FilteredCollection::new(Collection::new(), fetcher.clone());
        filtered.filter_by_lot_size(Some(5000)).unwrap();
        filtered.refresh().await;
        filtered.refresh().await;
        assert_eq!(fetcher.calls(), 2);
        assert_eq!(filtered.query().lot_size(), Some("5000"));
    }

    #[tokio::test]
    async fn test_all_pages_are_fetched() {
        let fetcher = FakeFetcher::paged(data(), 2);
        let filtered = FilteredCollection::new(Collection::new(), fetcher.clone());
        assert_eq!(filtered.refresh().await, RefreshOutcome::Fetched { count: 5 });
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(member_ids(&filtered), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_failed_fetch_rolls_back_query() {
        let fetcher = FakeFetcher::new(data());
        let filtered = FilteredCollection::new(Collection::new(), fetcher.clone());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        filtered
            .collection()
            .on_event(move |event| sink.lock().push(event.clone()));

        filtered.filter_by_text(Some("Elm")).unwrap();
        filtered.refresh().await;
        let fetched_query = filtered.query();

        fetcher.fail.store(true, Ordering::SeqCst);
        filtered.filter_by_region(Some("ward-3")).unwrap();
        let outcome = filtered.refresh().await;
        assert!(matches!(outcome, RefreshOutcome::Failed(ref msg) if msg.contains("503")));
        assert_eq!(filtered.query(), fetched_query);
        assert_eq!(filtered.last_query(), Some(fetched_query));
        assert_eq!(member_ids(&filtered), vec![4, 5]);
        assert!(matches!(
            events.lock().last(),
            Some(CollectionEvent::FetchFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_superseded_fetch_is_discarded() {
        let fetcher = FakeFetcher::new(data());
        let filtered = FilteredCollection::new(Collection::new(), fetcher.clone());

        let (release, gate) = oneshot::channel();
        *fetcher.gate.lock() = Some(gate);
        filtered.filter_by_text(Some("Main")).unwrap();
        let slow = tokio::spawn({
            let filtered = filtered.clone();
            async move { filtered.refresh().await }
        });
        while fetcher.calls() == 0 {
            tokio::task::yield_now().await;
        }

        filtered.filter_by_text(Some("Elm")).unwrap();
        assert_eq!(filtered.refresh().await, RefreshOutcome::Fetched { count: 2 });

        release.send(()).unwrap();
        assert_eq!(slow.await.unwrap(), RefreshOutcome::Superseded);
        assert_eq!(member_ids(&filtered), vec![4, 5]);
        assert_eq!(filtered.last_query().unwrap().text(), Some("Elm"));
    }

    #[tokio::test]
    async fn test_bound_query_follows_store() {
        let history = Arc::new(MemoryHistory::new());
        let store = StateStore::new(history.clone());
        store.init();
        let fetcher = FakeFetcher::new(data());
        let filtered = FilteredCollection::bound(
            Collection::new(),
            fetcher.clone(),
            store.clone(),
            &EngineConfig::default(),
        )
        .unwrap();

        filtered.filter_by_text(Some("Elm")).unwrap();
        assert_eq!(history.fragment(), "f.text=Elm");
        assert_eq!(filtered.query().text(), Some("Elm"));

        filtered
            .filter_by_box(Some("42.3,-71.2,42.5,-71.0".parse().unwrap()))
            .unwrap();
        assert!(filtered.query().contains(BOX));

        history.back();
        assert_eq!(filtered.query(), Query::new().with(TEXT, "Elm"));

        filtered.clear_filters();
        assert!(filtered.query().is_empty());
        assert_eq!(history.fragment(), "");

        filtered.detach();
        store.set_key(&KeyPath::parse("f.text").unwrap(), "Main", false);
        assert!(filtered.query().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_on_change_applies_latest_query() {
        let history = Arc::new(MemoryHistory::new());
        let store = StateStore::new(history);
        let fetcher = FakeFetcher::new(data());
        let filtered = FilteredCollection::bound(
            Collection::new(),
            fetcher.clone(),
            store,
            &EngineConfig::default(),
        )
        .unwrap();
        let driver = filtered.refresh_on_change();

        filtered.filter_by_text(Some("Main")).unwrap();
        filtered.filter_by_text(Some("Elm")).unwrap();

        for _ in 0..100 {
            if filtered.last_query().and_then(|q| q.text().map(str::to_string))
                == Some("Elm".to_string())
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(member_ids(&filtered), vec![4, 5]);

        filtered.detach();
        assert!(driver.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_bound_failure_restores_fragment() {
        let history = Arc::new(MemoryHistory::new());
        let store = StateStore::new(history.clone());
        store.init();
        let fetcher = FakeFetcher::new(data());
        let filtered = FilteredCollection::bound(
            Collection::new(),
            fetcher.clone(),
            store,
            &EngineConfig::default(),
        )
        .unwrap();

        filtered.filter_by_text(Some("Elm")).unwrap();
        assert_eq!(filtered.refresh().await, RefreshOutcome::Fetched { count: 2 });

        fetcher.fail.store(true, Ordering::SeqCst);
        filtered.filter_by_region(Some("ward-3")).unwrap();
        assert_eq!(history.fragment(), "f.region=ward-3&f.text=Elm");
        let entries = history.len();
        assert!(matches!(filtered.refresh().await, RefreshOutcome::Failed(_)));
        assert_eq!(history.fragment(), "f.text=Elm");
        assert_eq!(history.len(), entries);
        assert_eq!(filtered.query(), Query::new().with(TEXT, "Elm"));

        // Re-entering the same filter is a fresh change and fetches again.
        fetcher.fail.store(false, Ordering::SeqCst);
        filtered.filter_by_region(Some("ward-3")).unwrap();
        assert_eq!(filtered.query().region(), Some("ward-3"));
        assert!(matches!(
            filtered.refresh().await,
            RefreshOutcome::Fetched { .. }
        ));
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_refresh_on_change_fetches_initial_query() {
        let history = Arc::new(MemoryHistory::with_fragment("#f.text=Elm"));
        let store = StateStore::new(history);
        store.init();
        let fetcher = FakeFetcher::new(data());
        let filtered = FilteredCollection::bound(
            Collection::new(),
            fetcher.clone(),
            store,
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(filtered.query().text(), Some("Elm"));

        let driver = filtered.refresh_on_change();
        for _ in 0..100 {
            if filtered.last_query().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(filtered.last_query().unwrap().text(), Some("Elm"));
        assert_eq!(member_ids(&filtered), vec![4, 5]);
        assert_eq!(fetcher.calls(), 1);

        filtered.detach();
        assert!(driver.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_loads_pending_selection() {
        let fetcher = FakeFetcher::new(data());
        let filtered = FilteredCollection::new(Collection::new(), fetcher.clone());
        filtered.filter_by_text(Some("Elm")).unwrap();
        filtered.refresh().await;

        let selection = SelectionSet::new(filtered.collection().clone());
        selection.set_selection(["4", "1", "99"]);
        assert_eq!(selection.pending(), vec![EntityId::from("1"), EntityId::from("99")]);

        let evicted = selection.load_pending(filtered.as_ref()).await.unwrap();
        assert!(evicted.is_empty());
        assert_eq!(
            selection.selection(),
            vec![EntityId::from("4"), EntityId::from("1")]
        );
        assert_eq!(selection.pending(), vec![EntityId::from("99")]);
    }

    #[test]
    fn test_page_envelope() {
        let page: Page<u32> = serde_json::from_str(r#"{"items": [1, 2]}"#).unwrap();
        assert_eq!(page, Page::last(vec![1, 2]));
        let page: Page<u32> = serde_json::from_str(r#"{"items": [], "next": "abc"}"#).unwrap();
        assert_eq!(page.next.as_deref(), Some("abc"));
    }
}
