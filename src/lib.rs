//! # zoning-state
//!
//! URL-addressable application state for map-based proposal browsing.
//!
//! The browser fragment is the single source of truth for what the user is
//! looking at. This crate provides:
//!
//! - **State store**: a nested key/value state encoded into the history
//!   fragment (`f.text=Main&sel=12,40`), with per-key watchers
//! - **Selection sets**: selections that may name entities not loaded yet,
//!   converging as entities arrive
//! - **Query reconciliation**: deciding when a new filter query can be
//!   answered from results already fetched
//!
//! ## Backends
//!
//! The store writes through a [`History`] implementation. [`MemoryHistory`]
//! keeps entries in memory and is what tests and headless hosts use.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zoning_state::{KeyPath, MemoryHistory, StateStore};
//!
//! fn main() -> zoning_state::Result<()> {
//!     let history = Arc::new(MemoryHistory::with_fragment("#zoom=15"));
//!     let store = StateStore::new(history);
//!
//!     let zoom = KeyPath::parse("zoom")?;
//!     store.on_key_change(zoom.clone(), |new, old| {
//!         println!("zoom {:?} -> {:?}", old, new);
//!     });
//!     store.init();
//!
//!     store.set_key(&zoom, "16", false);
//!     Ok(())
//! }
//! ```
//!
//! ## Selections
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zoning_state::{Collection, Entity, EntityId, KeyPath, MemoryHistory, SelectionSet, StateStore};
//!
//! #[derive(Clone)]
//! struct Proposal {
//!     id: u64,
//! }
//!
//! impl Entity for Proposal {
//!     fn id(&self) -> EntityId {
//!         self.id.into()
//!     }
//! }
//!
//! fn main() -> zoning_state::Result<()> {
//!     let store = StateStore::new(Arc::new(MemoryHistory::new()));
//!     let proposals = Collection::<Proposal>::new();
//!     let selection = SelectionSet::bound(proposals.clone(), store, KeyPath::parse("sel")?);
//!
//!     // 40 is not loaded yet; it stays pending until it arrives.
//!     selection.set_selection(["12", "40"]);
//!     proposals.add(Proposal { id: 40 });
//!     Ok(())
//! }
//! ```
//!
//! ## Narrowing
//!
//! ```rust
//! use zoning_state::{is_narrowing_query, Query};
//!
//! let old = Query::new().with("text", "Main");
//! let new = Query::new().with("text", "Main St");
//! assert!(is_narrowing_query(&new, Some(&old)));
//! assert!(!is_narrowing_query(&old, Some(&new)));
//! ```

pub mod codec;
pub mod collection;
pub mod config;
pub mod error;
pub mod history;
pub mod memory;
pub mod path;
pub mod query;
pub mod reconcile;
pub mod remote;
pub mod scheduler;
pub mod selection;
pub mod state;
pub mod store;
pub mod watch;

// Re-export main types
pub use collection::{
    Collection, CollectionEvent, Entity, EntityContainer, EntityId, FieldValue, ListenerId,
    SortOrder,
};
pub use config::EngineConfig;
pub use error::{Result, StateError};
pub use history::History;
pub use memory::MemoryHistory;
pub use path::{KeyPath, MAX_SEGMENT_LENGTH};
pub use query::{BoundingBox, DateRange, Filterable, Point, ProjectFilter, Query};
pub use reconcile::{is_narrowing_query, narrowing_verdict, RefetchReason, Verdict};
pub use remote::{Fetcher, FilteredCollection, Page, RefreshOutcome};
pub use scheduler::{Debouncer, ManualScheduler, Scheduler, TokioScheduler};
pub use selection::{PendingLoader, SelectionEvent, SelectionSet};
pub use state::{ApplicationState, StateValue};
pub use store::StateStore;
pub use watch::{StateEvent, WatchId, WatchStream};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::collection::{Collection, CollectionEvent, Entity, EntityId};
    pub use crate::error::{Result, StateError};
    pub use crate::memory::MemoryHistory;
    pub use crate::path::KeyPath;
    pub use crate::query::{Filterable, Query};
    pub use crate::remote::{Fetcher, FilteredCollection, Page};
    pub use crate::selection::{SelectionEvent, SelectionSet};
    pub use crate::state::{ApplicationState, StateValue};
    pub use crate::store::StateStore;
}
