//! In-memory navigation history.
//!
//! Behaves like a browser session history: a list of entries with a cursor,
//! `push` truncating forward entries and `back`/`forward` notifying
//! listeners. Nothing is persisted; use for tests and headless embedding.

use parking_lot::RwLock;
use tracing::trace;

use crate::history::{History, NavigationListener};

struct Entries {
    fragments: Vec<String>,
    index: usize,
}

/// In-memory implementation of [`History`].
pub struct MemoryHistory {
    entries: RwLock<Entries>,
    listeners: RwLock<Vec<NavigationListener>>,
}

impl MemoryHistory {
    /// Create a history with a single empty entry.
    pub fn new() -> Self {
        Self::with_fragment("")
    }

    /// Create a history whose initial entry holds `fragment`.
    pub fn with_fragment(fragment: &str) -> Self {
        let fragment = fragment.strip_prefix('#').unwrap_or(fragment);
        Self {
            entries: RwLock::new(Entries {
                fragments: vec![fragment.to_string()],
                index: 0,
            }),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Number of entries in the history.
    pub fn len(&self) -> usize {
        self.entries.read().fragments.len()
    }

    /// Always false: a history has at least its initial entry.
    pub fn is_empty(&self) -> bool {
        self.entries.read().fragments.is_empty()
    }

    /// Position of the current entry.
    pub fn index(&self) -> usize {
        self.entries.read().index
    }

    /// All fragments, oldest first.
    pub fn fragments(&self) -> Vec<String> {
        self.entries.read().fragments.clone()
    }

    /// Navigate one entry back. Returns false at the start of history.
    pub fn back(&self) -> bool {
        self.go(-1)
    }

    /// Navigate one entry forward. Returns false at the end of history.
    pub fn forward(&self) -> bool {
        self.go(1)
    }

    /// Move `delta` entries, notifying listeners if the cursor moved.
    pub fn go(&self, delta: isize) -> bool {
        let fragment = {
            let mut entries = self.entries.write();
            let target = entries.index as isize + delta;
            if delta == 0 || target < 0 || target as usize >= entries.fragments.len() {
                return false;
            }
            entries.index = target as usize;
            entries.fragments[entries.index].clone()
        };
        trace!(delta, fragment = %fragment, "history navigation");

        // Listeners may read the history again, so no lock is held here.
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener(&fragment);
        }
        true
    }

    /// Simulate the user editing the address bar: push and notify.
    pub fn navigate_to(&self, fragment: &str) {
        self.push(fragment);
        let fragment = self.fragment();
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener(&fragment);
        }
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl History for MemoryHistory {
    fn fragment(&self) -> String {
        let entries = self.entries.read();
        entries.fragments[entries.index].clone()
    }

    fn push(&self, fragment: &str) {
        let fragment = fragment.strip_prefix('#').unwrap_or(fragment);
        let mut entries = self.entries.write();
        let keep = entries.index + 1;
        entries.fragments.truncate(keep);
        entries.fragments.push(fragment.to_string());
        entries.index = keep;
    }

    fn replace(&self, fragment: &str) {
        let fragment = fragment.strip_prefix('#').unwrap_or(fragment);
        let mut entries = self.entries.write();
        let index = entries.index;
        entries.fragments[index] = fragment.to_string();
    }

    fn on_navigate(&self, listener: NavigationListener) {
        self.listeners.write().push(listener);
    }
}
