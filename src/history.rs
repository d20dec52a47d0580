//! Navigation history abstraction.
//!
//! The store never talks to a browser directly. Anything that can hold a
//! current fragment, accept pushed or replaced entries and report back /
//! forward navigation implements [`History`]:
//!
//! - [`MemoryHistory`](crate::memory::MemoryHistory): in-process history
//!   stack (testing, headless embedding)
//! - a host binding over `window.history` when compiled for the browser

use std::sync::Arc;

/// Callback invoked with the new fragment after back/forward navigation.
pub type NavigationListener = Arc<dyn Fn(&str) + Send + Sync>;

/// A navigation history holding one fragment per entry.
///
/// `push` and `replace` are programmatic and must NOT notify navigation
/// listeners; only user-driven moves through the history do.
pub trait History: Send + Sync {
    /// The current entry's fragment, without a leading `#`.
    fn fragment(&self) -> String;

    /// Append a new entry after the current one, discarding forward entries.
    fn push(&self, fragment: &str);

    /// Overwrite the current entry in place.
    fn replace(&self, fragment: &str);

    /// Register a listener for back/forward navigation.
    fn on_navigate(&self, listener: NavigationListener);
}
