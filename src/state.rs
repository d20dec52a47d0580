//! Application state values.
//!
//! [`ApplicationState`] is the full set of navigable parameters that lives
//! in the URL fragment. Values are either text or nested maps of values.
//! Empty maps carry no information in the fragment and are pruned on every
//! write, so every `ApplicationState` is representable and round-trips
//! through [`crate::codec`] exactly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::path::KeyPath;

/// A single value stored in the application state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    /// Leaf text value. Numbers and id lists are stored in text form.
    Text(String),
    /// Nested mapping.
    Map(BTreeMap<String, StateValue>),
}

impl StateValue {
    /// Build a comma-joined list value.
    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = items
            .into_iter()
            .map(|item| item.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(",");
        StateValue::Text(joined)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            StateValue::Text(text) => Some(text),
            StateValue::Map(_) => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, StateValue>> {
        match self {
            StateValue::Map(map) => Some(map),
            StateValue::Text(_) => None,
        }
    }

    /// Split a text value on commas, skipping empty items.
    ///
    /// Maps yield an empty list.
    pub fn as_list(&self) -> Vec<String> {
        match self {
            StateValue::Text(text) => text
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
            StateValue::Map(_) => Vec::new(),
        }
    }

    /// Remove empty nested maps and empty keys, which no fragment can
    /// express. Returns `None` if nothing is left.
    fn pruned(self) -> Option<Self> {
        match self {
            StateValue::Text(_) => Some(self),
            StateValue::Map(map) => {
                let map = prune_map(map);
                (!map.is_empty()).then_some(StateValue::Map(map))
            }
        }
    }
}

fn prune_map(map: BTreeMap<String, StateValue>) -> BTreeMap<String, StateValue> {
    map.into_iter()
        .filter(|(key, _)| !key.is_empty())
        .filter_map(|(key, value)| value.pruned().map(|value| (key, value)))
        .collect()
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::Text(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::Text(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Text(value.to_string())
    }
}

impl From<u64> for StateValue {
    fn from(value: u64) -> Self {
        StateValue::Text(value.to_string())
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        StateValue::Text(value.to_string())
    }
}

impl From<BTreeMap<String, StateValue>> for StateValue {
    fn from(value: BTreeMap<String, StateValue>) -> Self {
        StateValue::Map(value)
    }
}

/// The full navigable application state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, StateValue>", into = "BTreeMap<String, StateValue>")]
pub struct ApplicationState {
    entries: BTreeMap<String, StateValue>,
}

impl ApplicationState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of top-level keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Top-level entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &StateValue)> {
        self.entries.iter()
    }

    /// Value at `path`, if present.
    pub fn get(&self, path: &KeyPath) -> Option<&StateValue> {
        let (head, rest) = path.segments().split_first()?;
        let mut current = self.entries.get(head)?;
        for segment in rest {
            current = current.as_map()?.get(segment)?;
        }
        Some(current)
    }

    /// Text value at `path`, if present and a leaf.
    pub fn get_text(&self, path: &KeyPath) -> Option<&str> {
        self.get(path).and_then(StateValue::as_text)
    }

    /// Set the value at `path`, creating intermediate maps.
    ///
    /// A text value along the way is replaced by a map. Setting an empty
    /// map is equivalent to [`ApplicationState::clear`].
    pub fn set(&mut self, path: &KeyPath, value: impl Into<StateValue>) {
        match value.into().pruned() {
            Some(value) => insert_at(&mut self.entries, path.segments(), value),
            None => {
                self.clear(path);
            }
        }
    }

    /// Builder form of [`ApplicationState::set`].
    pub fn with(mut self, path: &KeyPath, value: impl Into<StateValue>) -> Self {
        self.set(path, value);
        self
    }

    /// Remove the value at `path`, pruning parents left empty.
    pub fn clear(&mut self, path: &KeyPath) -> Option<StateValue> {
        remove_at(&mut self.entries, path.segments())
    }

    /// Shallow merge: every top-level key of `partial` replaces ours.
    pub fn extend(&mut self, partial: ApplicationState) {
        self.entries.extend(partial.entries);
    }
}

fn insert_at(map: &mut BTreeMap<String, StateValue>, segments: &[String], value: StateValue) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        map.insert(head.clone(), value);
        return;
    }
    let entry = map
        .entry(head.clone())
        .or_insert_with(|| StateValue::Map(BTreeMap::new()));
    if let StateValue::Text(_) = entry {
        *entry = StateValue::Map(BTreeMap::new());
    }
    if let StateValue::Map(child) = entry {
        insert_at(child, rest, value);
    }
}

fn remove_at(map: &mut BTreeMap<String, StateValue>, segments: &[String]) -> Option<StateValue> {
    let (head, rest) = segments.split_first()?;
    if rest.is_empty() {
        return map.remove(head);
    }
    let removed = match map.get_mut(head) {
        Some(StateValue::Map(child)) => remove_at(child, rest),
        _ => None,
    };
    if matches!(map.get(head), Some(StateValue::Map(child)) if child.is_empty()) {
        map.remove(head);
    }
    removed
}

impl From<BTreeMap<String, StateValue>> for ApplicationState {
    fn from(entries: BTreeMap<String, StateValue>) -> Self {
        Self {
            entries: prune_map(entries),
        }
    }
}

impl From<ApplicationState> for BTreeMap<String, StateValue> {
    fn from(state: ApplicationState) -> Self {
        state.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> KeyPath {
        KeyPath::parse(p).unwrap()
    }

    #[test]
    fn test_set_and_get_nested() {
        let mut state = ApplicationState::new();
        state.set(&path("f.text"), "Main St");
        state.set(&path("f.box"), "42.1,-71.1,42.2,-71.0");
        state.set(&path("zoom"), 15_i64);

        assert_eq!(state.get_text(&path("f.text")), Some("Main St"));
        assert_eq!(state.get_text(&path("zoom")), Some("15"));
        assert_eq!(state.get(&path("f")).and_then(|v| v.as_map()).map(|m| m.len()), Some(2));
        assert_eq!(state.get(&path("f.region")), None);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_set_replaces_text_with_map() {
        let mut state = ApplicationState::new().with(&path("f"), "x");
        state.set(&path("f.text"), "a");
        assert_eq!(state.get_text(&path("f.text")), Some("a"));
        assert_eq!(state.get_text(&path("f.text.deeper")), None);
    }

    #[test]
    fn test_clear_prunes_empty_parent() {
        let mut state = ApplicationState::new().with(&path("f.text"), "a");
        assert_eq!(state.clear(&path("f.text")), Some(StateValue::from("a")));
        assert!(state.is_empty());
        assert_eq!(state.clear(&path("f.text")), None);
    }

    #[test]
    fn test_empty_string_is_not_absent() {
        let state = ApplicationState::new().with(&path("ref"), "");
        assert_eq!(state.get_text(&path("ref")), Some(""));
        assert!(!state.is_empty());
    }

    #[test]
    fn test_empty_map_is_pruned() {
        let mut state = ApplicationState::new().with(&path("f.text"), "a");
        state.set(&path("f"), BTreeMap::<String, StateValue>::new());
        assert!(state.is_empty());

        let mut nested = BTreeMap::new();
        nested.insert("inner".to_string(), StateValue::Map(BTreeMap::new()));
        let state = ApplicationState::from(
            [("outer".to_string(), StateValue::Map(nested))]
                .into_iter()
                .collect::<BTreeMap<_, _>>(),
        );
        assert!(state.is_empty());
    }

    #[test]
    fn test_empty_keys_are_dropped() {
        let mut nested = BTreeMap::new();
        nested.insert(String::new(), StateValue::from("x"));
        let state = ApplicationState::from(
            [
                (String::new(), StateValue::from("x")),
                ("f".to_string(), StateValue::Map(nested)),
            ]
            .into_iter()
            .collect::<BTreeMap<_, _>>(),
        );
        assert!(state.is_empty());

        let state: ApplicationState = serde_json::from_str(r#"{"": "x", "zoom": "15"}"#).unwrap();
        assert_eq!(state, ApplicationState::new().with(&path("zoom"), "15"));
    }

    #[test]
    fn test_extend_is_shallow() {
        let mut state = ApplicationState::new()
            .with(&path("lat"), "42.38")
            .with(&path("f.text"), "a")
            .with(&path("f.region"), "ward-1");
        let partial = ApplicationState::new()
            .with(&path("lat"), "42.39")
            .with(&path("f.text"), "b");
        state.extend(partial);

        assert_eq!(state.get_text(&path("lat")), Some("42.39"));
        assert_eq!(state.get_text(&path("f.text")), Some("b"));
        // The whole `f` map was replaced.
        assert_eq!(state.get(&path("f.region")), None);
    }

    #[test]
    fn test_list_values() {
        let value = StateValue::list(["12", "34"]);
        assert_eq!(value.as_text(), Some("12,34"));
        assert_eq!(value.as_list(), vec!["12", "34"]);
        assert!(StateValue::from("").as_list().is_empty());
        assert_eq!(StateValue::from("a,,b,").as_list(), vec!["a", "b"]);
    }

    #[test]
    fn test_serde_json() {
        let state = ApplicationState::new()
            .with(&path("f.text"), "a")
            .with(&path("zoom"), "15");
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#"{"f":{"text":"a"},"zoom":"15"}"#);
        let back: ApplicationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
