//! Fragment codec: `ApplicationState` <-> URL fragment string.
//!
//! Nested paths are flattened with `.` (`f.box=42.1,-71.1,42.2,-71.0`),
//! pairs are joined with `&` and keys are emitted in sorted order, so the
//! encoding is deterministic. Commas, dots, dashes and colons stay literal to
//! keep fragments readable and hand-editable.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::{Result, StateError};
use crate::state::{ApplicationState, StateValue};

/// Characters escaped inside a key segment. `.` separates segments.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'.')
    .add(b'/')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Characters escaped inside a value.
const VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Encode a state into its fragment form (without a leading `#`).
pub fn encode(state: &ApplicationState) -> String {
    let mut pairs = Vec::new();
    for (key, value) in state.entries() {
        flatten(&mut vec![encode_segment(key)], value, &mut pairs);
    }
    pairs.join("&")
}

fn flatten(prefix: &mut Vec<String>, value: &StateValue, pairs: &mut Vec<String>) {
    match value {
        StateValue::Text(text) => {
            pairs.push(format!("{}={}", prefix.join("."), encode_value(text)));
        }
        StateValue::Map(map) => {
            for (key, child) in map {
                prefix.push(encode_segment(key));
                flatten(prefix, child, pairs);
                prefix.pop();
            }
        }
    }
}

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

/// Percent-encode a single value with the fragment's value escaping rules.
pub fn encode_value(value: &str) -> String {
    utf8_percent_encode(value, VALUE).to_string()
}

/// Decode a fragment, degrading to the empty state when it is malformed.
pub fn decode(fragment: &str) -> ApplicationState {
    match try_decode(fragment) {
        Ok(state) => state,
        Err(err) => {
            warn!(fragment, error = %err, "discarding malformed fragment");
            ApplicationState::new()
        }
    }
}

/// Strictly decode a fragment.
///
/// A leading `#` is ignored, as are empty pairs (`a=1&&b=2`). Later
/// duplicates of the same key win.
pub fn try_decode(fragment: &str) -> Result<ApplicationState> {
    let fragment = fragment.strip_prefix('#').unwrap_or(fragment);
    let mut root: BTreeMap<String, StateValue> = BTreeMap::new();

    for pair in fragment.split('&').filter(|pair| !pair.is_empty()) {
        let (raw_key, raw_value) = pair
            .split_once('=')
            .ok_or_else(|| StateError::MalformedFragment(format!("missing '=' in {pair:?}")))?;
        let segments = raw_key
            .split('.')
            .map(|segment| {
                if segment.is_empty() {
                    return Err(StateError::MalformedFragment(format!(
                        "empty key segment in {raw_key:?}"
                    )));
                }
                decode_component(segment)
            })
            .collect::<Result<Vec<_>>>()?;
        let value = decode_component(raw_value)?;
        insert(&mut root, &segments, value, raw_key)?;
    }

    Ok(ApplicationState::from(root))
}

fn decode_component(raw: &str) -> Result<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|err| StateError::MalformedFragment(format!("{raw:?}: {err}")))
}

fn insert(
    map: &mut BTreeMap<String, StateValue>,
    segments: &[String],
    value: String,
    raw_key: &str,
) -> Result<()> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(());
    };
    if rest.is_empty() {
        if let Some(StateValue::Map(_)) = map.get(head) {
            return Err(StateError::MalformedFragment(format!(
                "{raw_key:?} conflicts with a nested key"
            )));
        }
        map.insert(head.clone(), StateValue::Text(value));
        return Ok(());
    }
    match map
        .entry(head.clone())
        .or_insert_with(|| StateValue::Map(BTreeMap::new()))
    {
        StateValue::Map(child) => insert(child, rest, value, raw_key),
        StateValue::Text(_) => Err(StateError::MalformedFragment(format!(
            "{raw_key:?} nests under a text value"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::KeyPath;
    use proptest::prelude::*;

    fn path(p: &str) -> KeyPath {
        KeyPath::parse(p).unwrap()
    }

    #[test]
    fn test_encode_is_sorted_and_flattened() {
        let state = ApplicationState::new()
            .with(&path("zoom"), "15")
            .with(&path("f.box"), "42.1,-71.1,42.2,-71.0")
            .with(&path("f.text"), "Main St")
            .with(&path("lat"), "42.38");
        assert_eq!(
            encode(&state),
            "f.box=42.1,-71.1,42.2,-71.0&f.text=Main%20St&lat=42.38&zoom=15"
        );
    }

    #[test]
    fn test_encode_escapes_reserved_characters() {
        let state = ApplicationState::new().with(&path("f.text"), "a&b=c#d%e+f");
        let encoded = encode(&state);
        assert_eq!(encoded, "f.text=a%26b%3Dc%23d%25e%2Bf");
        assert_eq!(decode(&encoded), state);
    }

    #[test]
    fn test_decode_basic() {
        let state = decode("#f.text=Main%20St&selected=1,2,3&ref=");
        assert_eq!(state.get_text(&path("f.text")), Some("Main St"));
        assert_eq!(
            state.get(&path("selected")).map(StateValue::as_list),
            Some(vec!["1".to_string(), "2".to_string(), "3".to_string()])
        );
        assert_eq!(state.get_text(&path("ref")), Some(""));
    }

    #[test]
    fn test_decode_empty_and_stray_separators() {
        assert!(decode("").is_empty());
        assert!(decode("#").is_empty());
        let state = decode("a=1&&b=2&");
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_decode_duplicate_last_wins() {
        let state = decode("a=1&a=2");
        assert_eq!(state.get_text(&path("a")), Some("2"));
    }

    #[test]
    fn test_malformed_fragments_degrade_to_empty() {
        for bad in ["novalue", "a..b=1", "=1", "f=1&f.text=2", "f.text=2&f=1", "a=%FF"] {
            assert!(try_decode(bad).is_err(), "{bad:?}");
            assert!(decode(bad).is_empty(), "{bad:?}");
        }
    }

    #[test]
    fn test_keys_with_reserved_characters_round_trip() {
        let mut entries = BTreeMap::new();
        entries.insert("a.b c".to_string(), StateValue::from("x"));
        let state = ApplicationState::from(entries);
        let encoded = encode(&state);
        assert_eq!(encoded, "a%2Eb%20c=x");
        assert_eq!(try_decode(&encoded).unwrap(), state);
    }

    #[test]
    fn test_empty_key_does_not_survive_encoding() {
        let mut entries = BTreeMap::new();
        entries.insert(String::new(), StateValue::from("x"));
        entries.insert("zoom".to_string(), StateValue::from("15"));
        let state = ApplicationState::from(entries);
        let encoded = encode(&state);
        assert_eq!(encoded, "zoom=15");
        assert_eq!(try_decode(&encoded).unwrap(), state);
    }

    fn leaf() -> impl Strategy<Value = StateValue> {
        any::<String>().prop_map(StateValue::Text)
    }

    fn value() -> impl Strategy<Value = StateValue> {
        leaf().prop_recursive(2, 16, 4, |inner| {
            prop::collection::btree_map("[a-z0-9_.& ]{0,5}", inner, 1..4)
                .prop_map(StateValue::Map)
        })
    }

    proptest! {
        #[test]
        fn prop_round_trip(entries in prop::collection::btree_map("[a-zA-Z0-9_=%]{0,8}", value(), 0..6)) {
            let state = ApplicationState::from(entries);
            let encoded = encode(&state);
            prop_assert_eq!(try_decode(&encoded).unwrap(), state.clone());
            // Encoding is a function of the content only.
            prop_assert_eq!(encode(&decode(&encoded)), encoded);
        }
    }
}
