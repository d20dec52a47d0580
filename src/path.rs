//! Structured key paths into the application state.
//!
//! A [`KeyPath`] is the parsed form of a dotted address such as `f.box`.
//! Paths are validated once at construction so that the store and the
//! codec never have to deal with empty or ambiguous segments.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StateError};

/// Maximum length of a single path segment in bytes.
pub const MAX_SEGMENT_LENGTH: usize = 64;

/// Validated, non-empty sequence of segment names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyPath {
    segments: Vec<String>,
}

impl KeyPath {
    /// Parse a dotted path (`"f.text"`).
    pub fn parse(path: &str) -> Result<Self> {
        let segments = path
            .split('.')
            .map(|segment| {
                validate_segment(segment)
                    .map(|_| segment.to_string())
                    .map_err(|reason| StateError::InvalidPath(format!("{path:?}: {reason}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { segments })
    }

    /// Build a path from individual segments.
    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(StateError::InvalidPath("path has no segments".to_string()));
        }
        for segment in &segments {
            validate_segment(segment)
                .map_err(|reason| StateError::InvalidPath(format!("{segment:?}: {reason}")))?;
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments (always at least one).
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// The final segment.
    pub fn leaf(&self) -> &str {
        // Construction guarantees at least one segment.
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// The path without its final segment, if any.
    pub fn parent(&self) -> Option<KeyPath> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append a segment, validating it.
    pub fn join(&self, segment: &str) -> Result<KeyPath> {
        validate_segment(segment)
            .map_err(|reason| StateError::InvalidPath(format!("{segment:?}: {reason}")))?;
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    /// True if `self` equals `other` or is an ancestor of it.
    pub fn is_prefix_of(&self, other: &KeyPath) -> bool {
        other.segments.len() >= self.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }
}

fn validate_segment(segment: &str) -> std::result::Result<(), &'static str> {
    if segment.is_empty() {
        return Err("empty segment");
    }
    if segment.len() > MAX_SEGMENT_LENGTH {
        return Err("segment too long");
    }
    if !segment
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err("segment may only contain [A-Za-z0-9_-]");
    }
    Ok(())
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl FromStr for KeyPath {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for KeyPath {
    type Error = StateError;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl TryFrom<String> for KeyPath {
    type Error = StateError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<KeyPath> for String {
    fn from(path: KeyPath) -> Self {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let path = KeyPath::parse("f.box").unwrap();
        assert_eq!(path.segments(), &["f".to_string(), "box".to_string()]);
        assert_eq!(path.depth(), 2);
        assert_eq!(path.leaf(), "box");
        assert_eq!(path.to_string(), "f.box");

        assert!(KeyPath::parse("selected-proposals").is_ok());
        assert!(KeyPath::parse("layer_2").is_ok());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", ".", "f.", ".f", "f..box", "f box", "f=box", "f&x", "ü"] {
            let err = KeyPath::parse(bad).unwrap_err();
            assert!(matches!(err, StateError::InvalidPath(_)), "{bad:?}");
        }
        let long = "a".repeat(MAX_SEGMENT_LENGTH + 1);
        assert!(KeyPath::parse(&long).is_err());
    }

    #[test]
    fn test_from_segments() {
        let path = KeyPath::from_segments(["f", "text"]).unwrap();
        assert_eq!(path, KeyPath::parse("f.text").unwrap());
        assert!(KeyPath::from_segments(Vec::<String>::new()).is_err());
        assert!(KeyPath::from_segments(["f", "a.b"]).is_err());
    }

    #[test]
    fn test_parent_join_prefix() {
        let f = KeyPath::parse("f").unwrap();
        let text = f.join("text").unwrap();
        assert_eq!(text.parent(), Some(f.clone()));
        assert_eq!(f.parent(), None);
        assert!(f.is_prefix_of(&text));
        assert!(text.is_prefix_of(&text));
        assert!(!text.is_prefix_of(&f));
        assert!(f.join("").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let path = KeyPath::parse("f.region").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"f.region\"");
        let back: KeyPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
        assert!(serde_json::from_str::<KeyPath>("\"f..x\"").is_err());
    }
}
