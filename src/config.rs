//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, StateError};
use crate::path::KeyPath;

/// Default coalescing interval for attribute-triggered resorts.
pub const DEFAULT_RESORT_DEBOUNCE_MS: u64 = 50;

/// Default number of load rounds before a pending id is evicted.
pub const DEFAULT_MAX_PENDING_ATTEMPTS: u32 = 3;

/// Default broadcast channel capacity for watch streams.
pub const DEFAULT_WATCH_CHANNEL_CAPACITY: usize = 1024;

/// Tunables shared by the store, selection sets and collections.
///
/// All fields have defaults, so a partial JSON document is valid:
///
/// ```
/// use zoning_state::EngineConfig;
///
/// let config = EngineConfig::from_json(r#"{"max_pending_attempts": 5}"#).unwrap();
/// assert_eq!(config.max_pending_attempts, 5);
/// assert_eq!(config.filter_key, "f");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum interval between resorts caused by entity attribute changes.
    pub resort_debounce_ms: u64,

    /// Unsuccessful load rounds after which a pending id is given up on.
    pub max_pending_attempts: u32,

    /// Capacity of the broadcast channel behind watch streams. Slow stream
    /// consumers lag and drop events beyond this.
    pub watch_channel_capacity: usize,

    /// State key under which filter queries are mirrored.
    pub filter_key: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resort_debounce_ms: DEFAULT_RESORT_DEBOUNCE_MS,
            max_pending_attempts: DEFAULT_MAX_PENDING_ATTEMPTS,
            watch_channel_capacity: DEFAULT_WATCH_CHANNEL_CAPACITY,
            filter_key: "f".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_pending_attempts == 0 {
            return Err(StateError::InvalidConfig(
                "max_pending_attempts must be at least 1".to_string(),
            ));
        }
        if self.watch_channel_capacity == 0 {
            return Err(StateError::InvalidConfig(
                "watch_channel_capacity must be at least 1".to_string(),
            ));
        }
        self.filter_path()
            .map_err(|err| StateError::InvalidConfig(format!("filter_key: {err}")))?;
        Ok(())
    }

    pub fn resort_debounce(&self) -> Duration {
        Duration::from_millis(self.resort_debounce_ms)
    }

    /// The parsed filter key.
    pub fn filter_path(&self) -> Result<KeyPath> {
        KeyPath::parse(&self.filter_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.resort_debounce(), Duration::from_millis(50));
        assert_eq!(config.max_pending_attempts, 3);
        assert_eq!(config.watch_channel_capacity, 1024);
        assert_eq!(config.filter_path().unwrap().to_string(), "f");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json(r#"{"resort_debounce_ms": 200}"#).unwrap();
        assert_eq!(config.resort_debounce(), Duration::from_millis(200));
        assert_eq!(config.max_pending_attempts, DEFAULT_MAX_PENDING_ATTEMPTS);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        let err = EngineConfig::from_json(r#"{"max_pending_attempts": 0}"#).unwrap_err();
        assert!(matches!(err, StateError::InvalidConfig(_)));
        let err = EngineConfig::from_json(r#"{"watch_channel_capacity": 0}"#).unwrap_err();
        assert!(matches!(err, StateError::InvalidConfig(_)));
        let err = EngineConfig::from_json(r#"{"filter_key": "f..x"}"#).unwrap_err();
        assert!(matches!(err, StateError::InvalidConfig(_)));
        let err = EngineConfig::from_json("[").unwrap_err();
        assert!(matches!(err, StateError::SerializationError(_)));
    }
}
