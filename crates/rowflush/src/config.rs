//! Flush configuration.

use rowflush_core::{ConfigError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a [`FlushAction`](crate::FlushAction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Group consecutive same-shape operations into batches. When false every
    /// operation is executed as its own batch.
    pub batching: bool,
    /// Upper bound on operations per batch.
    pub max_batch_size: Option<usize>,
    /// Drop updates that have nothing left to write after merging.
    pub filter_empty_updates: bool,
    /// Let the sorter consult the snapshot source for deletes whose object
    /// lacks foreign-key values.
    pub use_cached_snapshots: bool,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            batching: true,
            max_batch_size: None,
            filter_empty_updates: true,
            use_cached_snapshots: true,
        }
    }
}

impl FlushConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the batching option (builder pattern).
    #[must_use]
    pub fn batching(mut self, value: bool) -> Self {
        self.batching = value;
        self
    }

    /// Set the maximum batch size (builder pattern).
    #[must_use]
    pub fn max_batch_size(mut self, value: usize) -> Self {
        self.max_batch_size = Some(value);
        self
    }

    /// Set the `filter_empty_updates` option (builder pattern).
    #[must_use]
    pub fn filter_empty_updates(mut self, value: bool) -> Self {
        self.filter_empty_updates = value;
        self
    }

    /// Set the `use_cached_snapshots` option (builder pattern).
    #[must_use]
    pub fn use_cached_snapshots(mut self, value: bool) -> Self {
        self.use_cached_snapshots = value;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == Some(0) {
            return Err(ConfigError {
                message: "max_batch_size must be at least 1".to_string(),
                source: None,
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_config_defaults() {
        let config = FlushConfig::default();
        assert!(config.batching);
        assert_eq!(config.max_batch_size, None);
        assert!(config.filter_empty_updates);
        assert!(config.use_cached_snapshots);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flush_config_builder() {
        let config = FlushConfig::new()
            .batching(false)
            .max_batch_size(50)
            .filter_empty_updates(false)
            .use_cached_snapshots(false);
        assert!(!config.batching);
        assert_eq!(config.max_batch_size, Some(50));
        assert!(!config.filter_empty_updates);
        assert!(!config.use_cached_snapshots);
    }

    #[test]
    fn test_flush_config_from_json_partial() {
        let config = FlushConfig::from_json(r#"{"max_batch_size": 10}"#).unwrap();
        assert_eq!(config.max_batch_size, Some(10));
        assert!(config.batching);
    }

    #[test]
    fn test_flush_config_rejects_zero_batch() {
        let err = FlushConfig::from_json(r#"{"max_batch_size": 0}"#).unwrap_err();
        assert!(matches!(err, rowflush_core::Error::Config(_)));
        assert!(FlushConfig::new().max_batch_size(0).validate().is_err());
    }

    #[test]
    fn test_flush_config_rejects_bad_json() {
        assert!(FlushConfig::from_json("{batching: yes}").is_err());
    }
}
