//! Session configuration.

use serde::{Deserialize, Serialize};

/// When pending changes are pushed to the store outside an explicit `flush`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Flush before every ad hoc query so the store sees pending changes.
    #[default]
    Auto,
    /// Flush only on `flush` and `commit`.
    Commit,
}

/// Configuration for Session behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Whether flush begins a store transaction when none is open.
    pub auto_begin: bool,
    /// When queries trigger a flush.
    pub flush_mode: FlushMode,
    /// Lazy loads of one relationship before a warning is logged. `0` disables tracking.
    pub lazy_load_warn_threshold: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_begin: true,
            flush_mode: FlushMode::Auto,
            lazy_load_warn_threshold: 3,
        }
    }
}

impl SessionConfig {
    /// Parse a configuration from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Set `auto_begin`.
    #[must_use]
    pub const fn with_auto_begin(mut self, auto_begin: bool) -> Self {
        self.auto_begin = auto_begin;
        self
    }

    /// Set the flush mode.
    #[must_use]
    pub const fn with_flush_mode(mut self, flush_mode: FlushMode) -> Self {
        self.flush_mode = flush_mode;
        self
    }

    /// Set the lazy-load warning threshold.
    #[must_use]
    pub const fn with_lazy_load_warn_threshold(mut self, threshold: usize) -> Self {
        self.lazy_load_warn_threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert!(config.auto_begin);
        assert_eq!(config.flush_mode, FlushMode::Auto);
        assert_eq!(config.lazy_load_warn_threshold, 3);
    }

    #[test]
    fn test_from_json_fills_missing_keys() {
        let config = SessionConfig::from_json(r#"{"flush_mode": "commit"}"#).unwrap();
        assert_eq!(config.flush_mode, FlushMode::Commit);
        assert!(config.auto_begin);

        assert!(SessionConfig::from_json(r#"{"flush_mode": "sometimes"}"#).is_err());
    }

    #[test]
    fn test_builder_setters() {
        let config = SessionConfig::default()
            .with_auto_begin(false)
            .with_lazy_load_warn_threshold(0);
        assert!(!config.auto_begin);
        assert_eq!(config.lazy_load_warn_threshold, 0);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(SessionConfig::from_json(&json).unwrap(), config);
    }
}
