//! Configuration structures for fs-shadow.
//!
//! - [`WatchConfig`] - Watcher settings (queues, rename pairing, filtering)
//! - [`OverflowPolicy`] - What a watcher does when a consumer falls behind
//! - [`Config`] - Root configuration, loadable from a JSON file
//!
//! All configuration types implement [`Default`], and every field may be
//! omitted from a configuration file.

use std::fs;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Behaviour of a watcher whose output queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for the consumer to make room. No transaction is ever lost, but
    /// a stalled consumer stalls reconciliation.
    #[default]
    Block,
    /// Drop the transaction, count it, and report it on the error queue.
    DropAndReport,
}

/// Configuration for a tree watcher.
///
/// # Examples
///
/// ```
/// use fsh_core::{OverflowPolicy, WatchConfig};
///
/// let config = WatchConfig::default();
/// assert!(config.recursive);
/// assert_eq!(config.overflow, OverflowPolicy::Block);
/// assert_eq!(config.ignore_names, vec![".git"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Whether to watch subdirectories recursively.
    pub recursive: bool,

    /// Capacity of the transaction output queue.
    pub event_capacity: usize,

    /// Capacity of the error output queue.
    pub error_capacity: usize,

    /// Capacity of the queue between the OS notifier thread and the watcher.
    pub raw_capacity: usize,

    /// What to do when the transaction queue is full.
    pub overflow: OverflowPolicy,

    /// How long an unpaired rename source waits for its destination, in
    /// milliseconds, before it is treated as a removal.
    pub rename_window_ms: u64,

    /// Whether to skip dot-files and dot-directories.
    pub skip_hidden: bool,

    /// Entry names that are never mirrored, at any depth.
    pub ignore_names: Vec<String>,

    /// Whether the initial scan follows symbolic links.
    pub follow_links: bool,

    /// Whether file content is hashed into [`MetaData::sum`](crate::MetaData::sum).
    pub compute_checksums: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            event_capacity: 256,
            error_capacity: 64,
            raw_capacity: 1024,
            overflow: OverflowPolicy::Block,
            rename_window_ms: 50,
            skip_hidden: false,
            ignore_names: vec![".git".to_owned()],
            follow_links: false,
            compute_checksums: true,
        }
    }
}

impl WatchConfig {
    /// Checks that every option has a usable value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] for a zero queue capacity or an
    /// ignore name that is not a single path segment.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (option, value) in [
            ("event_capacity", self.event_capacity),
            ("error_capacity", self.error_capacity),
            ("raw_capacity", self.raw_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidOption {
                    option: option.to_owned(),
                    reason: "queue capacity must be at least 1".to_owned(),
                });
            }
        }
        if let Some(name) = self
            .ignore_names
            .iter()
            .find(|name| name.is_empty() || name.contains('/'))
        {
            return Err(ConfigError::InvalidOption {
                option: "ignore_names".to_owned(),
                reason: format!("{name:?} is not a single path segment"),
            });
        }
        Ok(())
    }
}

/// Root configuration for fs-shadow.
///
/// # Examples
///
/// ```
/// use fsh_core::Config;
///
/// let config: Config = serde_json::from_str(r#"{"watch": {"skip_hidden": true}}"#).unwrap();
/// assert!(config.watch.skip_hidden);
/// assert_eq!(config.watch.event_capacity, 256);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Watcher configuration.
    pub watch: WatchConfig,
}

impl Config {
    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, is not valid
    /// JSON, or holds an invalid option.
    pub fn from_json_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every section of the configuration.
    ///
    /// # Errors
    ///
    /// See [`WatchConfig::validate`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.watch.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_config_defaults() {
        let config = WatchConfig::default();
        assert!(config.recursive);
        assert_eq!(config.event_capacity, 256);
        assert_eq!(config.rename_window_ms, 50);
        assert!(config.compute_checksums);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_config_deserialize_with_missing_fields() {
        let json = r#"{"watch": {"overflow": "drop_and_report", "rename_window_ms": 10}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.watch.overflow, OverflowPolicy::DropAndReport);
        assert_eq!(config.watch.rename_window_ms, 10);
        // Other fields should have defaults
        assert_eq!(config.watch.raw_capacity, 1024);
        assert_eq!(config.watch.ignore_names, vec![".git"]);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = WatchConfig {
            event_capacity: 0,
            ..WatchConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("event_capacity"));
    }

    #[test]
    fn test_validate_rejects_nested_ignore_name() {
        let config = WatchConfig {
            ignore_names: vec!["target/debug".to_owned()],
            ..WatchConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidOption { ref option, .. }) if option == "ignore_names"
        ));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("fs-shadow.json")).unwrap();
        std::fs::write(&path, r#"{"watch": {"skip_hidden": true, "error_capacity": 8}}"#).unwrap();

        let config = Config::from_json_file(&path).unwrap();
        assert!(config.watch.skip_hidden);
        assert_eq!(config.watch.error_capacity, 8);

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(Config::from_json_file(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_overflow_policy_serialization() {
        assert_eq!(
            serde_json::to_string(&OverflowPolicy::DropAndReport).unwrap(),
            r#""drop_and_report""#
        );
    }
}
