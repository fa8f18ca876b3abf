//! Sync configuration, loaded from RON.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```ron
//! (
//!     prop_debounce_ms: 250,
//!     check: (min_parent_age: 12),
//! )
//! ```

use std::path::Path;
use std::time::Duration;

use rootline_graph::CheckPolicy;
use serde::{Deserialize, Serialize};

use crate::constants;

/// Tunables for the outbox, local saves, and the consistency checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub prop_debounce_ms: u64,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    /// Confirmed pushes between full snapshot backups; 0 disables backups.
    pub backup_every: u32,
    pub local_save_throttle_ms: u64,
    pub check_debounce_ms: u64,
    pub max_batch: usize,
    pub check: CheckPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            prop_debounce_ms: constants::PROP_DEBOUNCE.as_millis() as u64,
            retry_base_ms: constants::RETRY_BASE.as_millis() as u64,
            retry_max_ms: constants::RETRY_MAX.as_millis() as u64,
            backup_every: constants::BACKUP_EVERY,
            local_save_throttle_ms: constants::LOCAL_SAVE_THROTTLE.as_millis() as u64,
            check_debounce_ms: constants::CHECK_DEBOUNCE.as_millis() as u64,
            max_batch: constants::MAX_BATCH,
            check: CheckPolicy::default(),
        }
    }
}

/// Errors loading a config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

impl SyncConfig {
    /// Parse from RON text.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    /// Load from a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    /// Load from `path` if it exists, otherwise defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_ron(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn check_debounce(&self) -> Duration {
        Duration::from_millis(self.check_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = SyncConfig::from_ron("(prop_debounce_ms: 250, check: (min_parent_age: 12))").unwrap();
        assert_eq!(config.prop_debounce_ms, 250);
        assert_eq!(config.check.min_parent_age, 12);
        assert!(config.check.dates);
        assert_eq!(config.retry_base_ms, 2_000);
        assert_eq!(config.backup_every, 50);
    }

    #[test]
    fn test_empty_struct_is_default() {
        assert_eq!(SyncConfig::from_ron("()").unwrap(), SyncConfig::default());
    }

    #[test]
    fn test_bad_ron_is_an_error() {
        assert!(matches!(SyncConfig::from_ron("(prop_debounce_ms: \"soon\")"), Err(ConfigError::Ron(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.ron");
        assert_eq!(SyncConfig::load_or_default(&path).unwrap(), SyncConfig::default());

        std::fs::write(&path, "(backup_every: 5)").unwrap();
        assert_eq!(SyncConfig::load(&path).unwrap().backup_every, 5);
    }
}
