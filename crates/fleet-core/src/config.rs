//! fleet.toml configuration parser.
//!
//! Every field has a default, so an empty file (or no file at all) yields the
//! stock timings: 30 s cache TTL, 5 s availability ceiling, 300 ms debounce,
//! three attempts per batch with a fixed 1 s delay, and a 50-entry undo
//! history.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ConflictStrategy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub validation: ValidationSettings,
    pub batch: BatchSettings,
    pub workflow: WorkflowSettings,
    pub history: HistorySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    /// How long an availability answer stays trustworthy.
    pub cache_ttl_ms: u64,
    /// Hard ceiling on a remote availability check.
    pub availability_timeout_ms: u64,
    /// Rolling window of the debounced validator.
    pub debounce_ms: u64,
    /// Above this many machines, bulk validation runs server-side.
    pub server_validation_threshold: usize,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 30_000,
            availability_timeout_ms: 5_000,
            debounce_ms: 300,
            server_validation_threshold: 100,
        }
    }
}

impl ValidationSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn availability_timeout(&self) -> Duration {
        Duration::from_millis(self.availability_timeout_ms)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub assign_batch_size: usize,
    pub migrate_batch_size: usize,
    /// Maximum attempts at the mutating call per batch.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay_ms: u64,
    pub stop_on_first_error: bool,
    pub validate_before_each_batch: bool,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            assign_batch_size: 10,
            migrate_batch_size: 5,
            max_retries: 3,
            retry_delay_ms: 1_000,
            stop_on_first_error: false,
            validate_before_each_batch: false,
        }
    }
}

impl BatchSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    pub conflict_strategy: ConflictStrategy,
    pub auto_resolve_conflicts: bool,
    pub validate_first: bool,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            conflict_strategy: ConflictStrategy::SkipConflicts,
            auto_resolve_conflicts: false,
            validate_first: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    pub capacity: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self { capacity: 50 }
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_yields_defaults() {
        let config = FleetConfig::from_toml_str("").unwrap();
        assert_eq!(config, FleetConfig::default());
        assert_eq!(config.validation.cache_ttl(), Duration::from_secs(30));
        assert_eq!(config.validation.availability_timeout(), Duration::from_secs(5));
        assert_eq!(config.batch.max_retries, 3);
        assert_eq!(config.history.capacity, 50);
    }

    #[test]
    fn parse_partial_sections() {
        let toml_str = r#"
[batch]
assign_batch_size = 2
stop_on_first_error = true

[workflow]
conflict_strategy = "fail_fast"
"#;
        let config = FleetConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.batch.assign_batch_size, 2);
        assert!(config.batch.stop_on_first_error);
        assert_eq!(config.batch.migrate_batch_size, 5);
        assert_eq!(config.workflow.conflict_strategy, ConflictStrategy::FailFast);
        assert!(config.workflow.validate_first);
    }

    #[test]
    fn rejects_unknown_strategy() {
        let err = FleetConfig::from_toml_str("[workflow]\nconflict_strategy = \"yolo\"\n");
        assert!(matches!(err, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn roundtrips_through_file() {
        let mut config = FleetConfig::default();
        config.validation.debounce_ms = 50;
        let rendered = config.to_toml_string().unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(rendered.as_bytes()).unwrap();

        let loaded = FleetConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded.validation.debounce_window(), Duration::from_millis(50));
    }
}
