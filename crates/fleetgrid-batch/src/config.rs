//! Batch execution policy.

use std::time::Duration;

use fleet_core::BatchSettings;

/// How a machine list is split and driven.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BatchConfig {
    /// Machines per batch. Zero means one batch holding everything.
    pub batch_size: usize,
    /// Attempts at the mutating call per batch.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
    /// Abort at the first batch with failures, leaving the rest pending.
    pub stop_on_first_error: bool,
    /// Run the handler's pre-validation before each batch.
    pub validate_before_each_batch: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_retries: 3,
            retry_delay: Duration::from_millis(1_000),
            stop_on_first_error: false,
            validate_before_each_batch: false,
        }
    }
}

impl BatchConfig {
    /// Policy for bulk assignment.
    pub fn for_assignment(settings: &BatchSettings) -> Self {
        Self::with_size(settings, settings.assign_batch_size)
    }

    /// Policy for bulk migration.
    pub fn for_migration(settings: &BatchSettings) -> Self {
        Self::with_size(settings, settings.migrate_batch_size)
    }

    fn with_size(settings: &BatchSettings, batch_size: usize) -> Self {
        Self {
            batch_size,
            max_retries: settings.max_retries,
            retry_delay: settings.retry_delay(),
            stop_on_first_error: settings.stop_on_first_error,
            validate_before_each_batch: settings.validate_before_each_batch,
        }
    }

    /// At least one attempt is always made.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}
