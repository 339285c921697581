//! Bulk operation policy.

use serde::{Deserialize, Serialize};

use fleet_core::{BatchSettings, FleetConfig, ValidationSettings};
use fleetgrid_batch::BatchConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOptions {
    /// Policy for bulk assignment batches.
    pub assignment: BatchConfig,
    /// Policy for bulk migration batches.
    pub migration: BatchConfig,
    /// Above this many machines, validation is delegated to the service.
    pub server_validation_threshold: usize,
    /// Attach a report to bulk assignment results.
    pub generate_report: bool,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self::from_settings(&BatchSettings::default(), &ValidationSettings::default())
    }
}

impl BulkOptions {
    pub fn from_settings(batch: &BatchSettings, validation: &ValidationSettings) -> Self {
        Self {
            assignment: BatchConfig::for_assignment(batch),
            migration: BatchConfig::for_migration(batch),
            server_validation_threshold: validation.server_validation_threshold,
            generate_report: true,
        }
    }
}

impl From<&FleetConfig> for BulkOptions {
    fn from(config: &FleetConfig) -> Self {
        Self::from_settings(&config.batch, &config.validation)
    }
}
