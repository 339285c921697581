//! fleet-core — shared vocabulary for the FleetGrid machine-assignment crates.
//!
//! - [`types`] — machines, assignment targets, validation and conflict records
//! - [`service`] — the `AssignmentService` contract consumed by the orchestrators
//! - [`error`] — `ServiceError` and the `OrchestratorError` taxonomy
//! - [`config`] — `fleet.toml` parsing

pub mod config;
pub mod error;
pub mod service;
pub mod time;
pub mod types;

pub use config::{
    BatchSettings, ConfigError, FleetConfig, HistorySettings, ValidationSettings, WorkflowSettings,
};
pub use error::{OrchestratorError, OrchestratorResult, ServiceError, ServiceResult};
pub use service::*;
pub use types::*;
