//! FleetGrid bulk operations — many machines, processed batch by batch.
//!
//! Bulk assignment validates the whole selection up front, splits the
//! survivors into ordered batches and drives them through the batch
//! executor with retry. Running operations are registered by id so another
//! task can inspect or cancel them.
//!
//! # Components
//!
//! - **`options`** — Batch policies and thresholds derived from `fleet.toml`
//! - **`progress`** — Live counters and the summary of the last operation
//! - **`registry`** — Running operations keyed by id (status, cancellation)
//! - **`report`** — Per-batch and per-machine post-run report
//! - **`controller`** — Bulk assignment, migration, removal and
//!   server-batched assignment

pub mod controller;
pub mod options;
pub mod progress;
pub mod registry;
pub mod report;

pub use controller::{BulkAssignmentResult, BulkOperationsController, BulkStep};
pub use options::BulkOptions;
pub use progress::{BulkOperationResult, BulkProgress};
pub use registry::OperationRegistry;
pub use report::{BatchReport, BulkOperationReport, MachineReport, MachineStatus, ReportSummary};
