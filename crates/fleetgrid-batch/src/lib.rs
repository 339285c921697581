//! FleetGrid batch execution — ordered batches with fixed-delay retry.
//!
//! # Components
//!
//! - **`config`** — Batch size, retry and abort policy
//! - **`batch`** — Batch records and `create_batches`
//! - **`executor`** — Sequential batch driver (retry, pre-validation, cancellation)

pub mod batch;
pub mod config;
pub mod executor;

pub use batch::{Batch, BatchOutcome, BatchStatus, create_batches};
pub use config::BatchConfig;
pub use executor::{BatchExecutor, BatchFuture, BatchHandler, BatchRun, CancelFlag};
