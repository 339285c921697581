//! fleetgrid-state — an in-memory stand-in for the remote assignment service.
//!
//! The real service owns machine assignment state. This crate keeps the same
//! state in memory so the orchestrators can be exercised end to end, and
//! lets tests inject the failures the orchestrators must survive: rejected
//! calls, per-machine failures, removals that error, and availability checks
//! that never answer.
//!
//! Every call is appended to a call log (`ServiceCall`) so tests can assert
//! exactly which mutations were issued and in what order.

pub mod inventory;
pub mod memory;

pub use inventory::{Inventory, InventoryError};
pub use memory::{MemoryAssignmentService, ServiceCall};
