//! The assignment service contract.
//!
//! The remote service owns assignment state; FleetGrid only asks it to
//! validate and mutate. Transport is up to the implementation, so every call
//! returns a boxed `Send` future (the same shape `AsyncConnectionFactory`
//! style seams use) and the orchestrators hold an `Arc<dyn AssignmentService>`.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::ServiceResult;
use crate::types::{AssignmentKind, AssignmentTarget, CloneTarget, Machine, MachineName};

/// Boxed future returned by every assignment service call.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = ServiceResult<T>> + Send + 'a>>;

/// Progress callback for server-side batched operations.
pub type ProgressFn<'a> = dyn Fn(BatchProgress) + Send + Sync + 'a;

/// Response of a mutating call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperationResponse {
    pub success: bool,
    /// Machines the service could not process (empty on full success).
    #[serde(default)]
    pub failed_machines: Vec<MachineName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OperationResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            failed_machines: Vec::new(),
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>, failed_machines: Vec<MachineName>) -> Self {
        Self {
            success: false,
            failed_machines,
            message: Some(message.into()),
        }
    }

    pub fn message_or(&self, fallback: &str) -> String {
        self.message.clone().unwrap_or_else(|| fallback.to_string())
    }
}

/// Availability of one machine as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineAvailability {
    pub machine_name: MachineName,
    pub available: bool,
    /// Structured error payload describing the conflicting assignment,
    /// present when `available` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<String>,
}

/// JSON body of [`MachineAvailability::conflict`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictPayload {
    pub assignment_type: String,
    pub resource_name: String,
}

impl ConflictPayload {
    pub fn new(kind: AssignmentKind, resource: impl Into<String>) -> Self {
        Self {
            assignment_type: kind.as_str().to_uppercase(),
            resource_name: resource.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// One item a batched call could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem<T> {
    pub item: T,
    pub error: String,
}

/// Result of server-side batch validation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchValidationResponse {
    pub valid: Vec<Machine>,
    pub invalid: Vec<FailedItem<Machine>>,
}

/// Which mutation a server-side batched operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOperationKind {
    Assign,
    Remove,
}

/// Progress notification emitted during a server-side batched operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub current_batch: u32,
    pub total_batches: u32,
    pub completed: usize,
    pub total: usize,
    pub percentage: f64,
}

/// Result of a server-side batched operation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchOperationResponse {
    pub successful: Vec<MachineName>,
    pub failed: Vec<FailedItem<MachineName>>,
}

/// The remote service that owns machine assignment state.
pub trait AssignmentService: Send + Sync {
    fn assign_to_cluster<'a>(
        &'a self,
        machines: &'a [MachineName],
        cluster: &'a str,
    ) -> ServiceFuture<'a, OperationResponse>;

    fn remove_from_cluster<'a>(
        &'a self,
        machines: &'a [MachineName],
    ) -> ServiceFuture<'a, OperationResponse>;

    fn assign_to_clone<'a>(
        &'a self,
        machines: &'a [MachineName],
        clone: &'a CloneTarget,
        team: &'a str,
    ) -> ServiceFuture<'a, OperationResponse>;

    fn remove_from_clone<'a>(
        &'a self,
        machines: &'a [MachineName],
        clone: &'a CloneTarget,
        team: &'a str,
    ) -> ServiceFuture<'a, OperationResponse>;

    /// Move `image` onto `new_machine`.
    fn reassign_image<'a>(
        &'a self,
        image: &'a str,
        new_machine: &'a str,
        pool: &'a str,
    ) -> ServiceFuture<'a, OperationResponse>;

    fn check_availability<'a>(
        &'a self,
        machines: &'a [MachineName],
    ) -> ServiceFuture<'a, Vec<MachineAvailability>>;

    fn batch_validate_machines<'a>(
        &'a self,
        machines: &'a [Machine],
        kind: AssignmentKind,
    ) -> ServiceFuture<'a, BatchValidationResponse>;

    fn batch_machine_operation<'a>(
        &'a self,
        kind: BatchOperationKind,
        machines: &'a [MachineName],
        target: &'a AssignmentTarget,
        on_progress: &'a ProgressFn<'a>,
    ) -> ServiceFuture<'a, BatchOperationResponse>;
}
