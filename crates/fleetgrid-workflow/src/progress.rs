//! Operation progress records reported to callers while an operation runs.

use serde::{Deserialize, Serialize};

use fleet_core::time::epoch_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Assignment,
    Migration,
    Removal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Preparing,
    Validating,
    Executing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationProgress {
    pub operation_id: String,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub total_steps: usize,
    pub current_step: usize,
    pub current_step_name: String,
    pub started_at_ms: u64,
}

impl OperationProgress {
    pub fn new(operation_id: &str, kind: OperationKind, total_steps: usize) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            kind,
            status: OperationStatus::Preparing,
            total_steps,
            current_step: 0,
            current_step_name: String::new(),
            started_at_ms: epoch_millis(),
        }
    }

    /// Move to the next step.
    pub fn advance(&mut self, name: impl Into<String>) {
        self.current_step = (self.current_step + 1).min(self.total_steps);
        self.current_step_name = name.into();
    }

    pub fn percentage(&self) -> f64 {
        if self.total_steps == 0 {
            return 100.0;
        }
        self.current_step as f64 * 100.0 / self.total_steps as f64
    }
}

/// Receives progress snapshots.
pub type ProgressCallback = dyn Fn(&OperationProgress) + Send + Sync;
