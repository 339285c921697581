//! Batch records.

use serde::{Deserialize, Serialize};

use fleet_core::{FailedItem, MachineName, OperationResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// What a completed attempt did to each machine of the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub successful: Vec<MachineName>,
    pub failed: Vec<FailedItem<MachineName>>,
}

impl BatchOutcome {
    pub fn all_succeeded(machines: &[MachineName]) -> Self {
        Self {
            successful: machines.to_vec(),
            failed: Vec::new(),
        }
    }

    pub fn all_failed(machines: &[MachineName], error: &str) -> Self {
        Self {
            successful: Vec::new(),
            failed: machines
                .iter()
                .map(|m| FailedItem {
                    item: m.clone(),
                    error: error.to_string(),
                })
                .collect(),
        }
    }

    /// Interpret a service response for one attempt.
    ///
    /// A response naming failed machines is a completed, partial attempt.
    /// An unsuccessful response naming none is a failed attempt (`Err`).
    pub fn from_response(
        machines: &[MachineName],
        response: &OperationResponse,
    ) -> Result<Self, String> {
        if response.success {
            return Ok(Self::all_succeeded(machines));
        }
        if response.failed_machines.is_empty() {
            return Err(response.message_or("operation failed"));
        }

        let error = response.message_or("operation failed");
        let mut outcome = Self::default();
        for machine in machines {
            if response.failed_machines.contains(machine) {
                outcome.failed.push(FailedItem {
                    item: machine.clone(),
                    error: error.clone(),
                });
            } else {
                outcome.successful.push(machine.clone());
            }
        }
        Ok(outcome)
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// One contiguous slice of the machine list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// 1-based position in the run.
    pub batch_number: u32,
    pub machines: Vec<MachineName>,
    pub status: BatchStatus,
    pub result: Option<BatchOutcome>,
    pub error: Option<String>,
    /// Failed attempts.
    pub retry_count: u32,
    pub duration_ms: Option<u64>,
}

impl Batch {
    pub fn new(batch_number: u32, machines: Vec<MachineName>) -> Self {
        Self {
            batch_number,
            machines,
            status: BatchStatus::Pending,
            result: None,
            error: None,
            retry_count: 0,
            duration_ms: None,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.status == BatchStatus::Failed
            || self.result.as_ref().is_some_and(BatchOutcome::has_failures)
    }
}

/// Split `machines` into contiguous 1-based batches of `size`.
///
/// The last batch may be smaller. A size of zero yields a single batch;
/// an empty list yields no batches.
pub fn create_batches(machines: &[MachineName], size: usize) -> Vec<Batch> {
    if machines.is_empty() {
        return Vec::new();
    }
    let size = if size == 0 { machines.len() } else { size };
    machines
        .chunks(size)
        .enumerate()
        .map(|(i, chunk)| Batch::new(i as u32 + 1, chunk.to_vec()))
        .collect()
}
