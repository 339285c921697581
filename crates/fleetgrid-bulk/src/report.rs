//! Post-run report of a bulk operation.
//!
//! Machines filtered out by validation appear as failed; machines left in
//! batches that never ran (cancellation or `stop_on_first_error`) appear as
//! skipped.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use fleet_core::{FailedItem, MachineName};
use fleetgrid_batch::{Batch, BatchStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_number: u32,
    pub size: usize,
    pub status: BatchStatus,
    pub duration_ms: Option<u64>,
    pub retry_count: u32,
    pub errors: Vec<String>,
}

impl From<&Batch> for BatchReport {
    fn from(batch: &Batch) -> Self {
        let errors = match (&batch.error, &batch.result) {
            (Some(error), _) => vec![error.clone()],
            (None, Some(outcome)) => outcome
                .failed
                .iter()
                .map(|f| format!("{}: {}", f.item, f.error))
                .collect(),
            (None, None) => Vec::new(),
        };
        Self {
            batch_number: batch.batch_number,
            size: batch.machines.len(),
            status: batch.status,
            duration_ms: batch.duration_ms,
            retry_count: batch.retry_count,
            errors,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineReport {
    pub machine: MachineName,
    pub status: MachineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOperationReport {
    pub operation_id: String,
    pub operation: String,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    pub duration_ms: u64,
    pub summary: ReportSummary,
    pub batches: Vec<BatchReport>,
    pub machines: Vec<MachineReport>,
}

impl BulkOperationReport {
    /// Assemble a report from the records a run left behind.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        operation_id: &str,
        operation: &str,
        started_at_ms: u64,
        finished_at_ms: u64,
        total: usize,
        batches: &[Batch],
        successful: &[MachineName],
        failed: &[FailedItem<MachineName>],
    ) -> Self {
        let mut machines: Vec<MachineReport> = successful
            .iter()
            .map(|m| MachineReport {
                machine: m.clone(),
                status: MachineStatus::Succeeded,
                error: None,
            })
            .collect();
        machines.extend(failed.iter().map(|f| MachineReport {
            machine: f.item.clone(),
            status: MachineStatus::Failed,
            error: Some(f.error.clone()),
        }));

        let seen: HashSet<MachineName> = machines.iter().map(|m| m.machine.clone()).collect();
        let skipped = batches
            .iter()
            .filter(|b| b.status == BatchStatus::Pending)
            .flat_map(|b| b.machines.iter())
            .filter(|m| !seen.contains(*m))
            .map(|m| MachineReport {
                machine: m.clone(),
                status: MachineStatus::Skipped,
                error: None,
            })
            .collect::<Vec<_>>();
        machines.extend(skipped);

        Self {
            operation_id: operation_id.to_string(),
            operation: operation.to_string(),
            started_at_ms,
            finished_at_ms,
            duration_ms: finished_at_ms.saturating_sub(started_at_ms),
            summary: ReportSummary {
                total,
                successful: successful.len(),
                failed: failed.len(),
                skipped: total.saturating_sub(successful.len() + failed.len()),
            },
            batches: batches.iter().map(BatchReport::from).collect(),
            machines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgrid_batch::{BatchOutcome, create_batches};

    fn names(list: &[&str]) -> Vec<MachineName> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn summary_and_per_machine_detail() {
        let mut batches = create_batches(&names(&["m1", "m2", "m3", "m4", "m5", "m6"]), 2);
        batches[0].status = BatchStatus::Completed;
        batches[0].result = Some(BatchOutcome::all_succeeded(&batches[0].machines));
        batches[0].duration_ms = Some(12);
        batches[1].status = BatchStatus::Failed;
        batches[1].error = Some("service down".into());
        batches[1].retry_count = 3;
        batches[1].result = Some(BatchOutcome::all_failed(&batches[1].machines, "service down"));

        let failed = vec![
            FailedItem {
                item: "m0".to_string(),
                error: "Machine is already assigned to another resource".to_string(),
            },
            FailedItem {
                item: "m3".to_string(),
                error: "service down".to_string(),
            },
            FailedItem {
                item: "m4".to_string(),
                error: "service down".to_string(),
            },
        ];
        let report = BulkOperationReport::build(
            "op-1",
            "bulk_assignment",
            1_000,
            1_250,
            7,
            &batches,
            &names(&["m1", "m2"]),
            &failed,
        );

        assert_eq!(
            report.summary,
            ReportSummary {
                total: 7,
                successful: 2,
                failed: 3,
                skipped: 2,
            }
        );
        assert_eq!(report.duration_ms, 250);
        assert_eq!(report.batches.len(), 3);
        assert_eq!(report.batches[1].errors, vec!["service down".to_string()]);
        assert_eq!(report.batches[1].retry_count, 3);
        assert!(report.batches[2].errors.is_empty());

        let skipped: Vec<&str> = report
            .machines
            .iter()
            .filter(|m| m.status == MachineStatus::Skipped)
            .map(|m| m.machine.as_str())
            .collect();
        assert_eq!(skipped, vec!["m5", "m6"]);
    }

    #[test]
    fn partial_batch_lists_machine_errors() {
        let mut batch = Batch::new(1, names(&["m1", "m2"]));
        batch.status = BatchStatus::Completed;
        batch.result = Some(BatchOutcome {
            successful: names(&["m1"]),
            failed: vec![FailedItem {
                item: "m2".to_string(),
                error: "quota".to_string(),
            }],
        });
        let report = BatchReport::from(&batch);
        assert_eq!(report.errors, vec!["m2: quota".to_string()]);
    }
}
