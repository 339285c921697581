//! Counters exposed while a bulk operation runs, and the summary it leaves.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use fleet_core::{FailedItem, MachineName};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub is_processing: bool,
}

impl BulkProgress {
    pub fn start(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            failed: 0,
            is_processing: true,
        }
    }

    pub fn record(&mut self, completed: usize, failed: usize) {
        self.completed += completed;
        self.failed += failed;
    }

    /// Share of machines with a final outcome.
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        ((self.completed + self.failed) as f64 * 100.0 / self.total as f64).min(100.0)
    }
}

/// Summary of the most recent bulk operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOperationResult {
    pub operation_id: String,
    pub success: bool,
    pub successful: Vec<MachineName>,
    pub failed: Vec<MachineName>,
    /// Machine name → error.
    pub errors: BTreeMap<MachineName, String>,
}

impl BulkOperationResult {
    pub fn new(
        operation_id: &str,
        successful: &[MachineName],
        failed: &[FailedItem<MachineName>],
    ) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            success: failed.is_empty(),
            successful: successful.to_vec(),
            failed: failed.iter().map(|f| f.item.clone()).collect(),
            errors: failed
                .iter()
                .map(|f| (f.item.clone(), f.error.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_counts_both_outcomes() {
        let mut progress = BulkProgress::start(4);
        assert!(progress.is_processing);
        progress.record(1, 1);
        assert_eq!(progress.percentage(), 50.0);
        assert_eq!(BulkProgress::start(0).percentage(), 100.0);
    }

    #[test]
    fn summary_maps_errors_by_machine() {
        let failed = vec![FailedItem {
            item: "m2".to_string(),
            error: "quota".to_string(),
        }];
        let summary = BulkOperationResult::new("op-1", &["m1".to_string()], &failed);
        assert!(!summary.success);
        assert_eq!(summary.failed, vec!["m2".to_string()]);
        assert_eq!(summary.errors["m2"], "quota");
    }
}
