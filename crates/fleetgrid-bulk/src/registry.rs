//! Running operations keyed by operation id.
//!
//! An entry lives from the moment an operation's batches are built until it
//! returns. Cancelling sets the operation's flag and drops its undispatched
//! batches from the queue; the batch in flight still finishes.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::info;

use fleetgrid_batch::{Batch, BatchStatus, CancelFlag};

#[derive(Debug)]
struct RunningOperation {
    cancel: CancelFlag,
    batches: Vec<Batch>,
}

#[derive(Debug, Default)]
pub struct OperationRegistry {
    entries: Mutex<HashMap<String, RunningOperation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `id` with its initial queue and hand back its cancel flag.
    pub fn register(&self, id: &str, batches: &[Batch]) -> CancelFlag {
        let cancel = CancelFlag::new();
        self.lock().insert(
            id.to_string(),
            RunningOperation {
                cancel: cancel.clone(),
                batches: batches.to_vec(),
            },
        );
        cancel
    }

    /// Replace the stored copy of `batch`.
    pub fn update(&self, id: &str, batch: &Batch) {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(id) else {
            return;
        };
        if let Some(slot) = entry
            .batches
            .iter_mut()
            .find(|b| b.batch_number == batch.batch_number)
        {
            *slot = batch.clone();
        }
    }

    /// Batch queue of a running operation.
    pub fn status(&self, id: &str) -> Option<Vec<Batch>> {
        self.lock().get(id).map(|entry| entry.batches.clone())
    }

    /// Request cancellation. Returns false for unknown or finished ids.
    pub fn cancel(&self, id: &str) -> bool {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(id) else {
            return false;
        };
        entry.cancel.cancel();
        let before = entry.batches.len();
        entry.batches.retain(|b| b.status != BatchStatus::Pending);
        info!(
            operation = %id,
            dropped = before - entry.batches.len(),
            "bulk operation cancelled"
        );
        true
    }

    pub fn finish(&self, id: &str) {
        self.lock().remove(id);
    }

    /// Ids of running operations, sorted.
    pub fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RunningOperation>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgrid_batch::create_batches;

    fn queue() -> Vec<Batch> {
        let machines: Vec<String> = (1..=4).map(|i| format!("m{i}")).collect();
        create_batches(&machines, 2)
    }

    #[test]
    fn tracks_updates_until_finished() {
        let registry = OperationRegistry::new();
        let mut batches = queue();
        registry.register("op-1", &batches);
        assert_eq!(registry.active(), vec!["op-1".to_string()]);

        batches[0].status = BatchStatus::Completed;
        registry.update("op-1", &batches[0]);
        let status = registry.status("op-1").unwrap();
        assert_eq!(status[0].status, BatchStatus::Completed);
        assert_eq!(status[1].status, BatchStatus::Pending);

        registry.finish("op-1");
        assert!(registry.status("op-1").is_none());
        assert!(registry.active().is_empty());
    }

    #[test]
    fn cancel_sets_flag_and_drops_pending_batches() {
        let registry = OperationRegistry::new();
        let mut batches = queue();
        let flag = registry.register("op-1", &batches);
        batches[0].status = BatchStatus::Processing;
        registry.update("op-1", &batches[0]);

        assert!(registry.cancel("op-1"));
        assert!(flag.is_cancelled());
        let status = registry.status("op-1").unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].batch_number, 1);

        assert!(!registry.cancel("op-unknown"));
    }
}
