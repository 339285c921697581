//! Batch executor — drives batches strictly in order.
//!
//! Per batch: optional pre-validation (a failure fails the batch outright),
//! then up to `max_retries` attempts at the handler's mutating call with a
//! fixed delay between attempts. A cancel flag is checked before each
//! dispatch; an in-flight batch always runs to completion.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use fleet_core::{FailedItem, MachineName};

use crate::batch::{Batch, BatchOutcome, BatchStatus, create_batches};
use crate::config::BatchConfig;

/// Boxed future returned by [`BatchHandler`] calls.
pub type BatchFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The work done for each batch.
pub trait BatchHandler: Send + Sync {
    /// Pre-validation, run when `validate_before_each_batch` is set.
    fn validate<'a>(&'a self, _batch: &'a Batch) -> BatchFuture<'a, Result<(), String>> {
        Box::pin(async { Ok(()) })
    }

    /// One attempt at the mutating call. `Err` is retried.
    fn execute<'a>(&'a self, batch: &'a Batch) -> BatchFuture<'a, Result<BatchOutcome, String>>;

    /// Called when a batch starts processing and when it finishes.
    fn on_update(&self, _batch: &Batch) {}
}

/// Shared cancellation flag, checked before each batch is dispatched.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a run produced, in batch order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRun {
    pub batches: Vec<Batch>,
    pub successful: Vec<MachineName>,
    pub failed: Vec<FailedItem<MachineName>>,
    /// Stopped early by `stop_on_first_error`.
    pub aborted: bool,
    /// Stopped early by the cancel flag.
    pub cancelled: bool,
}

impl BatchRun {
    pub fn failed_names(&self) -> Vec<MachineName> {
        self.failed.iter().map(|f| f.item.clone()).collect()
    }

    /// Machines left in batches that were never dispatched.
    pub fn pending_machines(&self) -> Vec<MachineName> {
        self.batches
            .iter()
            .filter(|b| b.status == BatchStatus::Pending)
            .flat_map(|b| b.machines.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchExecutor {
    config: BatchConfig,
}

impl BatchExecutor {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Split `machines` and drive every batch through `handler`.
    pub async fn run(
        &self,
        machines: &[MachineName],
        handler: &dyn BatchHandler,
        cancel: &CancelFlag,
    ) -> BatchRun {
        let batches = create_batches(machines, self.config.batch_size);
        self.run_batches(batches, handler, cancel).await
    }

    /// Drive pre-built batches through `handler`.
    pub async fn run_batches(
        &self,
        mut batches: Vec<Batch>,
        handler: &dyn BatchHandler,
        cancel: &CancelFlag,
    ) -> BatchRun {
        let total = batches.len();
        info!(
            batches = total,
            batch_size = self.config.batch_size,
            max_retries = self.config.max_retries,
            "starting batch run"
        );

        let mut run = BatchRun::default();
        for batch in batches.iter_mut() {
            if cancel.is_cancelled() {
                info!(batch = batch.batch_number, "batch run cancelled");
                run.cancelled = true;
                break;
            }

            self.process(batch, handler).await;

            if let Some(outcome) = &batch.result {
                run.successful.extend(outcome.successful.iter().cloned());
                run.failed.extend(outcome.failed.iter().cloned());
            }

            if self.config.stop_on_first_error && batch.has_failures() {
                warn!(batch = batch.batch_number, total, "stopping at first failed batch");
                run.aborted = true;
                break;
            }
        }

        run.batches = batches;
        info!(
            successful = run.successful.len(),
            failed = run.failed.len(),
            aborted = run.aborted,
            cancelled = run.cancelled,
            "batch run finished"
        );
        run
    }

    async fn process(&self, batch: &mut Batch, handler: &dyn BatchHandler) {
        let started = Instant::now();
        batch.status = BatchStatus::Processing;
        handler.on_update(batch);

        if self.config.validate_before_each_batch {
            if let Err(error) = handler.validate(batch).await {
                warn!(batch = batch.batch_number, %error, "batch pre-validation failed");
                fail(batch, error);
                finish(batch, started, handler);
                return;
            }
        }

        let attempts = self.config.attempts();
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match handler.execute(batch).await {
                Ok(outcome) => {
                    debug!(
                        batch = batch.batch_number,
                        attempt,
                        failed = outcome.failed.len(),
                        "batch attempt completed"
                    );
                    batch.status = BatchStatus::Completed;
                    batch.result = Some(outcome);
                    finish(batch, started, handler);
                    return;
                }
                Err(error) => {
                    batch.retry_count += 1;
                    warn!(
                        batch = batch.batch_number,
                        attempt,
                        attempts,
                        %error,
                        "batch attempt failed"
                    );
                    last_error = error;
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        fail(batch, last_error);
        finish(batch, started, handler);
    }
}

fn fail(batch: &mut Batch, error: String) {
    batch.status = BatchStatus::Failed;
    batch.result = Some(BatchOutcome::all_failed(&batch.machines, &error));
    batch.error = Some(error);
}

fn finish(batch: &mut Batch, started: Instant, handler: &dyn BatchHandler) {
    batch.duration_ms = Some(started.elapsed().as_millis() as u64);
    handler.on_update(batch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedHandler {
        /// Batches whose every attempt errors.
        broken: HashSet<u32>,
        /// Batch → remaining transient failures.
        flaky: Mutex<HashMap<u32, u32>>,
        /// Batches that fail pre-validation.
        invalid: HashSet<u32>,
        /// Machines the service reports as failed.
        rejected: HashSet<MachineName>,
        attempts: Mutex<Vec<u32>>,
        updates: Mutex<Vec<(u32, BatchStatus)>>,
        cancel_after: Option<(u32, CancelFlag)>,
    }

    impl BatchHandler for ScriptedHandler {
        fn validate<'a>(&'a self, batch: &'a Batch) -> BatchFuture<'a, Result<(), String>> {
            Box::pin(async move {
                if self.invalid.contains(&batch.batch_number) {
                    Err("machine no longer available".to_string())
                } else {
                    Ok(())
                }
            })
        }

        fn execute<'a>(&'a self, batch: &'a Batch) -> BatchFuture<'a, Result<BatchOutcome, String>> {
            Box::pin(async move {
                self.attempts.lock().unwrap().push(batch.batch_number);
                if let Some((after, flag)) = &self.cancel_after {
                    if *after == batch.batch_number {
                        flag.cancel();
                    }
                }
                if self.broken.contains(&batch.batch_number) {
                    return Err("service unavailable".to_string());
                }
                if let Some(left) = self.flaky.lock().unwrap().get_mut(&batch.batch_number) {
                    if *left > 0 {
                        *left -= 1;
                        return Err("timeout".to_string());
                    }
                }
                let mut outcome = BatchOutcome::default();
                for m in &batch.machines {
                    if self.rejected.contains(m) {
                        outcome.failed.push(FailedItem {
                            item: m.clone(),
                            error: "rejected".into(),
                        });
                    } else {
                        outcome.successful.push(m.clone());
                    }
                }
                Ok(outcome)
            })
        }

        fn on_update(&self, batch: &Batch) {
            self.updates
                .lock()
                .unwrap()
                .push((batch.batch_number, batch.status));
        }
    }

    fn machines(n: usize) -> Vec<MachineName> {
        (1..=n).map(|i| format!("m{i}")).collect()
    }

    fn names(list: &[&str]) -> Vec<MachineName> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn executor(batch_size: usize, stop_on_first_error: bool) -> BatchExecutor {
        BatchExecutor::new(BatchConfig {
            batch_size,
            stop_on_first_error,
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batch_is_recorded_and_run_continues() {
        let handler = ScriptedHandler {
            broken: HashSet::from([2]),
            ..Default::default()
        };
        let started = Instant::now();
        let run = executor(2, false)
            .run(&machines(6), &handler, &CancelFlag::new())
            .await;

        assert_eq!(run.successful, names(&["m1", "m2", "m5", "m6"]));
        assert_eq!(run.failed_names(), names(&["m3", "m4"]));
        let statuses: Vec<_> = run.batches.iter().map(|b| (b.batch_number, b.status)).collect();
        assert_eq!(
            statuses,
            vec![
                (1, BatchStatus::Completed),
                (2, BatchStatus::Failed),
                (3, BatchStatus::Completed),
            ]
        );
        assert_eq!(run.batches[1].retry_count, 3);
        assert_eq!(run.batches[1].error.as_deref(), Some("service unavailable"));
        assert_eq!(*handler.attempts.lock().unwrap(), vec![1, 2, 2, 2, 3]);
        // Two delays between three attempts.
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert!(!run.aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_on_first_error_leaves_rest_pending() {
        let handler = ScriptedHandler {
            broken: HashSet::from([2]),
            ..Default::default()
        };
        let run = executor(2, true)
            .run(&machines(6), &handler, &CancelFlag::new())
            .await;

        assert!(run.aborted);
        assert_eq!(run.batches[2].status, BatchStatus::Pending);
        assert_eq!(run.pending_machines(), names(&["m5", "m6"]));
        assert_eq!(run.successful, names(&["m1", "m2"]));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried() {
        let handler = ScriptedHandler {
            flaky: Mutex::new(HashMap::from([(1, 1)])),
            ..Default::default()
        };
        let run = executor(10, false)
            .run(&machines(3), &handler, &CancelFlag::new())
            .await;
        assert_eq!(run.batches[0].status, BatchStatus::Completed);
        assert_eq!(run.batches[0].retry_count, 1);
        assert_eq!(run.successful.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_failure_is_not_retried() {
        let handler = ScriptedHandler {
            rejected: HashSet::from(["m2".to_string()]),
            ..Default::default()
        };
        let run = executor(3, false)
            .run(&machines(3), &handler, &CancelFlag::new())
            .await;
        assert_eq!(*handler.attempts.lock().unwrap(), vec![1]);
        assert_eq!(run.batches[0].status, BatchStatus::Completed);
        assert_eq!(run.failed_names(), names(&["m2"]));
    }

    #[tokio::test(start_paused = true)]
    async fn prevalidation_failure_skips_attempts() {
        let handler = ScriptedHandler {
            invalid: HashSet::from([1]),
            ..Default::default()
        };
        let executor = BatchExecutor::new(BatchConfig {
            batch_size: 2,
            validate_before_each_batch: true,
            ..Default::default()
        });
        let run = executor.run(&machines(4), &handler, &CancelFlag::new()).await;

        assert_eq!(run.batches[0].status, BatchStatus::Failed);
        assert_eq!(run.batches[0].retry_count, 0);
        assert_eq!(*handler.attempts.lock().unwrap(), vec![2]);
        assert_eq!(run.failed_names(), names(&["m1", "m2"]));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_before_next_dispatch() {
        let flag = CancelFlag::new();
        let handler = ScriptedHandler {
            cancel_after: Some((1, flag.clone())),
            ..Default::default()
        };
        let run = executor(2, false).run(&machines(6), &handler, &flag).await;

        assert!(run.cancelled);
        assert_eq!(run.batches[0].status, BatchStatus::Completed);
        assert_eq!(run.successful, names(&["m1", "m2"]));
        assert_eq!(run.pending_machines(), names(&["m3", "m4", "m5", "m6"]));
    }

    #[tokio::test(start_paused = true)]
    async fn observer_sees_processing_then_final_status() {
        let handler = ScriptedHandler::default();
        executor(1, false)
            .run(&machines(2), &handler, &CancelFlag::new())
            .await;
        assert_eq!(
            *handler.updates.lock().unwrap(),
            vec![
                (1, BatchStatus::Processing),
                (1, BatchStatus::Completed),
                (2, BatchStatus::Processing),
                (2, BatchStatus::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn empty_input_runs_nothing() {
        let handler = ScriptedHandler::default();
        let run = executor(2, false).run(&[], &handler, &CancelFlag::new()).await;
        assert!(run.batches.is_empty());
        assert!(handler.attempts.lock().unwrap().is_empty());
    }
}
