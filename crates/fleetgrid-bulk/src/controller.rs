//! Bulk operations controller — validation → batches → processing → report.
//!
//! Bulk assignment validates every machine first. Invalid machines are
//! recorded as failed, or abort the call under `stop_on_first_error`. The
//! survivors are split into ordered batches that the batch executor drives
//! one at a time. A stop at the first failed batch surfaces as a workflow
//! error for step `processing` carrying the partial result.
//!
//! Migration runs its own per-machine loop (remove from source, assign to
//! destination, retry, compensate) batch by batch. Both flows register
//! with the [`OperationRegistry`] so they can be observed and cancelled.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;
use tracing::{info, warn};

use fleet_core::time::{epoch_millis, operation_id};
use fleet_core::{
    AssignmentKind, AssignmentService, AssignmentTarget, BatchOperationKind, BatchProgress,
    BatchValidationResponse, BulkValidation, FailedItem, InvalidMachine, IssueCode, Machine,
    MachineName, OrchestratorError, OrchestratorResult, ValidationIssue,
};
use fleetgrid_batch::{
    Batch, BatchConfig, BatchExecutor, BatchFuture, BatchHandler, BatchOutcome, BatchStatus,
    create_batches,
};
use fleetgrid_validation::{BulkRuleOptions, ExclusivityChecker, validate_bulk};
use fleetgrid_workflow::dispatch::{dispatch_assign, dispatch_remove, succeeded};
use fleetgrid_workflow::{
    EventBus, EventKind, MigrationPlan, MigrationResult, OperationKind, OperationProgress,
    OperationStatus, OrchestratorContext, ProgressCallback, SelectionManager, command_for,
};

use crate::options::BulkOptions;
use crate::progress::{BulkOperationResult, BulkProgress};
use crate::registry::OperationRegistry;
use crate::report::BulkOperationReport;

const UNAVAILABLE_MESSAGE: &str = "Machine is already assigned to another resource";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkStep {
    Validation,
    Batching,
    Processing,
    Reporting,
}

impl BulkStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkStep::Validation => "validation",
            BulkStep::Batching => "batching",
            BulkStep::Processing => "processing",
            BulkStep::Reporting => "reporting",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkAssignmentResult {
    pub operation_id: String,
    /// No machine failed and the run was not cancelled.
    pub success: bool,
    pub completed_steps: Vec<BulkStep>,
    pub failed_step: Option<BulkStep>,
    pub total_machines: usize,
    pub successful: Vec<MachineName>,
    /// Validation rejects first, then batch failures in batch order.
    pub failed: Vec<FailedItem<MachineName>>,
    pub batches: Vec<Batch>,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<BulkOperationReport>,
}

impl BulkAssignmentResult {
    pub fn failed_names(&self) -> Vec<MachineName> {
        self.failed.iter().map(|f| f.item.clone()).collect()
    }

    fn summary(&self) -> BulkOperationResult {
        let mut summary = BulkOperationResult::new(&self.operation_id, &self.successful, &self.failed);
        summary.success = self.success;
        summary
    }
}

pub struct BulkOperationsController {
    service: Arc<dyn AssignmentService>,
    checker: Arc<ExclusivityChecker>,
    options: BulkOptions,
    registry: OperationRegistry,
    progress: Mutex<BulkProgress>,
    last_result: Mutex<Option<BulkOperationResult>>,
}

impl BulkOperationsController {
    pub fn new(
        service: Arc<dyn AssignmentService>,
        checker: Arc<ExclusivityChecker>,
        options: BulkOptions,
    ) -> Self {
        Self {
            service,
            checker,
            options,
            registry: OperationRegistry::new(),
            progress: Mutex::new(BulkProgress::default()),
            last_result: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &BulkOptions {
        &self.options
    }

    pub fn team(&self) -> &str {
        self.checker.team()
    }

    // ── Observation and cancellation ───────────────────────────────

    /// Batch queue of a running operation.
    pub fn operation_status(&self, operation_id: &str) -> Option<Vec<Batch>> {
        self.registry.status(operation_id)
    }

    /// Stop a running operation before its next batch.
    pub fn cancel_operation(&self, operation_id: &str) -> bool {
        self.registry.cancel(operation_id)
    }

    pub fn active_operations(&self) -> Vec<String> {
        self.registry.active()
    }

    pub fn operation_progress(&self) -> BulkProgress {
        *lock(&self.progress)
    }

    pub fn last_operation_result(&self) -> Option<BulkOperationResult> {
        lock(&self.last_result).clone()
    }

    // ── Bulk validation ────────────────────────────────────────────

    /// Validate `machines` for an assignment of `kind`.
    ///
    /// Large selections are validated by the service in one call. Smaller
    /// ones run the local rules and then re-check availability of every
    /// machine that passed them.
    pub async fn validate_machines(
        &self,
        machines: &[Machine],
        kind: AssignmentKind,
    ) -> OrchestratorResult<BulkValidation> {
        if machines.len() > self.options.server_validation_threshold {
            info!(
                machines = machines.len(),
                threshold = self.options.server_validation_threshold,
                "delegating bulk validation to the service"
            );
            let response = self.service.batch_validate_machines(machines, kind).await?;
            return Ok(from_server_validation(machines.len(), response));
        }

        let rules = BulkRuleOptions {
            team: Some(self.team().to_string()),
            skip_warnings: false,
        };
        let mut validation = validate_bulk(machines, kind, &rules);
        if !validation.valid.is_empty() {
            let names: Vec<MachineName> =
                validation.valid.iter().map(|m| m.name.clone()).collect();
            let report = self.checker.check_availability(&names).await;
            for name in &report.unavailable {
                validation.reject(
                    name,
                    ValidationIssue::error(IssueCode::MachineUnavailable, UNAVAILABLE_MESSAGE),
                );
            }
        }
        Ok(validation)
    }

    // ── Bulk assignment ────────────────────────────────────────────

    pub async fn execute_bulk_assignment(
        &self,
        ctx: &mut OrchestratorContext,
        machines: &[Machine],
        target: &AssignmentTarget,
    ) -> OrchestratorResult<BulkAssignmentResult> {
        let names: Vec<MachineName> = machines.iter().map(|m| m.name.clone()).collect();
        check_target(target, &names)?;

        let id = operation_id("bulk-assign");
        let started_at_ms = epoch_millis();
        info!(
            operation = %id,
            target = %target,
            machines = machines.len(),
            "starting bulk assignment"
        );
        ctx.events.emit(
            EventKind::Started,
            &id,
            json!({ "machines": machines.len(), "target": target }),
        );
        self.set_progress(BulkProgress::start(machines.len()));

        let mut result = BulkAssignmentResult {
            operation_id: id.clone(),
            total_machines: machines.len(),
            ..Default::default()
        };

        // Validation
        let validation = match self.validate_machines(machines, target.kind()).await {
            Ok(validation) => validation,
            Err(e) => return Err(self.fail(&ctx.events, &mut result, BulkStep::Validation, e)),
        };
        ctx.events.emit(
            EventKind::ValidationCompleted,
            &id,
            json!({
                "valid": validation.valid.len(),
                "invalid": validation.invalid_names(),
            }),
        );
        if !validation.all_valid {
            if self.options.assignment.stop_on_first_error {
                let err = OrchestratorError::Validation {
                    message: format!("{} machine(s) failed validation", validation.invalid.len()),
                    machines: validation.invalid_names(),
                    results: validation.invalid.clone(),
                };
                return Err(self.fail(&ctx.events, &mut result, BulkStep::Validation, err));
            }
            for invalid in &validation.invalid {
                result.failed.push(FailedItem {
                    item: invalid.machine.name.clone(),
                    error: first_error(invalid),
                });
            }
            warn!(
                operation = %id,
                filtered = validation.invalid.len(),
                "machines filtered out by validation"
            );
            self.update_progress(|p| p.record(0, validation.invalid.len()));
        }
        step_completed(&ctx.events, &mut result, BulkStep::Validation);

        // Batching
        let valid: Vec<MachineName> = validation.valid.iter().map(|m| m.name.clone()).collect();
        let batches = create_batches(&valid, self.options.assignment.batch_size);
        step_completed(&ctx.events, &mut result, BulkStep::Batching);

        // Processing
        let cancel = self.registry.register(&id, &batches);
        let handler = AssignBatches {
            controller: self,
            events: &ctx.events,
            operation_id: &id,
            target,
        };
        let run = BatchExecutor::new(self.options.assignment.clone())
            .run_batches(batches, &handler, &cancel)
            .await;
        self.registry.finish(&id);
        self.checker.invalidate(&valid);

        let aborted = run.aborted;
        result.successful = run.successful;
        result.failed.extend(run.failed);
        result.batches = run.batches;
        result.cancelled = run.cancelled;
        if !result.successful.is_empty() {
            if let Some(command) = command_for(target, result.successful.clone(), self.team()) {
                ctx.history.push(command);
            }
        }

        if aborted {
            let failed_batch = result
                .batches
                .iter()
                .find(|b| b.has_failures())
                .map_or(0, |b| b.batch_number);
            let err = OrchestratorError::Workflow {
                step: BulkStep::Processing.as_str().to_string(),
                message: format!("stopped after batch {failed_batch} failed"),
                recoverable: true,
                payload: json!(result),
            };
            return Err(self.fail(&ctx.events, &mut result, BulkStep::Processing, err));
        }
        step_completed(&ctx.events, &mut result, BulkStep::Processing);

        if self.options.generate_report {
            result.report = Some(BulkOperationReport::build(
                &id,
                "bulk_assignment",
                started_at_ms,
                epoch_millis(),
                result.total_machines,
                &result.batches,
                &result.successful,
                &result.failed,
            ));
            step_completed(&ctx.events, &mut result, BulkStep::Reporting);
        }

        result.success = result.failed.is_empty() && !result.cancelled;
        self.finish(result.summary());
        info!(
            operation = %id,
            successful = result.successful.len(),
            failed = result.failed.len(),
            cancelled = result.cancelled,
            "bulk assignment finished"
        );
        ctx.events
            .emit(EventKind::Completed, &id, json!({ "result": result }));
        Ok(result)
    }

    /// Assign through the service's own batching in a single call.
    pub async fn execute_server_batched_assignment(
        &self,
        ctx: &mut OrchestratorContext,
        machines: &[MachineName],
        target: &AssignmentTarget,
    ) -> OrchestratorResult<BulkAssignmentResult> {
        check_target(target, machines)?;

        let id = operation_id("bulk-assign");
        let started_at_ms = epoch_millis();
        info!(operation = %id, target = %target, machines = machines.len(), "starting server-batched assignment");
        ctx.events.emit(
            EventKind::Started,
            &id,
            json!({ "machines": machines.len(), "target": target }),
        );
        self.set_progress(BulkProgress::start(machines.len()));

        let mut result = BulkAssignmentResult {
            operation_id: id.clone(),
            total_machines: machines.len(),
            ..Default::default()
        };

        let events = &ctx.events;
        let relay = |progress: BatchProgress| {
            events.emit(
                EventKind::ProgressUpdate,
                &id,
                json!({
                    "message": format!(
                        "Processing batch {} of {}",
                        progress.current_batch, progress.total_batches
                    ),
                    "percentage": progress.percentage,
                    "completed": progress.completed,
                    "total": progress.total,
                }),
            );
        };
        let started = Instant::now();
        let response = self
            .service
            .batch_machine_operation(BatchOperationKind::Assign, machines, target, &relay)
            .await;
        self.checker.invalidate(machines);
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                return Err(self.fail(&ctx.events, &mut result, BulkStep::Processing, e.into()));
            }
        };

        let mut batch = Batch::new(1, machines.to_vec());
        batch.status = BatchStatus::Completed;
        batch.duration_ms = Some(started.elapsed().as_millis() as u64);
        batch.result = Some(BatchOutcome {
            successful: response.successful.clone(),
            failed: response.failed.clone(),
        });
        self.update_progress(|p| p.record(response.successful.len(), response.failed.len()));

        result.successful = response.successful;
        result.failed = response.failed;
        result.batches = vec![batch];
        if !result.successful.is_empty() {
            if let Some(command) = command_for(target, result.successful.clone(), self.team()) {
                ctx.history.push(command);
            }
        }
        step_completed(&ctx.events, &mut result, BulkStep::Processing);

        if self.options.generate_report {
            result.report = Some(BulkOperationReport::build(
                &id,
                "server_batched_assignment",
                started_at_ms,
                epoch_millis(),
                result.total_machines,
                &result.batches,
                &result.successful,
                &result.failed,
            ));
            step_completed(&ctx.events, &mut result, BulkStep::Reporting);
        }

        result.success = result.failed.is_empty();
        self.finish(result.summary());
        ctx.events
            .emit(EventKind::Completed, &id, json!({ "result": result }));
        Ok(result)
    }

    // ── Bulk removal ───────────────────────────────────────────────

    /// Remove every selected machine from `source` in one call.
    ///
    /// The selection is cleared only when every machine was removed.
    pub async fn execute_bulk_removal(
        &self,
        ctx: &mut OrchestratorContext,
        selection: &mut SelectionManager,
        source: &AssignmentTarget,
    ) -> OrchestratorResult<BulkOperationResult> {
        let machines = selection.names();
        check_target(source, &machines)?;

        let id = operation_id("bulk-remove");
        info!(operation = %id, source = %source, machines = machines.len(), "starting bulk removal");
        ctx.events.emit(
            EventKind::Started,
            &id,
            json!({ "machines": machines, "source": source }),
        );
        self.set_progress(BulkProgress::start(machines.len()));

        let response = dispatch_remove(self.service.as_ref(), source, &machines, self.team()).await;
        self.checker.invalidate(&machines);
        let outcome = match response {
            Ok(response) => BatchOutcome::from_response(&machines, &response)
                .unwrap_or_else(|error| BatchOutcome::all_failed(&machines, &error)),
            Err(e) => {
                warn!(operation = %id, error = %e, "bulk removal failed");
                ctx.events
                    .emit(EventKind::Failed, &id, json!({ "error": e.to_string() }));
                self.finish(BulkOperationResult::new(
                    &id,
                    &[],
                    &BatchOutcome::all_failed(&machines, &e.to_string()).failed,
                ));
                return Err(e.into());
            }
        };

        self.update_progress(|p| p.record(outcome.successful.len(), outcome.failed.len()));
        let summary = BulkOperationResult::new(&id, &outcome.successful, &outcome.failed);
        if summary.success {
            selection.clear();
        }
        info!(
            operation = %id,
            removed = summary.successful.len(),
            failed = summary.failed.len(),
            "bulk removal finished"
        );
        self.finish(summary.clone());
        ctx.events
            .emit(EventKind::Completed, &id, json!({ "result": summary }));
        Ok(summary)
    }

    // ── Bulk migration ─────────────────────────────────────────────

    /// Move machines between clusters or clones, batch by batch.
    ///
    /// Each machine is removed from the source and assigned to the
    /// destination, retried as a unit. A machine that exhausts its attempts
    /// after leaving the source is assigned back to it; if that also fails
    /// its error ends in ` (rollback failed)`.
    pub async fn execute_bulk_migration(
        &self,
        ctx: &mut OrchestratorContext,
        plan: &MigrationPlan,
        on_progress: Option<&ProgressCallback>,
    ) -> OrchestratorResult<MigrationResult> {
        check_migration(plan)?;

        let mut seen = HashSet::new();
        let machines: Vec<MachineName> = plan
            .machines
            .iter()
            .filter(|m| seen.insert(m.as_str()))
            .cloned()
            .collect();

        let id = operation_id("bulk-migrate");
        let config = &self.options.migration;
        let mut batches = create_batches(&machines, config.batch_size);
        let total = batches.len();
        info!(
            operation = %id,
            source = %plan.source,
            destination = %plan.destination,
            machines = machines.len(),
            batches = total,
            "starting bulk migration"
        );
        ctx.events.emit(
            EventKind::Started,
            &id,
            json!({ "machines": machines, "source": plan.source, "destination": plan.destination }),
        );
        self.set_progress(BulkProgress::start(machines.len()));

        let mut progress = OperationProgress::new(&id, OperationKind::Migration, total);
        publish(&ctx.events, on_progress, &progress);

        let cancel = self.registry.register(&id, &batches);
        progress.status = OperationStatus::Executing;
        publish(&ctx.events, on_progress, &progress);

        let mut result = MigrationResult {
            operation_id: id.clone(),
            ..Default::default()
        };
        let mut cancelled = false;
        for batch in batches.iter_mut() {
            if cancel.is_cancelled() {
                info!(operation = %id, batch = batch.batch_number, "bulk migration cancelled");
                cancelled = true;
                break;
            }

            let started = Instant::now();
            batch.status = BatchStatus::Processing;
            self.registry.update(&id, batch);
            progress.advance(format!("Processing batch {} of {}", batch.batch_number, total));
            publish(&ctx.events, on_progress, &progress);

            let mut outcome = BatchOutcome::default();
            for machine in &batch.machines {
                match self.migrate_machine(&ctx.events, &id, plan, machine, config).await {
                    Ok(()) => outcome.successful.push(machine.clone()),
                    Err(error) => outcome.failed.push(FailedItem {
                        item: machine.clone(),
                        error,
                    }),
                }
            }

            self.update_progress(|p| p.record(outcome.successful.len(), outcome.failed.len()));
            result.migrated.extend(outcome.successful.iter().cloned());
            for failure in &outcome.failed {
                result.failed.push(failure.item.clone());
                result
                    .errors
                    .insert(failure.item.clone(), failure.error.clone());
            }

            let has_failures = outcome.has_failures();
            batch.status = if outcome.successful.is_empty() && has_failures {
                BatchStatus::Failed
            } else {
                BatchStatus::Completed
            };
            batch.duration_ms = Some(started.elapsed().as_millis() as u64);
            batch.result = Some(outcome);
            self.registry.update(&id, batch);

            if has_failures && config.stop_on_first_error {
                warn!(operation = %id, batch = batch.batch_number, "stopping migration at first failed batch");
                break;
            }
        }
        self.registry.finish(&id);
        self.checker.invalidate(&machines);

        let success = result.success() && !cancelled;
        progress.status = if success {
            OperationStatus::Completed
        } else {
            OperationStatus::Failed
        };
        publish(&ctx.events, on_progress, &progress);

        let failed: Vec<FailedItem<MachineName>> = result
            .failed
            .iter()
            .map(|m| FailedItem {
                item: m.clone(),
                error: result.errors.get(m).cloned().unwrap_or_default(),
            })
            .collect();
        let mut summary = BulkOperationResult::new(&id, &result.migrated, &failed);
        summary.success = success;
        self.finish(summary);

        info!(
            operation = %id,
            migrated = result.migrated.len(),
            failed = result.failed.len(),
            cancelled,
            "bulk migration finished"
        );
        let kind = if success {
            EventKind::Completed
        } else {
            EventKind::Failed
        };
        ctx.events
            .emit(kind, &id, json!({ "result": result, "cancelled": cancelled }));
        Ok(result)
    }

    async fn migrate_machine(
        &self,
        events: &EventBus,
        operation_id: &str,
        plan: &MigrationPlan,
        machine: &MachineName,
        config: &BatchConfig,
    ) -> Result<(), String> {
        let service = self.service.as_ref();
        let team = self.team();
        let one = std::slice::from_ref(machine);
        let attempts = config.attempts();

        let mut in_source = true;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            if in_source {
                let removed = dispatch_remove(service, &plan.source, one, team).await;
                match succeeded(removed, "removal from source failed") {
                    Ok(()) => in_source = false,
                    Err(e) => last_error = e,
                }
            }
            if !in_source {
                let assigned = dispatch_assign(service, &plan.destination, one, team).await;
                match succeeded(assigned, "assignment to destination failed") {
                    Ok(()) => return Ok(()),
                    Err(e) => last_error = e,
                }
            }

            warn!(
                operation = %operation_id,
                %machine,
                attempt,
                attempts,
                error = %last_error,
                "machine migration attempt failed"
            );
            if attempt < attempts {
                tokio::time::sleep(config.retry_delay).await;
            }
        }

        if in_source {
            return Err(last_error);
        }

        events.emit(
            EventKind::RollbackStarted,
            operation_id,
            json!({ "machine": machine, "source": plan.source }),
        );
        let restored = dispatch_assign(service, &plan.source, one, team).await;
        match succeeded(restored, "compensation failed") {
            Ok(()) => {
                info!(operation = %operation_id, %machine, "machine returned to source");
                events.emit(
                    EventKind::RollbackCompleted,
                    operation_id,
                    json!({ "machine": machine, "success": true }),
                );
                Err(last_error)
            }
            Err(e) => {
                warn!(operation = %operation_id, %machine, error = %e, "compensation failed");
                events.emit(
                    EventKind::RollbackCompleted,
                    operation_id,
                    json!({ "machine": machine, "success": false }),
                );
                Err(format!("{last_error} (rollback failed)"))
            }
        }
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn set_progress(&self, progress: BulkProgress) {
        *lock(&self.progress) = progress;
    }

    fn update_progress(&self, f: impl FnOnce(&mut BulkProgress)) -> BulkProgress {
        let mut progress = lock(&self.progress);
        f(&mut progress);
        *progress
    }

    fn finish(&self, summary: BulkOperationResult) {
        self.update_progress(|p| p.is_processing = false);
        *lock(&self.last_result) = Some(summary);
    }

    fn fail(
        &self,
        events: &EventBus,
        result: &mut BulkAssignmentResult,
        step: BulkStep,
        error: OrchestratorError,
    ) -> OrchestratorError {
        result.failed_step = Some(step);
        result.success = false;
        warn!(
            operation = %result.operation_id,
            step = step.as_str(),
            error = %error,
            "bulk step failed"
        );
        events.emit(
            EventKind::StepFailed,
            &result.operation_id,
            json!({ "step": step, "error": error.to_string() }),
        );
        events.emit(
            EventKind::Failed,
            &result.operation_id,
            json!({ "step": step, "error": error.to_string() }),
        );
        self.finish(result.summary());
        error
    }

    fn record_batch(&self, events: &EventBus, operation_id: &str, batch: &Batch) {
        self.registry.update(operation_id, batch);
        match batch.status {
            BatchStatus::Processing => events.emit(
                EventKind::ProgressUpdate,
                operation_id,
                json!({ "batch_number": batch.batch_number, "status": batch.status }),
            ),
            BatchStatus::Completed | BatchStatus::Failed => {
                let (completed, failed) = batch
                    .result
                    .as_ref()
                    .map_or((0, batch.machines.len()), |o| {
                        (o.successful.len(), o.failed.len())
                    });
                let progress = self.update_progress(|p| p.record(completed, failed));
                events.emit(
                    EventKind::ProgressUpdate,
                    operation_id,
                    json!({
                        "batch_number": batch.batch_number,
                        "status": batch.status,
                        "completed": progress.completed,
                        "failed": progress.failed,
                        "total": progress.total,
                        "percentage": progress.percentage(),
                    }),
                );
            }
            BatchStatus::Pending => {}
        }
    }
}

/// Drives one bulk assignment's batches through the service.
struct AssignBatches<'a> {
    controller: &'a BulkOperationsController,
    events: &'a EventBus,
    operation_id: &'a str,
    target: &'a AssignmentTarget,
}

impl BatchHandler for AssignBatches<'_> {
    fn validate<'b>(&'b self, batch: &'b Batch) -> BatchFuture<'b, Result<(), String>> {
        Box::pin(async move {
            let report = self
                .controller
                .checker
                .check_availability(&batch.machines)
                .await;
            if report.all_available() {
                Ok(())
            } else {
                Err(format!(
                    "machines no longer available: {}",
                    report.unavailable.join(", ")
                ))
            }
        })
    }

    fn execute<'b>(&'b self, batch: &'b Batch) -> BatchFuture<'b, Result<BatchOutcome, String>> {
        Box::pin(async move {
            let response = dispatch_assign(
                self.controller.service.as_ref(),
                self.target,
                &batch.machines,
                self.controller.team(),
            )
            .await
            .map_err(|e| e.to_string())?;
            BatchOutcome::from_response(&batch.machines, &response)
        })
    }

    fn on_update(&self, batch: &Batch) {
        self.controller
            .record_batch(self.events, self.operation_id, batch);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn check_target(target: &AssignmentTarget, machines: &[MachineName]) -> OrchestratorResult<()> {
    if machines.is_empty() {
        return Err(OrchestratorError::validation("no machines selected", Vec::new()));
    }
    if target.kind() == AssignmentKind::Image {
        return Err(OrchestratorError::validation(
            "images hold a single machine and are moved with reassign_image",
            machines.to_vec(),
        ));
    }
    if target.has_missing_identifiers() {
        return Err(OrchestratorError::validation(
            format!("{} target is missing required identifiers", target.kind()),
            machines.to_vec(),
        ));
    }
    Ok(())
}

fn check_migration(plan: &MigrationPlan) -> OrchestratorResult<()> {
    check_target(&plan.source, &plan.machines)?;
    check_target(&plan.destination, &plan.machines)?;
    if plan.source == plan.destination {
        return Err(OrchestratorError::validation(
            "source and destination are the same",
            plan.machines.clone(),
        ));
    }
    Ok(())
}

fn first_error(invalid: &InvalidMachine) -> String {
    invalid
        .errors
        .first()
        .map(|issue| issue.message.clone())
        .unwrap_or_else(|| "validation failed".to_string())
}

fn from_server_validation(total: usize, response: BatchValidationResponse) -> BulkValidation {
    let mut validation = BulkValidation {
        valid: response.valid,
        ..Default::default()
    };
    for failed in response.invalid {
        let issue = ValidationIssue::error(IssueCode::ValidationFailed, failed.error);
        *validation.summary.error_types.entry(issue.code).or_insert(0) += 1;
        validation
            .errors
            .insert(failed.item.name.clone(), vec![issue.clone()]);
        validation.invalid.push(InvalidMachine {
            machine: failed.item,
            errors: vec![issue],
            can_override: false,
        });
    }
    validation.summary.total_machines = total;
    validation.summary.valid_count = validation.valid.len();
    validation.summary.invalid_count = validation.invalid.len();
    validation.all_valid = validation.invalid.is_empty();
    validation.can_proceed = !validation.valid.is_empty();
    validation
}

fn step_completed(events: &EventBus, result: &mut BulkAssignmentResult, step: BulkStep) {
    result.completed_steps.push(step);
    events.emit(
        EventKind::StepCompleted,
        &result.operation_id,
        json!({ "step": step }),
    );
}

fn publish(events: &EventBus, callback: Option<&ProgressCallback>, progress: &OperationProgress) {
    events.emit(
        EventKind::ProgressUpdate,
        &progress.operation_id,
        json!({ "progress": progress }),
    );
    if let Some(callback) = callback {
        callback(progress);
    }
}
