//! Assignment workflow controller — validate → resolve conflicts → assign.
//!
//! Steps run strictly in order and the first failure ends the workflow.
//! Only the failing step compensates for itself (a failed assign removes the
//! machines it did assign); earlier steps are never rolled back.
//!
//! The controller also owns image reassignment, cluster-to-cluster
//! migration and undo of the last recorded command.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use fleet_core::time::operation_id;
use fleet_core::{
    AssignmentConflict, AssignmentKind, AssignmentService, AssignmentTarget, ConflictResolution,
    ConflictStrategy, Machine, MachineName, OperationResponse, OrchestratorError,
    OrchestratorResult, WorkflowSettings,
};
use fleetgrid_validation::{BulkRuleOptions, ExclusivityChecker, validate_bulk};

use crate::conflict::ConflictResolver;
use crate::context::OrchestratorContext;
use crate::dispatch::{dispatch_assign, dispatch_remove, succeeded};
use crate::events::{EventBus, EventKind};
use crate::history::{ReassignImageCommand, command_for};
use crate::progress::{OperationKind, OperationProgress, OperationStatus, ProgressCallback};

/// How the assignment workflow treats conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowOptions {
    pub conflict_strategy: ConflictStrategy,
    /// Run the resolver when conflicts are found.
    pub auto_resolve_conflicts: bool,
    /// Check availability before assigning.
    pub validate_first: bool,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            conflict_strategy: ConflictStrategy::SkipConflicts,
            auto_resolve_conflicts: false,
            validate_first: true,
        }
    }
}

impl From<&WorkflowSettings> for WorkflowOptions {
    fn from(settings: &WorkflowSettings) -> Self {
        Self {
            conflict_strategy: settings.conflict_strategy,
            auto_resolve_conflicts: settings.auto_resolve_conflicts,
            validate_first: settings.validate_first,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Validate,
    ResolveConflicts,
    Assign,
    ReassignImage,
}

impl WorkflowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStep::Validate => "validate",
            WorkflowStep::ResolveConflicts => "resolve_conflicts",
            WorkflowStep::Assign => "assign",
            WorkflowStep::ReassignImage => "reassign_image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRequest {
    pub machines: Vec<MachineName>,
    pub target: AssignmentTarget,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub workflow_id: String,
    pub success: bool,
    pub completed_steps: Vec<WorkflowStep>,
    pub failed_step: Option<WorkflowStep>,
    pub error: Option<String>,
    /// Machines the service accepted.
    pub assigned: Vec<MachineName>,
    /// Machines left out because they were unavailable.
    pub skipped_machines: Vec<MachineName>,
    pub conflicts: Vec<AssignmentConflict>,
    pub resolutions: Vec<ConflictResolution>,
}

/// Machines to move from one cluster to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub machines: Vec<MachineName>,
    pub source: AssignmentTarget,
    pub destination: AssignmentTarget,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub operation_id: String,
    pub migrated: Vec<MachineName>,
    pub failed: Vec<MachineName>,
    pub errors: BTreeMap<MachineName, String>,
}

impl MigrationResult {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record_failure(&mut self, machine: &str, error: String) {
        self.failed.push(machine.to_string());
        self.errors.insert(machine.to_string(), error);
    }
}

pub struct AssignmentWorkflowController {
    service: Arc<dyn AssignmentService>,
    checker: Arc<ExclusivityChecker>,
    resolver: ConflictResolver,
    options: WorkflowOptions,
}

impl AssignmentWorkflowController {
    pub fn new(
        service: Arc<dyn AssignmentService>,
        checker: Arc<ExclusivityChecker>,
        options: WorkflowOptions,
    ) -> Self {
        let resolver = ConflictResolver::new(service.clone());
        Self {
            service,
            checker,
            resolver,
            options,
        }
    }

    pub fn options(&self) -> &WorkflowOptions {
        &self.options
    }

    pub fn team(&self) -> &str {
        self.checker.team()
    }

    // ── Assignment workflow ────────────────────────────────────────

    /// Assign machines to a cluster or clone.
    pub async fn assign(
        &self,
        ctx: &mut OrchestratorContext,
        request: &AssignmentRequest,
    ) -> OrchestratorResult<WorkflowResult> {
        check_request(request)?;

        let id = operation_id(&format!("assign-{}", request.target.kind()));
        info!(
            workflow = %id,
            target = %request.target,
            machines = request.machines.len(),
            strategy = %self.options.conflict_strategy,
            "starting assignment workflow"
        );
        ctx.events.emit(
            EventKind::Started,
            &id,
            json!({ "machines": request.machines, "target": request.target }),
        );

        let mut result = WorkflowResult {
            workflow_id: id.clone(),
            ..Default::default()
        };

        let mut to_assign = request.machines.clone();
        if self.options.validate_first {
            match self.validate_step(&ctx.events, request, &mut result).await {
                Ok(available) => to_assign = available,
                Err(e) => return Err(fail(&ctx.events, &mut result, WorkflowStep::Validate, e)),
            }
        }

        if !result.conflicts.is_empty() && self.options.auto_resolve_conflicts {
            match self
                .resolve_step(&ctx.events, request, &mut result, &to_assign)
                .await
            {
                Ok(extended) => to_assign = extended,
                Err(e) => {
                    return Err(fail(
                        &ctx.events,
                        &mut result,
                        WorkflowStep::ResolveConflicts,
                        e,
                    ));
                }
            }
        }

        if let Err(e) = self.assign_step(ctx, request, &mut result, to_assign).await {
            return Err(fail(&ctx.events, &mut result, WorkflowStep::Assign, e));
        }

        result.success = true;
        info!(
            workflow = %id,
            assigned = result.assigned.len(),
            skipped = result.skipped_machines.len(),
            "assignment workflow completed"
        );
        ctx.events
            .emit(EventKind::Completed, &id, json!({ "result": result }));
        Ok(result)
    }

    async fn validate_step(
        &self,
        events: &EventBus,
        request: &AssignmentRequest,
        result: &mut WorkflowResult,
    ) -> OrchestratorResult<Vec<MachineName>> {
        let report = self.checker.check_availability(&request.machines).await;
        let strategy = self.options.conflict_strategy;

        result.conflicts = report
            .conflicts
            .iter()
            .map(|c| AssignmentConflict {
                machine_name: c.machine_name.clone(),
                current: c.current.clone(),
                target: request.target.clone(),
            })
            .collect();

        events.emit(
            EventKind::ValidationCompleted,
            &result.workflow_id,
            json!({
                "available": report.available,
                "unavailable": report.unavailable,
                "conflicts": result.conflicts,
            }),
        );

        if !result.conflicts.is_empty() {
            events.emit(
                EventKind::ConflictDetected,
                &result.workflow_id,
                json!({ "conflicts": result.conflicts, "strategy": strategy }),
            );
            if strategy == ConflictStrategy::FailFast {
                return Err(OrchestratorError::Conflict {
                    message: format!(
                        "{} machine(s) are already assigned",
                        result.conflicts.len()
                    ),
                    conflicts: result.conflicts.clone(),
                    strategy,
                });
            }
        }

        // Fail-closed machines carry no conflict record but still block FAIL_FAST.
        if strategy == ConflictStrategy::FailFast && !report.unavailable.is_empty() {
            return Err(OrchestratorError::Conflict {
                message: format!(
                    "{} machine(s) could not be confirmed available: {}",
                    report.unavailable.len(),
                    report.unavailable.join(", ")
                ),
                conflicts: result.conflicts.clone(),
                strategy,
            });
        }

        result.skipped_machines = report.unavailable;
        step_completed(events, result, WorkflowStep::Validate);
        Ok(report.available)
    }

    /// Returns the machines to assign once force-resolved ones are added.
    async fn resolve_step(
        &self,
        events: &EventBus,
        request: &AssignmentRequest,
        result: &mut WorkflowResult,
        available: &[MachineName],
    ) -> OrchestratorResult<Vec<MachineName>> {
        let resolutions = self
            .resolver
            .resolve(&result.conflicts, self.options.conflict_strategy)
            .await?;

        let forced: Vec<MachineName> = resolutions
            .iter()
            .filter(|r| r.resolved)
            .map(|r| r.conflict.machine_name.clone())
            .collect();
        if !forced.is_empty() {
            self.checker.invalidate(&forced);
            result.skipped_machines.retain(|m| !forced.contains(m));
        }

        result.resolutions = resolutions;
        step_completed(events, result, WorkflowStep::ResolveConflicts);

        Ok(request
            .machines
            .iter()
            .filter(|m| available.contains(m) || forced.contains(m))
            .cloned()
            .collect())
    }

    async fn assign_step(
        &self,
        ctx: &mut OrchestratorContext,
        request: &AssignmentRequest,
        result: &mut WorkflowResult,
        to_assign: Vec<MachineName>,
    ) -> OrchestratorResult<()> {
        if to_assign.is_empty() {
            info!(workflow = %result.workflow_id, "no machines left to assign");
            step_completed(&ctx.events, result, WorkflowStep::Assign);
            return Ok(());
        }

        let response = dispatch_assign(
            self.service.as_ref(),
            &request.target,
            &to_assign,
            self.team(),
        )
        .await;
        self.checker.invalidate(&to_assign);

        let (message, assigned, failed) = match response {
            Ok(resp) if resp.success => {
                if let Some(command) = command_for(&request.target, to_assign.clone(), self.team()) {
                    ctx.history.push(command);
                }
                result.assigned = to_assign;
                step_completed(&ctx.events, result, WorkflowStep::Assign);
                return Ok(());
            }
            Ok(resp) => {
                let assigned: Vec<MachineName> = to_assign
                    .iter()
                    .filter(|m| !resp.failed_machines.contains(m))
                    .cloned()
                    .collect();
                (resp.message_or("assignment failed"), assigned, resp.failed_machines)
            }
            Err(e) => {
                let failed = if e.machines().is_empty() {
                    to_assign.clone()
                } else {
                    e.machines().to_vec()
                };
                (e.to_string(), Vec::new(), failed)
            }
        };

        result.assigned = assigned.clone();
        let rolled_back = self
            .rollback_assign(&ctx.events, &result.workflow_id, &request.target, &assigned)
            .await;

        Err(OrchestratorError::Workflow {
            step: WorkflowStep::Assign.as_str().to_string(),
            message,
            recoverable: true,
            payload: json!({
                "assigned": assigned,
                "failed": failed,
                "rolled_back": rolled_back,
            }),
        })
    }

    /// Remove the machines a failed assign step did assign.
    async fn rollback_assign(
        &self,
        events: &EventBus,
        workflow_id: &str,
        target: &AssignmentTarget,
        assigned: &[MachineName],
    ) -> bool {
        events.emit(
            EventKind::RollbackStarted,
            workflow_id,
            json!({ "step": WorkflowStep::Assign, "machines": assigned }),
        );

        let outcome = if assigned.is_empty() {
            Ok(OperationResponse::ok())
        } else {
            dispatch_remove(self.service.as_ref(), target, assigned, self.team()).await
        };
        self.checker.invalidate(assigned);

        let success = match outcome {
            Ok(resp) if resp.success => true,
            Ok(resp) => {
                warn!(workflow = %workflow_id, error = %resp.message_or("removal failed"), "assign rollback incomplete");
                false
            }
            Err(e) => {
                warn!(workflow = %workflow_id, error = %e, "assign rollback failed");
                false
            }
        };
        events.emit(
            EventKind::RollbackCompleted,
            workflow_id,
            json!({ "step": WorkflowStep::Assign, "success": success }),
        );
        success
    }

    // ── Validate-and-assign ────────────────────────────────────────

    /// Run the bulk rules over machine records, then assign if all pass.
    pub async fn validate_and_assign(
        &self,
        ctx: &mut OrchestratorContext,
        machines: &[Machine],
        target: &AssignmentTarget,
        team: Option<&str>,
    ) -> OrchestratorResult<WorkflowResult> {
        let options = BulkRuleOptions {
            team: team.map(str::to_string),
            skip_warnings: false,
        };
        let bulk = validate_bulk(machines, target.kind(), &options);
        if !bulk.all_valid {
            warn!(
                invalid = bulk.invalid.len(),
                total = machines.len(),
                "machines failed validation"
            );
            return Err(OrchestratorError::Validation {
                message: format!(
                    "{} of {} machine(s) failed validation",
                    bulk.invalid.len(),
                    machines.len()
                ),
                machines: bulk.invalid_names(),
                results: bulk.invalid,
            });
        }

        let request = AssignmentRequest {
            machines: machines.iter().map(|m| m.name.clone()).collect(),
            target: target.clone(),
        };
        self.assign(ctx, &request).await
    }

    // ── Image reassignment ─────────────────────────────────────────

    /// Move `image` to `new_machine`, recording an undo that moves it back.
    pub async fn reassign_image(
        &self,
        ctx: &mut OrchestratorContext,
        image: &str,
        current_machine: Option<&str>,
        new_machine: &str,
        pool: &str,
    ) -> OrchestratorResult<WorkflowResult> {
        let machines = vec![new_machine.to_string()];
        if [image, new_machine, pool].iter().any(|s| s.trim().is_empty()) {
            return Err(OrchestratorError::validation(
                "image, pool and machine are required",
                machines,
            ));
        }

        let id = operation_id("reassign-image");
        info!(workflow = %id, %image, %new_machine, "starting image reassignment");
        ctx.events.emit(
            EventKind::Started,
            &id,
            json!({ "image": image, "from": current_machine, "to": new_machine, "pool": pool }),
        );
        let mut result = WorkflowResult {
            workflow_id: id.clone(),
            ..Default::default()
        };

        let report = self.checker.check_availability(&machines).await;
        ctx.events.emit(
            EventKind::ValidationCompleted,
            &id,
            json!({ "available": report.available, "unavailable": report.unavailable }),
        );
        if !report.all_available() {
            let err = OrchestratorError::validation(
                format!("machine {new_machine} is not available"),
                machines,
            );
            return Err(fail(&ctx.events, &mut result, WorkflowStep::Validate, err));
        }
        step_completed(&ctx.events, &mut result, WorkflowStep::Validate);

        let response = self.service.reassign_image(image, new_machine, pool).await;
        let mut affected = machines.clone();
        affected.extend(current_machine.map(str::to_string));
        self.checker.invalidate(&affected);

        match response {
            Ok(resp) if resp.success => {}
            Ok(resp) => {
                let err = OrchestratorError::Workflow {
                    step: WorkflowStep::ReassignImage.as_str().to_string(),
                    message: resp.message_or("image reassignment failed"),
                    recoverable: true,
                    payload: json!({ "failed": resp.failed_machines }),
                };
                return Err(fail(&ctx.events, &mut result, WorkflowStep::ReassignImage, err));
            }
            Err(e) => {
                return Err(fail(
                    &ctx.events,
                    &mut result,
                    WorkflowStep::ReassignImage,
                    e.into(),
                ));
            }
        }

        ctx.history.push(Box::new(ReassignImageCommand {
            image: image.to_string(),
            pool: pool.to_string(),
            previous_machine: current_machine.map(str::to_string),
            new_machine: new_machine.to_string(),
        }));
        result.assigned = machines;
        result.success = true;
        step_completed(&ctx.events, &mut result, WorkflowStep::ReassignImage);
        ctx.events
            .emit(EventKind::Completed, &id, json!({ "result": result }));
        Ok(result)
    }

    // ── Migration ──────────────────────────────────────────────────

    /// Move machines from one cluster to another, one machine at a time.
    ///
    /// Each machine is removed from the source and assigned to the
    /// destination. When the destination refuses a machine that was already
    /// removed, it is put back on the source; the machine counts as failed
    /// either way.
    pub async fn migrate(
        &self,
        ctx: &mut OrchestratorContext,
        plan: &MigrationPlan,
        on_progress: Option<&ProgressCallback>,
    ) -> OrchestratorResult<MigrationResult> {
        let (source, destination) = match (&plan.source, &plan.destination) {
            (AssignmentTarget::Cluster { name: s }, AssignmentTarget::Cluster { name: d }) => {
                (s.as_str(), d.as_str())
            }
            _ => {
                return Err(OrchestratorError::validation(
                    "migration supports cluster to cluster only",
                    plan.machines.clone(),
                ));
            }
        };
        if plan.machines.is_empty() {
            return Err(OrchestratorError::validation("no machines to migrate", Vec::new()));
        }
        if source == destination {
            return Err(OrchestratorError::validation(
                format!("source and destination are both {source}"),
                plan.machines.clone(),
            ));
        }

        let id = operation_id("migrate");
        info!(workflow = %id, %source, %destination, machines = plan.machines.len(), "starting migration");
        ctx.events.emit(
            EventKind::Started,
            &id,
            json!({ "machines": plan.machines, "source": source, "destination": destination }),
        );

        let mut progress =
            OperationProgress::new(&id, OperationKind::Migration, plan.machines.len() * 2);
        publish(&ctx.events, on_progress, &progress);

        progress.status = OperationStatus::Validating;
        let mut machines: Vec<MachineName> = Vec::with_capacity(plan.machines.len());
        for machine in &plan.machines {
            if !machines.contains(machine) {
                machines.push(machine.clone());
            }
        }
        publish(&ctx.events, on_progress, &progress);

        progress.status = OperationStatus::Executing;
        let mut result = MigrationResult {
            operation_id: id.clone(),
            ..Default::default()
        };

        for machine in &machines {
            let single = vec![machine.clone()];

            progress.advance(format!("remove {machine} from {source}"));
            publish(&ctx.events, on_progress, &progress);
            if let Err(error) = succeeded(self.service.remove_from_cluster(&single).await, "removal failed") {
                warn!(workflow = %id, %machine, %error, "removal from source failed");
                progress.advance(format!("skip {machine}"));
                result.record_failure(machine, error);
                ctx.events.emit(EventKind::StepFailed, &id, json!({ "machine": machine, "stage": "remove" }));
                continue;
            }

            progress.advance(format!("assign {machine} to {destination}"));
            publish(&ctx.events, on_progress, &progress);
            match succeeded(
                self.service.assign_to_cluster(&single, destination).await,
                "assignment failed",
            ) {
                Ok(()) => {
                    result.migrated.push(machine.clone());
                    ctx.events.emit(EventKind::StepCompleted, &id, json!({ "machine": machine }));
                }
                Err(error) => {
                    let error = self
                        .compensate(&ctx.events, &id, machine, source, error)
                        .await;
                    result.record_failure(machine, error);
                    ctx.events.emit(EventKind::StepFailed, &id, json!({ "machine": machine, "stage": "assign" }));
                }
            }
        }

        self.checker.invalidate(&machines);
        progress.status = if result.success() {
            OperationStatus::Completed
        } else {
            OperationStatus::Failed
        };
        publish(&ctx.events, on_progress, &progress);

        info!(
            workflow = %id,
            migrated = result.migrated.len(),
            failed = result.failed.len(),
            "migration finished"
        );
        let kind = if result.success() {
            EventKind::Completed
        } else {
            EventKind::Failed
        };
        ctx.events.emit(kind, &id, json!({ "result": result }));
        Ok(result)
    }

    /// Put a machine back on its source cluster. Returns the final error.
    async fn compensate(
        &self,
        events: &EventBus,
        workflow_id: &str,
        machine: &str,
        source: &str,
        error: String,
    ) -> String {
        events.emit(
            EventKind::RollbackStarted,
            workflow_id,
            json!({ "machine": machine, "cluster": source }),
        );
        let single = vec![machine.to_string()];
        let restored = succeeded(
            self.service.assign_to_cluster(&single, source).await,
            "assignment failed",
        );
        events.emit(
            EventKind::RollbackCompleted,
            workflow_id,
            json!({ "machine": machine, "success": restored.is_ok() }),
        );

        match restored {
            Ok(()) => error,
            Err(rollback_error) => {
                warn!(workflow = %workflow_id, %machine, %rollback_error, "could not return machine to source");
                format!("{error} (rollback failed)")
            }
        }
    }

    // ── Undo ───────────────────────────────────────────────────────

    /// Undo the most recent recorded command. Returns false when there was
    /// nothing to undo.
    pub async fn undo_last_operation(&self, ctx: &mut OrchestratorContext) -> OrchestratorResult<bool> {
        match ctx.history.undo(self.service.as_ref()).await? {
            Some(machines) => {
                self.checker.invalidate(&machines);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Descriptions of recorded commands, oldest first.
    pub fn operation_history(&self, ctx: &OrchestratorContext) -> Vec<String> {
        ctx.history.descriptions()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn check_request(request: &AssignmentRequest) -> OrchestratorResult<()> {
    if request.machines.is_empty() {
        return Err(OrchestratorError::validation("no machines selected", Vec::new()));
    }
    if request.target.kind() == AssignmentKind::Image {
        return Err(OrchestratorError::validation(
            "image targets are moved with reassign_image",
            request.machines.clone(),
        ));
    }
    if request.target.has_missing_identifiers() {
        return Err(OrchestratorError::validation(
            format!("{} target is missing required identifiers", request.target.kind()),
            request.machines.clone(),
        ));
    }
    Ok(())
}

fn step_completed(events: &EventBus, result: &mut WorkflowResult, step: WorkflowStep) {
    result.completed_steps.push(step);
    events.emit(
        EventKind::StepCompleted,
        &result.workflow_id,
        json!({ "step": step }),
    );
}

/// Record a step failure on `result`, announce it, and hand back the error.
fn fail(
    events: &EventBus,
    result: &mut WorkflowResult,
    step: WorkflowStep,
    error: OrchestratorError,
) -> OrchestratorError {
    warn!(workflow = %result.workflow_id, step = step.as_str(), %error, "workflow step failed");
    result.success = false;
    result.failed_step = Some(step);
    result.error = Some(error.to_string());

    events.emit(
        EventKind::StepFailed,
        &result.workflow_id,
        json!({ "step": step, "error": result.error }),
    );
    events.emit(
        EventKind::Failed,
        &result.workflow_id,
        json!({ "result": result }),
    );
    error
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
