//! Bulk operation scenarios against the in-memory service.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use fleet_core::{Assignment, AssignmentTarget, Machine, MachineName, OrchestratorError};
use fleetgrid_batch::BatchStatus;
use fleetgrid_bulk::{BulkOperationsController, BulkOptions, BulkStep, MachineStatus};
use fleetgrid_state::{MemoryAssignmentService, ServiceCall};
use fleetgrid_validation::{CacheConfig, ExclusivityChecker};
use fleetgrid_workflow::{
    EventKind, MigrationPlan, OperationProgress, OperationStatus, OrchestratorContext,
    SelectionManager,
};

fn names(list: &[&str]) -> Vec<MachineName> {
    list.iter().map(|s| s.to_string()).collect()
}

fn free(count: usize) -> Vec<Machine> {
    (1..=count)
        .map(|i| Machine::new(format!("m{i}"), "team-a"))
        .collect()
}

fn in_cluster(list: &[&str], cluster: &str) -> Vec<Machine> {
    list.iter()
        .map(|m| {
            Machine::new(*m, "team-a").with_assignment(Assignment::Cluster {
                name: cluster.into(),
            })
        })
        .collect()
}

fn pairs() -> BulkOptions {
    let mut options = BulkOptions::default();
    options.assignment.batch_size = 2;
    options
}

fn setup(
    machines: Vec<Machine>,
    options: BulkOptions,
) -> (Arc<MemoryAssignmentService>, BulkOperationsController) {
    let service = Arc::new(MemoryAssignmentService::with_machines(machines));
    let checker = Arc::new(ExclusivityChecker::new(
        service.clone(),
        "team-a",
        CacheConfig::default(),
    ));
    let bulk = BulkOperationsController::new(service.clone(), checker, options);
    (service, bulk)
}

fn record_events(ctx: &mut OrchestratorContext) -> Arc<Mutex<Vec<EventKind>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    ctx.events.subscribe(move |e| sink.lock().unwrap().push(e.kind));
    seen
}

fn assigns(service: &MemoryAssignmentService) -> Vec<Vec<MachineName>> {
    service
        .mutations()
        .into_iter()
        .filter_map(|call| match call {
            ServiceCall::AssignToCluster { machines, .. } => Some(machines),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn broken_batch_exhausts_retries_and_the_run_continues() {
    let (service, bulk) = setup(free(6), pairs());
    service.unreachable_machines(["m3"]);
    let mut ctx = OrchestratorContext::default();

    let started = tokio::time::Instant::now();
    let result = bulk
        .execute_bulk_assignment(&mut ctx, &free(6), &AssignmentTarget::cluster("ceph-a"))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.successful, names(&["m1", "m2", "m5", "m6"]));
    assert_eq!(result.failed_names(), names(&["m3", "m4"]));
    assert_eq!(
        result
            .batches
            .iter()
            .map(|b| (b.batch_number, b.status))
            .collect::<Vec<_>>(),
        vec![
            (1, BatchStatus::Completed),
            (2, BatchStatus::Failed),
            (3, BatchStatus::Completed),
        ]
    );
    assert_eq!(result.batches[1].retry_count, 3);
    // Two delays between three attempts.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    assert_eq!(
        result.completed_steps,
        vec![
            BulkStep::Validation,
            BulkStep::Batching,
            BulkStep::Processing,
            BulkStep::Reporting,
        ]
    );
    assert_eq!(
        assigns(&service),
        vec![
            names(&["m1", "m2"]),
            names(&["m3", "m4"]),
            names(&["m3", "m4"]),
            names(&["m3", "m4"]),
            names(&["m5", "m6"]),
        ]
    );

    let report = result.report.as_ref().unwrap();
    assert_eq!(report.summary.successful, 4);
    assert_eq!(report.summary.failed, 2);
    assert_eq!(report.summary.skipped, 0);

    let progress = bulk.operation_progress();
    assert_eq!((progress.completed, progress.failed), (4, 2));
    assert!(!progress.is_processing);
    let last = bulk.last_operation_result().unwrap();
    assert_eq!(last.failed, names(&["m3", "m4"]));
    assert!(bulk.active_operations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn undo_releases_only_the_successful_machines() {
    let (service, bulk) = setup(free(6), pairs());
    service.unreachable_machines(["m3"]);
    let mut ctx = OrchestratorContext::default();

    bulk.execute_bulk_assignment(&mut ctx, &free(6), &AssignmentTarget::cluster("ceph-a"))
        .await
        .unwrap();
    service.clear_calls();

    let undone = ctx.history.undo(service.as_ref()).await.unwrap();
    assert_eq!(undone, Some(names(&["m1", "m2", "m5", "m6"])));
    assert_eq!(
        service.calls(),
        vec![ServiceCall::RemoveFromCluster {
            machines: names(&["m1", "m2", "m5", "m6"])
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn stop_on_first_error_surfaces_the_partial_result() {
    let mut options = pairs();
    options.assignment.stop_on_first_error = true;
    let (service, bulk) = setup(free(6), options);
    service.reject_machines(["m4"]);
    let mut ctx = OrchestratorContext::default();
    let events = record_events(&mut ctx);

    let err = bulk
        .execute_bulk_assignment(&mut ctx, &free(6), &AssignmentTarget::cluster("ceph-a"))
        .await
        .unwrap_err();

    match err {
        OrchestratorError::Workflow {
            step,
            recoverable,
            payload,
            ..
        } => {
            assert_eq!(step, "processing");
            assert!(recoverable);
            assert_eq!(payload["successful"], json!(["m1", "m2", "m3"]));
            assert_eq!(payload["batches"][2]["status"], json!("pending"));
        }
        other => panic!("expected workflow error, got {other:?}"),
    }
    assert!(!service.assignment_of("m5").is_assigned());
    assert_eq!(events.lock().unwrap().last(), Some(&EventKind::Failed));
}

#[tokio::test(start_paused = true)]
async fn invalid_machines_are_recorded_as_failed() {
    let mut fleet = free(3);
    fleet[1] = in_cluster(&["m2"], "ceph-old").remove(0);
    let (service, bulk) = setup(fleet.clone(), BulkOptions::default());
    let mut ctx = OrchestratorContext::default();

    let result = bulk
        .execute_bulk_assignment(&mut ctx, &fleet, &AssignmentTarget::cluster("ceph-a"))
        .await
        .unwrap();

    assert_eq!(result.successful, names(&["m1", "m3"]));
    assert_eq!(result.failed_names(), names(&["m2"]));
    assert_eq!(assigns(&service), vec![names(&["m1", "m3"])]);
    let report = result.report.unwrap();
    assert!(
        report
            .machines
            .iter()
            .any(|m| m.machine == "m2" && m.status == MachineStatus::Failed)
    );
}

#[tokio::test(start_paused = true)]
async fn invalid_machines_abort_under_stop_on_first_error() {
    let mut fleet = free(3);
    fleet[1] = in_cluster(&["m2"], "ceph-old").remove(0);
    let mut options = BulkOptions::default();
    options.assignment.stop_on_first_error = true;
    let (service, bulk) = setup(fleet.clone(), options);
    let mut ctx = OrchestratorContext::default();

    let err = bulk
        .execute_bulk_assignment(&mut ctx, &fleet, &AssignmentTarget::cluster("ceph-a"))
        .await
        .unwrap_err();

    match err {
        OrchestratorError::Validation { machines, .. } => assert_eq!(machines, names(&["m2"])),
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(service.mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_before_the_next_batch() {
    let (service, bulk) = setup(free(6), pairs());
    service.fail_next_assigns(1);
    let mut ctx = OrchestratorContext::default();
    let fleet = free(6);
    let target = AssignmentTarget::cluster("ceph-a");

    let canceller = async {
        // Batch 1 is waiting out its retry delay.
        tokio::time::sleep(Duration::from_millis(500)).await;
        let ids = bulk.active_operations();
        assert_eq!(ids.len(), 1);
        let queue = bulk.operation_status(&ids[0]).unwrap();
        assert_eq!(queue[0].status, BatchStatus::Processing);
        assert!(bulk.cancel_operation(&ids[0]));
        ids[0].clone()
    };
    let (result, id) = tokio::join!(
        bulk.execute_bulk_assignment(&mut ctx, &fleet, &target),
        canceller
    );
    let result = result.unwrap();

    assert!(result.cancelled);
    assert!(!result.success);
    assert_eq!(result.successful, names(&["m1", "m2"]));
    assert_eq!(result.batches[0].retry_count, 1);
    assert_eq!(result.batches[1].status, BatchStatus::Pending);
    assert_eq!(result.batches[2].status, BatchStatus::Pending);
    assert_eq!(
        assigns(&service),
        vec![names(&["m1", "m2"]), names(&["m1", "m2"])]
    );
    assert_eq!(result.report.unwrap().summary.skipped, 4);
    assert!(bulk.operation_status(&id).is_none());
    assert!(!bulk.cancel_operation(&id));
}

#[tokio::test(start_paused = true)]
async fn migration_compensates_each_failed_machine() {
    let (service, bulk) = setup(in_cluster(&["m1", "m2"], "A"), BulkOptions::default());
    service.reject_cluster("B");
    let mut ctx = OrchestratorContext::default();

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = statuses.clone();
    let on_progress = move |p: &OperationProgress| sink.lock().unwrap().push(p.status);

    let plan = MigrationPlan {
        machines: names(&["m1", "m2"]),
        source: AssignmentTarget::cluster("A"),
        destination: AssignmentTarget::cluster("B"),
    };
    let started = tokio::time::Instant::now();
    let result = bulk
        .execute_bulk_migration(&mut ctx, &plan, Some(&on_progress))
        .await
        .unwrap();

    assert_eq!(result.failed, names(&["m1", "m2"]));
    assert!(!result.errors["m1"].ends_with("(rollback failed)"));
    assert_eq!(
        service.assignment_of("m2"),
        Assignment::Cluster { name: "A".into() }
    );
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(4) && elapsed < Duration::from_secs(5));

    let m1_calls: Vec<ServiceCall> = service
        .mutations()
        .into_iter()
        .filter(|c| match c {
            ServiceCall::RemoveFromCluster { machines }
            | ServiceCall::AssignToCluster { machines, .. } => machines == &names(&["m1"]),
            _ => false,
        })
        .collect();
    let to = |cluster: &str| ServiceCall::AssignToCluster {
        machines: names(&["m1"]),
        cluster: cluster.into(),
    };
    assert_eq!(
        m1_calls,
        vec![
            ServiceCall::RemoveFromCluster {
                machines: names(&["m1"])
            },
            to("B"),
            to("B"),
            to("B"),
            to("A"),
        ]
    );

    let statuses = statuses.lock().unwrap();
    assert_eq!(statuses.first(), Some(&OperationStatus::Preparing));
    assert_eq!(statuses.last(), Some(&OperationStatus::Failed));
}

#[tokio::test(start_paused = true)]
async fn migration_runs_in_batches() {
    let all = ["m1", "m2", "m3", "m4", "m5", "m6"];
    let (service, bulk) = setup(in_cluster(&all, "A"), BulkOptions::default());
    let mut ctx = OrchestratorContext::default();

    let steps = Arc::new(Mutex::new(Vec::new()));
    let sink = steps.clone();
    let on_progress = move |p: &OperationProgress| {
        sink.lock()
            .unwrap()
            .push((p.current_step, p.total_steps))
    };

    let plan = MigrationPlan {
        machines: names(&all),
        source: AssignmentTarget::cluster("A"),
        destination: AssignmentTarget::cluster("B"),
    };
    let result = bulk
        .execute_bulk_migration(&mut ctx, &plan, Some(&on_progress))
        .await
        .unwrap();

    assert!(result.success());
    assert_eq!(result.migrated, names(&all));
    assert_eq!(
        service.assignment_of("m6"),
        Assignment::Cluster { name: "B".into() }
    );
    let steps = steps.lock().unwrap();
    assert_eq!(steps.last(), Some(&(2, 2)));
    assert!(bulk.last_operation_result().unwrap().success);
}

#[tokio::test(start_paused = true)]
async fn removal_clears_the_selection_on_success() {
    let (service, bulk) = setup(in_cluster(&["m1", "m2"], "A"), BulkOptions::default());
    let mut ctx = OrchestratorContext::default();
    let mut selection = SelectionManager::new();
    selection.select_all(["m1", "m2"]);

    let summary = bulk
        .execute_bulk_removal(&mut ctx, &mut selection, &AssignmentTarget::cluster("A"))
        .await
        .unwrap();

    assert!(summary.success);
    assert!(!selection.has_selection());
    assert!(!service.assignment_of("m1").is_assigned());
    assert_eq!(
        service.mutations(),
        vec![ServiceCall::RemoveFromCluster {
            machines: names(&["m1", "m2"])
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn partial_removal_keeps_the_selection() {
    let mut fleet = in_cluster(&["m1"], "A");
    fleet.push(Machine::new("m2", "team-a"));
    let (_service, bulk) = setup(fleet, BulkOptions::default());
    let mut ctx = OrchestratorContext::default();
    let mut selection = SelectionManager::new();
    selection.select_all(["m1", "m2"]);

    let summary = bulk
        .execute_bulk_removal(&mut ctx, &mut selection, &AssignmentTarget::cluster("A"))
        .await
        .unwrap();

    assert!(!summary.success);
    assert_eq!(summary.successful, names(&["m1"]));
    assert_eq!(summary.failed, names(&["m2"]));
    assert_eq!(selection.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn server_batched_assignment_relays_progress() {
    let (service, bulk) = setup(free(12), BulkOptions::default());
    let mut ctx = OrchestratorContext::default();
    let events = record_events(&mut ctx);
    let machines: Vec<MachineName> = (1..=12).map(|i| format!("m{i}")).collect();

    let result = bulk
        .execute_server_batched_assignment(&mut ctx, &machines, &AssignmentTarget::cluster("ceph-a"))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.successful.len(), 12);
    assert_eq!(ctx.history.len(), 1);
    assert!(service.assignment_of("m12").is_assigned());
    let updates = events
        .lock()
        .unwrap()
        .iter()
        .filter(|k| **k == EventKind::ProgressUpdate)
        .count();
    assert_eq!(updates, 2);
}
