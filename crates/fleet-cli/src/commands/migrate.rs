use std::path::Path;

use anyhow::bail;
use tracing::info;

use fleet_core::{Assignment, AssignmentTarget, MachineName};
use fleetgrid_bulk::BulkOptions;
use fleetgrid_workflow::{MigrationPlan, OperationProgress, WorkflowOptions};

use super::{Session, print_json, report_failure};

pub async fn run(
    config: Option<&Path>,
    inventory: &Path,
    machines: &[String],
    from: &str,
    to: &str,
    bulk: bool,
) -> anyhow::Result<()> {
    let mut session = Session::open(config, inventory)?;

    let source = Assignment::Cluster {
        name: from.to_string(),
    };
    let names: Vec<MachineName> = if machines.is_empty() {
        session
            .roster
            .iter()
            .filter(|m| m.assignment == source)
            .map(|m| m.name.clone())
            .collect()
    } else {
        session.select(machines)?.into_iter().map(|m| m.name).collect()
    };
    if names.is_empty() {
        bail!("no machines are assigned to cluster {from}");
    }

    let plan = MigrationPlan {
        machines: names,
        source: AssignmentTarget::cluster(from),
        destination: AssignmentTarget::cluster(to),
    };
    let on_progress = |progress: &OperationProgress| {
        info!(
            operation = %progress.operation_id,
            status = ?progress.status,
            step = progress.current_step,
            total = progress.total_steps,
            "{}",
            progress.current_step_name
        );
    };

    let result = if bulk {
        session
            .bulk(BulkOptions::from(&session.config))
            .execute_bulk_migration(&mut session.ctx, &plan, Some(&on_progress))
            .await
    } else {
        session
            .workflow(WorkflowOptions::from(&session.config.workflow))
            .migrate(&mut session.ctx, &plan, Some(&on_progress))
            .await
    }
    .map_err(report_failure)?;
    print_json(&result)
}
