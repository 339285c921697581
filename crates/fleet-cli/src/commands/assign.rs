use std::path::Path;

use fleet_core::ConflictStrategy;
use fleetgrid_workflow::{AssignmentRequest, WorkflowOptions};

use super::{Session, TargetArgs, print_json, report_failure};

pub async fn run(
    config: Option<&Path>,
    inventory: &Path,
    machines: &[String],
    target: &TargetArgs,
    strategy: Option<ConflictStrategy>,
    auto_resolve: bool,
) -> anyhow::Result<()> {
    let mut session = Session::open(config, inventory)?;
    let target = target.resolve()?;

    let mut options = WorkflowOptions::from(&session.config.workflow);
    if let Some(strategy) = strategy {
        options.conflict_strategy = strategy;
    }
    options.auto_resolve_conflicts |= auto_resolve;

    let request = AssignmentRequest {
        machines: session
            .select(machines)?
            .into_iter()
            .map(|m| m.name)
            .collect(),
        target,
    };
    let workflow = session.workflow(options);
    let result = workflow
        .assign(&mut session.ctx, &request)
        .await
        .map_err(report_failure)?;
    print_json(&result)
}
