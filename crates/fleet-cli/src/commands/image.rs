use std::path::Path;

use fleetgrid_workflow::WorkflowOptions;

use super::{Session, print_json, report_failure};

pub async fn run(
    config: Option<&Path>,
    inventory: &Path,
    image: &str,
    pool: &str,
    to: &str,
    from: Option<&str>,
) -> anyhow::Result<()> {
    let mut session = Session::open(config, inventory)?;
    let workflow = session.workflow(WorkflowOptions::from(&session.config.workflow));
    let result = workflow
        .reassign_image(&mut session.ctx, image, from, to, pool)
        .await
        .map_err(report_failure)?;
    print_json(&result)
}
