use std::path::Path;

use anyhow::bail;

use fleet_core::MachineName;
use fleetgrid_bulk::BulkOptions;
use fleetgrid_workflow::SelectionManager;

use super::{Session, TargetArgs, print_json, report_failure};

/// Command-line adjustments to the configured batch policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub batch_size: Option<usize>,
    pub stop_on_first_error: bool,
    pub server_batched: bool,
}

pub async fn assign(
    config: Option<&Path>,
    inventory: &Path,
    machines: &[String],
    target: &TargetArgs,
    overrides: Overrides,
) -> anyhow::Result<()> {
    let mut session = Session::open(config, inventory)?;
    let target = target.resolve()?;

    let mut options = BulkOptions::from(&session.config);
    if let Some(size) = overrides.batch_size {
        options.assignment.batch_size = size;
    }
    options.assignment.stop_on_first_error |= overrides.stop_on_first_error;

    let selected = session.select(machines)?;
    let bulk = session.bulk(options);
    let result = if overrides.server_batched {
        let names: Vec<MachineName> = selected.into_iter().map(|m| m.name).collect();
        bulk.execute_server_batched_assignment(&mut session.ctx, &names, &target)
            .await
    } else {
        bulk.execute_bulk_assignment(&mut session.ctx, &selected, &target)
            .await
    }
    .map_err(report_failure)?;
    print_json(&result)
}

pub async fn remove(
    config: Option<&Path>,
    inventory: &Path,
    machines: &[String],
    target: &TargetArgs,
) -> anyhow::Result<()> {
    let mut session = Session::open(config, inventory)?;
    let target = target.resolve()?;

    // Without explicit names, select everything currently on the target.
    let expected = target.as_assignment();
    let names: Vec<MachineName> = if machines.is_empty() {
        session
            .roster
            .iter()
            .filter(|m| m.assignment == expected)
            .map(|m| m.name.clone())
            .collect()
    } else {
        session.select(machines)?.into_iter().map(|m| m.name).collect()
    };
    if names.is_empty() {
        bail!("no machines are assigned to {target}");
    }

    let mut selection = SelectionManager::new();
    selection.select_all(names);
    let bulk = session.bulk(BulkOptions::from(&session.config));
    let summary = bulk
        .execute_bulk_removal(&mut session.ctx, &mut selection, &target)
        .await
        .map_err(report_failure)?;
    print_json(&summary)
}
