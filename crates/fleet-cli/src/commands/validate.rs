use std::path::Path;

use anyhow::Context;

use fleetgrid_bulk::BulkOptions;
use fleetgrid_validation::{BulkRuleOptions, DebouncedValidator};

use super::{Session, TargetArgs, print_json};

pub async fn run(
    config: Option<&Path>,
    inventory: &Path,
    machines: &[String],
    target: &TargetArgs,
    local: bool,
) -> anyhow::Result<()> {
    let session = Session::open(config, inventory)?;
    let target = target.resolve()?;
    let selected = session.select(machines)?;

    let validation = if local {
        let rules = BulkRuleOptions {
            team: Some(session.team().to_string()),
            skip_warnings: false,
        };
        DebouncedValidator::with_options(session.config.validation.debounce_window(), rules)
            .validate_bulk(&selected, target.kind())
            .await
            .context("validation was superseded")?
    } else {
        session
            .bulk(BulkOptions::from(&session.config))
            .validate_machines(&selected, target.kind())
            .await?
    };
    print_json(&validation)
}
