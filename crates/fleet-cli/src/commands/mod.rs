//! Subcommand implementations and the session they share.
//!
//! Every invocation loads `fleet.toml` (or the defaults) and seeds an
//! in-memory assignment service from the inventory file. State does not
//! outlive the process.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use clap::Args;
use serde::Serialize;
use tracing::{debug, info};

use fleet_core::{AssignmentTarget, CloneTarget, FleetConfig, Machine, OrchestratorError};
use fleetgrid_bulk::{BulkOperationsController, BulkOptions};
use fleetgrid_state::{Inventory, MemoryAssignmentService};
use fleetgrid_validation::{CacheConfig, ExclusivityChecker};
use fleetgrid_workflow::{AssignmentWorkflowController, OrchestratorContext, WorkflowOptions};

pub mod assign;
pub mod bulk;
pub mod image;
pub mod migrate;
pub mod validate;

/// Where machines go: a cluster, a clone, or an image.
#[derive(Debug, Clone, Default, Args)]
pub struct TargetArgs {
    /// Cluster name
    #[arg(long)]
    pub cluster: Option<String>,
    /// Clone name (with --pool, --image and --snapshot)
    #[arg(long = "clone")]
    pub clone_name: Option<String>,
    /// Storage pool
    #[arg(long)]
    pub pool: Option<String>,
    /// Image name
    #[arg(long)]
    pub image: Option<String>,
    /// Snapshot the clone is taken from
    #[arg(long)]
    pub snapshot: Option<String>,
}

impl TargetArgs {
    pub fn resolve(&self) -> anyhow::Result<AssignmentTarget> {
        match (&self.cluster, &self.clone_name) {
            (Some(_), Some(_)) => bail!("--cluster and --clone are mutually exclusive"),
            (Some(cluster), None) => Ok(AssignmentTarget::cluster(cluster)),
            (None, Some(clone)) => Ok(AssignmentTarget::Clone(CloneTarget {
                clone_name: clone.clone(),
                pool_name: self.pool.clone().unwrap_or_default(),
                image_name: self.image.clone().unwrap_or_default(),
                snapshot_name: self.snapshot.clone().unwrap_or_default(),
            })),
            (None, None) => match (&self.image, &self.pool) {
                (Some(image), Some(pool)) => Ok(AssignmentTarget::Image {
                    name: image.clone(),
                    pool: pool.clone(),
                }),
                _ => bail!("a target is required: --cluster, --clone, or --image with --pool"),
            },
        }
    }
}

pub struct Session {
    pub config: FleetConfig,
    pub roster: Vec<Machine>,
    pub service: Arc<MemoryAssignmentService>,
    pub checker: Arc<ExclusivityChecker>,
    pub ctx: OrchestratorContext,
}

impl Session {
    pub fn open(config: Option<&Path>, inventory: &Path) -> anyhow::Result<Self> {
        let config = load_config(config)?;
        let inventory = Inventory::from_file(inventory)
            .with_context(|| format!("loading inventory {}", inventory.display()))?;

        let team = inventory.team.clone();
        let roster = inventory.machines();
        info!(%team, machines = roster.len(), "inventory loaded");

        let service = Arc::new(inventory.into_service());
        let checker = Arc::new(ExclusivityChecker::new(
            service.clone(),
            team,
            CacheConfig::from(&config.validation),
        ));
        let mut ctx = OrchestratorContext::from_config(&config);
        ctx.events.subscribe(|event| {
            debug!(kind = ?event.kind, workflow = %event.workflow_id, data = %event.data, "event");
        });

        Ok(Self {
            config,
            roster,
            service,
            checker,
            ctx,
        })
    }

    pub fn team(&self) -> &str {
        self.checker.team()
    }

    /// Inventory records for `names`, or the whole inventory when empty.
    pub fn select(&self, names: &[String]) -> anyhow::Result<Vec<Machine>> {
        if names.is_empty() {
            return Ok(self.roster.clone());
        }
        names
            .iter()
            .map(|name| {
                self.roster
                    .iter()
                    .find(|m| &m.name == name)
                    .cloned()
                    .ok_or_else(|| anyhow!("machine `{name}` is not in the inventory"))
            })
            .collect()
    }

    pub fn workflow(&self, options: WorkflowOptions) -> AssignmentWorkflowController {
        AssignmentWorkflowController::new(self.service.clone(), self.checker.clone(), options)
    }

    pub fn bulk(&self, options: BulkOptions) -> BulkOperationsController {
        BulkOperationsController::new(self.service.clone(), self.checker.clone(), options)
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FleetConfig> {
    match path {
        Some(path) => FleetConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(FleetConfig::default()),
    }
}

pub fn show_config(path: Option<&Path>) -> anyhow::Result<()> {
    print!("{}", load_config(path)?.to_toml_string()?);
    Ok(())
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print whatever detail an orchestration error carries, then hand it back.
pub fn report_failure(err: OrchestratorError) -> anyhow::Error {
    let detail = match &err {
        OrchestratorError::Workflow { payload, .. } if !payload.is_null() => {
            serde_json::to_string_pretty(payload).ok()
        }
        OrchestratorError::Validation { results, .. } if !results.is_empty() => {
            serde_json::to_string_pretty(results).ok()
        }
        OrchestratorError::Conflict { conflicts, .. } => serde_json::to_string_pretty(conflicts).ok(),
        _ => None,
    };
    if let Some(detail) = detail {
        println!("{detail}");
    }
    err.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const INVENTORY: &str = r#"
team = "team-a"

[[machines]]
name = "m1"

[[machines]]
name = "m2"
assignment = { type = "cluster", name = "ceph-a" }
"#;

    fn inventory_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(INVENTORY.as_bytes()).unwrap();
        file
    }

    #[test]
    fn target_resolution() {
        let cluster = TargetArgs {
            cluster: Some("ceph-a".into()),
            ..Default::default()
        };
        assert_eq!(cluster.resolve().unwrap(), AssignmentTarget::cluster("ceph-a"));

        let image = TargetArgs {
            image: Some("img".into()),
            pool: Some("rbd".into()),
            ..Default::default()
        };
        assert!(matches!(image.resolve().unwrap(), AssignmentTarget::Image { .. }));

        let both = TargetArgs {
            cluster: Some("a".into()),
            clone_name: Some("c".into()),
            ..Default::default()
        };
        assert!(both.resolve().is_err());
        assert!(TargetArgs::default().resolve().is_err());
    }

    #[test]
    fn session_selects_from_inventory() {
        let file = inventory_file();
        let session = Session::open(None, file.path()).unwrap();
        assert_eq!(session.team(), "team-a");
        assert_eq!(session.select(&[]).unwrap().len(), 2);

        let picked = session.select(&["m2".to_string()]).unwrap();
        assert!(picked[0].assignment.is_assigned());
        assert!(session.select(&["m9".to_string()]).is_err());
    }

    #[test]
    fn config_file_overrides_defaults() {
        let mut config = tempfile::NamedTempFile::new().unwrap();
        config
            .write_all(b"[history]\ncapacity = 5\n")
            .unwrap();
        let file = inventory_file();
        let session = Session::open(Some(config.path()), file.path()).unwrap();
        assert_eq!(session.config.history.capacity, 5);
        assert_eq!(session.ctx.history.capacity(), 5);
    }
}
