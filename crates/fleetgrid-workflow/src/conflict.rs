//! Conflict resolver — one resolution per conflict, in order.
//!
//! | strategy | current assignment | outcome |
//! |---|---|---|
//! | `skip_conflicts` | any | skip, unresolved |
//! | `force_reassign` | cluster | remove from cluster, then force |
//! | `force_reassign` | image / clone | skip with an explanation |
//! | `fail_fast` | any | `OrchestratorError::Conflict` |

use std::sync::Arc;

use tracing::{info, warn};

use fleet_core::{
    Assignment, AssignmentConflict, AssignmentService, ConflictAction, ConflictResolution,
    ConflictStrategy, OrchestratorError, OrchestratorResult,
};

pub struct ConflictResolver {
    service: Arc<dyn AssignmentService>,
}

impl ConflictResolver {
    pub fn new(service: Arc<dyn AssignmentService>) -> Self {
        Self { service }
    }

    pub async fn resolve(
        &self,
        conflicts: &[AssignmentConflict],
        strategy: ConflictStrategy,
    ) -> OrchestratorResult<Vec<ConflictResolution>> {
        if strategy == ConflictStrategy::FailFast && !conflicts.is_empty() {
            return Err(OrchestratorError::Conflict {
                message: format!("{} machine(s) are already assigned", conflicts.len()),
                conflicts: conflicts.to_vec(),
                strategy,
            });
        }

        let mut resolutions = Vec::with_capacity(conflicts.len());
        for conflict in conflicts {
            let resolution = match strategy {
                ConflictStrategy::ForceReassign => self.force(conflict).await,
                _ => skip(conflict, None),
            };
            resolutions.push(resolution);
        }
        Ok(resolutions)
    }

    async fn force(&self, conflict: &AssignmentConflict) -> ConflictResolution {
        let machine = &conflict.machine_name;
        match &conflict.current {
            Assignment::None => resolved(conflict),
            Assignment::Cluster { name } => {
                let machines = vec![machine.clone()];
                match self.service.remove_from_cluster(&machines).await {
                    Ok(resp) if resp.success => {
                        info!(%machine, cluster = %name, "removed machine for forced reassignment");
                        resolved(conflict)
                    }
                    Ok(resp) => {
                        let error = resp.message_or("removal failed");
                        warn!(%machine, cluster = %name, %error, "forced removal rejected");
                        skip(conflict, Some(error))
                    }
                    Err(e) => {
                        warn!(%machine, cluster = %name, error = %e, "forced removal failed");
                        skip(conflict, Some(e.to_string()))
                    }
                }
            }
            current => skip(
                conflict,
                Some(format!(
                    "cannot force reassignment away from {current}; release it there first"
                )),
            ),
        }
    }
}

fn resolved(conflict: &AssignmentConflict) -> ConflictResolution {
    ConflictResolution {
        conflict: conflict.clone(),
        action: ConflictAction::Force,
        resolved: true,
        error: None,
    }
}

fn skip(conflict: &AssignmentConflict, error: Option<String>) -> ConflictResolution {
    ConflictResolution {
        conflict: conflict.clone(),
        action: ConflictAction::Skip,
        resolved: false,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{AssignmentTarget, Machine};
    use fleetgrid_state::{MemoryAssignmentService, ServiceCall};

    fn conflict(machine: &str, current: Assignment) -> AssignmentConflict {
        AssignmentConflict {
            machine_name: machine.into(),
            current,
            target: AssignmentTarget::cluster("ceph-b"),
        }
    }

    fn setup() -> (Arc<MemoryAssignmentService>, ConflictResolver, Vec<AssignmentConflict>) {
        let in_a = Assignment::Cluster { name: "ceph-a".into() };
        let in_clone = Assignment::Clone { name: "c1".into() };
        let service = Arc::new(MemoryAssignmentService::with_machines([
            Machine::new("m1", "t").with_assignment(in_a.clone()),
            Machine::new("m2", "t").with_assignment(in_clone.clone()),
        ]));
        let resolver = ConflictResolver::new(service.clone());
        let conflicts = vec![conflict("m1", in_a), conflict("m2", in_clone)];
        (service, resolver, conflicts)
    }

    #[tokio::test]
    async fn skip_leaves_everything_unresolved() {
        let (service, resolver, conflicts) = setup();
        let resolutions = resolver
            .resolve(&conflicts, ConflictStrategy::SkipConflicts)
            .await
            .unwrap();
        assert!(resolutions.iter().all(|r| !r.resolved && r.action == ConflictAction::Skip));
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn fail_fast_raises_without_mutation() {
        let (service, resolver, conflicts) = setup();
        let err = resolver
            .resolve(&conflicts, ConflictStrategy::FailFast)
            .await
            .unwrap_err();
        match err {
            OrchestratorError::Conflict {
                conflicts: found,
                strategy,
                ..
            } => {
                assert_eq!(found.len(), 2);
                assert_eq!(strategy, ConflictStrategy::FailFast);
            }
            other => panic!("expected conflict error, got {other:?}"),
        }
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn force_removes_cluster_and_downgrades_clone() {
        let (service, resolver, conflicts) = setup();
        let resolutions = resolver
            .resolve(&conflicts, ConflictStrategy::ForceReassign)
            .await
            .unwrap();

        assert!(resolutions[0].resolved);
        assert_eq!(resolutions[0].action, ConflictAction::Force);
        assert!(!resolutions[1].resolved);
        assert_eq!(resolutions[1].action, ConflictAction::Skip);
        assert!(resolutions[1].error.as_deref().unwrap().contains("clone: c1"));

        assert_eq!(
            service.calls(),
            vec![ServiceCall::RemoveFromCluster {
                machines: vec!["m1".into()]
            }]
        );
        assert!(!service.assignment_of("m1").is_assigned());
    }

    #[tokio::test]
    async fn failed_removal_downgrades_to_skip() {
        let (service, resolver, conflicts) = setup();
        service.fail_removals(true);
        let resolutions = resolver
            .resolve(&conflicts[..1], ConflictStrategy::ForceReassign)
            .await
            .unwrap();
        assert!(!resolutions[0].resolved);
        assert_eq!(resolutions[0].action, ConflictAction::Skip);
        assert!(resolutions[0].error.is_some());
    }
}
