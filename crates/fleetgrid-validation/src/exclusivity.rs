//! Exclusivity checker — the authoritative availability gate.
//!
//! Fresh cache entries answer directly; everything else goes to the
//! assignment service in a single batched call bounded by
//! `availability_timeout`. Machines the service does not resolve in time
//! (timeout, call error, or missing from the response) are reported
//! unavailable and are not cached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use fleet_core::{
    Assignment, AssignmentKind, AssignmentService, ConflictPayload, MachineAvailability,
    MachineName,
};

use crate::cache::{CacheConfig, CachedAvailability, ValidationCache};

/// Resource name used when a conflict payload cannot be understood.
const UNKNOWN_RESOURCE: &str = "Unknown";

/// A machine that is unavailable because it already holds an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConflict {
    pub machine_name: MachineName,
    pub current: Assignment,
}

/// Outcome of [`ExclusivityChecker::check_availability`]. Lists preserve
/// input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub available: Vec<MachineName>,
    pub unavailable: Vec<MachineName>,
    pub conflicts: Vec<MachineConflict>,
}

impl AvailabilityReport {
    pub fn all_available(&self) -> bool {
        self.unavailable.is_empty()
    }

    pub fn is_available(&self, machine: &str) -> bool {
        self.available.iter().any(|m| m == machine)
    }
}

/// Parse the structured conflict payload of an availability answer.
///
/// The assignment type is matched case-insensitively. Anything that does not
/// parse is reported as a cluster assignment on `Unknown`.
pub fn parse_conflict(payload: &str) -> Assignment {
    let Ok(parsed) = serde_json::from_str::<ConflictPayload>(payload) else {
        return unknown_conflict();
    };
    let kind = match parsed.assignment_type.to_ascii_lowercase().as_str() {
        "cluster" => AssignmentKind::Cluster,
        "image" => AssignmentKind::Image,
        "clone" => AssignmentKind::Clone,
        _ => return unknown_conflict(),
    };
    Assignment::of(kind, parsed.resource_name)
}

fn unknown_conflict() -> Assignment {
    Assignment::Cluster {
        name: UNKNOWN_RESOURCE.to_string(),
    }
}

fn to_cached(answer: &MachineAvailability) -> CachedAvailability {
    if answer.available {
        return CachedAvailability {
            available: true,
            conflict: None,
        };
    }
    let conflict = answer
        .conflict
        .as_deref()
        .map(parse_conflict)
        .unwrap_or_else(unknown_conflict);
    CachedAvailability {
        available: false,
        conflict: Some(conflict),
    }
}

pub struct ExclusivityChecker {
    service: Arc<dyn AssignmentService>,
    team: String,
    config: CacheConfig,
    cache: Mutex<ValidationCache>,
}

impl ExclusivityChecker {
    pub fn new(service: Arc<dyn AssignmentService>, team: impl Into<String>, config: CacheConfig) -> Self {
        let cache = Mutex::new(ValidationCache::new(config.ttl));
        Self {
            service,
            team: team.into(),
            config,
            cache,
        }
    }

    pub fn team(&self) -> &str {
        &self.team
    }

    /// Classify each machine as available or unavailable.
    pub async fn check_availability(&self, machines: &[MachineName]) -> AvailabilityReport {
        let mut resolved: HashMap<MachineName, CachedAvailability> = HashMap::new();
        let mut pending: Vec<MachineName> = Vec::new();

        {
            let mut cache = self.lock();
            for name in machines {
                match cache.get(&ValidationCache::key(&self.team, name)) {
                    Some(hit) => {
                        resolved.insert(name.clone(), hit);
                    }
                    None if !pending.contains(name) => pending.push(name.clone()),
                    None => {}
                }
            }
        }

        if !pending.is_empty() {
            for (name, answer) in self.query_remote(&pending).await {
                resolved.insert(name, answer);
            }
        }

        let mut report = AvailabilityReport::default();
        for name in machines {
            match resolved.get(name) {
                Some(answer) if answer.available => report.available.push(name.clone()),
                Some(answer) => {
                    report.unavailable.push(name.clone());
                    if let Some(current) = &answer.conflict {
                        report.conflicts.push(MachineConflict {
                            machine_name: name.clone(),
                            current: current.clone(),
                        });
                    }
                }
                None => report.unavailable.push(name.clone()),
            }
        }

        debug!(
            team = %self.team,
            available = report.available.len(),
            unavailable = report.unavailable.len(),
            "availability checked"
        );
        report
    }

    /// Ask the service about `pending` and write resolved answers through.
    async fn query_remote(&self, pending: &[MachineName]) -> Vec<(MachineName, CachedAvailability)> {
        let call = self.service.check_availability(pending);
        let answers = match tokio::time::timeout(self.config.availability_timeout, call).await {
            Ok(Ok(answers)) => answers,
            Ok(Err(e)) => {
                warn!(team = %self.team, machines = pending.len(), error = %e, "availability check failed, treating as unavailable");
                return Vec::new();
            }
            Err(_) => {
                warn!(
                    team = %self.team,
                    machines = pending.len(),
                    timeout_ms = self.config.availability_timeout.as_millis() as u64,
                    "availability check timed out, treating as unavailable"
                );
                return Vec::new();
            }
        };

        let mut resolved = Vec::with_capacity(answers.len());
        let mut cache = self.lock();
        for answer in answers {
            if !pending.contains(&answer.machine_name) {
                continue;
            }
            let cached = to_cached(&answer);
            cache.insert(
                ValidationCache::key(&self.team, &answer.machine_name),
                cached.clone(),
            );
            resolved.push((answer.machine_name, cached));
        }
        resolved
    }

    /// Drop cached answers for `machines`.
    pub fn invalidate(&self, machines: &[MachineName]) {
        let mut cache = self.lock();
        for name in machines {
            cache.remove(&ValidationCache::key(&self.team, name));
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, ValidationCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::Machine;
    use fleetgrid_state::{MemoryAssignmentService, ServiceCall};
    use std::time::Duration;

    fn names(list: &[&str]) -> Vec<MachineName> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn setup() -> (Arc<MemoryAssignmentService>, ExclusivityChecker) {
        let service = Arc::new(MemoryAssignmentService::with_machines([
            Machine::new("m1", "team-a"),
            Machine::new("m2", "team-a").with_assignment(Assignment::Clone {
                name: "c1".into(),
            }),
        ]));
        let checker = ExclusivityChecker::new(service.clone(), "team-a", CacheConfig::default());
        (service, checker)
    }

    fn availability_calls(service: &MemoryAssignmentService) -> usize {
        service
            .calls()
            .iter()
            .filter(|c| matches!(c, ServiceCall::CheckAvailability { .. }))
            .count()
    }

    #[test]
    fn parse_conflict_variants() {
        assert_eq!(
            parse_conflict(r#"{"assignment_type":"CLONE","resource_name":"c1"}"#),
            Assignment::Clone { name: "c1".into() }
        );
        assert_eq!(
            parse_conflict(r#"{"assignment_type":"image","resource_name":"img"}"#),
            Assignment::Image { name: "img".into() }
        );
        assert_eq!(
            parse_conflict("machine busy"),
            Assignment::Cluster { name: "Unknown".into() }
        );
        assert_eq!(
            parse_conflict(r#"{"assignment_type":"POOL","resource_name":"p"}"#),
            Assignment::Cluster { name: "Unknown".into() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn classifies_and_reports_conflicts() {
        let (_service, checker) = setup();
        let report = checker
            .check_availability(&names(&["m2", "m1", "ghost"]))
            .await;
        assert_eq!(report.available, names(&["m1"]));
        assert_eq!(report.unavailable, names(&["m2", "ghost"]));
        assert_eq!(
            report.conflicts,
            vec![MachineConflict {
                machine_name: "m2".into(),
                current: Assignment::Clone { name: "c1".into() },
            }]
        );
        // ghost was not resolved, so it is not cached.
        assert_eq!(checker.cached_entries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_entries_skip_the_service() {
        let (service, checker) = setup();
        checker.check_availability(&names(&["m1"])).await;
        tokio::time::advance(Duration::from_secs(10)).await;
        checker.check_availability(&names(&["m1"])).await;
        assert_eq!(availability_calls(&service), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entries_trigger_a_fresh_check() {
        let (service, checker) = setup();
        checker.check_availability(&names(&["m1"])).await;

        service.put_machine(Machine::new("m1", "team-a").with_assignment(Assignment::Cluster {
            name: "ceph-a".into(),
        }));
        tokio::time::advance(Duration::from_millis(30_001)).await;

        let report = checker.check_availability(&names(&["m1"])).await;
        assert_eq!(availability_calls(&service), 2);
        assert_eq!(report.unavailable, names(&["m1"]));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_service_fails_closed_within_timeout() {
        let (service, checker) = setup();
        service.hang_availability(true);

        let started = tokio::time::Instant::now();
        let report = checker.check_availability(&names(&["m1", "m2"])).await;

        assert!(started.elapsed() <= Duration::from_millis(5_000));
        assert!(report.available.is_empty());
        assert_eq!(report.unavailable, names(&["m1", "m2"]));
        assert!(report.conflicts.is_empty());
        assert_eq!(checker.cached_entries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_recheck() {
        let (service, checker) = setup();
        checker.check_availability(&names(&["m1"])).await;
        checker.invalidate(&names(&["m1"]));
        checker.check_availability(&names(&["m1"])).await;
        assert_eq!(availability_calls(&service), 2);
    }
}
