//! MemoryAssignmentService — `AssignmentService` backed by a `BTreeMap`.
//!
//! Assignment rules mirror the remote service: a machine holds at most one
//! assignment, assigning an already-assigned machine fails for that machine,
//! and removing a machine that is not on the named resource fails for that
//! machine.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use fleet_core::*;

/// Machines processed per server-side batch in `batch_machine_operation`.
const SERVER_BATCH_SIZE: usize = 10;

/// A call received by the service, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    AssignToCluster {
        machines: Vec<MachineName>,
        cluster: String,
    },
    RemoveFromCluster {
        machines: Vec<MachineName>,
    },
    AssignToClone {
        machines: Vec<MachineName>,
        clone: String,
    },
    RemoveFromClone {
        machines: Vec<MachineName>,
        clone: String,
    },
    ReassignImage {
        image: String,
        new_machine: MachineName,
        pool: String,
    },
    CheckAvailability {
        machines: Vec<MachineName>,
    },
    BatchValidate {
        machines: Vec<MachineName>,
        kind: AssignmentKind,
    },
    BatchOperation {
        kind: BatchOperationKind,
        machines: Vec<MachineName>,
    },
}

impl ServiceCall {
    /// True for calls that change assignment state.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            ServiceCall::CheckAvailability { .. } | ServiceCall::BatchValidate { .. }
        )
    }
}

/// Injected failure modes.
#[derive(Debug, Default)]
struct Faults {
    /// Number of upcoming assign calls that error outright.
    failing_assigns: u32,
    /// Clusters that reject every assignment.
    rejecting_clusters: HashSet<String>,
    /// Machines every assign call reports as failed.
    rejected_machines: HashSet<MachineName>,
    /// Assign calls touching any of these machines error outright.
    unreachable_machines: HashSet<MachineName>,
    /// Removal calls error outright.
    failing_removals: bool,
    /// Availability checks error outright.
    failing_availability: bool,
    /// Availability checks never complete.
    hang_availability: bool,
    /// Latency added to every availability check.
    availability_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct Inner {
    machines: BTreeMap<MachineName, Machine>,
    calls: Vec<ServiceCall>,
    faults: Faults,
}

/// In-memory assignment service.
#[derive(Debug, Default)]
pub struct MemoryAssignmentService {
    inner: Mutex<Inner>,
}

impl MemoryAssignmentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the service with machine records.
    pub fn with_machines(machines: impl IntoIterator<Item = Machine>) -> Self {
        let service = Self::new();
        for machine in machines {
            service.put_machine(machine);
        }
        service
    }

    /// Insert or replace a machine record.
    pub fn put_machine(&self, machine: Machine) {
        self.lock().machines.insert(machine.name.clone(), machine);
    }

    pub fn machine(&self, name: &str) -> Option<Machine> {
        self.lock().machines.get(name).cloned()
    }

    /// All machine records, ordered by name.
    pub fn machines(&self) -> Vec<Machine> {
        self.lock().machines.values().cloned().collect()
    }

    pub fn assignment_of(&self, name: &str) -> Assignment {
        self.machine(name).map(|m| m.assignment).unwrap_or_default()
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.lock().calls.clone()
    }

    /// Calls that changed (or tried to change) assignment state.
    pub fn mutations(&self) -> Vec<ServiceCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    // ── Fault injection ────────────────────────────────────────────

    /// Make the next `count` assign calls fail with `ServiceError::Unavailable`.
    pub fn fail_next_assigns(&self, count: u32) {
        self.lock().faults.failing_assigns = count;
    }

    /// Make every assignment to `cluster` report all machines as failed.
    pub fn reject_cluster(&self, cluster: &str) {
        self.lock()
            .faults
            .rejecting_clusters
            .insert(cluster.to_string());
    }

    /// Make every assign call report `machines` as failed.
    pub fn reject_machines<I, S>(&self, machines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.lock();
        inner
            .faults
            .rejected_machines
            .extend(machines.into_iter().map(Into::into));
    }

    /// Make every assign call that includes one of `machines` fail with
    /// `ServiceError::Unavailable`.
    pub fn unreachable_machines<I, S>(&self, machines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.lock();
        inner
            .faults
            .unreachable_machines
            .extend(machines.into_iter().map(Into::into));
    }

    pub fn fail_removals(&self, fail: bool) {
        self.lock().faults.failing_removals = fail;
    }

    /// Make availability checks fail with `ServiceError::Unavailable`.
    pub fn fail_availability(&self, fail: bool) {
        self.lock().faults.failing_availability = fail;
    }

    pub fn hang_availability(&self, hang: bool) {
        self.lock().faults.hang_availability = hang;
    }

    pub fn delay_availability(&self, delay: Duration) {
        self.lock().faults.availability_delay = Some(delay);
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: ServiceCall) {
        self.lock().calls.push(call);
    }

    /// Consume one injected assign failure, if any are pending.
    fn take_assign_failure(&self, machines: &[MachineName]) -> bool {
        let mut inner = self.lock();
        if machines
            .iter()
            .any(|m| inner.faults.unreachable_machines.contains(m))
        {
            return true;
        }
        if inner.faults.failing_assigns > 0 {
            inner.faults.failing_assigns -= 1;
            return true;
        }
        false
    }

    /// Assign each machine to `target`, collecting per-machine failures.
    fn assign_all(&self, machines: &[MachineName], target: Assignment) -> OperationResponse {
        let mut inner = self.lock();

        if let Assignment::Cluster { name } = &target {
            if inner.faults.rejecting_clusters.contains(name) {
                return OperationResponse::failed(
                    format!("cluster {name} rejected the assignment"),
                    machines.to_vec(),
                );
            }
        }

        let mut failed = Vec::new();
        for name in machines {
            if inner.faults.rejected_machines.contains(name) {
                failed.push(name.clone());
                continue;
            }
            match inner.machines.get_mut(name) {
                Some(machine) if !machine.assignment.is_assigned() => {
                    machine.assignment = target.clone();
                }
                _ => failed.push(name.clone()),
            }
        }

        debug!(assignment = %target, requested = machines.len(), failed = failed.len(), "assign processed");
        response_for(failed, "some machines could not be assigned")
    }

    /// Clear each machine's assignment if it currently matches `expected`.
    fn remove_all(
        &self,
        machines: &[MachineName],
        expected: impl Fn(&Assignment) -> bool,
    ) -> ServiceResult<OperationResponse> {
        let mut inner = self.lock();
        if inner.faults.failing_removals {
            return Err(ServiceError::Unavailable("removal failed".to_string()));
        }

        let mut failed = Vec::new();
        for name in machines {
            match inner.machines.get_mut(name) {
                Some(machine) if expected(&machine.assignment) => {
                    machine.assignment = Assignment::None;
                }
                _ => failed.push(name.clone()),
            }
        }
        Ok(response_for(failed, "some machines could not be removed"))
    }

    fn availability(&self, machines: &[MachineName]) -> ServiceResult<Vec<MachineAvailability>> {
        let inner = self.lock();
        machines
            .iter()
            .filter_map(|name| inner.machines.get(name))
            .map(|machine| {
                Ok(MachineAvailability {
                    machine_name: machine.name.clone(),
                    available: !machine.assignment.is_assigned(),
                    conflict: conflict_payload(&machine.assignment)?,
                })
            })
            .collect()
    }

    fn hang_or_delay(&self) -> (bool, Option<Duration>) {
        let inner = self.lock();
        (
            inner.faults.hang_availability,
            inner.faults.availability_delay,
        )
    }
}

fn response_for(failed: Vec<MachineName>, message: &str) -> OperationResponse {
    if failed.is_empty() {
        OperationResponse::ok()
    } else {
        OperationResponse::failed(message, failed)
    }
}

fn conflict_payload(assignment: &Assignment) -> serde_json::Result<Option<String>> {
    match (assignment.kind(), assignment.resource()) {
        (Some(kind), Some(resource)) => ConflictPayload::new(kind, resource).to_json().map(Some),
        _ => Ok(None),
    }
}

impl AssignmentService for MemoryAssignmentService {
    fn assign_to_cluster<'a>(
        &'a self,
        machines: &'a [MachineName],
        cluster: &'a str,
    ) -> ServiceFuture<'a, OperationResponse> {
        Box::pin(async move {
            self.record(ServiceCall::AssignToCluster {
                machines: machines.to_vec(),
                cluster: cluster.to_string(),
            });
            if self.take_assign_failure(machines) {
                return Err(ServiceError::Unavailable("injected assign failure".to_string()));
            }
            Ok(self.assign_all(machines, Assignment::Cluster {
                name: cluster.to_string(),
            }))
        })
    }

    fn remove_from_cluster<'a>(
        &'a self,
        machines: &'a [MachineName],
    ) -> ServiceFuture<'a, OperationResponse> {
        Box::pin(async move {
            self.record(ServiceCall::RemoveFromCluster {
                machines: machines.to_vec(),
            });
            self.remove_all(machines, |a| matches!(a, Assignment::Cluster { .. }))
        })
    }

    fn assign_to_clone<'a>(
        &'a self,
        machines: &'a [MachineName],
        clone: &'a CloneTarget,
        _team: &'a str,
    ) -> ServiceFuture<'a, OperationResponse> {
        Box::pin(async move {
            self.record(ServiceCall::AssignToClone {
                machines: machines.to_vec(),
                clone: clone.clone_name.clone(),
            });
            if self.take_assign_failure(machines) {
                return Err(ServiceError::Unavailable("injected assign failure".to_string()));
            }
            Ok(self.assign_all(machines, Assignment::Clone {
                name: clone.clone_name.clone(),
            }))
        })
    }

    fn remove_from_clone<'a>(
        &'a self,
        machines: &'a [MachineName],
        clone: &'a CloneTarget,
        _team: &'a str,
    ) -> ServiceFuture<'a, OperationResponse> {
        Box::pin(async move {
            self.record(ServiceCall::RemoveFromClone {
                machines: machines.to_vec(),
                clone: clone.clone_name.clone(),
            });
            self.remove_all(machines, |a| {
                matches!(a, Assignment::Clone { name } if *name == clone.clone_name)
            })
        })
    }

    fn reassign_image<'a>(
        &'a self,
        image: &'a str,
        new_machine: &'a str,
        pool: &'a str,
    ) -> ServiceFuture<'a, OperationResponse> {
        Box::pin(async move {
            self.record(ServiceCall::ReassignImage {
                image: image.to_string(),
                new_machine: new_machine.to_string(),
                pool: pool.to_string(),
            });

            let mut inner = self.lock();
            let holds_image = |a: &Assignment| matches!(a, Assignment::Image { name } if name == image);

            let target_ok = match inner.machines.get(new_machine) {
                Some(m) => !m.assignment.is_assigned() || holds_image(&m.assignment),
                None => false,
            };
            if !target_ok {
                return Ok(OperationResponse::failed(
                    format!("machine {new_machine} cannot host image {image}"),
                    vec![new_machine.to_string()],
                ));
            }

            for machine in inner.machines.values_mut() {
                if holds_image(&machine.assignment) {
                    machine.assignment = Assignment::None;
                }
            }
            if let Some(machine) = inner.machines.get_mut(new_machine) {
                machine.assignment = Assignment::Image {
                    name: image.to_string(),
                };
            }
            Ok(OperationResponse::ok())
        })
    }

    fn check_availability<'a>(
        &'a self,
        machines: &'a [MachineName],
    ) -> ServiceFuture<'a, Vec<MachineAvailability>> {
        Box::pin(async move {
            self.record(ServiceCall::CheckAvailability {
                machines: machines.to_vec(),
            });

            if self.lock().faults.failing_availability {
                return Err(ServiceError::Unavailable(
                    "availability check failed".to_string(),
                ));
            }
            let (hang, delay) = self.hang_or_delay();
            if hang {
                std::future::pending::<()>().await;
            }
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.availability(machines)
        })
    }

    fn batch_validate_machines<'a>(
        &'a self,
        machines: &'a [Machine],
        kind: AssignmentKind,
    ) -> ServiceFuture<'a, BatchValidationResponse> {
        Box::pin(async move {
            self.record(ServiceCall::BatchValidate {
                machines: machines.iter().map(|m| m.name.clone()).collect(),
                kind,
            });

            let inner = self.lock();
            let mut response = BatchValidationResponse::default();
            for machine in machines {
                match inner.machines.get(&machine.name) {
                    None => response.invalid.push(FailedItem {
                        item: machine.clone(),
                        error: "Machine not found".to_string(),
                    }),
                    Some(current) if current.assignment.is_assigned() => {
                        response.invalid.push(FailedItem {
                            item: machine.clone(),
                            error: format!(
                                "Machine is already assigned to {}",
                                current.assignment
                            ),
                        })
                    }
                    Some(_) => response.valid.push(machine.clone()),
                }
            }
            Ok(response)
        })
    }

    fn batch_machine_operation<'a>(
        &'a self,
        kind: BatchOperationKind,
        machines: &'a [MachineName],
        target: &'a AssignmentTarget,
        on_progress: &'a ProgressFn<'a>,
    ) -> ServiceFuture<'a, BatchOperationResponse> {
        Box::pin(async move {
            self.record(ServiceCall::BatchOperation {
                kind,
                machines: machines.to_vec(),
            });

            let total = machines.len();
            let total_batches = total.div_ceil(SERVER_BATCH_SIZE) as u32;
            let mut response = BatchOperationResponse::default();

            for (index, chunk) in machines.chunks(SERVER_BATCH_SIZE).enumerate() {
                let outcome = match kind {
                    BatchOperationKind::Assign => {
                        self.assign_all(chunk, target.as_assignment())
                    }
                    BatchOperationKind::Remove => {
                        let expected = target.as_assignment();
                        self.remove_all(chunk, |a| *a == expected)?
                    }
                };

                for name in chunk {
                    if outcome.failed_machines.contains(name) {
                        response.failed.push(FailedItem {
                            item: name.clone(),
                            error: outcome.message_or("operation failed"),
                        });
                    } else {
                        response.successful.push(name.clone());
                    }
                }

                let completed = response.successful.len() + response.failed.len();
                on_progress(BatchProgress {
                    current_batch: index as u32 + 1,
                    total_batches,
                    completed,
                    total,
                    percentage: completed as f64 * 100.0 / total as f64,
                });
            }
            Ok(response)
        })
    }
}
