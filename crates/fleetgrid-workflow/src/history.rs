//! Undoable commands and the bounded undo stack.

use std::collections::VecDeque;

use tracing::{debug, info};

use fleet_core::{
    AssignmentService, AssignmentTarget, CloneTarget, MachineName, OperationResponse, ServiceError, ServiceFuture,
    ServiceResult,
};

/// Default number of commands kept for undo.
pub const DEFAULT_CAPACITY: usize = 50;

/// A completed mutation together with its inverse.
pub trait Command: Send + Sync {
    fn description(&self) -> String;

    fn can_undo(&self) -> bool {
        true
    }

    /// Machines whose state `execute` or `undo` changes.
    fn affected_machines(&self) -> Vec<MachineName>;

    fn execute<'a>(
        &'a self,
        service: &'a dyn AssignmentService,
    ) -> ServiceFuture<'a, OperationResponse>;

    fn undo<'a>(&'a self, service: &'a dyn AssignmentService) -> ServiceFuture<'a, OperationResponse>;
}

// ── Commands ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AssignClusterCommand {
    pub machines: Vec<MachineName>,
    pub cluster: String,
}

impl Command for AssignClusterCommand {
    fn description(&self) -> String {
        format!(
            "assign {} machine(s) to cluster {}",
            self.machines.len(),
            self.cluster
        )
    }

    fn affected_machines(&self) -> Vec<MachineName> {
        self.machines.clone()
    }

    fn execute<'a>(
        &'a self,
        service: &'a dyn AssignmentService,
    ) -> ServiceFuture<'a, OperationResponse> {
        service.assign_to_cluster(&self.machines, &self.cluster)
    }

    fn undo<'a>(&'a self, service: &'a dyn AssignmentService) -> ServiceFuture<'a, OperationResponse> {
        service.remove_from_cluster(&self.machines)
    }
}

#[derive(Debug, Clone)]
pub struct AssignCloneCommand {
    pub machines: Vec<MachineName>,
    pub clone: CloneTarget,
    pub team: String,
}

impl Command for AssignCloneCommand {
    fn description(&self) -> String {
        format!(
            "assign {} machine(s) to clone {}",
            self.machines.len(),
            self.clone.clone_name
        )
    }

    fn affected_machines(&self) -> Vec<MachineName> {
        self.machines.clone()
    }

    fn execute<'a>(
        &'a self,
        service: &'a dyn AssignmentService,
    ) -> ServiceFuture<'a, OperationResponse> {
        service.assign_to_clone(&self.machines, &self.clone, &self.team)
    }

    fn undo<'a>(&'a self, service: &'a dyn AssignmentService) -> ServiceFuture<'a, OperationResponse> {
        service.remove_from_clone(&self.machines, &self.clone, &self.team)
    }
}

/// The undo record for assigning `machines` to `target`.
///
/// Image targets have no assign command and yield `None`.
pub fn command_for(
    target: &AssignmentTarget,
    machines: Vec<MachineName>,
    team: &str,
) -> Option<Box<dyn Command>> {
    match target {
        AssignmentTarget::Cluster { name } => Some(Box::new(AssignClusterCommand {
            machines,
            cluster: name.clone(),
        })),
        AssignmentTarget::Clone(clone) => Some(Box::new(AssignCloneCommand {
            machines,
            clone: clone.clone(),
            team: team.to_string(),
        })),
        AssignmentTarget::Image { .. } => None,
    }
}

/// Moving an image; undo moves it back when the previous holder is known.
#[derive(Debug, Clone)]
pub struct ReassignImageCommand {
    pub image: String,
    pub pool: String,
    pub previous_machine: Option<MachineName>,
    pub new_machine: MachineName,
}

impl Command for ReassignImageCommand {
    fn description(&self) -> String {
        format!("reassign image {} to {}", self.image, self.new_machine)
    }

    fn can_undo(&self) -> bool {
        self.previous_machine.is_some()
    }

    fn affected_machines(&self) -> Vec<MachineName> {
        let mut machines = vec![self.new_machine.clone()];
        machines.extend(self.previous_machine.clone());
        machines
    }

    fn execute<'a>(
        &'a self,
        service: &'a dyn AssignmentService,
    ) -> ServiceFuture<'a, OperationResponse> {
        service.reassign_image(&self.image, &self.new_machine, &self.pool)
    }

    fn undo<'a>(&'a self, service: &'a dyn AssignmentService) -> ServiceFuture<'a, OperationResponse> {
        match &self.previous_machine {
            Some(previous) => service.reassign_image(&self.image, previous, &self.pool),
            None => Box::pin(async {
                Err::<OperationResponse, _>(ServiceError::rejected(
                    "previous image holder is unknown",
                ))
            }),
        }
    }
}

// ── History ────────────────────────────────────────────────────────

/// Bounded undo stack. The oldest command is evicted first.
pub struct CommandHistory {
    capacity: usize,
    entries: VecDeque<Box<dyn Command>>,
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl CommandHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, command: Box<dyn Command>) {
        if self.entries.len() == self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                debug!(command = %evicted.description(), "evicted oldest command");
            }
        }
        self.entries.push_back(command);
    }

    /// Pop the most recent command and run its inverse.
    ///
    /// Returns the affected machines, or `Ok(None)` when the history is
    /// empty or the command cannot be undone. The popped command is not
    /// restored if its inverse fails.
    pub async fn undo(
        &mut self,
        service: &dyn AssignmentService,
    ) -> ServiceResult<Option<Vec<MachineName>>> {
        let Some(command) = self.entries.pop_back() else {
            return Ok(None);
        };
        if !command.can_undo() {
            info!(command = %command.description(), "command cannot be undone");
            return Ok(None);
        }

        let response = command.undo(service).await?;
        if !response.success {
            return Err(ServiceError::Rejected {
                message: response.message_or("undo failed"),
                machines: response.failed_machines,
            });
        }
        info!(command = %command.description(), "undid command");
        Ok(Some(command.affected_machines()))
    }

    /// Descriptions, oldest first.
    pub fn descriptions(&self) -> Vec<String> {
        self.entries.iter().map(|c| c.description()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for CommandHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHistory")
            .field("capacity", &self.capacity)
            .field("entries", &self.descriptions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{Assignment, Machine};
    use fleetgrid_state::{MemoryAssignmentService, ServiceCall};

    fn cluster_command(machines: &[&str], cluster: &str) -> Box<dyn Command> {
        Box::new(AssignClusterCommand {
            machines: machines.iter().map(|s| s.to_string()).collect(),
            cluster: cluster.to_string(),
        })
    }

    #[tokio::test]
    async fn empty_history_undo_is_noop() {
        let service = MemoryAssignmentService::new();
        let mut history = CommandHistory::default();
        assert_eq!(history.undo(&service).await.unwrap(), None);
        assert!(service.calls().is_empty());
    }

    #[test]
    fn oldest_is_evicted_past_capacity() {
        let mut history = CommandHistory::new(50);
        for i in 0..51 {
            history.push(cluster_command(&["m1"], &format!("c{i}")));
        }
        assert_eq!(history.len(), 50);
        let descriptions = history.descriptions();
        assert_eq!(descriptions[0], "assign 1 machine(s) to cluster c1");
        assert_eq!(descriptions[49], "assign 1 machine(s) to cluster c50");
    }

    #[tokio::test]
    async fn undo_pops_most_recent() {
        let service = MemoryAssignmentService::with_machines([
            Machine::new("m1", "t").with_assignment(Assignment::Cluster { name: "a".into() }),
            Machine::new("m2", "t").with_assignment(Assignment::Cluster { name: "b".into() }),
        ]);
        let mut history = CommandHistory::default();
        history.push(cluster_command(&["m1"], "a"));
        history.push(cluster_command(&["m2"], "b"));

        let undone = history.undo(&service).await.unwrap();
        assert_eq!(undone, Some(vec!["m2".to_string()]));
        assert_eq!(
            service.calls(),
            vec![ServiceCall::RemoveFromCluster {
                machines: vec!["m2".into()]
            }]
        );
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn command_without_inverse_is_dropped() {
        let service = MemoryAssignmentService::new();
        let mut history = CommandHistory::default();
        history.push(Box::new(ReassignImageCommand {
            image: "img".into(),
            pool: "rbd".into(),
            previous_machine: None,
            new_machine: "m1".into(),
        }));
        assert_eq!(history.undo(&service).await.unwrap(), None);
        assert!(history.is_empty());
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_inverse_surfaces_error() {
        let service = MemoryAssignmentService::with_machines([Machine::new("m1", "t")]);
        let mut history = CommandHistory::default();
        history.push(cluster_command(&["m1"], "a"));
        let err = history.undo(&service).await.unwrap_err();
        assert_eq!(err.machines(), &["m1".to_string()][..]);
    }
}
