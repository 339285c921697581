//! Workflow event bus.
//!
//! Handlers run synchronously on `emit`, in registration order. Nothing is
//! buffered: a handler subscribed after an event was emitted never sees it.

use serde::{Deserialize, Serialize};

use fleet_core::time::epoch_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    ValidationCompleted,
    StepCompleted,
    StepFailed,
    ConflictDetected,
    ProgressUpdate,
    RollbackStarted,
    RollbackCompleted,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub kind: EventKind,
    pub workflow_id: String,
    pub timestamp_ms: u64,
    pub data: serde_json::Value,
}

pub type SubscriptionId = u64;

type Handler = Box<dyn Fn(&WorkflowEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    next_id: SubscriptionId,
    handlers: Vec<(SubscriptionId, Handler)>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: Fn(&WorkflowEvent) + Send + Sync + 'static,
    {
        self.next_id += 1;
        self.handlers.push((self.next_id, Box::new(handler)));
        self.next_id
    }

    /// Returns false when `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(sub, _)| *sub != id);
        self.handlers.len() != before
    }

    pub fn emit(&self, kind: EventKind, workflow_id: &str, data: serde_json::Value) {
        let event = WorkflowEvent {
            kind,
            workflow_id: workflow_id.to_string(),
            timestamp_ms: epoch_millis(),
            data,
        };
        for (_, handler) in &self.handlers {
            handler(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.handlers.len())
            .finish()
    }
}
