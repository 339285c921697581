//! fleetgrid-workflow — assignment workflows over the assignment service.
//!
//! # Components
//!
//! - **`events`** — Synchronous publish/subscribe for workflow lifecycle events
//! - **`history`** — Undoable commands and the bounded undo stack
//! - **`selection`** — The set of machines an operator has picked
//! - **`conflict`** — Turning exclusivity conflicts into resolutions
//! - **`context`** — Event bus and history passed explicitly to controllers
//! - **`dispatch`** — Routing a mutation to the call matching its target
//! - **`progress`** — Operation progress records
//! - **`controller`** — validate → resolve conflicts → assign, plus image
//!   reassignment, migration and undo

pub mod conflict;
pub mod context;
pub mod controller;
pub mod dispatch;
pub mod events;
pub mod history;
pub mod progress;
pub mod selection;

pub use conflict::ConflictResolver;
pub use context::OrchestratorContext;
pub use controller::{
    AssignmentRequest, AssignmentWorkflowController, MigrationPlan, MigrationResult,
    WorkflowOptions, WorkflowResult, WorkflowStep,
};
pub use events::{EventBus, EventKind, SubscriptionId, WorkflowEvent};
pub use history::{
    AssignCloneCommand, AssignClusterCommand, Command, CommandHistory, ReassignImageCommand,
    command_for,
};
pub use progress::{OperationKind, OperationProgress, OperationStatus, ProgressCallback};
pub use selection::SelectionManager;
