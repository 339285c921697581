//! State shared by consecutive controller calls.

use fleet_core::FleetConfig;

use crate::events::EventBus;
use crate::history::CommandHistory;

/// Event bus and undo history, passed as `&mut` to each controller call.
#[derive(Debug, Default)]
pub struct OrchestratorContext {
    pub events: EventBus,
    pub history: CommandHistory,
}

impl OrchestratorContext {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            events: EventBus::new(),
            history: CommandHistory::new(history_capacity),
        }
    }

    pub fn from_config(config: &FleetConfig) -> Self {
        Self::new(config.history.capacity)
    }
}
