//! inventory.toml parser — seed data for the in-memory service.
//!
//! ```toml
//! team = "team-a"
//!
//! [[machines]]
//! name = "m1"
//!
//! [[machines]]
//! name = "m2"
//! assignment = { type = "cluster", name = "ceph-a" }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fleet_core::{Assignment, Machine, MachineName};

use crate::memory::MemoryAssignmentService;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("failed to read inventory: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse inventory: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("machine `{0}` is listed more than once")]
    Duplicate(MachineName),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryMachine {
    pub name: MachineName,
    /// Defaults to the inventory's team.
    pub team: Option<String>,
    #[serde(default)]
    pub assignment: Assignment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub team: String,
    #[serde(default)]
    pub machines: Vec<InventoryMachine>,
}

impl Inventory {
    pub fn from_file(path: &Path) -> Result<Self, InventoryError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, InventoryError> {
        let inventory: Inventory = toml::from_str(content)?;

        let mut seen = std::collections::HashSet::new();
        for machine in &inventory.machines {
            if !seen.insert(machine.name.as_str()) {
                return Err(InventoryError::Duplicate(machine.name.clone()));
            }
        }
        Ok(inventory)
    }

    /// Machine records with the team default applied.
    pub fn machines(&self) -> Vec<Machine> {
        self.machines
            .iter()
            .map(|m| Machine {
                name: m.name.clone(),
                team: m.team.clone().unwrap_or_else(|| self.team.clone()),
                assignment: m.assignment.clone(),
            })
            .collect()
    }

    /// Build a service holding exactly these machines.
    pub fn into_service(self) -> MemoryAssignmentService {
        MemoryAssignmentService::with_machines(self.machines())
    }
}
