//! Debounced validator.
//!
//! Each call takes a ticket and waits out the window. When it wakes, it
//! runs only if no later call took a ticket in the meantime; otherwise it
//! resolves to `None` without doing anything. Single-machine and bulk
//! validation debounce independently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::debug;

use fleet_core::{AssignmentKind, BulkValidation, Machine, ValidationResult, ValidationSettings};

use crate::rules::{self, BulkRuleOptions};

pub struct DebouncedValidator {
    window: Duration,
    options: BulkRuleOptions,
    machine_ticket: AtomicU64,
    bulk_ticket: AtomicU64,
}

impl DebouncedValidator {
    pub fn new(window: Duration) -> Self {
        Self::with_options(window, BulkRuleOptions::default())
    }

    pub fn with_options(window: Duration, options: BulkRuleOptions) -> Self {
        Self {
            window,
            options,
            machine_ticket: AtomicU64::new(0),
            bulk_ticket: AtomicU64::new(0),
        }
    }

    pub fn from_settings(settings: &ValidationSettings) -> Self {
        Self::new(settings.debounce_window())
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Validate one machine, unless superseded within the window.
    pub async fn validate_machine(
        &self,
        machine: &Machine,
        target_kind: AssignmentKind,
    ) -> Option<ValidationResult> {
        if !wait_for_turn(&self.machine_ticket, self.window).await {
            debug!(machine = %machine.name, "machine validation superseded");
            return None;
        }
        Some(rules::validate_for_kind(machine, target_kind))
    }

    /// Validate many machines, unless superseded within the window.
    pub async fn validate_bulk(
        &self,
        machines: &[Machine],
        target_kind: AssignmentKind,
    ) -> Option<BulkValidation> {
        if !wait_for_turn(&self.bulk_ticket, self.window).await {
            debug!(machines = machines.len(), "bulk validation superseded");
            return None;
        }
        Some(rules::validate_bulk(machines, target_kind, &self.options))
    }

    /// Abandon every pending call.
    pub fn cancel(&self) {
        self.machine_ticket.fetch_add(1, Ordering::SeqCst);
        self.bulk_ticket.fetch_add(1, Ordering::SeqCst);
    }
}

/// True when the caller still holds the latest ticket after the window.
async fn wait_for_turn(counter: &AtomicU64, window: Duration) -> bool {
    let ticket = counter.fetch_add(1, Ordering::SeqCst) + 1;
    tokio::time::sleep(window).await;
    counter.load(Ordering::SeqCst) == ticket
}
