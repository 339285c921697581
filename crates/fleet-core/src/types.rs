//! Domain types shared across FleetGrid crates.
//!
//! Machine records are read-only views of what the assignment service
//! reports. Everything else here is created per call and discarded once the
//! result has been reported.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of a machine (unique within a team).
pub type MachineName = String;

// ── Machines and targets ───────────────────────────────────────────

/// The kind of resource a machine can be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentKind {
    Cluster,
    Image,
    Clone,
}

impl AssignmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentKind::Cluster => "cluster",
            AssignmentKind::Image => "image",
            AssignmentKind::Clone => "clone",
        }
    }
}

impl fmt::Display for AssignmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a machine is currently assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Assignment {
    #[default]
    None,
    Cluster { name: String },
    Image { name: String },
    Clone { name: String },
}

impl Assignment {
    /// Build an assignment of the given kind on `resource`.
    pub fn of(kind: AssignmentKind, resource: impl Into<String>) -> Self {
        let name = resource.into();
        match kind {
            AssignmentKind::Cluster => Assignment::Cluster { name },
            AssignmentKind::Image => Assignment::Image { name },
            AssignmentKind::Clone => Assignment::Clone { name },
        }
    }

    pub fn is_assigned(&self) -> bool {
        !matches!(self, Assignment::None)
    }

    pub fn kind(&self) -> Option<AssignmentKind> {
        match self {
            Assignment::None => None,
            Assignment::Cluster { .. } => Some(AssignmentKind::Cluster),
            Assignment::Image { .. } => Some(AssignmentKind::Image),
            Assignment::Clone { .. } => Some(AssignmentKind::Clone),
        }
    }

    pub fn resource(&self) -> Option<&str> {
        match self {
            Assignment::None => None,
            Assignment::Cluster { name }
            | Assignment::Image { name }
            | Assignment::Clone { name } => Some(name),
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind(), self.resource()) {
            (Some(kind), Some(resource)) => write!(f, "{kind}: {resource}"),
            _ => f.write_str("unassigned"),
        }
    }
}

/// A compute node as reported by the assignment service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub name: MachineName,
    pub team: String,
    #[serde(default)]
    pub assignment: Assignment,
}

impl Machine {
    /// An unassigned machine.
    pub fn new(name: impl Into<String>, team: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            team: team.into(),
            assignment: Assignment::None,
        }
    }

    pub fn with_assignment(mut self, assignment: Assignment) -> Self {
        self.assignment = assignment;
        self
    }
}

/// Identifiers a clone target needs on top of the clone name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneTarget {
    pub clone_name: String,
    pub pool_name: String,
    pub image_name: String,
    pub snapshot_name: String,
}

/// Where a machine is being assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssignmentTarget {
    Cluster { name: String },
    Image { name: String, pool: String },
    Clone(CloneTarget),
}

impl AssignmentTarget {
    pub fn cluster(name: impl Into<String>) -> Self {
        AssignmentTarget::Cluster { name: name.into() }
    }

    pub fn kind(&self) -> AssignmentKind {
        match self {
            AssignmentTarget::Cluster { .. } => AssignmentKind::Cluster,
            AssignmentTarget::Image { .. } => AssignmentKind::Image,
            AssignmentTarget::Clone(_) => AssignmentKind::Clone,
        }
    }

    /// The resource name the machine ends up assigned to.
    pub fn resource(&self) -> &str {
        match self {
            AssignmentTarget::Cluster { name } | AssignmentTarget::Image { name, .. } => name,
            AssignmentTarget::Clone(clone) => &clone.clone_name,
        }
    }

    /// True when any identifier the target needs is empty.
    pub fn has_missing_identifiers(&self) -> bool {
        match self {
            AssignmentTarget::Cluster { name } => name.trim().is_empty(),
            AssignmentTarget::Image { name, pool } => {
                name.trim().is_empty() || pool.trim().is_empty()
            }
            AssignmentTarget::Clone(c) => [
                &c.clone_name,
                &c.pool_name,
                &c.image_name,
                &c.snapshot_name,
            ]
            .iter()
            .any(|s| s.trim().is_empty()),
        }
    }

    /// The assignment a machine holds once assigned here.
    pub fn as_assignment(&self) -> Assignment {
        Assignment::of(self.kind(), self.resource())
    }
}

impl fmt::Display for AssignmentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.resource())
    }
}

// ── Validation ─────────────────────────────────────────────────────

/// Machine-readable code of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    MachineNotFound,
    MachineUnavailable,
    MachineAlreadyAssigned,
    ExclusivityViolation,
    TeamMismatch,
    InvalidTargetResource,
    ValidationFailed,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::MachineNotFound => "MACHINE_NOT_FOUND",
            IssueCode::MachineUnavailable => "MACHINE_UNAVAILABLE",
            IssueCode::MachineAlreadyAssigned => "MACHINE_ALREADY_ASSIGNED",
            IssueCode::ExclusivityViolation => "EXCLUSIVITY_VIOLATION",
            IssueCode::TeamMismatch => "TEAM_MISMATCH",
            IssueCode::InvalidTargetResource => "INVALID_TARGET_RESOURCE",
            IssueCode::ValidationFailed => "VALIDATION_FAILED",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub message: String,
    pub severity: Severity,
}

impl ValidationIssue {
    pub fn error(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn warning(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: Severity::Warning,
        }
    }
}

/// Outcome of validating one machine (or one group of machines).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn from_issues(errors: Vec<ValidationIssue>, warnings: Vec<ValidationIssue>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Fold another result into this one.
    pub fn merge(mut self, other: ValidationResult) -> Self {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.is_valid = self.errors.is_empty();
        self
    }
}

/// A machine that failed bulk validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidMachine {
    pub machine: Machine,
    pub errors: Vec<ValidationIssue>,
    /// True when every error is an exclusivity violation and the caller
    /// asked to skip warnings.
    pub can_override: bool,
}

/// Aggregate counts over a bulk validation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total_machines: usize,
    pub valid_count: usize,
    pub invalid_count: usize,
    pub error_types: BTreeMap<IssueCode, usize>,
    pub warning_count: usize,
    pub critical_errors: bool,
}

/// Result of validating many machines against one target kind.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BulkValidation {
    pub valid: Vec<Machine>,
    pub invalid: Vec<InvalidMachine>,
    pub summary: ValidationSummary,
    pub can_proceed: bool,
    pub all_valid: bool,
    /// Machine name → errors.
    pub errors: BTreeMap<MachineName, Vec<ValidationIssue>>,
    /// Machine name → warnings.
    pub warnings: BTreeMap<MachineName, Vec<ValidationIssue>>,
}

impl BulkValidation {
    pub fn invalid_names(&self) -> Vec<MachineName> {
        self.invalid.iter().map(|m| m.machine.name.clone()).collect()
    }

    /// Move `machine` from the valid set to the invalid set with `issue`.
    pub fn reject(&mut self, machine_name: &str, issue: ValidationIssue) {
        let Some(pos) = self.valid.iter().position(|m| m.name == machine_name) else {
            return;
        };
        let machine = self.valid.remove(pos);
        *self.summary.error_types.entry(issue.code).or_insert(0) += 1;
        self.errors
            .entry(machine.name.clone())
            .or_default()
            .push(issue.clone());
        self.invalid.push(InvalidMachine {
            machine,
            errors: vec![issue],
            can_override: false,
        });
        self.summary.valid_count = self.valid.len();
        self.summary.invalid_count = self.invalid.len();
        self.all_valid = false;
        self.can_proceed = !self.valid.is_empty() && !self.summary.critical_errors;
    }
}

// ── Conflicts ──────────────────────────────────────────────────────

/// How detected exclusivity conflicts are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    #[default]
    SkipConflicts,
    ForceReassign,
    FailFast,
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictStrategy::SkipConflicts => "skip_conflicts",
            ConflictStrategy::ForceReassign => "force_reassign",
            ConflictStrategy::FailFast => "fail_fast",
        })
    }
}

impl std::str::FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "skip_conflicts" | "skip" => Ok(ConflictStrategy::SkipConflicts),
            "force_reassign" | "force" => Ok(ConflictStrategy::ForceReassign),
            "fail_fast" | "fail" => Ok(ConflictStrategy::FailFast),
            other => Err(format!(
                "unknown conflict strategy `{other}` (expected skip_conflicts, force_reassign or fail_fast)"
            )),
        }
    }
}

/// A detected violation of the exclusivity invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentConflict {
    pub machine_name: MachineName,
    pub current: Assignment,
    pub target: AssignmentTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictAction {
    Skip,
    Force,
    Fail,
}

/// What was decided for one conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub conflict: AssignmentConflict,
    pub action: ConflictAction,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
