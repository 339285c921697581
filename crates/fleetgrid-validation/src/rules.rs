//! Pure validation rules over machine records.
//!
//! These never call the assignment service; they judge the record the caller
//! already holds. The exclusivity checker is the authoritative gate before a
//! mutation.

use fleet_core::{
    AssignmentKind, AssignmentTarget, BulkValidation, InvalidMachine, IssueCode, Machine,
    ValidationIssue, ValidationResult, ValidationSummary,
};

/// Empty name → not found; any current assignment → already-assigned warning.
pub fn validate_availability(machine: &Machine) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if machine.name.trim().is_empty() {
        errors.push(ValidationIssue::error(
            IssueCode::MachineNotFound,
            "Machine name is required",
        ));
    }
    if machine.assignment.is_assigned() {
        warnings.push(ValidationIssue::warning(
            IssueCode::MachineAlreadyAssigned,
            format!("Machine is already assigned to {}", machine.assignment),
        ));
    }

    ValidationResult::from_issues(errors, warnings)
}

/// Any current assignment violates exclusivity, whatever the target kind.
pub fn validate_exclusivity(machine: &Machine, target_kind: AssignmentKind) -> ValidationResult {
    let errors = match (machine.assignment.kind(), machine.assignment.resource()) {
        (Some(kind), Some(resource)) => vec![ValidationIssue::error(
            IssueCode::ExclusivityViolation,
            format!(
                "Machine {} is exclusively assigned to {kind} {resource} and cannot be assigned to a {target_kind}",
                machine.name
            ),
        )],
        _ => Vec::new(),
    };
    ValidationResult::from_issues(errors, Vec::new())
}

/// Availability and exclusivity against a target kind.
pub fn validate_for_kind(machine: &Machine, target_kind: AssignmentKind) -> ValidationResult {
    validate_availability(machine).merge(validate_exclusivity(machine, target_kind))
}

/// Full pre-assignment validation of one machine against a concrete target.
pub fn validate_assignment(
    machine: &Machine,
    target: &AssignmentTarget,
    team: Option<&str>,
) -> ValidationResult {
    let mut result = validate_for_kind(machine, target.kind());

    if let Some(issue) = team_mismatch(machine, team) {
        result = result.merge(ValidationResult::from_issues(vec![issue], Vec::new()));
    }
    if target.has_missing_identifiers() {
        result = result.merge(ValidationResult::from_issues(
            vec![ValidationIssue::error(
                IssueCode::InvalidTargetResource,
                format!("Target {} is missing required identifiers", target.kind()),
            )],
            Vec::new(),
        ));
    }
    result
}

fn team_mismatch(machine: &Machine, team: Option<&str>) -> Option<ValidationIssue> {
    match team {
        Some(team) if machine.team != team => Some(ValidationIssue::error(
            IssueCode::TeamMismatch,
            format!(
                "Machine {} belongs to team {}, not {team}",
                machine.name, machine.team
            ),
        )),
        _ => None,
    }
}

/// Knobs for [`validate_bulk`].
#[derive(Debug, Clone, Default)]
pub struct BulkRuleOptions {
    /// Team every machine must belong to.
    pub team: Option<String>,
    /// Let exclusivity-only failures be overridden by the caller.
    pub skip_warnings: bool,
}

/// Partition machines into valid and invalid against a target kind.
///
/// A machine is valid iff it has no errors. A team mismatch anywhere makes
/// the whole result critical, which blocks `can_proceed`.
pub fn validate_bulk(
    machines: &[Machine],
    target_kind: AssignmentKind,
    options: &BulkRuleOptions,
) -> BulkValidation {
    let mut bulk = BulkValidation::default();
    let mut summary = ValidationSummary {
        total_machines: machines.len(),
        ..Default::default()
    };

    for machine in machines {
        let mut result = validate_for_kind(machine, target_kind);
        if let Some(issue) = team_mismatch(machine, options.team.as_deref()) {
            result = result.merge(ValidationResult::from_issues(vec![issue], Vec::new()));
        }

        summary.warning_count += result.warnings.len();
        if !result.warnings.is_empty() {
            bulk.warnings
                .insert(machine.name.clone(), result.warnings.clone());
        }

        if result.is_valid {
            bulk.valid.push(machine.clone());
            continue;
        }

        for issue in &result.errors {
            *summary.error_types.entry(issue.code).or_insert(0) += 1;
            if issue.code == IssueCode::TeamMismatch {
                summary.critical_errors = true;
            }
        }
        let can_override = options.skip_warnings
            && result
                .errors
                .iter()
                .all(|e| e.code == IssueCode::ExclusivityViolation);

        bulk.errors
            .insert(machine.name.clone(), result.errors.clone());
        bulk.invalid.push(InvalidMachine {
            machine: machine.clone(),
            errors: result.errors,
            can_override,
        });
    }

    summary.valid_count = bulk.valid.len();
    summary.invalid_count = bulk.invalid.len();
    bulk.all_valid = bulk.invalid.is_empty();
    bulk.can_proceed = !bulk.valid.is_empty() && !summary.critical_errors;
    bulk.summary = summary;
    bulk
}
