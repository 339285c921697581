//! Error types shared by the FleetGrid orchestrators.

use thiserror::Error;

use crate::types::{AssignmentConflict, ConflictStrategy, InvalidMachine, MachineName};

/// Errors reported by the assignment service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// The service refused the request, optionally naming the machines at fault.
    #[error("{message}")]
    Rejected {
        message: String,
        machines: Vec<MachineName>,
    },

    /// The service could not be reached or did not answer.
    #[error("assignment service unavailable: {0}")]
    Unavailable(String),

    /// A request or response body could not be encoded.
    #[error("failed to encode payload: {0}")]
    Encoding(String),
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        ServiceError::Encoding(e.to_string())
    }
}

impl ServiceError {
    pub fn rejected(message: impl Into<String>) -> Self {
        ServiceError::Rejected {
            message: message.into(),
            machines: Vec::new(),
        }
    }

    /// Machines the service named in its error, if any.
    pub fn machines(&self) -> &[MachineName] {
        match self {
            ServiceError::Rejected { machines, .. } => machines,
            ServiceError::Unavailable(_) | ServiceError::Encoding(_) => &[],
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors raised by the workflow and bulk controllers.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// One or more machines failed pre-assignment checks.
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        machines: Vec<MachineName>,
        results: Vec<InvalidMachine>,
    },

    /// The exclusivity invariant would be violated.
    #[error("conflict under {strategy}: {message}")]
    Conflict {
        message: String,
        conflicts: Vec<AssignmentConflict>,
        strategy: ConflictStrategy,
    },

    /// A named workflow step failed.
    #[error("step `{step}` failed: {message}")]
    Workflow {
        step: String,
        message: String,
        recoverable: bool,
        payload: serde_json::Value,
    },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl OrchestratorError {
    pub fn validation(message: impl Into<String>, machines: Vec<MachineName>) -> Self {
        OrchestratorError::Validation {
            message: message.into(),
            machines,
            results: Vec::new(),
        }
    }

    pub fn workflow(step: &str, message: impl Into<String>) -> Self {
        OrchestratorError::Workflow {
            step: step.to_string(),
            message: message.into(),
            recoverable: false,
            payload: serde_json::Value::Null,
        }
    }

    /// Name of the failed step for workflow errors.
    pub fn step(&self) -> Option<&str> {
        match self {
            OrchestratorError::Workflow { step, .. } => Some(step),
            _ => None,
        }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_error_machines() {
        let err = ServiceError::Rejected {
            message: "quota".into(),
            machines: vec!["m1".into()],
        };
        assert_eq!(err.machines(), &["m1".to_string()][..]);
        assert_eq!(err.to_string(), "quota");
        assert!(ServiceError::Unavailable("down".into()).machines().is_empty());
    }

    #[test]
    fn json_errors_become_encoding_errors() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = ServiceError::from(json_err);
        assert!(matches!(err, ServiceError::Encoding(_)));
        assert!(err.to_string().starts_with("failed to encode payload"));
        assert!(err.machines().is_empty());
    }

    #[test]
    fn conflict_error_names_strategy() {
        let err = OrchestratorError::Conflict {
            message: "machines are already assigned".into(),
            conflicts: Vec::new(),
            strategy: ConflictStrategy::FailFast,
        };
        assert_eq!(
            err.to_string(),
            "conflict under fail_fast: machines are already assigned"
        );
    }

    #[test]
    fn workflow_error_exposes_step() {
        let err = OrchestratorError::workflow("assign", "boom");
        assert_eq!(err.step(), Some("assign"));
        assert_eq!(err.to_string(), "step `assign` failed: boom");
    }
}
