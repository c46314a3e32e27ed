//! Unified error types for the evsite ecosystem
//!
//! This module provides a common error type [`PlanError`] that can represent
//! errors from any part of the system. Domain-specific failures are converted
//! to `PlanError` for uniform handling at API boundaries.

use thiserror::Error;

/// Unified error type for all planning operations.
///
/// Solver statuses that the heuristic can recover from (time limit,
/// solution limit) are *not* errors; they travel through
/// `SolveStatus` instead. Everything here is terminal for the call
/// that produced it.
#[derive(Error, Debug)]
pub enum PlanError {
    /// I/O errors (file access, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Malformed input detected at construction time
    #[error("Validation error: {0}")]
    Validation(String),

    /// The MILP (or allocation model) has no feasible solution
    #[error("Problem infeasible: {reason} ({hint})")]
    Infeasible { reason: String, hint: String },

    /// Solver/backend errors
    #[error("Solver error: {0}")]
    Solver(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

impl PlanError {
    /// Infeasibility with the standard remediation hint.
    pub fn infeasible(reason: impl Into<String>) -> Self {
        PlanError::Infeasible {
            reason: reason.into(),
            hint: "add candidate locations, relax the service level, \
                   or relax the fixed station count"
                .to_string(),
        }
    }
}

/// Convenience type alias for Results using PlanError.
pub type PlanResult<T> = Result<T, PlanError>;

// Conversion from anyhow::Error
impl From<anyhow::Error> for PlanError {
    fn from(err: anyhow::Error) -> Self {
        PlanError::Other(err.to_string())
    }
}

// Conversion from string-like types for convenience
impl From<String> for PlanError {
    fn from(s: String) -> Self {
        PlanError::Other(s)
    }
}

impl From<&str> for PlanError {
    fn from(s: &str) -> Self {
        PlanError::Other(s.to_string())
    }
}

// JSON parsing errors
impl From<serde_json::Error> for PlanError {
    fn from(err: serde_json::Error) -> Self {
        PlanError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlanError::Solver("backend crashed".into());
        assert!(err.to_string().contains("Solver error"));
        assert!(err.to_string().contains("backend crashed"));
    }

    #[test]
    fn test_infeasible_carries_hint() {
        let err = PlanError::infeasible("service level unattainable");
        let msg = err.to_string();
        assert!(msg.contains("service level unattainable"));
        assert!(msg.contains("add candidate locations"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let plan_err: PlanError = io_err.into();
        assert!(matches!(plan_err, PlanError::Io(_)));
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> PlanResult<()> {
            Err(PlanError::Validation("test".into()))
        }

        fn outer() -> PlanResult<()> {
            inner()?;
            Ok(())
        }

        assert!(outer().is_err());
    }
}
