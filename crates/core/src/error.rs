//! Domain error model.

use thiserror::Error;

/// Deterministic refusal of a command by domain logic.
///
/// Replaying the same command against the same state always yields the same
/// error, so none of these are worth retrying. Storage failures are reported
/// by the infrastructure layer instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed command input (blank name, ward 0, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The command is not allowed in the aggregate's current state.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The aggregate was never created.
    #[error("not found")]
    NotFound,

    /// Creating something that already exists, or a stale expected version.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_the_reason() {
        assert_eq!(
            DomainError::validation("ward number must be positive").to_string(),
            "validation failed: ward number must be positive"
        );
        assert_eq!(
            DomainError::conflict("patient already admitted").to_string(),
            "conflict: patient already admitted"
        );
        assert_eq!(DomainError::not_found().to_string(), "not found");
    }
}
