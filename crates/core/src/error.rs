//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, lifecycle). Infrastructure concerns belong elsewhere.
///
/// None of these are retried internally; an operation that fails leaves the
/// aggregate unchanged (decisions are pure, state only moves via `apply`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. non-positive amount, malformed code).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The entity is not in a state that permits the requested operation.
    ///
    /// Carries the current state so callers can re-fetch and decide whether
    /// to retry.
    #[error("invalid state transition (current state: {current}): {message}")]
    InvalidStateTransition { current: String, message: String },

    /// A domain invariant would be violated; the operation is fully rejected.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced id does not resolve.
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_transition(current: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            current: current.into(),
            message: msg.into(),
        }
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
