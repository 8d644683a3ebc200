//! Action-level error types.

use thiserror::Error;

use crate::ActionKind;

/// Errors returned by an action handler.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Retryable`: the step may be re-attempted under its retry policy.
/// - everything else: the step fails immediately.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ActionError {
    /// Transient failure; the engine may re-try the step.
    #[error("retryable action error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal action error: {0}")]
    Fatal(String),

    /// No handler is registered for this action kind.
    #[error("unsupported action type '{0}'")]
    Unsupported(ActionKind),

    #[error("invalid action parameter: {0}")]
    InvalidParameter(#[from] VariableError),

    /// The surrounding execution was cancelled while the action was suspended.
    #[error("action cancelled")]
    Cancelled,
}

impl ActionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Errors raised by the typed accessors of [`crate::Variables`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VariableError {
    #[error("missing required value '{0}'")]
    Missing(String),

    #[error("value '{key}' should be {expected} but is {found}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("value '{key}' is not a valid {expected}: {reason}")]
    Malformed {
        key: String,
        expected: &'static str,
        reason: String,
    },

    #[error("variables must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Errors reported by external collaborators (task store, mailer, HTTP, …).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PortError {
    /// The collaborator is temporarily unreachable or overloaded.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// The collaborator refused the request.
    #[error("collaborator rejected request: {0}")]
    Rejected(String),

    #[error("{0} not found")]
    NotFound(String),
}

impl From<PortError> for ActionError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Unavailable(_) => Self::Retryable(err.to_string()),
            PortError::Rejected(_) | PortError::NotFound(_) => Self::Fatal(err.to_string()),
        }
    }
}
