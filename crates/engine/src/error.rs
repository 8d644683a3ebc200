//! Engine-level error types.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use actions::{ActionError, PortError, VariableError};
use store::StoreError;

use crate::conditions::ConditionError;

/// Errors produced by the workflow engine (validation + execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// Two or more steps share the same ID.
    #[error("duplicate step ID: '{0}'")]
    DuplicateStepId(Uuid),

    /// A `next_steps` entry names a step that doesn't exist in the workflow.
    #[error("step '{from}' references unknown step '{step_id}'")]
    UnknownStepReference { step_id: Uuid, from: Uuid },

    /// Topological sort detected a cycle.
    #[error("workflow graph contains a cycle")]
    CycleDetected,

    /// An active step can never be reached from the entry step.
    #[error("step '{0}' is not reachable from the entry step")]
    UnreachableStep(Uuid),

    /// The stored definition could not be (de)serialized.
    #[error("invalid workflow definition: {0}")]
    Definition(#[from] serde_json::Error),

    // ------ Start errors ------

    #[error("workflow {workflow_id} cannot be executed: {reason}")]
    NotExecutable { workflow_id: Uuid, reason: String },

    // ------ Step errors ------

    /// A `next_steps` id could not be resolved while traversing.
    #[error("step '{0}' does not exist in this workflow")]
    UnknownStep(Uuid),

    #[error("unsupported step type '{0}'")]
    UnsupportedStepKind(&'static str),

    #[error("no approvers configured for approval step")]
    NoApprovers,

    #[error("condition evaluation failed: {0}")]
    Condition(#[from] ConditionError),

    #[error("action execution failed: {0}")]
    Action(#[from] ActionError),

    #[error(transparent)]
    Variables(#[from] VariableError),

    #[error("step timed out after {}", humantime::format_duration(*.0))]
    StepTimedOut(Duration),

    /// A step failed for good; the message is the step's own error.
    #[error("{message}")]
    StepFailed { step_id: Uuid, message: String },

    // ------ Lifecycle errors ------

    #[error("{entity} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("execution {0} is not running")]
    ExecutionNotRunning(Uuid),

    #[error("step {step_id} of execution {execution_id} is not awaiting approval")]
    ApprovalNotPending { execution_id: Uuid, step_id: Uuid },

    #[error("execution cancelled")]
    Cancelled,

    #[error("workflow exceeded max execution time")]
    ExecutionTimedOut,

    /// The spawned run ended without reporting a result.
    #[error("run of execution {0} aborted")]
    RunAborted(Uuid),

    // ------ Persistence errors ------

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<PortError> for EngineError {
    fn from(err: PortError) -> Self {
        Self::Action(ActionError::from(err))
    }
}

impl EngineError {
    /// Only transient action failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Action(err) if err.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_action_errors() {
        assert!(EngineError::Action(ActionError::Retryable("503".into())).is_retryable());
        assert!(EngineError::from(PortError::Unavailable("db".into())).is_retryable());
        assert!(!EngineError::from(PortError::Rejected("dup".into())).is_retryable());
        assert!(!EngineError::UnsupportedStepKind("loop").is_retryable());
        assert!(!EngineError::StepTimedOut(Duration::from_secs(3600)).is_retryable());
    }

    #[test]
    fn step_failure_displays_the_step_message() {
        let err = EngineError::StepFailed { step_id: Uuid::new_v4(), message: "boom".into() };
        assert_eq!(err.to_string(), "boom");
    }
}
