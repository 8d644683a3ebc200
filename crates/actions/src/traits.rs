//! The `ActionHandler` trait: the contract every action kind must fulfil.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{ActionError, Variables, WorkflowAction};

/// Shared context passed to every action during execution.
///
/// Defined here (in the actions crate) so both the engine and individual
/// handlers can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// ID of the parent workflow.
    pub workflow_id: Uuid,
    /// ID of the current execution run.
    pub execution_id: Uuid,
    /// Step the action belongs to.
    pub step_id: Uuid,
    /// User who started the execution.
    pub executed_by: Uuid,
    /// Snapshot of the execution variables when the step started.
    pub variables: Variables,
    /// Fires when the execution is cancelled; suspending actions must honour it.
    pub cancel: CancellationToken,
}

impl ActionContext {
    pub fn new(workflow_id: Uuid, execution_id: Uuid, step_id: Uuid, executed_by: Uuid) -> Self {
        Self {
            workflow_id,
            execution_id,
            step_id,
            executed_by,
            variables: Variables::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// The core action trait.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Execute `action` and return the values it contributes to the step
    /// output.
    async fn execute(
        &self,
        action: &WorkflowAction,
        ctx: &ActionContext,
    ) -> Result<Variables, ActionError>;
}
