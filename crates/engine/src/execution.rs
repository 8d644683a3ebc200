//! Execution records and their lifecycles.
//!
//! Every status change goes through a checked transition so a record can
//! never regress (a completed execution cannot start running again).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use actions::Variables;
use store::models::{ExecutionRow, StepExecutionRow};

pub use store::models::{ExecutionStatus, StepStatus};

use crate::{EngineError, models::Workflow};

// ---------------------------------------------------------------------------
// WorkflowExecution
// ---------------------------------------------------------------------------

/// One run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub trigger_id: Option<Uuid>,
    pub status: ExecutionStatus,
    /// Trigger-supplied input; never changes after start.
    pub context: Variables,
    /// Accumulated step outputs, seeded from the workflow and the trigger.
    pub variables: Variables,
    pub current_step: Option<Uuid>,
    pub executed_by: Uuid,
    pub error_message: Option<String>,
    /// Step re-attempts made during the run.
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowExecution {
    /// A pending execution of `workflow`.
    ///
    /// Variables start as the workflow's seed values overlaid with the
    /// trigger data.
    pub fn new(workflow: &Workflow, trigger_id: Option<Uuid>, executed_by: Uuid, context: Variables) -> Self {
        let now = Utc::now();
        let mut variables = workflow.variables.clone();
        variables.merge(&context);
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            trigger_id,
            status: ExecutionStatus::Pending,
            context,
            variables,
            current_step: None,
            executed_by,
            error_message: None,
            retry_count: 0,
            started_at: now,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, to: ExecutionStatus) -> Result<DateTime<Utc>, EngineError> {
        use ExecutionStatus::*;
        let allowed = matches!(
            (self.status, to),
            (Pending, Running)
                | (Running, Paused | Completed | Failed | Cancelled)
                | (Paused, Running | Failed | Cancelled)
        );
        if !allowed {
            return Err(EngineError::InvalidTransition {
                entity: "execution",
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        let now = Utc::now();
        self.status = to;
        self.updated_at = now;
        Ok(now)
    }

    pub fn start(&mut self) -> Result<(), EngineError> {
        self.started_at = self.transition(ExecutionStatus::Running)?;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), EngineError> {
        self.transition(ExecutionStatus::Paused).map(drop)
    }

    pub fn resume(&mut self) -> Result<(), EngineError> {
        if self.status != ExecutionStatus::Paused {
            return Err(EngineError::InvalidTransition {
                entity: "execution",
                from: self.status.to_string(),
                to: ExecutionStatus::Running.to_string(),
            });
        }
        self.transition(ExecutionStatus::Running).map(drop)
    }

    pub fn complete(&mut self) -> Result<(), EngineError> {
        self.completed_at = Some(self.transition(ExecutionStatus::Completed)?);
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), EngineError> {
        self.failed_at = Some(self.transition(ExecutionStatus::Failed)?);
        self.error_message = Some(message.into());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), EngineError> {
        self.cancelled_at = Some(self.transition(ExecutionStatus::Cancelled)?);
        Ok(())
    }

    /// Wall-clock time from start to whichever terminal timestamp is set.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        self.completed_at
            .or(self.failed_at)
            .or(self.cancelled_at)
            .map(|end| end - self.started_at)
    }

    pub fn to_row(&self) -> ExecutionRow {
        ExecutionRow {
            id: self.id,
            workflow_id: self.workflow_id,
            trigger_id: self.trigger_id,
            status: self.status,
            context: self.context.to_value(),
            variables: self.variables.to_value(),
            current_step: self.current_step,
            executed_by: self.executed_by,
            error_message: self.error_message.clone(),
            retry_count: i32::try_from(self.retry_count).unwrap_or(i32::MAX),
            started_at: self.started_at,
            completed_at: self.completed_at,
            failed_at: self.failed_at,
            cancelled_at: self.cancelled_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn from_row(row: ExecutionRow) -> Result<Self, EngineError> {
        Ok(Self {
            id: row.id,
            workflow_id: row.workflow_id,
            trigger_id: row.trigger_id,
            status: row.status,
            context: Variables::from_value(row.context)?,
            variables: Variables::from_value(row.variables)?,
            current_step: row.current_step,
            executed_by: row.executed_by,
            error_message: row.error_message,
            retry_count: u32::try_from(row.retry_count).unwrap_or_default(),
            started_at: row.started_at,
            completed_at: row.completed_at,
            failed_at: row.failed_at,
            cancelled_at: row.cancelled_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ---------------------------------------------------------------------------
// StepExecution
// ---------------------------------------------------------------------------

/// Audit record of one attempt at one step. Retries create a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_id: Uuid,
    pub status: StepStatus,
    pub input: Variables,
    pub output: Option<Variables>,
    pub error_message: Option<String>,
    /// Zero for the first attempt.
    pub retry_count: u32,
    pub assigned_to: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StepExecution {
    pub fn new(execution_id: Uuid, step_id: Uuid, input: Variables, retry_count: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            execution_id,
            step_id,
            status: StepStatus::Pending,
            input,
            output: None,
            error_message: None,
            retry_count,
            assigned_to: None,
            started_at: now,
            completed_at: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, to: StepStatus) -> Result<DateTime<Utc>, EngineError> {
        use StepStatus::*;
        let allowed = matches!(
            (self.status, to),
            (Pending, Running)
                | (Running, Completed | Failed | Skipped | Waiting)
                | (Waiting, Completed | Failed)
        );
        if !allowed {
            return Err(EngineError::InvalidTransition {
                entity: "step execution",
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        let now = Utc::now();
        self.status = to;
        self.updated_at = now;
        Ok(now)
    }

    pub fn start(&mut self) -> Result<(), EngineError> {
        self.started_at = self.transition(StepStatus::Running)?;
        Ok(())
    }

    pub fn complete(&mut self, output: Variables) -> Result<(), EngineError> {
        self.completed_at = Some(self.transition(StepStatus::Completed)?);
        self.output = Some(output);
        Ok(())
    }

    pub fn skip(&mut self) -> Result<(), EngineError> {
        self.completed_at = Some(self.transition(StepStatus::Skipped)?);
        Ok(())
    }

    pub fn wait(&mut self) -> Result<(), EngineError> {
        self.transition(StepStatus::Waiting).map(drop)
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), EngineError> {
        self.failed_at = Some(self.transition(StepStatus::Failed)?);
        self.error_message = Some(message.into());
        Ok(())
    }

    pub fn to_row(&self) -> StepExecutionRow {
        StepExecutionRow {
            id: self.id,
            execution_id: self.execution_id,
            step_id: self.step_id,
            status: self.status,
            input: self.input.to_value(),
            output: self.output.as_ref().map(Variables::to_value),
            error_message: self.error_message.clone(),
            retry_count: i32::try_from(self.retry_count).unwrap_or(i32::MAX),
            assigned_to: self.assigned_to,
            started_at: self.started_at,
            completed_at: self.completed_at,
            failed_at: self.failed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn from_row(row: StepExecutionRow) -> Result<Self, EngineError> {
        Ok(Self {
            id: row.id,
            execution_id: row.execution_id,
            step_id: row.step_id,
            status: row.status,
            input: Variables::from_value(row.input)?,
            output: row.output.map(Variables::from_value).transpose()?,
            error_message: row.error_message,
            retry_count: u32::try_from(row.retry_count).unwrap_or_default(),
            assigned_to: row.assigned_to,
            started_at: row.started_at,
            completed_at: row.completed_at,
            failed_at: row.failed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
