//! Runs one attempt of one step.
//!
//! Each attempt:
//! 1. Records a `StepExecution` in `running` with the current variables as input.
//! 2. Evaluates the step's gate; a false gate skips the step but still
//!    hands back its successors.
//! 3. Dispatches on the step kind.
//! 4. Records the result and tells the orchestrator where to go next.
//!
//! Approval steps that are not auto-approved end the attempt in `waiting`;
//! the orchestrator finishes them later through [`StepRunner::resume_approval`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use actions::{
    ActionContext, ActionDispatcher, ActionError, Variables,
    ports::{NewTask, Notification, NotificationPriority, NotificationRepository, TaskRepository},
    variables::duration_from_value,
};
use store::ExecutionRepository;

use crate::{
    EngineError,
    approval::{ApprovalDecision, ApprovalGates},
    conditions::evaluate_set,
    config::EngineConfig,
    execution::StepExecution,
    models::{
        ApprovalStepConfig, NotificationStepConfig, RetryPolicy, StepKind, TaskStepConfig,
        WaitStepConfig, Workflow, WorkflowStep,
    },
};

/// Where a step attempt runs.
#[derive(Debug, Clone, Copy)]
pub struct StepScope<'a> {
    pub workflow: &'a Workflow,
    pub execution_id: Uuid,
    pub executed_by: Uuid,
}

/// Per-attempt input.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub variables: Variables,
    /// 1 for the first attempt.
    pub attempt: u32,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
pub enum StepOutcome {
    Completed { output: Variables, next_steps: Vec<Uuid> },
    Skipped { next_steps: Vec<Uuid> },
    /// Suspended until a decision arrives on the gate.
    Waiting { decision: oneshot::Receiver<ApprovalDecision> },
    Failed { error: EngineError, should_retry: bool, retry_delay: Duration },
}

/// The recorded attempt and what it means for the run.
#[derive(Debug)]
pub struct StepRun {
    pub record: StepExecution,
    pub outcome: StepOutcome,
}

enum Dispatched {
    Output(Variables),
    Waiting(oneshot::Receiver<ApprovalDecision>),
}

pub struct StepRunner {
    executions: Arc<dyn ExecutionRepository>,
    dispatcher: Arc<ActionDispatcher>,
    tasks: Arc<dyn TaskRepository>,
    notifications: Arc<dyn NotificationRepository>,
    approvals: Arc<ApprovalGates>,
    config: EngineConfig,
}

impl StepRunner {
    pub fn new(
        executions: Arc<dyn ExecutionRepository>,
        dispatcher: Arc<ActionDispatcher>,
        tasks: Arc<dyn TaskRepository>,
        notifications: Arc<dyn NotificationRepository>,
        approvals: Arc<ApprovalGates>,
        config: EngineConfig,
    ) -> Self {
        Self { executions, dispatcher, tasks, notifications, approvals, config }
    }

    /// Run one attempt of `step`.
    ///
    /// Step failures come back as [`StepOutcome::Failed`]; `Err` is reserved
    /// for failures to record the attempt.
    #[instrument(
        skip_all,
        fields(execution_id = %scope.execution_id, step_id = %step.id, step = %step.name, attempt = ctx.attempt)
    )]
    pub async fn run(
        &self,
        scope: &StepScope<'_>,
        step: &WorkflowStep,
        ctx: StepContext,
    ) -> Result<StepRun, EngineError> {
        let mut record = StepExecution::new(
            scope.execution_id,
            step.id,
            ctx.variables.clone(),
            ctx.attempt.saturating_sub(1),
        );
        record.assigned_to = step.assignments.first().map(|a| a.user_id);
        record.start()?;
        self.executions.create_step_execution(record.to_row()).await?;

        if !step.is_active {
            debug!("step inactive, skipping");
            return self.skip(record, step).await;
        }

        if !step.conditions.is_empty() {
            match evaluate_set(&step.conditions, step.condition_logic, &ctx.variables) {
                Ok(true) => {}
                Ok(false) => {
                    debug!("gate closed, skipping");
                    return self.skip(record, step).await;
                }
                Err(err) => return self.fail(record, err.into(), None).await,
            }
        }

        let dispatched = match step.timeout() {
            Some(limit) => tokio::time::timeout(limit, self.dispatch(scope, step, &ctx))
                .await
                .unwrap_or(Err(EngineError::StepTimedOut(limit))),
            None => self.dispatch(scope, step, &ctx).await,
        };

        match dispatched {
            Ok(Dispatched::Output(output)) => {
                record.complete(output.clone())?;
                self.executions.update_step_execution(record.to_row()).await?;
                info!("step completed");
                Ok(StepRun {
                    record,
                    outcome: StepOutcome::Completed { output, next_steps: step.next_steps.clone() },
                })
            }
            Ok(Dispatched::Waiting(decision)) => {
                record.wait()?;
                self.executions.update_step_execution(record.to_row()).await?;
                info!("step waiting for approval");
                Ok(StepRun { record, outcome: StepOutcome::Waiting { decision } })
            }
            Err(err) => {
                let policy = self.retry_policy(scope.workflow, step);
                self.fail(record, err, Some((policy, ctx.attempt))).await
            }
        }
    }

    /// Finish an approval step that was left `waiting`.
    #[instrument(skip_all, fields(execution_id = %record.execution_id, step_id = %step.id))]
    pub async fn resume_approval(
        &self,
        step: &WorkflowStep,
        mut record: StepExecution,
        decision: ApprovalDecision,
    ) -> Result<StepRun, EngineError> {
        if !decision.approved {
            let message = format!("approval rejected by {}", decision.decided_by);
            let error = EngineError::StepFailed { step_id: step.id, message };
            return self.fail(record, error, None).await;
        }

        let output = approval_output(&decision);
        record.complete(output.clone())?;
        self.executions.update_step_execution(record.to_row()).await?;
        info!(approved_by = %decision.decided_by, "approval granted");
        Ok(StepRun {
            record,
            outcome: StepOutcome::Completed { output, next_steps: step.next_steps.clone() },
        })
    }

    /// Close out a `waiting` record whose decision will never come.
    pub async fn fail_waiting(
        &self,
        mut record: StepExecution,
        reason: &EngineError,
    ) -> Result<StepExecution, EngineError> {
        record.fail(reason.to_string())?;
        self.executions.update_step_execution(record.to_row()).await?;
        Ok(record)
    }

    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    async fn skip(&self, mut record: StepExecution, step: &WorkflowStep) -> Result<StepRun, EngineError> {
        record.skip()?;
        self.executions.update_step_execution(record.to_row()).await?;
        Ok(StepRun { record, outcome: StepOutcome::Skipped { next_steps: step.next_steps.clone() } })
    }

    async fn fail(
        &self,
        mut record: StepExecution,
        error: EngineError,
        retry: Option<(RetryPolicy, u32)>,
    ) -> Result<StepRun, EngineError> {
        let error = match error {
            EngineError::Action(ActionError::Cancelled) => EngineError::Cancelled,
            other => other,
        };
        record.fail(error.to_string())?;
        self.executions.update_step_execution(record.to_row()).await?;

        let (should_retry, retry_delay) = match retry {
            Some((policy, attempt)) if error.is_retryable() && attempt <= policy.retries => {
                (true, self.backoff(policy, attempt))
            }
            _ => (false, Duration::ZERO),
        };
        warn!(error = %error, should_retry, "step failed");
        Ok(StepRun { record, outcome: StepOutcome::Failed { error, should_retry, retry_delay } })
    }

    /// The step's own policy, else the workflow's, capped by the engine.
    fn retry_policy(&self, workflow: &Workflow, step: &WorkflowStep) -> RetryPolicy {
        let policy = step.retry.unwrap_or(RetryPolicy {
            retries: workflow.configuration.retry_attempts,
            delay_ms: workflow.configuration.retry_delay_ms,
        });
        RetryPolicy { retries: policy.retries.min(self.config.max_retry_attempts), ..policy }
    }

    /// `base * 2^(attempt - 1)`.
    fn backoff(&self, policy: RetryPolicy, attempt: u32) -> Duration {
        let base = match policy.delay_ms {
            0 => self.config.retry_base_delay(),
            ms => Duration::from_millis(ms),
        };
        base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    // -----------------------------------------------------------------------
    // Step kinds
    // -----------------------------------------------------------------------

    async fn dispatch(
        &self,
        scope: &StepScope<'_>,
        step: &WorkflowStep,
        ctx: &StepContext,
    ) -> Result<Dispatched, EngineError> {
        match &step.kind {
            StepKind::Task(config) => self.run_task(scope, step, config, ctx).await.map(Dispatched::Output),
            StepKind::Approval(config) => self.run_approval(scope, step, config).await,
            StepKind::Notification(config) => {
                self.run_notification(scope, step, config).await.map(Dispatched::Output)
            }
            StepKind::Condition => {
                let mut output = Variables::new();
                output.insert("condition_met", true);
                Ok(Dispatched::Output(output))
            }
            StepKind::Action => self.run_actions(scope, step, ctx).await.map(Dispatched::Output),
            StepKind::Wait(config) => run_wait(config, &ctx.cancel).await.map(Dispatched::Output),
            StepKind::Review | StepKind::Loop | StepKind::SubWorkflow => {
                Err(EngineError::UnsupportedStepKind(step.kind.name()))
            }
        }
    }

    async fn run_task(
        &self,
        scope: &StepScope<'_>,
        step: &WorkflowStep,
        config: &TaskStepConfig,
        ctx: &StepContext,
    ) -> Result<Variables, EngineError> {
        let task = NewTask {
            title: config.title.clone().unwrap_or_else(|| step.name.clone()),
            description: config.description.clone().unwrap_or_else(|| step.description.clone()),
            task_type: config.task_type.clone(),
            priority: config.priority.clone(),
            project_id: ctx.variables.get_uuid("project_id")?,
            assignee_id: step.users_with_role("assignee").next(),
            created_by: scope.executed_by,
            metadata: origin(scope, step),
        };
        let created = self.tasks.create_task(task).await?;
        info!(task_id = %created.id, "task created");

        let mut output = Variables::new();
        output.insert("task_id", created.id.to_string());
        output.insert("task_title", created.title);
        Ok(output)
    }

    async fn run_approval(
        &self,
        scope: &StepScope<'_>,
        step: &WorkflowStep,
        config: &ApprovalStepConfig,
    ) -> Result<Dispatched, EngineError> {
        let approvers: Vec<Uuid> = step.users_with_role("approver").collect();
        let Some(&first) = approvers.first() else {
            return Err(EngineError::NoApprovers);
        };

        for approver in &approvers {
            let mut data = origin(scope, step);
            data.insert("approval_type", "workflow_step");
            let notification = Notification::for_execution(
                *approver,
                scope.execution_id,
                "Approval Required",
                format!("Your approval is required for: {}", step.name),
            )
            .with_priority(NotificationPriority::High)
            .with_data(data);
            self.notifications.create_notification(notification).await?;
        }

        if config.auto_approve || self.config.auto_approve {
            let decision = ApprovalDecision::approve(first, None);
            return Ok(Dispatched::Output(approval_output(&decision)));
        }

        let decision = self.approvals.open(scope.execution_id, step.id).await;
        Ok(Dispatched::Waiting(decision))
    }

    async fn run_notification(
        &self,
        scope: &StepScope<'_>,
        step: &WorkflowStep,
        config: &NotificationStepConfig,
    ) -> Result<Variables, EngineError> {
        let title = config.title.clone().unwrap_or_else(|| step.name.clone());
        let message = config.message.clone().unwrap_or_else(|| step.description.clone());

        let mut sent = 0u64;
        for raw in &config.recipients {
            let Ok(user_id) = Uuid::parse_str(raw.trim()) else {
                warn!(recipient = %raw, "skipping recipient that is not a user id");
                continue;
            };
            let notification = Notification::for_execution(user_id, scope.execution_id, &title, &message)
                .with_priority(config.priority)
                .with_data(origin(scope, step));
            self.notifications.create_notification(notification).await?;
            sent += 1;
        }

        let mut output = Variables::new();
        output.insert("notifications_sent", sent);
        Ok(output)
    }

    /// Later actions see the outputs of earlier ones.
    async fn run_actions(
        &self,
        scope: &StepScope<'_>,
        step: &WorkflowStep,
        ctx: &StepContext,
    ) -> Result<Variables, EngineError> {
        let mut action_ctx = ActionContext::new(scope.workflow.id, scope.execution_id, step.id, scope.executed_by)
            .with_variables(ctx.variables.clone())
            .with_cancellation(ctx.cancel.clone());

        let mut output = Variables::new();
        for action in &step.actions {
            let produced = self.dispatcher.execute(action, &action_ctx).await?;
            action_ctx.variables.merge(&produced);
            output.merge(&produced);
        }
        Ok(output)
    }
}

async fn run_wait(config: &WaitStepConfig, cancel: &CancellationToken) -> Result<Variables, EngineError> {
    let duration = duration_from_value("duration", &config.duration)?;
    tokio::select! {
        _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        _ = tokio::time::sleep(duration) => {}
    }

    let mut output = Variables::new();
    output.insert("waited_duration", humantime::format_duration(duration).to_string());
    output.insert("waited_ms", u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
    Ok(output)
}

fn origin(scope: &StepScope<'_>, step: &WorkflowStep) -> Variables {
    [
        ("workflow_id", json!(scope.workflow.id)),
        ("execution_id", json!(scope.execution_id)),
        ("step_id", json!(step.id)),
    ]
    .into_iter()
    .collect()
}

fn approval_output(decision: &ApprovalDecision) -> Variables {
    let mut output = Variables::new();
    output.insert("approved", decision.approved);
    output.insert("approved_by", decision.decided_by.to_string());
    output.insert("approved_at", decision.decided_at.to_rfc3339());
    output.insert("comment", json!(decision.comment));
    output
}
