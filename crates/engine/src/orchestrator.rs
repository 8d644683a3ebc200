//! Workflow orchestrator.
//!
//! `Orchestrator` owns the life cycle of every execution:
//! 1. Loads the workflow and refuses to start one that cannot execute.
//! 2. Persists a running execution and publishes `started`.
//! 3. Spawns the run, which advances a frontier of ready steps level by
//!    level, folding step outputs into the execution variables.
//! 4. Finalizes the execution as completed, failed or cancelled and
//!    publishes the matching event.
//!
//! Runs are supervised: each has a cancellation token and a completion
//! channel so callers can cancel it, decide its approvals and await it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use indexmap::IndexSet;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use actions::{ActionDispatcher, Collaborators, Variables};
use store::{ExecutionRepository, StoreError, WorkflowRepository, models::ExecutionFilter};

use crate::{
    EngineError,
    approval::{ApprovalDecision, ApprovalGates},
    conditions::{ConditionLogic, evaluate_set},
    config::EngineConfig,
    events::{DomainEvent, EventPublisher, TracingEventPublisher},
    execution::{ExecutionStatus, StepExecution, WorkflowExecution},
    models::{Workflow, WorkflowStatus, WorkflowStep},
    step_runner::{StepContext, StepOutcome, StepRun, StepRunner, StepScope},
};

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct OrchestratorBuilder {
    workflows: Arc<dyn WorkflowRepository>,
    executions: Arc<dyn ExecutionRepository>,
    collaborators: Option<Collaborators>,
    dispatcher: Option<ActionDispatcher>,
    events: Option<Arc<dyn EventPublisher>>,
    config: EngineConfig,
}

impl OrchestratorBuilder {
    /// Ports used by task, approval and notification steps, and by the
    /// default dispatcher. In-memory ports when unset.
    pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = Some(collaborators);
        self
    }

    /// Replaces the dispatcher built from the collaborators.
    pub fn dispatcher(mut self, dispatcher: ActionDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Orchestrator {
        let collaborators = self.collaborators.unwrap_or_else(Collaborators::in_memory);
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| ActionDispatcher::with_defaults(&collaborators));
        let approvals = Arc::new(ApprovalGates::new());
        let runner = StepRunner::new(
            self.executions.clone(),
            Arc::new(dispatcher),
            collaborators.tasks.clone(),
            collaborators.notifications.clone(),
            approvals.clone(),
            self.config.clone(),
        );

        Orchestrator {
            inner: Arc::new(Inner {
                workflows: self.workflows,
                executions: self.executions,
                runner,
                approvals,
                events: self.events.unwrap_or_else(|| Arc::new(TracingEventPublisher)),
                config: self.config,
                runs: Mutex::new(HashMap::new()),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct RunHandle {
    cancel: CancellationToken,
    done: watch::Receiver<Option<WorkflowExecution>>,
    join: JoinHandle<()>,
}

struct Inner {
    workflows: Arc<dyn WorkflowRepository>,
    executions: Arc<dyn ExecutionRepository>,
    runner: StepRunner,
    approvals: Arc<ApprovalGates>,
    events: Arc<dyn EventPublisher>,
    config: EngineConfig,
    runs: Mutex<HashMap<Uuid, RunHandle>>,
}

/// Cheap to clone; clones share runs and stores.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

/// An approval step suspended during the current level.
struct PendingApproval<'a> {
    step: &'a WorkflowStep,
    record: StepExecution,
    decision: oneshot::Receiver<ApprovalDecision>,
    deadline: Option<(Instant, Duration)>,
}

impl Orchestrator {
    pub fn builder(
        workflows: Arc<dyn WorkflowRepository>,
        executions: Arc<dyn ExecutionRepository>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            workflows,
            executions,
            collaborators: None,
            dispatcher: None,
            events: None,
            config: EngineConfig::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Store a new workflow and index its triggers.
    pub async fn create_workflow(&self, workflow: &Workflow) -> Result<(), EngineError> {
        self.inner.workflows.create_workflow(workflow.to_row()?).await?;
        self.inner.workflows.replace_triggers(workflow.id, workflow.trigger_rows()).await?;
        Ok(())
    }

    pub async fn update_workflow(&self, workflow: &Workflow) -> Result<(), EngineError> {
        self.inner.workflows.update_workflow(workflow.to_row()?).await?;
        self.inner.workflows.replace_triggers(workflow.id, workflow.trigger_rows()).await?;
        Ok(())
    }

    pub async fn get_workflow(&self, id: Uuid) -> Result<Workflow, EngineError> {
        self.inner.load_workflow(id).await
    }

    // -----------------------------------------------------------------------
    // Starting runs
    // -----------------------------------------------------------------------

    /// Start a run and return the execution as persisted at start.
    ///
    /// # Errors
    /// [`EngineError::NotExecutable`] (nothing is persisted), or a store error.
    pub async fn start_workflow(
        &self,
        workflow_id: Uuid,
        triggered_by: Uuid,
        trigger_data: Variables,
    ) -> Result<WorkflowExecution, EngineError> {
        let workflow = self.inner.load_workflow(workflow_id).await?;
        self.start(workflow, None, triggered_by, trigger_data).await
    }

    /// Like [`Orchestrator::start_workflow`], recording which trigger fired.
    pub async fn start_workflow_with_trigger(
        &self,
        workflow_id: Uuid,
        trigger_id: Uuid,
        triggered_by: Uuid,
        trigger_data: Variables,
    ) -> Result<WorkflowExecution, EngineError> {
        let workflow = self.inner.load_workflow(workflow_id).await?;
        self.start(workflow, Some(trigger_id), triggered_by, trigger_data).await
    }

    /// Start every workflow with an active trigger on `event` whose
    /// conditions hold for `data`.
    #[instrument(skip(self, data))]
    pub async fn handle_event(
        &self,
        event: &str,
        data: Variables,
        triggered_by: Uuid,
    ) -> Result<Vec<WorkflowExecution>, EngineError> {
        let rows = self.inner.workflows.get_triggers_by_event(event).await?;
        let mut started = Vec::new();

        for row in rows.into_iter().filter(|r| r.is_active) {
            let workflow = match self.inner.load_workflow(row.workflow_id).await {
                Ok(workflow) => workflow,
                Err(EngineError::Store(StoreError::NotFound { .. })) => {
                    warn!(trigger_id = %row.id, workflow_id = %row.workflow_id, "trigger points at a missing workflow, skipping");
                    continue;
                }
                Err(err) => return Err(err),
            };
            let Some(trigger) = workflow.trigger_by_id(row.id) else {
                warn!(trigger_id = %row.id, "trigger index is stale, skipping");
                continue;
            };
            if !trigger.is_active {
                continue;
            }
            match evaluate_set(&trigger.conditions, ConditionLogic::And, &data) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    warn!(trigger_id = %trigger.id, error = %err, "trigger condition failed, skipping");
                    continue;
                }
            }

            let trigger_id = trigger.id;
            match self.start(workflow, Some(trigger_id), triggered_by, data.clone()).await {
                Ok(execution) => started.push(execution),
                Err(EngineError::NotExecutable { workflow_id, reason }) => {
                    warn!(%workflow_id, %reason, "triggered workflow cannot execute");
                }
                Err(err) => return Err(err),
            }
        }

        info!(started = started.len(), "event handled");
        Ok(started)
    }

    #[instrument(skip(self, workflow, trigger_data), fields(workflow_id = %workflow.id))]
    async fn start(
        &self,
        workflow: Workflow,
        trigger_id: Option<Uuid>,
        triggered_by: Uuid,
        trigger_data: Variables,
    ) -> Result<WorkflowExecution, EngineError> {
        if !workflow.can_execute() {
            return Err(EngineError::NotExecutable {
                workflow_id: workflow.id,
                reason: not_executable_reason(&workflow),
            });
        }

        let mut execution = WorkflowExecution::new(&workflow, trigger_id, triggered_by, trigger_data);
        execution.start()?;
        self.inner.executions.create_execution(execution.to_row()).await?;
        self.inner.publish(DomainEvent::execution_started(&workflow, &execution)).await;
        info!(execution_id = %execution.id, "execution started");

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);
        let inner = self.inner.clone();
        let run_cancel = cancel.clone();
        let run_execution = execution.clone();
        let join = tokio::spawn(async move {
            let finished = inner.drive(workflow, run_execution, run_cancel).await;
            done_tx.send_replace(Some(finished));
        });

        let mut runs = self.inner.runs.lock().await;
        runs.retain(|_, handle| !handle.join.is_finished());
        runs.insert(execution.id, RunHandle { cancel, done: done_rx, join });
        Ok(execution)
    }

    // -----------------------------------------------------------------------
    // Steering runs
    // -----------------------------------------------------------------------

    /// Ask a run to stop. It ends `cancelled` at its next suspension point.
    ///
    /// # Errors
    /// [`EngineError::ExecutionNotRunning`] if the run is unknown or over.
    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<(), EngineError> {
        let runs = self.inner.runs.lock().await;
        match runs.get(&execution_id) {
            Some(handle) if !handle.join.is_finished() && handle.done.borrow().is_none() => {
                handle.cancel.cancel();
                info!(%execution_id, "cancellation requested");
                Ok(())
            }
            _ => Err(EngineError::ExecutionNotRunning(execution_id)),
        }
    }

    pub async fn approve_step(
        &self,
        execution_id: Uuid,
        step_id: Uuid,
        decided_by: Uuid,
        comment: Option<String>,
    ) -> Result<(), EngineError> {
        let decision = ApprovalDecision::approve(decided_by, comment);
        self.inner.approvals.decide(execution_id, step_id, decision).await
    }

    pub async fn reject_step(
        &self,
        execution_id: Uuid,
        step_id: Uuid,
        decided_by: Uuid,
        comment: Option<String>,
    ) -> Result<(), EngineError> {
        let decision = ApprovalDecision::reject(decided_by, comment);
        self.inner.approvals.decide(execution_id, step_id, decision).await
    }

    /// Wait for a run to finish and return its final record. Runs this
    /// orchestrator no longer supervises are read from the store.
    pub async fn wait_for(&self, execution_id: Uuid) -> Result<WorkflowExecution, EngineError> {
        let done = self.inner.runs.lock().await.get(&execution_id).map(|h| h.done.clone());
        let Some(mut done) = done else {
            return self.get_execution(execution_id).await;
        };
        let finished = match done.wait_for(Option::is_some).await {
            Ok(finished) => (*finished).clone().ok_or(EngineError::RunAborted(execution_id)),
            Err(_) => Err(EngineError::RunAborted(execution_id)),
        };
        finished
    }

    /// Cancel every run and wait for all of them to finish.
    pub async fn shutdown(&self) {
        let handles: Vec<RunHandle> = self.inner.runs.lock().await.drain().map(|(_, h)| h).collect();
        for handle in &handles {
            handle.cancel.cancel();
        }
        for handle in handles {
            if let Err(err) = handle.join.await {
                error!(error = %err, "run task ended abnormally");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get_execution(&self, execution_id: Uuid) -> Result<WorkflowExecution, EngineError> {
        WorkflowExecution::from_row(self.inner.executions.get_execution(execution_id).await?)
    }

    /// Every step attempt of an execution, oldest first.
    pub async fn list_step_executions(&self, execution_id: Uuid) -> Result<Vec<StepExecution>, EngineError> {
        self.inner
            .executions
            .list_step_executions(execution_id)
            .await?
            .into_iter()
            .map(StepExecution::from_row)
            .collect()
    }

    pub async fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<WorkflowExecution>, EngineError> {
        self.inner
            .executions
            .list_executions(filter)
            .await?
            .into_iter()
            .map(WorkflowExecution::from_row)
            .collect()
    }
}

fn not_executable_reason(workflow: &Workflow) -> String {
    if !workflow.is_active {
        "workflow is not active".into()
    } else if workflow.status != WorkflowStatus::Active {
        format!("workflow status is {}", workflow.status)
    } else {
        "workflow has no steps".into()
    }
}

// ---------------------------------------------------------------------------
// The run
// ---------------------------------------------------------------------------

impl Inner {
    async fn load_workflow(&self, id: Uuid) -> Result<Workflow, EngineError> {
        Workflow::from_row(&self.workflows.get_workflow(id).await?)
    }

    async fn publish(&self, event: DomainEvent) {
        let event_type = event.event_type.clone();
        if let Err(err) = self.events.publish(event).await {
            warn!(%event_type, error = %err, "failed to publish event");
        }
    }

    /// Run to a terminal state under the execution deadline.
    #[instrument(skip_all, fields(workflow_id = %workflow.id, execution_id = %execution.id))]
    async fn drive(
        &self,
        workflow: Workflow,
        mut execution: WorkflowExecution,
        cancel: CancellationToken,
    ) -> WorkflowExecution {
        let deadline = match workflow.configuration.max_execution_time_secs {
            0 => self.config.default_max_execution_time(),
            secs => Some(Duration::from_secs(secs)),
        };

        let result = match deadline {
            Some(limit) => {
                tokio::time::timeout(limit, self.execute_workflow(&workflow, &mut execution, &cancel))
                    .await
                    .unwrap_or(Err(EngineError::ExecutionTimedOut))
            }
            None => self.execute_workflow(&workflow, &mut execution, &cancel).await,
        };

        self.finalize(&workflow, &mut execution, result).await;
        self.approvals.close_all(execution.id).await;
        execution
    }

    async fn finalize(
        &self,
        workflow: &Workflow,
        execution: &mut WorkflowExecution,
        result: Result<(), EngineError>,
    ) {
        let transition = match result {
            Ok(()) => execution.complete(),
            Err(EngineError::Cancelled) => execution.cancel(),
            Err(err) => {
                error!(error = %err, "step failure ends execution");
                execution.fail(err.to_string())
            }
        };
        if let Err(err) = transition {
            error!(error = %err, "cannot finalize execution");
            return;
        }

        if let Err(err) = self.executions.update_execution(execution.to_row()).await {
            error!(error = %err, "failed to persist final execution state");
        }

        let event = match execution.status {
            ExecutionStatus::Completed => DomainEvent::execution_completed(workflow, execution),
            ExecutionStatus::Cancelled => DomainEvent::execution_cancelled(workflow, execution),
            _ => DomainEvent::execution_failed(workflow, execution),
        };
        info!(status = %execution.status, retries = execution.retry_count, "execution finished");
        self.publish(event).await;
    }

    /// Advance the frontier level by level until it is empty.
    async fn execute_workflow(
        &self,
        workflow: &Workflow,
        execution: &mut WorkflowExecution,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let Some(entry) = workflow.first_step() else {
            info!("no steps to execute");
            return Ok(());
        };

        let scope = StepScope {
            workflow,
            execution_id: execution.id,
            executed_by: execution.executed_by,
        };
        let descendants = descendants(workflow);
        let mut waiting: IndexSet<Uuid> = IndexSet::from([entry.id]);

        while !waiting.is_empty() {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let frontier = ready_steps(&waiting, &descendants);
            waiting.retain(|id| !frontier.contains(id));
            let steps = frontier
                .iter()
                .map(|id| workflow.step_by_id(*id).ok_or(EngineError::UnknownStep(*id)))
                .collect::<Result<Vec<_>, _>>()?;

            let mut next = IndexSet::new();
            let mut approvals = Vec::new();
            let level = self
                .run_level(&scope, steps, execution, cancel, &mut next, &mut approvals)
                .await;
            if let Err(err) = level {
                let mut records = Vec::with_capacity(approvals.len());
                for approval in approvals {
                    records.push(approval.record);
                }
                self.abandon(records, &err).await;
                return Err(err);
            }

            if !approvals.is_empty() {
                self.settle_approvals(execution, approvals, &mut next, cancel).await?;
            }

            self.executions.update_execution(execution.to_row()).await?;
            waiting.extend(next);
        }

        Ok(())
    }

    /// Sequential steps first, merged one by one; then the parallel steps
    /// on a shared snapshot, merged in frontier order.
    async fn run_level<'a>(
        &self,
        scope: &StepScope<'a>,
        steps: Vec<&'a WorkflowStep>,
        execution: &mut WorkflowExecution,
        cancel: &CancellationToken,
        next: &mut IndexSet<Uuid>,
        approvals: &mut Vec<PendingApproval<'a>>,
    ) -> Result<(), EngineError> {
        let allow_parallel = scope.workflow.configuration.allow_parallel;
        let (parallel, sequential): (Vec<&WorkflowStep>, Vec<&WorkflowStep>) =
            steps.into_iter().partition(|s| s.is_parallel && allow_parallel);
        let level = cancel.child_token();

        for step in sequential {
            if level.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            execution.current_step = Some(step.id);
            let (retries, result) = self.run_with_retry(scope, step, execution.variables.clone(), &level).await;
            execution.retry_count += retries;
            match result {
                Ok(run) => absorb(step, run, &mut execution.variables, next, approvals)?,
                Err(err) if tolerated(step, &err) => pass_over(step, &err, next),
                Err(err) => return Err(err),
            }
        }

        if parallel.is_empty() {
            return Ok(());
        }

        let snapshot = execution.variables.clone();
        let runs = join_all(parallel.iter().map(|step| {
            let level = level.clone();
            let variables = snapshot.clone();
            async move {
                let (retries, result) = self.run_with_retry(scope, step, variables, &level).await;
                if matches!(&result, Err(err) if !tolerated(step, err)) {
                    level.cancel();
                }
                (retries, result)
            }
        }))
        .await;

        // A sibling cancelled by the failing step reports `Cancelled`; the
        // failing step's own error wins.
        let mut failure: Option<EngineError> = None;
        for (step, (retries, result)) in parallel.iter().copied().zip(runs) {
            execution.retry_count += retries;
            execution.current_step = Some(step.id);
            match result {
                Ok(run) => absorb(step, run, &mut execution.variables, next, approvals)?,
                Err(err) if tolerated(step, &err) => pass_over(step, &err, next),
                Err(err) => {
                    if failure.as_ref().map_or(true, |f| matches!(f, EngineError::Cancelled)) {
                        failure = Some(err);
                    }
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Run a step, re-attempting while its outcome asks for a retry.
    ///
    /// Returns the number of re-attempts made alongside the final result.
    async fn run_with_retry(
        &self,
        scope: &StepScope<'_>,
        step: &WorkflowStep,
        variables: Variables,
        cancel: &CancellationToken,
    ) -> (u32, Result<StepRun, EngineError>) {
        let mut attempt = 1;
        loop {
            let ctx = StepContext { variables: variables.clone(), attempt, cancel: cancel.clone() };
            let run = match self.runner.run(scope, step, ctx).await {
                Ok(run) => run,
                Err(err) => return (attempt - 1, Err(err)),
            };

            match run.outcome {
                StepOutcome::Failed { error, should_retry, retry_delay } => {
                    if !should_retry || cancel.is_cancelled() {
                        return (attempt - 1, Err(step_failure(step, error)));
                    }
                    warn!(step_id = %step.id, attempt, delay = ?retry_delay, error = %error, "retrying step");
                    tokio::select! {
                        _ = cancel.cancelled() => return (attempt - 1, Err(EngineError::Cancelled)),
                        _ = tokio::time::sleep(retry_delay) => {}
                    }
                    attempt += 1;
                }
                outcome => return (attempt - 1, Ok(StepRun { record: run.record, outcome })),
            }
        }
    }

    /// Pause, collect every decision, resume, then finish the approval steps.
    async fn settle_approvals(
        &self,
        execution: &mut WorkflowExecution,
        approvals: Vec<PendingApproval<'_>>,
        next: &mut IndexSet<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        execution.pause()?;
        self.executions.update_execution(execution.to_row()).await?;
        info!(pending = approvals.len(), "execution paused for approval");

        let mut decided = Vec::with_capacity(approvals.len());
        let mut pending = approvals.into_iter();
        while let Some(approval) = pending.next() {
            match await_decision(approval.decision, approval.deadline, cancel, execution.id).await {
                Ok(verdict) => decided.push((approval.step, approval.record, verdict)),
                Err(err) => {
                    let mut records = Vec::with_capacity(decided.len() + 1);
                    for (_, record, _) in decided {
                        records.push(record);
                    }
                    records.push(approval.record);
                    for rest in pending {
                        records.push(rest.record);
                    }
                    self.abandon(records, &err).await;
                    return Err(err);
                }
            }
        }

        execution.resume()?;
        self.executions.update_execution(execution.to_row()).await?;

        for (step, record, verdict) in decided {
            execution.current_step = Some(step.id);
            let run = self.runner.resume_approval(step, record, verdict).await?;
            match run.outcome {
                StepOutcome::Completed { output, next_steps } => {
                    execution.variables.merge(&output);
                    next.extend(next_steps);
                }
                StepOutcome::Failed { error, .. } => {
                    let err = step_failure(step, error);
                    if !tolerated(step, &err) {
                        return Err(err);
                    }
                    pass_over(step, &err, next);
                }
                StepOutcome::Skipped { next_steps } => next.extend(next_steps),
                StepOutcome::Waiting { .. } => {}
            }
        }
        Ok(())
    }

    /// Fail approval records that will never be decided.
    async fn abandon(&self, records: Vec<StepExecution>, reason: &EngineError) {
        for record in records {
            if let Err(err) = self.runner.fail_waiting(record, reason).await {
                error!(error = %err, "failed to record abandoned approval");
            }
        }
    }
}

/// Every step reachable from each step through `next_steps`.
fn descendants(workflow: &Workflow) -> HashMap<Uuid, HashSet<Uuid>> {
    let mut reach = HashMap::with_capacity(workflow.steps.len());
    for step in &workflow.steps {
        let mut seen = HashSet::new();
        let mut stack: Vec<Uuid> = step.next_steps.clone();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(next) = workflow.step_by_id(id) {
                stack.extend(next.next_steps.iter().copied());
            }
        }
        reach.insert(step.id, seen);
    }
    reach
}

/// Waiting steps that no other waiting step can still lead to.
///
/// A merge step is held back until every branch feeding it has arrived.
/// If nothing qualifies (only possible on a cyclic graph) everything
/// waiting runs.
fn ready_steps(waiting: &IndexSet<Uuid>, descendants: &HashMap<Uuid, HashSet<Uuid>>) -> IndexSet<Uuid> {
    let ready: IndexSet<Uuid> = waiting
        .iter()
        .copied()
        .filter(|id| {
            !waiting
                .iter()
                .any(|other| other != id && descendants.get(other).is_some_and(|d| d.contains(id)))
        })
        .collect();
    if ready.is_empty() { waiting.clone() } else { ready }
}

/// Fold a finished step into the level state.
fn absorb<'a>(
    step: &'a WorkflowStep,
    run: StepRun,
    variables: &mut Variables,
    next: &mut IndexSet<Uuid>,
    approvals: &mut Vec<PendingApproval<'a>>,
) -> Result<(), EngineError> {
    match run.outcome {
        StepOutcome::Completed { output, next_steps } => {
            variables.merge(&output);
            next.extend(next_steps);
        }
        StepOutcome::Skipped { next_steps } => next.extend(next_steps),
        StepOutcome::Waiting { decision } => approvals.push(PendingApproval {
            step,
            record: run.record,
            decision,
            deadline: step.timeout().map(|limit| (Instant::now() + limit, limit)),
        }),
        StepOutcome::Failed { error, .. } => return Err(step_failure(step, error)),
    }
    Ok(())
}

async fn await_decision(
    decision: oneshot::Receiver<ApprovalDecision>,
    deadline: Option<(Instant, Duration)>,
    cancel: &CancellationToken,
    execution_id: Uuid,
) -> Result<ApprovalDecision, EngineError> {
    let received = async {
        match deadline {
            Some((at, limit)) => match tokio::time::timeout_at(at, decision).await {
                Ok(verdict) => verdict.map_err(|_| EngineError::RunAborted(execution_id)),
                Err(_) => Err(EngineError::StepTimedOut(limit)),
            },
            None => decision.await.map_err(|_| EngineError::RunAborted(execution_id)),
        }
    };
    tokio::select! {
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        verdict = received => verdict,
    }
}

/// Whether the run survives `err` from `step`.
fn tolerated(step: &WorkflowStep, err: &EngineError) -> bool {
    step.is_optional && matches!(err, EngineError::StepFailed { .. })
}

fn pass_over(step: &WorkflowStep, err: &EngineError, next: &mut IndexSet<Uuid>) {
    warn!(step_id = %step.id, error = %err, "optional step failed, continuing");
    next.extend(step.next_steps.iter().copied());
}

/// A terminal step error as the execution reports it.
fn step_failure(step: &WorkflowStep, error: EngineError) -> EngineError {
    match error {
        EngineError::Cancelled | EngineError::StepFailed { .. } => error,
        other => EngineError::StepFailed { step_id: step.id, message: other.to_string() },
    }
}
