//! End-to-end tests for the orchestrator.
//!
//! Everything runs against the in-memory store, the recording in-memory
//! ports and `MockHandler`, so no external services are needed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use uuid::Uuid;

use actions::{
    ActionDispatcher, ActionKind, Collaborators, Variables, WorkflowAction,
    memory::{InMemoryMailer, InMemoryNotifications, InMemoryTasks, InMemoryTransport},
    mock::MockHandler,
};
use store::{
    ExecutionRepository, InMemoryStore, StoreError, WorkflowRepository,
    models::{ExecutionFilter, TriggerRow, WorkflowRow},
};

use crate::{
    EngineConfig, EngineError, ExecutionStatus, InMemoryEventBus, Orchestrator, StepStatus,
    WorkflowExecution,
    conditions::{ConditionOperator, WorkflowCondition},
    events::{EXECUTION_CANCELLED, EXECUTION_COMPLETED, EXECUTION_FAILED, EXECUTION_STARTED},
    models::{
        ApprovalStepConfig, StepKind, TaskStepConfig, WaitStepConfig, Workflow, WorkflowStep,
        WorkflowTrigger, WorkflowType,
    },
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct Harness {
    orchestrator: Orchestrator,
    store: Arc<InMemoryStore>,
    tasks: Arc<InMemoryTasks>,
    notifications: Arc<InMemoryNotifications>,
    events: Arc<InMemoryEventBus>,
    user: Uuid,
}

impl Harness {
    fn new() -> Self {
        Self::with(None, EngineConfig::default())
    }

    fn with_dispatcher(dispatcher: ActionDispatcher) -> Self {
        Self::with(Some(dispatcher), EngineConfig::default())
    }

    fn with(dispatcher: Option<ActionDispatcher>, config: EngineConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let tasks = Arc::new(InMemoryTasks::new());
        let notifications = Arc::new(InMemoryNotifications::new());
        let events = Arc::new(InMemoryEventBus::new());
        let collaborators = Collaborators {
            tasks: tasks.clone(),
            notifications: notifications.clone(),
            mailer: Arc::new(InMemoryMailer::new()),
            http: Arc::new(InMemoryTransport::new()),
        };

        let mut builder = Orchestrator::builder(store.clone(), store.clone())
            .collaborators(collaborators)
            .events(events.clone())
            .config(config);
        if let Some(dispatcher) = dispatcher {
            builder = builder.dispatcher(dispatcher);
        }

        Self { orchestrator: builder.build(), store, tasks, notifications, events, user: Uuid::new_v4() }
    }

    /// Activate and store `steps` as one workflow.
    async fn deploy(&self, steps: Vec<WorkflowStep>) -> Workflow {
        let mut workflow = Workflow::new("test", WorkflowType::Sequential, self.user);
        for step in steps {
            workflow.add_step(step);
        }
        self.deploy_workflow(workflow).await
    }

    async fn deploy_workflow(&self, mut workflow: Workflow) -> Workflow {
        workflow.activate(self.user).expect("workflow should validate");
        self.orchestrator.create_workflow(&workflow).await.unwrap();
        workflow
    }

    async fn run(&self, workflow: &Workflow, data: Value) -> WorkflowExecution {
        let started = self
            .orchestrator
            .start_workflow(workflow.id, self.user, vars(data))
            .await
            .expect("workflow should start");
        self.orchestrator.wait_for(started.id).await.unwrap()
    }

    async fn records(&self, execution_id: Uuid) -> Vec<crate::StepExecution> {
        self.orchestrator.list_step_executions(execution_id).await.unwrap()
    }

    /// Poll until the execution reaches `status`.
    async fn await_status(&self, execution_id: Uuid, status: ExecutionStatus) {
        for _ in 0..500 {
            let execution = self.orchestrator.get_execution(execution_id).await.unwrap();
            if execution.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("execution never reached {status}");
    }

    /// Poll until some step of the execution is recorded in `status`.
    async fn await_step(&self, execution_id: Uuid, step_id: Uuid, status: StepStatus) {
        for _ in 0..500 {
            if self.records(execution_id).await.iter().any(|r| r.step_id == step_id && r.status == status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("step never reached {status}");
    }
}

fn vars(value: Value) -> Variables {
    Variables::from_value(value).unwrap()
}

fn script(target: &str) -> WorkflowAction {
    WorkflowAction::new(ActionKind::Script, target)
}

fn action_step(name: &str, order: i32) -> WorkflowStep {
    WorkflowStep::new(name, StepKind::Action).with_order(order).with_action(script(name))
}

fn dispatcher_with(handler: Arc<MockHandler>) -> ActionDispatcher {
    let mut dispatcher = ActionDispatcher::new();
    dispatcher.register(ActionKind::Script, handler);
    dispatcher
}

// ---------------------------------------------------------------------------
// Basic runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_task_step_completes_and_creates_a_task() {
    let h = Harness::new();
    let step = WorkflowStep::new("File expenses", StepKind::Task(TaskStepConfig::default()));
    let workflow = h.deploy(vec![step]).await;

    let execution = h.run(&workflow, json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.completed_at.is_some());
    let tasks = h.tasks.tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "File expenses");
    assert_eq!(execution.variables.get_str("task_id").unwrap(), Some(tasks[0].id.to_string().as_str()));

    let stored = h.orchestrator.get_execution(execution.id).await.unwrap();
    assert_eq!(stored.status, ExecutionStatus::Completed);
    assert_eq!(h.events.of_type(EXECUTION_STARTED).len(), 1);
    assert_eq!(h.events.of_type(EXECUTION_COMPLETED).len(), 1);
}

#[tokio::test]
async fn fan_in_step_runs_once_after_both_branches() {
    let handler = Arc::new(MockHandler::succeeding());
    let h = Harness::with_dispatcher(dispatcher_with(handler.clone()));

    //   A
    //  / \
    // B   C   (parallel)
    //  \ /
    //   D
    let d = action_step("d", 4);
    let b = action_step("b", 2).parallel().then(&[d.id]);
    let c = action_step("c", 3).parallel().then(&[d.id]);
    let a = action_step("a", 1).then(&[b.id, c.id]);
    let d_id = d.id;
    let workflow = h.deploy(vec![a, b, c, d]).await;

    let execution = h.run(&workflow, json!({})).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);

    let targets: Vec<String> = handler.calls().into_iter().map(|c| c.target).collect();
    assert_eq!(targets.len(), 4);
    assert_eq!(targets[0], "a");
    assert_eq!(targets[3], "d");
    assert_eq!(targets.iter().filter(|t| *t == "d").count(), 1);

    let records = h.records(execution.id).await;
    assert_eq!(records.iter().filter(|r| r.step_id == d_id).count(), 1);
    assert_eq!(execution.current_step, Some(d_id));
}

#[tokio::test]
async fn merge_step_waits_for_the_longer_branch() {
    let handler = Arc::new(MockHandler::succeeding());
    let h = Harness::with_dispatcher(dispatcher_with(handler.clone()));

    //   A
    //  / \
    // B   C
    // |   E
    // |   F
    //  \ /
    //   D
    let d = action_step("d", 6);
    let f = action_step("f", 5).then(&[d.id]);
    let e = action_step("e", 4).then(&[f.id]);
    let b = action_step("b", 2).then(&[d.id]);
    let c = action_step("c", 3).then(&[e.id]);
    let a = action_step("a", 1).then(&[b.id, c.id]);
    let d_id = d.id;
    let workflow = h.deploy(vec![a, b, c, d, e, f]).await;

    let execution = h.run(&workflow, json!({})).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);

    let targets: Vec<String> = handler.calls().into_iter().map(|c| c.target).collect();
    assert_eq!(targets, ["a", "b", "c", "e", "f", "d"]);
    let records = h.records(execution.id).await;
    assert_eq!(records.iter().filter(|r| r.step_id == d_id).count(), 1);
}

#[tokio::test]
async fn parallel_branches_see_the_same_snapshot() {
    let handler = Arc::new(MockHandler::returning(vars(json!({ "touched": true }))));
    let h = Harness::with_dispatcher(dispatcher_with(handler.clone()));

    let b = action_step("b", 2).parallel();
    let c = action_step("c", 3).parallel();
    let a = WorkflowStep::new("a", StepKind::Condition).with_order(1).then(&[b.id, c.id]);
    let workflow = h.deploy(vec![a, b, c]).await;

    let execution = h.run(&workflow, json!({})).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    for call in handler.calls() {
        assert!(!call.variables.contains_key("touched"), "siblings must not see each other's output");
    }
    assert_eq!(execution.variables.get_bool("touched").unwrap(), Some(true));
    assert_eq!(execution.variables.get_bool("condition_met").unwrap(), Some(true));
}

#[tokio::test]
async fn false_gate_skips_and_still_follows_successors() {
    let h = Harness::new();
    let follow_up = WorkflowStep::new("Follow up", StepKind::Task(TaskStepConfig::default())).with_order(2);
    let gated = WorkflowStep::new("Escalate", StepKind::Task(TaskStepConfig::default()))
        .with_order(1)
        .when(WorkflowCondition::new("priority", ConditionOperator::Equals, "high"))
        .then(&[follow_up.id]);
    let (gated_id, follow_up_id) = (gated.id, follow_up.id);
    let workflow = h.deploy(vec![gated, follow_up]).await;

    let execution = h.run(&workflow, json!({ "priority": "low" })).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let records = h.records(execution.id).await;
    assert_eq!(records.len(), 2);
    assert_eq!((records[0].step_id, records[0].status), (gated_id, StepStatus::Skipped));
    assert_eq!((records[1].step_id, records[1].status), (follow_up_id, StepStatus::Completed));
    let [task] = h.tasks.tasks().await.try_into().unwrap();
    assert_eq!(task.title, "Follow up");
}

#[tokio::test]
async fn failing_action_fails_the_execution_and_halts() {
    let h = Harness::with_dispatcher(dispatcher_with(Arc::new(MockHandler::failing_fatal("ledger locked"))));
    let after = WorkflowStep::new("never", StepKind::Task(TaskStepConfig::default())).with_order(2);
    let failing = action_step("post", 1).then(&[after.id]);
    let workflow = h.deploy(vec![failing, after]).await;

    let execution = h.run(&workflow, json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.failed_at.is_some());
    let message = execution.error_message.expect("error message populated");
    assert!(message.contains("ledger locked"), "unexpected message: {message}");

    let records = h.records(execution.id).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, StepStatus::Failed);
    assert!(h.tasks.tasks().await.is_empty());

    let [event] = h.events.of_type(EXECUTION_FAILED).try_into().unwrap();
    assert_eq!(event.event_data.get_str("error_message").unwrap(), Some(message.as_str()));
}

#[tokio::test]
async fn failed_optional_step_lets_the_run_continue() {
    let mut dispatcher = ActionDispatcher::new();
    dispatcher.register(ActionKind::Webhook, Arc::new(MockHandler::failing_fatal("crm offline")));
    let h = Harness::with_dispatcher(dispatcher);

    let after = WorkflowStep::new("Follow up", StepKind::Task(TaskStepConfig::default())).with_order(2);
    let sync = WorkflowStep::new("sync crm", StepKind::Action)
        .with_order(1)
        .optional()
        .with_action(WorkflowAction::new(ActionKind::Webhook, "crm"))
        .then(&[after.id]);
    let sync_id = sync.id;
    let workflow = h.deploy(vec![sync, after]).await;

    let execution = h.run(&workflow, json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let records = h.records(execution.id).await;
    let failed = records.iter().find(|r| r.step_id == sync_id).unwrap();
    assert_eq!(failed.status, StepStatus::Failed);
    assert!(failed.error_message.as_deref().unwrap_or_default().contains("crm offline"));
    assert_eq!(h.tasks.tasks().await.len(), 1);
}

#[tokio::test]
async fn workflow_without_active_steps_completes_immediately() {
    let h = Harness::new();
    let mut parked = WorkflowStep::new("parked", StepKind::Task(TaskStepConfig::default()));
    parked.is_active = false;
    let workflow = h.deploy(vec![parked]).await;

    let execution = h.run(&workflow, json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(h.records(execution.id).await.is_empty());
}

#[tokio::test]
async fn draft_workflow_is_not_executable() {
    let h = Harness::new();
    let workflow = Workflow::new("draft", WorkflowType::Sequential, h.user);
    h.orchestrator.create_workflow(&workflow).await.unwrap();

    let err = h.orchestrator.start_workflow(workflow.id, h.user, Variables::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotExecutable { workflow_id, .. } if workflow_id == workflow.id));
    let all = h.orchestrator.list_executions(&ExecutionFilter::default()).await.unwrap();
    assert!(all.is_empty());
}

#[tokio::test]
async fn dangling_successor_fails_at_traversal() {
    let h = Harness::new();
    let mut workflow = Workflow::new("dangling", WorkflowType::Sequential, h.user);
    workflow.add_step(WorkflowStep::new("start", StepKind::Condition));
    workflow.activate(h.user).unwrap();
    let ghost = Uuid::new_v4();
    workflow.steps[0].next_steps.push(ghost);
    h.orchestrator.create_workflow(&workflow).await.unwrap();

    let execution = h.run(&workflow, json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error_message, Some(EngineError::UnknownStep(ghost).to_string()));
}

#[tokio::test]
async fn trigger_data_seeds_variables_and_outputs_accumulate() {
    let handler = Arc::new(MockHandler::returning(vars(json!({ "invoice": "INV-7" }))));
    let h = Harness::with_dispatcher(dispatcher_with(handler.clone()));
    let second = action_step("second", 2);
    let first = action_step("first", 1).then(&[second.id]);

    let mut workflow = Workflow::new("seeded", WorkflowType::Sequential, h.user);
    workflow.variables.insert("currency", "EUR");
    workflow.add_step(first);
    workflow.add_step(second);
    let workflow = h.deploy_workflow(workflow).await;

    let execution = h.run(&workflow, json!({ "customer": "acme" })).await;

    assert_eq!(execution.context, vars(json!({ "customer": "acme" })));
    assert_eq!(
        execution.variables,
        vars(json!({ "currency": "EUR", "customer": "acme", "invoice": "INV-7" }))
    );
    let calls = handler.calls();
    assert!(!calls[0].variables.contains_key("invoice"));
    assert!(calls[1].variables.contains_key("invoice"));
}

// ---------------------------------------------------------------------------
// Approvals
// ---------------------------------------------------------------------------

fn approval_workflow_steps(approver: Uuid) -> (WorkflowStep, WorkflowStep) {
    let publish = WorkflowStep::new("Publish", StepKind::Task(TaskStepConfig::default())).with_order(2);
    let approval = WorkflowStep::new("Legal review", StepKind::Approval(ApprovalStepConfig::default()))
        .with_order(1)
        .assigned(approver, "approver")
        .then(&[publish.id]);
    (approval, publish)
}

#[tokio::test]
async fn approval_pauses_until_approved() {
    let h = Harness::new();
    let approver = Uuid::new_v4();
    let (approval, publish) = approval_workflow_steps(approver);
    let approval_id = approval.id;
    let workflow = h.deploy(vec![approval, publish]).await;

    let started = h.orchestrator.start_workflow(workflow.id, h.user, Variables::new()).await.unwrap();
    h.await_status(started.id, ExecutionStatus::Paused).await;

    let [notice] = h.notifications.for_user(approver).await.try_into().unwrap();
    assert_eq!(notice.message, "Your approval is required for: Legal review");
    assert!(h.tasks.tasks().await.is_empty());

    h.orchestrator
        .approve_step(started.id, approval_id, approver, Some("looks fine".into()))
        .await
        .unwrap();
    let execution = h.orchestrator.wait_for(started.id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.variables.get_bool("approved").unwrap(), Some(true));
    assert_eq!(execution.variables.get_str("comment").unwrap(), Some("looks fine"));
    assert_eq!(h.tasks.tasks().await.len(), 1);

    let again = h.orchestrator.approve_step(started.id, approval_id, approver, None).await;
    assert!(matches!(again, Err(EngineError::ApprovalNotPending { .. })));
}

#[tokio::test]
async fn rejected_approval_fails_the_execution() {
    let h = Harness::new();
    let approver = Uuid::new_v4();
    let (approval, publish) = approval_workflow_steps(approver);
    let approval_id = approval.id;
    let workflow = h.deploy(vec![approval, publish]).await;

    let started = h.orchestrator.start_workflow(workflow.id, h.user, Variables::new()).await.unwrap();
    h.await_status(started.id, ExecutionStatus::Paused).await;
    h.orchestrator.reject_step(started.id, approval_id, approver, None).await.unwrap();
    let execution = h.orchestrator.wait_for(started.id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error_message, Some(format!("approval rejected by {approver}")));
    assert!(h.tasks.tasks().await.is_empty());
    let records = h.records(started.id).await;
    assert_eq!(records[0].status, StepStatus::Failed);
}

#[tokio::test]
async fn engine_auto_approve_skips_the_wait() {
    let approver = Uuid::new_v4();
    let config = EngineConfig { auto_approve: true, ..EngineConfig::default() };
    let h = Harness::with(None, config);
    let (approval, publish) = approval_workflow_steps(approver);
    let workflow = h.deploy(vec![approval, publish]).await;

    let execution = h.run(&workflow, json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.variables.get_str("approved_by").unwrap(), Some(approver.to_string().as_str()));
}

// ---------------------------------------------------------------------------
// Cancellation, retries and deadlines
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_interrupts_a_wait_step() {
    let h = Harness::new();
    let wait = WorkflowStep::new("cool off", StepKind::Wait(WaitStepConfig { duration: json!("1h") }));
    let wait_id = wait.id;
    let workflow = h.deploy(vec![wait]).await;

    let started = h.orchestrator.start_workflow(workflow.id, h.user, Variables::new()).await.unwrap();
    h.await_step(started.id, wait_id, StepStatus::Running).await;
    h.orchestrator.cancel_execution(started.id).await.unwrap();
    let execution = h.orchestrator.wait_for(started.id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert!(execution.cancelled_at.is_some());
    assert_eq!(h.events.of_type(EXECUTION_CANCELLED).len(), 1);
    assert!(matches!(
        h.orchestrator.cancel_execution(started.id).await,
        Err(EngineError::ExecutionNotRunning(_))
    ));
}

#[tokio::test]
async fn cancel_while_paused_for_approval() {
    let h = Harness::new();
    let (approval, publish) = approval_workflow_steps(Uuid::new_v4());
    let workflow = h.deploy(vec![approval, publish]).await;

    let started = h.orchestrator.start_workflow(workflow.id, h.user, Variables::new()).await.unwrap();
    h.await_status(started.id, ExecutionStatus::Paused).await;
    h.orchestrator.cancel_execution(started.id).await.unwrap();
    let execution = h.orchestrator.wait_for(started.id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    let records = h.records(started.id).await;
    assert_eq!(records[0].status, StepStatus::Failed);
    assert_eq!(records[0].error_message.as_deref(), Some("execution cancelled"));
}

#[tokio::test]
async fn cancelling_an_unknown_execution_fails() {
    let h = Harness::new();
    let id = Uuid::new_v4();
    assert!(matches!(
        h.orchestrator.cancel_execution(id).await,
        Err(EngineError::ExecutionNotRunning(missing)) if missing == id
    ));
}

#[tokio::test]
async fn flaky_step_is_retried_with_a_record_per_attempt() {
    let handler = Arc::new(MockHandler::flaky(2, vars(json!({ "synced": true }))));
    let h = Harness::with_dispatcher(dispatcher_with(handler.clone()));
    let step = action_step("sync", 1).with_retry(3, 5);
    let workflow = h.deploy(vec![step]).await;

    let execution = h.run(&workflow, json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.retry_count, 2);
    assert_eq!(handler.call_count(), 3);
    let records = h.records(execution.id).await;
    let attempts: Vec<(StepStatus, u32)> = records.iter().map(|r| (r.status, r.retry_count)).collect();
    assert_eq!(
        attempts,
        vec![(StepStatus::Failed, 0), (StepStatus::Failed, 1), (StepStatus::Completed, 2)]
    );
}

#[tokio::test]
async fn retries_are_capped_by_engine_config() {
    let handler = Arc::new(MockHandler::failing_retryable("upstream 503"));
    let config = EngineConfig { max_retry_attempts: 1, retry_base_delay_ms: 1, ..EngineConfig::default() };
    let h = Harness::with(Some(dispatcher_with(handler.clone())), config);
    let step = action_step("push", 1).with_retry(5, 0);
    let workflow = h.deploy(vec![step]).await;

    let execution = h.run(&workflow, json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(handler.call_count(), 2);
    assert_eq!(execution.retry_count, 1);
    let [event] = h.events.of_type(EXECUTION_FAILED).try_into().unwrap();
    assert_eq!(event.event_data.get_u64("retry_count").unwrap(), Some(1));
}

#[tokio::test]
async fn failing_parallel_branch_cancels_its_siblings() {
    let slow = Arc::new(MockHandler::succeeding().with_latency(Duration::from_secs(3600)));
    let broken = Arc::new(MockHandler::failing_fatal("card declined"));
    let mut dispatcher = ActionDispatcher::new();
    dispatcher.register(ActionKind::Script, slow);
    dispatcher.register(ActionKind::Webhook, broken);
    let h = Harness::with_dispatcher(dispatcher);

    let b = WorkflowStep::new("slow", StepKind::Action).with_order(2).parallel().with_action(script("slow"));
    let c = WorkflowStep::new("charge", StepKind::Action)
        .with_order(3)
        .parallel()
        .with_action(WorkflowAction::new(ActionKind::Webhook, "charge"));
    let a = WorkflowStep::new("fork", StepKind::Condition).with_order(1).then(&[b.id, c.id]);
    let workflow = h.deploy(vec![a, b, c]).await;

    let execution = tokio::time::timeout(Duration::from_secs(10), h.run(&workflow, json!({})))
        .await
        .expect("sibling should have been cancelled");

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error_message.unwrap().contains("card declined"));
}

#[tokio::test(start_paused = true)]
async fn max_execution_time_fails_the_run() {
    let h = Harness::new();
    let wait = WorkflowStep::new("forever", StepKind::Wait(WaitStepConfig { duration: json!("1h") }));
    let mut workflow = Workflow::new("bounded", WorkflowType::Sequential, h.user);
    workflow.configuration.max_execution_time_secs = 5;
    workflow.add_step(wait);
    let workflow = h.deploy_workflow(workflow).await;

    let execution = h.run(&workflow, json!({})).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error_message.as_deref(), Some("workflow exceeded max execution time"));
}

// ---------------------------------------------------------------------------
// Triggers and queries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_start_workflows_whose_triggers_match() {
    let h = Harness::new();
    let mut workflow = Workflow::new("big deals", WorkflowType::Event, h.user);
    workflow.add_step(WorkflowStep::new("Thank customer", StepKind::Task(TaskStepConfig::default())));
    workflow.add_trigger(
        WorkflowTrigger::on_event("large deal", "deal.closed")
            .when(WorkflowCondition::new("amount", ConditionOperator::GreaterThan, 1000)),
    );
    let trigger_id = workflow.triggers[0].id;
    let workflow = h.deploy_workflow(workflow).await;

    let small = h.orchestrator.handle_event("deal.closed", vars(json!({ "amount": 10 })), h.user).await.unwrap();
    assert!(small.is_empty());
    let other = h.orchestrator.handle_event("deal.lost", vars(json!({ "amount": 5000 })), h.user).await.unwrap();
    assert!(other.is_empty());

    let started = h
        .orchestrator
        .handle_event("deal.closed", vars(json!({ "amount": 5000 })), h.user)
        .await
        .unwrap();
    let [execution] = started.try_into().unwrap();
    assert_eq!(execution.trigger_id, Some(trigger_id));
    assert_eq!(execution.workflow_id, workflow.id);

    let finished = h.orchestrator.wait_for(execution.id).await.unwrap();
    assert_eq!(finished.status, ExecutionStatus::Completed);
    assert_eq!(finished.context.get_i64("amount").unwrap(), Some(5000));
}

#[tokio::test]
async fn executions_can_be_listed_by_status() {
    let handler = Arc::new(MockHandler::succeeding());
    let h = Harness::with_dispatcher(dispatcher_with(handler));
    let workflow = h.deploy(vec![action_step("only", 1)]).await;

    for _ in 0..3 {
        h.run(&workflow, json!({})).await;
    }

    let filter = ExecutionFilter {
        workflow_id: Some(workflow.id),
        statuses: vec![ExecutionStatus::Completed],
        ..ExecutionFilter::default()
    };
    assert_eq!(h.orchestrator.list_executions(&filter).await.unwrap().len(), 3);
    assert_eq!(h.store.list_executions(&ExecutionFilter::default()).await.unwrap().len(), 3);
}

/// Reports one extra trigger row whose workflow no longer exists.
struct StaleTriggerIndex {
    store: Arc<InMemoryStore>,
    stale: TriggerRow,
}

#[async_trait]
impl WorkflowRepository for StaleTriggerIndex {
    async fn create_workflow(&self, row: WorkflowRow) -> Result<WorkflowRow, StoreError> {
        self.store.create_workflow(row).await
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, StoreError> {
        self.store.get_workflow(id).await
    }

    async fn update_workflow(&self, row: WorkflowRow) -> Result<(), StoreError> {
        self.store.update_workflow(row).await
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowRow>, StoreError> {
        self.store.list_workflows().await
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<(), StoreError> {
        self.store.delete_workflow(id).await
    }

    async fn replace_triggers(&self, workflow_id: Uuid, triggers: Vec<TriggerRow>) -> Result<(), StoreError> {
        self.store.replace_triggers(workflow_id, triggers).await
    }

    async fn get_triggers_by_event(&self, event: &str) -> Result<Vec<TriggerRow>, StoreError> {
        let mut rows = vec![self.stale.clone()];
        rows.extend(self.store.get_triggers_by_event(event).await?);
        Ok(rows)
    }
}

#[tokio::test]
async fn trigger_of_a_deleted_workflow_does_not_block_the_event() {
    let store = Arc::new(InMemoryStore::new());
    let index = Arc::new(StaleTriggerIndex {
        store: store.clone(),
        stale: TriggerRow {
            id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            name: "orphan".into(),
            event: "deal.closed".into(),
            is_active: true,
        },
    });
    let orchestrator = Orchestrator::builder(index, store.clone()).build();

    let user = Uuid::new_v4();
    let mut workflow = Workflow::new("deals", WorkflowType::Event, user);
    workflow.add_step(WorkflowStep::new("Thank customer", StepKind::Task(TaskStepConfig::default())));
    workflow.add_trigger(WorkflowTrigger::on_event("any deal", "deal.closed"));
    workflow.activate(user).unwrap();
    orchestrator.create_workflow(&workflow).await.unwrap();

    let started = orchestrator.handle_event("deal.closed", vars(json!({})), user).await.unwrap();
    let [execution] = started.try_into().unwrap();
    assert_eq!(execution.workflow_id, workflow.id);
    let finished = orchestrator.wait_for(execution.id).await.unwrap();
    assert_eq!(finished.status, ExecutionStatus::Completed);
}
