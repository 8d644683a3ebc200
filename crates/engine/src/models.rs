//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow looks like
//! in memory. They are serialised to/from the JSON `definition` column of
//! a [`WorkflowRow`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use actions::{ports::NotificationPriority, Variables, WorkflowAction};
use store::models::{TriggerRow, WorkflowRow};

use crate::{
    conditions::{ConditionLogic, WorkflowCondition},
    dag::validate_graph,
    EngineError,
};

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    #[default]
    Sequential,
    Parallel,
    Conditional,
    Loop,
    Event,
    Approval,
    Automation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Active,
    Inactive,
    Archived,
    Deprecated,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft      => write!(f, "draft"),
            Self::Active     => write!(f, "active"),
            Self::Inactive   => write!(f, "inactive"),
            Self::Archived   => write!(f, "archived"),
            Self::Deprecated => write!(f, "deprecated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowCategory {
    TaskManagement,
    ProjectManagement,
    ApprovalProcess,
    Notification,
    Integration,
    #[default]
    Automation,
    Reporting,
    QualityControl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    #[default]
    Manual,
    Scheduled,
    Event,
    Webhook,
    Email,
    Api,
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskStepConfig {
    pub title: Option<String>,
    pub description: Option<String>,
    pub task_type: Option<String>,
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalStepConfig {
    /// Approve on behalf of the first approver instead of suspending.
    pub auto_approve: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationStepConfig {
    pub title: Option<String>,
    pub message: Option<String>,
    /// User ids; entries that are not UUIDs are skipped.
    pub recipients: Vec<String>,
    pub priority: NotificationPriority,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitStepConfig {
    /// Humantime string (`"30s"`) or whole milliseconds.
    pub duration: Value,
}

/// What a step does. Kinds with settings carry them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    Task(TaskStepConfig),
    Approval(ApprovalStepConfig),
    Review,
    Notification(NotificationStepConfig),
    /// Pure routing node: its gate is the whole point.
    Condition,
    Action,
    Wait(WaitStepConfig),
    Loop,
    SubWorkflow,
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Task(_)         => "task",
            Self::Approval(_)     => "approval",
            Self::Review          => "review",
            Self::Notification(_) => "notification",
            Self::Condition       => "condition",
            Self::Action          => "action",
            Self::Wait(_)         => "wait",
            Self::Loop            => "loop",
            Self::SubWorkflow     => "sub_workflow",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepAssignment {
    pub user_id: Uuid,
    pub role: String,
}

/// Per-step override of the workflow retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Re-attempts after the first failure.
    pub retries: u32,
    /// Base delay; doubles on every further attempt.
    #[serde(default)]
    pub delay_ms: u64,
}

fn default_true() -> bool {
    true
}

/// A single node of the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: StepKind,
    /// Only used to pick the entry step.
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub conditions: Vec<WorkflowCondition>,
    #[serde(default)]
    pub condition_logic: ConditionLogic,
    #[serde(default)]
    pub actions: Vec<WorkflowAction>,
    #[serde(default)]
    pub assignments: Vec<StepAssignment>,
    #[serde(default)]
    pub next_steps: Vec<Uuid>,
    /// A failed optional step is recorded as failed and the run carries on
    /// to its successors.
    #[serde(default)]
    pub is_optional: bool,
    #[serde(default)]
    pub is_parallel: bool,
    /// Zero means no timeout.
    #[serde(default)]
    pub timeout_hours: u32,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub configuration: Variables,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl WorkflowStep {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            kind,
            order: 0,
            conditions: Vec::new(),
            condition_logic: ConditionLogic::And,
            actions: Vec::new(),
            assignments: Vec::new(),
            next_steps: Vec::new(),
            is_optional: false,
            is_parallel: false,
            timeout_hours: 0,
            retry: None,
            configuration: Variables::new(),
            is_active: true,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn then(mut self, next: &[Uuid]) -> Self {
        self.next_steps.extend_from_slice(next);
        self
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    pub fn parallel(mut self) -> Self {
        self.is_parallel = true;
        self
    }

    pub fn when(mut self, condition: WorkflowCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: WorkflowAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn assigned(mut self, user_id: Uuid, role: impl Into<String>) -> Self {
        self.assignments.push(StepAssignment { user_id, role: role.into() });
        self
    }

    pub fn with_retry(mut self, retries: u32, delay_ms: u64) -> Self {
        self.retry = Some(RetryPolicy { retries, delay_ms });
        self
    }

    /// Bound on dispatch and on an approval wait; `None` when unset.
    pub fn timeout(&self) -> Option<std::time::Duration> {
        (self.timeout_hours > 0).then(|| std::time::Duration::from_secs(u64::from(self.timeout_hours) * 3600))
    }

    /// Users assigned under `role`, in declaration order.
    pub fn users_with_role<'a>(&'a self, role: &'a str) -> impl Iterator<Item = Uuid> + 'a {
        self.assignments
            .iter()
            .filter(move |a| a.role == role)
            .map(|a| a.user_id)
    }
}

// ---------------------------------------------------------------------------
// Triggers and configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTrigger {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub workflow_id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: TriggerKind,
    /// Event name the trigger listens for.
    #[serde(default)]
    pub event: String,
    /// AND-combined against the event payload.
    #[serde(default)]
    pub conditions: Vec<WorkflowCondition>,
    #[serde(default)]
    pub configuration: Variables,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl WorkflowTrigger {
    pub fn on_event(name: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: Uuid::nil(),
            name: name.into(),
            kind: TriggerKind::Event,
            event: event.into(),
            conditions: Vec::new(),
            configuration: Variables::new(),
            is_active: true,
        }
    }

    pub fn when(mut self, condition: WorkflowCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    fn to_row(&self) -> TriggerRow {
        TriggerRow {
            id: self.id,
            workflow_id: self.workflow_id,
            name: self.name.clone(),
            event: self.event.clone(),
            is_active: self.is_active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Zero falls back to the engine-wide default.
    pub max_execution_time_secs: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub notify_on_failure: bool,
    pub notify_on_completion: bool,
    pub allow_parallel: bool,
    pub priority: WorkflowPriority,
    pub settings: Variables,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_execution_time_secs: 0,
            retry_attempts: 0,
            retry_delay_ms: 0,
            notify_on_failure: false,
            notify_on_completion: false,
            allow_parallel: true,
            priority: WorkflowPriority::Normal,
            settings: Variables::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

fn default_version() -> String {
    "1.0".into()
}

fn initial_version_num() -> i64 {
    1
}

/// A named, versioned process definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub workflow_type: WorkflowType,
    #[serde(default)]
    pub status: WorkflowStatus,
    #[serde(default)]
    pub category: WorkflowCategory,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub owner_id: Uuid,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub triggers: Vec<WorkflowTrigger>,
    /// Seed values copied into every execution.
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub configuration: WorkflowConfig,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: Uuid,
    #[serde(default)]
    pub updated_by: Uuid,
    /// Incremented by every lifecycle mutation.
    #[serde(default = "initial_version_num")]
    pub version_num: i64,
}

impl Workflow {
    /// A new draft workflow with no steps.
    pub fn new(name: impl Into<String>, workflow_type: WorkflowType, owner_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            workflow_type,
            status: WorkflowStatus::Draft,
            category: WorkflowCategory::default(),
            version: default_version(),
            owner_id,
            steps: Vec::new(),
            triggers: Vec::new(),
            variables: Variables::new(),
            configuration: WorkflowConfig::default(),
            tags: Vec::new(),
            is_active: false,
            created_at: now,
            updated_at: now,
            created_by: owner_id,
            updated_by: owner_id,
            version_num: 1,
        }
    }

    fn touch(&mut self, by: Uuid) {
        self.updated_by = by;
        self.updated_at = Utc::now();
        self.version_num += 1;
    }

    /// Validate the step graph and make the workflow runnable.
    ///
    /// Returns the topological step order. On a validation error the
    /// workflow is left untouched.
    pub fn activate(&mut self, by: Uuid) -> Result<Vec<Uuid>, EngineError> {
        let order = validate_graph(self)?;
        self.status = WorkflowStatus::Active;
        self.is_active = true;
        self.touch(by);
        Ok(order)
    }

    pub fn deactivate(&mut self, by: Uuid) {
        self.status = WorkflowStatus::Inactive;
        self.is_active = false;
        self.touch(by);
    }

    pub fn archive(&mut self, by: Uuid) {
        self.status = WorkflowStatus::Archived;
        self.is_active = false;
        self.touch(by);
    }

    pub fn add_step(&mut self, step: WorkflowStep) {
        self.steps.push(step);
        self.touch(self.updated_by);
    }

    pub fn add_trigger(&mut self, mut trigger: WorkflowTrigger) {
        trigger.workflow_id = self.id;
        self.triggers.push(trigger);
        self.touch(self.updated_by);
    }

    /// Active, status `active`, and at least one step defined.
    ///
    /// A workflow whose steps are all inactive still executes; the run
    /// completes immediately because there is no entry step.
    pub fn can_execute(&self) -> bool {
        self.is_active && self.status == WorkflowStatus::Active && !self.steps.is_empty()
    }

    /// The active step with the lowest `order`; ties go to the step
    /// declared first.
    pub fn first_step(&self) -> Option<&WorkflowStep> {
        self.steps
            .iter()
            .filter(|s| s.is_active)
            .fold(None, |best: Option<&WorkflowStep>, step| match best {
                Some(b) if b.order <= step.order => Some(b),
                _ => Some(step),
            })
    }

    pub fn step_by_id(&self, id: Uuid) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn trigger_by_id(&self, id: Uuid) -> Option<&WorkflowTrigger> {
        self.triggers.iter().find(|t| t.id == id)
    }

    // -----------------------------------------------------------------------
    // Persistence mapping
    // -----------------------------------------------------------------------

    pub fn to_row(&self) -> Result<WorkflowRow, EngineError> {
        Ok(WorkflowRow {
            id: self.id,
            name: self.name.clone(),
            definition: serde_json::to_value(self)?,
            is_active: self.is_active,
            version_num: self.version_num,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    pub fn from_row(row: &WorkflowRow) -> Result<Self, EngineError> {
        Ok(serde_json::from_value(row.definition.clone())?)
    }

    /// Event index rows for every trigger.
    pub fn trigger_rows(&self) -> Vec<TriggerRow> {
        self.triggers
            .iter()
            .map(|t| TriggerRow { workflow_id: self.id, ..t.to_row() })
            .collect()
    }
}
