//! Collaborator ports: the external systems actions and steps talk to.
//!
//! Implementations live outside the engine (a task service, an SMTP relay,
//! …). They must be safe to call concurrently from many executions.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{PortError, Variables};

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// A task to be created by a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub task_type: Option<String>,
    pub priority: Option<String>,
    pub project_id: Option<Uuid>,
    pub assignee_id: Option<Uuid>,
    pub created_by: Uuid,
    /// Origin of the task (workflow id, execution id, step id).
    pub metadata: Variables,
}

/// The task as stored by the task service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub task_type: Option<String>,
    pub priority: Option<String>,
    pub status: String,
    pub project_id: Option<Uuid>,
    pub assignee_id: Option<Uuid>,
    pub created_by: Uuid,
    pub fields: Variables,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create_task(&self, task: NewTask) -> Result<TaskRecord, PortError>;

    /// Apply a partial update; well-known keys (`title`, `description`,
    /// `status`, `priority`) map onto fields, the rest land in `fields`.
    async fn update_task(&self, task_id: Uuid, changes: Variables) -> Result<TaskRecord, PortError>;

    async fn assign_task(&self, task_id: Uuid, assignee_id: Uuid) -> Result<TaskRecord, PortError>;
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// An in-app notification addressed to one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub category: String,
    pub related_id: Option<Uuid>,
    pub related_type: String,
    pub data: Variables,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// A workflow-category notification tied to one execution.
    pub fn for_execution(
        user_id: Uuid,
        execution_id: Uuid,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: title.into(),
            message: message.into(),
            priority: NotificationPriority::Normal,
            category: "workflow".into(),
            related_id: Some(execution_id),
            related_type: "workflow_execution".into(),
            data: Variables::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_data(mut self, data: Variables) -> Self {
        self.data = data;
        self
    }
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create_notification(&self, notification: Notification) -> Result<(), PortError>;
}

// ---------------------------------------------------------------------------
// Email
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_email(&self, message: EmailMessage) -> Result<(), PortError>;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    /// Parsed JSON body, or the raw text wrapped in a JSON string.
    pub body: Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport used by the `webhook` and `api` actions.
///
/// Returns `Ok` for every response the server produced, whatever its
/// status; `Err` only for transport failures.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, PortError>;
}
