//! In-process implementations of the collaborator ports.
//!
//! They record everything they receive, which makes them the natural
//! doubles for tests and the backing services of the CLI `run` command.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    PortError, Variables,
    ports::{
        EmailMessage, HttpRequest, HttpResponse, HttpTransport, Mailer, NewTask, Notification,
        NotificationRepository, TaskRecord, TaskRepository,
    },
};

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryTasks {
    tasks: Mutex<Vec<TaskRecord>>,
}

impl InMemoryTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every task created so far, in creation order.
    pub async fn tasks(&self) -> Vec<TaskRecord> {
        self.tasks.lock().await.clone()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTasks {
    async fn create_task(&self, task: NewTask) -> Result<TaskRecord, PortError> {
        let now = Utc::now();
        let record = TaskRecord {
            id: Uuid::new_v4(),
            title: task.title,
            description: task.description,
            task_type: task.task_type,
            priority: task.priority,
            status: "todo".into(),
            project_id: task.project_id,
            assignee_id: task.assignee_id,
            created_by: task.created_by,
            fields: task.metadata,
            created_at: now,
            updated_at: now,
        };
        self.tasks.lock().await.push(record.clone());
        Ok(record)
    }

    async fn update_task(&self, task_id: Uuid, changes: Variables) -> Result<TaskRecord, PortError> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| PortError::NotFound(format!("task {task_id}")))?;

        for (key, value) in changes {
            match (key.as_str(), &value) {
                ("title", Value::String(v)) => task.title = v.clone(),
                ("description", Value::String(v)) => task.description = v.clone(),
                ("status", Value::String(v)) => task.status = v.clone(),
                ("priority", Value::String(v)) => task.priority = Some(v.clone()),
                _ => {
                    task.fields.insert(key.clone(), value.clone());
                }
            }
        }
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn assign_task(&self, task_id: Uuid, assignee_id: Uuid) -> Result<TaskRecord, PortError> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| PortError::NotFound(format!("task {task_id}")))?;
        task.assignee_id = Some(assignee_id);
        task.updated_at = Utc::now();
        Ok(task.clone())
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryNotifications {
    notifications: Mutex<Vec<Notification>>,
}

impl InMemoryNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().await.clone()
    }

    /// Notifications addressed to one user.
    pub async fn for_user(&self, user_id: Uuid) -> Vec<Notification> {
        self.notifications
            .lock()
            .await
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationRepository for InMemoryNotifications {
    async fn create_notification(&self, notification: Notification) -> Result<(), PortError> {
        self.notifications.lock().await.push(notification);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Email
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryMailer {
    sent: Mutex<Vec<EmailMessage>>,
}

impl InMemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Mailer for InMemoryMailer {
    async fn send_email(&self, message: EmailMessage) -> Result<(), PortError> {
        self.sent.lock().await.push(message);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Records requests and answers from a queue of scripted responses,
/// falling back to `200 {}` once the queue is empty.
#[derive(Default)]
pub struct InMemoryTransport {
    requests: Mutex<Vec<HttpRequest>>,
    responses: Mutex<VecDeque<Result<HttpResponse, PortError>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_response(&self, response: Result<HttpResponse, PortError>) {
        self.responses.lock().await.push_back(response);
    }

    pub async fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().await.clone()
    }

    /// Request counts keyed by URL.
    pub async fn hits(&self) -> HashMap<String, usize> {
        let mut hits = HashMap::new();
        for request in self.requests.lock().await.iter() {
            *hits.entry(request.url.clone()).or_insert(0) += 1;
        }
        hits
    }
}

#[async_trait]
impl HttpTransport for InMemoryTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, PortError> {
        self.requests.lock().await.push(request);
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(HttpResponse { status: 200, body: Value::Object(Default::default()) }))
    }
}
