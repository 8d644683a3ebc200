//! Lifecycle events emitted by the orchestrator.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use actions::Variables;

use crate::{execution::WorkflowExecution, models::Workflow};

pub const EXECUTION_STARTED: &str = "workflow.execution.started";
pub const EXECUTION_COMPLETED: &str = "workflow.execution.completed";
pub const EXECUTION_FAILED: &str = "workflow.execution.failed";
pub const EXECUTION_CANCELLED: &str = "workflow.execution.cancelled";

/// A fact about a workflow aggregate, published after it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_type: String,
    /// The workflow the execution belongs to.
    pub aggregate_id: Uuid,
    pub event_data: Variables,
    pub timestamp: DateTime<Utc>,
    pub version: u32,
    pub user_id: Uuid,
}

impl DomainEvent {
    fn for_execution(event_type: &str, workflow: &Workflow, exec: &WorkflowExecution) -> Self {
        let mut event_data = Variables::new();
        event_data.insert("workflow_id", exec.workflow_id.to_string());
        event_data.insert("execution_id", exec.id.to_string());
        event_data.insert("workflow_name", workflow.name.clone());
        event_data.insert("executed_by", exec.executed_by.to_string());
        event_data.insert("started_at", exec.started_at.to_rfc3339());
        event_data.insert("context", exec.context.to_value());
        Self {
            event_type: event_type.to_owned(),
            aggregate_id: exec.workflow_id,
            event_data,
            timestamp: Utc::now(),
            version: 1,
            user_id: exec.executed_by,
        }
    }

    pub fn execution_started(workflow: &Workflow, exec: &WorkflowExecution) -> Self {
        Self::for_execution(EXECUTION_STARTED, workflow, exec)
    }

    pub fn execution_completed(workflow: &Workflow, exec: &WorkflowExecution) -> Self {
        let mut event = Self::for_execution(EXECUTION_COMPLETED, workflow, exec);
        if let Some(at) = exec.completed_at {
            event.event_data.insert("completed_at", at.to_rfc3339());
        }
        let elapsed_ms = exec.elapsed().map(|d| d.num_milliseconds()).unwrap_or_default();
        event.event_data.insert("execution_time_ms", elapsed_ms);
        event.event_data.insert("status", exec.status.to_string());
        event
    }

    pub fn execution_failed(workflow: &Workflow, exec: &WorkflowExecution) -> Self {
        let mut event = Self::for_execution(EXECUTION_FAILED, workflow, exec);
        if let Some(at) = exec.failed_at {
            event.event_data.insert("failed_at", at.to_rfc3339());
        }
        event.event_data.insert("error_message", json!(exec.error_message));
        event.event_data.insert("retry_count", exec.retry_count);
        event
    }

    pub fn execution_cancelled(workflow: &Workflow, exec: &WorkflowExecution) -> Self {
        let mut event = Self::for_execution(EXECUTION_CANCELLED, workflow, exec);
        if let Some(at) = exec.cancelled_at {
            event.event_data.insert("cancelled_at", at.to_rfc3339());
        }
        event
    }
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("event bus unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: DomainEvent) -> Result<(), EventError>;
}

/// Writes every event to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<(), EventError> {
        info!(
            event_type = %event.event_type,
            workflow_id = %event.aggregate_id,
            user_id = %event.user_id,
            "domain event"
        );
        Ok(())
    }
}

/// Keeps published events in memory, in publish order.
#[derive(Debug, Default, Clone)]
pub struct InMemoryEventBus {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn of_type(&self, event_type: &str) -> Vec<DomainEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: DomainEvent) -> Result<(), EventError> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
        Ok(())
    }
}
