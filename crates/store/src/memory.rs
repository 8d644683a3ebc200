//! In-memory store backed by a single `RwLock`.
//!
//! Every write takes the lock exclusively, which trivially satisfies the
//! single-writer-per-execution requirement of the engine.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::{
    ExecutionRepository, StoreError, WorkflowRepository,
    models::{ExecutionFilter, ExecutionRow, StepExecutionRow, TriggerRow, WorkflowRow},
};

#[derive(Default)]
struct Tables {
    workflows: HashMap<Uuid, WorkflowRow>,
    triggers: HashMap<Uuid, Vec<TriggerRow>>,
    executions: HashMap<Uuid, ExecutionRow>,
    /// Insertion-ordered so listings reflect attempt order.
    step_executions: Vec<StepExecutionRow>,
    step_index: HashMap<Uuid, usize>,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryStore {
    async fn create_workflow(&self, row: WorkflowRow) -> Result<WorkflowRow, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.workflows.contains_key(&row.id) {
            return Err(StoreError::Conflict { entity: "workflow", id: row.id });
        }
        debug!(workflow_id = %row.id, "storing workflow");
        tables.workflows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, StoreError> {
        self.tables
            .read()
            .await
            .workflows
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "workflow", id })
    }

    async fn update_workflow(&self, row: WorkflowRow) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        match tables.workflows.get_mut(&row.id) {
            Some(existing) => {
                *existing = row;
                Ok(())
            }
            None => Err(StoreError::NotFound { entity: "workflow", id: row.id }),
        }
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowRow>, StoreError> {
        let mut rows: Vec<WorkflowRow> =
            self.tables.read().await.workflows.values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.workflows.remove(&id).is_none() {
            return Err(StoreError::NotFound { entity: "workflow", id });
        }
        tables.triggers.remove(&id);
        Ok(())
    }

    async fn replace_triggers(
        &self,
        workflow_id: Uuid,
        triggers: Vec<TriggerRow>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.workflows.contains_key(&workflow_id) {
            return Err(StoreError::NotFound { entity: "workflow", id: workflow_id });
        }
        tables.triggers.insert(workflow_id, triggers);
        Ok(())
    }

    async fn get_triggers_by_event(&self, event: &str) -> Result<Vec<TriggerRow>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .triggers
            .values()
            .flatten()
            .filter(|t| t.event == event)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryStore {
    async fn create_execution(&self, row: ExecutionRow) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.executions.contains_key(&row.id) {
            return Err(StoreError::Conflict { entity: "execution", id: row.id });
        }
        tables.executions.insert(row.id, row);
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<ExecutionRow, StoreError> {
        self.tables
            .read()
            .await
            .executions
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "execution", id })
    }

    async fn update_execution(&self, row: ExecutionRow) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        match tables.executions.get_mut(&row.id) {
            Some(existing) => {
                *existing = row;
                Ok(())
            }
            None => Err(StoreError::NotFound { entity: "execution", id: row.id }),
        }
    }

    async fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionRow>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<ExecutionRow> = tables
            .executions
            .values()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn create_step_execution(&self, row: StepExecutionRow) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.step_index.contains_key(&row.id) {
            return Err(StoreError::Conflict { entity: "step_execution", id: row.id });
        }
        if !tables.executions.contains_key(&row.execution_id) {
            return Err(StoreError::NotFound { entity: "execution", id: row.execution_id });
        }
        let position = tables.step_executions.len();
        tables.step_index.insert(row.id, position);
        tables.step_executions.push(row);
        Ok(())
    }

    async fn update_step_execution(&self, row: StepExecutionRow) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let Some(&position) = tables.step_index.get(&row.id) else {
            return Err(StoreError::NotFound { entity: "step_execution", id: row.id });
        };
        tables.step_executions[position] = row;
        Ok(())
    }

    async fn list_step_executions(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecutionRow>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .step_executions
            .iter()
            .filter(|row| row.execution_id == execution_id)
            .cloned()
            .collect())
    }
}
