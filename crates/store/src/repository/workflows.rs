//! Workflow definition and trigger index operations.

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    StoreError,
    models::{TriggerRow, WorkflowRow},
};

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Insert a new workflow row.
    ///
    /// `definition` must be the JSON produced by serialising the domain
    /// `Workflow` type from the `engine` crate.
    async fn create_workflow(&self, row: WorkflowRow) -> Result<WorkflowRow, StoreError>;

    /// Fetch a single workflow by its primary key.
    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, StoreError>;

    /// Overwrite an existing workflow row.
    async fn update_workflow(&self, row: WorkflowRow) -> Result<(), StoreError>;

    /// Return all workflows ordered by creation time (newest first).
    async fn list_workflows(&self) -> Result<Vec<WorkflowRow>, StoreError>;

    /// Permanently delete a workflow and its trigger index rows.
    ///
    /// Returns `StoreError::NotFound` if no row was deleted.
    async fn delete_workflow(&self, id: Uuid) -> Result<(), StoreError>;

    /// Replace the trigger index rows of one workflow.
    async fn replace_triggers(
        &self,
        workflow_id: Uuid,
        triggers: Vec<TriggerRow>,
    ) -> Result<(), StoreError>;

    /// All trigger rows listening for `event`, active or not.
    async fn get_triggers_by_event(&self, event: &str) -> Result<Vec<TriggerRow>, StoreError>;
}
