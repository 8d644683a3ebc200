//! Execution and step-execution operations.
//!
//! Implementations must serialise writes per execution id; the engine only
//! ever writes an execution's rows from that execution's own task.

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    StoreError,
    models::{ExecutionFilter, ExecutionRow, StepExecutionRow},
};

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn create_execution(&self, row: ExecutionRow) -> Result<(), StoreError>;

    async fn get_execution(&self, id: Uuid) -> Result<ExecutionRow, StoreError>;

    async fn update_execution(&self, row: ExecutionRow) -> Result<(), StoreError>;

    /// Executions matching `filter`, most recently started first.
    async fn list_executions(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionRow>, StoreError>;

    async fn create_step_execution(&self, row: StepExecutionRow) -> Result<(), StoreError>;

    async fn update_step_execution(&self, row: StepExecutionRow) -> Result<(), StoreError>;

    /// Step attempts of one execution in the order they were created.
    async fn list_step_executions(
        &self,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecutionRow>, StoreError>;
}
