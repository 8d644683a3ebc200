//! `create_task`, `update_task` and `assign_task`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    ActionContext, ActionError, ActionHandler, ActionKind, VariableError, Variables, WorkflowAction,
    ports::{NewTask, TaskRepository},
};

/// Handles the three task action kinds against one task repository.
pub struct TaskActionHandler {
    tasks: Arc<dyn TaskRepository>,
}

impl TaskActionHandler {
    pub fn new(tasks: Arc<dyn TaskRepository>) -> Self {
        Self { tasks }
    }

    async fn create(&self, action: &WorkflowAction, ctx: &ActionContext) -> Result<Variables, ActionError> {
        let params = &action.parameters;
        let title = match params.get_str("title")? {
            Some(title) => title.to_owned(),
            None => action
                .target()
                .map(str::to_owned)
                .ok_or_else(|| VariableError::Missing("title".into()))?,
        };

        // Fall back to the execution's project when the action names none.
        let project_id = match params.get_uuid("project_id")? {
            Some(id) => Some(id),
            None => ctx.variables.get_uuid("project_id")?,
        };

        let metadata: Variables = [
            ("workflow_id", json!(ctx.workflow_id)),
            ("execution_id", json!(ctx.execution_id)),
            ("step_id", json!(ctx.step_id)),
        ]
        .into_iter()
        .collect();

        let task = self
            .tasks
            .create_task(NewTask {
                title,
                description: params.get_str("description")?.unwrap_or_default().to_owned(),
                task_type: params.get_str("type")?.map(str::to_owned),
                priority: params.get_str("priority")?.map(str::to_owned),
                project_id,
                assignee_id: params.get_uuid("assignee_id")?,
                created_by: ctx.executed_by,
                metadata,
            })
            .await?;

        info!(task_id = %task.id, step_id = %ctx.step_id, "task created by action");

        let mut out = Variables::new();
        out.insert("task_id", task.id.to_string());
        out.insert("task_title", task.title);
        Ok(out)
    }

    async fn update(&self, action: &WorkflowAction, ctx: &ActionContext) -> Result<Variables, ActionError> {
        let task_id = resolve_task_id(action, ctx)?;

        // Either an explicit `changes` object, or every other parameter.
        let changes = match action.parameters.get_object("changes")? {
            Some(map) => Variables::from(map.clone()),
            None => {
                let mut changes = action.parameters.clone();
                changes.remove("task_id");
                changes
            }
        };
        if changes.is_empty() {
            return Err(ActionError::Fatal(format!("update_task for {task_id} has no changes")));
        }

        let task = self.tasks.update_task(task_id, changes).await?;
        info!(task_id = %task.id, "task updated by action");

        let mut out = Variables::new();
        out.insert("task_id", task.id.to_string());
        out.insert("task_status", task.status);
        Ok(out)
    }

    async fn assign(&self, action: &WorkflowAction, ctx: &ActionContext) -> Result<Variables, ActionError> {
        let task_id = resolve_task_id(action, ctx)?;
        let assignee_id = action
            .parameters
            .get_uuid("assignee_id")?
            .ok_or_else(|| VariableError::Missing("assignee_id".into()))?;

        let task = self.tasks.assign_task(task_id, assignee_id).await?;
        info!(task_id = %task.id, assignee_id = %assignee_id, "task assigned by action");

        let mut out = Variables::new();
        out.insert("task_id", task.id.to_string());
        out.insert("assigned_to", assignee_id.to_string());
        Ok(out)
    }
}

/// `task_id` parameter, then the action target, then the `task_id` a
/// previous step left in the variables.
fn resolve_task_id(action: &WorkflowAction, ctx: &ActionContext) -> Result<Uuid, ActionError> {
    if let Some(id) = action.parameters.get_uuid("task_id")? {
        return Ok(id);
    }
    if let Some(target) = action.target() {
        return Uuid::parse_str(target).map_err(|e| {
            ActionError::InvalidParameter(VariableError::Malformed {
                key: "target".into(),
                expected: "uuid",
                reason: e.to_string(),
            })
        });
    }
    ctx.variables
        .get_uuid("task_id")?
        .ok_or_else(|| VariableError::Missing("task_id".into()).into())
}

#[async_trait]
impl ActionHandler for TaskActionHandler {
    async fn execute(&self, action: &WorkflowAction, ctx: &ActionContext) -> Result<Variables, ActionError> {
        match action.kind {
            ActionKind::CreateTask => self.create(action, ctx).await,
            ActionKind::UpdateTask => self.update(action, ctx).await,
            ActionKind::AssignTask => self.assign(action, ctx).await,
            other => Err(ActionError::Unsupported(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryTasks;

    fn ctx() -> ActionContext {
        ActionContext::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn create_uses_target_as_title_and_project_from_variables() {
        let tasks = Arc::new(InMemoryTasks::new());
        let handler = TaskActionHandler::new(tasks.clone());
        let project = Uuid::new_v4();
        let mut vars = Variables::new();
        vars.insert("project_id", project.to_string());

        let out = handler
            .execute(&WorkflowAction::new(ActionKind::CreateTask, "Review PR"), &ctx().with_variables(vars))
            .await
            .unwrap();

        let stored = tasks.tasks().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, "Review PR");
        assert_eq!(stored[0].project_id, Some(project));
        assert_eq!(out.get_str("task_id").unwrap(), Some(stored[0].id.to_string().as_str()));
    }

    #[tokio::test]
    async fn create_without_title_is_invalid() {
        let handler = TaskActionHandler::new(Arc::new(InMemoryTasks::new()));
        let err = handler
            .execute(&WorkflowAction::new(ActionKind::CreateTask, ""), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidParameter(VariableError::Missing(k)) if k == "title"));
    }

    #[tokio::test]
    async fn assign_reads_task_id_left_by_previous_step() {
        let tasks = Arc::new(InMemoryTasks::new());
        let handler = TaskActionHandler::new(tasks.clone());
        let created = handler
            .execute(&WorkflowAction::new(ActionKind::CreateTask, "Write docs"), &ctx())
            .await
            .unwrap();

        let assignee = Uuid::new_v4();
        let action = WorkflowAction::new(ActionKind::AssignTask, "")
            .with_param("assignee_id", assignee.to_string());
        handler.execute(&action, &ctx().with_variables(created)).await.unwrap();

        assert_eq!(tasks.tasks().await[0].assignee_id, Some(assignee));
    }

    #[tokio::test]
    async fn update_of_unknown_task_is_fatal() {
        let handler = TaskActionHandler::new(Arc::new(InMemoryTasks::new()));
        let action = WorkflowAction::new(ActionKind::UpdateTask, Uuid::new_v4().to_string())
            .with_param("status", "done");
        let err = handler.execute(&action, &ctx()).await.unwrap_err();
        assert!(matches!(err, ActionError::Fatal(_)));
    }
}
