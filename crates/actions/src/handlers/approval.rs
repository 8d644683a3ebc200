//! `approval`: records an approval request; it never decides one.
//!
//! Approval gates that actually suspend an execution are a step kind owned
//! by the engine. This action only tells the approvers a decision is wanted.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    ActionContext, ActionError, ActionHandler, ActionKind, VariableError, Variables, WorkflowAction,
    ports::{Notification, NotificationPriority, NotificationRepository},
    variables::split_list,
};

pub struct ApprovalActionHandler {
    notifications: Arc<dyn NotificationRepository>,
}

impl ApprovalActionHandler {
    pub fn new(notifications: Arc<dyn NotificationRepository>) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl ActionHandler for ApprovalActionHandler {
    async fn execute(&self, action: &WorkflowAction, ctx: &ActionContext) -> Result<Variables, ActionError> {
        if action.kind != ActionKind::Approval {
            return Err(ActionError::Unsupported(action.kind));
        }
        let params = &action.parameters;

        let approvers = match params.get_string_list("approvers")? {
            Some(list) => list,
            None => action.target().map(split_list).unwrap_or_default(),
        };
        let approvers: Vec<Uuid> = approvers
            .iter()
            .filter_map(|raw| match Uuid::parse_str(raw) {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(approver = %raw, "ignoring approver that is not a user id");
                    None
                }
            })
            .collect();
        if approvers.is_empty() {
            return Err(VariableError::Missing("approvers".into()).into());
        }

        let subject = params.get_str("subject")?.unwrap_or("workflow step");
        for approver in &approvers {
            let data: Variables = [
                ("workflow_id", json!(ctx.workflow_id)),
                ("execution_id", json!(ctx.execution_id)),
                ("step_id", json!(ctx.step_id)),
                ("approval_type", json!("workflow_action")),
            ]
            .into_iter()
            .collect();
            let notification = Notification::for_execution(
                *approver,
                ctx.execution_id,
                "Approval Required",
                format!("Your approval is required for: {subject}"),
            )
            .with_priority(NotificationPriority::High)
            .with_data(data);
            self.notifications.create_notification(notification).await?;
        }

        info!(execution_id = %ctx.execution_id, approvers = approvers.len(), "approval requested");

        let mut out = Variables::new();
        out.insert("approval_requested", true);
        out.insert(
            "approvers",
            approvers.iter().map(|id| json!(id)).collect::<Vec<_>>(),
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryNotifications;

    #[tokio::test]
    async fn notifies_each_approver_without_deciding() {
        let store = Arc::new(InMemoryNotifications::new());
        let handler = ApprovalActionHandler::new(store.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let action = WorkflowAction::new(ActionKind::Approval, format!("{a},{b}"));
        let ctx = ActionContext::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let out = handler.execute(&action, &ctx).await.unwrap();

        assert_eq!(out.get_bool("approval_requested").unwrap(), Some(true));
        assert!(!out.contains_key("approved"));
        let sent = store.notifications().await;
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|n| n.priority == NotificationPriority::High));
    }

    #[tokio::test]
    async fn no_valid_approvers_is_an_error() {
        let handler = ApprovalActionHandler::new(Arc::new(InMemoryNotifications::new()));
        let action = WorkflowAction::new(ActionKind::Approval, "someone");
        let ctx = ActionContext::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        assert!(matches!(
            handler.execute(&action, &ctx).await,
            Err(ActionError::InvalidParameter(VariableError::Missing(_)))
        ));
    }
}
