//! `send_email` and `send_notification`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    ActionContext, ActionError, ActionHandler, ActionKind, VariableError, Variables, WorkflowAction,
    ports::{EmailMessage, Mailer, Notification, NotificationPriority, NotificationRepository},
    variables::split_list,
};

pub struct EmailActionHandler {
    mailer: Arc<dyn Mailer>,
}

impl EmailActionHandler {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl ActionHandler for EmailActionHandler {
    async fn execute(&self, action: &WorkflowAction, ctx: &ActionContext) -> Result<Variables, ActionError> {
        if action.kind != ActionKind::SendEmail {
            return Err(ActionError::Unsupported(action.kind));
        }
        let params = &action.parameters;

        let to = match params.get_string_list("to")? {
            Some(to) => to,
            None => action.target().map(split_list).unwrap_or_default(),
        };
        if to.is_empty() {
            return Err(VariableError::Missing("to".into()).into());
        }

        let recipients = to.len();
        self.mailer
            .send_email(EmailMessage {
                to,
                subject: params.get_str("subject")?.unwrap_or("Workflow notification").to_owned(),
                body: params.get_str("body")?.unwrap_or_default().to_owned(),
            })
            .await?;

        info!(execution_id = %ctx.execution_id, recipients, "email sent by action");

        let mut out = Variables::new();
        out.insert("email_sent", true);
        out.insert("recipients", recipients);
        Ok(out)
    }
}

pub struct NotificationActionHandler {
    notifications: Arc<dyn NotificationRepository>,
}

impl NotificationActionHandler {
    pub fn new(notifications: Arc<dyn NotificationRepository>) -> Self {
        Self { notifications }
    }
}

/// Parse a notification priority parameter; unknown names are an error.
pub(crate) fn parse_priority(params: &Variables) -> Result<NotificationPriority, ActionError> {
    match params.get_str("priority")? {
        None => Ok(NotificationPriority::default()),
        Some(raw) => serde_json::from_value(serde_json::Value::String(raw.to_owned())).map_err(|e| {
            VariableError::Malformed {
                key: "priority".into(),
                expected: "notification priority",
                reason: e.to_string(),
            }
            .into()
        }),
    }
}

#[async_trait]
impl ActionHandler for NotificationActionHandler {
    async fn execute(&self, action: &WorkflowAction, ctx: &ActionContext) -> Result<Variables, ActionError> {
        if action.kind != ActionKind::SendNotification {
            return Err(ActionError::Unsupported(action.kind));
        }
        let params = &action.parameters;

        let recipients = match params.get_string_list("recipients")? {
            Some(list) => list,
            None => action.target().map(split_list).unwrap_or_default(),
        };
        let title = params.get_str("title")?.unwrap_or("Workflow notification");
        let message = params.get_str("message")?.unwrap_or_default();
        let priority = parse_priority(params)?;

        let mut sent = 0usize;
        for recipient in &recipients {
            let Ok(user_id) = Uuid::parse_str(recipient) else {
                warn!(recipient = %recipient, "skipping notification recipient that is not a user id");
                continue;
            };
            let notification = Notification::for_execution(user_id, ctx.execution_id, title, message)
                .with_priority(priority);
            self.notifications.create_notification(notification).await?;
            sent += 1;
        }

        info!(execution_id = %ctx.execution_id, sent, "notifications sent by action");

        let mut out = Variables::new();
        out.insert("notifications_sent", sent);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryMailer, InMemoryNotifications};
    use serde_json::json;

    fn ctx() -> ActionContext {
        ActionContext::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn email_recipients_come_from_target_list() {
        let mailer = Arc::new(InMemoryMailer::new());
        let handler = EmailActionHandler::new(mailer.clone());
        let action = WorkflowAction::new(ActionKind::SendEmail, "a@x.io, b@x.io")
            .with_param("subject", "Sprint closed");

        let out = handler.execute(&action, &ctx()).await.unwrap();

        assert_eq!(out.get_u64("recipients").unwrap(), Some(2));
        let sent = mailer.sent().await;
        assert_eq!(sent[0].subject, "Sprint closed");
        assert_eq!(sent[0].to, vec!["a@x.io", "b@x.io"]);
    }

    #[tokio::test]
    async fn email_without_recipients_is_invalid() {
        let handler = EmailActionHandler::new(Arc::new(InMemoryMailer::new()));
        let err = handler
            .execute(&WorkflowAction::new(ActionKind::SendEmail, ""), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn notifications_skip_non_uuid_recipients() {
        let store = Arc::new(InMemoryNotifications::new());
        let handler = NotificationActionHandler::new(store.clone());
        let user = Uuid::new_v4();
        let action = WorkflowAction::new(ActionKind::SendNotification, "")
            .with_param("recipients", json!([user.to_string(), "not-a-user"]))
            .with_param("priority", "urgent");

        let out = handler.execute(&action, &ctx()).await.unwrap();

        assert_eq!(out.get_u64("notifications_sent").unwrap(), Some(1));
        let stored = store.notifications().await;
        assert_eq!(stored[0].user_id, user);
        assert_eq!(stored[0].priority, NotificationPriority::Urgent);
    }

    #[tokio::test]
    async fn unknown_priority_is_rejected() {
        let handler = NotificationActionHandler::new(Arc::new(InMemoryNotifications::new()));
        let action = WorkflowAction::new(ActionKind::SendNotification, Uuid::new_v4().to_string())
            .with_param("priority", "whenever");
        assert!(handler.execute(&action, &ctx()).await.is_err());
    }
}
