//! Action definitions as they appear inside a workflow step.

use serde::{Deserialize, Serialize};

use crate::Variables;

/// The closed set of side-effecting operations a step can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateTask,
    UpdateTask,
    AssignTask,
    SendEmail,
    SendNotification,
    Webhook,
    Api,
    Script,
    Approval,
    Delay,
}

impl ActionKind {
    pub const ALL: [ActionKind; 10] = [
        Self::CreateTask,
        Self::UpdateTask,
        Self::AssignTask,
        Self::SendEmail,
        Self::SendNotification,
        Self::Webhook,
        Self::Api,
        Self::Script,
        Self::Approval,
        Self::Delay,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateTask       => "create_task",
            Self::UpdateTask       => "update_task",
            Self::AssignTask       => "assign_task",
            Self::SendEmail        => "send_email",
            Self::SendNotification => "send_notification",
            Self::Webhook          => "webhook",
            Self::Api              => "api",
            Self::Script           => "script",
            Self::Approval         => "approval",
            Self::Delay            => "delay",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed action attached to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    /// Kind-specific target: a URL, a recipient list, a task id, a script, …
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub parameters: Variables,
}

impl WorkflowAction {
    pub fn new(kind: ActionKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            parameters: Variables::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key, value);
        self
    }

    /// The target, or `None` when it was left blank.
    pub fn target(&self) -> Option<&str> {
        let target = self.target.trim();
        (!target.is_empty()).then_some(target)
    }
}
