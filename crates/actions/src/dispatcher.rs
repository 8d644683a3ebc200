//! Action dispatcher: routes each `WorkflowAction` to the handler
//! registered for its kind.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::{
    ActionContext, ActionError, ActionHandler, ActionKind, Variables, WorkflowAction,
    handlers::{
        ApprovalActionHandler, DelayActionHandler, EmailActionHandler, HttpActionHandler,
        NotificationActionHandler, ScriptActionHandler, TaskActionHandler,
    },
    memory::{InMemoryMailer, InMemoryNotifications, InMemoryTasks, InMemoryTransport},
    ports::{HttpTransport, Mailer, NotificationRepository, TaskRepository},
};

/// Maps action kinds to shared handler implementations.
pub type HandlerRegistry = HashMap<ActionKind, Arc<dyn ActionHandler>>;

/// The external systems the built-in handlers talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub tasks: Arc<dyn TaskRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub mailer: Arc<dyn Mailer>,
    pub http: Arc<dyn HttpTransport>,
}

impl Collaborators {
    /// Recording in-memory collaborators for every port.
    pub fn in_memory() -> Self {
        Self {
            tasks: Arc::new(InMemoryTasks::new()),
            notifications: Arc::new(InMemoryNotifications::new()),
            mailer: Arc::new(InMemoryMailer::new()),
            http: Arc::new(InMemoryTransport::new()),
        }
    }
}

#[derive(Clone, Default)]
pub struct ActionDispatcher {
    registry: HandlerRegistry,
}

impl ActionDispatcher {
    /// An empty dispatcher; every kind is unsupported until registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher with every built-in handler wired to `collaborators`.
    pub fn with_defaults(collaborators: &Collaborators) -> Self {
        let mut dispatcher = Self::new();

        let tasks: Arc<dyn ActionHandler> = Arc::new(TaskActionHandler::new(collaborators.tasks.clone()));
        for kind in [ActionKind::CreateTask, ActionKind::UpdateTask, ActionKind::AssignTask] {
            dispatcher.register(kind, tasks.clone());
        }

        let http: Arc<dyn ActionHandler> = Arc::new(HttpActionHandler::new(collaborators.http.clone()));
        dispatcher.register(ActionKind::Webhook, http.clone());
        dispatcher.register(ActionKind::Api, http);

        dispatcher.register(
            ActionKind::SendEmail,
            Arc::new(EmailActionHandler::new(collaborators.mailer.clone())),
        );
        dispatcher.register(
            ActionKind::SendNotification,
            Arc::new(NotificationActionHandler::new(collaborators.notifications.clone())),
        );
        dispatcher.register(
            ActionKind::Approval,
            Arc::new(ApprovalActionHandler::new(collaborators.notifications.clone())),
        );
        dispatcher.register(ActionKind::Script, Arc::new(ScriptActionHandler::new()));
        dispatcher.register(ActionKind::Delay, Arc::new(DelayActionHandler));
        dispatcher
    }

    /// Register (or replace) the handler for `kind`.
    pub fn register(&mut self, kind: ActionKind, handler: Arc<dyn ActionHandler>) -> &mut Self {
        if self.registry.insert(kind, handler).is_some() {
            debug!(%kind, "replaced action handler");
        }
        self
    }

    pub fn can_execute(&self, kind: ActionKind) -> bool {
        self.registry.contains_key(&kind)
    }

    /// Registered kinds in canonical order.
    pub fn supported_actions(&self) -> Vec<ActionKind> {
        ActionKind::ALL
            .into_iter()
            .filter(|kind| self.registry.contains_key(kind))
            .collect()
    }

    #[instrument(skip(self, action, ctx), fields(kind = %action.kind, step_id = %ctx.step_id))]
    pub async fn execute(&self, action: &WorkflowAction, ctx: &ActionContext) -> Result<Variables, ActionError> {
        let Some(handler) = self.registry.get(&action.kind) else {
            warn!("no handler registered for action");
            return Err(ActionError::Unsupported(action.kind));
        };
        handler.execute(action, ctx).await
    }
}
