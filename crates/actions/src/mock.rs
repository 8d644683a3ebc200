//! `MockHandler`: a scriptable test double for `ActionHandler`.
//!
//! Register it in place of a real handler to drive the engine through
//! success, transient failure and permanent failure without touching any
//! collaborator.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{ActionContext, ActionError, ActionHandler, Variables, WorkflowAction};

/// What a `MockHandler` does on one call.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Succeed with these output variables.
    Return(Variables),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
}

impl MockBehaviour {
    fn outcome(&self) -> Result<Variables, ActionError> {
        match self {
            Self::Return(out) => Ok(out.clone()),
            Self::FailRetryable(msg) => Err(ActionError::Retryable(msg.clone())),
            Self::FailFatal(msg) => Err(ActionError::Fatal(msg.clone())),
        }
    }
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub step_id: Uuid,
    pub target: String,
    pub variables: Variables,
}

/// Plays back a queue of scripted behaviours, then repeats the fallback
/// forever. Every call is recorded.
pub struct MockHandler {
    script: Mutex<VecDeque<MockBehaviour>>,
    fallback: MockBehaviour,
    latency: Option<Duration>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockHandler {
    fn with_fallback(fallback: MockBehaviour) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            latency: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always succeeds with `output`.
    pub fn returning(output: Variables) -> Self {
        Self::with_fallback(MockBehaviour::Return(output))
    }

    /// Always succeeds with an empty output.
    pub fn succeeding() -> Self {
        Self::returning(Variables::new())
    }

    pub fn failing_retryable(msg: impl Into<String>) -> Self {
        Self::with_fallback(MockBehaviour::FailRetryable(msg.into()))
    }

    pub fn failing_fatal(msg: impl Into<String>) -> Self {
        Self::with_fallback(MockBehaviour::FailFatal(msg.into()))
    }

    /// Fails with a retryable error `times` times, then succeeds with `output`.
    pub fn flaky(times: usize, output: Variables) -> Self {
        let handler = Self::returning(output);
        {
            let mut script = lock(&handler.script);
            for attempt in 1..=times {
                script.push_back(MockBehaviour::FailRetryable(format!("transient failure #{attempt}")));
            }
        }
        handler
    }

    /// Wait this long (honouring cancellation) before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Shared handle to the call log, usable after the handler is boxed.
    pub fn call_log(&self) -> Arc<Mutex<Vec<MockCall>>> {
        Arc::clone(&self.calls)
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ActionHandler for MockHandler {
    async fn execute(&self, action: &WorkflowAction, ctx: &ActionContext) -> Result<Variables, ActionError> {
        lock(&self.calls).push(MockCall {
            step_id: ctx.step_id,
            target: action.target.clone(),
            variables: ctx.variables.clone(),
        });

        if let Some(latency) = self.latency {
            tokio::select! {
                _ = tokio::time::sleep(latency) => {}
                _ = ctx.cancel.cancelled() => return Err(ActionError::Cancelled),
            }
        }

        let next = lock(&self.script).pop_front();
        match next {
            Some(behaviour) => behaviour.outcome(),
            None => self.fallback.outcome(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ActionKind;

    fn ctx() -> ActionContext {
        ActionContext::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn flaky_handler_recovers_after_scripted_failures() {
        let mut out = Variables::new();
        out.insert("ok", true);
        let handler = MockHandler::flaky(2, out.clone());
        let action = WorkflowAction::new(ActionKind::Webhook, "https://example.com");

        assert!(handler.execute(&action, &ctx()).await.unwrap_err().is_retryable());
        assert!(handler.execute(&action, &ctx()).await.unwrap_err().is_retryable());
        assert_eq!(handler.execute(&action, &ctx()).await.unwrap(), out);
        assert_eq!(handler.call_count(), 3);
    }

    #[tokio::test]
    async fn records_target_and_variables() {
        let handler = MockHandler::failing_fatal("boom");
        let mut vars = Variables::new();
        vars.insert("x", 1);
        let err = handler
            .execute(&WorkflowAction::new(ActionKind::Api, "svc"), &ctx().with_variables(vars.clone()))
            .await
            .unwrap_err();

        assert_eq!(err, ActionError::Fatal("boom".into()));
        let calls = handler.calls();
        assert_eq!(calls[0].target, "svc");
        assert_eq!(calls[0].variables, vars);
    }
}
