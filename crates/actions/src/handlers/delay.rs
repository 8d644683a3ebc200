//! `delay`: suspends the calling step for a configured duration.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    ActionContext, ActionError, ActionHandler, ActionKind, VariableError, Variables, WorkflowAction,
    variables::duration_from_value,
};

#[derive(Debug, Default)]
pub struct DelayActionHandler;

#[async_trait]
impl ActionHandler for DelayActionHandler {
    async fn execute(&self, action: &WorkflowAction, ctx: &ActionContext) -> Result<Variables, ActionError> {
        if action.kind != ActionKind::Delay {
            return Err(ActionError::Unsupported(action.kind));
        }

        let params = &action.parameters;
        let explicit = match params.get_duration("duration")? {
            Some(d) => Some(d),
            None => params.get_u64("duration_ms")?.map(Duration::from_millis),
        };
        let duration = match explicit {
            Some(d) => d,
            None => match action.target() {
                Some(raw) => duration_from_value("target", &serde_json::Value::String(raw.to_owned()))?,
                None => return Err(VariableError::Missing("duration".into()).into()),
            },
        };

        debug!(step_id = %ctx.step_id, ?duration, "delay action sleeping");
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = ctx.cancel.cancelled() => return Err(ActionError::Cancelled),
        }

        let mut out = Variables::new();
        out.insert("delayed_ms", duration.as_millis() as u64);
        Ok(out)
    }
}
