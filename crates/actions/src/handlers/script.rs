//! `script`: a sandboxed rhai expression over the execution variables.
//!
//! Every variable whose key is a valid identifier is in scope by name; the
//! whole map is also available as `vars`. The engine is built without file
//! or module access and with hard operation/size limits.

use async_trait::async_trait;
use rhai::packages::{Package, StandardPackage};
use rhai::{Dynamic, Engine, Scope};
use serde_json::Value;
use tracing::debug;

use crate::{ActionContext, ActionError, ActionHandler, ActionKind, VariableError, Variables, WorkflowAction};

const MAX_OPERATIONS: u64 = 100_000;
const MAX_STRING_SIZE: usize = 64 * 1024;
const MAX_COLLECTION_SIZE: usize = 10_000;

pub struct ScriptActionHandler {
    engine: Engine,
}

impl Default for ScriptActionHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptActionHandler {
    pub fn new() -> Self {
        let mut engine = Engine::new_raw();
        engine.register_global_module(StandardPackage::new().as_shared_module());
        engine.set_max_operations(MAX_OPERATIONS);
        engine.set_max_expr_depths(64, 32);
        engine.set_max_string_size(MAX_STRING_SIZE);
        engine.set_max_array_size(MAX_COLLECTION_SIZE);
        engine.set_max_map_size(MAX_COLLECTION_SIZE);
        Self { engine }
    }

    /// Evaluate `script` with `variables` in scope and return the result as JSON.
    pub fn evaluate(&self, script: &str, variables: &Variables) -> Result<Value, ActionError> {
        let mut scope = Scope::new();
        for (key, value) in variables.iter() {
            if is_identifier(key) {
                scope.push_dynamic(key.clone(), to_dynamic(value)?);
            }
        }
        scope.push_dynamic("vars", to_dynamic(&variables.to_value())?);

        let result: Dynamic = self
            .engine
            .eval_with_scope(&mut scope, script)
            .map_err(|e| ActionError::Fatal(format!("script failed: {e}")))?;

        rhai::serde::from_dynamic(&result)
            .map_err(|e| ActionError::Fatal(format!("script result is not representable as JSON: {e}")))
    }
}

fn to_dynamic(value: &Value) -> Result<Dynamic, ActionError> {
    rhai::serde::to_dynamic(value)
        .map_err(|e| ActionError::Fatal(format!("cannot expose value to script: {e}")))
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && key != "vars"
}

#[async_trait]
impl ActionHandler for ScriptActionHandler {
    async fn execute(&self, action: &WorkflowAction, ctx: &ActionContext) -> Result<Variables, ActionError> {
        if action.kind != ActionKind::Script {
            return Err(ActionError::Unsupported(action.kind));
        }
        let script = match action.parameters.get_str("script")? {
            Some(script) => script,
            None => action
                .target()
                .ok_or_else(|| VariableError::Missing("script".into()))?,
        };
        let output_key = action.parameters.get_str("output")?.unwrap_or("result");

        let value = self.evaluate(script, &ctx.variables)?;
        debug!(step_id = %ctx.step_id, output_key, "script evaluated");

        let mut out = Variables::new();
        out.insert(output_key, value);
        Ok(out)
    }
}
