//! Built-in Diagnostic Actions
//!
//! Small actions that let a plan run end to end without any external
//! integration. Used by the `flowpilot` runner and throughout the tests.
//!
//! | Action | Behavior |
//! |--------|----------|
//! | `echo` | Returns its parameters as data |
//! | `fail` | Returns an error (`message` parameter, optional) |
//! | `sleep` | Waits `ms` milliseconds, then succeeds |
//! | `register_file` | Acknowledges a `file.uploaded` payload |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::registry::{Action, ActionError, ActionRegistry, ActionResult, ExecutionContext, Params};

/// Upper bound for the `sleep` action.
const MAX_SLEEP_MS: u64 = 60_000;

/// Returns the resolved parameters unchanged.
pub struct Echo;

#[async_trait]
impl Action for Echo {
    async fn invoke(
        &self,
        _ctx: ExecutionContext,
        params: Params,
    ) -> Result<ActionResult, ActionError> {
        Ok(ActionResult::success(Value::Object(params)))
    }
}

/// Always reports an error.
pub struct Fail;

#[async_trait]
impl Action for Fail {
    async fn invoke(
        &self,
        ctx: ExecutionContext,
        params: Params,
    ) -> Result<ActionResult, ActionError> {
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("step '{}' failed on purpose", ctx.step_id));
        Ok(ActionResult::error(message))
    }
}

/// Waits for `ms` milliseconds.
pub struct Sleep;

#[async_trait]
impl Action for Sleep {
    async fn invoke(
        &self,
        _ctx: ExecutionContext,
        params: Params,
    ) -> Result<ActionResult, ActionError> {
        let ms = match params.get("ms") {
            None | Some(Value::Null) => 0,
            Some(value) => value
                .as_u64()
                .ok_or_else(|| ActionError::execution("sleep", "'ms' must be a non-negative integer"))?,
        };
        let ms = ms.min(MAX_SLEEP_MS);

        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(ActionResult::success(json!({ "slept_ms": ms })))
    }
}

/// Acknowledges an uploaded file. Target of the default `file.uploaded`
/// cascade; re-registering the same file is harmless.
pub struct RegisterFile;

#[async_trait]
impl Action for RegisterFile {
    async fn invoke(
        &self,
        ctx: ExecutionContext,
        params: Params,
    ) -> Result<ActionResult, ActionError> {
        let file_id = params
            .get("file_id")
            .or_else(|| params.get("id"))
            .cloned()
            .ok_or_else(|| ActionError::execution("register_file", "missing 'file_id'"))?;

        Ok(ActionResult::success(json!({
            "file_id": file_id,
            "registered": true,
            "source": ctx.workflow_id,
        })))
    }
}

/// Registers every built-in action.
pub fn register_builtin(registry: &mut ActionRegistry) {
    registry
        .register("echo", Arc::new(Echo))
        .register("fail", Arc::new(Fail))
        .register("sleep", Arc::new(Sleep))
        .register("register_file", Arc::new(RegisterFile));
}
