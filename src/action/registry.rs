//! Action Registry
//!
//! Maps action names to invokable units. Every entry exposes the same
//! contract regardless of how it is implemented:
//!
//! ```text
//! invoke(name, ctx, params) -> {status: success|error, data, error?}
//! ```
//!
//! Async actions run on the runtime; blocking actions are dispatched onto
//! the blocking thread pool, bounded by a semaphore, so a slow synchronous
//! integration never stalls other workflows. Each invocation runs in its own
//! task, which turns a panicking action into [`ActionError::Panicked`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Semaphore;

use crate::workflow::ResultStatus;

/// Parameter map passed to actions.
pub type Params = Map<String, Value>;

/// What an action learns about the workflow invoking it.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub workflow_id: String,
    pub step_id: String,
    /// Snapshot of the workflow context at invocation time
    pub context: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(workflow_id: impl Into<String>, step_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            step_id: step_id.into(),
            context: Map::new(),
        }
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }
}

/// Uniform action output.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub status: ResultStatus,

    #[serde(default)]
    pub data: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn success(data: Value) -> Self {
        Self {
            status: ResultStatus::Success,
            data,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Error,
            data: Value::Null,
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    /// Collapses an `error`-status result into [`ActionError::Execution`].
    pub fn into_data(self, action: &str) -> Result<Value, ActionError> {
        match self.status {
            ResultStatus::Success => Ok(self.data),
            ResultStatus::Error => Err(ActionError::Execution {
                action: action.to_string(),
                message: self
                    .error
                    .unwrap_or_else(|| "action reported an error".to_string()),
            }),
        }
    }
}

/// Failures surfaced by [`ActionRegistry::invoke`].
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("action not found: {0}")]
    NotFound(String),

    #[error("action '{action}' failed: {message}")]
    Execution { action: String, message: String },

    #[error("action '{0}' panicked")]
    Panicked(String),
}

impl ActionError {
    /// Shorthand for building an execution error inside an action.
    pub fn execution(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            action: action.into(),
            message: message.into(),
        }
    }
}

/// An invokable unit of work.
#[async_trait]
pub trait Action: Send + Sync {
    async fn invoke(&self, ctx: ExecutionContext, params: Params)
        -> Result<ActionResult, ActionError>;
}

struct AsyncFnAction<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> Action for AsyncFnAction<F>
where
    F: Fn(ExecutionContext, Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ActionResult, ActionError>> + Send + 'static,
{
    async fn invoke(
        &self,
        ctx: ExecutionContext,
        params: Params,
    ) -> Result<ActionResult, ActionError> {
        (self.func)(ctx, params).await
    }
}

struct BlockingAction<F> {
    name: String,
    func: Arc<F>,
    pool: Arc<Semaphore>,
}

#[async_trait]
impl<F> Action for BlockingAction<F>
where
    F: Fn(ExecutionContext, Params) -> Result<ActionResult, ActionError> + Send + Sync + 'static,
{
    async fn invoke(
        &self,
        ctx: ExecutionContext,
        params: Params,
    ) -> Result<ActionResult, ActionError> {
        let permit = Arc::clone(&self.pool)
            .acquire_owned()
            .await
            .map_err(|e| ActionError::execution(&self.name, e.to_string()))?;

        let func = Arc::clone(&self.func);
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            func(ctx, params)
        });

        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(ActionError::Panicked(self.name.clone())),
            Err(e) => Err(ActionError::execution(&self.name, e.to_string())),
        }
    }
}

/// Lookup table from action name to implementation.
///
/// Populated once at startup and shared read-only (usually behind an `Arc`).
///
/// # Example
///
/// ```rust,no_run
/// use flowpilot::action::{ActionRegistry, ActionResult};
/// use serde_json::json;
///
/// let mut registry = ActionRegistry::new();
/// registry.register_async("ping", |_ctx, _params| async move {
///     Ok(ActionResult::success(json!("pong")))
/// });
/// registry.register_blocking("checksum", |_ctx, params| {
///     Ok(ActionResult::success(json!(params.len())))
/// });
/// ```
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
    blocking_pool: Arc<Semaphore>,
}

impl ActionRegistry {
    /// Creates an empty registry with one blocking worker per CPU.
    pub fn new() -> Self {
        Self::with_blocking_workers(num_cpus::get())
    }

    /// Creates an empty registry with a custom blocking worker limit.
    pub fn with_blocking_workers(workers: usize) -> Self {
        Self {
            actions: HashMap::new(),
            blocking_pool: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Registers an action object, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, action: Arc<dyn Action>) -> &mut Self {
        let name = name.into();
        if self.actions.insert(name.clone(), action).is_some() {
            warn!("Action '{}' registered twice; keeping the latest", name);
        } else {
            debug!("Registered action: {}", name);
        }
        self
    }

    /// Registers an async closure.
    pub fn register_async<F, Fut>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        F: Fn(ExecutionContext, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ActionResult, ActionError>> + Send + 'static,
    {
        self.register(name, Arc::new(AsyncFnAction { func }))
    }

    /// Registers a synchronous closure that runs on the blocking pool.
    pub fn register_blocking<F>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        F: Fn(ExecutionContext, Params) -> Result<ActionResult, ActionError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        let action = BlockingAction {
            name: name.clone(),
            func: Arc::new(func),
            pool: Arc::clone(&self.blocking_pool),
        };
        self.register(name, Arc::new(action))
    }

    /// Invokes an action by name.
    pub async fn invoke(
        &self,
        name: &str,
        ctx: ExecutionContext,
        params: Params,
    ) -> Result<ActionResult, ActionError> {
        let action = self
            .actions
            .get(name)
            .cloned()
            .ok_or_else(|| ActionError::NotFound(name.to_string()))?;

        debug!("Invoking action '{}' for step '{}'", name, ctx.step_id);

        let handle = tokio::spawn(async move { action.invoke(ctx, params).await });

        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(ActionError::Panicked(name.to_string())),
            Err(e) => Err(ActionError::execution(name, e.to_string())),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Registered action names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .field("blocking_permits", &self.blocking_pool.available_permits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("wf-test", "step-1")
    }

    #[tokio::test]
    async fn test_unknown_action_is_typed_error() {
        let registry = ActionRegistry::new();
        let err = registry.invoke("missing", ctx(), Params::new()).await.unwrap_err();
        assert!(matches!(err, ActionError::NotFound(ref name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_async_action() {
        let mut registry = ActionRegistry::new();
        registry.register_async("double", |_ctx, params| async move {
            let n = params.get("n").and_then(Value::as_i64).unwrap_or(0);
            Ok(ActionResult::success(json!(n * 2)))
        });

        let mut params = Params::new();
        params.insert("n".to_string(), json!(21));
        let result = registry.invoke("double", ctx(), params).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.data, json!(42));
    }

    #[tokio::test]
    async fn test_blocking_action() {
        let mut registry = ActionRegistry::with_blocking_workers(2);
        registry.register_blocking("sync_echo", |ctx, params| {
            std::thread::sleep(Duration::from_millis(5));
            Ok(ActionResult::success(json!({
                "workflow": ctx.workflow_id,
                "keys": params.len()
            })))
        });

        let result = registry.invoke("sync_echo", ctx(), Params::new()).await.unwrap();
        assert_eq!(result.data, json!({"workflow": "wf-test", "keys": 0}));
    }

    #[tokio::test]
    async fn test_blocking_pool_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut registry = ActionRegistry::with_blocking_workers(1);
        {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            registry.register_blocking("slow", move |_ctx, _params| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(ActionResult::success(Value::Null))
            });
        }

        let registry = Arc::new(registry);
        let mut handles = Vec::new();
        for _ in 0..3 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.invoke("slow", ctx(), Params::new()).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_result_is_returned_as_is() {
        let mut registry = ActionRegistry::new();
        registry.register_async("bad", |_ctx, _params| async move {
            Ok(ActionResult::error("quota exceeded"))
        });

        let result = registry.invoke("bad", ctx(), Params::new()).await.unwrap();
        assert!(!result.is_success());

        let err = result.into_data("bad").unwrap_err();
        assert_eq!(err.to_string(), "action 'bad' failed: quota exceeded");
    }

    #[tokio::test]
    async fn test_panicking_action_is_contained() {
        let mut registry = ActionRegistry::new();
        registry.register_async("explode", |_ctx, _params| async move {
            panic!("boom");
            #[allow(unreachable_code)]
            Ok(ActionResult::success(Value::Null))
        });
        registry.register_blocking("explode_sync", |_ctx, _params| panic!("boom"));

        let err = registry.invoke("explode", ctx(), Params::new()).await.unwrap_err();
        assert!(matches!(err, ActionError::Panicked(_)));

        let err = registry
            .invoke("explode_sync", ctx(), Params::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Panicked(_)));
    }

    #[test]
    fn test_registry_listing() {
        let mut registry = ActionRegistry::new();
        assert!(registry.is_empty());

        registry
            .register_async("b", |_c, _p| async move { Ok(ActionResult::success(Value::Null)) })
            .register_async("a", |_c, _p| async move { Ok(ActionResult::success(Value::Null)) });

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a"));
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(format!("{registry:?}").contains("ActionRegistry"));
    }

    #[test]
    fn test_action_result_wire_shape() {
        let value = serde_json::to_value(ActionResult::success(json!({"id": 1}))).unwrap();
        assert_eq!(value, json!({"status": "success", "data": {"id": 1}}));

        let parsed: ActionResult =
            serde_json::from_value(json!({"status": "error", "error": "nope"})).unwrap();
        assert_eq!(parsed.error.as_deref(), Some("nope"));
        assert_eq!(parsed.data, Value::Null);
    }
}
