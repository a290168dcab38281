//! Workflow Execution Engine
//!
//! The coordinator that turns a plan into executed actions:
//! - Reference resolution against the context and earlier step results
//! - Strictly sequential step execution in plan order
//! - Critical-step abort, non-critical continuation
//! - State persistence after every step
//! - Lifecycle events and audit trail
//!
//! Many workflows may run at once (one task per workflow, see
//! [`WorkflowEngine::spawn`]); the steps of a single workflow never overlap.
//! `depends_on` is validated but not used for scheduling.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use log::{error, info, warn};
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::action::{ActionRegistry, ExecutionContext};
use crate::audit::{AuditLog, AuditState};
use crate::events::{names, EventBus};
use crate::state::{StateStore, StoreError};
use crate::workflow::{
    resolve, validate_plan, Plan, PlanError, Planner, PlannerError, WorkflowState, WorkflowStatus,
};

use super::response::{ExecutionMode, ExecutionReport, WorkflowResponse};
use super::step::execute_step;

/// Failures that prevent the engine from producing a [`WorkflowResponse`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),

    #[error("state persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("no planner configured")]
    NoPlanner,
}

/// A natural-language workflow request.
#[derive(Debug, Clone, Default)]
pub struct WorkflowRequest {
    pub prompt: String,
    pub mode: ExecutionMode,
    pub user_id: Option<String>,
    pub context: Map<String, Value>,
    /// Generated when absent
    pub workflow_id: Option<String>,
}

impl WorkflowRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }
}

/// Who asked for a workflow, carried into state and audit.
#[derive(Debug, Clone, Default)]
struct Origin {
    prompt: Option<String>,
    user_id: Option<String>,
}

/// Generates a fresh, time-ordered workflow id.
pub fn new_workflow_id() -> String {
    Uuid::now_v7().to_string()
}

/// Workflow execution engine.
///
/// Cheap to clone; all collaborators are shared.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use flowpilot::action::{register_builtin, ActionRegistry};
/// use flowpilot::events::EventBus;
/// use flowpilot::execution::WorkflowEngine;
/// use flowpilot::state::StateStore;
/// use flowpilot::workflow::load_plan;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut registry = ActionRegistry::new();
///     register_builtin(&mut registry);
///
///     let engine = WorkflowEngine::new(
///         Arc::new(registry),
///         Arc::new(StateStore::in_memory()),
///         Arc::new(EventBus::default()),
///     );
///
///     let plan = load_plan("plan.yaml")?;
///     let response = engine.execute(plan, "wf-1", Default::default()).await?;
///     println!("{}", serde_json::to_string_pretty(&response)?);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct WorkflowEngine {
    registry: Arc<ActionRegistry>,
    store: Arc<StateStore>,
    bus: Arc<EventBus>,
    audit: AuditLog,
    planner: Option<Arc<dyn Planner>>,
    workflow_ttl: u64,
}

impl WorkflowEngine {
    /// Creates an engine with auditing disabled and no planner.
    pub fn new(registry: Arc<ActionRegistry>, store: Arc<StateStore>, bus: Arc<EventBus>) -> Self {
        let workflow_ttl = store.default_workflow_ttl();
        Self {
            registry,
            store,
            bus,
            audit: AuditLog::disabled(),
            planner: None,
            workflow_ttl,
        }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// TTL applied to the workflow states this engine writes.
    pub fn with_workflow_ttl(mut self, ttl_seconds: u64) -> Self {
        self.workflow_ttl = ttl_seconds;
        self
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Latest persisted snapshot of a workflow.
    pub async fn get_workflow(&self, workflow_id: &str) -> Result<Option<WorkflowState>, EngineError> {
        Ok(self.store.get_workflow_state(workflow_id).await?)
    }

    /// Executes a plan to completion.
    ///
    /// # Returns
    ///
    /// * `Ok(Success)` - Completed, or partial after non-critical failures
    /// * `Ok(Error)` - Aborted on a critical step
    /// * `Err` - The plan is malformed, or state could not be persisted
    pub async fn execute(
        &self,
        plan: Plan,
        workflow_id: &str,
        context: Map<String, Value>,
    ) -> Result<WorkflowResponse, EngineError> {
        self.execute_plan(plan, workflow_id, context, Origin::default())
            .await
    }

    /// Runs [`WorkflowEngine::execute`] as an independent task.
    pub fn spawn(
        &self,
        plan: Plan,
        workflow_id: impl Into<String>,
        context: Map<String, Value>,
    ) -> JoinHandle<Result<WorkflowResponse, EngineError>> {
        let engine = self.clone();
        let workflow_id = workflow_id.into();
        tokio::spawn(async move { engine.execute(plan, &workflow_id, context).await })
    }

    /// Records a plan as `suggested` without invoking any action.
    pub async fn suggest(
        &self,
        plan: Plan,
        workflow_id: &str,
        context: Map<String, Value>,
    ) -> Result<WorkflowResponse, EngineError> {
        self.suggest_plan(plan, workflow_id, context, Origin::default())
            .await
    }

    /// Plans a request with the configured planner, then executes or
    /// suggests the plan depending on `request.mode`.
    ///
    /// Planning failures and invalid plans are answered with an error
    /// response; only persistence failures surface as `Err`.
    pub async fn run(&self, request: WorkflowRequest) -> Result<WorkflowResponse, EngineError> {
        let planner = self.planner.as_ref().ok_or(EngineError::NoPlanner)?;
        let workflow_id = request.workflow_id.clone().unwrap_or_else(new_workflow_id);
        let origin = Origin {
            prompt: Some(request.prompt.clone()),
            user_id: request.user_id.clone(),
        };

        info!("Planning workflow {} ({:?} mode)", workflow_id, request.mode);

        let planned = planner
            .generate(&request.prompt, &request.context)
            .await
            .and_then(|plan| {
                validate_plan(&plan)?;
                Ok(plan)
            });

        let plan = match planned {
            Ok(plan) => plan,
            Err(e) => return self.reject(&workflow_id, origin, request.mode, e).await,
        };

        match request.mode {
            ExecutionMode::Execution => {
                self.execute_plan(plan, &workflow_id, request.context, origin)
                    .await
            }
            ExecutionMode::Suggestion => {
                self.suggest_plan(plan, &workflow_id, request.context, origin)
                    .await
            }
        }
    }

    /// Engine constants merged with the caller's context. `workflow_id`
    /// always holds the engine's value.
    fn initial_context(workflow_id: &str, caller: Map<String, Value>) -> Map<String, Value> {
        let now = Utc::now();
        let mut context = Map::new();
        context.insert(
            "current_date".to_string(),
            json!(now.format("%Y-%m-%d").to_string()),
        );
        context.insert("current_timestamp".to_string(), json!(now.to_rfc3339()));

        for (key, value) in caller {
            if key == "workflow_id" {
                warn!("Ignoring caller-supplied 'workflow_id' in context");
                continue;
            }
            context.insert(key, value);
        }

        context.insert("workflow_id".to_string(), json!(workflow_id));
        context
    }

    fn new_state(
        &self,
        workflow_id: &str,
        plan: Plan,
        context: Map<String, Value>,
        origin: Origin,
    ) -> WorkflowState {
        let mut state = WorkflowState::new(workflow_id, plan, self.workflow_ttl);
        state.context = Self::initial_context(workflow_id, context);
        state.prompt = origin.prompt;
        state.user_id = origin.user_id;
        state
    }

    async fn persist(&self, state: &WorkflowState) -> Result<(), EngineError> {
        if let Err(e) = self
            .store
            .set_workflow_state(state, Some(self.workflow_ttl))
            .await
        {
            error!("Failed to persist workflow {}: {}", state.workflow_id, e);
            return Err(e.into());
        }
        Ok(())
    }

    async fn execute_plan(
        &self,
        plan: Plan,
        workflow_id: &str,
        context: Map<String, Value>,
        origin: Origin,
    ) -> Result<WorkflowResponse, EngineError> {
        validate_plan(&plan)?;

        let started = Instant::now();
        let mut state = self.new_state(workflow_id, plan, context, origin);
        let step_count = state.plan.len();

        state.status = WorkflowStatus::Executing;
        self.persist(&state).await?;

        info!(
            "Starting workflow {} ({} steps): {}",
            workflow_id, step_count, state.plan.summary
        );
        self.audit
            .log_start(
                workflow_id,
                state.prompt.as_deref(),
                state.user_id.as_deref(),
                json!({
                    "mode": ExecutionMode::Execution,
                    "summary": state.plan.summary,
                    "steps": step_count,
                }),
            )
            .await;
        self.bus.emit(
            names::WORKFLOW_STARTED,
            workflow_id,
            json!({"summary": state.plan.summary, "steps": step_count}),
        );

        let steps = state.plan.steps.clone();
        let mut aborted: Option<String> = None;

        for step in &steps {
            let params = resolve(&step.params, &state.context, &state.step_results);

            state.mark_running(&step.step_id);
            self.audit
                .log_step(
                    workflow_id,
                    &step.step_id,
                    AuditState::Started,
                    json!({"action": step.action, "params": params}),
                )
                .await;

            let ctx = ExecutionContext::new(workflow_id, &step.step_id)
                .with_context(state.context.clone());

            match execute_step(&self.registry, step, ctx, params).await {
                Ok(data) => {
                    info!("Step '{}' completed", step.step_id);
                    if let Some(key) = &step.save_to {
                        state.context.insert(key.clone(), data.clone());
                    }
                    state.mark_completed(&step.step_id, data.clone());

                    self.bus.emit(
                        names::STEP_COMPLETED,
                        workflow_id,
                        json!({"step_id": step.step_id, "action": step.action, "data": data}),
                    );
                    self.audit
                        .log_step(
                            workflow_id,
                            &step.step_id,
                            AuditState::Completed,
                            json!({"data": data}),
                        )
                        .await;
                }
                Err(e) => {
                    let message = e.to_string();
                    state.mark_failed(&step.step_id, message.clone());

                    self.audit
                        .log_step(
                            workflow_id,
                            &step.step_id,
                            AuditState::Error,
                            json!({"error": message}),
                        )
                        .await;
                    self.bus.emit(
                        names::STEP_FAILED,
                        workflow_id,
                        json!({
                            "step_id": step.step_id,
                            "action": step.action,
                            "error": message,
                            "critical": step.critical,
                        }),
                    );

                    if step.critical {
                        error!(
                            "Critical step '{}' failed, aborting workflow {}",
                            step.step_id, workflow_id
                        );
                        aborted = Some(format!("Step '{}' failed: {}", step.step_id, message));
                        state.skip_pending();
                    } else {
                        warn!("Non-critical step '{}' failed, continuing", step.step_id);
                    }
                }
            }

            self.persist(&state).await?;

            if aborted.is_some() {
                break;
            }
        }

        let status = match &aborted {
            Some(_) => WorkflowStatus::Failed,
            None if state.failed_count() > 0 => WorkflowStatus::Partial,
            None => WorkflowStatus::Completed,
        };
        state.error = aborted.clone();
        state.finish(status);
        self.persist(&state).await?;

        let duration_ms = elapsed_ms(started);
        info!(
            "Workflow {} finished: {} ({} of {} steps executed, {} ms)",
            workflow_id,
            status,
            state.executed_count(),
            step_count,
            duration_ms
        );

        match aborted {
            Some(error) => {
                self.bus.emit(
                    names::ERROR_CRITICAL,
                    workflow_id,
                    json!({"error": error}),
                );
                self.bus.emit(
                    names::WORKFLOW_FAILED,
                    workflow_id,
                    json!({"status": status, "error": error}),
                );
                self.audit
                    .log_complete(
                        workflow_id,
                        json!({"status": "error", "workflow_status": status, "error": error}),
                        Some(duration_ms),
                    )
                    .await;

                Ok(WorkflowResponse::Error {
                    workflow_id: workflow_id.to_string(),
                    error,
                })
            }
            None => {
                self.bus.emit(
                    names::WORKFLOW_COMPLETED,
                    workflow_id,
                    json!({
                        "status": status,
                        "steps_executed": state.executed_count(),
                        "steps_failed": state.failed_count(),
                    }),
                );
                self.audit
                    .log_complete(
                        workflow_id,
                        json!({
                            "status": "success",
                            "workflow_status": status,
                            "steps_executed": state.executed_count(),
                            "steps_failed": state.failed_count(),
                        }),
                        Some(duration_ms),
                    )
                    .await;

                Ok(WorkflowResponse::Success {
                    workflow_id: workflow_id.to_string(),
                    data: ExecutionReport::from_state(&state, ExecutionMode::Execution, duration_ms),
                })
            }
        }
    }

    async fn suggest_plan(
        &self,
        plan: Plan,
        workflow_id: &str,
        context: Map<String, Value>,
        origin: Origin,
    ) -> Result<WorkflowResponse, EngineError> {
        validate_plan(&plan)?;

        let started = Instant::now();
        let mut state = self.new_state(workflow_id, plan, context, origin);
        state.finish(WorkflowStatus::Suggested);
        self.persist(&state).await?;

        info!(
            "Workflow {} suggested ({} steps, not executed)",
            workflow_id,
            state.plan.len()
        );

        let duration_ms = elapsed_ms(started);
        self.audit
            .log_start(
                workflow_id,
                state.prompt.as_deref(),
                state.user_id.as_deref(),
                json!({"mode": ExecutionMode::Suggestion, "summary": state.plan.summary}),
            )
            .await;
        self.audit
            .log_complete(
                workflow_id,
                json!({"status": "success", "workflow_status": WorkflowStatus::Suggested}),
                Some(duration_ms),
            )
            .await;

        Ok(WorkflowResponse::Success {
            workflow_id: workflow_id.to_string(),
            data: ExecutionReport::from_state(&state, ExecutionMode::Suggestion, duration_ms),
        })
    }

    /// Answers a request that could not be planned. The failed state is
    /// still persisted so pollers see what happened.
    async fn reject(
        &self,
        workflow_id: &str,
        origin: Origin,
        mode: ExecutionMode,
        reason: PlannerError,
    ) -> Result<WorkflowResponse, EngineError> {
        let error = reason.to_string();
        error!("Workflow {} could not be planned: {}", workflow_id, error);

        let mut state = self.new_state(workflow_id, Plan::default(), Map::new(), origin);
        state.error = Some(error.clone());
        state.finish(WorkflowStatus::Failed);
        self.persist(&state).await?;

        self.audit
            .log_start(
                workflow_id,
                state.prompt.as_deref(),
                state.user_id.as_deref(),
                json!({"mode": mode}),
            )
            .await;
        self.audit.log_error(workflow_id, &error).await;
        self.bus.emit(
            names::WORKFLOW_FAILED,
            workflow_id,
            json!({"status": WorkflowStatus::Failed, "error": error}),
        );

        Ok(WorkflowResponse::Error {
            workflow_id: workflow_id.to_string(),
            error,
        })
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("registry", &self.registry)
            .field("store", &self.store)
            .field("audit", &self.audit)
            .field("has_planner", &self.planner.is_some())
            .field("workflow_ttl", &self.workflow_ttl)
            .finish()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{register_builtin, ActionResult, Params};
    use crate::audit::{MemoryAuditSink, WORKFLOW_ENTRY};
    use crate::events::Event;
    use crate::workflow::{StaticPlanner, Step, StepState};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Engine wired to in-memory collaborators plus a `record` action that
    /// remembers its params and returns `{"id": 42}`.
    struct Harness {
        engine: WorkflowEngine,
        audit: Arc<MemoryAuditSink>,
        calls: Arc<Mutex<Vec<(String, Params)>>>,
    }

    impl Harness {
        fn new() -> Self {
            let calls: Arc<Mutex<Vec<(String, Params)>>> = Arc::new(Mutex::new(Vec::new()));

            let mut registry = ActionRegistry::new();
            register_builtin(&mut registry);
            {
                let calls = Arc::clone(&calls);
                registry.register_async("record", move |ctx, params| {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.lock().unwrap().push((ctx.step_id, params));
                        Ok(ActionResult::success(json!({"id": 42})))
                    }
                });
            }
            registry.register_blocking("sum", |_ctx, params| {
                let total: i64 = params.values().filter_map(Value::as_i64).sum();
                Ok(ActionResult::success(json!({"total": total})))
            });
            registry.register_async("explode", |_ctx, _params| async move {
                panic!("action bug");
                #[allow(unreachable_code)]
                Ok(ActionResult::success(Value::Null))
            });

            let audit = Arc::new(MemoryAuditSink::new());
            let engine = WorkflowEngine::new(
                Arc::new(registry),
                Arc::new(StateStore::in_memory()),
                Arc::new(EventBus::new(1_000)),
            )
            .with_audit(AuditLog::new(audit.clone()));

            Self {
                engine,
                audit,
                calls,
            }
        }

        fn invoked_steps(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(step, _)| step.clone())
                .collect()
        }

        fn event_names(&self, workflow_id: &str) -> Vec<String> {
            self.engine
                .bus()
                .get_events_by_source(workflow_id)
                .into_iter()
                .map(|e: Event| e.name)
                .collect()
        }
    }

    struct DownPlanner;

    #[async_trait]
    impl Planner for DownPlanner {
        async fn generate(
            &self,
            _prompt: &str,
            _context: &Map<String, Value>,
        ) -> Result<Plan, PlannerError> {
            Err(PlannerError::Unavailable("model quota exceeded".to_string()))
        }
    }

    #[tokio::test]
    async fn test_sequential_visibility() {
        let h = Harness::new();
        let plan = Plan::from_steps(
            "visibility",
            vec![
                Step::new("A", "record").save_to("a"),
                Step::new("B", "record")
                    .with_param("v", json!("{{a.id}}"))
                    .with_param("w", json!("{{A.data.id}}")),
            ],
        );

        let response = h.engine.execute(plan, "wf-vis", Map::new()).await.unwrap();
        assert!(response.is_success());

        let calls = h.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1["v"], json!(42));
        assert_eq!(calls[1].1["w"], json!(42));
    }

    #[tokio::test]
    async fn test_critical_failure_aborts() {
        let h = Harness::new();
        let plan = Plan::from_steps(
            "abort",
            vec![
                Step::new("A", "fail").with_param("message", json!("upstream down")),
                Step::new("B", "record"),
            ],
        );

        let response = h.engine.execute(plan, "wf-abort", Map::new()).await.unwrap();

        assert!(!response.is_success());
        assert!(response.error().unwrap().contains("upstream down"));
        assert!(h.invoked_steps().is_empty());

        let state = h.engine.get_workflow("wf-abort").await.unwrap().unwrap();
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert_eq!(state.step_state("A"), Some(StepState::Failed));
        assert_eq!(state.step_state("B"), Some(StepState::Skipped));
        assert!(!state.step_results.contains_key("B"));
        assert!(state.error.is_some());

        let entries = h.engine.audit().entries("wf-abort").await;
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_workflow_entry());
        assert_eq!(entries[0].state, AuditState::Error);
        assert_eq!(entries[1].step_name, "A");
        assert_eq!(entries[1].state, AuditState::Error);
        assert_eq!(h.audit.len(), 2);
    }

    #[tokio::test]
    async fn test_non_critical_failure_continues() {
        let h = Harness::new();
        let plan = Plan::from_steps(
            "partial",
            vec![
                Step::new("A", "fail").non_critical(),
                Step::new("B", "record"),
            ],
        );

        let response = h.engine.execute(plan, "wf-partial", Map::new()).await.unwrap();
        let report = response.report().unwrap();

        assert_eq!(report.workflow_status, WorkflowStatus::Partial);
        assert_eq!(report.results.len(), 2);
        assert!(!report.results["A"].is_success());
        assert!(report.results["B"].is_success());
        assert_eq!(report.steps_failed, 1);
        assert_eq!(h.invoked_steps(), vec!["B"]);
    }

    #[tokio::test]
    async fn test_completed_workflow_events_and_state() {
        let h = Harness::new();
        let plan = Plan::from_steps(
            "happy",
            vec![
                Step::new("one", "echo").with_param("x", json!(1)),
                Step::new("two", "sum")
                    .with_param("a", json!(2))
                    .with_param("b", json!(3)),
            ],
        );

        let response = h.engine.execute(plan, "wf-ok", Map::new()).await.unwrap();
        let report = response.report().unwrap();
        assert_eq!(report.workflow_status, WorkflowStatus::Completed);
        assert_eq!(report.results["two"].data, json!({"total": 5}));

        assert_eq!(
            h.event_names("wf-ok"),
            vec![
                "workflow.started",
                "step.completed",
                "step.completed",
                "workflow.completed"
            ]
        );

        let state = h.engine.get_workflow("wf-ok").await.unwrap().unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert!(state.completed_at.is_some());
        assert_eq!(state.executed_count(), 2);
    }

    #[tokio::test]
    async fn test_failure_events() {
        let h = Harness::new();
        let plan = Plan::from_steps("bad", vec![Step::new("A", "fail")]);

        h.engine.execute(plan, "wf-bad", Map::new()).await.unwrap();

        assert_eq!(
            h.event_names("wf-bad"),
            vec![
                "workflow.started",
                "step.failed",
                "error.critical",
                "workflow.failed"
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_action_fails_step() {
        let h = Harness::new();
        let plan = Plan::from_steps("unknown", vec![Step::new("A", "does_not_exist")]);

        let response = h.engine.execute(plan, "wf-unknown", Map::new()).await.unwrap();
        assert!(response.error().unwrap().contains("action not found"));
    }

    #[tokio::test]
    async fn test_panicking_action_is_a_step_failure() {
        let h = Harness::new();
        let plan = Plan::from_steps(
            "panic",
            vec![
                Step::new("A", "explode").non_critical(),
                Step::new("B", "echo"),
            ],
        );

        let response = h.engine.execute(plan, "wf-panic", Map::new()).await.unwrap();
        let report = response.report().unwrap();
        assert_eq!(report.workflow_status, WorkflowStatus::Partial);
        assert!(report.results["A"]
            .error
            .as_deref()
            .unwrap()
            .contains("panicked"));
    }

    #[tokio::test]
    async fn test_invalid_plan_is_rejected_before_running() {
        let h = Harness::new();
        let plan = Plan::from_steps(
            "dupes",
            vec![Step::new("A", "record"), Step::new("A", "record")],
        );

        let err = h.engine.execute(plan, "wf-invalid", Map::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidPlan(_)));
        assert!(h.invoked_steps().is_empty());
        assert!(h.engine.get_workflow("wf-invalid").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reserved_step_id_keeps_audit_rows_apart() {
        let h = Harness::new();
        let plan = Plan::from_steps(
            "reserved",
            vec![Step::new(WORKFLOW_ENTRY, "fail"), Step::new("B", "record")],
        );

        let err = h
            .engine
            .execute(plan.clone(), "wf-reserved", Map::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidPlan(PlanError::ReservedStepId(_))
        ));
        assert!(h.engine.audit().entries("wf-reserved").await.is_empty());

        let engine = h
            .engine
            .clone()
            .with_planner(Arc::new(StaticPlanner::new(plan)));
        let response = engine
            .run(WorkflowRequest::new("use the reserved name").with_workflow_id("wf-reserved-run"))
            .await
            .unwrap();

        assert!(!response.is_success());
        assert!(h.invoked_steps().is_empty());

        let entries = engine.audit().entries("wf-reserved-run").await;
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_workflow_entry());
        assert_eq!(entries[0].state, AuditState::Error);
    }

    #[tokio::test]
    async fn test_dotted_step_id_is_rejected() {
        let h = Harness::new();
        let plan = Plan::from_steps(
            "dotted",
            vec![
                Step::new("fetch.v2", "echo"),
                Step::new("B", "record").with_param("id", json!("{{fetch.v2.data.id}}")),
            ],
        );

        let err = h.engine.execute(plan, "wf-dotted", Map::new()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidPlan(PlanError::DottedStepId(_))
        ));
        assert!(h.invoked_steps().is_empty());
    }

    #[tokio::test]
    async fn test_context_constants() {
        let h = Harness::new();
        let mut caller = Map::new();
        caller.insert("workflow_id".to_string(), json!("spoofed"));
        caller.insert("customer".to_string(), json!({"name": "Ada"}));

        let plan = Plan::from_steps(
            "ctx",
            vec![Step::new("A", "echo")
                .with_param("id", json!("{{workflow_id}}"))
                .with_param("date", json!("{{current_date}}"))
                .with_param("name", json!("{{customer.name}}"))],
        );

        let response = h.engine.execute(plan, "wf-ctx", caller).await.unwrap();
        let data = &response.report().unwrap().results["A"].data;

        assert_eq!(data["id"], json!("wf-ctx"));
        assert_eq!(data["name"], json!("Ada"));
        assert_eq!(data["date"].as_str().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_suggest_invokes_nothing() {
        let h = Harness::new();
        let plan = Plan::from_steps("dry", vec![Step::new("A", "record")]);

        let response = h.engine.suggest(plan, "wf-dry", Map::new()).await.unwrap();
        let report = response.report().unwrap();

        assert_eq!(report.workflow_status, WorkflowStatus::Suggested);
        assert_eq!(report.mode, ExecutionMode::Suggestion);
        assert!(report.results.is_empty());
        assert_eq!(report.step_states["A"], StepState::Pending);
        assert!(h.invoked_steps().is_empty());
        assert!(h.event_names("wf-dry").is_empty());

        let state = h.engine.get_workflow("wf-dry").await.unwrap().unwrap();
        assert_eq!(state.status, WorkflowStatus::Suggested);
    }

    #[tokio::test]
    async fn test_run_with_planner() {
        let h = Harness::new();
        let plan = Plan::from_steps("planned", vec![Step::new("A", "record")]);
        let engine = h
            .engine
            .clone()
            .with_planner(Arc::new(StaticPlanner::new(plan)));

        let response = engine
            .run(
                WorkflowRequest::new("record something")
                    .with_user("u-1")
                    .with_workflow_id("wf-run"),
            )
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(h.invoked_steps(), vec!["A"]);

        let state = engine.get_workflow("wf-run").await.unwrap().unwrap();
        assert_eq!(state.prompt.as_deref(), Some("record something"));
        assert_eq!(state.user_id.as_deref(), Some("u-1"));

        let suggested = engine
            .run(WorkflowRequest::new("just plan").with_mode(ExecutionMode::Suggestion))
            .await
            .unwrap();
        assert_eq!(
            suggested.report().unwrap().workflow_status,
            WorkflowStatus::Suggested
        );
        assert_eq!(h.invoked_steps().len(), 1);
    }

    #[tokio::test]
    async fn test_run_with_failing_planner() {
        let h = Harness::new();
        let engine = h.engine.clone().with_planner(Arc::new(DownPlanner));

        let response = engine
            .run(WorkflowRequest::new("anything").with_workflow_id("wf-noplan"))
            .await
            .unwrap();

        assert!(response.error().unwrap().contains("model quota exceeded"));
        assert_eq!(h.event_names("wf-noplan"), vec!["workflow.failed"]);

        let state = engine.get_workflow("wf-noplan").await.unwrap().unwrap();
        assert_eq!(state.status, WorkflowStatus::Failed);

        let entries = engine.audit().entries("wf-noplan").await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status.as_deref(), Some("error"));
    }

    #[tokio::test]
    async fn test_run_without_planner() {
        let h = Harness::new();
        let err = h.engine.run(WorkflowRequest::new("x")).await.unwrap_err();
        assert!(matches!(err, EngineError::NoPlanner));
    }

    #[tokio::test]
    async fn test_concurrent_workflows_are_isolated() {
        let h = Harness::new();
        let mut handles = Vec::new();

        for i in 0..8usize {
            let steps = (0..=i)
                .map(|n| {
                    Step::new(format!("s{n}"), "sleep")
                        .with_param("ms", json!((8 - i) as u64))
                })
                .collect();
            let plan = Plan::from_steps(format!("plan {i}"), steps);
            handles.push((i, h.engine.spawn(plan, format!("wf-{i}"), Map::new())));
        }

        for (i, handle) in handles {
            let response = handle.await.unwrap().unwrap();
            assert_eq!(response.workflow_id(), format!("wf-{i}"));

            let state = h
                .engine
                .get_workflow(&format!("wf-{i}"))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(state.status, WorkflowStatus::Completed);
            assert_eq!(state.step_results.len(), i + 1);
            assert_eq!(state.plan.summary, format!("plan {i}"));
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_is_escalated() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("state");
        let store = StateStore::open_path(state_dir.join("state.json"))
            .await
            .unwrap();
        std::fs::remove_dir_all(&state_dir).unwrap();

        let mut registry = ActionRegistry::new();
        register_builtin(&mut registry);
        let engine = WorkflowEngine::new(
            Arc::new(registry),
            Arc::new(store),
            Arc::new(EventBus::default()),
        );

        let plan = Plan::from_steps("lost", vec![Step::new("A", "echo")]);
        let err = engine.execute(plan, "wf-io", Map::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_empty_plan_completes() {
        let h = Harness::new();
        let response = h
            .engine
            .execute(Plan::new("nothing to do"), "wf-empty", Map::new())
            .await
            .unwrap();
        assert_eq!(
            response.report().unwrap().workflow_status,
            WorkflowStatus::Completed
        );
    }
}
