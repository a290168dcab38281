//! Plan Generation
//!
//! Plans usually come from a language model that turns a natural-language
//! request into steps. The engine only consumes the [`Planner`] contract;
//! synthesis itself lives outside this crate.

use std::sync::Arc;

use async_trait::async_trait;
use log::warn;
use serde_json::{json, Map, Value};

use super::model::{Plan, Step};
use super::validator::{validate_plan, PlanError};

/// Errors a planner can report.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    /// The planning backend could not produce a plan
    #[error("planner unavailable: {0}")]
    Unavailable(String),

    /// The backend produced a plan that failed validation
    #[error("planner produced an invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),
}

/// Turns a prompt plus context into a plan.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn generate(&self, prompt: &str, context: &Map<String, Value>)
        -> Result<Plan, PlannerError>;
}

/// Always returns the same plan, regardless of prompt.
#[derive(Debug, Clone)]
pub struct StaticPlanner {
    plan: Plan,
}

impl StaticPlanner {
    pub fn new(plan: Plan) -> Self {
        Self { plan }
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn generate(
        &self,
        _prompt: &str,
        _context: &Map<String, Value>,
    ) -> Result<Plan, PlannerError> {
        validate_plan(&self.plan)?;
        Ok(self.plan.clone())
    }
}

/// Wraps a planner and degrades to a single-step plan when the backend is
/// unavailable. The fallback step hands the raw prompt to `action` under the
/// `query` parameter.
pub struct FallbackPlanner {
    inner: Arc<dyn Planner>,
    action: String,
}

impl FallbackPlanner {
    pub fn new(inner: Arc<dyn Planner>, action: impl Into<String>) -> Self {
        Self {
            inner,
            action: action.into(),
        }
    }

    fn fallback_plan(&self, prompt: &str) -> Plan {
        Plan::from_steps(
            "Fallback plan",
            vec![Step::new("1", &self.action)
                .with_param("query", json!(prompt))
                .with_description("Analyze the request")],
        )
    }
}

#[async_trait]
impl Planner for FallbackPlanner {
    async fn generate(
        &self,
        prompt: &str,
        context: &Map<String, Value>,
    ) -> Result<Plan, PlannerError> {
        match self.inner.generate(prompt, context).await {
            Err(PlannerError::Unavailable(reason)) => {
                warn!("Planner unavailable ({}), using fallback plan", reason);
                Ok(self.fallback_plan(prompt))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DownPlanner;

    #[async_trait]
    impl Planner for DownPlanner {
        async fn generate(
            &self,
            _prompt: &str,
            _context: &Map<String, Value>,
        ) -> Result<Plan, PlannerError> {
            Err(PlannerError::Unavailable("quota exceeded".to_string()))
        }
    }

    #[tokio::test]
    async fn test_static_planner_returns_plan() {
        let plan = Plan::from_steps("fixed", vec![Step::new("a", "echo")]);
        let planner = StaticPlanner::new(plan.clone());

        let generated = planner.generate("anything", &Map::new()).await.unwrap();
        assert_eq!(generated, plan);
    }

    #[tokio::test]
    async fn test_static_planner_validates() {
        let plan = Plan::from_steps("dup", vec![Step::new("a", "echo"), Step::new("a", "echo")]);
        let err = StaticPlanner::new(plan)
            .generate("x", &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::InvalidPlan(_)));
    }

    #[tokio::test]
    async fn test_fallback_planner_degrades() {
        let planner = FallbackPlanner::new(Arc::new(DownPlanner), "gemini_suggest_action");
        let plan = planner.generate("send the report", &Map::new()).await.unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps[0].action, "gemini_suggest_action");
        assert_eq!(plan.steps[0].params["query"], json!("send the report"));
    }

    #[tokio::test]
    async fn test_fallback_planner_passes_through_success() {
        let plan = Plan::from_steps("fixed", vec![Step::new("a", "echo")]);
        let planner = FallbackPlanner::new(Arc::new(StaticPlanner::new(plan.clone())), "noop");

        assert_eq!(planner.generate("x", &Map::new()).await.unwrap(), plan);
    }
}
