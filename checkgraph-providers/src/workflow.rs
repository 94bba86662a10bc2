//! Workflow provider: runs a nested workflow to completion and
//! flattens its aggregated output into a single `ReviewSummary`. The nested
//! run shares the outer provider registry (so nested checks resolve the
//! same built-ins) but gets its own event bus and scheduler, the way a
//! sub-workflow is its own Pregel instance rather than a step inside the
//! parent's.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use checkgraph_core::error::{CheckGraphError, Result};
use checkgraph_core::events::EventBus;
use checkgraph_core::model::{ReviewSummary, WorkflowConfig};
use checkgraph_core::provider::{ExecuteContext, Provider, ProviderRegistry};
use checkgraph_core::scheduler::Scheduler;
use checkgraph_tooling::cancellation::CancellationToken;
use serde_json::Value;

pub struct WorkflowProvider {
    providers: Arc<ProviderRegistry>,
}

impl WorkflowProvider {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }
}

/// Applies `config["overrides"]` — a `checkId -> partial config` map — onto
/// the loaded workflow's check definitions before the nested run starts.
fn apply_overrides(mut workflow: WorkflowConfig, overrides: &Value) -> WorkflowConfig {
    let Some(overrides) = overrides.as_object() else {
        return workflow;
    };
    for (check_id, patch) in overrides {
        if let (Some(check), Some(patch)) = (workflow.checks.get_mut(check_id), patch.as_object()) {
            for (key, value) in patch {
                check.config.insert(key.clone(), value.clone());
            }
        }
    }
    workflow
}

#[async_trait]
impl Provider for WorkflowProvider {
    fn name(&self) -> &str {
        "workflow"
    }

    fn description(&self) -> &str {
        "Runs a nested workflow to completion and surfaces its aggregated output"
    }

    fn validate_config(&self, config: &HashMap<String, Value>) -> bool {
        config.get("workflow").and_then(Value::as_object).is_some()
    }

    fn supported_config_keys(&self) -> Vec<&str> {
        vec!["workflow", "event", "inputs", "overrides"]
    }

    async fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<ReviewSummary> {
        let workflow_value = ctx.config.get("workflow").cloned().ok_or_else(|| CheckGraphError::ProviderFatal {
            provider_type: "workflow".to_string(),
            message: "missing required 'workflow' config".to_string(),
        })?;
        let workflow: WorkflowConfig = serde_json::from_value(workflow_value)
            .map_err(|e| CheckGraphError::ProviderFatal { provider_type: "workflow".to_string(), message: format!("invalid nested workflow: {e}") })?;
        let workflow = match ctx.config.get("overrides") {
            Some(overrides) => apply_overrides(workflow, overrides),
            None => workflow,
        };

        let event = ctx.config.get("event").and_then(Value::as_str).unwrap_or("nested").to_string();

        let scheduler = Scheduler::new(Arc::new(workflow), self.providers.clone(), Arc::new(EventBus::new()), CancellationToken::new());

        if let Some(inputs) = ctx.config.get("inputs") {
            scheduler.outputs().record("inputs", ReviewSummary { output: Some(inputs.clone()), ..Default::default() });
        }

        let aggregator = scheduler.run(ctx.pr_info, &event).await?;
        let (grouped, statistics) = aggregator.into_parts();

        let issues = grouped.0.values().flat_map(|by_check| by_check.values()).flat_map(|summaries| summaries.iter()).flat_map(|summary| summary.issues.clone()).collect();

        Ok(ReviewSummary {
            issues,
            output: Some(serde_json::json!({ "grouped": grouped, "statistics": statistics })),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkgraph_core::model::{CheckDefinition, PrInfo};
    use checkgraph_core::provider::SessionInfo;
    use serde_json::json;

    fn registry_with_noop() -> Arc<ProviderRegistry> {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(crate::noop::NoopProvider)).unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn runs_a_nested_workflow_and_flattens_its_output() {
        let providers = registry_with_noop();
        let provider = WorkflowProvider::new(providers);

        let mut checks = HashMap::new();
        let mut gate = CheckDefinition::new("gate", "noop");
        gate.on = vec!["nested".to_string()];
        checks.insert("gate".to_string(), gate);
        let nested = WorkflowConfig {
            version: "1".to_string(),
            ai_model: None,
            ai_provider: None,
            env: HashMap::new(),
            max_parallelism: 4,
            loop_budget: 10,
            failure_conditions: Vec::new(),
            checks,
        };

        let mut config = HashMap::new();
        config.insert("workflow".to_string(), serde_json::to_value(&nested).unwrap());
        config.insert("event".to_string(), json!("nested"));

        let pr = PrInfo::new(1, "title");
        let deps = HashMap::new();
        let session_info = SessionInfo::default();
        let ctx = ExecuteContext { check_id: "sub", pr_info: &pr, config: &config, dependency_results: &deps, session_info: &session_info };
        let summary = provider.execute(&ctx).await.unwrap();
        assert!(summary.issues.is_empty());
        assert!(summary.output.unwrap()["grouped"].is_object());
    }

    #[test]
    fn overrides_patch_only_named_checks() {
        let mut checks = HashMap::new();
        checks.insert("a".to_string(), CheckDefinition::new("a", "noop"));
        checks.insert("b".to_string(), CheckDefinition::new("b", "noop"));
        let workflow = WorkflowConfig {
            version: "1".to_string(),
            ai_model: None,
            ai_provider: None,
            env: HashMap::new(),
            max_parallelism: 4,
            loop_budget: 10,
            failure_conditions: Vec::new(),
            checks,
        };
        let overrides = json!({ "a": { "message": "patched" } });
        let patched = apply_overrides(workflow, &overrides);
        assert_eq!(patched.checks["a"].config["message"], json!("patched"));
        assert!(!patched.checks["b"].config.contains_key("message"));
    }
}
