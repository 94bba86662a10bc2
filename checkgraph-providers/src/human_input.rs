//! Human-input provider: always suspends. The scheduler is the one
//! that turns a `HumanInputPending` error into a `HumanInputRequested`
//! event and an `awaiting human input` issue (see `run_invocation` in
//! `checkgraph-core`'s scheduler) — this provider's only job is to signal
//! that it never completes on its own.

use std::collections::HashMap;

use async_trait::async_trait;
use checkgraph_core::error::{CheckGraphError, Result};
use checkgraph_core::model::ReviewSummary;
use checkgraph_core::provider::{ExecuteContext, Provider, Requirement};
use serde_json::Value;

pub struct HumanInputProvider;

#[async_trait]
impl Provider for HumanInputProvider {
    fn name(&self) -> &str {
        "human_input"
    }

    fn description(&self) -> &str {
        "Suspends the check until a resume event arrives through the event bus"
    }

    fn validate_config(&self, config: &HashMap<String, Value>) -> bool {
        config.contains_key("prompt")
    }

    fn supported_config_keys(&self) -> Vec<&str> {
        vec!["prompt", "channel"]
    }

    fn requirements(&self) -> Vec<Requirement> {
        vec![Requirement::new("event_bus", "a running event bus for the resume signal to arrive on")]
    }

    async fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<ReviewSummary> {
        Err(CheckGraphError::HumanInputPending { check_id: ctx.check_id.to_string() })
    }
}
