//! Noop provider: synchronization points, routing hubs, and
//! quality gates that only ever act through `fail_if`. Always available,
//! never adds issues on its own.

use std::collections::HashMap;

use async_trait::async_trait;
use checkgraph_core::error::Result;
use checkgraph_core::model::ReviewSummary;
use checkgraph_core::provider::{ExecuteContext, Provider};
use serde_json::Value;

pub struct NoopProvider;

#[async_trait]
impl Provider for NoopProvider {
    fn name(&self) -> &str {
        "noop"
    }

    fn description(&self) -> &str {
        "Always-succeeding placeholder for routing hubs and quality gates"
    }

    fn validate_config(&self, _config: &HashMap<String, Value>) -> bool {
        true
    }

    async fn execute(&self, _ctx: &ExecuteContext<'_>) -> Result<ReviewSummary> {
        Ok(ReviewSummary::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkgraph_core::model::PrInfo;
    use checkgraph_core::provider::SessionInfo;

    #[tokio::test]
    async fn noop_always_succeeds_with_no_issues() {
        let provider = NoopProvider;
        let pr = PrInfo::new(1, "title");
        let config = HashMap::new();
        let deps = HashMap::new();
        let session_info = SessionInfo::default();
        let ctx = ExecuteContext { check_id: "gate", pr_info: &pr, config: &config, dependency_results: &deps, session_info: &session_info };
        let summary = provider.execute(&ctx).await.unwrap();
        assert!(summary.issues.is_empty());
    }
}
