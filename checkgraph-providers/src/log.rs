//! Log provider: renders a formatted text artifact for inspection.
//! Issues stay empty — the point is the `content` field frontends display,
//! not a finding.

use std::collections::HashMap;

use async_trait::async_trait;
use checkgraph_core::error::Result;
use checkgraph_core::model::ReviewSummary;
use checkgraph_core::provider::{ExecuteContext, Provider};
use serde_json::Value;

use crate::context::build_template_context;
use crate::template;

fn level_emoji(level: &str) -> &'static str {
    match level {
        "warn" | "warning" => "⚠️",
        "error" => "🛑",
        "debug" => "🔍",
        _ => "ℹ️",
    }
}

pub struct LogProvider;

#[async_trait]
impl Provider for LogProvider {
    fn name(&self) -> &str {
        "log"
    }

    fn description(&self) -> &str {
        "Emits a formatted text artifact for frontends to surface"
    }

    fn validate_config(&self, config: &HashMap<String, Value>) -> bool {
        config.contains_key("message")
    }

    fn supported_config_keys(&self) -> Vec<&str> {
        vec!["message", "level", "emoji"]
    }

    async fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<ReviewSummary> {
        let message = ctx.config.get("message").and_then(Value::as_str).unwrap_or_default();
        let level = ctx.config.get("level").and_then(Value::as_str).unwrap_or("info");
        let use_emoji = ctx.config.get("emoji").and_then(Value::as_bool).unwrap_or(true);

        let template_ctx = build_template_context(ctx);
        let rendered = template::render(message, &template_ctx).unwrap_or_else(|_| message.to_string());

        let content = if use_emoji { format!("{} {}", level_emoji(level), rendered) } else { rendered };

        Ok(ReviewSummary { content: Some(content), ..Default::default() })
    }
}
