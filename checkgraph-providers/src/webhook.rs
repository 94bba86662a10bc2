//! Webhook provider: POSTs PR metadata plus upstream outputs to a
//! configured URL and expects a `ReviewSummary`-shaped JSON body back.
//! Network failures map to `ProviderTransient` so the scheduler's retry
//! policy (not this module) decides whether to try again.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use checkgraph_core::error::{CheckGraphError, Result};
use checkgraph_core::model::ReviewSummary;
use checkgraph_core::provider::{ExecuteContext, Provider};
use serde_json::{json, Value};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct WebhookProvider;

#[async_trait]
impl Provider for WebhookProvider {
    fn name(&self) -> &str {
        "webhook"
    }

    fn description(&self) -> &str {
        "Delegates review work to an external HTTP endpoint"
    }

    fn validate_config(&self, config: &HashMap<String, Value>) -> bool {
        config.get("url").and_then(Value::as_str).is_some()
    }

    fn supported_config_keys(&self) -> Vec<&str> {
        vec!["url", "timeout_ms", "headers"]
    }

    async fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<ReviewSummary> {
        let url = ctx.config.get("url").and_then(Value::as_str).ok_or_else(|| CheckGraphError::ProviderFatal {
            provider_type: "webhook".to_string(),
            message: "missing required 'url' config".to_string(),
        })?;

        let timeout_ms = ctx.config.get("timeout_ms").and_then(Value::as_u64).unwrap_or(DEFAULT_TIMEOUT_SECS * 1000);

        let envelope = json!({
            "checkName": ctx.check_id,
            "pr": ctx.pr_info,
            "outputs": ctx.dependency_results,
            "sessionInfo": ctx.session_info,
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| CheckGraphError::ProviderFatal { provider_type: "webhook".to_string(), message: e.to_string() })?;

        let mut request = client.post(url).json(&envelope);
        if let Some(headers) = ctx.config.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key.as_str(), value);
                }
            }
        }

        let response = request.send().await.map_err(|e| CheckGraphError::ProviderTransient {
            provider_type: "webhook".to_string(),
            message: format!("request failed: {e}"),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CheckGraphError::ProviderTransient {
                provider_type: "webhook".to_string(),
                message: format!("endpoint responded with status {status}"),
            });
        }

        response.json::<ReviewSummary>().await.map_err(|e| CheckGraphError::ProviderFatal {
            provider_type: "webhook".to_string(),
            message: format!("response was not a valid review summary: {e}"),
        })
    }
}
