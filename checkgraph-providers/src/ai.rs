//! AI provider: composes a stable block ordering around a
//! templated prompt, threads it through the session registry's clone/append
//! reuse semantics, and degrades timeouts and unparsable replies into
//! issues rather than provider failures.
//!
//! Individual vendor SDKs are out of scope — callers supply an [`AiBackend`]
//! implementation the way any capability trait gets wired up at the edge.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use checkgraph_core::error::{CheckGraphError, Result};
use checkgraph_core::model::{ReviewIssue, ReviewSummary, Severity};
use checkgraph_core::provider::{ExecuteContext, Provider, SessionInfo};
use checkgraph_session::{SessionHandle, SessionRegistry};
use checkgraph_tooling::sandbox_profile::guarded_join;
use serde_json::{json, Value};

use crate::context::build_template_context;
use crate::template;

/// A single round-trip to a language model. Implementations own
/// authentication, rate limiting, and vendor-specific request shaping.
#[async_trait]
pub trait AiBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, AiBackendError>;

    async fn is_available(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiBackendError {
    Timeout,
    ParseError(String),
    Transient(String),
}

/// Echoes the rendered prompt back, wrapped as if it were a finding-free
/// reply. Useful as the default backend in hosts that haven't wired a real
/// vendor SDK yet, and in tests.
pub struct EchoBackend;

#[async_trait]
impl AiBackend for EchoBackend {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, AiBackendError> {
        Ok(format!("{{\"content\": {}}}", json!(prompt)))
    }
}

/// Resolves `config["prompt"]` into prompt text: an inline string, a
/// `{file: "path"}` object read from disk under `project_root`, or a
/// `{content: "..."}` object.
fn resolve_prompt_source(config: &HashMap<String, Value>, project_root: &Path) -> Result<String> {
    match config.get("prompt") {
        Some(Value::String(inline)) => Ok(inline.clone()),
        Some(Value::Object(map)) => {
            if let Some(path) = map.get("file").and_then(Value::as_str) {
                let resolved = guarded_join(project_root, path)
                    .map_err(|e| CheckGraphError::ProviderFatal { provider_type: "ai".to_string(), message: e })?;
                std::fs::read_to_string(&resolved).map_err(|e| CheckGraphError::ProviderFatal {
                    provider_type: "ai".to_string(),
                    message: format!("failed to read prompt file '{}': {e}", resolved.display()),
                })
            } else if let Some(content) = map.get("content").and_then(Value::as_str) {
                Ok(content.to_string())
            } else {
                Err(CheckGraphError::ProviderFatal {
                    provider_type: "ai".to_string(),
                    message: "prompt object must have 'file' or 'content'".to_string(),
                })
            }
        }
        _ => Err(CheckGraphError::ProviderFatal { provider_type: "ai".to_string(), message: "missing required 'prompt' config".to_string() }),
    }
}

/// Builds the message sent to the backend: a single `<reminder>` block when
/// extending a reused session (the hard invariant is that no diff or PR
/// metadata is re-sent here), otherwise the full stable block ordering.
fn compose_message(ctx: &ExecuteContext<'_>, instructions: &str, reusing: bool) -> String {
    if reusing {
        return format!("<reminder>\n{instructions}\n</reminder>");
    }

    let mut blocks = String::new();
    blocks.push_str("<review_request>\n");

    blocks.push_str("<context>\n");
    blocks.push_str(&format!("PR #{}: {}\n", ctx.pr_info.number, ctx.pr_info.title));
    if !ctx.pr_info.body.is_empty() {
        blocks.push_str(&ctx.pr_info.body);
        blocks.push('\n');
    }
    let skip_code_context = ctx.config.get("skip_code_context").and_then(Value::as_bool).unwrap_or(false);
    if !skip_code_context {
        if let Some(diff) = &ctx.pr_info.full_diff {
            blocks.push_str(diff);
            blocks.push('\n');
        }
    }
    blocks.push_str("</context>\n");

    let skip_slack_context = ctx.config.get("skip_slack_context").and_then(Value::as_bool).unwrap_or(false);
    if !skip_slack_context {
        if let Some(slack) = ctx.config.get("slack_context").and_then(Value::as_str) {
            blocks.push_str("<slack_context>\n");
            blocks.push_str(slack);
            blocks.push_str("\n</slack_context>\n");
        }
    }

    blocks.push_str("<instructions>\n");
    blocks.push_str(instructions);
    blocks.push_str("\n</instructions>\n");

    if let Some(schema) = ctx.config.get("rules") {
        blocks.push_str("<rules>\n");
        blocks.push_str(&schema.to_string());
        blocks.push_str("\n</rules>\n");
    }

    blocks.push_str("</review_request>");
    blocks
}

/// The session key this invocation mutates and, when reusing, the key it
/// was seeded from.
struct SessionPlan {
    active_key: String,
    reusing: bool,
}

fn plan_session(sessions: &SessionRegistry, check_id: &str, session_info: &SessionInfo) -> Result<SessionPlan> {
    use checkgraph_core::model::SessionMode;

    let Some(parent_key) = (session_info.reuse_session.then(|| session_info.parent_session_id.clone()).flatten()) else {
        sessions
            .register(check_id, SessionHandle::new(check_id))
            .map_err(|e| CheckGraphError::ProviderFatal { provider_type: "ai".to_string(), message: e.to_string() })?;
        return Ok(SessionPlan { active_key: check_id.to_string(), reusing: false });
    };

    match session_info.session_mode {
        SessionMode::Append => {
            sessions.get(&parent_key).map_err(|e| CheckGraphError::ProviderFatal { provider_type: "ai".to_string(), message: e.to_string() })?;
            Ok(SessionPlan { active_key: parent_key, reusing: true })
        }
        SessionMode::Clone => {
            let dst_key = sessions.next_clone_key(check_id);
            sessions
                .clone_session(&parent_key, &dst_key)
                .map_err(|e| CheckGraphError::ProviderFatal { provider_type: "ai".to_string(), message: e.to_string() })?;
            Ok(SessionPlan { active_key: dst_key, reusing: true })
        }
    }
}

pub struct AiProvider {
    backend: Arc<dyn AiBackend>,
    sessions: Arc<SessionRegistry>,
}

impl AiProvider {
    pub fn new(backend: Arc<dyn AiBackend>, sessions: Arc<SessionRegistry>) -> Self {
        Self { backend, sessions }
    }
}

#[async_trait]
impl Provider for AiProvider {
    fn name(&self) -> &str {
        "ai"
    }

    fn description(&self) -> &str {
        "Runs a language-model review over the PR, optionally extending a prior session"
    }

    fn validate_config(&self, config: &HashMap<String, Value>) -> bool {
        config.contains_key("prompt")
    }

    fn supported_config_keys(&self) -> Vec<&str> {
        vec!["prompt", "skip_code_context", "skip_slack_context", "slack_context", "rules", "project_root"]
    }

    async fn is_available(&self) -> bool {
        self.backend.is_available().await
    }

    async fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<ReviewSummary> {
        let project_root = ctx.config.get("project_root").and_then(Value::as_str).unwrap_or(".");
        let prompt_source = resolve_prompt_source(ctx.config, Path::new(project_root))?;

        let template_ctx = build_template_context(ctx);
        let instructions = template::render(&prompt_source, &template_ctx)
            .map_err(|e| CheckGraphError::ProviderFatal { provider_type: "ai".to_string(), message: e.to_string() })?;

        let plan = plan_session(&self.sessions, ctx.check_id, ctx.session_info)?;
        let message = compose_message(ctx, &instructions, plan.reusing);

        {
            let slot = self
                .sessions
                .get(&plan.active_key)
                .map_err(|e| CheckGraphError::ProviderFatal { provider_type: "ai".to_string(), message: e.to_string() })?;
            slot.lock().append_turn("user", json!(message.clone()));
        }

        let reply = match self.backend.complete(&message).await {
            Ok(reply) => reply,
            Err(AiBackendError::Timeout) => {
                return Ok(ReviewSummary {
                    issues: vec![ReviewIssue::new("", 0, "ai/timeout", "the model did not respond in time", Severity::Error)],
                    ..Default::default()
                });
            }
            Err(AiBackendError::ParseError(detail)) => {
                return Ok(ReviewSummary {
                    issues: vec![ReviewIssue::new("", 0, "ai/parse_error", detail, Severity::Error)],
                    ..Default::default()
                });
            }
            Err(AiBackendError::Transient(detail)) => {
                return Err(CheckGraphError::ProviderTransient { provider_type: "ai".to_string(), message: detail });
            }
        };

        let slot = self
            .sessions
            .get(&plan.active_key)
            .map_err(|e| CheckGraphError::ProviderFatal { provider_type: "ai".to_string(), message: e.to_string() })?;
        slot.lock().append_turn("assistant", json!(reply.clone()));

        match serde_json::from_str::<Value>(&reply) {
            Ok(parsed) => {
                let issues = parsed
                    .get("issues")
                    .and_then(Value::as_array)
                    .map(|arr| arr.iter().filter_map(|v| serde_json::from_value(v.clone()).ok()).collect())
                    .unwrap_or_default();
                let content = parsed.get("content").and_then(Value::as_str).map(String::from);
                Ok(ReviewSummary { issues, content, output: Some(parsed), ..Default::default() })
            }
            Err(e) => {
                tracing::debug!(check_id = ctx.check_id, reply = %checkgraph_tooling::logging::sanitize_for_logging(&reply), error = %e, "model reply was not valid JSON");
                Ok(ReviewSummary {
                    issues: vec![ReviewIssue::new("", 0, "ai/parse_error", format!("model reply was not valid JSON: {e}"), Severity::Error)],
                    ..Default::default()
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkgraph_core::model::{PrInfo, SessionMode};

    struct FixedBackend(String);

    #[async_trait]
    impl AiBackend for FixedBackend {
        async fn complete(&self, _prompt: &str) -> std::result::Result<String, AiBackendError> {
            Ok(self.0.clone())
        }
    }

    struct TimeoutBackend;

    #[async_trait]
    impl AiBackend for TimeoutBackend {
        async fn complete(&self, _prompt: &str) -> std::result::Result<String, AiBackendError> {
            Err(AiBackendError::Timeout)
        }
    }

    fn pr() -> PrInfo {
        let mut pr = PrInfo::new(7, "Fix off-by-one");
        pr.full_diff = Some("--- a/x\n+++ b/x\n".to_string());
        pr
    }

    #[tokio::test]
    async fn fresh_session_includes_full_context_blocks() {
        let sessions = Arc::new(SessionRegistry::new());
        let provider = AiProvider::new(Arc::new(EchoBackend), sessions.clone());
        let pr = pr();
        let mut config = HashMap::new();
        config.insert("prompt".to_string(), Value::String("Review this PR".to_string()));
        let deps = HashMap::new();
        let session_info = SessionInfo::default();
        let ctx = ExecuteContext { check_id: "review", pr_info: &pr, config: &config, dependency_results: &deps, session_info: &session_info };
        let summary = provider.execute(&ctx).await.unwrap();
        let echoed = summary.output.unwrap()["content"].as_str().unwrap().to_string();
        assert!(echoed.contains("<review_request>"));
        assert!(echoed.contains("<context>"));
        assert!(echoed.contains("--- a/x"));
    }

    #[tokio::test]
    async fn reused_session_sends_only_a_reminder_block() {
        let sessions = Arc::new(SessionRegistry::new());
        sessions.register("upstream", SessionHandle::new("conv-1")).unwrap();
        let provider = AiProvider::new(Arc::new(EchoBackend), sessions.clone());
        let pr = pr();
        let mut config = HashMap::new();
        config.insert("prompt".to_string(), Value::String("Follow up".to_string()));
        let deps = HashMap::new();
        let session_info =
            SessionInfo { parent_session_id: Some("upstream".to_string()), reuse_session: true, session_mode: SessionMode::Append };
        let ctx = ExecuteContext { check_id: "followup", pr_info: &pr, config: &config, dependency_results: &deps, session_info: &session_info };
        let summary = provider.execute(&ctx).await.unwrap();
        let echoed = summary.output.unwrap()["content"].as_str().unwrap().to_string();
        assert!(echoed.starts_with("<reminder>"));
        assert!(!echoed.contains("<context>"));
        assert!(!echoed.contains("--- a/x"));
    }

    #[tokio::test]
    async fn clone_mode_leaves_the_parent_session_untouched() {
        let sessions = Arc::new(SessionRegistry::new());
        sessions.register("upstream", SessionHandle::new("conv-1")).unwrap();
        let provider = AiProvider::new(Arc::new(EchoBackend), sessions.clone());
        let pr = pr();
        let mut config = HashMap::new();
        config.insert("prompt".to_string(), Value::String("Branch off".to_string()));
        let deps = HashMap::new();
        let session_info =
            SessionInfo { parent_session_id: Some("upstream".to_string()), reuse_session: true, session_mode: SessionMode::Clone };
        let ctx = ExecuteContext { check_id: "branch", pr_info: &pr, config: &config, dependency_results: &deps, session_info: &session_info };
        provider.execute(&ctx).await.unwrap();
        let parent = sessions.get("upstream").unwrap();
        assert!(parent.lock().transcript.is_empty());
    }

    #[tokio::test]
    async fn timeout_becomes_an_issue_not_an_error() {
        let sessions = Arc::new(SessionRegistry::new());
        let provider = AiProvider::new(Arc::new(TimeoutBackend), sessions);
        let pr = pr();
        let mut config = HashMap::new();
        config.insert("prompt".to_string(), Value::String("Review".to_string()));
        let deps = HashMap::new();
        let session_info = SessionInfo::default();
        let ctx = ExecuteContext { check_id: "review", pr_info: &pr, config: &config, dependency_results: &deps, session_info: &session_info };
        let summary = provider.execute(&ctx).await.unwrap();
        assert_eq!(summary.issues[0].rule_id, "ai/timeout");
    }

    #[tokio::test]
    async fn unparsable_reply_becomes_a_parse_error_issue() {
        let sessions = Arc::new(SessionRegistry::new());
        let provider = AiProvider::new(Arc::new(FixedBackend("not json".to_string())), sessions);
        let pr = pr();
        let mut config = HashMap::new();
        config.insert("prompt".to_string(), Value::String("Review".to_string()));
        let deps = HashMap::new();
        let session_info = SessionInfo::default();
        let ctx = ExecuteContext { check_id: "review", pr_info: &pr, config: &config, dependency_results: &deps, session_info: &session_info };
        let summary = provider.execute(&ctx).await.unwrap();
        assert_eq!(summary.issues[0].rule_id, "ai/parse_error");
    }
}
