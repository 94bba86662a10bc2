//! Command provider: runs `exec` in a configured working
//! directory, a Liquid template over the PR context, and folds
//! `file:line:col: severity: message` lines from its output into issues.
//! Nonzero exit does not itself mean failure — linters routinely exit
//! nonzero on findings — so the only provider-level error path is "the
//! executable could not be spawned at all".

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use checkgraph_core::error::{CheckGraphError, Result};
use checkgraph_core::model::{Category, ReviewIssue, ReviewSummary, Severity, SummaryDebug};
use checkgraph_core::provider::{ExecuteContext, Provider};
use checkgraph_tooling::sandbox_profile::SandboxProfile;
use regex::Regex;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::context::build_template_context;
use crate::template;

fn findings_pattern() -> Regex {
    Regex::new(r"(?m)^(?P<file>[^:\n]+):(?P<line>\d+):(?P<col>\d+):\s*(?P<severity>error|warning|warn|info|critical)\s*:\s*(?P<message>.+)$").expect("static pattern")
}

fn parse_severity(raw: &str) -> Severity {
    match raw.to_ascii_lowercase().as_str() {
        "error" => Severity::Error,
        "critical" => Severity::Critical,
        "info" => Severity::Info,
        _ => Severity::Warning,
    }
}

/// Parse every `file:line:col: severity: message` line in `output` into an
/// issue namespaced `tool/<category>`.
pub fn parse_findings(output: &str, category: &str) -> Vec<ReviewIssue> {
    let pattern = findings_pattern();
    pattern
        .captures_iter(output)
        .map(|caps| {
            let mut issue = ReviewIssue::new(
                caps["file"].to_string(),
                caps["line"].parse().unwrap_or(0),
                format!("tool/{category}"),
                caps["message"].trim().to_string(),
                parse_severity(&caps["severity"]),
            );
            issue.category = Category::Other(category.to_string());
            issue
        })
        .collect()
}

pub struct CommandProvider;

#[async_trait]
impl Provider for CommandProvider {
    fn name(&self) -> &str {
        "command"
    }

    fn description(&self) -> &str {
        "Runs a templated shell command and parses its output for findings"
    }

    fn validate_config(&self, config: &HashMap<String, Value>) -> bool {
        config.contains_key("exec")
    }

    fn supported_config_keys(&self) -> Vec<&str> {
        vec!["exec", "cwd", "stdin", "category", "env_allow_list", "read_only"]
    }

    async fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<ReviewSummary> {
        let Some(exec_template) = ctx.config.get("exec").and_then(Value::as_str) else {
            return Ok(ReviewSummary {
                issues: vec![ReviewIssue::new("", 0, "command/execution_error", "missing required 'exec' config", Severity::Error)],
                ..Default::default()
            });
        };

        let template_ctx = build_template_context(ctx);
        let rendered_exec = template::render(exec_template, &template_ctx)
            .map_err(|e| CheckGraphError::ProviderFatal { provider_type: "command".to_string(), message: e.to_string() })?;

        let rendered_stdin = match ctx.config.get("stdin").and_then(Value::as_str) {
            Some(stdin_template) => Some(
                template::render(stdin_template, &template_ctx)
                    .map_err(|e| CheckGraphError::ProviderFatal { provider_type: "command".to_string(), message: e.to_string() })?,
            ),
            None => None,
        };

        let cwd = ctx.config.get("cwd").and_then(Value::as_str).unwrap_or(".").to_string();
        let category = ctx.config.get("category").and_then(Value::as_str).unwrap_or("lint").to_string();

        let allow_list: Vec<String> =
            ctx.config.get("env_allow_list").and_then(Value::as_array).map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect()).unwrap_or_default();
        let read_only = ctx.config.get("read_only").and_then(Value::as_bool).unwrap_or(false);
        let profile = allow_list.iter().fold(
            SandboxProfile::new().with_read_only(read_only).with_allowed_path(cwd.clone()),
            |p, name| p.with_env_allow(name.clone()),
        );
        let ambient: HashMap<String, String> = std::env::vars().collect();
        let curated = profile.curated_env(&ambient);

        let mut command = Command::new("/bin/sh");
        command
            .arg("-c")
            .arg(&rendered_exec)
            .current_dir(&cwd)
            .env_clear()
            .envs(&curated)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| CheckGraphError::ProviderFatal { provider_type: "command".to_string(), message: format!("failed to spawn: {e}") })?;

        if let Some(stdin_text) = rendered_stdin {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(stdin_text.as_bytes()).await;
            }
        } else {
            drop(child.stdin.take());
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CheckGraphError::ProviderFatal { provider_type: "command".to_string(), message: format!("command execution failed: {e}") })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        let issues = parse_findings(&stdout, &category);
        if exit_code != 0 {
            tracing::debug!(
                check_id = ctx.check_id,
                exit_code,
                stderr = %checkgraph_tooling::logging::sanitize_for_logging(&stderr),
                "command exited nonzero"
            );
        }

        Ok(ReviewSummary {
            issues,
            content: Some(stdout.clone()),
            debug: Some(SummaryDebug {
                provider: Some("command".to_string()),
                processing_time_ms: None,
                errors: if exit_code != 0 { vec![format!("exit code {exit_code}: {stderr}")] } else { Vec::new() },
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}
