//! Data model shared by every component: the review subject, check
//! definitions, findings, execution records, and the read-only `outputs`
//! projection handed to expressions.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use checkgraph_tooling::retry::{BackoffMode, RetryPolicy};

/// A single file change within a pull request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileDelta {
    pub filename: String,
    pub status: FileStatus,
    pub additions: usize,
    pub deletions: usize,
    pub changes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Added,
    Removed,
    Modified,
    Renamed,
}

/// The review subject. Immutable during a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrInfo {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub author: String,
    pub base_ref: String,
    pub head_ref: String,
    pub files: Vec<FileDelta>,
    pub additions: usize,
    pub deletions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_diff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_diff: Option<String>,
}

impl PrInfo {
    pub fn new(number: u64, title: impl Into<String>) -> Self {
        Self {
            number,
            title: title.into(),
            body: String::new(),
            author: String::new(),
            base_ref: "main".to_string(),
            head_ref: "head".to_string(),
            files: Vec::new(),
            additions: 0,
            deletions: 0,
            full_diff: None,
            commit_diff: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Security,
    Performance,
    Style,
    Logic,
    Other(String),
}

/// A single finding emitted by a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewIssue {
    pub file: String,
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    /// Namespaced like `provider/category`, e.g. `ai/security` or
    /// `ai/timeout`.
    pub rule_id: String,
    pub message: String,
    pub severity: Severity,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl ReviewIssue {
    pub fn new(file: impl Into<String>, line: u32, rule_id: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            file: file.into(),
            line,
            end_line: None,
            rule_id: rule_id.into(),
            message: message.into(),
            severity,
            category: Category::Other("uncategorized".to_string()),
            suggestion: None,
            replacement: None,
            group: None,
            schema: None,
        }
    }
}

/// Debug metadata a provider may attach to its summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SummaryDebug {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// The output of a single check invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReviewSummary {
    pub issues: Vec<ReviewIssue>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<SummaryDebug>,
}

impl ReviewSummary {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The value exposed to expressions as `outputs[checkId]`: the
    /// structured `output` when present, otherwise the raw `content`.
    pub fn outputs_value(&self) -> Value {
        if let Some(output) = &self.output {
            output.clone()
        } else if let Some(content) = &self.content {
            Value::String(content.clone())
        } else {
            Value::Null
        }
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    Normal,
    Internal,
}

impl Default for Criticality {
    fn default() -> Self {
        Criticality::Normal
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Clone,
    Append,
}

impl Default for SessionMode {
    fn default() -> Self {
        SessionMode::Clone
    }
}

/// A `fail_if`/`failure_conditions` entry with optional metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureCondition {
    pub name: String,
    pub expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub severity: ConditionSeverity,
    #[serde(default)]
    pub halt_execution: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConditionSeverity {
    Error,
    Warning,
    Info,
}

impl Default for ConditionSeverity {
    fn default() -> Self {
        ConditionSeverity::Error
    }
}

/// A single hook inside `on_init`/`on_success`/`on_fail`/`on_finish`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingHook {
    #[serde(default)]
    pub run: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_js: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goto: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goto_js: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goto_event: Option<String>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub when: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max")]
    pub max: usize,
    #[serde(default)]
    pub backoff: BackoffKind,
    #[serde(default = "default_retry_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_true")]
    pub jitter: bool,
    #[serde(default)]
    pub retryable_errors: Vec<String>,
}

fn default_retry_max() -> usize {
    1
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_retry_max_delay_ms() -> u64 {
    30_000
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Exponential,
    Fixed,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max: 1,
            backoff: BackoffKind::Exponential,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: true,
            retryable_errors: Vec::new(),
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max)
            .with_initial_delay_ms(self.initial_delay_ms)
            .with_max_delay_ms(self.max_delay_ms)
            .with_jitter(self.jitter)
            .with_mode(match self.backoff {
                BackoffKind::Exponential => BackoffMode::Exponential,
                BackoffKind::Fixed => BackoffMode::Fixed,
            })
            .with_retryable_errors(self.retryable_errors.clone())
    }
}

/// A single check in the workflow graph, keyed by `check_id` in the
/// owning `HashMap`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckDefinition {
    pub check_id: String,
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#if: Option<String>,
    #[serde(default)]
    pub for_each: bool,
    #[serde(default = "default_true")]
    pub fail_fast: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform_js: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_if: Option<String>,
    #[serde(default)]
    pub failure_conditions: Vec<FailureCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_init: Option<RoutingHook>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<RoutingHook>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_fail: Option<RoutingHook>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_finish: Option<RoutingHook>,
    #[serde(default)]
    pub criticality: Criticality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default)]
    pub reuse_ai_session: bool,
    #[serde(default)]
    pub session_mode: SessionMode,
    /// Arbitrary provider-specific fields (prompt text, exec command, url,
    /// nested workflow path, ...). Validated by
    /// `Provider::validate_config`.
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

impl CheckDefinition {
    pub fn new(check_id: impl Into<String>, provider_type: impl Into<String>) -> Self {
        Self {
            check_id: check_id.into(),
            provider_type: provider_type.into(),
            depends_on: Vec::new(),
            on: Vec::new(),
            r#if: None,
            for_each: false,
            fail_fast: true,
            transform_js: None,
            fail_if: None,
            failure_conditions: Vec::new(),
            on_init: None,
            on_success: None,
            on_fail: None,
            on_finish: None,
            criticality: Criticality::Normal,
            retry: None,
            timeout_ms: None,
            group: None,
            tags: Vec::new(),
            schema: None,
            reuse_ai_session: false,
            session_mode: SessionMode::Clone,
            config: HashMap::new(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
            .as_ref()
            .map(RetryConfig::to_policy)
            .unwrap_or_else(|| RetryPolicy::new(1))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// The top-level workflow document: `version`, optional global model
/// hints, curated `env`, the required `checks` map, plus the run-level
/// scheduling knobs that sit alongside it (`max_parallelism`, loop budget,
/// global `failure_conditions`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_provider: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    #[serde(default = "default_loop_budget")]
    pub loop_budget: usize,
    #[serde(default)]
    pub failure_conditions: Vec<FailureCondition>,
    pub checks: HashMap<String, CheckDefinition>,
}

fn default_max_parallelism() -> usize {
    4
}

fn default_loop_budget() -> usize {
    10
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
    Skipped,
    Errored,
}

/// One invocation of a check (one per `forEach` item).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub check_id: String,
    pub iteration: usize,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub provider_duration_ms: u64,
    pub input_fingerprint: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub issue_counts: HashMap<Severity, usize>,
}

impl ExecutionRecord {
    pub fn issue_counts_from(issues: &[ReviewIssue]) -> HashMap<Severity, usize> {
        let mut counts = HashMap::new();
        for issue in issues {
            *counts.entry(issue.severity).or_insert(0) += 1;
        }
        counts
    }
}

/// Per-run key/value memory, guarded by a single-writer discipline.
#[derive(Debug, Default)]
pub struct Memory {
    values: parking_lot::RwLock<HashMap<String, Value>>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.values.write().insert(key.into(), value);
    }

    /// Atomically append `value` to the array stored at `key`, creating it
    /// if absent.
    pub fn append(&self, key: &str, value: Value) {
        let mut guard = self.values.write();
        match guard.get_mut(key) {
            Some(Value::Array(arr)) => arr.push(value),
            Some(_) => {}
            None => {
                guard.insert(key.to_string(), Value::Array(vec![value]));
            }
        }
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.values.read().clone()
    }
}

/// The read-only projection of accumulated outputs handed to expressions:
/// `outputs[checkId]` and `outputs.history[checkId]`.
#[derive(Debug, Default)]
pub struct OutputsView {
    latest: parking_lot::RwLock<HashMap<String, ReviewSummary>>,
    history: parking_lot::RwLock<HashMap<String, Vec<ReviewSummary>>>,
}

impl OutputsView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a completed invocation's summary for `check_id`. `outputs`
    /// becomes this summary; `outputs.history` grows by one.
    pub fn record(&self, check_id: &str, summary: ReviewSummary) {
        self.latest.write().insert(check_id.to_string(), summary.clone());
        self.history
            .write()
            .entry(check_id.to_string())
            .or_default()
            .push(summary);
    }

    /// Sets `outputs[checkId]` to `summary` without appending it to
    /// history, then appends every entry in `items` to history instead.
    /// Used by `forEach` checks, where the history granularity (one entry
    /// per fanned-out item) differs from the invocation granularity (one
    /// summary per run).
    pub fn record_fan_out(&self, check_id: &str, summary: ReviewSummary, items: Vec<ReviewSummary>) {
        self.latest.write().insert(check_id.to_string(), summary);
        if !items.is_empty() {
            self.history.write().entry(check_id.to_string()).or_default().extend(items);
        }
    }

    pub fn latest(&self, check_id: &str) -> Option<ReviewSummary> {
        self.latest.read().get(check_id).cloned()
    }

    pub fn history(&self, check_id: &str) -> Vec<ReviewSummary> {
        self.history.read().get(check_id).cloned().unwrap_or_default()
    }

    pub fn history_len(&self, check_id: &str) -> usize {
        self.history.read().get(check_id).map(Vec::len).unwrap_or(0)
    }

    pub fn all_latest(&self) -> HashMap<String, ReviewSummary> {
        self.latest.read().clone()
    }

    pub fn all_history(&self) -> HashMap<String, Vec<ReviewSummary>> {
        self.history.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_fan_out_sets_latest_once_and_expands_history() {
        let view = OutputsView::new();
        let whole = ReviewSummary { output: Some(Value::from(vec![1, 2])), ..Default::default() };
        let items = vec![
            ReviewSummary { output: Some(Value::from(1)), ..Default::default() },
            ReviewSummary { output: Some(Value::from(2)), ..Default::default() },
        ];
        view.record_fan_out("a", whole.clone(), items);
        assert_eq!(view.latest("a"), Some(whole));
        assert_eq!(view.history_len("a"), 2);
        assert_eq!(view.history("a")[0].output, Some(Value::from(1)));
        assert_eq!(view.history("a")[1].output, Some(Value::from(2)));
    }

    #[test]
    fn record_fan_out_with_no_items_leaves_history_untouched() {
        let view = OutputsView::new();
        let errored = ReviewSummary { content: Some("boom".to_string()), ..Default::default() };
        view.record_fan_out("a", errored.clone(), Vec::new());
        assert_eq!(view.latest("a"), Some(errored));
        assert_eq!(view.history_len("a"), 0);
    }

    #[test]
    fn outputs_view_tracks_latest_and_history() {
        let view = OutputsView::new();
        view.record("a", ReviewSummary { output: Some(Value::from(1)), ..Default::default() });
        view.record("a", ReviewSummary { output: Some(Value::from(2)), ..Default::default() });
        assert_eq!(view.history_len("a"), 2);
        assert_eq!(view.latest("a").unwrap().output, Some(Value::from(2)));
        assert_eq!(view.history("a")[0].output, Some(Value::from(1)));
    }

    #[test]
    fn memory_append_creates_array() {
        let memory = Memory::new();
        memory.append("log", Value::from("first"));
        memory.append("log", Value::from("second"));
        assert_eq!(memory.get("log"), Some(serde_json::json!(["first", "second"])));
    }

    #[test]
    fn review_summary_outputs_value_prefers_structured_output() {
        let summary = ReviewSummary {
            output: Some(Value::from(42)),
            content: Some("raw text".to_string()),
            ..Default::default()
        };
        assert_eq!(summary.outputs_value(), Value::from(42));
    }

    #[test]
    fn review_summary_outputs_value_falls_back_to_content() {
        let summary = ReviewSummary {
            content: Some("raw text".to_string()),
            ..Default::default()
        };
        assert_eq!(summary.outputs_value(), Value::String("raw text".to_string()));
    }
}
