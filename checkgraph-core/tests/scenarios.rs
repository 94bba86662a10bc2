//! End-to-end scheduler scenarios and cross-cutting invariants, run through
//! `Scheduler::run` against minimal stub providers rather than mocks of the
//! scheduler's own internals. The AI-session-reuse scenario lives in
//! `checkgraph-providers` instead, since it depends on `AiProvider` and
//! `SessionRegistry`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use checkgraph_core::error::Result;
use checkgraph_core::events::EventBus;
use checkgraph_core::model::{CheckDefinition, PrInfo, ReviewSummary, RoutingHook, WorkflowConfig};
use checkgraph_core::provider::{ExecuteContext, Provider, ProviderRegistry};
use checkgraph_core::scheduler::Scheduler;
use checkgraph_tooling::cancellation::CancellationToken;

/// Returns `config["output"]` as the check's structured output, untouched.
/// Stands in for a command provider whose stdout has already been parsed
/// into structured JSON by the time it reaches `transform_js` — this repo's
/// expression sandbox is a whitelisted grammar, not a JavaScript engine, so
/// `JSON.parse` itself is a provider-side concern, not something
/// `transform_js` can call.
struct StructuredOutputProvider;

#[async_trait]
impl Provider for StructuredOutputProvider {
    fn name(&self) -> &str {
        "structured_output"
    }

    fn validate_config(&self, config: &HashMap<String, Value>) -> bool {
        config.contains_key("output")
    }

    async fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<ReviewSummary> {
        Ok(ReviewSummary { output: ctx.config.get("output").cloned(), ..Default::default() })
    }
}

/// Formats its sole dependency's `{key, p}` object as `"TICKET:key:p"`.
/// Stands in for a Liquid-templated echo provider without pulling the
/// templating crate into this crate's own test suite.
struct TicketEchoProvider;

#[async_trait]
impl Provider for TicketEchoProvider {
    fn name(&self) -> &str {
        "ticket_echo"
    }

    fn validate_config(&self, _config: &HashMap<String, Value>) -> bool {
        true
    }

    async fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<ReviewSummary> {
        let ticket = ctx.dependency_results.get("A").cloned().unwrap_or(Value::Null);
        let key = ticket.get("key").and_then(Value::as_str).unwrap_or_default();
        let priority = ticket.get("p").and_then(Value::as_str).unwrap_or_default();
        Ok(ReviewSummary { content: Some(format!("TICKET:{key}:{priority}")), ..Default::default() })
    }
}

/// Always succeeds with no issues of its own, the way `noop` does, without
/// depending on `checkgraph-providers` from this crate's own tests.
struct SucceedProvider;

#[async_trait]
impl Provider for SucceedProvider {
    fn name(&self) -> &str {
        "succeed"
    }

    fn validate_config(&self, _config: &HashMap<String, Value>) -> bool {
        true
    }

    async fn execute(&self, _ctx: &ExecuteContext<'_>) -> Result<ReviewSummary> {
        Ok(ReviewSummary::empty())
    }
}

fn registry() -> Arc<ProviderRegistry> {
    let registry = Arc::new(ProviderRegistry::new());
    registry.register(Arc::new(StructuredOutputProvider)).unwrap();
    registry.register(Arc::new(TicketEchoProvider)).unwrap();
    registry.register(Arc::new(SucceedProvider)).unwrap();
    registry
}

fn workflow(checks: Vec<CheckDefinition>, loop_budget: usize) -> Arc<WorkflowConfig> {
    Arc::new(WorkflowConfig {
        version: "1".to_string(),
        ai_model: None,
        ai_provider: None,
        env: HashMap::new(),
        max_parallelism: 4,
        loop_budget,
        failure_conditions: Vec::new(),
        checks: checks.into_iter().map(|c| (c.check_id.clone(), c)).collect(),
    })
}

fn scheduler(checks: Vec<CheckDefinition>, loop_budget: usize) -> Scheduler {
    Scheduler::new(workflow(checks, loop_budget), registry(), Arc::new(EventBus::new()), CancellationToken::new())
}

#[tokio::test]
async fn s1_for_each_propagation_preserves_order() {
    let mut a = CheckDefinition::new("A", "structured_output");
    a.on = vec!["pull_request".to_string()];
    a.for_each = true;
    a.transform_js = Some("output.tickets".to_string());
    a.config.insert(
        "output".to_string(),
        json!({"tickets": [{"key": "T-1", "p": "high"}, {"key": "T-2", "p": "low"}]}),
    );

    let mut b = CheckDefinition::new("B", "ticket_echo");
    b.depends_on = vec!["A".to_string()];

    let scheduler = scheduler(vec![a, b], 10);
    scheduler.run(&PrInfo::new(1, "pr"), "pull_request").await.unwrap();

    let history: Vec<String> = scheduler.outputs().history("B").into_iter().map(|s| s.content.unwrap()).collect();
    assert_eq!(history, vec!["TICKET:T-1:high".to_string(), "TICKET:T-2:low".to_string()]);
}

#[tokio::test]
async fn s2_undefined_transform_errors_the_producer_and_empties_dependents() {
    let mut a = CheckDefinition::new("A", "succeed");
    a.on = vec!["pull_request".to_string()];
    a.for_each = true;
    a.transform_js = Some("null".to_string());

    let mut b = CheckDefinition::new("B", "succeed");
    b.depends_on = vec!["A".to_string()];

    let scheduler = scheduler(vec![a, b], 10);
    scheduler.run(&PrInfo::new(1, "pr"), "pull_request").await.unwrap();

    let a_output = scheduler.outputs().latest("A").unwrap();
    assert!(a_output.issues.iter().any(|i| i.rule_id.contains("transform_js_error")));
    assert_eq!(scheduler.outputs().history_len("A"), 0);

    let b_output = scheduler.outputs().latest("B").unwrap();
    assert!(b_output.issues.iter().any(|i| i.message.contains("forEach_empty")));
    assert_eq!(scheduler.outputs().history_len("B"), 0);
}

#[tokio::test]
async fn s3_sandbox_attack_in_fail_if_completes_the_run_without_failing() {
    let mut gate = CheckDefinition::new("gate", "succeed");
    gate.on = vec!["pull_request".to_string()];
    gate.fail_if = Some("process.exit(1)".to_string());

    let scheduler = scheduler(vec![gate], 10);
    let aggregator = scheduler.run(&PrInfo::new(1, "pr"), "pull_request").await.unwrap();

    let stats = &aggregator.statistics().per_check["gate"];
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn s5_self_goto_is_bounded_by_loop_budget_and_reports_exhaustion() {
    let mut gate = CheckDefinition::new("gate", "succeed");
    gate.on = vec!["pull_request".to_string()];
    gate.on_success = Some(RoutingHook { goto: Some("gate".to_string()), ..Default::default() });

    let bus = Arc::new(EventBus::new());
    let mut started_rx = bus.check_started();
    let scheduler = Scheduler::new(workflow(vec![gate], 2), registry(), bus, CancellationToken::new());
    scheduler.run(&PrInfo::new(1, "pr"), "pull_request").await.unwrap();

    let mut started_count = 0;
    while let Ok(event) = started_rx.try_recv() {
        if event.check_id == "gate" {
            started_count += 1;
        }
    }
    assert_eq!(started_count, 3);

    let history = scheduler.outputs().history("gate");
    assert!(history.iter().flat_map(|s| s.issues.iter()).any(|i| i.rule_id == "routing/budget_exhausted"));
}

#[tokio::test]
async fn s6_fail_fast_true_skips_siblings_of_a_failed_dependency() {
    let mut z = CheckDefinition::new("Z", "succeed");
    z.on = vec!["pull_request".to_string()];
    z.fail_if = Some("true".to_string());

    let mut x = CheckDefinition::new("X", "succeed");
    x.depends_on = vec!["Z".to_string()];
    x.fail_fast = true;
    let mut y = CheckDefinition::new("Y", "succeed");
    y.depends_on = vec!["Z".to_string()];
    y.fail_fast = true;

    let scheduler = scheduler(vec![z, x, y], 10);
    let aggregator = scheduler.run(&PrInfo::new(1, "pr"), "pull_request").await.unwrap();

    let stats = aggregator.statistics();
    assert_eq!(stats.per_check["X"].skipped, 1);
    assert_eq!(stats.per_check["Y"].skipped, 1);
}

#[tokio::test]
async fn s6_fail_fast_false_still_runs_siblings_of_a_failed_dependency() {
    let mut z = CheckDefinition::new("Z", "succeed");
    z.on = vec!["pull_request".to_string()];
    z.fail_if = Some("true".to_string());

    let mut x = CheckDefinition::new("X", "succeed");
    x.depends_on = vec!["Z".to_string()];
    x.fail_fast = false;
    let mut y = CheckDefinition::new("Y", "succeed");
    y.depends_on = vec!["Z".to_string()];
    y.fail_fast = false;

    let scheduler = scheduler(vec![z, x, y], 10);
    let aggregator = scheduler.run(&PrInfo::new(1, "pr"), "pull_request").await.unwrap();

    let stats = aggregator.statistics();
    assert_eq!(stats.per_check["X"].succeeded, 1);
    assert_eq!(stats.per_check["Y"].succeeded, 1);
}

/// Invariant 1: every `CheckCompleted(c)` is preceded, in the same topic
/// stream, by a terminal event for each of `c`'s dependencies.
#[tokio::test]
async fn invariant_topological_soundness_of_check_completed_order() {
    let mut z = CheckDefinition::new("Z", "succeed");
    z.on = vec!["pull_request".to_string()];
    let mut x = CheckDefinition::new("X", "succeed");
    x.depends_on = vec!["Z".to_string()];

    let bus = Arc::new(EventBus::new());
    let mut completed_rx = bus.check_completed();
    let scheduler = Scheduler::new(workflow(vec![z, x], 10), registry(), bus, CancellationToken::new());
    scheduler.run(&PrInfo::new(1, "pr"), "pull_request").await.unwrap();

    let mut order = Vec::new();
    while let Ok(event) = completed_rx.try_recv() {
        order.push(event.check_id);
    }
    let z_index = order.iter().position(|id| id == "Z").unwrap();
    let x_index = order.iter().position(|id| id == "X").unwrap();
    assert!(z_index < x_index);
}

/// Invariant 7: a check whose provider never emits issues only fails when
/// `fail_if` says so, and never gains issues of its own in the process.
#[tokio::test]
async fn invariant_noop_style_check_only_fails_via_fail_if() {
    let mut passthrough = CheckDefinition::new("gate", "succeed");
    passthrough.on = vec!["pull_request".to_string()];

    let passthrough_run = scheduler(vec![passthrough], 10);
    passthrough_run.run(&PrInfo::new(1, "pr"), "pull_request").await.unwrap();
    let summary = passthrough_run.outputs().latest("gate").unwrap();
    assert!(summary.issues.is_empty());

    let mut failing = CheckDefinition::new("gate", "succeed");
    failing.on = vec!["pull_request".to_string()];
    failing.fail_if = Some("true".to_string());

    let failing_run = scheduler(vec![failing], 10);
    let aggregator = failing_run.run(&PrInfo::new(1, "pr"), "pull_request").await.unwrap();
    let summary = failing_run.outputs().latest("gate").unwrap();
    assert!(summary.issues.is_empty());
    assert_eq!(aggregator.statistics().per_check["gate"].failed, 1);
}
