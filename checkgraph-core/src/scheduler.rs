//! DAG Scheduler: the superstep-driven executor. Each superstep picks
//! every check whose dependencies are satisfied and whose `if` holds,
//! subject to `max_parallelism`, runs them concurrently via a `JoinSet`
//! bounded by a semaphore, and folds the results back into a shared ready
//! queue — the same "compute a ready set, run it, apply writes, repeat"
//! shape as a Pregel-style superstep loop, minus the channel-version
//! machinery this domain doesn't need.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use checkgraph_tooling::cancellation::CancellationToken;
use checkgraph_tooling::retry::retry_async;

use crate::aggregator::Aggregator;
use crate::conditions::{evaluate_conditions, should_halt_execution};
use crate::error::{CheckGraphError, Result};
use crate::events::{
    CheckCompleted, CheckErrored, CheckScheduled, CheckStarted, EventBus, HumanInputRequested, RunState, Shutdown,
    StateTransition,
};
use crate::expr::{evaluate_bool, evaluate_value, EvalContext};
use crate::model::{
    CheckDefinition, ExecutionRecord, Memory, Outcome, OutputsView, PrInfo, ReviewIssue, Severity, WorkflowConfig,
};
use crate::provider::{ExecuteContext, ProviderRegistry, SessionInfo};
use crate::routing::{budget_exhausted_issue, compile_hook, LoopBudgetTracker, RoutingDecision};

/// One pending invocation: a check plus the resolved forEach iteration
/// indices of its forEach-producing dependencies, in `depends_on` order.
#[derive(Debug, Clone)]
struct PendingInvocation {
    check_id: String,
    parent_iterations: HashMap<String, usize>,
}

/// What a single check's superstep turn decided, folded back by the driver
/// after every concurrent batch completes.
struct InvocationOutcome {
    check_id: String,
    outcome: Outcome,
    routing: Vec<RoutingDecision>,
    record: ExecutionRecord,
}

pub struct Scheduler {
    config: Arc<WorkflowConfig>,
    providers: Arc<ProviderRegistry>,
    events: Arc<EventBus>,
    outputs: Arc<OutputsView>,
    memory: Arc<Memory>,
    loop_budget: Arc<LoopBudgetTracker>,
    cancellation: CancellationToken,
}

impl Scheduler {
    pub fn new(
        config: Arc<WorkflowConfig>,
        providers: Arc<ProviderRegistry>,
        events: Arc<EventBus>,
        cancellation: CancellationToken,
    ) -> Self {
        let loop_budget = Arc::new(LoopBudgetTracker::new(config.loop_budget));
        Self {
            config,
            providers,
            events,
            outputs: Arc::new(OutputsView::new()),
            memory: Arc::new(Memory::new()),
            loop_budget,
            cancellation,
        }
    }

    pub fn outputs(&self) -> &Arc<OutputsView> {
        &self.outputs
    }

    pub fn memory(&self) -> &Arc<Memory> {
        &self.memory
    }

    /// Drive the graph to completion for `event`, returning the final
    /// aggregator. Seeds the ready set with every check whose `on`
    /// intersects `event` and has no unmet `depends_on`.
    pub async fn run(&self, pr: &PrInfo, event: &str) -> Result<Aggregator> {
        self.events.publish_state_transition(StateTransition { from: RunState::Idle, to: RunState::Running });

        let mut aggregator = Aggregator::new();
        let mut completed: HashMap<String, Outcome> = HashMap::new();
        let mut queue: VecDeque<PendingInvocation> = VecDeque::new();

        for check in self.config.checks.values() {
            if check.on.iter().any(|e| e == event) && check.depends_on.is_empty() {
                self.events.publish_check_scheduled(CheckScheduled { check_id: check.check_id.clone() });
                queue.push_back(PendingInvocation { check_id: check.check_id.clone(), parent_iterations: HashMap::new() });
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallelism.max(1)));

        while !queue.is_empty() {
            if self.cancellation.is_cancelled() {
                self.events.publish_shutdown(Shutdown { error: Some("run cancelled".to_string()) });
                break;
            }

            let ready: Vec<PendingInvocation> = queue.drain(..).collect();
            let mut joinset: JoinSet<InvocationOutcome> = JoinSet::new();

            for invocation in ready {
                let check = match self.config.checks.get(&invocation.check_id) {
                    Some(c) => c.clone(),
                    None => continue,
                };
                if !self.dependencies_satisfied(&check, &completed) {
                    continue;
                }
                let permit = semaphore.clone();
                let providers = self.providers.clone();
                let outputs = self.outputs.clone();
                let memory = self.memory.clone();
                let events = self.events.clone();
                let loop_budget = self.loop_budget.clone();
                let cancellation = self.cancellation.clone();
                let pr = pr.clone();
                let global_conditions = self.config.failure_conditions.clone();
                let env = self.config.env.clone();
                let fail_fast_blocked = check
                    .depends_on
                    .iter()
                    .any(|dep| matches!(completed.get(dep), Some(Outcome::Failed) | Some(Outcome::Errored)))
                    && check.fail_fast;

                joinset.spawn(async move {
                    let _permit = permit.acquire_owned().await.ok();
                    run_invocation(
                        check,
                        invocation,
                        fail_fast_blocked,
                        providers,
                        outputs,
                        memory,
                        events,
                        loop_budget,
                        cancellation,
                        pr,
                        global_conditions,
                        env,
                    )
                    .await
                });
            }

            while let Some(joined) = joinset.join_next().await {
                let outcome = match joined {
                    Ok(outcome) => outcome,
                    Err(_join_error) => continue,
                };
                completed.insert(outcome.check_id.clone(), outcome.outcome);
                aggregator.record_execution(&outcome.record);

                let group = self.config.checks.get(&outcome.check_id).and_then(|c| c.group.clone());
                if let Some(summary) = self.outputs.latest(&outcome.check_id) {
                    aggregator.record_summary(group.as_deref(), &outcome.check_id, summary);
                }

                for decision in &outcome.routing {
                    for target in &decision.enqueue {
                        self.events.publish_check_scheduled(CheckScheduled { check_id: target.clone() });
                        queue.push_back(PendingInvocation { check_id: target.clone(), parent_iterations: HashMap::new() });
                    }
                    if let Some(target) = &decision.goto {
                        self.events.publish_check_scheduled(CheckScheduled { check_id: target.clone() });
                        queue.push_back(PendingInvocation { check_id: target.clone(), parent_iterations: HashMap::new() });
                    }
                    if let Some(exhausted) = &decision.budget_exhausted_for {
                        self.outputs.record(
                            exhausted,
                            crate::model::ReviewSummary { issues: vec![budget_exhausted_issue(exhausted)], ..Default::default() },
                        );
                    }
                }

                self.enqueue_ready_dependents(&outcome.check_id, &completed, &mut queue);
            }
        }

        self.events.publish_state_transition(StateTransition { from: RunState::Running, to: RunState::Completed });
        Ok(aggregator)
    }

    fn dependencies_satisfied(&self, check: &CheckDefinition, completed: &HashMap<String, Outcome>) -> bool {
        check.depends_on.iter().all(|dep| completed.contains_key(dep))
    }

    /// After `just_completed` finishes, enqueue every check depending on it
    /// whose other dependencies are now all complete. forEach expansion
    /// (Cartesian product over forEach parents, parent insertion order) is
    /// computed fresh from each forEach parent's recorded history length —
    /// one history entry per fanned-out item, per `finalize`.
    fn enqueue_ready_dependents(
        &self,
        just_completed: &str,
        completed: &HashMap<String, Outcome>,
        queue: &mut VecDeque<PendingInvocation>,
    ) {
        for check in self.config.checks.values() {
            if !check.depends_on.iter().any(|d| d == just_completed) {
                continue;
            }
            if !self.dependencies_satisfied(check, completed) {
                continue;
            }
            let for_each_parents: Vec<&String> =
                check.depends_on.iter().filter(|d| self.config.checks.get(*d).map(|p| p.for_each).unwrap_or(false)).collect();

            if for_each_parents.is_empty() {
                self.events.publish_check_scheduled(CheckScheduled { check_id: check.check_id.clone() });
                queue.push_back(PendingInvocation { check_id: check.check_id.clone(), parent_iterations: HashMap::new() });
                continue;
            }

            let counts: Vec<usize> = for_each_parents.iter().map(|p| self.outputs.history_len(p)).collect();
            if counts.iter().any(|c| *c == 0) {
                // Never invoked, so it contributes nothing to history — only
                // `outputs.latest` records the skip, mirroring `skip_outcome`.
                self.outputs.record_fan_out(
                    &check.check_id,
                    crate::model::ReviewSummary {
                        issues: vec![ReviewIssue::new(
                            String::new(),
                            0,
                            format!("{}/skipped", check.provider_type),
                            "skipped: forEach_empty".to_string(),
                            Severity::Info,
                        )],
                        ..Default::default()
                    },
                    Vec::new(),
                );
                continue;
            }
            for combo in cartesian_product(&counts) {
                let mut parent_iterations = HashMap::new();
                for (parent, index) in for_each_parents.iter().zip(combo.into_iter()) {
                    parent_iterations.insert((*parent).clone(), index);
                }
                self.events.publish_check_scheduled(CheckScheduled { check_id: check.check_id.clone() });
                queue.push_back(PendingInvocation { check_id: check.check_id.clone(), parent_iterations });
            }
        }
    }
}

/// Cartesian product over `counts.len()` dimensions, each ranging
/// `0..counts[i]`, enumerated in parent insertion order.
fn cartesian_product(counts: &[usize]) -> Vec<Vec<usize>> {
    let mut result: Vec<Vec<usize>> = vec![Vec::new()];
    for &count in counts {
        let mut next = Vec::with_capacity(result.len() * count);
        for combo in &result {
            for i in 0..count {
                let mut extended = combo.clone();
                extended.push(i);
                next.push(extended);
            }
        }
        result = next;
    }
    result
}

#[allow(clippy::too_many_arguments)]
async fn run_invocation(
    check: CheckDefinition,
    invocation: PendingInvocation,
    fail_fast_blocked: bool,
    providers: Arc<ProviderRegistry>,
    outputs: Arc<OutputsView>,
    memory: Arc<Memory>,
    events: Arc<EventBus>,
    loop_budget: Arc<LoopBudgetTracker>,
    cancellation: CancellationToken,
    pr: PrInfo,
    global_conditions: Vec<crate::model::FailureCondition>,
    env: HashMap<String, String>,
) -> InvocationOutcome {
    let iteration = outputs.history_len(&check.check_id);
    let start_time_ms = now_ms();

    let base_ctx = build_eval_context(&check, &pr, &outputs, &memory, &invocation, &env);

    if let Some(if_expr) = &check.r#if {
        if !evaluate_bool(if_expr, &base_ctx) {
            return skip_outcome(&check, iteration, start_time_ms, "if_condition");
        }
    }

    if fail_fast_blocked {
        return skip_outcome(&check, iteration, start_time_ms, "dependency_failed");
    }

    events.publish_check_started(CheckStarted { check_id: check.check_id.clone(), iteration });

    let mut init_routing = Vec::new();
    if let Some(on_init) = &check.on_init {
        init_routing.push(compile_hook(on_init, &base_ctx, &loop_budget));
    }

    let dependency_results = build_dependency_results(&check, &outputs, &invocation);
    let session_info = SessionInfo {
        parent_session_id: if check.reuse_ai_session { check.depends_on.first().cloned() } else { None },
        reuse_session: check.reuse_ai_session,
        session_mode: check.session_mode,
    };
    let config = check.config.clone();
    let owned_ctx = OwnedExecuteContext {
        check_id: check.check_id.clone(),
        pr_info: pr.clone(),
        config,
        dependency_results,
        session_info,
    };

    let policy = check.retry_policy();
    let provider_type = check.provider_type.clone();
    let timeout = check.timeout();
    let cancellation_for_call = cancellation.clone();

    let call_start = std::time::Instant::now();
    let execution = retry_async(&policy, |_attempt| {
        let providers = providers.clone();
        let provider_type = provider_type.clone();
        let owned_ctx = owned_ctx.clone();
        let cancellation = cancellation_for_call.clone();
        async move {
            let provider = providers.get_or_throw(&provider_type)?;
            let borrowed_ctx = owned_ctx.as_borrowed();
            let call = provider.execute(&borrowed_ctx);
            match timeout {
                Some(duration) => run_with_timeout(duration, call, &cancellation, &provider_type).await,
                None => call.await,
            }
        }
    })
    .await;
    let provider_duration_ms = call_start.elapsed().as_millis() as u64;

    let summary = match execution {
        Ok(summary) => summary,
        Err(err) => {
            events.publish_check_errored(CheckErrored { check_id: check.check_id.clone(), error: err.to_string() });
            let mut issues = vec![ReviewIssue::new(
                String::new(),
                0,
                format!("{provider_type}/execution_error"),
                err.to_string(),
                Severity::Error,
            )];
            if matches!(err, CheckGraphError::HumanInputPending { .. }) {
                events.publish_human_input_requested(HumanInputRequested {
                    check_id: check.check_id.clone(),
                    prompt: err.to_string(),
                    channel: None,
                    thread_ts: None,
                });
                issues = vec![ReviewIssue::new(
                    String::new(),
                    0,
                    "human_input/awaiting".to_string(),
                    "awaiting human input".to_string(),
                    Severity::Info,
                )];
            }
            let summary = crate::model::ReviewSummary { issues, ..Default::default() };
            return finalize(
                &check,
                iteration,
                start_time_ms,
                provider_duration_ms,
                Outcome::Errored,
                summary,
                &base_ctx,
                &outputs,
                &events,
                &loop_budget,
                &global_conditions,
                init_routing.clone(),
            );
        }
    };

    let transformed = match apply_transform(&check, &summary, &base_ctx) {
        Ok(value) => value,
        Err(message) => {
            let issues = vec![ReviewIssue::new(
                String::new(),
                0,
                format!("{provider_type}/transform_js_error"),
                message,
                Severity::Error,
            )];
            let errored_summary = crate::model::ReviewSummary { issues, ..Default::default() };
            return finalize(
                &check,
                iteration,
                start_time_ms,
                provider_duration_ms,
                Outcome::Errored,
                errored_summary,
                &base_ctx,
                &outputs,
                &events,
                &loop_budget,
                &global_conditions,
                init_routing.clone(),
            );
        }
    };

    let final_summary = match transformed {
        Some(value) => {
            let mut summary = summary;
            summary.output = Some(value);
            summary
        }
        None => summary,
    };

    finalize(
        &check,
        iteration,
        start_time_ms,
        provider_duration_ms,
        Outcome::Succeeded,
        final_summary,
        &base_ctx,
        &outputs,
        &events,
        &loop_budget,
        &global_conditions,
        init_routing,
    )
}

async fn run_with_timeout(
    duration: Duration,
    call: impl std::future::Future<Output = Result<crate::model::ReviewSummary>>,
    cancellation: &CancellationToken,
    provider_type: &str,
) -> Result<crate::model::ReviewSummary> {
    tokio::select! {
        result = tokio::time::timeout(duration, call) => {
            result.map_err(|_| CheckGraphError::ProviderTimeout { provider_type: provider_type.to_string(), duration_ms: duration.as_millis() as u64 })?
        }
        _ = cancellation.cancelled() => {
            Err(CheckGraphError::ProviderTimeout { provider_type: provider_type.to_string(), duration_ms: duration.as_millis() as u64 })
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn finalize(
    check: &CheckDefinition,
    iteration: usize,
    start_time_ms: i64,
    provider_duration_ms: u64,
    base_outcome: Outcome,
    summary: crate::model::ReviewSummary,
    base_ctx: &EvalContext,
    outputs: &Arc<OutputsView>,
    events: &Arc<EventBus>,
    loop_budget: &Arc<LoopBudgetTracker>,
    global_conditions: &[crate::model::FailureCondition],
    init_routing: Vec<RoutingDecision>,
) -> InvocationOutcome {
    events.publish_check_completed(CheckCompleted { check_id: check.check_id.clone(), iteration, result: summary.clone() });

    let mut ctx = base_ctx.clone();
    ctx.bind("output", summary.outputs_value());

    let mut outcome = base_outcome;
    if outcome != Outcome::Errored {
        let mut failed = false;
        if let Some(fail_if) = &check.fail_if {
            failed |= evaluate_bool(fail_if, &ctx);
        }
        let conditions = evaluate_conditions(global_conditions, &check.failure_conditions, &ctx);
        failed |= should_halt_execution(&conditions);
        outcome = if failed { Outcome::Failed } else { Outcome::Succeeded };
    }

    record_outputs(check, outcome, &summary, outputs);

    let routing_hook = match outcome {
        Outcome::Succeeded => check.on_success.as_ref(),
        Outcome::Failed | Outcome::Errored => check.on_fail.as_ref(),
        Outcome::Skipped => None,
    };
    let mut routing = init_routing;
    if let Some(hook) = routing_hook {
        routing.push(compile_hook(hook, &ctx, loop_budget));
    }
    if let Some(on_finish) = &check.on_finish {
        routing.push(compile_hook(on_finish, &ctx, loop_budget));
    }

    let end_time_ms = now_ms();
    let record = ExecutionRecord {
        check_id: check.check_id.clone(),
        iteration,
        start_time_ms,
        end_time_ms,
        provider_duration_ms,
        input_fingerprint: String::new(),
        outcome,
        skip_reason: None,
        issue_counts: ExecutionRecord::issue_counts_from(&summary.issues),
    };

    InvocationOutcome { check_id: check.check_id.clone(), outcome, routing, record }
}

/// Records a check's own `summary` as `outputs[checkId]`. For a `forEach`
/// check that succeeded with an array output, `outputs.history[checkId]`
/// instead fans out to one entry per array item (each carrying that item as
/// its `output`), which is what downstream forEach dependents index into
/// via the Cartesian product in `enqueue_ready_dependents`. A non-succeeded
/// forEach check (or a non-array output) fans out to zero history entries,
/// which is exactly the `forEach_empty` condition dependents check for.
fn record_outputs(check: &CheckDefinition, outcome: Outcome, summary: &crate::model::ReviewSummary, outputs: &Arc<OutputsView>) {
    if !check.for_each {
        outputs.record(&check.check_id, summary.clone());
        return;
    }
    let fanned = match (&summary.output, outcome) {
        (Some(Value::Array(items)), Outcome::Succeeded) => items
            .iter()
            .map(|item| {
                let mut item_summary = summary.clone();
                item_summary.output = Some(item.clone());
                item_summary
            })
            .collect(),
        _ => Vec::new(),
    };
    outputs.record_fan_out(&check.check_id, summary.clone(), fanned);
}

fn skip_outcome(check: &CheckDefinition, iteration: usize, start_time_ms: i64, reason: &str) -> InvocationOutcome {
    InvocationOutcome {
        check_id: check.check_id.clone(),
        outcome: Outcome::Skipped,
        routing: Vec::new(),
        record: ExecutionRecord {
            check_id: check.check_id.clone(),
            iteration,
            start_time_ms,
            end_time_ms: start_time_ms,
            provider_duration_ms: 0,
            input_fingerprint: String::new(),
            outcome: Outcome::Skipped,
            skip_reason: Some(reason.to_string()),
            issue_counts: HashMap::new(),
        },
    }
}

fn build_eval_context(
    check: &CheckDefinition,
    pr: &PrInfo,
    outputs: &Arc<OutputsView>,
    memory: &Arc<Memory>,
    invocation: &PendingInvocation,
    env: &HashMap<String, String>,
) -> EvalContext {
    let mut outputs_latest: HashMap<String, Value> = outputs.all_latest().into_iter().map(|(k, v)| (k, v.outputs_value())).collect();
    for (parent, index) in &invocation.parent_iterations {
        if let Some(value) = outputs.history(parent).get(*index) {
            outputs_latest.insert(parent.clone(), value.outputs_value());
        }
    }
    let history: HashMap<String, Value> = outputs
        .all_history()
        .into_iter()
        .map(|(k, v)| (k, Value::Array(v.into_iter().map(|s| s.outputs_value()).collect())))
        .collect();
    let mut outputs_value = serde_json::json!(outputs_latest);
    if let Value::Object(map) = &mut outputs_value {
        map.insert("history".to_string(), serde_json::json!(history));
    }

    let mut ctx = EvalContext::new();
    ctx.bind("outputs", outputs_value);
    ctx.bind("pr", serde_json::to_value(pr).unwrap_or(Value::Null));
    ctx.bind("files", serde_json::to_value(&pr.files).unwrap_or(Value::Null));
    ctx.bind("checkName", Value::String(check.check_id.clone()));
    ctx.bind("group", check.group.clone().map(Value::String).unwrap_or(Value::Null));
    ctx.bind("schema", check.schema.clone().map(Value::String).unwrap_or(Value::Null));
    ctx.bind("env", serde_json::to_value(env).unwrap_or(Value::Null));
    ctx.bind("inputs", outputs.latest("inputs").map(|s| s.outputs_value()).unwrap_or(Value::Object(Default::default())));
    ctx.with_memory(memory.clone())
}

fn build_dependency_results(check: &CheckDefinition, outputs: &Arc<OutputsView>, invocation: &PendingInvocation) -> HashMap<String, Value> {
    let mut results = HashMap::new();
    for dep in &check.depends_on {
        let value = match invocation.parent_iterations.get(dep) {
            Some(index) => outputs.history(dep).get(*index).map(|s| s.outputs_value()),
            None => outputs.latest(dep).map(|s| s.outputs_value()),
        };
        results.insert(dep.clone(), value.unwrap_or(Value::Null));
    }
    results
}

/// `transform_js` binds `output` to the provider's structured output (or
/// raw content) and returns the post-transform value, or `Err` with a
/// human-readable message on a sandbox error or an undefined result while
/// `forEach` is set.
fn apply_transform(check: &CheckDefinition, summary: &crate::model::ReviewSummary, base_ctx: &EvalContext) -> std::result::Result<Option<Value>, String> {
    let Some(transform) = &check.transform_js else {
        return Ok(None);
    };
    let mut ctx = base_ctx.clone();
    ctx.bind("output", summary.outputs_value());
    match evaluate_value(transform, &ctx) {
        Ok(Value::Null) if check.for_each => Err("transform_js returned undefined while forEach is set".to_string()),
        Ok(value) => Ok(Some(value)),
        Err(err) => Err(format!("transform_js error: {err}")),
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Clone)]
struct OwnedExecuteContext {
    check_id: String,
    pr_info: PrInfo,
    config: HashMap<String, Value>,
    dependency_results: HashMap<String, Value>,
    session_info: SessionInfo,
}

impl OwnedExecuteContext {
    fn as_borrowed(&self) -> ExecuteContext<'_> {
        ExecuteContext {
            check_id: &self.check_id,
            pr_info: &self.pr_info,
            config: &self.config,
            dependency_results: &self.dependency_results,
            session_info: &self.session_info,
        }
    }
}
