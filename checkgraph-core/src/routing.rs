//! Routing Engine: compiles the re-entry instructions inside a
//! `RoutingHook` into a concrete [`RoutingDecision`] the scheduler enqueues,
//! bounded by a per-checkId loop budget — re-entry is never a tail call,
//! always an explicit re-enqueue instruction.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::expr::{evaluate_bool, evaluate_targets, EvalContext};
use crate::model::RoutingHook;

/// The outcome of compiling one hook: checkIds to enqueue as fresh
/// invocations, plus at most one re-entry target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingDecision {
    pub enqueue: Vec<String>,
    pub goto: Option<String>,
    pub goto_event: Option<String>,
    pub budget_exhausted_for: Option<String>,
}

/// Per-run counters tracking how many times each checkId has been
/// re-entered via routing. Retries do not consume this budget.
#[derive(Debug, Default)]
pub struct LoopBudgetTracker {
    limit: usize,
    entries: Mutex<HashMap<String, usize>>,
}

impl LoopBudgetTracker {
    pub fn new(limit: usize) -> Self {
        Self { limit, entries: Mutex::new(HashMap::new()) }
    }

    /// Consume one unit of budget for `check_id`. Returns `true` if the
    /// re-entry is allowed, `false` if the budget is already exhausted.
    fn try_consume(&self, check_id: &str) -> bool {
        let mut entries = self.entries.lock();
        let used = entries.entry(check_id.to_string()).or_insert(0);
        if *used < self.limit {
            *used += 1;
            true
        } else {
            false
        }
    }

    pub fn used(&self, check_id: &str) -> usize {
        self.entries.lock().get(check_id).copied().unwrap_or(0)
    }
}

/// Compose a hook's `run`/`run_js` (all enqueued) then at most one of
/// `goto`/`goto_js`/`transitions` (first match wins), consuming loop budget
/// for any self/other re-entry target.
pub fn compile_hook(hook: &RoutingHook, ctx: &EvalContext, budget: &LoopBudgetTracker) -> RoutingDecision {
    let mut decision = RoutingDecision::default();

    decision.enqueue.extend(hook.run.iter().cloned());
    if let Some(run_js) = &hook.run_js {
        if let Ok(targets) = evaluate_targets(run_js, ctx) {
            decision.enqueue.extend(targets);
        }
    }

    let target = resolve_single_target(hook, ctx);
    if let Some(target) = target {
        if budget.try_consume(&target) {
            decision.goto = Some(target);
            decision.goto_event = hook.goto_event.clone();
        } else {
            decision.budget_exhausted_for = Some(target);
        }
    }

    decision
}

fn resolve_single_target(hook: &RoutingHook, ctx: &EvalContext) -> Option<String> {
    if let Some(goto) = &hook.goto {
        return Some(goto.clone());
    }
    if let Some(goto_js) = &hook.goto_js {
        if let Ok(targets) = evaluate_targets(goto_js, ctx) {
            return targets.into_iter().next();
        }
        return None;
    }
    for transition in &hook.transitions {
        if evaluate_bool(&transition.when, ctx) {
            return Some(transition.to.clone());
        }
    }
    None
}

/// The `RoutingBudgetExhausted` warning issue appended to the check whose
/// re-entry was dropped.
pub fn budget_exhausted_issue(check_id: &str) -> crate::model::ReviewIssue {
    crate::model::ReviewIssue::new(
        String::new(),
        0,
        "routing/budget_exhausted",
        format!("loop budget exhausted while routing back to '{check_id}'"),
        crate::model::Severity::Warning,
    )
}
