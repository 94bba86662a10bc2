//! Failure-Condition Evaluator: compiles a named map of boolean
//! expressions plus severity/halt metadata into verdicts. Per-check
//! conditions override global ones of the same name.

use std::collections::HashMap;

use crate::expr::{evaluate_bool_verbose, EvalContext};
use crate::model::{ConditionSeverity, FailureCondition};

/// One condition's verdict. Evaluation errors never propagate — they
/// collapse to `failed = false` with `error` set.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionResult {
    pub name: String,
    pub expression: String,
    pub failed: bool,
    pub error: Option<String>,
    pub severity: ConditionSeverity,
    pub halt_execution: bool,
    pub message: Option<String>,
}

/// Merge global and per-check condition sets by name, the per-check entry
/// winning on collision, then evaluate every condition against `ctx`.
pub fn evaluate_conditions(
    global: &[FailureCondition],
    per_check: &[FailureCondition],
    ctx: &EvalContext,
) -> Vec<ConditionResult> {
    let mut by_name: HashMap<&str, &FailureCondition> = HashMap::new();
    for condition in global {
        by_name.insert(&condition.name, condition);
    }
    for condition in per_check {
        by_name.insert(&condition.name, condition);
    }
    let mut names: Vec<&str> = by_name.keys().copied().collect();
    names.sort();
    names
        .into_iter()
        .map(|name| evaluate_one(by_name[name], ctx))
        .collect()
}

fn evaluate_one(condition: &FailureCondition, ctx: &EvalContext) -> ConditionResult {
    match evaluate_bool_verbose(&condition.expression, ctx) {
        Ok(failed) => ConditionResult {
            name: condition.name.clone(),
            expression: condition.expression.clone(),
            failed,
            error: None,
            severity: condition.severity,
            halt_execution: condition.halt_execution,
            message: condition.message.clone(),
        },
        Err(err) => ConditionResult {
            name: condition.name.clone(),
            expression: condition.expression.clone(),
            failed: false,
            error: Some(format!("Expression evaluation error: {err}")),
            severity: condition.severity,
            halt_execution: condition.halt_execution,
            message: condition.message.clone(),
        },
    }
}

pub fn should_halt_execution(results: &[ConditionResult]) -> bool {
    results.iter().any(|r| r.failed && r.halt_execution)
}

pub fn failed_conditions(results: &[ConditionResult]) -> Vec<&ConditionResult> {
    results.iter().filter(|r| r.failed).collect()
}

/// Partitions `results` by severity bucket. The union of the three buckets
/// equals `results`.
pub fn group_by_severity<'a>(results: &'a [ConditionResult]) -> HashMap<ConditionSeverity, Vec<&'a ConditionResult>> {
    let mut groups: HashMap<ConditionSeverity, Vec<&ConditionResult>> = HashMap::new();
    for result in results {
        groups.entry(result.severity).or_default().push(result);
    }
    groups
}

/// Human-readable summary: a success sentinel when every condition passed,
/// otherwise one line per failed condition.
pub fn format_results(results: &[ConditionResult]) -> String {
    let failed = failed_conditions(results);
    if failed.is_empty() {
        return "all conditions passed".to_string();
    }
    failed
        .iter()
        .map(|r| {
            let message = r.message.as_deref().unwrap_or(&r.expression);
            format!("[{:?}] {}: {}", r.severity, r.name, message)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
