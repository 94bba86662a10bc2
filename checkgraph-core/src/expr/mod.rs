//! The expression sandbox: a small, side-effect-free-by-default
//! expression language used for `if`, `fail_if`, `transform_js`, `goto_js`,
//! `run_js`, dynamic provider config, and failure conditions.
//!
//! This is a hand-rolled recursive-descent parser plus tree-walking
//! evaluator over a whitelisted grammar: there is no host global object, no
//! module loader, and no code generation, so there is nothing for a
//! malicious expression to reach out through. An identifier the context
//! doesn't bind (`process`, `global`, `require`, `Function`, `eval`, ...)
//! simply fails to resolve, which is the hardening this language is built
//! around: expressions can only ever see what's explicitly bound into their
//! context.

mod ast;
mod eval;
mod helpers;
mod lexer;
mod parser;

pub use ast::Expr;
pub use eval::{EvalContext, EvalError};

use serde_json::Value;

/// Parse and evaluate `source` as a boolean expression (`if`, `fail_if`,
/// `when`). `null`/`undefined` results are treated as `false`, per
/// contract. Errors never propagate — they collapse to `Ok(false)` paired
/// with the original error via [`evaluate_bool_verbose`] for callers that
/// need to record it (the failure-condition evaluator does).
pub fn evaluate_bool(source: &str, ctx: &EvalContext) -> bool {
    evaluate_bool_verbose(source, ctx).unwrap_or(false)
}

/// Like [`evaluate_bool`] but surfaces the sandbox error instead of
/// swallowing it, so callers such as the failure-condition evaluator can
/// record `error` on the condition result.
pub fn evaluate_bool_verbose(source: &str, ctx: &EvalContext) -> Result<bool, EvalError> {
    let value = evaluate_value(source, ctx)?;
    Ok(truthy(&value))
}

/// Evaluate `source` as a value expression (`transform_js`, `value_js`).
/// `undefined` (absence of a meaningful value) is represented as
/// `Value::Null` from this API's perspective — callers that must
/// distinguish "explicitly null" from "undefined" should check
/// [`EvalError::UndefinedResult`] via [`try_evaluate_value`].
pub fn evaluate_value(source: &str, ctx: &EvalContext) -> Result<Value, EvalError> {
    let tokens = lexer::lex(source).map_err(EvalError::Syntax)?;
    let expr = parser::parse(&tokens).map_err(EvalError::Syntax)?;
    eval::eval(&expr, ctx)
}

/// Evaluate `source` as a target expression (`goto_js`, `run_js`),
/// returning a checkId string, a list of checkIds, or `None` (no routing).
pub fn evaluate_targets(source: &str, ctx: &EvalContext) -> Result<Vec<String>, EvalError> {
    let value = evaluate_value(source, ctx)?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s],
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        other => {
            return Err(EvalError::Type(format!(
                "target expression must return a string, list of strings, or null, got {other}"
            )))
        }
    })
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn always_true_boolean_expression() {
        let ctx = EvalContext::new();
        assert!(evaluate_bool("always()", &ctx));
    }

    #[test]
    fn undefined_identifier_is_falsy_not_a_panic() {
        let ctx = EvalContext::new();
        assert!(!evaluate_bool("missing_var", &ctx));
    }

    #[test]
    fn arithmetic_and_comparison() {
        let ctx = EvalContext::new();
        assert!(evaluate_bool("1 + 2 == 3", &ctx));
        assert!(!evaluate_bool("1 + 2 == 4", &ctx));
    }

    #[test]
    fn member_and_index_access() {
        let mut ctx = EvalContext::new();
        ctx.bind("outputs", json!({"A": {"key": "T-1", "p": "high"}}));
        let value = evaluate_value("outputs.A.key", &ctx).unwrap();
        assert_eq!(value, json!("T-1"));
        let value = evaluate_value(r#"outputs["A"]["p"]"#, &ctx).unwrap();
        assert_eq!(value, json!("high"));
    }

    #[test]
    fn ternary_expression() {
        let ctx = EvalContext::new();
        assert_eq!(evaluate_value("1 < 2 ? 'yes' : 'no'", &ctx).unwrap(), json!("yes"));
    }

    #[test]
    fn sandbox_attack_surface_is_unreachable() {
        let ctx = EvalContext::new();
        let err = evaluate_bool_verbose("process.exit(1)", &ctx).unwrap_err();
        assert!(matches!(err, EvalError::UndefinedIdentifier(_)));
        // Never panics; boolean flavor degrades to false.
        assert!(!evaluate_bool("process.exit(1)", &ctx));
    }

    #[test]
    fn sandbox_rejects_prototype_walk_on_string_literal() {
        let ctx = EvalContext::new();
        let err = evaluate_value(r#"("").constructor.constructor"#, &ctx).unwrap_err();
        assert!(matches!(err, EvalError::Type(_)));
    }

    #[test]
    fn undefined_result_for_transform_is_distinguishable() {
        let ctx = EvalContext::new();
        let value = evaluate_value("null", &ctx).unwrap();
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn goto_js_target_list() {
        let ctx = EvalContext::new();
        let targets = evaluate_targets("['a', 'b']", &ctx).unwrap();
        assert_eq!(targets, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn goto_js_target_null_means_no_routing() {
        let ctx = EvalContext::new();
        let targets = evaluate_targets("null", &ctx).unwrap();
        assert!(targets.is_empty());
    }
}
