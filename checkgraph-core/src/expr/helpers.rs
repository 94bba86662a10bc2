//! The free-function helper set surfaced to every expression:
//! `always`, `success`, `failure`, `contains`, `startsWith`, `countIssues`,
//! `hasIssue`, `hasIssueWith`, `hasFileWith`, `hasFileMatching`, `log`, plus
//! the `memory.get/set/append` dispatch.

use serde_json::Value;

use super::eval::EvalError;
use crate::model::Memory;

pub fn call_builtin(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    match name {
        "always" => Ok(Value::Bool(true)),
        "success" => Ok(Value::Bool(!any_issue_at_or_above_error(args.first()))),
        "failure" => Ok(Value::Bool(any_issue_at_or_above_error(args.first()))),
        "contains" => {
            let (s, sub) = two_strings(args, "contains")?;
            Ok(Value::Bool(s.contains(&sub)))
        }
        "startsWith" => {
            let (s, prefix) = two_strings(args, "startsWith")?;
            Ok(Value::Bool(s.starts_with(&prefix)))
        }
        "countIssues" => {
            let (issues, field, value) = issues_field_value(args, "countIssues")?;
            Ok(serde_json::json!(count_matching(&issues, &field, &value)))
        }
        "hasIssue" => {
            let (issues, field, value) = issues_field_value(args, "hasIssue")?;
            Ok(Value::Bool(count_matching(&issues, &field, &value) > 0))
        }
        "hasIssueWith" => {
            let (issues, field, value) = issues_field_value(args, "hasIssueWith")?;
            let needle = value.as_str().unwrap_or_default();
            Ok(Value::Bool(issues.iter().any(|issue| {
                issue
                    .get(&field)
                    .and_then(Value::as_str)
                    .map(|v| v.contains(needle))
                    .unwrap_or(false)
            })))
        }
        "hasFileWith" => {
            let (issues, needle) = issues_and_string(args, "hasFileWith")?;
            Ok(Value::Bool(issues.iter().any(|issue| {
                issue.get("file").and_then(Value::as_str).map(|f| f.contains(&needle)).unwrap_or(false)
            })))
        }
        "hasFileMatching" => {
            let (issues, pattern) = issues_and_string(args, "hasFileMatching")?;
            let regex = regex::Regex::new(&pattern)
                .map_err(|e| EvalError::Call(format!("invalid regex in hasFileMatching: {e}")))?;
            Ok(Value::Bool(issues.iter().any(|issue| {
                issue.get("file").and_then(Value::as_str).map(|f| regex.is_match(f)).unwrap_or(false)
            })))
        }
        "log" => {
            let rendered: Vec<String> = args.iter().map(render_for_log).collect();
            tracing::debug!(target: "checkgraph::expr", "{}", rendered.join(" "));
            Ok(Value::Null)
        }
        other => Err(EvalError::Call(format!("unknown function '{other}'"))),
    }
}

pub fn call_memory(method: &str, args: &[Value], memory: Option<&Memory>) -> Result<Value, EvalError> {
    let memory = memory.ok_or_else(|| EvalError::Call("memory is not available in this context".to_string()))?;
    match method {
        "get" => {
            let key = args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| EvalError::Call("memory.get(key) requires a string key".to_string()))?;
            Ok(memory.get(key).unwrap_or(Value::Null))
        }
        "set" => {
            let key = args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| EvalError::Call("memory.set(key, value) requires a string key".to_string()))?
                .to_string();
            let value = args.get(1).cloned().unwrap_or(Value::Null);
            memory.set(key, value);
            Ok(Value::Null)
        }
        "append" => {
            let key = args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| EvalError::Call("memory.append(key, value) requires a string key".to_string()))?
                .to_string();
            let value = args.get(1).cloned().unwrap_or(Value::Null);
            memory.append(&key, value);
            Ok(Value::Null)
        }
        other => Err(EvalError::Call(format!("unknown memory method '{other}'"))),
    }
}

fn any_issue_at_or_above_error(issues: Option<&Value>) -> bool {
    let Some(Value::Array(items)) = issues else {
        return false;
    };
    items.iter().any(|issue| {
        matches!(
            issue.get("severity").and_then(Value::as_str),
            Some("error") | Some("critical")
        )
    })
}

fn two_strings(args: &[Value], fn_name: &str) -> Result<(String, String), EvalError> {
    let a = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| EvalError::Call(format!("{fn_name} expects two string arguments")))?;
    let b = args
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| EvalError::Call(format!("{fn_name} expects two string arguments")))?;
    Ok((a.to_string(), b.to_string()))
}

fn issues_field_value(args: &[Value], fn_name: &str) -> Result<(Vec<Value>, String, Value), EvalError> {
    let issues = args
        .first()
        .and_then(|v| v.as_array())
        .ok_or_else(|| EvalError::Call(format!("{fn_name} expects an issues array as the first argument")))?
        .clone();
    let field = args
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| EvalError::Call(format!("{fn_name} expects a field name as the second argument")))?
        .to_string();
    let value = args
        .get(2)
        .cloned()
        .ok_or_else(|| EvalError::Call(format!("{fn_name} expects a value as the third argument")))?;
    Ok((issues, field, value))
}

fn issues_and_string(args: &[Value], fn_name: &str) -> Result<(Vec<Value>, String), EvalError> {
    let issues = args
        .first()
        .and_then(|v| v.as_array())
        .ok_or_else(|| EvalError::Call(format!("{fn_name} expects an issues array as the first argument")))?
        .clone();
    let needle = args
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| EvalError::Call(format!("{fn_name} expects a string as the second argument")))?
        .to_string();
    Ok((issues, needle))
}

fn count_matching(issues: &[Value], field: &str, expected: &Value) -> usize {
    issues.iter().filter(|issue| issue.get(field) == Some(expected)).count()
}

fn render_for_log(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
