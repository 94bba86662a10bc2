//! Tree-walking evaluator. Values are `serde_json::Value`; there is no
//! other runtime representation, which is what keeps the language
//! side-effect-free by construction — the only documented exception is the
//! `memory` object's `set`/`append`, wired through explicitly.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::ast::{BinOp, Expr, UnOp};
use super::helpers;
use super::truthy;
use crate::model::Memory;

#[derive(Debug, Clone)]
pub enum EvalError {
    Syntax(String),
    UndefinedIdentifier(String),
    Type(String),
    Call(String),
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::Syntax(msg) => write!(f, "syntax error: {msg}"),
            EvalError::UndefinedIdentifier(name) => write!(f, "undefined identifier '{name}'"),
            EvalError::Type(msg) => write!(f, "type error: {msg}"),
            EvalError::Call(msg) => write!(f, "call error: {msg}"),
        }
    }
}

impl std::error::Error for EvalError {}

/// The bindings and ambient helpers visible to every expression: `outputs`,
/// `outputs.history`, `inputs`, `pr`, `files`, `env`, `memory`, `checkName`,
/// `schema`, `group`.
#[derive(Debug, Default, Clone)]
pub struct EvalContext {
    bindings: HashMap<String, Value>,
    memory: Option<Arc<Memory>>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.bindings.insert(name.into(), value);
        self
    }

    pub fn with_memory(mut self, memory: Arc<Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        self.bindings.get(name).cloned()
    }
}

pub fn eval(expr: &Expr, ctx: &EvalContext) -> Result<Value, EvalError> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Number(n) => Ok(serde_json::json!(*n)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Array(items) => {
            let values: Result<Vec<Value>, EvalError> = items.iter().map(|item| eval(item, ctx)).collect();
            Ok(Value::Array(values?))
        }
        Expr::Ident(name) => resolve_ident(name, ctx),
        Expr::Member(base, field) => {
            let base_value = eval(base, ctx)?;
            member_access(&base_value, field)
        }
        Expr::Index(base, index_expr) => {
            let base_value = eval(base, ctx)?;
            let index_value = eval(index_expr, ctx)?;
            index_access(&base_value, &index_value)
        }
        Expr::Unary(op, inner) => {
            let value = eval(inner, ctx)?;
            eval_unary(*op, &value)
        }
        Expr::Binary(BinOp::And, lhs, rhs) => {
            let left = eval(lhs, ctx)?;
            if !truthy(&left) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&eval(rhs, ctx)?)))
        }
        Expr::Binary(BinOp::Or, lhs, rhs) => {
            let left = eval(lhs, ctx)?;
            if truthy(&left) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&eval(rhs, ctx)?)))
        }
        Expr::Binary(op, lhs, rhs) => {
            let left = eval(lhs, ctx)?;
            let right = eval(rhs, ctx)?;
            eval_binary(*op, &left, &right)
        }
        Expr::Ternary(cond, then_branch, else_branch) => {
            if truthy(&eval(cond, ctx)?) {
                eval(then_branch, ctx)
            } else {
                eval(else_branch, ctx)
            }
        }
        Expr::Call(callee, args) => eval_call(callee, args, ctx),
    }
}

fn resolve_ident(name: &str, ctx: &EvalContext) -> Result<Value, EvalError> {
    if let Some(value) = ctx.lookup(name) {
        return Ok(value);
    }
    if name == "memory" {
        // `memory` is addressed only through method calls (`memory.get(...)`);
        // evaluated bare it resolves to an empty marker object so `member
        // access` below can dispatch, without ever exposing a real handle.
        return Ok(Value::Object(Map::new()));
    }
    Err(EvalError::UndefinedIdentifier(name.to_string()))
}

fn member_access(base: &Value, field: &str) -> Result<Value, EvalError> {
    match base {
        Value::Object(map) => Ok(map.get(field).cloned().unwrap_or(Value::Null)),
        other => Err(EvalError::Type(format!(
            "cannot access member '{field}' on non-object value {other}"
        ))),
    }
}

fn index_access(base: &Value, index: &Value) -> Result<Value, EvalError> {
    match (base, index) {
        (Value::Array(items), Value::Number(n)) => {
            let idx = n.as_f64().unwrap_or(0.0) as i64;
            if idx < 0 {
                return Ok(Value::Null);
            }
            Ok(items.get(idx as usize).cloned().unwrap_or(Value::Null))
        }
        (Value::Object(map), Value::String(key)) => Ok(map.get(key).cloned().unwrap_or(Value::Null)),
        (other, _) => Err(EvalError::Type(format!("cannot index into value {other}"))),
    }
}

fn eval_unary(op: UnOp, value: &Value) -> Result<Value, EvalError> {
    match op {
        UnOp::Not => Ok(Value::Bool(!truthy(value))),
        UnOp::Neg => match value.as_f64() {
            Some(n) => Ok(serde_json::json!(-n)),
            None => Err(EvalError::Type(format!("cannot negate non-numeric value {value}"))),
        },
    }
}

fn eval_binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    use BinOp::*;
    match op {
        Eq => Ok(Value::Bool(left == right)),
        Ne => Ok(Value::Bool(left != right)),
        Lt | Le | Gt | Ge => compare(op, left, right),
        Add => arithmetic_or_concat(left, right),
        Sub => numeric(op, left, right),
        Mul => numeric(op, left, right),
        Div => numeric(op, left, right),
        Rem => numeric(op, left, right),
        And | Or => unreachable!("handled with short-circuit evaluation before reaching eval_binary"),
    }
}

fn compare(op: BinOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let ordering = match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            let l = left
                .as_f64()
                .ok_or_else(|| EvalError::Type(format!("expected number, got {left}")))?;
            let r = right
                .as_f64()
                .ok_or_else(|| EvalError::Type(format!("expected number, got {right}")))?;
            l.partial_cmp(&r)
        }
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => return Err(EvalError::Type(format!("cannot compare {left} and {right}"))),
    };
    let Some(ordering) = ordering else {
        return Err(EvalError::Type(format!("cannot compare {left} and {right}")));
    };
    use std::cmp::Ordering::*;
    let result = match op {
        BinOp::Lt => ordering == Less,
        BinOp::Le => ordering != Greater,
        BinOp::Gt => ordering == Greater,
        BinOp::Ge => ordering != Less,
        _ => unreachable!(),
    };
    Ok(Value::Bool(result))
}

fn numeric(op: BinOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let l = left
        .as_f64()
        .ok_or_else(|| EvalError::Type(format!("expected number, got {left}")))?;
    let r = right
        .as_f64()
        .ok_or_else(|| EvalError::Type(format!("expected number, got {right}")))?;
    let result = match op {
        BinOp::Sub => l - r,
        BinOp::Mul => l * r,
        BinOp::Div => l / r,
        BinOp::Rem => l % r,
        _ => unreachable!(),
    };
    Ok(serde_json::json!(result))
}

fn arithmetic_or_concat(left: &Value, right: &Value) -> Result<Value, EvalError> {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            let l = left
                .as_f64()
                .ok_or_else(|| EvalError::Type(format!("expected number, got {left}")))?;
            let r = right
                .as_f64()
                .ok_or_else(|| EvalError::Type(format!("expected number, got {right}")))?;
            Ok(serde_json::json!(l + r))
        }
        (Value::String(l), Value::String(r)) => Ok(Value::String(format!("{l}{r}"))),
        (Value::String(l), other) => Ok(Value::String(format!("{l}{}", display_value(other)))),
        (other, Value::String(r)) => Ok(Value::String(format!("{}{r}", display_value(other)))),
        _ => Err(EvalError::Type(format!("cannot add {left} and {right}"))),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn eval_call(callee: &Expr, args: &[Expr], ctx: &EvalContext) -> Result<Value, EvalError> {
    // `memory.get/set/append(...)` is the one place the sandbox performs a
    // side effect, and it is dispatched before generic evaluation so it
    // never needs a real value bound to the bare identifier `memory`.
    if let Expr::Member(base, method) = callee {
        if matches!(base.as_ref(), Expr::Ident(name) if name == "memory") {
            let arg_values: Result<Vec<Value>, EvalError> = args.iter().map(|a| eval(a, ctx)).collect();
            return helpers::call_memory(method, &arg_values?, ctx.memory.as_deref());
        }
    }
    let name = match callee {
        Expr::Ident(name) => name.clone(),
        _ => return Err(EvalError::Call("expression is not callable".to_string())),
    };
    let arg_values: Result<Vec<Value>, EvalError> = args.iter().map(|a| eval(a, ctx)).collect();
    helpers::call_builtin(&name, &arg_values?)
}
