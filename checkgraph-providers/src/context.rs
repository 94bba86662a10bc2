//! Shared template-context construction: every provider that renders a
//! Liquid string (AI prompts, command templates, log messages) builds its
//! globals the same way, from the same `ExecuteContext`.

use checkgraph_core::provider::ExecuteContext;
use serde_json::{json, Value};

/// `{ pr, files, outputs, checkName }` — the subset of an evaluation
/// context that makes sense as Liquid globals (no `memory`/`env`, which the
/// expression sandbox owns exclusively).
pub fn build_template_context(ctx: &ExecuteContext<'_>) -> Value {
    json!({
        "pr": serde_json::to_value(ctx.pr_info).unwrap_or(Value::Null),
        "files": serde_json::to_value(&ctx.pr_info.files).unwrap_or(Value::Null),
        "outputs": Value::Object(ctx.dependency_results.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        "checkName": ctx.check_id,
    })
}
