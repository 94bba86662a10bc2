//! Liquid template rendering: treated as an external collaborator with
//! a narrow contract). Every provider that needs a templated string goes
//! through this module instead of touching the `liquid` crate directly, so
//! swapping the template engine later only touches one file.

use liquid::model::Value as LValue;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template parse error: {0}")]
    Parse(String),
    #[error("template render error: {0}")]
    Render(String),
}

/// Render `template` against `context`, a JSON object whose top-level keys
/// become the Liquid globals (`{{ pr.title }}`, `{{ outputs.A.key }}`, …).
pub fn render(template: &str, context: &Value) -> Result<String, TemplateError> {
    let parser = liquid::ParserBuilder::with_stdlib().build().map_err(|e| TemplateError::Parse(e.to_string()))?;
    let parsed = parser.parse(template).map_err(|e| TemplateError::Parse(e.to_string()))?;
    let globals = match json_to_liquid(context) {
        LValue::Object(obj) => obj,
        _ => liquid::Object::new(),
    };
    parsed.render(&globals).map_err(|e| TemplateError::Render(e.to_string()))
}

fn json_to_liquid(value: &Value) -> LValue {
    match value {
        Value::Null => LValue::Nil,
        Value::Bool(b) => LValue::scalar(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                LValue::scalar(i)
            } else if let Some(f) = n.as_f64() {
                LValue::scalar(f)
            } else {
                LValue::scalar(n.to_string())
            }
        }
        Value::String(s) => LValue::scalar(s.clone()),
        Value::Array(items) => LValue::array(items.iter().map(json_to_liquid)),
        Value::Object(map) => {
            let mut obj = liquid::Object::new();
            for (k, v) in map {
                obj.insert(k.clone().into(), json_to_liquid(v));
            }
            LValue::Object(obj)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_nested_object_access() {
        let context = json!({ "outputs": { "A": { "key": "T-1", "p": "high" } } });
        let rendered = render("TICKET:{{ outputs.A.key }}:{{ outputs.A.p }}", &context).unwrap();
        assert_eq!(rendered, "TICKET:T-1:high");
    }

    #[test]
    fn renders_array_iteration() {
        let context = json!({ "files": ["a.rs", "b.rs"] });
        let rendered = render("{% for f in files %}{{ f }},{% endfor %}", &context).unwrap();
        assert_eq!(rendered, "a.rs,b.rs,");
    }

    #[test]
    fn missing_variable_renders_empty() {
        let context = json!({});
        let rendered = render("[{{ missing }}]", &context).unwrap();
        assert_eq!(rendered, "[]");
    }
}
