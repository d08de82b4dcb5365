//! `${path.to.value}` rendering over a JSON scope.
//!
//! Unresolvable expressions are left in place so callers can detect them with
//! [`find_unresolved`] and fail with a precise message.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

static EXPRESSION_PATTERN: OnceLock<Regex> = OnceLock::new();

fn pattern() -> &'static Regex {
    EXPRESSION_PATTERN.get_or_init(|| {
        Regex::new(r"\$\{\s*([^}]+?)\s*\}").expect("expression pattern is a valid regex")
    })
}

/// Render every resolvable expression in `template` against `scope`
pub fn render(template: &str, scope: &Value) -> String {
    pattern()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match lookup(scope, &caps[1]).and_then(value_to_string) {
                Some(rendered) => rendered,
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// First expression still present after rendering
pub fn find_unresolved(rendered: &str) -> Option<String> {
    pattern().find(rendered).map(|m| m.as_str().to_string())
}

/// Whether a configured value is an expression rather than a literal
pub fn is_expression(value: &str) -> bool {
    pattern().is_match(value)
}

/// Workflow variable reference used for templatized fields
pub fn workflow_variable(name: &str) -> String {
    format!("${{workflow.variables.{name}}}")
}

fn lookup<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(scope, |current, segment| current.get(segment.trim()))
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Shallow merge: keys of `overlay` replace keys of `base`
pub fn merge_scope(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (_, Value::Null) => base.clone(),
        (_, overlay) => overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_renders_nested_paths() {
        let scope = json!({"workflow": {"variables": {"tier": "checkout", "replicas": 3}}});
        assert_eq!(
            render("tier=${workflow.variables.tier} x${workflow.variables.replicas}", &scope),
            "tier=checkout x3"
        );
    }

    #[test]
    fn test_unresolved_left_in_place() {
        let scope = json!({"host": {"hostName": "ip-10-0-0-1"}});
        let rendered = render("${host.hostName}.${host.domain}", &scope);
        assert_eq!(rendered, "ip-10-0-0-1.${host.domain}");
        assert_eq!(find_unresolved(&rendered), Some("${host.domain}".to_string()));
        assert_eq!(find_unresolved("plain"), None);
    }

    #[test]
    fn test_expression_detection() {
        assert!(is_expression("${app.name}"));
        assert!(!is_expression("checkout"));
        assert_eq!(workflow_variable("Tier"), "${workflow.variables.Tier}");
    }

    #[test]
    fn test_merge_scope_overrides_top_level() {
        let merged = merge_scope(&json!({"a": 1, "b": 2}), &json!({"b": 3}));
        assert_eq!(merged, json!({"a": 1, "b": 3}));
    }
}
