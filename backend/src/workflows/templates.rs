// Template Resolution - `{{name}}` substitution over JSON values

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use super::context::{lookup_path, stringify};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("placeholder pattern compiles"));

/// Resolve every placeholder inside `value`, keeping its shape and key order.
pub fn resolve(value: &Value, context: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_str(s, context)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, context)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, context)).collect()),
        _ => value.clone(),
    }
}

/// Replace each `{{name}}` with the stringified context value; missing names become "".
pub fn resolve_str(template: &str, context: &Value) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }

    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            context
                .get(name)
                .or_else(|| lookup_path(context, name))
                .map(stringify)
                .unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_substitution() {
        let ctx = json!({"a": "1", "b": "2"});
        assert_eq!(resolve(&json!("{{a}}-{{b}}"), &ctx), json!("1-2"));
        assert_eq!(resolve(&json!("{{c}}"), &json!({})), json!(""));
    }

    #[test]
    fn test_non_string_values_are_stringified() {
        let ctx = json!({"score": 80, "vip": true, "tags": ["a"]});
        assert_eq!(resolve_str("score={{score}} vip={{ vip }}", &ctx), "score=80 vip=true");
        assert_eq!(resolve_str("{{tags}}", &ctx), r#"["a"]"#);
    }

    #[test]
    fn test_dotted_lookup_for_step_outputs() {
        let ctx = json!({"step_1": {"task_id": "t-9"}, "customer.name": "flat key wins"});
        assert_eq!(resolve_str("{{step_1.task_id}}", &ctx), "t-9");
        assert_eq!(resolve_str("{{customer.name}}", &ctx), "flat key wins");
    }

    #[test]
    fn test_structure_and_order_preserved() {
        let ctx = json!({"name": "Ada"});
        let input = json!({
            "zeta": "Hi {{name}}",
            "alpha": ["{{name}}", 3, null, {"nested": "{{missing}}"}],
            "count": 7
        });
        let output = resolve(&input, &ctx);

        let keys: Vec<&String> = output.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "count"]);
        assert_eq!(output["alpha"], json!(["Ada", 3, null, {"nested": ""}]));
        assert_eq!(output["count"], json!(7));
    }

    #[test]
    fn test_idempotent_without_placeholders() {
        let ctx = json!({"a": "1"});
        let input = json!({"url": "https://example.com/{a}", "list": [1, "two", {"x": false}], "n": 1.5});
        assert_eq!(resolve(&input, &ctx), input);
        assert_eq!(resolve(&resolve(&input, &ctx), &ctx), input);
    }

    #[test]
    fn test_substituted_text_is_not_expanded_again() {
        let ctx = json!({"a": "{{b}}", "b": "x"});
        assert_eq!(resolve_str("{{a}}", &ctx), "{{b}}");
    }
}
