// Execution Context - the key/value scope threaded through a workflow run

use serde_json::{Map, Value};
use uuid::Uuid;

/// Mutable scope for one execution: the trigger payload at the root plus one
/// `step_<n>` entry per finished step.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: Option<Uuid>,
    pub workflow_id: Option<Uuid>,
    /// Set when the scope belongs to a rule firing rather than a workflow run.
    pub rule_id: Option<Uuid>,
    data: Value,
}

impl ExecutionContext {
    /// Build a context from trigger data. Non-object payloads are kept under `trigger`.
    pub fn new(trigger_data: Value) -> Self {
        let data = match trigger_data {
            Value::Object(map) => Value::Object(map),
            Value::Null => Value::Object(Map::new()),
            other => {
                let mut map = Map::new();
                map.insert("trigger".to_string(), other);
                Value::Object(map)
            }
        };

        Self {
            execution_id: None,
            workflow_id: None,
            rule_id: None,
            data,
        }
    }

    pub fn for_execution(execution_id: Uuid, workflow_id: Uuid, trigger_data: Value) -> Self {
        let mut context = Self::new(trigger_data);
        context.execution_id = Some(execution_id);
        context.workflow_id = Some(workflow_id);
        context
    }

    pub fn for_rule(rule_id: Uuid, entity_state: Value) -> Self {
        let mut context = Self::new(entity_state);
        context.rule_id = Some(rule_id);
        context
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.data, path)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        if let Value::Object(map) = &mut self.data {
            map.insert(key.into(), value);
        }
    }

    pub fn step_key(step_number: i32) -> String {
        format!("step_{}", step_number)
    }

    pub fn record_step_output(&mut self, step_number: i32, output: Value) {
        self.insert(Self::step_key(step_number), output);
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(Value::Null)
    }
}

/// Resolve a dotted path (`customer.address.city`, `items.0.sku`) into a JSON value.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }

    let mut current = root;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// String form used for template substitution and `contains` comparisons.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_nested_and_indexed() {
        let data = json!({"customer": {"name": "Ada", "phones": ["555-0100", "555-0101"]}});
        assert_eq!(lookup_path(&data, "customer.name"), Some(&json!("Ada")));
        assert_eq!(lookup_path(&data, "customer.phones.1"), Some(&json!("555-0101")));
        assert_eq!(lookup_path(&data, "customer.email"), None);
        assert_eq!(lookup_path(&data, "customer.name.first"), None);
    }

    #[test]
    fn test_non_object_trigger_is_wrapped() {
        let ctx = ExecutionContext::new(json!(42));
        assert_eq!(ctx.get("trigger"), Some(&json!(42)));
    }

    #[test]
    fn test_step_output_is_addressable() {
        let mut ctx = ExecutionContext::new(json!({"score": 80}));
        ctx.record_step_output(1, json!({"task_id": "abc"}));
        assert_eq!(ctx.get("step_1.task_id"), Some(&json!("abc")));
        assert_eq!(ctx.get("score"), Some(&json!(80)));
    }
}
