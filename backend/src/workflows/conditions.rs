// Workflow Conditions - Nested boolean condition trees

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::context::{lookup_path, stringify};

/// A condition tree: `{all: [...]}`, `{any: [...]}`, a single field test, or `{}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Condition {
    All { all: Vec<Condition> },
    Any { any: Vec<Condition> },
    Field(FieldCondition),
    Empty(EmptyCondition),
}

/// Matches only the literal empty object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EmptyCondition {}

/// A single leaf comparison
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldCondition {
    /// Field name to evaluate (supports dot notation for nested fields)
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    #[serde(alias = "eq", alias = "==")]
    Equals,
    #[serde(alias = "ne", alias = "!=")]
    NotEquals,
    #[serde(alias = "gt", alias = ">")]
    GreaterThan,
    #[serde(alias = "lt", alias = "<")]
    LessThan,
    Contains,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    /// Anything not listed above; always evaluates false.
    #[serde(other)]
    Unsupported,
}

impl Condition {
    pub fn all(conditions: Vec<Condition>) -> Self {
        Self::All { all: conditions }
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Self::Any { any: conditions }
    }

    pub fn field(field: &str, operator: ConditionOperator, value: Value) -> Self {
        Self::Field(FieldCondition {
            field: field.to_string(),
            operator,
            value,
        })
    }

    pub fn equals(field: &str, value: Value) -> Self {
        Self::field(field, ConditionOperator::Equals, value)
    }

    pub fn greater_than(field: &str, value: f64) -> Self {
        Self::field(field, ConditionOperator::GreaterThan, serde_json::json!(value))
    }

    pub fn less_than(field: &str, value: f64) -> Self {
        Self::field(field, ConditionOperator::LessThan, serde_json::json!(value))
    }

    pub fn in_list(field: &str, values: Vec<Value>) -> Self {
        Self::field(field, ConditionOperator::In, Value::Array(values))
    }

    pub fn is_null(field: &str) -> Self {
        Self::field(field, ConditionOperator::IsNull, Value::Null)
    }

    pub fn is_not_null(field: &str) -> Self {
        Self::field(field, ConditionOperator::IsNotNull, Value::Null)
    }

    /// Evaluate this tree against a context.
    pub fn matches(&self, context: &Value) -> bool {
        match self {
            Self::All { all } => all.iter().all(|c| c.matches(context)),
            Self::Any { any } => any.iter().any(|c| c.matches(context)),
            Self::Field(leaf) => leaf.matches(context),
            Self::Empty(_) => true,
        }
    }
}

/// Absent conditions always pass.
pub fn evaluate(conditions: Option<&Condition>, context: &Value) -> bool {
    conditions.map_or(true, |c| c.matches(context))
}

impl FieldCondition {
    pub fn matches(&self, context: &Value) -> bool {
        let actual = lookup_path(context, &self.field);
        let expected = &self.value;

        match self.operator {
            ConditionOperator::Equals => actual.is_some_and(|v| values_equal(v, expected)),
            ConditionOperator::NotEquals => !actual.is_some_and(|v| values_equal(v, expected)),
            ConditionOperator::GreaterThan => compare_numbers(actual, expected, |a, b| a > b),
            ConditionOperator::LessThan => compare_numbers(actual, expected, |a, b| a < b),
            ConditionOperator::Contains => actual.is_some_and(|v| contains(v, expected)),
            ConditionOperator::In => actual.is_some_and(|v| is_member(v, expected)),
            ConditionOperator::NotIn => !actual.is_some_and(|v| is_member(v, expected)),
            ConditionOperator::IsNull => actual.is_none_or(Value::is_null),
            ConditionOperator::IsNotNull => actual.is_some_and(|v| !v.is_null()),
            ConditionOperator::Unsupported => {
                warn!("Unsupported condition operator on field '{}'", self.field);
                false
            }
        }
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn compare_numbers(actual: Option<&Value>, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.and_then(as_number), as_number(expected)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
        Value::Null => false,
        other => stringify(other).contains(&stringify(expected)),
    }
}

fn is_member(actual: &Value, expected: &Value) -> bool {
    match expected {
        Value::Array(items) => items.iter().any(|item| values_equal(actual, item)),
        Value::String(haystack) => actual.as_str().is_some_and(|needle| haystack.contains(needle)),
        _ => false,
    }
}
