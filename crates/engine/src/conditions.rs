//! Condition evaluation: a pure function over the execution variables.
//!
//! Conditions use a fixed operator set; there is no expression language.
//! A field missing from the variables reads as `null`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use actions::Variables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    NotContains,
    In,
    NotIn,
    IsEmpty,
    IsNotEmpty,
}

impl std::fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Equals      => "equals",
            Self::NotEquals   => "not_equals",
            Self::GreaterThan => "greater_than",
            Self::LessThan    => "less_than",
            Self::Contains    => "contains",
            Self::NotContains => "not_contains",
            Self::In          => "in",
            Self::NotIn       => "not_in",
            Self::IsEmpty     => "is_empty",
            Self::IsNotEmpty  => "is_not_empty",
        };
        f.write_str(name)
    }
}

/// How a list of conditions attached to one gate is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionLogic {
    #[default]
    And,
    Or,
    /// Negation of the AND-combined result.
    Not,
}

/// A single predicate over one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCondition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub logic: ConditionLogic,
}

impl WorkflowCondition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
            logic: ConditionLogic::And,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("'{operator}' cannot order field '{field}' ({found}) against {against}")]
    NotOrderable {
        field: String,
        operator: ConditionOperator,
        found: &'static str,
        against: &'static str,
    },

    #[error("'{operator}' needs a container for field '{field}', got {found}")]
    NotContainer {
        field: String,
        operator: ConditionOperator,
        found: &'static str,
    },
}

/// Evaluate one condition against `variables`.
pub fn evaluate(condition: &WorkflowCondition, variables: &Variables) -> Result<bool, ConditionError> {
    let field = variables.get(&condition.field).unwrap_or(&Value::Null);
    let expected = &condition.value;

    match condition.operator {
        ConditionOperator::Equals => Ok(loosely_equal(field, expected)),
        ConditionOperator::NotEquals => Ok(!loosely_equal(field, expected)),
        ConditionOperator::GreaterThan => Ok(compare(condition, field)? == Ordering::Greater),
        ConditionOperator::LessThan => Ok(compare(condition, field)? == Ordering::Less),
        ConditionOperator::Contains => contains(condition, field),
        ConditionOperator::NotContains => contains(condition, field).map(|hit| !hit),
        ConditionOperator::In => member_of(condition, field),
        ConditionOperator::NotIn => member_of(condition, field).map(|hit| !hit),
        ConditionOperator::IsEmpty => Ok(is_empty(field)),
        ConditionOperator::IsNotEmpty => Ok(!is_empty(field)),
    }
}

/// Evaluate a gate. An empty set is vacuously true under `and`, false
/// under `or`, and therefore false under `not`.
pub fn evaluate_set(
    conditions: &[WorkflowCondition],
    logic: ConditionLogic,
    variables: &Variables,
) -> Result<bool, ConditionError> {
    match logic {
        ConditionLogic::And => all(conditions, variables),
        ConditionLogic::Or => {
            for condition in conditions {
                if evaluate(condition, variables)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        ConditionLogic::Not => all(conditions, variables).map(|met| !met),
    }
}

fn all(conditions: &[WorkflowCondition], variables: &Variables) -> Result<bool, ConditionError> {
    for condition in conditions {
        if !evaluate(condition, variables)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// JSON equality, except that numbers compare by value (`1 == 1.0`).
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(condition: &WorkflowCondition, field: &Value) -> Result<Ordering, ConditionError> {
    let ordering = match (field, &condition.value) {
        (Value::Number(a), Value::Number(b)) => a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b)),
        // Lexicographic; RFC 3339 timestamps order correctly this way.
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    ordering.ok_or_else(|| ConditionError::NotOrderable {
        field: condition.field.clone(),
        operator: condition.operator,
        found: actions::variables::type_name(field),
        against: actions::variables::type_name(&condition.value),
    })
}

fn contains(condition: &WorkflowCondition, field: &Value) -> Result<bool, ConditionError> {
    let needle = &condition.value;
    match field {
        Value::Null => Ok(false),
        Value::String(haystack) => match needle {
            Value::String(needle) => Ok(haystack.contains(needle.as_str())),
            other => Err(not_container(condition, other)),
        },
        Value::Array(items) => Ok(items.iter().any(|item| loosely_equal(item, needle))),
        Value::Object(map) => Ok(needle.as_str().is_some_and(|key| map.contains_key(key))),
        other => Err(not_container(condition, other)),
    }
}

fn member_of(condition: &WorkflowCondition, field: &Value) -> Result<bool, ConditionError> {
    match &condition.value {
        Value::Array(items) => Ok(items.iter().any(|item| loosely_equal(item, field))),
        Value::String(haystack) => match field {
            Value::String(needle) => Ok(haystack.contains(needle.as_str())),
            Value::Null => Ok(false),
            other => Err(not_container(condition, other)),
        },
        other => Err(not_container(condition, other)),
    }
}

fn not_container(condition: &WorkflowCondition, found: &Value) -> ConditionError {
    ConditionError::NotContainer {
        field: condition.field.clone(),
        operator: condition.operator,
        found: actions::variables::type_name(found),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use ConditionOperator::*;

    fn vars(value: Value) -> Variables {
        Variables::from_value(value).unwrap()
    }

    fn check(field_value: Value, operator: ConditionOperator, value: Value) -> Result<bool, ConditionError> {
        evaluate(&WorkflowCondition::new("f", operator, value), &vars(json!({ "f": field_value })))
    }

    #[test]
    fn equality_compares_numbers_by_value() {
        assert_eq!(check(json!(1), Equals, json!(1.0)), Ok(true));
        assert_eq!(check(json!("high"), Equals, json!("high")), Ok(true));
        assert_eq!(check(json!("low"), Equals, json!("high")), Ok(false));
        assert_eq!(check(json!("low"), NotEquals, json!("high")), Ok(true));
    }

    #[test]
    fn ordering_works_on_numbers_and_strings_only() {
        assert_eq!(check(json!(10), GreaterThan, json!(5)), Ok(true));
        assert_eq!(check(json!(5), GreaterThan, json!(5)), Ok(false));
        assert_eq!(check(json!(2.5), LessThan, json!(3)), Ok(true));
        assert_eq!(
            check(json!("2024-01-02T00:00:00Z"), GreaterThan, json!("2024-01-01T23:59:59Z")),
            Ok(true)
        );
        assert!(matches!(
            check(json!(true), GreaterThan, json!(1)),
            Err(ConditionError::NotOrderable { found: "a boolean", .. })
        ));
        assert!(check(json!("7"), LessThan, json!(9)).is_err());
    }

    #[test]
    fn missing_field_reads_as_null() {
        let empty = Variables::new();
        let is_empty = WorkflowCondition::new("absent", IsEmpty, Value::Null);
        let contains = WorkflowCondition::new("absent", Contains, json!("x"));
        let greater = WorkflowCondition::new("absent", GreaterThan, json!(1));
        assert_eq!(evaluate(&is_empty, &empty), Ok(true));
        assert_eq!(evaluate(&contains, &empty), Ok(false));
        assert!(evaluate(&greater, &empty).is_err());
    }

    #[test]
    fn contains_covers_strings_arrays_and_objects() {
        assert_eq!(check(json!("fix login bug"), Contains, json!("login")), Ok(true));
        assert_eq!(check(json!("fix login bug"), NotContains, json!("login")), Ok(false));
        assert_eq!(check(json!(["a", "b"]), Contains, json!("b")), Ok(true));
        assert_eq!(check(json!([1, 2]), NotContains, json!(3)), Ok(true));
        assert_eq!(check(json!({ "k": 1 }), Contains, json!("k")), Ok(true));
        assert!(matches!(check(json!(42), Contains, json!(4)), Err(ConditionError::NotContainer { .. })));
    }

    #[test]
    fn in_checks_membership_of_the_field() {
        assert_eq!(check(json!("high"), In, json!(["high", "urgent"])), Ok(true));
        assert_eq!(check(json!("low"), NotIn, json!(["high", "urgent"])), Ok(true));
        assert_eq!(check(json!("ops"), In, json!("devops team")), Ok(true));
        assert!(check(json!("x"), In, json!(3)).is_err());
    }

    #[test]
    fn emptiness_rules() {
        for empty in [json!(null), json!(""), json!([]), json!({})] {
            assert_eq!(check(empty, IsEmpty, Value::Null), Ok(true));
        }
        for full in [json!(0), json!(false), json!("x"), json!([0])] {
            assert_eq!(check(full, IsNotEmpty, Value::Null), Ok(true));
        }
    }

    #[test]
    fn set_combination_truth_table() {
        let ctx = vars(json!({ "priority": "high", "points": 3 }));
        let yes = WorkflowCondition::new("priority", Equals, "high");
        let no = WorkflowCondition::new("points", GreaterThan, 5);

        let both = [yes.clone(), no.clone()];
        assert_eq!(evaluate_set(&both, ConditionLogic::And, &ctx), Ok(false));
        assert_eq!(evaluate_set(&both, ConditionLogic::Or, &ctx), Ok(true));
        assert_eq!(evaluate_set(&[yes.clone(), yes.clone()], ConditionLogic::And, &ctx), Ok(true));
        assert_eq!(evaluate_set(&[no.clone()], ConditionLogic::Or, &ctx), Ok(false));
        assert_eq!(evaluate_set(&[yes], ConditionLogic::Not, &ctx), Ok(false));
        assert_eq!(evaluate_set(&[no], ConditionLogic::Not, &ctx), Ok(true));
    }

    #[test]
    fn empty_sets() {
        let ctx = Variables::new();
        assert_eq!(evaluate_set(&[], ConditionLogic::And, &ctx), Ok(true));
        assert_eq!(evaluate_set(&[], ConditionLogic::Or, &ctx), Ok(false));
        assert_eq!(evaluate_set(&[], ConditionLogic::Not, &ctx), Ok(false));
    }

    #[test]
    fn evaluation_errors_propagate_through_sets() {
        let ctx = vars(json!({ "flag": true }));
        let bad = WorkflowCondition::new("flag", LessThan, 1);
        assert!(evaluate_set(&[bad], ConditionLogic::Or, &ctx).is_err());
    }

    #[test]
    fn evaluation_is_repeatable_and_side_effect_free() {
        let ctx = vars(json!({ "tags": ["a"] }));
        let cond = WorkflowCondition::new("tags", Contains, "a");
        let before = ctx.clone();
        assert_eq!(evaluate(&cond, &ctx), evaluate(&cond, &ctx));
        assert_eq!(ctx, before);
    }

    #[test]
    fn conditions_deserialize_with_default_logic() {
        let cond: WorkflowCondition =
            serde_json::from_value(json!({ "field": "priority", "operator": "equals", "value": "high" })).unwrap();
        assert_eq!(cond.operator, Equals);
        assert_eq!(cond.logic, ConditionLogic::And);
    }
}
