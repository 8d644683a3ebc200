//! `Variables`: the dynamically typed key/value store shared between steps.
//!
//! Step outputs are heterogeneous, so the map itself stays untyped. Reads go
//! through typed getters that fail loudly on a type mismatch instead of
//! silently defaulting. A `null` value reads the same as a missing key.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::VariableError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables(Map<String, Value>);

/// JSON type name used in error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Interpret a JSON value as a duration.
///
/// Strings use humantime syntax (`"90s"`, `"1h 30m"`, `"250ms"`); numbers
/// are milliseconds.
pub fn duration_from_value(key: &str, value: &Value) -> Result<Duration, VariableError> {
    match value {
        Value::String(s) => humantime::parse_duration(s.trim()).map_err(|e| VariableError::Malformed {
            key: key.to_owned(),
            expected: "duration",
            reason: e.to_string(),
        }),
        Value::Number(n) => n
            .as_u64()
            .map(Duration::from_millis)
            .ok_or_else(|| VariableError::Malformed {
                key: key.to_owned(),
                expected: "duration",
                reason: format!("{n} is not a whole number of milliseconds"),
            }),
        other => Err(VariableError::TypeMismatch {
            key: key.to_owned(),
            expected: "a duration",
            found: type_name(other),
        }),
    }
}

impl Variables {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build from an arbitrary JSON value; `null` yields an empty map.
    pub fn from_value(value: Value) -> Result<Self, VariableError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::new()),
            other => Err(VariableError::NotAnObject(type_name(&other))),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Raw access; `None` for a missing key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Copy every entry of `other` into `self`, overwriting existing keys.
    pub fn merge(&mut self, other: &Variables) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    fn present(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    fn mismatch(key: &str, expected: &'static str, found: &Value) -> VariableError {
        VariableError::TypeMismatch {
            key: key.to_owned(),
            expected,
            found: type_name(found),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<Option<&str>, VariableError> {
        match self.present(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(Self::mismatch(key, "a string", other)),
        }
    }

    pub fn require_str(&self, key: &str) -> Result<&str, VariableError> {
        self.get_str(key)?.ok_or_else(|| VariableError::Missing(key.to_owned()))
    }

    pub fn get_i64(&self, key: &str) -> Result<Option<i64>, VariableError> {
        match self.present(key) {
            None => Ok(None),
            Some(v @ Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| Self::mismatch(key, "an integer", v)),
            Some(other) => Err(Self::mismatch(key, "an integer", other)),
        }
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, VariableError> {
        match self.present(key) {
            None => Ok(None),
            Some(v @ Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| Self::mismatch(key, "a non-negative integer", v)),
            Some(other) => Err(Self::mismatch(key, "a non-negative integer", other)),
        }
    }

    pub fn get_f64(&self, key: &str) -> Result<Option<f64>, VariableError> {
        match self.present(key) {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(other) => Err(Self::mismatch(key, "a number", other)),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, VariableError> {
        match self.present(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(Self::mismatch(key, "a boolean", other)),
        }
    }

    /// UUIDs are stored as strings.
    pub fn get_uuid(&self, key: &str) -> Result<Option<Uuid>, VariableError> {
        match self.get_str(key)? {
            None => Ok(None),
            Some(s) => Uuid::parse_str(s).map(Some).map_err(|e| VariableError::Malformed {
                key: key.to_owned(),
                expected: "uuid",
                reason: e.to_string(),
            }),
        }
    }

    pub fn get_array(&self, key: &str) -> Result<Option<&Vec<Value>>, VariableError> {
        match self.present(key) {
            None => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items)),
            Some(other) => Err(Self::mismatch(key, "an array", other)),
        }
    }

    pub fn get_object(&self, key: &str) -> Result<Option<&Map<String, Value>>, VariableError> {
        match self.present(key) {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(other) => Err(Self::mismatch(key, "an object", other)),
        }
    }

    pub fn get_duration(&self, key: &str) -> Result<Option<Duration>, VariableError> {
        self.present(key).map(|v| duration_from_value(key, v)).transpose()
    }

    /// A list of strings, accepting either a JSON array of strings or a
    /// single comma-separated string.
    pub fn get_string_list(&self, key: &str) -> Result<Option<Vec<String>>, VariableError> {
        match self.present(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(split_list(s))),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(Self::mismatch(key, "an array of strings", other)),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(other) => Err(Self::mismatch(key, "a list of strings", other)),
        }
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

impl From<Map<String, Value>> for Variables {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Variables> for Value {
    fn from(vars: Variables) -> Self {
        vars.into_value()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Variables {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl IntoIterator for Variables {
    type Item = (String, Value);
    type IntoIter = serde_json::map::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
