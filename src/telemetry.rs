use crate::prelude::*;

use serde::Serialize;
use std::collections::BTreeMap;

/// One published measurement.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Float(f64),
    Int(i64),
    Text(String),
    Bool(bool),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// Flat key -> value telemetry for one poll cycle. Built through
/// [`SnapshotBuilder`] and read-only afterwards.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TelemetrySnapshot {
    fields: BTreeMap<&'static str, Value>,
}

impl TelemetrySnapshot {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.fields.iter().map(|(k, v)| (*k, v))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    fields: BTreeMap<&'static str, Value>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one field. An existing key is never replaced; the collision
    /// is logged and `false` returned.
    pub fn insert(&mut self, key: &'static str, value: Value) -> bool {
        match self.fields.get(key) {
            Some(existing) => {
                warn!(
                    "telemetry key {} already set to {}, ignoring {}",
                    key, existing, value
                );
                false
            }
            None => {
                self.fields.insert(key, value);
                true
            }
        }
    }

    /// Merges every field of `record`, returning how many were inserted.
    pub fn merge<R: Record + ?Sized>(&mut self, record: &R) -> usize {
        let mut inserted = 0;
        for (key, value) in record.fields() {
            if self.insert(key, value) {
                inserted += 1;
            }
        }
        inserted
    }

    pub fn build(self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            fields: self.fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_value_wins() {
        let mut builder = SnapshotBuilder::new();
        assert!(builder.insert("battery_voltage", Value::Float(52.3)));
        assert!(!builder.insert("battery_voltage", Value::Float(0.0)));

        let snapshot = builder.build();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("battery_voltage"), Some(&Value::Float(52.3)));
    }

    #[test]
    fn serializes_flat() {
        let mut builder = SnapshotBuilder::new();
        builder.insert("pv2_input_power", 0.into());
        builder.insert("working_mode", "Battery".into());
        builder.insert("has_warning", false.into());
        builder.insert("grid_voltage", 230.1.into());

        let json: serde_json::Value = serde_json::from_str(&builder.build().to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "pv2_input_power": 0,
                "working_mode": "Battery",
                "has_warning": false,
                "grid_voltage": 230.1,
            })
        );
    }

    #[test]
    fn absent_and_zero_differ() {
        let mut builder = SnapshotBuilder::new();
        builder.insert("pv2_input_power", 0.into());
        let snapshot = builder.build();

        assert_eq!(snapshot.get("pv2_input_power").and_then(Value::as_i64), Some(0));
        assert_eq!(snapshot.get("pv_input_power"), None);
    }
}
