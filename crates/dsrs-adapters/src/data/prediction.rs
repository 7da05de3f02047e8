use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::LmUsage;

/// Validated output of one pipeline run: output field name to typed value.
///
/// Only fields the model actually supplied are present; defaults are never
/// filled in.
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
pub struct Prediction {
    pub data: IndexMap<String, Value>,
    pub lm_usage: LmUsage,
}

impl Prediction {
    pub fn new(data: IndexMap<String, Value>, lm_usage: LmUsage) -> Self {
        Self { data, lm_usage }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Deserializes one field into a concrete type. An absent field is
    /// treated as `null`, so `Option<T>` targets read it as `None`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.get(key).cloned().unwrap_or(Value::Null))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.data.values().cloned().collect()
    }

    pub fn into_data(self) -> IndexMap<String, Value> {
        self.data
    }
}
