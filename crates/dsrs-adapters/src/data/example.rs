use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Input values for one call, or a worked demonstration when `outputs` is
/// filled in.
///
/// Keys keep insertion order so rendered requests are stable.
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
pub struct Example {
    #[serde(default)]
    pub inputs: IndexMap<String, Value>,
    #[serde(default)]
    pub outputs: IndexMap<String, Value>,
}

impl Example {
    pub fn new(inputs: IndexMap<String, Value>, outputs: IndexMap<String, Value>) -> Self {
        Self { inputs, outputs }
    }

    /// Builds a call-input example from `(name, value)` pairs.
    pub fn from_inputs<I, K, V>(inputs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            inputs: inputs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            outputs: IndexMap::new(),
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    pub fn input(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key)
    }

    pub fn output(&self, key: &str) -> Option<&Value> {
        self.outputs.get(key)
    }

    /// Looks the key up among inputs first, then outputs.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key).or_else(|| self.outputs.get(key))
    }

    pub fn is_demonstration(&self) -> bool {
        !self.outputs.is_empty()
    }
}
