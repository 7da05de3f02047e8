use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bon::Builder;
use serde::{Deserialize, Serialize};

use super::LanguageModel;
use crate::adapter::AdapterKind;

/// Global defaults threaded explicitly through every call: the model
/// transport and the adapter used when neither the call nor the program
/// picks one.
#[derive(Builder, Clone)]
pub struct Settings {
    pub lm: Arc<dyn LanguageModel>,
    #[builder(default)]
    pub adapter: AdapterKind,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("lm", &self.lm.model_name())
            .field("adapter", &self.adapter)
            .finish()
    }
}

/// Strategy name as it appears in configuration files and CLIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterName {
    #[default]
    #[serde(alias = "label")]
    Default,
    #[serde(alias = "json_only")]
    Json,
    #[serde(alias = "marker")]
    Chat,
    #[serde(alias = "two-step")]
    TwoStep,
}

impl AdapterName {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterName::Default => "default",
            AdapterName::Json => "json",
            AdapterName::Chat => "chat",
            AdapterName::TwoStep => "two_step",
        }
    }
}

impl fmt::Display for AdapterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown adapter `{0}`, expected one of: default, json, chat, two_step")]
pub struct UnknownAdapterName(pub String);

impl FromStr for AdapterName {
    type Err = UnknownAdapterName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" | "label" => Ok(AdapterName::Default),
            "json" | "json_only" => Ok(AdapterName::Json),
            "chat" | "marker" => Ok(AdapterName::Chat),
            "two_step" | "two-step" | "twostep" => Ok(AdapterName::TwoStep),
            other => Err(UnknownAdapterName(other.to_string())),
        }
    }
}

/// Picks the active adapter: call override, then program override, then the
/// global default.
pub fn resolve_adapter<'a>(
    call: Option<&'a AdapterKind>,
    program: Option<&'a AdapterKind>,
    global: &'a AdapterKind,
) -> &'a AdapterKind {
    call.or(program).unwrap_or(global)
}
