//! Request formatting and completion parsing.
//!
//! An adapter owns two operations: render a [`Chat`] request from a
//! [`Signature`], call inputs and demonstrations, and turn the model's
//! [`Completion`] back into the signature's output mapping. Four strategies
//! ship here:
//!
//! - [`DefaultAdapter`]: labelled `Field: value` lines; JSON for typed signatures.
//! - [`JsonAdapter`]: exactly one JSON object with a strict key set.
//! - [`ChatAdapter`]: `[[ ## field ## ]]` delimited sections.
//! - [`TwoStepAdapter`]: free-form answer, then a second model call extracts the fields.
//!
//! [`AdapterKind`] is the closed set of strategies the pipeline runner
//! accepts. Parsing never panics; every failure is a tagged [`ParseError`].

pub mod chat;
pub mod default;
pub mod json;
pub mod render;
pub mod two_step;
pub mod validate;

pub use chat::*;
pub use default::*;
pub use json::*;
pub use two_step::*;
pub use validate::*;

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::{
    AdapterName, Chat, Completion, Example, FormatError, LanguageModel, LmUsage, ParseError,
    PredictError, Signature,
};

/// An output value as the parser found it, before type validation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Free text from a label line or a delimited section.
    Text(String),
    /// An already-decoded JSON value.
    Json(Value),
}

/// Parser result handed to the validation stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOutput {
    pub fields: IndexMap<String, RawValue>,
    pub lm_usage: LmUsage,
}

#[allow(async_fn_in_trait)]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Renders the request. Fails only when a required input has neither a
    /// value nor a default.
    fn format(
        &self,
        signature: &Signature,
        inputs: &Example,
        demos: &[Example],
    ) -> Result<Chat, FormatError>;

    /// Turns the completion into raw output values, checking which fields are
    /// present but not their types.
    async fn parse(
        &self,
        signature: &Signature,
        completion: &Completion,
    ) -> Result<RawOutput, PredictError>;

    /// Casts raw values to their declared types and checks `one_of`.
    fn validate(
        &self,
        signature: &Signature,
        raw: &RawOutput,
    ) -> Result<IndexMap<String, Value>, ParseError> {
        validate_outputs(signature, raw)
    }
}

/// Wraps a parse failure with the raw response and the tokens spent on it.
pub(crate) fn parse_failure(source: ParseError, raw_response: &str, lm_usage: LmUsage) -> PredictError {
    PredictError::Parse {
        source,
        raw_response: raw_response.to_string(),
        lm_usage,
    }
}

/// The closed set of parsing strategies, dispatched by `match`.
#[derive(Debug, Clone)]
pub enum AdapterKind {
    Default(DefaultAdapter),
    Json(JsonAdapter),
    Chat(ChatAdapter),
    TwoStep(TwoStepAdapter),
}

impl Default for AdapterKind {
    fn default() -> Self {
        AdapterKind::Default(DefaultAdapter)
    }
}

impl AdapterKind {
    /// Builds the strategy named in configuration. Only the two-step strategy
    /// uses `extraction_lm`.
    pub fn from_name(name: AdapterName, extraction_lm: Option<Arc<dyn LanguageModel>>) -> Self {
        match name {
            AdapterName::Default => AdapterKind::Default(DefaultAdapter),
            AdapterName::Json => AdapterKind::Json(JsonAdapter),
            AdapterName::Chat => AdapterKind::Chat(ChatAdapter),
            AdapterName::TwoStep => AdapterKind::TwoStep(TwoStepAdapter::new(extraction_lm)),
        }
    }

    pub fn kind_name(&self) -> AdapterName {
        match self {
            AdapterKind::Default(_) => AdapterName::Default,
            AdapterKind::Json(_) => AdapterName::Json,
            AdapterKind::Chat(_) => AdapterName::Chat,
            AdapterKind::TwoStep(_) => AdapterName::TwoStep,
        }
    }
}

impl From<DefaultAdapter> for AdapterKind {
    fn from(adapter: DefaultAdapter) -> Self {
        AdapterKind::Default(adapter)
    }
}

impl From<JsonAdapter> for AdapterKind {
    fn from(adapter: JsonAdapter) -> Self {
        AdapterKind::Json(adapter)
    }
}

impl From<ChatAdapter> for AdapterKind {
    fn from(adapter: ChatAdapter) -> Self {
        AdapterKind::Chat(adapter)
    }
}

impl From<TwoStepAdapter> for AdapterKind {
    fn from(adapter: TwoStepAdapter) -> Self {
        AdapterKind::TwoStep(adapter)
    }
}

impl Adapter for AdapterKind {
    fn name(&self) -> &'static str {
        match self {
            AdapterKind::Default(adapter) => adapter.name(),
            AdapterKind::Json(adapter) => adapter.name(),
            AdapterKind::Chat(adapter) => adapter.name(),
            AdapterKind::TwoStep(adapter) => adapter.name(),
        }
    }

    fn format(
        &self,
        signature: &Signature,
        inputs: &Example,
        demos: &[Example],
    ) -> Result<Chat, FormatError> {
        match self {
            AdapterKind::Default(adapter) => adapter.format(signature, inputs, demos),
            AdapterKind::Json(adapter) => adapter.format(signature, inputs, demos),
            AdapterKind::Chat(adapter) => adapter.format(signature, inputs, demos),
            AdapterKind::TwoStep(adapter) => adapter.format(signature, inputs, demos),
        }
    }

    async fn parse(
        &self,
        signature: &Signature,
        completion: &Completion,
    ) -> Result<RawOutput, PredictError> {
        match self {
            AdapterKind::Default(adapter) => adapter.parse(signature, completion).await,
            AdapterKind::Json(adapter) => adapter.parse(signature, completion).await,
            AdapterKind::Chat(adapter) => adapter.parse(signature, completion).await,
            AdapterKind::TwoStep(adapter) => adapter.parse(signature, completion).await,
        }
    }

    fn validate(
        &self,
        signature: &Signature,
        raw: &RawOutput,
    ) -> Result<IndexMap<String, Value>, ParseError> {
        match self {
            AdapterKind::Default(adapter) => adapter.validate(signature, raw),
            AdapterKind::Json(adapter) => adapter.validate(signature, raw),
            AdapterKind::Chat(adapter) => adapter.validate(signature, raw),
            AdapterKind::TwoStep(adapter) => adapter.validate(signature, raw),
        }
    }
}

/// Fails with the required output fields absent from `fields`, in
/// declaration order.
pub(crate) fn ensure_required(
    signature: &Signature,
    fields: &IndexMap<String, RawValue>,
) -> Result<(), ParseError> {
    let missing: Vec<String> = signature
        .required_output_fields()
        .into_iter()
        .filter(|field| !fields.contains_key(&field.name))
        .map(|field| field.name.clone())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ParseError::MissingRequiredOutputs { fields: missing })
    }
}

/// Declared output fields found in a decoded object, in declaration order.
pub(crate) fn declared_fields(
    signature: &Signature,
    object: &serde_json::Map<String, Value>,
) -> IndexMap<String, RawValue> {
    signature
        .output_fields()
        .iter()
        .filter_map(|field| {
            object
                .get(&field.name)
                .map(|value| (field.name.clone(), RawValue::Json(value.clone())))
        })
        .collect()
}

/// Runs a strategy's synchronous text parser and wraps the outcome for the
/// runner.
pub(crate) fn finish_parse(
    completion: &Completion,
    parsed: Result<IndexMap<String, RawValue>, ParseError>,
) -> Result<RawOutput, PredictError> {
    let lm_usage = completion.usage_or_default();
    match parsed {
        Ok(fields) => Ok(RawOutput { fields, lm_usage }),
        Err(source) => Err(parse_failure(source, &completion.text, lm_usage)),
    }
}
