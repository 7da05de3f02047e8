use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::adapter::render::{
    demo_inputs, demo_outputs, field_descriptions, json_object, output_constraints, resolve_inputs,
};
use crate::adapter::{Adapter, RawOutput, RawValue, declared_fields, ensure_required, finish_parse};
use crate::json::extract_json;
use crate::{Chat, Completion, Example, FormatError, Message, ParseError, PredictError, Signature};

/// JSON-only strategy: exactly one JSON object, no label fallback, and a
/// strict key set. Keys the signature does not declare are an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonAdapter;

impl JsonAdapter {
    pub fn build_system(&self, signature: &Signature) -> String {
        let keys = signature
            .output_names()
            .map(|name| format!("`{name}`"))
            .collect::<Vec<_>>()
            .join(", ");

        let mut parts = vec![
            field_descriptions(signature),
            format!(
                "Return exactly one JSON object with keys: {keys}. Do not include any other keys or any text outside the JSON object."
            ),
        ];
        let constraints = output_constraints(signature);
        if !constraints.is_empty() {
            parts.push(constraints.join("\n"));
        }
        parts.push(signature.instructions().to_string());
        parts.join("\n\n")
    }

    /// Parses completion text into raw output values.
    ///
    /// Missing required keys are reported before unknown keys.
    pub fn parse_text(
        &self,
        signature: &Signature,
        text: &str,
    ) -> Result<IndexMap<String, RawValue>, ParseError> {
        let object = match extract_json(text)? {
            Value::Object(object) => object,
            other => {
                return Err(ParseError::DecodeFailure {
                    reason: format!("expected a JSON object, found {}", kind_of(&other)),
                });
            }
        };

        let fields = declared_fields(signature, &object);
        ensure_required(signature, &fields)?;

        let unknown: Vec<String> = object
            .keys()
            .filter(|key| signature.output_field(key.as_str()).is_none())
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(ParseError::UnknownOutputKeys { keys: unknown });
        }

        Ok(fields)
    }
}

impl Adapter for JsonAdapter {
    fn name(&self) -> &'static str {
        "json"
    }

    #[tracing::instrument(
        name = "dsrs.adapter.json.format",
        level = "trace",
        skip_all,
        fields(signature = signature.name(), demos = demos.len())
    )]
    fn format(
        &self,
        signature: &Signature,
        inputs: &Example,
        demos: &[Example],
    ) -> Result<Chat, FormatError> {
        let mut chat = Chat::new(vec![Message::system(self.build_system(signature))]);
        for demo in demos {
            chat.push_message(Message::user(json_object(&demo_inputs(signature, demo))));
            chat.push_message(Message::assistant(json_object(&demo_outputs(signature, demo))));
        }
        chat.push_message(Message::user(json_object(&resolve_inputs(signature, inputs)?)));
        Ok(chat)
    }

    #[tracing::instrument(
        name = "dsrs.adapter.json.parse",
        level = "debug",
        skip_all,
        fields(signature = signature.name())
    )]
    async fn parse(
        &self,
        signature: &Signature,
        completion: &Completion,
    ) -> Result<RawOutput, PredictError> {
        let parsed = self.parse_text(signature, &completion.text);
        if let Err(err) = &parsed {
            debug!(tag = err.tag(), "json parse failed");
        }
        finish_parse(completion, parsed)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
