use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::adapter::render::{demo_inputs, demo_outputs, field_descriptions, label_lines, resolve_inputs};
use crate::adapter::{Adapter, JsonAdapter, RawOutput, parse_failure, validate_outputs};
use crate::{
    Chat, Completion, Example, Field, FormatError, LanguageModel, Message, ParseError,
    PredictError, Signature,
};

const EXTRACTION_INPUT: &str = "text";
const EXTRACTION_INPUT_FALLBACK: &str = "completion_text";

/// Two-pass strategy: the primary model answers freely, then a separately
/// configured extraction model pulls the output fields out of that answer
/// through the JSON-only strategy.
///
/// Failures of the second pass are tagged
/// [`ExtractionParseFailed`](ParseError::ExtractionParseFailed); a missing
/// extraction model is
/// [`ExtractionModelNotConfigured`](ParseError::ExtractionModelNotConfigured).
#[derive(Clone, Default)]
pub struct TwoStepAdapter {
    extraction_lm: Option<Arc<dyn LanguageModel>>,
}

impl fmt::Debug for TwoStepAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwoStepAdapter")
            .field(
                "extraction_lm",
                &self.extraction_lm.as_ref().map(|lm| lm.model_name().to_string()),
            )
            .finish()
    }
}

impl TwoStepAdapter {
    pub fn new(extraction_lm: Option<Arc<dyn LanguageModel>>) -> Self {
        Self { extraction_lm }
    }

    pub fn with_extraction_lm(extraction_lm: Arc<dyn LanguageModel>) -> Self {
        Self {
            extraction_lm: Some(extraction_lm),
        }
    }

    pub fn has_extraction_lm(&self) -> bool {
        self.extraction_lm.is_some()
    }

    pub fn build_system(&self, signature: &Signature) -> String {
        let outputs = signature
            .output_fields()
            .iter()
            .map(|field| {
                if field.description.is_empty() {
                    format!("`{}`", field.name)
                } else {
                    format!("`{}` ({})", field.name, field.description)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        [
            field_descriptions(signature),
            format!("Answer in your own words. Make sure your answer covers: {outputs}."),
            signature.instructions().to_string(),
        ]
        .join("\n\n")
    }

    /// Single-input signature that reads the free-form answer and produces
    /// the original output fields.
    pub fn extraction_signature(&self, signature: &Signature) -> Result<Signature, ParseError> {
        let input_name = extraction_input_name(signature);
        let outputs = signature.output_fields().to_vec();
        let names = outputs
            .iter()
            .map(|field| format!("`{}`", field.name))
            .collect::<Vec<_>>()
            .join(", ");

        Signature::builder()
            .name(format!("{}Extraction", signature.name()))
            .instructions(format!(
                "The input is a text that should contain all the necessary information to produce the fields {names}. Extract those fields from the text, keeping their values verbatim where possible."
            ))
            .inputs(vec![
                Field::builder()
                    .name(input_name)
                    .description("free-form answer to extract the fields from")
                    .build(),
            ])
            .outputs(outputs)
            .build()
            .map_err(|err| ParseError::ExtractionParseFailed {
                reason: format!("could not build extraction signature: {err}"),
                source: None,
            })
    }
}

fn extraction_input_name(signature: &Signature) -> &'static str {
    if signature.output_field(EXTRACTION_INPUT).is_some() {
        EXTRACTION_INPUT_FALLBACK
    } else {
        EXTRACTION_INPUT
    }
}

fn extraction_failed(source: ParseError) -> ParseError {
    ParseError::ExtractionParseFailed {
        reason: source.to_string(),
        source: Some(Box::new(source)),
    }
}

impl Adapter for TwoStepAdapter {
    fn name(&self) -> &'static str {
        "two_step"
    }

    #[tracing::instrument(
        name = "dsrs.adapter.two_step.format",
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
            chat.push_message(Message::user(label_lines(&demo_inputs(signature, demo))));
            chat.push_message(Message::assistant(label_lines(&demo_outputs(signature, demo))));
        }
        chat.push_message(Message::user(label_lines(&resolve_inputs(signature, inputs)?)));
        Ok(chat)
    }

    #[tracing::instrument(
        name = "dsrs.adapter.two_step.parse",
        level = "debug",
        skip_all,
        fields(signature = signature.name(), configured = self.extraction_lm.is_some())
    )]
    async fn parse(
        &self,
        signature: &Signature,
        completion: &Completion,
    ) -> Result<RawOutput, PredictError> {
        let first_usage = completion.usage_or_default();
        let Some(lm) = self.extraction_lm.as_ref() else {
            return Err(parse_failure(
                ParseError::ExtractionModelNotConfigured,
                &completion.text,
                first_usage,
            ));
        };

        let extraction = self
            .extraction_signature(signature)
            .map_err(|err| parse_failure(err, &completion.text, first_usage.clone()))?;
        let inputs = Example::default().with_input(
            extraction_input_name(signature),
            Value::String(completion.text.clone()),
        );

        let request = JsonAdapter
            .format(&extraction, &inputs, &[])
            .map_err(|err| {
                parse_failure(
                    ParseError::ExtractionParseFailed {
                        reason: err.to_string(),
                        source: None,
                    },
                    &completion.text,
                    first_usage.clone(),
                )
            })?;

        let second = lm.generate(&request).await?;
        let lm_usage = first_usage + second.usage_or_default();

        match JsonAdapter.parse_text(&extraction, &second.text) {
            Ok(fields) => Ok(RawOutput { fields, lm_usage }),
            Err(source) => {
                debug!(tag = source.tag(), "extraction pass failed");
                Err(parse_failure(extraction_failed(source), &second.text, lm_usage))
            }
        }
    }

    /// Type errors in the extracted values belong to the extraction pass.
    fn validate(
        &self,
        signature: &Signature,
        raw: &RawOutput,
    ) -> Result<IndexMap<String, Value>, ParseError> {
        validate_outputs(signature, raw).map_err(extraction_failed)
    }
}
