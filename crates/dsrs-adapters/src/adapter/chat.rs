use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use tracing::{debug, trace};

use crate::adapter::render::{
    demo_inputs, demo_outputs, field_descriptions, output_constraints, render_value,
    resolve_inputs, task_description,
};
use crate::adapter::{Adapter, JsonAdapter, RawOutput, RawValue, finish_parse};
use crate::{
    Chat, Completion, Example, Field, FormatError, Message, ParseError, PredictError, Signature,
};
use serde_json::Value;

static FIELD_HEADER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[\[ ## ([^#]+?) ## \]\]").unwrap());

const COMPLETED_MARKER: &str = "completed";

/// Marker strategy: every field travels in its own `[[ ## field ## ]]`
/// section and the response ends with `[[ ## completed ## ]]`.
///
/// When the completion has no delimiters at all, or a required output's
/// delimiter is missing, the JSON-only parse runs as a best-effort recovery.
/// Validation failures after a successful split never trigger it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatAdapter;

impl ChatAdapter {
    /// Builds the system message: field descriptions, the delimiter layout,
    /// response instructions and the task description.
    pub fn build_system(&self, signature: &Signature) -> String {
        let mut parts = vec![
            field_descriptions(signature),
            self.format_field_structure(signature),
        ];
        let constraints = output_constraints(signature);
        if !constraints.is_empty() {
            parts.push(constraints.join("\n"));
        }
        parts.push(self.format_response_instructions(signature));
        parts.push(task_description(signature));

        let system = parts.join("\n\n");
        trace!(system_len = system.len(), "formatted chat system prompt");
        system
    }

    fn format_field_structure(&self, signature: &Signature) -> String {
        let mut lines = vec![
            "All interactions will be structured in the following way, with the appropriate values filled in.".to_string(),
            String::new(),
        ];

        for field in signature.input_fields() {
            lines.push(format!("[[ ## {} ## ]]", field.name));
            lines.push(field.name.clone());
            lines.push(String::new());
        }

        for field in signature.output_fields() {
            lines.push(format!("[[ ## {} ## ]]", field.name));
            lines.push(format!(
                "Output field `{}` should be of type: {}",
                field.name,
                field.type_label()
            ));
            lines.push(String::new());
        }

        lines.push(format!("[[ ## {COMPLETED_MARKER} ## ]]"));
        lines.join("\n")
    }

    fn format_response_instructions(&self, signature: &Signature) -> String {
        let mut output_fields = signature.output_fields().iter();
        let Some(first_field) = output_fields.next() else {
            return format!("Respond with the marker for `[[ ## {COMPLETED_MARKER} ## ]]`.");
        };

        let mut message = format!(
            "Respond with the corresponding output fields, starting with the field `[[ ## {} ## ]]`,",
            first_field.name
        );
        for field in output_fields {
            message.push_str(&format!(" then `[[ ## {} ## ]]`,", field.name));
        }
        message.push_str(&format!(
            " and then ending with the marker for `[[ ## {COMPLETED_MARKER} ## ]]`."
        ));
        message
    }

    /// Formats input values as `[[ ## field ## ]]` sections followed by the
    /// response instructions.
    pub fn format_input(&self, signature: &Signature, values: &[(&Field, Value)]) -> String {
        let mut result = String::new();
        for (field, value) in values {
            result.push_str(&format!("[[ ## {} ## ]]\n", field.name));
            result.push_str(&render_value(value));
            result.push_str("\n\n");
        }
        result.push_str(&self.format_response_instructions(signature));
        result
    }

    /// Formats output values as sections ending with the completed marker.
    pub fn format_output(&self, values: &[(&Field, Value)]) -> String {
        let sections = values
            .iter()
            .map(|(field, value)| format!("[[ ## {} ## ]]\n{}", field.name, render_value(value)))
            .collect::<Vec<_>>();
        let mut result = sections.join("\n\n");
        result.push_str(&format!("\n\n[[ ## {COMPLETED_MARKER} ## ]]\n"));
        result
    }

    /// Splits raw response text into named sections by `[[ ## field ## ]]`
    /// delimiters.
    ///
    /// Returns an ordered map of field name to section content. The
    /// `completed` marker is included as a section (usually empty). Duplicate
    /// section names keep the first occurrence. Content before the first
    /// delimiter is discarded.
    pub fn parse_sections(content: &str) -> IndexMap<String, String> {
        parse_sections(content)
    }

    /// Parses completion text into raw output values.
    pub fn parse_text(
        &self,
        signature: &Signature,
        text: &str,
    ) -> Result<IndexMap<String, RawValue>, ParseError> {
        let sections = parse_sections(text);
        let delimited = sections.keys().any(|name| name != COMPLETED_MARKER);

        let missing: Vec<String> = signature
            .required_output_fields()
            .into_iter()
            .filter(|field| !sections.contains_key(&field.name))
            .map(|field| field.name.clone())
            .collect();

        if delimited && missing.is_empty() {
            return Ok(signature
                .output_fields()
                .iter()
                .filter_map(|field| {
                    sections
                        .get(&field.name)
                        .map(|text| (field.name.clone(), RawValue::Text(text.clone())))
                })
                .collect());
        }

        debug!(
            delimited,
            missing = missing.len(),
            "marker split incomplete, trying JSON recovery"
        );
        match JsonAdapter.parse_text(signature, text) {
            Ok(fields) => Ok(fields),
            Err(ParseError::DecodeFailure { .. }) if missing.is_empty() => Ok(IndexMap::new()),
            Err(ParseError::DecodeFailure { .. }) => {
                Err(ParseError::MissingRequiredOutputs { fields: missing })
            }
            Err(other) => Err(other),
        }
    }
}

impl Adapter for ChatAdapter {
    fn name(&self) -> &'static str {
        "chat"
    }

    #[tracing::instrument(
        name = "dsrs.adapter.chat.format",
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
            chat.push_message(Message::user(
                self.format_input(signature, &demo_inputs(signature, demo)),
            ));
            chat.push_message(Message::assistant(
                self.format_output(&demo_outputs(signature, demo)),
            ));
        }
        let values = resolve_inputs(signature, inputs)?;
        chat.push_message(Message::user(self.format_input(signature, &values)));
        Ok(chat)
    }

    #[tracing::instrument(
        name = "dsrs.adapter.chat.parse",
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
            debug!(tag = err.tag(), "marker parse failed");
        }
        finish_parse(completion, parsed)
    }
}

fn parse_sections(content: &str) -> IndexMap<String, String> {
    let mut sections: Vec<(Option<String>, Vec<String>)> = vec![(None, Vec::new())];

    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(caps) = FIELD_HEADER_PATTERN.captures(trimmed)
            && let (Some(header), Some(marker)) = (caps.get(1), caps.get(0))
        {
            let header = header.as_str().trim().to_string();
            let remaining = trimmed[marker.end()..].trim();

            let mut lines = Vec::new();
            if !remaining.is_empty() {
                lines.push(remaining.to_string());
            }
            sections.push((Some(header), lines));
        } else if let Some((_, lines)) = sections.last_mut() {
            lines.push(line.to_string());
        }
    }

    let mut parsed = IndexMap::new();
    for (header, lines) in sections {
        let Some(name) = header else {
            continue;
        };
        if parsed.contains_key(&name) {
            continue;
        }
        parsed.insert(name, lines.join("\n").trim().to_string());
    }

    parsed
}
