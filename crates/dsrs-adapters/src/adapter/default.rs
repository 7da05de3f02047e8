use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, trace};

use crate::adapter::render::{
    demo_inputs, demo_outputs, field_descriptions, json_object, label_lines, output_constraints,
    resolve_inputs,
};
use crate::adapter::{Adapter, RawOutput, RawValue, declared_fields, ensure_required, finish_parse};
use crate::json::extract_json;
use crate::{Chat, Completion, Example, FormatError, Message, ParseError, PredictError, Signature};

/// Label strategy: the model answers with `Field: value` lines.
///
/// Signatures with typed outputs are asked for a JSON object instead, and
/// their completions must contain one: a typed signature never falls back to
/// label parsing. Untyped signatures take a JSON object when it carries every
/// required key and read label lines otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultAdapter;

impl DefaultAdapter {
    pub fn build_system(&self, signature: &Signature) -> String {
        let mut parts = vec![field_descriptions(signature)];

        if signature.has_typed_outputs() {
            let keys = signature
                .output_names()
                .map(|name| format!("`{name}`"))
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!(
                "Respond with a single JSON object whose keys are the output fields: {keys}."
            ));
        } else {
            let template = signature
                .output_fields()
                .iter()
                .map(|field| {
                    let hint = if field.description.is_empty() {
                        field.name.as_str()
                    } else {
                        field.description.as_str()
                    };
                    format!("{}: [{hint}]", field.prefix())
                })
                .collect::<Vec<_>>()
                .join("\n");
            parts.push(format!(
                "Respond with one line per output field, in this format:\n\n{template}"
            ));
        }

        let constraints = output_constraints(signature);
        if !constraints.is_empty() {
            parts.push(constraints.join("\n"));
        }
        parts.push(signature.instructions().to_string());
        parts.join("\n\n")
    }

    fn render_outputs(&self, signature: &Signature, demo: &Example) -> String {
        let outputs = demo_outputs(signature, demo);
        if signature.has_typed_outputs() {
            json_object(&outputs)
        } else {
            label_lines(&outputs)
        }
    }

    /// Parses completion text into raw output values.
    pub fn parse_text(
        &self,
        signature: &Signature,
        text: &str,
    ) -> Result<IndexMap<String, RawValue>, ParseError> {
        let fields = if signature.has_typed_outputs() {
            let value = extract_json(text)?;
            let Value::Object(object) = value else {
                return Err(ParseError::DecodeFailure {
                    reason: "expected a JSON object for typed outputs".to_string(),
                });
            };
            declared_fields(signature, &object)
        } else {
            match json_with_required_keys(signature, text) {
                Some(fields) => fields,
                None => {
                    trace!("no usable JSON object, reading label lines");
                    parse_labels(signature, text)
                }
            }
        };

        ensure_required(signature, &fields)?;
        Ok(fields)
    }
}

impl Adapter for DefaultAdapter {
    fn name(&self) -> &'static str {
        "default"
    }

    #[tracing::instrument(
        name = "dsrs.adapter.default.format",
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
            chat.push_message(Message::assistant(self.render_outputs(signature, demo)));
        }
        chat.push_message(Message::user(label_lines(&resolve_inputs(signature, inputs)?)));
        Ok(chat)
    }

    #[tracing::instrument(
        name = "dsrs.adapter.default.parse",
        level = "debug",
        skip_all,
        fields(signature = signature.name(), typed = signature.has_typed_outputs())
    )]
    async fn parse(
        &self,
        signature: &Signature,
        completion: &Completion,
    ) -> Result<RawOutput, PredictError> {
        let parsed = self.parse_text(signature, &completion.text);
        if let Err(err) = &parsed {
            debug!(tag = err.tag(), "label parse failed");
        }
        finish_parse(completion, parsed)
    }
}

fn json_with_required_keys(signature: &Signature, text: &str) -> Option<IndexMap<String, RawValue>> {
    let Ok(Value::Object(object)) = extract_json(text) else {
        return None;
    };
    let has_required = signature
        .required_output_fields()
        .iter()
        .all(|field| object.contains_key(&field.name));
    let has_any = signature.output_names().any(|name| object.contains_key(name));
    (has_required && has_any).then(|| declared_fields(signature, &object))
}

/// Label spellings for a field: `Final Answer`, `final_answer`, `final answer`.
fn label_variants(name: &str, prefix: String) -> Vec<String> {
    let mut variants = vec![prefix.to_lowercase(), name.to_lowercase(), name.replace('_', " ").to_lowercase()];
    variants.sort();
    variants.dedup();
    variants
}

/// Reads `Label: value` sections. A section runs until the next line that
/// starts with any field label (inputs included) or the end of the text. The
/// first non-empty occurrence of a field wins.
fn parse_labels(signature: &Signature, text: &str) -> IndexMap<String, RawValue> {
    let mut labels: Vec<(String, Option<&str>)> = Vec::new();
    for field in signature.input_fields() {
        labels.extend(label_variants(&field.name, field.prefix()).into_iter().map(|l| (l, None)));
    }
    for field in signature.output_fields() {
        labels.extend(
            label_variants(&field.name, field.prefix())
                .into_iter()
                .map(|l| (l, Some(field.name.as_str()))),
        );
    }
    labels.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut fields = IndexMap::new();
    let mut current: Option<(Option<&str>, Vec<&str>)> = None;

    for line in text.lines() {
        match match_label(line, &labels) {
            Some((target, rest)) => {
                flush_section(current.take(), &mut fields);
                current = Some((target, vec![rest]));
            }
            None => {
                if let Some((_, lines)) = current.as_mut() {
                    lines.push(line);
                }
            }
        }
    }
    flush_section(current.take(), &mut fields);

    fields
}

fn flush_section(section: Option<(Option<&str>, Vec<&str>)>, fields: &mut IndexMap<String, RawValue>) {
    if let Some((Some(name), lines)) = section {
        let value = lines.join("\n").trim().to_string();
        if !value.is_empty() && !fields.contains_key(name) {
            fields.insert(name.to_string(), RawValue::Text(value));
        }
    }
}

fn match_label<'t, 'l>(
    line: &'t str,
    labels: &[(String, Option<&'l str>)],
) -> Option<(Option<&'l str>, &'t str)> {
    let candidate = strip_decoration(line.trim_start().trim_start_matches('#').trim_start());
    labels.iter().find_map(|(label, target)| {
        let head = candidate.get(..label.len())?;
        if !head.eq_ignore_ascii_case(label) {
            return None;
        }
        let rest = strip_decoration(candidate[label.len()..].trim_start());
        let value = rest.strip_prefix(':')?;
        Some((*target, strip_decoration(value.trim_start()).trim()))
    })
}

fn strip_decoration(text: &str) -> &str {
    text.strip_prefix("**")
        .or_else(|| text.strip_prefix("__"))
        .unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Field, FieldType, ObjectSchema, Role, TypeSchema};
    use rstest::rstest;
    use serde_json::json;

    fn qa() -> Signature {
        Signature::parse("question -> answer").unwrap()
    }

    fn typed() -> Signature {
        Signature::builder()
            .inputs(vec![Field::builder().name("question").build()])
            .outputs(vec![
                Field::builder()
                    .name("result")
                    .field_type(FieldType::Nested)
                    .schema(TypeSchema::Object(
                        ObjectSchema::new().required_property("count", TypeSchema::Integer),
                    ))
                    .build(),
            ])
            .build()
            .unwrap()
    }

    #[rstest]
    #[case("Answer: 4", "4")]
    #[case("answer: 4", "4")]
    #[case("**Answer:** 4", "4")]
    #[case("**Answer**: 4", "4")]
    #[case("## Answer: 4", "4")]
    #[case("Let me think.\nAnswer: 4\nbecause 2+2", "4\nbecause 2+2")]
    #[case("Question: what?\nAnswer: 4", "4")]
    fn label_lines_are_parsed(#[case] text: &str, #[case] expected: &str) {
        let fields = DefaultAdapter.parse_text(&qa(), text).unwrap();
        assert_eq!(fields["answer"], RawValue::Text(expected.to_string()));
    }

    #[rstest]
    fn first_label_occurrence_wins() {
        let fields = DefaultAdapter.parse_text(&qa(), "Answer: 4\nAnswer: 5").unwrap();
        assert_eq!(fields["answer"], RawValue::Text("4".into()));
    }

    #[rstest]
    fn multi_word_labels_match_every_spelling() {
        let sig = Signature::parse("question -> final_answer").unwrap();
        for text in ["Final Answer: 9", "final_answer: 9", "FINAL ANSWER: 9"] {
            let fields = DefaultAdapter.parse_text(&sig, text).unwrap();
            assert_eq!(fields["final_answer"], RawValue::Text("9".into()), "{text}");
        }
    }

    #[rstest]
    fn json_object_with_required_keys_is_preferred() {
        let fields = DefaultAdapter
            .parse_text(&qa(), "Answer: wrong\n{\"answer\": 4}")
            .unwrap();
        assert_eq!(fields["answer"], RawValue::Json(json!(4)));
    }

    #[rstest]
    fn json_without_required_keys_falls_back_to_labels() {
        let fields = DefaultAdapter
            .parse_text(&qa(), "{\"other\": 1}\nAnswer: 4")
            .unwrap();
        assert_eq!(fields["answer"], RawValue::Text("4".into()));
    }

    #[rstest]
    fn missing_label_is_reported() {
        let err = DefaultAdapter.parse_text(&qa(), "The answer is 4").unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingRequiredOutputs {
                fields: vec!["answer".into()]
            }
        );
    }

    #[rstest]
    #[case::labels_only("count is 3", "decode_failure")]
    #[case::array_only("[1, 2]", "decode_failure")]
    #[case::object_without_field_key("Result: {\"count\": 3}", "missing_required_outputs")]
    fn typed_signature_never_reads_labels(#[case] text: &str, #[case] tag: &str) {
        let err = DefaultAdapter.parse_text(&typed(), text).unwrap_err();
        assert_eq!(err.tag(), tag);
    }

    #[rstest]
    fn typed_signature_reads_json_object() {
        let fields = DefaultAdapter
            .parse_text(&typed(), "```json\n{\"result\": {\"count\": 3}}\n```")
            .unwrap();
        assert_eq!(fields["result"], RawValue::Json(json!({"count": 3})));
    }

    #[rstest]
    fn format_renders_labels_demos_and_inputs() {
        let demo = Example::default()
            .with_input("question", "1+1?")
            .with_output("answer", "2");
        let chat = DefaultAdapter
            .format(&qa(), &Example::default().with_input("question", "2+2?"), &[demo])
            .unwrap();

        assert_eq!(chat.len(), 4);
        let system = chat.messages[0].text_content();
        assert!(system.contains("Answer: [answer]"));
        assert!(system.ends_with("Given the fields `question`, produce the fields `answer`."));
        assert_eq!(chat.messages[1].text_content(), "Question: 1+1?");
        assert_eq!(chat.messages[2].role, Role::Assistant);
        assert_eq!(chat.messages[2].text_content(), "Answer: 2");
        assert_eq!(chat.messages[3].text_content(), "Question: 2+2?");
    }

    #[rstest]
    fn typed_format_asks_for_json_with_schema() {
        let chat = DefaultAdapter
            .format(&typed(), &Example::default().with_input("question", "how many?"), &[])
            .unwrap();
        let system = chat.messages[0].text_content();
        assert!(system.contains("single JSON object whose keys are the output fields: `result`"));
        assert!(system.contains(r#""required":["count"]"#));
    }
}
