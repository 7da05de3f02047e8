//! Rendering helpers shared by every strategy.

use serde_json::{Map, Value};

use crate::{Example, Field, FormatError, Signature};

/// Strings render raw; everything else renders as compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Resolves the signature's input values for the current call.
///
/// A missing value falls back to the field default. A required field with
/// neither is a [`FormatError::MissingInput`]; an optional one is skipped.
pub fn resolve_inputs<'a>(
    signature: &'a Signature,
    inputs: &Example,
) -> Result<Vec<(&'a Field, Value)>, FormatError> {
    let mut resolved = Vec::with_capacity(signature.input_fields().len());
    for field in signature.input_fields() {
        match inputs.input(&field.name).or(field.default.as_ref()) {
            Some(value) => resolved.push((field, value.clone())),
            None if field.required => {
                return Err(FormatError::MissingInput {
                    field: field.name.clone(),
                });
            }
            None => {}
        }
    }
    Ok(resolved)
}

/// Demonstration inputs are best effort: fields the demo lacks are skipped.
pub fn demo_inputs<'a>(signature: &'a Signature, demo: &Example) -> Vec<(&'a Field, Value)> {
    signature
        .input_fields()
        .iter()
        .filter_map(|field| {
            demo.input(&field.name)
                .or(field.default.as_ref())
                .map(|value| (field, value.clone()))
        })
        .collect()
}

pub fn demo_outputs<'a>(signature: &'a Signature, demo: &Example) -> Vec<(&'a Field, Value)> {
    signature
        .output_fields()
        .iter()
        .filter_map(|field| demo.output(&field.name).map(|value| (field, value.clone())))
        .collect()
}

/// `Your input fields are: ... Your output fields are: ...` listing.
pub fn field_descriptions(signature: &Signature) -> String {
    let mut lines = Vec::new();
    if !signature.input_fields().is_empty() {
        lines.push("Your input fields are:".to_string());
        lines.extend(numbered(signature.input_fields()));
        lines.push(String::new());
    }
    lines.push("Your output fields are:".to_string());
    lines.extend(numbered(signature.output_fields()));
    lines.join("\n")
}

fn numbered(fields: &[Field]) -> impl Iterator<Item = String> + '_ {
    fields.iter().enumerate().map(|(i, field)| {
        let mut line = format!("{}. `{}` ({})", i + 1, field.name, field.type_label());
        if !field.description.is_empty() {
            line.push_str(": ");
            line.push_str(&field.description);
        }
        line
    })
}

/// Extra guidance for one output field: its JSON schema when typed and its
/// allowed values when constrained.
pub fn field_constraints(field: &Field) -> Vec<String> {
    let mut notes = Vec::new();
    if let Some(schema) = &field.schema {
        notes.push(format!(
            "`{}` must be JSON matching this schema: {}",
            field.name,
            schema.to_json_schema()
        ));
    }
    if let Some(allowed) = &field.one_of {
        let allowed = allowed.iter().map(render_value).collect::<Vec<_>>().join(", ");
        notes.push(format!("`{}` must be one of: {allowed}", field.name));
    }
    notes
}

pub fn output_constraints(signature: &Signature) -> Vec<String> {
    signature
        .output_fields()
        .iter()
        .flat_map(field_constraints)
        .collect()
}

/// `In adhering to this structure, your objective is:` with the instructions
/// indented underneath.
pub fn task_description(signature: &Signature) -> String {
    let mut indented = String::new();
    for line in signature.instructions().lines() {
        indented.push('\n');
        indented.push_str("        ");
        indented.push_str(line);
    }
    format!("In adhering to this structure, your objective is: {indented}")
}

/// `Label: value` lines, one per field.
pub fn label_lines(values: &[(&Field, Value)]) -> String {
    values
        .iter()
        .map(|(field, value)| format!("{}: {}", field.prefix(), render_value(value)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Compact JSON object keyed by field name, in field order.
pub fn json_object(values: &[(&Field, Value)]) -> String {
    let object = values
        .iter()
        .map(|(field, value)| (field.name.clone(), value.clone()))
        .collect::<Map<_, _>>();
    Value::Object(object).to_string()
}
