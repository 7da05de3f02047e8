use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{SignatureError, TypeSchema};

const DEFAULT_SIGNATURE_NAME: &str = "StringSignature";

/// Primitive type of a field. For typed fields (those carrying a
/// [`TypeSchema`]) this is advisory; the schema governs validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
    Json,
    Nested,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Json => "json",
            FieldType::Nested => "nested",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" | "str" => Ok(FieldType::String),
            "integer" | "int" => Ok(FieldType::Integer),
            "number" | "float" => Ok(FieldType::Number),
            "boolean" | "bool" => Ok(FieldType::Boolean),
            "json" => Ok(FieldType::Json),
            "nested" | "object" => Ok(FieldType::Nested),
            other => Err(format!("unknown field type `{other}`")),
        }
    }
}

/// One named slot of a [`Signature`].
///
/// Fields are direction-agnostic; the signature decides whether a field is an
/// input or an output.
#[derive(Debug, Clone, PartialEq, bon::Builder)]
pub struct Field {
    #[builder(into)]
    pub name: String,
    #[builder(default)]
    pub field_type: FieldType,
    #[builder(default, into)]
    pub description: String,
    #[builder(default = true)]
    pub required: bool,
    pub default: Option<Value>,
    /// Nested schema; its presence makes the field "typed".
    pub schema: Option<TypeSchema>,
    /// Closed set of allowed values.
    pub one_of: Option<Vec<Value>>,
}

impl Field {
    pub fn is_typed(&self) -> bool {
        self.schema.is_some()
    }

    /// Human label for the field: `final_answer` renders as `Final Answer`.
    pub fn prefix(&self) -> String {
        self.name
            .split('_')
            .filter(|word| !word.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Type shown in prompt field listings.
    pub fn type_label(&self) -> String {
        match &self.schema {
            Some(schema) => schema.type_name(),
            None => self.field_type.as_str().to_string(),
        }
    }
}

/// Immutable I/O contract for one model invocation.
///
/// Build it with [`Signature::builder`] or from the `"a, b -> c"` shorthand:
///
/// ```
/// use dsrs_adapters::Signature;
///
/// let sig: Signature = "question -> answer".parse().unwrap();
/// assert_eq!(sig.output_fields()[0].name, "answer");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    name: String,
    instructions: String,
    input_fields: Vec<Field>,
    output_fields: Vec<Field>,
}

#[bon::bon]
impl Signature {
    /// Validates the declaration: unique, delimiter-safe field names and at
    /// least one output. Without explicit instructions the signature gets
    /// the generic objective from [`Signature::objective`].
    #[builder]
    pub fn new(
        #[builder(into, default = String::from(DEFAULT_SIGNATURE_NAME))] name: String,
        #[builder(into)] instructions: Option<String>,
        #[builder(default)] inputs: Vec<Field>,
        outputs: Vec<Field>,
    ) -> Result<Self, SignatureError> {
        if outputs.is_empty() {
            return Err(SignatureError::NoOutputFields { name });
        }

        let mut seen = HashSet::new();
        for field in inputs.iter().chain(outputs.iter()) {
            validate_field_name(&field.name)?;
            if !seen.insert(field.name.as_str()) {
                return Err(SignatureError::DuplicateField {
                    name: field.name.clone(),
                });
            }
        }

        let instructions = instructions
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| objective_for(&inputs, &outputs));

        Ok(Self {
            name,
            instructions,
            input_fields: inputs,
            output_fields: outputs,
        })
    }
}

impl Signature {
    /// Parses `"question, context -> answer"`; each name may carry a type
    /// annotation such as `count: integer`.
    pub fn parse(spec: &str) -> Result<Self, SignatureError> {
        let invalid = |reason: &str| SignatureError::InvalidShorthand {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let (inputs, outputs) = spec
            .split_once("->")
            .ok_or_else(|| invalid("expected `inputs -> outputs`"))?;
        if outputs.contains("->") {
            return Err(invalid("more than one `->`"));
        }

        let parse_side = |side: &str| -> Result<Vec<Field>, SignatureError> {
            side.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| -> Result<Field, SignatureError> {
                    let (name, field_type) = match item.split_once(':') {
                        Some((name, ty)) => {
                            (name.trim(), ty.parse::<FieldType>().map_err(|e| invalid(&e))?)
                        }
                        None => (item, FieldType::String),
                    };
                    Ok(Field::builder().name(name).field_type(field_type).build())
                })
                .collect()
        };

        Signature::builder()
            .inputs(parse_side(inputs)?)
            .outputs(parse_side(outputs)?)
            .build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn input_fields(&self) -> &[Field] {
        &self.input_fields
    }

    pub fn output_fields(&self) -> &[Field] {
        &self.output_fields
    }

    /// Returns a copy carrying new instructions; the original is untouched.
    pub fn with_instructions(&self, instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            ..self.clone()
        }
    }

    /// Generic task description derived from the field names.
    pub fn objective(&self) -> String {
        objective_for(&self.input_fields, &self.output_fields)
    }

    pub fn required_output_fields(&self) -> Vec<&Field> {
        self.output_fields.iter().filter(|f| f.required).collect()
    }

    pub fn typed_output_fields(&self) -> Vec<&Field> {
        self.output_fields.iter().filter(|f| f.is_typed()).collect()
    }

    pub fn has_typed_outputs(&self) -> bool {
        self.output_fields.iter().any(Field::is_typed)
    }

    pub fn input_field(&self, name: &str) -> Option<&Field> {
        self.input_fields.iter().find(|f| f.name == name)
    }

    pub fn output_field(&self, name: &str) -> Option<&Field> {
        self.output_fields.iter().find(|f| f.name == name)
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.output_fields.iter().map(|f| f.name.as_str())
    }
}

impl FromStr for Signature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Signature::parse(s)
    }
}

fn validate_field_name(name: &str) -> Result<(), SignatureError> {
    if name.is_empty() {
        return Err(SignatureError::EmptyFieldName);
    }
    if name
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '#' | '[' | ']' | ':'))
    {
        return Err(SignatureError::InvalidFieldName {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn objective_for(inputs: &[Field], outputs: &[Field]) -> String {
    let quote = |fields: &[Field]| {
        fields
            .iter()
            .map(|f| format!("`{}`", f.name))
            .collect::<Vec<_>>()
            .join(", ")
    };
    if inputs.is_empty() {
        format!("Produce the fields {}.", quote(outputs))
    } else {
        format!(
            "Given the fields {}, produce the fields {}.",
            quote(inputs),
            quote(outputs)
        )
    }
}
