use indexmap::IndexMap;
use serde_json::Value;

use crate::adapter::{RawOutput, RawValue};
use crate::json::{coerce_text, coerce_value, decode_value, loosely_equal, validate_and_cast_at};
use crate::{
    Field, FieldPath, ParseError, Signature, TypeSchema, ValidationError, ValidationErrorKind,
};

/// Shared validation stage for every strategy.
///
/// Typed fields go through the schema validator; untyped fields are coerced
/// to their primitive type. Violations are aggregated into one
/// [`ParseError::ValidationFailure`]. Only then is `one_of` checked, first
/// offending field wins. Fields the parser did not find stay absent.
#[tracing::instrument(
    name = "dsrs.adapter.validate",
    level = "debug",
    skip_all,
    fields(signature = signature.name(), fields = raw.fields.len())
)]
pub fn validate_outputs(
    signature: &Signature,
    raw: &RawOutput,
) -> Result<IndexMap<String, Value>, ParseError> {
    let mut decoded = Vec::new();
    for field in signature.output_fields() {
        if let Some(value) = raw.fields.get(&field.name) {
            decoded.push((field, decode_raw(field, value)?));
        }
    }

    let mut errors = Vec::new();
    let mut output = IndexMap::new();
    for (field, value) in decoded {
        match cast_field(field, value) {
            Ok(Some(cast)) => {
                output.insert(field.name.clone(), cast);
            }
            Ok(None) => {}
            Err(mut errs) => errors.append(&mut errs),
        }
    }
    if !errors.is_empty() {
        tracing::debug!(errors = errors.len(), "output validation failed");
        return Err(ParseError::ValidationFailure { errors });
    }

    for field in signature.output_fields() {
        if let (Some(allowed), Some(value)) = (&field.one_of, output.get(&field.name)) {
            check_one_of(field, allowed, value)?;
        }
    }

    Ok(output)
}

/// Stage one: typed fields whose value arrived as text must decode as JSON,
/// unless the schema would accept the text as a plain string.
enum Decoded {
    Json(Value),
    Text(String),
}

fn decode_raw(field: &Field, raw: &RawValue) -> Result<Decoded, ParseError> {
    match (raw, &field.schema) {
        (RawValue::Json(value), _) => Ok(Decoded::Json(value.clone())),
        (RawValue::Text(text), None) => Ok(Decoded::Text(text.clone())),
        (RawValue::Text(text), Some(schema)) if accepts_string(schema) => {
            Ok(Decoded::Json(text_or_json(field, text.trim(), schema)))
        }
        (RawValue::Text(text), Some(_)) => match decode_value(text) {
            Ok(value) => Ok(Decoded::Json(value)),
            Err(failure) => Err(ParseError::DecodeFailure {
                reason: format!("field `{}`: {}", field.name, failure.reason),
            }),
        },
    }
}

/// Prose for a string-accepting schema stays prose unless the whole text is
/// JSON the schema accepts.
fn text_or_json(field: &Field, text: &str, schema: &TypeSchema) -> Value {
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(|value| validate_and_cast_at(value, schema, FieldPath::root(field.name.as_str())).is_ok())
        .unwrap_or_else(|| Value::String(text.to_string()))
}

fn cast_field(field: &Field, value: Decoded) -> Result<Option<Value>, Vec<ValidationError>> {
    let path = FieldPath::root(field.name.as_str());

    if let Some(schema) = &field.schema {
        let value = match value {
            Decoded::Json(value) => value,
            Decoded::Text(text) => Value::String(text),
        };
        return validate_and_cast_at(&value, schema, path).map(Some);
    }

    let (cast, found) = match &value {
        Decoded::Json(Value::Null) if !field.required => return Ok(None),
        Decoded::Json(Value::Null) => {
            return Err(vec![ValidationError::new(
                path,
                ValidationErrorKind::NullNotAllowed,
                format!("required field is null, expected {}", field.field_type),
            )]);
        }
        Decoded::Json(json) => (coerce_value(json, field.field_type), json.to_string()),
        Decoded::Text(text) => (coerce_text(text, field.field_type), format!("{:?}", text.trim())),
    };

    cast.map(Some).ok_or_else(|| {
        vec![ValidationError::new(
            path,
            ValidationErrorKind::TypeMismatch,
            format!("expected {}, found {}", field.field_type, crate::truncate(&found, 80)),
        )]
    })
}

fn check_one_of(field: &Field, allowed: &[Value], value: &Value) -> Result<(), ParseError> {
    let matches = allowed.iter().any(|candidate| {
        if loosely_equal(candidate, value) {
            return true;
        }
        let coerced = match &field.schema {
            Some(schema) => crate::json::validate_and_cast(candidate, schema).ok(),
            None => coerce_value(candidate, field.field_type),
        };
        coerced.is_some_and(|coerced| loosely_equal(&coerced, value))
    });

    if matches {
        Ok(())
    } else {
        Err(ParseError::InvalidConstraintValue {
            field: field.name.clone(),
            allowed: allowed.to_vec(),
            value: value.clone(),
        })
    }
}

fn accepts_string(schema: &TypeSchema) -> bool {
    match schema {
        TypeSchema::Any | TypeSchema::String => true,
        TypeSchema::Enum(values) => values.iter().any(Value::is_string),
        TypeSchema::AnyOf(variants) => variants.iter().any(accepts_string),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldType, LmUsage, ObjectSchema};
    use rstest::rstest;
    use serde_json::json;

    fn raw(fields: Vec<(&str, RawValue)>) -> RawOutput {
        RawOutput {
            fields: fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            lm_usage: LmUsage::default(),
        }
    }

    fn text(value: &str) -> RawValue {
        RawValue::Text(value.to_string())
    }

    #[rstest]
    fn untyped_fields_are_coerced_by_primitive_type() {
        let sig: Signature = "q -> answer, count: integer, ok: boolean, data: json".parse().unwrap();
        let out = validate_outputs(
            &sig,
            &raw(vec![
                ("answer", RawValue::Json(json!(4))),
                ("count", text(" 12 ")),
                ("ok", text("yes")),
                ("data", text("[1, 2]")),
            ]),
        )
        .unwrap();
        assert_eq!(out["answer"], json!("4"));
        assert_eq!(out["count"], json!(12));
        assert_eq!(out["ok"], json!(true));
        assert_eq!(out["data"], json!([1, 2]));
    }

    #[rstest]
    fn all_type_errors_are_aggregated() {
        let sig: Signature = "q -> count: integer, ok: boolean".parse().unwrap();
        let err = validate_outputs(
            &sig,
            &raw(vec![("count", text("many")), ("ok", RawValue::Json(json!("perhaps")))]),
        )
        .unwrap_err();
        let ParseError::ValidationFailure { errors } = err else {
            panic!("expected validation failure, got {err:?}");
        };
        let paths: Vec<_> = errors.iter().map(|e| e.field_path.to_string()).collect();
        assert_eq!(paths, vec!["count", "ok"]);
    }

    #[rstest]
    fn typed_text_that_is_not_json_is_a_decode_failure() {
        let sig = Signature::builder()
            .outputs(vec![
                Field::builder()
                    .name("result")
                    .field_type(FieldType::Nested)
                    .schema(TypeSchema::Object(ObjectSchema::new()))
                    .build(),
            ])
            .build()
            .unwrap();
        let err = validate_outputs(&sig, &raw(vec![("result", text("a table of results"))])).unwrap_err();
        assert_eq!(err.tag(), "decode_failure");
    }

    #[rstest]
    fn decode_failure_takes_precedence_over_type_errors() {
        let sig = Signature::builder()
            .outputs(vec![
                Field::builder().name("count").field_type(FieldType::Integer).build(),
                Field::builder()
                    .name("result")
                    .schema(TypeSchema::array(TypeSchema::Integer))
                    .build(),
            ])
            .build()
            .unwrap();
        let err = validate_outputs(
            &sig,
            &raw(vec![("count", text("many")), ("result", text("nothing"))]),
        )
        .unwrap_err();
        assert_eq!(err.tag(), "decode_failure");
    }

    #[rstest]
    fn typed_string_field_accepts_plain_text() {
        let sig = Signature::builder()
            .outputs(vec![Field::builder().name("summary").schema(TypeSchema::String).build()])
            .build()
            .unwrap();
        let out = validate_outputs(&sig, &raw(vec![("summary", text(" plain words "))])).unwrap();
        assert_eq!(out["summary"], json!("plain words"));
    }

    #[rstest]
    #[case::bracketed_reference("See reference [1] for details.", json!("See reference [1] for details."))]
    #[case::embedded_object("Use {\"a\": 1} as input.", json!("Use {\"a\": 1} as input."))]
    #[case::null_word("null", json!("null"))]
    #[case::quoted_json_string("\"quoted\"", json!("quoted"))]
    fn string_schema_keeps_prose(#[case] section: &str, #[case] expected: Value) {
        let sig = Signature::builder()
            .outputs(vec![Field::builder().name("summary").schema(TypeSchema::String).build()])
            .build()
            .unwrap();
        let out = validate_outputs(&sig, &raw(vec![("summary", text(section))])).unwrap();
        assert_eq!(out["summary"], expected);
    }

    #[rstest]
    #[case::number("42", json!(42))]
    #[case::prose("about [3] items", json!("about [3] items"))]
    fn string_union_decodes_only_whole_accepted_json(#[case] section: &str, #[case] expected: Value) {
        let sig = Signature::builder()
            .outputs(vec![
                Field::builder()
                    .name("count")
                    .schema(TypeSchema::AnyOf(vec![TypeSchema::Integer, TypeSchema::String]))
                    .build(),
            ])
            .build()
            .unwrap();
        let out = validate_outputs(&sig, &raw(vec![("count", text(section))])).unwrap();
        assert_eq!(out["count"], expected);
    }

    #[rstest]
    #[case(RawValue::Json(json!("medium")), true)]
    #[case(text("high"), true)]
    #[case(RawValue::Json(json!("extreme")), false)]
    fn one_of_on_strings(#[case] value: RawValue, #[case] accepted: bool) {
        let sig = Signature::builder()
            .outputs(vec![
                Field::builder()
                    .name("status")
                    .one_of(vec![json!("low"), json!("medium"), json!("high")])
                    .build(),
            ])
            .build()
            .unwrap();
        let result = validate_outputs(&sig, &raw(vec![("status", value)]));
        assert_eq!(result.is_ok(), accepted);
        if let Err(err) = result {
            assert!(matches!(err, ParseError::InvalidConstraintValue { ref field, .. } if field == "status"));
        }
    }

    #[rstest]
    fn one_of_tolerates_differently_typed_allowed_values() {
        let sig = Signature::builder()
            .outputs(vec![
                Field::builder()
                    .name("level")
                    .field_type(FieldType::Integer)
                    .one_of(vec![json!("1"), json!("2"), json!("3")])
                    .build(),
            ])
            .build()
            .unwrap();
        let out = validate_outputs(&sig, &raw(vec![("level", text("2"))])).unwrap();
        assert_eq!(out["level"], json!(2));
    }

    #[rstest]
    fn validation_errors_win_over_constraint_errors() {
        let sig = Signature::builder()
            .outputs(vec![
                Field::builder()
                    .name("status")
                    .one_of(vec![json!("low")])
                    .build(),
                Field::builder().name("n").field_type(FieldType::Integer).build(),
            ])
            .build()
            .unwrap();
        let err = validate_outputs(
            &sig,
            &raw(vec![("status", text("extreme")), ("n", text("x"))]),
        )
        .unwrap_err();
        assert_eq!(err.tag(), "validation_failure");
    }

    #[rstest]
    fn null_optional_untyped_output_is_omitted() {
        let sig = Signature::builder()
            .outputs(vec![
                Field::builder().name("a").build(),
                Field::builder().name("note").required(false).build(),
            ])
            .build()
            .unwrap();
        let out = validate_outputs(
            &sig,
            &raw(vec![("a", RawValue::Json(json!("x"))), ("note", RawValue::Json(json!(null)))]),
        )
        .unwrap();
        assert_eq!(out.keys().collect::<Vec<_>>(), vec!["a"]);
    }
}
