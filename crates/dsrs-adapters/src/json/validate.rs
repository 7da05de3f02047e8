use serde_json::{Map, Value};

use crate::json::coerce::{coerce_boolean, coerce_integer, coerce_number, loosely_equal};
use crate::{
    AdditionalProperties, FieldPath, ObjectSchema, TypeSchema, ValidationError,
    ValidationErrorKind,
};

/// Validates `value` against `schema` and returns the cast value.
///
/// Compatible primitives are cast where the target type is unambiguous
/// (`"3"` for an integer, `"yes"` for a boolean, a JSON string holding an
/// object for an object schema). Unions cast only when exactly one variant
/// accepts the value. All violations found in the pass are returned together.
pub fn validate_and_cast(value: &Value, schema: &TypeSchema) -> Result<Value, Vec<ValidationError>> {
    validate_and_cast_at(value, schema, FieldPath::default())
}

/// Same as [`validate_and_cast`], reporting paths relative to `path`.
#[tracing::instrument(
    name = "dsrs.json.validate",
    level = "trace",
    skip_all,
    fields(path = %path)
)]
pub fn validate_and_cast_at(
    value: &Value,
    schema: &TypeSchema,
    path: FieldPath,
) -> Result<Value, Vec<ValidationError>> {
    Caster { lenient: true }.cast(value, schema, &path)
}

struct Caster {
    lenient: bool,
}

type CastResult = Result<Value, Vec<ValidationError>>;

impl Caster {
    fn cast(&self, value: &Value, schema: &TypeSchema, path: &FieldPath) -> CastResult {
        if value.is_null() && !accepts_null(schema) {
            return Err(vec![ValidationError::new(
                path.clone(),
                ValidationErrorKind::NullNotAllowed,
                format!("null is not allowed, expected {}", schema.type_name()),
            )]);
        }

        match schema {
            TypeSchema::Any => Ok(value.clone()),
            TypeSchema::Null => Ok(Value::Null),
            TypeSchema::String => self.cast_string(value, path),
            TypeSchema::Integer => self.cast_primitive(value, schema, path, coerce_integer, |v| {
                v.as_i64().is_some() || v.as_u64().is_some()
            }),
            TypeSchema::Number => {
                self.cast_primitive(value, schema, path, coerce_number, Value::is_number)
            }
            TypeSchema::Boolean => {
                self.cast_primitive(value, schema, path, coerce_boolean, Value::is_boolean)
            }
            TypeSchema::Enum(allowed) => self.cast_enum(value, allowed, path),
            TypeSchema::Array(items) => self.cast_array(value, items, path),
            TypeSchema::Object(object) => self.cast_object(value, object, path),
            TypeSchema::AnyOf(variants) => self.cast_union(value, variants, path),
        }
    }

    fn cast_string(&self, value: &Value, path: &FieldPath) -> CastResult {
        match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) if self.lenient => Ok(Value::String(n.to_string())),
            Value::Bool(b) if self.lenient => Ok(Value::String(b.to_string())),
            _ => Err(mismatch(path, "string", value)),
        }
    }

    fn cast_primitive(
        &self,
        value: &Value,
        schema: &TypeSchema,
        path: &FieldPath,
        coerce: fn(&Value) -> Option<Value>,
        exact: fn(&Value) -> bool,
    ) -> CastResult {
        if exact(value) {
            return Ok(value.clone());
        }
        if self.lenient && let Some(cast) = coerce(value) {
            return Ok(cast);
        }
        Err(mismatch(path, &schema.type_name(), value))
    }

    fn cast_enum(&self, value: &Value, allowed: &[Value], path: &FieldPath) -> CastResult {
        if allowed.contains(value) {
            return Ok(value.clone());
        }
        if self.lenient {
            let mut matches = allowed.iter().filter(|candidate| loosely_equal(candidate, value));
            if let (Some(found), None) = (matches.next(), matches.next()) {
                return Ok(found.clone());
            }
        }
        Err(vec![ValidationError::new(
            path.clone(),
            ValidationErrorKind::EnumMismatch,
            format!("{value} is not one of {}", Value::Array(allowed.to_vec())),
        )])
    }

    fn cast_array(&self, value: &Value, items: &TypeSchema, path: &FieldPath) -> CastResult {
        let decoded;
        let elements = match value {
            Value::Array(elements) => elements.as_slice(),
            Value::String(text) if self.lenient => {
                decoded = decode_container(text, Value::is_array)
                    .ok_or_else(|| mismatch(path, "array", value))?;
                decoded.as_array().map(Vec::as_slice).unwrap_or_default()
            }
            _ => return Err(mismatch(path, "array", value)),
        };

        let mut errors = Vec::new();
        let mut out = Vec::with_capacity(elements.len());
        for (index, element) in elements.iter().enumerate() {
            match self.cast(element, items, &path.index(index)) {
                Ok(cast) => out.push(cast),
                Err(mut errs) => errors.append(&mut errs),
            }
        }
        finish(Value::Array(out), errors)
    }

    fn cast_object(&self, value: &Value, object: &ObjectSchema, path: &FieldPath) -> CastResult {
        let decoded;
        let entries = match value {
            Value::Object(entries) => entries,
            Value::String(text) if self.lenient => {
                decoded = decode_container(text, Value::is_object)
                    .ok_or_else(|| mismatch(path, "object", value))?;
                match &decoded {
                    Value::Object(entries) => entries,
                    _ => return Err(mismatch(path, "object", value)),
                }
            }
            _ => return Err(mismatch(path, "object", value)),
        };

        let mut errors = Vec::new();
        let mut out = Map::new();

        for (key, item) in entries {
            let item_path = path.key(key.as_str());
            let result = match object.properties.get(key) {
                Some(property)
                    if item.is_null() && !object.is_required(key) && !accepts_null(property) =>
                {
                    continue;
                }
                Some(property) => self.cast(item, property, &item_path),
                None => match &object.additional_properties {
                    AdditionalProperties::Allowed => Ok(item.clone()),
                    AdditionalProperties::Forbidden => Err(vec![ValidationError::new(
                        item_path,
                        ValidationErrorKind::UnknownProperty,
                        format!("unexpected property `{key}`"),
                    )]),
                    AdditionalProperties::Schema(values) => self.cast(item, values, &item_path),
                },
            };
            match result {
                Ok(cast) => {
                    out.insert(key.clone(), cast);
                }
                Err(mut errs) => errors.append(&mut errs),
            }
        }

        for required in &object.required {
            if !entries.contains_key(required) {
                errors.push(ValidationError::new(
                    path.key(required.as_str()),
                    ValidationErrorKind::MissingProperty,
                    format!("missing required property `{required}`"),
                ));
            }
        }

        finish(Value::Object(out), errors)
    }

    fn cast_union(&self, value: &Value, variants: &[TypeSchema], path: &FieldPath) -> CastResult {
        if value.is_null() {
            return Ok(Value::Null);
        }

        // `T | null` behaves like `T` for non-null values, keeping T's errors.
        let non_null: Vec<&TypeSchema> = variants.iter().filter(|v| !v.is_null()).collect();
        if let [only] = non_null.as_slice() {
            return self.cast(value, only, path);
        }

        let strict = Caster { lenient: false };
        if let Some(exact) = non_null
            .iter()
            .find_map(|variant| strict.cast(value, variant, path).ok())
        {
            return Ok(exact);
        }

        if self.lenient {
            let mut accepted = non_null
                .iter()
                .filter_map(|variant| self.cast(value, variant, path).ok());
            match (accepted.next(), accepted.next()) {
                (Some(cast), None) => return Ok(cast),
                (Some(_), Some(_)) => {
                    return Err(vec![ValidationError::new(
                        path.clone(),
                        ValidationErrorKind::NoUnionMatch,
                        format!(
                            "{} is ambiguous between variants of {}",
                            describe(value),
                            union_name(&non_null)
                        ),
                    )]);
                }
                _ => {}
            }
        }

        Err(vec![ValidationError::new(
            path.clone(),
            ValidationErrorKind::NoUnionMatch,
            format!(
                "{} does not match any of {}",
                describe(value),
                union_name(&non_null)
            ),
        )])
    }
}

fn accepts_null(schema: &TypeSchema) -> bool {
    match schema {
        TypeSchema::Any | TypeSchema::Null => true,
        TypeSchema::Enum(values) => values.iter().any(Value::is_null),
        TypeSchema::AnyOf(variants) => variants.iter().any(accepts_null),
        _ => false,
    }
}

fn decode_container(text: &str, accept: fn(&Value) -> bool) -> Option<Value> {
    serde_json::from_str::<Value>(text.trim())
        .ok()
        .filter(|decoded| accept(decoded))
}

fn finish(value: Value, errors: Vec<ValidationError>) -> CastResult {
    if errors.is_empty() {
        Ok(value)
    } else {
        Err(errors)
    }
}

fn mismatch(path: &FieldPath, expected: &str, found: &Value) -> Vec<ValidationError> {
    vec![ValidationError::new(
        path.clone(),
        ValidationErrorKind::TypeMismatch,
        format!("expected {expected}, found {}", describe(found)),
    )]
}

fn union_name(variants: &[&TypeSchema]) -> String {
    variants
        .iter()
        .map(|v| v.type_name())
        .collect::<Vec<_>>()
        .join(" or ")
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
