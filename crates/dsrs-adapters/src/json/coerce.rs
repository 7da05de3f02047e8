use serde_json::{Number, Value};

use crate::FieldType;

/// Casts a decoded value to a plain field type.
///
/// Returns `None` when the value cannot represent the type. `null` never
/// coerces; callers decide whether a null is acceptable.
pub fn coerce_value(value: &Value, field_type: FieldType) -> Option<Value> {
    match field_type {
        FieldType::String => coerce_string(value),
        FieldType::Integer => coerce_integer(value),
        FieldType::Number => coerce_number(value),
        FieldType::Boolean => coerce_boolean(value),
        FieldType::Json | FieldType::Nested => (!value.is_null()).then(|| value.clone()),
    }
}

/// Casts a field's raw text (from a label line or marker section).
///
/// Strings keep the trimmed text verbatim. `json` and `nested` fields decode
/// the text when it is valid JSON and otherwise keep it as a string.
pub fn coerce_text(text: &str, field_type: FieldType) -> Option<Value> {
    let trimmed = text.trim();
    match field_type {
        FieldType::String => Some(Value::String(trimmed.to_string())),
        FieldType::Json | FieldType::Nested => Some(
            serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string())),
        ),
        other => coerce_value(&Value::String(trimmed.to_string()), other),
    }
}

pub fn coerce_string(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(_) => Some(value.clone()),
        Value::Number(n) => Some(Value::String(n.to_string())),
        Value::Bool(b) => Some(Value::String(b.to_string())),
        Value::Array(_) | Value::Object(_) => Some(Value::String(value.to_string())),
    }
}

pub fn coerce_integer(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
        Value::Number(n) => n.as_f64().and_then(integral_f64),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Some(Value::from(i));
            }
            s.parse::<f64>().ok().and_then(integral_f64)
        }
        _ => None,
    }
}

pub fn coerce_number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Some(Value::from(i));
            }
            let f = s.parse::<f64>().ok()?;
            Number::from_f64(f).map(Value::Number)
        }
        _ => None,
    }
}

pub fn coerce_boolean(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(_) => Some(value.clone()),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(Value::Bool(true)),
            "false" | "no" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 1.0 => Some(Value::Bool(true)),
            Some(f) if f == 0.0 => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

/// Equality that tolerates a different primitive representation on either
/// side: `1`, `1.0` and `"1"` are all equal, as are `true` and `"true"`.
pub fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Number(_), Value::String(_)) => {
            coerce_number(b).is_some_and(|parsed| loosely_equal(a, &parsed))
        }
        (Value::String(_), Value::Number(_)) => loosely_equal(b, a),
        (Value::Bool(_), Value::String(_)) => coerce_boolean(b).as_ref() == Some(a),
        (Value::String(_), Value::Bool(_)) => loosely_equal(b, a),
        (Value::String(x), Value::String(y)) => x.trim() == y.trim(),
        _ => false,
    }
}

fn integral_f64(f: f64) -> Option<Value> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(Value::from(f as i64))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!("hi"), Some(json!("hi")))]
    #[case(json!(4), Some(json!("4")))]
    #[case(json!(true), Some(json!("true")))]
    #[case(json!({"a": [1, 2]}), Some(json!("{\"a\":[1,2]}")))]
    #[case(json!(null), None)]
    fn string_coercion(#[case] input: Value, #[case] expected: Option<Value>) {
        assert_eq!(coerce_string(&input), expected);
    }

    #[rstest]
    #[case(json!(7), Some(json!(7)))]
    #[case(json!(7.0), Some(json!(7)))]
    #[case(json!(7.5), None)]
    #[case(json!(" 12 "), Some(json!(12)))]
    #[case(json!("3.0"), Some(json!(3)))]
    #[case(json!("three"), None)]
    #[case(json!(true), None)]
    #[case::two_to_the_63(json!(9223372036854775808.0), None)]
    #[case::past_i64_range(json!("1e19"), None)]
    #[case::i64_min(json!(-9223372036854775808.0), Some(json!(i64::MIN)))]
    fn integer_coercion(#[case] input: Value, #[case] expected: Option<Value>) {
        assert_eq!(coerce_integer(&input), expected);
    }

    #[rstest]
    #[case(json!(2.5), Some(json!(2.5)))]
    #[case(json!("2.5"), Some(json!(2.5)))]
    #[case(json!("10"), Some(json!(10)))]
    #[case(json!("NaN"), None)]
    #[case(json!([1]), None)]
    fn number_coercion(#[case] input: Value, #[case] expected: Option<Value>) {
        assert_eq!(coerce_number(&input), expected);
    }

    #[rstest]
    #[case("true", Some(true))]
    #[case(" Yes ", Some(true))]
    #[case("1", Some(true))]
    #[case("FALSE", Some(false))]
    #[case("no", Some(false))]
    #[case("0", Some(false))]
    #[case("maybe", None)]
    fn boolean_strings(#[case] input: &str, #[case] expected: Option<bool>) {
        assert_eq!(coerce_boolean(&json!(input)), expected.map(Value::Bool));
    }

    #[rstest]
    fn text_coercion_per_field_type() {
        assert_eq!(coerce_text("  4  ", FieldType::String), Some(json!("4")));
        assert_eq!(coerce_text("4", FieldType::Integer), Some(json!(4)));
        assert_eq!(coerce_text("[1, 2]", FieldType::Json), Some(json!([1, 2])));
        assert_eq!(coerce_text("not json", FieldType::Json), Some(json!("not json")));
        assert_eq!(coerce_text("many", FieldType::Integer), None);
    }

    #[rstest]
    #[case(json!(1), json!("1"), true)]
    #[case(json!(1), json!(1.0), true)]
    #[case(json!("true"), json!(true), true)]
    #[case(json!("low"), json!("low "), true)]
    #[case(json!("low"), json!("Low"), false)]
    #[case(json!(2), json!("two"), false)]
    fn loose_equality(#[case] a: Value, #[case] b: Value, #[case] expected: bool) {
        assert_eq!(loosely_equal(&a, &b), expected);
        assert_eq!(loosely_equal(&b, &a), expected);
    }
}
