use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::DecodeFailure;

static CODE_FENCE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+-]*)[^\n]*\n(.*?)```").unwrap());

/// Candidates scanned before giving up on a pathological input.
const MAX_BRACE_CANDIDATES: usize = 256;

/// Locates and decodes the most plausible JSON object in completion text.
///
/// Fenced blocks come first (`json`-tagged before untagged), then the first
/// balanced `{...}` substring that decodes to an object. String literals are
/// respected while balancing, so braces inside values don't confuse the scan.
pub fn extract_json(text: &str) -> Result<Value, DecodeFailure> {
    if text.trim().is_empty() {
        return Err(DecodeFailure::new("completion is empty"));
    }

    if let Some(value) = decode_fenced(text, Value::is_object) {
        return Ok(value);
    }

    first_balanced_object(text).ok_or_else(|| {
        DecodeFailure::new("no fenced JSON block or balanced JSON object found")
    })
}

/// Decodes a single field's text into JSON.
///
/// Tries the whole trimmed text, then fenced blocks, then the first balanced
/// `{...}` or `[...]`. Used for typed fields whose value arrived as text.
pub fn decode_value(text: &str) -> Result<Value, DecodeFailure> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(DecodeFailure::new("field value is empty"));
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    if let Some(value) = decode_fenced(trimmed, |_| true) {
        return Ok(value);
    }

    let object = first_balanced(trimmed, b'{', b'}', |_| true);
    let array = first_balanced(trimmed, b'[', b']', |_| true);
    let found = match (object, array) {
        (Some((o_start, o)), Some((a_start, a))) => Some(if a_start < o_start { a } else { o }),
        (Some((_, o)), None) => Some(o),
        (None, Some((_, a))) => Some(a),
        (None, None) => None,
    };
    found.ok_or_else(|| DecodeFailure::new(format!("`{}` is not valid JSON", crate::truncate(trimmed, 60))))
}

/// First fenced block whose body decodes and satisfies `accept`.
fn decode_fenced(text: &str, accept: fn(&Value) -> bool) -> Option<Value> {
    let blocks: Vec<(String, &str)> = CODE_FENCE_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let lang = caps.get(1)?.as_str().to_ascii_lowercase();
            let body = caps.get(2)?.as_str();
            Some((lang, body))
        })
        .collect();

    let is_json_lang = |lang: &str| matches!(lang, "json" | "jsonc" | "json5");
    let tagged = blocks.iter().filter(|(lang, _)| is_json_lang(lang.as_str()));
    let untagged = blocks.iter().filter(|(lang, _)| lang.is_empty());

    tagged
        .chain(untagged)
        .find_map(|(_, body)| {
            serde_json::from_str::<Value>(body.trim())
                .ok()
                .filter(|value| accept(value))
        })
}

fn first_balanced_object(text: &str) -> Option<Value> {
    first_balanced(text, b'{', b'}', Value::is_object).map(|(_, value)| value)
}

/// Scans for `open` positions left to right and returns the first balanced
/// candidate that decodes and satisfies `accept`, with its start offset.
fn first_balanced(
    text: &str,
    open: u8,
    close: u8,
    accept: impl Fn(&Value) -> bool,
) -> Option<(usize, Value)> {
    let bytes = text.as_bytes();
    bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == open)
        .take(MAX_BRACE_CANDIDATES)
        .find_map(|(start, _)| {
            let end = matching_close(bytes, start, open, close)?;
            let value: Value = serde_json::from_str(&text[start..=end]).ok()?;
            accept(&value).then_some((start, value))
        })
}

fn matching_close(bytes: &[u8], start: usize, open: u8, close: u8) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::bare(r#"{"answer": "4"}"#)]
    #[case::prose_around("Sure! Here you go: {\"answer\": \"4\"} Hope that helps.")]
    #[case::fenced("Result:\n```json\n{\"answer\": \"4\"}\n```\nDone.")]
    #[case::fenced_array_before_object("Steps:\n```json\n[1, 2]\n```\nFinal: {\"answer\": \"4\"}")]
    #[case::fenced_scalar_before_fenced_object("```json\n42\n```\n```json\n{\"answer\": \"4\"}\n```")]
    #[case::untagged_fence("```\n{\"answer\": \"4\"}\n```")]
    fn finds_the_object(#[case] text: &str) {
        assert_eq!(extract_json(text).unwrap(), json!({"answer": "4"}));
    }

    #[rstest]
    fn json_tagged_fence_beats_untagged_one() {
        let text = "```\n{\"a\": 1}\n```\nand\n```json\n{\"a\": 2}\n```";
        assert_eq!(extract_json(text).unwrap(), json!({"a": 2}));
    }

    #[rstest]
    fn fence_wins_over_earlier_braces() {
        let text = "I considered {\"a\": 0} but:\n```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(text).unwrap(), json!({"a": 1}));
    }

    #[rstest]
    fn braces_inside_strings_do_not_break_balancing() {
        let text = r#"note {"text": "a } tricky { value", "n": 1} end"#;
        assert_eq!(
            extract_json(text).unwrap(),
            json!({"text": "a } tricky { value", "n": 1})
        );
    }

    #[rstest]
    fn skips_non_json_brace_groups() {
        let text = "use {braces} like {\"ok\": true}";
        assert_eq!(extract_json(text).unwrap(), json!({"ok": true}));
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("Answer: 4")]
    #[case("{\"unterminated\": ")]
    #[case("[1, 2, 3]")]
    fn undecodable_text_is_a_decode_failure(#[case] text: &str) {
        assert!(extract_json(text).is_err());
    }

    #[rstest]
    #[case("42", json!(42))]
    #[case(" [1, 2] ", json!([1, 2]))]
    #[case("the list is [1, 2] ok", json!([1, 2]))]
    #[case("```json\n{\"a\": 1}\n```", json!({"a": 1}))]
    #[case("x {\"a\": [1]} y", json!({"a": [1]}))]
    fn decode_value_accepts_any_json(#[case] text: &str, #[case] expected: Value) {
        assert_eq!(decode_value(text).unwrap(), expected);
    }

    #[rstest]
    fn decode_value_rejects_prose() {
        let err = decode_value("no json here").unwrap_err();
        assert!(err.reason.contains("not valid JSON"));
    }
}
