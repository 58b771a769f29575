use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;

use super::error::{ScriptError, ScriptResult};

fn fenced_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)\n?```").expect("valid regex")
    })
}

/// Candidate JSON payloads in the order they are tried: fenced code block,
/// first balanced `{...}` span, the raw text.
pub fn candidates(text: &str) -> Vec<&str> {
    let mut found = Vec::with_capacity(3);
    if let Some(block) = fenced_block()
        .captures(text)
        .and_then(|captures| captures.get(1))
    {
        found.push(block.as_str().trim());
    }
    if let Some(span) = balanced_object(text) {
        found.push(span);
    }
    found.push(text.trim());
    found
}

/// First `{...}` span whose braces balance, ignoring braces inside strings.
pub fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Single chokepoint where LLM text becomes a typed record.
pub fn parse_json_payload<T: DeserializeOwned>(text: &str) -> ScriptResult<T> {
    let mut last_error = String::from("empty response");
    for candidate in candidates(text) {
        match serde_json::from_str::<T>(candidate) {
            Ok(value) => return Ok(value),
            Err(err) => last_error = err.to_string(),
        }
    }
    Err(ScriptError::MalformedPayload(last_error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn prefers_fenced_block() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nthanks {\"b\": 2}";
        let value: Value = parse_json_payload(text).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn falls_back_to_balanced_span() {
        let text = "prose first {\"a\": {\"nested\": \"}\"}} trailing prose";
        let value: Value = parse_json_payload(text).unwrap();
        assert_eq!(value["a"]["nested"], "}");
    }

    #[test]
    fn raw_text_is_last_resort() {
        let value: Value = parse_json_payload("  [1, 2, 3]  ").unwrap();
        assert_eq!(value.as_array().unwrap().len(), 3);
    }

    #[test]
    fn all_strategies_failing_is_an_error() {
        let result = parse_json_payload::<Value>("no json here at all");
        assert!(matches!(result, Err(ScriptError::MalformedPayload(_))));
    }
}
