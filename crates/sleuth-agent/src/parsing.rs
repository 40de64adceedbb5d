//! Lenient extraction of a JSON object from model output.
//!
//! Models wrap structured answers in code fences or surround them with prose.
//! We take the fenced block if there is one, otherwise the first balanced
//! `{...}` object in the text.

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;

use sleuth_core::error::{Result, SleuthError};

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"```(?:json|JSON)?\s*\n?([\s\S]*?)\n?```").expect("fence pattern is valid")
    })
}

/// Strip a surrounding markdown code fence, if present.
pub fn strip_fences(text: &str) -> &str {
    fence_regex()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or_else(|| text.trim())
}

/// The first balanced JSON object in `text`. Braces inside string literals
/// are ignored.
pub fn extract_object(text: &str) -> Option<&str> {
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

/// Parse a typed value out of free-form model output.
pub fn parse_model_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let body = strip_fences(text);
    let object = extract_object(body).ok_or_else(|| {
        SleuthError::LlmParse(format!("no JSON object in model output: {}", preview(text)))
    })?;
    serde_json::from_str(object)
        .map_err(|e| SleuthError::LlmParse(format!("{}: {}", e, preview(object))))
}

fn preview(text: &str) -> String {
    const MAX: usize = 200;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        ok: bool,
        note: String,
    }

    #[test]
    fn test_plain_object() {
        let a: Answer = parse_model_json(r#"{"ok": true, "note": "x"}"#).unwrap();
        assert!(a.ok);
    }

    #[test]
    fn test_fenced_object() {
        let text = "Here you go:\n```json\n{\"ok\": false, \"note\": \"y\"}\n```\nDone.";
        let a: Answer = parse_model_json(text).unwrap();
        assert_eq!(a, Answer { ok: false, note: "y".into() });
    }

    #[test]
    fn test_prose_around_object_with_braces_in_strings() {
        let text = r#"Sure. {"ok": true, "note": "use {braces} and \"quotes\""} trailing"#;
        let a: Answer = parse_model_json(text).unwrap();
        assert_eq!(a.note, r#"use {braces} and "quotes""#);
    }

    #[test]
    fn test_missing_object_is_parse_error() {
        let err = parse_model_json::<Answer>("I cannot answer that").unwrap_err();
        assert!(matches!(err, SleuthError::LlmParse(_)));
    }

    #[test]
    fn test_unbalanced_object_is_parse_error() {
        assert!(extract_object(r#"{"ok": true"#).is_none());
    }
}
