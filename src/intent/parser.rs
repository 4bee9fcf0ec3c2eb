//! Response parsing for upstream model outputs.
//!
//! Extracts a JSON intent payload from text that may wrap it in markdown
//! code blocks or surrounding prose.

use crate::error::{DocQueryError, Result};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Extracts the JSON intent payload from a model response.
///
/// Looks for the payload in the following places, in order:
/// - a ```json ... ``` block
/// - a ``` ... ``` block with no language
/// - the whole response
/// - the span from the first `{` to the last `}`
///
/// A payload of the form `{"error": "..."}` is reported as an
/// unrecognized intent carrying the producer's message.
pub fn parse_intent_response(response: &str) -> Result<Value> {
    let candidates = [
        extract_code_block(response, "json"),
        extract_code_block(response, ""),
        Some(response.trim().to_string()),
        outermost_braces(response),
    ];

    let payload = candidates
        .into_iter()
        .flatten()
        .find_map(|candidate| {
            serde_json::from_str::<Value>(candidate.trim())
                .ok()
                .filter(Value::is_object)
        })
        .ok_or_else(|| DocQueryError::unrecognized("no JSON intent found in response"))?;

    if let Some(message) = payload.get("error").and_then(Value::as_str) {
        if payload.get("category").is_none() {
            return Err(DocQueryError::unrecognized(message.to_string()));
        }
    }
    Ok(payload)
}

/// Extracts content from a markdown code block with the specified language.
///
/// Pass an empty string for `lang` to match blocks without a language specifier.
fn extract_code_block(text: &str, lang: &str) -> Option<String> {
    let start_pattern = format!("```{lang}");
    let start_idx = text.find(&start_pattern)?;

    // Content starts on the line after the opening fence
    let content_start = text[start_idx + start_pattern.len()..]
        .find('\n')
        .map(|i| start_idx + start_pattern.len() + i + 1)?;

    // A generic fence followed by a language tag belongs to another block kind
    if lang.is_empty() && !text[start_idx + 3..content_start - 1].trim().is_empty() {
        return None;
    }

    let end_idx = text[content_start..].find("```")?;
    Some(text[content_start..content_start + end_idx].to_string())
}

fn outermost_braces(text: &str) -> Option<String> {
    static BRACES: OnceLock<Option<Regex>> = OnceLock::new();
    BRACES
        .get_or_init(|| Regex::new(r"(?s)\{.*\}").ok())
        .as_ref()?
        .find(text)
        .map(|m| m.as_str().to_string())
}
