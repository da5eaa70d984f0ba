use admute_common::label::Label;
use serde_json::Value;

use super::ClassificationError;

/// Extract the label from a backend's free-form answer.
///
/// The answer is expected to hold a one-field object such as
/// `{"content": "ad"}`, possibly fenced in ``` markers, single-quoted, or
/// surrounded by prose.
pub fn parse_label(raw: &str) -> Result<Label, ClassificationError> {
    let stripped = strip_code_fence(raw);
    if stripped.is_empty() {
        return Err(ClassificationError::EmptyResponse);
    }

    // Quote rewriting would mangle apostrophes in valid JSON, so it is only
    // tried once the text as given fails to parse.
    let value = parse_json(stripped).or_else(|_| parse_json(&normalize_quotes(stripped)))?;

    let object = value
        .as_object()
        .ok_or_else(|| ClassificationError::Malformed(format!("expected an object, got {value}")))?;

    let answer = object
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("content"))
        .map(|(_, v)| v)
        .ok_or(ClassificationError::MissingKey)?;

    let answer = answer
        .as_str()
        .ok_or_else(|| ClassificationError::UnrecognizedValue(answer.to_string()))?;

    Label::from_answer(answer)
        .ok_or_else(|| ClassificationError::UnrecognizedValue(answer.to_string()))
}

/// The whole text as JSON, else the object embedded in it.
fn parse_json(text: &str) -> Result<Value, ClassificationError> {
    serde_json::from_str(text).or_else(|e| {
        embedded_object(text)
            .and_then(|obj| serde_json::from_str(obj).ok())
            .ok_or_else(|| ClassificationError::Malformed(e.to_string()))
    })
}

/// Trim whitespace and a surrounding ``` fence with an optional language tag.
fn strip_code_fence(raw: &str) -> &str {
    let text = raw.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    let rest = rest.trim_end();
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn normalize_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\'' | '\u{2018}' | '\u{2019}' | '\u{201C}' | '\u{201D}' => '"',
            other => other,
        })
        .collect()
}

/// The text from the first `{` through the last `}`, if any.
fn embedded_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}
