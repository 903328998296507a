//! Extraction of structured data from loosely formatted upstream text
//!
//! Generated text may wrap its JSON in markdown code fences, carry stray
//! control characters or surround the object with prose. [`sanitize`] never
//! fails: when no valid object can be recovered the caller gets `structured:
//! None` together with the original text.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Markdown code fence
const FENCE: &str = "```";

/// Outcome of sanitizing upstream text
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedResult {
    /// Recovered JSON object, if any
    pub structured: Option<Value>,
    /// The text exactly as received
    pub raw_text: String,
}

/// Recovers a JSON object from upstream text
///
/// Steps: strip the control characters JSON forbids, strip a code fence (and
/// its language tag) at the start and a closing fence at the end, take the
/// span from the first `{` to the last `}` and parse it. Text that is already
/// a valid JSON object parses to the same value.
pub fn sanitize(raw_text: &str) -> ParsedResult {
    let cleaned = strip_control_chars(raw_text);
    let structured = outer_braces(strip_fences(&cleaned)).and_then(|candidate| {
        serde_json::from_str::<Value>(candidate)
            .inspect_err(|e| debug!(error = %e, "upstream text is not valid JSON"))
            .ok()
    });

    ParsedResult {
        structured,
        raw_text: raw_text.to_string(),
    }
}

/// Removes a leading fence with its language tag and a trailing fence
///
/// Fences elsewhere are left alone; they may be part of a string value.
fn strip_fences(text: &str) -> &str {
    let mut text = text.trim();
    if let Some(rest) = text.strip_prefix(FENCE) {
        let tag_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '+'))
            .unwrap_or(rest.len());
        text = &rest[tag_len..];
    }
    text.strip_suffix(FENCE).unwrap_or(text)
}

/// Drops U+0000..=U+001F, which JSON never allows raw; line breaks and tabs become spaces
fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            '\n' | '\r' | '\t' => Some(' '),
            '\u{0}'..='\u{1f}' => None,
            c => Some(c),
        })
        .collect()
}

/// Slice from the first `{` to the last `}`, inclusive
fn outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fenced_json_block() {
        let parsed = sanitize("```json\n{\"summary\":\"x\"}\n```");
        assert_eq!(parsed.structured, Some(json!({"summary": "x"})));
    }

    #[test]
    fn test_fenced_json_on_one_line() {
        let parsed = sanitize("```json {\"summary\":\"x\"}```");
        assert_eq!(parsed.structured, Some(json!({"summary": "x"})));
    }

    #[test]
    fn test_plain_json_is_unchanged() {
        let text = r#"{"summary":"plain","keyPoints":["a","b"],"score":3.5}"#;
        let parsed = sanitize(text);
        assert_eq!(
            parsed.structured,
            Some(serde_json::from_str::<Value>(text).unwrap())
        );
        assert_eq!(parsed.raw_text, text);
    }

    #[test]
    fn test_prose_around_object() {
        let parsed = sanitize("Here is the analysis:\n{\"outlook\": \"neutral\"}\nHope this helps!");
        assert_eq!(parsed.structured, Some(json!({"outlook": "neutral"})));
    }

    #[test]
    fn test_control_characters_are_removed() {
        let text = "\u{0}```json\u{7}\n{\"summary\":\u{1b}\"line one\nline two\",\t\"n\":1}\u{7f}```";
        let parsed = sanitize(text);
        assert_eq!(
            parsed.structured,
            Some(json!({"summary": "line one line two", "n": 1}))
        );
        assert_eq!(parsed.raw_text, text, "raw text is preserved verbatim");
    }

    #[test]
    fn test_nested_objects_use_outermost_braces() {
        let parsed = sanitize("```\n{\"a\":{\"b\":{\"c\":[1,2,{\"d\":null}]}}}\n```");
        assert_eq!(
            parsed.structured,
            Some(json!({"a": {"b": {"c": [1, 2, {"d": null}]}}}))
        );
    }

    #[test]
    fn test_no_braces_yields_none() {
        let parsed = sanitize("Blockchain is a distributed ledger.");
        assert!(parsed.structured.is_none());
        assert_eq!(parsed.raw_text, "Blockchain is a distributed ledger.");
    }

    #[test]
    fn test_reversed_braces_yield_none() {
        assert!(sanitize("} nothing here {").structured.is_none());
    }

    #[test]
    fn test_invalid_json_yields_none() {
        assert!(sanitize("```json\n{summary: 'x',}\n```").structured.is_none());
        assert!(sanitize("{\"a\": 1} and then {\"b\": 2}").structured.is_none());
    }

    #[test]
    fn test_empty_input() {
        let parsed = sanitize("");
        assert!(parsed.structured.is_none());
        assert!(parsed.raw_text.is_empty());
    }

    #[test]
    fn test_strip_fences_only_at_the_ends() {
        assert_eq!(strip_fences("  ```json {} ```  "), " {} ");
        assert_eq!(strip_fences("```{}```"), "{}");
        assert_eq!(strip_fences("see ```code``` here"), "see ```code``` here");
        assert_eq!(strip_fences("no fences"), "no fences");
    }

    #[test]
    fn test_fences_inside_string_values_are_kept() {
        let text = "```json\n{\"example\": \"```rust fn main() {}```\"}\n```";
        let parsed = sanitize(text);
        assert_eq!(
            parsed.structured,
            Some(json!({"example": "```rust fn main() {}```"}))
        );
    }

    #[test]
    fn test_characters_json_allows_raw_are_kept() {
        let text = "{\"s\": \"del\u{7f} nel\u{85} csi\u{9b}\"}";
        let parsed = sanitize(text);
        assert_eq!(
            parsed.structured,
            Some(serde_json::from_str::<Value>(text).unwrap())
        );
        assert_eq!(parsed.structured, Some(json!({"s": "del\u{7f} nel\u{85} csi\u{9b}"})));
    }

    #[test]
    fn test_prose_before_fenced_block() {
        let parsed = sanitize("Sure! Here it is:\n```json\n{\"risks\": []}\n```\nAnything else?");
        assert_eq!(parsed.structured, Some(json!({"risks": []})));
    }
}
