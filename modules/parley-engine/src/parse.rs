//! Tolerant extraction of structured blocks from free-text model output.
//!
//! Judges and generators routinely wrap their JSON in prose or markdown
//! fences. Parsing is a capability boundary here: callers get a sum type,
//! never an error, because a malformed response is an expected outcome.

use llm_client::util::strip_code_fences;

/// Outcome of parsing a model response that has a documented default.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseResult<T> {
    /// The response carried a well-formed block.
    Parsed(T),
    /// The response was unusable; `T` is the documented neutral default.
    Fallback(T),
}

impl<T> ParseResult<T> {
    pub fn into_inner(self) -> T {
        match self {
            ParseResult::Parsed(v) | ParseResult::Fallback(v) => v,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ParseResult::Fallback(_))
    }
}

/// Find the first balanced JSON object in `raw`, tolerating surrounding prose
/// and markdown fences. Brace counting is string- and escape-aware so braces
/// inside string literals do not unbalance the scan.
pub fn first_json_object(raw: &str) -> Option<&str> {
    let text = strip_code_fences(raw);
    let start = text.find('{')?;
    let bytes = text.as_bytes();

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_bare_object() {
        assert_eq!(first_json_object(r#"{"a": 1}"#), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn skips_surrounding_prose() {
        let raw = "Sure! Here is the evaluation:\n{\"score\": 7}\nLet me know if...";
        assert_eq!(first_json_object(raw), Some("{\"score\": 7}"));
    }

    #[test]
    fn handles_markdown_fences() {
        let raw = "```json\n{\"a\": {\"b\": 2}}\n```";
        assert_eq!(first_json_object(raw), Some("{\"a\": {\"b\": 2}}"));
    }

    #[test]
    fn balances_nested_objects() {
        let raw = r#"{"outer": {"inner": {"deep": 1}}} trailing {"ignored": 2}"#;
        assert_eq!(
            first_json_object(raw),
            Some(r#"{"outer": {"inner": {"deep": 1}}}"#)
        );
    }

    #[test]
    fn braces_inside_strings_do_not_unbalance() {
        let raw = r#"{"feedback": "use {placeholders} and \"quotes\" carefully"}"#;
        assert_eq!(first_json_object(raw), Some(raw));
    }

    #[test]
    fn unbalanced_or_missing_object_is_none() {
        assert_eq!(first_json_object("no json here"), None);
        assert_eq!(first_json_object(r#"{"never": "closed""#), None);
    }
}
