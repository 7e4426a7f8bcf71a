use crate::{AgentError, Result};
use serde::de::DeserializeOwned;

const PREVIEW_CHARS: usize = 300;

/// Extracts and decodes the JSON object embedded in a model reply.
///
/// Strips ```` ```json ```` fences, then falls back to the span between the first `{` and the
/// last `}` when prose surrounds the object.
pub fn parse_json_response<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let candidate = strip_fences(raw);
    let first_error = match serde_json::from_str::<T>(candidate) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    if let Some(sliced) = slice_object(candidate) {
        if sliced.len() != candidate.len() {
            if let Ok(value) = serde_json::from_str::<T>(sliced) {
                return Ok(value);
            }
        }
    }

    Err(AgentError::ParseFailure {
        reason: first_error.to_string(),
        preview: preview(raw),
    })
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

fn slice_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn preview(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() <= PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(PREVIEW_CHARS).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reply {
        findings: Vec<String>,
    }

    #[test]
    fn plain_json() {
        let reply: Reply = parse_json_response(r#"{"findings":["a"]}"#).expect("parse");
        assert_eq!(reply.findings, vec!["a"]);
    }

    #[test]
    fn fenced_json() {
        let raw = "```json\n{\"findings\": [\"a\", \"b\"]}\n```";
        let reply: Reply = parse_json_response(raw).expect("parse");
        assert_eq!(reply.findings.len(), 2);
    }

    #[test]
    fn prose_around_object() {
        let raw = "Here is the analysis:\n{\"findings\": []}\nLet me know if you need more.";
        let reply: Reply = parse_json_response(raw).expect("parse");
        assert!(reply.findings.is_empty());
    }

    #[test]
    fn failure_carries_preview() {
        let err = parse_json_response::<Reply>("not json at all").expect_err("fails");
        match err {
            AgentError::ParseFailure { preview, .. } => assert_eq!(preview, "not json at all"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
