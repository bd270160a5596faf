//! Pulling JSON payloads out of model response text.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::LazyLock;

use super::errors::MalformedResponse;

static FENCED_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("valid regex")
});

/// Returns the JSON object embedded in a response.
///
/// Prefers a fenced code block, then the outermost brace pair.
#[must_use]
pub fn extract_json_object(text: &str) -> Option<&str> {
    if let Some(caps) = FENCED_BLOCK_RE.captures(text) {
        if let Some(m) = caps.get(1) {
            return Some(m.as_str());
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Deserializes the JSON object embedded in `text` into `T`.
pub fn parse_payload<T: DeserializeOwned>(text: &str, shape: &str) -> Result<T, MalformedResponse> {
    let json = extract_json_object(text).ok_or(MalformedResponse::NoJson)?;
    serde_json::from_str(json).map_err(|e| MalformedResponse::shape(shape, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Probe {
        name: String,
    }

    #[test]
    fn test_bare_object() {
        let probe: Probe = parse_payload(r#"{"name":"doom"}"#, "probe").unwrap();
        assert_eq!(probe.name, "doom");
    }

    #[test]
    fn test_fenced_block_with_prose() {
        let text = "Here you go:\n```json\n{\"name\": \"storm\"}\n```\nAnything else?";
        assert_eq!(extract_json_object(text), Some("{\"name\": \"storm\"}"));
        let probe: Probe = parse_payload(text, "probe").unwrap();
        assert_eq!(probe.name, "storm");
    }

    #[test]
    fn test_surrounding_prose_without_fence() {
        let text = "Sure! {\"name\": \"logan\"} Hope that helps.";
        let probe: Probe = parse_payload(text, "probe").unwrap();
        assert_eq!(probe.name, "logan");
    }

    #[test]
    fn test_no_json() {
        let err = parse_payload::<Probe>("I cannot help with that.", "probe").unwrap_err();
        assert_eq!(err, MalformedResponse::NoJson);
    }

    #[test]
    fn test_wrong_shape() {
        let err = parse_payload::<Probe>(r#"{"title":"x"}"#, "probe").unwrap_err();
        assert!(matches!(err, MalformedResponse::Shape { ref shape, .. } if shape == "probe"));
    }
}
