//! Provider response decoding.
//!
//! Providers wrap their verdicts in prose, markdown fences or apologies.
//! Decoding extracts the first balanced JSON object before parsing, and a
//! parse failure is a protected-call failure, never a crash.

use super::Category;
use crate::{Error, Result};
use serde::Deserialize;

/// Decoded provider verdict, before pipeline annotation.
#[derive(Debug, Clone, Deserialize)]
pub struct Verdict {
    pub category: Category,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Slice out the first balanced `{ ... }` object, honoring string literals
/// and escapes so braces inside values do not truncate the payload.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
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

/// Decode a raw provider response into a [`Verdict`].
pub fn parse_verdict(raw: &str) -> Result<Verdict> {
    let payload = extract_json_object(raw).ok_or_else(|| Error::MalformedResponse {
        message: "no JSON object in provider response".into(),
    })?;
    let mut verdict: Verdict =
        serde_json::from_str(payload).map_err(|e| Error::MalformedResponse {
            message: format!("undecodable verdict: {}", e),
        })?;
    verdict.confidence = verdict.confidence.clamp(0.0, 1.0);
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_object() {
        let raw = r#"{"category":"image_generation","confidence":0.9}"#;
        assert_eq!(extract_json_object(raw), Some(raw));
    }

    #[test]
    fn extracts_object_from_prose_and_fences() {
        let raw = "Sure! Here is the classification:\n```json\n{\"category\":\"image_edit\",\"confidence\":0.8,\"reasoning\":\"user said remove {background}\"}\n```\nHope that helps.";
        let verdict = parse_verdict(raw).unwrap();
        assert_eq!(verdict.category, Category::ImageEdit);
        assert!(verdict.reasoning.contains("{background}"));
    }

    #[test]
    fn braces_inside_strings_do_not_truncate() {
        let raw = r#"{"category":"conversation","confidence":0.5,"reasoning":"nested {a{b}c} braces"}"#;
        let extracted = extract_json_object(raw).unwrap();
        assert_eq!(extracted, raw);
    }

    #[test]
    fn missing_object_is_malformed() {
        let err = parse_verdict("I could not classify that.").unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn unknown_category_is_malformed() {
        let raw = r#"{"category":"interpretive_dance","confidence":0.9}"#;
        assert!(matches!(
            parse_verdict(raw),
            Err(Error::MalformedResponse { .. })
        ));
    }

    #[test]
    fn confidence_is_clamped() {
        let raw = r#"{"category":"conversation","confidence":3.7}"#;
        let verdict = parse_verdict(raw).unwrap();
        assert!((verdict.confidence - 1.0).abs() < f64::EPSILON);
        let raw = r#"{"category":"conversation","confidence":-2.0}"#;
        assert_eq!(parse_verdict(raw).unwrap().confidence, 0.0);
    }

    #[test]
    fn unbalanced_object_is_malformed() {
        assert!(extract_json_object("{\"category\": \"conversation\"").is_none());
    }
}
