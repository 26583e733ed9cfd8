//! Deterministic local classifier.
//!
//! The last line of defense: whenever the provider path fails (rate limit,
//! open circuit, exhausted retries, malformed payload), this classifier
//! inspects the input for known keyword families and the context for edit
//! flags, and always returns a best-effort category with reduced confidence.
//! No randomness, no failure modes.

use super::{Category, ClassificationResult, RequestContext};
use once_cell::sync::Lazy;

/// Confidence for a keyword-family match on the fallback path.
const MATCH_CONFIDENCE: f64 = 0.6;
/// Confidence for the safe default when nothing matches.
const DEFAULT_CONFIDENCE: f64 = 0.3;

static IMAGE_EDIT_HINTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "edit", "change", "remove", "replace", "crop", "resize", "retouch", "erase",
        "recolor", "brighten", "darken", "background",
    ]
});

static IMAGE_GEN_HINTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "draw", "paint", "sketch", "illustrate", "generate an image", "generate a picture",
        "create an image", "create a picture", "make an image", "make a picture", "render",
        "logo", "wallpaper",
    ]
});

static PRODUCT_HINTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "price", "buy", "purchase", "order", "in stock", "product", "catalog", "shipping",
        "discount", "how much",
    ]
});

fn matches_any(input: &str, hints: &[&str]) -> bool {
    hints.iter().any(|hint| input.contains(hint))
}

/// Classify locally, never failing. `cause` names why the fallback ran and is
/// surfaced in the reasoning string.
pub fn classify(input: &str, context: &RequestContext, cause: &str) -> ClassificationResult {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return ClassificationResult {
            category: Category::Conversation,
            confidence: DEFAULT_CONFIDENCE,
            reasoning: format!("fallback ({}): empty input, safe default", cause),
            used_fallback: true,
            cache_hit: false,
        };
    }

    let lowered = trimmed.to_lowercase();

    // An active image being edited biases edit-family keywords hard; "remove
    // the background" means nothing without an image to edit.
    let (category, matched) = if context.active_image && matches_any(&lowered, &IMAGE_EDIT_HINTS) {
        (Category::ImageEdit, "edit keywords with active image")
    } else if matches_any(&lowered, &IMAGE_GEN_HINTS) {
        (Category::ImageGeneration, "image generation keywords")
    } else if matches_any(&lowered, &PRODUCT_HINTS) {
        (Category::ProductLookup, "product keywords")
    } else {
        (Category::Conversation, "no keyword family matched")
    };

    let confidence = if category == Category::Conversation && matched == "no keyword family matched"
    {
        DEFAULT_CONFIDENCE
    } else {
        MATCH_CONFIDENCE
    };

    ClassificationResult {
        category,
        confidence,
        reasoning: format!("fallback ({}): {}", cause, matched),
        used_fallback: true,
        cache_hit: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_context() -> RequestContext {
        RequestContext::default()
    }

    fn with_active_image() -> RequestContext {
        RequestContext {
            active_image: true,
            ..Default::default()
        }
    }

    #[test]
    fn deterministic_for_same_input() {
        let a = classify("draw a red fox", &no_context(), "test");
        let b = classify("draw a red fox", &no_context(), "test");
        assert_eq!(a.category, b.category);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.reasoning, b.reasoning);
    }

    #[test]
    fn image_generation_keywords() {
        let result = classify("please draw a castle at sunset", &no_context(), "test");
        assert_eq!(result.category, Category::ImageGeneration);
        assert!(result.used_fallback);
        assert!(result.confidence < 0.7);
    }

    #[test]
    fn edit_keywords_require_active_image() {
        let without = classify("remove the background", &no_context(), "test");
        assert_ne!(without.category, Category::ImageEdit);
        let with = classify("remove the background", &with_active_image(), "test");
        assert_eq!(with.category, Category::ImageEdit);
    }

    #[test]
    fn product_keywords() {
        let result = classify("how much is the blue lamp", &no_context(), "test");
        assert_eq!(result.category, Category::ProductLookup);
    }

    #[test]
    fn empty_input_is_safe_default() {
        let result = classify("   ", &no_context(), "rate limited");
        assert_eq!(result.category, Category::Conversation);
        assert!(result.reasoning.contains("rate limited"));
        assert!(result.reasoning.contains("empty input"));
    }

    #[test]
    fn adversarial_input_never_panics() {
        for input in [
            "\u{0}\u{1}\u{2}",
            "💥💥💥",
            &"a".repeat(100_000),
            "{\"category\": \"evil\"}",
            "\\\\\\\"''",
        ] {
            let result = classify(input, &no_context(), "test");
            assert!(result.used_fallback);
            assert!(result.confidence > 0.0 && result.confidence <= 1.0);
        }
    }

    #[test]
    fn cause_is_named_in_reasoning() {
        let result = classify("hello", &no_context(), "circuit open");
        assert!(result.reasoning.contains("circuit open"));
    }
}
