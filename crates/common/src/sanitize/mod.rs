//! Input validation for user-supplied query text
//!
//! Queries are rejected outright rather than rewritten: a query carrying
//! script markup is more likely an attack probe than a real question, and
//! silently stripping it would change what the user asked.

use regex_lite::Regex;
use std::sync::OnceLock;

fn xss_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)<script[^>]*>",
            r"(?i)</script>",
            r"(?i)<iframe[^>]*>",
            r"(?i)javascript\s*:",
            r"(?i)vbscript\s*:",
            r"(?i)\bon[a-z]+\s*=",
            r"(?i)<img[^>]+src[^>]*>",
            r"(?i)<object[^>]*>",
            r"(?i)<embed[^>]*>",
            r"(?i)expression\s*\(",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Whether the text contains disallowed control characters.
///
/// Tab, LF and CR are legitimate in pasted multi-line questions; every
/// other C0/C1 control character is rejected.
fn has_control_chars(text: &str) -> bool {
    text.chars().any(|c| c.is_control() && c != '\t' && c != '\n' && c != '\r')
}

/// Validate and normalize one user query.
///
/// Returns the trimmed query, or None when the input is empty after
/// trimming, carries control characters, or matches a script-injection
/// pattern.
pub fn validate_input(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if has_control_chars(trimmed) {
        return None;
    }

    if xss_patterns().iter().any(|p| p.is_match(trimmed)) {
        return None;
    }

    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_queries() {
        assert_eq!(validate_input("  how do I reset?  "), Some("how do I reset?".to_string()));
        assert_eq!(validate_input("如何使用知识库"), Some("如何使用知识库".to_string()));
        assert!(validate_input("line one\nline two").is_some());
    }

    #[test]
    fn test_rejects_empty_and_control_chars() {
        assert_eq!(validate_input("   "), None);
        assert_eq!(validate_input("hello\u{0}world"), None);
        assert_eq!(validate_input("bell\u{7}"), None);
    }

    #[test]
    fn test_rejects_script_injection() {
        assert_eq!(validate_input("<script>alert(1)</script>"), None);
        assert_eq!(validate_input("click javascript:alert(1)"), None);
        assert_eq!(validate_input("<div onclick=steal()>"), None);
        assert_eq!(validate_input("<IFRAME src=x>"), None);
    }

    #[test]
    fn test_markup_lookalikes_pass() {
        // Comparison operators and generics are not markup
        assert!(validate_input("is a < b when b > 0?").is_some());
        assert!(validate_input("what does Vec<String> mean").is_some());
    }
}
