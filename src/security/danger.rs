//! Dangerous-keyword detection for query strings and bodies.

use regex::bytes::Regex;

/// Case-insensitive, whole-word SQL and shell keywords.
pub const DANGER_PATTERN: &str = r"(?i-u)\b(shell|exec|select|update|delete|insert|truncate|trancate|char|chr|substr|ascii|declare|master|drop|execute)\b";

/// Precompiled keyword matcher.
///
/// If the pattern fails to compile the filter is disabled and never
/// matches: keyword screening fails open.
pub struct DangerFilter {
    pattern: Option<Regex>,
}

impl DangerFilter {
    /// Build a filter from `pattern`, disabling it on compile failure.
    pub fn compile(pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(regex) => Self {
                pattern: Some(regex),
            },
            Err(e) => {
                tracing::error!(error = %e, "Danger keyword pattern failed to compile, keyword screening disabled");
                Self { pattern: None }
            }
        }
    }

    #[cfg(test)]
    fn is_enabled(&self) -> bool {
        self.pattern.is_some()
    }

    /// Whether `haystack` contains a dangerous keyword.
    pub fn matches(&self, haystack: &[u8]) -> bool {
        self.pattern
            .as_ref()
            .is_some_and(|regex| regex.is_match(haystack))
    }
}

impl Default for DangerFilter {
    fn default() -> Self {
        Self::compile(DANGER_PATTERN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_whole_words_any_case() {
        let filter = DangerFilter::default();
        assert!(filter.is_enabled());
        assert!(filter.matches(b"id=1 UNION SELECT password"));
        assert!(filter.matches(b"q=Drop+table"));
        assert!(filter.matches(b"cmd=exec"));
        assert!(filter.matches(b"a=1;delete"));
    }

    #[test]
    fn test_ignores_embedded_words() {
        let filter = DangerFilter::default();
        assert!(!filter.matches(b"package=com.app&_platform=ios"));
        assert!(!filter.matches(b"name=selection&mode=updated"));
        assert!(!filter.matches(b"executor=bob"));
    }

    #[test]
    fn test_non_utf8_body() {
        let filter = DangerFilter::default();
        assert!(filter.matches(b"\xff\xfe select \x00"));
        assert!(!filter.matches(b"\xff\xfe\x00"));
    }

    #[test]
    fn test_bad_pattern_fails_open() {
        let filter = DangerFilter::compile("(unclosed");
        assert!(!filter.is_enabled());
        assert!(!filter.matches(b"select * from users"));
    }
}
