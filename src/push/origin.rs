//! Origin allowlist for the `/ws` upgrade (spec.md §4.E): exact strings and
//! `regex::Regex` patterns, checked before `on_upgrade`.

use regex::Regex;

pub struct OriginAllowlist {
    exact: Vec<String>,
    patterns: Vec<Regex>,
}

impl OriginAllowlist {
    /// Patterns that fail to compile are dropped with a warning rather than
    /// failing startup — a typo in one pattern shouldn't take down the
    /// whole allowlist.
    pub fn new(exact: &[String], patterns: &[String]) -> Self {
        let compiled = patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "invalid origin pattern, ignoring");
                    None
                }
            })
            .collect();
        Self { exact: exact.to_vec(), patterns: compiled }
    }

    /// An empty allowlist (no exact strings, no patterns) allows everything
    /// — the default for local development where no origins are configured.
    pub fn is_allowed(&self, origin: &str) -> bool {
        if self.exact.is_empty() && self.patterns.is_empty() {
            return true;
        }
        if self.exact.iter().any(|o| o == origin) {
            return true;
        }
        self.patterns.iter().any(|re| re.is_match(origin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allowlist_allows_any_origin() {
        let allowlist = OriginAllowlist::new(&[], &[]);
        assert!(allowlist.is_allowed("https://anything.example"));
    }

    #[test]
    fn exact_match_is_allowed() {
        let allowlist = OriginAllowlist::new(&["https://app.example.com".to_string()], &[]);
        assert!(allowlist.is_allowed("https://app.example.com"));
        assert!(!allowlist.is_allowed("https://evil.example.com"));
    }

    #[test]
    fn pattern_match_is_allowed() {
        let allowlist = OriginAllowlist::new(&[], &[r"^https://.*\.example\.com$".to_string()]);
        assert!(allowlist.is_allowed("https://staging.example.com"));
        assert!(!allowlist.is_allowed("https://example.org"));
    }

    #[test]
    fn invalid_pattern_is_ignored_not_fatal() {
        let allowlist = OriginAllowlist::new(&[], &["(unclosed".to_string()]);
        assert!(!allowlist.is_allowed("https://anything.example"));
    }
}
