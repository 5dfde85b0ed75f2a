//! Hostname matching against the configured redirect domains

/// One entry of the `redirect_domains` list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainPattern {
    /// Hostname must equal this value
    Exact(String),
    /// Hostname must be this domain or one of its subdomains
    WildcardSuffix(String),
}

impl DomainPattern {
    /// Parse a configured pattern. Blank patterns yield `None`.
    ///
    /// `*.example.com` and `.example.com` are both wildcard-suffix patterns
    /// for `example.com`; anything else is an exact host.
    pub fn parse(pattern: &str) -> Option<Self> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return None;
        }

        if let Some(suffix) = pattern.strip_prefix("*.") {
            Some(DomainPattern::WildcardSuffix(suffix.to_string()))
        } else if let Some(suffix) = pattern.strip_prefix('.') {
            Some(DomainPattern::WildcardSuffix(suffix.to_string()))
        } else {
            Some(DomainPattern::Exact(pattern.to_string()))
        }
    }

    /// Check a hostname against this pattern. Comparison is exact, including case.
    pub fn matches(&self, hostname: &str) -> bool {
        match self {
            DomainPattern::Exact(host) => hostname == host.as_str(),
            DomainPattern::WildcardSuffix(suffix) => {
                if suffix.is_empty() {
                    return false;
                }
                match hostname.strip_suffix(suffix.as_str()) {
                    Some("") => true,
                    Some(rest) => rest.ends_with('.'),
                    None => false,
                }
            }
        }
    }
}

/// Ordered list of domain patterns
#[derive(Debug, Clone, Default)]
pub struct DomainMatcher {
    patterns: Vec<DomainPattern>,
}

impl DomainMatcher {
    /// Compile the configured domain list, dropping blank entries
    pub fn new<S: AsRef<str>>(domains: &[S]) -> Self {
        Self {
            patterns: domains
                .iter()
                .filter_map(|d| DomainPattern::parse(d.as_ref()))
                .collect(),
        }
    }

    /// True if any pattern matches the hostname; first match wins
    pub fn matches(&self, hostname: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(hostname))
    }

    pub fn patterns(&self) -> &[DomainPattern] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Check a hostname against a raw pattern list without compiling it first
pub fn matches<S: AsRef<str>>(hostname: &str, patterns: &[S]) -> bool {
    patterns
        .iter()
        .filter_map(|p| DomainPattern::parse(p.as_ref()))
        .any(|p| p.matches(hostname))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_report;

    #[test]
    fn test_exact_match() {
        let t = test_report!("Exact pattern requires equality");
        let m = DomainMatcher::new(&["api.example.com"]);
        t.assert_true("same host", m.matches("api.example.com"));
        t.assert_true("other subdomain", !m.matches("www.example.com"));
        t.assert_true("parent domain", !m.matches("example.com"));
        t.assert_true("longer host", !m.matches("x.api.example.com"));
    }

    #[test]
    fn test_star_dot_wildcard() {
        let t = test_report!("*.suffix matches domain and subdomains");
        let m = DomainMatcher::new(&["*.example.com"]);
        t.assert_true("subdomain", m.matches("api.example.com"));
        t.assert_true("nested subdomain", m.matches("a.b.example.com"));
        t.assert_true("bare domain", m.matches("example.com"));
        t.assert_true("unrelated", !m.matches("example.org"));
    }

    #[test]
    fn test_leading_dot_wildcard() {
        let t = test_report!(".suffix behaves like *.suffix");
        let m = DomainMatcher::new(&[".example.com"]);
        t.assert_true("subdomain", m.matches("cdn.example.com"));
        t.assert_true("bare domain", m.matches("example.com"));
        t.assert_eq(
            "parsed pattern",
            &m.patterns().to_vec(),
            &vec![DomainPattern::WildcardSuffix("example.com".to_string())],
        );
    }

    #[test]
    fn test_wildcard_requires_label_boundary() {
        let t = test_report!("Wildcard does not match across a label boundary");
        let m = DomainMatcher::new(&["*.example.com"]);
        t.assert_true("evilexample.com", !m.matches("evilexample.com"));
        t.assert_true("notexample.com", !m.matches("api.notexample.com"));
    }

    #[test]
    fn test_case_sensitive() {
        let t = test_report!("Matching compares case exactly");
        let m = DomainMatcher::new(&["*.example.com", "Host.Test"]);
        t.assert_true("wildcard upper host", !m.matches("API.EXAMPLE.COM"));
        t.assert_true("exact lower host", !m.matches("host.test"));
        t.assert_true("exact same case", m.matches("Host.Test"));
        t.assert_true("free fn", !matches("API.EXAMPLE.COM", &["*.example.com"]));
        t.assert_true("free fn lower", !matches("host.test", &["Host.Test"]));
    }

    #[test]
    fn test_blank_patterns_ignored() {
        let t = test_report!("Blank patterns never match");
        let m = DomainMatcher::new(&["", "   ", "\t"]);
        t.assert_true("no compiled patterns", m.is_empty());
        t.assert_true("empty host", !m.matches(""));
        t.assert_true("any host", !m.matches("example.com"));
    }

    #[test]
    fn test_bare_wildcards_match_nothing() {
        let t = test_report!("'*.' and '.' alone match nothing");
        let m = DomainMatcher::new(&["*.", "."]);
        t.assert_true("host", !m.matches("example.com"));
        t.assert_true("empty", !m.matches(""));
    }

    #[test]
    fn test_empty_list() {
        let t = test_report!("Empty pattern list matches nothing");
        let empty: [&str; 0] = [];
        t.assert_true("free fn", !matches("example.com", &empty));
        t.assert_true("matcher", !DomainMatcher::new(&empty).matches("example.com"));
    }

    #[test]
    fn test_any_pattern_in_list() {
        let t = test_report!("Later patterns are consulted after misses");
        let domains = vec![
            "one.test".to_string(),
            "".to_string(),
            "*.two.test".to_string(),
        ];
        t.assert_true("first", matches("one.test", &domains));
        t.assert_true("third", matches("x.two.test", &domains));
        t.assert_true("none", !matches("three.test", &domains));
    }
}
