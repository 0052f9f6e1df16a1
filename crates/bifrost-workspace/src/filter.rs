// Excluded-path filter for the watcher and reindex
//
// Built-in defaults cover VCS internals, scratch dirs and editor
// droppings; deployments extend the set through configuration.

use regex::RegexSet;

const DEFAULT_PATTERNS: &[&str] = &[
    r"(^|/)\.git(/|$)",
    r"(^|/)\.tmp(/|$)",
    r"(^|/)__pycache__(/|$)",
    r"(^|/)\.venv(/|$)",
    r"\.pyc$",
    r"(^|/)\.DS_Store$",
    r"~$",
    r"(^|/)\.#",
    r"(^|/)#[^/]*#$",
    r"\.sw[px]$",
];

#[derive(Clone)]
pub struct PathFilter {
    patterns: RegexSet,
}

impl PathFilter {
    /// Defaults plus any configured extra patterns. Invalid extras are
    /// dropped with a warning rather than failing node boot.
    pub fn new(extra_patterns: &[String]) -> Self {
        let mut all: Vec<String> = DEFAULT_PATTERNS.iter().map(|p| p.to_string()).collect();
        for pattern in extra_patterns {
            if regex::Regex::new(pattern).is_ok() {
                all.push(pattern.clone());
            } else {
                tracing::warn!(pattern, "ignoring invalid excluded-path pattern");
            }
        }

        let patterns = RegexSet::new(&all).expect("default patterns are valid");
        Self { patterns }
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.patterns.is_match(path)
    }
}

impl Default for PathFilter {
    fn default() -> Self {
        Self::new(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_exclusions() {
        let filter = PathFilter::default();
        assert!(filter.is_excluded(".git/HEAD"));
        assert!(filter.is_excluded("pkg/.tmp/scratch.py"));
        assert!(filter.is_excluded("workflows/__pycache__/hello.cpython-312.pyc"));
        assert!(filter.is_excluded("notes.py~"));
        assert!(filter.is_excluded("workflows/.#hello.py"));
        assert!(filter.is_excluded("hello.swp"));

        assert!(!filter.is_excluded("workflows/hello.py"));
        assert!(!filter.is_excluded("shared/helpers.py"));
        assert!(!filter.is_excluded("data/report.csv"));
    }

    #[test]
    fn extra_patterns_extend_defaults() {
        let filter = PathFilter::new(&[r"^generated/".to_string()]);
        assert!(filter.is_excluded("generated/out.py"));
        assert!(!filter.is_excluded("src/generated.py"));
    }

    #[test]
    fn invalid_extra_pattern_is_ignored() {
        let filter = PathFilter::new(&["([unclosed".to_string()]);
        assert!(!filter.is_excluded("workflows/hello.py"));
    }
}
