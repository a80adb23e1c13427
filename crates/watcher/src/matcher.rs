//! Filename glob matching

use dropzone_core::{Error, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::ffi::OsStr;

/// Compiled set of filename patterns
///
/// An empty pattern list matches every name.
#[derive(Debug, Clone)]
pub struct NameMatcher {
    set: GlobSet,
    patterns: Vec<String>,
}

impl NameMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns: Vec<String> = if patterns.is_empty() {
            vec!["*".to_string()]
        } else {
            patterns.iter().map(|p| p.as_ref().to_string()).collect()
        };

        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| Error::Config(format!("invalid glob pattern {:?}: {}", pattern, e)))?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| Error::Config(format!("cannot compile glob patterns: {}", e)))?;

        Ok(Self { set, patterns })
    }

    /// True if `name` (a bare file name) matches any pattern
    pub fn is_match(&self, name: &OsStr) -> bool {
        self.set.is_match(name)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(patterns: &[&str], name: &str) -> bool {
        NameMatcher::new(patterns).unwrap().is_match(OsStr::new(name))
    }

    #[test]
    fn test_empty_patterns_match_everything() {
        assert!(matches(&[], "a.xml"));
        assert!(matches(&[], ".hidden"));
    }

    #[test]
    fn test_extension_pattern() {
        assert!(matches(&["*.xml"], "a.xml"));
        assert!(!matches(&["*.xml"], "a.xml.tmp"));
        assert!(!matches(&["*.xml"], "a.txt"));
    }

    #[test]
    fn test_any_of_several_patterns() {
        assert!(matches(&["report_*.xml", "*.XML"], "report_1.xml"));
        assert!(matches(&["report_*.xml", "*.XML"], "B.XML"));
        assert!(!matches(&["report_*.xml", "*.XML"], "b.xml"));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        assert!(matches!(NameMatcher::new(&["a[b"]), Err(Error::Config(_))));
    }
}
