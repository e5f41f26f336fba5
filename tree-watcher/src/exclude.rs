//! Exclusion patterns for watched paths.

use std::path::{Component, Path};
use std::sync::{PoisonError, RwLock};

use globset::{Glob, GlobMatcher};
use tracing::debug;

use crate::error::{Result, WatcherError};

/// A compiled exclude pattern.
#[derive(Debug, Clone)]
struct ExcludePattern {
    source: String,
    matcher: GlobMatcher,
}

/// A set of glob patterns that suppress watch registration and event delivery.
///
/// A pattern matches a relative path if it matches the whole path or any
/// single segment of it, so `node_modules` excludes that directory anywhere
/// in the tree and `*.tmp` excludes every file with that suffix.
///
/// Patterns may be added and removed from any thread while a watcher is
/// running; every check sees the pattern set current at that moment.
#[derive(Debug, Default)]
pub struct ExclusionMatcher {
    patterns: RwLock<Vec<ExcludePattern>>,
}

impl ExclusionMatcher {
    /// Create an empty matcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a matcher from a list of patterns.
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let matcher = Self::new();
        for pattern in patterns {
            matcher.add_pattern(pattern.as_ref())?;
        }
        Ok(matcher)
    }

    /// Add a pattern. Adding a pattern that is already present is a no-op.
    pub fn add_pattern(&self, pattern: &str) -> Result<()> {
        let glob = Glob::new(pattern).map_err(|source| WatcherError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        let mut patterns = self.patterns.write().unwrap_or_else(PoisonError::into_inner);
        if patterns.iter().any(|p| p.source == pattern) {
            return Ok(());
        }
        patterns.push(ExcludePattern {
            source: pattern.to_string(),
            matcher: glob.compile_matcher(),
        });
        debug!("Added exclude pattern: {pattern}");
        Ok(())
    }

    /// Remove a pattern. Returns whether it was present.
    pub fn remove_pattern(&self, pattern: &str) -> bool {
        let mut patterns = self.patterns.write().unwrap_or_else(PoisonError::into_inner);
        let before = patterns.len();
        patterns.retain(|p| p.source != pattern);
        let removed = patterns.len() != before;
        if removed {
            debug!("Removed exclude pattern: {pattern}");
        }
        removed
    }

    /// Get the current patterns in insertion order.
    pub fn patterns(&self) -> Vec<String> {
        self.patterns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|p| p.source.clone())
            .collect()
    }

    /// Check if a path relative to the watched root is excluded.
    ///
    /// The root itself (an empty path) is never excluded.
    pub fn is_excluded(&self, relative: &Path) -> bool {
        if relative.as_os_str().is_empty() {
            return false;
        }

        let patterns = self.patterns.read().unwrap_or_else(PoisonError::into_inner);
        if patterns.is_empty() {
            return false;
        }

        let segments: Vec<&Path> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(segment) => Some(Path::new(segment)),
                _ => None,
            })
            .collect();

        patterns.iter().any(|p| {
            p.matcher.is_match(relative) || segments.iter().any(|s| p.matcher.is_match(s))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_segment_match_anywhere() {
        let matcher = ExclusionMatcher::from_patterns(["excluded"]).unwrap();

        assert!(matcher.is_excluded(Path::new("excluded")));
        assert!(matcher.is_excluded(Path::new("a/excluded/b.txt")));
        assert!(matcher.is_excluded(Path::new("a/b/excluded")));
        assert!(!matcher.is_excluded(Path::new("a/not_excluded/b.txt")));
        assert!(!matcher.is_excluded(Path::new("a/b.txt")));
    }

    #[test]
    fn test_suffix_class() {
        let matcher = ExclusionMatcher::from_patterns(["*.tmp"]).unwrap();

        assert!(matcher.is_excluded(Path::new("scratch.tmp")));
        assert!(matcher.is_excluded(Path::new("deep/dir/scratch.tmp")));
        assert!(!matcher.is_excluded(Path::new("deep/dir/scratch.txt")));
    }

    #[test]
    fn test_full_path_pattern() {
        let matcher = ExclusionMatcher::from_patterns(["build/generated/**"]).unwrap();

        assert!(matcher.is_excluded(Path::new("build/generated/a.rs")));
        assert!(!matcher.is_excluded(Path::new("build/a.rs")));
    }

    #[test]
    fn test_root_never_excluded() {
        let matcher = ExclusionMatcher::from_patterns(["*"]).unwrap();
        assert!(!matcher.is_excluded(Path::new("")));
    }

    #[test]
    fn test_add_and_remove_patterns() {
        let matcher = ExclusionMatcher::new();
        assert!(!matcher.is_excluded(Path::new("logs/out.log")));

        matcher.add_pattern("logs").unwrap();
        matcher.add_pattern("logs").unwrap();
        assert_eq!(matcher.patterns(), vec!["logs".to_string()]);
        assert!(matcher.is_excluded(Path::new("logs/out.log")));

        assert!(matcher.remove_pattern("logs"));
        assert!(!matcher.remove_pattern("logs"));
        assert!(!matcher.is_excluded(Path::new("logs/out.log")));
    }

    #[test]
    fn test_invalid_pattern() {
        let matcher = ExclusionMatcher::new();
        let err = matcher.add_pattern("a[").unwrap_err();
        assert!(matches!(err, WatcherError::InvalidPattern { .. }));
    }
}
