//! Configuration types for tree watching.

use serde::{Deserialize, Serialize};

/// Configuration for a [`TreeWatcher`](crate::TreeWatcher).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Patterns to exclude (glob patterns matched against path segments).
    pub exclude_patterns: Vec<String>,

    /// Whether to follow symbolic links to directories.
    pub follow_symlinks: bool,

    /// Name of the background processing thread.
    pub thread_name: String,
}

impl WatcherConfig {
    /// Create a new watcher config with the default exclusions.
    pub fn new() -> Self {
        Self {
            exclude_patterns: Self::default_excludes(),
            follow_symlinks: false,
            thread_name: "vfs-tree-watcher".to_string(),
        }
    }

    /// Create a config without any exclusions.
    pub fn without_excludes() -> Self {
        Self {
            exclude_patterns: Vec::new(),
            ..Self::new()
        }
    }

    /// Add an exclude pattern.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    /// Enable following symbolic links.
    pub fn follow_symlinks(mut self) -> Self {
        self.follow_symlinks = true;
        self
    }

    /// Set the processing thread name.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    fn default_excludes() -> Vec<String> {
        vec![
            // Version control metadata
            ".git".to_string(),
            ".svn".to_string(),
            ".hg".to_string(),
            // Editor swap files
            "*.swp".to_string(),
            "*~".to_string(),
        ]
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self::new()
    }
}
