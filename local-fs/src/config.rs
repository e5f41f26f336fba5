//! Configuration for the local file system.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use vfs_tree_watcher::WatcherConfig;

/// Configuration for a [`LocalFileSystem`](crate::LocalFileSystem).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSystemConfig {
    /// Root directory.
    pub root: PathBuf,

    /// Tree watcher settings. The side-car service directory is always
    /// excluded on top of these.
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Start watching when the file system is created.
    #[serde(default = "default_true")]
    pub watch_on_start: bool,

    /// Maintain a search index.
    #[serde(default = "default_true")]
    pub search_index: bool,
}

fn default_true() -> bool {
    true
}

impl FileSystemConfig {
    /// Create a configuration for `root` with default settings.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            watcher: WatcherConfig::default(),
            watch_on_start: true,
            search_index: true,
        }
    }

    /// Replace the watcher settings.
    pub fn with_watcher(mut self, watcher: WatcherConfig) -> Self {
        self.watcher = watcher;
        self
    }

    /// Add an exclude pattern to the watcher settings.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.watcher = self.watcher.exclude(pattern);
        self
    }

    /// Do not start the watcher on creation.
    pub fn without_watching(mut self) -> Self {
        self.watch_on_start = false;
        self
    }

    /// Do not maintain a search index.
    pub fn without_search_index(mut self) -> Self {
        self.search_index = false;
        self
    }
}
