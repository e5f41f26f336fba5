//! Logical events produced by the tree watcher.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WatcherError;

/// Kind of logical event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileWatcherEventKind {
    /// Entry was created.
    Created,

    /// File content changed, or a directory's listing changed.
    Modified,

    /// Entry was deleted.
    Deleted,
}

impl std::fmt::Display for FileWatcherEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// A classified change to an entry under a watched root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWatcherEvent {
    /// The kind of event.
    pub kind: FileWatcherEventKind,

    /// The watched root directory.
    pub root: PathBuf,

    /// Path relative to the root. Empty for the root itself.
    pub path: PathBuf,

    /// Whether the entry is (or was, for deletions) a directory.
    pub is_directory: bool,

    /// When the event was classified.
    pub timestamp: DateTime<Utc>,
}

impl FileWatcherEvent {
    /// Create a new event.
    pub fn new(
        kind: FileWatcherEventKind,
        root: impl Into<PathBuf>,
        path: impl Into<PathBuf>,
        is_directory: bool,
    ) -> Self {
        Self {
            kind,
            root: root.into(),
            path: path.into(),
            is_directory,
            timestamp: Utc::now(),
        }
    }

    /// Absolute path of the affected entry.
    pub fn absolute_path(&self) -> PathBuf {
        self.root.join(&self.path)
    }
}

/// Receiver of raw watcher notifications.
///
/// All methods are called on the watcher's background thread. A slow
/// implementation delays processing of every later native event, so
/// implementations should hand work off rather than block.
pub trait FileWatcherEventSink: Send + Sync {
    /// Initial registration of the tree under `root` has completed.
    fn started(&self, _root: &Path) {}

    /// A recoverable watcher failure occurred under `root`.
    fn error_occurred(&self, _root: &Path, _error: &WatcherError) {}

    /// A logical event was classified.
    fn handle_event(&self, event: &FileWatcherEvent);
}
