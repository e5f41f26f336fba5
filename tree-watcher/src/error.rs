//! Error types for the tree watcher.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur in the tree watcher.
///
/// Everything except [`WatcherError::RootNotFound`] and
/// [`WatcherError::InvalidPattern`] is reported to the event sink through
/// `error_occurred` instead of being returned, and the watcher keeps running.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Root directory not found.
    #[error("root directory not found: {0}")]
    RootNotFound(PathBuf),

    /// Invalid exclude pattern.
    #[error("invalid exclude pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// A directory could not be registered for watching.
    #[error("failed to watch {path}: {source}")]
    WatchSetup {
        path: PathBuf,
        #[source]
        source: Box<WatcherError>,
    },

    /// The native notification source dropped events.
    #[error("event queue overflow, rescanning {0}")]
    Overflow(PathBuf),

    /// The watched root itself was removed.
    #[error("watched root was removed: {0}")]
    RootRemoved(PathBuf),

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// Directory walk error.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The background processing thread could not be started.
    #[error("failed to spawn watcher thread: {0}")]
    Spawn(String),
}

impl WatcherError {
    pub(crate) fn watch_setup(path: impl Into<PathBuf>, source: impl Into<WatcherError>) -> Self {
        Self::WatchSetup {
            path: path.into(),
            source: Box::new(source.into()),
        }
    }

    /// Whether this error came from the native notification source.
    pub fn is_native_source_error(&self) -> bool {
        matches!(self, Self::Overflow(_) | Self::Notify(_))
    }
}
