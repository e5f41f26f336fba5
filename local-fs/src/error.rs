//! Error types for the local file system.

use std::path::PathBuf;

use thiserror::Error;
use vfs_tree_watcher::WatcherError;

/// Result type alias for file system operations.
pub type Result<T> = std::result::Result<T, VfsError>;

/// Errors that can occur in the local file system.
#[derive(Error, Debug)]
pub enum VfsError {
    /// Item not found.
    #[error("item not found: {0}")]
    NotFound(PathBuf),

    /// Item already exists.
    #[error("item already exists: {0}")]
    AlreadyExists(PathBuf),

    /// Operation requires a file.
    #[error("not a file: {0}")]
    NotAFile(PathBuf),

    /// Operation requires a folder.
    #[error("not a folder: {0}")]
    NotAFolder(PathBuf),

    /// Path is malformed or points outside the root.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// File is locked and no matching token was supplied.
    #[error("item is locked: {0}")]
    Locked(PathBuf),

    /// File is not locked.
    #[error("file is not locked: {0}")]
    NotLocked(PathBuf),

    /// Lock token does not match.
    #[error("lock token does not match for: {0}")]
    InvalidLockToken(PathBuf),

    /// Locking is allowed for files only.
    #[error("locking allowed for files only: {0}")]
    LockOnFolder(PathBuf),

    /// A copy or move target lies on or inside its own source.
    #[error("cannot copy or move an item into itself: {0}")]
    InvalidDestination(PathBuf),

    /// The file system or its search index has been closed.
    #[error("file system is closed")]
    Closed,

    /// A side-car record could not be decoded.
    #[error("corrupt side-car record {path}: {source}")]
    Codec {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    /// Tree watcher error.
    #[error("watcher error: {0}")]
    Watcher(#[from] WatcherError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the binary side-car codecs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended inside a field.
    #[error("unexpected end of input reading {field}: needed {needed} bytes, {remaining} left")]
    UnexpectedEof {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    /// A string field is not valid UTF-8.
    #[error("invalid utf-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    /// A count field is negative.
    #[error("negative count {count} for {field}")]
    NegativeCount { field: &'static str, count: i32 },

    /// A string is too long for its 16-bit length prefix.
    #[error("{field} is {len} bytes, longer than the 65535 byte limit")]
    StringTooLong { field: &'static str, len: usize },

    /// A count does not fit the 32-bit count field.
    #[error("too many {field}: {count}")]
    CountTooLarge { field: &'static str, count: usize },
}
