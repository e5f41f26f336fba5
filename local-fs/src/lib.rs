//! # Local File System
//!
//! A file tree rooted at one directory, with per-item properties and file
//! locks stored in binary side-car records, change notifications from a
//! [`TreeWatcher`](vfs_tree_watcher::TreeWatcher) and a search index that
//! follows them.
//!
//! ## Features
//!
//! - **Side-car records**: properties and locks live in `.vfs/` next to each item
//! - **Lock tokens**: locked files accept changes only with the matching token
//! - **Notifications**: raw events and resolved item events, each with their own subscribers
//! - **Search**: case-insensitive path search over every indexed file
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        LocalFileSystem                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  TreeWatcher ──► NotificationHandler ──► FileWatcherListener(s)  │
//! │                         │                        │               │
//! │                         ▼                        ▼               │
//! │                     ItemCache           SearchIndexUpdater       │
//! │                                                  │               │
//! │  MetadataCodec / LockCodec ◄── side-car records  ▼               │
//! │                                             SearchIndex          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod file_system;
pub mod item;
pub mod notification;
pub mod provider;
pub mod search;
mod sidecar;

pub use codec::{LockCodec, LockRecord, MetadataCodec};
pub use config::FileSystemConfig;
pub use error::{CodecError, Result, VfsError};
pub use file_system::{CloseCallback, LOCK_TOKEN_LENGTH, LocalFileSystem, PropertyUpdates};
pub use item::{ItemCache, ItemKind, ItemResolver, VirtualFile, normalize_path};
pub use notification::{FileWatcherListener, ListenerId, NotificationHandler};
pub use provider::LocalFileSystemProvider;
pub use search::{IndexResult, IndexStats, IndexedFile, SearchIndex, SearchIndexUpdater};
pub use sidecar::SERVICE_DIR;
