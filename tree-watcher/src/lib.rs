//! # Tree Watcher
//!
//! This crate keeps a recursive set of per-directory watches over a workspace
//! root and classifies native file system notifications into logical
//! created/modified/deleted events.
//!
//! ## Features
//!
//! - **One watch per directory**: registrations follow the tree as it grows and shrinks
//! - **Race-free creation**: new directories are scanned right after their watch is installed
//! - **Exclusion Patterns**: glob patterns matched against every path segment
//! - **Parent notifications**: child creation/deletion marks the parent as modified
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Tree Watcher                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  notify ──► WatcherMessage ──► TreeState ──► FileWatcherEvent   │
//! │                                   │                │            │
//! │                                   ▼                ▼            │
//! │                         ExclusionMatcher   FileWatcherEventSink │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod exclude;
mod native;
mod tree;
pub mod watcher;

pub use config::WatcherConfig;
pub use error::{Result, WatcherError};
pub use event::{FileWatcherEvent, FileWatcherEventKind, FileWatcherEventSink};
pub use exclude::ExclusionMatcher;
pub use watcher::TreeWatcher;
