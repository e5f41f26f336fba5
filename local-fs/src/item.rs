//! Items of the local file system and their in-memory cache.

use std::collections::HashMap;
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vfs_tree_watcher::{FileWatcherEvent, FileWatcherEventKind};

use crate::error::{Result, VfsError};
use crate::sidecar::SERVICE_DIR;

/// Kind of item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    File,
    Folder,
}

/// A file or folder under the file system root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualFile {
    /// Path relative to the root. Empty for the root folder.
    pub path: PathBuf,

    /// Last path segment. Empty for the root folder.
    pub name: String,

    /// File or folder.
    pub kind: ItemKind,

    /// Content length in bytes. Zero for folders.
    pub length: u64,

    /// Last modification time, when known.
    pub last_modified: Option<DateTime<Utc>>,
}

impl VirtualFile {
    /// Build an item from file system metadata.
    pub fn from_metadata(path: impl Into<PathBuf>, metadata: &Metadata) -> Self {
        let path = path.into();
        let kind = if metadata.is_dir() {
            ItemKind::Folder
        } else {
            ItemKind::File
        };
        Self {
            name: item_name(&path),
            length: if metadata.is_dir() { 0 } else { metadata.len() },
            last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            path,
            kind,
        }
    }

    /// Build an item that exists in name only, such as one already deleted.
    pub fn detached(path: impl Into<PathBuf>, kind: ItemKind) -> Self {
        let path = path.into();
        Self {
            name: item_name(&path),
            path,
            kind,
            length: 0,
            last_modified: None,
        }
    }

    /// Check if the item is a file.
    pub fn is_file(&self) -> bool {
        self.kind == ItemKind::File
    }

    /// Check if the item is a folder.
    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    /// Check if the item is the root folder.
    pub fn is_root(&self) -> bool {
        self.path.as_os_str().is_empty()
    }

    /// Path relative to the root, with a leading `/`.
    pub fn display_path(&self) -> String {
        let mut display = String::from("/");
        display.push_str(&self.path.to_string_lossy().replace('\\', "/"));
        display
    }
}

fn item_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Turn a user supplied path into a path relative to the root.
///
/// Leading `/` and `.` segments are dropped. Parent segments, drive
/// prefixes and anything inside the service directory are rejected.
pub fn normalize_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(segment) if segment == SERVICE_DIR => {
                return Err(VfsError::InvalidPath(path.display().to_string()));
            }
            Component::Normal(segment) => normalized.push(segment),
            Component::ParentDir | Component::Prefix(_) => {
                return Err(VfsError::InvalidPath(path.display().to_string()));
            }
        }
    }
    Ok(normalized)
}

/// Resolves watcher events to items.
pub trait ItemResolver: Send + Sync {
    /// The item an event refers to, or `None` when it cannot be found.
    fn resolve(&self, event: &FileWatcherEvent) -> Option<VirtualFile>;
}

/// Last known items, keyed by relative path.
///
/// Created and modified events resolve from disk and refresh the cache.
/// Deleted events resolve from the cache, falling back to the watcher's
/// directory flag for items that were never looked up.
#[derive(Debug)]
pub struct ItemCache {
    root: PathBuf,
    items: RwLock<HashMap<PathBuf, VirtualFile>>,
}

impl ItemCache {
    /// Create an empty cache for `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            items: RwLock::new(HashMap::new()),
        }
    }

    /// Look up an item on disk and remember it.
    pub fn load(&self, path: &Path) -> Option<VirtualFile> {
        match std::fs::metadata(self.root.join(path)) {
            Ok(metadata) => {
                let item = VirtualFile::from_metadata(path, &metadata);
                self.remember(item.clone());
                Some(item)
            }
            Err(_) => {
                self.forget(path);
                None
            }
        }
    }

    /// Remember an item.
    pub fn remember(&self, item: VirtualFile) {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item.path.clone(), item);
    }

    /// Forget an item and everything beneath it. Returns the cached item.
    pub fn forget(&self, path: &Path) -> Option<VirtualFile> {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        let removed = items.remove(path);
        if !path.as_os_str().is_empty() {
            items.retain(|cached, _| !cached.starts_with(path));
        }
        removed
    }

    /// A cached item.
    pub fn get(&self, path: &Path) -> Option<VirtualFile> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    /// Drop every cached item.
    pub fn clear(&self) {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl ItemResolver for ItemCache {
    fn resolve(&self, event: &FileWatcherEvent) -> Option<VirtualFile> {
        match event.kind {
            FileWatcherEventKind::Created | FileWatcherEventKind::Modified => self.load(&event.path),
            FileWatcherEventKind::Deleted => {
                let kind = if event.is_directory {
                    ItemKind::Folder
                } else {
                    ItemKind::File
                };
                Some(
                    self.forget(&event.path)
                        .unwrap_or_else(|| VirtualFile::detached(&event.path, kind)),
                )
            }
        }
    }
}
