//! File search index.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vfs_tree_watcher::{ExclusionMatcher, FileWatcherEventKind};
use walkdir::WalkDir;

use crate::error::{Result, VfsError};
use crate::item::VirtualFile;
use crate::notification::FileWatcherListener;
use crate::sidecar::SERVICE_DIR;

/// An indexed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedFile {
    /// Path relative to the root.
    pub path: PathBuf,

    /// File name.
    pub name: String,

    /// Size in bytes.
    pub size: u64,

    /// Media type guessed from the extension.
    pub media_type: String,

    /// When the file was last modified.
    pub modified: Option<DateTime<Utc>>,

    /// When the file was indexed.
    pub indexed_at: DateTime<Utc>,
}

impl IndexedFile {
    /// Create an index entry for a file item.
    pub fn from_item(item: &VirtualFile) -> Self {
        Self {
            path: item.path.clone(),
            name: item.name.clone(),
            size: item.length,
            media_type: media_type(&item.path),
            modified: item.last_modified,
            indexed_at: Utc::now(),
        }
    }
}

fn media_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Index of the files under a root.
///
/// Folders are never indexed. After [`close`](Self::close) every operation
/// fails with [`VfsError::Closed`].
#[derive(Debug)]
pub struct SearchIndex {
    root: PathBuf,
    files: RwLock<BTreeMap<PathBuf, IndexedFile>>,
    closed: AtomicBool,
}

impl SearchIndex {
    /// Create an empty index for `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: RwLock::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VfsError::Closed);
        }
        Ok(())
    }

    /// Walk the root and bring the index in line with disk.
    pub fn scan(&self, exclusions: &ExclusionMatcher) -> Result<IndexResult> {
        self.ensure_open()?;
        let start = std::time::Instant::now();
        let mut new_files = 0;
        let mut updated_files = 0;
        let mut current: HashSet<PathBuf> = HashSet::new();

        let found = self.walk_files(&self.root, exclusions);
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        for indexed in found {
            current.insert(indexed.path.clone());
            match files.get(&indexed.path) {
                Some(existing) if existing.modified == indexed.modified => {}
                Some(_) => {
                    files.insert(indexed.path.clone(), indexed);
                    updated_files += 1;
                }
                None => {
                    files.insert(indexed.path.clone(), indexed);
                    new_files += 1;
                }
            }
        }
        let before = files.len();
        files.retain(|path, _| current.contains(path));
        let removed_files = before - files.len();

        let duration = start.elapsed();
        info!(
            "Indexed {} files in {:?} (new: {}, updated: {}, removed: {})",
            files.len(),
            duration,
            new_files,
            updated_files,
            removed_files
        );

        Ok(IndexResult {
            total_files: files.len(),
            new_files,
            updated_files,
            removed_files,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Files at or beneath `start`, skipping service directories and
    /// excluded paths.
    fn walk_files(&self, start: &Path, exclusions: &ExclusionMatcher) -> Vec<IndexedFile> {
        let walker = WalkDir::new(start).into_iter().filter_entry(|entry| {
            entry.file_name() != SERVICE_DIR
                && entry
                    .path()
                    .strip_prefix(&self.root)
                    .map_or(true, |relative| !exclusions.is_excluded(relative))
        });

        let mut found = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry during index scan: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Skipping file without metadata: {e}");
                    continue;
                }
            };
            found.push(IndexedFile::from_item(&VirtualFile::from_metadata(
                relative, &metadata,
            )));
        }
        found
    }

    /// Index a file, or every file beneath a folder. Returns the number of
    /// files indexed.
    pub fn add_tree(&self, item: &VirtualFile, exclusions: &ExclusionMatcher) -> Result<usize> {
        self.ensure_open()?;
        let found = self.walk_files(&self.root.join(&item.path), exclusions);
        let count = found.len();
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        for indexed in found {
            files.insert(indexed.path.clone(), indexed);
        }
        Ok(count)
    }

    /// Index a file. Folders are ignored.
    pub fn add(&self, item: &VirtualFile) -> Result<()> {
        self.ensure_open()?;
        if item.is_file() {
            self.files
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(item.path.clone(), IndexedFile::from_item(item));
        }
        Ok(())
    }

    /// Refresh a file's entry.
    pub fn update(&self, item: &VirtualFile) -> Result<()> {
        self.add(item)
    }

    /// Remove a file, or every file beneath a folder. Returns the number of
    /// entries removed.
    pub fn delete(&self, path: &Path, is_file: bool) -> Result<usize> {
        self.ensure_open()?;
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        if is_file {
            return Ok(usize::from(files.remove(path).is_some()));
        }
        let before = files.len();
        files.retain(|indexed, _| !indexed.starts_with(path));
        Ok(before - files.len())
    }

    /// Get an indexed file by path.
    pub fn get(&self, path: &Path) -> Result<Option<IndexedFile>> {
        self.ensure_open()?;
        Ok(self
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned())
    }

    /// Files whose path contains `pattern`, ignoring case, sorted by path.
    pub fn search(&self, pattern: &str) -> Result<Vec<IndexedFile>> {
        let pattern = pattern.to_lowercase();
        self.collect(|f| f.path.to_string_lossy().to_lowercase().contains(&pattern))
    }

    /// Files whose media type starts with `media_type`, sorted by path.
    pub fn by_media_type(&self, media_type: &str) -> Result<Vec<IndexedFile>> {
        self.collect(|f| f.media_type.starts_with(media_type))
    }

    fn collect(&self, predicate: impl Fn(&IndexedFile) -> bool) -> Result<Vec<IndexedFile>> {
        self.ensure_open()?;
        Ok(self
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|f| predicate(f))
            .cloned()
            .collect())
    }

    /// Get statistics about the index.
    pub fn stats(&self) -> Result<IndexStats> {
        self.ensure_open()?;
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        let mut by_media_type: HashMap<String, usize> = HashMap::new();
        let mut total_size: u64 = 0;
        for file in files.values() {
            *by_media_type.entry(file.media_type.clone()).or_insert(0) += 1;
            total_size += file.size;
        }
        Ok(IndexStats {
            total_files: files.len(),
            total_size_bytes: total_size,
            by_media_type,
        })
    }

    /// Close the index and drop its entries. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.files
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            debug!("Closed search index: {}", self.root.display());
        }
    }

    /// Check if the index is closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Keeps a [`SearchIndex`] in line with watcher events.
#[derive(Debug)]
pub struct SearchIndexUpdater {
    index: Arc<SearchIndex>,
}

impl SearchIndexUpdater {
    pub fn new(index: Arc<SearchIndex>) -> Self {
        Self { index }
    }
}

impl FileWatcherListener for SearchIndexUpdater {
    fn on_file_watcher_event(&self, item: &VirtualFile, kind: FileWatcherEventKind) {
        let result = match kind {
            FileWatcherEventKind::Created | FileWatcherEventKind::Modified => {
                self.index.update(item)
            }
            FileWatcherEventKind::Deleted => {
                self.index.delete(&item.path, item.is_file()).map(|_| ())
            }
        };
        if let Err(e) = result {
            debug!("Search index not updated for {}: {e}", item.display_path());
        }
    }
}

/// Result of an indexing operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexResult {
    /// Total files in index.
    pub total_files: usize,

    /// New files added.
    pub new_files: usize,

    /// Files updated.
    pub updated_files: usize,

    /// Files removed.
    pub removed_files: usize,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

/// Statistics about the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    /// Total number of files.
    pub total_files: usize,

    /// Total size in bytes.
    pub total_size_bytes: u64,

    /// File count by media type.
    pub by_media_type: HashMap<String, usize>,
}
