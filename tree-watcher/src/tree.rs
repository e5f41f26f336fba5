//! Watch registrations and event classification for one watched root.
//!
//! [`TreeState`] is owned by the watcher's background thread. It keeps a
//! registration per live, non-excluded directory and a last-known map of every
//! tracked entry, which is what lets deletions be classified after the entry
//! is gone from disk.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::WatcherError;
use crate::event::{FileWatcherEvent, FileWatcherEventKind, FileWatcherEventSink};
use crate::exclude::ExclusionMatcher;
use crate::native::{NativeEvent, WatchBackend, WatcherMessage, classify, coalesce};

/// Opaque identifier of a native watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WatchHandle(u64);

/// An active native watch on one directory.
#[derive(Debug, Clone)]
pub(crate) struct WatchRegistration {
    pub(crate) directory: PathBuf,
    pub(crate) handle: WatchHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    fn is_directory(self) -> bool {
        self == Self::Directory
    }

    fn from_file_type(file_type: fs::FileType) -> Self {
        if file_type.is_dir() {
            Self::Directory
        } else {
            Self::File
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconcile {
    /// Native events were lost.
    Overflow,
    /// Exclusion patterns were added or removed.
    ExclusionsChanged,
}

pub(crate) struct TreeState<B> {
    root: PathBuf,
    follow_symlinks: bool,
    backend: B,
    exclusions: Arc<ExclusionMatcher>,
    sink: Arc<dyn FileWatcherEventSink>,
    registrations: HashMap<PathBuf, WatchRegistration>,
    entries: BTreeMap<PathBuf, EntryKind>,
    watched_view: Arc<RwLock<BTreeSet<PathBuf>>>,
    next_handle: u64,
    /// Entries reported by a directory scan during the current batch.
    scanned: HashSet<PathBuf>,
    /// Set while the initial walk runs; errors are held instead of reported.
    walking: bool,
    /// Errors found by the initial walk, delivered before `started`.
    startup_errors: Vec<WatcherError>,
    root_removed: bool,
}

impl<B: WatchBackend> TreeState<B> {
    pub(crate) fn new(
        root: PathBuf,
        follow_symlinks: bool,
        backend: B,
        exclusions: Arc<ExclusionMatcher>,
        sink: Arc<dyn FileWatcherEventSink>,
        watched_view: Arc<RwLock<BTreeSet<PathBuf>>>,
    ) -> Self {
        Self {
            root,
            follow_symlinks,
            backend,
            exclusions,
            sink,
            registrations: HashMap::new(),
            entries: BTreeMap::new(),
            watched_view,
            next_handle: 0,
            scanned: HashSet::new(),
            walking: false,
            startup_errors: Vec::new(),
            root_removed: false,
        }
    }

    /// Register the root and every non-excluded directory beneath it.
    ///
    /// Runs on the caller of `startup`, so nothing reaches the sink here.
    /// Setup failures are held until [`report_started`](Self::report_started).
    pub(crate) fn initial_walk(&mut self) {
        self.walking = true;
        self.register(Path::new(""));
        for (relative, kind) in self.walk_disk() {
            if kind.is_directory() {
                self.register(&relative);
            }
            self.entries.insert(relative, kind);
        }
        self.walking = false;
        debug!(
            "Initial walk of {} tracked {} entries in {} directories",
            self.root.display(),
            self.entries.len(),
            self.registrations.len()
        );
    }

    /// Deliver errors held from the initial walk, then `started`.
    pub(crate) fn report_started(&mut self) {
        for err in std::mem::take(&mut self.startup_errors) {
            self.sink.error_occurred(&self.root, &err);
        }
        self.sink.started(&self.root);
    }

    /// Process one drained batch of messages. Returns `false` once a shutdown
    /// request has been seen or the root itself was removed.
    pub(crate) fn process_batch(&mut self, batch: Vec<WatcherMessage>) -> bool {
        self.scanned.clear();
        let mut pending = Vec::new();
        for message in batch {
            match message {
                WatcherMessage::Native(Ok(event)) => pending.extend(classify(event)),
                WatcherMessage::Native(Err(err)) => {
                    self.process_events(std::mem::take(&mut pending));
                    self.report(WatcherError::from(err));
                }
                WatcherMessage::Resync => {
                    self.process_events(std::mem::take(&mut pending));
                    if !self.root_removed {
                        self.reconcile(Reconcile::ExclusionsChanged);
                    }
                }
                WatcherMessage::Shutdown => {
                    self.process_events(pending);
                    return false;
                }
            }
            if self.root_removed {
                return false;
            }
        }
        self.process_events(pending);
        !self.root_removed
    }

    fn process_events(&mut self, events: Vec<NativeEvent>) {
        for event in coalesce(events) {
            if self.root_removed {
                break;
            }
            self.process(event);
        }
    }

    pub(crate) fn process(&mut self, event: NativeEvent) {
        match event {
            NativeEvent::Created(path) => self.on_created(&path),
            NativeEvent::Removed(path) => self.on_removed(&path),
            NativeEvent::Modified(path) => self.on_modified(&path),
            NativeEvent::Overflow => {
                self.report(WatcherError::Overflow(self.root.clone()));
                self.reconcile(Reconcile::Overflow);
            }
        }
    }

    /// Cancel every outstanding registration.
    pub(crate) fn deregister_all(&mut self) {
        let directories: Vec<PathBuf> = self.registrations.keys().cloned().collect();
        for directory in directories {
            self.deregister(&directory);
        }
        self.entries.clear();
    }

    fn on_created(&mut self, path: &Path) {
        let Some(relative) = self.relative(path) else {
            return;
        };
        if relative.as_os_str().is_empty() || self.exclusions.is_excluded(&relative) {
            return;
        }
        if self.scanned.contains(&relative) {
            // Already reported by the scan of a freshly created parent.
            return;
        }
        let Some(kind) = self.entry_kind(path) else {
            debug!("Created entry vanished before processing: {}", path.display());
            return;
        };

        match self.entries.get(&relative).copied() {
            None => {
                self.create_entry(relative.clone(), kind);
                self.emit_parent_modified(&relative);
            }
            // Replaced in place, e.g. a temporary file renamed over it.
            Some(known) if known == kind => {
                if kind.is_directory() {
                    self.scan_new_directory(&relative);
                } else {
                    self.emit(FileWatcherEventKind::Modified, &relative, false);
                }
            }
            Some(_) => {
                self.remove_entry(&relative);
                self.create_entry(relative.clone(), kind);
                self.emit_parent_modified(&relative);
            }
        }
    }

    fn on_removed(&mut self, path: &Path) {
        let Some(relative) = self.relative(path) else {
            return;
        };
        if relative.as_os_str().is_empty() {
            self.report(WatcherError::RootRemoved(self.root.clone()));
            self.deregister_all();
            self.root_removed = true;
            return;
        }
        if !self.entries.contains_key(&relative) {
            return;
        }

        self.remove_entry(&relative);
        self.emit_parent_modified(&relative);
    }

    fn on_modified(&mut self, path: &Path) {
        let Some(relative) = self.relative(path) else {
            return;
        };
        if relative.as_os_str().is_empty() {
            return;
        }
        match self.entries.get(&relative) {
            Some(EntryKind::File) => {
                self.emit(FileWatcherEventKind::Modified, &relative, false);
            }
            // Directory changes are inferred from child creation and deletion.
            Some(EntryKind::Directory) => {}
            // An entry we never saw created; surface it as a creation.
            None => self.on_created(path),
        }
    }

    fn create_entry(&mut self, relative: PathBuf, kind: EntryKind) {
        self.entries.insert(relative.clone(), kind);
        self.emit(FileWatcherEventKind::Created, &relative, kind.is_directory());

        if kind.is_directory() {
            self.register(&relative);
            self.scan_new_directory(&relative);
        }
    }

    /// Pick up content written into a directory before its watch was active.
    fn scan_new_directory(&mut self, relative: &Path) {
        let absolute = self.root.join(relative);
        let read_dir = match fs::read_dir(&absolute) {
            Ok(read_dir) => read_dir,
            Err(err) => {
                self.report(WatcherError::watch_setup(relative, err));
                return;
            }
        };

        let mut children: Vec<(PathBuf, EntryKind)> = Vec::new();
        for entry in read_dir.flatten() {
            let child = relative.join(entry.file_name());
            if self.exclusions.is_excluded(&child) || self.entries.contains_key(&child) {
                continue;
            }
            if let Some(kind) = self.entry_kind(&entry.path()) {
                children.push((child, kind));
            }
        }
        children.sort();

        for (child, kind) in children {
            // A nested scan may already have reached it.
            if !self.entries.contains_key(&child) {
                self.scanned.insert(child.clone());
                self.create_entry(child, kind);
            }
        }
    }

    /// Forget an entry and everything tracked beneath it, reporting each one.
    fn remove_entry(&mut self, relative: &Path) {
        for (path, kind) in self.forget_entry(relative) {
            self.emit(FileWatcherEventKind::Deleted, &path, kind.is_directory());
        }
    }

    /// Drop an entry and its tracked descendants. Returns what was dropped,
    /// deepest first, ending with the entry itself.
    fn forget_entry(&mut self, relative: &Path) -> Vec<(PathBuf, EntryKind)> {
        let Some(kind) = self.entries.remove(relative) else {
            return Vec::new();
        };

        let mut forgotten = Vec::new();
        if kind.is_directory() {
            let descendants: Vec<(PathBuf, EntryKind)> = self
                .entries
                .range(relative.to_path_buf()..)
                .take_while(|(path, _)| path.starts_with(relative))
                .map(|(path, kind)| (path.clone(), *kind))
                .collect();
            for (path, kind) in descendants.into_iter().rev() {
                self.entries.remove(&path);
                if kind.is_directory() {
                    self.deregister(&path);
                }
                forgotten.push((path, kind));
            }
            self.deregister(relative);
        }
        forgotten.push((relative.to_path_buf(), kind));
        forgotten
    }

    /// Bring tracking back in line with the disk.
    ///
    /// Entries that are now excluded are dropped without events. After an
    /// overflow, known entries missing from disk are reported deleted; in
    /// both cases entries found on disk but not tracked are reported created.
    fn reconcile(&mut self, reason: Reconcile) {
        let on_disk: BTreeMap<PathBuf, EntryKind> = self.walk_disk().into_iter().collect();

        let known: Vec<(PathBuf, EntryKind)> = self
            .entries
            .iter()
            .map(|(path, kind)| (path.clone(), *kind))
            .collect();
        for (path, kind) in known {
            if !self.entries.contains_key(&path) {
                continue;
            }
            if self.exclusions.is_excluded(&path) {
                self.forget_entry(&path);
            } else if reason == Reconcile::Overflow && on_disk.get(&path) != Some(&kind) {
                self.remove_entry(&path);
                self.emit_parent_modified(&path);
            }
        }

        for (path, kind) in on_disk {
            if !self.entries.contains_key(&path) {
                self.create_entry(path.clone(), kind);
                self.emit_parent_modified(&path);
            } else if kind.is_directory() && !self.registrations.contains_key(&path) {
                self.register(&path);
            }
        }

        if !self.registrations.contains_key(Path::new("")) {
            self.register(Path::new(""));
        }
        debug!(
            "Reconciled {} after {reason:?} ({} entries tracked)",
            self.root.display(),
            self.entries.len()
        );
    }

    fn walk_disk(&mut self) -> Vec<(PathBuf, EntryKind)> {
        let root = self.root.clone();
        let exclusions = Arc::clone(&self.exclusions);
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                entry
                    .path()
                    .strip_prefix(&root)
                    .map_or(true, |relative| !exclusions.is_excluded(relative))
            });

        let mut found = Vec::new();
        for entry in walker {
            match entry {
                Ok(entry) => {
                    if let Some(relative) = self.relative(entry.path()) {
                        found.push((relative, EntryKind::from_file_type(entry.file_type())));
                    }
                }
                Err(err) => {
                    let path = err
                        .path()
                        .and_then(|p| self.relative(p))
                        .unwrap_or_default();
                    self.report(WatcherError::watch_setup(path, err));
                }
            }
        }
        found
    }

    fn register(&mut self, relative: &Path) {
        if self.registrations.contains_key(relative) {
            return;
        }
        let absolute = self.root.join(relative);
        match self.backend.watch(&absolute) {
            Ok(()) => {
                self.next_handle += 1;
                let registration = WatchRegistration {
                    directory: relative.to_path_buf(),
                    handle: WatchHandle(self.next_handle),
                };
                debug!(
                    "Started watching: {} ({:?})",
                    absolute.display(),
                    registration.handle
                );
                self.registrations
                    .insert(registration.directory.clone(), registration);
                self.watched_view
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(relative.to_path_buf());
            }
            Err(err) => self.report(WatcherError::watch_setup(relative, err)),
        }
    }

    fn deregister(&mut self, relative: &Path) {
        let Some(registration) = self.registrations.remove(relative) else {
            return;
        };
        self.watched_view
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(relative);

        let absolute = self.root.join(&registration.directory);
        match self.backend.unwatch(&absolute) {
            Ok(()) => debug!("Stopped watching: {}", absolute.display()),
            // The native source drops watches of removed directories itself.
            Err(err) => debug!("Watch already gone for {}: {err}", absolute.display()),
        }
    }

    fn emit_parent_modified(&self, relative: &Path) {
        let parent = relative.parent().unwrap_or_else(|| Path::new(""));
        self.emit(FileWatcherEventKind::Modified, parent, true);
    }

    fn emit(&self, kind: FileWatcherEventKind, relative: &Path, is_directory: bool) {
        if self.exclusions.is_excluded(relative) {
            return;
        }
        let event = FileWatcherEvent::new(kind, self.root.clone(), relative, is_directory);
        self.sink.handle_event(&event);
    }

    fn report(&mut self, err: WatcherError) {
        warn!("Watcher error under {}: {err}", self.root.display());
        if self.walking {
            self.startup_errors.push(err);
        } else {
            self.sink.error_occurred(&self.root, &err);
        }
    }

    fn relative(&self, path: &Path) -> Option<PathBuf> {
        path.strip_prefix(&self.root).ok().map(Path::to_path_buf)
    }

    fn entry_kind(&self, path: &Path) -> Option<EntryKind> {
        let metadata = if self.follow_symlinks {
            fs::metadata(path)
        } else {
            fs::symlink_metadata(path)
        };
        metadata
            .ok()
            .map(|metadata| EntryKind::from_file_type(metadata.file_type()))
    }

    #[cfg(test)]
    pub(crate) fn backend(&self) -> &B {
        &self.backend
    }
}
