//! Adapter between `notify` and the tree state.

use std::path::{Path, PathBuf};

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::Result;

/// A native notification reduced to what classification needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NativeEvent {
    Created(PathBuf),
    Removed(PathBuf),
    Modified(PathBuf),
    Overflow,
}

/// Messages consumed by the background processing loop.
#[derive(Debug)]
pub(crate) enum WatcherMessage {
    Native(notify::Result<notify::Event>),
    /// Exclusions changed; reconcile tracking with the disk.
    Resync,
    Shutdown,
}

/// Reduce a `notify` event to native events.
///
/// Renames are split into a removal of the old path and a creation of the
/// new one. Access events carry no change and are dropped.
pub(crate) fn classify(event: notify::Event) -> Vec<NativeEvent> {
    if event.need_rescan() {
        return vec![NativeEvent::Overflow];
    }

    let notify::Event { kind, paths, .. } = event;
    match kind {
        EventKind::Create(_) => paths.into_iter().map(NativeEvent::Created).collect(),
        EventKind::Remove(_) => paths.into_iter().map(NativeEvent::Removed).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.into_iter().map(NativeEvent::Removed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.into_iter().map(NativeEvent::Created).collect()
        }
        // Backends that pair renames also report each side separately.
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .into_iter()
            .map(|path| {
                if path.symlink_metadata().is_ok() {
                    NativeEvent::Created(path)
                } else {
                    NativeEvent::Removed(path)
                }
            })
            .collect(),
        EventKind::Modify(_) => paths.into_iter().map(NativeEvent::Modified).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Collapse consecutive duplicate modifications of the same path.
pub(crate) fn coalesce(events: Vec<NativeEvent>) -> Vec<NativeEvent> {
    let mut out: Vec<NativeEvent> = Vec::with_capacity(events.len());
    for event in events {
        if let (NativeEvent::Modified(path), Some(NativeEvent::Modified(last))) = (&event, out.last())
        {
            if path == last {
                continue;
            }
        }
        out.push(event);
    }
    out
}

/// Native per-directory watch registration.
pub(crate) trait WatchBackend {
    /// Start watching a single directory (not its subdirectories).
    fn watch(&mut self, path: &Path) -> Result<()>;

    /// Stop watching a directory.
    fn unwatch(&mut self, path: &Path) -> Result<()>;
}

impl WatchBackend for RecommendedWatcher {
    fn watch(&mut self, path: &Path) -> Result<()> {
        Watcher::watch(self, path, RecursiveMode::NonRecursive)?;
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) -> Result<()> {
        Watcher::unwatch(self, path)?;
        Ok(())
    }
}
