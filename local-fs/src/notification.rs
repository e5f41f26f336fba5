//! Fan-out of watcher events to subscribers.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use vfs_tree_watcher::{FileWatcherEvent, FileWatcherEventKind, FileWatcherEventSink, WatcherError};

use crate::item::{ItemResolver, VirtualFile};

/// Identifies a subscription for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(u64);

/// Subscriber that receives events as resolved items.
pub trait FileWatcherListener: Send + Sync {
    /// Whether this listener wants events about `item`.
    fn should_be_notified_for(&self, _item: &VirtualFile) -> bool {
        true
    }

    /// An event about `item` occurred.
    fn on_file_watcher_event(&self, item: &VirtualFile, kind: FileWatcherEventKind);

    /// The watcher reported a recoverable failure.
    fn on_error(&self, _root: &Path, _error: &WatcherError) {}

    /// The watcher finished its initial registration.
    fn on_started(&self, _root: &Path) {}
}

struct Subscriptions<T: ?Sized> {
    entries: RwLock<Vec<(ListenerId, Arc<T>)>>,
}

impl<T: ?Sized> Subscriptions<T> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    fn add(&self, id: ListenerId, listener: Arc<T>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    /// Listeners at this instant. Dispatch runs on the snapshot so callbacks
    /// may subscribe or unsubscribe freely.
    fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Receives watcher notifications and fans them out.
///
/// Raw sinks get every event unchanged. Item listeners get events resolved
/// to [`VirtualFile`]s, filtered by their own predicate. Events whose item
/// cannot be resolved are dropped for item listeners.
pub struct NotificationHandler {
    resolver: Arc<dyn ItemResolver>,
    listeners: Subscriptions<dyn FileWatcherListener>,
    raw: Subscriptions<dyn FileWatcherEventSink>,
    next_id: AtomicU64,
}

impl NotificationHandler {
    /// Create a handler resolving items through `resolver`.
    pub fn new(resolver: Arc<dyn ItemResolver>) -> Self {
        Self {
            resolver,
            listeners: Subscriptions::new(),
            raw: Subscriptions::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn allocate_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Subscribe an item listener.
    pub fn add_listener(&self, listener: Arc<dyn FileWatcherListener>) -> ListenerId {
        let id = self.allocate_id();
        self.listeners.add(id, listener);
        id
    }

    /// Unsubscribe an item listener. Returns whether it was subscribed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Subscribe a raw sink.
    pub fn add_raw_listener(&self, sink: Arc<dyn FileWatcherEventSink>) -> ListenerId {
        let id = self.allocate_id();
        self.raw.add(id, sink);
        id
    }

    /// Unsubscribe a raw sink. Returns whether it was subscribed.
    pub fn remove_raw_listener(&self, id: ListenerId) -> bool {
        self.raw.remove(id)
    }

    /// Number of item listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Dispatch one event described by its parts.
    pub fn handle_file_watcher_event(
        &self,
        kind: FileWatcherEventKind,
        root: &Path,
        path: &Path,
        is_directory: bool,
    ) {
        self.dispatch(&FileWatcherEvent::new(kind, root, path, is_directory));
    }

    fn dispatch(&self, event: &FileWatcherEvent) {
        for sink in self.raw.snapshot() {
            sink.handle_event(event);
        }

        let listeners = self.listeners.snapshot();
        if listeners.is_empty() {
            return;
        }
        let Some(item) = self.resolver.resolve(event) else {
            debug!(
                "Skipping {} event for unresolvable item: {}",
                event.kind,
                event.path.display()
            );
            return;
        };
        for listener in listeners {
            if listener.should_be_notified_for(&item) {
                trace!("Notifying listener: {} {}", event.kind, item.display_path());
                listener.on_file_watcher_event(&item, event.kind);
            }
        }
    }
}

impl FileWatcherEventSink for NotificationHandler {
    fn started(&self, root: &Path) {
        for sink in self.raw.snapshot() {
            sink.started(root);
        }
        for listener in self.listeners.snapshot() {
            listener.on_started(root);
        }
    }

    fn error_occurred(&self, root: &Path, error: &WatcherError) {
        for sink in self.raw.snapshot() {
            sink.error_occurred(root, error);
        }
        for listener in self.listeners.snapshot() {
            listener.on_error(root, error);
        }
    }

    fn handle_event(&self, event: &FileWatcherEvent) {
        self.dispatch(event);
    }
}

impl std::fmt::Debug for NotificationHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHandler")
            .field("listeners", &self.listeners.len())
            .field("raw_listeners", &self.raw.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ItemCache, ItemKind};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        only_files: bool,
        events: Mutex<Vec<(FileWatcherEventKind, PathBuf, ItemKind)>>,
        started: Mutex<usize>,
        errors: Mutex<usize>,
    }

    impl FileWatcherListener for Recorder {
        fn should_be_notified_for(&self, item: &VirtualFile) -> bool {
            !self.only_files || item.is_file()
        }

        fn on_file_watcher_event(&self, item: &VirtualFile, kind: FileWatcherEventKind) {
            self.events
                .lock()
                .unwrap()
                .push((kind, item.path.clone(), item.kind));
        }

        fn on_error(&self, _root: &Path, _error: &WatcherError) {
            *self.errors.lock().unwrap() += 1;
        }

        fn on_started(&self, _root: &Path) {
            *self.started.lock().unwrap() += 1;
        }
    }

    #[derive(Default)]
    struct RawRecorder {
        events: Mutex<Vec<FileWatcherEvent>>,
    }

    impl FileWatcherEventSink for RawRecorder {
        fn handle_event(&self, event: &FileWatcherEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn handler(root: &Path) -> NotificationHandler {
        NotificationHandler::new(Arc::new(ItemCache::new(root)))
    }

    #[test]
    fn test_fan_out_with_filters() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(temp_dir.path().join("dir")).unwrap();
        let handler = handler(temp_dir.path());

        let all = Arc::new(Recorder::default());
        let files = Arc::new(Recorder {
            only_files: true,
            ..Recorder::default()
        });
        handler.add_listener(all.clone());
        handler.add_listener(files.clone());

        handler.handle_file_watcher_event(
            FileWatcherEventKind::Created,
            temp_dir.path(),
            Path::new("a.txt"),
            false,
        );
        handler.handle_file_watcher_event(
            FileWatcherEventKind::Created,
            temp_dir.path(),
            Path::new("dir"),
            true,
        );

        assert_eq!(all.events.lock().unwrap().len(), 2);
        assert_eq!(
            *files.events.lock().unwrap(),
            vec![(
                FileWatcherEventKind::Created,
                PathBuf::from("a.txt"),
                ItemKind::File
            )]
        );
    }

    #[test]
    fn test_unresolvable_item_is_skipped_but_raw_sees_it() {
        let temp_dir = TempDir::new().unwrap();
        let handler = handler(temp_dir.path());
        let listener = Arc::new(Recorder::default());
        let raw = Arc::new(RawRecorder::default());
        handler.add_listener(listener.clone());
        handler.add_raw_listener(raw.clone());

        handler.handle_file_watcher_event(
            FileWatcherEventKind::Modified,
            temp_dir.path(),
            Path::new("missing.txt"),
            false,
        );

        assert!(listener.events.lock().unwrap().is_empty());
        assert_eq!(raw.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_deleted_uses_directory_hint() {
        let temp_dir = TempDir::new().unwrap();
        let handler = handler(temp_dir.path());
        let listener = Arc::new(Recorder::default());
        handler.add_listener(listener.clone());

        handler.handle_file_watcher_event(
            FileWatcherEventKind::Deleted,
            temp_dir.path(),
            Path::new("old"),
            true,
        );

        assert_eq!(
            *listener.events.lock().unwrap(),
            vec![(
                FileWatcherEventKind::Deleted,
                PathBuf::from("old"),
                ItemKind::Folder
            )]
        );
    }

    #[test]
    fn test_remove_listener() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.txt"), "").unwrap();
        let handler = handler(temp_dir.path());
        let listener = Arc::new(Recorder::default());
        let id = handler.add_listener(listener.clone());

        assert!(handler.remove_listener(id));
        assert!(!handler.remove_listener(id));
        assert_eq!(handler.listener_count(), 0);

        handler.handle_file_watcher_event(
            FileWatcherEventKind::Created,
            temp_dir.path(),
            Path::new("a.txt"),
            false,
        );
        assert!(listener.events.lock().unwrap().is_empty());
    }

    /// Swaps itself for `replacement` on its first event.
    struct Resubscriber {
        handler: Arc<NotificationHandler>,
        id: Mutex<Option<ListenerId>>,
        replacement: Arc<Recorder>,
        seen: Mutex<Vec<PathBuf>>,
    }

    impl FileWatcherListener for Resubscriber {
        fn on_file_watcher_event(&self, item: &VirtualFile, _kind: FileWatcherEventKind) {
            self.seen.lock().unwrap().push(item.path.clone());
            if let Some(id) = self.id.lock().unwrap().take() {
                assert!(self.handler.remove_listener(id));
                self.handler.add_listener(self.replacement.clone());
            }
        }
    }

    #[test]
    fn test_listener_resubscribing_during_dispatch() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.txt"), "").unwrap();
        std::fs::write(temp_dir.path().join("b.txt"), "").unwrap();
        let handler = Arc::new(handler(temp_dir.path()));
        let replacement = Arc::new(Recorder::default());
        let resubscriber = Arc::new(Resubscriber {
            handler: Arc::clone(&handler),
            id: Mutex::new(None),
            replacement: replacement.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let tail = Arc::new(Recorder::default());
        let id = handler.add_listener(resubscriber.clone());
        *resubscriber.id.lock().unwrap() = Some(id);
        handler.add_listener(tail.clone());

        for name in ["a.txt", "b.txt"] {
            handler.handle_file_watcher_event(
                FileWatcherEventKind::Modified,
                temp_dir.path(),
                Path::new(name),
                false,
            );
        }

        let paths = |recorder: &Recorder| -> Vec<PathBuf> {
            recorder
                .events
                .lock()
                .unwrap()
                .iter()
                .map(|(_, path, _)| path.clone())
                .collect()
        };
        assert_eq!(*resubscriber.seen.lock().unwrap(), vec![PathBuf::from("a.txt")]);
        assert_eq!(
            paths(&tail),
            vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]
        );
        assert_eq!(paths(&replacement), vec![PathBuf::from("b.txt")]);
        assert_eq!(handler.listener_count(), 2);
    }

    #[test]
    fn test_lifecycle_callbacks() {
        let temp_dir = TempDir::new().unwrap();
        let handler = handler(temp_dir.path());
        let listener = Arc::new(Recorder::default());
        handler.add_listener(listener.clone());

        handler.started(temp_dir.path());
        handler.error_occurred(
            temp_dir.path(),
            &WatcherError::Overflow(temp_dir.path().to_path_buf()),
        );

        assert_eq!(*listener.started.lock().unwrap(), 1);
        assert_eq!(*listener.errors.lock().unwrap(), 1);
    }
}
