//! End-to-end tests for the tree watcher against the native notification source.
//!
//! Each test drives real file system changes under a temporary root, waits
//! until the expected events have arrived, then leaves a settle period before
//! checking that nothing unexpected was delivered.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use vfs_tree_watcher::{
    FileWatcherEvent, FileWatcherEventKind, FileWatcherEventSink, TreeWatcher, WatcherConfig,
    WatcherError,
};

const TIMEOUT: Duration = Duration::from_secs(10);
const SETTLE: Duration = Duration::from_millis(500);

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<FileWatcherEvent>>,
    errors: Mutex<Vec<String>>,
    started: AtomicUsize,
}

impl Recorder {
    fn paths(&self, kind: FileWatcherEventKind) -> Vec<String> {
        let mut paths: Vec<String> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| slash(&e.path))
            .collect();
        paths.sort();
        paths
    }

    fn path_set(&self, kind: FileWatcherEventKind) -> BTreeSet<String> {
        self.paths(kind).into_iter().collect()
    }

    fn all_paths(&self) -> BTreeSet<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| slash(&e.path))
            .collect()
    }
}

impl FileWatcherEventSink for Recorder {
    fn started(&self, _root: &Path) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn error_occurred(&self, _root: &Path, error: &WatcherError) {
        self.errors.lock().unwrap().push(error.to_string());
    }

    fn handle_event(&self, event: &FileWatcherEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

fn slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn set(paths: &[&str]) -> BTreeSet<String> {
    paths.iter().map(|p| p.to_string()).collect()
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}

fn start(root: &Path, config: WatcherConfig) -> (TreeWatcher, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let watcher = TreeWatcher::new(root, config, recorder.clone()).unwrap();
    watcher.startup().unwrap();
    assert!(wait_until(|| recorder.started.load(Ordering::SeqCst) == 1));
    (watcher, recorder)
}

fn append(path: &Path, content: &str) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
}

#[test]
fn test_creation_completeness() {
    let temp_dir = TempDir::new().unwrap();
    let (_watcher, recorder) = start(temp_dir.path(), WatcherConfig::without_excludes());

    let files = ["a.txt", "b.txt", "c.rs", "d.md", "e"];
    let dirs = ["dir1", "dir2", "dir3"];
    for file in files {
        File::create(temp_dir.path().join(file)).unwrap();
    }
    for dir in dirs {
        fs::create_dir(temp_dir.path().join(dir)).unwrap();
    }

    let expected: BTreeSet<String> = files.iter().chain(dirs.iter()).map(|p| p.to_string()).collect();
    assert!(wait_until(|| recorder.path_set(FileWatcherEventKind::Created) == expected));
    thread::sleep(SETTLE);

    assert_eq!(recorder.paths(FileWatcherEventKind::Created).len(), files.len() + dirs.len());
    assert!(recorder.paths(FileWatcherEventKind::Deleted).is_empty());
    // Only the root's listing changed.
    assert_eq!(recorder.path_set(FileWatcherEventKind::Modified), set(&[""]));
}

#[test]
fn test_created_directory_is_watched() {
    let temp_dir = TempDir::new().unwrap();
    let (watcher, recorder) = start(temp_dir.path(), WatcherConfig::without_excludes());

    fs::create_dir(temp_dir.path().join("fresh")).unwrap();
    assert!(wait_until(|| watcher.watched_directories().contains(&PathBuf::from("fresh"))));

    File::create(temp_dir.path().join("fresh/inside.txt")).unwrap();
    assert!(wait_until(|| {
        recorder
            .path_set(FileWatcherEventKind::Created)
            .contains("fresh/inside.txt")
    }));
    thread::sleep(SETTLE);

    assert_eq!(
        recorder.paths(FileWatcherEventKind::Created),
        vec!["fresh".to_string(), "fresh/inside.txt".to_string()]
    );
    let modified = recorder.path_set(FileWatcherEventKind::Modified);
    assert!(modified.is_subset(&set(&["", "fresh"])), "{modified:?}");
}

#[test]
fn test_deletion_completeness() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir_all(temp_dir.path().join("sub/inner")).unwrap();
    File::create(temp_dir.path().join("sub/a.txt")).unwrap();
    File::create(temp_dir.path().join("sub/inner/b.txt")).unwrap();
    File::create(temp_dir.path().join("keep.txt")).unwrap();
    let (watcher, recorder) = start(temp_dir.path(), WatcherConfig::without_excludes());
    assert_eq!(watcher.watched_directories().len(), 3);

    fs::remove_dir_all(temp_dir.path().join("sub")).unwrap();

    let expected = set(&["sub", "sub/a.txt", "sub/inner", "sub/inner/b.txt"]);
    assert!(wait_until(|| recorder.path_set(FileWatcherEventKind::Deleted) == expected));
    thread::sleep(SETTLE);

    assert_eq!(recorder.paths(FileWatcherEventKind::Deleted).len(), expected.len());
    assert!(recorder.paths(FileWatcherEventKind::Created).is_empty());
    let modified = recorder.path_set(FileWatcherEventKind::Modified);
    assert!(modified.is_subset(&set(&["", "sub", "sub/inner"])), "{modified:?}");
    assert!(modified.contains(""));
    assert_eq!(watcher.watched_directories(), vec![PathBuf::new()]);
}

#[test]
fn test_selective_modification() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir(temp_dir.path().join("src")).unwrap();
    for file in ["one.txt", "two.txt", "src/three.txt", "src/four.txt"] {
        fs::write(temp_dir.path().join(file), "initial\n").unwrap();
    }
    let (_watcher, recorder) = start(temp_dir.path(), WatcherConfig::without_excludes());

    append(&temp_dir.path().join("two.txt"), "more\n");
    append(&temp_dir.path().join("src/three.txt"), "more\n");

    let expected = vec!["src/three.txt".to_string(), "two.txt".to_string()];
    assert!(wait_until(|| recorder.path_set(FileWatcherEventKind::Modified).len() == 2));
    thread::sleep(SETTLE);

    assert_eq!(recorder.paths(FileWatcherEventKind::Modified), expected);
    assert!(recorder.paths(FileWatcherEventKind::Created).is_empty());
    assert!(recorder.paths(FileWatcherEventKind::Deleted).is_empty());
}

#[test]
fn test_exclusion_suppression() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir(temp_dir.path().join("sub")).unwrap();
    let config = WatcherConfig::without_excludes().exclude("excluded");
    let (watcher, recorder) = start(temp_dir.path(), config);

    fs::create_dir(temp_dir.path().join("excluded")).unwrap();
    File::create(temp_dir.path().join("excluded/file.txt")).unwrap();
    fs::create_dir(temp_dir.path().join("sub/excluded")).unwrap();
    File::create(temp_dir.path().join("sub/excluded/file.txt")).unwrap();
    fs::create_dir(temp_dir.path().join("included")).unwrap();
    File::create(temp_dir.path().join("included/file.txt")).unwrap();

    assert!(wait_until(|| {
        recorder
            .path_set(FileWatcherEventKind::Created)
            .contains("included/file.txt")
    }));
    thread::sleep(SETTLE);

    assert!(
        recorder.all_paths().iter().all(|p| !p.contains("excluded")),
        "{:?}",
        recorder.all_paths()
    );
    assert_eq!(
        recorder.path_set(FileWatcherEventKind::Created),
        set(&["included", "included/file.txt"])
    );
    assert!(
        !watcher
            .watched_directories()
            .iter()
            .any(|d| d.ends_with("excluded"))
    );
}

#[test]
fn test_late_registration_race_closure() {
    let temp_dir = TempDir::new().unwrap();
    let (_watcher, recorder) = start(temp_dir.path(), WatcherConfig::without_excludes());

    let dir = temp_dir.path().join("quick");
    fs::create_dir(&dir).unwrap();
    File::create(dir.join("immediate.txt")).unwrap();
    fs::create_dir(dir.join("nested")).unwrap();
    File::create(dir.join("nested/deeper.txt")).unwrap();

    let expected = set(&[
        "quick",
        "quick/immediate.txt",
        "quick/nested",
        "quick/nested/deeper.txt",
    ]);
    assert!(wait_until(|| recorder.path_set(FileWatcherEventKind::Created) == expected));
    thread::sleep(SETTLE);

    // Every entry exactly once, and the directory before its content.
    let created = recorder.paths(FileWatcherEventKind::Created);
    assert_eq!(created.len(), expected.len());
    let order: Vec<String> = recorder
        .events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.kind == FileWatcherEventKind::Created)
        .map(|e| slash(&e.path))
        .collect();
    let position = |p: &str| order.iter().position(|o| o == p).unwrap();
    assert!(position("quick") < position("quick/immediate.txt"));
    assert!(position("quick/nested") < position("quick/nested/deeper.txt"));
}

#[test]
fn test_runtime_exclusion_applies_to_later_events() {
    let temp_dir = TempDir::new().unwrap();
    let (watcher, recorder) = start(temp_dir.path(), WatcherConfig::without_excludes());

    File::create(temp_dir.path().join("before.log")).unwrap();
    assert!(wait_until(|| {
        recorder
            .path_set(FileWatcherEventKind::Created)
            .contains("before.log")
    }));

    watcher.add_exclude_pattern("*.log").unwrap();
    File::create(temp_dir.path().join("after.log")).unwrap();
    File::create(temp_dir.path().join("after.txt")).unwrap();
    assert!(wait_until(|| {
        recorder
            .path_set(FileWatcherEventKind::Created)
            .contains("after.txt")
    }));
    thread::sleep(SETTLE);

    // Already delivered events are not retracted.
    assert_eq!(
        recorder.path_set(FileWatcherEventKind::Created),
        set(&["after.txt", "before.log"])
    );
}

#[test]
fn test_no_events_after_shutdown() {
    let temp_dir = TempDir::new().unwrap();
    let (watcher, recorder) = start(temp_dir.path(), WatcherConfig::without_excludes());

    watcher.shutdown();
    assert!(watcher.watched_directories().is_empty());

    File::create(temp_dir.path().join("late.txt")).unwrap();
    fs::create_dir(temp_dir.path().join("late_dir")).unwrap();
    thread::sleep(SETTLE);

    assert!(recorder.events.lock().unwrap().is_empty());
    assert!(recorder.errors.lock().unwrap().is_empty());
}

#[test]
fn test_shutdown_from_other_threads() {
    let temp_dir = TempDir::new().unwrap();
    let (watcher, _recorder) = start(temp_dir.path(), WatcherConfig::without_excludes());
    let watcher = Arc::new(watcher);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let watcher = Arc::clone(&watcher);
            thread::spawn(move || watcher.shutdown())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(!watcher.is_running());
    assert!(watcher.watched_directories().is_empty());
}

#[test]
fn test_atomic_save_reports_modification() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("a.txt"), "old\n").unwrap();
    let (_watcher, recorder) = start(temp_dir.path(), WatcherConfig::without_excludes());

    let tmp = temp_dir.path().join("a.txt.tmp");
    fs::write(&tmp, "new\n").unwrap();
    fs::rename(&tmp, temp_dir.path().join("a.txt")).unwrap();

    assert!(wait_until(|| {
        recorder
            .path_set(FileWatcherEventKind::Modified)
            .contains("a.txt")
    }));
    thread::sleep(SETTLE);

    assert!(!recorder.path_set(FileWatcherEventKind::Created).contains("a.txt"));
    assert!(!recorder.path_set(FileWatcherEventKind::Deleted).contains("a.txt"));
}

#[test]
fn test_subtree_moved_out_of_root() {
    let outer = TempDir::new().unwrap();
    let root = outer.path().join("root");
    fs::create_dir_all(root.join("sub/inner")).unwrap();
    File::create(root.join("sub/a.txt")).unwrap();
    File::create(root.join("sub/inner/b.txt")).unwrap();
    let (watcher, recorder) = start(&root, WatcherConfig::without_excludes());

    fs::rename(root.join("sub"), outer.path().join("elsewhere")).unwrap();

    let expected = set(&["sub", "sub/a.txt", "sub/inner", "sub/inner/b.txt"]);
    assert!(wait_until(|| recorder.path_set(FileWatcherEventKind::Deleted) == expected));
    thread::sleep(SETTLE);

    assert_eq!(recorder.paths(FileWatcherEventKind::Deleted).len(), expected.len());
    assert_eq!(watcher.watched_directories(), vec![PathBuf::new()]);
}

#[test]
fn test_root_removal_stops_watcher() {
    let outer = TempDir::new().unwrap();
    let root = outer.path().join("root");
    fs::create_dir(&root).unwrap();
    let (watcher, recorder) = start(&root, WatcherConfig::without_excludes());

    fs::remove_dir_all(&root).unwrap();

    assert!(wait_until(|| !watcher.is_running()));
    assert!(watcher.watched_directories().is_empty());
    let errors = recorder.errors.lock().unwrap().clone();
    assert!(errors.iter().any(|e| e.contains("removed")), "{errors:?}");
}
