//! Tree watcher implementation.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use notify::RecommendedWatcher;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::WatcherConfig;
use crate::error::{Result, WatcherError};
use crate::event::FileWatcherEventSink;
use crate::exclude::ExclusionMatcher;
use crate::native::WatcherMessage;
use crate::tree::TreeState;

/// Handle to the running background loop.
struct Control {
    tx: mpsc::UnboundedSender<WatcherMessage>,
    thread: JoinHandle<()>,
}

/// Recursive watcher over one root directory.
///
/// Holds one native watch per live, non-excluded directory under the root and
/// turns native notifications into [`FileWatcherEvent`](crate::FileWatcherEvent)s
/// delivered to a [`FileWatcherEventSink`] on a dedicated background thread.
pub struct TreeWatcher {
    /// Canonical root directory.
    root: PathBuf,

    /// Configuration.
    config: WatcherConfig,

    /// Exclusion patterns shared with the processing thread.
    exclusions: Arc<ExclusionMatcher>,

    /// Receiver of classified events.
    sink: Arc<dyn FileWatcherEventSink>,

    /// Directories with an active watch, relative to the root.
    watched: Arc<RwLock<BTreeSet<PathBuf>>>,

    /// Whether the watcher is running. Cleared by the background loop when
    /// it stops on its own.
    running: Arc<AtomicBool>,

    /// Background loop, present while running.
    control: Mutex<Option<Control>>,
}

impl TreeWatcher {
    /// Create a watcher for `root`. Nothing is watched until [`startup`](Self::startup).
    pub fn new(
        root: impl AsRef<Path>,
        config: WatcherConfig,
        sink: Arc<dyn FileWatcherEventSink>,
    ) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(WatcherError::RootNotFound(root.to_path_buf()));
        }
        let root = dunce::canonicalize(root)?;
        let exclusions = Arc::new(ExclusionMatcher::from_patterns(&config.exclude_patterns)?);

        Ok(Self {
            root,
            config,
            exclusions,
            sink,
            watched: Arc::new(RwLock::new(BTreeSet::new())),
            running: Arc::new(AtomicBool::new(false)),
            control: Mutex::new(None),
        })
    }

    /// Register every non-excluded directory and start the processing thread.
    ///
    /// Returns once initial registration is complete. Registration errors
    /// and the `started` notification are delivered from the processing
    /// thread. Calling this on a running watcher is a no-op.
    pub fn startup(&self) -> Result<()> {
        let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        if control.is_some() && self.is_running() {
            return Ok(());
        }
        // The previous loop stopped after its root was removed.
        if let Some(stale) = control.take() {
            let _ = stale.thread.join();
        }
        if !self.root.is_dir() {
            return Err(WatcherError::RootNotFound(self.root.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let native_tx = tx.clone();
        let native = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| {
                // The loop is gone once shutdown completes; late events are moot.
                let _ = native_tx.send(WatcherMessage::Native(res));
            },
        )?;

        let mut state: TreeState<RecommendedWatcher> = TreeState::new(
            self.root.clone(),
            self.config.follow_symlinks,
            native,
            Arc::clone(&self.exclusions),
            Arc::clone(&self.sink),
            Arc::clone(&self.watched),
        );
        state.initial_walk();

        let root = self.root.clone();
        let running = Arc::clone(&self.running);
        self.running.store(true, Ordering::SeqCst);
        let thread = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || run_loop(state, rx, root, running))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                WatcherError::Spawn(e.to_string())
            })?;

        *control = Some(Control { tx, thread });
        info!(
            "Tree watcher started: {} ({} directories)",
            self.root.display(),
            self.watched_directories().len()
        );
        Ok(())
    }

    /// Stop the processing thread and cancel every watch.
    ///
    /// Idempotent and safe to call from any thread, including from inside a
    /// sink callback (in which case the thread is not joined).
    pub fn shutdown(&self) {
        let Some(control) = self
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);

        let _ = control.tx.send(WatcherMessage::Shutdown);
        if control.thread.thread().id() == thread::current().id() {
            debug!("Shutdown requested from the watcher thread; not joining");
            return;
        }
        if control.thread.join().is_err() {
            error!("Tree watcher thread panicked: {}", self.root.display());
        }
    }

    /// Check if the watcher is running. Becomes `false` after
    /// [`shutdown`](Self::shutdown) or once the root itself is removed.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directories that currently hold a watch, relative to the root.
    pub fn watched_directories(&self) -> Vec<PathBuf> {
        self.watched
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// The live exclusion matcher.
    pub fn exclusions(&self) -> &ExclusionMatcher {
        &self.exclusions
    }

    /// Exclude paths matching `pattern` from now on.
    pub fn add_exclude_pattern(&self, pattern: &str) -> Result<()> {
        self.exclusions.add_pattern(pattern)?;
        self.request_resync();
        Ok(())
    }

    /// Stop excluding `pattern`. Returns whether it was present.
    pub fn remove_exclude_pattern(&self, pattern: &str) -> bool {
        let removed = self.exclusions.remove_pattern(pattern);
        if removed {
            self.request_resync();
        }
        removed
    }

    fn request_resync(&self) {
        let control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(control) = control.as_ref() {
            let _ = control.tx.send(WatcherMessage::Resync);
        }
    }
}

impl Drop for TreeWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TreeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeWatcher")
            .field("root", &self.root)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn run_loop(
    mut state: TreeState<RecommendedWatcher>,
    mut rx: mpsc::UnboundedReceiver<WatcherMessage>,
    root: PathBuf,
    running: Arc<AtomicBool>,
) {
    state.report_started();

    while let Some(first) = rx.blocking_recv() {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }
        if !state.process_batch(batch) {
            break;
        }
    }

    state.deregister_all();
    running.store(false, Ordering::SeqCst);
    info!("Tree watcher stopped: {}", root.display());
}
