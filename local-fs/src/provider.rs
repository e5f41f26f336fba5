//! Lazily created, cached file system instance.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, info};

use crate::config::FileSystemConfig;
use crate::error::Result;
use crate::file_system::{CloseCallback, LocalFileSystem};

type ProviderCallback = Arc<dyn Fn() + Send + Sync>;

/// The cached instance with the generation that created it.
#[derive(Default)]
struct Slot {
    generation: u64,
    instance: Option<Arc<LocalFileSystem>>,
}

/// Hands out one shared [`LocalFileSystem`] per configuration.
///
/// The instance is created on first request and cached until it is closed,
/// either through [`close`](Self::close) or directly on the instance. After
/// that the next request creates a fresh instance.
pub struct LocalFileSystemProvider {
    config: FileSystemConfig,
    slot: Arc<Mutex<Slot>>,
    callbacks: Arc<Mutex<Vec<ProviderCallback>>>,
}

impl LocalFileSystemProvider {
    /// Create a provider. Nothing is opened until requested.
    pub fn new(config: FileSystemConfig) -> Self {
        Self {
            config,
            slot: Arc::new(Mutex::new(Slot::default())),
            callbacks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The provider's configuration.
    pub fn config(&self) -> &FileSystemConfig {
        &self.config
    }

    /// Root directory of the instances this provider creates.
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// The cached instance. When none is cached, a new one is created if
    /// `create` is set; otherwise `None` is returned.
    pub fn get_instance(&self, create: bool) -> Result<Option<Arc<LocalFileSystem>>> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(instance) = &slot.instance {
            return Ok(Some(Arc::clone(instance)));
        }
        if !create {
            return Ok(None);
        }

        slot.generation += 1;
        let generation = slot.generation;
        let weak_slot = Arc::downgrade(&self.slot);
        let callbacks = Arc::clone(&self.callbacks);
        let on_close: CloseCallback =
            Box::new(move || release(&weak_slot, generation, &callbacks));

        let instance = Arc::new(LocalFileSystem::new(self.config.clone(), Some(on_close))?);
        slot.instance = Some(Arc::clone(&instance));
        info!(
            "Created file system instance {}: {}",
            generation,
            instance.root().display()
        );
        Ok(Some(instance))
    }

    /// Register a callback run whenever a provided instance closes.
    pub fn on_close(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Close the cached instance, if any.
    pub fn close(&self) {
        let instance = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .instance
            .take();
        if let Some(instance) = instance {
            instance.close();
        }
    }
}

/// Clear the cached instance of `generation` and run provider callbacks.
fn release(slot: &Weak<Mutex<Slot>>, generation: u64, callbacks: &Mutex<Vec<ProviderCallback>>) {
    if let Some(slot) = slot.upgrade() {
        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.generation == generation {
            slot.instance = None;
        }
    }
    debug!("Released file system instance {generation}");

    let callbacks: Vec<ProviderCallback> = callbacks
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    for callback in callbacks {
        callback();
    }
}

impl Drop for LocalFileSystemProvider {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for LocalFileSystemProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFileSystemProvider")
            .field("root", &self.config.root)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn provider(temp_dir: &TempDir) -> LocalFileSystemProvider {
        LocalFileSystemProvider::new(FileSystemConfig::new(temp_dir.path()).without_watching())
    }

    #[test]
    fn test_instance_is_cached() {
        let temp_dir = TempDir::new().unwrap();
        let provider = provider(&temp_dir);

        assert_eq!(provider.root(), temp_dir.path());
        assert!(provider.get_instance(false).unwrap().is_none());
        let first = provider.get_instance(true).unwrap().unwrap();
        let second = provider.get_instance(false).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_closing_instance_clears_cache() {
        let temp_dir = TempDir::new().unwrap();
        let provider = provider(&temp_dir);
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closed);
        provider.on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let first = provider.get_instance(true).unwrap().unwrap();
        first.close();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(provider.get_instance(false).unwrap().is_none());

        let second = provider.get_instance(true).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_closed());
    }

    #[test]
    fn test_provider_close() {
        let temp_dir = TempDir::new().unwrap();
        let provider = provider(&temp_dir);
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closed);
        provider.on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let instance = provider.get_instance(true).unwrap().unwrap();
        provider.close();
        provider.close();

        assert!(instance.is_closed());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(provider.get_instance(false).unwrap().is_none());
    }

    #[test]
    fn test_stale_instance_does_not_clear_newer_one() {
        let temp_dir = TempDir::new().unwrap();
        let provider = provider(&temp_dir);

        let stale = provider.get_instance(true).unwrap().unwrap();
        // Forget the stale instance without closing it, then open a new one.
        provider.slot.lock().unwrap().instance = None;
        let current = provider.get_instance(true).unwrap().unwrap();

        stale.close();
        let cached = provider.get_instance(false).unwrap().unwrap();
        assert!(Arc::ptr_eq(&cached, &current));
    }
}
