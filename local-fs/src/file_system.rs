//! Local file system with side-car properties and locks.

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use vfs_tree_watcher::{FileWatcherEventSink, TreeWatcher};
use walkdir::WalkDir;

use crate::codec::{LockCodec, LockRecord, MetadataCodec};
use crate::config::FileSystemConfig;
use crate::error::{Result, VfsError};
use crate::item::{ItemCache, VirtualFile, normalize_path};
use crate::notification::{FileWatcherListener, ListenerId, NotificationHandler};
use crate::search::{IndexedFile, SearchIndex, SearchIndexUpdater};
use crate::sidecar::{self, SERVICE_DIR};

/// Length of generated lock tokens.
pub const LOCK_TOKEN_LENGTH: usize = 16;

/// Called once when a file system is closed.
pub type CloseCallback = Box<dyn FnOnce() + Send + Sync>;

/// Property changes: `Some` sets a value, `None` removes the key.
pub type PropertyUpdates = BTreeMap<String, Option<String>>;

/// Decoded side-car records, keyed by item path.
#[derive(Debug, Default)]
struct RecordCache {
    properties: HashMap<PathBuf, BTreeMap<String, String>>,
    locks: HashMap<PathBuf, Option<LockRecord>>,
}

impl RecordCache {
    fn forget(&mut self, path: &Path) {
        self.properties.retain(|cached, _| !cached.starts_with(path));
        self.locks.retain(|cached, _| !cached.starts_with(path));
    }
}

/// A tree of files and folders under one root directory.
///
/// Item properties and file locks are stored in side-car records next to
/// each item. A [`TreeWatcher`] reports external changes to subscribed
/// listeners, and an optional [`SearchIndex`] follows those changes.
pub struct LocalFileSystem {
    root: PathBuf,
    items: Arc<ItemCache>,
    notifications: Arc<NotificationHandler>,
    watcher: TreeWatcher,
    search: Option<Arc<SearchIndex>>,
    records: tokio::sync::Mutex<RecordCache>,
    closed: AtomicBool,
    on_close: Mutex<Option<CloseCallback>>,
}

impl LocalFileSystem {
    /// Open the file system described by `config`.
    pub fn new(config: FileSystemConfig, on_close: Option<CloseCallback>) -> Result<Self> {
        if !config.root.is_dir() {
            return Err(VfsError::NotFound(config.root));
        }
        let root = dunce::canonicalize(&config.root)?;

        let mut watcher_config = config.watcher;
        if !watcher_config.exclude_patterns.iter().any(|p| p == SERVICE_DIR) {
            watcher_config = watcher_config.exclude(SERVICE_DIR);
        }

        let items = Arc::new(ItemCache::new(&root));
        let notifications = Arc::new(NotificationHandler::new(
            Arc::clone(&items) as Arc<dyn crate::item::ItemResolver>
        ));
        let watcher = TreeWatcher::new(
            &root,
            watcher_config,
            Arc::clone(&notifications) as Arc<dyn FileWatcherEventSink>,
        )?;

        let search = if config.search_index {
            let index = Arc::new(SearchIndex::new(&root));
            index.scan(watcher.exclusions())?;
            notifications.add_listener(Arc::new(SearchIndexUpdater::new(Arc::clone(&index))));
            Some(index)
        } else {
            None
        };

        if config.watch_on_start {
            watcher.startup()?;
        }

        info!("Opened local file system: {}", root.display());
        Ok(Self {
            root,
            items,
            notifications,
            watcher,
            search,
            records: tokio::sync::Mutex::new(RecordCache::default()),
            closed: AtomicBool::new(false),
            on_close: Mutex::new(on_close),
        })
    }

    /// The canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The tree watcher.
    pub fn watcher(&self) -> &TreeWatcher {
        &self.watcher
    }

    /// The notification handler receiving watcher events.
    pub fn notifications(&self) -> &Arc<NotificationHandler> {
        &self.notifications
    }

    /// The search index, when enabled.
    pub fn search_index(&self) -> Option<&Arc<SearchIndex>> {
        self.search.as_ref()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VfsError::Closed);
        }
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<VirtualFile> {
        match fs::metadata(self.root.join(path)).await {
            Ok(metadata) => {
                let item = VirtualFile::from_metadata(path, &metadata);
                self.items.remember(item.clone());
                Ok(item)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.items.forget(path);
                Err(VfsError::NotFound(path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn existing(&self, path: impl AsRef<Path>) -> Result<VirtualFile> {
        self.ensure_open()?;
        let path = normalize_path(path)?;
        self.stat(&path).await
    }

    async fn existing_file(&self, path: impl AsRef<Path>) -> Result<VirtualFile> {
        let item = self.existing(path).await?;
        if !item.is_file() {
            return Err(VfsError::NotAFile(item.path));
        }
        Ok(item)
    }

    async fn existing_folder(&self, path: impl AsRef<Path>) -> Result<VirtualFile> {
        let item = self.existing(path).await?;
        if !item.is_folder() {
            return Err(VfsError::NotAFolder(item.path));
        }
        Ok(item)
    }

    /// The root folder.
    pub async fn root_item(&self) -> Result<VirtualFile> {
        self.existing("").await
    }

    /// The item at `path`, or `None` if nothing exists there.
    pub async fn get_child(&self, path: impl AsRef<Path>) -> Result<Option<VirtualFile>> {
        match self.existing(path).await {
            Ok(item) => Ok(Some(item)),
            Err(VfsError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Items directly inside the folder at `path`, sorted by name.
    pub async fn children(&self, path: impl AsRef<Path>) -> Result<Vec<VirtualFile>> {
        let folder = self.existing_folder(path).await?;
        let mut entries = fs::read_dir(self.root.join(&folder.path)).await?;
        let mut children = BTreeMap::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name == SERVICE_DIR {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let item = VirtualFile::from_metadata(folder.path.join(&name), &metadata);
            self.items.remember(item.clone());
            children.insert(name, item);
        }
        Ok(children.into_values().collect())
    }

    fn child_path(parent: &Path, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && name != SERVICE_DIR
            && !name.contains(['/', '\\']);
        if !valid {
            return Err(VfsError::InvalidPath(name.to_string()));
        }
        Ok(parent.join(name))
    }

    /// Create a file named `name` inside the folder at `parent`.
    pub async fn create_file(
        &self,
        parent: impl AsRef<Path>,
        name: &str,
        content: &[u8],
    ) -> Result<VirtualFile> {
        let parent = self.existing_folder(parent).await?;
        let path = Self::child_path(&parent.path, name)?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.root.join(&path))
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(VfsError::AlreadyExists(path));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(content).await?;
        file.flush().await?;
        drop(file);

        let item = self.stat(&path).await?;
        if let Some(search) = &self.search {
            search.add(&item)?;
        }
        debug!("Created file: {}", item.display_path());
        Ok(item)
    }

    /// Create a folder named `name` inside the folder at `parent`.
    pub async fn create_folder(&self, parent: impl AsRef<Path>, name: &str) -> Result<VirtualFile> {
        let parent = self.existing_folder(parent).await?;
        let path = Self::child_path(&parent.path, name)?;
        match fs::create_dir(self.root.join(&path)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(VfsError::AlreadyExists(path));
            }
            Err(e) => return Err(e.into()),
        }
        let item = self.stat(&path).await?;
        debug!("Created folder: {}", item.display_path());
        Ok(item)
    }

    /// Read the content of the file at `path`.
    pub async fn read_content(&self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        let item = self.existing_file(path).await?;
        Ok(fs::read(self.root.join(&item.path)).await?)
    }

    /// Replace the content of the file at `path`. A locked file requires its
    /// lock token.
    pub async fn update_content(
        &self,
        path: impl AsRef<Path>,
        content: &[u8],
        lock_token: Option<&str>,
    ) -> Result<VirtualFile> {
        let item = self.existing_file(path).await?;
        {
            let mut records = self.records.lock().await;
            self.check_lock(&mut records, &item.path, lock_token).await?;
            fs::write(self.root.join(&item.path), content).await?;
        }
        let item = self.stat(&item.path).await?;
        if let Some(search) = &self.search {
            search.update(&item)?;
        }
        Ok(item)
    }

    /// Delete the item at `path` with its side-car records.
    ///
    /// A locked file requires its lock token. A folder containing any locked
    /// file cannot be deleted. The root cannot be deleted.
    pub async fn delete(&self, path: impl AsRef<Path>, lock_token: Option<&str>) -> Result<()> {
        let item = self.existing(path).await?;
        if item.is_root() {
            return Err(VfsError::InvalidPath("/".to_string()));
        }

        let mut records = self.records.lock().await;
        self.check_unlocked(&mut records, &item, lock_token).await?;
        let absolute = self.root.join(&item.path);
        if item.is_file() {
            fs::remove_file(&absolute).await?;
        } else {
            fs::remove_dir_all(&absolute).await?;
        }
        sidecar::remove_record(&sidecar::properties_file(&self.root, &item.path)).await?;
        sidecar::remove_record(&sidecar::lock_file(&self.root, &item.path)).await?;
        records.forget(&item.path);
        drop(records);

        self.items.forget(&item.path);
        if let Some(search) = &self.search {
            search.delete(&item.path, item.is_file())?;
        }
        debug!("Deleted: {}", item.display_path());
        Ok(())
    }

    /// Copy the item at `source` into the folder at `parent`, named `name` or
    /// keeping its own name.
    ///
    /// Properties travel with the copy, locks do not. An item already at the
    /// target is deleted first when `overwrite` is set.
    pub async fn copy(
        &self,
        source: impl AsRef<Path>,
        parent: impl AsRef<Path>,
        name: Option<&str>,
        overwrite: bool,
    ) -> Result<VirtualFile> {
        let source = self.existing(source).await?;
        let parent = self.existing_folder(parent).await?;
        let target = Self::relocation_target(&source, &parent, name)?;
        if source.path.starts_with(&target) {
            return Err(VfsError::InvalidDestination(target));
        }
        self.clear_target(&target, overwrite).await?;

        let mut records = self.records.lock().await;
        let properties = sidecar::properties_file(&self.root, &target);
        if !sidecar::copy_record(&sidecar::properties_file(&self.root, &source.path), &properties)
            .await?
        {
            sidecar::remove_record(&properties).await?;
        }
        sidecar::remove_record(&sidecar::lock_file(&self.root, &target)).await?;
        copy_tree(&self.root.join(&source.path), &self.root.join(&target)).await?;
        records.forget(&target);
        drop(records);

        let item = self.stat(&target).await?;
        self.index_tree(&item)?;
        debug!("Copied {} to {}", source.display_path(), item.display_path());
        Ok(item)
    }

    /// Rename the item at `path` inside its folder.
    ///
    /// A locked file requires its lock token and a folder holding a locked
    /// file cannot be renamed. Properties and the lock travel with the item.
    pub async fn rename(
        &self,
        path: impl AsRef<Path>,
        new_name: &str,
        lock_token: Option<&str>,
    ) -> Result<VirtualFile> {
        let item = self.existing(path).await?;
        if item.is_root() {
            return Err(VfsError::InvalidPath("/".to_string()));
        }
        let parent = item.path.parent().map(Path::to_path_buf).unwrap_or_default();
        let target = Self::child_path(&parent, new_name)?;
        if target == item.path {
            let mut records = self.records.lock().await;
            self.check_unlocked(&mut records, &item, lock_token).await?;
            return Ok(item);
        }
        if self.get_child(&target).await?.is_some() {
            return Err(VfsError::AlreadyExists(target));
        }
        self.relocate(item, &target, lock_token).await
    }

    /// Move the item at `source` into the folder at `parent`, named `name` or
    /// keeping its own name.
    ///
    /// Lock rules are those of [`rename`](Self::rename). An item already at
    /// the target is deleted first when `overwrite` is set.
    pub async fn move_item(
        &self,
        source: impl AsRef<Path>,
        parent: impl AsRef<Path>,
        name: Option<&str>,
        overwrite: bool,
        lock_token: Option<&str>,
    ) -> Result<VirtualFile> {
        let item = self.existing(source).await?;
        if item.is_root() {
            return Err(VfsError::InvalidPath("/".to_string()));
        }
        let parent = self.existing_folder(parent).await?;
        let target = Self::relocation_target(&item, &parent, name)?;
        {
            let mut records = self.records.lock().await;
            self.check_unlocked(&mut records, &item, lock_token).await?;
        }
        if target == item.path {
            return Ok(item);
        }
        if item.path.starts_with(&target) {
            return Err(VfsError::InvalidDestination(target));
        }
        self.clear_target(&target, overwrite).await?;
        self.relocate(item, &target, lock_token).await
    }

    /// Where a copy or move of `source` into `parent` lands.
    fn relocation_target(
        source: &VirtualFile,
        parent: &VirtualFile,
        name: Option<&str>,
    ) -> Result<PathBuf> {
        if source.is_folder() && parent.path.starts_with(&source.path) {
            return Err(VfsError::InvalidDestination(parent.path.clone()));
        }
        let name = match name {
            Some(name) if !name.is_empty() => name,
            _ => source.name.as_str(),
        };
        Self::child_path(&parent.path, name)
    }

    /// Make room at `target`, deleting what is there only with `overwrite`.
    async fn clear_target(&self, target: &Path, overwrite: bool) -> Result<()> {
        match self.get_child(target).await? {
            None => Ok(()),
            Some(_) if overwrite => self.delete(target, None).await,
            Some(existing) => Err(VfsError::AlreadyExists(existing.path)),
        }
    }

    /// Move an item with its side-car records to `target`.
    async fn relocate(
        &self,
        item: VirtualFile,
        target: &Path,
        lock_token: Option<&str>,
    ) -> Result<VirtualFile> {
        let mut records = self.records.lock().await;
        self.check_unlocked(&mut records, &item, lock_token).await?;
        fs::rename(self.root.join(&item.path), self.root.join(target)).await?;

        let side_cars = [
            (
                sidecar::properties_file(&self.root, &item.path),
                sidecar::properties_file(&self.root, target),
            ),
            (
                sidecar::lock_file(&self.root, &item.path),
                sidecar::lock_file(&self.root, target),
            ),
        ];
        for (from, to) in &side_cars {
            if !sidecar::move_record(from, to).await? {
                sidecar::remove_record(to).await?;
            }
        }
        records.forget(&item.path);
        records.forget(target);
        drop(records);

        self.items.forget(&item.path);
        let moved = self.stat(target).await?;
        if let Some(search) = &self.search {
            search.delete(&item.path, item.is_file())?;
        }
        self.index_tree(&moved)?;
        debug!("Moved {} to {}", item.display_path(), moved.display_path());
        Ok(moved)
    }

    fn index_tree(&self, item: &VirtualFile) -> Result<()> {
        if let Some(search) = &self.search {
            search.add_tree(item, self.watcher.exclusions())?;
        }
        Ok(())
    }

    /// Fail for a locked file without its token, or a folder holding any
    /// locked file.
    async fn check_unlocked(
        &self,
        records: &mut RecordCache,
        item: &VirtualFile,
        lock_token: Option<&str>,
    ) -> Result<()> {
        if item.is_file() {
            return self.check_lock(records, &item.path, lock_token).await;
        }
        match self.find_locked_file(records, &item.path).await? {
            Some(locked) => Err(VfsError::Locked(locked)),
            None => Ok(()),
        }
    }

    async fn find_locked_file(
        &self,
        records: &mut RecordCache,
        folder: &Path,
    ) -> Result<Option<PathBuf>> {
        let files: Vec<PathBuf> = WalkDir::new(self.root.join(folder))
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| entry.file_name() != SERVICE_DIR)
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&self.root)
                    .ok()
                    .map(Path::to_path_buf)
            })
            .collect();
        for file in files {
            if self.current_lock(records, &file).await?.is_some() {
                return Ok(Some(file));
            }
        }
        Ok(None)
    }

    async fn load_properties(
        &self,
        records: &mut RecordCache,
        path: &Path,
    ) -> Result<BTreeMap<String, String>> {
        if let Some(cached) = records.properties.get(path) {
            return Ok(cached.clone());
        }
        let file = sidecar::properties_file(&self.root, path);
        let properties = match sidecar::read_record(&file).await? {
            Some(bytes) => MetadataCodec::decode(&bytes)
                .map_err(|source| VfsError::Codec { path: file, source })?,
            None => BTreeMap::new(),
        };
        records
            .properties
            .insert(path.to_path_buf(), properties.clone());
        Ok(properties)
    }

    /// All properties of the item at `path`.
    pub async fn get_properties(&self, path: impl AsRef<Path>) -> Result<BTreeMap<String, String>> {
        let item = self.existing(path).await?;
        let mut records = self.records.lock().await;
        self.load_properties(&mut records, &item.path).await
    }

    /// One property of the item at `path`.
    pub async fn get_property(&self, path: impl AsRef<Path>, name: &str) -> Result<Option<String>> {
        Ok(self.get_properties(path).await?.remove(name))
    }

    /// Apply property changes to the item at `path` and return the result.
    ///
    /// Removing the last property deletes the side-car record. A locked file
    /// requires its lock token.
    pub async fn update_properties(
        &self,
        path: impl AsRef<Path>,
        updates: PropertyUpdates,
        lock_token: Option<&str>,
    ) -> Result<BTreeMap<String, String>> {
        let item = self.existing(path).await?;
        let mut records = self.records.lock().await;
        if item.is_file() {
            self.check_lock(&mut records, &item.path, lock_token).await?;
        }

        let mut properties = self.load_properties(&mut records, &item.path).await?;
        for (name, value) in updates {
            match value {
                Some(value) => {
                    properties.insert(name, value);
                }
                None => {
                    properties.remove(&name);
                }
            }
        }

        let file = sidecar::properties_file(&self.root, &item.path);
        if properties.is_empty() {
            sidecar::remove_record(&file).await?;
        } else {
            let bytes = MetadataCodec::encode(&properties)
                .map_err(|source| VfsError::Codec { path: file.clone(), source })?;
            sidecar::write_record(&file, &bytes).await?;
        }
        records
            .properties
            .insert(item.path.clone(), properties.clone());
        Ok(properties)
    }

    /// Set or, with `None`, remove one property of the item at `path`.
    pub async fn set_property(
        &self,
        path: impl AsRef<Path>,
        name: &str,
        value: Option<String>,
        lock_token: Option<&str>,
    ) -> Result<BTreeMap<String, String>> {
        let updates = PropertyUpdates::from([(name.to_string(), value)]);
        self.update_properties(path, updates, lock_token).await
    }

    /// The live lock on a file. Expired locks are removed on the way.
    async fn current_lock(
        &self,
        records: &mut RecordCache,
        path: &Path,
    ) -> Result<Option<LockRecord>> {
        let file = sidecar::lock_file(&self.root, path);
        let lock = match records.locks.get(path) {
            Some(cached) => cached.clone(),
            None => match sidecar::read_record(&file).await? {
                Some(bytes) => Some(
                    LockCodec::decode(&bytes).map_err(|source| VfsError::Codec {
                        path: file.clone(),
                        source,
                    })?,
                ),
                None => None,
            },
        };

        let lock = match lock {
            Some(lock) if lock.is_expired(Utc::now()) => {
                debug!("Removing expired lock: {}", path.display());
                sidecar::remove_record(&file).await?;
                None
            }
            other => other,
        };
        records.locks.insert(path.to_path_buf(), lock.clone());
        Ok(lock)
    }

    async fn check_lock(
        &self,
        records: &mut RecordCache,
        path: &Path,
        lock_token: Option<&str>,
    ) -> Result<()> {
        match self.current_lock(records, path).await? {
            Some(lock) if lock_token != Some(lock.token.as_str()) => {
                Err(VfsError::Locked(path.to_path_buf()))
            }
            _ => Ok(()),
        }
    }

    /// Lock the file at `path` and return the lock token. A zero timeout
    /// never expires.
    pub async fn lock(&self, path: impl AsRef<Path>, timeout: Duration) -> Result<String> {
        let item = self.existing(path).await?;
        if !item.is_file() {
            return Err(VfsError::LockOnFolder(item.path));
        }

        let mut records = self.records.lock().await;
        if self.current_lock(&mut records, &item.path).await?.is_some() {
            return Err(VfsError::Locked(item.path));
        }

        let record = LockRecord::new(generate_token(), timeout, Utc::now());
        let file = sidecar::lock_file(&self.root, &item.path);
        let bytes = LockCodec::encode(&record)
            .map_err(|source| VfsError::Codec { path: file.clone(), source })?;
        sidecar::write_record(&file, &bytes).await?;

        let token = record.token.clone();
        records.locks.insert(item.path.clone(), Some(record));
        debug!("Locked file: {}", item.display_path());
        Ok(token)
    }

    /// Remove the lock on the file at `path`.
    pub async fn unlock(&self, path: impl AsRef<Path>, lock_token: &str) -> Result<()> {
        let item = self.existing(path).await?;
        if !item.is_file() {
            return Err(VfsError::NotLocked(item.path));
        }

        let mut records = self.records.lock().await;
        let Some(lock) = self.current_lock(&mut records, &item.path).await? else {
            return Err(VfsError::NotLocked(item.path));
        };
        if lock.token != lock_token {
            return Err(VfsError::InvalidLockToken(item.path));
        }

        sidecar::remove_record(&sidecar::lock_file(&self.root, &item.path)).await?;
        records.locks.insert(item.path.clone(), None);
        debug!("Unlocked file: {}", item.display_path());
        Ok(())
    }

    /// Whether the item at `path` is a locked file.
    pub async fn is_locked(&self, path: impl AsRef<Path>) -> Result<bool> {
        Ok(self.lock_info(path).await?.is_some())
    }

    /// The live lock on the item at `path`. Folders are never locked.
    pub async fn lock_info(&self, path: impl AsRef<Path>) -> Result<Option<LockRecord>> {
        let item = self.existing(path).await?;
        if !item.is_file() {
            return Ok(None);
        }
        let mut records = self.records.lock().await;
        self.current_lock(&mut records, &item.path).await
    }

    /// Indexed files whose path contains `pattern`, ignoring case. Empty when
    /// the search index is disabled.
    pub fn search(&self, pattern: &str) -> Result<Vec<IndexedFile>> {
        self.ensure_open()?;
        match &self.search {
            Some(search) => search.search(pattern),
            None => Ok(Vec::new()),
        }
    }

    /// Subscribe an item listener to watcher events.
    pub fn add_listener(&self, listener: Arc<dyn FileWatcherListener>) -> ListenerId {
        self.notifications.add_listener(listener)
    }

    /// Unsubscribe an item listener.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.notifications.remove_listener(id)
    }

    /// Subscribe a raw sink to watcher events.
    pub fn add_raw_listener(&self, sink: Arc<dyn FileWatcherEventSink>) -> ListenerId {
        self.notifications.add_raw_listener(sink)
    }

    /// Unsubscribe a raw sink.
    pub fn remove_raw_listener(&self, id: ListenerId) -> bool {
        self.notifications.remove_raw_listener(id)
    }

    /// Close the file system.
    ///
    /// Closes the search index, stops the watcher, drops cached records and
    /// runs the close callback. Later operations fail with
    /// [`VfsError::Closed`]. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(search) = &self.search {
            search.close();
        }
        self.watcher.shutdown();
        self.items.clear();
        match self.records.try_lock() {
            Ok(mut records) => *records = RecordCache::default(),
            Err(_) => warn!("Record cache busy during close: {}", self.root.display()),
        }

        let callback = self
            .on_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback();
        }
        info!("Closed local file system: {}", self.root.display());
    }

    /// Check if the file system is closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for LocalFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFileSystem")
            .field("root", &self.root)
            .field("closed", &self.is_closed())
            .field("watcher", &self.watcher)
            .finish_non_exhaustive()
    }
}

/// Copy a file, or a folder with everything beneath it except lock records.
async fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    let entries = WalkDir::new(from)
        .into_iter()
        .filter_entry(|entry| !sidecar::is_lock_dir(entry.path()))
        .collect::<std::result::Result<Vec<_>, walkdir::Error>>()?;
    for entry in entries {
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let target = if relative.as_os_str().is_empty() {
            to.to_path_buf()
        } else {
            to.join(relative)
        };
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).await?;
        } else {
            fs::copy(entry.path(), &target).await?;
        }
    }
    Ok(())
}

fn generate_token() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(LOCK_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}
