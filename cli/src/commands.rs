//! Command implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vfs_local_fs::{FileSystemConfig, FileWatcherListener, LocalFileSystem, VirtualFile};
use vfs_tree_watcher::{
    FileWatcherEvent, FileWatcherEventKind, FileWatcherEventSink, WatcherConfig, WatcherError,
};

/// Settings read from `--config`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileOptions {
    watcher: Option<WatcherConfig>,
    search_index: Option<bool>,
}

/// Settings shared by every command.
#[derive(Debug)]
pub struct Options {
    watcher: WatcherConfig,
    search_index: bool,
}

impl Options {
    /// Merge the optional config file with extra exclude patterns.
    pub fn load(config: Option<&Path>, excludes: Vec<String>) -> Result<Self> {
        let file = match config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                toml::from_str::<FileOptions>(&text)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => FileOptions::default(),
        };

        let mut watcher = file.watcher.unwrap_or_default();
        watcher.exclude_patterns.extend(excludes);
        Ok(Self {
            watcher,
            search_index: file.search_index.unwrap_or(true),
        })
    }

    fn open(&self, root: PathBuf) -> Result<LocalFileSystem> {
        let mut config = FileSystemConfig::new(&root)
            .with_watcher(self.watcher.clone())
            .without_watching();
        config.search_index = self.search_index;
        LocalFileSystem::new(config, None).with_context(|| format!("opening {}", root.display()))
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Prints raw watcher events.
struct EventPrinter;

impl FileWatcherEventSink for EventPrinter {
    fn started(&self, root: &Path) {
        info!("Watching: {}", root.display());
    }

    fn error_occurred(&self, root: &Path, error: &WatcherError) {
        warn!("Watcher error under {}: {error}", root.display());
    }

    fn handle_event(&self, event: &FileWatcherEvent) {
        if let Err(e) = print_json(event) {
            warn!("Failed to print event: {e}");
        }
    }
}

#[derive(Serialize)]
struct ItemEvent<'a> {
    kind: FileWatcherEventKind,
    item: &'a VirtualFile,
}

/// Prints events resolved to items.
struct ItemPrinter;

impl FileWatcherListener for ItemPrinter {
    fn on_file_watcher_event(&self, item: &VirtualFile, kind: FileWatcherEventKind) {
        if let Err(e) = print_json(&ItemEvent { kind, item }) {
            warn!("Failed to print event: {e}");
        }
    }

    fn on_error(&self, root: &Path, error: &WatcherError) {
        warn!("Watcher error under {}: {error}", root.display());
    }

    fn on_started(&self, root: &Path) {
        info!("Watching: {}", root.display());
    }
}

pub async fn watch(options: &Options, root: PathBuf, items: bool) -> Result<()> {
    let vfs = options.open(root)?;
    if items {
        vfs.add_listener(Arc::new(ItemPrinter));
    } else {
        vfs.add_raw_listener(Arc::new(EventPrinter));
    }
    vfs.watcher().startup()?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Interrupted, shutting down");
    vfs.close();
    Ok(())
}

pub async fn list(options: &Options, root: PathBuf, path: &str) -> Result<()> {
    let vfs = options.open(root)?;
    for item in vfs.children(path).await? {
        print_json(&item)?;
    }
    vfs.close();
    Ok(())
}

pub fn search(options: &Options, root: PathBuf, pattern: &str) -> Result<()> {
    let vfs = options.open(root)?;
    for file in vfs.search(pattern)? {
        print_json(&file)?;
    }
    vfs.close();
    Ok(())
}

pub async fn props_get(
    options: &Options,
    root: PathBuf,
    path: &str,
    name: Option<&str>,
) -> Result<()> {
    let vfs = options.open(root)?;
    match name {
        Some(name) => match vfs.get_property(path, name).await? {
            Some(value) => println!("{value}"),
            None => bail!("property {name} is not set on {path}"),
        },
        None => print_json(&vfs.get_properties(path).await?)?,
    }
    vfs.close();
    Ok(())
}

pub async fn props_set(
    options: &Options,
    root: PathBuf,
    path: &str,
    name: &str,
    value: Option<String>,
    token: Option<&str>,
) -> Result<()> {
    let vfs = options.open(root)?;
    let properties = vfs.set_property(path, name, value, token).await?;
    print_json(&properties)?;
    vfs.close();
    Ok(())
}

pub async fn lock(options: &Options, root: PathBuf, path: &str, timeout_ms: u64) -> Result<()> {
    let vfs = options.open(root)?;
    let token = vfs.lock(path, Duration::from_millis(timeout_ms)).await?;
    println!("{token}");
    vfs.close();
    Ok(())
}

pub async fn unlock(options: &Options, root: PathBuf, path: &str, token: &str) -> Result<()> {
    let vfs = options.open(root)?;
    vfs.unlock(path, token).await?;
    vfs.close();
    Ok(())
}

pub async fn copy(
    options: &Options,
    root: PathBuf,
    source: &str,
    parent: &str,
    name: Option<&str>,
    overwrite: bool,
) -> Result<()> {
    let vfs = options.open(root)?;
    let item = vfs.copy(source, parent, name, overwrite).await?;
    print_json(&item)?;
    vfs.close();
    Ok(())
}

/// Where a moved item lands.
pub struct Target<'a> {
    pub parent: &'a str,
    pub name: Option<&'a str>,
    pub overwrite: bool,
}

pub async fn move_item(
    options: &Options,
    root: PathBuf,
    source: &str,
    target: Target<'_>,
    token: Option<&str>,
) -> Result<()> {
    let vfs = options.open(root)?;
    let item = vfs
        .move_item(source, target.parent, target.name, target.overwrite, token)
        .await?;
    print_json(&item)?;
    vfs.close();
    Ok(())
}
