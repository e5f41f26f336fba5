//! Side-car record storage.
//!
//! Properties and locks of an item live next to it, in the service directory
//! of the item's parent folder:
//!
//! ```text
//! parent/
//! ├── item.txt
//! └── .vfs/
//!     ├── props/item.txt_props
//!     └── locks/item.txt_lock
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

/// Name of the per-folder service directory.
pub const SERVICE_DIR: &str = ".vfs";

const PROPERTIES_DIR: &str = "props";
const PROPERTIES_SUFFIX: &str = "_props";
const LOCKS_DIR: &str = "locks";
const LOCK_SUFFIX: &str = "_lock";

/// Properties record location for the item at relative `path`.
pub(crate) fn properties_file(root: &Path, path: &Path) -> PathBuf {
    record_file(root, path, PROPERTIES_DIR, PROPERTIES_SUFFIX)
}

/// Lock record location for the item at relative `path`.
pub(crate) fn lock_file(root: &Path, path: &Path) -> PathBuf {
    record_file(root, path, LOCKS_DIR, LOCK_SUFFIX)
}

fn record_file(root: &Path, path: &Path, dir: &str, suffix: &str) -> PathBuf {
    let parent = path.parent().map_or_else(|| root.to_path_buf(), |p| root.join(p));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    parent
        .join(SERVICE_DIR)
        .join(dir)
        .join(format!("{name}{suffix}"))
}

/// Read a record. A missing file reads as `None`.
pub(crate) async fn read_record(file: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match fs::read(file).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write a record atomically.
pub(crate) async fn write_record(file: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut temp = file.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);
    fs::write(&temp, bytes).await?;
    fs::rename(&temp, file).await?;
    debug!("Wrote side-car record: {}", file.display());
    Ok(())
}

/// Remove a record. Removing a missing record succeeds.
pub(crate) async fn remove_record(file: &Path) -> std::io::Result<()> {
    match fs::remove_file(file).await {
        Ok(()) => {
            debug!("Removed side-car record: {}", file.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Copy a record to another item's location. Returns whether one existed.
pub(crate) async fn copy_record(from: &Path, to: &Path) -> std::io::Result<bool> {
    match read_record(from).await? {
        Some(bytes) => {
            write_record(to, &bytes).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Move a record to another item's location. Returns whether one existed.
pub(crate) async fn move_record(from: &Path, to: &Path) -> std::io::Result<bool> {
    if fs::metadata(from).await.is_err() {
        return Ok(false);
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::rename(from, to).await?;
    debug!("Moved side-car record: {} -> {}", from.display(), to.display());
    Ok(true)
}

/// Whether `dir` holds lock records, which never travel with a copy.
pub(crate) fn is_lock_dir(dir: &Path) -> bool {
    dir.file_name().is_some_and(|name| name == LOCKS_DIR)
        && dir
            .parent()
            .and_then(Path::file_name)
            .is_some_and(|name| name == SERVICE_DIR)
}
