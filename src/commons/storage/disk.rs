use std::{
    fmt, fs,
    fs::{File, OpenOptions},
    io,
    path::{Component, Path, PathBuf},
};

use serde_json::Value;

use crate::commons::{
    error::IrrdIoError,
    storage::{Key, KeyValueError, KeyValueStoreDispatcher, Scope, Segment, StorageResult},
};

pub const LOCK_FILE_NAME: &str = "lockfile.lock";
pub const LOCK_FILE_DIR: &str = ".locks";

fn io_err(context: String) -> impl FnOnce(io::Error) -> KeyValueError {
    move |e| KeyValueError::IoError(IrrdIoError::new(context, e))
}

//------------ Disk ----------------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Disk {
    root: PathBuf,
    tmp: PathBuf,
}

impl Disk {
    /// Creates a disk based store for the given base path and namespace.
    ///
    /// Values live under path/namespace. New values are first written to
    /// a temporary file under path/tmp and then renamed, so that readers
    /// never see a partially written file.
    pub fn new(path: &str, namespace: &str) -> StorageResult<Self> {
        let root = PathBuf::from(path).join(namespace);
        let tmp = PathBuf::from(path).join("tmp");

        if !tmp.exists() {
            fs::create_dir_all(&tmp)
                .map_err(io_err(format!("Cannot create directory for tmp files: {}", tmp.display())))?;
        }

        Ok(Disk { root, tmp })
    }

    /// Runs the operation while holding the lock file for the scope.
    pub fn execute<F, T>(&self, scope: &Scope, op: F) -> StorageResult<T>
    where
        F: FnOnce(&KeyValueStoreDispatcher) -> StorageResult<T>,
    {
        let mut file_lock = FileLock::create(scope.as_path(self.root.join(LOCK_FILE_DIR)))?;
        let _write_lock = file_lock.write()?;
        op(&KeyValueStoreDispatcher::Disk(self))
    }
}

impl fmt::Display for Disk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local://{}", self.root.display())
    }
}

impl Disk {
    pub fn is_empty(&self) -> StorageResult<bool> {
        if let Ok(entries) = self.root.read_dir() {
            for e in entries.flatten() {
                if !e.path().ends_with(LOCK_FILE_DIR) {
                    return Ok(false);
                }
            }
        }
        // non existent dir counts as empty
        Ok(true)
    }

    pub fn has(&self, key: &Key) -> StorageResult<bool> {
        Ok(key.as_path(&self.root).exists())
    }

    pub fn get(&self, key: &Key) -> StorageResult<Option<Value>> {
        let path = key.as_path(&self.root);
        if path.exists() {
            let value = fs::read_to_string(&path).map_err(io_err(format!("cannot read file: {}", path.display())))?;
            Ok(Some(serde_json::from_str(&value)?))
        } else {
            Ok(None)
        }
    }

    pub fn list_keys(&self, scope: &Scope) -> StorageResult<Vec<Key>> {
        let path = scope.as_path(&self.root);
        if !path.exists() {
            return Ok(vec![]);
        }

        list_files_recursive(path)?
            .into_iter()
            .map(|path| path_to_key(&path, &self.root))
            .collect()
    }

    /// Stores a value on disk. The entire value is written into a
    /// tempfile first, before it is renamed to the actual file for the key.
    pub fn store(&self, key: &Key, value: Value) -> StorageResult<()> {
        if key.scope().segments().first().map(Segment::as_str) == Some(LOCK_FILE_DIR) {
            return Err(KeyValueError::Other(format!("reserved key: {key}")));
        }

        let path = key.as_path(&self.root);
        let dir = key.scope().as_path(&self.root);

        if !dir.try_exists().unwrap_or_default() {
            fs::create_dir_all(&dir).map_err(io_err(format!("cannot create dir for path: {}", dir.display())))?;
        }

        let tmp_file = tempfile::NamedTempFile::new_in(&self.tmp).map_err(io_err(format!(
            "Issue writing tmp file for key: {key}. Check permissions and space on disk."
        )))?;

        fs::write(&tmp_file, format!("{value:#}").as_bytes()).map_err(io_err(format!(
            "Issue writing tmp file: {} for key: {}. Check permissions and space on disk.",
            tmp_file.as_ref().display(),
            key
        )))?;

        // Replaces an existing file, atomically on unix file systems.
        tmp_file.persist(&path).map_err(|e| {
            KeyValueError::IoError(IrrdIoError::new(
                format!("Cannot rename temp file {} to {}.", e.file.path().display(), path.display()),
                e.error,
            ))
        })?;

        Ok(())
    }

    /// Deletes the key. Deleting a key that does not exist is a no-op.
    pub fn delete(&self, key: &Key) -> StorageResult<()> {
        let path = key.as_path(&self.root);
        if !path.exists() {
            return Ok(());
        }

        fs::remove_file(&path).map_err(io_err(format!("cannot remove file: {}", path.display())))?;
        if let Some(parent) = path.parent() {
            remove_empty_parent_dirs(parent, &self.root);
        }

        Ok(())
    }

    pub fn delete_scope(&self, scope: &Scope) -> StorageResult<()> {
        let path = scope.as_path(&self.root);
        if !path.exists() {
            return Ok(());
        }

        fs::remove_dir_all(&path).map_err(io_err(format!("cannot remove dir for {}", path.display())))?;
        if let Some(parent) = path.parent() {
            remove_empty_parent_dirs(parent, &self.root);
        }

        Ok(())
    }

    pub fn clear(&self) -> StorageResult<()> {
        if self.root.exists() {
            for entry in self.root.read_dir().map_err(io_err(format!("cannot read dir {}", self.root.display())))? {
                let path = entry
                    .map_err(io_err(format!("cannot read entry in dir {}", self.root.display())))?
                    .path();
                if path.ends_with(LOCK_FILE_DIR) {
                    continue;
                }
                if path.is_dir() {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                }
                .map_err(io_err(format!("cannot remove {}", path.display())))?;
            }
        }
        Ok(())
    }
}

//------------ Paths ---------------------------------------------------------

trait AsPath {
    fn as_path(&self, root: impl AsRef<Path>) -> PathBuf;
}

impl AsPath for Key {
    fn as_path(&self, root: impl AsRef<Path>) -> PathBuf {
        let mut path = self.scope().as_path(root);
        path.push(self.name().as_str());
        path
    }
}

impl AsPath for Scope {
    fn as_path(&self, root: impl AsRef<Path>) -> PathBuf {
        let mut path = root.as_ref().to_path_buf();
        for segment in self {
            path.push(segment.as_str());
        }
        path
    }
}

fn path_to_key(path: &Path, root: &Path) -> StorageResult<Key> {
    let relative = path
        .strip_prefix(root)
        .map_err(|e| KeyValueError::Other(format!("cannot strip prefix: {e}")))?;

    let mut segments = relative
        .components()
        .map(|component| match component {
            Component::Normal(segment) => Ok(Segment::parse(&segment.to_string_lossy())?),
            other => Err(KeyValueError::Other(format!(
                "unexpected path component: {}",
                other.as_os_str().to_string_lossy()
            ))),
        })
        .collect::<StorageResult<Vec<_>>>()?;

    let name = segments
        .pop()
        .ok_or_else(|| KeyValueError::Other(format!("cannot get key from path: {}", path.display())))?;

    Ok(Key::new_scoped(Scope::new(segments), name))
}

fn list_files_recursive(dir: impl AsRef<Path>) -> StorageResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut files = Vec::new();

    for result in fs::read_dir(dir).map_err(io_err(format!("cannot read dir {}", dir.display())))? {
        let path = result
            .map_err(io_err(format!("cannot read entry in dir {}", dir.display())))?
            .path();

        if path.ends_with(LOCK_FILE_DIR) {
            continue;
        } else if path.is_dir() {
            files.extend(list_files_recursive(path)?);
        } else {
            files.push(path);
        }
    }

    Ok(files)
}

/// Removes the given directory and its empty parents, up to but not
/// including the root.
fn remove_empty_parent_dirs(path: &Path, root: &Path) {
    for dir in path.ancestors() {
        if dir == root || !dir.starts_with(root) || fs::remove_dir(dir).is_err() {
            break;
        }
    }
}

//------------ FileLock ------------------------------------------------------

/// An advisory lock on a lock file.
///
/// The lock is held by the operating system, so it is released when the
/// process ends for whatever reason. The lock file itself stays.
#[derive(Debug)]
struct FileLock {
    lock: fd_lock::RwLock<File>,
}

impl FileLock {
    fn create(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let lock_path = path.join(LOCK_FILE_NAME);

        if !path.try_exists().unwrap_or_default() {
            fs::create_dir_all(path).map_err(io_err(format!(
                "cannot create dir for lockfile {}",
                lock_path.display()
            )))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(io_err(format!("cannot open lock file {}", lock_path.display())))?;

        Ok(FileLock {
            lock: fd_lock::RwLock::new(file),
        })
    }

    fn write(&mut self) -> StorageResult<fd_lock::RwLockWriteGuard<'_, File>> {
        self.lock
            .write()
            .map_err(|e| KeyValueError::Other(format!("cannot get file lock: {e}")))
    }
}

