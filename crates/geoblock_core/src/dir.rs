//! Store directory management.
//!
//! Each record kind owns a family of files in the store directory:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK              # Advisory lock for single-writer
//! ├─ nodes.dat         # Fixed-stride block slots
//! ├─ nodes.idx         # Header plus (min key, block) entries
//! ├─ nodes.void        # Reusable block numbers
//! ├─ nodes.map         # id -> block table
//! ├─ nodes.spatial     # (bucket, block) pairs
//! └─ ways.*            # Same family for ways
//! ```
//!
//! Small metadata files are replaced atomically through a temp file and
//! rename. The data file is rewritten in place.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";

/// Paths of the files belonging to one record kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    dir: PathBuf,
    kind: String,
}

impl StorePaths {
    /// Creates the path family for `kind` inside `dir`.
    #[must_use]
    pub fn new(dir: &Path, kind: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            kind: kind.to_string(),
        }
    }

    /// Directory holding the files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record kind name.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Block data file.
    #[must_use]
    pub fn data(&self) -> PathBuf {
        self.file("dat")
    }

    /// Index file.
    #[must_use]
    pub fn index(&self) -> PathBuf {
        self.file("idx")
    }

    /// Void block list.
    #[must_use]
    pub fn void(&self) -> PathBuf {
        self.file("void")
    }

    /// Id to block table.
    #[must_use]
    pub fn id_table(&self) -> PathBuf {
        self.file("map")
    }

    /// Spatial bucket index.
    #[must_use]
    pub fn spatial(&self) -> PathBuf {
        self.file("spatial")
    }

    fn file(&self, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{ext}", self.kind))
    }
}

/// Holds the exclusive lock on a store directory.
///
/// Only one `StoreDir` can exist per directory at a time. The lock is
/// released when the value is dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `StoreLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_operation(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_operation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the file family for a record kind.
    #[must_use]
    pub fn paths(&self, kind: &str) -> StorePaths {
        StorePaths::new(&self.path, kind)
    }
}

/// Replaces `path` with `data` atomically.
///
/// Writes a sibling temp file, syncs it, renames it over `path`, then
/// syncs the parent directory so the rename is durable.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> CoreResult<()> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    let mut file = File::create(&temp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp, path)?;

    if let Some(parent) = path.parent() {
        sync_directory(parent)?;
    }
    Ok(())
}

/// Reads a whole file, or `None` if it does not exist.
pub(crate) fn read_optional(path: &Path) -> CoreResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> CoreResult<()> {
    // An empty parent means the current directory.
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> CoreResult<()> {
    // NTFS journals metadata; directory handles cannot be fsynced.
    Ok(())
}
