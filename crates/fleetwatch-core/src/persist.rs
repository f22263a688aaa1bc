//! Lock-file and atomic-replace primitives for JSON documents shared between
//! processes.
//!
//! Every shared document lives next to a zero-content `.lock` file. Holders
//! take an advisory exclusive lock on that file (via `fs2`) for the whole
//! read-modify-write window and replace the document by writing a sibling
//! temp file, syncing it and renaming it over the canonical path. Readers
//! therefore never observe a torn document.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors raised while locking, reading or writing shared documents.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The path has no parent directory to hold the temp file.
    #[error("path has no parent: {}", path.display())]
    NoParent {
        /// Offending path.
        path: PathBuf,
    },

    /// A filesystem operation failed.
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        /// Short verb describing the failed step.
        action: &'static str,
        /// Path the step operated on.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The document could not be serialized.
    #[error("failed to serialize {}: {source}", path.display())]
    Serialize {
        /// Destination path.
        path: PathBuf,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

impl PersistError {
    pub(crate) fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of loading a JSON document that may be absent or damaged.
#[derive(Debug)]
pub enum Loaded<T> {
    /// Document parsed successfully.
    Present(T),
    /// No document on disk.
    Missing,
    /// Document exists but could not be read or parsed.
    Corrupt {
        /// Parse or read failure detail.
        error: String,
    },
}

impl<T: Default> Loaded<T> {
    /// Collapses the load outcome into a value, treating missing and corrupt
    /// documents as the default state.
    pub fn or_default(self, path: &Path) -> T {
        match self {
            Self::Present(value) => value,
            Self::Missing => T::default(),
            Self::Corrupt { error } => {
                tracing::warn!(
                    path = %path.display(),
                    %error,
                    "discarding unreadable document, starting from defaults"
                );
                T::default()
            },
        }
    }
}

static PROCESS_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Exclusive hold over a shared document.
///
/// Holds both the in-process mutex and the cross-process advisory lock; both
/// are released on drop.
#[derive(Debug)]
pub struct DocumentLock {
    file: File,
    _guard: MutexGuard<'static, ()>,
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock too; unlocking explicitly
        // keeps the release ordered before the mutex guard drops.
        let _ = FileExt::unlock(&self.file);
    }
}

/// Acquires the process-wide mutex and an exclusive advisory lock on
/// `lock_path`, creating the lock file and its parent directory if needed.
pub fn lock_exclusive(lock_path: &Path) -> Result<DocumentLock, PersistError> {
    let guard = PROCESS_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    ensure_parent_dir(lock_path)?;
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|err| PersistError::io("open lock", lock_path, err))?;
    FileExt::lock_exclusive(&file).map_err(|err| PersistError::io("lock", lock_path, err))?;
    Ok(DocumentLock {
        file,
        _guard: guard,
    })
}

/// Creates the parent directory of `path` if it does not exist.
pub fn ensure_parent_dir(path: &Path) -> Result<(), PersistError> {
    let parent = path.parent().ok_or_else(|| PersistError::NoParent {
        path: path.to_path_buf(),
    })?;
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(parent).map_err(|err| PersistError::io("create directory", parent, err))
}

/// Reads and parses a JSON document without failing on damage.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Loaded<T> {
    let content = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Loaded::Missing,
        Err(err) => {
            return Loaded::Corrupt {
                error: format!("read failed: {err}"),
            };
        },
    };
    match serde_json::from_slice(&content) {
        Ok(value) => Loaded::Present(value),
        Err(err) => Loaded::Corrupt {
            error: format!("parse failed: {err}"),
        },
    }
}

/// Serializes `value` and atomically replaces the document at `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    ensure_parent_dir(path)?;
    let payload = serde_json::to_vec_pretty(value).map_err(|source| PersistError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    let parent = path.parent().ok_or_else(|| PersistError::NoParent {
        path: path.to_path_buf(),
    })?;
    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|err| PersistError::io("create temp file in", parent, err))?;
    temp.write_all(&payload)
        .map_err(|err| PersistError::io("write temp file for", path, err))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| PersistError::io("sync temp file for", path, err))?;
    temp.persist(path)
        .map_err(|err| PersistError::io("persist", path, err.error))?;
    Ok(())
}

/// Appends one JSON line to `path`, rotating the file to `<path>.1` once it
/// grows past `rotate_bytes`. The caller is expected to hold the matching
/// [`DocumentLock`].
pub fn append_json_line<T: Serialize>(
    path: &Path,
    value: &T,
    rotate_bytes: u64,
) -> Result<(), PersistError> {
    ensure_parent_dir(path)?;
    if let Ok(meta) = fs::metadata(path) {
        if meta.len() > rotate_bytes {
            let rotated = rotated_path(path);
            if let Err(err) = fs::remove_file(&rotated) {
                if err.kind() != io::ErrorKind::NotFound {
                    return Err(PersistError::io("remove rotated file", &rotated, err));
                }
            }
            fs::rename(path, &rotated).map_err(|err| PersistError::io("rotate", path, err))?;
        }
    }
    let mut line = serde_json::to_vec(value).map_err(|source| PersistError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    line.push(b'\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| PersistError::io("open", path, err))?;
    file.write_all(&line)
        .map_err(|err| PersistError::io("append to", path, err))?;
    file.sync_all()
        .map_err(|err| PersistError::io("sync", path, err))
}

/// Path of the single rotated generation kept by [`append_json_line`].
#[must_use]
pub fn rotated_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".1");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        count: u32,
    }

    #[test]
    fn test_write_then_load_present() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("doc.json");
        write_json_atomic(&path, &Sample { count: 7 }).expect("write");
        match load_json::<Sample>(&path) {
            Loaded::Present(found) => assert_eq!(found.count, 7),
            other => panic!("expected present document, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_document_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("absent.json");
        assert!(matches!(load_json::<Sample>(&path), Loaded::Missing));
        assert_eq!(load_json::<Sample>(&path).or_default(&path), Sample::default());
    }

    #[test]
    fn test_corrupt_document_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("doc.json");
        fs::write(&path, "{not-json").expect("write corrupt");
        let loaded = load_json::<Sample>(&path);
        match &loaded {
            Loaded::Corrupt { error } => assert!(error.contains("parse")),
            other => panic!("expected corrupt document, got {other:?}"),
        }
        assert_eq!(loaded.or_default(&path), Sample::default());
    }

    #[test]
    fn test_append_rotates_past_threshold() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("history.ndjson");
        for count in 0..4 {
            append_json_line(&path, &Sample { count }, 16).expect("append");
        }
        assert!(rotated_path(&path).exists());
        let current = fs::read_to_string(&path).expect("read current");
        assert!(current.lines().count() >= 1);
    }

    #[test]
    fn test_lock_is_reentrant_after_drop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let lock_path = temp.path().join("doc.lock");
        drop(lock_exclusive(&lock_path).expect("first lock"));
        let second = lock_exclusive(&lock_path).expect("second lock");
        assert!(lock_path.exists());
        drop(second);
        assert_eq!(fs::metadata(&lock_path).expect("meta").len(), 0);
    }
}
