//! Atomic JSON persistence shared by the cache and managed-state stores.
//!
//! Writes land in a `<file>.tmp` sibling, are flushed, and are renamed into
//! place, so readers only ever see a complete old or new file. Mutations are
//! serialized across processes by an exclusive advisory lock on a
//! `<file>.lock` sibling, held for the duration of a [`StoreLock`] guard and
//! released on every exit path when the guard drops.

use crate::error::StoreError;
use fs4::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lock-file sibling for a store file.
pub fn lock_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    target.with_file_name(name)
}

fn tmp_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

/// Exclusive advisory lock guarding a store file's read-modify-write cycle.
/// Blocks until the holder releases; dropping the guard unlocks.
pub struct StoreLock {
    file: File,
}

impl StoreLock {
    pub fn acquire(target: &Path) -> Result<StoreLock, StoreError> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let path = lock_path(target);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        file.lock_exclusive().map_err(|e| StoreError::io(&path, e))?;
        Ok(StoreLock { file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Reads and deserializes a JSON file. `Ok(None)` when the file does not
/// exist; undecodable content reports [`StoreError::Corrupt`] so callers can
/// decide between rebuild and abort.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(e) => Err(StoreError::corrupt(path, e.to_string())),
    }
}

/// Serializes `value` as pretty JSON and writes it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes =
        serde_json::to_vec_pretty(value).map_err(|e| StoreError::corrupt(path, e.to_string()))?;
    write_bytes_atomic(path, &bytes)
}

/// Writes `bytes` to `<path>.tmp`, flushes, and renames into place.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let tmp = tmp_path(path);
    let mut file = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    file.write_all(bytes).map_err(|e| StoreError::io(&tmp, e))?;
    file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))?;
    if let Some(parent) = path.parent() {
        fsync_dir(parent).ok();
    }
    debug!(path = %path.display(), bytes = bytes.len(), "store write");
    Ok(())
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_json() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("store.json");

        write_json_atomic(&path, &vec!["a".to_string(), "b".to_string()])?;
        let back: Option<Vec<String>> = read_json(&path)?;
        assert_eq!(back, Some(vec!["a".to_string(), "b".to_string()]));
        Ok(())
    }

    #[test]
    fn missing_file_reads_as_none() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let back: Option<Vec<String>> = read_json(&dir.path().join("absent.json"))?;
        assert_eq!(back, None);
        Ok(())
    }

    #[test]
    fn corrupt_file_is_reported_as_corrupt() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("store.json");
        fs::write(&path, b"{ not json")?;

        match read_json::<Vec<String>>(&path) {
            Err(StoreError::Corrupt { .. }) => Ok(()),
            other => panic!("expected Corrupt, got {:?}", other),
        }
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("store.json");
        write_json_atomic(&path, &42u32)?;

        assert!(path.exists());
        assert!(!tmp_path(&path).exists());
        Ok(())
    }

    #[test]
    fn lock_is_released_on_drop() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let target = dir.path().join("store.json");

        let guard = StoreLock::acquire(&target)?;
        assert!(lock_path(&target).exists());
        drop(guard);

        // Reacquiring immediately must not dead-block.
        let _again = StoreLock::acquire(&target)?;
        Ok(())
    }
}
