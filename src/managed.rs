//! Managed-state store: which ids Helios believes are currently pushed to
//! the external application list.
//!
//! A single JSON array file. Entries are created only by a successful add
//! and destroyed only by a successful remove or a detected conflict purge.
//! Every mutation is a locked read-modify-write, so an interrupted batch
//! leaves a file that reflects exactly the mutations applied so far.

use crate::app::uuid_upper;
use crate::config::HeliosPaths;
use crate::error::StoreError;
use crate::persist::{self, StoreLock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// One managed id and the cover asset pushed along with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedEntry {
    #[serde(with = "uuid_upper")]
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cover_asset_ref: Option<PathBuf>,
    pub added_at: DateTime<Utc>,
}

pub struct ManagedStore {
    file: PathBuf,
}

impl ManagedStore {
    pub fn new(paths: &HeliosPaths) -> Self {
        ManagedStore {
            file: paths.managed_file(),
        }
    }

    /// All managed entries in id order. A store that has never been written
    /// reads as empty; a corrupt file is a hard error, there is no local
    /// source to rebuild it from.
    pub fn list(&self) -> Result<Vec<ManagedEntry>, StoreError> {
        let mut entries: Vec<ManagedEntry> =
            persist::read_json(&self.file)?.unwrap_or_default();
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    pub fn contains(&self, id: &Uuid) -> Result<bool, StoreError> {
        Ok(self.list()?.iter().any(|e| &e.id == id))
    }

    /// Inserts the entry, replacing any previous entry with the same id.
    pub fn put(&self, entry: ManagedEntry) -> Result<(), StoreError> {
        let _lock = StoreLock::acquire(&self.file)?;
        let mut entries = self.list()?;
        entries.retain(|e| e.id != entry.id);
        entries.push(entry);
        entries.sort_by_key(|e| e.id);
        persist::write_json_atomic(&self.file, &entries)
    }

    /// Removes the entry for `id`. Returns whether anything was removed.
    pub fn remove(&self, id: &Uuid) -> Result<bool, StoreError> {
        let _lock = StoreLock::acquire(&self.file)?;
        let mut entries = self.list()?;
        let before = entries.len();
        entries.retain(|e| &e.id != id);
        if entries.len() == before {
            return Ok(false);
        }
        persist::write_json_atomic(&self.file, &entries)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::derive_id;
    use std::fs;
    use tempfile::tempdir;

    fn entry(native_id: &str, name: &str) -> ManagedEntry {
        ManagedEntry {
            id: derive_id(native_id, name),
            name: name.to_string(),
            cover_asset_ref: None,
            added_at: Utc::now(),
        }
    }

    #[test]
    fn put_list_remove_round_trip() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = ManagedStore::new(&HeliosPaths::new(dir.path().to_path_buf()));
        assert!(store.list()?.is_empty());

        let half_life = entry("70", "Half-Life");
        store.put(half_life.clone())?;
        store.put(entry("220", "Half-Life 2"))?;

        let listed = store.list()?;
        assert_eq!(listed.len(), 2);
        assert!(store.contains(&half_life.id)?);

        assert!(store.remove(&half_life.id)?);
        assert!(!store.contains(&half_life.id)?);
        assert!(!store.remove(&half_life.id)?);
        assert_eq!(store.list()?.len(), 1);
        Ok(())
    }

    #[test]
    fn put_replaces_entries_with_the_same_id() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = ManagedStore::new(&HeliosPaths::new(dir.path().to_path_buf()));

        let mut first = entry("70", "Half-Life");
        store.put(first.clone())?;
        first.cover_asset_ref = Some(PathBuf::from("/covers/x.png"));
        store.put(first.clone())?;

        let listed = store.list()?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].cover_asset_ref, first.cover_asset_ref);
        Ok(())
    }

    #[test]
    fn timestamps_and_ids_survive_the_file_format() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let paths = HeliosPaths::new(dir.path().to_path_buf());
        let store = ManagedStore::new(&paths);
        let original = entry("70", "Half-Life");
        store.put(original.clone())?;

        let text = fs::read_to_string(paths.managed_file())?;
        // Ids are stored uppercase-hyphenated, timestamps as RFC 3339.
        assert!(text.contains("782A4AB5-3C83-574B-9995-11AECF09D4D5"));
        assert!(text.contains("addedAt"));

        let reread = store.list()?;
        assert_eq!(reread[0].id, original.id);
        assert_eq!(reread[0].added_at, original.added_at);
        Ok(())
    }

    #[test]
    fn corrupt_store_is_a_hard_error() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let paths = HeliosPaths::new(dir.path().to_path_buf());
        fs::write(paths.managed_file(), b"not json")?;

        let store = ManagedStore::new(&paths);
        assert!(matches!(store.list(), Err(StoreError::Corrupt { .. })));
        Ok(())
    }
}
