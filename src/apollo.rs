//! External application-list store.
//!
//! The trait is the reconciliation engine's only view of the outside world;
//! [`ApolloAppsFile`] implements it over an Apollo/Sunshine `apps.json`.
//! That file belongs to the streaming host, not to Helios: reads and writes
//! round-trip every field Helios does not understand, writes are atomic,
//! and entries without a `uuid` (added by hand or by the host's own UI) are
//! never matched or modified.

use crate::app::{format_id, AppRecord};
use crate::covers::CoverAsset;
use crate::error::ExternalStoreError;
use crate::persist;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use uuid::Uuid;

/// Result of pushing one app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// The store already lists this id (added out-of-band).
    AlreadyExists,
}

/// Result of deleting one app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    /// The store does not list this id (removed out-of-band).
    NotFound,
}

/// The application list Helios pushes entries into.
pub trait ExternalStore {
    /// Ids the store currently lists. This is the authoritative managed set
    /// when it disagrees with local state.
    fn list_apps(&self) -> Result<HashSet<Uuid>, ExternalStoreError>;

    fn add_app(
        &mut self,
        record: &AppRecord,
        cover: Option<&CoverAsset>,
    ) -> Result<AddOutcome, ExternalStoreError>;

    fn remove_app(&mut self, id: Uuid) -> Result<RemoveOutcome, ExternalStoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AppsDocument {
    #[serde(flatten)]
    extras: Map<String, Value>,
    #[serde(default)]
    apps: Vec<AppEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AppEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uuid: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cmd: Option<String>,
    #[serde(rename = "image-path", default, skip_serializing_if = "Option::is_none")]
    image_path: Option<String>,
    #[serde(flatten)]
    extras: Map<String, Value>,
}

fn entry_uuid(entry: &AppEntry) -> Option<Uuid> {
    entry.uuid.as_deref().and_then(|s| Uuid::parse_str(s).ok())
}

/// `apps.json` of a local Apollo or Sunshine install.
pub struct ApolloAppsFile {
    path: PathBuf,
}

impl ApolloAppsFile {
    pub fn new(path: PathBuf) -> Self {
        ApolloAppsFile { path }
    }

    fn load(&self) -> Result<AppsDocument, ExternalStoreError> {
        let text = fs::read_to_string(&self.path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                ExternalStoreError::Unavailable(format!("apps file not found: {:?}", self.path))
            } else {
                ExternalStoreError::Io(format!("{:?}: {}", self.path, e))
            }
        })?;
        serde_json::from_str(&text)
            .map_err(|e| ExternalStoreError::Corrupt(format!("{:?}: {}", self.path, e)))
    }

    // No lock file next to apps.json: the file is the host's, only the
    // write itself must be atomic.
    fn save(&self, doc: &AppsDocument) -> Result<(), ExternalStoreError> {
        persist::write_json_atomic(&self.path, doc)?;
        Ok(())
    }
}

impl ExternalStore for ApolloAppsFile {
    fn list_apps(&self) -> Result<HashSet<Uuid>, ExternalStoreError> {
        Ok(self.load()?.apps.iter().filter_map(entry_uuid).collect())
    }

    fn add_app(
        &mut self,
        record: &AppRecord,
        cover: Option<&CoverAsset>,
    ) -> Result<AddOutcome, ExternalStoreError> {
        let mut doc = self.load()?;
        if doc.apps.iter().any(|a| entry_uuid(a) == Some(record.id)) {
            return Ok(AddOutcome::AlreadyExists);
        }
        doc.apps.push(AppEntry {
            uuid: Some(format_id(&record.id)),
            name: record.name.clone(),
            cmd: record.launch.clone(),
            image_path: cover.map(|c| c.file_path.display().to_string()),
            extras: Map::new(),
        });
        self.save(&doc)?;
        Ok(AddOutcome::Added)
    }

    fn remove_app(&mut self, id: Uuid) -> Result<RemoveOutcome, ExternalStoreError> {
        let mut doc = self.load()?;
        let before = doc.apps.len();
        doc.apps.retain(|a| entry_uuid(a) != Some(id));
        if doc.apps.len() == before {
            return Ok(RemoveOutcome::NotFound);
        }
        self.save(&doc)?;
        Ok(RemoveOutcome::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{canonicalize, RawEntry, Source};
    use tempfile::tempdir;

    const APPS_JSON: &str = r#"{
        "env": {
            "PATH": "$(PATH):$(HOME)/.local/bin"
        },
        "apps": [
            {
                "name": "Desktop",
                "image-path": "desktop.png",
                "exclude-global-prep-cmd": false
            }
        ]
    }"#;

    fn record(native_id: &str, name: &str) -> AppRecord {
        canonicalize(RawEntry {
            source: Source::SteamGame,
            native_id: native_id.to_string(),
            name: name.to_string(),
            identity_name: None,
            type_tag: Some("game".to_string()),
            install_path: None,
            artwork: None,
            launch: Some(format!("steam://rungameid/{}", native_id)),
        })
    }

    #[test]
    fn add_and_remove_round_trip_foreign_fields() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("apps.json");
        fs::write(&path, APPS_JSON)?;
        let mut store = ApolloAppsFile::new(path.clone());

        let half_life = record("70", "Half-Life");
        let cover = CoverAsset {
            id: half_life.id,
            file_path: dir.path().join("covers").join("HL.png"),
            source_artwork_hash: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
        };
        assert_eq!(store.add_app(&half_life, Some(&cover))?, AddOutcome::Added);
        assert!(store.list_apps()?.contains(&half_life.id));

        // Fields Helios does not model survive the rewrite.
        let doc: Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(doc["env"]["PATH"], "$(PATH):$(HOME)/.local/bin");
        assert_eq!(doc["apps"][0]["exclude-global-prep-cmd"], false);
        assert_eq!(doc["apps"][1]["name"], "Half-Life");
        assert_eq!(doc["apps"][1]["cmd"], "steam://rungameid/70");

        assert_eq!(store.remove_app(half_life.id)?, RemoveOutcome::Removed);
        let doc: Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(doc["apps"].as_array().map(Vec::len), Some(1));
        // The hand-added uuid-less entry is never touched.
        assert_eq!(doc["apps"][0]["name"], "Desktop");
        Ok(())
    }

    #[test]
    fn adding_a_listed_id_reports_already_exists() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("apps.json");
        fs::write(&path, r#"{"apps": []}"#)?;
        let mut store = ApolloAppsFile::new(path);

        let rec = record("70", "Half-Life");
        assert_eq!(store.add_app(&rec, None)?, AddOutcome::Added);
        assert_eq!(store.add_app(&rec, None)?, AddOutcome::AlreadyExists);
        assert_eq!(store.list_apps()?.len(), 1);
        Ok(())
    }

    #[test]
    fn removing_an_unlisted_id_reports_not_found() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("apps.json");
        fs::write(&path, r#"{"apps": []}"#)?;
        let mut store = ApolloAppsFile::new(path);

        assert_eq!(
            store.remove_app(record("70", "Half-Life").id)?,
            RemoveOutcome::NotFound
        );
        Ok(())
    }

    #[test]
    fn missing_file_is_unavailable_and_corrupt_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let store = ApolloAppsFile::new(dir.path().join("nope.json"));
        assert!(matches!(
            store.list_apps(),
            Err(ExternalStoreError::Unavailable(_))
        ));

        let path = dir.path().join("apps.json");
        fs::write(&path, "oops").unwrap();
        let store = ApolloAppsFile::new(path);
        assert!(matches!(
            store.list_apps(),
            Err(ExternalStoreError::Corrupt(_))
        ));
    }

    #[test]
    fn uuids_match_case_insensitively() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("apps.json");
        let rec = record("70", "Half-Life");
        fs::write(
            &path,
            format!(
                r#"{{"apps": [{{"uuid": "{}", "name": "Half-Life"}}]}}"#,
                format_id(&rec.id).to_lowercase()
            ),
        )?;
        let mut store = ApolloAppsFile::new(path);

        assert_eq!(store.add_app(&rec, None)?, AddOutcome::AlreadyExists);
        assert_eq!(store.remove_app(rec.id)?, RemoveOutcome::Removed);
        Ok(())
    }
}
