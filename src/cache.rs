//! Discovery cache, one JSON partition per source.
//!
//! Each partition file holds a bare array of canonical records sorted by id.
//! Rebuilding one source rewrites only that source's file, so the other
//! partitions stay byte-identical. A partition that fails to parse is
//! flagged corrupt and rebuilt on the next refresh instead of aborting the
//! load. The cache never expires on its own; callers decide when to rebuild.

use crate::app::{AppRecord, Source};
use crate::config::HeliosPaths;
use crate::error::{SourceUnavailable, StoreError};
use crate::persist::{self, StoreLock};
use crate::sources::{scan_source, SourceReader, SourceScan};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

/// One source's cached records plus freshness metadata.
#[derive(Debug, Default)]
pub struct CachePartition {
    pub records: Vec<AppRecord>,
    /// Mtime of the partition file; `None` until the first rebuild.
    pub refreshed_at: Option<DateTime<Utc>>,
    /// The file existed but did not parse. Forces the next rebuild.
    pub corrupt: bool,
}

/// In-memory view of every partition, keyed by source.
#[derive(Debug, Default)]
pub struct CacheSnapshot {
    partitions: BTreeMap<Source, CachePartition>,
}

impl CacheSnapshot {
    pub fn partition(&self, source: Source) -> Option<&CachePartition> {
        self.partitions.get(&source)
    }

    /// All records across partitions, source-major and id-ordered within
    /// each source.
    pub fn records(&self) -> impl Iterator<Item = &AppRecord> {
        self.partitions.values().flat_map(|p| p.records.iter())
    }

    pub fn get(&self, id: &Uuid) -> Option<&AppRecord> {
        self.records().find(|r| &r.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.values().all(|p| p.records.is_empty())
    }

    /// Sources whose partition files need a forced rebuild.
    pub fn corrupt_sources(&self) -> Vec<Source> {
        self.partitions
            .iter()
            .filter(|(_, p)| p.corrupt)
            .map(|(s, _)| *s)
            .collect()
    }
}

/// What a rebuild pass managed to refresh.
#[derive(Debug, Default)]
pub struct RebuildOutcome {
    pub scans: Vec<SourceScan>,
    pub unavailable: Vec<SourceUnavailable>,
}

/// Store for the per-source discovery partitions.
pub struct CacheStore {
    paths: HeliosPaths,
}

impl CacheStore {
    pub fn new(paths: HeliosPaths) -> Self {
        CacheStore { paths }
    }

    /// Reads every partition. Missing files load as empty partitions;
    /// unparseable files are flagged corrupt rather than failing the load.
    pub fn load(&self) -> Result<CacheSnapshot, StoreError> {
        let mut partitions = BTreeMap::new();
        for source in Source::ALL {
            let path = self.paths.partition_file(source);
            let partition = match persist::read_json::<Vec<AppRecord>>(&path) {
                Ok(Some(mut records)) => {
                    records.sort_by_key(|r| r.id);
                    CachePartition {
                        records,
                        refreshed_at: file_mtime(&path),
                        corrupt: false,
                    }
                }
                Ok(None) => CachePartition::default(),
                Err(StoreError::Corrupt { path, reason }) => {
                    warn!("cache partition {:?} is corrupt, rebuild will replace it: {}", path, reason);
                    CachePartition {
                        corrupt: true,
                        ..CachePartition::default()
                    }
                }
                Err(err) => return Err(err),
            };
            partitions.insert(source, partition);
        }
        Ok(CacheSnapshot { partitions })
    }

    /// Scans the given readers and rewrites their partitions. `only` limits
    /// the pass to a single source; the other partition files are not
    /// touched. An unavailable source is reported, not fatal.
    pub fn rebuild(
        &self,
        readers: &[Box<dyn SourceReader>],
        only: Option<Source>,
    ) -> Result<RebuildOutcome, StoreError> {
        let mut outcome = RebuildOutcome::default();
        for reader in readers {
            let source = reader.source();
            if only.is_some() && only != Some(source) {
                continue;
            }
            match scan_source(reader.as_ref()) {
                Ok(scan) => {
                    self.write_partition(source, &scan.records)?;
                    info!(
                        "refreshed {}: {} records, {} skipped",
                        source.tag(),
                        scan.records.len(),
                        scan.skipped.len()
                    );
                    outcome.scans.push(scan);
                }
                Err(err) => {
                    warn!("{}", err);
                    outcome.unavailable.push(err);
                }
            }
        }
        Ok(outcome)
    }

    /// Convenience lookup that loads the snapshot behind the scenes.
    pub fn get(&self, id: &Uuid) -> Result<Option<AppRecord>, StoreError> {
        Ok(self.load()?.get(id).cloned())
    }

    fn write_partition(&self, source: Source, records: &[AppRecord]) -> Result<(), StoreError> {
        let path = self.paths.partition_file(source);
        let _lock = StoreLock::acquire(&path)?;
        persist::write_json_atomic(&path, &records)
    }
}

fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{canonicalize, RawEntry};
    use crate::sources::Entries;
    use tempfile::tempdir;

    struct FixedReader {
        source: Source,
        names: Vec<(&'static str, &'static str)>,
    }

    impl SourceReader for FixedReader {
        fn source(&self) -> Source {
            self.source
        }

        fn read(&self) -> Result<Entries<'_>, crate::error::SourceUnavailable> {
            let source = self.source;
            Ok(Box::new(self.names.iter().map(move |(id, name)| {
                Ok(RawEntry {
                    source,
                    native_id: id.to_string(),
                    name: name.to_string(),
                    identity_name: None,
                    type_tag: Some("game".to_string()),
                    install_path: None,
                    artwork: None,
                    launch: None,
                })
            })))
        }
    }

    struct DownReader(Source);

    impl SourceReader for DownReader {
        fn source(&self) -> Source {
            self.0
        }

        fn read(&self) -> Result<Entries<'_>, crate::error::SourceUnavailable> {
            Err(crate::error::SourceUnavailable::new(self.0, "gone"))
        }
    }

    fn fixed(source: Source, names: &[(&'static str, &'static str)]) -> Box<dyn SourceReader> {
        Box::new(FixedReader {
            source,
            names: names.to_vec(),
        })
    }

    #[test]
    fn rebuild_then_load_round_trips() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = CacheStore::new(HeliosPaths::new(dir.path().to_path_buf()));
        let readers = vec![
            fixed(Source::SteamGame, &[("70", "Half-Life"), ("220", "Half-Life 2")]),
            fixed(Source::EpicGame, &[("abc123", "Rocket Sim")]),
        ];

        store.rebuild(&readers, None)?;
        let snapshot = store.load()?;

        let steam = snapshot.partition(Source::SteamGame).unwrap();
        assert_eq!(steam.records.len(), 2);
        assert!(steam.refreshed_at.is_some());
        assert!(!steam.corrupt);
        assert_eq!(snapshot.partition(Source::EpicGame).unwrap().records.len(), 1);
        assert_eq!(snapshot.records().count(), 3);

        // Records survive field-for-field.
        let raw = RawEntry {
            source: Source::SteamGame,
            native_id: "70".to_string(),
            name: "Half-Life".to_string(),
            identity_name: None,
            type_tag: Some("game".to_string()),
            install_path: None,
            artwork: None,
            launch: None,
        };
        let expected = canonicalize(raw);
        assert_eq!(snapshot.get(&expected.id), Some(&expected));
        Ok(())
    }

    #[test]
    fn rebuilding_one_source_leaves_others_byte_identical() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let paths = HeliosPaths::new(dir.path().to_path_buf());
        let store = CacheStore::new(paths.clone());
        let readers = vec![
            fixed(Source::SteamGame, &[("70", "Half-Life")]),
            fixed(Source::EpicGame, &[("abc123", "Rocket Sim")]),
        ];
        store.rebuild(&readers, None)?;
        let steam_before = fs::read(paths.partition_file(Source::SteamGame))?;

        let readers = vec![
            fixed(Source::SteamGame, &[("999", "Should Not Appear")]),
            fixed(Source::EpicGame, &[("abc123", "Rocket Sim"), ("def456", "Second")]),
        ];
        store.rebuild(&readers, Some(Source::EpicGame))?;

        let steam_after = fs::read(paths.partition_file(Source::SteamGame))?;
        assert_eq!(steam_before, steam_after);
        assert_eq!(store.load()?.partition(Source::EpicGame).unwrap().records.len(), 2);
        Ok(())
    }

    #[test]
    fn corrupt_partition_is_flagged_not_fatal() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let paths = HeliosPaths::new(dir.path().to_path_buf());
        fs::create_dir_all(paths.cache_dir())?;
        fs::write(paths.partition_file(Source::SteamGame), b"{ not an array")?;

        let store = CacheStore::new(paths);
        let snapshot = store.load()?;
        let steam = snapshot.partition(Source::SteamGame).unwrap();
        assert!(steam.corrupt);
        assert!(steam.records.is_empty());
        assert_eq!(snapshot.corrupt_sources(), vec![Source::SteamGame]);
        Ok(())
    }

    #[test]
    fn unavailable_source_is_reported_and_does_not_write() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let paths = HeliosPaths::new(dir.path().to_path_buf());
        let store = CacheStore::new(paths.clone());

        let readers: Vec<Box<dyn SourceReader>> = vec![Box::new(DownReader(Source::SteamGame))];
        let outcome = store.rebuild(&readers, None)?;
        assert_eq!(outcome.scans.len(), 0);
        assert_eq!(outcome.unavailable.len(), 1);
        assert!(!paths.partition_file(Source::SteamGame).exists());
        Ok(())
    }

    #[test]
    fn missing_partitions_load_empty() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = CacheStore::new(HeliosPaths::new(dir.path().to_path_buf()));
        let snapshot = store.load()?;
        assert!(snapshot.is_empty());
        assert!(snapshot.corrupt_sources().is_empty());
        Ok(())
    }
}
