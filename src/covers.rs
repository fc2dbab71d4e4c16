//! Cover-art pipeline for the external store.
//!
//! Apollo wants a 600x900 PNG per app. Source artwork comes from whatever
//! the record's source offered: a local capsule file, a `file://` URL, or
//! an `http(s)://` catalog image. Covers are written under the data
//! directory as `<ID>.png`, so regeneration is idempotent and cleanup can
//! recognize its own files without a manifest.

use crate::app::{format_id, AppRecord};
use crate::cache::CacheSnapshot;
use crate::config::HeliosPaths;
use crate::error::{CoverArtError, StoreError};
use crate::managed::ManagedStore;
use crate::persist;
use image::{imageops::FilterType, GenericImageView, ImageFormat};
use std::collections::HashSet;
use std::fs;
use std::io::{Cursor, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

pub const COVER_WIDTH: u32 = 600;
pub const COVER_HEIGHT: u32 = 900;

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// A generated cover file and the fingerprint of the artwork it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverAsset {
    pub id: Uuid,
    pub file_path: PathBuf,
    /// md5 of the source artwork bytes, for change detection.
    pub source_artwork_hash: String,
}

/// Validation verdict for one expected cover file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverStatus {
    /// Exists, decodes as PNG, exact expected dimensions.
    Valid,
    /// Exists but fails decoding or the dimension/format contract.
    Corrupted,
    Missing,
}

/// What a repair pass did for one managed entry.
#[derive(Debug)]
pub enum RepairAction {
    Intact,
    Regenerated,
    /// Regeneration failed; the entry stays flagged.
    Failed(String),
    /// The id is no longer in the cache, so there is no artwork to pull.
    NoRecord,
}

#[derive(Debug)]
pub struct CoverRepair {
    pub id: Uuid,
    pub name: String,
    pub before: CoverStatus,
    pub action: RepairAction,
}

pub struct CoverPipeline {
    covers_dir: PathBuf,
}

impl CoverPipeline {
    pub fn new(paths: &HeliosPaths) -> Self {
        CoverPipeline {
            covers_dir: paths.covers_dir(),
        }
    }

    /// Deterministic cover location for an id.
    pub fn cover_path(&self, id: &Uuid) -> PathBuf {
        self.covers_dir.join(format!("{}.png", format_id(id)))
    }

    /// Fetches the record's source artwork, scales it to the portrait
    /// contract and writes the PNG. Overwrites any previous cover for the
    /// same id.
    pub fn generate(&self, record: &AppRecord) -> Result<CoverAsset, CoverArtError> {
        let reference = record
            .artwork_path
            .as_deref()
            .ok_or(CoverArtError::NoSourceArt)?;
        let source_bytes = read_artwork(reference)?;

        let img = image::load_from_memory(&source_bytes)
            .map_err(|e| CoverArtError::Decode(e.to_string()))?;
        let resized = img.resize_to_fill(COVER_WIDTH, COVER_HEIGHT, FilterType::Lanczos3);
        let mut encoded = Vec::new();
        resized
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .map_err(|e| CoverArtError::Decode(e.to_string()))?;

        let file_path = self.cover_path(&record.id);
        persist::write_bytes_atomic(&file_path, &encoded)?;
        debug!("generated cover {:?}", file_path);

        Ok(CoverAsset {
            id: record.id,
            file_path,
            source_artwork_hash: format!("{:x}", md5::compute(&source_bytes)),
        })
    }

    /// Checks the cover file itself; existence alone is not enough.
    pub fn validate(&self, id: &Uuid) -> CoverStatus {
        let path = self.cover_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return CoverStatus::Missing,
            Err(_) => return CoverStatus::Corrupted,
        };
        match image::load_from_memory_with_format(&bytes, ImageFormat::Png) {
            Ok(img) if img.dimensions() == (COVER_WIDTH, COVER_HEIGHT) => CoverStatus::Valid,
            _ => CoverStatus::Corrupted,
        }
    }

    /// Cover files whose id is not in `managed`. Only files that follow the
    /// pipeline's `<hyphenated id>.png` naming are considered; anything else
    /// in the directory is invisible to the pipeline.
    pub fn orphans(&self, managed: &HashSet<Uuid>) -> std::io::Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.covers_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut orphans = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if let Some(id) = cover_file_id(&path) {
                if !managed.contains(&id) {
                    orphans.push(path);
                }
            }
        }
        orphans.sort();
        Ok(orphans)
    }

    /// Deletes the orphaned cover files.
    pub fn cleanup_orphans(&self, managed: &HashSet<Uuid>) -> std::io::Result<usize> {
        let mut removed = 0;
        for path in self.orphans(managed)? {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("removed orphaned cover {:?}", path);
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove orphaned cover {:?}: {}", path, e),
            }
        }
        Ok(removed)
    }

    /// Validates every managed entry's cover and regenerates the missing or
    /// corrupted ones from current cache artwork.
    pub fn repair(
        &self,
        managed: &ManagedStore,
        cache: &CacheSnapshot,
    ) -> Result<Vec<CoverRepair>, StoreError> {
        let mut reports = Vec::new();
        for entry in managed.list()? {
            let before = self.validate(&entry.id);
            let action = match before {
                CoverStatus::Valid => RepairAction::Intact,
                CoverStatus::Missing | CoverStatus::Corrupted => match cache.get(&entry.id) {
                    Some(record) => match self.generate(record) {
                        Ok(asset) => {
                            if entry.cover_asset_ref.as_deref() != Some(asset.file_path.as_path()) {
                                let mut updated = entry.clone();
                                updated.cover_asset_ref = Some(asset.file_path.clone());
                                managed.put(updated)?;
                            }
                            RepairAction::Regenerated
                        }
                        Err(err) => {
                            warn!("cover repair for {} failed: {}", entry.name, err);
                            RepairAction::Failed(err.to_string())
                        }
                    },
                    None => RepairAction::NoRecord,
                },
            };
            reports.push(CoverRepair {
                id: entry.id,
                name: entry.name.clone(),
                before,
                action,
            });
        }
        Ok(reports)
    }
}

fn read_artwork(reference: &str) -> Result<Vec<u8>, CoverArtError> {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return fetch_remote(reference);
    }
    let path = reference.strip_prefix("file://").unwrap_or(reference);
    fs::read(path).map_err(|e| CoverArtError::Fetch {
        url: reference.to_string(),
        reason: e.to_string(),
    })
}

fn fetch_remote(url: &str) -> Result<Vec<u8>, CoverArtError> {
    let fail = |reason: String| CoverArtError::Fetch {
        url: url.to_string(),
        reason,
    };
    let client = reqwest::blocking::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| fail(e.to_string()))?;
    let response = client.get(url).send().map_err(|e| fail(e.to_string()))?;
    if !response.status().is_success() {
        return Err(fail(format!("HTTP {}", response.status())));
    }
    let bytes = response.bytes().map_err(|e| fail(e.to_string()))?;
    Ok(bytes.to_vec())
}

/// Id encoded in a cover file name, if the name follows the pipeline's
/// convention (36-char hyphenated id, `.png`).
fn cover_file_id(path: &Path) -> Option<Uuid> {
    let is_png = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("png"))
        .unwrap_or(false);
    if !is_png {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.len() != 36 {
        return None;
    }
    Uuid::parse_str(stem).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{canonicalize, derive_id, RawEntry, Source};
    use crate::cache::CacheStore;
    use crate::managed::ManagedEntry;
    use chrono::Utc;
    use tempfile::{tempdir, TempDir};

    fn record_with_art(art: Option<String>) -> AppRecord {
        canonicalize(RawEntry {
            source: Source::SteamGame,
            native_id: "70".to_string(),
            name: "Half-Life".to_string(),
            identity_name: None,
            type_tag: Some("game".to_string()),
            install_path: None,
            artwork: art,
            launch: None,
        })
    }

    fn art_fixture(dir: &Path) -> PathBuf {
        let path = dir.join("capsule.png");
        let img = image::RgbImage::from_pixel(300, 450, image::Rgb([180, 40, 40]));
        img.save(&path).unwrap();
        path
    }

    fn pipeline(dir: &TempDir) -> CoverPipeline {
        CoverPipeline::new(&HeliosPaths::new(dir.path().to_path_buf()))
    }

    #[test]
    fn generate_produces_a_valid_cover() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let art = art_fixture(dir.path());
        let record = record_with_art(Some(art.display().to_string()));
        let covers = pipeline(&dir);

        let asset = covers.generate(&record)?;
        assert_eq!(asset.file_path, covers.cover_path(&record.id));
        assert!(asset.file_path.ends_with("782A4AB5-3C83-574B-9995-11AECF09D4D5.png"));
        assert_eq!(
            asset.source_artwork_hash,
            format!("{:x}", md5::compute(fs::read(&art)?))
        );
        assert_eq!(covers.validate(&record.id), CoverStatus::Valid);

        // Regeneration overwrites in place.
        let again = covers.generate(&record)?;
        assert_eq!(again.file_path, asset.file_path);
        assert_eq!(covers.validate(&record.id), CoverStatus::Valid);
        Ok(())
    }

    #[test]
    fn generate_failures_map_to_the_error_taxonomy() {
        let dir = tempdir().unwrap();
        let covers = pipeline(&dir);

        let no_art = record_with_art(None);
        assert!(matches!(
            covers.generate(&no_art),
            Err(CoverArtError::NoSourceArt)
        ));

        let gone = record_with_art(Some(dir.path().join("gone.png").display().to_string()));
        assert!(matches!(
            covers.generate(&gone),
            Err(CoverArtError::Fetch { .. })
        ));

        let garbage = dir.path().join("garbage.png");
        fs::write(&garbage, b"not an image").unwrap();
        let bad = record_with_art(Some(garbage.display().to_string()));
        assert!(matches!(covers.generate(&bad), Err(CoverArtError::Decode(_))));
    }

    #[test]
    fn validation_rejects_wrong_dimensions_and_non_png_bytes() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let covers = pipeline(&dir);
        let id = derive_id("70", "Half-Life");

        assert_eq!(covers.validate(&id), CoverStatus::Missing);

        fs::create_dir_all(covers.cover_path(&id).parent().unwrap())?;
        let small = image::RgbImage::from_pixel(10, 10, image::Rgb([0, 0, 0]));
        small.save(covers.cover_path(&id))?;
        assert_eq!(covers.validate(&id), CoverStatus::Corrupted);

        fs::write(covers.cover_path(&id), b"junk")?;
        assert_eq!(covers.validate(&id), CoverStatus::Corrupted);
        Ok(())
    }

    #[test]
    fn cleanup_removes_only_unreferenced_convention_files() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let art = art_fixture(dir.path());
        let covers = pipeline(&dir);

        let kept = record_with_art(Some(art.display().to_string()));
        covers.generate(&kept)?;

        let orphan_id = derive_id("220", "Half-Life 2");
        let orphan_path = covers.cover_path(&orphan_id);
        fs::copy(covers.cover_path(&kept.id), &orphan_path)?;

        // Bystanders that must survive: wrong extension, wrong stem shape.
        let covers_dir = orphan_path.parent().unwrap().to_path_buf();
        fs::write(covers_dir.join("notes.txt"), b"keep me")?;
        fs::write(covers_dir.join("cover.jpg"), b"keep me")?;
        fs::write(covers_dir.join("d41d8cd98f00b204e9800998ecf8427e.png"), b"keep me")?;

        let managed: HashSet<Uuid> = [kept.id].into_iter().collect();
        assert_eq!(covers.orphans(&managed)?, vec![orphan_path.clone()]);
        assert_eq!(covers.cleanup_orphans(&managed)?, 1);

        assert!(!orphan_path.exists());
        assert!(covers.cover_path(&kept.id).exists());
        assert!(covers_dir.join("notes.txt").exists());
        assert!(covers_dir.join("cover.jpg").exists());
        assert!(covers_dir.join("d41d8cd98f00b204e9800998ecf8427e.png").exists());
        Ok(())
    }

    #[test]
    fn repair_regenerates_deleted_covers() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let paths = HeliosPaths::new(dir.path().to_path_buf());
        let art = art_fixture(dir.path());
        let covers = CoverPipeline::new(&paths);
        let managed = ManagedStore::new(&paths);

        let record = record_with_art(Some(art.display().to_string()));
        persist::write_json_atomic(
            &paths.partition_file(Source::SteamGame),
            &vec![record.clone()],
        )?;
        let cache = CacheStore::new(paths.clone()).load()?;

        let asset = covers.generate(&record)?;
        managed.put(ManagedEntry {
            id: record.id,
            name: record.name.clone(),
            cover_asset_ref: Some(asset.file_path.clone()),
            added_at: Utc::now(),
        })?;

        fs::remove_file(&asset.file_path)?;
        let reports = covers.repair(&managed, &cache)?;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].before, CoverStatus::Missing);
        assert!(matches!(reports[0].action, RepairAction::Regenerated));
        assert_eq!(covers.validate(&record.id), CoverStatus::Valid);
        Ok(())
    }

    #[test]
    fn repair_without_source_artwork_reports_and_flags() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let paths = HeliosPaths::new(dir.path().to_path_buf());
        let covers = CoverPipeline::new(&paths);
        let managed = ManagedStore::new(&paths);

        let record = record_with_art(None);
        persist::write_json_atomic(
            &paths.partition_file(Source::SteamGame),
            &vec![record.clone()],
        )?;
        let cache = CacheStore::new(paths.clone()).load()?;

        managed.put(ManagedEntry {
            id: record.id,
            name: record.name.clone(),
            cover_asset_ref: None,
            added_at: Utc::now(),
        })?;

        let reports = covers.repair(&managed, &cache)?;
        assert_eq!(reports.len(), 1);
        match &reports[0].action {
            RepairAction::Failed(reason) => assert!(reason.contains("no source artwork")),
            other => panic!("expected Failed, got {:?}", other),
        }
        Ok(())
    }
}
