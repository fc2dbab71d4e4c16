//! Epic Games Launcher discovery.
//!
//! Installed apps are described by JSON `*.item` manifests in the launcher's
//! `Manifests` directory, one file per install. Only completed installs
//! whose `AppCategories` include `games` qualify. Portrait artwork is not
//! stored locally; the launcher's `catcache.bin` (a base64-wrapped JSON
//! catalog dump) maps catalog item ids to `DieselGameBoxTall` image URLs.

use crate::app::{RawEntry, Source};
use crate::error::{ParseError, SourceUnavailable};
use crate::sources::{Entries, SourceReader};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const GAMES_CATEGORY: &str = "games";
const PORTRAIT_IMAGE_TYPE: &str = "DieselGameBoxTall";

/// Reader for Epic Games Launcher installation manifests.
pub struct EpicManifests {
    manifests_dir: Option<PathBuf>,
    catalog_cache: Option<PathBuf>,
}

impl EpicManifests {
    pub fn new(manifests_dir: Option<PathBuf>, catalog_cache: Option<PathBuf>) -> Self {
        EpicManifests {
            manifests_dir,
            catalog_cache,
        }
    }
}

impl SourceReader for EpicManifests {
    fn source(&self) -> Source {
        Source::EpicGame
    }

    fn read(&self) -> Result<Entries<'_>, SourceUnavailable> {
        let dir = self.manifests_dir.as_ref().ok_or_else(|| {
            SourceUnavailable::new(Source::EpicGame, "no Epic manifests directory configured")
        })?;
        if !dir.exists() {
            return Err(SourceUnavailable::new(
                Source::EpicGame,
                format!("Epic manifests directory not found: {:?}", dir),
            ));
        }

        let artwork = match &self.catalog_cache {
            Some(path) if path.exists() => match load_catalog(path) {
                Ok(map) => map,
                Err(reason) => {
                    warn!("Epic catalog cache unreadable, entries carry no artwork: {}", reason);
                    HashMap::new()
                }
            },
            _ => HashMap::new(),
        };

        let mut items = Vec::new();
        let entries = fs::read_dir(dir).map_err(|e| {
            SourceUnavailable::new(Source::EpicGame, format!("{:?}: {}", dir, e))
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_item = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("item"))
                .unwrap_or(false);
            if is_item {
                items.push(path);
            }
        }
        items.sort();

        Ok(Box::new(items.into_iter().filter_map(move |path| {
            match parse_item(&path, &artwork) {
                Ok(Some(entry)) => Some(Ok(entry)),
                Ok(None) => None,
                Err(err) => Some(Err(err)),
            }
        })))
    }
}

#[derive(Debug, Deserialize)]
struct ItemManifest {
    #[serde(rename = "DisplayName")]
    display_name: Option<String>,
    #[serde(rename = "AppName")]
    app_name: Option<String>,
    #[serde(rename = "CatalogNamespace")]
    catalog_namespace: Option<String>,
    #[serde(rename = "CatalogItemId")]
    catalog_item_id: Option<String>,
    #[serde(rename = "InstallLocation")]
    install_location: Option<String>,
    #[serde(rename = "AppCategories", default)]
    app_categories: Vec<String>,
    #[serde(rename = "bIsIncompleteInstall", default)]
    incomplete_install: bool,
    #[serde(rename = "TechnicalType")]
    technical_type: Option<String>,
}

/// Parses one `.item` manifest. `Ok(None)` means the manifest is valid but
/// out of scope (non-game or still downloading).
fn parse_item(
    path: &Path,
    artwork: &HashMap<String, String>,
) -> Result<Option<RawEntry>, ParseError> {
    let origin = path.display().to_string();
    let fail = |reason: String| ParseError::new(Source::EpicGame, origin.as_str(), reason);

    let text = fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
    let item: ItemManifest = serde_json::from_str(&text).map_err(|e| fail(e.to_string()))?;

    let is_game = item
        .app_categories
        .iter()
        .any(|c| c.eq_ignore_ascii_case(GAMES_CATEGORY));
    if !is_game {
        debug!("{}: not in the games category", origin);
        return Ok(None);
    }
    if item.incomplete_install {
        debug!("{}: install incomplete", origin);
        return Ok(None);
    }

    let catalog_item_id = item
        .catalog_item_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| fail("no CatalogItemId".to_string()))?;
    let name = item
        .display_name
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| fail("no DisplayName".to_string()))?;

    // The launcher URI needs the full namespace:item:app triple.
    let launch = match (&item.catalog_namespace, &item.app_name) {
        (Some(ns), Some(app)) if !ns.is_empty() && !app.is_empty() => Some(format!(
            "com.epicgames.launcher://apps/{}%3A{}%3A{}?action=launch&silent=true",
            ns, catalog_item_id, app
        )),
        _ => None,
    };

    Ok(Some(RawEntry {
        source: Source::EpicGame,
        name,
        identity_name: item.app_name,
        type_tag: item.technical_type,
        install_path: item
            .install_location
            .filter(|s| !s.is_empty())
            .map(PathBuf::from),
        artwork: artwork.get(&catalog_item_id).cloned(),
        launch,
        native_id: catalog_item_id,
    }))
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    id: Option<String>,
    #[serde(rename = "keyImages", default)]
    key_images: Vec<KeyImage>,
}

#[derive(Debug, Deserialize)]
struct KeyImage {
    #[serde(rename = "type")]
    kind: Option<String>,
    url: Option<String>,
}

/// Decodes `catcache.bin` into a catalog-item-id to portrait-URL map.
fn load_catalog(path: &Path) -> Result<HashMap<String, String>, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("{:?}: {}", path, e))?;
    let bytes = BASE64
        .decode(text.trim())
        .map_err(|e| format!("{:?}: {}", path, e))?;
    let catalog: Vec<CatalogEntry> =
        serde_json::from_slice(&bytes).map_err(|e| format!("{:?}: {}", path, e))?;

    let mut map = HashMap::new();
    for entry in catalog {
        let id = match entry.id {
            Some(id) => id,
            None => continue,
        };
        let portrait = entry
            .key_images
            .into_iter()
            .find(|img| img.kind.as_deref() == Some(PORTRAIT_IMAGE_TYPE))
            .and_then(|img| img.url);
        if let Some(url) = portrait {
            map.insert(id, url);
        }
    }
    Ok(map)
}
