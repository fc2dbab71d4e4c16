//! Steam library discovery.
//!
//! Two readers share one [`SteamEnvironment`]:
//!
//! # Installed games (`SteamGames`)
//!
//! `steamapps/libraryfolders.vdf` (text VDF) enumerates every library root.
//! Each library's `appmanifest_<appid>.acf` marks one installed app and
//! names its install directory. Display names and type tags come from the
//! binary `appcache/appinfo.vdf`, whose per-app blocks are length-prefixed:
//! a block that fails to parse is skipped by its declared size and costs
//! only that app's metadata. Portrait artwork sits under
//! `appcache/librarycache/<appid>/`.
//!
//! # User shortcuts (`SteamShortcuts`)
//!
//! `userdata/<user>/config/shortcuts.vdf` (binary VDF) lists user-added
//! entries; the user is whoever `config/loginusers.vdf` marks most recent.
//! A shortcut's 32-bit appid becomes the 64-bit launch id
//! `(appid32 << 32) | 0x02000000`. Portrait grid art lives beside the
//! shortcuts file as `grid/<appid32>p.png`.

use crate::app::{RawEntry, Source};
use crate::error::{ParseError, SourceUnavailable};
use crate::sources::{Entries, SourceReader};
use crate::vdf::{self, VdfTable, VdfValue};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Difference between a 64-bit SteamID and the 32-bit account id used in
/// userdata directory names.
const STEAMID_OFFSET: u64 = 76_561_197_960_265_728;

const APPINFO_MAGIC_V27: u32 = 0x0756_4427;
const APPINFO_MAGIC_V28: u32 = 0x0756_4428;

/// File-name prefixes of the portrait capsule inside a librarycache app dir.
const CAPSULE_PREFIXES: [&str; 2] = ["library_600x900", "library_capsule"];

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Locations inside a configured Steam installation.
#[derive(Debug, Clone)]
pub struct SteamEnvironment {
    root: Option<PathBuf>,
}

impl SteamEnvironment {
    pub fn new(root: Option<PathBuf>) -> Self {
        SteamEnvironment { root }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn appinfo_path(&self, root: &Path) -> PathBuf {
        root.join("appcache").join("appinfo.vdf")
    }

    fn librarycache_dir(&self, root: &Path) -> PathBuf {
        root.join("appcache").join("librarycache")
    }

    /// Every `steamapps` directory: the root's own plus each extra library
    /// listed in `libraryfolders.vdf`. Missing directories are dropped; an
    /// unreadable library list degrades to the root library alone.
    pub fn library_steamapps(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        let root = match self.root() {
            Some(root) => root,
            None => return dirs,
        };
        let root_steamapps = root.join("steamapps");
        if root_steamapps.exists() {
            dirs.push(root_steamapps.clone());
        }

        let list = root_steamapps.join("libraryfolders.vdf");
        let text = match fs::read_to_string(&list) {
            Ok(text) => text,
            Err(_) => return dirs,
        };
        let doc = match vdf::parse_text(&text) {
            Ok(doc) => doc,
            Err(err) => {
                warn!("Failed to parse {:?}: {}", list, err);
                return dirs;
            }
        };

        if let Some(folders) = vdf::get_ci(&doc, "libraryfolders").and_then(VdfValue::as_table) {
            for folder in folders.values() {
                // Newer files hold a block with a "path" key, older ones a
                // bare path string.
                let path = match folder {
                    VdfValue::Table(block) => {
                        vdf::get_ci(block, "path").and_then(VdfValue::as_str)
                    }
                    other => other.as_str(),
                };
                if let Some(path) = path {
                    let steamapps = PathBuf::from(path).join("steamapps");
                    if steamapps.exists() && !dirs.contains(&steamapps) {
                        dirs.push(steamapps);
                    }
                }
            }
        }
        dirs
    }

    /// 32-bit account id of the most recent Steam login, falling back to
    /// the first listed account.
    pub fn most_recent_user(&self) -> Option<u64> {
        let root = self.root()?;
        let text = fs::read_to_string(root.join("config").join("loginusers.vdf")).ok()?;
        let doc = vdf::parse_text(&text).ok()?;
        let users = vdf::get_ci(&doc, "users")?.as_table()?;

        let mut first = None;
        for (id64, info) in users {
            let id32 = match id64.trim().parse::<u64>().ok().and_then(|v| v.checked_sub(STEAMID_OFFSET)) {
                Some(id32) => id32,
                None => continue,
            };
            if first.is_none() {
                first = Some(id32);
            }
            let most_recent = info
                .as_table()
                .and_then(|t| vdf::get_ci(t, "MostRecent"))
                .and_then(VdfValue::as_u32);
            if most_recent == Some(1) {
                return Some(id32);
            }
        }
        first
    }
}

/// Display name and type tag pulled from one appinfo.vdf block.
#[derive(Debug, Clone, Default)]
pub struct AppInfoMeta {
    pub name: Option<String>,
    pub type_tag: Option<String>,
}

fn load_appinfo(path: &Path) -> Result<HashMap<u32, AppInfoMeta>, String> {
    let buf = fs::read(path).map_err(|e| format!("{:?}: {}", path, e))?;
    parse_appinfo(&buf)
}

fn parse_appinfo(buf: &[u8]) -> Result<HashMap<u32, AppInfoMeta>, String> {
    let read_u32 = |pos: usize| {
        buf.get(pos..pos + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    };

    let magic = read_u32(0).ok_or_else(|| "file too short".to_string())?;
    let header_len = match magic {
        APPINFO_MAGIC_V27 => 40,
        APPINFO_MAGIC_V28 => 60,
        other => return Err(format!("unsupported appinfo version 0x{:08x}", other)),
    };

    let mut map = HashMap::new();
    let mut pos = 8; // magic + universe
    loop {
        let appid = match read_u32(pos) {
            Some(appid) => appid,
            None => break,
        };
        pos += 4;
        if appid == 0 {
            break;
        }
        let size = match read_u32(pos) {
            Some(size) => size as usize,
            None => break,
        };
        pos += 4;
        let block = match buf.get(pos..pos + size) {
            Some(block) => block,
            None => break,
        };
        pos += size;

        if block.len() < header_len {
            continue;
        }
        match vdf::parse_binary(&block[header_len..]) {
            Ok(root) => {
                let name = vdf::get_nested(&root, &["appinfo", "common", "name"])
                    .and_then(VdfValue::as_str)
                    .map(str::to_string);
                let type_tag = vdf::get_nested(&root, &["appinfo", "common", "type"])
                    .and_then(VdfValue::as_str)
                    .map(str::to_string);
                if name.is_some() || type_tag.is_some() {
                    map.insert(appid, AppInfoMeta { name, type_tag });
                }
            }
            Err(err) => {
                // The declared size already moved us past the block.
                debug!("appinfo block {}: {}", appid, err);
            }
        }
    }
    Ok(map)
}

/// Reader for installed Steam games.
pub struct SteamGames {
    env: SteamEnvironment,
}

impl SteamGames {
    pub fn new(env: SteamEnvironment) -> Self {
        SteamGames { env }
    }
}

impl SourceReader for SteamGames {
    fn source(&self) -> Source {
        Source::SteamGame
    }

    fn read(&self) -> Result<Entries<'_>, SourceUnavailable> {
        let root = steam_root(&self.env, Source::SteamGame)?;

        let appinfo = match load_appinfo(&self.env.appinfo_path(root)) {
            Ok(map) => map,
            Err(reason) => {
                warn!("appinfo.vdf unreadable, names fall back to manifests: {}", reason);
                HashMap::new()
            }
        };
        let librarycache = self.env.librarycache_dir(root);

        let mut manifests = Vec::new();
        for steamapps in self.env.library_steamapps() {
            match fs::read_dir(&steamapps) {
                Ok(entries) => {
                    for entry in entries.flatten() {
                        let path = entry.path();
                        if manifest_appid(&path).is_some() {
                            manifests.push(path);
                        }
                    }
                }
                Err(e) => warn!("Failed to scan library {:?}: {}", steamapps, e),
            }
        }
        manifests.sort();

        Ok(Box::new(manifests.into_iter().map(move |path| {
            parse_app_manifest(&path, &appinfo, &librarycache)
        })))
    }
}

/// Appid encoded in an `appmanifest_<appid>.acf` file name.
fn manifest_appid(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix("appmanifest_")?
        .strip_suffix(".acf")?
        .parse()
        .ok()
}

fn parse_app_manifest(
    path: &Path,
    appinfo: &HashMap<u32, AppInfoMeta>,
    librarycache: &Path,
) -> Result<RawEntry, ParseError> {
    let origin = path.display().to_string();
    let fail = |reason: String| ParseError::new(Source::SteamGame, origin.as_str(), reason);

    let text = fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
    let doc = vdf::parse_text(&text).map_err(|e| fail(e.to_string()))?;
    let state = vdf::get_ci(&doc, "AppState")
        .and_then(VdfValue::as_table)
        .ok_or_else(|| fail("no AppState block".to_string()))?;

    let appid = vdf::get_ci(state, "appid")
        .and_then(VdfValue::as_u32)
        .or_else(|| manifest_appid(path))
        .ok_or_else(|| fail("no appid".to_string()))?;

    let meta = appinfo.get(&appid);
    let name = meta
        .and_then(|m| m.name.clone())
        .or_else(|| {
            vdf::get_ci(state, "name")
                .and_then(VdfValue::as_str)
                .map(str::to_string)
        })
        .ok_or_else(|| fail(format!("no name for appid {}", appid)))?;

    let install_path = vdf::get_ci(state, "installdir")
        .and_then(VdfValue::as_str)
        .and_then(|dir| path.parent().map(|apps| apps.join("common").join(dir)));

    Ok(RawEntry {
        source: Source::SteamGame,
        native_id: appid.to_string(),
        name,
        identity_name: None,
        type_tag: meta.and_then(|m| m.type_tag.clone()),
        install_path,
        artwork: find_library_capsule(librarycache, appid),
        launch: Some(format!("steam://rungameid/{}", appid)),
    })
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Portrait capsule inside `librarycache/<appid>/`, if Steam has cached one.
fn find_library_capsule(librarycache: &Path, appid: u32) -> Option<String> {
    let app_dir = librarycache.join(appid.to_string());
    let entries = fs::read_dir(&app_dir).ok()?;
    let mut images: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| is_image_file(p))
        .collect();
    images.sort();

    for prefix in CAPSULE_PREFIXES {
        let hit = images.iter().find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(prefix))
                .unwrap_or(false)
        });
        if let Some(hit) = hit {
            return Some(hit.display().to_string());
        }
    }
    None
}

/// Reader for user-added Steam shortcuts.
pub struct SteamShortcuts {
    env: SteamEnvironment,
}

impl SteamShortcuts {
    pub fn new(env: SteamEnvironment) -> Self {
        SteamShortcuts { env }
    }

    /// 64-bit launch id for a shortcut's 32-bit appid.
    pub fn launch_id(appid32: u32) -> u64 {
        (u64::from(appid32) << 32) | 0x0200_0000
    }
}

impl SourceReader for SteamShortcuts {
    fn source(&self) -> Source {
        Source::SteamShortcut
    }

    fn read(&self) -> Result<Entries<'_>, SourceUnavailable> {
        let root = steam_root(&self.env, Source::SteamShortcut)?;

        let userdata = root.join("userdata");
        if !userdata.exists() {
            return Err(SourceUnavailable::new(
                Source::SteamShortcut,
                format!("no userdata directory at {:?}", userdata),
            ));
        }
        let user = self.env.most_recent_user().ok_or_else(|| {
            SourceUnavailable::new(Source::SteamShortcut, "no Steam login found")
        })?;

        let config_dir = userdata.join(user.to_string()).join("config");
        let shortcuts_path = config_dir.join("shortcuts.vdf");
        if !shortcuts_path.exists() {
            // An account that never added a shortcut has no file at all.
            return Ok(Box::new(std::iter::empty()));
        }

        let origin = shortcuts_path.display().to_string();
        let bytes = match fs::read(&shortcuts_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                return Err(SourceUnavailable::new(
                    Source::SteamShortcut,
                    format!("{:?}: {}", shortcuts_path, e),
                ))
            }
        };
        let root_table = match vdf::parse_binary(&bytes) {
            Ok(table) => table,
            Err(err) => {
                let err = ParseError::new(Source::SteamShortcut, origin.as_str(), err.to_string());
                return Ok(Box::new(std::iter::once(Err(err))));
            }
        };

        let grid = config_dir.join("grid");
        let mut results = Vec::new();
        if let Some(list) = vdf::get_ci(&root_table, "shortcuts").and_then(VdfValue::as_table) {
            for (index, entry) in list {
                match entry.as_table() {
                    Some(table) => results.push(parse_shortcut(&origin, index, table, &grid)),
                    None => results.push(Err(ParseError::new(
                        Source::SteamShortcut,
                        origin.as_str(),
                        format!("shortcut {} is not a block", index),
                    ))),
                }
            }
        }
        Ok(Box::new(results.into_iter()))
    }
}

fn parse_shortcut(
    origin: &str,
    index: &str,
    entry: &VdfTable,
    grid: &Path,
) -> Result<RawEntry, ParseError> {
    let fail = |reason: String| ParseError::new(Source::SteamShortcut, origin, reason);

    // Steam has written both "appid" and "AppID" over the years, and both
    // "AppName" and "appname".
    let appid32 = vdf::get_ci(entry, "appid")
        .and_then(VdfValue::as_u32)
        .ok_or_else(|| fail(format!("shortcut {} has no appid", index)))?;
    let name = vdf::get_ci(entry, "AppName")
        .and_then(VdfValue::as_str)
        .ok_or_else(|| fail(format!("shortcut {} has no name", index)))?;

    let appid64 = SteamShortcuts::launch_id(appid32);
    let install_path = vdf::get_ci(entry, "StartDir")
        .and_then(VdfValue::as_str)
        .map(|dir| PathBuf::from(dir.trim().trim_matches('"')))
        .filter(|p| !p.as_os_str().is_empty());

    Ok(RawEntry {
        source: Source::SteamShortcut,
        native_id: appid64.to_string(),
        name: name.to_string(),
        identity_name: None,
        type_tag: Some("game".to_string()),
        install_path,
        artwork: find_grid_capsule(grid, appid32),
        launch: Some(format!("steam://rungameid/{}", appid64)),
    })
}

/// Portrait grid image a user assigned to a shortcut.
fn find_grid_capsule(grid: &Path, appid32: u32) -> Option<String> {
    for ext in IMAGE_EXTENSIONS {
        let candidate = grid.join(format!("{}p.{}", appid32, ext));
        if candidate.exists() {
            return Some(candidate.display().to_string());
        }
    }
    None
}

fn steam_root<'a>(
    env: &'a SteamEnvironment,
    source: Source,
) -> Result<&'a Path, SourceUnavailable> {
    let root = env
        .root()
        .ok_or_else(|| SourceUnavailable::new(source, "no Steam root configured"))?;
    if !root.exists() {
        return Err(SourceUnavailable::new(
            source,
            format!("Steam root not found: {:?}", root),
        ));
    }
    Ok(root)
}
