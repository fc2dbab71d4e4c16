//! Canonical application model.
//!
//! Source readers produce [`RawEntry`] values in whatever shape their format
//! dictates; [`canonicalize`] maps each one onto an [`AppRecord`] carrying a
//! deterministic identifier that survives cache rebuilds, reinstalls, and
//! process restarts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Origin system an entry was discovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "steam")]
    SteamGame,
    #[serde(rename = "nonsteam")]
    SteamShortcut,
    #[serde(rename = "epic")]
    EpicGame,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::SteamGame, Source::SteamShortcut, Source::EpicGame];

    /// Short tag used in partition file names, filters, and log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            Source::SteamGame => "steam",
            Source::SteamShortcut => "nonsteam",
            Source::EpicGame => "epic",
        }
    }

    /// Human-facing label for tables and summaries.
    pub fn label(&self) -> &'static str {
        match self {
            Source::SteamGame => "Steam",
            Source::SteamShortcut => "Steam shortcut",
            Source::EpicGame => "Epic",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "steam" => Ok(Source::SteamGame),
            "nonsteam" | "shortcut" | "shortcuts" => Ok(Source::SteamShortcut),
            "epic" => Ok(Source::EpicGame),
            other => Err(format!(
                "unknown source '{}' (expected steam, nonsteam, or epic)",
                other
            )),
        }
    }
}

/// Three-way classification of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppKind {
    Application,
    Game,
    Tool,
}

impl AppKind {
    /// Maps a source-specific type tag onto the three-way enum. Total:
    /// anything unrecognized is an `Application`.
    pub fn from_tag(tag: &str) -> AppKind {
        let tag = tag.trim().to_ascii_lowercase();
        if tag == "tool" {
            AppKind::Tool
        } else if tag.contains("game") {
            AppKind::Game
        } else {
            AppKind::Application
        }
    }
}

impl fmt::Display for AppKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AppKind::Application => "application",
            AppKind::Game => "game",
            AppKind::Tool => "tool",
        };
        f.write_str(s)
    }
}

impl FromStr for AppKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "application" | "app" => Ok(AppKind::Application),
            "game" => Ok(AppKind::Game),
            "tool" => Ok(AppKind::Tool),
            other => Err(format!(
                "unknown type '{}' (expected game, application, or tool)",
                other
            )),
        }
    }
}

/// Source-native fields exactly as read. Ephemeral: produced and consumed
/// within one discovery pass, never persisted.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub source: Source,
    pub native_id: String,
    /// Display name shown to people.
    pub name: String,
    /// Rename-stable identity name, where the source distinguishes one from
    /// the display name (Epic's `AppName` slug). When present it, not
    /// `name`, participates in id derivation, so display renames do not
    /// mint a new identity.
    pub identity_name: Option<String>,
    pub type_tag: Option<String>,
    pub install_path: Option<PathBuf>,
    /// Local path or URL of portrait artwork, if the source has any.
    pub artwork: Option<String>,
    pub launch: Option<String>,
}

/// Canonical record persisted in the cache partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRecord {
    #[serde(with = "uuid_upper")]
    pub id: Uuid,
    pub source: Source,
    #[serde(rename = "type")]
    pub kind: AppKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch: Option<String>,
}

/// Derives the stable identifier for an entry: UUIDv5 under the OID
/// namespace over `"<native id>|<name>"`, name whitespace-trimmed.
///
/// Native ids keep the sources apart without entering the hashed string:
/// Steam game ids are small decimal integers, shortcut ids carry the
/// `0x02000000` marker in a 64-bit value, Epic ids are 32 hex digits.
pub fn derive_id(native_id: &str, name: &str) -> Uuid {
    let key = format!("{}|{}", native_id, name.trim());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
}

/// Maps a [`RawEntry`] onto its canonical [`AppRecord`].
pub fn canonicalize(raw: RawEntry) -> AppRecord {
    let key_name = raw.identity_name.as_deref().unwrap_or(&raw.name);
    let id = derive_id(&raw.native_id, key_name);
    let kind = raw
        .type_tag
        .as_deref()
        .map(AppKind::from_tag)
        .unwrap_or(AppKind::Application);

    AppRecord {
        id,
        source: raw.source,
        kind,
        name: raw.name.trim().to_string(),
        install_path: raw.install_path,
        artwork_path: raw.artwork,
        launch: raw.launch,
    }
}

/// Uppercase-hyphenated rendering used everywhere a UUID reaches a file or
/// the terminal.
pub fn format_id(id: &Uuid) -> String {
    let mut buf = Uuid::encode_buffer();
    id.hyphenated().encode_upper(&mut buf).to_string()
}

/// Serde helpers keeping UUIDs uppercase-hyphenated on disk. Parsing is
/// case-insensitive, so files touched by other tools still load.
pub mod uuid_upper {
    use serde::{Deserialize, Deserializer, Serializer};
    use uuid::Uuid;

    pub fn serialize<S: Serializer>(id: &Uuid, ser: S) -> Result<S::Ok, S::Error> {
        let mut buf = Uuid::encode_buffer();
        ser.serialize_str(id.hyphenated().encode_upper(&mut buf))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Uuid, D::Error> {
        let raw = String::deserialize(de)?;
        Uuid::parse_str(raw.trim()).map_err(serde::de::Error::custom)
    }
}
