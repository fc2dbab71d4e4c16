//! Source reader interface and the discovery pass.
//!
//! Each library source implements [`SourceReader`]: it either opens its
//! on-disk data and yields per-entry results, or reports the whole source
//! unavailable so the caller can continue with the others. Entry-level
//! damage never escalates: a malformed record is skipped and counted, the
//! rest of the source still parses.

use crate::app::{canonicalize, AppRecord, RawEntry, Source};
use crate::config::Config;
use crate::epic::EpicManifests;
use crate::error::{ParseError, SourceUnavailable};
use crate::steam::{SteamEnvironment, SteamGames, SteamShortcuts};
use tracing::warn;

/// Lazy sequence of per-entry results from one source pass.
pub type Entries<'a> = Box<dyn Iterator<Item = Result<RawEntry, ParseError>> + 'a>;

pub trait SourceReader {
    fn source(&self) -> Source;

    /// Begins a fresh pass over the source. Restartable: every call starts
    /// over from the on-disk state.
    fn read(&self) -> Result<Entries<'_>, SourceUnavailable>;
}

/// Canonicalized result of scanning one source.
#[derive(Debug)]
pub struct SourceScan {
    pub source: Source,
    /// Records in canonical (id) order, one per distinct id.
    pub records: Vec<AppRecord>,
    pub skipped: Vec<ParseError>,
}

/// Runs one reader to completion, canonicalizing entries and collecting the
/// skipped ones.
pub fn scan_source(reader: &dyn SourceReader) -> Result<SourceScan, SourceUnavailable> {
    let entries = reader.read()?;
    let mut records = Vec::new();
    let mut skipped = Vec::new();

    for entry in entries {
        match entry {
            Ok(raw) => records.push(canonicalize(raw)),
            Err(err) => {
                warn!("skipping entry: {}", err);
                skipped.push(err);
            }
        }
    }

    // Canonical order. A library folder listed twice yields duplicate
    // entries; the first per id wins.
    records.sort_by_key(|r| r.id);
    records.dedup_by_key(|r| r.id);

    Ok(SourceScan {
        source: reader.source(),
        records,
        skipped,
    })
}

/// Builds the three readers from the configured source locations.
pub fn readers(config: &Config) -> Vec<Box<dyn SourceReader>> {
    let env = SteamEnvironment::new(config.steam_root.clone());
    vec![
        Box::new(SteamGames::new(env.clone())),
        Box::new(SteamShortcuts::new(env)),
        Box::new(EpicManifests::new(
            config.epic_manifests_dir.clone(),
            config.epic_catalog_cache.clone(),
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::derive_id;

    struct FakeReader {
        entries: Vec<Result<RawEntry, ParseError>>,
    }

    impl SourceReader for FakeReader {
        fn source(&self) -> Source {
            Source::SteamGame
        }

        fn read(&self) -> Result<Entries<'_>, SourceUnavailable> {
            Ok(Box::new(self.entries.iter().map(|e| match e {
                Ok(raw) => Ok(raw.clone()),
                Err(err) => Err(ParseError::new(err.library, &err.origin, &err.reason)),
            })))
        }
    }

    fn raw(native_id: &str, name: &str) -> RawEntry {
        RawEntry {
            source: Source::SteamGame,
            native_id: native_id.to_string(),
            name: name.to_string(),
            identity_name: None,
            type_tag: Some("game".to_string()),
            install_path: None,
            artwork: None,
            launch: None,
        }
    }

    #[test]
    fn scan_collects_skips_sorts_and_dedupes() {
        let reader = FakeReader {
            entries: vec![
                Ok(raw("220", "Half-Life 2")),
                Err(ParseError::new(Source::SteamGame, "appmanifest_0.acf", "no appid")),
                Ok(raw("70", "Half-Life")),
                Ok(raw("220", "Half-Life 2")),
            ],
        };

        let scan = scan_source(&reader).unwrap();
        assert_eq!(scan.records.len(), 2);
        assert_eq!(scan.skipped.len(), 1);

        let ids: Vec<_> = scan.records.iter().map(|r| r.id).collect();
        let mut expected = vec![derive_id("220", "Half-Life 2"), derive_id("70", "Half-Life")];
        expected.sort();
        assert_eq!(ids, expected);
    }
}
