//! Helios Core Library
//!
//! Syncs Steam and Epic game libraries into an Apollo/Sunshine `apps.json`.
//!
//! # Architecture
//!
//! Discovery flows one way: source readers parse launcher files on disk into
//! canonical records, the cache persists the latest scan per source, and the
//! reconciliation engine diffs cache, managed state, and the external
//! `apps.json` to decide what to add or remove. The external file stays the
//! single point of truth for what is actually streamed; local state only
//! remembers what Helios itself put there.
//!
//! # Core Features Implemented
//!
//! ## Library Discovery (`steam`, `epic`, `sources` modules)
//! - `SteamGames` - Installed Steam apps from appmanifests plus `appinfo.vdf`
//! - `SteamShortcuts` - Non-Steam shortcuts from the binary `shortcuts.vdf`
//! - `EpicManifests` - Epic Games Launcher `.item` manifests and catalog art
//! - `scan_source()` - Run one reader, canonicalize, and report skipped entries
//!
//! ## Persistence (`cache`, `managed`, `persist` modules)
//! - `CacheStore` - Per-source JSON partitions rebuilt independently
//! - `ManagedStore` - Which apps Helios added, keyed by canonical id
//! - Atomic writes (temp file + rename) and advisory locks around every store
//!
//! ## Reconciliation (`reconcile`, `apollo` modules)
//! - `Reconciler::plan_add()` / `plan_remove()` - Pure planning over a selection
//! - `Reconciler::apply()` - Per-candidate apply; one failure never aborts the batch
//! - `Reconciler::sync_managed()` - Purge local state the external store dropped
//! - `ApolloAppsFile` - `apps.json` editing that preserves foreign fields
//!
//! ## Cover Art (`covers` module)
//! - `CoverPipeline::generate()` - 600x900 PNG covers from source artwork
//! - `CoverPipeline::validate()` / `repair()` - Detect and regenerate bad files
//! - `CoverPipeline::cleanup_orphans()` - Delete covers nothing references
//!
//! ## Data Structures (`app` module)
//! - `RawEntry` - What a source reader saw, before canonicalization
//! - `AppRecord` - Canonical app with a deterministic UUIDv5 id
//! - `Source` / `AppKind` - Where an app came from and what it is

pub mod app;
pub mod error;

pub mod vdf;

pub mod steam;
pub mod epic;
pub mod sources;

pub mod persist;
pub mod config;
pub mod cache;
pub mod managed;

pub mod covers;
pub mod apollo;
pub mod reconcile;

pub use app::{canonicalize, derive_id, format_id, AppKind, AppRecord, RawEntry, Source};
