//! Error taxonomy shared across the library.
//!
//! Per-entry and per-candidate failures are ordinary values collected into
//! result lists so one bad record never aborts a batch; only process-wide
//! resource failures (data directory unwritable, store corrupt beyond
//! rebuild) are propagated as hard errors by the callers.

use crate::app::Source;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A whole source could not be read. The discovery pass skips it and
/// continues with the remaining sources.
///
/// The origin system lives in a field called `library`: to `thiserror` a
/// field named `source` is the error's cause chain, and [`Source`] is not an
/// error type.
#[derive(Debug, Error)]
#[error("source {library} unavailable: {reason}")]
pub struct SourceUnavailable {
    pub library: Source,
    pub reason: String,
}

impl SourceUnavailable {
    pub fn new(library: Source, reason: impl Into<String>) -> Self {
        SourceUnavailable {
            library,
            reason: reason.into(),
        }
    }
}

/// One malformed entry within an otherwise readable source.
#[derive(Debug, Error)]
#[error("{library}: {origin}: {reason}")]
pub struct ParseError {
    pub library: Source,
    /// File or record the entry came from, for log lines.
    pub origin: String,
    pub reason: String,
}

impl ParseError {
    pub fn new(library: Source, origin: impl Into<String>, reason: impl Into<String>) -> Self {
        ParseError {
            library,
            origin: origin.into(),
            reason: reason.into(),
        }
    }
}

/// Failure reading or writing one of the Helios-owned JSON stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store file {path:?} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("store io error at {path:?}: {err}")]
    Io { path: PathBuf, err: io::Error },
}

impl StoreError {
    pub fn io(path: &std::path::Path, err: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            err,
        }
    }

    pub fn corrupt(path: &std::path::Path, reason: impl Into<String>) -> Self {
        StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Failure talking to the external application-list store. Candidates hit by
/// one of these are marked failed; the batch continues.
#[derive(Debug, Error)]
pub enum ExternalStoreError {
    #[error("external store unavailable: {0}")]
    Unavailable(String),

    #[error("external store data corrupt: {0}")]
    Corrupt(String),

    #[error("external store io error: {0}")]
    Io(String),
}

impl From<StoreError> for ExternalStoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Corrupt { .. } => ExternalStoreError::Corrupt(err.to_string()),
            StoreError::Io { .. } => ExternalStoreError::Io(err.to_string()),
        }
    }
}

/// Cover-art generation or validation failure. An add flagged with one of
/// these still succeeds for the app record itself.
#[derive(Debug, Error)]
pub enum CoverArtError {
    #[error("record has no source artwork")]
    NoSourceArt,

    #[error("failed to fetch artwork from {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("artwork does not decode: {0}")]
    Decode(String),

    #[error("failed to write cover file: {0}")]
    Write(#[from] StoreError),
}
