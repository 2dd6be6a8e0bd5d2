//! Error types for the extraction pipeline.
//!
//! Only two conditions are fatal to a single pangenome extraction: an
//! undeterminable user genome and a feature table with no processable rows.
//! Everything else (missing optional tables or columns) degrades to
//! empty/sentinel structures at the point of detection.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the extraction core.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// None of the user-genome detection strategies yielded a row.
    #[error("could not determine user genome ID from database")]
    UserGenomeUndetectable,

    /// The user genome exists but has no feature rows to process.
    #[error("genome '{0}' has no processable features")]
    NoFeatures(String),

    /// The database file could not be opened.
    #[error("failed to open database {path}: {source}")]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// An unexpected database-level failure (not a missing table/column,
    /// which components swallow locally).
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Convenience alias used throughout the extraction core.
pub type Result<T> = std::result::Result<T, ExtractError>;
