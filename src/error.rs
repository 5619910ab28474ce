//! Error taxonomy for the ingestion pipeline.
//!
//! Row-level problems ([`RowError`]) are recovered: the row is skipped and
//! counted. Storage problems ([`StoreError`]) are classified as transient or
//! permanent so the loader knows whether a retry is worthwhile.
//! [`IngestError`] covers the failures that stop a file or the whole run.

use std::path::PathBuf;

use thiserror::Error;

use crate::models::Collection;

/// A data line that could not become a [`RawRow`](crate::models::RawRow)
/// or an entity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("line {line}: expected {expected} fields, found {found}")]
    FieldCount {
        line: u64,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: missing JOB_REFERENCE_FAKE")]
    MissingJobReference { line: u64 },
    #[error("line {line}: not a JSON object: {reason}")]
    NotAnObject { line: u64, reason: String },
    #[error("line {line}: not valid UTF-8")]
    InvalidUtf8 { line: u64 },
}

impl RowError {
    pub fn line(&self) -> u64 {
        match self {
            RowError::FieldCount { line, .. }
            | RowError::MissingJobReference { line }
            | RowError::InvalidUtf8 { line }
            | RowError::NotAnObject { line, .. } => *line,
        }
    }
}

/// Failure reported by a [`Store`](crate::store::Store) backend.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Worth retrying: timeouts, rate limits, connection resets, 5xx.
    #[error("transient store error on {collection}: {message}")]
    Transient {
        collection: Collection,
        message: String,
    },
    /// Constraint violations, bad credentials, malformed requests.
    #[error("store rejected write to {collection}: {message}")]
    Permanent {
        collection: Collection,
        message: String,
    },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }
}

/// Fatal errors surfaced by the loader and the run coordinator.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    FatalConfiguration(String),

    #[error(
        "{collection} chunk {chunk_index} (records {first_record}-{last_record}) failed after {attempts} attempt(s): {source}"
    )]
    StorageWrite {
        collection: Collection,
        chunk_index: usize,
        first_record: usize,
        last_record: usize,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("{path}: header has no JOB_REFERENCE_FAKE column")]
    MissingKeyColumn { path: PathBuf },

    #[error("run cancelled before {collection} chunk {chunk_index}")]
    Cancelled {
        collection: Collection,
        chunk_index: usize,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
