//! Error taxonomy for the ingestion, persistence and retrieval layers.
//!
//! Most of these never escape a batch: callers catch them at the record,
//! entity or edge boundary, log them, and tally a failure. Command handlers
//! convert whatever does escape into `anyhow` errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A file could not be decoded even after heuristic repair.
    #[error("parse error in {file}: {message}")]
    Parse { file: String, message: String },

    /// A record lacks a required field; the record is skipped.
    #[error("{record}: missing or invalid field: {message}")]
    MissingField { record: String, message: String },

    /// An edge names an endpoint that is not in the loaded set.
    #[error("dangling reference {source_id} -> {target_id}")]
    DanglingReference { source_id: String, target_id: String },

    /// The embedding or judgment capability is unreachable or erroring.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The backend has no vector index support.
    #[error("capability unsupported: {0}")]
    CapabilityUnsupported(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
