//! Error types for transit-state

use thiserror::Error;

use crate::model::{AgencyId, FeedId, RegionId};

/// Errors raised while connecting to or preparing a backend
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors returned by the store traits.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("agency not found: {id}")]
    AgencyNotFound { id: AgencyId },

    #[error("feed not found: {id}")]
    FeedNotFound { id: FeedId },

    #[error("region not found: {id}")]
    RegionNotFound { id: RegionId },

    #[error("archive not found: {digest}")]
    ArchiveNotFound { digest: String },

    #[error("archive {digest} does not match its digest")]
    CorruptArchive { digest: String },

    #[error("not a feed archive: {reason}")]
    NotAFeedArchive { reason: String },

    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}
