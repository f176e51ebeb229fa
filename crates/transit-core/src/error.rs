//! Error taxonomy for the association engine.

use transit_state::{FeedId, StorageError};

/// Association engine errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no region within {threshold} of agency {agency}")]
    NoRegionFound { agency: String, threshold: f64 },

    #[error("agency {agency} has feeds in SRIDs {first} and {other}")]
    AmbiguousGeometry {
        agency: String,
        first: i32,
        other: i32,
    },

    #[error("feed {feed} is marked successful but carries no geometry")]
    MissingGeometry { feed: FeedId },

    #[error("superseding {old} with {new} would create a cycle")]
    SupersessionCycle { old: FeedId, new: FeedId },

    #[error("cannot reproject from SRID {from} to SRID {to}")]
    UnsupportedSrid { from: i32, to: i32 },

    #[error("geometry error: {0}")]
    Geometry(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
