//! Transit-State: entity model and persistence for the transit registry
//!
//! This crate owns the registry entities and every byte of I/O the
//! association engine performs. The engine only ever talks to the traits in
//! [`storage_traits`]; backends plug in underneath.
//!
//! ## Key Components
//!
//! - `Agency`, `Feed`, `Region`: the three aggregate roots
//! - `SridGeometry`: multi-polygon plus spatial reference id
//! - `RegistryStore`: narrow per-kind stores plus atomic `ChangeSet` commits
//! - `SurrealRegistryStore`: SurrealDB backend (memory, local files, cloud)
//! - `FeedArchiveStore`: raw GTFS zips by digest, on disk via `FsArchiveStore`

mod archive;
mod error;
pub mod fakes;
pub mod geometry;
mod handle;
mod migrations;
pub mod model;
pub mod storage_traits;
pub mod surreal_store;

pub use archive::FsArchiveStore;
pub use error::{StateError, StorageError};
pub use geometry::{SridGeometry, SRID_WEB_MERCATOR, SRID_WGS84};
pub use handle::{CloudConfig, StoreLocation};
pub use model::{
    Agency, AgencyId, AgencySource, DefaultBikesAllowed, Feed, FeedId, FeedParseStatus, Region,
    RegionId, ReviewType,
};
pub use storage_traits::{
    check_feed_archive, AgencyQuery, AgencyStore, ArchiveDigest, ChangeSet, FeedArchiveStore,
    FeedQuery, FeedStore, RegionQuery, RegionStore, RegistryStore, StorageResult,
};
pub use surreal_store::SurrealRegistryStore;

/// Result type for connection and schema setup
pub type Result<T> = std::result::Result<T, StateError>;
