//! Transit-Core: association engine for the transit registry
//!
//! Links GTFS feeds to the agencies that publish them, derives agency
//! service areas from feed geometry, and places agencies into metro regions.
//! All persistence goes through the `transit-state` store traits.
//!
//! ## Key Components
//!
//! - `UrlMatcher`: feed-to-agency matching by canonical URL
//! - `GeometryAggregator`: agency geometry as the union of feed geometry
//! - `RegionAssigner`: non-destructive split and destructive merge
//! - `FeedLifecycle`: clone, supersession, archive attachment
//! - `RelationManager`: locked read-modify-write of relation sets
//! - `AssociationEngine`: facade wiring the above together

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod regions;
pub mod relations;
pub mod spatial;
pub mod telemetry;
pub mod url_match;

pub use aggregate::GeometryAggregator;
pub use config::{EngineConfig, MergeBasePolicy, SridPolicy, DEFAULT_PROXIMITY_THRESHOLD};
pub use engine::AssociationEngine;
pub use error::{RegistryError, Result};
pub use lifecycle::FeedLifecycle;
pub use regions::{RegionAssigner, RegionMerge};
pub use relations::RelationManager;
pub use spatial::{PlanarSpatialOps, SpatialOps};
pub use url_match::{canonicalize_url, AgencyResolution, MatchOutcome, UrlMatcher};
