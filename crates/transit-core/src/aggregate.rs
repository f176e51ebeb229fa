//! Agency service-area derivation.
//!
//! An agency's geometry is never stored; it is the overlay union of the
//! geometries of its successfully parsed feeds, computed on demand.

use std::sync::Arc;

use tracing::{debug, instrument, warn};
use transit_state::{Agency, RegistryStore, SridGeometry, StorageError};

use crate::config::SridPolicy;
use crate::error::{RegistryError, Result};
use crate::spatial::SpatialOps;

pub struct GeometryAggregator<S, G> {
    store: Arc<S>,
    spatial: Arc<G>,
    srid_policy: SridPolicy,
}

impl<S: RegistryStore, G: SpatialOps> GeometryAggregator<S, G> {
    pub fn new(store: Arc<S>, spatial: Arc<G>, srid_policy: SridPolicy) -> Self {
        Self {
            store,
            spatial,
            srid_policy,
        }
    }

    /// Union of the agency's successful feed geometries, or `None` when no
    /// feed contributes.
    ///
    /// Feeds are visited in ascending id order; a linked feed that has since
    /// been deleted contributes nothing. The first contributor fixes
    /// the SRID; later contributors in another SRID are rejected or
    /// reprojected according to the configured [`SridPolicy`].
    #[instrument(skip(self, agency), fields(agency_id = %agency.id, feeds = agency.feeds.len()))]
    pub async fn derive_geometry(&self, agency: &Agency) -> Result<Option<SridGeometry>> {
        let mut acc: Option<SridGeometry> = None;
        let mut contributors = 0usize;

        for feed_id in &agency.feeds {
            let feed = match self.store.get_feed(feed_id).await {
                Ok(feed) => feed,
                Err(StorageError::FeedNotFound { id }) => {
                    warn!(feed_id = %id, "linked feed no longer exists; skipped");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            if !feed.is_successful() {
                continue;
            }
            let geom = feed
                .geometry
                .ok_or(RegistryError::MissingGeometry { feed: feed.id })?;
            contributors += 1;

            acc = Some(match acc {
                None => geom,
                Some(current) => {
                    let geom = if geom.srid == current.srid {
                        geom
                    } else {
                        match self.srid_policy {
                            SridPolicy::Strict => {
                                return Err(RegistryError::AmbiguousGeometry {
                                    agency: agency.to_string(),
                                    first: current.srid,
                                    other: geom.srid,
                                })
                            }
                            SridPolicy::Reproject => self.spatial.reproject(&geom, current.srid)?,
                        }
                    };
                    self.spatial.union(&current, &geom)?
                }
            });
        }

        debug!(contributors, "agency geometry derived");
        Ok(acc)
    }
}
