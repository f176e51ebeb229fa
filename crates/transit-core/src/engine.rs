//! One entry point over the matcher, aggregator, region assigner and feed
//! lifecycle, all sharing a store, a spatial backend and a relation manager.

use std::sync::Arc;

use transit_state::{
    Agency, AgencyId, ArchiveDigest, Feed, FeedArchiveStore, FeedId, Region, RegionId,
    RegistryStore, SridGeometry,
};

use crate::aggregate::GeometryAggregator;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::lifecycle::FeedLifecycle;
use crate::regions::{RegionAssigner, RegionMerge};
use crate::relations::RelationManager;
use crate::spatial::{PlanarSpatialOps, SpatialOps};
use crate::url_match::{AgencyResolution, MatchOutcome, UrlMatcher};

/// Agency/feed/region association engine.
pub struct AssociationEngine<S, G = PlanarSpatialOps> {
    store: Arc<S>,
    config: EngineConfig,
    relations: Arc<RelationManager<S>>,
    matcher: UrlMatcher<S>,
    aggregator: Arc<GeometryAggregator<S, G>>,
    regions: RegionAssigner<S, G>,
    lifecycle: FeedLifecycle<S>,
}

impl<S: RegistryStore> AssociationEngine<S, PlanarSpatialOps> {
    /// Engine with the planar `geo` backend.
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self::with_spatial(store, PlanarSpatialOps::new(), config)
    }
}

impl<S: RegistryStore, G: SpatialOps> AssociationEngine<S, G> {
    pub fn with_spatial(store: Arc<S>, spatial: G, config: EngineConfig) -> Self {
        let spatial = Arc::new(spatial);
        let relations = Arc::new(RelationManager::new(Arc::clone(&store)));
        let aggregator = Arc::new(GeometryAggregator::new(
            Arc::clone(&store),
            Arc::clone(&spatial),
            config.srid_policy,
        ));
        Self {
            matcher: UrlMatcher::new(Arc::clone(&store), Arc::clone(&relations)),
            regions: RegionAssigner::new(
                Arc::clone(&store),
                spatial,
                Arc::clone(&aggregator),
                Arc::clone(&relations),
                config,
            ),
            lifecycle: FeedLifecycle::new(Arc::clone(&store), Arc::clone(&relations)),
            aggregator,
            relations,
            config,
            store,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -- relations ------------------------------------------------------------

    pub async fn link_feed(&self, agency: AgencyId, feed: FeedId) -> Result<Agency> {
        self.relations.link_feed(agency, feed).await
    }

    pub async fn unlink_feed(&self, agency: AgencyId, feed: FeedId) -> Result<Agency> {
        self.relations.unlink_feed(agency, feed).await
    }

    pub async fn add_member(&self, region: RegionId, agency: AgencyId) -> Result<Region> {
        self.relations.add_member(region, agency).await
    }

    // -- matching -------------------------------------------------------------

    pub async fn match_feed(&self, feed: FeedId) -> Result<MatchOutcome> {
        let feed = self.store.get_feed(&feed).await?;
        self.matcher.match_feed(&feed).await
    }

    pub async fn flag_unmatched(&self, feed: FeedId) -> Result<Feed> {
        self.matcher.flag_unmatched(feed).await
    }

    pub async fn match_or_create_agency(&self, feed: FeedId) -> Result<AgencyResolution> {
        let feed = self.store.get_feed(&feed).await?;
        self.matcher.match_or_create_agency(&feed).await
    }

    pub async fn agencies_for_feed(&self, feed: FeedId, enabled_only: bool) -> Result<Vec<Agency>> {
        self.matcher.agencies_for_feed(feed, enabled_only).await
    }

    // -- geometry and regions -------------------------------------------------

    pub async fn derive_geometry(&self, agency: AgencyId) -> Result<Option<SridGeometry>> {
        let agency = self.store.get_agency(&agency).await?;
        self.aggregator.derive_geometry(&agency).await
    }

    /// Regions a split or merge for this agency would touch; writes nothing.
    pub async fn candidate_regions(&self, agency: AgencyId) -> Result<Vec<Region>> {
        match self.derive_geometry(agency).await? {
            Some(geometry) => self.regions.candidate_regions(&geometry).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn assign_to_overlapping_regions(&self, agency: AgencyId) -> Result<Vec<RegionId>> {
        self.regions.assign_to_overlapping_regions(agency).await
    }

    pub async fn merge_overlapping_regions(&self, agency: AgencyId) -> Result<RegionMerge> {
        self.regions.merge_overlapping_regions(agency).await
    }

    pub async fn regions_for_agency(&self, agency: AgencyId) -> Result<Vec<Region>> {
        self.regions.regions_for_agency(agency).await
    }

    // -- feed lifecycle -------------------------------------------------------

    pub async fn clone_feed(&self, feed: FeedId) -> Result<Feed> {
        self.lifecycle.clone_feed(feed).await
    }

    pub async fn supersede(&self, old: FeedId, new: FeedId) -> Result<Feed> {
        self.lifecycle.supersede(old, new).await
    }

    pub async fn clear_supersession(&self, feed: FeedId) -> Result<Feed> {
        self.lifecycle.clear_supersession(feed).await
    }

    pub async fn latest_version(&self, feed: FeedId) -> Result<Feed> {
        self.lifecycle.latest_version(feed).await
    }

    pub async fn previous_versions(&self, feed: FeedId) -> Result<Vec<Feed>> {
        self.lifecycle.previous_versions(feed).await
    }

    pub async fn delete_feed(&self, feed: FeedId) -> Result<Vec<AgencyId>> {
        self.lifecycle.delete_feed(feed).await
    }

    pub async fn attach_archive<A>(
        &self,
        archive: &A,
        feed: FeedId,
        bytes: &[u8],
    ) -> Result<(Feed, ArchiveDigest)>
    where
        A: FeedArchiveStore + ?Sized,
    {
        self.lifecycle.attach_archive(archive, feed, bytes).await
    }
}
