//! Placing agencies into metro regions.
//!
//! Two strategies share one candidate search (every region within the
//! proximity threshold of the agency's derived geometry):
//!
//! - **split** adds the agency to every candidate and leaves the regions
//!   themselves alone;
//! - **merge** collapses all candidates into one base region (convex hull of
//!   their shapes, union of their members) and deletes the rest in a single
//!   atomic commit.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};
use transit_state::{
    AgencyId, ChangeSet, Region, RegionId, RegionQuery, RegistryStore, ReviewType, SridGeometry,
};

use crate::aggregate::GeometryAggregator;
use crate::config::{EngineConfig, MergeBasePolicy};
use crate::error::{RegistryError, Result};
use crate::relations::RelationManager;
use crate::spatial::SpatialOps;

/// Outcome of a destructive merge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionMerge {
    /// The surviving region, as committed
    pub base: Region,
    /// Regions folded into `base` and deleted, ascending by id
    pub absorbed: Vec<RegionId>,
}

pub struct RegionAssigner<S, G> {
    store: Arc<S>,
    spatial: Arc<G>,
    aggregator: Arc<GeometryAggregator<S, G>>,
    relations: Arc<RelationManager<S>>,
    config: EngineConfig,
}

impl<S: RegistryStore, G: SpatialOps> RegionAssigner<S, G> {
    pub fn new(
        store: Arc<S>,
        spatial: Arc<G>,
        aggregator: Arc<GeometryAggregator<S, G>>,
        relations: Arc<RelationManager<S>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            spatial,
            aggregator,
            relations,
            config,
        }
    }

    /// Regions within the proximity threshold of `geometry`, ascending by id.
    ///
    /// A region whose SRID cannot be compared with `geometry` is skipped with
    /// a warning; the rest of the search goes on.
    pub async fn candidate_regions(&self, geometry: &SridGeometry) -> Result<Vec<Region>> {
        let mut candidates = Vec::new();
        for region in self.store.find_regions(RegionQuery::All).await? {
            match self.spatial.within_distance(
                &region.geometry,
                geometry,
                self.config.proximity_threshold,
            ) {
                Ok(true) => candidates.push(region),
                Ok(false) => {}
                Err(err @ RegistryError::UnsupportedSrid { .. }) => {
                    warn!(region_id = %region.id, error = %err, "region skipped");
                }
                Err(err) => return Err(err),
            }
        }
        candidates.sort_by_key(|r| r.id);
        Ok(candidates)
    }

    /// Regions the agency is currently a member of, ascending by id.
    pub async fn regions_for_agency(&self, agency: AgencyId) -> Result<Vec<Region>> {
        let mut regions = self
            .store
            .find_regions(RegionQuery::ContainingAgency(agency))
            .await?;
        regions.sort_by_key(|r| r.id);
        Ok(regions)
    }

    /// Add the agency to every nearby region.
    ///
    /// Returns the ids of the regions joined. Region shapes are never touched
    /// and nothing is deleted. An agency without geometry is left alone; one
    /// with geometry is flagged `NoRegion` when nothing is nearby and
    /// `AgencyMultipleAreas` when it landed in more than one region.
    #[instrument(skip(self), fields(agency_id = %agency))]
    pub async fn assign_to_overlapping_regions(&self, agency: AgencyId) -> Result<Vec<RegionId>> {
        let current = self.store.get_agency(&agency).await?;
        let Some(geometry) = self.aggregator.derive_geometry(&current).await? else {
            info!("agency has no geometry; nothing to assign");
            return Ok(Vec::new());
        };

        let candidates = self.candidate_regions(&geometry).await?;
        let mut joined = Vec::with_capacity(candidates.len());
        for region in &candidates {
            self.relations.add_member(region.id, agency).await?;
            joined.push(region.id);
        }

        let flag = match joined.len() {
            0 => Some(ReviewType::NoRegion),
            1 => None,
            _ => Some(ReviewType::AgencyMultipleAreas),
        };
        if let Some(flag) = flag {
            warn!(review = ?flag, regions = joined.len(), "agency flagged for review");
        }
        self.relations
            .update_agency(agency, |a| {
                let next = match (flag, a.review) {
                    (Some(flag), _) => Some(flag),
                    // Placement flags from an earlier split no longer apply.
                    (None, Some(ReviewType::NoRegion | ReviewType::AgencyMultipleAreas)) => None,
                    (None, other) => other,
                };
                let changed = a.review != next;
                a.review = next;
                changed
            })
            .await?;

        info!(regions = joined.len(), "agency assigned to regions");
        Ok(joined)
    }

    /// Merge every nearby region into one and add the agency to it.
    ///
    /// Fails with `NoRegionFound` (changing nothing) when no region is
    /// nearby. All writes land in one commit; if it fails, no region is
    /// modified or deleted.
    #[instrument(skip(self), fields(agency_id = %agency))]
    pub async fn merge_overlapping_regions(&self, agency: AgencyId) -> Result<RegionMerge> {
        let current = self.store.get_agency(&agency).await?;
        let no_region = || RegistryError::NoRegionFound {
            agency: current.to_string(),
            threshold: self.config.proximity_threshold,
        };

        let geometry = self
            .aggregator
            .derive_geometry(&current)
            .await?
            .ok_or_else(no_region)?;
        let ids: Vec<RegionId> = self
            .candidate_regions(&geometry)
            .await?
            .iter()
            .map(|r| r.id)
            .collect();
        if ids.is_empty() {
            return Err(no_region());
        }

        let _guards = self.relations.lock_regions(&ids).await;
        let mut candidates = Vec::with_capacity(ids.len());
        for id in &ids {
            candidates.push(self.store.get_region(id).await?);
        }

        let base_index = self.pick_base(&candidates)?;
        let mut base = candidates.remove(base_index);
        let mut changes = ChangeSet::new();
        let mut absorbed = Vec::with_capacity(candidates.len());

        for region in candidates {
            let shape = self.spatial.reproject(&region.geometry, base.geometry.srid)?;
            base.geometry = self.spatial.convex_hull_merge(&base.geometry, &shape)?;
            base.agencies.extend(region.agencies.iter().copied());
            changes = changes.delete_region(region.id);
            absorbed.push(region.id);
        }
        base.agencies.insert(agency);

        self.store
            .commit(changes.save_region(base.clone()))
            .await?;

        info!(
            base = %base.id,
            absorbed = absorbed.len(),
            members = base.agencies.len(),
            "regions merged"
        );
        Ok(RegionMerge { base, absorbed })
    }

    /// Index of the surviving region within `candidates` (sorted by id).
    ///
    /// Areas are compared in the first candidate's SRID.
    fn pick_base(&self, candidates: &[Region]) -> Result<usize> {
        let Some(first) = candidates.first() else {
            return Ok(0);
        };
        match self.config.merge_base {
            MergeBasePolicy::LowestId => Ok(0),
            MergeBasePolicy::LargestArea => {
                let srid = first.geometry.srid;
                let mut best = 0;
                let mut best_area = f64::NEG_INFINITY;
                for (i, region) in candidates.iter().enumerate() {
                    let shape = self.spatial.reproject(&region.geometry, srid)?;
                    let area = self.spatial.area(&shape);
                    if area > best_area {
                        best = i;
                        best_area = area;
                    }
                }
                Ok(best)
            }
        }
    }
}
