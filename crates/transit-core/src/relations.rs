//! Owner of the agency/feed and region/agency relations.
//!
//! Every mutation of `Agency::feeds` or `Region::agencies` (and every other
//! read-modify-write of a single aggregate) goes through [`RelationManager`].
//! Each one holds an async lock keyed by the aggregate id, re-reads the
//! aggregate from the store, mutates it and saves it before releasing the
//! lock. Two linkers racing on the same agency therefore never overwrite each
//! other's additions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument};
use transit_state::{Agency, AgencyId, Feed, FeedId, Region, RegionId, RegistryStore};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum LockKey {
    Agency(AgencyId),
    Feed(FeedId),
    Region(RegionId),
}

type LockTable = StdMutex<HashMap<LockKey, Arc<Mutex<()>>>>;

/// Exclusive hold on one aggregate.
///
/// Dropping it releases the aggregate and forgets the lock slot once no other
/// task holds or waits on it.
pub struct AggregateLock {
    key: LockKey,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
}

impl Drop for AggregateLock {
    fn drop(&mut self) {
        // Release first so our own guard no longer counts as a holder.
        drop(self.guard.take());
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if table
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            table.remove(&self.key);
        }
    }
}

/// Serializes read-modify-write cycles per aggregate.
pub struct RelationManager<S> {
    store: Arc<S>,
    table: Arc<LockTable>,
}

impl<S: RegistryStore> RelationManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            table: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    async fn lock(&self, key: LockKey) -> AggregateLock {
        let slot = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(key).or_default())
        };
        AggregateLock {
            key,
            guard: Some(slot.lock_owned().await),
            table: Arc::clone(&self.table),
        }
    }

    // Ascending key order so two batch lockers never wait on each other in a cycle.
    async fn lock_all(&self, mut keys: Vec<LockKey>) -> Vec<AggregateLock> {
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(key).await);
        }
        guards
    }

    /// Lock several regions at once, always in ascending id order.
    pub async fn lock_regions(&self, ids: &[RegionId]) -> Vec<AggregateLock> {
        self.lock_all(ids.iter().copied().map(LockKey::Region).collect())
            .await
    }

    /// Lock a set of agencies and feeds together for one multi-entity commit.
    pub async fn lock_agencies_and_feeds(
        &self,
        agencies: &[AgencyId],
        feeds: &[FeedId],
    ) -> Vec<AggregateLock> {
        let keys = agencies
            .iter()
            .copied()
            .map(LockKey::Agency)
            .chain(feeds.iter().copied().map(LockKey::Feed))
            .collect();
        self.lock_all(keys).await
    }

    /// Number of lock slots currently tracked.
    pub fn tracked_locks(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Re-read the agency under its lock, apply `f`, save if `f` returns true.
    pub async fn update_agency<F>(&self, id: AgencyId, f: F) -> Result<Agency>
    where
        F: FnOnce(&mut Agency) -> bool,
    {
        let _guard = self.lock(LockKey::Agency(id)).await;
        let mut agency = self.store.get_agency(&id).await?;
        if f(&mut agency) {
            self.store.save_agency(&agency).await?;
        }
        Ok(agency)
    }

    /// Re-read the feed under its lock, apply `f`, save if `f` returns true.
    pub async fn update_feed<F>(&self, id: FeedId, f: F) -> Result<Feed>
    where
        F: FnOnce(&mut Feed) -> bool,
    {
        let _guard = self.lock(LockKey::Feed(id)).await;
        let mut feed = self.store.get_feed(&id).await?;
        if f(&mut feed) {
            self.store.save_feed(&feed).await?;
        }
        Ok(feed)
    }

    /// Add `feed` to the agency's feed set.
    #[instrument(skip(self), fields(agency_id = %agency, feed_id = %feed))]
    pub async fn link_feed(&self, agency: AgencyId, feed: FeedId) -> Result<Agency> {
        let agency = self.update_agency(agency, |a| a.feeds.insert(feed)).await?;
        debug!(feeds = agency.feeds.len(), "feed linked");
        Ok(agency)
    }

    /// Remove `feed` from the agency's feed set.
    #[instrument(skip(self), fields(agency_id = %agency, feed_id = %feed))]
    pub async fn unlink_feed(&self, agency: AgencyId, feed: FeedId) -> Result<Agency> {
        self.update_agency(agency, |a| a.feeds.remove(&feed)).await
    }

    /// Add `agency` to the region's member set.
    #[instrument(skip(self), fields(region_id = %region, agency_id = %agency))]
    pub async fn add_member(&self, region: RegionId, agency: AgencyId) -> Result<Region> {
        let _guard = self.lock(LockKey::Region(region)).await;
        let mut region = self.store.get_region(&region).await?;
        if region.agencies.insert(agency) {
            self.store.save_region(&region).await?;
        }
        Ok(region)
    }
}
