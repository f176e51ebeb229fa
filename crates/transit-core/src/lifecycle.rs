//! Feed cloning, supersession and raw archive attachment.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use transit_state::{
    AgencyId, AgencyQuery, ArchiveDigest, ChangeSet, Feed, FeedArchiveStore, FeedId, FeedQuery,
    RegistryStore, StorageError,
};

use crate::error::{RegistryError, Result};
use crate::relations::RelationManager;

pub struct FeedLifecycle<S> {
    store: Arc<S>,
    relations: Arc<RelationManager<S>>,
    // Held across the cycle check and the write so two opposing
    // supersessions cannot both pass the check.
    supersession: Mutex<()>,
}

impl<S: RegistryStore> FeedLifecycle<S> {
    pub fn new(store: Arc<S>, relations: Arc<RelationManager<S>>) -> Self {
        Self {
            store,
            relations,
            supersession: Mutex::new(()),
        }
    }

    /// Copy a feed under a fresh id and link the copy wherever the source is
    /// linked.
    ///
    /// The copy is saved before any agency references it.
    #[instrument(skip(self), fields(feed_id = %feed))]
    pub async fn clone_feed(&self, feed: FeedId) -> Result<Feed> {
        let source = self.store.get_feed(&feed).await?;
        let copy = source.duplicate();
        self.store.save_feed(&copy).await?;

        let mut owners = self
            .store
            .find_agencies(AgencyQuery::LinkedToFeed(source.id))
            .await?;
        owners.sort_by_key(|a| a.id);
        for owner in &owners {
            self.relations.link_feed(owner.id, copy.id).await?;
        }

        info!(clone_id = %copy.id, agencies = owners.len(), "feed cloned");
        Ok(copy)
    }

    /// Record that `new` replaces `old`.
    ///
    /// Rejected with `SupersessionCycle` if `old` is reachable from `new`
    /// along existing supersession edges, or if the two are the same feed.
    #[instrument(skip(self), fields(old = %old, new = %new))]
    pub async fn supersede(&self, old: FeedId, new: FeedId) -> Result<Feed> {
        if old == new {
            return Err(RegistryError::SupersessionCycle { old, new });
        }

        let _guard = self.supersession.lock().await;
        self.store.get_feed(&old).await?;
        let chain = self.chain_from(new).await?;
        if chain.iter().any(|f| f.id == old) {
            return Err(RegistryError::SupersessionCycle { old, new });
        }

        let feed = self
            .relations
            .update_feed(old, |f| {
                let changed = f.superseded_by != Some(new);
                f.superseded_by = Some(new);
                changed
            })
            .await?;
        debug!("supersession recorded");
        Ok(feed)
    }

    /// Remove the feed's supersession edge, if any.
    #[instrument(skip(self), fields(feed_id = %feed))]
    pub async fn clear_supersession(&self, feed: FeedId) -> Result<Feed> {
        let _guard = self.supersession.lock().await;
        self.relations
            .update_feed(feed, |f| f.superseded_by.take().is_some())
            .await
    }

    /// Follow supersession edges from `feed` to the newest version.
    pub async fn latest_version(&self, feed: FeedId) -> Result<Feed> {
        self.chain_from(feed)
            .await?
            .pop()
            .ok_or(RegistryError::Storage(StorageError::FeedNotFound { id: feed }))
    }

    /// Feeds directly replaced by `feed`, ascending by id.
    pub async fn previous_versions(&self, feed: FeedId) -> Result<Vec<Feed>> {
        let mut feeds = self.store.find_feeds(FeedQuery::SupersededBy(feed)).await?;
        feeds.sort_by_key(|f| f.id);
        Ok(feeds)
    }

    /// Delete a feed and every reference to it in one commit.
    ///
    /// The feed is removed from each linked agency's feed set and from the
    /// `superseded_by` pointer of any feed it replaced. Returns the agencies
    /// it was unlinked from, ascending by id.
    #[instrument(skip(self), fields(feed_id = %feed))]
    pub async fn delete_feed(&self, feed: FeedId) -> Result<Vec<AgencyId>> {
        let _guard = self.supersession.lock().await;
        self.store.get_feed(&feed).await?;

        let mut owners: Vec<AgencyId> = self
            .store
            .find_agencies(AgencyQuery::LinkedToFeed(feed))
            .await?
            .iter()
            .map(|a| a.id)
            .collect();
        owners.sort();
        let predecessors: Vec<FeedId> = self
            .store
            .find_feeds(FeedQuery::SupersededBy(feed))
            .await?
            .iter()
            .map(|f| f.id)
            .collect();

        let mut locked_feeds = predecessors.clone();
        locked_feeds.push(feed);
        let _locks = self
            .relations
            .lock_agencies_and_feeds(&owners, &locked_feeds)
            .await;

        let mut changes = ChangeSet::new();
        for id in &owners {
            let mut agency = self.store.get_agency(id).await?;
            if agency.feeds.remove(&feed) {
                changes = changes.save_agency(agency);
            }
        }
        for id in &predecessors {
            let mut older = self.store.get_feed(id).await?;
            if older.superseded_by == Some(feed) {
                older.superseded_by = None;
                changes = changes.save_feed(older);
            }
        }
        self.store.commit(changes.delete_feed(feed)).await?;

        info!(
            agencies = owners.len(),
            predecessors = predecessors.len(),
            "feed deleted"
        );
        Ok(owners)
    }

    /// Store the raw feed file and record its digest on the feed.
    #[instrument(skip(self, archive, bytes), fields(feed_id = %feed, size = bytes.len()))]
    pub async fn attach_archive<A>(
        &self,
        archive: &A,
        feed: FeedId,
        bytes: &[u8],
    ) -> Result<(Feed, ArchiveDigest)>
    where
        A: FeedArchiveStore + ?Sized,
    {
        self.store.get_feed(&feed).await?;
        let digest = archive.put(bytes).await?;
        let stored = digest.to_string();
        let feed = self
            .relations
            .update_feed(feed, |f| {
                let changed = f.stored_id.as_deref() != Some(stored.as_str());
                f.stored_id = Some(stored);
                changed
            })
            .await?;
        info!(digest = %digest.short(), "archive attached");
        Ok((feed, digest))
    }

    /// `start` followed by each successor, oldest first.
    async fn chain_from(&self, start: FeedId) -> Result<Vec<Feed>> {
        let mut seen = HashSet::new();
        let mut chain = Vec::new();
        let mut next = Some(start);
        while let Some(id) = next {
            if !seen.insert(id) {
                break;
            }
            let feed = self.store.get_feed(&id).await?;
            next = feed.superseded_by;
            chain.push(feed);
        }
        Ok(chain)
    }
}
