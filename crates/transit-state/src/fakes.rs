//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryRegistryStore` and `MemoryArchiveStore` that satisfy the
//! trait contracts without any external dependencies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::model::{Agency, AgencyId, Feed, FeedId, Region, RegionId};
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryRegistryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
struct Tables {
    agencies: HashMap<AgencyId, Agency>,
    feeds: HashMap<FeedId, Feed>,
    regions: HashMap<RegionId, Region>,
}

/// In-memory registry backed by one `Mutex` over all three tables.
///
/// `commit` applies a change set under a single lock acquisition, so it is
/// atomic with respect to every other call. `fail_next_commit` makes the next
/// commit return a backend error without applying anything.
#[derive(Debug, Default)]
pub struct MemoryRegistryStore {
    tables: Mutex<Tables>,
    fail_next_commit: AtomicBool,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arrange for the next `commit` to fail.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn region_count(&self) -> usize {
        self.tables.lock().unwrap().regions.len()
    }
}

#[async_trait]
impl AgencyStore for MemoryRegistryStore {
    async fn get_agency(&self, id: &AgencyId) -> StorageResult<Agency> {
        let tables = self.tables.lock().unwrap();
        tables
            .agencies
            .get(id)
            .cloned()
            .ok_or(StorageError::AgencyNotFound { id: *id })
    }

    async fn find_agencies(&self, query: AgencyQuery) -> StorageResult<Vec<Agency>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .agencies
            .values()
            .filter(|a| query.matches(a))
            .cloned()
            .collect())
    }

    async fn save_agency(&self, agency: &Agency) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.agencies.insert(agency.id, agency.clone());
        Ok(())
    }

    async fn delete_agency(&self, id: &AgencyId) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.agencies.remove(id);
        Ok(())
    }
}

#[async_trait]
impl FeedStore for MemoryRegistryStore {
    async fn get_feed(&self, id: &FeedId) -> StorageResult<Feed> {
        let tables = self.tables.lock().unwrap();
        tables
            .feeds
            .get(id)
            .cloned()
            .ok_or(StorageError::FeedNotFound { id: *id })
    }

    async fn find_feeds(&self, query: FeedQuery) -> StorageResult<Vec<Feed>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .feeds
            .values()
            .filter(|f| query.matches(f))
            .cloned()
            .collect())
    }

    async fn save_feed(&self, feed: &Feed) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.feeds.insert(feed.id, feed.clone());
        Ok(())
    }

    async fn delete_feed(&self, id: &FeedId) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.feeds.remove(id);
        Ok(())
    }
}

#[async_trait]
impl RegionStore for MemoryRegistryStore {
    async fn get_region(&self, id: &RegionId) -> StorageResult<Region> {
        let tables = self.tables.lock().unwrap();
        tables
            .regions
            .get(id)
            .cloned()
            .ok_or(StorageError::RegionNotFound { id: *id })
    }

    async fn find_regions(&self, query: RegionQuery) -> StorageResult<Vec<Region>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .regions
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect())
    }

    async fn save_region(&self, region: &Region) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.regions.insert(region.id, region.clone());
        Ok(())
    }

    async fn delete_region(&self, id: &RegionId) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.regions.remove(id);
        Ok(())
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn commit(&self, changes: ChangeSet) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Backend("injected commit failure".to_string()));
        }

        // Stage on a copy so a mid-batch error leaves the tables untouched.
        let mut staged = tables.clone();
        for agency in changes.save_agencies {
            staged.agencies.insert(agency.id, agency);
        }
        for feed in changes.save_feeds {
            staged.feeds.insert(feed.id, feed);
        }
        for region in changes.save_regions {
            staged.regions.insert(region.id, region);
        }
        for id in changes.delete_regions {
            if staged.regions.remove(&id).is_none() {
                return Err(StorageError::RegionNotFound { id });
            }
        }
        for id in changes.delete_feeds {
            if staged.feeds.remove(&id).is_none() {
                return Err(StorageError::FeedNotFound { id });
            }
        }
        *tables = staged;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryArchiveStore
// ---------------------------------------------------------------------------

/// Feed archives held in a map keyed by digest.
#[derive(Debug, Default)]
pub struct MemoryArchiveStore {
    archives: Mutex<HashMap<ArchiveDigest, Vec<u8>>>,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.archives.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FeedArchiveStore for MemoryArchiveStore {
    async fn put(&self, archive: &[u8]) -> StorageResult<ArchiveDigest> {
        check_feed_archive(archive)?;
        let digest = ArchiveDigest::of(archive);
        self.archives
            .lock()
            .unwrap()
            .entry(digest.clone())
            .or_insert_with(|| archive.to_vec());
        Ok(digest)
    }

    async fn get(&self, digest: &ArchiveDigest) -> StorageResult<Vec<u8>> {
        self.archives
            .lock()
            .unwrap()
            .get(digest)
            .cloned()
            .ok_or_else(|| StorageError::ArchiveNotFound {
                digest: digest.to_string(),
            })
    }

    async fn contains(&self, digest: &ArchiveDigest) -> StorageResult<bool> {
        Ok(self.archives.lock().unwrap().contains_key(digest))
    }

    async fn remove(&self, digest: &ArchiveDigest) -> StorageResult<bool> {
        Ok(self.archives.lock().unwrap().remove(digest).is_some())
    }
}
