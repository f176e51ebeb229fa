//! Storage trait definitions for the transit registry
//!
//! These traits define the persistence boundary:
//! - `AgencyStore`, `FeedStore`, `RegionStore`: narrow find/get/save/delete
//!   per entity kind, with typed query predicates
//! - `RegistryStore`: all three plus an atomic multi-entity `commit`
//! - `FeedArchiveStore`: raw GTFS zips filed under their SHA-256 digest
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::error::StorageError;
use crate::model::{Agency, AgencyId, Feed, FeedId, FeedParseStatus, Region, RegionId};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Query predicates
// ---------------------------------------------------------------------------

/// Predicate for [`AgencyStore::find_agencies`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgencyQuery {
    All,
    /// Agencies whose feed set contains the feed
    LinkedToFeed(FeedId),
    /// Same as `LinkedToFeed`, excluding disabled agencies
    EnabledLinkedToFeed(FeedId),
}

impl AgencyQuery {
    pub fn matches(&self, agency: &Agency) -> bool {
        match self {
            AgencyQuery::All => true,
            AgencyQuery::LinkedToFeed(feed) => agency.feeds.contains(feed),
            AgencyQuery::EnabledLinkedToFeed(feed) => {
                !agency.disabled && agency.feeds.contains(feed)
            }
        }
    }
}

/// Predicate for [`FeedStore::find_feeds`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedQuery {
    All,
    WithStatus(FeedParseStatus),
    /// Feeds whose `superseded_by` points at the given feed
    SupersededBy(FeedId),
}

impl FeedQuery {
    pub fn matches(&self, feed: &Feed) -> bool {
        match self {
            FeedQuery::All => true,
            FeedQuery::WithStatus(status) => feed.status == Some(*status),
            FeedQuery::SupersededBy(newer) => feed.superseded_by == Some(*newer),
        }
    }
}

/// Predicate for [`RegionStore::find_regions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionQuery {
    All,
    /// Regions whose membership contains the agency
    ContainingAgency(AgencyId),
}

impl RegionQuery {
    pub fn matches(&self, region: &Region) -> bool {
        match self {
            RegionQuery::All => true,
            RegionQuery::ContainingAgency(agency) => region.agencies.contains(agency),
        }
    }
}

// ---------------------------------------------------------------------------
// Entity stores
// ---------------------------------------------------------------------------

/// Persistence for agencies.
///
/// Guarantees:
/// - `save_agency` inserts or fully replaces the record with the same id.
/// - `get_agency` returns `StorageError::AgencyNotFound` if absent.
/// - `delete_agency` is a no-op if absent.
#[async_trait]
pub trait AgencyStore: Send + Sync {
    async fn get_agency(&self, id: &AgencyId) -> StorageResult<Agency>;

    async fn find_agencies(&self, query: AgencyQuery) -> StorageResult<Vec<Agency>>;

    async fn save_agency(&self, agency: &Agency) -> StorageResult<()>;

    async fn delete_agency(&self, id: &AgencyId) -> StorageResult<()>;
}

/// Persistence for feeds. Same semantics as [`AgencyStore`].
#[async_trait]
pub trait FeedStore: Send + Sync {
    async fn get_feed(&self, id: &FeedId) -> StorageResult<Feed>;

    async fn find_feeds(&self, query: FeedQuery) -> StorageResult<Vec<Feed>>;

    async fn save_feed(&self, feed: &Feed) -> StorageResult<()>;

    async fn delete_feed(&self, id: &FeedId) -> StorageResult<()>;
}

/// Persistence for regions. Same semantics as [`AgencyStore`].
///
/// `find_regions` returns results in backend order; callers that need a
/// stable order must sort.
#[async_trait]
pub trait RegionStore: Send + Sync {
    async fn get_region(&self, id: &RegionId) -> StorageResult<Region>;

    async fn find_regions(&self, query: RegionQuery) -> StorageResult<Vec<Region>>;

    async fn save_region(&self, region: &Region) -> StorageResult<()>;

    async fn delete_region(&self, id: &RegionId) -> StorageResult<()>;
}

/// A batch of writes applied all-or-nothing by [`RegistryStore::commit`].
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub save_agencies: Vec<Agency>,
    pub save_feeds: Vec<Feed>,
    pub save_regions: Vec<Region>,
    pub delete_regions: Vec<RegionId>,
    pub delete_feeds: Vec<FeedId>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_agency(mut self, agency: Agency) -> Self {
        self.save_agencies.push(agency);
        self
    }

    pub fn save_feed(mut self, feed: Feed) -> Self {
        self.save_feeds.push(feed);
        self
    }

    pub fn save_region(mut self, region: Region) -> Self {
        self.save_regions.push(region);
        self
    }

    pub fn delete_region(mut self, id: RegionId) -> Self {
        self.delete_regions.push(id);
        self
    }

    pub fn delete_feed(mut self, id: FeedId) -> Self {
        self.delete_feeds.push(id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.save_agencies.is_empty()
            && self.save_feeds.is_empty()
            && self.save_regions.is_empty()
            && self.delete_regions.is_empty()
            && self.delete_feeds.is_empty()
    }
}

/// The full registry store.
///
/// `commit` applies a [`ChangeSet`] atomically: saves first, then deletes,
/// and on any failure no write in the set is visible.
#[async_trait]
pub trait RegistryStore: AgencyStore + FeedStore + RegionStore {
    async fn commit(&self, changes: ChangeSet) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// FeedArchiveStore: raw feed files by content digest
// ---------------------------------------------------------------------------

/// Zip local-file header; a GTFS archive with at least one member starts here.
const ZIP_LOCAL_HEADER: &[u8] = b"PK\x03\x04";
/// End-of-central-directory record; an empty zip is nothing but this.
const ZIP_EMPTY_ARCHIVE: &[u8] = b"PK\x05\x06";

/// SHA-256 of a raw feed archive in lowercase hex, as kept in
/// `Feed::stored_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveDigest(String);

impl ArchiveDigest {
    pub fn of(archive: &[u8]) -> Self {
        ArchiveDigest(hex::encode(Sha256::digest(archive)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl FromStr for ArchiveDigest {
    type Err = StorageError;

    /// Accepts the 64-char hex form in either case, e.g. a `stored_id`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest {
                digest: s.to_string(),
            });
        }
        Ok(ArchiveDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ArchiveDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reject bytes that cannot be a GTFS feed file.
///
/// Only the zip signature is checked; member files are the feed parser's
/// business.
pub fn check_feed_archive(bytes: &[u8]) -> StorageResult<()> {
    if bytes.is_empty() {
        return Err(StorageError::NotAFeedArchive {
            reason: "archive is empty".to_string(),
        });
    }
    if !bytes.starts_with(ZIP_LOCAL_HEADER) && !bytes.starts_with(ZIP_EMPTY_ARCHIVE) {
        return Err(StorageError::NotAFeedArchive {
            reason: "missing zip signature".to_string(),
        });
    }
    Ok(())
}

/// Raw GTFS archives keyed by their SHA-256 digest.
///
/// `put` refuses anything [`check_feed_archive`] rejects, so every digest a
/// feed records names a zip. Storing the same archive twice returns the same
/// digest and keeps one copy. `get` returns `CorruptArchive` when the stored
/// bytes no longer hash to the digest they were filed under.
#[async_trait]
pub trait FeedArchiveStore: Send + Sync {
    async fn put(&self, archive: &[u8]) -> StorageResult<ArchiveDigest>;

    /// `ArchiveNotFound` if nothing was stored under `digest`.
    async fn get(&self, digest: &ArchiveDigest) -> StorageResult<Vec<u8>>;

    async fn contains(&self, digest: &ArchiveDigest) -> StorageResult<bool>;

    /// Returns whether an archive was actually removed.
    async fn remove(&self, digest: &ArchiveDigest) -> StorageResult<bool>;
}
