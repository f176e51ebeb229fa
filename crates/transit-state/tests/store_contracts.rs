//! Contract tests for the registry store traits.
//!
//! Every check runs against the in-memory fake and the SurrealDB backend
//! (`mem://`); any conforming implementation must pass them.

use std::collections::HashSet;

use transit_state::fakes::{MemoryArchiveStore, MemoryRegistryStore};
use transit_state::storage_traits::*;
use transit_state::{
    Agency, Feed, FeedParseStatus, Region, SridGeometry, StorageError, SurrealRegistryStore,
    SRID_WGS84,
};

fn square(x: f64, y: f64, size: f64) -> SridGeometry {
    SridGeometry::from_wkt(
        SRID_WGS84,
        &format!(
            "POLYGON(({x} {y}, {x2} {y}, {x2} {y2}, {x} {y2}, {x} {y}))",
            x2 = x + size,
            y2 = y + size
        ),
    )
    .unwrap()
}

// ===========================================================================
// Shared contract bodies
// ===========================================================================

async fn agency_save_get_roundtrip<S: RegistryStore>(store: &S) {
    let mut agency = Agency::new("Metro Transit", "https://metrotransit.example");
    agency.ntd_id = Some("05027".to_string());
    agency.uza_names = vec!["Minneapolis--St. Paul, MN".to_string()];
    store.save_agency(&agency).await.unwrap();

    let loaded = store.get_agency(&agency.id).await.unwrap();
    assert_eq!(loaded, agency);
}

async fn save_replaces_existing<S: RegistryStore>(store: &S) {
    let mut agency = Agency::new("Old Name", "https://agency.example");
    store.save_agency(&agency).await.unwrap();
    agency.name = "New Name".to_string();
    store.save_agency(&agency).await.unwrap();

    let all = store.find_agencies(AgencyQuery::All).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name, "New Name");
}

async fn missing_entities_are_typed_not_found<S: RegistryStore>(store: &S) {
    let agency = Agency::new("Ghost", "https://ghost.example");
    let err = store.get_agency(&agency.id).await.unwrap_err();
    assert!(matches!(err, StorageError::AgencyNotFound { id } if id == agency.id));

    let feed = Feed::new("Ghost", "https://ghost.example");
    let err = store.get_feed(&feed.id).await.unwrap_err();
    assert!(matches!(err, StorageError::FeedNotFound { .. }));

    let region = Region::new("Nowhere", square(0.0, 0.0, 1.0));
    let err = store.get_region(&region.id).await.unwrap_err();
    assert!(matches!(err, StorageError::RegionNotFound { .. }));
}

async fn agency_queries_follow_feed_links<S: RegistryStore>(store: &S) {
    let feed = Feed::new("Shared", "https://shared.example");
    store.save_feed(&feed).await.unwrap();

    let mut enabled = Agency::new("Enabled", "https://enabled.example");
    enabled.feeds.insert(feed.id);
    let mut disabled = Agency::new("Disabled", "https://disabled.example");
    disabled.feeds.insert(feed.id);
    disabled.disabled = true;
    let unrelated = Agency::new("Unrelated", "https://unrelated.example");

    for agency in [&enabled, &disabled, &unrelated] {
        store.save_agency(agency).await.unwrap();
    }

    let linked: HashSet<_> = store
        .find_agencies(AgencyQuery::LinkedToFeed(feed.id))
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(linked, HashSet::from([enabled.id, disabled.id]));

    let enabled_only = store
        .find_agencies(AgencyQuery::EnabledLinkedToFeed(feed.id))
        .await
        .unwrap();
    assert_eq!(enabled_only.len(), 1);
    assert_eq!(enabled_only[0].id, enabled.id);
}

async fn feed_queries_filter_status_and_supersession<S: RegistryStore>(store: &S) {
    let newer = Feed::new("Metro", "https://metro.example");
    let mut older = Feed::new("Metro", "https://metro.example");
    older.superseded_by = Some(newer.id);
    older.status = Some(FeedParseStatus::Successful);
    older.geometry = Some(square(0.0, 0.0, 1.0));
    older.realtime_urls = vec!["https://rt.metro.example/trips".to_string()];
    let mut failed = Feed::new("Metro", "https://metro.example");
    failed.status = Some(FeedParseStatus::Failed);

    for feed in [&newer, &older, &failed] {
        store.save_feed(feed).await.unwrap();
    }

    let successful = store
        .find_feeds(FeedQuery::WithStatus(FeedParseStatus::Successful))
        .await
        .unwrap();
    assert_eq!(successful, vec![older.clone()]);

    let superseded = store
        .find_feeds(FeedQuery::SupersededBy(newer.id))
        .await
        .unwrap();
    assert_eq!(superseded.len(), 1);
    assert_eq!(superseded[0].id, older.id);
}

async fn region_membership_query<S: RegistryStore>(store: &S) {
    let agency = Agency::new("Metro", "https://metro.example");
    let mut member = Region::new("Twin Cities", square(0.0, 0.0, 1.0));
    member.agencies.insert(agency.id);
    let other = Region::new("Duluth", square(5.0, 5.0, 1.0));
    store.save_region(&member).await.unwrap();
    store.save_region(&other).await.unwrap();

    let containing = store
        .find_regions(RegionQuery::ContainingAgency(agency.id))
        .await
        .unwrap();
    assert_eq!(containing, vec![member]);
}

async fn delete_is_noop_when_missing<S: RegistryStore>(store: &S) {
    let region = Region::new("Temp", square(0.0, 0.0, 1.0));
    store.save_region(&region).await.unwrap();
    store.delete_region(&region.id).await.unwrap();
    assert!(store.get_region(&region.id).await.is_err());
    store.delete_region(&region.id).await.unwrap();
}

async fn commit_applies_saves_and_deletes<S: RegistryStore>(store: &S) {
    let keep = Region::new("Base", square(0.0, 0.0, 1.0));
    let gone = Region::new("Absorbed", square(1.0, 0.0, 1.0));
    store.save_region(&keep).await.unwrap();
    store.save_region(&gone).await.unwrap();

    let agency = Agency::new("Metro", "https://metro.example");
    let mut merged = keep.clone();
    merged.agencies.insert(agency.id);

    store
        .commit(
            ChangeSet::new()
                .save_agency(agency.clone())
                .save_region(merged.clone())
                .delete_region(gone.id),
        )
        .await
        .unwrap();

    assert_eq!(store.get_region(&keep.id).await.unwrap(), merged);
    assert!(store.get_region(&gone.id).await.is_err());
    assert_eq!(store.get_agency(&agency.id).await.unwrap(), agency);
}

async fn commit_with_stale_delete_writes_nothing<S: RegistryStore>(store: &S) {
    let base = Region::new("Base", square(0.0, 0.0, 1.0));
    store.save_region(&base).await.unwrap();
    let never_saved = Region::new("Phantom", square(3.0, 3.0, 1.0));

    let mut changed = base.clone();
    changed.name = "Changed".to_string();
    let err = store
        .commit(
            ChangeSet::new()
                .save_region(changed)
                .delete_region(never_saved.id),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::RegionNotFound { .. }));
    assert_eq!(store.get_region(&base.id).await.unwrap().name, "Base");
}

async fn commit_deletes_feed_and_unlinks_it<S: RegistryStore>(store: &S) {
    let feed = Feed::new("Metro", "https://metro.example");
    store.save_feed(&feed).await.unwrap();
    let mut agency = Agency::new("Metro", "https://metro.example");
    agency.feeds.insert(feed.id);
    store.save_agency(&agency).await.unwrap();

    let mut unlinked = agency.clone();
    unlinked.feeds.remove(&feed.id);
    store
        .commit(ChangeSet::new().save_agency(unlinked).delete_feed(feed.id))
        .await
        .unwrap();

    assert!(matches!(
        store.get_feed(&feed.id).await,
        Err(StorageError::FeedNotFound { .. })
    ));
    assert!(store.get_agency(&agency.id).await.unwrap().feeds.is_empty());

    // A second delete of the same feed is stale and writes nothing.
    let mut renamed = agency.clone();
    renamed.name = "Renamed".to_string();
    let err = store
        .commit(ChangeSet::new().save_agency(renamed).delete_feed(feed.id))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::FeedNotFound { .. }));
    assert_eq!(store.get_agency(&agency.id).await.unwrap().name, "Metro");
}

// ===========================================================================
// MemoryRegistryStore
// ===========================================================================

#[tokio::test]
async fn memory_agency_save_get_roundtrip() {
    agency_save_get_roundtrip(&MemoryRegistryStore::new()).await;
}

#[tokio::test]
async fn memory_save_replaces_existing() {
    save_replaces_existing(&MemoryRegistryStore::new()).await;
}

#[tokio::test]
async fn memory_missing_entities_are_typed_not_found() {
    missing_entities_are_typed_not_found(&MemoryRegistryStore::new()).await;
}

#[tokio::test]
async fn memory_agency_queries_follow_feed_links() {
    agency_queries_follow_feed_links(&MemoryRegistryStore::new()).await;
}

#[tokio::test]
async fn memory_feed_queries_filter_status_and_supersession() {
    feed_queries_filter_status_and_supersession(&MemoryRegistryStore::new()).await;
}

#[tokio::test]
async fn memory_region_membership_query() {
    region_membership_query(&MemoryRegistryStore::new()).await;
}

#[tokio::test]
async fn memory_delete_is_noop_when_missing() {
    delete_is_noop_when_missing(&MemoryRegistryStore::new()).await;
}

#[tokio::test]
async fn memory_commit_applies_saves_and_deletes() {
    commit_applies_saves_and_deletes(&MemoryRegistryStore::new()).await;
}

#[tokio::test]
async fn memory_commit_with_stale_delete_writes_nothing() {
    commit_with_stale_delete_writes_nothing(&MemoryRegistryStore::new()).await;
}

#[tokio::test]
async fn memory_commit_deletes_feed_and_unlinks_it() {
    commit_deletes_feed_and_unlinks_it(&MemoryRegistryStore::new()).await;
}

#[tokio::test]
async fn memory_injected_commit_failure_writes_nothing() {
    let store = MemoryRegistryStore::new();
    let region = Region::new("Base", square(0.0, 0.0, 1.0));
    store.save_region(&region).await.unwrap();

    store.fail_next_commit();
    let err = store
        .commit(ChangeSet::new().delete_region(region.id))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Backend(_)));
    assert_eq!(store.region_count(), 1);

    // Only the next commit fails.
    store
        .commit(ChangeSet::new().delete_region(region.id))
        .await
        .unwrap();
    assert_eq!(store.region_count(), 0);
}

// ===========================================================================
// SurrealRegistryStore
// ===========================================================================

async fn surreal() -> SurrealRegistryStore {
    SurrealRegistryStore::in_memory().await.unwrap()
}

#[tokio::test]
async fn surreal_agency_save_get_roundtrip() {
    agency_save_get_roundtrip(&surreal().await).await;
}

#[tokio::test]
async fn surreal_save_replaces_existing() {
    save_replaces_existing(&surreal().await).await;
}

#[tokio::test]
async fn surreal_missing_entities_are_typed_not_found() {
    missing_entities_are_typed_not_found(&surreal().await).await;
}

#[tokio::test]
async fn surreal_agency_queries_follow_feed_links() {
    agency_queries_follow_feed_links(&surreal().await).await;
}

#[tokio::test]
async fn surreal_feed_queries_filter_status_and_supersession() {
    feed_queries_filter_status_and_supersession(&surreal().await).await;
}

#[tokio::test]
async fn surreal_region_membership_query() {
    region_membership_query(&surreal().await).await;
}

#[tokio::test]
async fn surreal_delete_is_noop_when_missing() {
    delete_is_noop_when_missing(&surreal().await).await;
}

#[tokio::test]
async fn surreal_commit_applies_saves_and_deletes() {
    commit_applies_saves_and_deletes(&surreal().await).await;
}

#[tokio::test]
async fn surreal_commit_with_stale_delete_writes_nothing() {
    commit_with_stale_delete_writes_nothing(&surreal().await).await;
}

#[tokio::test]
async fn surreal_commit_deletes_feed_and_unlinks_it() {
    commit_deletes_feed_and_unlinks_it(&surreal().await).await;
}

// ===========================================================================
// FeedArchiveStore
// ===========================================================================

#[tokio::test]
async fn archive_put_returns_content_digest() {
    let store = MemoryArchiveStore::new();
    let data = b"PK\x03\x04 feed bytes";
    let digest = store.put(data).await.unwrap();

    assert_eq!(digest, ArchiveDigest::of(data));
    assert_eq!(store.get(&digest).await.unwrap(), data);
    store.put(data).await.unwrap();
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn archive_put_refuses_non_zip() {
    let store = MemoryArchiveStore::new();
    let err = store.put(b"stop_id,stop_name").await.unwrap_err();

    assert!(matches!(err, StorageError::NotAFeedArchive { .. }));
    assert!(store.is_empty());
}

#[tokio::test]
async fn archive_get_missing_is_not_found() {
    let store = MemoryArchiveStore::new();
    let bogus = ArchiveDigest::of(b"absent");
    let err = store.get(&bogus).await.unwrap_err();

    assert!(matches!(err, StorageError::ArchiveNotFound { .. }));
    assert!(!store.remove(&bogus).await.unwrap());
}

#[test]
fn archive_digest_parses_stored_ids() {
    let err = "xyz".parse::<ArchiveDigest>().unwrap_err();
    assert!(matches!(err, StorageError::InvalidDigest { .. }));

    let digest: ArchiveDigest = "A".repeat(64).parse().unwrap();
    assert_eq!(digest.as_str(), "a".repeat(64));
}
