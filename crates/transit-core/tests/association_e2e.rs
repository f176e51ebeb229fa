use std::sync::Arc;

use transit_core::{
    AssociationEngine, EngineConfig, MatchOutcome, PlanarSpatialOps, RegistryError, SpatialOps,
};
use transit_state::fakes::MemoryRegistryStore;
use transit_state::storage_traits::*;
use transit_state::{
    Agency, Feed, FeedId, FeedParseStatus, FsArchiveStore, Region, SridGeometry,
    SurrealRegistryStore, SRID_WGS84,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn square(x: f64, y: f64, size: f64) -> SridGeometry {
    SridGeometry::from_wkt(
        SRID_WGS84,
        &format!(
            "POLYGON(({x} {y}, {x2} {y}, {x2} {y2}, {x} {y2}, {x} {y}))",
            x2 = x + size,
            y2 = y + size
        ),
    )
    .expect("valid square")
}

fn parsed_feed(url: &str, geometry: SridGeometry) -> Feed {
    let mut feed = Feed::new("City Transit", url);
    feed.status = Some(FeedParseStatus::Successful);
    feed.geometry = Some(geometry);
    feed
}

/// Agency with one successfully parsed feed covering `shape`.
async fn agency_covering<S: RegistryStore>(store: &S, shape: SridGeometry) -> Agency {
    let feed = parsed_feed("https://metro.example", shape);
    store.save_feed(&feed).await.expect("save feed");
    let mut agency = Agency::new("Metro", "https://metro.example");
    agency.feeds.insert(feed.id);
    store.save_agency(&agency).await.expect("save agency");
    agency
}

async fn all_regions<S: RegistryStore>(store: &S) -> Vec<Region> {
    let mut regions = store
        .find_regions(RegionQuery::All)
        .await
        .expect("find regions");
    regions.sort_by_key(|r| r.id);
    regions
}

// ---------------------------------------------------------------------------
// Feed arrives -> matched -> geometry derived -> placed in a region
// ---------------------------------------------------------------------------

async fn city_transit_scenario<S: RegistryStore>(store: Arc<S>) {
    let engine = AssociationEngine::new(Arc::clone(&store), EngineConfig::default());

    let g1 = square(-93.30, 44.95, 0.10);
    let feed = parsed_feed("http://transit.city.gov/info", g1.clone());
    store.save_feed(&feed).await.expect("save feed");
    let agency = Agency::new("City Transit", "https://www.transit.city.gov");
    store.save_agency(&agency).await.expect("save agency");

    let outcome = engine.match_feed(feed.id).await.expect("match");
    let MatchOutcome::Matched(agencies) = outcome else {
        panic!("feed should match the city agency");
    };
    assert_eq!(agencies.len(), 1);
    assert_eq!(agencies[0].id, agency.id);
    assert!(agencies[0].feeds.contains(&feed.id));

    let derived = engine
        .derive_geometry(agency.id)
        .await
        .expect("derive")
        .expect("agency has geometry");
    assert_eq!(derived, g1);

    let region = Region::new("Twin Cities", square(-93.50, 44.80, 0.50));
    store.save_region(&region).await.expect("save region");

    let joined = engine
        .assign_to_overlapping_regions(agency.id)
        .await
        .expect("assign");
    assert_eq!(joined, vec![region.id]);

    let stored = store.get_region(&region.id).await.expect("get region");
    assert!(stored.agencies.contains(&agency.id));
    assert_eq!(stored.geometry, region.geometry);

    let memberships = engine.regions_for_agency(agency.id).await.expect("regions");
    assert_eq!(memberships.len(), 1);
}

#[tokio::test]
async fn city_transit_scenario_in_memory() {
    city_transit_scenario(Arc::new(MemoryRegistryStore::new())).await;
}

#[tokio::test]
async fn city_transit_scenario_on_surrealdb() {
    let store = SurrealRegistryStore::in_memory()
        .await
        .expect("surreal in-memory store");
    city_transit_scenario(Arc::new(store)).await;
}

// ---------------------------------------------------------------------------
// Region split / merge counts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn split_never_reduces_region_count() {
    let store = Arc::new(MemoryRegistryStore::new());
    let engine = AssociationEngine::new(Arc::clone(&store), EngineConfig::default());
    for x in [0.0, 1.01, 2.5] {
        store
            .save_region(&Region::new(format!("R{x}"), square(x, 0.0, 1.0)))
            .await
            .expect("save region");
    }
    let before = all_regions(store.as_ref()).await;
    let agency = agency_covering(store.as_ref(), square(0.5, 0.2, 1.0)).await;

    let joined = engine
        .assign_to_overlapping_regions(agency.id)
        .await
        .expect("assign");
    assert_eq!(joined.len(), 2);

    let after = all_regions(store.as_ref()).await;
    assert_eq!(after.len(), before.len());
    for (b, a) in before.iter().zip(&after) {
        assert_eq!(a.geometry, b.geometry);
    }
}

#[tokio::test]
async fn merge_removes_exactly_k_minus_one_regions() {
    let store = Arc::new(MemoryRegistryStore::new());
    let engine = AssociationEngine::new(Arc::clone(&store), EngineConfig::default());
    let mut nearby = Vec::new();
    for x in [0.0, 2.0, 4.0] {
        let region = Region::new(format!("R{x}"), square(x, 0.0, 1.0));
        store.save_region(&region).await.expect("save region");
        nearby.push(region.id);
    }
    let far = Region::new("Far", square(50.0, 50.0, 1.0));
    store.save_region(&far).await.expect("save region");

    // Spans all three nearby regions.
    let agency = agency_covering(store.as_ref(), square(0.5, 0.25, 4.0)).await;

    let merge = engine
        .merge_overlapping_regions(agency.id)
        .await
        .expect("merge");
    assert_eq!(merge.absorbed.len(), 2);
    assert!(nearby.contains(&merge.base.id));

    let remaining = all_regions(store.as_ref()).await;
    assert_eq!(remaining.len(), 4 - 2);
    assert!(remaining.iter().any(|r| r.id == far.id));
    assert!(merge.base.agencies.contains(&agency.id));

    // Equal areas: the tie goes to the lowest id.
    assert_eq!(merge.base.id, *nearby.iter().min().expect("non-empty"));
    // Hull of the three unit squares along y in [0, 1]
    assert!((PlanarSpatialOps.area(&merge.base.geometry) - 5.0).abs() < 1e-9);
}

#[tokio::test]
async fn merge_with_zero_candidates_leaves_everything_unchanged() {
    let store = Arc::new(MemoryRegistryStore::new());
    let engine = AssociationEngine::new(Arc::clone(&store), EngineConfig::default());
    let far = Region::new("Far", square(50.0, 50.0, 1.0));
    store.save_region(&far).await.expect("save region");
    let agency = agency_covering(store.as_ref(), square(0.0, 0.0, 1.0)).await;

    let err = engine
        .merge_overlapping_regions(agency.id)
        .await
        .expect_err("nothing nearby");
    assert!(matches!(err, RegistryError::NoRegionFound { .. }));

    assert_eq!(all_regions(store.as_ref()).await, vec![far]);
    assert_eq!(
        store.get_agency(&agency.id).await.expect("get agency"),
        agency
    );
}

#[tokio::test]
async fn merge_commit_failure_rolls_back() {
    let store = Arc::new(MemoryRegistryStore::new());
    let engine = AssociationEngine::new(Arc::clone(&store), EngineConfig::default());
    for x in [0.0, 1.01] {
        store
            .save_region(&Region::new(format!("R{x}"), square(x, 0.0, 1.0)))
            .await
            .expect("save region");
    }
    let before = all_regions(store.as_ref()).await;
    let agency = agency_covering(store.as_ref(), square(0.5, 0.2, 1.0)).await;

    store.fail_next_commit();
    let err = engine
        .merge_overlapping_regions(agency.id)
        .await
        .expect_err("injected failure");
    assert!(matches!(err, RegistryError::Storage(_)));
    assert_eq!(all_regions(store.as_ref()).await, before);
}

#[tokio::test]
async fn merge_on_surrealdb_is_atomic_and_counts_match() {
    let store = Arc::new(
        SurrealRegistryStore::in_memory()
            .await
            .expect("surreal in-memory store"),
    );
    let engine = AssociationEngine::new(Arc::clone(&store), EngineConfig::default());
    for x in [0.0, 1.01] {
        store
            .save_region(&Region::new(format!("R{x}"), square(x, 0.0, 1.0)))
            .await
            .expect("save region");
    }
    let agency = agency_covering(store.as_ref(), square(0.5, 0.2, 1.0)).await;

    let merge = engine
        .merge_overlapping_regions(agency.id)
        .await
        .expect("merge");
    let remaining = all_regions(store.as_ref()).await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0], merge.base);
}

// ---------------------------------------------------------------------------
// Feed lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cloned_feed_has_independent_realtime_urls() {
    let store = Arc::new(MemoryRegistryStore::new());
    let engine = AssociationEngine::new(Arc::clone(&store), EngineConfig::default());
    let mut source = parsed_feed("https://metro.example", square(0.0, 0.0, 1.0));
    source.realtime_urls = vec!["https://rt.metro.example/vehicles".to_string()];
    store.save_feed(&source).await.expect("save feed");

    let mut copy = engine.clone_feed(source.id).await.expect("clone");
    let expected = Feed {
        id: copy.id,
        ..source.clone()
    };
    assert_eq!(copy, expected);

    copy.realtime_urls.push("https://rt.metro.example/alerts".to_string());
    store.save_feed(&copy).await.expect("save clone");
    let reloaded = store.get_feed(&source.id).await.expect("get source");
    assert_eq!(reloaded.realtime_urls.len(), 1);
}

#[tokio::test]
async fn supersession_chain_resolves_and_rejects_cycles() {
    let store = Arc::new(MemoryRegistryStore::new());
    let engine = AssociationEngine::new(Arc::clone(&store), EngineConfig::default());
    let mut ids: Vec<FeedId> = Vec::new();
    for _ in 0..3 {
        let feed = Feed::new("Metro", "https://metro.example");
        store.save_feed(&feed).await.expect("save feed");
        ids.push(feed.id);
    }

    engine.supersede(ids[0], ids[1]).await.expect("v1 -> v2");
    engine.supersede(ids[1], ids[2]).await.expect("v2 -> v3");
    assert_eq!(engine.latest_version(ids[0]).await.expect("latest").id, ids[2]);

    let err = engine
        .supersede(ids[2], ids[0])
        .await
        .expect_err("cycle");
    assert!(matches!(err, RegistryError::SupersessionCycle { .. }));
}

#[tokio::test]
async fn archive_attaches_to_feed_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let archive = FsArchiveStore::open(dir.path())
        .await
        .expect("archive store");
    let store = Arc::new(MemoryRegistryStore::new());
    let engine = AssociationEngine::new(Arc::clone(&store), EngineConfig::default());
    let feed = Feed::new("Metro", "https://metro.example");
    store.save_feed(&feed).await.expect("save feed");

    let bytes = b"PK\x03\x04 agency.txt stops.txt";
    let (updated, digest) = engine
        .attach_archive(&archive, feed.id, bytes)
        .await
        .expect("attach");
    assert_eq!(updated.stored_id.as_deref(), Some(digest.as_str()));
    assert_eq!(archive.get(&digest).await.expect("read back"), bytes);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_matches_do_not_lose_links() {
    let store = Arc::new(MemoryRegistryStore::new());
    let engine = Arc::new(AssociationEngine::new(
        Arc::clone(&store),
        EngineConfig::default(),
    ));
    let agency = Agency::new("Metro", "https://www.metro.example");
    store.save_agency(&agency).await.expect("save agency");

    let mut feeds = Vec::new();
    for i in 0..24 {
        let feed = Feed::new("Metro", format!("http://metro.example/feed/{i}"));
        store.save_feed(&feed).await.expect("save feed");
        feeds.push(feed.id);
    }

    let tasks: Vec<_> = feeds
        .iter()
        .map(|&feed| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.match_feed(feed).await })
        })
        .collect();
    for task in tasks {
        let outcome = task.await.expect("join").expect("match");
        assert_eq!(outcome.agencies().len(), 1);
    }

    let stored = store.get_agency(&agency.id).await.expect("get agency");
    assert_eq!(stored.feeds.len(), feeds.len());
    let linked = engine
        .agencies_for_feed(feeds[0], true)
        .await
        .expect("agencies for feed");
    assert_eq!(linked.len(), 1);
}
