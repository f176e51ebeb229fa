//! Feed-to-agency matching by canonical URL.
//!
//! Feeds carry no stable agency identifier, only the name and URL the
//! publisher typed into `agency.txt`. Both sides are reduced to a bare
//! lowercase host and compared for exact equality.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use transit_state::{Agency, AgencyQuery, Feed, FeedId, RegistryStore, ReviewType};

use crate::error::Result;
use crate::relations::RelationManager;

fn host_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\W*(?:https?://)?(?:www\.)?([a-z0-9\-_.]*)").expect("host pattern is valid")
    })
}

fn canonicalize_once(url: &str) -> String {
    let lowered = url.to_lowercase();
    host_pattern()
        .captures(&lowered)
        .and_then(|caps| caps.get(1))
        .map(|host| host.as_str().to_string())
        .unwrap_or_default()
}

/// Reduce a URL to its bare lowercase host.
///
/// Leading punctuation, an `http`/`https` scheme and a `www.` label are
/// stripped; everything after the host (port, path, query, fragment) is
/// dropped. The reduction is repeated until it stops changing, so the
/// result is always a fixed point.
///
/// ```
/// use transit_core::canonicalize_url;
/// assert_eq!(canonicalize_url("HTTP://WWW.Foo.org/x"), canonicalize_url("foo.org"));
/// ```
pub fn canonicalize_url(url: &str) -> String {
    let mut current = canonicalize_once(url);
    loop {
        let next = canonicalize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Result of matching a feed against the agency registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "agencies", rename_all = "snake_case")]
pub enum MatchOutcome {
    /// Agencies the feed is now linked to, ascending by id
    Matched(Vec<Agency>),
    /// No agency shares the feed's canonical URL; needs manual review
    NoMatchFound,
}

impl MatchOutcome {
    pub fn agencies(&self) -> &[Agency] {
        match self {
            MatchOutcome::Matched(agencies) => agencies,
            MatchOutcome::NoMatchFound => &[],
        }
    }
}

/// Result of [`UrlMatcher::match_or_create_agency`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AgencyResolution {
    Matched { agencies: Vec<Agency> },
    /// No match; a new agency was derived from the feed and linked to it
    Created { agency: Agency },
}

/// Links feeds to agencies by canonical URL.
pub struct UrlMatcher<S> {
    store: Arc<S>,
    relations: Arc<RelationManager<S>>,
}

impl<S: RegistryStore> UrlMatcher<S> {
    pub fn new(store: Arc<S>, relations: Arc<RelationManager<S>>) -> Self {
        Self { store, relations }
    }

    /// Link `feed` to every agency whose canonical URL equals the feed's.
    #[instrument(skip(self, feed), fields(feed_id = %feed.id))]
    pub async fn match_feed(&self, feed: &Feed) -> Result<MatchOutcome> {
        let wanted = canonicalize_url(&feed.agency_url);
        if wanted.is_empty() {
            warn!(url = %feed.agency_url, "feed agency URL has no host");
            return Ok(MatchOutcome::NoMatchFound);
        }

        let mut candidates: Vec<Agency> = self
            .store
            .find_agencies(AgencyQuery::All)
            .await?
            .into_iter()
            .filter(|agency| canonicalize_url(&agency.url) == wanted)
            .collect();
        if candidates.is_empty() {
            debug!(host = %wanted, "no agency matched");
            return Ok(MatchOutcome::NoMatchFound);
        }
        candidates.sort_by_key(|a| a.id);

        let mut linked = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            linked.push(self.relations.link_feed(candidate.id, feed.id).await?);
        }
        info!(host = %wanted, agencies = linked.len(), "feed matched");
        Ok(MatchOutcome::Matched(linked))
    }

    /// Queue the feed for manual review as having no agency.
    #[instrument(skip(self), fields(feed_id = %feed))]
    pub async fn flag_unmatched(&self, feed: FeedId) -> Result<Feed> {
        self.relations
            .update_feed(feed, |f| {
                let changed = f.review != Some(ReviewType::NoAgency);
                f.review = Some(ReviewType::NoAgency);
                changed
            })
            .await
    }

    /// Match the feed, or derive a new agency from it when nothing matches.
    #[instrument(skip(self, feed), fields(feed_id = %feed.id))]
    pub async fn match_or_create_agency(&self, feed: &Feed) -> Result<AgencyResolution> {
        match self.match_feed(feed).await? {
            MatchOutcome::Matched(agencies) => Ok(AgencyResolution::Matched { agencies }),
            MatchOutcome::NoMatchFound => {
                let mut agency = Agency::from_feed(feed);
                agency.feeds.insert(feed.id);
                self.store.save_agency(&agency).await?;
                info!(agency_id = %agency.id, name = %agency, "agency derived from feed");
                Ok(AgencyResolution::Created { agency })
            }
        }
    }

    /// Agencies linked to `feed`, ascending by id.
    pub async fn agencies_for_feed(&self, feed: FeedId, enabled_only: bool) -> Result<Vec<Agency>> {
        let query = if enabled_only {
            AgencyQuery::EnabledLinkedToFeed(feed)
        } else {
            AgencyQuery::LinkedToFeed(feed)
        };
        let mut agencies = self.store.find_agencies(query).await?;
        agencies.sort_by_key(|a| a.id);
        Ok(agencies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transit_state::fakes::MemoryRegistryStore;
    use transit_state::{AgencySource, AgencyStore, FeedStore};

    #[test]
    fn canonical_form_ignores_scheme_www_case_and_path() {
        assert_eq!(canonicalize_url("HTTP://WWW.Foo.org/x"), "foo.org");
        assert_eq!(canonicalize_url("https://foo.org/gtfs?x=1#top"), "foo.org");
        assert_eq!(canonicalize_url("  <http://transit.city.gov/>"), "transit.city.gov");
        assert_eq!(canonicalize_url("foo.org:8080/path"), "foo.org");
        assert_eq!(canonicalize_url("bus-line_01.example.com"), "bus-line_01.example.com");
    }

    #[test]
    fn stacked_www_labels_are_all_stripped() {
        assert_eq!(canonicalize_url("www.www.example.com"), "example.com");
        assert_eq!(canonicalize_url("http://www.www.example.com/a"), "example.com");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        for url in [
            "HTTP://WWW.Foo.org/x",
            "www.www.example.com",
            "http://.leading-dot.org",
            "",
            "///",
            "https://www.",
        ] {
            let once = canonicalize_url(url);
            assert_eq!(canonicalize_url(&once), once, "not a fixed point for {url:?}");
        }
    }

    #[test]
    fn outcomes_serialize_with_a_tag() {
        let none = serde_json::to_value(MatchOutcome::NoMatchFound).unwrap();
        assert_eq!(none["outcome"], "no_match_found");

        let agency = Agency::new("Metro", "https://metro.example");
        let matched = serde_json::to_value(MatchOutcome::Matched(vec![agency])).unwrap();
        assert_eq!(matched["outcome"], "matched");
        assert_eq!(matched["agencies"][0]["name"], "Metro");
    }

    #[test]
    fn blank_and_hostless_urls_canonicalize_to_empty() {
        assert_eq!(canonicalize_url(""), "");
        assert_eq!(canonicalize_url("https://"), "");
        assert_eq!(canonicalize_url("   "), "");
    }

    fn matcher(store: &Arc<MemoryRegistryStore>) -> UrlMatcher<MemoryRegistryStore> {
        let relations = Arc::new(RelationManager::new(Arc::clone(store)));
        UrlMatcher::new(Arc::clone(store), relations)
    }

    #[tokio::test]
    async fn matching_is_symmetric_in_scheme_www_and_case() {
        let store = Arc::new(MemoryRegistryStore::new());
        let agency = Agency::new("City Transit", "https://www.Transit.City.gov/");
        store.save_agency(&agency).await.unwrap();
        let feed = Feed::new("City Transit", "http://transit.city.gov/gtfs");
        store.save_feed(&feed).await.unwrap();

        let outcome = matcher(&store).match_feed(&feed).await.unwrap();
        assert_eq!(outcome.agencies().len(), 1);
        assert!(store
            .get_agency(&agency.id)
            .await
            .unwrap()
            .feeds
            .contains(&feed.id));
    }

    #[tokio::test]
    async fn every_agency_with_the_same_host_is_linked() {
        let store = Arc::new(MemoryRegistryStore::new());
        let a = Agency::new("Bus", "http://metro.example");
        let b = Agency::new("Rail", "https://www.metro.example/rail");
        let other = Agency::new("Other", "https://metro.example.net");
        for agency in [&a, &b, &other] {
            store.save_agency(agency).await.unwrap();
        }
        let feed = Feed::new("Metro", "metro.example");

        let outcome = matcher(&store).match_feed(&feed).await.unwrap();
        let ids: Vec<_> = outcome.agencies().iter().map(|x| x.id).collect();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(ids, expected);
        assert!(store.get_agency(&other.id).await.unwrap().feeds.is_empty());
    }

    #[tokio::test]
    async fn blank_url_never_matches() {
        let store = Arc::new(MemoryRegistryStore::new());
        store.save_agency(&Agency::new("No URL", "")).await.unwrap();
        let feed = Feed::new("No URL", "");

        let outcome = matcher(&store).match_feed(&feed).await.unwrap();
        assert_eq!(outcome, MatchOutcome::NoMatchFound);
    }

    #[tokio::test]
    async fn unmatched_feed_can_be_flagged() {
        let store = Arc::new(MemoryRegistryStore::new());
        let feed = Feed::new("Orphan", "https://orphan.example");
        store.save_feed(&feed).await.unwrap();

        let flagged = matcher(&store).flag_unmatched(feed.id).await.unwrap();
        assert_eq!(flagged.review, Some(ReviewType::NoAgency));
        assert_eq!(
            store.get_feed(&feed.id).await.unwrap().review,
            Some(ReviewType::NoAgency)
        );
    }

    #[tokio::test]
    async fn match_or_create_derives_agency_from_feed() {
        let store = Arc::new(MemoryRegistryStore::new());
        let mut feed = Feed::new("Valley Transit", "https://valley.example/gtfs.zip");
        feed.disabled = true;
        store.save_feed(&feed).await.unwrap();

        let agency = match matcher(&store).match_or_create_agency(&feed).await.unwrap() {
            AgencyResolution::Created { agency } => agency,
            other => panic!("expected a created agency, got {other:?}"),
        };
        assert_eq!(agency.source, AgencySource::DerivedFromFeed);
        assert!(agency.disabled);
        assert!(agency.feeds.contains(&feed.id));
        assert_eq!(store.get_agency(&agency.id).await.unwrap(), agency);

        // A second run now matches the derived agency instead of creating another.
        let again = matcher(&store).match_or_create_agency(&feed).await.unwrap();
        assert!(matches!(again, AgencyResolution::Matched { ref agencies } if agencies.len() == 1));
    }

    #[tokio::test]
    async fn agencies_for_feed_can_skip_disabled() {
        let store = Arc::new(MemoryRegistryStore::new());
        let feed = FeedId::new();
        let mut live = Agency::new("Live", "https://live.example");
        live.feeds.insert(feed);
        let mut retired = Agency::new("Retired", "https://retired.example");
        retired.feeds.insert(feed);
        retired.disabled = true;
        store.save_agency(&live).await.unwrap();
        store.save_agency(&retired).await.unwrap();

        let m = matcher(&store);
        assert_eq!(m.agencies_for_feed(feed, false).await.unwrap().len(), 2);
        let enabled = m.agencies_for_feed(feed, true).await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, live.id);
    }
}
