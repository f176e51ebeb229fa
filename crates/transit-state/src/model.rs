//! Registry entities: agencies, GTFS feeds and metro regions.
//!
//! The three entities are independent aggregate roots. The agency/feed
//! relation lives on the agency (`Agency::feeds`); region membership lives on
//! the region (`Region::agencies`). Neither side holds back-references, so
//! "which regions contain this agency" and "which agencies publish this feed"
//! are store queries.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::SridGeometry;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub uuid::Uuid);

        impl $name {
            /// Generate a new random id
            pub fn new() -> Self {
                $name(uuid::Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s).map($name)
            }
        }
    };
}

entity_id!(
    /// Identity of an [`Agency`]
    AgencyId
);
entity_id!(
    /// Identity of a [`Feed`]
    FeedId
);
entity_id!(
    /// Identity of a [`Region`]
    RegionId
);

/// Where an agency record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgencySource {
    /// Imported from the national transit registry
    ImportedRegistry,
    /// Created from the self-reported name/URL of a feed
    DerivedFromFeed,
}

/// Machine readable problem requiring human review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewType {
    /// Feed could not be linked to any agency
    NoAgency,
    /// Agency was placed into more than one region
    AgencyMultipleAreas,
    /// Agency could not be placed into any region
    NoRegion,
}

/// Bike policy applied to trips whose GTFS leaves bikes unspecified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultBikesAllowed {
    Allow,
    Disallow,
    #[default]
    Warn,
}

/// Outcome of parsing a feed's schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedParseStatus {
    Unparsed,
    Successful,
    Failed,
}

/// A transit operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agency {
    pub id: AgencyId,
    /// Human-readable agency name
    pub name: String,
    /// The agency's primary web presence
    pub url: String,
    /// National Transit Database id, kept as text to preserve leading zeros
    pub ntd_id: Option<String>,
    /// Urbanized-area names the agency is listed under
    #[serde(default)]
    pub uza_names: Vec<String>,
    /// Service area population
    pub population: u64,
    /// Annual unlinked passenger trips
    pub ridership: u64,
    /// Annual passenger miles
    pub passenger_miles: u64,
    pub source: AgencySource,
    pub review: Option<ReviewType>,
    /// Does this agency provide GTFS to Google?
    #[serde(default)]
    pub google_gtfs: bool,
    pub note: Option<String>,
    pub disabled: bool,
    #[serde(default)]
    pub feeds: BTreeSet<FeedId>,
}

impl Agency {
    /// Create an agency imported from the registry, with no linked feeds.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: AgencyId::new(),
            name: name.into(),
            url: url.into(),
            ntd_id: None,
            uza_names: Vec::new(),
            population: 0,
            ridership: 0,
            passenger_miles: 0,
            source: AgencySource::ImportedRegistry,
            review: None,
            google_gtfs: false,
            note: None,
            disabled: false,
            feeds: BTreeSet::new(),
        }
    }

    /// Build an agency from the name and URL a feed reports for itself.
    ///
    /// The feed is not linked; callers go through the relation manager.
    pub fn from_feed(feed: &Feed) -> Self {
        Self {
            source: AgencySource::DerivedFromFeed,
            disabled: feed.disabled,
            ..Self::new(feed.agency_name.clone(), feed.agency_url.clone())
        }
    }
}

impl std::fmt::Display for Agency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.url)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// Metadata for a published GTFS schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub id: FeedId,
    /// Agency name as reported by the feed
    pub agency_name: String,
    /// Agency URL as reported by the feed; only used for matching
    pub agency_url: String,
    pub area_description: Option<String>,
    pub country: Option<String>,
    /// Identifier in the external feed catalog
    pub data_exchange_id: Option<String>,
    pub data_exchange_url: Option<String>,
    /// IANA timezone name
    pub timezone: Option<String>,
    pub date_added: Option<DateTime<Utc>>,
    pub date_updated: Option<DateTime<Utc>>,
    pub disabled: bool,
    pub review: Option<ReviewType>,
    pub feed_base_url: Option<String>,
    pub download_url: Option<String>,
    #[serde(default)]
    pub realtime_urls: Vec<String>,
    #[serde(default)]
    pub default_bikes_allowed: DefaultBikesAllowed,
    /// `None` until parsing has been attempted
    pub status: Option<FeedParseStatus>,
    pub official: bool,
    pub license_url: Option<String>,
    /// US state or comparable region label
    pub state: Option<String>,
    pub trips: u32,
    pub trips_per_calendar: u32,
    pub expiration_date: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    /// Service-area shape; only meaningful when `status` is `Successful`
    pub geometry: Option<SridGeometry>,
    pub superseded_by: Option<FeedId>,
    /// Archive digest of the raw feed file
    pub stored_id: Option<String>,
    pub stops: Option<u32>,
    pub note: Option<String>,
}

impl Feed {
    pub fn new(agency_name: impl Into<String>, agency_url: impl Into<String>) -> Self {
        Self {
            id: FeedId::new(),
            agency_name: agency_name.into(),
            agency_url: agency_url.into(),
            area_description: None,
            country: None,
            data_exchange_id: None,
            data_exchange_url: None,
            timezone: None,
            date_added: None,
            date_updated: None,
            disabled: false,
            review: None,
            feed_base_url: None,
            download_url: None,
            realtime_urls: Vec::new(),
            default_bikes_allowed: DefaultBikesAllowed::Warn,
            status: None,
            official: false,
            license_url: None,
            state: None,
            trips: 0,
            trips_per_calendar: 0,
            expiration_date: None,
            start_date: None,
            geometry: None,
            superseded_by: None,
            stored_id: None,
            stops: None,
            note: None,
        }
    }

    pub fn is_successful(&self) -> bool {
        self.status == Some(FeedParseStatus::Successful)
    }

    /// Copy every descriptive field under a fresh identity.
    ///
    /// The review flag and note are per-record reviewer state and are not
    /// carried over.
    pub fn duplicate(&self) -> Feed {
        Feed {
            id: FeedId::new(),
            review: None,
            note: None,
            ..self.clone()
        }
    }
}

impl std::fmt::Display for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GTFS for {}", self.agency_name)
    }
}

/// A metro-area boundary grouping agencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub name: String,
    pub geometry: SridGeometry,
    #[serde(default)]
    pub agencies: BTreeSet<AgencyId>,
}

impl Region {
    pub fn new(name: impl Into<String>, geometry: SridGeometry) -> Self {
        Self {
            id: RegionId::new(),
            name: name.into(),
            geometry,
            agencies: BTreeSet::new(),
        }
    }
}
