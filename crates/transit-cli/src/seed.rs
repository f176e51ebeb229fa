//! JSON seed files for loading agencies, feeds and regions.
//!
//! ```json
//! {
//!   "agencies": [{ "name": "City Transit", "url": "https://www.transit.city.gov" }],
//!   "feeds": [{
//!     "agency_name": "City Transit",
//!     "agency_url": "http://transit.city.gov/info",
//!     "status": "successful",
//!     "geometry": "SRID=4326;POLYGON((-93.3 44.95, -93.2 44.95, -93.2 45.05, -93.3 45.05, -93.3 44.95))"
//!   }],
//!   "regions": [{ "name": "Twin Cities", "geometry": "SRID=4326;POLYGON(...)" }]
//! }
//! ```
//!
//! Geometry is extended WKT. Every record gets a fresh id; the ids are
//! reported back so later commands can refer to them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use transit_state::{
    Agency, AgencyId, ChangeSet, DefaultBikesAllowed, Feed, FeedId, FeedParseStatus, Region,
    RegionId, RegistryStore, SridGeometry,
};

#[derive(Debug, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub agencies: Vec<SeedAgency>,
    #[serde(default)]
    pub feeds: Vec<SeedFeed>,
    #[serde(default)]
    pub regions: Vec<SeedRegion>,
}

#[derive(Debug, Deserialize)]
pub struct SeedAgency {
    pub name: String,
    pub url: String,
    pub ntd_id: Option<String>,
    #[serde(default)]
    pub uza_names: Vec<String>,
    #[serde(default)]
    pub population: u64,
    #[serde(default)]
    pub ridership: u64,
    #[serde(default)]
    pub passenger_miles: u64,
    #[serde(default)]
    pub google_gtfs: bool,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct SeedFeed {
    pub agency_name: String,
    pub agency_url: String,
    pub status: Option<FeedParseStatus>,
    /// Extended WKT, e.g. `SRID=4326;MULTIPOLYGON(...)`
    pub geometry: Option<String>,
    pub area_description: Option<String>,
    pub country: Option<String>,
    pub timezone: Option<String>,
    pub download_url: Option<String>,
    #[serde(default)]
    pub realtime_urls: Vec<String>,
    #[serde(default)]
    pub default_bikes_allowed: DefaultBikesAllowed,
    #[serde(default)]
    pub official: bool,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct SeedRegion {
    pub name: String,
    /// Extended WKT
    pub geometry: String,
}

/// Ids assigned to the seeded records, in file order.
#[derive(Debug, Default, Serialize)]
pub struct SeedReport {
    pub agencies: Vec<AgencyId>,
    pub feeds: Vec<FeedId>,
    pub regions: Vec<RegionId>,
}

impl SeedAgency {
    fn into_agency(self) -> Agency {
        Agency {
            ntd_id: self.ntd_id,
            uza_names: self.uza_names,
            population: self.population,
            ridership: self.ridership,
            passenger_miles: self.passenger_miles,
            google_gtfs: self.google_gtfs,
            disabled: self.disabled,
            ..Agency::new(self.name, self.url)
        }
    }
}

impl SeedFeed {
    fn into_feed(self) -> Result<Feed> {
        let geometry = self
            .geometry
            .as_deref()
            .map(SridGeometry::from_ewkt)
            .transpose()
            .with_context(|| format!("bad geometry for feed of {}", self.agency_name))?;
        Ok(Feed {
            status: self.status,
            geometry,
            area_description: self.area_description,
            country: self.country,
            timezone: self.timezone,
            download_url: self.download_url,
            realtime_urls: self.realtime_urls,
            default_bikes_allowed: self.default_bikes_allowed,
            official: self.official,
            disabled: self.disabled,
            ..Feed::new(self.agency_name, self.agency_url)
        })
    }
}

impl SeedRegion {
    fn into_region(self) -> Result<Region> {
        let geometry = SridGeometry::from_ewkt(&self.geometry)
            .with_context(|| format!("bad geometry for region {}", self.name))?;
        Ok(Region::new(self.name, geometry))
    }
}

/// Parse `text` and save every record in one commit. Nothing is written if
/// any record fails to parse or the commit fails.
pub async fn apply<S: RegistryStore>(store: &S, text: &str) -> Result<SeedReport> {
    let file: SeedFile = serde_json::from_str(text).context("seed file is not valid JSON")?;

    let agencies: Vec<Agency> = file.agencies.into_iter().map(SeedAgency::into_agency).collect();
    let feeds = file
        .feeds
        .into_iter()
        .map(SeedFeed::into_feed)
        .collect::<Result<Vec<_>>>()?;
    let regions = file
        .regions
        .into_iter()
        .map(SeedRegion::into_region)
        .collect::<Result<Vec<_>>>()?;

    let report = SeedReport {
        agencies: agencies.iter().map(|a| a.id).collect(),
        feeds: feeds.iter().map(|f| f.id).collect(),
        regions: regions.iter().map(|r| r.id).collect(),
    };

    let mut changes = ChangeSet::new();
    for agency in agencies {
        changes = changes.save_agency(agency);
    }
    for feed in feeds {
        changes = changes.save_feed(feed);
    }
    for region in regions {
        changes = changes.save_region(region);
    }
    store.commit(changes).await.context("seed commit failed")?;
    Ok(report)
}
