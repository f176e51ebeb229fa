//! SurrealDB-backed RegistryStore implementation
//!
//! Entities are serialized to JSON documents and stored under `doc`, with the
//! relation columns (`feed_ids`, `agency_ids`) and filter columns lifted
//! beside them so typed queries run in the database.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::handle::{self, StoreLocation};
use crate::migrations;
use crate::model::{Agency, AgencyId, Feed, FeedId, Region, RegionId};
use crate::storage_traits::*;

/// SurrealDB-backed implementation of [`RegistryStore`].
#[derive(Clone)]
pub struct SurrealRegistryStore {
    db: Surreal<Any>,
}

impl SurrealRegistryStore {
    /// Connect to `location` and make sure the schema exists.
    pub async fn connect(location: &StoreLocation) -> crate::Result<Self> {
        let db = handle::connect(location).await?;
        migrations::init_schema(&db).await?;
        info!("SurrealRegistryStore ready");
        Ok(Self { db })
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::connect(&StoreLocation::Memory).await
    }

    /// Connect using [`StoreLocation::from_env`].
    pub async fn from_env() -> crate::Result<Self> {
        Self::connect(&StoreLocation::from_env()).await
    }

    // -- private helpers -----------------------------------------------------

    async fn select_docs<T: DeserializeOwned>(
        &self,
        sql: &'static str,
        param: Option<String>,
    ) -> StorageResult<Vec<T>> {
        let mut query = self.db.query(sql);
        if let Some(value) = param {
            query = query.bind(("p", value));
        }
        let mut res = query.await?;
        let docs: Vec<Value> = res.take(0)?;
        docs.into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(StorageError::from))
            .collect()
    }

    async fn select_one<T: DeserializeOwned>(
        &self,
        table: &'static str,
        id: String,
    ) -> StorageResult<Option<T>> {
        let mut res = self
            .db
            .query("SELECT VALUE doc FROM type::thing($tb, $id)")
            .bind(("tb", table))
            .bind(("id", id))
            .await?;
        let docs: Vec<Value> = res.take(0)?;
        docs.into_iter()
            .next()
            .map(serde_json::from_value)
            .transpose()
            .map_err(StorageError::from)
    }

    async fn upsert(&self, table: &'static str, id: String, row: Value) -> StorageResult<()> {
        self.db
            .query("UPSERT type::thing($tb, $id) CONTENT $row")
            .bind(("tb", table))
            .bind(("id", id))
            .bind(("row", row))
            .await?
            .check()?;
        Ok(())
    }

    async fn remove(&self, table: &'static str, id: String) -> StorageResult<()> {
        self.db
            .query("DELETE type::thing($tb, $id)")
            .bind(("tb", table))
            .bind(("id", id))
            .await?
            .check()?;
        Ok(())
    }

    async fn region_exists(&self, id: &RegionId) -> StorageResult<bool> {
        Ok(self
            .select_one::<Region>("regions", id.to_string())
            .await?
            .is_some())
    }

    async fn feed_exists(&self, id: &FeedId) -> StorageResult<bool> {
        Ok(self
            .select_one::<Feed>("feeds", id.to_string())
            .await?
            .is_some())
    }
}

fn agency_row(agency: &Agency) -> StorageResult<Value> {
    Ok(json!({
        "agency_id": agency.id.to_string(),
        "feed_ids": agency.feeds.iter().map(|f| f.to_string()).collect::<Vec<_>>(),
        "disabled": agency.disabled,
        "doc": serde_json::to_value(agency)?,
    }))
}

fn feed_row(feed: &Feed) -> StorageResult<Value> {
    Ok(json!({
        "feed_id": feed.id.to_string(),
        "status": serde_json::to_value(feed.status)?,
        "superseded_by": feed.superseded_by.map(|id| id.to_string()),
        "doc": serde_json::to_value(feed)?,
    }))
}

fn region_row(region: &Region) -> StorageResult<Value> {
    Ok(json!({
        "region_id": region.id.to_string(),
        "agency_ids": region.agencies.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
        "doc": serde_json::to_value(region)?,
    }))
}

#[async_trait]
impl AgencyStore for SurrealRegistryStore {
    #[instrument(skip(self), fields(agency_id = %id))]
    async fn get_agency(&self, id: &AgencyId) -> StorageResult<Agency> {
        self.select_one("agencies", id.to_string())
            .await?
            .ok_or(StorageError::AgencyNotFound { id: *id })
    }

    async fn find_agencies(&self, query: AgencyQuery) -> StorageResult<Vec<Agency>> {
        match query {
            AgencyQuery::All => self.select_docs("SELECT VALUE doc FROM agencies", None).await,
            AgencyQuery::LinkedToFeed(feed) => {
                self.select_docs(
                    "SELECT VALUE doc FROM agencies WHERE feed_ids CONTAINS $p",
                    Some(feed.to_string()),
                )
                .await
            }
            AgencyQuery::EnabledLinkedToFeed(feed) => {
                self.select_docs(
                    "SELECT VALUE doc FROM agencies WHERE feed_ids CONTAINS $p AND disabled = false",
                    Some(feed.to_string()),
                )
                .await
            }
        }
    }

    #[instrument(skip(self, agency), fields(agency_id = %agency.id))]
    async fn save_agency(&self, agency: &Agency) -> StorageResult<()> {
        debug!("saving agency");
        self.upsert("agencies", agency.id.to_string(), agency_row(agency)?)
            .await
    }

    async fn delete_agency(&self, id: &AgencyId) -> StorageResult<()> {
        self.remove("agencies", id.to_string()).await
    }
}

#[async_trait]
impl FeedStore for SurrealRegistryStore {
    #[instrument(skip(self), fields(feed_id = %id))]
    async fn get_feed(&self, id: &FeedId) -> StorageResult<Feed> {
        self.select_one("feeds", id.to_string())
            .await?
            .ok_or(StorageError::FeedNotFound { id: *id })
    }

    async fn find_feeds(&self, query: FeedQuery) -> StorageResult<Vec<Feed>> {
        match query {
            FeedQuery::All => self.select_docs("SELECT VALUE doc FROM feeds", None).await,
            FeedQuery::WithStatus(status) => {
                let status = serde_json::to_value(status)?
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                self.select_docs(
                    "SELECT VALUE doc FROM feeds WHERE status = $p",
                    Some(status),
                )
                .await
            }
            FeedQuery::SupersededBy(newer) => {
                self.select_docs(
                    "SELECT VALUE doc FROM feeds WHERE superseded_by = $p",
                    Some(newer.to_string()),
                )
                .await
            }
        }
    }

    #[instrument(skip(self, feed), fields(feed_id = %feed.id))]
    async fn save_feed(&self, feed: &Feed) -> StorageResult<()> {
        debug!("saving feed");
        self.upsert("feeds", feed.id.to_string(), feed_row(feed)?)
            .await
    }

    async fn delete_feed(&self, id: &FeedId) -> StorageResult<()> {
        self.remove("feeds", id.to_string()).await
    }
}

#[async_trait]
impl RegionStore for SurrealRegistryStore {
    #[instrument(skip(self), fields(region_id = %id))]
    async fn get_region(&self, id: &RegionId) -> StorageResult<Region> {
        self.select_one("regions", id.to_string())
            .await?
            .ok_or(StorageError::RegionNotFound { id: *id })
    }

    async fn find_regions(&self, query: RegionQuery) -> StorageResult<Vec<Region>> {
        match query {
            RegionQuery::All => self.select_docs("SELECT VALUE doc FROM regions", None).await,
            RegionQuery::ContainingAgency(agency) => {
                self.select_docs(
                    "SELECT VALUE doc FROM regions WHERE agency_ids CONTAINS $p",
                    Some(agency.to_string()),
                )
                .await
            }
        }
    }

    #[instrument(skip(self, region), fields(region_id = %region.id))]
    async fn save_region(&self, region: &Region) -> StorageResult<()> {
        debug!("saving region");
        self.upsert("regions", region.id.to_string(), region_row(region)?)
            .await
    }

    async fn delete_region(&self, id: &RegionId) -> StorageResult<()> {
        self.remove("regions", id.to_string()).await
    }
}

#[async_trait]
impl RegistryStore for SurrealRegistryStore {
    #[instrument(skip_all, fields(
        agencies = changes.save_agencies.len(),
        feeds = changes.save_feeds.len(),
        regions = changes.save_regions.len(),
        deletes = changes.delete_regions.len(),
    ))]
    async fn commit(&self, changes: ChangeSet) -> StorageResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        // Deleting an entity that is already gone means the plan was built on
        // stale state; refuse before anything is written.
        for id in &changes.delete_regions {
            if !self.region_exists(id).await? {
                return Err(StorageError::RegionNotFound { id: *id });
            }
        }
        for id in &changes.delete_feeds {
            if !self.feed_exists(id).await? {
                return Err(StorageError::FeedNotFound { id: *id });
            }
        }

        let mut statements = vec!["BEGIN TRANSACTION;".to_string()];
        let mut params: Vec<(String, Value)> = Vec::new();

        let mut push_upsert = |table: &str, id: String, row: Value| {
            let n = params.len();
            statements.push(format!(
                "UPSERT type::thing('{table}', $id{n}) CONTENT $row{n};"
            ));
            params.push((format!("id{n}"), Value::String(id)));
            params.push((format!("row{n}"), row));
        };

        for agency in &changes.save_agencies {
            push_upsert("agencies", agency.id.to_string(), agency_row(agency)?);
        }
        for feed in &changes.save_feeds {
            push_upsert("feeds", feed.id.to_string(), feed_row(feed)?);
        }
        for region in &changes.save_regions {
            push_upsert("regions", region.id.to_string(), region_row(region)?);
        }
        for id in &changes.delete_regions {
            let n = params.len();
            statements.push(format!("DELETE type::thing('regions', $id{n});"));
            params.push((format!("id{n}"), Value::String(id.to_string())));
        }
        for id in &changes.delete_feeds {
            let n = params.len();
            statements.push(format!("DELETE type::thing('feeds', $id{n});"));
            params.push((format!("id{n}"), Value::String(id.to_string())));
        }
        statements.push("COMMIT TRANSACTION;".to_string());

        let mut query = self.db.query(statements.join("\n"));
        for param in params {
            query = query.bind(param);
        }
        query.await?.check()?;

        debug!("change set committed");
        Ok(())
    }
}
