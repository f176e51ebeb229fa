//! SurrealDB schema migrations and initialization
//!
//! Each entity is one schemaless table. The full entity is kept under `doc`;
//! the columns the store filters on are lifted next to it and indexed.

use crate::error::StateError;
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all registry tables. Safe to call multiple times.
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing transit registry schema");

    init_agencies_table(db).await?;
    init_feeds_table(db).await?;
    init_regions_table(db).await?;

    info!("Transit registry schema initialization complete");
    Ok(())
}

/// Schema:
/// ```text
/// TABLE agencies {
///   agency_id:  STRING (unique)
///   feed_ids:   ARRAY<STRING> (indexed, agency -> feed relation)
///   disabled:   BOOL
///   doc:        OBJECT (serialized Agency)
/// }
/// ```
async fn init_agencies_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing agencies table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS agencies SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_agency_id ON TABLE agencies COLUMNS agency_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_agency_feed_ids ON TABLE agencies COLUMNS feed_ids;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    Ok(())
}

/// Schema:
/// ```text
/// TABLE feeds {
///   feed_id:        STRING (unique)
///   status:         STRING? (unparsed | successful | failed)
///   superseded_by:  STRING? (indexed)
///   doc:            OBJECT (serialized Feed)
/// }
/// ```
async fn init_feeds_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing feeds table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS feeds SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_feed_id ON TABLE feeds COLUMNS feed_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_feed_status ON TABLE feeds COLUMNS status;
        DEFINE INDEX IF NOT EXISTS idx_feed_superseded_by ON TABLE feeds COLUMNS superseded_by;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    Ok(())
}

/// Schema:
/// ```text
/// TABLE regions {
///   region_id:   STRING (unique)
///   agency_ids:  ARRAY<STRING> (indexed, region -> agency membership)
///   doc:         OBJECT (serialized Region)
/// }
/// ```
async fn init_regions_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing regions table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS regions SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_region_id ON TABLE regions COLUMNS region_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_region_agency_ids ON TABLE regions COLUMNS agency_ids;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    Ok(())
}
