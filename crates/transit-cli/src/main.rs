//! Transit registry CLI
//!
//! The `transitreg` command drives the association engine against a
//! SurrealDB-backed registry.
//!
//! ## Commands
//!
//! - `seed`: load agencies, feeds and regions from a JSON file
//! - `match-feed`: link a feed to agencies by canonical URL
//! - `split` / `merge`: place an agency into metro regions
//! - `supersede` / `latest`: feed version chains
//! - `delete-feed`: remove a feed and every link to it
//! - `attach-archive`: store a raw feed file and record its digest

mod seed;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{info, Level};
use transit_core::{
    AgencyResolution, AssociationEngine, EngineConfig, MatchOutcome, MergeBasePolicy, SridPolicy,
};
use transit_state::{
    AgencyId, FeedArchiveStore, FeedId, FsArchiveStore, RegistryStore, StoreLocation,
    SurrealRegistryStore,
};

#[derive(Parser)]
#[command(name = "transitreg")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Transit agency, feed and region registry", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Database URL (mem://, surrealkv://path, ws://host:port); falls back
    /// to SURREAL_* cloud settings, SURREALDB_URL, then .transit/db
    #[arg(long, global = true)]
    db: Option<String>,

    /// Directory holding raw feed archives
    #[arg(long, global = true, env = "TRANSIT_ARCHIVE_DIR", default_value = ".transit")]
    archive_dir: PathBuf,

    /// Proximity threshold for region matching, in geometry units
    #[arg(long, global = true)]
    threshold: Option<f64>,

    /// Which region survives a merge (largest-area, lowest-id)
    #[arg(long, global = true)]
    merge_base: Option<MergeBasePolicy>,

    /// How mixed SRIDs are handled (strict, reproject)
    #[arg(long, global = true)]
    srid_policy: Option<SridPolicy>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load agencies, feeds and regions from a JSON seed file
    Seed {
        /// Path to the seed file
        file: PathBuf,
    },

    /// Link a feed to every agency sharing its canonical URL
    MatchFeed {
        feed: FeedId,

        /// Derive a new agency from the feed when nothing matches
        #[arg(long)]
        create: bool,
    },

    /// Show the geometry derived from an agency's feeds
    Geometry { agency: AgencyId },

    /// Add an agency to every nearby region (non-destructive)
    Split { agency: AgencyId },

    /// Fold every region near an agency into one
    Merge {
        agency: AgencyId,

        /// Apply the merge; without this only the candidates are listed
        #[arg(long)]
        confirm: bool,
    },

    /// Copy a feed under a new id and link the copy to the same agencies
    CloneFeed { feed: FeedId },

    /// Mark `old` as superseded by `new`
    Supersede { old: FeedId, new: FeedId },

    /// Clear a feed's superseded-by pointer
    Unsupersede { feed: FeedId },

    /// Delete a feed and unlink it everywhere
    DeleteFeed { feed: FeedId },

    /// Follow a feed's supersession chain to its newest version
    Latest { feed: FeedId },

    /// List agencies linked to a feed
    Agencies {
        feed: FeedId,

        /// Skip disabled agencies
        #[arg(long)]
        enabled: bool,
    },

    /// List regions an agency belongs to
    Regions { agency: AgencyId },

    /// Link a feed to an agency
    Link { agency: AgencyId, feed: FeedId },

    /// Unlink a feed from an agency
    Unlink { agency: AgencyId, feed: FeedId },

    /// Store a raw feed file and record its digest on the feed
    AttachArchive {
        feed: FeedId,
        /// Path to the feed file (usually a GTFS zip)
        path: PathBuf,
    },
}

impl Cli {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = EngineConfig::from_env().map_err(|e| anyhow!(e))?;
        if let Some(threshold) = self.threshold {
            config = config.with_proximity_threshold(threshold);
        }
        if let Some(policy) = self.merge_base {
            config = config.with_merge_base(policy);
        }
        if let Some(policy) = self.srid_policy {
            config = config.with_srid_policy(policy);
        }
        Ok(config)
    }

    fn store_location(&self) -> StoreLocation {
        match &self.db {
            Some(url) => StoreLocation::Url(url.clone()),
            None => StoreLocation::from_env(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    transit_core::telemetry::init_tracing(cli.json, level);

    let config = cli.engine_config()?;
    let store = SurrealRegistryStore::connect(&cli.store_location())
        .await
        .context("Failed to connect to registry database")?;
    let archive = FsArchiveStore::open(&cli.archive_dir).await.with_context(|| {
        format!(
            "Failed to open archive directory {}",
            cli.archive_dir.display()
        )
    })?;
    let engine = AssociationEngine::new(Arc::new(store), config);

    let output = run(&engine, &archive, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Execute one command and return its JSON report.
async fn run<S, A>(engine: &AssociationEngine<S>, archive: &A, command: Command) -> Result<Value>
where
    S: RegistryStore,
    A: FeedArchiveStore + ?Sized,
{
    let value = match command {
        Command::Seed { file } => cmd_seed(engine, &file).await?,
        Command::MatchFeed { feed, create } => cmd_match_feed(engine, feed, create).await?,
        Command::Geometry { agency } => {
            let geometry = engine.derive_geometry(agency).await?;
            json!({
                "agency": agency,
                "geometry": geometry.map(|g| g.to_string()),
            })
        }
        Command::Split { agency } => {
            let regions = engine.assign_to_overlapping_regions(agency).await?;
            let review = engine.store().get_agency(&agency).await?.review;
            json!({ "agency": agency, "regions": regions, "review": review })
        }
        Command::Merge { agency, confirm } => cmd_merge(engine, agency, confirm).await?,
        Command::CloneFeed { feed } => {
            let copy = engine.clone_feed(feed).await?;
            info!(source = %feed, copy = %copy.id, "feed cloned");
            json!({ "source": feed, "feed": copy })
        }
        Command::Supersede { old, new } => {
            let feed = engine.supersede(old, new).await?;
            json!({ "feed": feed })
        }
        Command::Unsupersede { feed } => {
            let feed = engine.clear_supersession(feed).await?;
            json!({ "feed": feed })
        }
        Command::DeleteFeed { feed } => {
            let unlinked = engine.delete_feed(feed).await?;
            info!(feed = %feed, agencies = unlinked.len(), "feed deleted");
            json!({ "feed": feed, "unlinked": unlinked })
        }
        Command::Latest { feed } => {
            let latest = engine.latest_version(feed).await?;
            let previous = engine.previous_versions(latest.id).await?;
            let previous: Vec<FeedId> = previous.iter().map(|f| f.id).collect();
            json!({ "latest": latest, "previous": previous })
        }
        Command::Agencies { feed, enabled } => {
            let agencies = engine.agencies_for_feed(feed, enabled).await?;
            json!({ "feed": feed, "agencies": agencies })
        }
        Command::Regions { agency } => {
            let regions = engine.regions_for_agency(agency).await?;
            json!({ "agency": agency, "regions": regions })
        }
        Command::Link { agency, feed } => json!({ "agency": engine.link_feed(agency, feed).await? }),
        Command::Unlink { agency, feed } => {
            json!({ "agency": engine.unlink_feed(agency, feed).await? })
        }
        Command::AttachArchive { feed, path } => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let (feed, digest) = engine.attach_archive(archive, feed, &bytes).await?;
            info!(feed = %feed.id, digest = %digest.short(), "archive attached");
            json!({ "feed": feed.id, "digest": digest, "bytes": bytes.len() })
        }
    };
    Ok(value)
}

async fn cmd_seed<S: RegistryStore>(engine: &AssociationEngine<S>, file: &Path) -> Result<Value> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read seed file {}", file.display()))?;
    let report = seed::apply(engine.store().as_ref(), &text).await?;
    info!(
        agencies = report.agencies.len(),
        feeds = report.feeds.len(),
        regions = report.regions.len(),
        "seed loaded"
    );
    Ok(serde_json::to_value(report)?)
}

async fn cmd_match_feed<S: RegistryStore>(
    engine: &AssociationEngine<S>,
    feed: FeedId,
    create: bool,
) -> Result<Value> {
    if create {
        let resolution = engine.match_or_create_agency(feed).await?;
        if let AgencyResolution::Created { agency } = &resolution {
            info!(agency = %agency.id, "created agency from feed");
        }
        return Ok(serde_json::to_value(resolution)?);
    }

    let outcome = engine.match_feed(feed).await?;
    if outcome == MatchOutcome::NoMatchFound {
        engine.flag_unmatched(feed).await?;
        info!(feed = %feed, "no agency matched; feed flagged for review");
    }
    Ok(serde_json::to_value(outcome)?)
}

async fn cmd_merge<S: RegistryStore>(
    engine: &AssociationEngine<S>,
    agency: AgencyId,
    confirm: bool,
) -> Result<Value> {
    if !confirm {
        let candidates = engine.candidate_regions(agency).await?;
        let candidates: Vec<Value> = candidates
            .iter()
            .map(|r| json!({ "id": r.id, "name": r.name }))
            .collect();
        return Ok(json!({ "dry_run": true, "candidates": candidates }));
    }
    let merge = engine.merge_overlapping_regions(agency).await?;
    Ok(serde_json::to_value(merge)?)
}
