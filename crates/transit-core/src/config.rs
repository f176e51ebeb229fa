//! Engine tuning knobs.
//!
//! Defaults reproduce the registry's historical behaviour; every knob can be
//! overridden from the environment (`TRANSIT_*`) or by the CLI.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default distance, in the region's own units, under which an agency counts
/// as overlapping a region.
pub const DEFAULT_PROXIMITY_THRESHOLD: f64 = 0.04;

/// How the surviving region of a merge is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeBasePolicy {
    /// Largest planar area wins; ties go to the lowest region id
    #[default]
    LargestArea,
    /// Lowest region id wins
    LowestId,
}

/// What geometry derivation does when an agency's feeds disagree on SRID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SridPolicy {
    /// Fail with `AmbiguousGeometry`
    #[default]
    Strict,
    /// Reproject every contributor into the first contributor's SRID
    Reproject,
}

impl FromStr for MergeBasePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "largest_area" => Ok(Self::LargestArea),
            "lowest_id" => Ok(Self::LowestId),
            other => Err(format!(
                "unknown merge base policy '{other}' (expected largest-area or lowest-id)"
            )),
        }
    }
}

impl fmt::Display for MergeBasePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LargestArea => write!(f, "largest-area"),
            Self::LowestId => write!(f, "lowest-id"),
        }
    }
}

impl FromStr for SridPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "reproject" => Ok(Self::Reproject),
            other => Err(format!(
                "unknown SRID policy '{other}' (expected strict or reproject)"
            )),
        }
    }
}

impl fmt::Display for SridPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Reproject => write!(f, "reproject"),
        }
    }
}

/// Configuration for [`crate::AssociationEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub proximity_threshold: f64,
    pub merge_base: MergeBasePolicy,
    pub srid_policy: SridPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            proximity_threshold: DEFAULT_PROXIMITY_THRESHOLD,
            merge_base: MergeBasePolicy::default(),
            srid_policy: SridPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_proximity_threshold(mut self, threshold: f64) -> Self {
        self.proximity_threshold = threshold;
        self
    }

    pub fn with_merge_base(mut self, policy: MergeBasePolicy) -> Self {
        self.merge_base = policy;
        self
    }

    pub fn with_srid_policy(mut self, policy: SridPolicy) -> Self {
        self.srid_policy = policy;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - TRANSIT_PROXIMITY_THRESHOLD (optional, default: 0.04)
    /// - TRANSIT_MERGE_BASE (optional, `largest-area` | `lowest-id`)
    /// - TRANSIT_SRID_POLICY (optional, `strict` | `reproject`)
    ///
    /// Unset variables keep their defaults; malformed ones are an error.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut config = Self::default();

        if let Some(raw) = lookup("TRANSIT_PROXIMITY_THRESHOLD") {
            let threshold: f64 = raw
                .trim()
                .parse()
                .map_err(|_| format!("TRANSIT_PROXIMITY_THRESHOLD is not a number: {raw}"))?;
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(format!(
                    "TRANSIT_PROXIMITY_THRESHOLD must be a non-negative number: {raw}"
                ));
            }
            config.proximity_threshold = threshold;
        }
        if let Some(raw) = lookup("TRANSIT_MERGE_BASE") {
            config.merge_base = raw.parse()?;
        }
        if let Some(raw) = lookup("TRANSIT_SRID_POLICY") {
            config.srid_policy = raw.parse()?;
        }
        Ok(config)
    }
}
