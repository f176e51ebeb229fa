//! Geometry values carried by feeds and regions.
//!
//! Every stored shape is a multi-polygon tagged with the SRID of its
//! coordinate reference system. Shapes travel through serde as
//! `{ "srid": 4326, "wkt": "MULTIPOLYGON(...)" }` so both the SurrealDB rows
//! and the CLI seed files stay human readable.

use std::fmt;
use std::str::FromStr;

use geo_types::{Geometry, MultiPolygon};
use serde::{Deserialize, Serialize};
use wkt::ToWkt;

use crate::error::StorageError;

/// WGS 84 longitude/latitude.
pub const SRID_WGS84: i32 = 4326;

/// Spherical Web Mercator.
pub const SRID_WEB_MERCATOR: i32 = 3857;

/// A multi-polygon with its spatial reference identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GeometryRepr", into = "GeometryRepr")]
pub struct SridGeometry {
    pub srid: i32,
    pub shape: MultiPolygon<f64>,
}

impl SridGeometry {
    pub fn new(srid: i32, shape: MultiPolygon<f64>) -> Self {
        Self { srid, shape }
    }

    /// Parse a `POLYGON` or `MULTIPOLYGON` WKT string.
    pub fn from_wkt(srid: i32, text: &str) -> Result<Self, StorageError> {
        let parsed = wkt::Wkt::<f64>::from_str(text)
            .map_err(|e| StorageError::InvalidGeometry(format!("{e:?}")))?;
        let geometry: Geometry<f64> = parsed
            .try_into()
            .map_err(|e| StorageError::InvalidGeometry(format!("{e:?}")))?;

        let shape = match geometry {
            Geometry::MultiPolygon(mp) => mp,
            Geometry::Polygon(p) => MultiPolygon(vec![p]),
            other => {
                return Err(StorageError::InvalidGeometry(format!(
                    "expected POLYGON or MULTIPOLYGON, got {}",
                    geometry_kind(&other)
                )))
            }
        };
        Ok(Self { srid, shape })
    }

    /// Parse extended WKT of the form `SRID=4326;MULTIPOLYGON(...)`.
    pub fn from_ewkt(text: &str) -> Result<Self, StorageError> {
        let (prefix, body) = text.split_once(';').ok_or_else(|| {
            StorageError::InvalidGeometry("EWKT must start with SRID=<n>;".to_string())
        })?;
        let srid = prefix
            .trim()
            .strip_prefix("SRID=")
            .and_then(|s| s.parse::<i32>().ok())
            .ok_or_else(|| StorageError::InvalidGeometry(format!("bad SRID prefix: {prefix}")))?;
        Self::from_wkt(srid, body.trim())
    }

    pub fn wkt(&self) -> String {
        self.shape.wkt_string()
    }

    pub fn is_empty(&self) -> bool {
        self.shape.0.is_empty()
    }
}

impl fmt::Display for SridGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SRID={};{}", self.srid, self.wkt())
    }
}

fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "POINT",
        Geometry::Line(_) | Geometry::LineString(_) => "LINESTRING",
        Geometry::MultiPoint(_) => "MULTIPOINT",
        Geometry::MultiLineString(_) => "MULTILINESTRING",
        Geometry::GeometryCollection(_) => "GEOMETRYCOLLECTION",
        Geometry::Polygon(_) => "POLYGON",
        Geometry::MultiPolygon(_) => "MULTIPOLYGON",
        _ => "GEOMETRY",
    }
}

#[derive(Serialize, Deserialize)]
struct GeometryRepr {
    srid: i32,
    wkt: String,
}

impl TryFrom<GeometryRepr> for SridGeometry {
    type Error = StorageError;

    fn try_from(repr: GeometryRepr) -> Result<Self, Self::Error> {
        SridGeometry::from_wkt(repr.srid, &repr.wkt)
    }
}

impl From<SridGeometry> for GeometryRepr {
    fn from(geom: SridGeometry) -> Self {
        GeometryRepr {
            wkt: geom.wkt(),
            srid: geom.srid,
        }
    }
}
