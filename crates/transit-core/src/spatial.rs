//! Spatial operations the engine needs from a geometry backend.
//!
//! [`SpatialOps`] is the seam; [`PlanarSpatialOps`] implements it with the
//! `geo` crate in the planar units of each shape's own SRID. Reprojection is
//! limited to WGS 84 (4326) and spherical Web Mercator (3857).

use geo::{Area, BooleanOps, ConvexHull, Intersects, MapCoords};
use geo_types::{Coord, Line, MultiPolygon, Polygon};
use transit_state::{SridGeometry, SRID_WEB_MERCATOR, SRID_WGS84};

use crate::error::{RegistryError, Result};

/// Geometry primitives used by aggregation and region assignment.
pub trait SpatialOps: Send + Sync {
    /// True when `candidate`, reprojected into `reference`'s SRID, lies within
    /// `threshold` of `reference` (measured in `reference`'s units).
    fn within_distance(
        &self,
        reference: &SridGeometry,
        candidate: &SridGeometry,
        threshold: f64,
    ) -> Result<bool>;

    /// Overlay union of two shapes sharing an SRID.
    fn union(&self, a: &SridGeometry, b: &SridGeometry) -> Result<SridGeometry>;

    /// Re-express `geom` in `srid`.
    fn reproject(&self, geom: &SridGeometry, srid: i32) -> Result<SridGeometry>;

    /// Convex hull of both shapes together; both must share an SRID.
    fn convex_hull_merge(&self, a: &SridGeometry, b: &SridGeometry) -> Result<SridGeometry>;

    /// Planar area in the shape's own units.
    fn area(&self, geom: &SridGeometry) -> f64;
}

/// `geo`-backed planar implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanarSpatialOps;

impl PlanarSpatialOps {
    pub fn new() -> Self {
        Self
    }
}

const EARTH_RADIUS_M: f64 = 6_378_137.0;

fn same_srid(a: &SridGeometry, b: &SridGeometry) -> Result<()> {
    if a.srid != b.srid {
        return Err(RegistryError::Geometry(format!(
            "SRID mismatch: {} vs {}",
            a.srid, b.srid
        )));
    }
    Ok(())
}

fn to_web_mercator(c: Coord<f64>) -> Coord<f64> {
    let lat = c.y.clamp(-85.051_128_78, 85.051_128_78).to_radians();
    Coord {
        x: EARTH_RADIUS_M * c.x.to_radians(),
        y: EARTH_RADIUS_M * (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln(),
    }
}

fn to_wgs84(c: Coord<f64>) -> Coord<f64> {
    Coord {
        x: (c.x / EARTH_RADIUS_M).to_degrees(),
        y: (2.0 * (c.y / EARTH_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees(),
    }
}

fn polygon_edges(shape: &MultiPolygon<f64>) -> impl Iterator<Item = Line<f64>> + '_ {
    shape.iter().flat_map(|polygon: &Polygon<f64>| {
        std::iter::once(polygon.exterior())
            .chain(polygon.interiors())
            .flat_map(|ring| ring.lines())
    })
}

fn point_segment_distance(p: Coord<f64>, seg: &Line<f64>) -> f64 {
    let d = seg.delta();
    let len_sq = d.x * d.x + d.y * d.y;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        (((p.x - seg.start.x) * d.x + (p.y - seg.start.y) * d.y) / len_sq).clamp(0.0, 1.0)
    };
    let nearest = Coord {
        x: seg.start.x + t * d.x,
        y: seg.start.y + t * d.y,
    };
    ((p.x - nearest.x).powi(2) + (p.y - nearest.y).powi(2)).sqrt()
}

// Non-intersecting segments are closest at one of the four endpoints.
fn segment_distance(a: &Line<f64>, b: &Line<f64>) -> f64 {
    point_segment_distance(a.start, b)
        .min(point_segment_distance(a.end, b))
        .min(point_segment_distance(b.start, a))
        .min(point_segment_distance(b.end, a))
}

/// Minimum planar distance between two multi-polygons; zero when they touch,
/// overlap or one contains the other.
fn min_distance(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> f64 {
    if a.0.is_empty() || b.0.is_empty() {
        return f64::INFINITY;
    }
    if a.intersects(b) {
        return 0.0;
    }
    let b_edges: Vec<Line<f64>> = polygon_edges(b).collect();
    polygon_edges(a)
        .flat_map(|ea| b_edges.iter().map(move |eb| segment_distance(&ea, eb)))
        .fold(f64::INFINITY, f64::min)
}

impl SpatialOps for PlanarSpatialOps {
    fn within_distance(
        &self,
        reference: &SridGeometry,
        candidate: &SridGeometry,
        threshold: f64,
    ) -> Result<bool> {
        let candidate = self.reproject(candidate, reference.srid)?;
        Ok(min_distance(&reference.shape, &candidate.shape) <= threshold)
    }

    fn union(&self, a: &SridGeometry, b: &SridGeometry) -> Result<SridGeometry> {
        same_srid(a, b)?;
        if a.is_empty() {
            return Ok(b.clone());
        }
        if b.is_empty() {
            return Ok(a.clone());
        }
        Ok(SridGeometry::new(a.srid, a.shape.union(&b.shape)))
    }

    fn reproject(&self, geom: &SridGeometry, srid: i32) -> Result<SridGeometry> {
        let project: fn(Coord<f64>) -> Coord<f64> = match (geom.srid, srid) {
            (from, to) if from == to => return Ok(geom.clone()),
            (SRID_WGS84, SRID_WEB_MERCATOR) => to_web_mercator,
            (SRID_WEB_MERCATOR, SRID_WGS84) => to_wgs84,
            (from, to) => return Err(RegistryError::UnsupportedSrid { from, to }),
        };
        Ok(SridGeometry::new(srid, geom.shape.map_coords(project)))
    }

    fn convex_hull_merge(&self, a: &SridGeometry, b: &SridGeometry) -> Result<SridGeometry> {
        same_srid(a, b)?;
        let combined: MultiPolygon<f64> = a.shape.iter().chain(b.shape.iter()).cloned().collect();
        if combined.0.is_empty() {
            return Ok(SridGeometry::new(a.srid, combined));
        }
        Ok(SridGeometry::new(
            a.srid,
            MultiPolygon(vec![combined.convex_hull()]),
        ))
    }

    fn area(&self, geom: &SridGeometry) -> f64 {
        geom.shape.unsigned_area()
    }
}
