//! Geometry over lat/lng coordinates
//!
//! Thin wrappers over the `geo` crate that speak `GeoPoint`/`Polygon`. All
//! functions are pure and reentrant. Malformed input (non-finite coordinates,
//! polygons with fewer than 3 points) yields benign defaults instead of
//! errors: false, 0, or `None`.
//!
//! Point-to-polygon distance uses a local equirectangular projection per edge.
//! It is accurate at the scale of a single trail site (sub-kilometer) and is
//! not meant for polygons spanning large latitude ranges.

use crate::domain::types::{GeoPoint, PointOfInterest, Polygon, ProximityResult};
use geo::coordinate_position::{CoordPos, CoordinatePosition};
use geo::{coord, EuclideanDistance, HaversineDistance, Line, Point};

/// Mean Earth radius (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude in the local projection
pub const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// Radius `geo`'s haversine is computed with
const GEO_MEAN_EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance in meters (haversine on a 6 371 km sphere)
pub fn distance_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let d = Point::from(a).haversine_distance(&Point::from(b))
        * (EARTH_RADIUS_M / GEO_MEAN_EARTH_RADIUS_M);

    // Rounding near antipodes can push asin out of its domain
    if d.is_nan() && a.is_finite() && b.is_finite() {
        return std::f64::consts::PI * EARTH_RADIUS_M;
    }
    d
}

/// Containment test; points on an edge or vertex count as inside
///
/// Polygons with fewer than 3 points contain nothing.
pub fn point_in_polygon(point: GeoPoint, polygon: &Polygon) -> bool {
    if polygon.is_degenerate() {
        return false;
    }

    matches!(
        polygon.to_geo().coordinate_position(&geo::Coord::from(point)),
        CoordPos::Inside | CoordPos::OnBoundary
    )
}

/// Distance in meters from `point` to the nearest polygon edge, 0 if inside
///
/// An empty polygon returns 0; callers must not read that as containment.
pub fn distance_to_polygon_meters(point: GeoPoint, polygon: &Polygon) -> f64 {
    if polygon.is_empty() {
        return 0.0;
    }
    if point_in_polygon(point, polygon) {
        return 0.0;
    }

    polygon
        .edges()
        .map(|(a, b)| point_to_segment_meters(point, a, b))
        .fold(f64::INFINITY, f64::min)
}

/// Distance in meters from `point` to the segment `a`-`b`
///
/// Projects both endpoints into a planar frame centered on `point`, scaled
/// by the segment's own mean latitude.
pub fn point_to_segment_meters(point: GeoPoint, a: GeoPoint, b: GeoPoint) -> f64 {
    let mean_lat = ((a.lat + b.lat) / 2.0).to_radians();
    let lon_scale = METERS_PER_DEG_LAT * mean_lat.cos();

    let project = |p: GeoPoint| {
        coord! {
            x: (p.lng - point.lng) * lon_scale,
            y: (p.lat - point.lat) * METERS_PER_DEG_LAT,
        }
    };

    // Zero-length segments measure to the endpoint
    Point::new(0.0, 0.0).euclidean_distance(&Line::new(project(a), project(b)))
}

/// Closest POI no farther than `radius_m` from `user`
///
/// Linear scan; POIs with non-finite coordinates are skipped. On exact
/// distance ties the earlier POI in `pois` wins.
pub fn nearest_poi_within_radius(
    pois: &[PointOfInterest],
    user: Option<GeoPoint>,
    radius_m: f64,
) -> Option<ProximityResult> {
    let user = user.filter(GeoPoint::is_finite)?;
    if pois.is_empty() {
        return None;
    }

    let mut best: Option<(&PointOfInterest, f64)> = None;

    for poi in pois {
        let position = poi.position();
        if !position.is_finite() {
            continue;
        }

        let distance_m = distance_meters(user, position);
        if distance_m > radius_m {
            continue;
        }

        // Strict comparison keeps the first POI on ties
        let closer = match best {
            Some((_, best_m)) => distance_m < best_m,
            None => true,
        };
        if closer {
            best = Some((poi, distance_m));
        }
    }

    best.map(|(poi, distance_m)| ProximityResult { poi: poi.clone(), distance_m })
}
