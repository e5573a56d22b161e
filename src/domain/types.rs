//! Shared types for the trail map

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current epoch milliseconds
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// A position on the globe in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    #[inline]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Both coordinates are finite numbers
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lng)
    }
}

/// `geo` uses x = longitude, y = latitude
impl From<GeoPoint> for geo::Coord<f64> {
    fn from(p: GeoPoint) -> Self {
        geo::coord! { x: p.lng, y: p.lat }
    }
}

impl From<GeoPoint> for geo::Point<f64> {
    fn from(p: GeoPoint) -> Self {
        geo::Point::new(p.lng, p.lat)
    }
}

/// Closed ring of `[lat, lng]` pairs; the last point connects back to the first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Polygon(pub Vec<[f64; 2]>);

impl Polygon {
    pub fn new(points: Vec<[f64; 2]>) -> Self {
        Self(points)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fewer than 3 points encloses no area
    pub fn is_degenerate(&self) -> bool {
        self.0.len() < 3
    }

    pub fn vertex(&self, i: usize) -> GeoPoint {
        let [lat, lng] = self.0[i];
        GeoPoint { lat, lng }
    }

    /// Iterate edges as (start, end) pairs, wrapping last to first
    pub fn edges(&self) -> impl Iterator<Item = (GeoPoint, GeoPoint)> + '_ {
        let n = self.0.len();
        (0..n).map(move |i| (self.vertex(i), self.vertex((i + 1) % n)))
    }

    /// Exterior ring as a `geo` polygon (closed automatically, no holes)
    pub fn to_geo(&self) -> geo::Polygon<f64> {
        let ring: geo::LineString<f64> =
            self.0.iter().map(|&[lat, lng]| GeoPoint::new(lat, lng)).map(geo::Coord::from).collect();
        geo::Polygon::new(ring, vec![])
    }
}

/// A named location on the trail map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl PointOfInterest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self { id: id.into(), name: name.into(), lat, lng, audio_ref: None, category: None }
    }

    pub fn with_audio_ref(mut self, audio_ref: impl Into<String>) -> Self {
        self.audio_ref = Some(audio_ref.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[inline]
    pub fn position(&self) -> GeoPoint {
        GeoPoint { lat: self.lat, lng: self.lng }
    }
}

/// Nearest qualifying POI and how far away it is
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProximityResult {
    pub poi: PointOfInterest,
    pub distance_m: f64,
}

/// Where the user stands relative to the site boundary
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundaryStatus {
    pub inside: bool,
    /// 0 when inside
    pub distance_m: f64,
}

/// Transient state of a location-tracking session
///
/// Replaced wholesale on every publish; reset to [`ScanSession::idle`] when
/// tracking stops.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanSession {
    pub watching: bool,
    pub last_position: Option<GeoPoint>,
    pub last_result: Option<ProximityResult>,
    pub last_boundary: Option<BoundaryStatus>,
    /// Epoch ms of the last completed scan
    pub last_checked_at: Option<u64>,
}

impl ScanSession {
    pub fn idle() -> Self {
        Self::default()
    }

    /// Id of the POI in range, if any
    pub fn active_poi_id(&self) -> Option<&str> {
        self.last_result.as_ref().map(|r| r.poi.id.as_str())
    }
}

/// Commands fed to the scanner from the geolocation source and the UI
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingCommand {
    Start,
    Stop,
    Position(GeoPoint),
    /// Geolocation source reported a failure (timeout, permission denied, ...)
    PositionError(String),
}

impl TrackingCommand {
    pub fn as_str(&self) -> &str {
        match self {
            TrackingCommand::Start => "start",
            TrackingCommand::Stop => "stop",
            TrackingCommand::Position(_) => "position",
            TrackingCommand::PositionError(_) => "position_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polygon_edges_wrap() {
        let poly = Polygon::new(vec![[0.0, 0.0], [0.0, 1.0], [1.0, 1.0]]);
        let edges: Vec<_> = poly.edges().collect();
        assert_eq!(edges.len(), 3);
        assert_eq!(edges[2].0, GeoPoint::new(1.0, 1.0));
        assert_eq!(edges[2].1, GeoPoint::new(0.0, 0.0));
    }

    #[test]
    fn test_polygon_degenerate() {
        assert!(Polygon::default().is_degenerate());
        assert!(Polygon::new(vec![[0.0, 0.0], [1.0, 1.0]]).is_degenerate());
        assert!(!Polygon::new(vec![[0.0, 0.0], [0.0, 1.0], [1.0, 1.0]]).is_degenerate());
    }

    #[test]
    fn test_geo_axes_are_lng_lat() {
        let p: geo::Point<f64> = GeoPoint::new(44.6, -63.9).into();
        assert_eq!((p.x(), p.y()), (-63.9, 44.6));

        let ring = Polygon::new(vec![[0.0, 0.0], [0.0, 1.0], [2.0, 1.0]]).to_geo();
        let exterior = ring.exterior();
        assert!(exterior.is_closed());
        assert_eq!(exterior.0.len(), 4);
        assert_eq!(exterior.0[2], geo::coord! { x: 1.0, y: 2.0 });
    }

    #[test]
    fn test_geo_point_is_finite() {
        assert!(GeoPoint::new(44.6, -63.9).is_finite());
        assert!(!GeoPoint::new(f64::NAN, -63.9).is_finite());
        assert!(!GeoPoint::new(44.6, f64::INFINITY).is_finite());
    }

    #[test]
    fn test_poi_optional_fields_deserialize() {
        let poi: PointOfInterest =
            serde_json::from_str(r#"{"id":"t1","name":"Old Oak","lat":44.6,"lng":-63.9}"#)
                .unwrap();
        assert_eq!(poi.audio_ref, None);
        assert_eq!(poi.category, None);
        assert_eq!(poi.position(), GeoPoint::new(44.6, -63.9));
    }

    #[test]
    fn test_idle_session() {
        let session = ScanSession::idle();
        assert!(!session.watching);
        assert_eq!(session.active_poi_id(), None);
        assert_eq!(session.last_checked_at, None);
    }
}
