//! Domain models - trail map value types and geometry
//!
//! This module contains the canonical data types used throughout the system:
//! - `GeoPoint` / `Polygon` - coordinates and site boundaries
//! - `PointOfInterest` - a named location on the trail map
//! - `ScanSession` - transient state of a location-tracking session
//! - `geo` - haversine distance, containment and nearest-POI search

pub mod geo;
pub mod types;

pub use types::{
    epoch_ms, BoundaryStatus, GeoPoint, PointOfInterest, Polygon, ProximityResult, ScanSession,
    TrackingCommand,
};
