//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `poi_data` - POI set loading (JSON) and the `PoiSource` seam
//! - `boundary` - Site outline polygon loading
//! - `mqtt` - MQTT client for receiving device positions and start/stop
//! - `replay` - Recorded walk playback in place of a live device
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod boundary;
pub mod mqtt;
pub mod poi_data;
pub mod prometheus;
pub mod replay;

// Re-export commonly used types
pub use boundary::load_boundary;
pub use poi_data::{load_pois, PoiFile, PoiSource, StaticPois};
pub use replay::{load_replay, run_replay, ReplayStep};
