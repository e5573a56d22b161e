//! Point-of-interest data file
//!
//! The file is a JSON array of records:
//!
//! ```json
//! [{"id": "oak-1", "name": "Old Oak", "lat": 44.6239, "lng": -63.9204,
//!   "audioRef": "audio/old-oak.mp3", "category": "tree"}]
//! ```
//!
//! `name`, `lat` and `lng` are required; entries without them, or with
//! non-numeric coordinates, are skipped with a warning so that only clean
//! records reach the geometry code.

use crate::domain::types::PointOfInterest;
use anyhow::Context;
use parking_lot::Mutex;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Supplies the POI set for each scan
pub trait PoiSource: Send + Sync {
    fn pois(&self) -> anyhow::Result<Arc<[PointOfInterest]>>;
}

/// Fixed in-memory POI set
pub struct StaticPois {
    pois: Arc<[PointOfInterest]>,
}

impl StaticPois {
    pub fn new(pois: Vec<PointOfInterest>) -> Self {
        Self { pois: pois.into() }
    }
}

impl PoiSource for StaticPois {
    fn pois(&self) -> anyhow::Result<Arc<[PointOfInterest]>> {
        Ok(self.pois.clone())
    }
}

/// POI file re-read whenever its modification time changes
pub struct PoiFile {
    path: PathBuf,
    cached: Mutex<Option<(SystemTime, Arc<[PointOfInterest]>)>>,
}

impl PoiFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), cached: Mutex::new(None) }
    }
}

impl PoiSource for PoiFile {
    fn pois(&self) -> anyhow::Result<Arc<[PointOfInterest]>> {
        let modified = fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to stat POI file {}", self.path.display()))?;

        let mut cached = self.cached.lock();
        if let Some((cached_at, pois)) = cached.as_ref() {
            if *cached_at == modified {
                return Ok(pois.clone());
            }
        }

        // Drop the stale set first so a failed reload is retried next call
        *cached = None;
        let pois: Arc<[PointOfInterest]> = load_pois(&self.path)?.into();
        debug!(path = %self.path.display(), count = %pois.len(), "poi_file_reloaded");
        *cached = Some((modified, pois.clone()));
        Ok(pois)
    }
}

/// Read and validate a POI file
pub fn load_pois<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<PointOfInterest>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read POI file {}", path.display()))?;
    let pois = parse_pois(&content)
        .with_context(|| format!("Failed to parse POI file {}", path.display()))?;
    info!(path = %path.display(), count = %pois.len(), "pois_loaded");
    Ok(pois)
}

/// Parse a JSON array of POI records, skipping invalid entries
pub fn parse_pois(json: &str) -> anyhow::Result<Vec<PointOfInterest>> {
    let value: Value = serde_json::from_str(json)?;
    let Value::Array(entries) = value else {
        anyhow::bail!("expected a JSON array of points of interest");
    };

    let mut pois = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match parse_entry(index, entry) {
            Ok(poi) => pois.push(poi),
            Err(reason) => {
                warn!(index = %index, reason = %reason, "poi_skipped");
            }
        }
    }
    Ok(pois)
}

fn parse_entry(index: usize, entry: &Value) -> Result<PointOfInterest, &'static str> {
    let Value::Object(fields) = entry else {
        return Err("not an object");
    };

    let name = fields
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or("missing name")?;

    let lat = finite_number(fields.get("lat")).ok_or("lat is not a number")?;
    let lng = finite_number(fields.get("lng").or_else(|| fields.get("lon")))
        .ok_or("lng is not a number")?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err("coordinates out of range");
    }

    let id = match fields.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => format!("poi-{}", index),
    };

    let audio_ref = ["audioRef", "audio_ref", "audio"]
        .iter()
        .find_map(|key| fields.get(*key).and_then(Value::as_str))
        .map(str::to_string);
    let category = fields.get("category").and_then(Value::as_str).map(str::to_string);

    Ok(PointOfInterest { id, name: name.to_string(), lat, lng, audio_ref, category })
}

fn finite_number(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64).filter(|v| v.is_finite())
}
