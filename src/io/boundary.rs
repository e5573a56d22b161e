//! Site boundary file
//!
//! A JSON array of `[lat, lng]` pairs outlining the conservation area.
//! Pairs with a missing or non-numeric coordinate are dropped.

use crate::domain::types::Polygon;
use anyhow::Context;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Read and validate a boundary file
pub fn load_boundary<P: AsRef<Path>>(path: P) -> anyhow::Result<Polygon> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read boundary file {}", path.display()))?;
    let polygon = parse_boundary(&content)
        .with_context(|| format!("Failed to parse boundary file {}", path.display()))?;

    if polygon.is_degenerate() {
        warn!(path = %path.display(), points = %polygon.len(), "boundary_degenerate");
    } else {
        info!(path = %path.display(), points = %polygon.len(), "boundary_loaded");
    }
    Ok(polygon)
}

/// Parse a JSON array of `[lat, lng]` pairs
pub fn parse_boundary(json: &str) -> anyhow::Result<Polygon> {
    let value: Value = serde_json::from_str(json)?;
    let Value::Array(entries) = value else {
        anyhow::bail!("expected a JSON array of [lat, lng] pairs");
    };

    let mut points = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match parse_pair(entry) {
            Some(pair) => points.push(pair),
            None => warn!(index = %index, "boundary_point_skipped"),
        }
    }
    Ok(Polygon::new(points))
}

fn parse_pair(entry: &Value) -> Option<[f64; 2]> {
    let pair = entry.as_array()?;
    if pair.len() < 2 {
        return None;
    }
    let lat = pair[0].as_f64().filter(|v| v.is_finite())?;
    let lng = pair[1].as_f64().filter(|v| v.is_finite())?;
    Some([lat, lng])
}
