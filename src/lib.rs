//! Trailguide library
//!
//! Geospatial core of the Talking Trees trail map: distance and polygon math,
//! the periodic proximity scanner, and the audio playback gate.
//! Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
