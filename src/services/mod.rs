//! Services - business logic and state management
//!
//! This module contains the core services:
//! - `scanner` - Periodic nearest-POI scanning over the live position feed
//! - `playback_gate` - Single-slot lock over the audio output
//! - `narrator` - Plays Talking Trees clips as POIs come into range

pub mod narrator;
pub mod playback_gate;
pub mod scanner;

// Re-export commonly used types
pub use narrator::{AudioEngine, LogAudioEngine, NarrationClip, Narrator};
pub use playback_gate::{AudioPlaybackGate, PlaybackHandle};
pub use scanner::ProximityScanner;
