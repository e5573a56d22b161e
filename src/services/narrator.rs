//! Talking Trees narration
//!
//! Follows the scanner's published sessions and plays the clip for the POI in
//! range. Playback goes through the shared `AudioPlaybackGate`, so a narration
//! never starts while another feature owns the audio output.

use crate::domain::types::{PointOfInterest, ScanSession};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::playback_gate::{AudioPlaybackGate, PlaybackHandle, PlaybackTicket};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What to play for a POI
#[derive(Debug, Clone, PartialEq)]
pub struct NarrationClip {
    pub poi_id: String,
    pub title: String,
    /// Pre-recorded audio, if the POI has one
    pub audio_ref: Option<String>,
    /// Text for speech synthesis when there is no recording
    pub text: String,
}

impl NarrationClip {
    pub fn for_poi(poi: &PointOfInterest) -> Self {
        Self {
            poi_id: poi.id.clone(),
            title: poi.name.clone(),
            audio_ref: poi.audio_ref.clone(),
            text: format!("You are near {}.", poi.name),
        }
    }
}

/// Audio output (speech SDK or audio player)
pub trait AudioEngine: Send + Sync {
    fn start(&self, clip: &NarrationClip) -> anyhow::Result<Box<dyn PlaybackHandle>>;
}

/// Engine that only logs; stands in for a real speech SDK
pub struct LogAudioEngine;

struct LogPlayback {
    label: String,
}

impl PlaybackHandle for LogPlayback {
    fn label(&self) -> &str {
        &self.label
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        info!(clip = %self.label, "narration_audio_stopped");
        Ok(())
    }

    fn dispose(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl AudioEngine for LogAudioEngine {
    fn start(&self, clip: &NarrationClip) -> anyhow::Result<Box<dyn PlaybackHandle>> {
        match &clip.audio_ref {
            Some(audio_ref) => info!(clip = %clip.poi_id, audio_ref = %audio_ref, "narration_audio_playing"),
            None => info!(clip = %clip.poi_id, text = %clip.text, "narration_speech_playing"),
        }
        Ok(Box::new(LogPlayback { label: clip.poi_id.clone() }))
    }
}

/// Starts and stops narration as POIs come into and out of range
pub struct Narrator {
    gate: Arc<AudioPlaybackGate>,
    engine: Arc<dyn AudioEngine>,
    metrics: Arc<Metrics>,
    idle_prompt: String,
    /// POI whose clip this narrator started, with the gate ticket it holds
    playing: Option<(String, PlaybackTicket)>,
}

impl Narrator {
    pub fn new(
        config: &Config,
        gate: Arc<AudioPlaybackGate>,
        engine: Arc<dyn AudioEngine>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            gate,
            engine,
            metrics,
            idle_prompt: config.idle_prompt().to_string(),
            playing: None,
        }
    }

    /// POI currently narrated, if any
    pub fn playing(&self) -> Option<&str> {
        self.playing.as_ref().map(|(poi_id, _)| poi_id.as_str())
    }

    /// React to a published scan session
    pub fn on_session(&mut self, session: &ScanSession) {
        let target = session.last_result.as_ref().map(|r| &r.poi);

        // Same POI still in range: keep playing, unless the lock was taken away
        if let (Some((current, ticket)), Some(poi)) = (&self.playing, target) {
            if *current == poi.id && self.gate.holds(*ticket) {
                return;
            }
        }

        self.stop_playing();

        let Some(poi) = target else {
            if session.watching {
                debug!(prompt = %self.idle_prompt, "narration_idle");
            }
            return;
        };

        // Lock bit is taken before the engine does any setup
        let Some(ticket) = self.gate.try_acquire_ticket() else {
            self.metrics.record_playback_busy();
            debug!(poi_id = %poi.id, "narration_skipped_playback_busy");
            return;
        };

        let clip = NarrationClip::for_poi(poi);
        match self.engine.start(&clip) {
            Ok(handle) => {
                self.gate.replace_active(handle);
                self.playing = Some((poi.id.clone(), ticket));
                self.metrics.record_narration_started();
                info!(poi_id = %poi.id, poi_name = %poi.name, "narration_started");
            }
            Err(e) => {
                self.gate.release_if_owner(ticket);
                self.metrics.record_narration_failure();
                warn!(poi_id = %poi.id, error = %e, "narration_start_failed");
            }
        }
    }

    /// Give up the gate, but only if this narrator still holds it
    fn stop_playing(&mut self) {
        let Some((poi_id, ticket)) = self.playing.take() else {
            return;
        };
        if self.gate.release_if_owner(ticket) {
            info!(poi_id = %poi_id, "narration_stopped");
        } else {
            debug!(poi_id = %poi_id, "narration_lock_lost");
        }
    }

    /// Follow scanner sessions until shutdown or the scanner goes away
    pub async fn run(
        &mut self,
        mut state_rx: watch::Receiver<ScanSession>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("narrator_started");

        loop {
            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break; // Scanner dropped
                    }
                    let session = state_rx.borrow_and_update().clone();
                    self.on_session(&session);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.stop_playing();
        info!("narrator_stopped");
    }
}
