//! Single-slot lock over the audio/speech output
//!
//! Only one narration stream may play at a time. `try_acquire` sets the lock
//! bit synchronously, before any asynchronous playback setup, so two requests
//! racing for playback cannot both win. Stopping or disposing the underlying
//! resource is best effort: failures are logged and never keep the gate from
//! reaching its target state.
//!
//! Each successful acquire hands out a fresh [`PlaybackTicket`]. A holder that
//! may have been pre-empted by an unconditional `release` gives its lock up
//! with `release_if_owner`, which leaves a newer owner's lock alone.

use parking_lot::Mutex;
use tracing::{debug, warn};

/// An active audio or speech resource owned by the gate
pub trait PlaybackHandle: Send {
    /// Short description for logs
    fn label(&self) -> &str;
    fn stop(&mut self) -> anyhow::Result<()>;
    fn dispose(&mut self) -> anyhow::Result<()>;
}

/// Proof of one particular acquisition of the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackTicket(u64);

struct GateState {
    owner: Option<u64>,
    next_ticket: u64,
    active: Option<Box<dyn PlaybackHandle>>,
}

/// Playback lock shared (via `Arc`) by every feature that plays audio
pub struct AudioPlaybackGate {
    state: Mutex<GateState>,
}

impl AudioPlaybackGate {
    pub fn new() -> Self {
        Self { state: Mutex::new(GateState { owner: None, next_ticket: 0, active: None }) }
    }

    /// Take the lock if it is free; returns false without side effects otherwise
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_ticket().is_some()
    }

    /// Like `try_acquire`, returning the ticket that identifies this holder
    pub fn try_acquire_ticket(&self) -> Option<PlaybackTicket> {
        let mut state = self.state.lock();
        if state.owner.is_some() {
            return None;
        }
        let ticket = state.next_ticket;
        state.next_ticket = state.next_ticket.wrapping_add(1);
        state.owner = Some(ticket);
        Some(PlaybackTicket(ticket))
    }

    /// Unlock and shut down any stored handle, whoever acquired the lock
    pub fn release(&self) {
        let previous = {
            let mut state = self.state.lock();
            state.owner = None;
            state.active.take()
        };

        if let Some(handle) = previous {
            shutdown_handle(handle);
        }
    }

    /// Release only while `ticket` still holds the lock
    ///
    /// Returns false, touching nothing, when the lock was released or taken
    /// over by someone else since the ticket was issued.
    pub fn release_if_owner(&self, ticket: PlaybackTicket) -> bool {
        let previous = {
            let mut state = self.state.lock();
            if state.owner != Some(ticket.0) {
                return false;
            }
            state.owner = None;
            state.active.take()
        };

        if let Some(handle) = previous {
            shutdown_handle(handle);
        }
        true
    }

    /// Store `handle` as the active resource, shutting down the previous one
    ///
    /// Does not touch the lock bit; used to hand playback over without a full
    /// release/acquire cycle.
    pub fn replace_active(&self, handle: Box<dyn PlaybackHandle>) {
        let previous = {
            let mut state = self.state.lock();
            state.active.replace(handle)
        };

        if let Some(handle) = previous {
            shutdown_handle(handle);
        }
    }

    /// Whether `ticket` is the current holder
    pub fn holds(&self, ticket: PlaybackTicket) -> bool {
        self.state.lock().owner == Some(ticket.0)
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    pub fn has_active(&self) -> bool {
        self.state.lock().active.is_some()
    }
}

impl Default for AudioPlaybackGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Stop then dispose, logging failures. Runs outside the gate's lock so a
/// handle that calls back into the gate cannot deadlock.
fn shutdown_handle(mut handle: Box<dyn PlaybackHandle>) {
    if let Err(e) = handle.stop() {
        warn!(handle = %handle.label(), error = %e, "playback_stop_failed");
    }
    if let Err(e) = handle.dispose() {
        warn!(handle = %handle.label(), error = %e, "playback_dispose_failed");
    }
    debug!(handle = %handle.label(), "playback_handle_released");
}
