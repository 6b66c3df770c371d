//! Playback context seam.
//!
//! The routing manager drives the output graph through this trait so the
//! switching protocol can be exercised without an audio device.

use std::time::Duration;

use crate::engine::analyser::Analyser;
use crate::engine::AudioError;
use crate::instruments::Instrument;
use crate::notes::{NoteId, Velocity};

/// Lifecycle state of the playback context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    /// Producing audio.
    Running,
    /// Created but not producing audio; `resume` is required.
    Suspended,
    /// Shut down; `reset` recreates it.
    Closed,
}

/// Where the current instrument's output goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteTarget {
    /// instrument -> analyser -> output
    Analyser,
    /// instrument -> output, bypassing the analyser
    Destination,
}

/// A failed `connect`. Ownership of the instrument is handed back so the
/// caller can try another route.
#[derive(Debug)]
pub struct ConnectFailure {
    pub error: AudioError,
    pub instrument: Instrument,
}

/// The audio output graph: at most one instrument feeding the output,
/// optionally through an analyser.
pub trait PlaybackContext {
    fn state(&self) -> ContextState;

    /// Start or resume playback, waiting at most `timeout` for confirmation.
    fn resume(&mut self, timeout: Duration) -> Result<(), AudioError>;

    /// Close and recreate the context, analyser and graph.
    ///
    /// Any connected instrument is discarded.
    fn reset(&mut self) -> Result<(), AudioError>;

    /// Connect `instrument` as the current instrument.
    fn connect(&mut self, instrument: Instrument, target: RouteTarget)
        -> Result<(), ConnectFailure>;

    /// Remove the current instrument from the graph.
    fn disconnect(&mut self) -> Option<Instrument>;

    fn route(&self) -> Option<RouteTarget>;

    /// Play a near-silent probe note and wait at most `timeout` for it to
    /// complete without error.
    fn verify_route(&mut self, timeout: Duration) -> Result<(), AudioError>;

    fn attack(&mut self, note: NoteId, velocity: Velocity) -> Result<(), AudioError>;

    fn release(&mut self, note: NoteId) -> Result<(), AudioError>;

    fn release_all(&mut self) -> Result<(), AudioError>;

    /// The analyser, when the current instrument is routed through it.
    fn analyser_mut(&mut self) -> Option<&mut Analyser>;

    /// Process pending notifications from the audio thread.
    fn pump(&mut self) {}

    /// An asynchronous device error reported since the last call.
    fn take_error(&mut self) -> Option<AudioError> {
        None
    }
}
