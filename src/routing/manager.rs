//! Audio Routing Manager
//!
//! Owns the playback context and switches the current instrument:
//!
//! ```text
//! Idle/Ready/Failed --request_switch--> Switching --poll--> Ready
//!                                           |
//!                                           +--(retries exhausted)--> Failed --acknowledge--> Idle
//! ```
//!
//! A switch releases every active note, parks the old instrument and loads
//! the new one on a worker thread. Each `poll` checks the load and, once it
//! resolves, resumes the context, connects the instrument (analyser first,
//! output directly as a fallback) and verifies the route with a probe tone.
//! Failed attempts reset the whole context and reload. When the retry
//! budget runs out the parked instrument is reconnected, or the built-in
//! synth if that is not possible.

use std::time::Duration;

use log::{debug, error, info, warn};

use super::context::{ContextState, PlaybackContext, RouteTarget};
use crate::engine::AudioError;
use crate::instruments::{Instrument, InstrumentLoader, LoadError, PendingLoad, DEFAULT_INSTRUMENT};
use crate::notes::{ActiveNoteSet, NoteId, NoteOutput, Velocity};

/// State of the routing manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingState {
    /// Nothing in flight; no switch has completed yet or a failure was acknowledged.
    Idle,
    /// A switch is in flight.
    Switching,
    /// The last switch completed.
    Ready,
    /// The last switch failed and has not been acknowledged.
    Failed,
}

/// Tuning for the switch protocol.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SwitchConfig {
    /// Additional attempts after the first one fails.
    pub max_retries: u32,
    pub resume_timeout: Duration,
    pub verify_timeout: Duration,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            resume_timeout: Duration::from_millis(1000),
            verify_timeout: Duration::from_millis(500),
        }
    }
}

/// A switch request that was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchError {
    /// Another switch is in flight.
    Busy { in_flight: String },
    /// No catalog entry with this name.
    UnknownInstrument(String),
}

impl std::fmt::Display for SwitchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwitchError::Busy { in_flight } => {
                write!(f, "Already switching to '{}'", in_flight)
            }
            SwitchError::UnknownInstrument(name) => write!(f, "Unknown instrument '{}'", name),
        }
    }
}

impl std::error::Error for SwitchError {}

/// Why a switch attempt failed.
#[derive(Debug)]
pub enum SwitchFailure {
    Load(LoadError),
    Audio(AudioError),
}

impl std::fmt::Display for SwitchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwitchFailure::Load(e) => write!(f, "{}", e),
            SwitchFailure::Audio(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SwitchFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SwitchFailure::Load(e) => Some(e),
            SwitchFailure::Audio(e) => Some(e),
        }
    }
}

impl From<LoadError> for SwitchFailure {
    fn from(e: LoadError) -> Self {
        SwitchFailure::Load(e)
    }
}

impl From<AudioError> for SwitchFailure {
    fn from(e: AudioError) -> Self {
        SwitchFailure::Audio(e)
    }
}

/// Result of a completed switch, reported once by `poll`.
#[derive(Debug)]
pub enum SwitchOutcome {
    Ready {
        instrument: String,
        route: RouteTarget,
    },
    Failed {
        requested: String,
        error: SwitchFailure,
        /// The instrument left playing, if any.
        restored: Option<String>,
    },
}

struct SwitchJob {
    target: String,
    previous_selection: Option<String>,
    /// The instrument that was current before the switch.
    parked: Option<Instrument>,
    attempt: u32,
    pending: PendingLoad,
}

/// Serializes instrument switches over a playback context.
pub struct AudioRoutingManager<C: PlaybackContext> {
    context: C,
    loader: InstrumentLoader,
    config: SwitchConfig,
    state: RoutingState,
    /// What the user-visible selector shows.
    selection: Option<String>,
    /// Name of the connected instrument.
    current: Option<String>,
    job: Option<SwitchJob>,
}

impl<C: PlaybackContext> AudioRoutingManager<C> {
    pub fn new(context: C, loader: InstrumentLoader, config: SwitchConfig) -> Self {
        Self {
            context,
            loader,
            config,
            state: RoutingState::Idle,
            selection: None,
            current: None,
            job: None,
        }
    }

    pub fn state(&self) -> RoutingState {
        self.state
    }

    pub fn is_switching(&self) -> bool {
        self.state == RoutingState::Switching
    }

    pub fn selection(&self) -> Option<&str> {
        self.selection.as_deref()
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Target of the in-flight switch.
    pub fn in_flight(&self) -> Option<&str> {
        self.job.as_ref().map(|j| j.target.as_str())
    }

    pub fn config(&self) -> &SwitchConfig {
        &self.config
    }

    pub fn loader(&self) -> &InstrumentLoader {
        &self.loader
    }

    pub fn loader_mut(&mut self) -> &mut InstrumentLoader {
        &mut self.loader
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// Begin switching to `name`.
    ///
    /// Every active note is released before the current instrument leaves
    /// the graph.
    pub fn request_switch(
        &mut self,
        name: &str,
        notes: &mut ActiveNoteSet,
    ) -> Result<(), SwitchError> {
        if let Some(job) = &self.job {
            info!(
                "Ignoring switch to '{}': switch to '{}' in progress",
                name, job.target
            );
            return Err(SwitchError::Busy {
                in_flight: job.target.clone(),
            });
        }
        if !self.loader.contains(name) {
            warn!("Ignoring switch to unknown instrument '{}'", name);
            return Err(SwitchError::UnknownInstrument(name.to_string()));
        }

        let released = notes.panic(self);
        if let Err(e) = self.context.release_all() {
            debug!("release_all before switch: {}", e);
        }
        debug!("Released {} notes before switching", released);

        let parked = self.context.disconnect();
        self.current = None;
        self.state = RoutingState::Switching;

        info!("Switching instrument to '{}'", name);
        let pending = self.start_load(name);
        self.job = Some(SwitchJob {
            target: name.to_string(),
            previous_selection: self.selection.replace(name.to_string()),
            parked,
            attempt: 0,
            pending,
        });
        Ok(())
    }

    fn start_load(&self, name: &str) -> PendingLoad {
        self.loader
            .load(name)
            .unwrap_or_else(|e| PendingLoad::resolved(name, Err(e)))
    }

    /// Advance an in-flight switch. Returns the outcome once it completes.
    pub fn poll(&mut self) -> Option<SwitchOutcome> {
        let result = self.job.as_ref()?.pending.try_take()?;
        let mut job = self.job.take()?;

        let attempt = result
            .map_err(SwitchFailure::from)
            .and_then(|instrument| self.install(instrument));

        match attempt {
            Ok(route) => {
                info!("Instrument '{}' ready ({:?})", job.target, route);
                self.state = RoutingState::Ready;
                self.current = Some(job.target.clone());
                Some(SwitchOutcome::Ready {
                    instrument: job.target,
                    route,
                })
            }
            Err(failure) if job.attempt < self.config.max_retries => {
                job.attempt += 1;
                warn!(
                    "Switch to '{}' failed ({}); retry {}/{}",
                    job.target, failure, job.attempt, self.config.max_retries
                );
                if let Err(e) = self.context.reset() {
                    warn!("Context reset failed: {}", e);
                }
                job.pending = self.start_load(&job.target);
                self.job = Some(job);
                None
            }
            Err(failure) => Some(self.fail(job, failure)),
        }
    }

    /// Resume, connect and verify. The instrument is not connected on error.
    fn install(&mut self, instrument: Instrument) -> Result<RouteTarget, SwitchFailure> {
        if self.context.state() != ContextState::Running {
            self.context.resume(self.config.resume_timeout)?;
        }

        let route = match self.context.connect(instrument, RouteTarget::Analyser) {
            Ok(()) => RouteTarget::Analyser,
            Err(failure) => {
                warn!(
                    "Analyser connection failed ({}); routing to output directly",
                    failure.error
                );
                self.context
                    .connect(failure.instrument, RouteTarget::Destination)
                    .map_err(|f| f.error)?;
                RouteTarget::Destination
            }
        };

        if let Err(e) = self.context.verify_route(self.config.verify_timeout) {
            self.context.disconnect();
            return Err(e.into());
        }
        Ok(route)
    }

    fn fail(&mut self, job: SwitchJob, failure: SwitchFailure) -> SwitchOutcome {
        error!(
            "Switch to '{}' failed after {} attempts: {}",
            job.target,
            job.attempt + 1,
            failure
        );
        self.state = RoutingState::Failed;
        self.selection = job.previous_selection;

        if let Err(e) = self.context.reset() {
            warn!("Context reset failed: {}", e);
        }

        let mut restored = None;
        if let Some(previous) = job.parked {
            let name = previous.name().to_string();
            match self.install(previous) {
                Ok(_) => restored = Some(name),
                Err(e) => warn!("Could not restore '{}': {}", name, e),
            }
        }

        if restored.is_none() {
            match self.install(Instrument::default_synth()) {
                Ok(_) => {
                    info!("Falling back to built-in '{}'", DEFAULT_INSTRUMENT);
                    restored = Some(DEFAULT_INSTRUMENT.to_string());
                    self.selection = restored.clone();
                }
                Err(e) => error!("Built-in instrument unavailable: {}", e),
            }
        }

        self.current = restored.clone();
        SwitchOutcome::Failed {
            requested: job.target,
            error: failure,
            restored,
        }
    }

    /// Clear a reported failure.
    pub fn acknowledge(&mut self) {
        if self.state == RoutingState::Failed {
            self.state = RoutingState::Idle;
        }
    }
}

impl<C: PlaybackContext> NoteOutput for AudioRoutingManager<C> {
    fn attack(&mut self, note: NoteId, velocity: Velocity) -> Result<(), AudioError> {
        if self.is_switching() {
            return Err(AudioError::NotReady);
        }
        self.context.attack(note, velocity)
    }

    fn release(&mut self, note: NoteId) -> Result<(), AudioError> {
        if self.is_switching() {
            return Err(AudioError::NotReady);
        }
        self.context.release(note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::{default_catalog, InstrumentSpec};
    use crate::routing::context::testing::{Call, FakeContext};

    fn manager() -> AudioRoutingManager<FakeContext> {
        let mut loader = InstrumentLoader::new(default_catalog());
        loader.add(InstrumentSpec::sampler(
            "Broken",
            "/nonexistent/broken.wav",
            NoteId::MIDDLE_C,
        ));
        AudioRoutingManager::new(FakeContext::new(), loader, SwitchConfig::default())
    }

    fn drive(m: &mut AudioRoutingManager<FakeContext>) -> SwitchOutcome {
        for _ in 0..2000 {
            if let Some(outcome) = m.poll() {
                return outcome;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("switch never completed");
    }

    fn switch_to(m: &mut AudioRoutingManager<FakeContext>, name: &str) -> SwitchOutcome {
        let mut notes = ActiveNoteSet::new();
        m.request_switch(name, &mut notes).unwrap();
        drive(m)
    }

    fn note(n: u8) -> NoteId {
        NoteId::from_midi(n).unwrap()
    }

    #[test]
    fn test_idle_to_ready() {
        let mut m = manager();
        assert_eq!(m.state(), RoutingState::Idle);

        let mut notes = ActiveNoteSet::new();
        m.request_switch("Synth Lead", &mut notes).unwrap();
        assert_eq!(m.state(), RoutingState::Switching);
        assert_eq!(m.selection(), Some("Synth Lead"));

        let outcome = drive(&mut m);
        assert!(matches!(
            outcome,
            SwitchOutcome::Ready {
                route: RouteTarget::Analyser,
                ..
            }
        ));
        assert_eq!(m.state(), RoutingState::Ready);
        assert_eq!(m.current(), Some("Synth Lead"));
        assert_eq!(m.context().current_name(), Some("Synth Lead"));
        assert_eq!(m.context().count(&Call::Resume), 1);
        assert_eq!(m.context().count(&Call::Verify), 1);
    }

    #[test]
    fn test_running_context_is_not_resumed() {
        let mut m = manager();
        m.context_mut().state = ContextState::Running;
        switch_to(&mut m, "Synth");
        assert_eq!(m.context().count(&Call::Resume), 0);
    }

    #[test]
    fn test_switch_panics_notes_before_teardown() {
        let mut m = manager();
        switch_to(&mut m, "Synth");

        let mut notes = ActiveNoteSet::new();
        notes.note_on(note(60), Velocity::MAX, &mut m);
        notes.note_on(note(64), Velocity::MAX, &mut m);

        m.request_switch("Soft Pad", &mut notes).unwrap();
        assert!(notes.is_empty());

        let calls = &m.context().calls;
        let disconnect = calls.iter().rposition(|c| *c == Call::Disconnect).unwrap();
        let release_60 = calls.iter().position(|c| *c == Call::Release(note(60))).unwrap();
        let release_64 = calls.iter().position(|c| *c == Call::Release(note(64))).unwrap();
        assert!(release_60 < disconnect);
        assert!(release_64 < disconnect);
        drive(&mut m);
    }

    #[test]
    fn test_request_while_switching_is_rejected() {
        let mut m = manager();
        let mut notes = ActiveNoteSet::new();
        m.request_switch("Synth Lead", &mut notes).unwrap();

        let err = m.request_switch("Soft Pad", &mut notes).unwrap_err();
        assert_eq!(
            err,
            SwitchError::Busy {
                in_flight: "Synth Lead".into()
            }
        );
        assert_eq!(m.in_flight(), Some("Synth Lead"));
        assert_eq!(m.selection(), Some("Synth Lead"));

        match drive(&mut m) {
            SwitchOutcome::Ready { instrument, .. } => assert_eq!(instrument, "Synth Lead"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(m.context().current_name(), Some("Synth Lead"));
    }

    #[test]
    fn test_unknown_instrument_leaves_state_alone() {
        let mut m = manager();
        switch_to(&mut m, "Synth");
        let mut notes = ActiveNoteSet::new();
        let err = m.request_switch("Theremin", &mut notes).unwrap_err();
        assert_eq!(err, SwitchError::UnknownInstrument("Theremin".into()));
        assert_eq!(m.state(), RoutingState::Ready);
        assert_eq!(m.context().current_name(), Some("Synth"));
    }

    #[test]
    fn test_analyser_failure_falls_back_to_destination() {
        let mut m = manager();
        m.context_mut().analyser_broken = true;
        match switch_to(&mut m, "Synth") {
            SwitchOutcome::Ready { route, .. } => assert_eq!(route, RouteTarget::Destination),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(m.context().route, Some(RouteTarget::Destination));
    }

    #[test]
    fn test_attack_rejected_while_switching() {
        let mut m = manager();
        let mut notes = ActiveNoteSet::new();
        m.request_switch("Synth", &mut notes).unwrap();
        assert!(matches!(
            m.attack(note(60), Velocity::MAX),
            Err(AudioError::NotReady)
        ));
        // Membership is still tracked
        notes.note_on(note(60), Velocity::MAX, &mut m);
        assert!(notes.contains(note(60)));
        drive(&mut m);
    }

    #[test]
    fn test_retry_after_verify_failure() {
        let mut m = manager();
        m.context_mut().verify_script = vec![false].into();
        let outcome = switch_to(&mut m, "Synth Lead");
        assert!(matches!(outcome, SwitchOutcome::Ready { .. }));
        assert_eq!(m.context().count(&Call::Reset), 1);
        assert_eq!(m.context().count(&Call::Verify), 2);
    }

    #[test]
    fn test_retries_exhausted_restores_previous() {
        let mut m = manager();
        switch_to(&mut m, "Soft Pad");

        let outcome = switch_to(&mut m, "Broken");
        match outcome {
            SwitchOutcome::Failed {
                requested,
                error,
                restored,
            } => {
                assert_eq!(requested, "Broken");
                assert!(matches!(error, SwitchFailure::Load(LoadError::Io { .. })));
                assert_eq!(restored.as_deref(), Some("Soft Pad"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        // Two retries, each after a reset, plus the reset before restoring
        assert_eq!(m.context().count(&Call::Reset), 3);
        assert_eq!(m.state(), RoutingState::Failed);
        assert_eq!(m.selection(), Some("Soft Pad"));
        assert_eq!(m.current(), Some("Soft Pad"));
        assert_eq!(m.context().current_name(), Some("Soft Pad"));

        m.acknowledge();
        assert_eq!(m.state(), RoutingState::Idle);

        // The previous instrument is still usable and switchable
        assert!(m.attack(note(60), Velocity::MAX).is_ok());
        assert!(matches!(switch_to(&mut m, "Synth"), SwitchOutcome::Ready { .. }));
    }

    #[test]
    fn test_failure_without_previous_falls_back_to_default() {
        let mut m = manager();
        match switch_to(&mut m, "Broken") {
            SwitchOutcome::Failed { restored, .. } => {
                assert_eq!(restored.as_deref(), Some(DEFAULT_INSTRUMENT));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(m.selection(), Some(DEFAULT_INSTRUMENT));
        assert_eq!(m.context().current_name(), Some(DEFAULT_INSTRUMENT));
    }

    #[test]
    fn test_unrestorable_previous_falls_back_to_default() {
        let mut m = manager();
        switch_to(&mut m, "Soft Pad");
        m.context_mut().reject = vec!["Soft Pad".into(), "Synth Lead".into()];

        match switch_to(&mut m, "Synth Lead") {
            SwitchOutcome::Failed { restored, .. } => {
                assert_eq!(restored.as_deref(), Some(DEFAULT_INSTRUMENT));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(m.context().current_name(), Some(DEFAULT_INSTRUMENT));
    }

    #[test]
    fn test_nothing_left_when_context_is_dead() {
        let mut m = manager();
        m.context_mut().resume_script = vec![false; 10].into();

        match switch_to(&mut m, "Synth") {
            SwitchOutcome::Failed {
                error, restored, ..
            } => {
                assert!(matches!(error, SwitchFailure::Audio(AudioError::ResumeTimeout)));
                assert!(restored.is_none());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(m.current(), None);
        assert_eq!(m.selection(), None);
        assert!(m.context().current.is_none());
    }

    #[test]
    fn test_custom_retry_budget() {
        let mut m = manager();
        m.config.max_retries = 0;
        m.context_mut().verify_script = vec![false].into();
        let outcome = switch_to(&mut m, "Synth Lead");
        assert!(matches!(outcome, SwitchOutcome::Failed { .. }));
        // Only the reset before falling back
        assert_eq!(m.context().count(&Call::Reset), 1);
    }
}
