//! Audio Engine
//!
//! Manages the cpal output stream and implements the playback context the
//! routing manager drives. The audio callback runs in a separate thread and
//! must be real-time safe.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleRate, Stream, StreamConfig};
use log::{debug, error, info, warn};

use super::analyser::Analyser;
use super::audio_processor::{AudioProcessor, PROBE_DURATION};
use super::channels::{EngineChannels, UiHandle};
use super::commands::{EngineCommand, EngineEvent};
use crate::instruments::Instrument;
use crate::notes::{NoteId, Velocity};
use crate::routing::{ConnectFailure, ContextState, PlaybackContext, RouteTarget};

/// Errors that can occur during audio engine operation.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// No audio output device was found.
    NoOutputDevice,
    /// Failed to get device configuration.
    ConfigurationFailed(String),
    /// Failed to create the audio stream.
    StreamCreationFailed(String),
    /// Failed to start/stop playback.
    StreamPlaybackFailed(String),
    /// The stream reported an error while running.
    StreamError(String),
    /// The context is closed and must be reset.
    ContextClosed,
    /// Playback did not start within the allowed time.
    ResumeTimeout,
    /// The graph is being rewired.
    NotReady,
    /// No instrument is connected.
    NoInstrument,
    /// The analyser is disabled or missing.
    AnalyserUnavailable,
    /// The probe tone could not be played.
    VerifyFailed,
    /// The probe tone did not complete within the allowed time.
    VerifyTimeout,
    /// The command queue to the audio thread is full.
    CommandQueueFull,
    /// The audio processor lock was poisoned.
    LockPoisoned,
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::NoOutputDevice => write!(f, "No audio output device found"),
            AudioError::ConfigurationFailed(msg) => {
                write!(f, "Failed to get device configuration: {}", msg)
            }
            AudioError::StreamCreationFailed(msg) => {
                write!(f, "Failed to create audio stream: {}", msg)
            }
            AudioError::StreamPlaybackFailed(msg) => {
                write!(f, "Failed to control audio playback: {}", msg)
            }
            AudioError::StreamError(msg) => write!(f, "Audio stream error: {}", msg),
            AudioError::ContextClosed => write!(f, "Audio output is closed"),
            AudioError::ResumeTimeout => write!(f, "Audio output did not start in time"),
            AudioError::NotReady => write!(f, "Instrument not ready"),
            AudioError::NoInstrument => write!(f, "No instrument connected"),
            AudioError::AnalyserUnavailable => write!(f, "Analyser unavailable"),
            AudioError::VerifyFailed => write!(f, "Test tone failed to play"),
            AudioError::VerifyTimeout => write!(f, "Test tone did not complete in time"),
            AudioError::CommandQueueFull => write!(f, "Audio command queue is full"),
            AudioError::LockPoisoned => write!(f, "Audio processor lock poisoned"),
        }
    }
}

impl std::error::Error for AudioError {}

/// Poll interval while waiting on the audio thread.
const WAIT_STEP: Duration = Duration::from_millis(2);

/// The cpal-backed playback context.
pub struct AudioEngine {
    host: Host,
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    state: ContextState,
    processor: Arc<Mutex<AudioProcessor>>,
    ui: UiHandle,
    callbacks: Arc<AtomicU64>,
    analyser: Option<Analyser>,
    analyser_enabled: bool,
    fft_size: usize,
    route: Option<RouteTarget>,
    /// Set by the stream's error callback.
    stream_error: Arc<Mutex<Option<String>>>,
    next_probe: u32,
    output_level: f32,
}

impl AudioEngine {
    /// Create an engine on the default output device.
    ///
    /// The stream is not started until `resume`.
    pub fn new(fft_size: usize, analyser_enabled: bool) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let (device, config) = default_output(&host)?;

        let parts = GraphParts::build(&config, fft_size, analyser_enabled);
        info!(
            "Audio output: {} ({} Hz, {} channels)",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            config.sample_rate.0,
            config.channels
        );

        Ok(Self {
            host,
            device,
            config,
            stream: None,
            state: ContextState::Suspended,
            processor: parts.processor,
            ui: parts.ui,
            callbacks: parts.callbacks,
            analyser: parts.analyser,
            analyser_enabled,
            fft_size,
            route: None,
            stream_error: Arc::new(Mutex::new(None)),
            next_probe: 0,
            output_level: 0.0,
        })
    }

    /// Get the name of the currently selected device.
    pub fn current_device_name(&self) -> String {
        self.device.name().unwrap_or_else(|_| "Unknown".to_string())
    }

    /// Get the sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Get the number of output channels.
    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    /// Peak output level from the most recent report.
    pub fn output_level(&self) -> f32 {
        self.output_level
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::OutputLevel(level) => self.output_level = level,
            EngineEvent::NoteDropped(note) => debug!("Note {} dropped: no instrument", note),
            EngineEvent::ProbeFinished { id } | EngineEvent::ProbeFailed { id } => {
                debug!("Stale probe {} result ignored", id)
            }
        }
    }

    /// Build and start the output stream.
    fn start_stream(&mut self) -> Result<(), AudioError> {
        let channels = self.config.channels as usize;
        let processor = Arc::clone(&self.processor);
        let stream_error = Arc::clone(&self.stream_error);

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // The UI thread only holds the lock briefly while swapping instruments
                    if let Ok(mut proc) = processor.try_lock() {
                        proc.process(data, channels);
                    } else {
                        data.fill(0.0);
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    if let Ok(mut slot) = stream_error.lock() {
                        *slot = Some(err.to_string());
                    }
                },
                None,
            )
            .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamPlaybackFailed(e.to_string()))?;

        self.stream = Some(stream);
        Ok(())
    }

    fn lock_processor(&self) -> Result<std::sync::MutexGuard<'_, AudioProcessor>, AudioError> {
        self.processor.lock().map_err(|_| AudioError::LockPoisoned)
    }

    fn send(&mut self, cmd: EngineCommand) -> Result<(), AudioError> {
        self.ui
            .send_command(cmd)
            .map_err(|_| AudioError::CommandQueueFull)
    }
}

impl PlaybackContext for AudioEngine {
    fn state(&self) -> ContextState {
        self.state
    }

    fn resume(&mut self, timeout: Duration) -> Result<(), AudioError> {
        match self.state {
            ContextState::Running => return Ok(()),
            ContextState::Closed => return Err(AudioError::ContextClosed),
            ContextState::Suspended => {}
        }

        let start = self.callbacks.load(Ordering::Acquire);
        match &self.stream {
            Some(stream) => stream
                .play()
                .map_err(|e| AudioError::StreamPlaybackFailed(e.to_string()))?,
            None => self.start_stream()?,
        }

        let deadline = Instant::now() + timeout;
        while self.callbacks.load(Ordering::Acquire) == start {
            if Instant::now() >= deadline {
                warn!("Audio output did not start within {:?}", timeout);
                return Err(AudioError::ResumeTimeout);
            }
            std::thread::sleep(WAIT_STEP);
        }

        self.state = ContextState::Running;
        debug!("Audio output running");
        Ok(())
    }

    fn reset(&mut self) -> Result<(), AudioError> {
        info!("Resetting audio output");
        self.stream = None;
        self.route = None;
        self.state = ContextState::Suspended;
        if let Ok(mut slot) = self.stream_error.lock() {
            *slot = None;
        }

        // Pick up a new default device if the old one went away
        let reacquired = match default_output(&self.host) {
            Ok((device, config)) => {
                self.device = device;
                self.config = config;
                Ok(())
            }
            Err(e) => Err(e),
        };

        let parts = GraphParts::build(&self.config, self.fft_size, self.analyser_enabled);
        self.processor = parts.processor;
        self.ui = parts.ui;
        self.callbacks = parts.callbacks;
        self.analyser = parts.analyser;

        reacquired
    }

    fn connect(
        &mut self,
        instrument: Instrument,
        target: RouteTarget,
    ) -> Result<(), ConnectFailure> {
        let refused = match (self.state, target) {
            (ContextState::Closed, _) => Some(AudioError::ContextClosed),
            (_, RouteTarget::Analyser) if self.analyser.is_none() => {
                Some(AudioError::AnalyserUnavailable)
            }
            _ => None,
        };
        if let Some(error) = refused {
            return Err(ConnectFailure { error, instrument });
        }

        let previous = match self.lock_processor() {
            Ok(mut proc) => proc.set_instrument(instrument, target),
            Err(error) => return Err(ConnectFailure { error, instrument }),
        };
        if let Some(previous) = previous {
            debug!("Replaced connected instrument '{}'", previous.name());
        }

        if target == RouteTarget::Analyser {
            if let Some(analyser) = self.analyser.as_mut() {
                analyser.reset();
            }
        }
        self.route = Some(target);
        Ok(())
    }

    fn disconnect(&mut self) -> Option<Instrument> {
        self.route = None;
        match self.lock_processor() {
            Ok(mut proc) => proc.take_instrument(),
            Err(e) => {
                warn!("Disconnect failed: {}", e);
                None
            }
        }
    }

    fn route(&self) -> Option<RouteTarget> {
        self.route
    }

    fn verify_route(&mut self, timeout: Duration) -> Result<(), AudioError> {
        if self.route.is_none() {
            return Err(AudioError::NoInstrument);
        }
        if self.state != ContextState::Running {
            return Err(AudioError::NotReady);
        }

        self.next_probe = self.next_probe.wrapping_add(1);
        let id = self.next_probe;
        self.send(EngineCommand::Probe { id })?;

        let deadline = Instant::now() + timeout + Duration::from_secs_f32(PROBE_DURATION);
        loop {
            while let Some(event) = self.ui.recv_event() {
                match event {
                    EngineEvent::ProbeFinished { id: done } if done == id => {
                        debug!("Probe {} completed", id);
                        return Ok(());
                    }
                    EngineEvent::ProbeFailed { id: failed } if failed == id => {
                        return Err(AudioError::VerifyFailed);
                    }
                    other => self.handle_event(other),
                }
            }
            if Instant::now() >= deadline {
                return Err(AudioError::VerifyTimeout);
            }
            std::thread::sleep(WAIT_STEP);
        }
    }

    fn attack(&mut self, note: NoteId, velocity: Velocity) -> Result<(), AudioError> {
        if self.state != ContextState::Running {
            return Err(AudioError::NotReady);
        }
        if self.route.is_none() {
            return Err(AudioError::NoInstrument);
        }
        self.send(EngineCommand::NoteOn { note, velocity })
    }

    fn release(&mut self, note: NoteId) -> Result<(), AudioError> {
        // Nothing can be sounding without an instrument
        if self.route.is_none() {
            return Ok(());
        }
        self.send(EngineCommand::NoteOff { note })
    }

    fn release_all(&mut self) -> Result<(), AudioError> {
        if self.route.is_none() {
            return Ok(());
        }
        self.send(EngineCommand::AllNotesOff)
    }

    fn analyser_mut(&mut self) -> Option<&mut Analyser> {
        match self.route {
            Some(RouteTarget::Analyser) => self.analyser.as_mut(),
            _ => None,
        }
    }

    fn pump(&mut self) {
        while let Some(event) = self.ui.recv_event() {
            self.handle_event(event);
        }
    }

    fn take_error(&mut self) -> Option<AudioError> {
        let message = self.stream_error.lock().ok()?.take()?;
        // The stream is unusable until the context is reset
        self.stream = None;
        self.state = ContextState::Closed;
        Some(AudioError::StreamError(message))
    }
}

/// Freshly built audio-thread state.
struct GraphParts {
    processor: Arc<Mutex<AudioProcessor>>,
    ui: UiHandle,
    callbacks: Arc<AtomicU64>,
    analyser: Option<Analyser>,
}

impl GraphParts {
    fn build(config: &StreamConfig, fft_size: usize, analyser_enabled: bool) -> Self {
        let (ui, engine) = EngineChannels::with_defaults().split();
        let (tap, analyser) = if analyser_enabled {
            let (tap, analyser) = Analyser::with_tap(fft_size);
            (Some(tap), Some(analyser))
        } else {
            (None, None)
        };

        let processor = AudioProcessor::new(config.sample_rate.0 as f32, 1024, engine, tap);
        let callbacks = processor.callback_counter();
        Self {
            processor: Arc::new(Mutex::new(processor)),
            ui,
            callbacks,
            analyser,
        }
    }
}

fn default_output(host: &Host) -> Result<(Device, StreamConfig), AudioError> {
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)?;

    let supported_config = device
        .default_output_config()
        .map_err(|e| AudioError::ConfigurationFailed(e.to_string()))?;

    let config = StreamConfig {
        channels: supported_config.channels(),
        sample_rate: SampleRate(supported_config.sample_rate().0),
        buffer_size: cpal::BufferSize::Default,
    };
    Ok((device, config))
}
