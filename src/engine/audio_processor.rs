//! Audio Processor
//!
//! Runs in the audio callback: applies note commands from the UI thread to
//! the connected instrument, renders it and feeds the analyser tap when the
//! instrument is routed through the analyser.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::Producer;

use super::channels::EngineHandle;
use super::commands::{EngineCommand, EngineEvent};
use crate::instruments::Instrument;
use crate::notes::{NoteId, Velocity};
use crate::routing::RouteTarget;

/// Note used for the routing probe tone.
pub const PROBE_NOTE: NoteId = NoteId::A4;

/// Probe tone duration in seconds.
pub const PROBE_DURATION: f32 = 0.05;

struct ActiveProbe {
    id: u32,
    remaining: usize,
}

/// Audio processor that runs in the audio callback.
///
/// The processor is shared with the UI thread behind a mutex so the
/// routing code can swap instruments; the callback only ever `try_lock`s it.
pub struct AudioProcessor {
    sample_rate: f32,
    instrument: Option<Instrument>,
    route: Option<RouteTarget>,
    /// Producer end of the analyser tap, if an analyser exists.
    tap: Option<Producer<f32>>,
    /// Handle for receiving commands from the UI thread.
    engine_handle: EngineHandle,
    /// Mono mix scratch buffer.
    scratch: Vec<f32>,
    probe: Option<ActiveProbe>,
    /// Incremented once per callback so the UI thread can see the stream run.
    callbacks: Arc<AtomicU64>,
    frame_counter: u32,
}

impl AudioProcessor {
    /// How often to report the output level (in audio callbacks).
    const LEVEL_REPORT_INTERVAL: u32 = 8;

    pub fn new(
        sample_rate: f32,
        block_size: usize,
        engine_handle: EngineHandle,
        tap: Option<Producer<f32>>,
    ) -> Self {
        Self {
            sample_rate,
            instrument: None,
            route: None,
            tap,
            engine_handle,
            scratch: vec![0.0; block_size],
            probe: None,
            callbacks: Arc::new(AtomicU64::new(0)),
            frame_counter: 0,
        }
    }

    /// Shared callback counter.
    pub fn callback_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.callbacks)
    }

    pub fn has_tap(&self) -> bool {
        self.tap.is_some()
    }

    /// Install an instrument, returning the previous one.
    pub fn set_instrument(
        &mut self,
        mut instrument: Instrument,
        route: RouteTarget,
    ) -> Option<Instrument> {
        instrument.prepare(self.sample_rate);
        self.route = Some(route);
        self.instrument.replace(instrument)
    }

    /// Remove the connected instrument, silencing it first.
    pub fn take_instrument(&mut self) -> Option<Instrument> {
        self.route = None;
        self.probe = None;
        let mut instrument = self.instrument.take()?;
        instrument.release_all();
        Some(instrument)
    }

    pub fn route(&self) -> Option<RouteTarget> {
        self.route
    }

    /// Processes a block of interleaved audio.
    pub fn process(&mut self, output: &mut [f32], channels: usize) {
        self.process_commands();

        output.fill(0.0);
        let channels = channels.max(1);
        let num_frames = output.len() / channels;

        if self.scratch.len() < num_frames {
            self.scratch.resize(num_frames, 0.0);
        }
        let mono = &mut self.scratch[..num_frames];
        mono.fill(0.0);

        if let Some(instrument) = self.instrument.as_mut() {
            instrument.render(mono);
        }

        for (frame, &sample) in output.chunks_mut(channels).zip(mono.iter()) {
            frame.fill(sample);
        }

        if self.route == Some(RouteTarget::Analyser) {
            if let Some(tap) = self.tap.as_mut() {
                for &sample in mono.iter() {
                    // Analyser fell behind; it only needs the latest frames
                    if tap.push(sample).is_err() {
                        break;
                    }
                }
            }
        }

        let peak = mono.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        self.advance_probe(num_frames);

        self.frame_counter += 1;
        if self.frame_counter >= Self::LEVEL_REPORT_INTERVAL {
            self.frame_counter = 0;
            self.engine_handle
                .send_event_lossy(EngineEvent::OutputLevel(peak));
        }

        self.callbacks.fetch_add(1, Ordering::Release);
    }

    fn process_commands(&mut self) {
        while let Some(cmd) = self.engine_handle.recv_command() {
            self.handle_command(cmd);
        }
    }

    fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::NoteOn { note, velocity } => match self.instrument.as_mut() {
                Some(instrument) => instrument.attack(note, velocity),
                None => self
                    .engine_handle
                    .send_event_lossy(EngineEvent::NoteDropped(note)),
            },
            EngineCommand::NoteOff { note } => {
                if let Some(instrument) = self.instrument.as_mut() {
                    instrument.release(note);
                }
            }
            EngineCommand::AllNotesOff => {
                if let Some(instrument) = self.instrument.as_mut() {
                    instrument.release_all();
                }
            }
            EngineCommand::Probe { id } => match self.instrument.as_mut() {
                Some(instrument) => {
                    instrument.attack(PROBE_NOTE, Velocity::PROBE);
                    self.probe = Some(ActiveProbe {
                        id,
                        remaining: (PROBE_DURATION * self.sample_rate) as usize,
                    });
                }
                None => self
                    .engine_handle
                    .send_event_lossy(EngineEvent::ProbeFailed { id }),
            },
        }
    }

    fn advance_probe(&mut self, frames: usize) {
        let Some(probe) = self.probe.as_mut() else {
            return;
        };
        probe.remaining = probe.remaining.saturating_sub(frames);
        if probe.remaining > 0 {
            return;
        }

        let id = probe.id;
        self.probe = None;
        let event = match self.instrument.as_mut() {
            Some(instrument) => {
                instrument.release(PROBE_NOTE);
                EngineEvent::ProbeFinished { id }
            }
            None => EngineEvent::ProbeFailed { id },
        };
        self.engine_handle.send_event_lossy(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::analyser::Analyser;
    use crate::engine::EngineChannels;

    fn processor_with_tap() -> (crate::engine::UiHandle, AudioProcessor, Analyser) {
        let (ui, engine) = EngineChannels::with_defaults().split();
        let (tap, analyser) = Analyser::with_tap(256);
        (ui, AudioProcessor::new(44100.0, 256, engine, Some(tap)), analyser)
    }

    #[test]
    fn test_silence_without_instrument() {
        let (_ui, engine) = EngineChannels::with_defaults().split();
        let mut processor = AudioProcessor::new(44100.0, 256, engine, None);

        let mut output = vec![1.0; 512];
        processor.process(&mut output, 2);
        assert!(output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_note_on_renders_to_all_channels() {
        let (mut ui, mut processor, _analyser) = processor_with_tap();
        processor.set_instrument(Instrument::default_synth(), RouteTarget::Destination);

        ui.send_command(EngineCommand::NoteOn {
            note: NoteId::A4,
            velocity: Velocity::MAX,
        })
        .unwrap();

        let mut output = vec![0.0; 512];
        processor.process(&mut output, 2);
        assert!(output.iter().any(|&s| s != 0.0));
        for frame in output.chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn test_note_without_instrument_is_dropped() {
        let (mut ui, mut processor, _analyser) = processor_with_tap();
        ui.send_command(EngineCommand::NoteOn {
            note: NoteId::MIDDLE_C,
            velocity: Velocity::MAX,
        })
        .unwrap();

        let mut output = vec![0.0; 64];
        processor.process(&mut output, 2);
        assert_eq!(
            ui.recv_event(),
            Some(EngineEvent::NoteDropped(NoteId::MIDDLE_C))
        );
    }

    #[test]
    fn test_probe_finishes_after_duration() {
        let (mut ui, mut processor, _analyser) = processor_with_tap();
        processor.set_instrument(Instrument::default_synth(), RouteTarget::Analyser);
        ui.send_command(EngineCommand::Probe { id: 9 }).unwrap();

        // 50 ms at 44.1 kHz is 2205 frames; 10 blocks of 256 cover it
        let mut output = vec![0.0; 512];
        let mut finished = false;
        for _ in 0..10 {
            processor.process(&mut output, 2);
            finished |= ui
                .drain_events()
                .any(|e| e == EngineEvent::ProbeFinished { id: 9 });
        }
        assert!(finished);
    }

    #[test]
    fn test_probe_fails_without_instrument() {
        let (mut ui, mut processor, _analyser) = processor_with_tap();
        ui.send_command(EngineCommand::Probe { id: 4 }).unwrap();
        let mut output = vec![0.0; 64];
        processor.process(&mut output, 2);
        assert_eq!(ui.recv_event(), Some(EngineEvent::ProbeFailed { id: 4 }));
    }

    #[test]
    fn test_tap_only_fed_through_analyser_route() {
        let (mut ui, mut processor, mut analyser) = processor_with_tap();
        processor.set_instrument(Instrument::default_synth(), RouteTarget::Destination);
        ui.send_command(EngineCommand::NoteOn {
            note: NoteId::A4,
            velocity: Velocity::MAX,
        })
        .unwrap();

        let mut output = vec![0.0; 512];
        processor.process(&mut output, 2);
        let mut bins = vec![0.0; 128];
        analyser.frequency_data(&mut bins);
        assert!(bins.iter().all(|&b| b == 0.0));

        let inst = processor.take_instrument().unwrap();
        processor.set_instrument(inst, RouteTarget::Analyser);
        ui.send_command(EngineCommand::NoteOn {
            note: NoteId::A4,
            velocity: Velocity::MAX,
        })
        .unwrap();
        for _ in 0..4 {
            processor.process(&mut output, 2);
        }
        analyser.frequency_data(&mut bins);
        assert!(bins.iter().any(|&b| b > 0.0));
    }

    #[test]
    fn test_callback_counter_advances() {
        let (_ui, mut processor, _analyser) = processor_with_tap();
        let counter = processor.callback_counter();
        let mut output = vec![0.0; 64];
        processor.process(&mut output, 2);
        processor.process(&mut output, 2);
        assert_eq!(counter.load(Ordering::Acquire), 2);
    }

    #[test]
    fn test_take_instrument_clears_route() {
        let (_ui, mut processor, _analyser) = processor_with_tap();
        assert!(processor.take_instrument().is_none());
        processor.set_instrument(Instrument::default_synth(), RouteTarget::Analyser);
        assert_eq!(processor.route(), Some(RouteTarget::Analyser));
        let inst = processor.take_instrument().unwrap();
        assert_eq!(inst.name(), "Synth");
        assert_eq!(processor.route(), None);
    }
}
