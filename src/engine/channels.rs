//! Engine Channels
//!
//! Lock-free communication between the UI thread and audio engine thread.
//! Uses rtrb ring buffers for SPSC (single-producer, single-consumer) queues.

use rtrb::{Consumer, Producer, RingBuffer};

use super::commands::{EngineCommand, EngineEvent};

/// Default buffer size for command queue (UI -> Engine).
pub const DEFAULT_COMMAND_BUFFER_SIZE: usize = 1024;

/// Default buffer size for event queue (Engine -> UI).
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

/// Holds both directions of communication channels.
/// Split into producer/consumer pairs for the two threads.
pub struct EngineChannels {
    command_tx: Producer<EngineCommand>,
    command_rx: Consumer<EngineCommand>,
    event_tx: Producer<EngineEvent>,
    event_rx: Consumer<EngineEvent>,
}

impl EngineChannels {
    /// Create new engine channels with the specified buffer sizes.
    pub fn new(command_capacity: usize, event_capacity: usize) -> Self {
        let (command_tx, command_rx) = RingBuffer::new(command_capacity);
        let (event_tx, event_rx) = RingBuffer::new(event_capacity);

        Self {
            command_tx,
            command_rx,
            event_tx,
            event_rx,
        }
    }

    /// Create new channels with default buffer sizes.
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_COMMAND_BUFFER_SIZE, DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Split the channels into UI-side and Engine-side handles.
    pub fn split(self) -> (UiHandle, EngineHandle) {
        let ui_handle = UiHandle {
            command_tx: self.command_tx,
            event_rx: self.event_rx,
        };
        let engine_handle = EngineHandle {
            command_rx: self.command_rx,
            event_tx: self.event_tx,
        };
        (ui_handle, engine_handle)
    }
}

/// UI-side handle for communicating with the audio engine.
pub struct UiHandle {
    command_tx: Producer<EngineCommand>,
    event_rx: Consumer<EngineEvent>,
}

impl UiHandle {
    /// Send a command to the audio engine.
    /// Returns Err(cmd) if the buffer is full. Never blocks.
    pub fn send_command(&mut self, cmd: EngineCommand) -> Result<(), EngineCommand> {
        self.command_tx
            .push(cmd)
            .map_err(|rtrb::PushError::Full(cmd)| cmd)
    }

    /// Receive an event from the audio engine, if any.
    pub fn recv_event(&mut self) -> Option<EngineEvent> {
        self.event_rx.pop().ok()
    }

    /// Drain all pending events from the engine.
    pub fn drain_events(&mut self) -> impl Iterator<Item = EngineEvent> + '_ {
        std::iter::from_fn(|| self.recv_event())
    }

    /// Check if the command buffer is full.
    pub fn is_command_buffer_full(&self) -> bool {
        self.command_tx.is_full()
    }
}

/// Engine-side handle for communicating with the UI.
///
/// All methods are real-time safe (non-blocking, no allocations).
pub struct EngineHandle {
    command_rx: Consumer<EngineCommand>,
    event_tx: Producer<EngineEvent>,
}

impl EngineHandle {
    /// Receive a command from the UI.
    pub fn recv_command(&mut self) -> Option<EngineCommand> {
        self.command_rx.pop().ok()
    }

    /// Process all pending commands with the given handler, in order.
    pub fn process_commands<F>(&mut self, mut handler: F)
    where
        F: FnMut(EngineCommand),
    {
        while let Some(cmd) = self.recv_command() {
            handler(cmd);
        }
    }

    /// Try to send an event, dropping it silently if the buffer is full.
    pub fn send_event_lossy(&mut self, event: EngineEvent) {
        let _ = self.event_tx.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::{NoteId, Velocity};

    #[test]
    fn test_command_send_receive() {
        let (mut ui, mut engine) = EngineChannels::new(64, 64).split();

        let cmd = EngineCommand::NoteOn {
            note: NoteId::MIDDLE_C,
            velocity: Velocity::MAX,
        };
        assert!(ui.send_command(cmd).is_ok());
        assert_eq!(engine.recv_command(), Some(cmd));
        assert!(engine.recv_command().is_none());
    }

    #[test]
    fn test_event_send_receive() {
        let (mut ui, mut engine) = EngineChannels::new(64, 64).split();

        engine.send_event_lossy(EngineEvent::ProbeFinished { id: 7 });
        assert_eq!(ui.recv_event(), Some(EngineEvent::ProbeFinished { id: 7 }));
    }

    #[test]
    fn test_buffer_full_handling() {
        let (mut ui, _engine) = EngineChannels::new(2, 2).split();

        assert!(ui.send_command(EngineCommand::AllNotesOff).is_ok());
        assert!(ui.send_command(EngineCommand::AllNotesOff).is_ok());
        assert!(ui.is_command_buffer_full());

        let result = ui.send_command(EngineCommand::Probe { id: 1 });
        assert_eq!(result, Err(EngineCommand::Probe { id: 1 }));
    }

    #[test]
    fn test_process_commands_in_order() {
        let (mut ui, mut engine) = EngineChannels::with_defaults().split();

        ui.send_command(EngineCommand::Probe { id: 1 }).unwrap();
        ui.send_command(EngineCommand::AllNotesOff).unwrap();
        ui.send_command(EngineCommand::Probe { id: 2 }).unwrap();

        let mut seen = Vec::new();
        engine.process_commands(|cmd| seen.push(cmd));
        assert_eq!(
            seen,
            vec![
                EngineCommand::Probe { id: 1 },
                EngineCommand::AllNotesOff,
                EngineCommand::Probe { id: 2 },
            ]
        );
    }

    #[test]
    fn test_drain_events() {
        let (mut ui, mut engine) = EngineChannels::new(64, 64).split();

        engine.send_event_lossy(EngineEvent::OutputLevel(0.1));
        engine.send_event_lossy(EngineEvent::ProbeFailed { id: 3 });

        let events: Vec<_> = ui.drain_events().collect();
        assert_eq!(events.len(), 2);
        assert!(ui.recv_event().is_none());
    }

    #[test]
    fn test_handles_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<UiHandle>();
        assert_send::<EngineHandle>();
    }
}
