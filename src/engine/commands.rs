//! Engine Commands and Events
//!
//! Defines the messages that flow between the UI thread and the audio engine thread.
//! All types here must be Send + 'static for safe cross-thread communication.

use crate::notes::{NoteId, Velocity};

/// Commands sent from the UI thread to the audio engine.
/// These are processed non-blocking in the audio callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineCommand {
    /// Start a note on the connected instrument.
    NoteOn {
        /// Note to start.
        note: NoteId,
        /// Normalized velocity.
        velocity: Velocity,
    },

    /// Release a note on the connected instrument.
    NoteOff {
        /// Note to release.
        note: NoteId,
    },

    /// Release every note on the connected instrument.
    AllNotesOff,

    /// Play a near-silent probe through the current route and report back.
    Probe {
        /// Identifier echoed in the matching event.
        id: u32,
    },
}

/// Events sent from the audio engine to the UI thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEvent {
    /// The probe tone rendered through the route without error.
    ProbeFinished {
        /// Identifier from the probe command.
        id: u32,
    },

    /// The probe could not be played (no instrument in the graph).
    ProbeFailed {
        /// Identifier from the probe command.
        id: u32,
    },

    /// A note command arrived while no instrument was connected.
    NoteDropped(NoteId),

    /// Peak output level of the last callback.
    OutputLevel(f32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_are_send() {
        fn assert_send<T: Send + 'static>() {}
        assert_send::<EngineCommand>();
        assert_send::<EngineEvent>();
    }

    #[test]
    fn test_command_equality() {
        let a = EngineCommand::NoteOn {
            note: NoteId::MIDDLE_C,
            velocity: Velocity::MAX,
        };
        assert_eq!(a, a);
        assert_ne!(a, EngineCommand::AllNotesOff);
    }
}
