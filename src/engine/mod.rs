//! Engine module
//!
//! Audio and MIDI plumbing.
//! Handles cpal integration, the audio-thread processor, the analyser tap and MIDI input.

pub mod analyser;
pub mod audio_engine;
pub mod audio_processor;
pub mod channels;
pub mod commands;
pub mod midi_engine;

pub use analyser::Analyser;
pub use audio_engine::{AudioEngine, AudioError};
pub use audio_processor::AudioProcessor;
pub use channels::{
    EngineChannels, EngineHandle, UiHandle, DEFAULT_COMMAND_BUFFER_SIZE, DEFAULT_EVENT_BUFFER_SIZE,
};
pub use commands::{EngineCommand, EngineEvent};
pub use midi_engine::{
    InputRouter, MidiError, MidiEvent, MidiInbox, MidiPortInfo, MidiRouter, RouterEvent,
};
