//! Instruments module
//!
//! Sound sources that can be routed into the playback context: a sample
//! player and an oscillator synth, plus the catalog describing them and
//! the background loader that builds them.

pub mod envelope;
pub mod loader;
pub mod oscillator;
pub mod sampler;
pub mod synth;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use envelope::{AdsrEnvelope, AdsrParams, EnvelopeStage};
pub use loader::{InstrumentLoader, PendingLoad};
pub use oscillator::{Oscillator, Waveform};
pub use sampler::{SampleData, Sampler};
pub use synth::Synth;

use crate::notes::{NoteId, Velocity};

/// Name of the built-in synth that is always available without I/O.
pub const DEFAULT_INSTRUMENT: &str = "Synth";

/// Errors raised while loading an instrument.
#[derive(Debug)]
pub enum LoadError {
    /// The catalog has no entry with this name.
    UnknownInstrument(String),
    /// Reading the sample file failed.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The sample file is not a readable WAV.
    Wav {
        path: PathBuf,
        source: hound::Error,
    },
    /// The sample file decoded to zero frames.
    EmptySample(PathBuf),
    /// The loader thread exited without a result.
    WorkerLost,
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::UnknownInstrument(name) => write!(f, "Unknown instrument: {}", name),
            LoadError::Io { path, source } => {
                write!(f, "Failed to read {}: {}", path.display(), source)
            }
            LoadError::Wav { path, source } => {
                write!(f, "Failed to decode {}: {}", path.display(), source)
            }
            LoadError::EmptySample(path) => write!(f, "Sample {} is empty", path.display()),
            LoadError::WorkerLost => write!(f, "Instrument loader stopped unexpectedly"),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Io { source, .. } => Some(source),
            LoadError::Wav { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// How an instrument is built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstrumentKind {
    Synth {
        #[serde(default)]
        waveform: Waveform,
        #[serde(default)]
        envelope: AdsrParams,
    },
    Sampler {
        path: PathBuf,
        #[serde(default = "default_root_note")]
        root_note: u8,
    },
}

fn default_root_note() -> u8 {
    NoteId::MIDDLE_C.midi()
}

/// A named catalog entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: InstrumentKind,
}

impl InstrumentSpec {
    pub fn synth(name: impl Into<String>, waveform: Waveform, envelope: AdsrParams) -> Self {
        Self {
            name: name.into(),
            kind: InstrumentKind::Synth { waveform, envelope },
        }
    }

    pub fn sampler(name: impl Into<String>, path: impl Into<PathBuf>, root: NoteId) -> Self {
        Self {
            name: name.into(),
            kind: InstrumentKind::Sampler {
                path: path.into(),
                root_note: root.midi(),
            },
        }
    }

    /// Build the instrument. Samplers read their file from disk.
    pub fn build(&self) -> Result<Instrument, LoadError> {
        let kind = match &self.kind {
            InstrumentKind::Synth { waveform, envelope } => {
                InstrumentVariant::Synth(Synth::new(*waveform, *envelope))
            }
            InstrumentKind::Sampler { path, root_note } => {
                let root = NoteId::from_midi_masked(*root_note);
                InstrumentVariant::Sampler(Sampler::from_file(path, root)?)
            }
        };
        Ok(Instrument {
            name: self.name.clone(),
            kind,
        })
    }
}

/// Catalog shipped with a fresh configuration.
pub fn default_catalog() -> Vec<InstrumentSpec> {
    vec![
        InstrumentSpec::synth(DEFAULT_INSTRUMENT, Waveform::Triangle, AdsrParams::default()),
        InstrumentSpec::synth(
            "Synth Lead",
            Waveform::Sawtooth,
            AdsrParams {
                attack: 0.01,
                decay: 0.2,
                sustain: 0.6,
                release: 0.3,
            },
        ),
        InstrumentSpec::synth(
            "Soft Pad",
            Waveform::Sine,
            AdsrParams {
                attack: 0.4,
                decay: 0.5,
                sustain: 0.7,
                release: 1.5,
            },
        ),
    ]
}

/// The concrete sound source.
#[derive(Clone, Debug)]
pub enum InstrumentVariant {
    Sampler(Sampler),
    Synth(Synth),
}

/// A loaded, named instrument.
#[derive(Clone, Debug)]
pub struct Instrument {
    name: String,
    kind: InstrumentVariant,
}

impl Instrument {
    pub fn new(name: impl Into<String>, kind: InstrumentVariant) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// The built-in synth. Never touches the filesystem.
    pub fn default_synth() -> Self {
        Self::new(DEFAULT_INSTRUMENT, InstrumentVariant::Synth(Synth::default()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variant(&self) -> &InstrumentVariant {
        &self.kind
    }

    pub fn prepare(&mut self, sample_rate: f32) {
        match &mut self.kind {
            InstrumentVariant::Sampler(s) => s.prepare(sample_rate),
            InstrumentVariant::Synth(s) => s.prepare(sample_rate),
        }
    }

    pub fn attack(&mut self, note: NoteId, velocity: Velocity) {
        match &mut self.kind {
            InstrumentVariant::Sampler(s) => s.attack(note, velocity),
            InstrumentVariant::Synth(s) => s.attack(note, velocity),
        }
    }

    pub fn release(&mut self, note: NoteId) {
        match &mut self.kind {
            InstrumentVariant::Sampler(s) => s.release(note),
            InstrumentVariant::Synth(s) => s.release(note),
        }
    }

    pub fn release_all(&mut self) {
        match &mut self.kind {
            InstrumentVariant::Sampler(s) => s.release_all(),
            InstrumentVariant::Synth(s) => s.release_all(),
        }
    }

    pub fn active_voices(&self) -> usize {
        match &self.kind {
            InstrumentVariant::Sampler(s) => s.active_voices(),
            InstrumentVariant::Synth(s) => s.active_voices(),
        }
    }

    /// Mix the instrument into `out`.
    pub fn render(&mut self, out: &mut [f32]) {
        match &mut self.kind {
            InstrumentVariant::Sampler(s) => s.render(out),
            InstrumentVariant::Synth(s) => s.render(out),
        }
    }
}
