//! WAV-backed sampler instrument.
//!
//! The whole file is decoded up front into a mono buffer. Playback pitches
//! the sample relative to its root note using linear interpolation.

use std::path::Path;
use std::sync::Arc;

use super::LoadError;
use crate::notes::{NoteId, Velocity};

/// Maximum number of overlapping sample voices.
pub const MAX_SAMPLE_VOICES: usize = 16;

/// Release fade length in seconds.
const RELEASE_TIME: f32 = 0.25;

const MASTER_GAIN: f32 = 0.5;

/// Decoded sample data shared between instrument copies.
#[derive(Debug)]
pub struct SampleData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl SampleData {
    /// Decode a WAV file and mix all channels down to mono.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let mut reader = hound::WavReader::open(path).map_err(|e| match e {
            hound::Error::IoError(io) => LoadError::Io {
                path: path.to_path_buf(),
                source: io,
            },
            other => LoadError::Wav {
                path: path.to_path_buf(),
                source: other,
            },
        })?;

        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|source| LoadError::Wav {
                    path: path.to_path_buf(),
                    source,
                })?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<_, _>>()
                    .map_err(|source| LoadError::Wav {
                        path: path.to_path_buf(),
                        source,
                    })?
            }
        };

        let samples: Vec<f32> = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        if samples.is_empty() {
            return Err(LoadError::EmptySample(path.to_path_buf()));
        }

        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
        })
    }

    /// Interpolated read at a fractional frame position.
    fn read(&self, position: f64) -> f32 {
        let index = position as usize;
        let frac = (position - index as f64) as f32;
        let a = self.samples.get(index).copied().unwrap_or(0.0);
        let b = self.samples.get(index + 1).copied().unwrap_or(0.0);
        a + (b - a) * frac
    }
}

#[derive(Clone, Debug)]
struct SampleVoice {
    note: NoteId,
    position: f64,
    rate: f64,
    gain: f32,
    /// Per-sample gain decrement once released; zero while held.
    fade: f32,
}

/// Pitched one-shot sample player.
#[derive(Clone, Debug)]
pub struct Sampler {
    data: Arc<SampleData>,
    root: NoteId,
    sample_rate: f32,
    voices: Vec<SampleVoice>,
}

impl Sampler {
    pub fn new(data: Arc<SampleData>, root: NoteId) -> Self {
        Self {
            data,
            root,
            sample_rate: 44100.0,
            voices: Vec::with_capacity(MAX_SAMPLE_VOICES),
        }
    }

    /// Load a sampler from a WAV file on disk.
    pub fn from_file(path: &Path, root: NoteId) -> Result<Self, LoadError> {
        let data = SampleData::load(path)?;
        Ok(Self::new(Arc::new(data), root))
    }

    pub fn root(&self) -> NoteId {
        self.root
    }

    pub fn prepare(&mut self, sample_rate: f32) {
        if sample_rate > 0.0 {
            self.sample_rate = sample_rate;
        }
    }

    fn playback_rate(&self, note: NoteId) -> f64 {
        let semis = note.midi() as f64 - self.root.midi() as f64;
        2f64.powf(semis / 12.0) * self.data.sample_rate as f64 / self.sample_rate as f64
    }

    pub fn attack(&mut self, note: NoteId, velocity: Velocity) {
        let voice = SampleVoice {
            note,
            position: 0.0,
            rate: self.playback_rate(note),
            gain: velocity.value(),
            fade: 0.0,
        };

        if let Some(existing) = self.voices.iter_mut().find(|v| v.note == note) {
            *existing = voice;
        } else if self.voices.len() < MAX_SAMPLE_VOICES {
            self.voices.push(voice);
        } else {
            // Steal the voice furthest along
            if let Some(oldest) = self
                .voices
                .iter_mut()
                .max_by(|a, b| a.position.total_cmp(&b.position))
            {
                *oldest = voice;
            }
        }
    }

    pub fn release(&mut self, note: NoteId) {
        let step = self.fade_step();
        for voice in self.voices.iter_mut().filter(|v| v.note == note) {
            if voice.fade == 0.0 {
                voice.fade = voice.gain * step;
            }
        }
    }

    pub fn release_all(&mut self) {
        let step = self.fade_step();
        for voice in &mut self.voices {
            if voice.fade == 0.0 {
                voice.fade = voice.gain * step;
            }
        }
    }

    fn fade_step(&self) -> f32 {
        1.0 / (RELEASE_TIME * self.sample_rate).max(1.0)
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Add this sampler's output into `out` (mono).
    pub fn render(&mut self, out: &mut [f32]) {
        let len = self.data.samples.len() as f64;
        for voice in &mut self.voices {
            for sample in out.iter_mut() {
                if voice.position >= len || voice.gain <= 0.0 {
                    voice.gain = 0.0;
                    break;
                }
                *sample += self.data.read(voice.position) * voice.gain * MASTER_GAIN;
                voice.position += voice.rate;
                voice.gain -= voice.fade;
            }
        }
        self.voices
            .retain(|v| v.gain > 0.0 && v.position < len);
    }
}
