//! Phase-accumulator oscillator with basic waveforms.

use std::f32::consts::TAU;

use serde::{Deserialize, Serialize};

/// Oscillator waveform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    Sine,
    #[default]
    Triangle,
    Square,
    Sawtooth,
}

impl Waveform {
    pub const ALL: [Waveform; 4] = [
        Waveform::Sine,
        Waveform::Triangle,
        Waveform::Square,
        Waveform::Sawtooth,
    ];

    /// Sample the waveform at `phase` in 0.0..1.0. Output is -1.0..=1.0.
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (phase * TAU).sin(),
            Waveform::Triangle => {
                if phase < 0.25 {
                    4.0 * phase
                } else if phase < 0.75 {
                    2.0 - 4.0 * phase
                } else {
                    4.0 * phase - 4.0
                }
            }
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * phase - 1.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Waveform::Sine => "Sine",
            Waveform::Triangle => "Triangle",
            Waveform::Square => "Square",
            Waveform::Sawtooth => "Sawtooth",
        }
    }
}

/// A single oscillator.
#[derive(Clone, Debug)]
pub struct Oscillator {
    waveform: Waveform,
    /// Current phase accumulator (0.0 to 1.0).
    phase: f32,
    increment: f32,
}

impl Oscillator {
    pub fn new(waveform: Waveform) -> Self {
        Self {
            waveform,
            phase: 0.0,
            increment: 0.0,
        }
    }

    pub fn set_frequency(&mut self, frequency: f32, sample_rate: f32) {
        self.increment = if sample_rate > 0.0 {
            frequency / sample_rate
        } else {
            0.0
        };
    }

    pub fn reset_phase(&mut self) {
        self.phase = 0.0;
    }

    /// Produce the next sample and advance.
    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        let out = self.waveform.sample(self.phase);
        self.phase += self.increment;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }
        out
    }
}
