//! ADSR envelope for instrument voices.
//!
//! Generates an Attack-Decay-Sustain-Release amplitude curve driven by
//! note-on/note-off gates rather than a gate signal.

use serde::{Deserialize, Serialize};

/// Envelope stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeStage {
    /// Envelope is idle (output = 0).
    Idle,
    /// Attack phase: rising from 0 to 1.
    Attack,
    /// Decay phase: falling from 1 to sustain level.
    Decay,
    /// Sustain phase: holding at sustain level while the note is held.
    Sustain,
    /// Release phase: falling from current level to 0.
    Release,
}

/// Envelope timings in seconds and sustain level (0-1).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdsrParams {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Default for AdsrParams {
    fn default() -> Self {
        Self {
            attack: 0.005,
            decay: 0.1,
            sustain: 0.3,
            release: 1.0,
        }
    }
}

/// ADSR envelope generator.
///
/// Uses RC-style exponential segments that reach ~99.3% of the target in
/// the configured time.
#[derive(Clone, Debug)]
pub struct AdsrEnvelope {
    stage: EnvelopeStage,
    level: f32,
    params: AdsrParams,
    attack_coeff: f32,
    decay_coeff: f32,
    release_coeff: f32,
}

impl AdsrEnvelope {
    /// Threshold for considering the envelope "close enough" to target.
    const LEVEL_THRESHOLD: f32 = 0.0001;

    pub fn new(params: AdsrParams, sample_rate: f32) -> Self {
        let mut env = Self {
            stage: EnvelopeStage::Idle,
            level: 0.0,
            params,
            attack_coeff: 0.0,
            decay_coeff: 0.0,
            release_coeff: 0.0,
        };
        env.prepare(sample_rate);
        env
    }

    /// Recompute coefficients for a new sample rate.
    pub fn prepare(&mut self, sample_rate: f32) {
        self.attack_coeff = calc_coeff(self.params.attack, sample_rate);
        self.decay_coeff = calc_coeff(self.params.decay, sample_rate);
        self.release_coeff = calc_coeff(self.params.release, sample_rate);
    }

    /// Start (or restart from the current level) the attack.
    pub fn gate_on(&mut self) {
        self.stage = EnvelopeStage::Attack;
    }

    /// Enter release unless already idle.
    pub fn gate_off(&mut self) {
        if self.stage != EnvelopeStage::Idle {
            self.stage = EnvelopeStage::Release;
        }
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn is_active(&self) -> bool {
        self.stage != EnvelopeStage::Idle
    }

    /// Advance one sample and return the new level.
    pub fn next_sample(&mut self) -> f32 {
        let sustain = self.params.sustain.clamp(0.0, 1.0);
        match self.stage {
            EnvelopeStage::Idle => {}
            EnvelopeStage::Attack => {
                self.level = 1.0 - (1.0 - self.level) * self.attack_coeff;
                if self.level >= 1.0 - Self::LEVEL_THRESHOLD {
                    self.level = 1.0;
                    self.stage = EnvelopeStage::Decay;
                }
            }
            EnvelopeStage::Decay => {
                self.level = sustain + (self.level - sustain) * self.decay_coeff;
                if (self.level - sustain).abs() < Self::LEVEL_THRESHOLD {
                    self.level = sustain;
                    self.stage = EnvelopeStage::Sustain;
                }
            }
            EnvelopeStage::Sustain => {
                self.level = sustain;
            }
            EnvelopeStage::Release => {
                self.level *= self.release_coeff;
                if self.level < Self::LEVEL_THRESHOLD {
                    self.level = 0.0;
                    self.stage = EnvelopeStage::Idle;
                }
            }
        }
        self.level
    }

    pub fn reset(&mut self) {
        self.stage = EnvelopeStage::Idle;
        self.level = 0.0;
    }
}

/// Exponential coefficient for a segment of `time_seconds`.
///
/// For rising segments: level = 1.0 - (1.0 - level) * coeff.
/// For falling segments: level = level * coeff.
fn calc_coeff(time_seconds: f32, sample_rate: f32) -> f32 {
    let samples = time_seconds * sample_rate;
    if samples <= 1.0 {
        return 0.0;
    }
    (-5.0_f32 / samples).exp()
}
