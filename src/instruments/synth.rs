//! Polyphonic oscillator synthesizer voice.

use super::envelope::{AdsrEnvelope, AdsrParams};
use super::oscillator::{Oscillator, Waveform};
use crate::notes::{NoteId, Velocity};

/// Maximum number of simultaneously sounding voices.
pub const MAX_VOICES: usize = 16;

/// Output gain applied to the voice sum to leave headroom.
const MASTER_GAIN: f32 = 0.25;

#[derive(Clone, Debug)]
struct Voice {
    note: NoteId,
    velocity: f32,
    held: bool,
    /// Monotonic counter used to pick the oldest voice to steal.
    started_at: u64,
    oscillator: Oscillator,
    envelope: AdsrEnvelope,
}

/// Oscillator + ADSR synthesizer with voice stealing.
#[derive(Clone, Debug)]
pub struct Synth {
    waveform: Waveform,
    envelope: AdsrParams,
    sample_rate: f32,
    voices: Vec<Voice>,
    counter: u64,
}

impl Synth {
    pub fn new(waveform: Waveform, envelope: AdsrParams) -> Self {
        Self {
            waveform,
            envelope,
            sample_rate: 44100.0,
            voices: Vec::with_capacity(MAX_VOICES),
            counter: 0,
        }
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn prepare(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        for voice in &mut self.voices {
            voice.oscillator.set_frequency(voice.note.frequency(), sample_rate);
            voice.envelope.prepare(sample_rate);
        }
    }

    pub fn attack(&mut self, note: NoteId, velocity: Velocity) {
        self.counter += 1;

        // Retrigger a voice already playing this note
        if let Some(voice) = self.voices.iter_mut().find(|v| v.note == note) {
            voice.velocity = velocity.value();
            voice.held = true;
            voice.started_at = self.counter;
            voice.envelope.gate_on();
            return;
        }

        let mut oscillator = Oscillator::new(self.waveform);
        oscillator.set_frequency(note.frequency(), self.sample_rate);
        let mut envelope = AdsrEnvelope::new(self.envelope, self.sample_rate);
        envelope.gate_on();

        let voice = Voice {
            note,
            velocity: velocity.value(),
            held: true,
            started_at: self.counter,
            oscillator,
            envelope,
        };

        if self.voices.len() < MAX_VOICES {
            self.voices.push(voice);
        } else if let Some(oldest) = self.voices.iter_mut().min_by_key(|v| v.started_at) {
            *oldest = voice;
        }
    }

    pub fn release(&mut self, note: NoteId) {
        for voice in self.voices.iter_mut().filter(|v| v.note == note && v.held) {
            voice.held = false;
            voice.envelope.gate_off();
        }
    }

    pub fn release_all(&mut self) {
        for voice in &mut self.voices {
            voice.held = false;
            voice.envelope.gate_off();
        }
    }

    /// Number of voices still producing sound.
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Add this synth's output into `out` (mono).
    pub fn render(&mut self, out: &mut [f32]) {
        for voice in &mut self.voices {
            for sample in out.iter_mut() {
                let env = voice.envelope.next_sample();
                *sample += voice.oscillator.next_sample() * env * voice.velocity * MASTER_GAIN;
            }
        }
        self.voices.retain(|v| v.envelope.is_active());
    }
}

impl Default for Synth {
    fn default() -> Self {
        Self::new(Waveform::Triangle, AdsrParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(n: u8) -> NoteId {
        NoteId::from_midi(n).unwrap()
    }

    fn quick() -> Synth {
        let mut synth = Synth::new(
            Waveform::Sine,
            AdsrParams {
                attack: 0.001,
                decay: 0.01,
                sustain: 0.5,
                release: 0.01,
            },
        );
        synth.prepare(44100.0);
        synth
    }

    #[test]
    fn test_silent_without_notes() {
        let mut synth = quick();
        let mut buf = vec![0.0; 256];
        synth.render(&mut buf);
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_attack_produces_sound_and_release_fades() {
        let mut synth = quick();
        synth.attack(NoteId::A4, Velocity::MAX);

        let mut buf = vec![0.0; 1024];
        synth.render(&mut buf);
        assert!(buf.iter().any(|s| s.abs() > 0.01));

        synth.release(NoteId::A4);
        let mut tail = vec![0.0; 44100];
        synth.render(&mut tail);
        assert_eq!(synth.active_voices(), 0);
    }

    #[test]
    fn test_velocity_scales_output() {
        let mut loud = quick();
        let mut soft = quick();
        loud.attack(NoteId::A4, Velocity::MAX);
        soft.attack(NoteId::A4, Velocity::PROBE);

        let mut a = vec![0.0; 2048];
        let mut b = vec![0.0; 2048];
        loud.render(&mut a);
        soft.render(&mut b);

        let peak = |buf: &[f32]| buf.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak(&b) < peak(&a) * 0.01);
    }

    #[test]
    fn test_voice_stealing_caps_polyphony() {
        let mut synth = quick();
        for n in 0..(MAX_VOICES as u8 + 4) {
            synth.attack(note(40 + n), Velocity::MAX);
        }
        assert_eq!(synth.active_voices(), MAX_VOICES);
    }

    #[test]
    fn test_retrigger_reuses_voice() {
        let mut synth = quick();
        synth.attack(NoteId::A4, Velocity::MAX);
        synth.attack(NoteId::A4, Velocity::MAX);
        assert_eq!(synth.active_voices(), 1);
    }

    #[test]
    fn test_release_all() {
        let mut synth = quick();
        synth.attack(note(60), Velocity::MAX);
        synth.attack(note(64), Velocity::MAX);
        synth.release_all();
        let mut tail = vec![0.0; 44100];
        synth.render(&mut tail);
        assert_eq!(synth.active_voices(), 0);
    }
}
