//! Visualizer state
//!
//! A fixed-size buffer of frequency bins refreshed once per display frame,
//! with a trail that fades instead of clearing.

use crate::engine::analyser::Analyser;

/// Default per-frame fade applied to the trail.
pub const DEFAULT_DECAY: f32 = 0.8;

/// Bar heights for the spectrum display.
#[derive(Clone, Debug)]
pub struct Visualizer {
    current: Vec<f32>,
    trail: Vec<f32>,
    decay: f32,
}

impl Visualizer {
    pub fn new(bins: usize, decay: f32) -> Self {
        Self {
            current: vec![0.0; bins],
            trail: vec![0.0; bins],
            decay: decay.clamp(0.0, 0.999),
        }
    }

    pub fn bin_count(&self) -> usize {
        self.current.len()
    }

    pub fn decay(&self) -> f32 {
        self.decay
    }

    /// Refresh from the analyser, or fade out when none is attached.
    pub fn update(&mut self, analyser: Option<&mut Analyser>) {
        match analyser {
            Some(analyser) => analyser.frequency_data(&mut self.current),
            None => self.current.fill(0.0),
        }
        for (trail, &current) in self.trail.iter_mut().zip(&self.current) {
            *trail = current.max(*trail * self.decay);
        }
    }

    /// Latest levels, 0.0..=1.0.
    pub fn current(&self) -> &[f32] {
        &self.current
    }

    /// Faded maximum of recent levels, 0.0..=1.0.
    pub fn trail(&self) -> &[f32] {
        &self.trail
    }
}

impl Default for Visualizer {
    fn default() -> Self {
        Self::new(
            crate::engine::analyser::DEFAULT_FFT_SIZE / 2,
            DEFAULT_DECAY,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trail_fades_without_analyser() {
        let mut vis = Visualizer::new(4, 0.5);
        vis.trail = vec![1.0; 4];
        vis.update(None);
        assert!(vis.current().iter().all(|&v| v == 0.0));
        assert!(vis.trail().iter().all(|&v| (v - 0.5).abs() < 1e-6));
        vis.update(None);
        assert!(vis.trail().iter().all(|&v| (v - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_trail_follows_louder_input() {
        let size = 64;
        let (mut tap, mut analyser) = Analyser::with_tap(size);
        let mut vis = Visualizer::new(size / 2, DEFAULT_DECAY);

        for i in 0..size {
            let phase = 2.0 * std::f32::consts::PI * 4.0 * i as f32 / size as f32;
            tap.push(0.5 * phase.sin()).unwrap();
        }
        vis.update(Some(&mut analyser));

        assert!(vis.current()[4] > 0.0);
        for (c, t) in vis.current().iter().zip(vis.trail()) {
            assert!(t >= c);
        }
    }

    #[test]
    fn test_buffer_size_is_fixed() {
        let (_, mut analyser) = Analyser::with_tap(256);
        let mut vis = Visualizer::new(16, DEFAULT_DECAY);
        vis.update(Some(&mut analyser));
        assert_eq!(vis.current().len(), 16);
        assert_eq!(vis.trail().len(), 16);
    }

    #[test]
    fn test_decay_is_clamped() {
        assert!(Visualizer::new(1, 5.0).decay() < 1.0);
        assert_eq!(Visualizer::new(1, -1.0).decay(), 0.0);
    }
}
