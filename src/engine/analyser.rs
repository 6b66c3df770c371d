//! Frequency analyser
//!
//! Reads the post-instrument tap filled by the audio thread and turns the
//! most recent window of samples into per-bin levels in 0.0..=1.0.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use rtrb::{Consumer, Producer, RingBuffer};

/// Default FFT size (must be a power of 2).
pub const DEFAULT_FFT_SIZE: usize = 512;

/// Level mapped to 0.0.
pub const MIN_DECIBELS: f32 = -100.0;
/// Level mapped to 1.0.
pub const MAX_DECIBELS: f32 = -30.0;

/// Temporal smoothing between successive frames.
pub const SMOOTHING: f32 = 0.8;

/// FFT analyser fed from an rtrb tap.
pub struct Analyser {
    fft: Arc<dyn RealToComplex<f32>>,
    tap: Consumer<f32>,
    input_buffer: Vec<f32>,
    write_pos: usize,
    windowed_buffer: Vec<f32>,
    spectrum_buffer: Vec<Complex<f32>>,
    window: Vec<f32>,
    /// Smoothed linear magnitude per bin.
    smoothed: Vec<f32>,
}

impl Analyser {
    /// Create an analyser together with the producer end of its tap.
    ///
    /// `fft_size` is rounded up to a power of two in 32..=32768.
    pub fn with_tap(fft_size: usize) -> (Producer<f32>, Self) {
        let fft_size = fft_size.clamp(32, 32768).next_power_of_two();
        // A few frames of headroom so the audio thread never blocks on us
        let (producer, consumer) = RingBuffer::new(fft_size * 8);

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let spectrum_buffer = fft.make_output_vec();

        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                let x = i as f32 / fft_size as f32;
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * x).cos())
            })
            .collect();

        let analyser = Self {
            fft,
            tap: consumer,
            input_buffer: vec![0.0; fft_size],
            write_pos: 0,
            windowed_buffer: vec![0.0; fft_size],
            spectrum_buffer,
            window,
            smoothed: vec![0.0; fft_size / 2],
        };
        (producer, analyser)
    }

    pub fn fft_size(&self) -> usize {
        self.input_buffer.len()
    }

    /// Number of frequency bins (half the FFT size).
    pub fn bin_count(&self) -> usize {
        self.smoothed.len()
    }

    fn drain_tap(&mut self) {
        let size = self.input_buffer.len();
        while let Ok(sample) = self.tap.pop() {
            self.input_buffer[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % size;
        }
    }

    /// Fill `out` with the current per-bin levels (0.0..=1.0).
    ///
    /// Bins beyond `bin_count` are zeroed.
    pub fn frequency_data(&mut self, out: &mut [f32]) {
        self.drain_tap();

        // Unroll the ring so the oldest sample comes first
        let size = self.input_buffer.len();
        for i in 0..size {
            let s = self.input_buffer[(self.write_pos + i) % size];
            self.windowed_buffer[i] = s * self.window[i];
        }

        if self
            .fft
            .process(&mut self.windowed_buffer, &mut self.spectrum_buffer)
            .is_err()
        {
            out.fill(0.0);
            return;
        }

        let scale = 1.0 / size as f32;
        for (bin, smoothed) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.spectrum_buffer[bin].norm() * scale;
            *smoothed = SMOOTHING * *smoothed + (1.0 - SMOOTHING) * magnitude;
        }

        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.smoothed.get(i).map_or(0.0, |&m| normalize_db(magnitude_to_db(m)));
        }
    }

    pub fn reset(&mut self) {
        while self.tap.pop().is_ok() {}
        self.input_buffer.fill(0.0);
        self.write_pos = 0;
        self.smoothed.fill(0.0);
    }
}

impl std::fmt::Debug for Analyser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyser")
            .field("fft_size", &self.fft_size())
            .finish()
    }
}

/// Convert linear magnitude to decibels.
pub fn magnitude_to_db(magnitude: f32) -> f32 {
    if magnitude <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * magnitude.log10()
    }
}

/// Map a dB value from [MIN_DECIBELS, MAX_DECIBELS] onto [0, 1].
pub fn normalize_db(db: f32) -> f32 {
    ((db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS)).clamp(0.0, 1.0)
}
