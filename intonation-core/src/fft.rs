//! # Autocorrelation Module
//!
//! FFT-backed autocorrelation for the pitch estimator. The planner and
//! scratch buffers are created once and reused, so the per-frame path
//! performs no allocation.

use rustfft::{Fft, FftPlanner, num_complex::Complex};
use std::sync::Arc;

/// Removes the DC offset from a signal by making its average value zero.
///
/// A DC component shows up as energy at lag zero that never decays, which
/// skews the normalized difference toward spurious low-lag peaks.
///
/// # Arguments
/// * `signal` - Audio signal to process (modified in-place)
pub fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Linear autocorrelation of a fixed-size window via zero-padded FFT.
///
/// Computes `r[tau] = sum(x[i] * x[i + tau])` for `tau` in `0..size`.
/// The input is zero-padded to twice its length so the circular transform
/// yields the linear correlation.
pub struct Autocorrelator {
    size: usize,
    padded_size: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    spectrum: Vec<Complex<f32>>,
}

impl Autocorrelator {
    /// Plans forward and inverse transforms for windows of `size` samples.
    pub fn new(size: usize) -> Self {
        let padded_size = size * 2;
        let mut planner = FftPlanner::new();
        Self {
            size,
            padded_size,
            forward: planner.plan_fft_forward(padded_size),
            inverse: planner.plan_fft_inverse(padded_size),
            spectrum: vec![Complex { re: 0.0, im: 0.0 }; padded_size],
        }
    }

    /// Fills `out` with `r[tau]` for `tau` in `0..size`.
    ///
    /// # Panics
    /// * If `signal` or `out` is not exactly `size` samples long.
    pub fn process(&mut self, signal: &[f32], out: &mut [f32]) {
        assert_eq!(signal.len(), self.size, "input frame size must match the planned size");
        assert_eq!(out.len(), self.size, "output buffer size must match the planned size");

        for (slot, &sample) in self.spectrum.iter_mut().zip(signal) {
            *slot = Complex { re: sample, im: 0.0 };
        }
        for slot in self.spectrum[self.size..].iter_mut() {
            *slot = Complex { re: 0.0, im: 0.0 };
        }

        self.forward.process(&mut self.spectrum);
        for value in self.spectrum.iter_mut() {
            let v = *value;
            *value = v * v.conj();
        }
        self.inverse.process(&mut self.spectrum);

        // rustfft transforms are unnormalized; one round trip scales by the length.
        let scale = 1.0 / self.padded_size as f32;
        for (slot, value) in out.iter_mut().zip(&self.spectrum[..self.size]) {
            *slot = value.re * scale;
        }
    }
}
