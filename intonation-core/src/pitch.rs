//! # Pitch Estimation Module
//!
//! Normalized-autocorrelation (McLeod-style) pitch estimation over one
//! fixed-size window of time-domain samples. Each estimate carries a
//! clarity score in `[0, 1]`; the caller decides how much confidence it
//! requires and which frequency band it accepts.

use crate::fft::{Autocorrelator, remove_dc_offset};

/// Default analysis window length in samples.
///
/// 2048 samples is ~46ms at 44.1kHz, enough to hold several periods of
/// the violin's lowest notes while keeping detection latency low.
pub const DEFAULT_WINDOW_SIZE: usize = 2048;

/// A key maximum must reach this fraction of the tallest one to be
/// chosen; picking the first such peak avoids octave-below errors.
const PEAK_CUTOFF: f32 = 0.93;

/// The result of estimating pitch over one analysis window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchEstimate {
    /// Estimated fundamental frequency in Hz.
    pub frequency: f32,
    /// Confidence of the estimate, 0.0 to 1.0.
    pub clarity: f32,
}

/// Pitch estimator for fixed-size analysis windows.
///
/// Holds FFT plans and scratch buffers only; the estimate itself is a pure
/// function of the supplied window, with no cross-call state.
pub struct PitchEstimator {
    window_size: usize,
    autocorrelator: Autocorrelator,
    work: Vec<f32>,
    nsdf: Vec<f32>,
    peaks: Vec<(usize, f32)>,
}

impl PitchEstimator {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            autocorrelator: Autocorrelator::new(window_size),
            work: vec![0.0; window_size],
            nsdf: vec![0.0; window_size],
            peaks: Vec::new(),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Estimates the fundamental frequency of one window of samples.
    ///
    /// Returns `None` for silent or unpitched windows. The clarity score is
    /// the chosen normalized-autocorrelation peak value; callers reject
    /// low-clarity and out-of-band results per their own thresholds.
    ///
    /// # Panics
    /// * If `window` is not exactly `window_size` samples long.
    pub fn estimate(&mut self, window: &[f32], sample_rate: u32) -> Option<PitchEstimate> {
        assert_eq!(window.len(), self.window_size, "window length must match the configured size");

        self.work.copy_from_slice(window);
        remove_dc_offset(&mut self.work);
        self.autocorrelator.process(&self.work, &mut self.nsdf);

        // Normalized square difference: nsdf[tau] = 2 r[tau] / m[tau] where
        // m[tau] = sum(x[i]^2 + x[i+tau]^2), computed incrementally.
        let r0 = self.nsdf[0];
        if r0 <= 1e-9 {
            return None;
        }
        let n = self.window_size;
        let mut m = 2.0 * r0;
        self.nsdf[0] = 1.0;
        for tau in 1..n {
            let a = self.work[tau - 1];
            let b = self.work[n - tau];
            m -= a * a + b * b;
            let r = self.nsdf[tau];
            self.nsdf[tau] = if m > 0.0 { 2.0 * r / m } else { 0.0 };
        }

        self.collect_key_maxima();
        if self.peaks.is_empty() {
            return None;
        }

        let tallest = self.peaks.iter().fold(0.0f32, |acc, &(_, value)| acc.max(value));
        let (lag, clarity) = *self
            .peaks
            .iter()
            .find(|&&(_, value)| value >= PEAK_CUTOFF * tallest)?;

        let refined_lag = self.interpolate_lag(lag);
        let frequency = sample_rate as f32 / refined_lag;
        if !frequency.is_finite() || frequency <= 0.0 {
            return None;
        }

        Some(PitchEstimate { frequency, clarity: clarity.min(1.0) })
    }

    /// Finds the maximum of every positive run of the NSDF after the
    /// initial lobe around lag zero.
    fn collect_key_maxima(&mut self) {
        self.peaks.clear();
        let n = self.window_size;
        let mut tau = 1;
        while tau < n && self.nsdf[tau] > 0.0 {
            tau += 1;
        }
        while tau < n {
            while tau < n && self.nsdf[tau] <= 0.0 {
                tau += 1;
            }
            let mut max_tau = tau;
            let mut max_value = 0.0f32;
            while tau < n && self.nsdf[tau] > 0.0 {
                if self.nsdf[tau] > max_value {
                    max_value = self.nsdf[tau];
                    max_tau = tau;
                }
                tau += 1;
            }
            if max_value > 0.0 {
                self.peaks.push((max_tau, max_value));
            }
        }
    }

    /// Parabolic interpolation over the NSDF for sub-sample lag accuracy.
    fn interpolate_lag(&self, lag: usize) -> f32 {
        if lag == 0 || lag + 1 >= self.window_size {
            return lag as f32;
        }
        let y1 = self.nsdf[lag - 1];
        let y2 = self.nsdf[lag];
        let y3 = self.nsdf[lag + 1];
        let denominator = y1 - 2.0 * y2 + y3;
        if denominator.abs() > 1e-9 {
            lag as f32 + (y1 - y3) / (2.0 * denominator)
        } else {
            lag as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn generate_sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn test_a440_sine() {
        let window = generate_sine(440.0, 44100.0, 2048);
        let estimate = PitchEstimator::new(2048).estimate(&window, 44100).expect("should detect pitch");
        let error = (estimate.frequency - 440.0).abs();
        assert!(error < 2.0, "expected ~440 Hz, got {} (error {})", estimate.frequency, error);
        assert!(estimate.clarity > 0.9, "pure tone should be clear: {}", estimate.clarity);
    }

    #[test]
    fn test_open_g_string() {
        // G3 = 196 Hz, the violin's lowest open string.
        let window = generate_sine(196.0, 48000.0, 2048);
        let estimate = PitchEstimator::new(2048).estimate(&window, 48000).expect("should detect pitch");
        let error = (estimate.frequency - 196.0).abs();
        assert!(error < 2.0, "expected ~196 Hz, got {}", estimate.frequency);
    }

    #[test]
    fn test_fundamental_survives_harmonics() {
        let sample_rate = 44100.0;
        let fundamental = 440.0;
        let window: Vec<f32> = (0..2048)
            .map(|i| {
                let t = i as f32 / sample_rate;
                0.5 * (2.0 * PI * fundamental * t).sin()
                    + 0.3 * (2.0 * PI * 2.0 * fundamental * t).sin()
                    + 0.1 * (2.0 * PI * 3.0 * fundamental * t).sin()
            })
            .collect();
        let estimate = PitchEstimator::new(2048).estimate(&window, 44100).expect("should detect pitch");
        let error = (estimate.frequency - fundamental).abs();
        assert!(error < 5.0, "expected the fundamental despite harmonics, got {}", estimate.frequency);
    }

    #[test]
    fn test_silence_gives_no_pitch() {
        let window = vec![0.0f32; 2048];
        assert!(PitchEstimator::new(2048).estimate(&window, 44100).is_none());
    }

    #[test]
    fn test_noise_has_low_clarity() {
        // Deterministic pseudo-noise from a small LCG.
        let mut state = 0x2545f491u32;
        let window: Vec<f32> = (0..2048)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 16) as f32 / 32768.0 - 1.0
            })
            .collect();
        if let Some(estimate) = PitchEstimator::new(2048).estimate(&window, 44100) {
            assert!(estimate.clarity < 0.85, "noise should not be confidently pitched: {}", estimate.clarity);
        }
    }

    #[test]
    fn test_scratch_buffers_are_reused_cleanly() {
        let mut estimator = PitchEstimator::new(2048);
        let a440 = generate_sine(440.0, 44100.0, 2048);
        let e660 = generate_sine(660.0, 44100.0, 2048);
        let first = estimator.estimate(&a440, 44100).unwrap();
        estimator.estimate(&e660, 44100).unwrap();
        let again = estimator.estimate(&a440, 44100).unwrap();
        assert!((first.frequency - again.frequency).abs() < 0.01, "estimate must be a pure function of the window");
    }
}
