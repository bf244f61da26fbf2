//! # Vibrato Detection Module
//!
//! Detects vibrato from the oscillation pattern of a note's recent cents
//! trace: rate from zero crossings, width from the peak-to-peak excursion,
//! and consistency from the spread of the oscillation peaks.

use serde::Serialize;

/// Minimum readings needed before oscillation analysis is meaningful.
pub const MIN_SAMPLES: usize = 10;
/// Readings older than this, relative to the newest one, are ignored (ms).
pub const WINDOW_MS: u64 = 2000;

/// How a detected vibrato reads, once present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VibratoQuality {
    Narrow,
    Wide,
    Slow,
    Fast,
    Irregular,
    Good,
}

/// Oscillation analysis for one note over its recent readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VibratoAnalysis {
    pub present: bool,
    /// Oscillation rate in Hz.
    pub rate: f32,
    /// Peak-to-peak width in cents.
    pub width: f32,
    /// Regularity of the oscillation peaks, 0 to 100.
    pub consistency: f32,
    /// Set only when vibrato is present.
    pub quality: Option<VibratoQuality>,
}

impl VibratoAnalysis {
    /// The zeroed "no vibrato" result.
    pub fn none() -> Self {
        Self { present: false, rate: 0.0, width: 0.0, consistency: 0.0, quality: None }
    }
}

/// Population standard deviation.
pub(crate) fn population_std_dev(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / values.len() as f32;
    variance.sqrt()
}

/// Analyzes a time-ordered `(timestamp_ms, cents)` trace for vibrato.
///
/// Fewer than [`MIN_SAMPLES`] readings, or a trace with no elapsed time,
/// reports no vibrato with zeroed measurements. Otherwise the rate is the
/// zero-crossing count of the mean-removed trace halved and divided by the
/// elapsed seconds, and vibrato is present when the rate lands in the
/// 3-10 Hz playing range with at least 15 cents of width.
pub fn analyze(trace: &[(u64, f32)]) -> VibratoAnalysis {
    if trace.len() < MIN_SAMPLES {
        return VibratoAnalysis::none();
    }
    let first_ms = trace[0].0;
    let last_ms = trace[trace.len() - 1].0;
    let duration_secs = last_ms.saturating_sub(first_ms) as f32 / 1000.0;
    if duration_secs <= 0.0 {
        return VibratoAnalysis::none();
    }

    let cents: Vec<f32> = trace.iter().map(|&(_, c)| c).collect();
    let mean = cents.iter().sum::<f32>() / cents.len() as f32;

    let crossings = cents
        .windows(2)
        .filter(|pair| (pair[0] - mean) * (pair[1] - mean) < 0.0)
        .count();
    let rate = crossings as f32 / 2.0 / duration_secs;

    let max = cents.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let min = cents.iter().cloned().fold(f32::INFINITY, f32::min);
    let width = max - min;

    // Local maxima by simple neighbor comparison.
    let peaks: Vec<f32> = cents
        .windows(3)
        .filter(|w| w[1] > w[0] && w[1] > w[2])
        .map(|w| w[1])
        .collect();
    let consistency = if peaks.len() >= 2 {
        (100.0 - 2.0 * population_std_dev(&peaks)).max(0.0)
    } else {
        100.0
    };

    let present = (3.0..=10.0).contains(&rate) && width >= 15.0;
    let quality = present.then(|| classify(rate, width, consistency));

    VibratoAnalysis { present, rate, width, consistency, quality }
}

// First matching rule wins; the order is deliberate.
fn classify(rate: f32, width: f32, consistency: f32) -> VibratoQuality {
    if width < 20.0 {
        VibratoQuality::Narrow
    } else if width > 60.0 {
        VibratoQuality::Wide
    } else if rate < 4.5 {
        VibratoQuality::Slow
    } else if rate > 7.0 {
        VibratoQuality::Fast
    } else if consistency > 70.0 {
        VibratoQuality::Good
    } else {
        VibratoQuality::Irregular
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    /// Sampled sinusoidal cents trace: `amplitude * sin(2 pi rate t)` at
    /// 50 Hz for `seconds`.
    fn oscillation(rate_hz: f32, amplitude_cents: f32, seconds: f32) -> Vec<(u64, f32)> {
        let count = (seconds * 50.0) as usize;
        (0..count)
            .map(|i| {
                let t = i as f32 / 50.0;
                ((t * 1000.0) as u64, amplitude_cents * (2.0 * PI * rate_hz * t).sin())
            })
            .collect()
    }

    #[test]
    fn test_good_vibrato_is_detected() {
        let analysis = analyze(&oscillation(5.5, 15.0, 2.2));
        assert!(analysis.present);
        assert!((analysis.rate - 5.5).abs() < 0.8, "rate {}", analysis.rate);
        assert!(analysis.width > 25.0 && analysis.width <= 30.5, "width {}", analysis.width);
        assert_eq!(analysis.quality, Some(VibratoQuality::Good));
    }

    #[test]
    fn test_narrow_oscillation_is_not_vibrato() {
        // Same motion at 10 cents peak-to-peak stays under the width gate.
        let analysis = analyze(&oscillation(5.5, 5.0, 2.2));
        assert!(!analysis.present);
        assert!(analysis.quality.is_none());
    }

    #[test]
    fn test_slow_wobble_is_not_vibrato() {
        let analysis = analyze(&oscillation(1.5, 20.0, 2.2));
        assert!(!analysis.present, "1.5 Hz is a wobble, not vibrato");
    }

    #[test]
    fn test_quality_boundaries() {
        assert_eq!(classify(5.5, 18.0, 90.0), VibratoQuality::Narrow);
        assert_eq!(classify(5.5, 70.0, 90.0), VibratoQuality::Wide);
        assert_eq!(classify(4.0, 30.0, 90.0), VibratoQuality::Slow);
        assert_eq!(classify(8.0, 30.0, 90.0), VibratoQuality::Fast);
        assert_eq!(classify(5.5, 30.0, 90.0), VibratoQuality::Good);
        assert_eq!(classify(5.5, 30.0, 50.0), VibratoQuality::Irregular);
    }

    #[test]
    fn test_too_few_samples_reports_nothing() {
        let trace: Vec<(u64, f32)> = (0..9).map(|i| (i * 20, 20.0 * (i % 2) as f32)).collect();
        assert_eq!(analyze(&trace), VibratoAnalysis::none());
    }

    #[test]
    fn test_steady_pitch_has_no_rate() {
        let trace: Vec<(u64, f32)> = (0..50).map(|i| (i * 20, 3.0)).collect();
        let analysis = analyze(&trace);
        assert!(!analysis.present);
        assert_eq!(analysis.rate, 0.0);
        assert_eq!(analysis.width, 0.0);
    }

    #[test]
    fn test_population_std_dev() {
        assert_eq!(population_std_dev(&[]), 0.0);
        assert_eq!(population_std_dev(&[4.0, 4.0, 4.0]), 0.0);
        assert!((population_std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.0).abs() < 1e-6);
    }
}
