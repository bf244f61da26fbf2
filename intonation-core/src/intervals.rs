//! # Pure Intonation Module
//!
//! Just-intonation advice for double-stops. String players adjust held
//! intervals away from equal temperament toward simple frequency ratios;
//! this module tabulates those deviations and surfaces the ones large
//! enough to be worth acting on.

use once_cell::sync::Lazy;
use serde::Serialize;

/// Adjustments of 5 cents or less are inside normal finger tolerance and
/// are not surfaced.
const SURFACING_THRESHOLD_CENTS: f32 = 5.0;

/// Deviation of a 5-limit just interval from its equal-temperament size.
#[derive(Debug, Clone, Copy)]
struct JustInterval {
    semitones: i32,
    name: &'static str,
    deviation_cents: f32,
}

/// Statically computed deviation table for intervals of 1 to 11 semitones.
///
/// Each deviation is derived from the interval's just ratio, e.g. the pure
/// perfect fifth (3:2) sits ~2 cents above its tempered size and the pure
/// major third (5:4) ~14 cents below.
static JUST_INTERVALS: Lazy<[JustInterval; 11]> = Lazy::new(|| {
    const RATIOS: [(i32, &str, f32); 11] = [
        (1, "minor second", 16.0 / 15.0),
        (2, "major second", 9.0 / 8.0),
        (3, "minor third", 6.0 / 5.0),
        (4, "major third", 5.0 / 4.0),
        (5, "perfect fourth", 4.0 / 3.0),
        (6, "tritone", 45.0 / 32.0),
        (7, "perfect fifth", 3.0 / 2.0),
        (8, "minor sixth", 8.0 / 5.0),
        (9, "major sixth", 5.0 / 3.0),
        (10, "minor seventh", 9.0 / 5.0),
        (11, "major seventh", 15.0 / 8.0),
    ];
    RATIOS.map(|(semitones, name, ratio)| JustInterval {
        semitones,
        name,
        deviation_cents: 1200.0 * ratio.log2() - 100.0 * semitones as f32,
    })
});

/// A tuning adjustment toward the pure version of a sounding interval.
#[derive(Debug, Clone, Serialize)]
pub struct PureIntonationSuggestion {
    /// Interval name, e.g. "major third".
    pub interval: &'static str,
    /// Cents to move the upper note, relative to equal temperament.
    pub adjustment_cents: f32,
    /// Player-facing phrasing of the adjustment.
    pub message: String,
}

/// Suggests how to adjust a double-stop toward just intonation.
///
/// Looks up the semitone distance `upper_midi - lower_midi` in the
/// deviation table. Unisons, intervals wider than an octave's interior,
/// inverted arguments, and adjustments within the surfacing threshold all
/// yield an empty list.
pub fn pure_intonation_suggestions(lower_midi: i32, upper_midi: i32) -> Vec<PureIntonationSuggestion> {
    let semitones = upper_midi - lower_midi;
    let Some(entry) = JUST_INTERVALS.iter().find(|i| i.semitones == semitones) else {
        return Vec::new();
    };
    if entry.deviation_cents.abs() <= SURFACING_THRESHOLD_CENTS {
        return Vec::new();
    }
    let direction = if entry.deviation_cents > 0.0 { "raise" } else { "lower" };
    vec![PureIntonationSuggestion {
        interval: entry.name,
        adjustment_cents: entry.deviation_cents,
        message: format!(
            "For a pure {}, {} the upper note by about {:.0} cents",
            entry.name,
            direction,
            entry.deviation_cents.abs()
        ),
    }]
}
