//! # Intonation Analysis Module
//!
//! The stateful heart of the engine. Ingests `(frequency, amplitude)`
//! pairs from the capture pipeline, buckets readings by detected note
//! under fixed memory caps, and produces per-note and whole-session
//! intonation reports with coaching suggestions.
//!
//! One analyzer instance covers one practice session. It is an ordinary
//! owned value: construct it at session start, pass it by reference to
//! whoever feeds or reads it, and `reset()` or drop it when the session
//! ends.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Instant;

use serde::Serialize;

use crate::tuning::{self, Tendency};
use crate::vibrato::{self, VibratoAnalysis, VibratoQuality, population_std_dev};

/// Minimum amplitude for a sample to count as sounding.
const AMPLITUDE_THRESHOLD: f32 = 0.01;
/// Raw sample history cap; ~10s at a 50 Hz detection rate.
const SAMPLE_HISTORY_CAP: usize = 500;
/// Raw samples older than this relative to the newest are evicted (ms).
const SAMPLE_HISTORY_WINDOW_MS: u64 = 10_000;
/// Readings kept per tracked note.
const READINGS_PER_NOTE_CAP: usize = 100;
/// Distinct notes tracked at once; the oldest-inserted note is evicted
/// wholesale when a new one would exceed this.
const TRACKED_NOTES_CAP: usize = 24;
/// Raw cents values kept per pitch class for cross-octave bias tracking.
const TENDENCY_PER_CLASS_CAP: usize = 200;

/// Raw capture sample retained for cross-note analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchSample {
    pub frequency: f32,
    pub timestamp_ms: u64,
    pub amplitude: f32,
}

/// One mapped pitch reading for a detected note.
#[derive(Debug, Clone, Serialize)]
pub struct IntonationReading {
    /// Note label, e.g. "A4".
    pub note: String,
    pub midi: i32,
    /// Signed whole-cent deviation from the named note.
    pub cents: i32,
    pub frequency: f32,
    pub timestamp_ms: u64,
    pub tendency: Tendency,
}

/// Per-note snapshot of intonation quality.
#[derive(Debug, Clone, Serialize)]
pub struct NoteIntonationReport {
    pub note: String,
    pub midi: i32,
    pub average_cents: f32,
    pub tendency: Tendency,
    /// 0 (wild) to 100 (rock steady); derived from the cents spread.
    pub stability: f32,
    pub vibrato: VibratoAnalysis,
    /// Number of readings behind this report.
    pub samples: usize,
    /// At most one coaching hint, the most pressing one.
    pub suggestion: Option<String>,
}

/// Octave-independent bias for one pitch class.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PitchClassTendency {
    pub average_cents: f32,
    pub tendency: Tendency,
    pub samples: usize,
}

/// Session-wide vibrato rollup across all vibrating notes.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct VibratoSummary {
    pub detected: bool,
    pub average_rate: f32,
    pub average_width: f32,
}

/// Whole-session aggregate produced by [`IntonationAnalyzer::analysis`].
#[derive(Debug, Clone, Serialize)]
pub struct IntonationAnalysisResult {
    /// 0 to 100, from the sample-weighted mean absolute deviation.
    pub overall_accuracy: f32,
    /// Sample-weighted mean absolute deviation in cents.
    pub average_deviation: f32,
    /// Per-note reports, sorted ascending by MIDI number.
    pub notes: Vec<NoteIntonationReport>,
    /// Pitch-class name -> cross-octave bias.
    pub tendencies: BTreeMap<String, PitchClassTendency>,
    /// Labels of notes that are out of tune or unsteady.
    pub problematic_notes: Vec<String>,
    /// Up to five coaching suggestions, most important first.
    pub suggestions: Vec<String>,
    pub vibrato: VibratoSummary,
}

/// Streaming intonation analyzer for one practice session.
///
/// Never panics or errors on malformed numeric input: silence, non-positive
/// frequencies, and non-finite values are dropped at the door so a live
/// practice session cannot be taken down by a bad frame.
pub struct IntonationAnalyzer {
    epoch: Instant,
    sample_history: VecDeque<PitchSample>,
    /// Insertion order of tracked notes; front is the eviction candidate.
    note_order: VecDeque<i32>,
    readings: HashMap<i32, VecDeque<IntonationReading>>,
    tendency: BTreeMap<&'static str, VecDeque<i32>>,
}

impl IntonationAnalyzer {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            sample_history: VecDeque::with_capacity(SAMPLE_HISTORY_CAP),
            note_order: VecDeque::with_capacity(TRACKED_NOTES_CAP),
            readings: HashMap::new(),
            tendency: BTreeMap::new(),
        }
    }

    /// Ingests one detection, stamped with the analyzer's own clock.
    pub fn add_sample(&mut self, frequency: f32, amplitude: f32) {
        let timestamp_ms = self.epoch.elapsed().as_millis() as u64;
        self.add_sample_at(frequency, amplitude, timestamp_ms);
    }

    /// Ingests one detection with an explicit monotonic timestamp.
    ///
    /// Timestamps must be non-decreasing across calls; this variant exists
    /// for replaying captured streams at their original timing.
    pub fn add_sample_at(&mut self, frequency: f32, amplitude: f32, timestamp_ms: u64) {
        if !frequency.is_finite() || !amplitude.is_finite() {
            return;
        }
        if amplitude < AMPLITUDE_THRESHOLD || frequency <= 0.0 {
            return;
        }
        let Some(noted) = tuning::frequency_to_note(frequency) else {
            return;
        };

        self.sample_history.push_back(PitchSample { frequency, timestamp_ms, amplitude });
        while let Some(front) = self.sample_history.front() {
            if timestamp_ms.saturating_sub(front.timestamp_ms) > SAMPLE_HISTORY_WINDOW_MS {
                self.sample_history.pop_front();
            } else {
                break;
            }
        }
        while self.sample_history.len() > SAMPLE_HISTORY_CAP {
            self.sample_history.pop_front();
        }

        if !self.readings.contains_key(&noted.midi) {
            if self.note_order.len() >= TRACKED_NOTES_CAP {
                if let Some(evicted) = self.note_order.pop_front() {
                    self.readings.remove(&evicted);
                }
            }
            self.note_order.push_back(noted.midi);
        }
        let reading = IntonationReading {
            note: noted.note,
            midi: noted.midi,
            cents: noted.cents,
            frequency,
            timestamp_ms,
            tendency: Tendency::from_cents(noted.cents),
        };
        let list = self.readings.entry(noted.midi).or_default();
        if list.len() >= READINGS_PER_NOTE_CAP {
            list.pop_front();
        }
        list.push_back(reading);

        let bucket = self.tendency.entry(tuning::pitch_class_name(noted.midi)).or_default();
        if bucket.len() >= TENDENCY_PER_CLASS_CAP {
            bucket.pop_front();
        }
        bucket.push_back(noted.cents);
    }

    /// The capped raw-sample history, oldest first.
    pub fn sample_history(&self) -> &VecDeque<PitchSample> {
        &self.sample_history
    }

    /// Vibrato analysis for one note over its readings from the two
    /// seconds leading up to its newest reading.
    pub fn analyze_vibrato(&self, midi: i32) -> VibratoAnalysis {
        let Some(list) = self.readings.get(&midi) else {
            return VibratoAnalysis::none();
        };
        let Some(newest) = list.back() else {
            return VibratoAnalysis::none();
        };
        let cutoff = newest.timestamp_ms.saturating_sub(vibrato::WINDOW_MS);
        let trace: Vec<(u64, f32)> = list
            .iter()
            .filter(|r| r.timestamp_ms >= cutoff)
            .map(|r| (r.timestamp_ms, r.cents as f32))
            .collect();
        vibrato::analyze(&trace)
    }

    /// Snapshot report for one note, or `None` if it was never tracked.
    pub fn note_report(&self, midi: i32) -> Option<NoteIntonationReport> {
        let list = self.readings.get(&midi)?;
        if list.is_empty() {
            return None;
        }
        let cents: Vec<f32> = list.iter().map(|r| r.cents as f32).collect();
        let average_cents = cents.iter().sum::<f32>() / cents.len() as f32;
        let stability = (100.0 - 3.0 * population_std_dev(&cents)).max(0.0);
        // Average-level band; kept separate from the per-reading
        // classification even though the constants agree today.
        let tendency = if average_cents > 10.0 {
            Tendency::Sharp
        } else if average_cents < -10.0 {
            Tendency::Flat
        } else {
            Tendency::Accurate
        };
        let note = tuning::note_label(midi);
        let vibrato = self.analyze_vibrato(midi);
        let suggestion = suggest_for_note(&note, average_cents, stability, &vibrato);
        Some(NoteIntonationReport {
            note,
            midi,
            average_cents,
            tendency,
            stability,
            vibrato,
            samples: list.len(),
            suggestion,
        })
    }

    /// Full mid-stream snapshot of the session.
    ///
    /// Always safe to call; an analyzer that has seen nothing returns the
    /// zeroed, empty baseline.
    pub fn analysis(&self) -> IntonationAnalysisResult {
        let mut midis: Vec<i32> = self.readings.keys().copied().collect();
        midis.sort_unstable();

        let mut notes = Vec::with_capacity(midis.len());
        let mut weighted_deviation = 0.0f32;
        let mut total_samples = 0usize;
        for midi in midis {
            if let Some(report) = self.note_report(midi) {
                weighted_deviation += report.average_cents.abs() * report.samples as f32;
                total_samples += report.samples;
                notes.push(report);
            }
        }
        let average_deviation = if total_samples > 0 {
            weighted_deviation / total_samples as f32
        } else {
            0.0
        };
        let overall_accuracy = if notes.is_empty() {
            0.0
        } else {
            (100.0 - 2.0 * average_deviation).max(0.0)
        };

        let problematic_notes: Vec<String> = notes
            .iter()
            .filter(|r| r.average_cents.abs() > 15.0 || r.stability < 60.0)
            .map(|r| r.note.clone())
            .collect();

        let mut tendencies = BTreeMap::new();
        for (class, bucket) in &self.tendency {
            if bucket.is_empty() {
                continue;
            }
            let average_cents = bucket.iter().map(|&c| c as f32).sum::<f32>() / bucket.len() as f32;
            let tendency = if average_cents > 10.0 {
                Tendency::Sharp
            } else if average_cents < -10.0 {
                Tendency::Flat
            } else {
                Tendency::Accurate
            };
            tendencies.insert(
                class.to_string(),
                PitchClassTendency { average_cents, tendency, samples: bucket.len() },
            );
        }

        let suggestions = self.build_suggestions(&notes, &tendencies);

        let vibrating: Vec<&VibratoAnalysis> =
            notes.iter().filter(|r| r.vibrato.present).map(|r| &r.vibrato).collect();
        let vibrato = if vibrating.is_empty() {
            VibratoSummary { detected: false, average_rate: 0.0, average_width: 0.0 }
        } else {
            let count = vibrating.len() as f32;
            VibratoSummary {
                detected: true,
                average_rate: vibrating.iter().map(|v| v.rate).sum::<f32>() / count,
                average_width: vibrating.iter().map(|v| v.width).sum::<f32>() / count,
            }
        };

        IntonationAnalysisResult {
            overall_accuracy,
            average_deviation,
            notes,
            tendencies,
            problematic_notes,
            suggestions,
            vibrato,
        }
    }

    /// Up to five suggestions: session-wide bias first, then per-class
    /// bias, then vibrato pacing.
    fn build_suggestions(
        &self,
        notes: &[NoteIntonationReport],
        tendencies: &BTreeMap<String, PitchClassTendency>,
    ) -> Vec<String> {
        let mut suggestions = Vec::new();

        let total: usize = self.tendency.values().map(|b| b.len()).sum();
        if total > 0 {
            let grand_mean = self
                .tendency
                .values()
                .flat_map(|b| b.iter().map(|&c| c as f32))
                .sum::<f32>()
                / total as f32;
            if grand_mean > 10.0 {
                suggestions.push(format!(
                    "You tend to play sharp overall ({:.0} cents); ease your fingers back toward the scroll",
                    grand_mean
                ));
            } else if grand_mean < -10.0 {
                suggestions.push(format!(
                    "You tend to play flat overall ({:.0} cents); reach a little further up the fingerboard",
                    grand_mean.abs()
                ));
            }
        }

        for (class, bias) in tendencies {
            if bias.samples >= 3 && bias.average_cents.abs() > 20.0 {
                let direction = if bias.average_cents > 0.0 { "sharp" } else { "flat" };
                suggestions.push(format!(
                    "{} is consistently {:.0} cents {} in every octave; retrain that finger placement",
                    class,
                    bias.average_cents.abs(),
                    direction
                ));
            }
        }

        let rates: Vec<f32> =
            notes.iter().filter(|r| r.vibrato.present).map(|r| r.vibrato.rate).collect();
        if !rates.is_empty() {
            let mean_rate = rates.iter().sum::<f32>() / rates.len() as f32;
            if mean_rate < 4.5 {
                suggestions.push(format!(
                    "Your vibrato averages {:.1} Hz, on the slow side; practice quicker oscillations",
                    mean_rate
                ));
            } else if mean_rate > 7.0 {
                suggestions.push(format!(
                    "Your vibrato averages {:.1} Hz, on the fast side; let the motion relax",
                    mean_rate
                ));
            }
        }

        suggestions.truncate(5);
        suggestions
    }

    /// Clears every buffer back to the empty-session baseline. Idempotent.
    pub fn reset(&mut self) {
        self.sample_history.clear();
        self.note_order.clear();
        self.readings.clear();
        self.tendency.clear();
    }
}

impl Default for IntonationAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn suggest_for_note(
    note: &str,
    average_cents: f32,
    stability: f32,
    vibrato: &VibratoAnalysis,
) -> Option<String> {
    if average_cents > 20.0 {
        return Some(format!(
            "{} averages {:.0} cents sharp; place the finger slightly lower",
            note, average_cents
        ));
    }
    if average_cents < -20.0 {
        return Some(format!(
            "{} averages {:.0} cents flat; place the finger slightly higher",
            note,
            average_cents.abs()
        ));
    }
    if stability < 50.0 {
        return Some(format!(
            "{} wavers; practice it with long slow bows and a quiet hand",
            note
        ));
    }
    match vibrato.quality {
        Some(VibratoQuality::Wide) => Some(format!(
            "Vibrato on {} is very wide; tighten the oscillation around the note center",
            note
        )),
        Some(VibratoQuality::Narrow) => Some(format!(
            "Vibrato on {} is narrow; let the wrist swing a little freer",
            note
        )),
        _ => None,
    }
}
