//! # Musical Tuning Module
//!
//! Equal-temperament note mapping for the intonation engine. Converts
//! detected frequencies into the nearest chromatic pitch with a signed
//! cents deviation, based on A4 = 440 Hz.

use serde::Serialize;

/// Reference pitch A4 in Hz.
pub const A4_FREQUENCY: f32 = 440.0;
/// MIDI number of A4.
pub const A4_MIDI: i32 = 69;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Classification of a reading against equal temperament.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tendency {
    Sharp,
    Flat,
    Accurate,
}

impl Tendency {
    /// Per-reading classification: more than 10 cents out is sharp/flat.
    pub fn from_cents(cents: i32) -> Self {
        if cents > 10 {
            Tendency::Sharp
        } else if cents < -10 {
            Tendency::Flat
        } else {
            Tendency::Accurate
        }
    }
}

/// A frequency resolved to its nearest chromatic pitch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotedPitch {
    /// Note label with octave, e.g. "A4" or "C#5".
    pub note: String,
    /// MIDI number of the nearest pitch (A4 = 69).
    pub midi: i32,
    /// Signed deviation from the nearest pitch, rounded to whole cents.
    pub cents: i32,
    /// The measured frequency in Hz.
    pub frequency: f32,
}

/// Maps a frequency to its nearest equal-temperament pitch.
///
/// The semitone offset from A4 is `12 * log2(f / 440)`; the nearest whole
/// semitone gives the MIDI number and the remainder becomes cents, so the
/// deviation always lies within half a semitone of the named note.
///
/// Returns `None` for non-positive or non-finite frequencies instead of
/// raising; there is no failure mode for valid input.
pub fn frequency_to_note(frequency: f32) -> Option<NotedPitch> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return None;
    }
    let offset = 12.0 * (frequency / A4_FREQUENCY).log2();
    let nearest = offset.round();
    let midi = A4_MIDI + nearest as i32;
    let cents = ((offset - nearest) * 100.0).round() as i32;
    Some(NotedPitch { note: note_label(midi), midi, cents, frequency })
}

/// Note label with octave for a MIDI number, e.g. 69 -> "A4".
pub fn note_label(midi: i32) -> String {
    format!("{}{}", pitch_class_name(midi), midi.div_euclid(12) - 1)
}

/// Octave-independent pitch-class name for a MIDI number, e.g. 61 -> "C#".
pub fn pitch_class_name(midi: i32) -> &'static str {
    NOTE_NAMES[midi.rem_euclid(12) as usize]
}

/// Inverse of [`frequency_to_note`]: the frequency of `midi` offset by
/// `cents`. Used to synthesize readings at a known deviation.
pub fn note_to_frequency(midi: i32, cents: f32) -> f32 {
    A4_FREQUENCY * 2.0f32.powf((midi - A4_MIDI) as f32 / 12.0 + cents / 1200.0)
}
