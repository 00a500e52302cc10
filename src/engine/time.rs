// src/engine/time.rs

use std::fmt;

use serde::{Serialize, Deserialize};

/// Beats per bar over the note value that counts as one beat.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self { numerator: 4, denominator: 4 }
    }
}

/// Relates wall-clock time and sample counts to beats.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TempoMap {
    pub bpm: f64,
    pub signature: TimeSignature,
}

impl Default for TempoMap {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            signature: TimeSignature::default(),
        }
    }
}

impl TempoMap {
    pub fn new(bpm: f64, numerator: u32, denominator: u32) -> Self {
        Self {
            bpm,
            signature: TimeSignature { numerator, denominator },
        }
    }

    /// Tempo map at `bpm` in 4/4. Non-positive or non-finite tempos fall back
    /// to the default 120.
    pub fn with_bpm(bpm: f64) -> Self {
        let bpm = if bpm.is_finite() && bpm > 0.0 { bpm } else { 120.0 };
        Self { bpm, ..Self::default() }
    }

    /// `bpm` counts quarter notes; a beat is one `denominator` note.
    pub fn seconds_per_beat(&self) -> f64 {
        let quarter = 60.0 / self.bpm;
        quarter * 4.0 / self.signature.denominator.max(1) as f64
    }

    /// Length of one loop-button unit in frames: one beat scaled by the loop
    /// multiplier.
    pub fn frames_per_beat_unit(&self, sample_rate: u32, multiplier: f64) -> f64 {
        sample_rate as f64 * self.seconds_per_beat() * multiplier
    }

    /// Bar and beat of an interleaved sample index in a buffer of the given
    /// format. Bars and beats count from 1.
    pub fn musical_position(&self, sample: usize, sample_rate: u32, channels: usize) -> MusicalPosition {
        let frames_per_beat = self.frames_per_beat_unit(sample_rate, 1.0);
        if frames_per_beat <= 0.0 || !frames_per_beat.is_finite() {
            return MusicalPosition::default();
        }
        let beats = (sample / channels.max(1)) as f64 / frames_per_beat;
        let per_bar = self.signature.numerator.max(1) as f64;
        let beat_in_bar = beats % per_bar;
        MusicalPosition {
            bar: (beats / per_bar).floor() as u32 + 1,
            beat: beat_in_bar.floor() as u32 + 1,
            fraction: beat_in_bar.fract(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MusicalPosition {
    pub bar: u32,
    pub beat: u32,
    /// Progress through the current beat, `0.0..1.0`.
    pub fraction: f64,
}

impl Default for MusicalPosition {
    fn default() -> Self {
        Self { bar: 1, beat: 1, fraction: 0.0 }
    }
}

impl fmt::Display for MusicalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.bar, self.beat)
    }
}
