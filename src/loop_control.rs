// src/loop_control.rs

use crate::engine::{PlaybackEngine, TempoMap, TrackBuffer, TrackId};
use crate::loop_math::{calculate_loop_range, LoopRange, LoopRangeRequest};
use crate::provider::looping::normalize_fraction;

/// Loop-button values, in beats.
pub const LOOP_FRACTIONS: [f64; 6] = [0.25, 0.5, 1.0, 2.0, 4.0, 8.0];

/// Values the multiplier control steps through.
pub const LOOP_MULTIPLIERS: [f64; 4] = [1.0, 2.0, 4.0, 0.5];

/// The loop a controller last applied.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActiveLoop {
    pub start: usize,
    pub end: usize,
    pub fraction: f64,
}

/// Per-track loop state on the UI side.
///
/// The engine forgets loops when a track stops; the controller keeps the last
/// applied region so [`restore`](Self::restore) can put it back after `play`.
pub struct LoopController {
    track: TrackId,
    tempo: TempoMap,
    sample_rate: u32,
    channels: usize,
    total_samples: usize,
    multiplier: f64,
    active: Option<ActiveLoop>,
}

impl LoopController {
    pub fn new(track: TrackId, buffer: &TrackBuffer, tempo: TempoMap) -> Self {
        Self {
            track,
            tempo,
            sample_rate: buffer.sample_rate(),
            channels: buffer.channels(),
            total_samples: buffer.len(),
            multiplier: 1.0,
            active: None,
        }
    }

    pub fn active(&self) -> Option<ActiveLoop> {
        self.active
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Loop-button press: a new loop of `fraction` beats, or a rescale of the
    /// active one. A sign change flips the anchor.
    pub fn press(&mut self, engine: &PlaybackEngine, fraction: f64) -> LoopRange {
        self.apply(engine, fraction, false)
    }

    /// Re-presses the active loop with the opposite sign.
    pub fn flip(&mut self, engine: &PlaybackEngine) -> Option<LoopRange> {
        let active = self.active?;
        Some(self.apply(engine, -active.fraction, false))
    }

    /// Changes the beat multiplier and resizes the active loop to match.
    pub fn set_multiplier(&mut self, engine: &PlaybackEngine, multiplier: f64) -> Option<LoopRange> {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return None;
        }
        self.multiplier = multiplier;
        let active = self.active?;
        Some(self.apply(engine, active.fraction, true))
    }

    pub fn clear(&mut self, engine: &PlaybackEngine) {
        self.active = None;
        engine.clear_loop(self.track);
    }

    /// Re-applies the remembered loop, e.g. right after the track is played
    /// again.
    pub fn restore(&self, engine: &PlaybackEngine) {
        if let Some(active) = self.active {
            engine.set_loop(self.track, active.start, active.end, 1.0, true);
        }
    }

    fn apply(&mut self, engine: &PlaybackEngine, fraction: f64, multiplier_driven: bool) -> LoopRange {
        let fraction = normalize_fraction(fraction);
        let cursor = engine.cursor(self.track);
        let prior = self.active;

        let request = LoopRangeRequest {
            prior_start: prior.map_or(0, |a| a.start),
            prior_end: prior.map_or(0, |a| a.end),
            prior_fraction: prior.map_or(1.0, |a| a.fraction),
            requested_fraction: fraction,
            frames_per_beat_unit: self.tempo.frames_per_beat_unit(self.sample_rate, self.multiplier),
            total_samples: self.total_samples,
            channels: self.channels,
            had_prior_loop: prior.is_some(),
            multiplier_driven,
            playback_sample: cursor.unwrap_or(0),
        };
        let range = calculate_loop_range(&request);
        if range.is_empty() {
            return range;
        }

        engine.set_loop(self.track, range.start, range.end, 1.0, false);
        if let (Some(jump), Some(_)) = (range.cursor, cursor) {
            engine.seek(self.track, jump);
        }
        self.active = Some(ActiveLoop {
            start: range.start,
            end: range.end,
            fraction,
        });

        log::debug!(
            "{}: loop x{fraction} -> [{}, {}) ({:?})",
            self.track,
            range.start,
            range.end,
            range.mode
        );
        range
    }
}
