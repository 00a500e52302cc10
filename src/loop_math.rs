// src/loop_math.rs

//! Loop-button arithmetic: turns a requested fraction plus the previous loop
//! into new absolute bounds and, when needed, a new cursor.
//!
//! Pure functions only. All positions are interleaved sample indices.

use crate::provider::looping::normalize_fraction;

/// Inputs of [`calculate_loop_range`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoopRangeRequest {
    pub prior_start: usize,
    pub prior_end: usize,
    pub prior_fraction: f64,
    /// Signed: non-negative anchors at the start edge, negative at the end.
    pub requested_fraction: f64,
    /// One beat unit in frames (sample rate × seconds per beat × multiplier).
    pub frames_per_beat_unit: f64,
    pub total_samples: usize,
    pub channels: usize,
    pub had_prior_loop: bool,
    /// The change comes from the multiplier control, not a loop button.
    pub multiplier_driven: bool,
    pub playback_sample: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopMode {
    /// Prior length scaled by `requested / prior`.
    Relative,
    /// Length recomputed from the beat unit, prior length ignored.
    MultiplierResize,
    /// No usable prior loop: placed at the playback cursor.
    Fresh,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopRange {
    pub start: usize,
    pub end: usize,
    /// New cursor, only when it has to move.
    pub cursor: Option<usize>,
    pub mode: LoopMode,
}

impl LoopRange {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl LoopRangeRequest {
    pub fn mode(&self) -> LoopMode {
        if !self.had_prior_loop || self.prior_end <= self.prior_start {
            LoopMode::Fresh
        } else if self.multiplier_driven {
            LoopMode::MultiplierResize
        } else {
            LoopMode::Relative
        }
    }
}

/// Computes the new loop bounds. All arithmetic runs in whole frames, so the
/// returned bounds and cursor are always multiples of `channels`.
pub fn calculate_loop_range(req: &LoopRangeRequest) -> LoopRange {
    let mode = req.mode();
    let channels = req.channels.max(1);
    let total = req.total_samples / channels;
    if total == 0 {
        return LoopRange { start: 0, end: 0, cursor: None, mode };
    }

    let requested = normalize_fraction(req.requested_fraction);
    let forward = requested >= 0.0;
    let beat_len = beat_frames(requested.abs(), req.frames_per_beat_unit);
    let cursor = (req.playback_sample / channels).min(total);

    let to_samples = |start: usize, end: usize, cursor: Option<usize>| LoopRange {
        start: start * channels,
        end: end * channels,
        cursor: cursor
            .map(|c| c * channels)
            .filter(|&c| c != req.playback_sample),
        mode,
    };

    if mode == LoopMode::Fresh {
        let (start, end) = if forward {
            place_forward(cursor, beat_len, total)
        } else {
            place_backward(cursor, beat_len, total)
        };
        return to_samples(start, end, None);
    }

    let prior = normalize_fraction(req.prior_fraction);
    let prior_start = (req.prior_start / channels).min(total - 1);
    let prior_end = (req.prior_end / channels).clamp(prior_start + 1, total);
    let prior_len = prior_end - prior_start;

    let len = match mode {
        LoopMode::MultiplierResize => beat_len,
        _ => ((prior_len as f64 * requested.abs() / prior.abs()).round() as usize).max(1),
    };

    let prior_forward = prior >= 0.0;
    let flipped = forward != prior_forward;

    // On a flip the region grows away from the edge it used to be anchored on.
    let (start, end) = match (forward, flipped) {
        (true, false) => place_forward(prior_start, len, total),
        (false, false) => place_backward(prior_end, len, total),
        (false, true) => place_backward(prior_start, len, total),
        (true, true) => place_forward(prior_end, len, total),
    };

    let in_prior = (prior_start..prior_end).contains(&cursor);
    let in_new = (start..end).contains(&cursor);

    let relocated = if flipped {
        in_prior.then(|| {
            let offset = if prior_forward {
                cursor - prior_start
            } else {
                prior_end - cursor
            };
            from_anchor(start, end, forward, offset)
        })
    } else if in_prior || in_new {
        let offset = if forward {
            cursor.saturating_sub(prior_start)
        } else {
            prior_end.saturating_sub(cursor)
        };
        Some(from_anchor(start, end, forward, offset))
    } else {
        None
    };

    to_samples(start, end, relocated)
}

/// Beat-derived loop length in frames, at least one.
fn beat_frames(magnitude: f64, frames_per_beat_unit: f64) -> usize {
    let frames = (magnitude * frames_per_beat_unit).round();
    if frames.is_finite() && frames >= 1.0 {
        frames as usize
    } else {
        1
    }
}

// Placement helpers work in frames; `total` is non-zero.

fn place_forward(anchor: usize, len: usize, total: usize) -> (usize, usize) {
    let start = anchor.min(total - 1);
    (start, start.saturating_add(len).min(total))
}

fn place_backward(anchor: usize, len: usize, total: usize) -> (usize, usize) {
    let end = anchor.clamp(1, total);
    (end.saturating_sub(len), end)
}

/// Frame `offset` frames in from the anchored edge, kept inside `[start, end)`.
fn from_anchor(start: usize, end: usize, forward: bool, offset: usize) -> usize {
    let cursor = if forward {
        start.saturating_add(offset)
    } else {
        end.saturating_sub(offset)
    };
    cursor.clamp(start, end - 1)
}
