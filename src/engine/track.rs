// src/engine/track.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::provider::StreamFormat;

/// Identifier for a track. One id maps to at most one playback session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub Uuid);

impl TrackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Decoded audio handed to the engine: interleaved f32 plus its format.
/// The samples are never mutated while a track plays.
#[derive(Clone, Debug)]
pub struct TrackBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: usize,
}

impl TrackBuffer {
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32, channels: usize) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
        }
    }

    pub fn samples(&self) -> &Arc<[f32]> {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn format(&self) -> StreamFormat {
        StreamFormat::new(self.sample_rate, self.channels)
    }

    /// Length in interleaved samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when there is nothing playable: no samples or a degenerate format.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty() || self.channels == 0 || self.sample_rate == 0
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

/// Optional arguments of [`PlaybackEngine::play`](super::PlaybackEngine::play).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlayOptions {
    /// Seed a loop over the whole buffer.
    pub looping: bool,
    /// Absolute sample index to start from.
    pub start_sample: usize,
    /// Initial gain; the engine default when `None`.
    pub volume: Option<f32>,
}
