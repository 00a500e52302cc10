// src/config.rs

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Engine settings, read from a JSON file by the player binary.
///
/// ```json
/// { "sample_rate": 48000, "channels": 2, "default_volume": 0.8 }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Mixer rate; the output device's default when absent.
    pub sample_rate: Option<u32>,
    pub channels: usize,
    /// Gain for tracks started without an explicit volume.
    pub default_volume: f32,
    /// Adapter scratch size in frames.
    pub block_frames: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: None,
            channels: 2,
            default_volume: 1.0,
            block_frames: 2_048,
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config.sanitized())
    }

    /// Copy with every field pulled into its supported range.
    pub fn sanitized(&self) -> Self {
        let default_volume = if self.default_volume.is_finite() {
            self.default_volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        Self {
            sample_rate: self.sample_rate.map(clamp_sample_rate),
            channels: self.channels.clamp(1, 2),
            default_volume,
            block_frames: self.block_frames.max(1),
        }
    }
}

pub fn clamp_sample_rate(rate: u32) -> u32 {
    rate.clamp(MIN_SAMPLE_RATE, MAX_SAMPLE_RATE)
}
