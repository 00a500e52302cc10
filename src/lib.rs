// src/lib.rs

pub mod audio;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod loop_control;
pub mod loop_math;
pub mod provider;

pub use config::EngineConfig;
pub use engine::{PlayOptions, PlaybackEngine, PlaybackState, TrackBuffer, TrackId};
pub use loop_control::LoopController;
pub use loop_math::{calculate_loop_range, LoopRange, LoopRangeRequest};
