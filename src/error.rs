// src/error.rs

use thiserror::Error;

/// Failures of the hardware output sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("no output device available")]
    NoDevice,
    #[error("could not query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
    #[error("could not build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("could not start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
    #[error("sink thread exited before reporting its state")]
    ThreadGone,
}

/// Failures while building a format adapter for one track.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("resampler construction failed ({from} Hz -> {to} Hz): {source}")]
    Resampler {
        from: u32,
        to: u32,
        #[source]
        source: rubato::ResamplerConstructionError,
    },
    #[error("unsupported channel count {0}")]
    Channels(usize),
}
