// src/provider/mod.rs

//! Per-track pull graph.
//!
//! A playing track is a short chain of stages, each owning the one beneath it:
//!
//! ```text
//! FormatAdapter -> [ Pausable -> Tracking -> Volume -> LoopRegion ]
//!                   \________________ stable chain _______________/
//! ```
//!
//! The bracketed part is the *stable chain*. It is built once per `play` and
//! lives behind a [`SharedChain`] so the format adapter (the replaceable tail)
//! can be thrown away and rebuilt on an output format change without touching
//! loop, position or pause state.
//!
//! All counts are in interleaved samples (one frame = `channels` samples).

pub mod adapter;
pub mod looping;
pub mod stages;

use std::sync::Arc;

use parking_lot::Mutex;

pub use adapter::FormatAdapterStage;
pub use looping::{LoopHandle, LoopRegion, LoopRegionProvider};
pub use stages::{
    PauseGate, PauseHandle, PositionHandle, PositionTracker, VolumeHandle, VolumeStage,
};

/// Sample rate and channel count of an interleaved f32 stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: usize,
}

impl StreamFormat {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self { sample_rate, channels }
    }

    /// Rounds `samples` down to a whole number of frames.
    pub fn whole_frames(&self, samples: usize) -> usize {
        if self.channels == 0 {
            return 0;
        }
        samples - samples % self.channels
    }
}

/// Anything the mixer can pull interleaved audio from.
pub trait Source {
    /// Fills `out` and returns the number of samples written.
    /// A return value below `out.len()` means the source ran dry.
    fn read(&mut self, out: &mut [f32]) -> usize;

    /// Format of the samples produced by `read`.
    fn format(&self) -> StreamFormat;
}

/// The closed set of stages a track chain is built from.
pub enum SampleProvider {
    LoopRegion(LoopRegionProvider),
    Volume(VolumeStage),
    Tracking(PositionTracker),
    Pausable(PauseGate),
    FormatAdapter(FormatAdapterStage),
}

impl Source for SampleProvider {
    fn read(&mut self, out: &mut [f32]) -> usize {
        match self {
            SampleProvider::LoopRegion(p) => p.read(out),
            SampleProvider::Volume(p) => p.read(out),
            SampleProvider::Tracking(p) => p.read(out),
            SampleProvider::Pausable(p) => p.read(out),
            SampleProvider::FormatAdapter(p) => p.read(out),
        }
    }

    fn format(&self) -> StreamFormat {
        match self {
            SampleProvider::LoopRegion(p) => p.format(),
            SampleProvider::Volume(p) => p.format(),
            SampleProvider::Tracking(p) => p.format(),
            SampleProvider::Pausable(p) => p.format(),
            SampleProvider::FormatAdapter(p) => p.format(),
        }
    }
}

/// The stable half of a track chain, shared between the session that created
/// it and whichever format adapter currently feeds it to the mixer.
#[derive(Clone)]
pub struct SharedChain {
    inner: Arc<Mutex<SampleProvider>>,
    format: StreamFormat,
}

impl SharedChain {
    pub fn new(provider: SampleProvider) -> Self {
        let format = provider.format();
        Self {
            inner: Arc::new(Mutex::new(provider)),
            format,
        }
    }

}

impl Source for SharedChain {
    fn read(&mut self, out: &mut [f32]) -> usize {
        self.inner.lock().read(out)
    }

    fn format(&self) -> StreamFormat {
        self.format
    }
}
