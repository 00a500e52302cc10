// src/provider/stages.rs

use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Arc,
};

use super::{SampleProvider, Source, StreamFormat};

// --- Volume ---

/// Gain shared with the audio thread as the bit pattern of an f32.
#[derive(Clone, Debug)]
pub struct VolumeHandle(Arc<AtomicU32>);

impl VolumeHandle {
    pub fn new(volume: f32) -> Self {
        Self(Arc::new(AtomicU32::new(volume.clamp(0.0, 1.0).to_bits())))
    }

    pub fn set(&self, volume: f32) {
        self.0.store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

pub struct VolumeStage {
    inner: Box<SampleProvider>,
    volume: VolumeHandle,
}

impl VolumeStage {
    pub fn new(inner: SampleProvider, volume: f32) -> Self {
        Self {
            inner: Box::new(inner),
            volume: VolumeHandle::new(volume),
        }
    }

    pub fn handle(&self) -> VolumeHandle {
        self.volume.clone()
    }
}

impl Source for VolumeStage {
    fn read(&mut self, out: &mut [f32]) -> usize {
        let n = self.inner.read(out);
        let gain = self.volume.get();
        if (gain - 1.0).abs() > f32::EPSILON {
            for s in &mut out[..n] {
                *s *= gain;
            }
        }
        n
    }

    fn format(&self) -> StreamFormat {
        self.inner.format()
    }
}

// --- Position tracking ---

/// Lock-free view of the samples a track has actually delivered.
#[derive(Clone, Debug)]
pub struct PositionHandle(Arc<AtomicU64>);

impl PositionHandle {
    pub fn position(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn set_position(&self, samples: u64) {
        self.0.store(samples, Ordering::Release);
    }
}

/// Counts the samples its upstream returns, regardless of how the upstream
/// loops or seeks internally.
pub struct PositionTracker {
    inner: Box<SampleProvider>,
    counter: PositionHandle,
}

impl PositionTracker {
    pub fn new(inner: SampleProvider) -> Self {
        Self {
            inner: Box::new(inner),
            counter: PositionHandle(Arc::new(AtomicU64::new(0))),
        }
    }

    pub fn handle(&self) -> PositionHandle {
        self.counter.clone()
    }
}

impl Source for PositionTracker {
    fn read(&mut self, out: &mut [f32]) -> usize {
        let n = self.inner.read(out);
        self.counter.0.fetch_add(n as u64, Ordering::AcqRel);
        n
    }

    fn format(&self) -> StreamFormat {
        self.inner.format()
    }
}

// --- Pause ---

#[derive(Clone, Debug)]
pub struct PauseHandle(Arc<AtomicBool>);

impl PauseHandle {
    pub fn set_paused(&self, paused: bool) {
        self.0.store(paused, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Emits silence while paused. The track stays registered with the mixer, so
/// resuming never has to re-link anything.
pub struct PauseGate {
    inner: Box<SampleProvider>,
    paused: PauseHandle,
}

impl PauseGate {
    pub fn new(inner: SampleProvider) -> Self {
        Self {
            inner: Box::new(inner),
            paused: PauseHandle(Arc::new(AtomicBool::new(false))),
        }
    }

    pub fn handle(&self) -> PauseHandle {
        self.paused.clone()
    }
}

impl Source for PauseGate {
    fn read(&mut self, out: &mut [f32]) -> usize {
        if self.paused.is_paused() {
            out.fill(0.0);
            return out.len();
        }
        self.inner.read(out)
    }

    fn format(&self) -> StreamFormat {
        self.inner.format()
    }
}
