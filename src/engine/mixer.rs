// src/engine/mixer.rs

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use super::track::TrackId;
use crate::provider::{FormatAdapterStage, Source, StreamFormat};

/// One track's contribution to the mix: the replaceable tail of its chain.
pub struct MixerInput {
    track: TrackId,
    tail: Mutex<FormatAdapterStage>,
    finished: AtomicBool,
}

impl MixerInput {
    pub fn new(track: TrackId, tail: FormatAdapterStage) -> Self {
        Self {
            track,
            tail: Mutex::new(tail),
            finished: AtomicBool::new(false),
        }
    }

    pub fn track(&self) -> TrackId {
        self.track
    }

    /// Set once the tail returned a short read; the bus stops pulling it.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Audio-thread pull. Never waits: if the control side holds the tail,
    /// this block is skipped as silence.
    fn pull(&self, out: &mut [f32]) -> usize {
        let Some(mut tail) = self.tail.try_lock() else {
            return 0;
        };
        let n = tail.read(out);
        if n < out.len() {
            self.finished.store(true, Ordering::Release);
        }
        n
    }
}

/// Sums every registered input into one interleaved stream at a fixed format.
///
/// The input list is published through `ArcSwap`: the audio thread loads a
/// snapshot without locking, control threads swap in a new list.
pub struct MixingBus {
    format: StreamFormat,
    inputs: ArcSwap<Vec<Arc<MixerInput>>>,
}

impl MixingBus {
    pub fn new(format: StreamFormat) -> Self {
        Self {
            format,
            inputs: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Registers `input`, replacing any input for the same track.
    pub fn add_input(&self, input: Arc<MixerInput>) {
        let track = input.track();
        self.inputs.rcu(|current| {
            let mut next: Vec<Arc<MixerInput>> = current
                .iter()
                .filter(|i| i.track() != track)
                .cloned()
                .collect();
            next.push(Arc::clone(&input));
            next
        });
    }

    pub fn remove_input(&self, track: TrackId) -> Option<Arc<MixerInput>> {
        let previous = self.inputs.rcu(|current| {
            current
                .iter()
                .filter(|i| i.track() != track)
                .cloned()
                .collect::<Vec<_>>()
        });
        previous.iter().find(|i| i.track() == track).cloned()
    }

    pub fn contains(&self, track: TrackId) -> bool {
        self.inputs.load().iter().any(|i| i.track() == track)
    }

    pub fn input_count(&self) -> usize {
        self.inputs.load().len()
    }

    /// Mixes one block into `out`. `scratch` is caller-owned so the audio
    /// thread can keep reusing the same allocation.
    pub fn render(&self, out: &mut [f32], scratch: &mut Vec<f32>) {
        out.fill(0.0);
        if scratch.len() < out.len() {
            scratch.resize(out.len(), 0.0);
        }
        let buf = &mut scratch[..out.len()];

        let inputs = self.inputs.load();
        for input in inputs.iter() {
            if input.is_finished() {
                continue;
            }
            let n = input.pull(buf);
            for (o, s) in out[..n].iter_mut().zip(&buf[..n]) {
                *o += *s;
            }
        }
    }
}
