// src/provider/adapter.rs

use rubato::{Resampler, SincFixedIn};

use super::{SharedChain, Source, StreamFormat};
use crate::decoder::{dsp, resample};
use crate::error::AdapterError;

/// Converts a track's stable chain into the mixer's output format.
///
/// Channels are remapped first, then the sample rate is converted, so the
/// resampler always runs at the output channel count. When both formats match
/// the stage reads straight through.
pub struct FormatAdapterStage {
    upstream: SharedChain,
    source: StreamFormat,
    target: StreamFormat,
    /// Upstream samples at the source channel count.
    raw: Vec<f32>,
    /// Remapped samples at the target channel count, source rate.
    mapped: Vec<f32>,
    resampler: Option<ResampleState>,
}

struct ResampleState {
    resampler: SincFixedIn<f32>,
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
    /// Resampled interleaved frames not yet handed out.
    pending: Vec<f32>,
    pending_pos: usize,
    drained: bool,
}

impl FormatAdapterStage {
    pub fn new(
        upstream: SharedChain,
        target: StreamFormat,
        block_frames: usize,
    ) -> Result<Self, AdapterError> {
        let source = upstream.format();
        if source.channels == 0 {
            return Err(AdapterError::Channels(source.channels));
        }
        if target.channels == 0 {
            return Err(AdapterError::Channels(target.channels));
        }

        let resampler = resample::build_resampler(
            source.sample_rate,
            target.sample_rate,
            target.channels,
            resample::PLAYBACK_CHUNK_FRAMES,
        )
        .map_err(|source_err| AdapterError::Resampler {
            from: source.sample_rate,
            to: target.sample_rate,
            source: source_err,
        })?
        .map(ResampleState::new);

        let frames = block_frames.max(resample::PLAYBACK_CHUNK_FRAMES);
        Ok(Self {
            upstream,
            source,
            target,
            raw: vec![0.0; frames * source.channels],
            mapped: vec![0.0; frames * target.channels],
            resampler,
        })
    }

    /// Whether this adapter converts anything at all.
    pub fn is_passthrough(&self) -> bool {
        self.source == self.target
    }

    /// Pulls `frames` frames from upstream and remaps them into `self.mapped`.
    /// Returns the number of frames available there.
    fn pull_mapped(&mut self, frames: usize) -> usize {
        let in_ch = self.source.channels;
        let out_ch = self.target.channels;
        if self.raw.len() < frames * in_ch {
            self.raw.resize(frames * in_ch, 0.0);
        }
        if self.mapped.len() < frames * out_ch {
            self.mapped.resize(frames * out_ch, 0.0);
        }
        let got = self.upstream.read(&mut self.raw[..frames * in_ch]);
        let got_frames = got / in_ch;
        dsp::remap_channels_into(
            &self.raw[..got_frames * in_ch],
            in_ch,
            &mut self.mapped[..got_frames * out_ch],
            out_ch,
        )
    }

    fn read_direct(&mut self, out: &mut [f32]) -> usize {
        if self.source.channels == self.target.channels {
            return self.target.whole_frames(self.upstream.read(out));
        }
        let out_ch = self.target.channels;
        let frames = out.len() / out_ch;
        let got = self.pull_mapped(frames);
        out[..got * out_ch].copy_from_slice(&self.mapped[..got * out_ch]);
        got * out_ch
    }

    fn read_resampled(&mut self, out: &mut [f32]) -> usize {
        let out_ch = self.target.channels;
        let mut written = 0;

        loop {
            let Some(state) = self.resampler.as_mut() else {
                return written;
            };
            written += state.drain_pending(&mut out[written..]);
            if written == out.len() || state.drained {
                return written;
            }

            let need = state.resampler.input_frames_next();
            let got = self.pull_mapped(need);
            let Some(state) = self.resampler.as_mut() else {
                return written;
            };
            state.refill(&self.mapped[..got * out_ch], got, need);
        }
    }
}

impl ResampleState {
    fn new(resampler: SincFixedIn<f32>) -> Self {
        let channels = resampler.nbr_channels();
        let in_frames = resampler.input_frames_max();
        let out_frames = resampler.output_frames_max();
        Self {
            input: vec![vec![0.0; in_frames]; channels],
            output: vec![vec![0.0; out_frames]; channels],
            pending: Vec::with_capacity(out_frames * channels * 2),
            pending_pos: 0,
            drained: false,
            resampler,
        }
    }

    fn drain_pending(&mut self, out: &mut [f32]) -> usize {
        let take = (self.pending.len() - self.pending_pos).min(out.len());
        out[..take].copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + take]);
        self.pending_pos += take;
        take
    }

    /// Feeds `got` frames of `mapped` to the resampler. A short chunk means the
    /// upstream ended: it is resampled as a partial block and the filter tail
    /// is flushed.
    fn refill(&mut self, mapped: &[f32], got: usize, need: usize) {
        self.pending.clear();
        self.pending_pos = 0;

        dsp::deinterleave_into(mapped, &mut self.input, got);

        if got == need {
            match self
                .resampler
                .process_into_buffer(&self.input, &mut self.output, None)
            {
                Ok((_, produced)) => {
                    dsp::interleave_append(&self.output, produced, &mut self.pending)
                }
                Err(_) => self.drained = true,
            }
            return;
        }

        self.drained = true;
        for ch in &mut self.input {
            ch.truncate(got);
        }
        if let Ok((_, produced)) = self.resampler.process_partial_into_buffer(
            Some(self.input.as_slice()),
            &mut self.output,
            None,
        ) {
            dsp::interleave_append(&self.output, produced, &mut self.pending);
        }
        if let Ok((_, produced)) = self.resampler.process_partial_into_buffer(
            None::<&[Vec<f32>]>,
            &mut self.output,
            None,
        ) {
            dsp::interleave_append(&self.output, produced, &mut self.pending);
        }
        let in_frames = self.resampler.input_frames_max();
        for ch in &mut self.input {
            ch.resize(in_frames, 0.0);
        }
    }
}

impl Source for FormatAdapterStage {
    fn read(&mut self, out: &mut [f32]) -> usize {
        let len = self.target.whole_frames(out.len());
        if len == 0 {
            return 0;
        }
        let out = &mut out[..len];
        if self.resampler.is_some() {
            self.read_resampled(out)
        } else {
            self.read_direct(out)
        }
    }

    fn format(&self) -> StreamFormat {
        self.target
    }
}
