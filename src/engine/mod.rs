// src/engine/mod.rs

pub mod mixer;
pub mod output;
pub mod time;
pub mod track;

#[cfg(test)]
mod tests;

pub use mixer::{MixerInput, MixingBus};
pub use output::{CpalSink, NullSink, OutputSink};
pub use time::{MusicalPosition, TempoMap, TimeSignature};
pub use track::{PlayOptions, PlaybackState, TrackBuffer, TrackId};

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::audio::setup_output_device;
use crate::config::{clamp_sample_rate, EngineConfig};
use crate::provider::{
    FormatAdapterStage, LoopHandle, LoopRegion, LoopRegionProvider, PauseGate, PauseHandle,
    PositionHandle, PositionTracker, SampleProvider, SharedChain, StreamFormat, VolumeHandle,
    VolumeStage,
};

/// Everything the engine keeps for one playing track.
///
/// `stable` is the part of the chain that survives output format changes;
/// `input` is the mixer registration wrapping the current format adapter.
struct PlaybackSession {
    stable: SharedChain,
    looping: LoopHandle,
    volume: VolumeHandle,
    position: PositionHandle,
    pause: PauseHandle,
    input: Arc<MixerInput>,
}

struct Control {
    bus: Arc<MixingBus>,
    sink: Box<dyn OutputSink>,
}

/// Multi-track playback engine.
///
/// Construct one per output device and share it (`Arc<PlaybackEngine>`) with
/// whatever drives it. Every control call is keyed by [`TrackId`]; calls for
/// ids with no session are no-ops.
///
/// Lock order is always `control` first, then the session map. The audio
/// thread takes neither.
pub struct PlaybackEngine {
    control: Mutex<Control>,
    sessions: DashMap<TrackId, PlaybackSession>,
    states: DashMap<TrackId, PlaybackState>,
    default_volume: f32,
    block_frames: usize,
}

impl PlaybackEngine {
    /// Opens the default output device. The mixer runs at the configured
    /// rate, or the device's own rate when none is set.
    pub fn new(config: &EngineConfig) -> anyhow::Result<Self> {
        let config = config.sanitized();
        let sample_rate = match config.sample_rate {
            Some(rate) => rate,
            None => setup_output_device()?.output_sample_rate,
        };
        let format = StreamFormat::new(sample_rate, config.channels);
        Self::with_sink(Box::new(CpalSink::new()), format, &config)
    }

    /// Builds the engine on `sink` and starts it at `format`.
    pub fn with_sink(
        mut sink: Box<dyn OutputSink>,
        format: StreamFormat,
        config: &EngineConfig,
    ) -> anyhow::Result<Self> {
        let config = config.sanitized();
        let format = StreamFormat::new(
            clamp_sample_rate(format.sample_rate),
            format.channels.clamp(1, 2),
        );
        let bus = Arc::new(MixingBus::new(format));
        sink.start(Arc::clone(&bus))?;

        log::info!(
            "playback engine up: {} Hz / {} ch",
            format.sample_rate,
            format.channels
        );

        Ok(Self {
            control: Mutex::new(Control { bus, sink }),
            sessions: DashMap::new(),
            states: DashMap::new(),
            default_volume: config.default_volume,
            block_frames: config.block_frames,
        })
    }

    /// Engine with no hardware behind it. Audio is pulled by calling
    /// [`MixingBus::render`] on [`bus`](Self::bus).
    pub fn headless(format: StreamFormat, config: &EngineConfig) -> anyhow::Result<Self> {
        Self::with_sink(Box::new(NullSink::new()), format, config)
    }

    /// The mixing bus currently feeding the sink. Replaced on every output
    /// format change.
    pub fn bus(&self) -> Arc<MixingBus> {
        Arc::clone(&self.control.lock().bus)
    }

    pub fn output_format(&self) -> StreamFormat {
        self.control.lock().bus.format()
    }

    /// False after a sink start failed; the next `set_output_format` call
    /// retries even at the current rate.
    pub fn is_output_running(&self) -> bool {
        self.control.lock().sink.is_running()
    }

    /// Starts `buffer` on `id`, replacing whatever `id` was playing.
    /// Empty buffers are ignored.
    pub fn play(&self, id: TrackId, buffer: TrackBuffer, options: PlayOptions) -> anyhow::Result<()> {
        if buffer.is_empty() {
            log::warn!("play {id}: empty buffer ignored");
            return Ok(());
        }

        let control = self.control.lock();
        if self.sessions.remove(&id).is_some() {
            control.bus.remove_input(id);
        }

        let volume = options.volume.unwrap_or(self.default_volume);
        let len = buffer.len();

        let provider = LoopRegionProvider::new(Arc::clone(buffer.samples()), buffer.format());
        let looping = provider.handle();
        let volume_stage = VolumeStage::new(SampleProvider::LoopRegion(provider), volume);
        let volume = volume_stage.handle();
        let tracker = PositionTracker::new(SampleProvider::Volume(volume_stage));
        let position = tracker.handle();
        let gate = PauseGate::new(SampleProvider::Tracking(tracker));
        let pause = gate.handle();
        let stable = SharedChain::new(SampleProvider::Pausable(gate));

        if options.looping {
            looping.set_loop(0, len, 1.0, false);
        }
        if options.start_sample != 0 {
            looping.seek(options.start_sample);
            position.set_position(looping.position() as u64);
        }

        let format = control.bus.format();
        let tail = FormatAdapterStage::new(stable.clone(), format, self.block_frames)?;
        if !tail.is_passthrough() {
            log::debug!(
                "play {id}: adapting {} Hz / {} ch to {} Hz / {} ch",
                buffer.sample_rate(),
                buffer.channels(),
                format.sample_rate,
                format.channels
            );
        }
        let input = Arc::new(MixerInput::new(id, tail));
        control.bus.add_input(Arc::clone(&input));

        self.sessions.insert(
            id,
            PlaybackSession {
                stable,
                looping,
                volume,
                position,
                pause,
                input,
            },
        );
        self.states.insert(id, PlaybackState::Playing);

        log::info!(
            "play {id}: {} samples @ {} Hz / {} ch, loop={}",
            len,
            buffer.sample_rate(),
            buffer.channels(),
            options.looping
        );
        Ok(())
    }

    /// Unregisters `id` from the mixer and drops its session. Idempotent.
    pub fn stop(&self, id: TrackId) {
        let control = self.control.lock();
        if self.sessions.remove(&id).is_some() {
            control.bus.remove_input(id);
            log::info!("stop {id}");
        }
        self.states.insert(id, PlaybackState::Stopped);
    }

    pub fn pause(&self, id: TrackId) {
        self.set_paused(id, true);
    }

    pub fn resume(&self, id: TrackId) {
        self.set_paused(id, false);
    }

    fn set_paused(&self, id: TrackId, paused: bool) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        session.pause.set_paused(paused);
        let state = if paused {
            PlaybackState::Paused
        } else {
            PlaybackState::Playing
        };
        self.states.insert(id, state);
        log::debug!("{id}: {state:?}");
    }

    /// Moves the cursor and the position counter to the frame holding
    /// `sample` (clamped to the last frame). Without a session the track is
    /// only marked stopped.
    pub fn seek(&self, id: TrackId, sample: usize) {
        match self.sessions.get(&id) {
            Some(session) => {
                session.looping.seek(sample);
                session.position.set_position(session.looping.position() as u64);
                log::debug!("seek {id} -> {sample}");
            }
            None => {
                self.states.insert(id, PlaybackState::Stopped);
            }
        }
    }

    pub fn set_volume(&self, id: TrackId, volume: f32) {
        if volume.is_nan() {
            return;
        }
        if let Some(session) = self.sessions.get(&id) {
            session.volume.set(volume.clamp(0.0, 1.0));
        }
    }

    pub fn set_loop(&self, id: TrackId, start: usize, end: usize, fraction: f64, reset_cursor: bool) {
        if let Some(session) = self.sessions.get(&id) {
            session.looping.set_loop(start, end, fraction, reset_cursor);
            log::debug!("loop {id}: [{start}, {end}) x{fraction}");
        }
    }

    pub fn update_loop_fraction(&self, id: TrackId, fraction: f64, reset_cursor: bool) {
        if let Some(session) = self.sessions.get(&id) {
            session.looping.update_loop_fraction(fraction, reset_cursor);
            log::debug!("loop {id}: x{fraction}");
        }
    }

    pub fn clear_loop(&self, id: TrackId) {
        if let Some(session) = self.sessions.get(&id) {
            session.looping.clear_loop();
            log::debug!("loop {id}: cleared");
        }
    }

    pub fn loop_region(&self, id: TrackId) -> Option<LoopRegion> {
        self.sessions.get(&id).map(|s| s.looping.region())
    }

    /// Samples delivered since play or the last seek.
    pub fn position(&self, id: TrackId) -> Option<u64> {
        self.sessions.get(&id).map(|s| s.position.position())
    }

    /// Index of the next sample the track will read from its buffer.
    pub fn cursor(&self, id: TrackId) -> Option<usize> {
        self.sessions.get(&id).map(|s| s.looping.position())
    }

    /// A session whose input ran dry reports `Stopped` even before it is
    /// reaped.
    pub fn state(&self, id: TrackId) -> PlaybackState {
        if let Some(session) = self.sessions.get(&id) {
            if session.input.is_finished() {
                return PlaybackState::Stopped;
            }
        }
        self.states.get(&id).map(|s| *s).unwrap_or_default()
    }

    pub fn volume(&self, id: TrackId) -> Option<f32> {
        self.sessions.get(&id).map(|s| s.volume.get())
    }

    pub fn active_tracks(&self) -> Vec<TrackId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Stops every track that reached the end of its buffer and returns
    /// their ids.
    pub fn reap_finished(&self) -> Vec<TrackId> {
        let control = self.control.lock();
        let finished: Vec<TrackId> = self
            .sessions
            .iter()
            .filter(|entry| entry.input.is_finished())
            .map(|entry| *entry.key())
            .collect();

        for id in &finished {
            self.sessions.remove(id);
            control.bus.remove_input(*id);
            self.states.insert(*id, PlaybackState::Stopped);
            log::info!("{id}: end of stream");
        }
        finished
    }

    /// Switches the mixer to `sample_rate` (clamped to 8 kHz..192 kHz).
    ///
    /// The sink is stopped, every session gets a new format adapter over its
    /// existing stable chain on a fresh bus, and the sink restarts on that
    /// bus. A session whose adapter cannot be built stays silent until it is
    /// played again or the next successful switch. If the sink fails to
    /// restart, calling again with the same rate retries it.
    pub fn set_output_format(&self, sample_rate: u32) -> anyhow::Result<()> {
        let sample_rate = clamp_sample_rate(sample_rate);
        let mut control = self.control.lock();
        let current = control.bus.format();
        if current.sample_rate == sample_rate && control.sink.is_running() {
            return Ok(());
        }

        let format = StreamFormat::new(sample_rate, current.channels);
        log::info!(
            "output format {} Hz -> {} Hz",
            current.sample_rate,
            sample_rate
        );
        control.sink.stop();

        let bus = Arc::new(MixingBus::new(format));
        for mut entry in self.sessions.iter_mut() {
            let id = *entry.key();
            control.bus.remove_input(id);
            match FormatAdapterStage::new(entry.stable.clone(), format, self.block_frames) {
                Ok(tail) => {
                    let input = Arc::new(MixerInput::new(id, tail));
                    bus.add_input(Arc::clone(&input));
                    entry.input = input;
                }
                Err(e) => log::warn!("{id}: format rebuild failed: {e}"),
            }
        }

        control.bus = Arc::clone(&bus);
        if let Err(e) = control.sink.start(bus) {
            log::error!("output sink restart failed: {e:#}");
            return Err(e);
        }
        Ok(())
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.control.get_mut().sink.stop();
    }
}
