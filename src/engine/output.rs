// src/engine/output.rs

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{bounded, Sender};

use super::mixer::MixingBus;
use crate::audio::setup_output_device;
use crate::error::SinkError;

/// Where the mixed stream goes. The sink pulls; the engine never pushes.
pub trait OutputSink: Send {
    /// Starts pulling `bus` at the bus's format.
    fn start(&mut self, bus: Arc<MixingBus>) -> anyhow::Result<()>;

    /// Stops pulling. Safe to call when not running.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Sink for headless use. Nothing pulls the bus except the caller, via
/// [`MixingBus::render`].
#[derive(Default)]
pub struct NullSink {
    bus: Option<Arc<MixingBus>>,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputSink for NullSink {
    fn start(&mut self, bus: Arc<MixingBus>) -> anyhow::Result<()> {
        self.bus = Some(bus);
        Ok(())
    }

    fn stop(&mut self) {
        self.bus = None;
    }

    fn is_running(&self) -> bool {
        self.bus.is_some()
    }
}

struct RunningStream {
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

/// Hardware sink on the default cpal device.
///
/// The cpal stream lives on its own thread for its whole life: it is created,
/// played and dropped there, and the engine only keeps a stop channel.
#[derive(Default)]
pub struct CpalSink {
    running: Option<RunningStream>,
}

impl CpalSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputSink for CpalSink {
    fn start(&mut self, bus: Arc<MixingBus>) -> anyhow::Result<()> {
        self.stop();

        let (ready_tx, ready_rx) = bounded::<Result<(), SinkError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let format = bus.format();

        let thread = thread::Builder::new()
            .name("playback-sink".into())
            .spawn(move || {
                let stream = match open_stream(bus) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Blocks until stop() sends or drops the sender.
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!(
                    "output sink started at {} Hz / {} ch",
                    format.sample_rate,
                    format.channels
                );
                self.running = Some(RunningStream { stop_tx, thread });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e.into())
            }
            Err(_) => {
                let _ = thread.join();
                Err(SinkError::ThreadGone.into())
            }
        }
    }

    fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.stop_tx.send(());
        if running.thread.join().is_err() {
            log::error!("output sink thread panicked while shutting down");
        } else {
            log::info!("output sink stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_stream(bus: Arc<MixingBus>) -> Result<Stream, SinkError> {
    let output = setup_output_device()?;
    let format = bus.format();
    let config = StreamConfig {
        channels: format.channels as u16,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match output.sample_format {
        SampleFormat::I16 => build_stream::<i16>(&output.device, &config, bus)?,
        SampleFormat::U16 => build_stream::<u16>(&output.device, &config, bus)?,
        _ => build_stream::<f32>(&output.device, &config, bus)?,
    };
    stream.play()?;
    Ok(stream)
}

/// Build CPAL output stream that pulls from the mixing bus.
fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    bus: Arc<MixingBus>,
) -> Result<Stream, SinkError>
where
    T: cpal::Sample + cpal::FromSample<f32> + SizedSample,
{
    let mut mix: Vec<f32> = Vec::with_capacity(8_192);
    let mut scratch: Vec<f32> = Vec::with_capacity(8_192);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            if mix.len() < data.len() {
                mix.resize(data.len(), 0.0);
            }
            let block = &mut mix[..data.len()];
            bus.render(block, &mut scratch);
            for (out, s) in data.iter_mut().zip(block.iter()) {
                *out = T::from_sample(*s);
            }
        },
        |err| log::error!("output stream error: {err}"),
        None,
    )?;
    Ok(stream)
}
