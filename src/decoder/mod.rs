// src/decoder/mod.rs

pub mod dsp;
pub mod resample;

use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, Context};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::default::{get_codecs, get_probe};

use crate::engine::TrackBuffer;

/// Decodes a whole file into interleaved f32 at its native rate.
///
/// The format of the first non-empty packet is kept for the whole buffer;
/// later packets with a different channel count are remapped to it.
pub fn decode_file(path: impl AsRef<Path>) -> anyhow::Result<TrackBuffer> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = get_probe()
        .format(
            &Default::default(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("probing {}", path.display()))?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("{}: no default audio track", path.display()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = get_codecs().make(&codec_params, &DecoderOptions::default())?;
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut remapped: Vec<f32> = Vec::new();
    let mut out = Vec::<f32>::new();
    let mut locked: Option<(u32, usize)> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                log::warn!("{}: stopped reading at packet error: {e}", path.display());
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("{}: skipping bad packet: {e}", path.display());
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if decoded.frames() == 0 {
            continue;
        }

        let spec = *decoded.spec();
        let packet_channels = spec.channels.count();
        let (_, channels) = *locked.get_or_insert_with(|| {
            log::debug!(
                "{}: {} Hz / {} ch",
                path.display(),
                spec.rate,
                packet_channels
            );
            (spec.rate, packet_channels)
        });

        let capacity = decoded.capacity();
        if sample_buf.as_ref().is_none_or(|b| b.capacity() < capacity) {
            sample_buf = Some(SampleBuffer::<f32>::new(capacity as u64, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);
        let samples = buf.samples();

        if packet_channels == channels {
            out.extend_from_slice(samples);
        } else {
            let frames = samples.len() / packet_channels.max(1);
            remapped.resize(frames * channels, 0.0);
            let got = dsp::remap_channels_into(samples, packet_channels, &mut remapped, channels);
            out.extend_from_slice(&remapped[..got * channels]);
        }
    }

    let (sample_rate, channels) =
        locked.ok_or_else(|| anyhow!("{}: no audio decoded", path.display()))?;
    log::info!(
        "decoded {}: {} samples, {} Hz / {} ch",
        path.display(),
        out.len(),
        sample_rate,
        channels
    );
    Ok(TrackBuffer::new(out, sample_rate, channels))
}
