// src/engine/tests.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::*;
use crate::config::EngineConfig;
use crate::provider::StreamFormat;

fn engine(sample_rate: u32) -> PlaybackEngine {
    PlaybackEngine::headless(StreamFormat::new(sample_rate, 2), &EngineConfig::default()).unwrap()
}

fn stereo_ramp(frames: usize) -> TrackBuffer {
    let samples: Vec<f32> = (0..frames * 2).map(|i| (i % 1_000) as f32 / 1_000.0).collect();
    TrackBuffer::new(samples, 44_100, 2)
}

/// Pulls `total` samples from the engine's bus in `block`-sized calls.
fn pull(engine: &PlaybackEngine, total: usize, block: usize) -> Vec<f32> {
    let bus = engine.bus();
    let mut scratch = Vec::new();
    let mut out = Vec::with_capacity(total);
    let mut buf = vec![0.0; block];
    while out.len() < total {
        let n = block.min(total - out.len());
        bus.render(&mut buf[..n], &mut scratch);
        out.extend_from_slice(&buf[..n]);
    }
    out
}

#[test]
fn play_then_loop_wraps_buffer() {
    let engine = engine(44_100);
    let id = TrackId::new();
    let buffer = stereo_ramp(44_100);
    engine.play(id, buffer.clone(), PlayOptions::default()).unwrap();
    assert_eq!(engine.state(id), PlaybackState::Playing);

    pull(&engine, 88_200, 4_410);
    assert_eq!(engine.position(id), Some(88_200));
    assert_eq!(engine.cursor(id), Some(88_200));

    engine.set_loop(id, 0, 44_100 * 2, 1.0, false);
    let out = pull(&engine, 200_000, 4_096);

    // Two whole passes, then 23_600 samples into the third.
    let expected: Vec<f32> = buffer.samples().iter().cycle().take(200_000).copied().collect();
    assert_eq!(out, expected);
    assert_eq!(engine.cursor(id), Some(23_600));
    assert_eq!(engine.position(id), Some(288_200));
    assert_eq!(engine.state(id), PlaybackState::Playing);
}

#[test]
fn looped_output_matches_repeated_slice() {
    let engine = engine(44_100);
    let id = TrackId::new();
    let buffer = stereo_ramp(1_000);
    let expected: Vec<f32> = buffer.samples()[200..600]
        .iter()
        .cycle()
        .take(2_000)
        .copied()
        .collect();

    engine.play(id, buffer, PlayOptions::default()).unwrap();
    engine.set_loop(id, 200, 600, 1.0, true);
    let out = pull(&engine, 2_000, 512);
    assert_eq!(out, expected);
}

#[test]
fn non_looping_track_plays_out_and_is_reaped() {
    let engine = engine(44_100);
    let id = TrackId::new();
    engine.play(id, stereo_ramp(100), PlayOptions::default()).unwrap();

    let out = pull(&engine, 256, 256);
    assert!(out[200..].iter().all(|s| *s == 0.0));
    assert_eq!(engine.position(id), Some(200));
    assert_eq!(engine.state(id), PlaybackState::Stopped);

    assert_eq!(engine.reap_finished(), vec![id]);
    assert!(engine.active_tracks().is_empty());
    assert!(engine.reap_finished().is_empty());
}

#[test]
fn pause_freezes_position_and_silences() {
    let engine = engine(44_100);
    let id = TrackId::new();
    engine.play(id, stereo_ramp(10_000), PlayOptions::default()).unwrap();
    pull(&engine, 1_000, 500);

    engine.pause(id);
    assert_eq!(engine.state(id), PlaybackState::Paused);
    let out = pull(&engine, 4_000, 500);
    assert!(out.iter().all(|s| *s == 0.0));
    assert_eq!(engine.position(id), Some(1_000));
    assert_eq!(engine.cursor(id), Some(1_000));

    engine.resume(id);
    assert_eq!(engine.state(id), PlaybackState::Playing);
    pull(&engine, 500, 500);
    assert_eq!(engine.position(id), Some(1_500));
}

#[test]
fn seek_moves_cursor_and_counter() {
    let engine = engine(44_100);
    let id = TrackId::new();
    engine.play(id, stereo_ramp(1_000), PlayOptions::default()).unwrap();

    engine.seek(id, 1_500);
    assert_eq!(engine.cursor(id), Some(1_500));
    assert_eq!(engine.position(id), Some(1_500));

    engine.seek(id, 1_000_000);
    assert_eq!(engine.cursor(id), Some(1_998));
}

#[test]
fn stereo_seek_to_odd_sample_keeps_channels() {
    let engine = engine(44_100);
    let id = TrackId::new();
    let samples: Vec<f32> = (0..2_000).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
    engine.play(id, TrackBuffer::new(samples, 44_100, 2), PlayOptions::default()).unwrap();

    engine.seek(id, 101);
    assert_eq!(engine.cursor(id), Some(100));
    assert_eq!(engine.position(id), Some(100));

    let out = pull(&engine, 8, 8);
    assert_eq!(out, [1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0]);
}

#[test]
fn play_options_seed_loop_and_start() {
    let engine = engine(44_100);
    let id = TrackId::new();
    let options = PlayOptions {
        looping: true,
        start_sample: 400,
        volume: Some(0.5),
    };
    engine.play(id, stereo_ramp(500), options).unwrap();

    let region = engine.loop_region(id).unwrap();
    assert!(region.enabled);
    assert_eq!((region.start, region.end), (0, 1_000));
    assert_eq!(engine.cursor(id), Some(400));
    assert_eq!(engine.position(id), Some(400));
    assert_eq!(engine.volume(id), Some(0.5));

    // Looping never runs dry.
    pull(&engine, 5_000, 1_024);
    assert_eq!(engine.state(id), PlaybackState::Playing);
}

#[test]
fn volume_is_clamped_and_applied() {
    let engine = engine(44_100);
    let id = TrackId::new();
    engine
        .play(id, TrackBuffer::new(vec![0.5; 64], 44_100, 2), PlayOptions::default())
        .unwrap();

    engine.set_volume(id, 4.0);
    assert_eq!(engine.volume(id), Some(1.0));
    engine.set_volume(id, 0.5);
    let out = pull(&engine, 8, 8);
    assert!(out.iter().all(|s| (*s - 0.25).abs() < 1e-6));

    engine.set_volume(id, -1.0);
    assert_eq!(engine.volume(id), Some(0.0));
}

#[test]
fn output_format_change_keeps_stable_chain_state() {
    let engine = engine(44_100);
    let id = TrackId::new();
    engine.play(id, stereo_ramp(44_100), PlayOptions::default()).unwrap();
    engine.set_loop(id, 10_000, 30_000, 0.5, false);
    pull(&engine, 12_000, 1_000);

    let position = engine.position(id);
    let region = engine.loop_region(id);
    let old_bus = engine.bus();

    engine.set_output_format(48_000).unwrap();

    assert_eq!(engine.position(id), position);
    assert_eq!(engine.loop_region(id), region);
    assert_eq!(engine.output_format(), StreamFormat::new(48_000, 2));

    let new_bus = engine.bus();
    assert!(!Arc::ptr_eq(&old_bus, &new_bus));
    assert!(new_bus.contains(id));
    assert!(!old_bus.contains(id));

    // Still audible on the new bus.
    let out = pull(&engine, 4_096, 1_024);
    assert!(out.iter().any(|s| *s != 0.0));
}

#[test]
fn unchanged_or_clamped_format_is_a_no_op() {
    let engine = engine(44_100);
    let bus = engine.bus();
    engine.set_output_format(44_100).unwrap();
    assert!(Arc::ptr_eq(&bus, &engine.bus()));

    engine.set_output_format(1_000_000).unwrap();
    assert_eq!(engine.output_format().sample_rate, 192_000);
    let bus = engine.bus();
    engine.set_output_format(500_000).unwrap();
    assert!(Arc::ptr_eq(&bus, &engine.bus()));
}

/// Sink whose start fails while `fail` is set.
struct FlakySink {
    fail: Arc<AtomicBool>,
    bus: Option<Arc<MixingBus>>,
}

impl OutputSink for FlakySink {
    fn start(&mut self, bus: Arc<MixingBus>) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("device busy");
        }
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

#[test]
fn failed_sink_restart_can_be_retried() {
    let fail = Arc::new(AtomicBool::new(false));
    let sink = FlakySink { fail: Arc::clone(&fail), bus: None };
    let engine = PlaybackEngine::with_sink(
        Box::new(sink),
        StreamFormat::new(44_100, 2),
        &EngineConfig::default(),
    )
    .unwrap();
    let id = TrackId::new();
    engine.play(id, stereo_ramp(1_000), PlayOptions::default()).unwrap();
    assert!(engine.is_output_running());

    fail.store(true, Ordering::SeqCst);
    assert!(engine.set_output_format(48_000).is_err());
    assert!(!engine.is_output_running());

    fail.store(false, Ordering::SeqCst);
    engine.set_output_format(48_000).unwrap();
    assert!(engine.is_output_running());
    assert_eq!(engine.output_format().sample_rate, 48_000);
    assert!(engine.bus().contains(id));
}

#[test]
fn mono_track_at_other_rate_is_adapted() {
    let engine = engine(48_000);
    let id = TrackId::new();
    let buffer = TrackBuffer::new(vec![0.25; 22_050], 22_050, 1);
    engine.play(id, buffer, PlayOptions::default()).unwrap();

    let out = pull(&engine, 9_600, 960);
    assert!(out[4_000..8_000].iter().all(|s| (*s - 0.25).abs() < 0.05));
}

#[test]
fn replaying_replaces_the_session() {
    let engine = engine(44_100);
    let id = TrackId::new();
    engine.play(id, stereo_ramp(1_000), PlayOptions::default()).unwrap();
    pull(&engine, 500, 500);
    engine.play(id, stereo_ramp(1_000), PlayOptions::default()).unwrap();

    assert_eq!(engine.position(id), Some(0));
    assert_eq!(engine.bus().input_count(), 1);
    assert_eq!(engine.active_tracks(), vec![id]);
}

#[test]
fn stop_is_idempotent_and_unknown_ids_are_ignored() {
    let engine = engine(44_100);
    let id = TrackId::new();
    engine.play(id, stereo_ramp(100), PlayOptions::default()).unwrap();
    engine.stop(id);
    engine.stop(id);
    assert_eq!(engine.state(id), PlaybackState::Stopped);
    assert_eq!(engine.bus().input_count(), 0);

    let ghost = TrackId::new();
    engine.pause(ghost);
    engine.resume(ghost);
    engine.set_volume(ghost, 0.3);
    engine.set_loop(ghost, 0, 10, 1.0, false);
    engine.update_loop_fraction(ghost, 0.5, false);
    engine.clear_loop(ghost);
    engine.seek(ghost, 10);
    assert_eq!(engine.state(ghost), PlaybackState::Stopped);
    assert_eq!(engine.position(ghost), None);
    assert_eq!(engine.loop_region(ghost), None);
}

#[test]
fn empty_buffer_creates_no_session() {
    let engine = engine(44_100);
    let id = TrackId::new();
    engine
        .play(id, TrackBuffer::new(Vec::new(), 44_100, 2), PlayOptions::default())
        .unwrap();
    assert!(engine.active_tracks().is_empty());
    assert_eq!(engine.state(id), PlaybackState::Stopped);
}

#[test]
fn loop_fraction_update_is_idempotent_through_engine() {
    let engine = engine(44_100);
    let id = TrackId::new();
    engine.play(id, stereo_ramp(10_000), PlayOptions::default()).unwrap();
    engine.set_loop(id, 2_000, 6_000, 1.0, false);

    engine.update_loop_fraction(id, 1.0, false);
    let first = engine.loop_region(id);
    engine.update_loop_fraction(id, 1.0, false);
    assert_eq!(engine.loop_region(id), first);

    engine.clear_loop(id);
    let cleared = engine.loop_region(id).unwrap();
    assert!(!cleared.enabled);
    assert_eq!((cleared.start, cleared.end), (0, 20_000));
}

#[test]
fn control_calls_race_with_rendering() {
    let engine = Arc::new(engine(44_100));
    let id = TrackId::new();
    engine.play(id, stereo_ramp(4_000), PlayOptions { looping: true, ..Default::default() }).unwrap();

    let control = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || {
            for i in 0..200 {
                engine.set_loop(id, i * 10, 4_000 + i * 10, 1.0, true);
                engine.set_volume(id, (i % 10) as f32 / 10.0);
                engine.seek(id, i * 7);
            }
        })
    };

    let bus = engine.bus();
    let mut scratch = Vec::new();
    let mut out = vec![0.0; 512];
    for _ in 0..200 {
        bus.render(&mut out, &mut scratch);
    }
    control.join().unwrap();
    assert_eq!(engine.state(id), PlaybackState::Playing);
}
