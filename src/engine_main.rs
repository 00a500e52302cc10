// src/engine_main.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};

use daw_playback::config::EngineConfig;
use daw_playback::decoder::decode_file;
use daw_playback::engine::{PlayOptions, PlaybackEngine, PlaybackState, TempoMap, TrackBuffer, TrackId};
use daw_playback::loop_control::{LoopController, LOOP_FRACTIONS, LOOP_MULTIPLIERS};
use daw_playback::provider::StreamFormat;

const SEEK_STEP_SECS: usize = 5;
const VOLUME_STEP: f32 = 0.1;

#[derive(Parser, Debug)]
#[command(name = "engine_player", about = "Play and loop audio files on the playback engine")]
struct Args {
    /// Audio files, all played at once
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// JSON engine config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tempo used for loop-button lengths
    #[arg(long, default_value_t = 120.0)]
    bpm: f64,

    /// Render offline to this WAV file instead of opening the device
    #[arg(long)]
    render: Option<PathBuf>,

    /// Length of the offline render
    #[arg(long, default_value_t = 10.0)]
    seconds: f64,
}

struct Deck {
    id: TrackId,
    buffer: TrackBuffer,
    looper: LoopController,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let tempo = TempoMap::with_bpm(args.bpm);

    let mut decks = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let buffer = decode_file(path)?;
        let id = TrackId::new();
        let looper = LoopController::new(id, &buffer, tempo.clone());
        decks.push(Deck { id, buffer, looper });
    }

    match &args.render {
        Some(out) => render_offline(&decks, &config, out, args.seconds),
        None => run_interactive(decks, &config, &tempo),
    }
}

fn play_all(engine: &PlaybackEngine, decks: &[Deck]) -> anyhow::Result<()> {
    for deck in decks {
        engine.play(deck.id, deck.buffer.clone(), PlayOptions::default())?;
        deck.looper.restore(engine);
    }
    Ok(())
}

/// Pulls the mix through a headless engine and writes it as 32-bit float WAV.
fn render_offline(decks: &[Deck], config: &EngineConfig, out: &Path, seconds: f64) -> anyhow::Result<()> {
    let config = config.sanitized();
    let format = StreamFormat::new(config.sample_rate.unwrap_or(44_100), config.channels);
    let engine = PlaybackEngine::headless(format, &config)?;
    play_all(&engine, decks)?;

    let spec = hound::WavSpec {
        channels: format.channels as u16,
        sample_rate: format.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(out, spec)
        .with_context(|| format!("creating {}", out.display()))?;

    let total = (seconds.max(0.0) * format.sample_rate as f64) as usize * format.channels;
    let bus = engine.bus();
    let mut block = vec![0.0f32; config.block_frames * format.channels];
    let mut scratch = Vec::new();
    let mut written = 0;
    while written < total {
        let n = block.len().min(total - written);
        bus.render(&mut block[..n], &mut scratch);
        for s in &block[..n] {
            writer.write_sample(*s)?;
        }
        written += n;
    }
    writer.finalize()?;

    log::info!("rendered {seconds:.1}s to {}", out.display());
    Ok(())
}

struct RawMode;

impl RawMode {
    fn enable() -> anyhow::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

fn run_interactive(mut decks: Vec<Deck>, config: &EngineConfig, tempo: &TempoMap) -> anyhow::Result<()> {
    let engine = Arc::new(PlaybackEngine::new(config)?);
    play_all(&engine, &decks)?;

    let _raw = RawMode::enable()?;
    print!("Engine player:\r\n");
    print!("  SPACE = Pause/Resume   S = Stop/Replay   Q = Quit\r\n");
    print!("  <-/-> = Seek 5s        +/- = Volume\r\n");
    print!("  1..6  = Loop 1/4, 1/2, 1, 2, 4, 8 beats\r\n");
    print!("  N = Flip anchor   M = Multiplier   C = Clear loop   R = 44.1k/48k\r\n");

    let mut multiplier_idx = 0;

    loop {
        if !event::poll(Duration::from_millis(50))? {
            for id in engine.reap_finished() {
                print!("track {id} finished\r\n");
            }
            continue;
        }
        let Event::Key(ev) = event::read()? else {
            continue;
        };
        if ev.kind != KeyEventKind::Press {
            continue;
        }
        if ev.code == KeyCode::Char('c') && ev.modifiers.contains(KeyModifiers::CONTROL) {
            break;
        }

        match ev.code {
            KeyCode::Char('q') | KeyCode::Char('Q') => break,
            KeyCode::Char(' ') => {
                for deck in &decks {
                    match engine.state(deck.id) {
                        PlaybackState::Playing => engine.pause(deck.id),
                        PlaybackState::Paused => engine.resume(deck.id),
                        PlaybackState::Stopped => {}
                    }
                }
            }
            KeyCode::Char('s') | KeyCode::Char('S') => {
                if engine.active_tracks().is_empty() {
                    play_all(&engine, &decks)?;
                } else {
                    for deck in &decks {
                        engine.stop(deck.id);
                    }
                }
            }
            KeyCode::Left | KeyCode::Right => {
                for deck in &decks {
                    let Some(cursor) = engine.cursor(deck.id) else {
                        continue;
                    };
                    let step = SEEK_STEP_SECS * deck.buffer.sample_rate() as usize * deck.buffer.channels();
                    let target = if ev.code == KeyCode::Left {
                        cursor.saturating_sub(step)
                    } else {
                        cursor.saturating_add(step)
                    };
                    engine.seek(deck.id, target);
                }
            }
            KeyCode::Char('+') | KeyCode::Char('=') | KeyCode::Char('-') => {
                let delta = if ev.code == KeyCode::Char('-') { -VOLUME_STEP } else { VOLUME_STEP };
                for deck in &decks {
                    if let Some(v) = engine.volume(deck.id) {
                        engine.set_volume(deck.id, v + delta);
                    }
                }
            }
            KeyCode::Char(c @ '1'..='6') => {
                let fraction = LOOP_FRACTIONS[(c as usize) - ('1' as usize)];
                for deck in &mut decks {
                    deck.looper.press(&engine, fraction);
                }
            }
            KeyCode::Char('n') | KeyCode::Char('N') => {
                for deck in &mut decks {
                    deck.looper.flip(&engine);
                }
            }
            KeyCode::Char('m') | KeyCode::Char('M') => {
                multiplier_idx = (multiplier_idx + 1) % LOOP_MULTIPLIERS.len();
                let multiplier = LOOP_MULTIPLIERS[multiplier_idx];
                for deck in &mut decks {
                    deck.looper.set_multiplier(&engine, multiplier);
                }
                print!("multiplier x{multiplier}\r\n");
            }
            KeyCode::Char('c') | KeyCode::Char('C') => {
                for deck in &mut decks {
                    deck.looper.clear(&engine);
                }
            }
            KeyCode::Char('r') | KeyCode::Char('R') => {
                let next = if engine.output_format().sample_rate == 48_000 { 44_100 } else { 48_000 };
                if let Err(e) = engine.set_output_format(next) {
                    print!("format change failed: {e:#}\r\n");
                }
            }
            _ => continue,
        }
        print_status(&engine, &decks, tempo);
    }

    for deck in &decks {
        engine.stop(deck.id);
    }
    Ok(())
}

fn print_status(engine: &PlaybackEngine, decks: &[Deck], tempo: &TempoMap) {
    let format = engine.output_format();
    print!("[{} Hz]\r\n", format.sample_rate);
    for deck in decks {
        let state = engine.state(deck.id);
        let cursor = engine.cursor(deck.id).unwrap_or(0);
        let rate = deck.buffer.sample_rate();
        let channels = deck.buffer.channels();
        let samples_per_sec = (rate as usize * channels).max(1);
        let volume = engine.volume(deck.id).unwrap_or(0.0);
        let looping = match engine.loop_region(deck.id) {
            Some(r) if r.enabled => format!(
                "loop [{}, {}) {:.2}s",
                r.start,
                r.end,
                r.len() as f64 / samples_per_sec as f64
            ),
            _ => "no loop".to_string(),
        };
        print!(
            "  {:?} {:>7.2}/{:.2}s bar {} vol {:.1} {}\r\n",
            state,
            cursor as f64 / samples_per_sec as f64,
            deck.buffer.duration().as_secs_f64(),
            tempo.musical_position(cursor, rate, channels),
            volume,
            looping
        );
    }
}
