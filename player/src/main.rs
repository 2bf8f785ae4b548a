//! rp-player
//!
//! Plays a recorded capture file through the playback engine and prints
//! what it delivers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use rp_common::{Sample, StreamKind};
use rp_playback::{PlaybackConfig, PlaybackEngine, PlaybackEvent};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Recorded capture file player
#[derive(Parser, Debug)]
#[command(name = "rp-player")]
#[command(about = "Play back a recorded multi-sensor capture file")]
#[command(version)]
struct Args {
    /// Capture file to play
    path: PathBuf,

    /// Streams to enable (comma-separated, default: every stream in the file)
    #[arg(long, value_delimiter = ',')]
    streams: Vec<StreamKind>,

    /// Deliver motion and time samples
    #[arg(long)]
    motion: bool,

    /// Deliver as fast as frames decode instead of pacing to capture time
    #[arg(long)]
    no_realtime: bool,

    /// JSON playback config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seek to this frame of the first enabled stream before playing
    #[arg(long, conflicts_with = "seek_time")]
    seek_frame: Option<u32>,

    /// Seek to this capture time (microseconds) before playing
    #[arg(long)]
    seek_time: Option<u64>,

    /// Print file information as JSON and exit
    #[arg(long)]
    info: bool,

    /// Print one line per delivered sample
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let mut config = match &args.config {
        Some(path) => PlaybackConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PlaybackConfig::default(),
    };
    if args.no_realtime {
        config.realtime = false;
    }

    let mut engine = PlaybackEngine::open_with_config(&args.path, config)
        .with_context(|| format!("Failed to open {}", args.path.display()))?;

    if args.info {
        print_info(&engine)?;
        return Ok(());
    }

    let streams: Vec<StreamKind> = if args.streams.is_empty() {
        engine.streams().map(|s| s.stream).collect()
    } else {
        args.streams.clone()
    };
    for &stream in &streams {
        if engine.stream_info(stream).is_none() {
            anyhow::bail!("stream {stream} is not recorded in {}", args.path.display());
        }
        engine.enable_stream(stream, true);
    }
    engine.enable_motion(args.motion);

    let seeked = match (args.seek_frame, args.seek_time, streams.first()) {
        (Some(n), _, Some(&stream)) => Some(engine.seek_to_frame(stream, n)?),
        (Some(_), _, None) => anyhow::bail!("--seek-frame needs at least one enabled stream"),
        (None, Some(ts), _) => Some(engine.seek_to_time(ts)?),
        (None, None, _) => None,
    };
    if let Some(frames) = seeked {
        if frames.is_empty() {
            warn!("Seek target is past the end of the recording");
        }
        for (stream, frame) in &frames {
            info!(%stream, frame = frame.frame_number, capture_time = frame.header.capture_time, "Seeked");
        }
    }

    let rx = engine.subscribe();
    let start = Instant::now();
    engine.resume().context("Failed to start playback")?;

    let mut frames: BTreeMap<StreamKind, u64> = BTreeMap::new();
    let mut motion = 0u64;
    for event in rx.iter() {
        match event {
            PlaybackEvent::Sample(sample) => {
                if args.verbose {
                    print_sample(&sample);
                }
                match sample {
                    Sample::Image(frame) => *frames.entry(frame.stream).or_default() += 1,
                    Sample::Motion(_) | Sample::Time(_) => motion += 1,
                    Sample::DebugEvent(_) => {}
                }
            }
            PlaybackEvent::EndOfFile => break,
        }
    }
    engine.pause();

    let drops = engine.drop_stats();
    println!("Played {} in {:.2?}", args.path.display(), start.elapsed());
    for (stream, count) in &frames {
        let dropped = drops.per_stream.get(stream).copied().unwrap_or(0);
        println!("  {stream:<10} {count:>8} frames  ({dropped} dropped in recording)");
    }
    if args.motion {
        println!("  {:<10} {motion:>8} samples ({} dropped)", "motion", drops.motion);
    }

    Ok(())
}

fn print_info(engine: &PlaybackEngine) -> Result<()> {
    let streams: Vec<_> = engine.streams().collect();
    let frame_counts: BTreeMap<String, u32> = streams
        .iter()
        .map(|s| (s.stream.to_string(), engine.query_frame_count(s.stream)))
        .collect();
    let report = serde_json::json!({
        "file": engine.file_info(),
        "device": engine.device_info(),
        "streams": streams,
        "frame_counts": frame_counts,
        "properties": engine.properties(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_sample(sample: &Sample) {
    match sample {
        Sample::Image(frame) => println!(
            "{:>12} us  {:<10} #{:<6} {}x{} {:?}",
            frame.header.capture_time,
            frame.stream,
            frame.frame_number,
            frame.width,
            frame.height,
            frame.format
        ),
        Sample::Motion(m) => println!(
            "{:>12} us  {:<10} #{:<6} {:?} {:?}",
            m.header.capture_time,
            "motion",
            m.frame_number,
            m.motion,
            m.data
        ),
        Sample::Time(t) => println!(
            "{:>12} us  {:<10} #{:<6} source {}",
            t.header.capture_time, "time", t.frame_number, t.source
        ),
        Sample::DebugEvent(e) => println!(
            "{:>12} us  {:<10} {} {}",
            e.header.capture_time, "event", e.event_id, e.message
        ),
    }
}
