use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, ValueEnum};
use serde::Deserialize;

use pdiot_stream::{
    ChannelSet, ClassifierSlot, CsvRecorder, DeviceRole, JsonLinesSegmentStore,
    LinearClassifier, MemorySegmentStore, PipelineConfig, SegmentStore, Session, WindowLayout,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Channels {
    Accel,
    AccelGyro,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Layout {
    Primary,
    Secondary,
    Interleaved,
}

#[derive(Parser, Debug)]
#[command(name = "pdiot-replay")]
#[command(about = "Replay captured sensor frames through the activity pipeline", long_about = None)]
struct Args {
    /// Capture file, one JSON object per line: {"device", "host_ts", "frame"}
    #[arg(long)]
    capture: PathBuf,

    /// Pipeline configuration JSON (defaults apply to missing fields)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the window size
    #[arg(long)]
    window_size: Option<usize>,

    /// Override the channel set
    #[arg(long, value_enum)]
    channels: Option<Channels>,

    /// Linear classifier JSON driving the activity log
    #[arg(long, requires = "labels")]
    model: Option<PathBuf>,

    /// Class labels, in model output order
    #[arg(long, value_delimiter = ',')]
    labels: Vec<String>,

    /// Which window the model reads
    #[arg(long, value_enum, default_value = "interleaved")]
    layout: Layout,

    /// Append segments to this JSON-lines log instead of keeping them in memory
    #[arg(long)]
    store: Option<PathBuf>,

    /// Write per-device CSV recordings into this directory
    #[arg(long)]
    record_dir: Option<PathBuf>,

    /// Summarize this UTC day (YYYY-MM-DD) instead of the replayed span
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Write the activity summary as JSON
    #[arg(long)]
    export: Option<PathBuf>,
}

#[derive(Deserialize)]
struct CaptureLine {
    device: DeviceRole,
    host_ts: i64,
    frame: Vec<u8>,
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(window_size) = args.window_size {
        config.window_size = window_size;
    }
    if let Some(channels) = args.channels {
        config.channels = match channels {
            Channels::Accel => ChannelSet::Accel,
            Channels::AccelGyro => ChannelSet::AccelGyro,
        };
    }
    config.validate()?;
    Ok(config)
}

fn load_slots(args: &Args) -> Result<Vec<ClassifierSlot>> {
    let Some(path) = &args.model else {
        return Ok(Vec::new());
    };
    let model = LinearClassifier::from_json_file(path)
        .with_context(|| format!("loading model {}", path.display()))?;
    let layout = match args.layout {
        Layout::Primary => WindowLayout::Single(DeviceRole::Primary),
        Layout::Secondary => WindowLayout::Single(DeviceRole::Secondary),
        Layout::Interleaved => WindowLayout::Interleaved,
    };
    let slot = ClassifierSlot::new("activity", layout, args.labels.clone(), Box::new(model))
        .driving_segments();
    Ok(vec![slot])
}

fn spawn_recorder(
    session: &Session,
    dir: &Path,
    role: DeviceRole,
) -> Result<JoinHandle<Result<u64>>> {
    let config = session.config().device(role);
    let name = format!("{:?}_{:?}.csv", role, config.family).to_lowercase();
    let mut recorder = CsvRecorder::create(dir.join(&name), config.family, config.mode)
        .with_context(|| format!("creating {}", name))?;
    let events = session.subscribe_unbounded();

    let handle = std::thread::Builder::new()
        .name(format!("recorder-{:?}", role).to_lowercase())
        .spawn(move || -> Result<u64> { Ok(recorder.drain(&events, role)?) })?;
    Ok(handle)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = load_config(&args)?;
    let slots = load_slots(&args)?;
    let store: Arc<dyn SegmentStore> = match &args.store {
        Some(path) => Arc::new(
            JsonLinesSegmentStore::open(path)
                .with_context(|| format!("opening store {}", path.display()))?,
        ),
        None => Arc::new(MemorySegmentStore::new()),
    };

    let session = Session::new(config, slots, store)?;

    let mut recorders = Vec::new();
    if let Some(dir) = &args.record_dir {
        fs::create_dir_all(dir)?;
        for role in DeviceRole::ALL {
            recorders.push((role, spawn_recorder(&session, dir, role)?));
        }
    }

    let file = File::open(&args.capture)
        .with_context(|| format!("opening capture {}", args.capture.display()))?;
    session.start_recording()?;

    let mut first_ts = None;
    let mut last_ts = 0i64;
    let mut frames = 0usize;
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: CaptureLine = serde_json::from_str(&line)
            .with_context(|| format!("capture line {}", number + 1))?;
        session.ingest(entry.device, &entry.frame, entry.host_ts)?;
        first_ts.get_or_insert(entry.host_ts);
        last_ts = last_ts.max(entry.host_ts);
        frames += 1;
    }
    let Some(first_ts) = first_ts else {
        bail!("capture {} has no frames", args.capture.display());
    };

    let report = session.stop_recording(last_ts)?;
    let metadata = session.get_metadata()?;
    // Samples of the first batch are stamped up to one batch interval before its arrival
    let lookback = DeviceRole::ALL
        .iter()
        .map(|&role| session.config().device(role).average_batch_interval_ms)
        .max()
        .unwrap_or(0);
    let window_ms = session.config().window_duration_ms();
    let export = match args.date {
        Some(date) => session.daily_summary(date)?,
        None => session.activity_summary(first_ts - lookback, last_ts + 1)?,
    };
    drop(session);

    for (role, handle) in recorders {
        match handle.join() {
            Ok(Ok(rows)) => println!("{:?}: {} rows recorded", role, rows),
            Ok(Err(e)) => eprintln!("{:?}: recording failed: {}", role, e),
            Err(_) => eprintln!("{:?}: recorder panicked", role),
        }
    }

    println!("Frames replayed:   {}", frames);
    println!(
        "Primary:           {} samples, {} gaps, {} dropped frames",
        metadata.primary.samples, metadata.primary.gaps, metadata.primary.dropped_frames
    );
    println!(
        "Secondary:         {} samples, {} gaps, {} dropped frames",
        metadata.secondary.samples, metadata.secondary.gaps, metadata.secondary.dropped_frames
    );
    println!(
        "Windows:           {} classified ({} ms each), {} dropped, {} failures",
        report.inference.windows, window_ms, report.windows_dropped, report.inference.failures
    );
    println!("Segments written:  {}", report.segments_written);
    if metadata.lost_events > 0 {
        println!("Events lost:       {}", metadata.lost_events);
    }

    let span = |ts: i64| {
        DateTime::<Utc>::from_timestamp_millis(ts)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| ts.to_string())
    };
    println!();
    match args.date {
        Some(date) => println!("Activity summary for {}", date),
        None => println!("Activity summary {} .. {}", span(first_ts), span(last_ts)),
    }
    for entry in &export.summary {
        println!("  {:<24} {}", entry.activity_name, entry.formatted_duration());
    }

    if let Some(path) = &args.export {
        fs::write(path, export.to_json()?)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Summary written to {}", path.display());
    }

    Ok(())
}
