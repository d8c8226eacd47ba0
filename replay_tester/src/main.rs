mod heatmap;
mod recording;
mod store;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;
use thermal_occupancy::{
    run_feed, CounterConfig, CrossingEvent, Detection, FrameFeed, OccupancyPipeline, ReplaySource,
    Snapshot, TrackSummary,
};

use recording::read_recording;
use store::JsonFileStore;

#[derive(Parser, Debug)]
#[command(name = "replay_tester", about = "Replays a thermal sensor log through the occupancy counter")]
struct Args {
    /// CSV log with `Timestamp_ms, Occupancy, Pixel_0..` columns
    input: PathBuf,
    /// JSON file overriding the default counter configuration
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// JSON background file, loaded when present and written after calibration
    #[arg(long, value_name = "PATH")]
    background: Option<PathBuf>,
    /// Leading rows used to calibrate the background (defaults to the config value)
    #[arg(long)]
    calibration_frames: Option<usize>,
    /// Directory to write one PNG heatmap per replayed frame
    #[arg(long, value_name = "DIR")]
    heatmaps: Option<PathBuf>,
    /// Print every snapshot as a JSON line
    #[arg(long)]
    json: bool,
    /// Capacity of the frame buffer between reader and counter
    #[arg(long, default_value_t = 32)]
    buffer: usize,
}

#[derive(Serialize)]
struct SnapshotLine<'a> {
    timestamp_ms: u128,
    occupancy: u32,
    entrances: u64,
    exits: u64,
    presence: bool,
    detections: &'a [Detection],
    tracks: &'a [TrackSummary],
    events: &'a [CrossingEvent],
}

impl<'a> From<&'a Snapshot> for SnapshotLine<'a> {
    fn from(snapshot: &'a Snapshot) -> Self {
        Self {
            timestamp_ms: snapshot.timestamp.as_millis(),
            occupancy: snapshot.occupancy,
            entrances: snapshot.entrances,
            exits: snapshot.exits,
            presence: snapshot.presence,
            detections: &snapshot.detections,
            tracks: &snapshot.tracks,
            events: &snapshot.events,
        }
    }
}

fn load_config(args: &Args) -> Result<CounterConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("cannot open config {}", path.display()))?;
            serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("cannot parse config {}", path.display()))?
        }
        None => CounterConfig::default(),
    };
    if let Some(frames) = args.calibration_frames {
        config.background_frames = frames;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // --- 1. Argument Parsing & Setup ---
    let args = Args::parse();
    let config = load_config(&args)?;
    if let Some(dir) = &args.heatmaps {
        std::fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    }

    // --- 2. Recording Input ---
    let input = File::open(&args.input).with_context(|| format!("cannot open {}", args.input.display()))?;
    let mut rows = read_recording(BufReader::new(input), config.grid_width, config.grid_height)?;
    let last_recorded = rows.last().map(|row| row.recorded_occupancy);
    log::info!("Loaded {} frames from {}", rows.len(), args.input.display());

    // --- 3. Counter Initialization ---
    let mut store = JsonFileStore::new(args.background.clone());
    let calibration_rows = if store.has_background() {
        0
    } else {
        config.background_frames.min(rows.len())
    };
    let calibration: Vec<_> = rows.drain(..calibration_rows).map(|row| row.frame).collect();
    let mut pipeline = OccupancyPipeline::bootstrap(config.clone(), &mut store, &calibration)
        .context("cannot establish a background")?;

    // --- 4. Replay ---
    let frames: Vec<_> = rows.into_iter().map(|row| row.frame).collect();
    let mut feed = FrameFeed::spawn(ReplaySource::from(frames), args.buffer, Duration::from_millis(1));
    let mut frame_index = 0usize;
    let processed = run_feed(&mut pipeline, &mut feed, |snapshot| {
        if args.json {
            match serde_json::to_string(&SnapshotLine::from(snapshot)) {
                Ok(line) => println!("{line}"),
                Err(err) => log::warn!("Cannot serialize snapshot: {}", err),
            }
        }
        if let Some(dir) = &args.heatmaps {
            let path = dir.join(format!("frame_{frame_index:06}.png"));
            if let Err(err) = heatmap::save(&path, &heatmap::render(snapshot, &config)) {
                log::warn!("Cannot write {}: {}", path.display(), err);
            }
        }
        frame_index += 1;
    })
    .await?;
    feed.shutdown().await;

    // --- 5. Summary ---
    let counter = pipeline.tracker().counter();
    println!("Replayed {} frames ({} used for calibration)", processed, calibration_rows);
    println!(
        "Occupancy: {} | Entrances: {} | Exits: {}",
        counter.occupancy(),
        counter.entrances(),
        counter.exits()
    );
    if let Some(recorded) = last_recorded {
        println!("Last recorded occupancy: {}", recorded);
    }
    Ok(())
}
