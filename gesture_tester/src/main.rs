mod replay;

use anyhow::Context;
use clap::Parser;
use gesture_vision::SessionConfig;
use gesture_vision::core_modules::persistence::FileStore;
use gesture_vision::pipeline::GesturePipeline;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Replays a recorded hand-tracking session through the gesture pipeline and
/// prints the resulting log as JSON lines.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON-lines recording of tracker frames and control commands.
    recording: PathBuf,

    /// Directory holding the persisted gesture model.
    #[arg(long, default_value = "gesture_models")]
    model_dir: PathBuf,

    /// Optional JSON session config. `GV_*` environment variables override it.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    // --- 1. Logging & Argument Parsing ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gesture_vision=info,gesture_tester=info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    // --- 2. Configuration ---
    let config = match &args.config {
        Some(path) => SessionConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SessionConfig::default(),
    }
    .with_env_overrides()
    .context("applying GV_* overrides")?;

    // --- 3. Recording ---
    let file = File::open(&args.recording)
        .with_context(|| format!("opening recording {}", args.recording.display()))?;
    let events = replay::parse_recording(BufReader::new(file))?;
    info!("Loaded {} events from {}", events.len(), args.recording.display());

    // --- 4. Pipeline & Replay ---
    std::fs::create_dir_all(&args.model_dir)
        .with_context(|| format!("creating model dir {}", args.model_dir.display()))?;
    let mut pipeline = GesturePipeline::new(config, FileStore::new(&args.model_dir))?;
    info!("Model restored with {} examples", pipeline.store().len());
    let summary = replay::replay(&mut pipeline, &events);

    // --- 5. Output ---
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for entry in pipeline.log() {
        serde_json::to_writer(&mut out, entry)?;
        writeln!(out)?;
    }

    info!(
        "Replay complete: {} frames, {} gesture events, {} skipped hands, {} rejected commands",
        summary.frames, summary.gesture_events, summary.skipped_hands, summary.rejected_commands
    );
    for (label, examples) in pipeline.store().entries() {
        info!("  {label}: {} examples", examples.len());
    }
    Ok(())
}
