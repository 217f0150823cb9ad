//! Pointrig Application
//!
//! Drives a depth-camera rig: acquires synchronized colour/depth/infrared
//! frames, optionally forwards them to the display sink, and exports a
//! colorized vertex map on a fixed schedule. Runs against the synthetic
//! camera; SDK-backed sources plug in behind the same `FrameSource` trait.

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use pointrig_capture::{RigCalibration, SyntheticCamera};
use pointrig_pipeline::FrameLoop;
use tracing::info;

/// Pointrig - Depth-camera frame loop with vertex-map export
#[derive(Parser, Debug)]
#[command(name = "pointrig")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of frames to acquire before exiting
    #[arg(short = 'n', long, default_value_t = 100)]
    frames: u64,

    /// Export the vertex map every K frames (0 disables periodic export)
    #[arg(short, long, default_value_t = 30)]
    export_every: u64,

    /// Vertex map output path
    #[arg(short, long, default_value = "RealVertex.csv")]
    output: PathBuf,

    /// Forward colour frames to the display sink
    #[arg(long)]
    show_colour: bool,

    /// Forward depth frames to the display sink
    #[arg(long)]
    show_depth: bool,

    /// Forward infrared frames to the display sink
    #[arg(long)]
    show_ir: bool,

    /// Path to a rig calibration JSON file (defaults to the built-in
    /// 640x480 calibration)
    #[arg(short, long)]
    calibration: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("pointrig error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let calibration = match &args.calibration {
        Some(path) => RigCalibration::from_json_file(path)?,
        None => RigCalibration::default(),
    };

    let camera = SyntheticCamera::with_calibration(calibration)?;
    let mut pipeline = FrameLoop::new(camera).with_export_path(&args.output);
    pipeline.set_show_colour(args.show_colour);
    pipeline.set_show_depth(args.show_depth);
    pipeline.set_show_ir(args.show_ir);

    pipeline.run_for_frames(args.frames, args.export_every)?;

    let stats = pipeline.stats();
    info!(
        "Run complete: {} acquisitions, {} export attempts, {} points written",
        stats.acquisitions, stats.export_attempts, stats.exported_points
    );
    Ok(())
}
