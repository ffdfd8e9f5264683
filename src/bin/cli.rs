//! CLI application for detecting faces and covering them with overlays.
//!
//! Usage:
//!   pepe-face <image>                            # Writes <image>_pepe.png
//!   pepe-face <image> -o out.png --seed 7        # Reproducible overlay choice
//!   pepe-face <image> --json                     # Also print a JSON report

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use pepe_face::{
    load_cascade, Detection, Error, ModelFormat, OverlayPool, Pipeline, PipelineConfig,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit code when the cascade finds no face.
const EXIT_NO_FACES: i32 = 2;
/// Exit code when faces were found but none was confident enough.
const EXIT_NO_OVERLAYS: i32 = 3;

#[derive(Parser, Debug)]
#[command(name = "pepe-face")]
#[command(author, version, about = "Detect faces and paste a meme over each one", long_about = None)]
struct Args {
    /// Input image file
    #[arg(required = true)]
    image: PathBuf,

    /// Output image (default: <image>_pepe.png)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Cascade model path (.bz2 files are decompressed)
    #[arg(short, long, default_value = "facefinder")]
    cascade: PathBuf,

    /// Cascade file layout
    #[arg(long, value_enum, default_value_t = ModelFormat::Pigo)]
    format: ModelFormat,

    /// Directory holding the numbered overlay images
    #[arg(long, default_value = ".")]
    overlays: PathBuf,

    /// Overlay file name prefix, files are <prefix>1.png, <prefix>2.png, ...
    #[arg(long, default_value = "pepe_opacity")]
    overlay_prefix: String,

    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Minimum size of face
    #[arg(long)]
    min_size: Option<u32>,

    /// Maximum size of face
    #[arg(long)]
    max_size: Option<u32>,

    /// Shift detection window by percentage of its size
    #[arg(long)]
    shift: Option<f64>,

    /// Scale detection window by this factor, must be greater than 1
    #[arg(long)]
    scale: Option<f64>,

    /// Rotation of the detector, 0.0 is 0 radians and 1.0 is 2*pi radians
    #[arg(long)]
    angle: Option<f64>,

    /// Intersection over union (IoU) threshold for merging detections
    #[arg(long)]
    iou: Option<f32>,

    /// Minimum face confidence for drawing an overlay
    #[arg(long)]
    threshold: Option<f32>,

    /// Overlay size relative to the face
    #[arg(long)]
    scale_up: Option<f32>,

    /// Seed for overlay selection (default: random)
    #[arg(long)]
    seed: Option<u64>,

    /// Print a JSON report to stdout
    #[arg(short, long)]
    json: bool,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Output structure for JSON serialization
#[derive(Serialize)]
struct Report {
    image: String,
    output: String,
    width: u32,
    height: u32,
    faces_detected: usize,
    overlays_drawn: usize,
    faces: Vec<Detection>,
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(e) = run(&args) {
        match e.downcast_ref::<Error>() {
            Some(Error::NoDetections) => {
                eprintln!("No faces found in {}", args.image.display());
                std::process::exit(EXIT_NO_FACES);
            }
            Some(err @ Error::NoOverlaysDrawn { .. }) => {
                eprintln!("Nothing drawn: {}", err);
                std::process::exit(EXIT_NO_OVERLAYS);
            }
            _ => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_config(args: &Args) -> Result<PipelineConfig, Error> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(v) = args.min_size {
        config.scan.min_size = v;
    }
    if let Some(v) = args.max_size {
        config.scan.max_size = v;
    }
    if let Some(v) = args.shift {
        config.scan.shift_factor = v;
    }
    if let Some(v) = args.scale {
        config.scan.scale_factor = v;
    }
    if let Some(v) = args.angle {
        config.scan.angle = v;
    }
    if let Some(v) = args.iou {
        config.cluster.iou_threshold = v;
    }
    if let Some(v) = args.threshold {
        config.composite.confidence_threshold = v;
    }
    if let Some(v) = args.scale_up {
        config.composite.scale_up = v;
    }

    config.validate()?;
    Ok(config)
}

fn default_output(image: &Path) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    image.with_file_name(format!("{}_pepe.png", stem))
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(args)?;

    tracing::debug!("Loading cascade from {:?}...", args.cascade);
    let forest = load_cascade(&args.cascade, args.format)?;

    tracing::debug!("Loading overlays from {:?}...", args.overlays);
    let overlays = OverlayPool::load_numbered(&args.overlays, &args.overlay_prefix)?;

    let pipeline = Pipeline::new(Arc::new(forest), Arc::new(overlays), config)?;

    tracing::debug!("Loading image {:?}...", args.image);
    let img = image::open(&args.image)?;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let composite = pipeline.process(&img, &mut rng)?;

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&args.image));
    composite.image.save(&output)?;
    tracing::info!("Output written to {:?}", output);

    if args.json {
        let report = Report {
            image: args.image.display().to_string(),
            output: output.display().to_string(),
            width: composite.image.width(),
            height: composite.image.height(),
            faces_detected: composite.faces.len(),
            overlays_drawn: composite.drawn,
            faces: composite.faces,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}
